//! faqbert - answer FAQ-style questions by sentence-embedding similarity.
//!
//! A pipeline is built from a JSON dataset of question groups and their
//! answers: every question variant is encoded with a sentence-transformers
//! model running on [candle](https://github.com/huggingface/candle), paired
//! with one chosen answer, and persisted together with a copy of the model.
//! Queries are answered by cosine nearest neighbour over the stored
//! question embeddings, gated by a similarity threshold.
//!
//! # Quick start
//!
//! ```no_run
//! use faqbert::{DataDir, ModelManager, QueryEngine};
//! use faqbert::builder::{self, BuildOptions};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let models = ModelManager::new(data_dir.hub_dir().unwrap());
//! let encoder = models.load_encoder(faqbert::model_manager::DEFAULT_MODEL_ID).unwrap();
//!
//! let report = builder::build_pipeline(
//!     &data_dir.datasets_dir().unwrap().join("faq.json"),
//!     &data_dir.pipelines_dir().unwrap(),
//!     "faq",
//!     &encoder,
//!     &BuildOptions::default(),
//!     |_, _| {},
//! )
//! .unwrap();
//!
//! let engine = QueryEngine::open(&report.path).unwrap();
//! let result = engine.query("how do I reset my password?", 0.7).unwrap();
//! println!("{:?} ({:.2})", result.answer, result.score);
//! ```

pub mod answer_cache;
pub mod builder;
pub mod config_db;
pub mod data_dir;
pub mod dataset;
pub mod embedding;
pub mod encoder;
pub mod error;
pub mod model_manager;
pub mod pipeline;
pub mod query;
pub mod sentence_encoder;
pub mod session;
pub mod strategy;

#[cfg(test)]
mod test_utils;

pub use config_db::ConfigDb;
pub use data_dir::DataDir;
pub use dataset::FaqDataset;
pub use embedding::EmbeddingMatrix;
pub use encoder::Encoder;
pub use error::{Error, Result};
pub use model_manager::ModelManager;
pub use query::{QueryEngine, QueryResult};
pub use sentence_encoder::SentenceEncoder;
pub use session::{QuerySession, SessionStats};
pub use strategy::AnswerStrategy;
