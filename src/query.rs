use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    embedding::best_match,
    encoder::Encoder,
    error::{Error, Result},
    pipeline::{self, MODEL_DIR, PipelineIndex, PipelineMeta},
    sentence_encoder::SentenceEncoder,
};

pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// Outcome of matching one question against a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub question: String,
    /// Present only when `is_match`.
    pub answer: Option<String>,
    pub score: f32,
    pub is_match: bool,
    pub timestamp: DateTime<Utc>,
}

/// A loaded pipeline ready to answer questions.
pub struct QueryEngine {
    index: PipelineIndex,
    encoder: Box<dyn Encoder>,
}

impl QueryEngine {
    pub fn new(index: PipelineIndex, encoder: Box<dyn Encoder>) -> Self {
        Self { index, encoder }
    }

    /// Load a pipeline directory together with the sentence encoder saved
    /// inside it.
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_with(dir, |model_dir| {
            Ok(Box::new(SentenceEncoder::load(model_dir)?) as Box<dyn Encoder>)
        })
    }

    /// Load a pipeline directory, building the encoder from its
    /// `model_files` directory with `load_encoder`.
    pub fn open_with<F>(dir: &Path, load_encoder: F) -> Result<Self>
    where
        F: FnOnce(&Path) -> Result<Box<dyn Encoder>>,
    {
        pipeline::check_artifacts(dir)?;
        let encoder = load_encoder(&dir.join(MODEL_DIR))?;
        let index = PipelineIndex::load(dir)?;
        info!(
            path = %dir.display(),
            questions = index.embeddings.rows(),
            "pipeline loaded"
        );
        Ok(Self::new(index, encoder))
    }

    pub fn meta(&self) -> &PipelineMeta {
        &self.index.meta
    }

    /// Answer `question` with the nearest stored question's answer when its
    /// similarity is strictly above `threshold`.
    pub fn query(&self, question: &str, threshold: f32) -> Result<QueryResult> {
        let vector = self.encoder.encode_one(question)?;
        if vector.len() != self.index.embeddings.dim() {
            return Err(Error::Encoder(format!(
                "query embedding has dimension {}, pipeline stores {}",
                vector.len(),
                self.index.embeddings.dim()
            )));
        }

        let scores = self.index.embeddings.similarities(&vector);
        let (best_idx, best_score) = best_match(&scores).ok_or_else(|| {
            Error::InvalidFormat("pipeline has no comparable embeddings".into())
        })?;
        let (is_match, answer) =
            match_answer(&self.index.answers, best_idx, best_score, threshold);
        debug!(question, best_idx, best_score, is_match, "query scored");

        Ok(QueryResult {
            question: question.to_string(),
            answer,
            score: best_score,
            is_match,
            timestamp: Utc::now(),
        })
    }
}

/// Apply the threshold: a score equal to the threshold is not a match.
pub fn match_answer(
    answers: &[String],
    best_idx: usize,
    best_score: f32,
    threshold: f32,
) -> (bool, Option<String>) {
    let is_match = best_score > threshold;
    let answer = if is_match {
        answers.get(best_idx).cloned()
    } else {
        None
    };
    (is_match, answer)
}
