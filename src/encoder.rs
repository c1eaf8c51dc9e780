use std::path::Path;

use crate::{embedding::EmbeddingMatrix, error::Result};

/// A text encoder producing one fixed-size vector per input text.
///
/// The pipeline only ever talks to encoders through this trait, so any
/// sentence-embedding model (or a deterministic stand-in in tests) can back
/// a build or a query session.
pub trait Encoder {
    /// Human-readable model name recorded in pipeline metadata.
    fn name(&self) -> &str;

    /// Maximum number of tokens considered per input; longer inputs are
    /// truncated.
    fn max_seq_length(&self) -> usize;

    /// Encode `texts` into a `[texts.len(), dim]` matrix, preserving input
    /// order. Blocks until the whole batch is done.
    fn encode(&self, texts: &[String]) -> Result<EmbeddingMatrix>;

    /// Write a self-contained copy of the encoder into `dir` so that it can
    /// be loaded again without network access.
    fn save(&self, dir: &Path) -> Result<()>;

    /// Encode a single text into a vector.
    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let matrix = self.encode(&[text.to_string()])?;
        if matrix.rows() != 1 {
            return Err(crate::error::Error::Encoder(format!(
                "encoder returned {} rows for a single text",
                matrix.rows()
            )));
        }
        Ok(matrix.row(0).to_vec())
    }
}

impl<E: Encoder + ?Sized> Encoder for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn max_seq_length(&self) -> usize {
        (**self).max_seq_length()
    }

    fn encode(&self, texts: &[String]) -> Result<EmbeddingMatrix> {
        (**self).encode(texts)
    }

    fn save(&self, dir: &Path) -> Result<()> {
        (**self).save(dir)
    }
}
