//! Deterministic stand-ins used by unit tests so nothing needs a model
//! download.

use std::{
    cell::{Cell, RefCell},
    path::Path,
};

use crate::{
    embedding::EmbeddingMatrix,
    encoder::Encoder,
    error::{Error, Result},
};

pub const TEST_DIM: usize = 256;
pub const TEST_MODEL_FILE: &str = "hashing_encoder.json";

/// Bag of character bigrams hashed into a fixed number of buckets.
///
/// Identical texts always get identical vectors, and texts sharing many
/// bigrams land close together, which is enough to exercise nearest
/// neighbour matching.
#[derive(Debug, Default)]
pub struct HashingEncoder {
    calls: Cell<usize>,
    batch_sizes: RefCell<Vec<usize>>,
}

impl HashingEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an encoder from a directory written by [`Encoder::save`].
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(TEST_MODEL_FILE);
        if !path.exists() {
            return Err(Error::Encoder(format!(
                "no hashing encoder state in {}",
                dir.display()
            )));
        }
        Ok(Self::new())
    }

    /// Number of `encode` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Size of every batch passed to `encode`, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.borrow().clone()
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; TEST_DIM];
        let chars: Vec<char> = std::iter::once('^')
            .chain(text.to_lowercase().chars())
            .chain(std::iter::once('$'))
            .collect();
        for pair in chars.windows(2) {
            let mut h: u64 = 0xcbf2_9ce4_8422_2325;
            for c in pair {
                h ^= *c as u64;
                h = h.wrapping_mul(0x0100_0000_01b3);
            }
            v[(h % TEST_DIM as u64) as usize] += 1.0;
        }
        v
    }
}

impl Encoder for HashingEncoder {
    fn name(&self) -> &str {
        "hashing-test-encoder"
    }

    fn max_seq_length(&self) -> usize {
        128
    }

    fn encode(&self, texts: &[String]) -> Result<EmbeddingMatrix> {
        self.calls.set(self.calls.get() + 1);
        self.batch_sizes.borrow_mut().push(texts.len());
        if texts.is_empty() {
            return Ok(EmbeddingMatrix::empty(TEST_DIM));
        }
        EmbeddingMatrix::from_rows(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(
            dir.join(TEST_MODEL_FILE),
            format!("{{\"dim\":{TEST_DIM}}}"),
        )?;
        Ok(())
    }
}

/// An encoder that always fails, for error propagation tests.
#[derive(Debug, Default)]
pub struct FailingEncoder;

impl Encoder for FailingEncoder {
    fn name(&self) -> &str {
        "failing-test-encoder"
    }

    fn max_seq_length(&self) -> usize {
        8
    }

    fn encode(&self, _texts: &[String]) -> Result<EmbeddingMatrix> {
        Err(Error::Encoder("encoder state is corrupted".into()))
    }

    fn save(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }
}
