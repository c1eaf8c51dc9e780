use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{embedding::EmbeddingMatrix, error::Result};

pub const DEFAULT_MAX_ITEMS: usize = 3;
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Content hash of an exact, ordered answer list.
pub type AnswerSetKey = blake3::Hash;

/// Hash an ordered answer list. Each answer is length-prefixed so that
/// `["ab", "c"]` and `["a", "bc"]` get different keys.
pub fn answer_set_key(answers: &[String]) -> AnswerSetKey {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&(answers.len() as u64).to_le_bytes());
    for answer in answers {
        hasher.update(&(answer.len() as u64).to_le_bytes());
        hasher.update(answer.as_bytes());
    }
    hasher.finalize()
}

#[derive(Debug, Clone)]
struct CacheEntry {
    embeddings: EmbeddingMatrix,
    inserted_at: Instant,
}

/// Memoizes encoded answer lists for the `most_similar` strategy.
///
/// Tuned for one actively reused answer set: a miss on a key other than the
/// current one clears the whole cache before computing. Entry count and age
/// are bounded.
#[derive(Debug)]
pub struct AnswerCache {
    entries: HashMap<AnswerSetKey, CacheEntry>,
    current: Option<AnswerSetKey>,
    max_items: usize,
    max_age: Duration,
}

impl Default for AnswerCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITEMS, DEFAULT_MAX_AGE)
    }
}

impl AnswerCache {
    pub fn new(max_items: usize, max_age: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            current: None,
            max_items,
            max_age,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, answers: &[String]) -> bool {
        self.entries.contains_key(&answer_set_key(answers))
    }

    /// Key of the answer set currently being reused, if any.
    pub fn current(&self) -> Option<AnswerSetKey> {
        self.current
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = None;
    }

    /// Return the embeddings of `answers`, computing them with `compute` on
    /// a miss or when `force_refresh` is set.
    pub fn get_or_compute<F>(
        &mut self,
        answers: &[String],
        force_refresh: bool,
        compute: F,
    ) -> Result<EmbeddingMatrix>
    where
        F: FnOnce(&[String]) -> Result<EmbeddingMatrix>,
    {
        self.get_or_compute_at(answers, force_refresh, Instant::now(), compute)
    }

    pub(crate) fn get_or_compute_at<F>(
        &mut self,
        answers: &[String],
        force_refresh: bool,
        now: Instant,
        compute: F,
    ) -> Result<EmbeddingMatrix>
    where
        F: FnOnce(&[String]) -> Result<EmbeddingMatrix>,
    {
        self.evict_expired(now);
        let key = answer_set_key(answers);

        if !force_refresh && let Some(entry) = self.entries.get(&key) {
            debug!(answers = answers.len(), "answer embedding cache hit");
            self.current = Some(key);
            return Ok(entry.embeddings.clone());
        }

        if force_refresh || self.current != Some(key) {
            self.clear();
        }

        let embeddings = compute(answers)?;
        self.insert_key_at(key, embeddings.clone(), now);
        Ok(embeddings)
    }

    /// Store embeddings for `answers` without the single-set sweep, marking
    /// them current, then apply the count and age limits.
    pub fn insert(&mut self, answers: &[String], embeddings: EmbeddingMatrix) {
        self.insert_at(answers, embeddings, Instant::now());
    }

    pub(crate) fn insert_at(
        &mut self,
        answers: &[String],
        embeddings: EmbeddingMatrix,
        now: Instant,
    ) {
        self.evict_expired(now);
        self.insert_key_at(answer_set_key(answers), embeddings, now);
    }

    fn insert_key_at(
        &mut self,
        key: AnswerSetKey,
        embeddings: EmbeddingMatrix,
        now: Instant,
    ) {
        self.entries.insert(
            key,
            CacheEntry {
                embeddings,
                inserted_at: now,
            },
        );
        self.current = Some(key);

        if self.entries.len() > self.max_items
            && let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| *key)
        {
            debug!("evicting oldest answer embedding cache entry");
            self.remove(&oldest);
        }
        self.evict_expired(now);
    }

    fn evict_expired(&mut self, now: Instant) {
        let max_age = self.max_age;
        let expired: Vec<AnswerSetKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                now.saturating_duration_since(entry.inserted_at) > max_age
            })
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            debug!("evicting expired answer embedding cache entry");
            self.remove(&key);
        }
    }

    fn remove(&mut self, key: &AnswerSetKey) {
        self.entries.remove(key);
        if self.current.as_ref() == Some(key) {
            self.current = None;
        }
    }
}
