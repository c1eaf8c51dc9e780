use std::{fmt, str::FromStr};

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    answer_cache::AnswerCache,
    embedding::{EmbeddingMatrix, best_match, cosine_similarity},
    encoder::Encoder,
    error::{Error, Result},
};

/// How a question variant is paired with one of its record's answers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStrategy {
    /// `answers[i]`, or the final answer once `i` runs past the list.
    #[default]
    Last,
    /// `answers[i % len]`.
    Cycle,
    /// A uniformly random answer.
    Random,
    /// The answer whose embedding is closest to the question's.
    MostSimilar,
}

impl AnswerStrategy {
    pub const ALL: [AnswerStrategy; 4] = [
        AnswerStrategy::Last,
        AnswerStrategy::Cycle,
        AnswerStrategy::Random,
        AnswerStrategy::MostSimilar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStrategy::Last => "last",
            AnswerStrategy::Cycle => "cycle",
            AnswerStrategy::Random => "random",
            AnswerStrategy::MostSimilar => "most_similar",
        }
    }
}

impl fmt::Display for AnswerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnswerStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last" => Ok(AnswerStrategy::Last),
            "cycle" => Ok(AnswerStrategy::Cycle),
            "random" => Ok(AnswerStrategy::Random),
            "most_similar" | "most-similar" => Ok(AnswerStrategy::MostSimilar),
            _ => Err(Error::InvalidStrategy(s.to_string())),
        }
    }
}

/// `answers[index]`, clamped to the last answer. `None` only for an empty
/// list.
pub fn select_last(answers: &[String], index: usize) -> Option<&str> {
    answers
        .get(index)
        .or_else(|| answers.last())
        .map(String::as_str)
}

/// `answers[index % len]`. `None` only for an empty list.
pub fn select_cycle(answers: &[String], index: usize) -> Option<&str> {
    if answers.is_empty() {
        return None;
    }
    answers.get(index % answers.len()).map(String::as_str)
}

/// Index of the answer embedding closest to `question`, first on ties.
pub fn most_similar_index(
    question: &[f32],
    answers: &EmbeddingMatrix,
) -> Option<usize> {
    let scores: Vec<f32> = answers
        .iter_rows()
        .map(|row| cosine_similarity(question, row))
        .collect();
    best_match(&scores).map(|(idx, _)| idx)
}

/// Applies an [`AnswerStrategy`] across one build, owning the random
/// source and the answer embedding cache.
#[derive(Debug)]
pub struct AnswerSelector {
    strategy: AnswerStrategy,
    rng: StdRng,
    cache: AnswerCache,
}

impl AnswerSelector {
    /// A selector whose random choices come from the OS entropy source.
    pub fn new(strategy: AnswerStrategy) -> Self {
        Self::with_rng(strategy, StdRng::from_os_rng())
    }

    /// A selector whose random choices are reproducible.
    pub fn seeded(strategy: AnswerStrategy, seed: u64) -> Self {
        Self::with_rng(strategy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(strategy: AnswerStrategy, rng: StdRng) -> Self {
        Self {
            strategy,
            rng,
            cache: AnswerCache::default(),
        }
    }

    pub fn strategy(&self) -> AnswerStrategy {
        self.strategy
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }

    /// Pick the answer for the question variant at `index` within a record.
    pub fn select(
        &mut self,
        encoder: &dyn Encoder,
        question: &str,
        answers: &[String],
        index: usize,
    ) -> Result<String> {
        if answers.is_empty() {
            return Err(Error::InvalidFormat(
                "answer list cannot be empty".into(),
            ));
        }

        let chosen = match self.strategy {
            AnswerStrategy::Last => select_last(answers, index),
            AnswerStrategy::Cycle => select_cycle(answers, index),
            AnswerStrategy::Random => answers
                .get(self.rng.random_range(0..answers.len()))
                .map(String::as_str),
            AnswerStrategy::MostSimilar => {
                let embeddings = self
                    .cache
                    .get_or_compute(answers, false, |a| encoder.encode(a))?;
                if embeddings.rows() != answers.len() {
                    return Err(Error::Encoder(format!(
                        "encoder returned {} rows for {} answers",
                        embeddings.rows(),
                        answers.len()
                    )));
                }
                let question_vec = encoder.encode_one(question)?;
                let idx = most_similar_index(&question_vec, &embeddings)
                    .unwrap_or(0);
                debug!(question, idx, "selected most similar answer");
                answers.get(idx).map(String::as_str)
            }
        };

        chosen.map(str::to_string).ok_or_else(|| {
            Error::InvalidFormat("answer list cannot be empty".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::test_utils::HashingEncoder;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_known_names() {
        assert_eq!("last".parse::<AnswerStrategy>().unwrap(), AnswerStrategy::Last);
        assert_eq!("Cycle".parse::<AnswerStrategy>().unwrap(), AnswerStrategy::Cycle);
        assert_eq!(
            "random".parse::<AnswerStrategy>().unwrap(),
            AnswerStrategy::Random
        );
        assert_eq!(
            "most_similar".parse::<AnswerStrategy>().unwrap(),
            AnswerStrategy::MostSimilar
        );
        assert_eq!(
            "most-similar".parse::<AnswerStrategy>().unwrap(),
            AnswerStrategy::MostSimilar
        );
    }

    #[test]
    fn parse_unknown_name_is_invalid_strategy() {
        let err = "shortest".parse::<AnswerStrategy>().unwrap_err();
        assert!(matches!(err, Error::InvalidStrategy(ref s) if s == "shortest"));
    }

    #[test]
    fn display_roundtrips_through_parse() {
        for strategy in AnswerStrategy::ALL {
            assert_eq!(
                strategy.to_string().parse::<AnswerStrategy>().unwrap(),
                strategy
            );
        }
    }

    #[test]
    fn serde_uses_snake_case_names() {
        let json = serde_json::to_string(&AnswerStrategy::MostSimilar).unwrap();
        assert_eq!(json, "\"most_similar\"");
        let parsed: AnswerStrategy = serde_json::from_str("\"cycle\"").unwrap();
        assert_eq!(parsed, AnswerStrategy::Cycle);
    }

    #[test]
    fn last_clamps_overflow() {
        let answers = strings(&["a", "b"]);
        assert_eq!(select_last(&answers, 0), Some("a"));
        assert_eq!(select_last(&answers, 1), Some("b"));
        assert_eq!(select_last(&answers, 7), Some("b"));
        assert_eq!(select_last(&[], 0), None);
    }

    #[test]
    fn cycle_wraps_around() {
        let answers = strings(&["a", "b", "c"]);
        let picked: Vec<_> =
            (0..5).map(|i| select_cycle(&answers, i).unwrap()).collect();
        assert_eq!(picked, vec!["a", "b", "c", "a", "b"]);
        assert_eq!(select_cycle(&[], 3), None);
    }

    #[test]
    fn seeded_random_is_reproducible_and_in_range() {
        let encoder = HashingEncoder::new();
        let answers = strings(&["a", "b", "c", "d"]);

        let mut first = AnswerSelector::seeded(AnswerStrategy::Random, 7);
        let mut second = AnswerSelector::seeded(AnswerStrategy::Random, 7);
        for i in 0..20 {
            let x = first.select(&encoder, "q", &answers, i).unwrap();
            let y = second.select(&encoder, "q", &answers, i).unwrap();
            assert_eq!(x, y);
            assert!(answers.contains(&x));
        }
        assert_eq!(encoder.calls(), 0);
    }

    #[test]
    fn most_similar_picks_closest_answer_and_caches_answers() {
        let encoder = HashingEncoder::new();
        let answers = strings(&[
            "Our office opens at nine",
            "Shipping is free over fifty dollars",
        ]);
        let mut selector = AnswerSelector::new(AnswerStrategy::MostSimilar);

        let opening = selector
            .select(&encoder, "When does the office open", &answers, 0)
            .unwrap();
        let shipping = selector
            .select(&encoder, "Is shipping free", &answers, 1)
            .unwrap();

        assert_eq!(opening, answers[0]);
        assert_eq!(shipping, answers[1]);
        // One batch for the answers, one call per question.
        assert_eq!(encoder.calls(), 3);
        assert!(selector.cache().contains(&answers));
    }

    #[test]
    fn most_similar_ties_go_to_first_answer() {
        let encoder = HashingEncoder::new();
        let answers = strings(&["same", "same"]);
        let mut selector = AnswerSelector::new(AnswerStrategy::MostSimilar);
        let embeddings = encoder.encode(&answers).unwrap();
        let q = encoder.encode_one("same").unwrap();
        assert_eq!(most_similar_index(&q, &embeddings), Some(0));
        assert_eq!(
            selector.select(&encoder, "same", &answers, 1).unwrap(),
            "same"
        );
    }

    #[test]
    fn empty_answers_rejected() {
        let encoder = HashingEncoder::new();
        let mut selector = AnswerSelector::new(AnswerStrategy::Cycle);
        assert!(matches!(
            selector.select(&encoder, "q", &[], 0),
            Err(Error::InvalidFormat(_))
        ));
    }

    fn answer_lists() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-z]{1,6}", 1..8)
    }

    proptest! {
        #[test]
        fn positional_strategies_return_members(
            answers in answer_lists(),
            index in 0usize..64,
        ) {
            let last = select_last(&answers, index).unwrap().to_string();
            let cycle = select_cycle(&answers, index).unwrap().to_string();
            prop_assert!(answers.contains(&last));
            prop_assert!(answers.contains(&cycle));
        }

        #[test]
        fn cycle_is_periodic(answers in answer_lists(), index in 0usize..64) {
            prop_assert_eq!(
                select_cycle(&answers, index),
                select_cycle(&answers, index + answers.len())
            );
        }

        #[test]
        fn last_clamps_past_the_end(answers in answer_lists(), extra in 0usize..16) {
            let index = answers.len() + extra;
            prop_assert_eq!(
                select_last(&answers, index),
                answers.last().map(String::as_str)
            );
        }
    }
}
