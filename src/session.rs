use serde::Serialize;

use crate::{
    error::Result,
    query::{DEFAULT_THRESHOLD, QueryEngine, QueryResult},
};

/// Running hit-rate statistics for one query session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    total_queries: usize,
    matches: usize,
    threshold: f32,
    queries: Vec<QueryResult>,
}

/// A point-in-time view of [`SessionStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_queries: usize,
    pub matches: usize,
    pub match_rate: f64,
    pub threshold: f32,
    pub last_query: Option<QueryResult>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl SessionStats {
    pub fn new(threshold: f32) -> Self {
        Self {
            total_queries: 0,
            matches: 0,
            threshold,
            queries: Vec::new(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Change the threshold used for subsequent queries. Past results keep
    /// their recorded outcome.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn queries(&self) -> &[QueryResult] {
        &self.queries
    }

    pub fn record(&mut self, result: QueryResult) {
        self.total_queries += 1;
        if result.is_match {
            self.matches += 1;
        }
        self.queries.push(result);
    }

    /// Current totals. With `reset`, the statistics are cleared after the
    /// snapshot is taken.
    pub fn snapshot(&mut self, reset: bool) -> StatsSnapshot {
        let snapshot = StatsSnapshot {
            total_queries: self.total_queries,
            matches: self.matches,
            match_rate: if self.total_queries > 0 {
                self.matches as f64 / self.total_queries as f64
            } else {
                0.0
            },
            threshold: self.threshold,
            last_query: self.queries.last().cloned(),
        };
        if reset {
            self.reset();
        }
        snapshot
    }

    /// Zero the counters and drop history, keeping the threshold.
    pub fn reset(&mut self) {
        self.total_queries = 0;
        self.matches = 0;
        self.queries.clear();
    }
}

/// A [`QueryEngine`] paired with statistics, as used by interactive
/// sessions.
pub struct QuerySession {
    engine: QueryEngine,
    stats: SessionStats,
}

impl QuerySession {
    pub fn new(engine: QueryEngine, threshold: f32) -> Self {
        Self {
            engine,
            stats: SessionStats::new(threshold),
        }
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SessionStats {
        &mut self.stats
    }

    /// Run a query, using the session threshold unless one is given, and
    /// record the result.
    pub fn ask(&mut self, question: &str, threshold: Option<f32>) -> Result<QueryResult> {
        let threshold = threshold.unwrap_or(self.stats.threshold());
        let result = self.engine.query(question, threshold)?;
        self.stats.record(result.clone());
        Ok(result)
    }
}
