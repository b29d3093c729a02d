use crate::endpoint::Endpoint;
use crate::enums::{AttemptOutcome, RunStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One isolated failure inside a best-effort loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// The stage or endpoint the failure belongs to, e.g. `rosters`.
    pub scope: String,
    /// The item inside the collection, when the failure is per item.
    pub item: Option<String>,
    pub message: String,
}

impl ItemError {
    pub fn stage(scope: impl Into<String>, message: impl ToString) -> Self {
        Self { scope: scope.into(), item: None, message: message.to_string() }
    }

    pub fn item(scope: impl Into<String>, item: impl Into<String>, message: impl ToString) -> Self {
        Self { scope: scope.into(), item: Some(item.into()), message: message.to_string() }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item {
            Some(item) => write!(f, "{}[{}]: {}", self.scope, item, self.message),
            None => write!(f, "{}: {}", self.scope, self.message),
        }
    }
}

/// Accumulates item failures so a loop can keep going and report them at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialFailure {
    errors: Vec<ItemError>,
}

impl PartialFailure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ItemError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: PartialFailure) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ItemError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ItemError> {
        self.errors
    }

    /// Joins all messages into a single line, used for processing notes.
    pub fn summary(&self) -> String {
        self.errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
    }
}

/// One fetch+store attempt within a sync run.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointAttempt {
    pub endpoint: Endpoint,
    pub outcome: AttemptOutcome,
    pub latency_ms: i64,
    pub size_bytes: i64,
    pub error: Option<String>,
    pub snapshot_id: Option<i64>,
}

impl EndpointAttempt {
    pub fn failed(endpoint: Endpoint, latency_ms: i64, error: impl ToString) -> Self {
        Self {
            endpoint,
            outcome: AttemptOutcome::Error,
            latency_ms,
            size_bytes: 0,
            error: Some(error.to_string()),
            snapshot_id: None,
        }
    }
}

/// Counters of a sync run, derived from its recorded attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub success: i64,
    pub error: i64,
    pub skipped: i64,
}

impl RunCounts {
    pub fn tally<'a>(attempts: impl IntoIterator<Item = &'a EndpointAttempt>) -> Self {
        attempts.into_iter().fold(Self::default(), |mut counts, attempt| {
            match attempt.outcome {
                AttemptOutcome::Success => counts.success += 1,
                AttemptOutcome::Error => counts.error += 1,
                AttemptOutcome::Skipped => counts.skipped += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> i64 {
        self.success + self.error + self.skipped
    }
}

#[derive(Debug, Clone)]
pub struct SyncResult {
    pub run_id: i64,
    pub league_id: Option<String>,
    pub status: RunStatus,
    pub success: bool,
    pub records_processed: usize,
    pub errors: Vec<ItemError>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct EtlResult {
    pub total_processed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<ItemError>,
}

impl EtlResult {
    pub fn absorb(&mut self, other: EtlResult) {
        self.total_processed += other.total_processed;
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        self.skipped_count += other.skipped_count;
        self.errors.extend(other.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(outcome: AttemptOutcome) -> EndpointAttempt {
        EndpointAttempt {
            endpoint: Endpoint::State,
            outcome,
            latency_ms: 5,
            size_bytes: 10,
            error: None,
            snapshot_id: None,
        }
    }

    #[test]
    fn counts_cover_every_attempt() {
        let attempts = vec![
            attempt(AttemptOutcome::Success),
            attempt(AttemptOutcome::Skipped),
            attempt(AttemptOutcome::Error),
            attempt(AttemptOutcome::Success),
        ];
        let counts = RunCounts::tally(&attempts);
        assert_eq!(counts, RunCounts { success: 2, error: 1, skipped: 1 });
        assert_eq!(counts.total(), attempts.len() as i64);
    }

    #[test]
    fn partial_failure_summary_names_the_items() {
        let mut failures = PartialFailure::new();
        failures.push(ItemError::item("rosters", "3", "bad owner"));
        failures.push(ItemError::stage("users", "timeout"));
        assert_eq!(failures.len(), 2);
        assert_eq!(failures.summary(), "rosters[3]: bad owner; users: timeout");
    }
}
