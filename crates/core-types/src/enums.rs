use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a captured snapshot in the raw store.
///
/// `New -> Processing -> {Processed, Failed}`; the only way back is an
/// explicit re-queue to `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    New,
    Processing,
    Processed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::New => "new",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Whether the forward state machine allows moving from `self` to `next`.
    /// Re-queueing is handled separately and is not a forward transition.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        matches!(
            (self, next),
            (ProcessingStatus::New, ProcessingStatus::Processing)
                | (ProcessingStatus::Processing, ProcessingStatus::Processed)
                | (ProcessingStatus::Processing, ProcessingStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Processed | ProcessingStatus::Failed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ProcessingStatus::New),
            "processing" => Ok(ProcessingStatus::Processing),
            "processed" => Ok(ProcessingStatus::Processed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(CoreError::InvalidInput(
                "processing status".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Final (or current) state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::CompletedWithErrors => "completed_with_errors",
            RunStatus::Failed => "failed",
        }
    }

    /// The closing status of a run that reached its end without a hard failure.
    pub fn from_error_count(errors: usize) -> Self {
        if errors == 0 {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "completed_with_errors" => Ok(RunStatus::CompletedWithErrors),
            "failed" => Ok(RunStatus::Failed),
            other => Err(CoreError::InvalidInput("run status".to_string(), other.to_string())),
        }
    }
}

/// Outcome of one fetch+store attempt inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Error,
    Skipped,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Error => "error",
            AttemptOutcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a weekly head-to-head matchup from one roster's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchupOutcome {
    Win,
    Loss,
    Tie,
}

impl MatchupOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchupOutcome::Win => "win",
            MatchupOutcome::Loss => "loss",
            MatchupOutcome::Tie => "tie",
        }
    }

    /// Compares this roster's points against its opponent's.
    pub fn from_points(points: f64, opponent_points: f64) -> Self {
        if points > opponent_points {
            MatchupOutcome::Win
        } else if points < opponent_points {
            MatchupOutcome::Loss
        } else {
            MatchupOutcome::Tie
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_follow_the_lifecycle() {
        assert!(ProcessingStatus::New.can_transition_to(ProcessingStatus::Processing));
        assert!(ProcessingStatus::Processing.can_transition_to(ProcessingStatus::Failed));
        assert!(!ProcessingStatus::New.can_transition_to(ProcessingStatus::Processed));
        assert!(!ProcessingStatus::Processed.can_transition_to(ProcessingStatus::New));
        assert!(!ProcessingStatus::Failed.can_transition_to(ProcessingStatus::Processing));
    }

    #[test]
    fn run_status_depends_only_on_error_presence() {
        assert_eq!(RunStatus::from_error_count(0), RunStatus::Completed);
        assert_eq!(RunStatus::from_error_count(3), RunStatus::CompletedWithErrors);
        assert_eq!("completed_with_errors".parse::<RunStatus>().unwrap(), RunStatus::CompletedWithErrors);
    }

    #[test]
    fn equal_points_are_a_tie() {
        assert_eq!(MatchupOutcome::from_points(101.5, 101.5), MatchupOutcome::Tie);
        assert_eq!(MatchupOutcome::from_points(90.0, 120.2), MatchupOutcome::Loss);
    }
}
