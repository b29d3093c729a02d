use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Job interval must be greater than zero: {0}")]
    InvalidInterval(String),

    #[error("A job named '{0}' is already registered")]
    DuplicateJob(String),

    #[error("The scheduler is already running")]
    AlreadyStarted,

    #[error("The scheduler has been stopped")]
    Stopped,
}
