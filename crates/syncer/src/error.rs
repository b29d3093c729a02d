use database::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The league itself could not be synced, so nothing downstream was attempted.
    #[error("League {league_id} could not be synced: {reason}")]
    Precondition { league_id: String, reason: String },

    #[error("Sync cancelled")]
    Cancelled,

    /// The run ledger could not be written.
    #[error("Run ledger failure: {0}")]
    Storage(#[from] StorageError),
}
