use api_client::ValidationError;
use database::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Projection cancelled")]
    Cancelled,
}
