use database::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    /// The raw store could not be read or a snapshot could not be settled.
    #[error("Raw store failure: {0}")]
    Storage(#[from] StorageError),
}
