pub mod endpoint;
pub mod entities;
pub mod enums;
pub mod error;
pub mod results;

pub use endpoint::{Endpoint, EndpointKind};
pub use entities::*;
pub use enums::{AttemptOutcome, MatchupOutcome, ProcessingStatus, RunStatus};
pub use error::CoreError;
pub use results::{EndpointAttempt, EtlResult, ItemError, PartialFailure, RunCounts, SyncResult};
