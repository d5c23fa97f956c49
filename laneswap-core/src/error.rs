use thiserror::Error;

use crate::status::ProgressStatus;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("service {0} not found")]
    ServiceNotFound(String),
    #[error("progress task {0} not found")]
    TaskNotFound(String),
    #[error("duplicate service id {0}")]
    DuplicateId(String),
    #[error("progress task {id} is finalized with status {status}, no further updates allowed")]
    TaskFinalized {
        id: String,
        status: ProgressStatus,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ServiceNotFound(_) | Error::TaskNotFound(_))
    }
}
