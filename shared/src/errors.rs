//! Shared error types for the service launcher

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Invalid stage name: {input:?}")]
    InvalidStageName { input: String },

    #[error("Invalid environment entry: {key}")]
    InvalidEnvironment { key: String },

    #[error("Invalid service description for {service}: {reason}")]
    InvalidService { service: String, reason: String },
}

pub type SharedResult<T> = Result<T, SharedError>;
