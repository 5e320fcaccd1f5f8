//! Error types for bundle identity and descriptor handling

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Missing required descriptor field: {0}")]
    MissingField(&'static str),

    #[error("Invalid endpoint identifier: {0}")]
    InvalidEndpoint(String),

    #[error("Bundle lifetime out of range: {0} seconds")]
    InvalidLifetime(u64),

    #[error("Invalid bundle key: {0}")]
    InvalidBundleKey(String),

    #[error("Unknown payload type: {0}")]
    UnknownPayloadType(String),

    #[error("Empty payload")]
    EmptyPayload,
}
