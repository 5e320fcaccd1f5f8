//! Routing error types

use crate::transport::RequestId;
use hbsd_protocol::{BundleKey, EndpointId};
use thiserror::Error;

/// Routing-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("No eviction candidate: every stored bundle is of local origin")]
    NoEvictionCandidate,

    #[error("Unknown bundle: {0}")]
    UnknownBundle(BundleKey),

    #[error("Duplicate injection request: {0}")]
    DuplicateRequest(RequestId),

    #[error("Unknown injection request: {0}")]
    UnknownRequest(RequestId),

    #[error("No open link to peer: {0}")]
    UnknownPeer(EndpointId),

    #[error("Gateway interface is disabled")]
    GatewayDisabled,

    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),

    #[error("Transport request failed: {0}")]
    Transport(String),

    #[error("Router shut down")]
    Shutdown,

    #[error("Protocol error: {0}")]
    Protocol(#[from] hbsd_protocol::ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] hbsd_protocol::ConfigError),

    #[error("Statistics error: {0}")]
    Stats(#[from] hbsd_stats::StatsError),
}

/// Result type for routing operations
pub type Result<T> = std::result::Result<T, RoutingError>;
