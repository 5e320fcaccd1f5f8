//! Requests to the local DTN daemon
//!
//! The router never moves bundles itself. It asks the daemon to send, delete
//! or inject them through a [`DaemonTransport`]; how those requests are
//! encoded and delivered is up to the implementation.

use crate::error::Result;
use async_trait::async_trait;
use hbsd_protocol::{Bundle, BundleKey, EndpointId, Payload};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the daemon does with its own copy after sending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForwardAction {
    /// Hand the bundle over, keep no copy
    Forward,
    /// Send a replica, keep the local copy
    Copy,
}

impl ForwardAction {
    /// Numeric code used on the daemon interface
    pub const fn code(self) -> u8 {
        match self {
            ForwardAction::Forward => 0,
            ForwardAction::Copy => 1,
        }
    }
}

/// Identifier of a link known to the daemon
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkId(pub String);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LinkId {
    fn from(id: &str) -> Self {
        LinkId(id.to_string())
    }
}

/// Identifier handed back by the daemon for an injection request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Daemon request interface
#[async_trait]
pub trait DaemonTransport: Send + Sync {
    /// Ask the daemon to delete its copy of `bundle`
    async fn request_delete(&self, bundle: &Bundle) -> Result<()>;

    /// Ask the daemon to send the bundle identified by `key` over `link`
    async fn request_send(&self, key: &BundleKey, link: &LinkId, action: ForwardAction)
        -> Result<()>;

    /// Ask the daemon to create a bundle carrying `payload`
    async fn request_inject(
        &self,
        source: &EndpointId,
        destination: &EndpointId,
        link: &LinkId,
        payload: Payload,
    ) -> Result<RequestId>;
}
