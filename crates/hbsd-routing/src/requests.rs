//! Injection request tracking
//!
//! When the router injects a bundle (a peer payload, or gateway traffic) the
//! daemon answers with a request id now and a bundle-injected event later.
//! These tables remember what to do with the bundle once that event arrives.

use crate::error::{Result, RoutingError};
use crate::transport::{LinkId, RequestId};
use hbsd_protocol::EndpointId;
use std::collections::HashMap;
use tracing::debug;

/// Pending send of an injected router payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedRequest {
    pub link: LinkId,
    pub destination: EndpointId,
}

/// Router payloads injected and waiting for their bundle
#[derive(Debug, Default)]
pub struct InjectedRequests {
    pending: HashMap<RequestId, InjectedRequest>,
}

impl InjectedRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: RequestId, link: LinkId, destination: EndpointId) -> Result<()> {
        if self.pending.contains_key(&id) {
            return Err(RoutingError::DuplicateRequest(id));
        }
        debug!(request = %id, link = %link, "injection request registered");
        self.pending.insert(id, InjectedRequest { link, destination });
        Ok(())
    }

    /// Removes and returns the request
    pub fn complete(&mut self, id: RequestId) -> Option<InjectedRequest> {
        self.pending.remove(&id)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops requests bound to a link that went away
    pub fn forget_link(&mut self, link: &LinkId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, request| &request.link != link);
        before - self.pending.len()
    }
}

/// Gateway bundles injected and waiting to be redirected
#[derive(Debug, Default)]
pub struct GatewayRedirects {
    pending: HashMap<RequestId, EndpointId>,
}

impl GatewayRedirects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: RequestId, destination: EndpointId) -> Result<()> {
        if self.pending.contains_key(&id) {
            return Err(RoutingError::DuplicateRequest(id));
        }
        self.pending.insert(id, destination);
        Ok(())
    }

    pub fn complete(&mut self, id: RequestId) -> Option<EndpointId> {
        self.pending.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
