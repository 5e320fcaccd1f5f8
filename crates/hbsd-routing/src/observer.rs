//! Policy hooks
//!
//! The router reports lifecycle events to a [`RoutingObserver`]. Every method
//! has an empty default body, so implementors only override what they need.

use crate::transport::LinkId;
use hbsd_protocol::{Bundle, EndpointId};

pub trait RoutingObserver: Send + Sync {
    fn node_created(&self, _node: &EndpointId) {}

    fn link_opened(&self, _link: &LinkId, _peer: &EndpointId) {}

    fn link_closed(&self, _link: &LinkId, _peer: Option<&EndpointId>) {}

    fn bundle_received(&self, _bundle: &Bundle) {}

    fn bundle_delivered(&self, _bundle: &Bundle) {}

    fn bundle_expired(&self, _bundle: &Bundle) {}

    fn bundle_evicted(&self, _bundle: &Bundle) {}
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl RoutingObserver for NullObserver {}
