//! Shared helpers for the routing integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use hbsd_protocol::{
    Bundle, BundleDescriptor, BundleKey, EndpointId, Payload, RouterConfig, TransientId,
};
use hbsd_routing::{
    DaemonTransport, ForwardAction, LinkId, RequestId, Result, Router, RoutingError,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A payload injection requested by the router
#[derive(Debug, Clone, PartialEq)]
pub struct Injection {
    pub request: RequestId,
    pub source: EndpointId,
    pub destination: EndpointId,
    pub link: LinkId,
    pub payload: Payload,
}

/// Transport double that records every request
#[derive(Default)]
pub struct RecordingTransport {
    pub deletes: Mutex<Vec<BundleKey>>,
    pub sends: Mutex<Vec<(BundleKey, LinkId, ForwardAction)>>,
    pub injections: Mutex<Vec<Injection>>,
    next_request: AtomicU64,
    fail_deletes: AtomicBool,
}

impl RecordingTransport {
    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    pub fn deleted(&self) -> Vec<BundleKey> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(BundleKey, LinkId, ForwardAction)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn injected(&self) -> Vec<Injection> {
        self.injections.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.deletes.lock().unwrap().clear();
        self.sends.lock().unwrap().clear();
        self.injections.lock().unwrap().clear();
    }
}

#[async_trait]
impl DaemonTransport for RecordingTransport {
    async fn request_delete(&self, bundle: &Bundle) -> Result<()> {
        self.deletes.lock().unwrap().push(bundle.key().clone());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(RoutingError::Transport("daemon unreachable".to_string()));
        }
        Ok(())
    }

    async fn request_send(
        &self,
        key: &BundleKey,
        link: &LinkId,
        action: ForwardAction,
    ) -> Result<()> {
        self.sends
            .lock()
            .unwrap()
            .push((key.clone(), link.clone(), action));
        Ok(())
    }

    async fn request_inject(
        &self,
        source: &EndpointId,
        destination: &EndpointId,
        link: &LinkId,
        payload: Payload,
    ) -> Result<RequestId> {
        let request = RequestId(self.next_request.fetch_add(1, Ordering::SeqCst) + 1);
        self.injections.lock().unwrap().push(Injection {
            request,
            source: source.clone(),
            destination: destination.clone(),
            link: link.clone(),
            payload,
        });
        Ok(request)
    }
}

pub fn eid(uri: &str) -> EndpointId {
    EndpointId::parse(uri).unwrap()
}

pub fn create_test_descriptor(seq: u64, source: &str) -> BundleDescriptor {
    BundleDescriptor {
        creation_timestamp: Some((1_000 << 32) | seq),
        source: Some(source.to_string()),
        destination: Some("dtn://sink/app".to_string()),
        ttl_secs: Some(3_600),
        transient_id: Some(TransientId(seq)),
        elapsed_secs: Some(10),
        ..Default::default()
    }
}

pub fn create_test_key(seq: u64, source: &str) -> BundleKey {
    BundleKey::from_parts((1_000 << 32) | seq, &eid(source), 0, 0, false)
}

pub fn create_test_config(capacity: usize, optimize: bool) -> RouterConfig {
    RouterConfig {
        bundles_active_capacity: capacity,
        enable_optimization: optimize,
        ..Default::default()
    }
}

pub fn create_test_router(
    local: &str,
    config: RouterConfig,
) -> (Arc<Router>, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let router = Router::new(config, eid(local), transport.clone()).unwrap();
    (Arc::new(router), transport)
}
