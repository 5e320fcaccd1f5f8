//! HBSD router
//!
//! The [`Router`] is the application context: it is built once from a
//! validated [`RouterConfig`] and owns every routing table. Daemon events
//! arrive through the `on_*` handlers, peer payloads through the
//! [`PayloadHandler`] implementation, usually driven by a
//! [`PayloadProcessor`] worker.
//!
//! Locks are always taken store first, statistics second. No lock is held
//! across a call into the [`DaemonTransport`].

use crate::{
    error::{Result, RoutingError},
    observer::{NullObserver, RoutingObserver},
    payload_processor::{
        PayloadHandler, PayloadProcessor, PayloadProcessorStats, PayloadQueue, Shutdown,
    },
    requests::{GatewayRedirects, InjectedRequests},
    session::{router_endpoint, should_initiate, PeerTable},
    store::{Admission, AdmissionResult, BundleStore},
    summary_vector::{reconcile, SummaryVector},
    transport::{DaemonTransport, ForwardAction, LinkId, RequestId},
    utility::UtilityScheduler,
};
use async_trait::async_trait;
use hbsd_protocol::{
    unix_now, Bundle, BundleDescriptor, BundleKey, EndpointId, Payload, PayloadKind, PeerPayload,
    RouterConfig, TransientId,
};
use hbsd_stats::{now_secs, StatisticsConfig, StatisticsEngine, StatsError};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Router statistics
#[derive(Debug, Default, Clone)]
pub struct RouterStats {
    pub bundles_received: u64,
    pub bundles_admitted: u64,
    pub bundles_rejected: u64,
    pub bundles_evicted: u64,
    pub bundles_expired: u64,
    pub bundles_delivered: u64,
    pub invalid_descriptors: u64,
    pub sessions_started: u64,
    pub replies_sent: u64,
    pub bundles_offered: u64,
    pub digests_merged: u64,
    pub digests_rejected: u64,
    pub transport_failures: u64,
}

/// HBSD router
pub struct Router {
    config: RouterConfig,

    /// Node endpoint of this router, e.g. `dtn://node1`
    local_node: EndpointId,

    /// Endpoint peer payloads are sent from, `<local node>/<router endpoint>`
    local_router: EndpointId,

    store: Arc<Mutex<BundleStore>>,

    statistics: Arc<Mutex<StatisticsEngine>>,

    scheduler: UtilityScheduler,

    transport: Arc<dyn DaemonTransport>,

    observer: Arc<dyn RoutingObserver>,

    /// Router payloads waiting for their bundle-injected event
    requests: Arc<Mutex<InjectedRequests>>,

    /// Gateway bundles waiting to be redirected
    redirects: Arc<Mutex<GatewayRedirects>>,

    peers: Arc<RwLock<PeerTable>>,

    stats: Arc<RwLock<RouterStats>>,
}

impl Router {
    /// Builds the router. The configuration is validated before any table
    /// is created.
    pub fn new(
        config: RouterConfig,
        local_node: EndpointId,
        transport: Arc<dyn DaemonTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let local_node = local_node.node_eid();
        let local_router = router_endpoint(&local_node, &config.router_endpoint);
        let statistics = StatisticsEngine::new(StatisticsConfig::from(&config), local_node.clone());
        let scheduler = UtilityScheduler::from_config(&config, local_node.clone());

        info!(
            node = %local_node,
            capacity = config.bundles_active_capacity,
            policy = ?config.utility_policy,
            optimization = config.enable_optimization,
            "router initialized"
        );

        Ok(Router {
            store: Arc::new(Mutex::new(BundleStore::new(config.bundles_active_capacity))),
            statistics: Arc::new(Mutex::new(statistics)),
            scheduler,
            transport,
            observer: Arc::new(NullObserver),
            requests: Arc::new(Mutex::new(InjectedRequests::new())),
            redirects: Arc::new(Mutex::new(GatewayRedirects::new())),
            peers: Arc::new(RwLock::new(PeerTable::new())),
            stats: Arc::new(RwLock::new(RouterStats::default())),
            local_node,
            local_router,
            config,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn RoutingObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn local_node(&self) -> &EndpointId {
        &self.local_node
    }

    pub fn local_router(&self) -> &EndpointId {
        &self.local_router
    }

    pub fn scheduler(&self) -> &UtilityScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> Arc<Mutex<BundleStore>> {
        self.store.clone()
    }

    pub fn statistics(&self) -> Arc<Mutex<StatisticsEngine>> {
        self.statistics.clone()
    }

    pub fn peers(&self) -> Arc<RwLock<PeerTable>> {
        self.peers.clone()
    }

    pub async fn get_stats(&self) -> RouterStats {
        self.stats.read().await.clone()
    }

    fn optimizing(&self) -> bool {
        self.config.enable_optimization
    }

    /// True for bundles addressed to a router endpoint rather than an application
    fn is_router_traffic(&self, bundle: &Bundle) -> bool {
        bundle.destination == router_endpoint(&bundle.destination, &self.config.router_endpoint)
    }

    // ===== Bundle events =====

    /// A bundle arrived at the daemon.
    ///
    /// Returns `None` for router-to-router traffic, which is not stored.
    pub async fn on_bundle_received(
        &self,
        descriptor: BundleDescriptor,
    ) -> Result<Option<AdmissionResult>> {
        self.stats.write().await.bundles_received += 1;
        let bundle = match descriptor.into_bundle(unix_now()) {
            Ok(bundle) => bundle,
            Err(e) => {
                self.stats.write().await.invalid_descriptors += 1;
                warn!(error = %e, "rejecting malformed bundle descriptor");
                return Err(e.into());
            }
        };

        if self.is_router_traffic(&bundle) {
            debug!(key = %bundle.key(), "router payload bundle, not stored");
            return Ok(None);
        }

        let result = self.admit(bundle).await;
        Ok(Some(result))
    }

    async fn admit(&self, bundle: Bundle) -> AdmissionResult {
        let now = unix_now();
        let received = bundle.clone();
        let admission = {
            let mut store = self.store.lock().await;
            let mut statistics = self.statistics.lock().await;
            let admission = store.admit(bundle, &self.scheduler, &mut statistics, now);
            if admission.result == AdmissionResult::Admitted && self.optimizing() {
                self.report_local_copy(&mut statistics, &received, now);
            }
            admission
        };

        self.settle_admission(&received, &admission).await;
        admission.result
    }

    fn report_local_copy(&self, statistics: &mut StatisticsEngine, bundle: &Bundle, now: u64) {
        let elapsed = bundle.elapsed_at(now) as f64;
        match statistics.report(bundle.key(), &self.local_node, elapsed, bundle.ttl_secs as f64) {
            Ok(()) => {}
            Err(StatsError::BufferFull { capacity }) => {
                debug!(key = %bundle.key(), capacity, "statistics buffer full, bundle not tracked");
            }
            Err(e) => warn!(key = %bundle.key(), error = %e, "statistics report failed"),
        }
    }

    /// Issues daemon deletions and observer callbacks once the locks are released
    async fn settle_admission(&self, bundle: &Bundle, admission: &Admission) {
        {
            let mut stats = self.stats.write().await;
            match admission.result {
                AdmissionResult::Admitted => stats.bundles_admitted += 1,
                AdmissionResult::Rejected => stats.bundles_rejected += 1,
                AdmissionResult::Duplicate => {}
            }
            if admission.evicted.is_some() {
                stats.bundles_evicted += 1;
            }
        }

        match admission.result {
            AdmissionResult::Admitted => {
                debug!(key = %bundle.key(), "bundle admitted");
                self.observer.bundle_received(bundle);
            }
            AdmissionResult::Rejected => {
                info!(key = %bundle.key(), "bundle rejected, store full");
            }
            AdmissionResult::Duplicate => {}
        }

        if let Some(victim) = &admission.evicted {
            self.observer.bundle_evicted(victim);
        }
        for doomed in admission.deletions() {
            self.request_delete(doomed).await;
        }
    }

    async fn request_delete(&self, bundle: &Bundle) {
        if let Err(e) = self.transport.request_delete(bundle).await {
            self.stats.write().await.transport_failures += 1;
            error!(key = %bundle.key(), error = %e, "delete request failed");
        }
    }

    /// Removes a bundle and asks the daemon to delete it
    pub async fn evict_and_delete(&self, key: &BundleKey) -> Result<Bundle> {
        let bundle = self
            .store
            .lock()
            .await
            .remove(key)
            .ok_or_else(|| RoutingError::UnknownBundle(key.clone()))?;
        self.request_delete(&bundle).await;
        Ok(bundle)
    }

    /// The daemon dropped an expired bundle
    pub async fn on_bundle_expired(&self, transient_id: TransientId) -> Option<Bundle> {
        let now = unix_now();
        let bundle = {
            let mut store = self.store.lock().await;
            let bundle = store.expire(transient_id)?;
            if self.optimizing() {
                let mut statistics = self.statistics.lock().await;
                statistics.report_removed(
                    bundle.key(),
                    &self.local_node,
                    bundle.elapsed_at(now) as f64,
                    bundle.ttl_secs as f64,
                );
            }
            bundle
        };
        self.stats.write().await.bundles_expired += 1;
        debug!(key = %bundle.key(), "bundle expired");
        self.observer.bundle_expired(&bundle);
        Some(bundle)
    }

    /// The daemon delivered a bundle to a local application
    pub async fn on_bundle_delivered(&self, transient_id: TransientId) -> Option<Bundle> {
        let bundle = self.store.lock().await.delivered(transient_id)?;
        self.stats.write().await.bundles_delivered += 1;
        debug!(key = %bundle.key(), "bundle delivered");
        self.observer.bundle_delivered(&bundle);
        Some(bundle)
    }

    /// The daemon created a bundle the router asked for.
    ///
    /// Router payloads are forwarded over the link recorded for the request;
    /// gateway bundles are redirected and admitted like received ones.
    pub async fn on_bundle_injected(
        &self,
        request: RequestId,
        descriptor: BundleDescriptor,
    ) -> Result<()> {
        let mut bundle = descriptor.into_bundle(unix_now())?;
        bundle.injected = true;

        if self.config.enable_gateway_interface {
            let redirect = self.redirects.lock().await.complete(request);
            if let Some(destination) = redirect {
                info!(key = %bundle.key(), destination = %destination, "redirecting gateway bundle");
                bundle.redirect(destination);
                self.admit(bundle).await;
                return Ok(());
            }
        }

        let pending = self
            .requests
            .lock()
            .await
            .complete(request)
            .ok_or(RoutingError::UnknownRequest(request))?;
        debug!(
            key = %bundle.key(),
            link = %pending.link,
            destination = %pending.destination,
            "sending injected payload"
        );
        self.transport
            .request_send(bundle.key(), &pending.link, ForwardAction::Forward)
            .await
    }

    /// Records the destination of a bundle the gateway is about to inject
    pub async fn register_gateway_redirect(
        &self,
        request: RequestId,
        destination: EndpointId,
    ) -> Result<()> {
        if !self.config.enable_gateway_interface {
            return Err(RoutingError::GatewayDisabled);
        }
        self.redirects.lock().await.register(request, destination)
    }

    // ===== Link events =====

    /// A link to `remote` opened
    pub async fn on_link_opened(&self, link: LinkId, remote: EndpointId) -> Result<()> {
        let node = remote.node_eid();
        let is_new = self
            .peers
            .write()
            .await
            .open(link.clone(), node.clone(), unix_now());
        self.statistics.lock().await.record_meeting(&node, now_secs());

        if is_new {
            self.observer.node_created(&node);
        }
        self.observer.link_opened(&link, &node);
        info!(link = %link, peer = %node, "link opened");

        if should_initiate(&self.local_node, &node) {
            self.start_session(&node, &link).await?;
        }
        Ok(())
    }

    pub async fn on_link_closed(&self, link: &LinkId) {
        let peer = self.peers.write().await.close(link);
        let dropped = self.requests.lock().await.forget_link(link);
        if dropped > 0 {
            debug!(link = %link, dropped, "dropped pending injections");
        }
        self.observer.link_closed(link, peer.as_ref().map(|p| &p.node));
        info!(link = %link, "link closed");
    }

    /// Periodic refresh.
    ///
    /// Starts a new session with every connected peer this node initiates
    /// for, when the store changed since the last session with that peer.
    /// Also collects final statistics. Returns the number of sessions started.
    pub async fn on_hello(&self) -> usize {
        let revision = self.store.lock().await.last_changed();
        let due: Vec<(EndpointId, LinkId)> = {
            let peers = self.peers.read().await;
            peers
                .iter()
                .filter(|peer| should_initiate(&self.local_node, &peer.node))
                .filter(|peer| peers.needs_session(&peer.node, revision))
                .map(|peer| (peer.node.clone(), peer.link.clone()))
                .collect()
        };

        let mut started = 0;
        for (node, link) in due {
            match self.start_session(&node, &link).await {
                Ok(()) => started += 1,
                Err(e) => warn!(peer = %node, error = %e, "session refresh failed"),
            }
        }

        if self.optimizing() {
            self.statistics.lock().await.collect_garbage();
        }
        started
    }

    // ===== Epidemic sessions =====

    async fn start_session(&self, node: &EndpointId, link: &LinkId) -> Result<()> {
        let (keys, revision) = {
            let store = self.store.lock().await;
            (store.snapshot_keys(), store.last_changed())
        };
        let payload = SummaryVector::build(&keys, PayloadKind::SessionStart);
        self.send_summary_vector(node, link, payload).await?;

        self.peers.write().await.mark_session(node, revision);
        self.stats.write().await.sessions_started += 1;
        info!(peer = %node, keys = keys.len(), "epidemic session started");
        Ok(())
    }

    /// Sends a summary vector, followed by a statistics request when optimizing
    async fn send_summary_vector(
        &self,
        node: &EndpointId,
        link: &LinkId,
        payload: Payload,
    ) -> Result<()> {
        self.inject_payload(node, link, payload).await?;
        if self.optimizing() {
            let versions = self.statistics.lock().await.version_digest();
            let request = Payload::new(PayloadKind::StatisticsRequest, versions);
            self.inject_payload(node, link, request).await?;
        }
        Ok(())
    }

    /// Asks the daemon to carry `payload` to the peer router on `node`
    async fn inject_payload(
        &self,
        node: &EndpointId,
        link: &LinkId,
        payload: Payload,
    ) -> Result<RequestId> {
        let destination = router_endpoint(node, &self.config.router_endpoint);
        let kind = payload.kind;
        let request = match self
            .transport
            .request_inject(&self.local_router, &destination, link, payload)
            .await
        {
            Ok(request) => request,
            Err(e) => {
                self.stats.write().await.transport_failures += 1;
                error!(peer = %node, kind = %kind, error = %e, "inject request failed");
                return Err(e);
            }
        };
        self.requests
            .lock()
            .await
            .register(request, link.clone(), destination)?;
        debug!(peer = %node, kind = %kind, request = %request, "payload injected");
        Ok(request)
    }

    async fn link_to(&self, node: &EndpointId) -> Result<LinkId> {
        self.peers
            .read()
            .await
            .link_for(node)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownPeer(node.clone()))
    }

    async fn on_summary_vector(&self, node: &EndpointId, payload: &Payload) -> Result<()> {
        let remote = SummaryVector::parse(payload)?;
        let link = self.link_to(node).await?;
        let reply_requested = payload.kind == PayloadKind::SessionStart;

        let (plan, local_keys) = {
            let store = self.store.lock().await;
            let mut statistics = self.statistics.lock().await;
            let local_keys = store.snapshot_keys();
            let mut plan = reconcile(&local_keys, &remote, reply_requested);
            let candidates = std::mem::take(&mut plan.to_send);
            plan.to_send = self.scheduler.order_for_transmission(
                candidates,
                &store,
                &mut statistics,
                unix_now(),
            );
            (plan, local_keys)
        };

        debug!(
            peer = %node,
            kind = %payload.kind,
            remote = remote.len(),
            to_send = plan.to_send.len(),
            need_reply = plan.need_reply,
            "summary vector reconciled"
        );
        self.offer_bundles(&plan.to_send, &link).await;

        if plan.need_reply {
            let reply = SummaryVector::build(&local_keys, PayloadKind::SessionReply);
            self.send_summary_vector(node, &link, reply).await?;
            self.stats.write().await.replies_sent += 1;
        }
        Ok(())
    }

    async fn offer_bundles(&self, keys: &[BundleKey], link: &LinkId) {
        let mut offered = 0;
        for key in keys {
            match self.transport.request_send(key, link, ForwardAction::Copy).await {
                Ok(()) => offered += 1,
                Err(e) => {
                    self.stats.write().await.transport_failures += 1;
                    error!(key = %key, link = %link, error = %e, "send request failed");
                }
            }
        }
        self.stats.write().await.bundles_offered += offered;
        if !keys.is_empty() {
            info!(link = %link, offered, "bundles offered to peer");
        }
    }

    async fn on_statistics_request(&self, node: &EndpointId, payload: &Payload) -> Result<()> {
        let delta = self.statistics.lock().await.delta_for(&payload.body)?;
        if delta.is_empty() {
            debug!(peer = %node, "peer statistics are up to date");
            return Ok(());
        }
        let link = self.link_to(node).await?;
        self.inject_payload(node, &link, Payload::new(PayloadKind::StatisticsDigest, delta))
            .await?;
        Ok(())
    }

    async fn on_statistics_digest(&self, node: &EndpointId, payload: &Payload) -> Result<()> {
        let merged = self.statistics.lock().await.merge_digest(&payload.body);
        match merged {
            Ok(summary) => {
                self.stats.write().await.digests_merged += 1;
                debug!(
                    peer = %node,
                    messages = summary.messages,
                    applied = summary.records_applied,
                    ignored = summary.records_ignored,
                    refused = summary.messages_refused,
                    "statistics digest merged"
                );
                Ok(())
            }
            Err(e) => {
                self.stats.write().await.digests_rejected += 1;
                Err(e.into())
            }
        }
    }

    // ===== Payload worker =====

    /// Decodes a payload delivered to the router endpoint and queues it.
    ///
    /// Payloads sent by this node itself are ignored.
    pub fn on_payload_delivered(
        &self,
        queue: &PayloadQueue,
        source: EndpointId,
        text: &str,
    ) -> Result<()> {
        if source.node_eid() == self.local_node {
            debug!("ignoring payload originated by this node");
            return Ok(());
        }
        let payload = Payload::decode(text)?;
        queue.push(PeerPayload { source, payload })
    }

    /// Spawns the payload worker on the current runtime
    pub fn spawn_payload_worker(
        self: &Arc<Self>,
        shutdown: &Shutdown,
    ) -> (PayloadQueue, JoinHandle<PayloadProcessorStats>) {
        let (processor, queue) = PayloadProcessor::new(self.clone(), shutdown);
        (queue, tokio::spawn(processor.run()))
    }
}

#[async_trait]
impl PayloadHandler for Router {
    async fn handle_payload(&self, payload: PeerPayload) -> Result<()> {
        let node = payload.source.node_eid();
        let payload = payload.payload;
        match payload.kind {
            PayloadKind::SessionStart | PayloadKind::SessionReply => {
                self.on_summary_vector(&node, &payload).await
            }
            PayloadKind::StatisticsRequest => self.on_statistics_request(&node, &payload).await,
            PayloadKind::StatisticsDigest => self.on_statistics_digest(&node, &payload).await,
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("local_node", &self.local_node)
            .field("local_router", &self.local_router)
            .field("config", &self.config)
            .finish()
    }
}
