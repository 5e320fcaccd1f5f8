//! Peer payload worker
//!
//! Payloads received from peer routers are queued by the network listener and
//! drained, strictly in arrival order, by a single worker task. The worker
//! sleeps on the channel while it is empty and exits when the shutdown signal
//! fires or every queue handle is dropped.

use crate::error::{Result, RoutingError};
use async_trait::async_trait;
use hbsd_protocol::PeerPayload;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};

/// Consumer of queued peer payloads
#[async_trait]
pub trait PayloadHandler: Send + Sync {
    async fn handle_payload(&self, payload: PeerPayload) -> Result<()>;
}

/// Statistics about payload processing
#[derive(Debug, Clone, Default)]
pub struct PayloadProcessorStats {
    /// Payloads taken off the queue
    pub payloads_processed: u64,

    /// Payloads whose handling failed and were dropped
    pub payloads_failed: u64,
}

/// Producer side of the payload queue
#[derive(Debug, Clone)]
pub struct PayloadQueue {
    sender: mpsc::UnboundedSender<PeerPayload>,
}

impl PayloadQueue {
    /// Appends a payload. Fails once the worker has stopped.
    pub fn push(&self, payload: PeerPayload) -> Result<()> {
        self.sender
            .send(payload)
            .map_err(|_| RoutingError::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Shutdown trigger shared by the router's background tasks
#[derive(Debug)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Single consumer of the payload queue
pub struct PayloadProcessor<H: PayloadHandler> {
    handler: Arc<H>,
    receiver: mpsc::UnboundedReceiver<PeerPayload>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<RwLock<PayloadProcessorStats>>,
}

impl<H: PayloadHandler> PayloadProcessor<H> {
    /// Creates the worker and the queue feeding it
    pub fn new(handler: Arc<H>, shutdown: &Shutdown) -> (Self, PayloadQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let processor = PayloadProcessor {
            handler,
            receiver,
            shutdown: shutdown.subscribe(),
            stats: Arc::new(RwLock::new(PayloadProcessorStats::default())),
        };
        (processor, PayloadQueue { sender })
    }

    /// Handle on the worker statistics, usable after `run` consumed the worker
    pub fn stats_handle(&self) -> Arc<RwLock<PayloadProcessorStats>> {
        self.stats.clone()
    }

    /// Processes one payload if one is queued
    pub async fn process_next(&mut self) -> bool {
        match self.receiver.try_recv() {
            Ok(payload) => {
                self.process(payload).await;
                true
            }
            Err(_) => false,
        }
    }

    async fn process(&self, payload: PeerPayload) {
        let source = payload.source.clone();
        let kind = payload.payload.kind;
        let result = self.handler.handle_payload(payload).await;

        let mut stats = self.stats.write().await;
        stats.payloads_processed += 1;
        if let Err(e) = result {
            stats.payloads_failed += 1;
            warn!(source = %source, kind = %kind, error = %e, "dropping peer payload");
        }
    }

    /// Runs until shutdown or until every queue handle is dropped
    pub async fn run(mut self) -> PayloadProcessorStats {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                next = self.receiver.recv() => match next {
                    Some(payload) => self.process(payload).await,
                    None => break,
                },
            }
        }
        debug!("payload worker stopped");
        let stats = self.stats.read().await.clone();
        stats
    }
}
