//! Peer links and epidemic session bookkeeping

use crate::transport::LinkId;
use hbsd_protocol::EndpointId;
use std::collections::HashMap;

/// Only the lexicographically greater node opens a session
pub fn should_initiate(local: &EndpointId, remote: &EndpointId) -> bool {
    local > remote
}

/// Router endpoint of `node`: `<node eid>/<router_endpoint>`
pub fn router_endpoint(node: &EndpointId, router_endpoint: &str) -> EndpointId {
    node.node_eid().join(router_endpoint)
}

/// A peer reachable over an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub node: EndpointId,
    pub link: LinkId,
    pub opened_at: u64,
    /// Store revision at the last session started with this peer
    pub last_session_revision: Option<u64>,
    pub sessions: u64,
}

/// Open links, keyed by peer node
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<EndpointId, Peer>,
    by_link: HashMap<LinkId, EndpointId>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an open link. Returns false if the peer was already known, in
    /// which case the link is updated and session history kept.
    pub fn open(&mut self, link: LinkId, node: EndpointId, now: u64) -> bool {
        let node = node.node_eid();
        if let Some(peer) = self.peers.get_mut(&node) {
            self.by_link.remove(&peer.link);
            self.by_link.insert(link.clone(), node);
            peer.link = link;
            return false;
        }
        self.by_link.insert(link.clone(), node.clone());
        self.peers.insert(
            node.clone(),
            Peer {
                node,
                link,
                opened_at: now,
                last_session_revision: None,
                sessions: 0,
            },
        );
        true
    }

    pub fn close(&mut self, link: &LinkId) -> Option<Peer> {
        let node = self.by_link.remove(link)?;
        self.peers.remove(&node)
    }

    pub fn get(&self, node: &EndpointId) -> Option<&Peer> {
        self.peers.get(&node.node_eid())
    }

    pub fn link_for(&self, node: &EndpointId) -> Option<&LinkId> {
        self.get(node).map(|peer| &peer.link)
    }

    pub fn peer_for_link(&self, link: &LinkId) -> Option<&EndpointId> {
        self.by_link.get(link)
    }

    /// A session was started with `node` while the store was at `revision`
    pub fn mark_session(&mut self, node: &EndpointId, revision: u64) {
        if let Some(peer) = self.peers.get_mut(&node.node_eid()) {
            peer.last_session_revision = Some(revision);
            peer.sessions += 1;
        }
    }

    /// True when no session was started with `node` at `revision` yet
    pub fn needs_session(&self, node: &EndpointId, revision: u64) -> bool {
        self.get(node)
            .is_some_and(|peer| peer.last_session_revision != Some(revision))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
