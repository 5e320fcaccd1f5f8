//! Network-wide estimators
//!
//! The delivery forecasts need the size of the network and the average time
//! between two meetings. Both can be fixed by configuration or learned online
//! from the nodes that show up in statistics and from link contacts.

use hbsd_protocol::EndpointId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inputs of the delay and delivery-ratio formulas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkEstimate {
    pub node_count: usize,
    pub avg_meeting_time: f64,
}

impl NetworkEstimate {
    /// `avg_meeting_time * (N - 1)`
    pub fn alpha(&self) -> f64 {
        self.avg_meeting_time * (self.node_count as f64 - 1.0)
    }
}

/// A peer known to the statistics engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    /// Latest meeting-time sample for this peer
    pub meeting_time: f64,
    /// Local time of the last contact, if we met the peer directly
    pub last_contact: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct NetworkTable {
    nodes: BTreeMap<EndpointId, NetworkNode>,
    total_meeting_samples: f64,
    meetings: u64,
}

impl NetworkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `node` known, adopting `meeting_time` as its latest sample
    pub fn register(&mut self, node: &EndpointId, meeting_time: f64) {
        self.nodes.entry(node.clone()).or_default().meeting_time = meeting_time;
    }

    /// Makes `node` known without touching an existing sample
    pub fn ensure(&mut self, node: &EndpointId) {
        self.nodes.entry(node.clone()).or_default();
    }

    /// Records a direct contact with `node` at local time `at`.
    ///
    /// The time since the previous contact becomes a meeting-time sample.
    pub fn record_meeting(&mut self, node: &EndpointId, at: f64) -> Option<f64> {
        let entry = self.nodes.entry(node.clone()).or_default();
        let sample = entry
            .last_contact
            .map(|last| at - last)
            .filter(|s| *s >= 0.0);
        entry.last_contact = Some(at);

        if let Some(sample) = sample {
            entry.meeting_time = sample;
            self.total_meeting_samples += sample;
            self.meetings += 1;
        }
        sample
    }

    pub fn contains(&self, node: &EndpointId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn meeting_time(&self, node: &EndpointId) -> f64 {
        self.nodes.get(node).map_or(0.0, |n| n.meeting_time)
    }

    /// Mean of all recorded samples, 1 before the first one
    pub fn mean_meeting_time(&self) -> f64 {
        if self.meetings == 0 {
            1.0
        } else {
            self.total_meeting_samples / self.meetings as f64
        }
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &EndpointId> {
        self.nodes.keys()
    }
}
