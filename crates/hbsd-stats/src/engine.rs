//! Statistics engine
//!
//! Collects, per bundle, the time-binned observations of every node that
//! reported on it, and turns them into network-wide forecasts used by the
//! scheduler: expected number of copies, number of nodes that have seen the
//! bundle, expected delivery delay and expected delivery ratio at a given
//! age.
//!
//! The engine is plain data; callers serialize access (the router keeps it
//! behind a single mutex).

use crate::axis::BinAxis;
use crate::digest::{self, DigestMessage, VersionEntry};
use crate::error::{Result, StatsError};
use crate::message::{finite_or_zero, StatMessage};
use crate::network::{NetworkEstimate, NetworkTable};
use crate::node::RemoteNodeRecord;
use hbsd_protocol::config::{
    DEFAULT_BIN_SIZE_SECS, DEFAULT_MCH_BUFFER_CAPACITY, DEFAULT_NUMBER_OF_BINS,
    DEFAULT_NUMBER_OF_NODES,
};
use hbsd_protocol::{BundleKey, EndpointId, RouterConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Current Unix time in fractional seconds
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsConfig {
    pub number_of_bins: usize,
    pub bin_size_secs: u64,
    /// Maximum number of non-final messages before new ones are refused
    pub buffer_capacity: usize,
    /// Network size used when the online approximation is off
    pub number_of_nodes: usize,
    pub use_bin_size_as_avg_meeting_time: bool,
    pub use_online_node_count: bool,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        StatisticsConfig {
            number_of_bins: DEFAULT_NUMBER_OF_BINS,
            bin_size_secs: DEFAULT_BIN_SIZE_SECS,
            buffer_capacity: DEFAULT_MCH_BUFFER_CAPACITY,
            number_of_nodes: DEFAULT_NUMBER_OF_NODES,
            use_bin_size_as_avg_meeting_time: true,
            use_online_node_count: true,
        }
    }
}

impl From<&RouterConfig> for StatisticsConfig {
    fn from(config: &RouterConfig) -> Self {
        StatisticsConfig {
            number_of_bins: config.number_of_bins,
            bin_size_secs: config.bin_size_secs,
            buffer_capacity: config.mch_buffer_capacity,
            number_of_nodes: config.number_of_nodes,
            use_bin_size_as_avg_meeting_time: config.use_bin_size_as_avg_meeting_time,
            use_online_node_count: config.use_online_node_count,
        }
    }
}

/// Network-wide averages at one bin, across valid messages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinAverages {
    pub copies: f64,
    pub seen: f64,
    pub delay: f64,
    pub delivery_ratio: f64,
}

/// Outcome of merging a digest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub messages: usize,
    pub records_applied: usize,
    pub records_ignored: usize,
    pub messages_refused: usize,
}

/// Statistics about the engine itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub local_reports: u64,
    pub remote_records_applied: u64,
    pub remote_records_ignored: u64,
    pub messages_refused: u64,
    pub digests_rejected: u64,
    pub messages_finalized: u64,
    pub messages_collected: u64,
}

pub struct StatisticsEngine {
    config: StatisticsConfig,
    axis: BinAxis,
    local_node: EndpointId,
    messages: BTreeMap<BundleKey, StatMessage>,
    network: NetworkTable,
    next_sequence: u64,
    stats: EngineStats,
}

impl StatisticsEngine {
    pub fn new(config: StatisticsConfig, local_node: EndpointId) -> Self {
        let axis = BinAxis::new(config.number_of_bins, config.bin_size_secs);
        Self {
            config,
            axis,
            local_node,
            messages: BTreeMap::new(),
            network: NetworkTable::new(),
            next_sequence: 0,
            stats: EngineStats::default(),
        }
    }

    pub fn axis(&self) -> &BinAxis {
        &self.axis
    }

    pub fn local_node(&self) -> &EndpointId {
        &self.local_node
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn bin_index_of(&self, elapsed_secs: f64) -> usize {
        self.axis.bin_index_of(elapsed_secs)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, key: &BundleKey) -> bool {
        self.messages.contains_key(key)
    }

    // ===== Network estimators =====

    /// Distinct reporting nodes, or the configured constant
    pub fn approx_node_count(&self) -> usize {
        if self.config.use_online_node_count {
            self.network.node_count()
        } else {
            self.config.number_of_nodes
        }
    }

    /// Bin width, or the running mean of meeting-time samples
    pub fn avg_meeting_time(&self) -> f64 {
        if self.config.use_bin_size_as_avg_meeting_time {
            self.axis.bin_size()
        } else {
            self.network.mean_meeting_time()
        }
    }

    pub fn estimate(&self) -> NetworkEstimate {
        NetworkEstimate {
            node_count: self.approx_node_count(),
            avg_meeting_time: self.avg_meeting_time(),
        }
    }

    /// Records a direct contact with a peer at local time `at`
    pub fn record_meeting(&mut self, node: &EndpointId, at: f64) {
        if let Some(sample) = self.network.record_meeting(node, at) {
            debug!(node = %node, sample, "meeting time sample");
        }
    }

    /// Nodes known to the engine
    pub fn known_nodes(&self) -> Vec<EndpointId> {
        self.network.node_ids().cloned().collect()
    }

    pub fn is_node_known(&self, node: &EndpointId) -> bool {
        self.network.contains(node)
    }

    // ===== Local reports =====

    /// `node` holds a copy of `key`, which is `elapsed_secs` old.
    ///
    /// Creates the message on first report. Fails with
    /// [`StatsError::BufferFull`] when a new message would exceed the
    /// non-final cap; existing messages are always updated.
    pub fn report(
        &mut self,
        key: &BundleKey,
        node: &EndpointId,
        elapsed_secs: f64,
        ttl: f64,
    ) -> Result<()> {
        let now = now_secs();
        if !self.messages.contains_key(key) {
            self.admit_new_message(key, ttl, now)?;
        }
        self.apply_local(key, node, elapsed_secs, ttl, true, now);
        Ok(())
    }

    /// `node` no longer holds `key` (evicted or expired there).
    ///
    /// Only updates an existing message; returns whether one existed.
    pub fn report_removed(
        &mut self,
        key: &BundleKey,
        node: &EndpointId,
        elapsed_secs: f64,
        ttl: f64,
    ) -> bool {
        if !self.messages.contains_key(key) {
            return false;
        }
        self.apply_local(key, node, elapsed_secs, ttl, false, now_secs());
        true
    }

    fn admit_new_message(&mut self, key: &BundleKey, ttl: f64, now: f64) -> Result<()> {
        let capacity = self.config.buffer_capacity;
        if self.non_final_count() >= capacity {
            self.stats.messages_refused += 1;
            return Err(StatsError::BufferFull { capacity });
        }
        self.next_sequence += 1;
        let message = StatMessage::new(ttl, self.axis.bin_count(), self.next_sequence, now);
        self.messages.insert(key.clone(), message);
        Ok(())
    }

    fn apply_local(
        &mut self,
        key: &BundleKey,
        node: &EndpointId,
        elapsed_secs: f64,
        ttl: f64,
        present: bool,
        now: f64,
    ) {
        let bin = self.axis.bin_index_of(elapsed_secs);
        let bin_count = self.axis.bin_count();
        let Some(message) = self.messages.get_mut(key) else {
            return;
        };
        if message.is_final() {
            debug!(key = %key, "ignoring report on final statistics");
            return;
        }
        message.set_ttl(ttl);
        message.set_life_time(elapsed_secs, now);
        message.record_local(node, bin, present, now, bin_count);
        self.network.ensure(node);
        self.stats.local_reports += 1;
    }

    // ===== Remote records =====

    /// Applies one peer-supplied node record.
    ///
    /// The record is validated first; it replaces the local copy only if its
    /// version is not older. Returns whether anything changed.
    pub fn merge_remote(
        &mut self,
        key: &BundleKey,
        ttl: f64,
        node: &EndpointId,
        record: RemoteNodeRecord,
    ) -> Result<bool> {
        record.validate(self.axis.bin_count())?;
        let now = now_secs();

        if !self.messages.contains_key(key) {
            self.admit_new_message(key, ttl, now)?;
        }

        let Some(message) = self.messages.get_mut(key) else {
            return Ok(false);
        };
        message.set_ttl(ttl);
        let meeting_time = record.meeting_time;
        let applied = message.apply_remote(node, record);
        if applied {
            self.network.register(node, meeting_time);
            self.stats.remote_records_applied += 1;
        } else {
            self.network.ensure(node);
            self.stats.remote_records_ignored += 1;
        }
        Ok(applied)
    }

    /// Parses a peer digest and merges every record in it.
    ///
    /// A malformed digest is rejected as a whole and leaves the engine
    /// untouched. Messages refused for lack of buffer space are counted,
    /// not treated as errors.
    pub fn merge_digest(&mut self, text: &str) -> Result<MergeSummary> {
        let messages = match digest::parse_digest(text, self.axis.bin_count()) {
            Ok(messages) => messages,
            Err(e) => {
                self.stats.digests_rejected += 1;
                return Err(e);
            }
        };

        let mut summary = MergeSummary {
            messages: messages.len(),
            ..Default::default()
        };
        for message in messages {
            for (node, record) in message.nodes {
                match self.merge_remote(&message.key, message.ttl, &node, record) {
                    Ok(true) => summary.records_applied += 1,
                    Ok(false) => summary.records_ignored += 1,
                    Err(StatsError::BufferFull { .. }) => {
                        summary.messages_refused += 1;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(summary)
    }

    // ===== Digests =====

    fn digest_message(&self, key: &BundleKey, message: &StatMessage) -> DigestMessage {
        DigestMessage {
            key: key.clone(),
            ttl: message.ttl(),
            nodes: message
                .nodes()
                .iter()
                .map(|(node, record)| (node.clone(), record.to_remote()))
                .collect(),
        }
    }

    /// Full digest of every message that still has node records
    pub fn digest(&self) -> String {
        let messages: Vec<DigestMessage> = self
            .messages
            .iter()
            .filter(|(_, m)| !m.nodes().is_empty())
            .map(|(key, m)| self.digest_message(key, m))
            .collect();
        digest::encode_digest(&messages)
    }

    /// `key*node@version$...` for every message with node records
    pub fn version_digest(&self) -> String {
        let entries: Vec<VersionEntry> = self
            .messages
            .iter()
            .filter(|(_, m)| !m.nodes().is_empty())
            .map(|(key, m)| VersionEntry {
                key: key.clone(),
                nodes: m
                    .nodes()
                    .iter()
                    .map(|(node, record)| (node.clone(), record.version()))
                    .collect(),
            })
            .collect();
        digest::encode_version_digest(&entries)
    }

    /// Digest of what the requester lacks: node records that are newer here
    /// or unknown to it, including messages it did not list at all.
    pub fn delta_for(&self, version_digest: &str) -> Result<String> {
        let entries = digest::parse_version_digest(version_digest, self.axis.bin_count())?;
        let known: HashMap<&BundleKey, HashMap<&EndpointId, usize>> = entries
            .iter()
            .map(|e| (&e.key, e.nodes.iter().map(|(n, v)| (n, *v)).collect()))
            .collect();

        let mut messages = Vec::new();
        for (key, message) in &self.messages {
            let remote = known.get(key);
            let nodes: Vec<(EndpointId, RemoteNodeRecord)> = message
                .nodes()
                .iter()
                .filter(|(node, record)| {
                    match remote.and_then(|versions| versions.get(node)) {
                        Some(remote_version) => record.version() > *remote_version,
                        None => true,
                    }
                })
                .map(|(node, record)| (node.clone(), record.to_remote()))
                .collect();
            if !nodes.is_empty() {
                messages.push(DigestMessage {
                    key: key.clone(),
                    ttl: message.ttl(),
                    nodes,
                });
            }
        }
        Ok(digest::encode_digest(&messages))
    }

    // ===== Finality and back-pressure =====

    /// Runs the final transition check on `key`
    pub fn is_final(&mut self, key: &BundleKey) -> bool {
        let (axis, estimate, now) = (self.axis, self.estimate(), now_secs());
        let local = self.local_node.clone();
        let Some(message) = self.messages.get_mut(key) else {
            return false;
        };
        let was_final = message.is_final();
        let is_final = message.refresh_finality(&local, &axis, estimate, now);
        if is_final && !was_final {
            self.stats.messages_finalized += 1;
        }
        is_final
    }

    /// Number of messages that are not final yet
    pub fn non_final_count(&mut self) -> usize {
        let keys: Vec<BundleKey> = self.messages.keys().cloned().collect();
        keys.iter().filter(|key| !self.is_final(key)).count()
    }

    /// Drops final messages, oldest first, once the non-final count has
    /// reached the buffer capacity. Returns the number removed.
    pub fn collect_garbage(&mut self) -> usize {
        if self.non_final_count() < self.config.buffer_capacity {
            return 0;
        }
        let mut finals: Vec<(u64, BundleKey)> = self
            .messages
            .iter()
            .filter(|(_, m)| m.is_final())
            .map(|(key, m)| (m.sequence(), key.clone()))
            .collect();
        finals.sort();
        for (_, key) in &finals {
            self.messages.remove(key);
        }
        self.stats.messages_collected += finals.len() as u64;
        if !finals.is_empty() {
            debug!(removed = finals.len(), "collected final statistics");
        }
        finals.len()
    }

    /// Forgets every message
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    // ===== Per-message metrics =====

    pub fn copies_at(&mut self, key: &BundleKey, bin: usize) -> Option<f64> {
        self.messages.get_mut(key).map(|m| m.copies_at(bin))
    }

    pub fn seen_at(&mut self, key: &BundleKey, bin: usize) -> Option<f64> {
        self.messages.get_mut(key).map(|m| m.seen_at(bin))
    }

    pub fn delay_at(&mut self, key: &BundleKey, bin: usize) -> Option<f64> {
        let estimate = self.estimate();
        self.messages.get_mut(key).map(|m| m.delay_at(bin, estimate))
    }

    pub fn delivery_ratio_at(&mut self, key: &BundleKey, bin: usize) -> Option<f64> {
        let (axis, estimate) = (self.axis, self.estimate());
        self.messages
            .get_mut(key)
            .map(|m| m.delivery_ratio_at(bin, &axis, estimate))
    }

    // ===== Network-wide averages =====

    /// Averages over messages whose records are valid at the bin of
    /// `elapsed_secs`.
    ///
    /// Copies and seen only average values above 1 and default to 1; delay
    /// and delivery ratio default to 0.
    pub fn averages_at(&mut self, elapsed_secs: f64) -> BinAverages {
        let bin = self.axis.bin_index_of(elapsed_secs);
        let (axis, estimate, now) = (self.axis, self.estimate(), now_secs());
        let local = self.local_node.clone();

        let mut copies = (0.0, 0usize);
        let mut seen = (0.0, 0usize);
        let mut delay = (0.0, 0usize);
        let mut ratio = (0.0, 0usize);
        let mut finalized = 0u64;

        for message in self.messages.values_mut() {
            let was_final = message.is_final();
            if !message.is_valid_at(bin, &local, &axis, estimate, now) {
                continue;
            }
            if message.is_final() && !was_final {
                finalized += 1;
            }

            let c = message.copies_at(bin);
            if c > 1.0 {
                copies.0 += c;
                copies.1 += 1;
            }
            let s = message.seen_at(bin);
            if s > 1.0 {
                seen.0 += s;
                seen.1 += 1;
            }
            delay.0 += message.delay_at(bin, estimate);
            delay.1 += 1;
            ratio.0 += message.delivery_ratio_at(bin, &axis, estimate);
            ratio.1 += 1;
        }
        self.stats.messages_finalized += finalized;

        let mean = |(sum, n): (f64, usize), default: f64| {
            if n == 0 {
                default
            } else {
                finite_or_zero(sum / n as f64)
            }
        };
        BinAverages {
            copies: mean(copies, 1.0),
            seen: mean(seen, 1.0),
            delay: mean(delay, 0.0),
            delivery_ratio: mean(ratio, 0.0),
        }
    }
}

impl std::fmt::Debug for StatisticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsEngine")
            .field("local_node", &self.local_node)
            .field("messages", &self.messages.len())
            .field("nodes", &self.network.node_count())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BINS: usize = 10;

    fn create_test_config() -> StatisticsConfig {
        StatisticsConfig {
            number_of_bins: BINS,
            bin_size_secs: 100,
            buffer_capacity: 3,
            number_of_nodes: 20,
            use_bin_size_as_avg_meeting_time: true,
            use_online_node_count: true,
        }
    }

    fn eid(name: &str) -> EndpointId {
        EndpointId::parse(&format!("dtn://{name}")).unwrap()
    }

    fn key(n: u64) -> BundleKey {
        BundleKey::from_parts(n, &eid("src").join("app"), 0, 0, false)
    }

    fn create_test_engine() -> StatisticsEngine {
        StatisticsEngine::new(create_test_config(), eid("local"))
    }

    #[test]
    fn test_report_creates_and_updates() {
        let mut engine = create_test_engine();
        engine.report(&key(1), &eid("local"), 150.0, 5000.0).unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.copies_at(&key(1), 1), Some(1.0));

        engine.report(&key(1), &eid("peer"), 150.0, 5000.0).unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.copies_at(&key(1), 1), Some(2.0));
        assert_eq!(engine.seen_at(&key(1), 5), Some(2.0));
        assert_eq!(engine.copies_at(&key(2), 1), None);
    }

    #[test]
    fn test_report_removed_only_touches_existing() {
        let mut engine = create_test_engine();
        assert!(!engine.report_removed(&key(1), &eid("local"), 10.0, 5000.0));
        assert!(engine.is_empty());

        engine.report(&key(1), &eid("local"), 10.0, 5000.0).unwrap();
        engine.report(&key(1), &eid("local"), 250.0, 5000.0).unwrap();
        assert!(engine.report_removed(&key(1), &eid("local"), 350.0, 5000.0));
        assert_eq!(engine.copies_at(&key(1), 2), Some(1.0));
        // cleared after removal, floored at one
        assert_eq!(engine.copies_at(&key(1), 5), Some(1.0));
    }

    #[test]
    fn test_back_pressure_on_new_messages() {
        let mut engine = create_test_engine();
        for n in 0..3 {
            engine.report(&key(n), &eid("local"), 10.0, 5000.0).unwrap();
        }
        assert_eq!(engine.non_final_count(), 3);
        assert_eq!(
            engine.report(&key(9), &eid("local"), 10.0, 5000.0),
            Err(StatsError::BufferFull { capacity: 3 })
        );
        // existing messages keep updating
        engine.report(&key(1), &eid("peer"), 10.0, 5000.0).unwrap();
        assert_eq!(engine.copies_at(&key(1), 0), Some(2.0));
        assert_eq!(engine.stats().messages_refused, 1);
    }

    #[test]
    fn test_online_node_count() {
        let mut engine = create_test_engine();
        assert_eq!(engine.approx_node_count(), 0);
        engine.report(&key(1), &eid("local"), 10.0, 5000.0).unwrap();
        engine.report(&key(1), &eid("peer"), 10.0, 5000.0).unwrap();
        engine.report(&key(2), &eid("peer"), 10.0, 5000.0).unwrap();
        assert_eq!(engine.approx_node_count(), 2);
        assert_eq!(engine.known_nodes(), vec![eid("local"), eid("peer")]);

        let mut fixed = StatisticsEngine::new(
            StatisticsConfig {
                use_online_node_count: false,
                ..create_test_config()
            },
            eid("local"),
        );
        fixed.report(&key(1), &eid("local"), 10.0, 5000.0).unwrap();
        assert_eq!(fixed.approx_node_count(), 20);
    }

    #[test]
    fn test_avg_meeting_time_modes() {
        let mut engine = create_test_engine();
        assert_eq!(engine.avg_meeting_time(), 100.0);

        let mut learned = StatisticsEngine::new(
            StatisticsConfig {
                use_bin_size_as_avg_meeting_time: false,
                ..create_test_config()
            },
            eid("local"),
        );
        assert_eq!(learned.avg_meeting_time(), 1.0);
        learned.record_meeting(&eid("peer"), 1000.0);
        learned.record_meeting(&eid("peer"), 1300.0);
        assert_eq!(learned.avg_meeting_time(), 300.0);

        engine.record_meeting(&eid("peer"), 1.0);
        assert_eq!(engine.avg_meeting_time(), 100.0);
    }

    #[test]
    fn test_single_node_ratio_is_finite() {
        let mut engine = StatisticsEngine::new(
            StatisticsConfig {
                use_online_node_count: false,
                number_of_nodes: 1,
                ..create_test_config()
            },
            eid("local"),
        );
        engine.report(&key(1), &eid("local"), 10.0, 5000.0).unwrap();
        for bin in 0..=BINS {
            let ratio = engine.delivery_ratio_at(&key(1), bin).unwrap();
            assert!(ratio.is_finite());
        }
        let averages = engine.averages_at(10.0);
        assert!(averages.delivery_ratio.is_finite());
        assert!(averages.delay.is_finite());
    }

    #[test]
    fn test_digest_exchange_between_engines() {
        let mut a = StatisticsEngine::new(create_test_config(), eid("a"));
        let mut b = StatisticsEngine::new(create_test_config(), eid("b"));
        a.report(&key(1), &eid("a"), 250.0, 5000.0).unwrap();
        b.report(&key(1), &eid("b"), 50.0, 5000.0).unwrap();

        let summary = b.merge_digest(&a.digest()).unwrap();
        assert_eq!(summary.messages, 1);
        assert_eq!(summary.records_applied, 1);
        assert_eq!(b.copies_at(&key(1), 2), Some(1.0));
        assert_eq!(b.seen_at(&key(1), 5), Some(2.0));
        assert!(b.is_node_known(&eid("a")));

        // same record again is still accepted (equal version), stale is not
        let again = b.merge_digest(&a.digest()).unwrap();
        assert_eq!(again.records_applied, 1);
    }

    #[test]
    fn test_malformed_digest_leaves_engine_untouched() {
        let mut a = StatisticsEngine::new(create_test_config(), eid("a"));
        a.report(&key(1), &eid("a"), 250.0, 5000.0).unwrap();
        let digest = a.digest();

        let mut b = StatisticsEngine::new(create_test_config(), eid("b"));
        let broken = digest.replace("@2?", "@99?");
        assert!(matches!(
            b.merge_digest(&broken),
            Err(StatsError::VersionOutOfRange { .. })
        ));
        assert!(b.is_empty());
        assert_eq!(b.stats().digests_rejected, 1);

        // a later good digest still merges
        assert!(b.merge_digest(&digest).is_ok());
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_delta_only_carries_newer_records() {
        let mut a = StatisticsEngine::new(create_test_config(), eid("a"));
        let mut b = StatisticsEngine::new(create_test_config(), eid("b"));
        a.report(&key(1), &eid("a"), 250.0, 5000.0).unwrap();
        a.report(&key(2), &eid("a"), 50.0, 5000.0).unwrap();

        // b knows nothing: gets everything
        let delta = a.delta_for(&b.version_digest()).unwrap();
        b.merge_digest(&delta).unwrap();
        assert_eq!(b.len(), 2);

        // b is up to date: nothing to send
        assert_eq!(a.delta_for(&b.version_digest()).unwrap(), "");

        // a advances one record
        a.report(&key(2), &eid("a"), 450.0, 5000.0).unwrap();
        let delta = a.delta_for(&b.version_digest()).unwrap();
        let parsed = digest::parse_digest(&delta, BINS).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].key, key(2));
        assert_eq!(parsed[0].nodes[0].1.version, 4);
    }

    #[test]
    fn test_finality_and_garbage_collection() {
        let mut engine = create_test_engine();
        // two nodes past the horizon: final right away
        engine.report(&key(1), &eid("local"), 5000.0, 6000.0).unwrap();
        engine.report(&key(1), &eid("peer"), 5000.0, 6000.0).unwrap();
        assert!(engine.is_final(&key(1)));

        engine.report(&key(2), &eid("local"), 10.0, 6000.0).unwrap();
        engine.report(&key(3), &eid("local"), 10.0, 6000.0).unwrap();
        assert_eq!(engine.non_final_count(), 2);
        assert_eq!(engine.collect_garbage(), 0);

        engine.report(&key(4), &eid("local"), 10.0, 6000.0).unwrap();
        assert_eq!(engine.non_final_count(), 3);
        assert_eq!(engine.collect_garbage(), 1);
        assert!(!engine.contains(&key(1)));
        assert_eq!(engine.len(), 3);
    }

    #[test]
    fn test_final_stays_final() {
        let mut engine = create_test_engine();
        engine.report(&key(1), &eid("local"), 5000.0, 6000.0).unwrap();
        // a lone record never finalizes
        assert!(!engine.is_final(&key(1)));
        engine.report(&key(1), &eid("peer"), 5000.0, 6000.0).unwrap();
        assert!(engine.is_final(&key(1)));

        engine.report(&key(1), &eid("peer"), 10.0, 6000.0).unwrap();
        let record = RemoteNodeRecord {
            copies: vec![true; BINS],
            meeting_time: 0.0,
            version: 0,
            seen_start: Some(0),
        };
        assert_eq!(engine.merge_remote(&key(1), 6000.0, &eid("x"), record), Ok(false));
        assert!(engine.is_final(&key(1)));
        assert_eq!(engine.digest(), "");
    }

    #[test]
    fn test_averages_skip_invalid_messages() {
        let mut engine = create_test_engine();
        engine.report(&key(1), &eid("local"), 550.0, 6000.0).unwrap();
        engine.report(&key(1), &eid("peer"), 550.0, 6000.0).unwrap();
        // key 2 only authoritative up to bin 0
        engine.report(&key(2), &eid("local"), 10.0, 6000.0).unwrap();
        engine.report(&key(2), &eid("peer"), 10.0, 6000.0).unwrap();

        let at_five = engine.averages_at(550.0);
        assert_eq!(at_five.copies, 2.0);
        assert_eq!(at_five.seen, 2.0);

        let at_zero = engine.averages_at(10.0);
        // key 1 valid too (versions 5 >= 0) but has no copies at bin 0
        assert_eq!(at_zero.copies, 2.0);
    }

    #[test]
    fn test_stale_record_keeps_meeting_time() {
        let mut engine = create_test_engine();
        let record = |version: usize, meeting_time: f64| RemoteNodeRecord {
            copies: vec![false; BINS],
            meeting_time,
            version,
            seen_start: Some(version),
        };

        assert_eq!(engine.merge_remote(&key(1), 6000.0, &eid("x"), record(5, 40.0)), Ok(true));
        assert_eq!(engine.network.meeting_time(&eid("x")), 40.0);

        assert_eq!(engine.merge_remote(&key(1), 6000.0, &eid("x"), record(3, 90.0)), Ok(false));
        assert_eq!(engine.network.meeting_time(&eid("x")), 40.0);
        assert_eq!(engine.stats().remote_records_ignored, 1);
    }

    #[test]
    fn test_averages_defaults_without_data() {
        let mut engine = create_test_engine();
        let averages = engine.averages_at(100.0);
        assert_eq!(averages.copies, 1.0);
        assert_eq!(averages.seen, 1.0);
        assert_eq!(averages.delay, 0.0);
        assert_eq!(averages.delivery_ratio, 0.0);
    }

    proptest! {
        #[test]
        fn prop_finality_sticks_and_buffer_holds(
            ops in prop::collection::vec((0u8..3, 0u64..8, 0u8..4, 0u32..1_500), 1..60),
        ) {
            let mut engine = create_test_engine();
            let capacity = engine.config.buffer_capacity;
            let mut finals: Vec<BundleKey> = Vec::new();

            for (kind, n, node, elapsed) in ops {
                let (k, node, elapsed) = (key(n), eid(&format!("n{node}")), f64::from(elapsed));
                match kind {
                    0 => {
                        let _ = engine.report(&k, &node, elapsed, 6000.0);
                    }
                    1 => {
                        engine.report_removed(&k, &node, elapsed, 6000.0);
                    }
                    _ => {
                        let version = engine.bin_index_of(elapsed);
                        let record = RemoteNodeRecord {
                            copies: vec![true; BINS],
                            meeting_time: 50.0,
                            version,
                            seen_start: Some(version),
                        };
                        let _ = engine.merge_remote(&k, 6000.0, &node, record);
                    }
                }

                prop_assert!(engine.non_final_count() <= capacity);
                for done in &finals {
                    prop_assert!(engine.is_final(done));
                }
                for m in 0..8 {
                    if engine.is_final(&key(m)) && !finals.contains(&key(m)) {
                        finals.push(key(m));
                    }
                }
            }
        }
    }
}
