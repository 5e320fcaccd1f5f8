//! Statistics message: everything known about one bundle
//!
//! A [`StatMessage`] keeps one [`StatNode`] per reporting node and four
//! aggregate arrays derived from them. Aggregates are recomputed lazily: each
//! array remembers the revision (and network estimate) it was computed from
//! and is rebuilt only when the message changed since.
//!
//! Once at least two node records exist and every one of them has reached
//! the fully-aged version, the message becomes final. Its aggregates are computed one last time, node records
//! are dropped and later updates are ignored.

use crate::axis::BinAxis;
use crate::network::NetworkEstimate;
use crate::node::{RemoteNodeRecord, StatNode};
use hbsd_protocol::EndpointId;
use std::collections::BTreeMap;

/// A message reported by a single node is never final
const MIN_FINAL_NODES: usize = 2;

#[derive(Debug, Clone)]
struct Metric<T> {
    values: Vec<T>,
    computed_at: Option<(u64, Option<NetworkEstimate>)>,
}

impl<T: Clone + Default> Metric<T> {
    fn new(bin_count: usize) -> Self {
        Self {
            values: vec![T::default(); bin_count],
            computed_at: None,
        }
    }

    fn is_stale(&self, revision: u64, estimate: Option<NetworkEstimate>) -> bool {
        self.computed_at != Some((revision, estimate))
    }
}

#[derive(Debug, Clone)]
pub struct StatMessage {
    ttl: f64,
    life_time: f64,
    life_time_set_at: f64,
    nodes: BTreeMap<EndpointId, StatNode>,
    revision: u64,
    sequence: u64,
    copies: Metric<u32>,
    seen: Metric<u32>,
    delay: Metric<f64>,
    ratio: Metric<f64>,
    is_final: bool,
}

impl StatMessage {
    /// `sequence` orders messages by creation for garbage collection
    pub fn new(ttl: f64, bin_count: usize, sequence: u64, now: f64) -> Self {
        Self {
            ttl,
            life_time: 0.0,
            life_time_set_at: now,
            nodes: BTreeMap::new(),
            revision: 0,
            sequence,
            copies: Metric::new(bin_count),
            seen: Metric::new(bin_count),
            delay: Metric::new(bin_count),
            ratio: Metric::new(bin_count),
            is_final: false,
        }
    }

    pub fn ttl(&self) -> f64 {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: f64) {
        if self.ttl != ttl {
            self.ttl = ttl;
            self.touch();
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn nodes(&self) -> &BTreeMap<EndpointId, StatNode> {
        &self.nodes
    }

    pub fn node_version(&self, node: &EndpointId) -> Option<usize> {
        self.nodes.get(node).map(StatNode::version)
    }

    /// Age of the bundle as last reported, advanced by wall-clock time since
    pub fn life_time(&self, now: f64) -> f64 {
        self.life_time + (now - self.life_time_set_at).max(0.0)
    }

    pub fn set_life_time(&mut self, elapsed: f64, now: f64) {
        self.life_time = elapsed;
        self.life_time_set_at = now;
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Owner update for `node` at `bin`, see [`StatNode::record_local`]
    pub fn record_local(
        &mut self,
        node: &EndpointId,
        bin: usize,
        present: bool,
        meeting_time: f64,
        bin_count: usize,
    ) {
        if self.is_final {
            return;
        }
        match self.nodes.get_mut(node) {
            Some(existing) => {
                existing.record_local(bin, present, false);
                existing.set_meeting_time(meeting_time);
            }
            None => {
                let mut created = StatNode::new(bin_count, meeting_time);
                created.record_local(bin, present, true);
                self.nodes.insert(node.clone(), created);
            }
        }
        self.touch();
    }

    /// Applies a peer's record; the record must already be validated.
    /// Returns true when something changed.
    pub fn apply_remote(&mut self, node: &EndpointId, record: RemoteNodeRecord) -> bool {
        if self.is_final {
            return false;
        }
        let applied = match self.nodes.get_mut(node) {
            Some(existing) => existing.apply_remote(record),
            None => {
                self.nodes.insert(node.clone(), StatNode::from_remote(record));
                true
            }
        };
        if applied {
            self.touch();
        }
        applied
    }

    /// Smallest version across node records, None without records
    pub fn min_version(&self) -> Option<usize> {
        self.nodes.values().map(StatNode::version).min()
    }

    /// Checks the final transition and returns the finality flag.
    ///
    /// When the bundle has outlived its ttl, `owner` (the local node) closes
    /// its own record by moving to the fully-aged version.
    pub fn refresh_finality(
        &mut self,
        owner: &EndpointId,
        axis: &BinAxis,
        estimate: NetworkEstimate,
        now: f64,
    ) -> bool {
        if self.is_final {
            return true;
        }

        let bin_count = axis.bin_count();
        if self.life_time(now) >= self.ttl {
            if let Some(node) = self.nodes.get_mut(owner) {
                if node.version() < bin_count {
                    node.record_local(bin_count, false, false);
                    self.revision += 1;
                }
            }
        }

        let all_aged = self.min_version().is_some_and(|v| v >= bin_count);
        if all_aged && self.nodes.len() >= MIN_FINAL_NODES {
            self.refresh_all(axis, estimate);
            self.nodes.clear();
            self.is_final = true;
        }
        self.is_final
    }

    /// True when the records are authoritative up to `bin`
    pub fn is_valid_at(
        &mut self,
        bin: usize,
        owner: &EndpointId,
        axis: &BinAxis,
        estimate: NetworkEstimate,
        now: f64,
    ) -> bool {
        if self.refresh_finality(owner, axis, estimate, now) {
            return true;
        }
        self.min_version().map_or(true, |v| v >= bin)
    }

    fn refresh_all(&mut self, axis: &BinAxis, estimate: NetworkEstimate) {
        self.refresh_copies();
        self.refresh_seen();
        self.refresh_delay(estimate);
        self.refresh_ratio(axis, estimate);
    }

    fn can_recompute(&self) -> bool {
        !self.is_final && !self.nodes.is_empty()
    }

    fn refresh_copies(&mut self) {
        if !self.can_recompute() || !self.copies.is_stale(self.revision, None) {
            return;
        }
        for (bin, slot) in self.copies.values.iter_mut().enumerate() {
            *slot = self.nodes.values().filter(|n| n.has_copy_at(bin)).count() as u32;
        }
        self.copies.computed_at = Some((self.revision, None));
    }

    fn refresh_seen(&mut self) {
        if !self.can_recompute() || !self.seen.is_stale(self.revision, None) {
            return;
        }
        for (bin, slot) in self.seen.values.iter_mut().enumerate() {
            *slot = self.nodes.values().filter(|n| n.has_seen_at(bin)).count() as u32;
        }
        self.seen.computed_at = Some((self.revision, None));
    }

    fn refresh_delay(&mut self, estimate: NetworkEstimate) {
        if !self.can_recompute() || !self.delay.is_stale(self.revision, Some(estimate)) {
            return;
        }
        self.refresh_copies();
        self.refresh_seen();

        let n = estimate.node_count as f64;
        for bin in 0..self.delay.values.len() {
            let copies = floor_one(self.copies.values[bin]);
            let seen = floor_one(self.seen.values[bin]);
            self.delay.values[bin] = expected_delay(n, seen, copies);
        }
        self.delay.computed_at = Some((self.revision, Some(estimate)));
    }

    fn refresh_ratio(&mut self, axis: &BinAxis, estimate: NetworkEstimate) {
        if !self.can_recompute() || !self.ratio.is_stale(self.revision, Some(estimate)) {
            return;
        }
        self.refresh_copies();
        self.refresh_seen();

        for bin in 0..self.ratio.values.len() {
            let copies = floor_one(self.copies.values[bin]);
            let seen = floor_one(self.seen.values[bin]);
            let remaining = self.ttl - axis.elapsed_of_bin(bin);
            self.ratio.values[bin] = expected_delivery_ratio(estimate, seen, copies, remaining);
        }
        self.ratio.computed_at = Some((self.revision, Some(estimate)));
    }

    /// Number of nodes holding a copy at `bin`, floored at 1
    pub fn copies_at(&mut self, bin: usize) -> f64 {
        self.refresh_copies();
        self.copies.values.get(bin).copied().map_or(1.0, floor_one)
    }

    /// Number of nodes that had seen the bundle by `bin`, floored at 1
    pub fn seen_at(&mut self, bin: usize) -> f64 {
        self.refresh_seen();
        self.seen.values.get(bin).copied().map_or(1.0, floor_one)
    }

    pub fn delay_at(&mut self, bin: usize, estimate: NetworkEstimate) -> f64 {
        self.refresh_delay(estimate);
        self.delay.values.get(bin).copied().unwrap_or(0.0)
    }

    pub fn delivery_ratio_at(&mut self, bin: usize, axis: &BinAxis, estimate: NetworkEstimate) -> f64 {
        self.refresh_ratio(axis, estimate);
        self.ratio.values.get(bin).copied().unwrap_or(0.0)
    }
}

fn floor_one(count: u32) -> f64 {
    f64::from(count.max(1))
}

/// `(N - 1 - seen) / copies`, zero when there are no copies
pub fn expected_delay(node_count: f64, seen: f64, copies: f64) -> f64 {
    if copies <= 0.0 {
        return 0.0;
    }
    finite_or_zero((node_count - 1.0 - seen) / copies)
}

/// Forecast probability that the bundle still gets delivered.
///
/// With `alpha = avg meeting time * (N - 1)`:
/// `(1 - seen / (N - 1)) * exp(-remaining * copies / alpha)` when `N > 1`
/// and `alpha > 0`, otherwise the single-node form
/// `(1 - seen) * exp(-remaining * copies)`.
pub fn expected_delivery_ratio(
    estimate: NetworkEstimate,
    seen: f64,
    copies: f64,
    remaining: f64,
) -> f64 {
    let peers = estimate.node_count as f64 - 1.0;
    let alpha = estimate.alpha();

    if estimate.node_count > 1 && alpha > 0.0 {
        finite_or_zero((1.0 - seen / peers) * (-remaining * copies / alpha).exp())
    } else {
        let unseen = 1.0 - seen;
        if unseen == 0.0 {
            return 0.0;
        }
        finite_or_zero(unseen * (-remaining * copies).exp())
    }
}

pub(crate) fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
