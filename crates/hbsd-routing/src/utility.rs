//! Utility-based buffer management
//!
//! Ranks stored bundles by one of two utility functions, fed by the
//! network-wide statistics at each bundle's elapsed-time bin:
//!
//! - delivery rate: `(1 / alpha) * (ttl - elapsed) * dr`
//! - delivery delay: `(alpha / (N - 1)) * dd^2 / (N - 1 - mi)`
//!
//! where `alpha = avg_meeting_time * (N - 1)`. When `N <= 1` or
//! `alpha <= 0` the single-node forms `(ttl - elapsed) * dr` and `dd^2`
//! are used. Non-finite results rank as 0.

use crate::error::{Result, RoutingError};
use crate::store::{Admission, AdmissionResult, BundleStore};
use hbsd_protocol::{Bundle, BundleKey, EndpointId, RouterConfig, UtilityPolicy};
use hbsd_stats::{BinAverages, NetworkEstimate, StatisticsEngine};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Delivery-rate utility of a bundle with `remaining` seconds to live
pub fn delivery_rate_utility(remaining: f64, delivery_ratio: f64, estimate: NetworkEstimate) -> f64 {
    let alpha = estimate.alpha();
    let value = if estimate.node_count > 1 && alpha > 0.0 {
        (1.0 / alpha) * remaining * delivery_ratio
    } else {
        remaining * delivery_ratio
    };
    finite_or_zero(value)
}

/// Delivery-delay utility from the expected delay and nodes-seen estimate
pub fn delivery_delay_utility(delay: f64, seen: f64, estimate: NetworkEstimate) -> f64 {
    let alpha = estimate.alpha();
    let value = if estimate.node_count > 1 && alpha > 0.0 {
        let peers = estimate.node_count as f64 - 1.0;
        (alpha / peers) * delay.powi(2) / (peers - seen)
    } else {
        delay.powi(2)
    };
    finite_or_zero(value)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Utility scheduler
#[derive(Debug, Clone)]
pub struct UtilityScheduler {
    policy: UtilityPolicy,
    optimize: bool,
    local_node: EndpointId,
}

impl UtilityScheduler {
    pub fn new(policy: UtilityPolicy, optimize: bool, local_node: EndpointId) -> Self {
        Self {
            policy,
            optimize,
            local_node,
        }
    }

    pub fn from_config(config: &RouterConfig, local_node: EndpointId) -> Self {
        Self::new(config.utility_policy, config.enable_optimization, local_node)
    }

    pub fn policy(&self) -> UtilityPolicy {
        self.policy
    }

    pub fn is_optimizing(&self) -> bool {
        self.optimize
    }

    pub fn local_node(&self) -> &EndpointId {
        &self.local_node
    }

    /// Utility of a single bundle at local time `now`
    pub fn utility(&self, bundle: &Bundle, stats: &mut StatisticsEngine, now: u64) -> f64 {
        let mut ranker = Ranker::new(self.policy, stats);
        ranker.utility(bundle, now)
    }

    /// Non-local bundle with the lowest utility, first in key order on ties
    pub fn select_victim(
        &self,
        store: &BundleStore,
        stats: &mut StatisticsEngine,
        now: u64,
    ) -> Result<BundleKey> {
        let mut ranker = Ranker::new(self.policy, stats);
        self.find_victim(store, &mut ranker, now)
            .map(|(key, _)| key)
    }

    fn find_victim(
        &self,
        store: &BundleStore,
        ranker: &mut Ranker<'_>,
        now: u64,
    ) -> Result<(BundleKey, f64)> {
        let mut victim: Option<(BundleKey, f64)> = None;
        for (key, bundle) in store.iter() {
            if bundle.is_local_origin(&self.local_node) {
                continue;
            }
            let utility = ranker.utility(bundle, now);
            if victim.as_ref().map_or(true, |(_, lowest)| utility < *lowest) {
                victim = Some((key.clone(), utility));
            }
        }
        victim.ok_or(RoutingError::NoEvictionCandidate)
    }

    /// Admission into a full store.
    ///
    /// Without optimization the new bundle is dropped. Otherwise the victim
    /// is evicted when the new bundle is of local origin or ranks at least
    /// as high; the eviction is reported to `stats` as "deleted here".
    pub fn admit_with_eviction(
        &self,
        store: &mut BundleStore,
        bundle: Bundle,
        stats: &mut StatisticsEngine,
        now: u64,
    ) -> Admission {
        if !self.optimize {
            debug!(key = %bundle.key(), capacity = store.capacity(), "store full, dropping new bundle");
            return Admission::rejected(bundle);
        }

        let local_origin = bundle.is_local_origin(&self.local_node);
        let mut ranker = Ranker::new(self.policy, stats);
        let (victim_key, victim_utility) = match self.find_victim(store, &mut ranker, now) {
            Ok(victim) => victim,
            Err(e) => {
                warn!(key = %bundle.key(), error = %e, "store full, rejecting bundle");
                return Admission::rejected(bundle);
            }
        };
        let new_utility = ranker.utility(&bundle, now);

        if !local_origin && new_utility < victim_utility {
            debug!(
                key = %bundle.key(),
                utility = new_utility,
                victim_utility,
                "new bundle ranks below every stored bundle"
            );
            return Admission::rejected(bundle);
        }

        let Some(victim) = store.evict(&victim_key) else {
            return Admission::rejected(bundle);
        };
        let elapsed = victim.elapsed_at(now) as f64;
        stats.report_removed(victim.key(), &self.local_node, elapsed, victim.ttl_secs as f64);
        info!(
            evicted = %victim.key(),
            admitted = %bundle.key(),
            victim_utility,
            utility = new_utility,
            "evicted bundle"
        );
        store.insert(bundle);

        Admission {
            result: AdmissionResult::Admitted,
            evicted: Some(victim),
            dropped: None,
        }
    }

    /// Sorts `candidates` by descending utility, stable on ties.
    ///
    /// Returns them untouched when optimization is disabled. Keys missing
    /// from the store go last.
    pub fn order_for_transmission(
        &self,
        candidates: Vec<BundleKey>,
        store: &BundleStore,
        stats: &mut StatisticsEngine,
        now: u64,
    ) -> Vec<BundleKey> {
        if !self.optimize || candidates.len() < 2 {
            return candidates;
        }
        let mut ranker = Ranker::new(self.policy, stats);
        let mut ranked: Vec<(BundleKey, f64)> = candidates
            .into_iter()
            .map(|key| {
                let utility = store
                    .lookup_by_key(&key)
                    .map_or(f64::NEG_INFINITY, |b| ranker.utility(b, now));
                (key, utility)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.into_iter().map(|(key, _)| key).collect()
    }
}

/// Memoizes network averages per bin while ranking a batch of bundles
struct Ranker<'a> {
    policy: UtilityPolicy,
    stats: &'a mut StatisticsEngine,
    estimate: NetworkEstimate,
    averages: HashMap<usize, BinAverages>,
}

impl<'a> Ranker<'a> {
    fn new(policy: UtilityPolicy, stats: &'a mut StatisticsEngine) -> Self {
        let estimate = stats.estimate();
        Self {
            policy,
            stats,
            estimate,
            averages: HashMap::new(),
        }
    }

    fn utility(&mut self, bundle: &Bundle, now: u64) -> f64 {
        let elapsed = bundle.elapsed_at(now) as f64;
        let bin = self.stats.bin_index_of(elapsed);
        let stats = &mut *self.stats;
        let averages = *self
            .averages
            .entry(bin)
            .or_insert_with(|| stats.averages_at(elapsed));

        match self.policy {
            UtilityPolicy::DeliveryRate => delivery_rate_utility(
                bundle.ttl_secs as f64 - elapsed,
                averages.delivery_ratio,
                self.estimate,
            ),
            UtilityPolicy::DeliveryDelay => {
                delivery_delay_utility(averages.delay, averages.seen, self.estimate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hbsd_protocol::{BundleDescriptor, TransientId};
    use hbsd_stats::StatisticsConfig;

    fn create_test_bundle(seq: u64, source: &str, ttl: u64) -> Bundle {
        BundleDescriptor {
            creation_timestamp: Some((2_000 << 32) | seq),
            source: Some(source.to_string()),
            destination: Some("dtn://dest/app".to_string()),
            ttl_secs: Some(ttl),
            transient_id: Some(TransientId(seq)),
            elapsed_secs: Some(10),
            ..Default::default()
        }
        .into_bundle(1_000)
        .unwrap()
    }

    fn create_test_stats() -> StatisticsEngine {
        let config = StatisticsConfig {
            use_online_node_count: false,
            ..Default::default()
        };
        let local = EndpointId::parse("dtn://local").unwrap();
        let mut stats = StatisticsEngine::new(config, local.clone());
        let key = create_test_bundle(99, "dtn://elsewhere/app", 3_600).key().clone();
        stats.report(&key, &local, 10.0, 3_600.0).unwrap();
        stats
    }

    fn create_test_scheduler(optimize: bool) -> UtilityScheduler {
        UtilityScheduler::new(
            UtilityPolicy::DeliveryRate,
            optimize,
            EndpointId::parse("dtn://local").unwrap(),
        )
    }

    fn estimate(node_count: usize, avg_meeting_time: f64) -> NetworkEstimate {
        NetworkEstimate {
            node_count,
            avg_meeting_time,
        }
    }

    #[test]
    fn test_delivery_rate_utility() {
        // alpha = 100 * 19
        let u = delivery_rate_utility(1_900.0, 0.5, estimate(20, 100.0));
        assert!((u - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_single_node_fallbacks_are_finite() {
        let u = delivery_rate_utility(100.0, 0.5, estimate(1, 100.0));
        assert_eq!(u, 50.0);
        let u = delivery_rate_utility(100.0, 0.5, estimate(0, 100.0));
        assert_eq!(u, 50.0);
        let u = delivery_delay_utility(3.0, 1.0, estimate(1, 100.0));
        assert_eq!(u, 9.0);
        let u = delivery_rate_utility(100.0, 0.5, estimate(5, 0.0));
        assert_eq!(u, 50.0);
    }

    #[test]
    fn test_delay_utility_zero_denominator() {
        // N - 1 - mi == 0
        let u = delivery_delay_utility(2.0, 19.0, estimate(20, 100.0));
        assert_eq!(u, 0.0);
    }

    #[test]
    fn test_select_victim_skips_local_origin() {
        let scheduler = create_test_scheduler(true);
        let mut stats = create_test_stats();
        let mut store = BundleStore::new(4);
        let local = create_test_bundle(1, "dtn://local/app", 10);
        let remote = create_test_bundle(2, "dtn://remote/app", 3_600);
        let remote_key = remote.key().clone();
        store.insert(local);
        store.insert(remote);

        // the local bundle has the lower utility but is protected
        let victim = scheduler.select_victim(&store, &mut stats, 1_000).unwrap();
        assert_eq!(victim, remote_key);
    }

    #[test]
    fn test_select_victim_without_candidates() {
        let scheduler = create_test_scheduler(true);
        let mut stats = create_test_stats();
        let mut store = BundleStore::new(4);
        store.insert(create_test_bundle(1, "dtn://local/app", 10));

        let result = scheduler.select_victim(&store, &mut stats, 1_000);
        assert_eq!(result, Err(RoutingError::NoEvictionCandidate));

        let empty = BundleStore::new(4);
        assert!(scheduler.select_victim(&empty, &mut stats, 1_000).is_err());
    }

    #[test]
    fn test_select_victim_picks_lowest_utility() {
        let scheduler = create_test_scheduler(true);
        let mut stats = create_test_stats();
        let mut store = BundleStore::new(4);
        let short = create_test_bundle(1, "dtn://a/app", 100);
        let short_key = short.key().clone();
        store.insert(create_test_bundle(2, "dtn://b/app", 3_600));
        store.insert(short);
        store.insert(create_test_bundle(3, "dtn://c/app", 1_800));

        let victim = scheduler.select_victim(&store, &mut stats, 1_000).unwrap();
        assert_eq!(victim, short_key);
    }

    #[test]
    fn test_local_origin_bundle_always_admitted() {
        let scheduler = create_test_scheduler(true);
        let mut stats = create_test_stats();
        let mut store = BundleStore::new(1);
        let stored = create_test_bundle(1, "dtn://remote/app", 3_600);
        let stored_key = stored.key().clone();
        store.insert(stored);

        let new = create_test_bundle(2, "dtn://local/app", 20);
        let new_key = new.key().clone();
        let admission = scheduler.admit_with_eviction(&mut store, new, &mut stats, 1_000);

        assert_eq!(admission.result, AdmissionResult::Admitted);
        assert_eq!(admission.evicted.unwrap().key(), &stored_key);
        assert!(store.contains(&new_key));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_low_utility_bundle_rejected() {
        let scheduler = create_test_scheduler(true);
        let mut stats = create_test_stats();
        let mut store = BundleStore::new(1);
        store.insert(create_test_bundle(1, "dtn://remote/app", 3_600));

        let new = create_test_bundle(2, "dtn://other/app", 20);
        let admission = scheduler.admit_with_eviction(&mut store, new, &mut stats, 1_000);

        assert_eq!(admission.result, AdmissionResult::Rejected);
        assert!(admission.evicted.is_none());
        assert!(admission.dropped.is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_higher_utility_bundle_evicts_victim() {
        let scheduler = create_test_scheduler(true);
        let mut stats = create_test_stats();
        let mut store = BundleStore::new(1);
        store.insert(create_test_bundle(1, "dtn://remote/app", 100));

        let new = create_test_bundle(2, "dtn://other/app", 3_600);
        let admission = scheduler.admit_with_eviction(&mut store, new, &mut stats, 1_000);

        assert_eq!(admission.result, AdmissionResult::Admitted);
        assert!(admission.evicted.is_some());
        assert_eq!(store.stats().evicted, 1);
    }

    #[test]
    fn test_order_for_transmission() {
        let scheduler = create_test_scheduler(true);
        let mut stats = create_test_stats();
        let mut store = BundleStore::new(4);
        let bundles = [
            create_test_bundle(1, "dtn://a/app", 100),
            create_test_bundle(2, "dtn://b/app", 3_600),
            create_test_bundle(3, "dtn://c/app", 1_800),
        ];
        let keys: Vec<BundleKey> = bundles.iter().map(|b| b.key().clone()).collect();
        for bundle in bundles {
            store.insert(bundle);
        }

        let ordered = scheduler.order_for_transmission(keys.clone(), &store, &mut stats, 1_000);
        assert_eq!(ordered, vec![keys[1].clone(), keys[2].clone(), keys[0].clone()]);

        let unscheduled = create_test_scheduler(false);
        let ordered = unscheduled.order_for_transmission(keys.clone(), &store, &mut stats, 1_000);
        assert_eq!(ordered, keys);
    }
}
