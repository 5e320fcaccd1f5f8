//! Capacity-bounded bundle store
//!
//! Holds every bundle the router currently keeps:
//! - Primary index by content key, secondary index by transient id
//! - Duplicate admissions are no-ops
//! - At capacity, admission is delegated to the [`UtilityScheduler`]
//! - Every admission or removal bumps a revision counter that the session
//!   layer compares against to decide whether a new exchange is worthwhile
//!
//! The store never talks to the daemon. Bundles that must be deleted there
//! are handed back in an [`Admission`] so the caller can issue the request
//! after releasing its locks.

use crate::utility::UtilityScheduler;
use hbsd_protocol::{Bundle, BundleKey, TransientId};
use hbsd_stats::StatisticsEngine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Outcome of [`BundleStore::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionResult {
    /// Bundle is now stored
    Admitted,
    /// Same content key or transient id already stored, nothing changed
    Duplicate,
    /// Bundle was not stored, the store is unchanged
    Rejected,
}

/// Admission outcome plus the bundles the daemon should delete
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub result: AdmissionResult,
    /// Victim removed to make room for the new bundle
    pub evicted: Option<Bundle>,
    /// The new bundle itself, when it was rejected
    pub dropped: Option<Bundle>,
}

impl Admission {
    pub(crate) fn admitted() -> Self {
        Self {
            result: AdmissionResult::Admitted,
            evicted: None,
            dropped: None,
        }
    }

    pub(crate) fn duplicate() -> Self {
        Self {
            result: AdmissionResult::Duplicate,
            evicted: None,
            dropped: None,
        }
    }

    pub(crate) fn rejected(dropped: Bundle) -> Self {
        Self {
            result: AdmissionResult::Rejected,
            evicted: None,
            dropped: Some(dropped),
        }
    }

    /// Bundles whose daemon copy should be deleted
    pub fn deletions(&self) -> impl Iterator<Item = &Bundle> {
        self.evicted.iter().chain(self.dropped.iter())
    }
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub admitted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub removed: u64,
}

/// Bundle store
#[derive(Debug)]
pub struct BundleStore {
    bundles: BTreeMap<BundleKey, Bundle>,
    by_transient_id: HashMap<TransientId, BundleKey>,
    capacity: usize,
    revision: u64,
    stats: StoreStats,
}

impl BundleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            bundles: BTreeMap::new(),
            by_transient_id: HashMap::new(),
            capacity,
            revision: 0,
            stats: StoreStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bundles.len() >= self.capacity
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Revision of the last admission or removal
    pub fn last_changed(&self) -> u64 {
        self.revision
    }

    /// Admits `bundle`, evicting through `scheduler` when full
    pub fn admit(
        &mut self,
        bundle: Bundle,
        scheduler: &UtilityScheduler,
        stats: &mut StatisticsEngine,
        now: u64,
    ) -> Admission {
        if self.is_duplicate(&bundle) {
            self.stats.duplicates += 1;
            debug!(key = %bundle.key(), "duplicate bundle ignored");
            return Admission::duplicate();
        }

        if !self.is_full() {
            self.insert(bundle);
            return Admission::admitted();
        }

        let admission = scheduler.admit_with_eviction(self, bundle, stats, now);
        if admission.result == AdmissionResult::Rejected {
            self.stats.rejected += 1;
        }
        admission
    }

    fn is_duplicate(&self, bundle: &Bundle) -> bool {
        self.bundles.contains_key(bundle.key())
            || bundle
                .transient_id
                .is_some_and(|tid| self.by_transient_id.contains_key(&tid))
    }

    /// Stores `bundle` unconditionally. Callers check duplicates and capacity.
    pub(crate) fn insert(&mut self, bundle: Bundle) {
        if let Some(tid) = bundle.transient_id {
            self.by_transient_id.insert(tid, bundle.key().clone());
        }
        self.bundles.insert(bundle.key().clone(), bundle);
        self.revision += 1;
        self.stats.admitted += 1;
    }

    /// Removes the bundle from both indexes. Pure bookkeeping.
    pub fn remove(&mut self, key: &BundleKey) -> Option<Bundle> {
        let bundle = self.detach(key)?;
        self.stats.removed += 1;
        Some(bundle)
    }

    /// Removes an eviction victim
    pub(crate) fn evict(&mut self, key: &BundleKey) -> Option<Bundle> {
        let bundle = self.detach(key)?;
        self.stats.evicted += 1;
        Some(bundle)
    }

    fn detach(&mut self, key: &BundleKey) -> Option<Bundle> {
        let bundle = self.bundles.remove(key)?;
        if let Some(tid) = bundle.transient_id {
            self.by_transient_id.remove(&tid);
        }
        self.revision += 1;
        Some(bundle)
    }

    /// The daemon reported the bundle expired
    pub fn expire(&mut self, transient_id: TransientId) -> Option<Bundle> {
        let key = self.by_transient_id.get(&transient_id)?.clone();
        self.remove(&key)
    }

    /// The daemon reported the bundle delivered to a local application
    pub fn delivered(&mut self, transient_id: TransientId) -> Option<Bundle> {
        let key = self.by_transient_id.get(&transient_id)?.clone();
        self.remove(&key)
    }

    pub fn lookup_by_key(&self, key: &BundleKey) -> Option<&Bundle> {
        self.bundles.get(key)
    }

    pub fn lookup_by_transient_id(&self, transient_id: TransientId) -> Option<&Bundle> {
        self.by_transient_id
            .get(&transient_id)
            .and_then(|key| self.bundles.get(key))
    }

    /// True when `transient_id` refers to a stored bundle
    pub fn is_current(&self, transient_id: TransientId) -> bool {
        self.by_transient_id.contains_key(&transient_id)
    }

    pub fn contains(&self, key: &BundleKey) -> bool {
        self.bundles.contains_key(key)
    }

    /// Content keys in key order
    pub fn snapshot_keys(&self) -> Vec<BundleKey> {
        self.bundles.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BundleKey, &Bundle)> {
        self.bundles.iter()
    }

    /// Checks that both indexes agree with each other
    pub fn indexes_consistent(&self) -> bool {
        let indexed = self.bundles.values().filter(|b| b.transient_id.is_some()).count();
        indexed == self.by_transient_id.len()
            && self.by_transient_id.iter().all(|(tid, key)| {
                self.bundles
                    .get(key)
                    .is_some_and(|b| b.transient_id == Some(*tid))
            })
    }
}
