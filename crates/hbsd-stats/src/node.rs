//! Per-node observation record of one bundle
//!
//! Every node that reported on a bundle owns a [`StatNode`] inside that
//! bundle's statistics message. It holds two bitmaps over the bin axis:
//!
//! - `copies`: the node held a copy during that bin
//! - `seen`: the node had seen the bundle by that bin. Once a start index is
//!   known the bitmap is forward-filled with ones from that index to the end
//!   and is not re-derived afterwards.
//!
//! The version counter tells how far along the axis the record is
//! authoritative. Only the owning node raises it through
//! [`StatNode::record_local`]; peers' copies are replaced wholesale through
//! [`StatNode::apply_remote`] when the incoming version is not older.

use crate::error::{Result, StatsError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatNode {
    copies: Vec<bool>,
    seen: Vec<bool>,
    seen_start: Option<usize>,
    seen_filled: bool,
    version: usize,
    meeting_time: f64,
}

/// A peer's view of one node record, as carried by a statistics digest
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNodeRecord {
    pub copies: Vec<bool>,
    pub meeting_time: f64,
    pub version: usize,
    pub seen_start: Option<usize>,
}

impl RemoteNodeRecord {
    /// Checks the record against an axis of `bin_count` bins
    pub fn validate(&self, bin_count: usize) -> Result<()> {
        if self.copies.len() != bin_count {
            return Err(StatsError::BitmapLength {
                expected: bin_count,
                actual: self.copies.len(),
            });
        }
        if self.version > bin_count {
            return Err(StatsError::VersionOutOfRange {
                version: self.version,
                max: bin_count,
            });
        }
        if let Some(index) = self.seen_start {
            if index > bin_count {
                return Err(StatsError::StartIndexOutOfRange {
                    index,
                    max: bin_count,
                });
            }
        }
        Ok(())
    }
}

impl StatNode {
    pub fn new(bin_count: usize, meeting_time: f64) -> Self {
        Self {
            copies: vec![false; bin_count],
            seen: vec![false; bin_count],
            seen_start: None,
            seen_filled: false,
            version: 0,
            meeting_time,
        }
    }

    /// Builds a node from a peer's record
    pub fn from_remote(record: RemoteNodeRecord) -> Self {
        let bin_count = record.copies.len();
        let mut node = Self::new(bin_count, record.meeting_time);
        node.apply_remote(record);
        node
    }

    pub fn version(&self) -> usize {
        self.version
    }

    pub fn copies(&self) -> &[bool] {
        &self.copies
    }

    pub fn seen(&self) -> &[bool] {
        &self.seen
    }

    pub fn seen_start(&self) -> Option<usize> {
        self.seen_start
    }

    pub fn meeting_time(&self) -> f64 {
        self.meeting_time
    }

    pub fn set_meeting_time(&mut self, meeting_time: f64) {
        self.meeting_time = meeting_time;
    }

    pub fn has_copy_at(&self, bin: usize) -> bool {
        self.copies.get(bin).copied().unwrap_or(false)
    }

    pub fn has_seen_at(&self, bin: usize) -> bool {
        self.seen.get(bin).copied().unwrap_or(false)
    }

    /// Owner update at `bin`.
    ///
    /// `present` marks a held copy; a removal clears the copy bits after
    /// `bin`. `first_sighting` sets the seen start and forward-fills the seen
    /// bits. `bin` may be the fully-aged index, which only advances the
    /// version.
    pub fn record_local(&mut self, bin: usize, present: bool, first_sighting: bool) {
        let len = self.copies.len();

        if first_sighting {
            self.seen_start = Some(bin.min(len));
        }
        if present && bin < len {
            self.copies[bin] = true;
        }
        self.version = self.version.max(bin.min(len));
        if bin < len {
            self.seen[bin] = true;
        }

        for j in (bin + 1)..len {
            if !present {
                self.copies[j] = false;
            }
            if first_sighting {
                self.seen[j] = true;
            }
        }
    }

    /// Last-writer-wins merge of a peer's record. Returns false when the
    /// local version is newer and nothing changed.
    pub fn apply_remote(&mut self, record: RemoteNodeRecord) -> bool {
        if record.version < self.version {
            return false;
        }

        self.seen_start = record.seen_start;
        self.seen_filled = false;
        for (slot, bit) in self.copies.iter_mut().zip(record.copies) {
            *slot = bit;
        }
        self.meeting_time = record.meeting_time;
        self.fill_seen();
        self.version = record.version;
        true
    }

    fn fill_seen(&mut self) {
        if self.seen_filled {
            return;
        }
        if let Some(start) = self.seen_start {
            for slot in self.seen.iter_mut().skip(start) {
                *slot = true;
            }
            self.seen_filled = true;
        }
    }

    /// Snapshot in digest form
    pub fn to_remote(&self) -> RemoteNodeRecord {
        RemoteNodeRecord {
            copies: self.copies.clone(),
            meeting_time: self.meeting_time,
            version: self.version,
            seen_start: self.seen_start,
        }
    }
}
