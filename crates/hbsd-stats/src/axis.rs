//! Elapsed-time axis
//!
//! Observations are bucketed on `bin_count` equal-width bins. Bin `i` covers
//! elapsed times in `(i * bin_size, (i + 1) * bin_size]`, bin 0 also takes
//! elapsed time 0. Anything at or past the horizon lands on the extra index
//! `bin_count`, the "fully aged" bin.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinAxis {
    bin_count: usize,
    bin_size: f64,
}

impl BinAxis {
    /// `bin_count` and `bin_size_secs` are expected to be validated (non-zero)
    pub fn new(bin_count: usize, bin_size_secs: u64) -> Self {
        Self {
            bin_count: bin_count.max(1),
            bin_size: bin_size_secs.max(1) as f64,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn bin_size(&self) -> f64 {
        self.bin_size
    }

    /// Elapsed time at which a bundle is considered fully aged
    pub fn horizon(&self) -> f64 {
        self.bin_count as f64 * self.bin_size
    }

    pub fn bin_index_of(&self, elapsed_secs: f64) -> usize {
        // also catches NaN and clock skew
        if !(elapsed_secs > 0.0) {
            return 0;
        }
        if elapsed_secs >= self.horizon() {
            return self.bin_count;
        }
        let upper = (elapsed_secs / self.bin_size).ceil() as usize;
        upper.saturating_sub(1).min(self.bin_count - 1)
    }

    /// Representative elapsed time of a bin, used by the delivery-ratio forecast
    pub fn elapsed_of_bin(&self, bin: usize) -> f64 {
        if bin == 0 {
            0.0
        } else {
            bin as f64 * self.bin_size + 1.0
        }
    }
}
