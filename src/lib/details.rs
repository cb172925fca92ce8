//! Per-sample occurrence vectors for multi-sample collapsing.
//!
//! When several samples are collapsed together, every distinct sequence
//! carries a [`DetailsRecord`] alongside it: one counter per input sample
//! plus the overall total. The invariant `overall == sum(counters)` holds
//! for every record produced by this module.

use crate::buffer::Record;
use crate::errors::{CollapseError, Result};

/// Occurrence counters of one distinct sequence across all input samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailsRecord {
    counters: Vec<u32>,
    overall: u32,
}

impl DetailsRecord {
    /// Create a vector of `n_samples` counters with `overall` occurrences
    /// attributed to the sample at `sample_id`.
    #[must_use]
    pub fn init(overall: u32, sample_id: usize, n_samples: usize) -> Self {
        let mut counters = vec![0; n_samples];
        counters[sample_id] = overall;
        Self { counters, overall }
    }

    /// Rebuild a record from parsed counters (used by the details reader).
    #[must_use]
    pub fn from_parts(counters: Vec<u32>, overall: u32) -> Self {
        Self { counters, overall }
    }

    /// The per-sample counters.
    #[must_use]
    pub fn counters(&self) -> &[u32] {
        &self.counters
    }

    /// Sum of all per-sample counters.
    #[must_use]
    pub fn overall(&self) -> u32 {
        self.overall
    }

    /// Add `b`'s counters into `a` element-wise and clear `b`.
    ///
    /// # Errors
    ///
    /// [`CollapseError::CounterOverflow`] if any counter or the overall total
    /// would exceed its representable range;
    /// [`CollapseError::InvariantViolated`] if the vectors differ in length.
    pub fn merge(a: &mut Self, b: &mut Self) -> Result<()> {
        if a.counters.len() != b.counters.len() {
            return Err(CollapseError::InvariantViolated {
                reason: format!(
                    "details length mismatch while merging records ({} vs {})",
                    a.counters.len(),
                    b.counters.len()
                ),
            });
        }
        for (ca, cb) in a.counters.iter_mut().zip(b.counters.iter_mut()) {
            *ca = ca.checked_add(*cb).ok_or(CollapseError::CounterOverflow)?;
            *cb = 0;
        }
        a.overall = a.overall.checked_add(b.overall).ok_or(CollapseError::CounterOverflow)?;
        b.overall = 0;
        Ok(())
    }

    /// Byte cost of this record, reflecting counter capacity.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        self.counters.capacity() * std::mem::size_of::<u32>() + std::mem::size_of::<Self>()
    }
}

impl Record for DetailsRecord {
    fn merge_pair(a: &mut Self, b: &mut Self) -> Result<()> {
        DetailsRecord::merge(a, b)
    }

    fn merge_run(run: &mut [Self]) -> Result<()> {
        let Some((first, rest)) = run.split_first_mut() else {
            return Ok(());
        };
        for follower in rest.iter_mut() {
            DetailsRecord::merge(first, follower)?;
        }
        Ok(())
    }

    fn memory_bytes(&self) -> usize {
        DetailsRecord::memory_bytes(self)
    }
}
