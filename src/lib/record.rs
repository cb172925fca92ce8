//! The collapsed sequence record and its merge algebra.
//!
//! A [`SequenceRecord`] represents one distinct observed sequence together
//! with its occurrence count, optional per-base qualities, and the optional
//! breakpoint offset separating paired mates. Duplicate records are folded
//! into a single survivor by [`SequenceRecord::merge`]; the loser's count is
//! zeroed, turning it into a tombstone that writers skip.
//!
//! Qualities are occurrence-weighted averages computed directly on the raw
//! Phred+33 bytes (the +33 offset cancels out of the weighted mean).

use crate::buffer::Record;
use crate::errors::{CollapseError, Result};

/// One distinct observed sequence plus its metadata.
///
/// For paired-end data `sequence` is the concatenation of mate-1 and mate-2
/// and `bp_offset` is the index where mate-2 begins; `bp_offset == 0` marks
/// single-end data. `quality` is either empty or exactly as long as
/// `sequence`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceRecord {
    sequence: Vec<u8>,
    quality: Vec<u8>,
    count: u32,
    bp_offset: u16,
}

impl SequenceRecord {
    /// Create a record from its parts.
    #[must_use]
    pub fn new(sequence: Vec<u8>, quality: Vec<u8>, count: u32, bp_offset: u16) -> Self {
        debug_assert!(quality.is_empty() || quality.len() == sequence.len());
        Self { sequence, quality, count, bp_offset }
    }

    /// The sequence bases (mate-1 followed by mate-2 for paired data).
    #[must_use]
    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    /// Phred+33 quality bytes, or empty when qualities are suppressed.
    #[must_use]
    pub fn quality(&self) -> &[u8] {
        &self.quality
    }

    /// Number of times this sequence occurred; zero marks a tombstone.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Index into `sequence` where mate-2 begins; zero for single-end data.
    #[must_use]
    pub fn bp_offset(&self) -> u16 {
        self.bp_offset
    }

    /// Whether this record survived merging (tombstones have `count == 0`).
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.count > 0
    }

    /// Mate-1 bases and qualities (the prefix up to the breakpoint).
    #[must_use]
    pub fn mate1(&self) -> (&[u8], &[u8]) {
        let bp = self.bp_offset as usize;
        let qual = if self.quality.is_empty() { &[][..] } else { &self.quality[..bp] };
        (&self.sequence[..bp], qual)
    }

    /// Mate-2 bases and qualities (the suffix from the breakpoint on).
    #[must_use]
    pub fn mate2(&self) -> (&[u8], &[u8]) {
        let bp = self.bp_offset as usize;
        let qual = if self.quality.is_empty() { &[][..] } else { &self.quality[bp..] };
        (&self.sequence[bp..], qual)
    }

    /// Header written for this record in fasta/fastq output.
    ///
    /// The convention `BIOSEQZIP|ID:<id>|CN:<count>` lets downstream tools
    /// recover the occurrence count from aligned records.
    #[must_use]
    pub fn fastx_header(&self, id: u64) -> String {
        format!("BIOSEQZIP|ID:{id}|CN:{}", self.count)
    }

    /// Merge `b` into `a`, turning `b` into a tombstone.
    ///
    /// Requires equal sequences and equal-length qualities. Qualities become
    /// the occurrence-weighted average of both inputs, rounded down.
    ///
    /// # Errors
    ///
    /// [`CollapseError::CounterOverflow`] if the combined count exceeds the
    /// counter range; [`CollapseError::InvariantViolated`] on a quality
    /// length mismatch.
    pub fn merge(a: &mut Self, b: &mut Self) -> Result<()> {
        debug_assert_eq!(a.sequence, b.sequence);
        if a.quality.len() != b.quality.len() {
            return Err(CollapseError::InvariantViolated {
                reason: format!(
                    "quality length mismatch while merging records ({} vs {})",
                    a.quality.len(),
                    b.quality.len()
                ),
            });
        }
        let total = a.count.checked_add(b.count).ok_or(CollapseError::CounterOverflow)?;
        if total > 0 {
            for (qa, &qb) in a.quality.iter_mut().zip(&b.quality) {
                let weighted =
                    i64::from(*qa) * i64::from(a.count) + i64::from(qb) * i64::from(b.count);
                *qa = (weighted / i64::from(total)) as u8;
            }
        }
        a.count = total;
        b.count = 0;
        Ok(())
    }

    /// Fold a run of equal-sequence records into its first element.
    ///
    /// Semantically equivalent to merging every follower into `run[0]` one by
    /// one, but the weighted quality is accumulated in a single pass using
    /// 64-bit accumulators so intermediate rounding never compounds.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`SequenceRecord::merge`].
    pub fn merge_range(run: &mut [Self]) -> Result<()> {
        let Some((first, rest)) = run.split_first_mut() else {
            return Ok(());
        };
        let qual_len = first.quality.len();
        let mut weighted: Vec<i64> =
            first.quality.iter().map(|&q| i64::from(q) * i64::from(first.count)).collect();
        let mut total = first.count;
        for follower in rest.iter_mut() {
            debug_assert_eq!(first.sequence, follower.sequence);
            if follower.quality.len() != qual_len {
                return Err(CollapseError::InvariantViolated {
                    reason: format!(
                        "quality length mismatch while merging records ({} vs {})",
                        qual_len,
                        follower.quality.len()
                    ),
                });
            }
            total = total.checked_add(follower.count).ok_or(CollapseError::CounterOverflow)?;
            for (acc, &q) in weighted.iter_mut().zip(&follower.quality) {
                *acc += i64::from(q) * i64::from(follower.count);
            }
            follower.count = 0;
        }
        if total > 0 {
            for (q, &acc) in first.quality.iter_mut().zip(&weighted) {
                *q = (acc / i64::from(total)) as u8;
            }
        }
        first.count = total;
        Ok(())
    }

    /// Trim `left` bases from the start and `right` bases from the end.
    ///
    /// The breakpoint offset is clamped into the trimmed window: offsets
    /// inside the removed left margin collapse to zero, offsets inside the
    /// removed right margin collapse to the new sequence length. A record
    /// shorter than `left + right` is emptied.
    pub fn trim(&mut self, left: usize, right: usize) {
        let old_len = self.sequence.len();
        let left = left.min(old_len);
        let new_len = old_len.saturating_sub(left + right);

        self.sequence.drain(..left);
        self.sequence.truncate(new_len);
        self.sequence.shrink_to_fit();
        if !self.quality.is_empty() {
            self.quality.drain(..left);
            self.quality.truncate(new_len);
            self.quality.shrink_to_fit();
        }

        let bp = usize::from(self.bp_offset);
        self.bp_offset = if bp < left {
            0
        } else if bp <= old_len.saturating_sub(right) {
            (bp - left).min(new_len) as u16
        } else {
            new_len as u16
        };
    }

    /// Heap plus inline byte cost of this record, reflecting capacity.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        self.sequence.capacity() + self.quality.capacity() + std::mem::size_of::<Self>()
    }
}

impl Record for SequenceRecord {
    fn merge_pair(a: &mut Self, b: &mut Self) -> Result<()> {
        SequenceRecord::merge(a, b)
    }

    fn merge_run(run: &mut [Self]) -> Result<()> {
        SequenceRecord::merge_range(run)
    }

    fn memory_bytes(&self) -> usize {
        SequenceRecord::memory_bytes(self)
    }
}
