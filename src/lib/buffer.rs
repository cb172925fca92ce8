//! In-memory record batching: parallel sort, parallel collapse, and k-way
//! merge.
//!
//! A [`Buffer`] owns one contiguous batch of records while it is sorted,
//! collapsed, and stored. The parallel phases partition the batch into
//! contiguous index regions, one per worker:
//!
//! - `sort` sorts each region independently, then runs `ceil(log2(threads))`
//!   rounds of pairwise merges, doubling the merged span each round;
//! - `collapse` folds each region's duplicate runs into their leaders, then
//!   stitches neighboring regions where a duplicate run straddles the
//!   boundary.
//!
//! The three `merge` variants consume several sorted streams at once through
//! bounded sub-buffers, folding equal-sequence records on the fly, so the
//! memory ceiling holds regardless of input size.

use std::cmp::Ordering;

use crate::details::DetailsRecord;
use crate::errors::{CollapseError, Result};
use crate::reader::{DetailsReader, SequenceReader};
use crate::record::SequenceRecord;
use crate::writer::{DetailsWriter, SequenceWriter};

/// Growth quota for unbounded loads.
const RESIZE_QUOTA: usize = 1 << 16;

/// Below this many records per worker the parallel paths fall back to a
/// single thread.
const MIN_RECORDS_PER_THREAD: usize = 1 << 10;

/// A record type a [`Buffer`] can batch, collapse, and account for.
pub trait Record: Default + Send {
    /// Merge `b` into `a`, clearing `b`.
    fn merge_pair(a: &mut Self, b: &mut Self) -> Result<()>;

    /// Fold a whole run into its first element, clearing the followers.
    fn merge_run(run: &mut [Self]) -> Result<()>;

    /// Heap plus inline byte cost, reflecting capacity.
    fn memory_bytes(&self) -> usize;
}

/// A stream records can be batch-read from.
pub trait RecordSource<R> {
    /// Fill as much of `out` as possible, returning the number of records
    /// actually read. May return less than `out.len()` only at end of
    /// stream.
    fn read_batch(&mut self, out: &mut [R]) -> Result<usize>;

    /// Whether the stream is exhausted.
    fn at_end(&self) -> bool;
}

/// A sink records can be batch-written to.
pub trait RecordSink<R> {
    /// Write the records for which `keep` holds, returning the number
    /// written.
    fn write_if<P: Fn(&R) -> bool>(&mut self, records: &[R], keep: P) -> Result<u64>;

    /// Write every record in the slice.
    fn write_slice(&mut self, records: &[R]) -> Result<u64> {
        self.write_if(records, |_| true)
    }
}

/// An owned, contiguous batch of records.
#[derive(Default)]
pub struct Buffer<R> {
    records: Vec<R>,
}

impl<R: Record> Buffer<R> {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Borrow the record at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> &R {
        &self.records[index]
    }

    /// Move the record at `index` out, leaving a default in its place.
    pub(crate) fn take(&mut self, index: usize) -> R {
        std::mem::take(&mut self.records[index])
    }

    /// Release the buffer's heap memory.
    pub fn reset(&mut self) {
        self.records.clear();
        self.records.shrink_to_fit();
    }

    /// Read until end of stream, growing the buffer in fixed quotas and
    /// shrinking to the exact record count at the end.
    pub fn load<S: RecordSource<R>>(&mut self, source: &mut S) -> Result<u64> {
        let mut read = 0;
        while !source.at_end() {
            let target = read + RESIZE_QUOTA;
            self.records.resize_with(target, R::default);
            read += source.read_batch(&mut self.records[read..target])?;
        }
        self.records.truncate(read);
        Ok(read as u64)
    }

    /// Read up to `cap` records, shrinking to the count actually read.
    pub fn load_at_most<S: RecordSource<R>>(&mut self, source: &mut S, cap: u64) -> Result<u64> {
        let cap = usize::try_from(cap).unwrap_or(usize::MAX);
        self.records.resize_with(cap, R::default);
        let read = source.read_batch(&mut self.records)?;
        self.records.truncate(read);
        Ok(read as u64)
    }

    /// Write every record to `writer`.
    pub fn store<W: RecordSink<R>>(&self, writer: &mut W) -> Result<u64> {
        writer.write_slice(&self.records)
    }

    /// Write the records for which `keep` holds; the usual predicate drops
    /// tombstones.
    pub fn store_if<W: RecordSink<R>, P: Fn(&R) -> bool>(
        &self,
        writer: &mut W,
        keep: P,
    ) -> Result<u64> {
        writer.write_if(&self.records, keep)
    }

    /// Apply `op` to every record in place.
    pub fn for_each_mut<F: FnMut(&mut R)>(&mut self, op: F) {
        self.records.iter_mut().for_each(op);
    }

    /// Total byte cost of the buffered records.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        let records: usize = self.records.iter().map(Record::memory_bytes).sum();
        records + std::mem::size_of::<Self>()
    }

    /// Sort the buffer with up to `n_threads` workers.
    ///
    /// Each worker sorts one contiguous region; pairwise merge rounds then
    /// combine the regions, doubling the merged span each round.
    pub fn sort<F>(&mut self, n_threads: usize, cmp: F)
    where
        F: Fn(&R, &R) -> Ordering + Sync,
    {
        let len = self.records.len();
        let threads = effective_threads(len, n_threads);
        if threads <= 1 {
            self.records.sort_unstable_by(|a, b| cmp(a, b));
            return;
        }

        let cmp = &cmp;
        let bounds = region_bounds(len, threads);
        let regions = split_regions(&mut self.records, &bounds);
        rayon::scope(|scope| {
            for region in regions {
                scope.spawn(move |_| region.sort_unstable_by(|a, b| cmp(a, b)));
            }
        });

        let mut span = 1;
        while span < threads {
            let mut tasks: Vec<(&mut [R], usize)> = Vec::new();
            let mut rest: &mut [R] = &mut self.records;
            let mut consumed = 0;
            let mut i = 0;
            while i + span < threads {
                let lo = bounds[i];
                let mid = bounds[i + span];
                let hi = bounds[(i + 2 * span).min(threads)];
                let (_, tail) = rest.split_at_mut(lo - consumed);
                let (chunk, tail) = tail.split_at_mut(hi - lo);
                tasks.push((chunk, mid - lo));
                rest = tail;
                consumed = hi;
                i += 2 * span;
            }
            rayon::scope(|scope| {
                for (chunk, mid) in tasks {
                    scope.spawn(move |_| merge_sorted_runs(chunk, mid, cmp));
                }
            });
            span *= 2;
        }
    }

    /// Collapse contiguous runs of `eq`-equal records into their leaders,
    /// tombstoning the followers. Returns the number of surviving records.
    ///
    /// The parallel variant collapses each region independently, then merges
    /// across region boundaries where a run straddles them. A region folded
    /// entirely into its first record keeps the previous region's leader
    /// current, so a run spanning three or more regions still ends up in a
    /// single survivor.
    pub fn collapse<E>(&mut self, n_threads: usize, eq: E) -> Result<u64>
    where
        E: Fn(&R, &R) -> bool + Sync,
    {
        let len = self.records.len();
        if len == 0 {
            return Ok(0);
        }
        let threads = effective_threads(len, n_threads);
        if threads <= 1 {
            let (_, alive) = collapse_range(&mut self.records, &eq)?;
            return Ok(alive);
        }

        let eq = &eq;
        let bounds = region_bounds(len, threads);
        let mut results: Vec<Result<(usize, u64)>> = Vec::with_capacity(threads);
        results.resize_with(threads, || Ok((0, 0)));
        {
            let regions = split_regions(&mut self.records, &bounds);
            rayon::scope(|scope| {
                for (region, slot) in regions.into_iter().zip(results.iter_mut()) {
                    scope.spawn(move |_| *slot = collapse_range(region, eq));
                }
            });
        }

        let mut leaders = Vec::with_capacity(threads);
        let mut alive = 0;
        for (i, result) in results.into_iter().enumerate() {
            let (leader_rel, region_alive) = result?;
            leaders.push(bounds[i] + leader_rel);
            alive += region_alive;
        }

        let mut prev_leader = leaders[0];
        for i in 1..threads {
            let first = bounds[i];
            if eq(&self.records[prev_leader], &self.records[first]) {
                let (head, tail) = self.records.split_at_mut(first);
                R::merge_pair(&mut head[prev_leader], &mut tail[0])?;
                alive -= 1;
                if leaders[i] != first {
                    prev_leader = leaders[i];
                }
            } else {
                prev_leader = leaders[i];
            }
        }
        Ok(alive)
    }
}

impl Buffer<SequenceRecord> {
    /// K-way merge of sorted sequence streams into one writer.
    ///
    /// Each stream gets a sub-buffer of up to `max_loadable` records,
    /// refilled as it drains. Equal-sequence records are folded on the fly,
    /// so the output holds every distinct sequence exactly once, in order.
    /// Returns the number of records written.
    pub fn merge(
        readers: &mut [SequenceReader],
        writer: &mut SequenceWriter,
        max_loadable: u64,
    ) -> Result<u64> {
        let cap = max_loadable.max(1);
        let mut cursor = MergeCursor::preload(readers, cap)?;
        if cursor.active == 0 {
            return Ok(0);
        }

        let cap_records = cap as usize;
        let mut out: Vec<SequenceRecord> = Vec::new();
        out.resize_with(cap_records, SequenceRecord::default);
        let mut out_index = 0;
        let mut written = 0;

        let j = cursor.find_min();
        out[0] = cursor.buffers[j].take(cursor.indexes[j]);
        cursor.advance(j, readers, cap)?;

        while cursor.active > 0 {
            let j = cursor.find_min();
            let mut candidate = cursor.buffers[j].take(cursor.indexes[j]);
            if out[out_index].sequence() == candidate.sequence() {
                SequenceRecord::merge(&mut out[out_index], &mut candidate)?;
            } else {
                out_index += 1;
                if out_index == cap_records {
                    writer.write_slice(&out)?;
                    written += out_index as u64;
                    out_index = 0;
                }
                out[out_index] = candidate;
            }
            cursor.advance(j, readers, cap)?;
        }

        out.truncate(out_index + 1);
        writer.write_slice(&out)?;
        Ok(written + out_index as u64 + 1)
    }

    /// K-way merge that seeds a per-sample details vector for every record.
    ///
    /// Used when the inputs are per-sample collapsed sequence files carrying
    /// only counts: each consumed record contributes its count to the column
    /// of the sample it came from (`sample_ids` maps reader index to global
    /// sample id), and details vectors are folded in lockstep with the
    /// sequence-level merge.
    pub fn merge_seed_details(
        readers: &mut [SequenceReader],
        out_writer: &mut SequenceWriter,
        details_writer: &mut DetailsWriter,
        sample_ids: &[usize],
        max_loadable: u64,
        n_samples: usize,
    ) -> Result<u64> {
        let cap = max_loadable.max(1);
        let mut cursor = MergeCursor::preload(readers, cap)?;
        if cursor.active == 0 {
            return Ok(0);
        }

        let cap_records = cap as usize;
        let mut out: Vec<SequenceRecord> = Vec::new();
        out.resize_with(cap_records, SequenceRecord::default);
        let mut details: Vec<DetailsRecord> = Vec::new();
        details.resize_with(cap_records, DetailsRecord::default);
        let mut out_index = 0;
        let mut written = 0;

        let j = cursor.find_min();
        out[0] = cursor.buffers[j].take(cursor.indexes[j]);
        details[0] = DetailsRecord::init(out[0].count(), sample_ids[j], n_samples);
        cursor.advance(j, readers, cap)?;

        while cursor.active > 0 {
            let j = cursor.find_min();
            let mut candidate = cursor.buffers[j].take(cursor.indexes[j]);
            let mut candidate_details =
                DetailsRecord::init(candidate.count(), sample_ids[j], n_samples);
            if out[out_index].sequence() == candidate.sequence() {
                SequenceRecord::merge(&mut out[out_index], &mut candidate)?;
                DetailsRecord::merge(&mut details[out_index], &mut candidate_details)?;
            } else {
                out_index += 1;
                if out_index == cap_records {
                    out_writer.write_slice(&out)?;
                    details_writer.write_slice(&details)?;
                    written += out_index as u64;
                    out_index = 0;
                }
                out[out_index] = candidate;
                details[out_index] = candidate_details;
            }
            cursor.advance(j, readers, cap)?;
        }

        out.truncate(out_index + 1);
        details.truncate(out_index + 1);
        out_writer.write_slice(&out)?;
        details_writer.write_slice(&details)?;
        Ok(written + out_index as u64 + 1)
    }

    /// K-way merge of streams that already carry details vectors.
    ///
    /// Used in the later tiers of a multi-sample merge: every sequence
    /// stream is paired with a details stream, and promotion and folding
    /// happen in lockstep on both.
    pub fn merge_join_details(
        seq_readers: &mut [SequenceReader],
        details_readers: &mut [DetailsReader],
        out_writer: &mut SequenceWriter,
        details_writer: &mut DetailsWriter,
        max_loadable: u64,
    ) -> Result<u64> {
        let cap = max_loadable.max(1);
        let k = seq_readers.len();
        if k != details_readers.len() {
            return Err(CollapseError::InvariantViolated {
                reason: format!(
                    "{k} sequence streams paired with {} details streams",
                    details_readers.len()
                ),
            });
        }

        let mut seq_buffers: Vec<Buffer<SequenceRecord>> = (0..k).map(|_| Buffer::new()).collect();
        let mut details_buffers: Vec<Buffer<DetailsRecord>> =
            (0..k).map(|_| Buffer::new()).collect();
        let mut indexes = vec![0usize; k];
        let mut limits = vec![0usize; k];
        for i in 0..k {
            limits[i] = load_joint(
                &mut seq_buffers[i],
                &mut details_buffers[i],
                &mut seq_readers[i],
                &mut details_readers[i],
                cap,
            )?;
        }
        let mut active = limits.iter().filter(|&&l| l > 0).count();
        if active == 0 {
            return Ok(0);
        }

        let cap_records = cap as usize;
        let mut out: Vec<SequenceRecord> = Vec::new();
        out.resize_with(cap_records, SequenceRecord::default);
        let mut details: Vec<DetailsRecord> = Vec::new();
        details.resize_with(cap_records, DetailsRecord::default);
        let mut out_index = 0;
        let mut written = 0;

        let find_min = |buffers: &[Buffer<SequenceRecord>], indexes: &[usize], limits: &[usize]| {
            let mut best: Option<usize> = None;
            for i in 0..buffers.len() {
                if limits[i] == 0 {
                    continue;
                }
                best = match best {
                    None => Some(i),
                    Some(b)
                        if buffers[i].get(indexes[i]).sequence()
                            < buffers[b].get(indexes[b]).sequence() =>
                    {
                        Some(i)
                    }
                    keep => keep,
                };
            }
            best.unwrap_or(0)
        };

        let j = find_min(&seq_buffers, &indexes, &limits);
        out[0] = seq_buffers[j].take(indexes[j]);
        details[0] = details_buffers[j].take(indexes[j]);
        advance_joint(
            j,
            seq_readers,
            details_readers,
            &mut seq_buffers,
            &mut details_buffers,
            &mut indexes,
            &mut limits,
            &mut active,
            cap,
        )?;

        while active > 0 {
            let j = find_min(&seq_buffers, &indexes, &limits);
            let mut candidate = seq_buffers[j].take(indexes[j]);
            let mut candidate_details = details_buffers[j].take(indexes[j]);
            if out[out_index].sequence() == candidate.sequence() {
                SequenceRecord::merge(&mut out[out_index], &mut candidate)?;
                DetailsRecord::merge(&mut details[out_index], &mut candidate_details)?;
            } else {
                out_index += 1;
                if out_index == cap_records {
                    out_writer.write_slice(&out)?;
                    details_writer.write_slice(&details)?;
                    written += out_index as u64;
                    out_index = 0;
                }
                out[out_index] = candidate;
                details[out_index] = candidate_details;
            }
            advance_joint(
                j,
                seq_readers,
                details_readers,
                &mut seq_buffers,
                &mut details_buffers,
                &mut indexes,
                &mut limits,
                &mut active,
                cap,
            )?;
        }

        out.truncate(out_index + 1);
        details.truncate(out_index + 1);
        out_writer.write_slice(&out)?;
        details_writer.write_slice(&details)?;
        Ok(written + out_index as u64 + 1)
    }
}

/// Sub-buffer bookkeeping shared by the sequence-stream merges.
struct MergeCursor {
    buffers: Vec<Buffer<SequenceRecord>>,
    indexes: Vec<usize>,
    limits: Vec<usize>,
    active: usize,
}

impl MergeCursor {
    fn preload(readers: &mut [SequenceReader], cap: u64) -> Result<Self> {
        let k = readers.len();
        let mut buffers: Vec<Buffer<SequenceRecord>> = (0..k).map(|_| Buffer::new()).collect();
        let mut limits = vec![0usize; k];
        for i in 0..k {
            limits[i] = buffers[i].load_at_most(&mut readers[i], cap)? as usize;
        }
        let active = limits.iter().filter(|&&l| l > 0).count();
        Ok(Self { buffers, indexes: vec![0; k], limits, active })
    }

    fn find_min(&self) -> usize {
        let mut best: Option<usize> = None;
        for i in 0..self.buffers.len() {
            if self.limits[i] == 0 {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(b)
                    if self.buffers[i].get(self.indexes[i]).sequence()
                        < self.buffers[b].get(self.indexes[b]).sequence() =>
                {
                    Some(i)
                }
                keep => keep,
            };
        }
        best.unwrap_or(0)
    }

    fn advance(&mut self, j: usize, readers: &mut [SequenceReader], cap: u64) -> Result<()> {
        self.indexes[j] += 1;
        if self.indexes[j] == self.limits[j] {
            self.indexes[j] = 0;
            self.limits[j] = if readers[j].at_end() {
                0
            } else {
                self.buffers[j].load_at_most(&mut readers[j], cap)? as usize
            };
            if self.limits[j] == 0 {
                self.active -= 1;
            }
        }
        Ok(())
    }
}

fn load_joint(
    seq_buffer: &mut Buffer<SequenceRecord>,
    details_buffer: &mut Buffer<DetailsRecord>,
    seq_reader: &mut SequenceReader,
    details_reader: &mut DetailsReader,
    cap: u64,
) -> Result<usize> {
    let n_seq = seq_buffer.load_at_most(seq_reader, cap)?;
    let n_details = details_buffer.load_at_most(details_reader, cap)?;
    if n_seq != n_details {
        return Err(CollapseError::InvariantViolated {
            reason: format!(
                "sequence and details streams diverge ({n_seq} vs {n_details} records)"
            ),
        });
    }
    Ok(n_seq as usize)
}

#[allow(clippy::too_many_arguments)]
fn advance_joint(
    j: usize,
    seq_readers: &mut [SequenceReader],
    details_readers: &mut [DetailsReader],
    seq_buffers: &mut [Buffer<SequenceRecord>],
    details_buffers: &mut [Buffer<DetailsRecord>],
    indexes: &mut [usize],
    limits: &mut [usize],
    active: &mut usize,
    cap: u64,
) -> Result<()> {
    indexes[j] += 1;
    if indexes[j] == limits[j] {
        indexes[j] = 0;
        limits[j] = if seq_readers[j].at_end() {
            0
        } else {
            load_joint(
                &mut seq_buffers[j],
                &mut details_buffers[j],
                &mut seq_readers[j],
                &mut details_readers[j],
                cap,
            )?
        };
        if limits[j] == 0 {
            *active -= 1;
        }
    }
    Ok(())
}

/// Workers actually worth spawning for a batch of `len` records.
fn effective_threads(len: usize, n_threads: usize) -> usize {
    n_threads.min((len / MIN_RECORDS_PER_THREAD).max(1))
}

/// Contiguous region boundaries for `threads` workers over `len` records.
fn region_bounds(len: usize, threads: usize) -> Vec<usize> {
    let per_region = len / threads;
    let mut bounds: Vec<usize> = (0..threads).map(|i| i * per_region).collect();
    bounds.push(len);
    bounds
}

/// Split a slice into the mutable regions described by `bounds`.
fn split_regions<'a, R>(mut slice: &'a mut [R], bounds: &[usize]) -> Vec<&'a mut [R]> {
    let mut regions = Vec::with_capacity(bounds.len() - 1);
    let mut consumed = 0;
    for window in bounds.windows(2) {
        let (region, rest) = slice.split_at_mut(window[1] - consumed);
        regions.push(region);
        slice = rest;
        consumed = window[1];
    }
    regions
}

/// Merge the two sorted runs `[0, mid)` and `[mid, len)` in place.
fn merge_sorted_runs<R, F>(slice: &mut [R], mid: usize, cmp: &F)
where
    R: Default,
    F: Fn(&R, &R) -> Ordering,
{
    if mid == 0 || mid == slice.len() {
        return;
    }
    if cmp(&slice[mid - 1], &slice[mid]) != Ordering::Greater {
        return;
    }

    let mut left: Vec<R> = slice[..mid].iter_mut().map(std::mem::take).collect();
    let mut li = 0;
    let mut ri = mid;
    let mut write = 0;
    while li < left.len() && ri < slice.len() {
        if cmp(&left[li], &slice[ri]) == Ordering::Greater {
            slice[write] = std::mem::take(&mut slice[ri]);
            ri += 1;
        } else {
            slice[write] = std::mem::take(&mut left[li]);
            li += 1;
        }
        write += 1;
    }
    while li < left.len() {
        slice[write] = std::mem::take(&mut left[li]);
        li += 1;
        write += 1;
    }
    // Any remainder of the right run is already in place.
}

/// Collapse one contiguous region, returning the index of its last leader
/// and the number of leaders.
fn collapse_range<R: Record, E: Fn(&R, &R) -> bool>(
    slice: &mut [R],
    eq: &E,
) -> Result<(usize, u64)> {
    let mut base = 0;
    let mut alive = 1;
    for i in 1..slice.len() {
        if !eq(&slice[base], &slice[i]) {
            if i - base > 1 {
                R::merge_run(&mut slice[base..i])?;
            }
            base = i;
            alive += 1;
        }
    }
    if slice.len() - base > 1 {
        R::merge_run(&mut slice[base..])?;
    }
    Ok((base, alive))
}
