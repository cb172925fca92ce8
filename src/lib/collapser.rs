//! External sort-merge-collapse pipelines.
//!
//! Implements memory-bounded exact collapsing of sequence datasets that may
//! be far larger than the configured RAM ceiling.
//!
//! # Algorithm (single sample)
//!
//! 1. **Sizing**: probe a small batch to estimate bytes per record and derive
//!    the largest loadable batch under the RAM ceiling
//! 2. **Runs**: repeatedly load a batch, trim, sort, and collapse it in
//!    memory, then spill it as one sorted tag-format run
//! 3. **Merge**: fold the runs through tiered k-way merges (fanout 16) into
//!    the final sharded output
//!
//! A single-batch input skips the run/merge phases entirely and is written
//! straight to the final output.
//!
//! # Multi-sample
//!
//! Each sample is first collapsed on its own into a tag temporary. The
//! per-sample results are then merged across samples (fanout 64), carrying a
//! per-sample occurrence vector that is seeded on the first tier and
//! propagated through any further tiers. The details column order always
//! follows the input sample order, whatever the tier structure.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{debug, info, warn};

use crate::buffer::Buffer;
use crate::details::DetailsRecord;
use crate::errors::{CollapseError, Result};
use crate::layout::{LibraryLayout, OutputFormat, SinkKind};
use crate::reader::{DetailsReader, SequenceReader};
use crate::record::SequenceRecord;
use crate::stats::{CollapseResults, CollapseStats};
use crate::writer::{DetailsWriter, SequenceWriter};

/// Number of records pre-read to estimate bytes per record.
const PROBE_RECORDS: u64 = 100;

/// Safety factor over the estimated bytes per record for single-sample runs.
/// Empirical: the probe underestimates on inputs with uneven read lengths.
const RUN_SAFETY_FACTOR: f64 = 1.65;

/// Safety factor on the sequence-record cost during cross-sample merges.
const SAMPLE_SEQ_SAFETY_FACTOR: u64 = 2;

/// Safety factor on the details-record cost during cross-sample merges.
const SAMPLE_DETAILS_SAFETY_FACTOR: u64 = 3;

/// Fanout of the tiered run merge within one sample.
const RUN_MERGE_FANOUT: usize = 16;

/// Fanout of the cross-sample merge.
const SAMPLE_MERGE_FANOUT: usize = 64;

/// Memory-bounded collapser for single samples and sample collections.
pub struct Collapser {
    output_dir: PathBuf,
    tmp_dir: PathBuf,
    max_output_records: u64,
    max_ram: u64,
    trim_left: usize,
    trim_right: usize,
    n_threads: usize,
    output_format: OutputFormat,
}

impl Collapser {
    /// Create a collapser writing final shards to `output_dir` and
    /// intermediate runs to `tmp_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            tmp_dir: tmp_dir.into(),
            max_output_records: u64::MAX,
            max_ram: 1024 * 1024 * 1024,
            trim_left: 0,
            trim_right: 0,
            n_threads: 1,
            output_format: OutputFormat::Tag,
        }
    }

    /// Set the shard rollover threshold for final output files.
    #[must_use]
    pub fn max_output_records(mut self, records: u64) -> Self {
        self.max_output_records = records;
        self
    }

    /// Set the RAM ceiling in bytes used to size in-memory batches.
    #[must_use]
    pub fn max_ram(mut self, bytes: u64) -> Self {
        self.max_ram = bytes;
        self
    }

    /// Set symmetric trims applied to every record at ingest.
    #[must_use]
    pub fn trim(mut self, left: usize, right: usize) -> Self {
        self.trim_left = left;
        self.trim_right = right;
        self
    }

    /// Set the worker count for in-memory sort and collapse phases.
    #[must_use]
    pub fn threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads.max(1);
        self
    }

    /// Set the output format, which also decides quality retention.
    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Collapse one single-end sample.
    pub fn single_end(&self, sample: &Path, basename: &str) -> Result<CollapseResults> {
        let keep = self.output_format.keeps_qualities();
        self.collapse_sample(LibraryLayout::SingleEnd, &[sample.to_path_buf()], basename, || {
            SequenceReader::single_end(sample, keep)
        })
    }

    /// Collapse one paired-end sample given its two mate files.
    pub fn paired_end(&self, mate1: &Path, mate2: &Path, basename: &str) -> Result<CollapseResults> {
        let keep = self.output_format.keeps_qualities();
        self.collapse_sample(
            LibraryLayout::PairedEnd,
            &[mate1.to_path_buf(), mate2.to_path_buf()],
            basename,
            || SequenceReader::paired_end(mate1, mate2, keep),
        )
    }

    /// Collapse one interleaved paired-end sample.
    pub fn interleaved(&self, sample: &Path, basename: &str) -> Result<CollapseResults> {
        let keep = self.output_format.keeps_qualities();
        self.collapse_sample(LibraryLayout::Interleaved, &[sample.to_path_buf()], basename, || {
            SequenceReader::interleaved(sample, keep)
        })
    }

    /// Collapse one sample of concatenated mates with a fixed breakpoint.
    pub fn breakpoint(
        &self,
        sample: &Path,
        bp_offset: u16,
        basename: &str,
    ) -> Result<CollapseResults> {
        let keep = self.output_format.keeps_qualities();
        self.collapse_sample(LibraryLayout::Breakpoint, &[sample.to_path_buf()], basename, || {
            SequenceReader::breakpoint(sample, bp_offset, keep)
        })
    }

    /// Collapse a collection of single-end samples into one dataset with a
    /// per-sample details file.
    pub fn multi_single_end(&self, samples: &[PathBuf], basename: &str) -> Result<CollapseResults> {
        self.collapse_multi(samples, None, basename)
    }

    /// Collapse a collection of paired-end samples into one dataset with a
    /// per-sample details file.
    pub fn multi_paired_end(
        &self,
        samples: &[PathBuf],
        paired: &[PathBuf],
        basename: &str,
    ) -> Result<CollapseResults> {
        if samples.len() != paired.len() {
            return Err(CollapseError::ConfigInvalid {
                reason: format!(
                    "{} mate-1 samples paired with {} mate-2 samples",
                    samples.len(),
                    paired.len()
                ),
            });
        }
        self.collapse_multi(samples, Some(paired), basename)
    }

    /// Shared single-sample pipeline; `open` builds a fresh reader over the
    /// sample (called once for the sizing probe and once for the real pass).
    fn collapse_sample<F>(
        &self,
        layout: LibraryLayout,
        input_paths: &[PathBuf],
        basename: &str,
        open: F,
    ) -> Result<CollapseResults>
    where
        F: Fn() -> Result<SequenceReader>,
    {
        let started = Instant::now();
        info!("Collapsing sample '{basename}'");

        let bytes_per_record = probe_bytes_per_record(open()?)?;
        let max_loadable = match bytes_per_record {
            Some(bytes) => {
                ((self.max_ram as f64 / (RUN_SAFETY_FACTOR * bytes as f64)) as u64).max(1)
            }
            None => 1,
        };
        debug!("Batch limit for '{basename}': {max_loadable} records");

        let mut reader = open()?;
        let mut tmp_writer = SequenceWriter::temporary(layout, SinkKind::Tag, &self.tmp_dir);
        let mut out_writer = SequenceWriter::new(
            layout,
            self.output_format.sink_kind(),
            &self.output_dir,
            basename,
            self.max_output_records,
        );
        let mut stats = CollapseStats { sample_id: basename.to_string(), ..Default::default() };

        self.run_pipeline(&mut reader, &mut tmp_writer, &mut out_writer, max_loadable, &mut stats)?;

        for path in input_paths {
            stats.raw_space += file_size(path)?;
        }
        for (mate1, mate2) in out_writer.output_paths() {
            stats.collapsed_space += file_size(mate1)?;
            if let Some(mate2) = mate2 {
                stats.collapsed_space += file_size(mate2)?;
            }
        }
        stats.runtime_ms = started.elapsed().as_millis() as u64;
        info!(
            "Collapsed '{basename}': {} raw records into {} distinct sequences",
            stats.raw_sequences, stats.collapsed_sequences
        );

        Ok(CollapseResults {
            collapsed_paths: out_writer.output_paths().to_vec(),
            details_paths: Vec::new(),
            statistics: vec![stats],
        })
    }

    fn run_pipeline(
        &self,
        reader: &mut SequenceReader,
        tmp_writer: &mut SequenceWriter,
        out_writer: &mut SequenceWriter,
        max_loadable: u64,
        stats: &mut CollapseStats,
    ) -> Result<()> {
        let alive = |record: &SequenceRecord| record.count() > 0;
        let mut buffer = Buffer::new();

        let collapsed = self.load_and_collapse(&mut buffer, reader, max_loadable, stats)?;
        if reader.at_end() {
            // Single-batch input: skip the run and merge phases entirely.
            buffer.store_if(out_writer, alive)?;
            out_writer.flush()?;
            buffer.reset();
            stats.collapsed_sequences = collapsed;
            return Ok(());
        }

        buffer.store_if(tmp_writer, alive)?;
        while !reader.at_end() {
            self.load_and_collapse(&mut buffer, reader, max_loadable, stats)?;
            tmp_writer.switch_sink()?;
            buffer.store_if(tmp_writer, alive)?;
        }
        tmp_writer.flush()?;
        buffer.reset();

        debug!(
            "Merging {} sorted runs with fanout {RUN_MERGE_FANOUT}",
            tmp_writer.output_paths().len()
        );
        stats.collapsed_sequences = self.merge_runs(tmp_writer, out_writer, max_loadable)?;

        for (mate1, mate2) in tmp_writer.output_paths() {
            remove_quietly(mate1);
            if let Some(mate2) = mate2 {
                remove_quietly(mate2);
            }
        }
        Ok(())
    }

    fn load_and_collapse(
        &self,
        buffer: &mut Buffer<SequenceRecord>,
        reader: &mut SequenceReader,
        max_loadable: u64,
        stats: &mut CollapseStats,
    ) -> Result<u64> {
        let loaded = buffer.load_at_most(reader, max_loadable)?;
        stats.raw_sequences += loaded;
        if self.trim_left > 0 || self.trim_right > 0 {
            let (left, right) = (self.trim_left, self.trim_right);
            buffer.for_each_mut(|record| record.trim(left, right));
        }
        buffer.sort(self.n_threads, |a, b| a.sequence().cmp(b.sequence()));
        buffer.collapse(self.n_threads, |a, b| a.sequence() == b.sequence())
    }

    /// Tiered k-way merge of the sorted runs into the final writer.
    ///
    /// The tier loop is bounded by the run count captured before it starts:
    /// merging appends its own output to `tmp_writer`, and a live re-read of
    /// the pool length would keep tiering past the point where at most
    /// `RUN_MERGE_FANOUT` original runs remain. The final merge starts at
    /// the cursor and so picks up both the leftover runs and the tier
    /// outputs appended behind them.
    fn merge_runs(
        &self,
        tmp_writer: &mut SequenceWriter,
        out_writer: &mut SequenceWriter,
        max_loadable: u64,
    ) -> Result<u64> {
        let keep = self.output_format.keeps_qualities();
        let total_runs = tmp_writer.output_paths().len();

        let mut cursor = 0;
        while cursor + RUN_MERGE_FANOUT < total_runs {
            let group = tmp_writer.output_paths()[cursor..cursor + RUN_MERGE_FANOUT].to_vec();
            let mut readers = open_tag_readers(&group, keep)?;
            tmp_writer.switch_sink()?;
            Buffer::merge(&mut readers, tmp_writer, max_loadable / RUN_MERGE_FANOUT as u64)?;
            cursor += RUN_MERGE_FANOUT;
        }

        tmp_writer.flush()?;
        let group = tmp_writer.output_paths()[cursor..].to_vec();
        let mut readers = open_tag_readers(&group, keep)?;
        let written = Buffer::merge(&mut readers, out_writer, max_loadable / group.len() as u64)?;
        out_writer.flush()?;
        Ok(written)
    }

    fn collapse_multi(
        &self,
        samples: &[PathBuf],
        paired: Option<&[PathBuf]>,
        basename: &str,
    ) -> Result<CollapseResults> {
        if samples.is_empty() {
            return Err(CollapseError::ConfigInvalid {
                reason: "no samples to collapse".to_string(),
            });
        }
        let started = Instant::now();
        let keep = self.output_format.keeps_qualities();
        let layout =
            if paired.is_some() { LibraryLayout::PairedEnd } else { LibraryLayout::SingleEnd };
        let tags: Vec<String> = samples.iter().map(|path| sample_tag(path)).collect();
        let n_samples = samples.len();
        info!("Collapsing {n_samples} samples into '{basename}'");

        // Phase A: collapse every sample on its own into a tag temporary.
        let per_sample_format = if keep { OutputFormat::Tagq } else { OutputFormat::Tag };
        let per_sample = Collapser::new(&self.tmp_dir, &self.tmp_dir)
            .max_ram(self.max_ram)
            .trim(self.trim_left, self.trim_right)
            .threads(self.n_threads)
            .output_format(per_sample_format);
        let mut statistics = Vec::with_capacity(n_samples + 1);
        let mut merge_inputs: Vec<(usize, (PathBuf, Option<PathBuf>))> = Vec::new();
        for (i, sample) in samples.iter().enumerate() {
            let result = match paired {
                Some(paired) => per_sample.paired_end(sample, &paired[i], &tags[i])?,
                None => per_sample.single_end(sample, &tags[i])?,
            };
            if let Some(first) = result.collapsed_paths.first() {
                merge_inputs.push((i, first.clone()));
            }
            statistics.extend(result.statistics);
        }

        // Phase B: cross-sample merge carrying the details vector.
        let mut seq_ratio = 0;
        for (_, (mate1, mate2)) in &merge_inputs {
            let reader = match mate2 {
                Some(mate2) => SequenceReader::paired_end(mate1, mate2, keep)?,
                None => SequenceReader::single_end(mate1, keep)?,
            };
            if let Some(ratio) = probe_bytes_per_record(reader)? {
                seq_ratio = seq_ratio.max(ratio);
            }
        }
        let seq_ratio = seq_ratio.max(1) * SAMPLE_SEQ_SAFETY_FACTOR;
        let details_ratio =
            DetailsRecord::init(0, 0, n_samples).memory_bytes() as u64 * SAMPLE_DETAILS_SAFETY_FACTOR;

        let mut out_writer = SequenceWriter::new(
            layout,
            self.output_format.sink_kind(),
            &self.output_dir,
            basename,
            self.max_output_records,
        );
        let mut details_writer =
            DetailsWriter::new(&self.output_dir, basename, tags.clone(), self.max_output_records);

        let written = if merge_inputs.len() <= SAMPLE_MERGE_FANOUT {
            let ids: Vec<usize> = merge_inputs.iter().map(|(id, _)| *id).collect();
            let paths: Vec<_> = merge_inputs.iter().map(|(_, pair)| pair.clone()).collect();
            let mut readers = open_tag_readers(&paths, keep)?;
            let loadable =
                (self.max_ram / (seq_ratio * merge_inputs.len().max(1) as u64 + details_ratio)).max(1);
            Buffer::merge_seed_details(
                &mut readers,
                &mut out_writer,
                &mut details_writer,
                &ids,
                loadable,
                n_samples,
            )?
        } else {
            self.merge_samples_tiered(
                &merge_inputs,
                layout,
                &tags,
                keep,
                seq_ratio,
                details_ratio,
                &mut out_writer,
                &mut details_writer,
            )?
        };
        out_writer.flush()?;
        details_writer.flush()?;

        // Phase C: cleanup and aggregate statistics.
        for (_, (mate1, mate2)) in &merge_inputs {
            remove_quietly(mate1);
            if let Some(mate2) = mate2 {
                remove_quietly(mate2);
            }
        }

        let mut aggregate =
            CollapseStats { sample_id: basename.to_string(), ..Default::default() };
        for (i, sample) in samples.iter().enumerate() {
            aggregate.raw_space += file_size(sample)?;
            if let Some(paired) = paired {
                aggregate.raw_space += file_size(&paired[i])?;
            }
        }
        aggregate.raw_sequences = statistics.iter().map(|s| s.raw_sequences).sum();
        aggregate.collapsed_sequences = written;
        for (mate1, mate2) in out_writer.output_paths() {
            aggregate.collapsed_space += file_size(mate1)?;
            if let Some(mate2) = mate2 {
                aggregate.collapsed_space += file_size(mate2)?;
            }
        }
        aggregate.runtime_ms = started.elapsed().as_millis() as u64;
        info!(
            "Collapsed {n_samples} samples: {} raw records into {} distinct sequences",
            aggregate.raw_sequences, aggregate.collapsed_sequences
        );
        statistics.push(aggregate);

        Ok(CollapseResults {
            collapsed_paths: out_writer.output_paths().to_vec(),
            details_paths: details_writer.output_paths().to_vec(),
            statistics,
        })
    }

    /// Cross-sample merge for sample counts above the fanout: seed details
    /// in groups, then fold the group temporaries tier by tier.
    #[allow(clippy::too_many_arguments)]
    fn merge_samples_tiered(
        &self,
        merge_inputs: &[(usize, (PathBuf, Option<PathBuf>))],
        layout: LibraryLayout,
        tags: &[String],
        keep_qualities: bool,
        seq_ratio: u64,
        details_ratio: u64,
        out_writer: &mut SequenceWriter,
        details_writer: &mut DetailsWriter,
    ) -> Result<u64> {
        let fanout = SAMPLE_MERGE_FANOUT as u64;
        let n_samples = tags.len();
        let mut tmp_out = SequenceWriter::temporary(layout, SinkKind::Tag, &self.tmp_dir);
        let mut tmp_details = DetailsWriter::temporary(&self.tmp_dir, tags.to_vec());

        for group in merge_inputs.chunks(SAMPLE_MERGE_FANOUT) {
            let ids: Vec<usize> = group.iter().map(|(id, _)| *id).collect();
            let paths: Vec<_> = group.iter().map(|(_, pair)| pair.clone()).collect();
            let mut readers = open_tag_readers(&paths, keep_qualities)?;
            let loadable = (self.max_ram / (seq_ratio * fanout + details_ratio)).max(1);
            Buffer::merge_seed_details(
                &mut readers,
                &mut tmp_out,
                &mut tmp_details,
                &ids,
                loadable,
                n_samples,
            )?;
            tmp_out.switch_sink()?;
            tmp_details.switch_sink()?;
        }

        // As in `merge_runs`, the tier loop is bounded by the group count
        // captured before it starts, not by the pool the loop itself grows.
        let total_groups = tmp_out.output_paths().len();
        let mut cursor = 0;
        while total_groups - cursor > SAMPLE_MERGE_FANOUT {
            let next = cursor + SAMPLE_MERGE_FANOUT;
            let seq_group = tmp_out.output_paths()[cursor..next].to_vec();
            let details_group = tmp_details.output_paths()[cursor..next].to_vec();
            debug!(
                "Cross-sample merge tier: {} temporaries remaining",
                total_groups - cursor
            );
            let mut seq_readers = open_tag_readers(&seq_group, keep_qualities)?;
            let mut details_readers = open_details_readers(&details_group)?;
            let loadable = (self.max_ram / ((seq_ratio + details_ratio) * fanout)).max(1);
            Buffer::merge_join_details(
                &mut seq_readers,
                &mut details_readers,
                &mut tmp_out,
                &mut tmp_details,
                loadable,
            )?;
            tmp_out.switch_sink()?;
            tmp_details.switch_sink()?;
            cursor = next;
        }

        let seq_group = tmp_out.output_paths()[cursor..].to_vec();
        let details_group = tmp_details.output_paths()[cursor..].to_vec();
        debug!("Cross-sample merge: final tier over {} temporaries", seq_group.len());
        let mut seq_readers = open_tag_readers(&seq_group, keep_qualities)?;
        let mut details_readers = open_details_readers(&details_group)?;
        let loadable =
            (self.max_ram / ((seq_ratio + details_ratio) * seq_group.len().max(1) as u64)).max(1);
        let written = Buffer::merge_join_details(
            &mut seq_readers,
            &mut details_readers,
            out_writer,
            details_writer,
            loadable,
        )?;

        for (mate1, mate2) in tmp_out.output_paths() {
            remove_quietly(mate1);
            if let Some(mate2) = mate2 {
                remove_quietly(mate2);
            }
        }
        for path in tmp_details.output_paths() {
            remove_quietly(path);
        }
        Ok(written)
    }
}

/// Estimate bytes per record by loading a probe batch; `None` when the
/// stream holds no records at all.
fn probe_bytes_per_record(mut reader: SequenceReader) -> Result<Option<u64>> {
    let mut buffer = Buffer::new();
    let loaded = buffer.load_at_most(&mut reader, PROBE_RECORDS)?;
    if loaded == 0 {
        return Ok(None);
    }
    Ok(Some(buffer.memory_bytes() as u64 / loaded))
}

/// Open tag-format readers over run or per-sample shard path pairs.
fn open_tag_readers(
    paths: &[(PathBuf, Option<PathBuf>)],
    keep_qualities: bool,
) -> Result<Vec<SequenceReader>> {
    paths
        .iter()
        .map(|(mate1, mate2)| match mate2 {
            Some(mate2) => SequenceReader::paired_end(mate1, mate2, keep_qualities),
            None => SequenceReader::single_end(mate1, keep_qualities),
        })
        .collect()
}

fn open_details_readers(paths: &[PathBuf]) -> Result<Vec<DetailsReader>> {
    paths.iter().map(|path| DetailsReader::open(path)).collect()
}

fn file_size(path: &Path) -> Result<u64> {
    fs::metadata(path).map(|meta| meta.len()).map_err(|e| CollapseError::io(path, e))
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("Leaving temporary file '{}' behind: {e}", path.display());
    }
}

/// Tag identifying a sample in details headers: the input file stem.
fn sample_tag(path: &Path) -> String {
    path.file_stem().map_or_else(|| "sample".to_string(), |stem| stem.to_string_lossy().into_owned())
}
