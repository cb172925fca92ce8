//! Collapse duplicate sequences across one or more samples.
//!
//! Dispatches to the single-sample or multi-sample pipeline depending on how
//! the input was given (file, directory, or manifest) and which layout
//! modifiers are set.

use std::path::PathBuf;

use anyhow::Result;
use bioseqzip_lib::errors::CollapseError;
use bioseqzip_lib::logging::OperationTimer;
use bioseqzip_lib::stats::write_report;
use bioseqzip_lib::tracker;
use bioseqzip_lib::{Collapser, OutputFormat};
use clap::{Parser, ValueEnum};
use log::info;

use crate::commands::command::Command;
use crate::commands::common::parse_ram;

/// Output format for collapsed records.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormatArg {
    /// Header + sequence, qualities dropped.
    Fasta,
    /// Header + sequence + quality.
    Fastq,
    /// `sequence<TAB>count` lines, qualities dropped.
    Tag,
    /// `sequence<TAB>quality<TAB>count` lines.
    Tagq,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Fasta => OutputFormat::Fasta,
            OutputFormatArg::Fastq => OutputFormat::Fastq,
            OutputFormatArg::Tag => OutputFormat::Tag,
            OutputFormatArg::Tagq => OutputFormat::Tagq,
        }
    }
}

/// Collapse duplicate sequences.
///
/// Produces a dataset in which every distinct sequence appears exactly once
/// with its occurrence count, within a configurable RAM ceiling.
#[derive(Debug, Parser)]
#[command(
    name = "collapse",
    about = "\x1b[36mCollapse duplicate sequences under a configurable RAM ceiling\x1b[0m",
    long_about = r"
Collapse one or more sequencing samples so that every distinct sequence
appears exactly once, annotated with its occurrence count.

Duplicate qualities are folded into an occurrence-weighted average. Inputs
larger than the RAM ceiling are processed through disk-backed sorted runs
that are k-way merged into the final output.

INPUT SELECTION (exactly one):

  -i/--input FILE       one sample
  -I/--input-dir DIR    every sample in a directory (multi-sample mode)
  --match-file CSV      mate-1,mate-2 pairs listed in a manifest

LAYOUT MODIFIERS (at most one):

  -p/--paired FILE      mate-2 file for a paired-end sample
  -P/--paired-dir DIR   mate-2 directory matched by file name
  --interleaved         mates alternate within one stream
  --breakpoint N        concatenated mates with a fixed mate-1 length

Multi-sample runs additionally produce a details file: one row per distinct
sequence with its per-sample occurrence counts.

EXAMPLES:

  # Collapse one fastq sample into tagq format
  bioseqzip collapse -i reads.fastq -o out -f tagq

  # Collapse a paired-end sample under 4 GiB of RAM with 8 threads
  bioseqzip collapse -i r1.fastq -p r2.fastq -m 4G -@ 8 -o out -f fastq

  # Collapse a directory of samples and write a CSV report
  bioseqzip collapse -I samples/ -o out -f tag --csv-report report.csv
"
)]
pub struct Collapse {
    /// Input sample file (single-sample mode).
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Mate-2 file for a paired-end sample.
    #[arg(short = 'p', long = "paired")]
    pub paired: Option<PathBuf>,

    /// Treat the input as interleaved paired-end data.
    #[arg(long = "interleaved")]
    pub interleaved: bool,

    /// Fixed mate-1 length for breakpoint paired-end data.
    #[arg(long = "breakpoint")]
    pub breakpoint: Option<u16>,

    /// Directory of input samples (multi-sample mode).
    #[arg(short = 'I', long = "input-dir")]
    pub input_dir: Option<PathBuf>,

    /// Directory of mate-2 samples, matched to --input-dir by file name.
    #[arg(short = 'P', long = "paired-dir")]
    pub paired_dir: Option<PathBuf>,

    /// CSV manifest of mate-1,mate-2 sample pairs.
    #[arg(long = "match-file")]
    pub match_file: Option<PathBuf>,

    /// Output directory for the collapsed shards.
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    pub output_dir: PathBuf,

    /// Basename of the output shards.
    #[arg(short = 'b', long = "output-basename", default_value = "collapsed")]
    pub output_basename: String,

    /// Temporary directory for intermediate runs.
    ///
    /// Defaults to the output directory. For best performance, use a fast
    /// SSD.
    #[arg(short = 'T', long = "tmp-dir")]
    pub tmp_dir: Option<PathBuf>,

    /// Maximum records per output shard.
    ///
    /// When reached, the writer rolls over to the next shard. Unbounded by
    /// default.
    #[arg(long = "max-output-records")]
    pub max_output_records: Option<u64>,

    /// RAM ceiling for in-memory batches.
    ///
    /// Accepts values like "512M", "4G", or plain bytes. Inputs that do not
    /// fit are processed through disk-backed sorted runs.
    #[arg(short = 'm', long = "max-ram", default_value = "1G", value_parser = parse_ram)]
    pub max_ram: u64,

    /// Bases trimmed from the start of every record at ingest.
    #[arg(long = "trim-left", default_value = "0")]
    pub trim_left: usize,

    /// Bases trimmed from the end of every record at ingest.
    #[arg(long = "trim-right", default_value = "0")]
    pub trim_right: usize,

    /// Worker threads for the in-memory sort and collapse phases.
    #[arg(short = '@', short_alias = 't', long = "threads", default_value = "1")]
    pub threads: usize,

    /// Output format; fasta and tag drop quality scores.
    #[arg(short = 'f', long = "format", value_enum, default_value = "tag")]
    pub format: OutputFormatArg,

    /// Write a CSV statistics report to this path.
    #[arg(long = "csv-report")]
    pub csv_report: Option<PathBuf>,
}

/// Resolved input selection and layout.
enum RunPlan {
    SingleEnd(PathBuf),
    PairedEnd(PathBuf, PathBuf),
    Interleaved(PathBuf),
    Breakpoint(PathBuf, u16),
    MultiSingleEnd(PathBuf),
    MultiPairedEnd(PathBuf, PathBuf),
    Manifest(PathBuf),
}

impl Collapse {
    fn resolve_plan(&self) -> std::result::Result<RunPlan, CollapseError> {
        let config = |reason: &str| CollapseError::ConfigInvalid { reason: reason.to_string() };

        let modifiers = usize::from(self.paired.is_some())
            + usize::from(self.paired_dir.is_some())
            + usize::from(self.interleaved)
            + usize::from(self.breakpoint.is_some());
        if modifiers > 1 {
            return Err(config(
                "--paired, --paired-dir, --interleaved, and --breakpoint are mutually exclusive",
            ));
        }

        match (&self.input, &self.input_dir, &self.match_file) {
            (Some(input), None, None) => {
                if self.paired_dir.is_some() {
                    return Err(config("--paired-dir requires --input-dir"));
                }
                if let Some(paired) = &self.paired {
                    Ok(RunPlan::PairedEnd(input.clone(), paired.clone()))
                } else if self.interleaved {
                    Ok(RunPlan::Interleaved(input.clone()))
                } else if let Some(offset) = self.breakpoint {
                    Ok(RunPlan::Breakpoint(input.clone(), offset))
                } else {
                    Ok(RunPlan::SingleEnd(input.clone()))
                }
            }
            (None, Some(input_dir), None) => {
                if self.paired.is_some() {
                    return Err(config("--paired requires --input"));
                }
                if self.interleaved || self.breakpoint.is_some() {
                    return Err(config(
                        "interleaved and breakpoint layouts are not supported in multi-sample mode",
                    ));
                }
                match &self.paired_dir {
                    Some(paired_dir) => {
                        Ok(RunPlan::MultiPairedEnd(input_dir.clone(), paired_dir.clone()))
                    }
                    None => Ok(RunPlan::MultiSingleEnd(input_dir.clone())),
                }
            }
            (None, None, Some(manifest)) => {
                if modifiers > 0 {
                    return Err(config("--match-file cannot be combined with layout modifiers"));
                }
                Ok(RunPlan::Manifest(manifest.clone()))
            }
            _ => Err(config("exactly one of --input, --input-dir, or --match-file must be given")),
        }
    }
}

/// Valid sample extensions for directory scans, chosen so quality-bearing
/// outputs only consume quality-bearing inputs.
fn valid_extensions(format: OutputFormat) -> &'static [&'static str] {
    if format.keeps_qualities() { &["fq", "fastq"] } else { &["fa", "fasta"] }
}

impl Command for Collapse {
    fn execute(&self, _command_line: &str) -> Result<()> {
        let plan = self.resolve_plan()?;

        std::fs::create_dir_all(&self.output_dir)?;
        let tmp_dir = self.tmp_dir.clone().unwrap_or_else(|| self.output_dir.clone());
        std::fs::create_dir_all(&tmp_dir)?;

        let format = OutputFormat::from(self.format);
        let collapser = Collapser::new(&self.output_dir, &tmp_dir)
            .max_output_records(self.max_output_records.unwrap_or(u64::MAX))
            .max_ram(self.max_ram)
            .trim(self.trim_left, self.trim_right)
            .threads(self.threads)
            .output_format(format);

        info!("Output directory: {}", self.output_dir.display());
        info!("Temporary directory: {}", tmp_dir.display());
        info!("Max RAM: {} MB", self.max_ram / (1024 * 1024));
        info!("Threads: {}", self.threads);
        info!("Output format: {:?}", self.format);
        if self.trim_left > 0 || self.trim_right > 0 {
            info!("Trim: {} left, {} right", self.trim_left, self.trim_right);
        }

        let timer = OperationTimer::new("Collapsing");

        let results = match plan {
            RunPlan::SingleEnd(path) => collapser.single_end(&path, &self.output_basename)?,
            RunPlan::PairedEnd(mate1, mate2) => {
                collapser.paired_end(&mate1, &mate2, &self.output_basename)?
            }
            RunPlan::Interleaved(path) => collapser.interleaved(&path, &self.output_basename)?,
            RunPlan::Breakpoint(path, offset) => {
                collapser.breakpoint(&path, offset, &self.output_basename)?
            }
            RunPlan::MultiSingleEnd(dir) => {
                let samples = tracker::track_single_samples(&dir, valid_extensions(format))?;
                info!("Tracked {} samples in {}", samples.len(), dir.display());
                collapser.multi_single_end(&samples, &self.output_basename)?
            }
            RunPlan::MultiPairedEnd(dir, paired_dir) => {
                let (samples, paired) =
                    tracker::track_paired_samples(&dir, &paired_dir, valid_extensions(format))?;
                info!("Tracked {} paired samples in {}", samples.len(), dir.display());
                collapser.multi_paired_end(&samples, &paired, &self.output_basename)?
            }
            RunPlan::Manifest(manifest) => {
                let (samples, paired) = tracker::track_manifest(&manifest)?;
                info!("Tracked {} paired samples from {}", samples.len(), manifest.display());
                collapser.multi_paired_end(&samples, &paired, &self.output_basename)?
            }
        };

        if let Some(report) = &self.csv_report {
            write_report(report, &results.statistics)?;
            info!("Wrote statistics report: {}", report.display());
        }

        info!("Produced {} collapsed shards", results.collapsed_paths.len());
        for (mate1, mate2) in &results.collapsed_paths {
            info!("  {}", mate1.display());
            if let Some(mate2) = mate2 {
                info!("  {}", mate2.display());
            }
        }
        for path in &results.details_paths {
            info!("  {}", path.display());
        }

        let raw_records = results.statistics.last().map_or(0, |s| s.raw_sequences);
        timer.log_completion(raw_records);
        Ok(())
    }
}
