//! Collapse outcome bookkeeping and CSV reporting.

use std::path::{Path, PathBuf};

use fgoxide::io::DelimFile;
use serde::Serialize;

use crate::errors::{CollapseError, Result};

/// Statistics for one collapse operation (one sample, or the aggregate row
/// of a multi-sample run).
#[derive(Debug, Clone, Default)]
pub struct CollapseStats {
    /// Identifier of the collapsed sample (the output basename).
    pub sample_id: String,
    /// Records read from the raw input.
    pub raw_sequences: u64,
    /// Bytes of raw input consumed.
    pub raw_space: u64,
    /// Distinct sequences written to the output.
    pub collapsed_sequences: u64,
    /// Bytes of collapsed output produced.
    pub collapsed_space: u64,
    /// Wall-clock runtime in milliseconds.
    pub runtime_ms: u64,
}

impl CollapseStats {
    /// Fraction of records removed by the collapse.
    #[must_use]
    pub fn sequences_gain(&self) -> f64 {
        if self.raw_sequences == 0 {
            0.0
        } else {
            1.0 - self.collapsed_sequences as f64 / self.raw_sequences as f64
        }
    }

    /// Fraction of bytes removed by the collapse.
    #[must_use]
    pub fn space_gain(&self) -> f64 {
        if self.raw_space == 0 {
            0.0
        } else {
            1.0 - self.collapsed_space as f64 / self.raw_space as f64
        }
    }

    fn report_row(&self) -> ReportRow {
        ReportRow {
            sample_id: self.sample_id.clone(),
            raw_sequences: self.raw_sequences,
            collapsed_sequences: self.collapsed_sequences,
            sequences_gain: self.sequences_gain(),
            raw_space: self.raw_space,
            collapsed_space: self.collapsed_space,
            space_gain: self.space_gain(),
            runtime: self.runtime_ms,
        }
    }
}

/// One row of the CSV report.
#[derive(Debug, Serialize)]
struct ReportRow {
    #[serde(rename = "SAMPLE ID")]
    sample_id: String,
    #[serde(rename = "RAW SEQUENCES")]
    raw_sequences: u64,
    #[serde(rename = "COLLAPSED SEQUENCES")]
    collapsed_sequences: u64,
    #[serde(rename = "SEQUENCES GAIN")]
    sequences_gain: f64,
    #[serde(rename = "RAW SPACE")]
    raw_space: u64,
    #[serde(rename = "COLLAPSED SPACE")]
    collapsed_space: u64,
    #[serde(rename = "SPACE GAIN")]
    space_gain: f64,
    #[serde(rename = "RUNTIME")]
    runtime: u64,
}

/// Write a CSV report with one row per statistics entry.
pub fn write_report(path: &Path, statistics: &[CollapseStats]) -> Result<()> {
    let rows: Vec<ReportRow> = statistics.iter().map(CollapseStats::report_row).collect();
    DelimFile::default()
        .write_csv(&path, rows)
        .map_err(|e| CollapseError::io(path, std::io::Error::other(e)))
}

/// Everything a collapse operation produced: shard paths, details paths, and
/// per-sample plus aggregate statistics.
#[derive(Debug, Default)]
pub struct CollapseResults {
    /// Final output shards; the second element is `None` for single-end
    /// layouts.
    pub collapsed_paths: Vec<(PathBuf, Option<PathBuf>)>,
    /// Details file shards (multi-sample runs only).
    pub details_paths: Vec<PathBuf>,
    /// Per-sample statistics; multi-sample runs append an aggregate row.
    pub statistics: Vec<CollapseStats>,
}
