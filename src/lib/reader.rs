//! Layout-aware record readers.
//!
//! A [`SequenceReader`] binds one or two byte streams according to the
//! sample's [`LibraryLayout`] and yields [`SequenceRecord`]s: paired mates
//! are concatenated with the breakpoint offset preserved, interleaved
//! streams are consumed two records at a time, and tag/tagq inputs carry
//! their occurrence counts through. A [`DetailsReader`] streams per-sample
//! occurrence vectors back from details files.
//!
//! Readers keep a one-record lookahead so that `at_end` reports stream
//! exhaustion exactly: the collapser relies on this to route small inputs
//! straight to the final output.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::buffer::RecordSource;
use crate::details::DetailsRecord;
use crate::errors::{CollapseError, Result};
use crate::fastx::FastxReader;
use crate::layout::LibraryLayout;
use crate::record::SequenceRecord;

/// One raw record pulled from a single stream, before layout assembly.
struct RawSeq {
    seq: Vec<u8>,
    qual: Vec<u8>,
    count: u32,
}

/// A single underlying stream: fasta/fastq or tag/tagq, picked by extension.
enum SeqSource {
    Fastx(FastxReader),
    Tag(TagFileReader),
}

impl SeqSource {
    fn open(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext.eq_ignore_ascii_case("tag") || ext.eq_ignore_ascii_case("tagq") {
            Ok(SeqSource::Tag(TagFileReader::open(path)?))
        } else {
            Ok(SeqSource::Fastx(FastxReader::open(path)?))
        }
    }

    fn read_next(&mut self) -> Result<Option<RawSeq>> {
        match self {
            SeqSource::Fastx(reader) => Ok(reader
                .read_next()?
                .map(|(seq, qual)| RawSeq { seq, qual, count: 1 })),
            SeqSource::Tag(reader) => {
                Ok(reader.read_next()?.map(|(seq, qual, count)| RawSeq { seq, qual, count }))
            }
        }
    }

    fn path(&self) -> &Path {
        match self {
            SeqSource::Fastx(reader) => reader.path(),
            SeqSource::Tag(reader) => &reader.path,
        }
    }
}

/// Line reader for the tab-separated tag/tagq formats.
///
/// Blank lines and `#` comment lines are skipped anywhere in the file.
struct TagFileReader {
    path: PathBuf,
    reader: BufReader<File>,
    line: String,
    line_no: u64,
}

impl TagFileReader {
    fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CollapseError::PathMissing {
                expected: "Tag file".to_string(),
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path).map_err(|e| CollapseError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            line: String::new(),
            line_no: 0,
        })
    }

    fn read_next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>, u32)>> {
        loop {
            self.line.clear();
            let n =
                self.reader.read_line(&mut self.line).map_err(|e| CollapseError::io(&self.path, e))?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.line.trim_end_matches(['\n', '\r']);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            let (seq, qual, count_field) = match fields.as_slice() {
                [seq, count] => (*seq, "", *count),
                [seq, qual, count] => (*seq, *qual, *count),
                _ => {
                    return Err(CollapseError::format(
                        &self.path,
                        format!("line {}: expected 2 or 3 tab-separated columns", self.line_no),
                    ));
                }
            };
            if !qual.is_empty() && qual.len() != seq.len() {
                return Err(CollapseError::format(
                    &self.path,
                    format!("line {}: quality length differs from sequence length", self.line_no),
                ));
            }
            let count: u32 = count_field.parse().map_err(|_| {
                CollapseError::format(
                    &self.path,
                    format!("line {}: unparseable count '{count_field}'", self.line_no),
                )
            })?;
            return Ok(Some((seq.as_bytes().to_vec(), qual.as_bytes().to_vec(), count)));
        }
    }
}

/// Reader producing [`SequenceRecord`]s from one sample, whatever its layout.
pub struct SequenceReader {
    layout: LibraryLayout,
    keep_qualities: bool,
    fixed_bp_offset: u16,
    source1: SeqSource,
    source2: Option<SeqSource>,
    pending: Option<SequenceRecord>,
}

impl SequenceReader {
    /// Bind a single-end stream; records get `bp_offset == 0`.
    pub fn single_end(path: &Path, keep_qualities: bool) -> Result<Self> {
        Self::build(LibraryLayout::SingleEnd, SeqSource::open(path)?, None, 0, keep_qualities)
    }

    /// Bind a pair of mate streams; each record concatenates mate-1 and
    /// mate-2 with the breakpoint at the mate-1 length.
    pub fn paired_end(mate1: &Path, mate2: &Path, keep_qualities: bool) -> Result<Self> {
        Self::build(
            LibraryLayout::PairedEnd,
            SeqSource::open(mate1)?,
            Some(SeqSource::open(mate2)?),
            0,
            keep_qualities,
        )
    }

    /// Bind a single stream holding alternating mates.
    pub fn interleaved(path: &Path, keep_qualities: bool) -> Result<Self> {
        Self::build(LibraryLayout::Interleaved, SeqSource::open(path)?, None, 0, keep_qualities)
    }

    /// Bind a single stream of concatenated mates with a fixed breakpoint.
    pub fn breakpoint(path: &Path, bp_offset: u16, keep_qualities: bool) -> Result<Self> {
        Self::build(
            LibraryLayout::Breakpoint,
            SeqSource::open(path)?,
            None,
            bp_offset,
            keep_qualities,
        )
    }

    fn build(
        layout: LibraryLayout,
        source1: SeqSource,
        source2: Option<SeqSource>,
        fixed_bp_offset: u16,
        keep_qualities: bool,
    ) -> Result<Self> {
        let mut reader =
            Self { layout, keep_qualities, fixed_bp_offset, source1, source2, pending: None };
        reader.pending = reader.fetch()?;
        Ok(reader)
    }

    /// Read one record, or `None` at end of stream.
    pub fn read_one(&mut self) -> Result<Option<SequenceRecord>> {
        match self.pending.take() {
            None => Ok(None),
            Some(record) => {
                self.pending = self.fetch()?;
                Ok(Some(record))
            }
        }
    }

    /// Whether the stream is exhausted.
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.pending.is_none()
    }

    fn fetch(&mut self) -> Result<Option<SequenceRecord>> {
        let Some(first) = self.source1.read_next()? else {
            if let Some(source2) = &mut self.source2 {
                if source2.read_next()?.is_some() {
                    return Err(CollapseError::format(
                        source2.path(),
                        "mate-2 stream holds more records than mate-1",
                    ));
                }
            }
            return Ok(None);
        };

        let (seq, qual, count, bp_offset) = match self.layout {
            LibraryLayout::SingleEnd => (first.seq, first.qual, first.count, 0),
            LibraryLayout::PairedEnd => {
                let source2 = self.source2.as_mut().ok_or_else(|| {
                    CollapseError::InvariantViolated {
                        reason: "paired-end reader without a mate-2 source".to_string(),
                    }
                })?;
                let Some(second) = source2.read_next()? else {
                    return Err(CollapseError::format(
                        self.source1.path(),
                        "mate-1 stream holds more records than mate-2",
                    ));
                };
                Self::concat_mates(first, second)?
            }
            LibraryLayout::Interleaved => {
                let Some(second) = self.source1.read_next()? else {
                    return Err(CollapseError::format(
                        self.source1.path(),
                        "interleaved stream holds an odd number of records",
                    ));
                };
                Self::concat_mates(first, second)?
            }
            LibraryLayout::Breakpoint => {
                if first.seq.len() < usize::from(self.fixed_bp_offset) {
                    return Err(CollapseError::format(
                        self.source1.path(),
                        format!(
                            "record of length {} is shorter than the breakpoint offset {}",
                            first.seq.len(),
                            self.fixed_bp_offset
                        ),
                    ));
                }
                (first.seq, first.qual, first.count, self.fixed_bp_offset)
            }
        };

        let qual = if self.keep_qualities { qual } else { Vec::new() };
        Ok(Some(SequenceRecord::new(seq, qual, count, bp_offset)))
    }

    /// Join two mates into one record; the count is taken from mate-1.
    fn concat_mates(mut first: RawSeq, second: RawSeq) -> Result<(Vec<u8>, Vec<u8>, u32, u16)> {
        let bp_offset = u16::try_from(first.seq.len()).map_err(|_| {
            CollapseError::InvariantViolated {
                reason: format!("mate-1 length {} exceeds the breakpoint range", first.seq.len()),
            }
        })?;
        let seq_len = first.seq.len() + second.seq.len();
        let qual_len = first.qual.len() + second.qual.len();
        if qual_len != 0 && qual_len != seq_len {
            return Err(CollapseError::InvariantViolated {
                reason: "one mate carries qualities while the other does not".to_string(),
            });
        }
        first.seq.extend_from_slice(&second.seq);
        first.qual.extend_from_slice(&second.qual);
        Ok((first.seq, first.qual, first.count, bp_offset))
    }
}

impl RecordSource<SequenceRecord> for SequenceReader {
    fn read_batch(&mut self, out: &mut [SequenceRecord]) -> Result<usize> {
        let mut filled = 0;
        for slot in out.iter_mut() {
            match self.read_one()? {
                Some(record) => {
                    *slot = record;
                    filled += 1;
                }
                None => break,
            }
        }
        Ok(filled)
    }

    fn at_end(&self) -> bool {
        SequenceReader::at_end(self)
    }
}

/// Reader for details files (`Overall<TAB>tag...` header plus counter rows).
pub struct DetailsReader {
    path: PathBuf,
    reader: BufReader<File>,
    header: Vec<String>,
    line: String,
    line_no: u64,
    pending: Option<DetailsRecord>,
}

impl DetailsReader {
    /// Open a details file and parse its header line.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CollapseError::PathMissing {
                expected: "Details file".to_string(),
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path).map_err(|e| CollapseError::io(path, e))?;
        let mut reader = Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            header: Vec::new(),
            line: String::new(),
            line_no: 0,
            pending: None,
        };
        reader.read_header()?;
        reader.pending = reader.fetch()?;
        Ok(reader)
    }

    /// Per-sample tags declared by the header, in column order.
    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Read one record, or `None` at end of stream.
    pub fn read_one(&mut self) -> Result<Option<DetailsRecord>> {
        match self.pending.take() {
            None => Ok(None),
            Some(record) => {
                self.pending = self.fetch()?;
                Ok(Some(record))
            }
        }
    }

    /// Whether the stream is exhausted.
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.pending.is_none()
    }

    fn read_header(&mut self) -> Result<()> {
        self.line.clear();
        let n =
            self.reader.read_line(&mut self.line).map_err(|e| CollapseError::io(&self.path, e))?;
        if n == 0 {
            return Err(CollapseError::format(&self.path, "missing details header line"));
        }
        self.line_no += 1;
        let line = self.line.trim_end_matches(['\n', '\r']);
        let mut columns = line.split('\t');
        if columns.next() != Some("Overall") {
            return Err(CollapseError::format(
                &self.path,
                "details header must start with an 'Overall' column",
            ));
        }
        self.header = columns.map(str::to_string).collect();
        if self.header.is_empty() {
            return Err(CollapseError::format(
                &self.path,
                "details header declares no sample columns",
            ));
        }
        Ok(())
    }

    fn fetch(&mut self) -> Result<Option<DetailsRecord>> {
        loop {
            self.line.clear();
            let n =
                self.reader.read_line(&mut self.line).map_err(|e| CollapseError::io(&self.path, e))?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let line = self.line.trim_end_matches(['\n', '\r']);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut fields = line.split('\t');
            let overall = self.parse_counter(fields.next().unwrap_or(""))?;
            let counters =
                fields.map(|f| self.parse_counter(f)).collect::<Result<Vec<u32>>>()?;
            if counters.len() != self.header.len() {
                return Err(CollapseError::format(
                    &self.path,
                    format!(
                        "line {}: {} counters for {} declared samples",
                        self.line_no,
                        counters.len(),
                        self.header.len()
                    ),
                ));
            }
            return Ok(Some(DetailsRecord::from_parts(counters, overall)));
        }
    }

    fn parse_counter(&self, field: &str) -> Result<u32> {
        field.parse().map_err(|_| {
            CollapseError::format(
                &self.path,
                format!("line {}: unparseable counter '{field}'", self.line_no),
            )
        })
    }
}

impl RecordSource<DetailsRecord> for DetailsReader {
    fn read_batch(&mut self, out: &mut [DetailsRecord]) -> Result<usize> {
        let mut filled = 0;
        for slot in out.iter_mut() {
            match self.read_one()? {
                Some(record) => {
                    *slot = record;
                    filled += 1;
                }
                None => break,
            }
        }
        Ok(filled)
    }

    fn at_end(&self) -> bool {
        DetailsReader::at_end(self)
    }
}
