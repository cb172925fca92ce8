//! Sharding record writers.
//!
//! A [`SequenceWriter`] appends records to an output shard and transparently
//! rolls over to the next shard once the configured record cap is reached.
//! Paired layouts write parallel mate-1/mate-2 files; single-end layouts
//! write one file per shard. Shards are named
//! `<basename>[_<k>][_1|_2].<ext>` where the index `k` is omitted for the
//! first shard and the extension follows the sink kind and quality presence.
//!
//! Shards are opened lazily on the first record written after a
//! [`SequenceWriter::switch_sink`], so forcing a sink switch never leaves an
//! empty file behind.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::buffer::RecordSink;
use crate::details::DetailsRecord;
use crate::errors::{CollapseError, Result};
use crate::layout::{LibraryLayout, SinkKind};
use crate::record::SequenceRecord;

/// Discriminates temporary basenames created within the same nanosecond.
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Build a monotonically unique basename for temporary shards.
fn temporary_basename() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{nanos}_{}", TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

/// Writer emitting sequence records into sharded fasta/fastq or tag/tagq
/// files.
pub struct SequenceWriter {
    layout: LibraryLayout,
    sink_kind: SinkKind,
    dest_dir: PathBuf,
    basename: String,
    max_records: u64,
    current_records: u64,
    next_id: u64,
    write_qualities: Option<bool>,
    sink1: Option<BufWriter<File>>,
    sink2: Option<BufWriter<File>>,
    output_paths: Vec<(PathBuf, Option<PathBuf>)>,
}

impl SequenceWriter {
    /// Configure a writer for final output with the given shard record cap.
    #[must_use]
    pub fn new(
        layout: LibraryLayout,
        sink_kind: SinkKind,
        dest_dir: &Path,
        basename: &str,
        max_records: u64,
    ) -> Self {
        Self {
            layout,
            sink_kind,
            dest_dir: dest_dir.to_path_buf(),
            basename: basename.to_string(),
            max_records,
            current_records: 0,
            next_id: 0,
            write_qualities: None,
            sink1: None,
            sink2: None,
            output_paths: Vec::new(),
        }
    }

    /// Configure a writer for temporary shards with a unique random basename
    /// and no record cap.
    #[must_use]
    pub fn temporary(layout: LibraryLayout, sink_kind: SinkKind, dest_dir: &Path) -> Self {
        Self::new(layout, sink_kind, dest_dir, &temporary_basename(), u64::MAX)
    }

    /// Ordered list of shard paths produced so far. The second element is
    /// `None` for single-end layouts.
    #[must_use]
    pub fn output_paths(&self) -> &[(PathBuf, Option<PathBuf>)] {
        &self.output_paths
    }

    /// Close the current shard; the next write starts a fresh one.
    ///
    /// Used by the collapse pipeline to place each sorted run in its own
    /// shard regardless of the record cap.
    pub fn switch_sink(&mut self) -> Result<()> {
        self.close_sinks()
    }

    /// Flush buffered data of the open shard to the OS.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(sink) = &mut self.sink1 {
            sink.flush().map_err(|e| self.io_error(e))?;
        }
        if let Some(sink) = &mut self.sink2 {
            sink.flush().map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }

    fn close_sinks(&mut self) -> Result<()> {
        self.flush()?;
        self.sink1 = None;
        self.sink2 = None;
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> CollapseError {
        let path = self
            .output_paths
            .last()
            .map_or_else(|| self.dest_dir.clone(), |(first, _)| first.clone());
        CollapseError::io(path, source)
    }

    fn shard_path(&self, shard: usize, mate_suffix: &str, with_qualities: bool) -> PathBuf {
        let mut name = self.basename.clone();
        if shard > 0 {
            name.push_str(&format!("_{shard}"));
        }
        name.push_str(mate_suffix);
        name.push('.');
        name.push_str(self.sink_kind.extension(with_qualities));
        self.dest_dir.join(name)
    }

    fn open_next_shard(&mut self) -> Result<()> {
        self.close_sinks()?;
        let with_qualities = self.write_qualities.unwrap_or(false);
        let shard = self.output_paths.len();
        self.current_records = 0;
        if self.layout.is_paired_output() {
            let path1 = self.shard_path(shard, "_1", with_qualities);
            let path2 = self.shard_path(shard, "_2", with_qualities);
            self.sink1 = Some(BufWriter::new(
                File::create(&path1).map_err(|e| CollapseError::io(&path1, e))?,
            ));
            self.sink2 = Some(BufWriter::new(
                File::create(&path2).map_err(|e| CollapseError::io(&path2, e))?,
            ));
            self.output_paths.push((path1, Some(path2)));
        } else {
            let path1 = self.shard_path(shard, "", with_qualities);
            self.sink1 = Some(BufWriter::new(
                File::create(&path1).map_err(|e| CollapseError::io(&path1, e))?,
            ));
            self.output_paths.push((path1, None));
        }
        Ok(())
    }

    fn write_record(&mut self, record: &SequenceRecord) -> Result<()> {
        let id = self.next_id;
        let with_qualities = self.write_qualities.unwrap_or(false);
        let kind = self.sink_kind;
        let result = if self.layout.is_paired_output() {
            let header = record.fastx_header(id);
            let (seq1, qual1) = record.mate1();
            let (seq2, qual2) = record.mate2();
            let count = record.count();
            match (self.sink1.as_mut(), self.sink2.as_mut()) {
                (Some(sink1), Some(sink2)) => match kind {
                    SinkKind::Fastx => write_fastx(sink1, &header, seq1, qual1, with_qualities)
                        .and_then(|()| write_fastx(sink2, &header, seq2, qual2, with_qualities)),
                    SinkKind::Tag => write_tag(sink1, seq1, qual1, count, with_qualities)
                        .and_then(|()| write_tag(sink2, seq2, qual2, count, with_qualities)),
                },
                _ => return Err(closed_sink_error()),
            }
        } else {
            match self.sink1.as_mut() {
                Some(sink) => match kind {
                    SinkKind::Fastx => write_fastx(
                        sink,
                        &record.fastx_header(id),
                        record.sequence(),
                        record.quality(),
                        with_qualities,
                    ),
                    SinkKind::Tag => write_tag(
                        sink,
                        record.sequence(),
                        record.quality(),
                        record.count(),
                        with_qualities,
                    ),
                },
                None => return Err(closed_sink_error()),
            }
        };
        result.map_err(|e| self.io_error(e))
    }
}

fn closed_sink_error() -> CollapseError {
    CollapseError::InvariantViolated { reason: "record written through a closed sink".to_string() }
}

fn write_fastx(
    sink: &mut BufWriter<File>,
    header: &str,
    seq: &[u8],
    qual: &[u8],
    with_qualities: bool,
) -> std::io::Result<()> {
    if with_qualities {
        sink.write_all(b"@")?;
        sink.write_all(header.as_bytes())?;
        sink.write_all(b"\n")?;
        sink.write_all(seq)?;
        sink.write_all(b"\n+\n")?;
        sink.write_all(qual)?;
        sink.write_all(b"\n")
    } else {
        sink.write_all(b">")?;
        sink.write_all(header.as_bytes())?;
        sink.write_all(b"\n")?;
        sink.write_all(seq)?;
        sink.write_all(b"\n")
    }
}

fn write_tag(
    sink: &mut BufWriter<File>,
    seq: &[u8],
    qual: &[u8],
    count: u32,
    with_qualities: bool,
) -> std::io::Result<()> {
    sink.write_all(seq)?;
    if with_qualities {
        sink.write_all(b"\t")?;
        sink.write_all(qual)?;
    }
    writeln!(sink, "\t{count}")
}

impl RecordSink<SequenceRecord> for SequenceWriter {
    fn write_if<P: Fn(&SequenceRecord) -> bool>(
        &mut self,
        records: &[SequenceRecord],
        keep: P,
    ) -> Result<u64> {
        let Some(first) = records.first() else {
            return Ok(0);
        };
        if self.sink1.is_none() {
            if self.write_qualities.is_none() {
                self.write_qualities = Some(!first.quality().is_empty());
            }
            self.open_next_shard()?;
        }

        let mut printed = 0;
        for record in records {
            if keep(record) {
                if self.current_records == self.max_records {
                    self.open_next_shard()?;
                }
                self.write_record(record)?;
                self.current_records += 1;
                self.next_id += 1;
                printed += 1;
            }
        }
        Ok(printed)
    }
}

/// Writer emitting per-sample occurrence vectors into sharded details files.
///
/// Every shard starts with the header line `Overall<TAB>tag...`; sharding
/// mirrors the sequence writer index-for-index when both share the same
/// record cap.
pub struct DetailsWriter {
    dest_dir: PathBuf,
    basename: String,
    header: Vec<String>,
    max_records: u64,
    current_records: u64,
    sink: Option<BufWriter<File>>,
    output_paths: Vec<PathBuf>,
}

impl DetailsWriter {
    /// Configure a writer for final output with the given shard record cap.
    #[must_use]
    pub fn new(dest_dir: &Path, basename: &str, header: Vec<String>, max_records: u64) -> Self {
        Self {
            dest_dir: dest_dir.to_path_buf(),
            basename: basename.to_string(),
            header,
            max_records,
            current_records: 0,
            sink: None,
            output_paths: Vec::new(),
        }
    }

    /// Configure a writer for temporary shards with no record cap.
    #[must_use]
    pub fn temporary(dest_dir: &Path, header: Vec<String>) -> Self {
        Self::new(dest_dir, &temporary_basename(), header, u64::MAX)
    }

    /// Ordered list of shard paths produced so far.
    #[must_use]
    pub fn output_paths(&self) -> &[PathBuf] {
        &self.output_paths
    }

    /// Close the current shard; the next write starts a fresh one.
    pub fn switch_sink(&mut self) -> Result<()> {
        self.flush()?;
        self.sink = None;
        Ok(())
    }

    /// Flush buffered data of the open shard to the OS.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(sink) = &mut self.sink {
            sink.flush().map_err(|e| {
                CollapseError::io(self.output_paths.last().cloned().unwrap_or_default(), e)
            })?;
        }
        Ok(())
    }

    fn open_next_shard(&mut self) -> Result<()> {
        self.switch_sink()?;
        let shard = self.output_paths.len();
        let mut name = self.basename.clone();
        if shard > 0 {
            name.push_str(&format!("_{shard}"));
        }
        name.push_str(".tab");
        let path = self.dest_dir.join(name);
        let mut sink =
            BufWriter::new(File::create(&path).map_err(|e| CollapseError::io(&path, e))?);
        write!(sink, "Overall").map_err(|e| CollapseError::io(&path, e))?;
        for tag in &self.header {
            write!(sink, "\t{tag}").map_err(|e| CollapseError::io(&path, e))?;
        }
        writeln!(sink).map_err(|e| CollapseError::io(&path, e))?;
        self.sink = Some(sink);
        self.output_paths.push(path);
        self.current_records = 0;
        Ok(())
    }

    fn write_record(&mut self, record: &DetailsRecord) -> Result<()> {
        let path = self.output_paths.last().cloned().unwrap_or_default();
        let Some(sink) = self.sink.as_mut() else {
            return Err(closed_sink_error());
        };
        let mut line = record.overall().to_string();
        for counter in record.counters() {
            line.push('\t');
            line.push_str(&counter.to_string());
        }
        line.push('\n');
        sink.write_all(line.as_bytes()).map_err(|e| CollapseError::io(path, e))
    }
}

impl RecordSink<DetailsRecord> for DetailsWriter {
    fn write_if<P: Fn(&DetailsRecord) -> bool>(
        &mut self,
        records: &[DetailsRecord],
        keep: P,
    ) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        if self.sink.is_none() {
            self.open_next_shard()?;
        }
        let mut printed = 0;
        for record in records {
            if keep(record) {
                if self.current_records == self.max_records {
                    self.open_next_shard()?;
                }
                self.write_record(record)?;
                self.current_records += 1;
                printed += 1;
            }
        }
        Ok(printed)
    }
}
