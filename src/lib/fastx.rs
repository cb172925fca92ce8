//! Low-level fasta/fastq stream access.
//!
//! Wraps `seq_io` parsers behind a single reader that sniffs the concrete
//! format from the first significant byte of the stream. Leading blank lines
//! and `#` comment lines are consumed before sniffing.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use seq_io::fasta;
#[allow(unused_imports)]
use seq_io::fasta::Record as _;
use seq_io::fastq;
use seq_io::fastq::Record as _;

use crate::errors::{CollapseError, Result};

/// Reader over one fasta or fastq stream.
pub(crate) struct FastxReader {
    path: PathBuf,
    inner: FastxInner,
}

impl std::fmt::Debug for FastxReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastxReader")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

enum FastxInner {
    Fasta(fasta::Reader<BufReader<File>>),
    Fastq(fastq::Reader<BufReader<File>>),
    /// The stream held no records at all.
    Empty,
}

impl FastxReader {
    /// The path this reader was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open `path`, skipping leading blank and comment lines, and pick the
    /// parser from the first record marker (`>` fasta, `@` fastq).
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CollapseError::PathMissing {
                expected: "Sequence file".to_string(),
                path: path.to_path_buf(),
            });
        }
        let file = File::open(path).map_err(|e| CollapseError::io(path, e))?;
        let mut reader = BufReader::new(file);

        loop {
            let head = reader.fill_buf().map_err(|e| CollapseError::io(path, e))?;
            if head.is_empty() {
                return Ok(Self { path: path.to_path_buf(), inner: FastxInner::Empty });
            }
            match head[0] {
                b'\n' | b'\r' | b'#' => {
                    let mut skipped = String::new();
                    reader.read_line(&mut skipped).map_err(|e| CollapseError::io(path, e))?;
                }
                b'>' => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                        inner: FastxInner::Fasta(fasta::Reader::new(reader)),
                    });
                }
                b'@' => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                        inner: FastxInner::Fastq(fastq::Reader::new(reader)),
                    });
                }
                other => {
                    return Err(CollapseError::format(
                        path,
                        format!("unrecognized record marker byte 0x{other:02x}"),
                    ));
                }
            }
        }
    }

    /// Read the next record as `(sequence, quality)` bytes.
    ///
    /// The quality vector is empty for fasta streams. Returns `Ok(None)` at
    /// end of stream.
    pub fn read_next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match &mut self.inner {
            FastxInner::Empty => Ok(None),
            FastxInner::Fasta(reader) => match reader.next() {
                None => Ok(None),
                Some(Ok(rec)) => Ok(Some((rec.full_seq().into_owned(), Vec::new()))),
                Some(Err(e)) => Err(CollapseError::format(&self.path, e.to_string())),
            },
            FastxInner::Fastq(reader) => match reader.next() {
                None => Ok(None),
                Some(Ok(rec)) => Ok(Some((rec.seq().to_vec(), rec.qual().to_vec()))),
                Some(Err(e)) => Err(CollapseError::format(&self.path, e.to_string())),
            },
        }
    }
}
