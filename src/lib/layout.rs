//! Library layout and output format descriptors.
//!
//! A sample's *layout* describes how mates are arranged across its input
//! files; the *output format* decides both the on-disk syntax of collapsed
//! records and whether quality scores survive the collapse.

/// Arrangement of mates within a sample's input files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryLayout {
    /// One record per read, single stream.
    SingleEnd,
    /// Mates split across two parallel streams.
    PairedEnd,
    /// Mates alternating within a single stream.
    Interleaved,
    /// Concatenated mates in a single stream with a fixed breakpoint offset.
    Breakpoint,
}

impl LibraryLayout {
    /// Whether output for this layout is split into mate-1 and mate-2 files.
    #[must_use]
    pub fn is_paired_output(self) -> bool {
        !matches!(self, LibraryLayout::SingleEnd)
    }
}

/// On-disk format of collapsed output records.
///
/// The quality-bearing variants (`Fastq`, `Tagq`) keep per-base qualities
/// through the collapse; the others drop qualities at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Header + sequence records, no qualities.
    Fasta,
    /// Header + sequence + quality records.
    Fastq,
    /// Tab-separated `sequence<TAB>count` lines.
    Tag,
    /// Tab-separated `sequence<TAB>quality<TAB>count` lines.
    Tagq,
}

impl OutputFormat {
    /// Whether records read for this output format retain their qualities.
    #[must_use]
    pub fn keeps_qualities(self) -> bool {
        matches!(self, OutputFormat::Fastq | OutputFormat::Tagq)
    }

    /// The family of sink this format is written through.
    #[must_use]
    pub fn sink_kind(self) -> SinkKind {
        match self {
            OutputFormat::Fasta | OutputFormat::Fastq => SinkKind::Fastx,
            OutputFormat::Tag | OutputFormat::Tagq => SinkKind::Tag,
        }
    }
}

/// Family of on-disk syntax a writer emits.
///
/// The concrete extension is resolved only once the writer knows whether the
/// records it receives carry qualities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// fasta/fastq records with `BIOSEQZIP` headers.
    Fastx,
    /// tag/tagq tab-separated lines carrying the occurrence count.
    Tag,
}

impl SinkKind {
    /// File extension for this sink, resolved by quality presence.
    #[must_use]
    pub fn extension(self, with_qualities: bool) -> &'static str {
        match (self, with_qualities) {
            (SinkKind::Fastx, true) => "fastq",
            (SinkKind::Fastx, false) => "fasta",
            (SinkKind::Tag, true) => "tagq",
            (SinkKind::Tag, false) => "tag",
        }
    }
}
