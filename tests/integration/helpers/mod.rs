//! Helper utilities for integration tests.

use std::fs;
use std::path::{Path, PathBuf};

/// Write a file with the given content and return its path.
pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("Failed to write test input");
    path
}

/// Parse a fasta file into `(header, sequence)` pairs.
pub fn fasta_records(path: &Path) -> Vec<(String, String)> {
    let content = fs::read_to_string(path).expect("Failed to read fasta output");
    let mut records = Vec::new();
    let mut lines = content.lines();
    while let Some(header) = lines.next() {
        let seq = lines.next().unwrap_or_default();
        records.push((header.trim_start_matches('>').to_string(), seq.to_string()));
    }
    records
}

/// Parse a fastq file into `(header, sequence, quality)` triples.
pub fn fastq_records(path: &Path) -> Vec<(String, String, String)> {
    let content = fs::read_to_string(path).expect("Failed to read fastq output");
    let lines: Vec<&str> = content.lines().collect();
    lines
        .chunks(4)
        .map(|chunk| {
            (
                chunk[0].trim_start_matches('@').to_string(),
                chunk[1].to_string(),
                chunk[3].to_string(),
            )
        })
        .collect()
}

/// Parse a tag or tagq file into `(sequence, count)` pairs.
pub fn tag_records(path: &Path) -> Vec<(String, u32)> {
    let content = fs::read_to_string(path).expect("Failed to read tag output");
    content
        .lines()
        .map(|line| {
            let mut fields = line.split('\t');
            let seq = fields.next().expect("missing sequence column").to_string();
            let count = fields.next_back().expect("missing count column").parse().unwrap();
            (seq, count)
        })
        .collect()
}

/// Parse a details file into its header tags and counter rows (the first
/// column of each row is the overall count).
pub fn details_records(path: &Path) -> (Vec<String>, Vec<Vec<u32>>) {
    let content = fs::read_to_string(path).expect("Failed to read details output");
    let mut lines = content.lines();
    let header: Vec<String> =
        lines.next().expect("missing details header").split('\t').map(str::to_string).collect();
    let rows = lines
        .map(|line| line.split('\t').map(|field| field.parse().unwrap()).collect())
        .collect();
    (header, rows)
}

/// Extract the `CN:` count from a `BIOSEQZIP|ID:..|CN:..` header.
pub fn header_count(header: &str) -> u32 {
    header
        .split('|')
        .find_map(|field| field.strip_prefix("CN:"))
        .expect("header without CN field")
        .parse()
        .unwrap()
}
