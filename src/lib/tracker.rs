//! Sample discovery: directory scans and manifest parsing.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{CollapseError, Result};

/// Collect regular files in `dir` whose extension matches one of
/// `valid_extensions` (compared case-insensitively, without the dot).
/// Results are sorted for a deterministic sample order.
pub fn track_single_samples(dir: &Path, valid_extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut samples = Vec::new();
    for entry in read_dir(dir)? {
        let entry = entry.map_err(|e| CollapseError::io(dir, e))?;
        let path = entry.path();
        if is_valid_sample(&path, valid_extensions) {
            samples.push(path);
        }
    }
    samples.sort();
    Ok(samples)
}

/// Collect mate-1/mate-2 sample pairs from two directories, keeping files
/// whose names match across them.
pub fn track_paired_samples(
    dir: &Path,
    paired_dir: &Path,
    valid_extensions: &[&str],
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mate1 = track_single_samples(dir, valid_extensions)?;
    let mut samples = Vec::new();
    let mut paired = Vec::new();
    for path in mate1 {
        let Some(name) = path.file_name() else {
            continue;
        };
        let candidate = paired_dir.join(name);
        if is_valid_sample(&candidate, valid_extensions) {
            samples.push(path);
            paired.push(candidate);
        }
    }
    Ok((samples, paired))
}

/// Parse a two-column CSV manifest of mate-1/mate-2 paths, keeping rows
/// where both paths are regular files.
pub fn track_manifest(path: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    if !path.is_file() {
        return Err(CollapseError::PathMissing {
            expected: "Manifest file".to_string(),
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path).map_err(|e| CollapseError::io(path, e))?;

    let mut samples = Vec::new();
    let mut paired = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((first, second)) = line.split_once(',') else {
            continue;
        };
        let first = PathBuf::from(first.trim());
        let second = PathBuf::from(second.trim());
        if first.is_file() && second.is_file() {
            samples.push(first);
            paired.push(second);
        }
    }
    Ok((samples, paired))
}

fn read_dir(dir: &Path) -> Result<fs::ReadDir> {
    if !dir.is_dir() {
        return Err(CollapseError::PathMissing {
            expected: "Sample directory".to_string(),
            path: dir.to_path_buf(),
        });
    }
    fs::read_dir(dir).map_err(|e| CollapseError::io(dir, e))
}

fn is_valid_sample(path: &Path, valid_extensions: &[&str]) -> bool {
    if !path.is_file() {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| valid_extensions.iter().any(|valid| ext.eq_ignore_ascii_case(valid)))
}
