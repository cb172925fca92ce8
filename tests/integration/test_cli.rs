//! Integration tests driving the bioseqzip binary.

use std::path::PathBuf;
use std::process::Command;

use tempfile::TempDir;

use crate::helpers::{tag_records, write_file};

fn bioseqzip_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_bioseqzip"))
}

#[test]
fn test_collapse_command() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "reads.fasta", ">a\nACGT\n>b\nACGT\n>c\nTTTT\n");
    let out = dir.path().join("out");

    let status = Command::new(bioseqzip_binary())
        .args([
            "collapse",
            "-i",
            input.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "-b",
            "collapsed",
            "-f",
            "tag",
        ])
        .status()
        .expect("Failed to run bioseqzip collapse");

    assert!(status.success());
    let records = tag_records(&out.join("collapsed.tag"));
    assert_eq!(records, vec![("ACGT".to_string(), 2), ("TTTT".to_string(), 1)]);
}

#[test]
fn test_collapse_command_writes_report() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "reads.fasta", ">a\nACGT\n>b\nACGT\n");
    let out = dir.path().join("out");
    let report = dir.path().join("report.csv");

    let status = Command::new(bioseqzip_binary())
        .args([
            "collapse",
            "-i",
            input.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--csv-report",
            report.to_str().unwrap(),
        ])
        .status()
        .expect("Failed to run bioseqzip collapse");

    assert!(status.success());
    let content = std::fs::read_to_string(&report).unwrap();
    assert!(content.starts_with("SAMPLE ID,RAW SEQUENCES,COLLAPSED SEQUENCES"));
    assert!(content.lines().nth(1).unwrap().starts_with("collapsed,2,1"));
}

#[test]
fn test_missing_input_fails_with_error() {
    let dir = TempDir::new().unwrap();

    let output = Command::new(bioseqzip_binary())
        .args(["collapse", "-i", "/no/such/reads.fasta", "-o", dir.path().to_str().unwrap()])
        .output()
        .expect("Failed to run bioseqzip collapse");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ERROR:"), "stderr was: {stderr}");
}

#[test]
fn test_conflicting_layouts_fail() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "reads.fasta", ">a\nACGT\n");

    let output = Command::new(bioseqzip_binary())
        .args([
            "collapse",
            "-i",
            input.to_str().unwrap(),
            "-p",
            input.to_str().unwrap(),
            "--interleaved",
        ])
        .output()
        .expect("Failed to run bioseqzip collapse");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("mutually exclusive"), "stderr was: {stderr}");
}
