//! Paired-end, interleaved, and breakpoint collapse scenarios.

use bioseqzip_lib::{Collapser, OutputFormat};
use tempfile::TempDir;

use crate::helpers::{fasta_records, header_count, tag_records, write_file};

#[test]
fn test_paired_end_breakpoint_preserved() {
    let dir = TempDir::new().unwrap();
    let mate1 = write_file(dir.path(), "r1.fasta", ">a\nAC\n>b\nAC\n");
    let mate2 = write_file(dir.path(), "r2.fasta", ">a\nGT\n>b\nGT\n");
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Fasta)
        .paired_end(&mate1, &mate2, "out")
        .unwrap();

    // One surviving pair with count 2, split back at the breakpoint.
    let (path1, path2) = &results.collapsed_paths[0];
    let path2 = path2.as_ref().expect("paired output must produce a mate-2 shard");
    assert!(path1.ends_with("out_1.fasta"));
    assert!(path2.ends_with("out_2.fasta"));

    let mates1 = fasta_records(path1);
    let mates2 = fasta_records(path2);
    assert_eq!(mates1.len(), 1);
    assert_eq!(mates2.len(), 1);
    assert_eq!(mates1[0].1, "AC");
    assert_eq!(mates2[0].1, "GT");
    assert_eq!(header_count(&mates1[0].0), 2);
    assert_eq!(header_count(&mates2[0].0), 2);
}

#[test]
fn test_paired_end_mate_symmetry() {
    let dir = TempDir::new().unwrap();
    let mate1 = write_file(dir.path(), "r1.fasta", ">a\nAC\n>b\nGG\n>c\nAC\n>d\nTT\n");
    let mate2 = write_file(dir.path(), "r2.fasta", ">a\nGT\n>b\nCC\n>c\nGT\n>d\nAA\n");
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .paired_end(&mate1, &mate2, "out")
        .unwrap();

    for (path1, path2) in &results.collapsed_paths {
        let path2 = path2.as_ref().unwrap();
        let mates1 = tag_records(path1);
        let mates2 = tag_records(path2);
        assert_eq!(mates1.len(), mates2.len());
        for ((_, count1), (_, count2)) in mates1.iter().zip(&mates2) {
            assert_eq!(count1, count2);
        }
    }

    // AC+GT occurred twice; GG+CC and TT+AA once each.
    let mates1 = tag_records(&results.collapsed_paths[0].0);
    assert_eq!(mates1, vec![
        ("AC".to_string(), 2),
        ("GG".to_string(), 1),
        ("TT".to_string(), 1),
    ]);
}

#[test]
fn test_interleaved_collapse() {
    let dir = TempDir::new().unwrap();
    let input = write_file(
        dir.path(),
        "reads.fasta",
        ">a/1\nAC\n>a/2\nGT\n>b/1\nAC\n>b/2\nGT\n>c/1\nTT\n>c/2\nAA\n",
    );
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .interleaved(&input, "out")
        .unwrap();

    let (path1, path2) = &results.collapsed_paths[0];
    let mates1 = tag_records(path1);
    let mates2 = tag_records(path2.as_ref().unwrap());
    assert_eq!(mates1, vec![("AC".to_string(), 2), ("TT".to_string(), 1)]);
    assert_eq!(mates2, vec![("GT".to_string(), 2), ("AA".to_string(), 1)]);
    assert_eq!(results.statistics[0].raw_sequences, 3);
}

#[test]
fn test_breakpoint_collapse() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "reads.fasta", ">a\nACGT\n>b\nACGT\n>c\nACTT\n");
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .breakpoint(&input, 2, "out")
        .unwrap();

    let (path1, path2) = &results.collapsed_paths[0];
    let mates1 = tag_records(path1);
    let mates2 = tag_records(path2.as_ref().unwrap());
    assert_eq!(mates1, vec![("AC".to_string(), 2), ("AC".to_string(), 1)]);
    assert_eq!(mates2, vec![("GT".to_string(), 2), ("TT".to_string(), 1)]);
}
