//! Single-sample collapse scenarios.

use std::path::Path;

use bioseqzip_lib::{Collapser, OutputFormat, SequenceReader};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use crate::helpers::{fasta_records, fastq_records, header_count, tag_records, write_file};

fn collapser(dir: &Path) -> Collapser {
    Collapser::new(dir, dir)
}

#[test]
fn test_fasta_counts_duplicates() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "reads.fasta", ">a\nACGT\n>b\nACGT\n>c\nTTTT\n");

    let results = collapser(dir.path())
        .output_format(OutputFormat::Fasta)
        .single_end(&input, "out")
        .unwrap();

    let records = fasta_records(&results.collapsed_paths[0].0);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].1, "ACGT");
    assert_eq!(header_count(&records[0].0), 2);
    assert_eq!(records[1].1, "TTTT");
    assert_eq!(header_count(&records[1].0), 1);

    let stats = &results.statistics[0];
    assert_eq!(stats.raw_sequences, 3);
    assert_eq!(stats.collapsed_sequences, 2);
    assert!(stats.raw_space > 0);
    assert!(stats.collapsed_space > 0);
}

#[test]
fn test_fastq_quality_averaging() {
    let dir = TempDir::new().unwrap();
    // Phred values 0,1 and 2,3: the weighted average is 1,2.
    let input = write_file(dir.path(), "reads.fastq", "@x\nAC\n+\n!\"\n@y\nAC\n+\n#$\n");

    let results = collapser(dir.path())
        .output_format(OutputFormat::Fastq)
        .single_end(&input, "out")
        .unwrap();

    let records = fastq_records(&results.collapsed_paths[0].0);
    assert_eq!(records.len(), 1);
    let (header, seq, qual) = &records[0];
    assert_eq!(header_count(header), 2);
    assert_eq!(seq, "AC");
    assert_eq!(qual, "\"#");
}

#[test]
fn test_trim() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "reads.fasta", ">a\nNACGTN\n>b\nNACGTG\n");

    let results = collapser(dir.path())
        .output_format(OutputFormat::Tag)
        .trim(1, 1)
        .single_end(&input, "out")
        .unwrap();

    // Both records trim to ACGT and collapse together.
    let records = tag_records(&results.collapsed_paths[0].0);
    assert_eq!(records, vec![("ACGT".to_string(), 2)]);
}

#[test]
fn test_shard_rollover() {
    let dir = TempDir::new().unwrap();
    let input = write_file(
        dir.path(),
        "reads.fasta",
        ">a\nAAAA\n>b\nCCCC\n>c\nGGGG\n>d\nTTTT\n>e\nACGT\n",
    );
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let results = collapser(&out)
        .output_format(OutputFormat::Tag)
        .max_output_records(2)
        .single_end(&input, "out")
        .unwrap();

    let paths: Vec<_> = results.collapsed_paths.iter().map(|(p, _)| p.clone()).collect();
    assert_eq!(paths.len(), 3);
    assert!(paths[0].ends_with("out.tag"));
    assert!(paths[1].ends_with("out_1.tag"));
    assert!(paths[2].ends_with("out_2.tag"));
    assert_eq!(tag_records(&paths[0]).len(), 2);
    assert_eq!(tag_records(&paths[1]).len(), 2);
    assert_eq!(tag_records(&paths[2]).len(), 1);
}

#[test]
fn test_collapse_is_idempotent_via_tag_roundtrip() {
    let dir = TempDir::new().unwrap();
    let input = write_file(
        dir.path(),
        "reads.fasta",
        ">a\nACGT\n>b\nACGT\n>c\nTTTT\n>d\nACGT\n>e\nGGGG\n",
    );

    let first = collapser(dir.path())
        .output_format(OutputFormat::Tag)
        .single_end(&input, "first")
        .unwrap();
    let first_records = tag_records(&first.collapsed_paths[0].0);

    // Collapsing the collapsed tag file must keep records and counts.
    let second = collapser(dir.path())
        .output_format(OutputFormat::Tag)
        .single_end(&first.collapsed_paths[0].0, "second")
        .unwrap();
    let second_records = tag_records(&second.collapsed_paths[0].0);

    assert_eq!(first_records, second_records);
}

#[test]
fn test_memory_bounded_collapse_conserves_counts() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    let alphabet = [b'A', b'C', b'G', b'T'];
    let mut content = String::new();
    let n_reads = 500;
    for i in 0..n_reads {
        let seq: String =
            (0..8).map(|_| alphabet[rng.gen_range(0..4)] as char).collect();
        content.push_str(&format!(">r{i}\n{seq}\n"));
    }
    let input = write_file(dir.path(), "reads.fasta", &content);
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    // A RAM ceiling of a few KiB forces many runs and a tiered merge.
    let results = collapser(&out)
        .output_format(OutputFormat::Tag)
        .max_ram(4_000)
        .threads(4)
        .single_end(&input, "out")
        .unwrap();

    let records = tag_records(&results.collapsed_paths[0].0);
    let total: u64 = records.iter().map(|(_, count)| u64::from(*count)).sum();
    assert_eq!(total, n_reads);
    assert_eq!(results.statistics[0].raw_sequences, n_reads);
    assert_eq!(results.statistics[0].collapsed_sequences, records.len() as u64);

    // Output is strictly increasing by sequence, so it is also unique.
    for pair in records.windows(2) {
        assert!(pair[0].0 < pair[1].0, "{} !< {}", pair[0].0, pair[1].0);
    }

    // No temporaries survive the merge phase.
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 1);
}

#[test]
fn test_tiered_run_merge_above_fanout() {
    let dir = TempDir::new().unwrap();
    // 30 distinct sequences, each occurring 20 times, shuffled so duplicates
    // spread across batches.
    let mut rng = StdRng::seed_from_u64(41);
    let mut reads: Vec<usize> = (0..600).map(|i| i % 30).collect();
    for i in (1..reads.len()).rev() {
        reads.swap(i, rng.gen_range(0..=i));
    }
    let mut content = String::new();
    for (i, read) in reads.iter().enumerate() {
        content.push_str(&format!(">r{i}\nAAAACCCCGGGGTT{read:02}\n"));
    }
    let input = write_file(dir.path(), "reads.fasta", &content);

    let fast_dir = dir.path().join("fast");
    std::fs::create_dir(&fast_dir).unwrap();
    let fast = collapser(&fast_dir)
        .output_format(OutputFormat::Tag)
        .single_end(&input, "out")
        .unwrap();

    // A ceiling this small yields well over 16 sorted runs, so the run merge
    // needs more than one tier before the final merge.
    let ext_dir = dir.path().join("ext");
    std::fs::create_dir(&ext_dir).unwrap();
    let external = collapser(&ext_dir)
        .output_format(OutputFormat::Tag)
        .max_ram(2_000)
        .single_end(&input, "out")
        .unwrap();

    assert_eq!(external.statistics[0].collapsed_sequences, 30);
    let records = tag_records(&external.collapsed_paths[0].0);
    assert_eq!(records, tag_records(&fast.collapsed_paths[0].0));
    let total: u64 = records.iter().map(|(_, count)| u64::from(*count)).sum();
    assert_eq!(total, 600);
    for (_, count) in &records {
        assert_eq!(*count, 20);
    }
    // Every run and tier temporary was cleaned up.
    assert_eq!(std::fs::read_dir(&ext_dir).unwrap().count(), 1);
}

#[test]
fn test_tagq_output_keeps_qualities() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "reads.fastq", "@x\nAC\n+\nII\n@y\nGT\n+\nJJ\n");

    let results = collapser(dir.path())
        .output_format(OutputFormat::Tagq)
        .single_end(&input, "out")
        .unwrap();

    let path = &results.collapsed_paths[0].0;
    assert!(path.extension().is_some_and(|ext| ext == "tagq"));
    let content = std::fs::read_to_string(path).unwrap();
    assert_eq!(content, "AC\tII\t1\nGT\tJJ\t1\n");
}

#[test]
fn test_collapsed_output_reads_back() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "reads.fastq", "@x\nACGT\n+\nIIII\n@y\nACGT\n+\nIIII\n");

    let results = collapser(dir.path())
        .output_format(OutputFormat::Tagq)
        .single_end(&input, "out")
        .unwrap();

    let mut reader = SequenceReader::single_end(&results.collapsed_paths[0].0, true).unwrap();
    let record = reader.read_one().unwrap().unwrap();
    assert_eq!(record.sequence(), b"ACGT");
    assert_eq!(record.quality(), b"IIII");
    assert_eq!(record.count(), 2);
    assert!(reader.at_end());
}

#[test]
fn test_missing_input_is_reported() {
    let dir = TempDir::new().unwrap();
    let result = collapser(dir.path()).single_end(&dir.path().join("missing.fa"), "out");
    assert!(result.is_err());
}
