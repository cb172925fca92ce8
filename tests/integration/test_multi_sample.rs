//! Multi-sample collapse scenarios with per-sample details.

use bioseqzip_lib::{tracker, Collapser, OutputFormat};
use tempfile::TempDir;

use crate::helpers::{details_records, tag_records, write_file};

#[test]
fn test_three_samples_with_details() {
    let dir = TempDir::new().unwrap();
    let samples_dir = dir.path().join("samples");
    std::fs::create_dir(&samples_dir).unwrap();
    write_file(&samples_dir, "A.fasta", ">r1\nAAA\n>r2\nAAA\n");
    write_file(&samples_dir, "B.fasta", ">r1\nAAA\n>r2\nCCC\n");
    write_file(&samples_dir, "C.fasta", ">r1\nCCC\n>r2\nCCC\n>r3\nCCC\n");
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let samples = tracker::track_single_samples(&samples_dir, &["fasta"]).unwrap();
    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .multi_single_end(&samples, "out")
        .unwrap();

    let records = tag_records(&results.collapsed_paths[0].0);
    assert_eq!(records, vec![("AAA".to_string(), 3), ("CCC".to_string(), 4)]);

    let (header, rows) = details_records(&results.details_paths[0]);
    assert_eq!(header, vec!["Overall", "A", "B", "C"]);
    assert_eq!(rows, vec![vec![3, 2, 1, 0], vec![4, 0, 1, 3]]);

    // Per-sample rows plus one aggregate row.
    assert_eq!(results.statistics.len(), 4);
    let aggregate = results.statistics.last().unwrap();
    assert_eq!(aggregate.raw_sequences, 7);
    assert_eq!(aggregate.collapsed_sequences, 2);

    // Per-sample temporaries are removed once merged.
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 2);
}

#[test]
fn test_details_coherence_on_random_samples() {
    let dir = TempDir::new().unwrap();
    let samples_dir = dir.path().join("samples");
    std::fs::create_dir(&samples_dir).unwrap();
    let pool = ["AACC", "GGTT", "ACGT", "TTTT", "CCCC"];
    let mut expected_total = 0u32;
    for i in 0..4 {
        let mut content = String::new();
        for (j, seq) in pool.iter().enumerate() {
            // Sample i holds seq j exactly (i + j) % 3 times.
            for k in 0..(i + j) % 3 {
                content.push_str(&format!(">r{j}_{k}\n{seq}\n"));
                expected_total += 1;
            }
        }
        write_file(&samples_dir, &format!("s{i}.fasta"), &content);
    }
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let samples = tracker::track_single_samples(&samples_dir, &["fasta"]).unwrap();
    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .multi_single_end(&samples, "out")
        .unwrap();

    let records = tag_records(&results.collapsed_paths[0].0);
    let (header, rows) = details_records(&results.details_paths[0]);
    assert_eq!(header.len(), 5);
    assert_eq!(records.len(), rows.len());

    let mut seen_total = 0;
    for ((_, count), row) in records.iter().zip(&rows) {
        // Each record's count equals its overall, which equals the row sum.
        let overall = row[0];
        let row_sum: u32 = row[1..].iter().sum();
        assert_eq!(*count, overall);
        assert_eq!(overall, row_sum);
        seen_total += overall;
    }
    assert_eq!(seen_total, expected_total);
}

#[test]
fn test_multi_sample_sharding_mirrors_details() {
    let dir = TempDir::new().unwrap();
    let samples_dir = dir.path().join("samples");
    std::fs::create_dir(&samples_dir).unwrap();
    write_file(&samples_dir, "a.fasta", ">1\nAAAA\n>2\nCCCC\n>3\nGGGG\n");
    write_file(&samples_dir, "b.fasta", ">1\nTTTT\n>2\nACGT\n");
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let samples = tracker::track_single_samples(&samples_dir, &["fasta"]).unwrap();
    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .max_output_records(2)
        .multi_single_end(&samples, "out")
        .unwrap();

    assert_eq!(results.collapsed_paths.len(), 3);
    assert_eq!(results.details_paths.len(), 3);
    for (i, ((seq_path, _), details_path)) in
        results.collapsed_paths.iter().zip(&results.details_paths).enumerate()
    {
        let records = tag_records(seq_path);
        let (_, rows) = details_records(details_path);
        assert_eq!(records.len(), rows.len(), "shard {i} out of step with its details shard");
    }
}

#[test]
fn test_paired_samples_from_manifest() {
    let dir = TempDir::new().unwrap();
    let a1 = write_file(dir.path(), "a_1.fasta", ">r\nAC\n>s\nAC\n");
    let a2 = write_file(dir.path(), "a_2.fasta", ">r\nGT\n>s\nGT\n");
    let b1 = write_file(dir.path(), "b_1.fasta", ">r\nAC\n");
    let b2 = write_file(dir.path(), "b_2.fasta", ">r\nGT\n");
    let manifest = write_file(
        dir.path(),
        "samples.csv",
        &format!(
            "{},{}\n{},{}\n",
            a1.display(),
            a2.display(),
            b1.display(),
            b2.display()
        ),
    );
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let (samples, paired) = tracker::track_manifest(&manifest).unwrap();
    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .multi_paired_end(&samples, &paired, "out")
        .unwrap();

    let (path1, path2) = &results.collapsed_paths[0];
    assert_eq!(tag_records(path1), vec![("AC".to_string(), 3)]);
    assert_eq!(tag_records(path2.as_ref().unwrap()), vec![("GT".to_string(), 3)]);

    let (header, rows) = details_records(&results.details_paths[0]);
    assert_eq!(header, vec!["Overall", "a_1", "b_1"]);
    assert_eq!(rows, vec![vec![3, 2, 1]]);
}

#[test]
fn test_empty_sample_keeps_its_details_column() {
    let dir = TempDir::new().unwrap();
    let samples_dir = dir.path().join("samples");
    std::fs::create_dir(&samples_dir).unwrap();
    write_file(&samples_dir, "a.fasta", ">r\nACGT\n");
    write_file(&samples_dir, "b.fasta", "");
    write_file(&samples_dir, "c.fasta", ">r\nACGT\n");
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let samples = tracker::track_single_samples(&samples_dir, &["fasta"]).unwrap();
    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .multi_single_end(&samples, "out")
        .unwrap();

    let (header, rows) = details_records(&results.details_paths[0]);
    assert_eq!(header, vec!["Overall", "a", "b", "c"]);
    assert_eq!(rows, vec![vec![2, 1, 0, 1]]);
}

/// More samples than the cross-sample fanout: the merge seeds details in
/// groups and joins the group temporaries in a final tier.
#[test]
fn test_sample_count_above_fanout_takes_tiered_path() {
    let dir = TempDir::new().unwrap();
    let samples_dir = dir.path().join("samples");
    std::fs::create_dir(&samples_dir).unwrap();
    let n_samples = 65;
    for i in 0..n_samples {
        let mut content = String::from(">r\nAAAA\n");
        if i == 0 {
            content.push_str(">s\nCCCC\n");
        }
        write_file(&samples_dir, &format!("s{i:02}.fasta"), &content);
    }
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let samples = tracker::track_single_samples(&samples_dir, &["fasta"]).unwrap();
    assert_eq!(samples.len(), n_samples);
    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .multi_single_end(&samples, "out")
        .unwrap();

    let records = tag_records(&results.collapsed_paths[0].0);
    assert_eq!(records, vec![("AAAA".to_string(), 65), ("CCCC".to_string(), 1)]);

    let (header, rows) = details_records(&results.details_paths[0]);
    assert_eq!(header.len(), n_samples + 1);
    assert_eq!(header[1], "s00");
    assert_eq!(header[n_samples], "s64");
    assert_eq!(rows.len(), 2);

    // AAAA: one occurrence in every sample; CCCC: only in the first.
    assert_eq!(rows[0][0], 65);
    assert!(rows[0][1..].iter().all(|&c| c == 1));
    assert_eq!(rows[1][0], 1);
    assert_eq!(rows[1][1], 1);
    assert!(rows[1][2..].iter().all(|&c| c == 0));

    let aggregate = results.statistics.last().unwrap();
    assert_eq!(aggregate.raw_sequences, 66);
    assert_eq!(aggregate.collapsed_sequences, 2);

    // Per-sample, group, and tier temporaries are all cleaned up.
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 2);
}

#[test]
fn test_no_samples_is_config_error() {
    let dir = TempDir::new().unwrap();
    let result = Collapser::new(dir.path(), dir.path()).multi_single_end(&[], "out");
    assert!(result.is_err());
}

/// Details column order must follow the declared sample order even when the
/// collapse runs per-sample in a different shape (regression guard for the
/// tiered merge path shared with large sample counts).
#[test]
fn test_details_columns_follow_sample_order() {
    let dir = TempDir::new().unwrap();
    let samples_dir = dir.path().join("samples");
    std::fs::create_dir(&samples_dir).unwrap();
    for (name, seq, copies) in
        [("s0", "AAAA", 1), ("s1", "AAAA", 2), ("s2", "AAAA", 3), ("s3", "AAAA", 4)]
    {
        let mut content = String::new();
        for k in 0..copies {
            content.push_str(&format!(">r{k}\n{seq}\n"));
        }
        write_file(&samples_dir, &format!("{name}.fasta"), &content);
    }
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let samples = tracker::track_single_samples(&samples_dir, &["fasta"]).unwrap();
    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .multi_single_end(&samples, "out")
        .unwrap();

    let (header, rows) = details_records(&results.details_paths[0]);
    assert_eq!(header, vec!["Overall", "s0", "s1", "s2", "s3"]);
    assert_eq!(rows, vec![vec![10, 1, 2, 3, 4]]);
}

#[test]
fn test_track_paired_directories() {
    let dir = TempDir::new().unwrap();
    let dir1 = dir.path().join("r1");
    let dir2 = dir.path().join("r2");
    std::fs::create_dir_all(&dir1).unwrap();
    std::fs::create_dir_all(&dir2).unwrap();
    write_file(&dir1, "a.fasta", ">r\nAC\n");
    write_file(&dir2, "a.fasta", ">r\nGT\n");
    write_file(&dir1, "only_mate1.fasta", ">r\nTT\n");
    let out = dir.path().join("out");
    std::fs::create_dir(&out).unwrap();

    let (samples, paired) = tracker::track_paired_samples(&dir1, &dir2, &["fasta"]).unwrap();
    assert_eq!(samples.len(), 1);

    let results = Collapser::new(&out, &out)
        .output_format(OutputFormat::Tag)
        .multi_paired_end(&samples, &paired, "out")
        .unwrap();
    assert_eq!(tag_records(&results.collapsed_paths[0].0), vec![("AC".to_string(), 1)]);
}
