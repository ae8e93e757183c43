//! End-to-end runs of the dispatch scheduler against mock encoders.
//!
//! These tests cover:
//! - saturation: never more than W jobs in flight, exactly W issued up front
//! - each container issued and completed exactly once
//! - deduplicated merges across containers
//! - retry-once and per-container failure isolation

mod common;

use common::{DIMENSION, context, paper, vector_for, write_container};
use rxiv_ingest::ingest::{DispatchEvent, IngestOptions, Scheduler};
use rxiv_ingest::storage::VectorIndex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tempfile::tempdir;
use tracing_test::traced_test;

fn five_containers(dir: &std::path::Path) -> Vec<PathBuf> {
    (0..5)
        .map(|i| {
            let ids = [format!("2401.{:05}", i * 10), format!("2401.{:05}", i * 10 + 1)];
            write_container(
                dir,
                &format!("2401-{i}.xml"),
                &[
                    paper(&ids[0], &["2024-01-02"], &format!("Abstract number {i} alpha")),
                    paper(&ids[1], &["2024-01-03"], &format!("Abstract number {i} beta")),
                ],
            )
        })
        .collect()
}

#[tokio::test]
async fn test_two_devices_five_containers() {
    let temp_dir = tempdir().unwrap();
    let containers = five_containers(temp_dir.path());
    let ctx = context(2, IngestOptions::default());
    let mut index = VectorIndex::with_dimension(DIMENSION);

    let report = Scheduler::new(&ctx, &mut index, Vec::new())
        .run(containers)
        .await
        .unwrap();

    // Exactly W issued before anything completes
    assert!(matches!(report.timeline[0], DispatchEvent::Issued { .. }));
    assert!(matches!(report.timeline[1], DispatchEvent::Issued { .. }));
    assert!(matches!(report.timeline[2], DispatchEvent::Completed { .. }));

    // Every later issue follows a completion, and no device is double-booked
    let mut busy: HashSet<usize> = HashSet::new();
    let mut issued: HashMap<String, usize> = HashMap::new();
    let mut completed: HashMap<String, usize> = HashMap::new();
    for event in &report.timeline {
        match event {
            DispatchEvent::Issued { container, device } => {
                assert!(busy.len() < 2, "more than W jobs in flight");
                assert!(busy.insert(*device), "device {device} issued twice");
                *issued.entry(container.clone()).or_default() += 1;
            }
            DispatchEvent::Completed { container, device } => {
                assert!(busy.remove(device));
                *completed.entry(container.clone()).or_default() += 1;
            }
        }
    }
    assert!(busy.is_empty());
    assert_eq!(issued.len(), 5);
    assert!(issued.values().all(|&n| n == 1));
    assert_eq!(issued, completed);

    assert_eq!(report.max_in_flight, 2);
    assert_eq!(report.completed.len(), 5);
    assert!(report.failed.is_empty());
    assert_eq!(report.records_extracted, 10);
    assert_eq!(report.units_inserted, 10);
    assert_eq!(index.len(), 10);
}

#[tokio::test]
async fn test_never_exceeds_pool_size() {
    let temp_dir = tempdir().unwrap();
    let containers: Vec<PathBuf> = (0..12)
        .map(|i| {
            let id = format!("2402.{i:05}");
            write_container(
                temp_dir.path(),
                &format!("c{i:02}.xml"),
                &[paper(&id, &["2024-02-01"], &format!("Text of paper {i}"))],
            )
        })
        .collect();

    for workers in [1, 3] {
        let ctx = context(workers, IngestOptions::default());
        let mut index = VectorIndex::new();
        let report = Scheduler::new(&ctx, &mut index, Vec::new())
            .run(containers.clone())
            .await
            .unwrap();

        assert_eq!(report.completed.len(), 12);
        assert_eq!(report.max_in_flight, workers);
        assert_eq!(index.len(), 12);
        assert_eq!(ctx.devices().available(), workers);
    }
}

#[tokio::test]
#[traced_test]
async fn test_duplicate_id_across_containers() {
    let temp_dir = tempdir().unwrap();
    let first = write_container(
        temp_dir.path(),
        "a.xml",
        &[paper("0704.0001", &["2007-04-02"], "Original abstract")],
    );
    let second = write_container(
        temp_dir.path(),
        "b.xml",
        &[
            paper("0704.0001", &["2007-04-02"], "Replacement abstract"),
            paper("0704.0002", &["2007-04-03"], "Another abstract"),
        ],
    );

    // A single worker makes the merge order deterministic.
    let ctx = context(1, IngestOptions::default());
    let mut index = VectorIndex::new();
    let report = Scheduler::new(&ctx, &mut index, Vec::new())
        .run(vec![first, second])
        .await
        .unwrap();

    assert_eq!(report.duplicates_skipped, 1);
    assert_eq!(report.units_inserted, 2);
    assert_eq!(index.len(), 2);
    assert_eq!(index.get("0704.0001v1").unwrap().text, "Original abstract");
    assert_eq!(index.vector(0), Some(vector_for("Original abstract").as_slice()));
    assert!(logs_contain("Found overlapping ids, skipping addition of 1 records"));
}

#[tokio::test]
#[traced_test]
async fn test_revisions_in_separate_containers_are_distinct() {
    let temp_dir = tempdir().unwrap();
    let first = write_container(
        temp_dir.path(),
        "2011-05.xml",
        &[paper("1105.0042", &["2011-05-01"], "First version")],
    );
    let second = write_container(
        temp_dir.path(),
        "2011-09.xml",
        &[paper("1105.0042", &["2011-05-01", "2011-09-14T10:00:00Z"], "Second version")],
    );

    let ctx = context(1, IngestOptions::default());
    let mut index = VectorIndex::new();
    let report = Scheduler::new(&ctx, &mut index, Vec::new())
        .run(vec![first, second])
        .await
        .unwrap();

    assert_eq!(report.completed, vec!["2011-05.xml", "2011-09.xml"]);
    assert_eq!(report.duplicates_skipped, 0);
    assert!(!logs_contain("Found overlapping ids"));
    assert_eq!(index.get("1105.0042v1").unwrap().text, "First version");
    let second = index.get("1105.0042v2").unwrap();
    assert_eq!(second.text, "Second version");
    assert_eq!(second.metadata["month"], "09");
    assert_eq!(second.metadata["day"], "14");
}

#[tokio::test]
async fn test_failures_are_retried_once_then_isolated() {
    let temp_dir = tempdir().unwrap();
    let containers = vec![
        write_container(temp_dir.path(), "1-good.xml", &[paper("2403.00001", &["2024-03-01"], "Solid result")]),
        write_container(temp_dir.path(), "2-bad.xml", &[paper("2403.00002", &["2024-03-01"], "A poison abstract")]),
        write_container(temp_dir.path(), "3-flaky.xml", &[paper("2403.00003", &["2024-03-01"], "A flaky abstract")]),
        write_container(temp_dir.path(), "4-good.xml", &[paper("2403.00004", &["2024-03-01"], "Another result")]),
    ];

    let ctx = context(2, IngestOptions::default());
    let mut index = VectorIndex::new();
    let report = Scheduler::new(&ctx, &mut index, Vec::new())
        .run(containers)
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    let failed = &report.failed[0];
    assert_eq!(failed.container, "2-bad.xml");
    assert_eq!(failed.attempts, 2);
    assert!(failed.cause.contains("out of memory"));

    let mut completed = report.completed.clone();
    completed.sort();
    assert_eq!(completed, vec!["1-good.xml", "3-flaky.xml", "4-good.xml"]);
    assert_eq!(index.len(), 3);
    assert!(index.contains("2403.00003v1"));
    assert!(!index.contains("2403.00002v1"));

    let issues = report
        .timeline
        .iter()
        .filter(|e| matches!(e, DispatchEvent::Issued { .. }))
        .count();
    assert_eq!(issues, 6);
}

#[tokio::test]
async fn test_panicking_job_frees_its_device() {
    let temp_dir = tempdir().unwrap();
    let containers = vec![
        write_container(temp_dir.path(), "a.xml", &[paper("2404.00001", &["2024-04-01"], "Fine")]),
        write_container(temp_dir.path(), "b.xml", &[paper("2404.00002", &["2024-04-01"], "This will panic")]),
        write_container(temp_dir.path(), "c.xml", &[paper("2404.00003", &["2024-04-01"], "Also fine")]),
    ];

    let ctx = context(1, IngestOptions::default());
    let mut index = VectorIndex::new();
    let report = Scheduler::new(&ctx, &mut index, Vec::new())
        .run(containers)
        .await
        .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].container, "b.xml");
    assert_eq!(report.completed.len(), 2);
    assert_eq!(ctx.devices().available(), 1);
}

#[tokio::test]
async fn test_malformed_records_are_counted_not_fatal() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("mixed.xml");
    std::fs::write(
        &path,
        r#"<OAI-PMH><ListRecords>
  <record>
    <header><identifier>oai:arXiv.org:2405.00001</identifier></header>
    <metadata><dc><title>Kept</title><creator>A</creator><description>Kept abstract</description></dc></metadata>
  </record>
  <record>
    <header><identifier>oai:arXiv.org:2405.00002</identifier></header>
    <metadata><dc><title>No authors</title><description>Dropped</description></dc></metadata>
  </record>
  <record>
    <header status="deleted"><identifier>oai:arXiv.org:2405.00003</identifier></header>
  </record>
</ListRecords></OAI-PMH>"#,
    )
    .unwrap();

    let ctx = context(1, IngestOptions::default());
    let mut index = VectorIndex::new();
    let report = Scheduler::new(&ctx, &mut index, Vec::new())
        .run(vec![path])
        .await
        .unwrap();

    assert_eq!(report.records_extracted, 1);
    assert_eq!(report.records_skipped, 2);
    assert!(index.contains("2405.00001v0"));
    assert_eq!(index.get("2405.00001v0").unwrap().metadata["year"], serde_json::Value::Null);
}
