//! Archival workflow against the in-memory table service
//!
//! Archival backs off in seconds, so these tests run on a paused clock.

use std::time::Duration;

use serde_json::{Value, json};
use tailship_core::{RetryPolicy, Row};
use tailship_eventlog::{ArchiveConfig, EventLog, EventLogError};
use tailship_table::InMemoryTableService;

const TABLE: &str = "//sys/scheduler/event_log";
const ARCHIVE: &str = "//sys/scheduler/event_log.archive";

fn rows(range: std::ops::Range<u64>) -> Vec<Row> {
    range
        .map(|i| json!({ "event_type": "job_started", "n": i }).as_object().cloned().unwrap())
        .collect()
}

async fn setup(count: u64, row_to_save: u64) -> (InMemoryTableService, EventLog<InMemoryTableService>) {
    let service = InMemoryTableService::new();
    service.create(TABLE).await;
    service.append(TABLE, rows(0..count)).await.unwrap();
    let log = EventLog::new(service.clone(), TABLE);
    log.initialize().await.unwrap();
    log.set_row_to_save(row_to_save).await.unwrap();
    (service, log)
}

#[tokio::test(start_paused = true)]
async fn test_archive_moves_replicated_rows() {
    let (service, log) = setup(10, 10).await;

    assert_eq!(log.archive(None).await.unwrap(), 10);

    assert_eq!(service.row_count(TABLE).await.unwrap(), 0);
    assert_eq!(service.rows(ARCHIVE).await.unwrap(), rows(0..10));
    assert_eq!(service.attribute(TABLE, "number_of_first_row").await, Some(Value::from(10u64)));
    assert_eq!(service.attribute(TABLE, "row_to_save").await, Some(Value::from(10u64)));
    assert_eq!(service.attribute(ARCHIVE, "erasure_codec").await, Some(json!("lrc_12_2_2")));
    assert_eq!(
        service.attribute(ARCHIVE, "compression_codec").await,
        Some(json!("gzip_best_compression"))
    );

    assert_eq!(log.get_data(0, 10).await.unwrap(), rows(0..10));
    assert_eq!(log.end_row().await.unwrap(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_archive_clamps_to_row_to_save() {
    let (service, log) = setup(10, 6).await;

    assert_eq!(log.archive(Some(8)).await.unwrap(), 6);
    assert_eq!(service.row_count(ARCHIVE).await.unwrap(), 6);
    assert_eq!(service.row_count(TABLE).await.unwrap(), 4);

    let offsets = log.offsets().await.unwrap();
    assert_eq!(offsets.first_row, 6);
    assert!(offsets.is_consistent());
    assert_eq!(log.archive(None).await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_get_data_spans_archive_and_live_table() {
    let (_service, log) = setup(10, 6).await;
    log.archive(Some(4)).await.unwrap();

    assert_eq!(log.get_data(2, 6).await.unwrap(), rows(2..8));
    assert_eq!(log.get_data(0, 3).await.unwrap(), rows(0..3));
    assert_eq!(log.get_data(4, 6).await.unwrap(), rows(4..10));
    assert!(matches!(
        log.get_data(6, 5).await,
        Err(EventLogError::NotEnoughData {
            requested: 5,
            got: 4
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_archival_appends_in_order() {
    let (service, log) = setup(4, 4).await;
    log.archive(None).await.unwrap();

    service.append(TABLE, rows(4..9)).await.unwrap();
    log.set_row_to_save(9).await.unwrap();
    assert_eq!(log.archive(None).await.unwrap(), 5);

    assert_eq!(service.rows(ARCHIVE).await.unwrap(), rows(0..9));
    assert_eq!(log.get_data(1, 7).await.unwrap(), rows(1..8));
}

#[tokio::test(start_paused = true)]
async fn test_archive_survives_failed_attempts() {
    let (service, log) = setup(10, 10).await;
    service.faults().fail_next_merges(2);
    service.faults().fail_next_commits(1);

    let started = tokio::time::Instant::now();
    assert_eq!(log.archive(None).await.unwrap(), 10);

    assert_eq!(service.row_count(ARCHIVE).await.unwrap(), 10);
    assert_eq!(service.rows(ARCHIVE).await.unwrap(), rows(0..10));
    assert_eq!(service.row_count(TABLE).await.unwrap(), 0);
    assert_eq!(log.offsets().await.unwrap().first_row, 10);
    // Three failures back off 5s, 10s and 20s
    assert!(started.elapsed() >= Duration::from_secs(35));
}

#[tokio::test(start_paused = true)]
async fn test_truncate_step_is_retried_alone() {
    let (service, log) = setup(10, 6).await;
    service.faults().fail_next_erase_commits(2);

    let started = tokio::time::Instant::now();
    assert_eq!(log.archive(None).await.unwrap(), 6);

    // The merge committed once; only the truncation was repeated
    assert_eq!(service.rows(ARCHIVE).await.unwrap(), rows(0..6));
    assert_eq!(service.rows(TABLE).await.unwrap(), rows(6..10));
    assert_eq!(
        service.attribute(TABLE, "number_of_first_row").await,
        Some(Value::from(6u64))
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(15), "backed off only {elapsed:?}");
    assert!(elapsed < Duration::from_secs(20), "backed off {elapsed:?}");

    assert_eq!(log.get_data(4, 4).await.unwrap(), rows(4..8));
}

#[tokio::test(start_paused = true)]
async fn test_truncate_retry_rereads_first_row() {
    let (service, log) = setup(10, 10).await;
    service.faults().fail_next_erase_commits(1);

    let archiver = tokio::spawn(async move { log.archive(Some(3)).await });

    // Runs while the archiver backs off after its failed truncation
    tokio::time::sleep(Duration::from_secs(1)).await;
    let operator = EventLog::new(service.clone(), TABLE);
    assert_eq!(operator.truncate(1).await.unwrap(), 1);

    assert_eq!(archiver.await.unwrap().unwrap(), 3);

    let offsets = operator.offsets().await.unwrap();
    assert_eq!(offsets.first_row, 4);
    assert_eq!(offsets.end_row(), 10);
    assert!(offsets.is_consistent());
    assert_eq!(service.rows(ARCHIVE).await.unwrap(), rows(0..3));
    assert_eq!(service.rows(TABLE).await.unwrap(), rows(4..10));
}

#[tokio::test(start_paused = true)]
async fn test_failed_commits_are_retried() {
    let (service, log) = setup(6, 6).await;
    let config = ArchiveConfig::default().with_retry(
        RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(10)),
    );
    let log = EventLog::with_config(service.clone(), log.table(), config);

    // Discarded merges leave no rows behind
    service.faults().fail_next_commits(3);
    assert_eq!(log.archive(None).await.unwrap(), 6);

    assert_eq!(service.row_count(ARCHIVE).await.unwrap(), 6);
    assert_eq!(service.row_count(TABLE).await.unwrap(), 0);
    assert_eq!(log.offsets().await.unwrap().first_row, 6);
}

#[tokio::test(start_paused = true)]
async fn test_offsets_stay_consistent() {
    let (service, log) = setup(20, 0).await;

    for step in 1..=5u64 {
        log.set_row_to_save(step * 3).await.unwrap();
        log.truncate(1).await.unwrap();
        log.archive(Some(2)).await.unwrap();
        service.append(TABLE, rows(0..2)).await.unwrap();

        let offsets = log.offsets().await.unwrap();
        assert!(offsets.is_consistent(), "inconsistent after step {step}: {offsets:?}");
        assert_eq!(offsets.end_row(), 20 + 2 * step);
    }

    let offsets = log.offsets().await.unwrap();
    assert_eq!(offsets.row_to_save, 15);
    assert_eq!(offsets.first_row, 15);
}
