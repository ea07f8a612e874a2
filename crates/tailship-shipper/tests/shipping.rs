//! End-to-end shipping against the loopback LogBroker and an in-memory table

use std::time::Duration;

use clap::Parser;
use serde_json::{Value, json};
use tailship_core::Row;
use tailship_eventlog::EventLog;
use tailship_shipper::{Cli, Command, Shipper, ShipperConfig, execute};
use tailship_table::InMemoryTableService;
use tailship_transport::{ConnectionConfig, MockLogBroker, SessionParams, StaticResolver};
use tokio::sync::broadcast;

const TABLE: &str = "//sys/scheduler/event_log";
const WAIT: Duration = Duration::from_secs(5);

fn events(range: std::ops::Range<u64>) -> Vec<Row> {
    range
        .map(|n| {
            json!({
                "timestamp": format!("2014-05-12T10:11:{:02}.250Z", n % 60),
                "event_type": "job_started",
                "n": n
            })
            .as_object()
            .cloned()
            .unwrap()
        })
        .collect()
}

async fn setup(rows: u64) -> InMemoryTableService {
    let service = InMemoryTableService::new();
    service.create(TABLE).await;
    service.append(TABLE, events(0..rows)).await.unwrap();
    EventLog::new(service.clone(), TABLE).initialize().await.unwrap();
    service
}

fn fast_config() -> ShipperConfig {
    ShipperConfig::default()
        .with_chunk_size(4)
        .with_ack_queue_length(2)
        .with_cluster_name("freud")
        .with_log_name("yt-scheduler-log")
        .with_poll_interval(Duration::from_millis(10))
        .with_reconnect_delay(Duration::from_millis(20))
}

fn shipper(service: &InMemoryTableService, mock: &MockLogBroker) -> Shipper<InMemoryTableService> {
    Shipper::new(
        EventLog::new(service.clone(), TABLE),
        Box::new(StaticResolver::new(mock.host())),
        SessionParams::new("yt", "test-source", "yt-scheduler-log"),
        mock.connection_config(),
        fast_config(),
    )
}

fn spawn(
    shipper: Shipper<InMemoryTableService>,
) -> (
    broadcast::Sender<()>,
    tokio::task::JoinHandle<tailship_shipper::ShipperResult<()>>,
) {
    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn(async move { shipper.run(rx).await });
    (tx, handle)
}

async fn wait_for_row_to_save(service: &InMemoryTableService, expected: u64) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let current = service.attribute(TABLE, "row_to_save").await;
        if current == Some(Value::from(expected)) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "row_to_save stuck at {current:?}, expected {expected}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn stop(
    tx: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<tailship_shipper::ShipperResult<()>>,
) {
    tx.send(()).unwrap();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("shipper did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_ships_rows_in_chunks() {
    let mock = MockLogBroker::start().await.unwrap();
    let service = setup(10).await;
    let (tx, handle) = spawn(shipper(&service, &mock));

    wait_for_row_to_save(&service, 10).await;
    let chunks = mock.received_chunks();
    let seqnos: Vec<u64> = chunks.iter().map(|c| c.header.seqno).collect();
    assert_eq!(seqnos, vec![4, 8, 10]);
    let line_counts: Vec<u64> = chunks.iter().map(|c| c.header.line_count).collect();
    assert_eq!(line_counts, vec![4, 4, 2]);

    let first = &chunks[0].rows[0];
    assert_eq!(first["timestamp"], "2014-05-12 10:11:00");
    assert_eq!(first["cluster_name"], "freud");
    assert_eq!(first["tskv_format"], "yt-scheduler-log");
    assert_eq!(first["timezone"], "+0000");
    assert_eq!(first["n"], 0);
    assert_eq!(chunks[2].rows[1]["n"], 9);

    service.append(TABLE, events(10..13)).await.unwrap();
    wait_for_row_to_save(&service, 13).await;
    assert_eq!(mock.received_chunks().last().unwrap().header.seqno, 13);

    stop(tx, handle).await;
    assert!(mock.session_requests()[0].contains("logtype=yt-scheduler-log"));
}

#[tokio::test]
async fn test_resumes_from_row_to_save() {
    let mock = MockLogBroker::start().await.unwrap();
    let service = setup(10).await;
    EventLog::new(service.clone(), TABLE)
        .set_row_to_save(6)
        .await
        .unwrap();

    let (tx, handle) = spawn(shipper(&service, &mock));
    wait_for_row_to_save(&service, 10).await;

    let chunks = mock.received_chunks();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].header.seqno, 10);
    assert_eq!(chunks[0].rows[0]["n"], 6);
    stop(tx, handle).await;
}

#[tokio::test]
async fn test_session_seqno_skips_delivered_rows() {
    let mock = MockLogBroker::start().await.unwrap();
    mock.set_initial_seqno(8);
    let service = setup(10).await;

    let (tx, handle) = spawn(shipper(&service, &mock));
    wait_for_row_to_save(&service, 10).await;

    let chunks = mock.received_chunks();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].header.seqno, 10);
    assert_eq!(chunks[0].rows.len(), 2);
    assert_eq!(chunks[0].rows[0]["n"], 8);
    stop(tx, handle).await;
}

#[tokio::test]
async fn test_reconnects_after_dropped_session() {
    let mock = MockLogBroker::start().await.unwrap();
    let service = setup(10).await;
    let (tx, handle) = spawn(shipper(&service, &mock));
    wait_for_row_to_save(&service, 10).await;

    assert!(mock.drop_session());
    wait_until(|| mock.session_count() >= 2).await;

    service.append(TABLE, events(10..12)).await.unwrap();
    wait_for_row_to_save(&service, 12).await;
    assert_eq!(mock.received_chunks().last().unwrap().header.seqno, 12);
    stop(tx, handle).await;
}

#[tokio::test]
async fn test_unacknowledged_chunk_is_shipped_again() {
    let mock = MockLogBroker::start().await.unwrap();
    mock.set_auto_ack(false);
    let service = setup(4).await;
    let (tx, handle) = spawn(shipper(&service, &mock));

    mock.wait_for_chunks(1, WAIT).await;
    assert_eq!(
        service.attribute(TABLE, "row_to_save").await,
        Some(Value::from(0u64))
    );

    mock.set_auto_ack(true);
    assert!(mock.drop_session());
    wait_for_row_to_save(&service, 4).await;

    let seqnos: Vec<u64> = mock
        .received_chunks()
        .iter()
        .map(|c| c.header.seqno)
        .collect();
    assert_eq!(seqnos, vec![4, 4]);
    stop(tx, handle).await;
}

#[tokio::test]
async fn test_run_command_ships_to_endpoint() {
    let mock = MockLogBroker::start().await.unwrap();
    let service = setup(3).await;
    let host = mock.host();
    let cli = Cli::try_parse_from([
        "tailship",
        "run",
        "--endpoint",
        host.as_str(),
        "--cluster-name",
        "freud",
    ])
    .unwrap();

    let (tx, rx) = broadcast::channel(1);
    let log = EventLog::new(service.clone(), TABLE);
    let connection = mock.connection_config();
    let handle = tokio::spawn(execute(cli.command, log, connection, rx));

    wait_for_row_to_save(&service, 3).await;
    assert_eq!(mock.received_chunks()[0].header.line_count, 3);

    tx.send(()).unwrap();
    let output = tokio::time::timeout(WAIT, handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(output.exit_code, 0);
    assert!(output.message.is_none());
}

#[tokio::test]
async fn test_one_shot_commands() {
    let service = setup(10).await;
    let run = |args: &[&str]| {
        let cli = Cli::try_parse_from(std::iter::once("tailship").chain(args.iter().copied()))
            .unwrap();
        let log = EventLog::new(service.clone(), cli.table.clone());
        let (_tx, rx) = broadcast::channel(1);
        execute(cli.command, log, ConnectionConfig::default(), rx)
    };

    let output = run(&["monitor", "--threshold", "5"]).await.unwrap();
    assert_eq!(output.message.as_deref(), Some("2; Lag equals to: 10"));
    assert_eq!(output.exit_code, 2);

    EventLog::new(service.clone(), TABLE)
        .set_row_to_save(8)
        .await
        .unwrap();
    let output = run(&["monitor", "--threshold", "5"]).await.unwrap();
    assert_eq!(output.message.as_deref(), Some("0; Lag equals to: 2"));
    assert_eq!(output.exit_code, 0);

    run(&["truncate", "--count", "3"]).await.unwrap();
    assert_eq!(
        service.attribute(TABLE, "number_of_first_row").await,
        Some(Value::from(3u64))
    );

    run(&["archive"]).await.unwrap();
    assert_eq!(
        service.row_count(&format!("{TABLE}.archive")).await.unwrap(),
        5
    );
    assert_eq!(service.row_count(TABLE).await.unwrap(), 2);

    let output = run(&["version"]).await.unwrap();
    assert!(output.message.unwrap().starts_with("Version: "));

    assert!(matches!(
        Cli::try_parse_from(["tailship", "init"]).unwrap().command,
        Command::Init
    ));
    run(&["init"]).await.unwrap();
    assert_eq!(
        service.attribute(TABLE, "row_to_save").await,
        Some(Value::from(8u64))
    );
}
