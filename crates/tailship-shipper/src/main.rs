use std::process::ExitCode;

use clap::Parser;
use tailship_eventlog::EventLog;
use tailship_logging::TailshipSubscriberBuilder;
use tailship_shipper::{Cli, Command, VERSION, execute};
use tailship_table::InMemoryTableService;
use tailship_transport::ConnectionConfig;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    if matches!(cli.command, Command::Version) {
        println!("Version: {VERSION}");
        return Ok(ExitCode::SUCCESS);
    }

    cli.ensure_dry_run()?;

    let _guard = TailshipSubscriberBuilder::new()
        .with_config(cli.log_config())
        .init();
    debug!(version = VERSION, "Started");

    eprintln!(
        "Warning: dry run on an empty in-memory table; {} is not read or modified",
        cli.table
    );
    warn!(table = %cli.table, "Dry run on an in-memory table");
    let service = InMemoryTableService::new();
    service.create(&cli.table).await;
    let log = EventLog::new(service, cli.table.clone());
    log.initialize().await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            let _ = shutdown_tx.send(());
        }
    });

    match execute(cli.command, log, ConnectionConfig::default(), shutdown_rx).await {
        Ok(output) => {
            if let Some(message) = output.message {
                println!("{message}");
            }
            debug!("Exited");
            Ok(ExitCode::from(output.exit_code))
        }
        Err(e) => {
            error!(error = %e, "Unhandled error");
            Err(e.into())
        }
    }
}
