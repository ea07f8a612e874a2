//! One-shot commands and the daemon entry point

use tailship_eventlog::EventLog;
use tailship_table::TableService;
use tailship_transport::{
    AdviserResolver, ConnectionConfig, DiscoveryConfig, EndpointResolver, StaticResolver,
};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::{Command, RunArgs};
use crate::error::ShipperResult;
use crate::shipper::Shipper;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// What a command wants printed and the process exit code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Line for stdout
    pub message: Option<String>,
    pub exit_code: u8,
}

impl CommandOutput {
    fn silent() -> Self {
        Self {
            message: None,
            exit_code: 0,
        }
    }

    fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            exit_code: 0,
        }
    }
}

/// Resolver for `run`: a fixed endpoint or the adviser
pub fn resolver(args: &RunArgs) -> ShipperResult<Box<dyn EndpointResolver>> {
    Ok(match &args.endpoint {
        Some(host) => Box::new(StaticResolver::new(host)),
        None => Box::new(AdviserResolver::new(DiscoveryConfig::new(&args.adviser_url))?),
    })
}

/// Execute `command` against `log`
///
/// `connection` and `shutdown` only matter for `run`, which returns once
/// `shutdown` fires.
pub async fn execute<S: TableService>(
    command: Command,
    log: EventLog<S>,
    connection: ConnectionConfig,
    shutdown: broadcast::Receiver<()>,
) -> ShipperResult<CommandOutput> {
    match command {
        Command::Run(args) => {
            let shipper = Shipper::new(
                log,
                resolver(&args)?,
                args.session_params(),
                connection,
                args.shipper_config(),
            );
            shipper.run(shutdown).await?;
            Ok(CommandOutput::silent())
        }
        Command::Init => {
            log.initialize().await?;
            Ok(CommandOutput::silent())
        }
        Command::Truncate { count } => {
            let truncated = log.truncate(count).await?;
            info!(truncated, "Truncate finished");
            Ok(CommandOutput::silent())
        }
        Command::Monitor { threshold } => {
            let report = log.monitor(threshold).await?;
            Ok(CommandOutput {
                message: Some(report.to_string()),
                exit_code: report.status() as u8,
            })
        }
        Command::Archive { count } => {
            let archived = log.archive(count).await?;
            info!(archived, "Archive finished");
            Ok(CommandOutput::silent())
        }
        Command::Version => Ok(CommandOutput::message(format!("Version: {VERSION}"))),
    }
}
