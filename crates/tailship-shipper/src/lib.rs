//! # Tailship Shipper
//!
//! Ships an ordered event-log table to LogBroker and keeps the table small.
//!
//! - [`Shipper`]: the live-tailing daemon; one LogBroker session at a time,
//!   bounded in-flight chunks, `row_to_save` advanced on acknowledgement
//! - [`RowTransform`]: timestamp normalisation and field stamping applied to
//!   every shipped row
//! - [`commands::execute`]: the `run` / `init` / `truncate` / `monitor` /
//!   `archive` / `version` commands behind the `tailship` binary

pub mod commands;
pub mod config;
pub mod error;
pub mod shipper;
pub mod transform;

pub use commands::{CommandOutput, VERSION, execute};
pub use config::{Cli, Command, RunArgs, ShipperConfig};
pub use error::{ShipperError, ShipperResult};
pub use shipper::Shipper;
pub use transform::{RowTransform, normalize_timestamp};
