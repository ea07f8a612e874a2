//! Row preparation before shipping

use chrono::NaiveDateTime;
use serde_json::Value;
use tailship_core::Row;

use crate::error::{ShipperError, ShipperResult};

const INPUT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const OUTPUT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Timezone stamped on every row; event log timestamps are UTC
pub const TIMEZONE: &str = "+0000";

/// Rewrites event log rows into the shape LogBroker consumers expect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTransform {
    cluster_name: String,
    log_name: String,
    strip_error: bool,
}

impl RowTransform {
    pub fn new(cluster_name: impl Into<String>, log_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            log_name: log_name.into(),
            strip_error: false,
        }
    }

    /// Drop the `error` field from shipped rows
    pub fn with_strip_error(mut self, strip: bool) -> Self {
        self.strip_error = strip;
        self
    }

    /// Normalize `timestamp` and stamp the cluster, format and timezone fields
    pub fn apply(&self, mut row: Row) -> ShipperResult<Row> {
        let timestamp = row
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| ShipperError::transform("row has no string timestamp"))?;
        let timestamp = normalize_timestamp(timestamp)?;

        row.insert("timestamp".into(), Value::String(timestamp));
        row.insert("cluster_name".into(), Value::String(self.cluster_name.clone()));
        row.insert("tskv_format".into(), Value::String(self.log_name.clone()));
        row.insert("timezone".into(), Value::String(TIMEZONE.to_string()));
        if self.strip_error {
            row.remove("error");
        }
        Ok(row)
    }
}

/// `2014-05-12T10:11:12.123456Z` becomes `2014-05-12 10:11:12`
///
/// Fractional seconds and a trailing `Z` are dropped.
pub fn normalize_timestamp(raw: &str) -> ShipperResult<String> {
    let whole = raw.split('.').next().unwrap_or(raw).trim_end_matches('Z');
    let parsed = NaiveDateTime::parse_from_str(whole, INPUT_FORMAT)
        .map_err(|e| ShipperError::transform(format!("bad timestamp {raw:?}: {e}")))?;
    Ok(parsed.format(OUTPUT_FORMAT).to_string())
}
