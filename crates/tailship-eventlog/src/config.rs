//! Archival configuration

use tailship_core::RetryPolicy;

/// Attribute holding the absolute index of the first row still in the live table
pub const NUMBER_OF_FIRST_ROW_ATTR: &str = "number_of_first_row";
/// Attribute holding the absolute index below which rows are replicated
pub const ROW_TO_SAVE_ATTR: &str = "row_to_save";

/// How the archive table is laid out and how the archival steps retry
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveConfig {
    /// Appended to the event log path to name the archive table
    pub archive_suffix: String,
    pub erasure_codec: String,
    pub compression_codec: String,
    /// Target size of archive chunks in bytes
    pub desired_chunk_size: u64,
    /// Expected compressed/uncompressed size ratio of the merged data
    pub compression_ratio: f64,
    /// Backoff for the merge and truncate steps
    pub retry: RetryPolicy,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            archive_suffix: ".archive".to_string(),
            erasure_codec: "lrc_12_2_2".to_string(),
            compression_codec: "gzip_best_compression".to_string(),
            desired_chunk_size: 2 * 1024 * 1024 * 1024,
            compression_ratio: 0.137,
            retry: RetryPolicy::archival(),
        }
    }
}

impl ArchiveConfig {
    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Input bytes per merge job, never below 1
    pub fn data_size_per_job(&self) -> u64 {
        let size = self.desired_chunk_size as f64 / self.compression_ratio;
        if size.is_finite() {
            (size as u64).max(1)
        } else {
            1
        }
    }

    /// Archive table path for the event log at `table`
    pub fn archive_path(&self, table: &str) -> String {
        format!("{table}{}", self.archive_suffix)
    }
}
