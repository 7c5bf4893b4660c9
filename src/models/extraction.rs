use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Live progress of one extraction, shared between the extracting thread and status queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionProgress {
    pub current_file: String,
    pub processed_entries: u64,
    pub total_entries: u64,
    pub processed_bytes: u64,
    pub total_bytes: u64,
    pub percent_complete: f64,
}

impl ExtractionProgress {
    pub fn record_entry(&mut self, name: &str, size: u64) {
        self.current_file = name.to_string();
        self.processed_entries += 1;
        self.processed_bytes += size;
        self.percent_complete = if self.total_entries > 0 {
            self.processed_entries as f64 * 100.0 / self.total_entries as f64
        } else {
            0.0
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFile {
    pub file_name: String,
    pub relative_path: String,
    pub full_path: String,
    pub size: u64,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub success: bool,
    pub extraction_path: String,
    pub files: Vec<ExtractedFile>,
    pub file_count: usize,
    pub total_size: u64,
    pub error_message: Option<String>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    pub archive_type: String,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub entry_count: u64,
    pub is_password_protected: bool,
    pub file_list: Vec<String>,
}

/// Serializes a `Duration` as fractional seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_follows_entries() {
        let mut progress = ExtractionProgress {
            total_entries: 4,
            ..Default::default()
        };
        progress.record_entry("a.txt", 10);
        assert_eq!(progress.current_file, "a.txt");
        assert_eq!(progress.processed_bytes, 10);
        assert_eq!(progress.percent_complete, 25.0);
    }

    #[test]
    fn percent_is_zero_without_denominator() {
        let mut progress = ExtractionProgress::default();
        progress.record_entry("a.txt", 1);
        assert_eq!(progress.percent_complete, 0.0);
    }
}
