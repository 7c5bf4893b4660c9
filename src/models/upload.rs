use serde::{Deserialize, Serialize};

/// Declared properties of a file the client is about to upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub file_name: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumRequest {
    pub checksum_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptExecutionRequest {
    pub version: String,
    pub os: String,
    /// Falls back to the connection's most recent extraction root when absent.
    #[serde(default)]
    pub extracted_path: Option<String>,
}
