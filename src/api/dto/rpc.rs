use crate::models::{ChecksumRequest, ScriptExecutionRequest, UploadMetadata};
use serde::Deserialize;

/// A client call arriving as `{"method": ..., "params": ...}` on the hub socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum ClientRequest {
    SendMessage(String),
    StartUpload(UploadMetadata),
    SetEncryptionKey(String),
    UploadChunk(Vec<u8>),
    EndUpload(ChecksumRequest),
    GetArchiveInfo(String),
    GetExtractionProgress,
    StartScriptExecution(ScriptExecutionRequest),
    CancelExecution(String),
    GetExecutionStatus(String),
    GetConnectionStatus,
}
