use super::extraction::{ArchiveInfo, ExtractionProgress};
use super::script::ScriptPhase;
use super::execution::ExecutionStatus;
use serde::Serialize;

/// Push events delivered to the connected client.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ReceiveMessage(String),
    ArchiveInfo(ArchiveInfo),
    ExtractionProgress(ExtractionProgress),
    ExecutionStarted {
        execution_id: String,
        version: String,
        os: String,
    },
    ScriptStarted {
        execution_id: String,
        script_name: String,
        phase: ScriptPhase,
    },
    ScriptOutputLine {
        execution_id: String,
        script_name: String,
        line: String,
        is_error: bool,
    },
    ScriptOutput {
        execution_id: String,
        script_name: String,
        output: String,
        is_error: bool,
    },
    ScriptCompleted {
        execution_id: String,
        script_name: String,
        phase: ScriptPhase,
        success: bool,
        exit_code: i32,
        duration: f64,
    },
    ExecutionCompleted {
        execution_id: String,
        success: bool,
        status: ExecutionStatus,
        total_duration: f64,
        failed_at_script: Option<String>,
    },
    ExecutionError {
        execution_id: String,
        error: String,
    },
}

impl ServerEvent {
    pub fn message(text: impl Into<String>) -> Self {
        Self::ReceiveMessage(text.into())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "ReceiveMessage",
            Self::ArchiveInfo(_) => "ArchiveInfo",
            Self::ExtractionProgress(_) => "ExtractionProgress",
            Self::ExecutionStarted { .. } => "ExecutionStarted",
            Self::ScriptStarted { .. } => "ScriptStarted",
            Self::ScriptOutputLine { .. } => "ScriptOutputLine",
            Self::ScriptOutput { .. } => "ScriptOutput",
            Self::ScriptCompleted { .. } => "ScriptCompleted",
            Self::ExecutionCompleted { .. } => "ExecutionCompleted",
            Self::ExecutionError { .. } => "ExecutionError",
        }
    }
}
