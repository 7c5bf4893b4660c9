use super::script::ScriptResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionJob {
    pub execution_id: String,
    pub version: String,
    pub os: String,
    pub results: Vec<ScriptResult>,
    pub success: bool,
    pub failed_at_script: Option<String>,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ExecutionJob {
    pub fn new(version: &str, os: &str) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            version: version.to_string(),
            os: os.to_string(),
            results: Vec::new(),
            success: false,
            failed_at_script: None,
            status: ExecutionStatus::NotStarted,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn total_duration_secs(&self) -> f64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}
