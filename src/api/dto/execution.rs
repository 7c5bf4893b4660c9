use crate::models::{ExecutionJob, ScriptResult};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ScriptResultResponse {
    pub script_name: String,
    pub phase: String,
    pub exit_code: i32,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_secs: f64,
}

impl From<ScriptResult> for ScriptResultResponse {
    fn from(result: ScriptResult) -> Self {
        Self {
            success: result.success(),
            script_name: result.script_name,
            phase: format!("{:?}", result.phase),
            exit_code: result.exit_code,
            stdout: result.output,
            stderr: result.error_output,
            started_at: result.start_time.to_rfc3339(),
            finished_at: result.end_time.to_rfc3339(),
            duration_secs: result.duration.as_secs_f64(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecutionResponse {
    pub id: String,
    pub version: String,
    pub os: String,
    pub status: String,
    pub success: bool,
    pub failed_at_script: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub total_duration_secs: f64,
    pub results: Vec<ScriptResultResponse>,
}

impl From<ExecutionJob> for ExecutionResponse {
    fn from(job: ExecutionJob) -> Self {
        Self {
            total_duration_secs: job.total_duration_secs(),
            id: job.execution_id,
            version: job.version,
            os: job.os,
            status: format!("{:?}", job.status),
            success: job.success,
            failed_at_script: job.failed_at_script,
            started_at: job.start_time.to_rfc3339(),
            finished_at: job.end_time.map(|t| t.to_rfc3339()),
            results: job.results.into_iter().map(ScriptResultResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecutionsListResponse {
    pub data: Vec<ExecutionResponse>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}
