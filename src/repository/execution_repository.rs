use crate::error::{AppError, Result};
use crate::models::{ExecutionJob, ExecutionStatus, ScriptResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory job store. Jobs are kept for status queries until shutdown.
#[derive(Clone, Default)]
pub struct ExecutionRepository {
    jobs: Arc<RwLock<HashMap<String, ExecutionJob>>>,
}

impl ExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, version: &str, os: &str) -> ExecutionJob {
        let job = ExecutionJob::new(version, os);
        self.jobs
            .write()
            .await
            .insert(job.execution_id.clone(), job.clone());
        job
    }

    pub async fn get(&self, id: &str) -> Result<ExecutionJob> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::ExecutionNotFound(id.to_string()))
    }

    pub async fn status(&self, id: &str) -> Option<ExecutionStatus> {
        self.jobs.read().await.get(id).map(|job| job.status)
    }

    pub async fn list_by_status(&self, status: ExecutionStatus) -> Vec<ExecutionJob> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        jobs
    }

    pub async fn update_status(&self, id: &str, status: ExecutionStatus) -> Result<()> {
        self.update(id, |job| job.status = status).await
    }

    pub async fn append_result(&self, id: &str, result: ScriptResult) -> Result<()> {
        self.update(id, |job| job.results.push(result)).await
    }

    pub async fn record_failure(&self, id: &str, script_name: &str) -> Result<()> {
        self.update(id, |job| job.failed_at_script = Some(script_name.to_string()))
            .await
    }

    /// Settles the final outcome. A job already marked `Cancelled` keeps that status.
    pub async fn finish(&self, id: &str) -> Result<ExecutionJob> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| AppError::ExecutionNotFound(id.to_string()))?;

        job.success = !job.results.is_empty() && job.results.iter().all(ScriptResult::success);
        if job.status != ExecutionStatus::Cancelled {
            job.status = if job.success {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            };
        }
        if job.status == ExecutionStatus::Cancelled {
            job.success = false;
        }
        job.end_time = Some(Utc::now());
        Ok(job.clone())
    }

    async fn update(&self, id: &str, apply: impl FnOnce(&mut ExecutionJob)) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| AppError::ExecutionNotFound(id.to_string()))?;
        apply(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScriptPhase;
    use std::time::Duration;

    fn result(exit_code: i32) -> ScriptResult {
        ScriptResult {
            script_name: "installation".to_string(),
            phase: ScriptPhase::Installation,
            exit_code,
            output: String::new(),
            error_output: String::new(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn finish_derives_status_from_results() {
        let repo = ExecutionRepository::new();
        let job = repo.create("python3.11", "linux").await;
        assert_eq!(job.status, ExecutionStatus::NotStarted);

        repo.update_status(&job.execution_id, ExecutionStatus::Running)
            .await
            .unwrap();
        repo.append_result(&job.execution_id, result(0)).await.unwrap();
        let done = repo.finish(&job.execution_id).await.unwrap();
        assert!(done.success);
        assert_eq!(done.status, ExecutionStatus::Completed);
        assert!(done.end_time.is_some());
    }

    #[tokio::test]
    async fn cancelled_status_survives_finish() {
        let repo = ExecutionRepository::new();
        let job = repo.create("python3.11", "linux").await;
        repo.append_result(&job.execution_id, result(0)).await.unwrap();
        repo.update_status(&job.execution_id, ExecutionStatus::Cancelled)
            .await
            .unwrap();

        let done = repo.finish(&job.execution_id).await.unwrap();
        assert_eq!(done.status, ExecutionStatus::Cancelled);
        assert!(!done.success);
    }

    #[tokio::test]
    async fn lists_only_requested_status() {
        let repo = ExecutionRepository::new();
        let running = repo.create("python3.11", "linux").await;
        repo.create("python3.11", "linux").await;
        repo.update_status(&running.execution_id, ExecutionStatus::Running)
            .await
            .unwrap();

        let active = repo.list_by_status(ExecutionStatus::Running).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].execution_id, running.execution_id);
        assert!(matches!(
            repo.get("missing").await,
            Err(AppError::ExecutionNotFound(_))
        ));
    }
}
