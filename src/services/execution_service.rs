use crate::error::{AppError, Result};
use crate::executor::{OutputLine, Runner, ScriptRunner};
use crate::models::{ExecutionJob, ExecutionStatus, ScriptPhase, ServerEvent};
use crate::repository::ExecutionRepository;
use crate::services::notifier::NotificationSink;
use crate::services::script_locator::ScriptLocator;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const INITIALIZATION: &str = "Initialization";

/// Drives the pre -> install -> post sequence for one job at a time per caller.
#[derive(Clone)]
pub struct ExecutionService {
    exec_repo: ExecutionRepository,
    locator: ScriptLocator,
    notifier: Arc<dyn NotificationSink>,
    cancellations: Arc<RwLock<HashMap<String, CancellationToken>>>,
    script_timeout: Duration,
    shell: Option<String>,
}

impl ExecutionService {
    pub fn new(
        exec_repo: ExecutionRepository,
        locator: ScriptLocator,
        notifier: Arc<dyn NotificationSink>,
        script_timeout: Duration,
        shell: Option<String>,
    ) -> Self {
        Self {
            exec_repo,
            locator,
            notifier,
            cancellations: Arc::new(RwLock::new(HashMap::new())),
            script_timeout,
            shell,
        }
    }

    pub fn locator(&self) -> &ScriptLocator {
        &self.locator
    }

    /// Runs every phase script found under `extracted_path` and returns the settled job.
    ///
    /// Always emits `ExecutionCompleted`, including when the job fails before any
    /// script runs.
    pub async fn execute(
        &self,
        version: &str,
        os: &str,
        extracted_path: &Path,
        connection_id: &str,
    ) -> ExecutionJob {
        let job = self.exec_repo.create(version, os).await;
        let execution_id = job.execution_id.clone();
        let token = CancellationToken::new();
        self.cancellations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(execution_id.clone(), token.clone());
        self.exec_repo
            .update_status(&execution_id, ExecutionStatus::Running)
            .await
            .ok();

        let outcome = self
            .run_phases(&execution_id, version, os, extracted_path, connection_id, &token)
            .await;
        if let Err(err) = outcome {
            tracing::error!("Execution {} failed to start: {}", execution_id, err);
            self.exec_repo
                .record_failure(&execution_id, INITIALIZATION)
                .await
                .ok();
            self.notifier.notify(
                connection_id,
                ServerEvent::ExecutionError {
                    execution_id: execution_id.clone(),
                    error: err.to_string(),
                },
            );
        }

        self.cancellations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&execution_id);

        let job = self.exec_repo.finish(&execution_id).await.unwrap_or(job);
        tracing::info!(
            "Execution {} finished with status {:?}",
            execution_id,
            job.status
        );
        self.notifier.notify(
            connection_id,
            ServerEvent::ExecutionCompleted {
                execution_id,
                success: job.success,
                status: job.status,
                total_duration: job.total_duration_secs(),
                failed_at_script: job.failed_at_script.clone(),
            },
        );
        job
    }

    /// Names what the bundle does ship when the requested script set is absent.
    fn describe_missing(&self, base: &Path, version: &str, os: &str) -> String {
        let listed = |names: Vec<String>| {
            if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            }
        };
        if !base.join(version).is_dir() {
            let versions = self.locator.available_versions(base);
            return format!("{}/{} (available versions: {})", version, os, listed(versions));
        }
        let systems = self.locator.supported_os(base, version);
        format!(
            "{}/{} (available OS for {}: {})",
            version,
            os,
            version,
            listed(systems)
        )
    }

    async fn run_phases(
        &self,
        execution_id: &str,
        version: &str,
        os: &str,
        extracted_path: &Path,
        connection_id: &str,
        token: &CancellationToken,
    ) -> Result<()> {
        if version.trim().is_empty() || os.trim().is_empty() {
            return Err(AppError::Validation(
                "Version and OS must be provided".to_string(),
            ));
        }
        if !extracted_path.is_dir() {
            return Err(AppError::Validation(format!(
                "Extracted path not found: {}",
                extracted_path.display()
            )));
        }

        self.notifier.notify(
            connection_id,
            ServerEvent::ExecutionStarted {
                execution_id: execution_id.to_string(),
                version: version.to_string(),
                os: os.to_string(),
            },
        );

        let scripts = self.locator.locate(extracted_path, version, os);
        if !scripts.is_valid() {
            return Err(AppError::ScriptNotFound(
                self.describe_missing(extracted_path, version, os),
            ));
        }
        let runner = Runner::for_os(os, self.shell.clone())?;

        let ordered = scripts.ordered_scripts();
        tracing::info!(
            "Executing {} scripts for {}/{}",
            ordered.len(),
            version,
            os
        );

        for script in ordered {
            // Checked only between scripts; an in-flight script is never interrupted.
            if token.is_cancelled() {
                self.exec_repo
                    .update_status(execution_id, ExecutionStatus::Cancelled)
                    .await?;
                break;
            }

            self.notifier.notify(
                connection_id,
                ServerEvent::ScriptStarted {
                    execution_id: execution_id.to_string(),
                    script_name: script.name.clone(),
                    phase: script.phase,
                },
            );

            let (tx, rx) = mpsc::unbounded_channel();
            let forwarder = tokio::spawn(forward_lines(
                rx,
                self.notifier.clone(),
                connection_id.to_string(),
                execution_id.to_string(),
                script.name.clone(),
            ));
            let result = runner
                .run(script, extracted_path, self.script_timeout, Some(tx))
                .await;
            forwarder.await.ok();

            for (text, is_error) in [(&result.output, false), (&result.error_output, true)] {
                if text.trim().is_empty() {
                    continue;
                }
                self.notifier.notify(
                    connection_id,
                    ServerEvent::ScriptOutput {
                        execution_id: execution_id.to_string(),
                        script_name: script.name.clone(),
                        output: text.clone(),
                        is_error,
                    },
                );
            }

            self.notifier.notify(
                connection_id,
                ServerEvent::ScriptCompleted {
                    execution_id: execution_id.to_string(),
                    script_name: script.name.clone(),
                    phase: script.phase,
                    success: result.success(),
                    exit_code: result.exit_code,
                    duration: result.duration.as_secs_f64(),
                },
            );

            let succeeded = result.success();
            let exit_code = result.exit_code;
            self.exec_repo.append_result(execution_id, result).await?;

            if !succeeded {
                tracing::warn!("Script failed: {} (exit code: {})", script.name, exit_code);
                self.exec_repo
                    .record_failure(execution_id, &script.name)
                    .await?;
                if script.phase == ScriptPhase::Installation {
                    break;
                }
            }
        }

        Ok(())
    }

    /// Requests cancellation. Only a running job can be cancelled.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        if self.exec_repo.status(execution_id).await != Some(ExecutionStatus::Running) {
            return false;
        }

        let token = self
            .cancellations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(execution_id);
        let Some(token) = token else {
            return false;
        };

        token.cancel();
        self.exec_repo
            .update_status(execution_id, ExecutionStatus::Cancelled)
            .await
            .ok();
        tracing::info!("Cancelled execution: {}", execution_id);
        true
    }

    pub async fn get_status(&self, execution_id: &str) -> ExecutionStatus {
        self.exec_repo
            .status(execution_id)
            .await
            .unwrap_or(ExecutionStatus::NotStarted)
    }

    pub async fn get_job(&self, execution_id: &str) -> Result<ExecutionJob> {
        self.exec_repo.get(execution_id).await
    }

    pub async fn list_active_jobs(&self) -> Vec<ExecutionJob> {
        self.exec_repo.list_by_status(ExecutionStatus::Running).await
    }
}

async fn forward_lines(
    mut rx: mpsc::UnboundedReceiver<OutputLine>,
    notifier: Arc<dyn NotificationSink>,
    connection_id: String,
    execution_id: String,
    script_name: String,
) {
    while let Some(OutputLine { line, is_error }) = rx.recv().await {
        notifier.notify(
            &connection_id,
            ServerEvent::ScriptOutputLine {
                execution_id: execution_id.clone(),
                script_name: script_name.clone(),
                line,
                is_error,
            },
        );
    }
}
