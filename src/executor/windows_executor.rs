use super::ScriptRunner;
use super::process::{LineSender, run_supervised};
use crate::models::{ScriptDescriptor, ScriptResult, ScriptType};
use std::path::Path;
use std::time::Duration;

/// Runs `.bat`/`.cmd` through `cmd.exe` and `.ps1` through PowerShell.
#[derive(Debug, Clone, Default)]
pub struct WindowsExecutor;

impl WindowsExecutor {
    fn command_for(script: &ScriptDescriptor) -> tokio::process::Command {
        match script.script_type {
            ScriptType::PowerShell => {
                let mut cmd = tokio::process::Command::new("powershell.exe");
                cmd.args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"])
                    .arg(&script.path);
                cmd
            }
            _ => {
                let mut cmd = tokio::process::Command::new("cmd.exe");
                cmd.arg("/c").arg(&script.path);
                cmd
            }
        }
    }
}

impl ScriptRunner for WindowsExecutor {
    async fn run(
        &self,
        script: &ScriptDescriptor,
        work_dir: &Path,
        timeout: Duration,
        live: Option<LineSender>,
    ) -> ScriptResult {
        let cmd = Self::command_for(script);
        run_supervised(cmd, script, work_dir, timeout, live).await
    }
}
