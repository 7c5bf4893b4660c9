mod process;
mod shell_executor;
mod windows_executor;

use crate::error::{AppError, Result};
use crate::models::{ScriptDescriptor, ScriptResult};
use std::path::Path;
use std::time::Duration;

pub use process::{LineSender, OutputLine};
pub use shell_executor::ShellExecutor;
pub use windows_executor::WindowsExecutor;

pub trait ScriptRunner {
    async fn run(
        &self,
        script: &ScriptDescriptor,
        work_dir: &Path,
        timeout: Duration,
        live: Option<LineSender>,
    ) -> ScriptResult;
}

/// Runner picked by OS tag.
#[derive(Debug, Clone)]
pub enum Runner {
    Windows(WindowsExecutor),
    Shell(ShellExecutor),
}

impl Runner {
    pub fn for_os(os: &str, shell: Option<String>) -> Result<Self> {
        match os.to_ascii_lowercase().as_str() {
            "windows" => Ok(Self::Windows(WindowsExecutor)),
            "linux" => Ok(Self::Shell(ShellExecutor::new(shell))),
            _ => Err(AppError::UnsupportedOs(os.to_string())),
        }
    }
}

impl ScriptRunner for Runner {
    async fn run(
        &self,
        script: &ScriptDescriptor,
        work_dir: &Path,
        timeout: Duration,
        live: Option<LineSender>,
    ) -> ScriptResult {
        match self {
            Self::Windows(runner) => runner.run(script, work_dir, timeout, live).await,
            Self::Shell(runner) => runner.run(script, work_dir, timeout, live).await,
        }
    }
}
