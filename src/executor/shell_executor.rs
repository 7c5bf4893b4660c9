use super::ScriptRunner;
use super::process::{LineSender, run_supervised};
use crate::models::{ScriptDescriptor, ScriptResult};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell_path: String,
}

impl ShellExecutor {
    pub fn new(shell_path: Option<String>) -> Self {
        Self {
            shell_path: shell_path.unwrap_or_else(|| "bash".to_string()),
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ScriptRunner for ShellExecutor {
    async fn run(
        &self,
        script: &ScriptDescriptor,
        work_dir: &Path,
        timeout: Duration,
        live: Option<LineSender>,
    ) -> ScriptResult {
        let mut cmd = tokio::process::Command::new(&self.shell_path);
        cmd.arg(&script.path);
        run_supervised(cmd, script, work_dir, timeout, live).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::{ScriptPhase, ScriptType};
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn script(dir: &Path, body: &str) -> ScriptDescriptor {
        let path = dir.join("installation.sh");
        std::fs::write(&path, body).unwrap();
        ScriptDescriptor {
            path,
            name: "installation".to_string(),
            script_type: ScriptType::Shell,
            phase: ScriptPhase::Installation,
            exists: true,
            is_executable: false,
        }
    }

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = script(dir.path(), "echo out\necho err >&2\nexit 3\n");

        let result = ShellExecutor::default()
            .run(&descriptor, dir.path(), Duration::from_secs(10), None)
            .await;
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
        assert_eq!(result.output, "out\n");
        assert_eq!(result.error_output, "err\n");
        assert_eq!(result.script_name, "installation");
        assert!(result.end_time >= result.start_time);
    }

    #[tokio::test]
    async fn exports_script_and_working_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = script(dir.path(), "echo \"$WORKING_DIR\"\npwd\n");

        let result = ShellExecutor::default()
            .run(&descriptor, dir.path(), Duration::from_secs(10), None)
            .await;
        assert!(result.success(), "{}", result.error_output);
        let lines: Vec<_> = result.output.lines().map(PathBuf::from).collect();
        assert_eq!(lines[0], dir.path());
        assert_eq!(
            lines[1].canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn forwards_lines_live() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = script(dir.path(), "echo one\necho two >&2\n");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = ShellExecutor::default()
            .run(&descriptor, dir.path(), Duration::from_secs(10), Some(tx))
            .await;
        assert!(result.success());

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert!(lines.iter().any(|l| l.line == "one" && !l.is_error));
        assert!(lines.iter().any(|l| l.line == "two" && l.is_error));
    }

    #[tokio::test]
    async fn timeout_kills_process_tree() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let body = format!("(sleep 2; touch '{}') &\nsleep 30\n", marker.display());
        let descriptor = script(dir.path(), &body);

        let result = ShellExecutor::default()
            .run(&descriptor, dir.path(), Duration::from_millis(300), None)
            .await;
        assert_eq!(result.exit_code, -1);
        assert_eq!(
            result.error_output,
            "Script execution timed out after 0 seconds"
        );
        assert!(result.duration < Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn background_child_holding_pipes_keeps_captured_output() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = script(
            dir.path(),
            "echo important\necho warn >&2\n(sleep 5) &\nexit 0\n",
        );

        let result = ShellExecutor::default()
            .run(&descriptor, dir.path(), Duration::from_secs(10), None)
            .await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "important\n");
        assert_eq!(result.error_output, "warn\n");
        // Both streams share one grace period.
        assert!(result.duration < Duration::from_millis(3500), "{:?}", result.duration);
    }

    #[tokio::test]
    async fn signal_death_is_distinct_from_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = script(dir.path(), "echo before\nkill -TERM $$\n");

        let result = ShellExecutor::default()
            .run(&descriptor, dir.path(), Duration::from_secs(10), None)
            .await;
        assert_eq!(result.exit_code, 128 + libc::SIGTERM);
        assert!(!result.success());
        assert_eq!(result.output, "before\n");
        assert!(
            result.error_output.contains("terminated by signal 15"),
            "{}",
            result.error_output
        );
    }

    #[tokio::test]
    async fn missing_interpreter_reports_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = script(dir.path(), "exit 0\n");

        let result = ShellExecutor::new(Some("/nonexistent/shell".to_string()))
            .run(&descriptor, dir.path(), Duration::from_secs(5), None)
            .await;
        assert_eq!(result.exit_code, -999);
        assert!(result.error_output.starts_with("Exception: "));
    }
}
