use crate::error::AppError;
use crate::models::{ScriptDescriptor, ScriptResult};
use chrono::Utc;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const LAUNCH_FAILURE_EXIT_CODE: i32 = -999;
const TIMEOUT_EXIT_CODE: i32 = -1;
const SIGNAL_EXIT_BASE: i32 = 128;
const PUMP_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// One line of script output, forwarded while the script is still running.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLine {
    pub line: String,
    pub is_error: bool,
}

pub type LineSender = mpsc::UnboundedSender<OutputLine>;

/// Spawns `cmd`, captures both streams line by line and enforces `timeout`.
///
/// Never fails: launch errors and timeouts are reported through the result's
/// exit code (`-999` and `-1`) and error output.
pub(crate) async fn run_supervised(
    mut cmd: Command,
    script: &ScriptDescriptor,
    work_dir: &Path,
    timeout: Duration,
    live: Option<LineSender>,
) -> ScriptResult {
    let start_time = Utc::now();
    let started = Instant::now();

    let script_dir = script.path.parent().unwrap_or(work_dir);
    cmd.current_dir(work_dir)
        .env("SCRIPT_DIR", script_dir)
        .env("WORKING_DIR", work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    detach_group(&mut cmd);

    tracing::info!("Starting script: {}", script.path.display());
    let (exit_code, output, error_output) = match cmd.spawn() {
        Ok(child) => supervise(child, timeout, live).await,
        Err(err) => {
            tracing::error!("Failed to launch {}: {}", script.path.display(), err);
            (
                LAUNCH_FAILURE_EXIT_CODE,
                String::new(),
                AppError::ProcessLaunch(err.to_string()).to_string(),
            )
        }
    };
    tracing::info!("Script {} completed with exit code: {}", script.name, exit_code);

    ScriptResult {
        script_name: script.name.clone(),
        phase: script.phase,
        exit_code,
        output,
        error_output,
        start_time,
        end_time: Utc::now(),
        duration: started.elapsed(),
    }
}

async fn supervise(
    mut child: Child,
    timeout: Duration,
    live: Option<LineSender>,
) -> (i32, String, String) {
    let stdout = child
        .stdout
        .take()
        .map(|stream| Pump::spawn(stream, false, live.clone()));
    let stderr = child
        .stderr
        .take()
        .map(|stream| Pump::spawn(stream, true, live));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            let (output, mut error_output) = tokio::join!(collect(stdout), collect(stderr));
            let (exit_code, note) = describe_exit(status);
            if let Some(note) = note {
                tracing::warn!("{}", note);
                error_output.push_str(&note);
                error_output.push('\n');
            }
            (exit_code, output, error_output)
        }
        Ok(Err(err)) => {
            kill_tree(&mut child).await;
            let (output, _) = tokio::join!(collect(stdout), collect(stderr));
            (
                LAUNCH_FAILURE_EXIT_CODE,
                output,
                AppError::ProcessLaunch(err.to_string()).to_string(),
            )
        }
        Err(_) => {
            tracing::warn!("Script timed out after {} seconds", timeout.as_secs());
            kill_tree(&mut child).await;
            let (output, _) = tokio::join!(collect(stdout), collect(stderr));
            (
                TIMEOUT_EXIT_CODE,
                output,
                AppError::ProcessTimeout(timeout.as_secs()).to_string(),
            )
        }
    }
}

/// Exit code of a finished script. Signal deaths map to `128 + signal`, as a shell reports them.
fn describe_exit(status: ExitStatus) -> (i32, Option<String>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (
                SIGNAL_EXIT_BASE + signal,
                Some(format!("Script terminated by signal {}", signal)),
            );
        }
    }
    (1, Some(format!("Script ended without an exit code: {}", status)))
}

/// Reader task for one output stream. Lines land in `buffer` as they arrive.
struct Pump {
    task: JoinHandle<()>,
    buffer: Arc<Mutex<String>>,
}

impl Pump {
    fn spawn<R>(stream: R, is_error: bool, live: Option<LineSender>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(String::new()));
        let task = tokio::spawn(pump(stream, is_error, live, buffer.clone()));
        Self { task, buffer }
    }
}

async fn pump<R>(stream: R, is_error: bool, live: Option<LineSender>, buffer: Arc<Mutex<String>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut raw = Vec::new();

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!("Output stream closed: {}", err);
                break;
            }
        }

        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            continue;
        }

        if is_error {
            tracing::debug!("[script stderr] {}", line);
        } else {
            tracing::debug!("[script stdout] {}", line);
        }
        {
            let mut buffer = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            buffer.push_str(line);
            buffer.push('\n');
        }

        if let Some(tx) = &live {
            let _ = tx.send(OutputLine {
                line: line.to_string(),
                is_error,
            });
        }
    }
}

/// Waits briefly for the stream to close, then keeps whatever was read.
///
/// A background child holding the pipe open must not stall the caller.
async fn collect(pump: Option<Pump>) -> String {
    let Some(Pump { mut task, buffer }) = pump else {
        return String::new();
    };
    match tokio::time::timeout(PUMP_DRAIN_GRACE, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!("Output reader failed: {}", err),
        Err(_) => {
            tracing::debug!("Output stream still open after script exit; keeping partial output");
            task.abort();
        }
    }
    let mut buffer = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    std::mem::take(&mut *buffer)
}

#[cfg(unix)]
fn detach_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach_group(cmd: &mut Command) {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

/// Kills the child and everything it spawned, then reaps it.
#[cfg(unix)]
async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        // Negative pid addresses the whole group; pgid == pid after process_group(0).
        let rc = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        if rc == -1 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() != Some(libc::ESRCH) {
                tracing::warn!("SIGKILL to process group {} failed: {}", pid, errno);
            }
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[cfg(windows)]
async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(err) = status {
            tracing::warn!("taskkill for {} failed: {}", pid, err);
        }
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}
