use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::DashboardConfig;
use crate::error::CollectorError;

// ─── Configuration ───────────────────────────────────────────────

/// How long to keep draining stdout/stderr after the collector exits.
/// A backgrounded grandchild may hold the pipes open indefinitely.
const OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Bytes of captured output kept for log lines.
const OUTPUT_TAIL_BYTES: usize = 2048;

// ─── Public types ────────────────────────────────────────────────

/// Summary of a collector run that completed inside its deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorRun {
    /// `None` when the process was ended by a signal
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

/// Something that can produce a fresh snapshot.
///
/// One call is one attempt: implementations must not retry and must return
/// within roughly `timeout`.
#[async_trait]
pub trait Invoker: Send + Sync {
    async fn run(&self, timeout: Duration) -> Result<CollectorRun, CollectorError>;
}

/// Runs the external collector as a child process.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    program: OsString,
    args: Vec<OsString>,
    workdir: PathBuf,
    accept_nonzero_exit: bool,
}

// ─── ProcessInvoker impl ─────────────────────────────────────────

impl ProcessInvoker {
    /// `interpreter = Some("bash")` runs `bash <script>`, `None` executes
    /// the script directly. A relative script is looked up in `workdir`
    /// either way, never on `PATH`.
    pub fn new(
        script: impl Into<PathBuf>,
        interpreter: Option<&str>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        let script: PathBuf = script.into();
        let workdir: PathBuf = workdir.into();
        let (program, args) = match interpreter {
            Some(interp) => (OsString::from(interp), vec![script.into_os_string()]),
            None => (resolve_in(&workdir, script).into_os_string(), Vec::new()),
        };
        Self {
            program,
            args,
            workdir,
            accept_nonzero_exit: false,
        }
    }

    pub fn from_config(config: &DashboardConfig) -> Self {
        Self::new(
            config.collector.clone(),
            config.interpreter.as_deref(),
            config.workdir.clone(),
        )
        .accept_nonzero_exit(config.accept_nonzero_exit)
    }

    /// Count a completed run as success whatever its exit code.
    pub fn accept_nonzero_exit(mut self, accept: bool) -> Self {
        self.accept_nonzero_exit = accept;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a timeout can take down grandchildren too
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

#[async_trait]
impl Invoker for ProcessInvoker {
    async fn run(&self, timeout: Duration) -> Result<CollectorRun, CollectorError> {
        let started = Instant::now();

        let mut child = self.command().spawn().map_err(|e| {
            tracing::warn!(
                program = ?self.program,
                workdir = %self.workdir.display(),
                error = %e,
                "Failed to spawn collector"
            );
            CollectorError::SpawnFailed(e)
        })?;

        let pid = child.id();
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        tracing::debug!(pid = ?pid, timeout_ms = timeout.as_millis() as u64, "Collector started");

        let waited = tokio::time::timeout(timeout, child.wait()).await;
        let elapsed = started.elapsed();

        let status = match waited {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                terminate(&mut child).await;
                tracing::warn!(pid = ?pid, error = %e, "Lost track of collector process");
                return Err(CollectorError::Wait(e));
            }
            Err(_) => {
                terminate(&mut child).await;
                let stderr = collect(stderr).await;
                tracing::warn!(
                    pid = ?pid,
                    timeout_secs = timeout.as_secs_f64(),
                    stderr = %tail(&stderr),
                    "Collector timed out and was killed"
                );
                return Err(CollectorError::TimedOut(timeout));
            }
        };

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;

        if !status.success() && !self.accept_nonzero_exit {
            tracing::warn!(
                pid = ?pid,
                status = %status,
                elapsed_ms = elapsed.as_millis() as u64,
                stderr = %tail(&stderr),
                "Collector exited unsuccessfully"
            );
            return Err(CollectorError::ExitStatus(status));
        }

        tracing::debug!(
            pid = ?pid,
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64,
            stdout = %tail(&stdout),
            "Collector finished"
        );

        Ok(CollectorRun {
            exit_code: status.code(),
            elapsed,
        })
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

/// Absolute path of `script` relative to `workdir`. A bare name handed to
/// `Command::new` would otherwise be searched for on `PATH`.
fn resolve_in(workdir: &Path, script: PathBuf) -> PathBuf {
    if script.is_absolute() {
        return script;
    }
    let joined = workdir.join(script);
    if joined.is_absolute() {
        return joined;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(joined),
        Err(_) => joined,
    }
}

/// Kill the collector and its process group, then reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            tracing::debug!(pid, error = %e, "killpg failed, falling back to kill");
        }
    }

    // kill() also waits, so the child never lingers as a zombie
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill collector");
    }
}

fn drain<R>(mut pipe: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf).await;
        buf
    })
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(mut handle) = handle else {
        return Vec::new();
    };
    match tokio::time::timeout(OUTPUT_GRACE, &mut handle).await {
        Ok(Ok(buf)) => buf,
        Ok(Err(_)) => Vec::new(),
        Err(_) => {
            handle.abort();
            Vec::new()
        }
    }
}

fn tail(buf: &[u8]) -> String {
    let start = buf.len().saturating_sub(OUTPUT_TAIL_BYTES);
    String::from_utf8_lossy(&buf[start..]).trim().to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("refresh.sh");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_successful_run_writes_snapshot_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "echo '{\"gateway\":\"up\"}' > data.json\n");

        let invoker = ProcessInvoker::new(path, Some("sh"), dir.path());
        let run = invoker.run(Duration::from_secs(10)).await.unwrap();

        assert_eq!(run.exit_code, Some(0));
        let written = std::fs::read_to_string(dir.path().join("data.json")).unwrap();
        assert!(written.contains("gateway"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "echo boom >&2\nexit 3\n");

        let invoker = ProcessInvoker::new(path, Some("sh"), dir.path());
        match invoker.run(Duration::from_secs(10)).await {
            Err(CollectorError::ExitStatus(status)) => assert_eq!(status.code(), Some(3)),
            other => panic!("expected exit status failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_accepted_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "exit 1\n");

        let invoker = ProcessInvoker::new(path, Some("sh"), dir.path()).accept_nonzero_exit(true);
        let run = invoker.run(Duration::from_secs(10)).await.unwrap();
        assert_eq!(run.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = ProcessInvoker::new(dir.path().join("does-not-exist"), None, dir.path());

        let err = invoker.run(Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, CollectorError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_timeout_kills_collector() {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "echo $$ > collector.pid\nsleep 30\necho done\n");

        let invoker = ProcessInvoker::new(path, Some("sh"), dir.path());
        let started = std::time::Instant::now();
        let err = invoker.run(Duration::from_millis(500)).await.unwrap_err();

        assert!(matches!(err, CollectorError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid: i32 = std::fs::read_to_string(dir.path().join("collector.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(
            kill(Pid::from_raw(pid), None).is_err(),
            "collector {pid} still running after timeout"
        );
    }

    #[tokio::test]
    async fn test_direct_run_finds_bare_script_in_workdir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "#!/bin/sh\necho '{}' > data.json\n");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let invoker = ProcessInvoker::new("refresh.sh", None, dir.path());
        let run = invoker.run(Duration::from_secs(10)).await.unwrap();

        assert_eq!(run.exit_code, Some(0));
        assert!(dir.path().join("data.json").exists());
    }

    #[test]
    fn test_resolve_in_keeps_absolute_and_anchors_relative() {
        let abs = PathBuf::from("/opt/dashboard/refresh.sh");
        assert_eq!(resolve_in(Path::new("/srv"), abs.clone()), abs);
        assert_eq!(
            resolve_in(Path::new("/srv/dashboard"), PathBuf::from("refresh.sh")),
            PathBuf::from("/srv/dashboard/refresh.sh")
        );
        assert!(resolve_in(Path::new("."), PathBuf::from("refresh.sh")).is_absolute());
    }

    #[test]
    fn test_tail_keeps_last_bytes() {
        let buf = vec![b'x'; OUTPUT_TAIL_BYTES + 10];
        assert_eq!(tail(&buf).len(), OUTPUT_TAIL_BYTES);
        assert_eq!(tail(b"  hello \n"), "hello");
    }
}
