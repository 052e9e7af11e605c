//! Process supervisor: spawns the analyzer, owns its handle, and is the only
//! place that terminates or reaps it.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::SpawnError;

/// Where the analyzer's stderr goes. Never the protocol channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StderrSink {
    #[default]
    Inherit,
    Discard,
    /// Append to a log file, creating it if needed.
    File(PathBuf),
}

impl StderrSink {
    fn open(&self) -> Result<Stdio, SpawnError> {
        match self {
            Self::Inherit => Ok(Stdio::inherit()),
            Self::Discard => Ok(Stdio::null()),
            Self::File(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent).map_err(|source| SpawnError::StderrLog {
                        path: path.clone(),
                        source,
                    })?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| SpawnError::StderrLog {
                        path: path.clone(),
                        source,
                    })?;
                Ok(Stdio::from(file))
            }
        }
    }
}

/// Everything needed to start one analyzer process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    program: PathBuf,
    args: Vec<OsString>,
    work_dir: Option<PathBuf>,
    stderr: StderrSink,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
            stderr: StderrSink::default(),
        }
    }

    /// The stock JDT.LS launcher inside an installation directory:
    /// `<install>/bin/jdtls -configuration <install>/config_<os> -data <workspace>`.
    pub fn jdtls(install_dir: &Path, workspace_dir: &Path) -> Self {
        Self::new(install_dir.join("bin").join("jdtls"))
            .arg("-configuration")
            .arg(install_dir.join(platform_config_dir()))
            .arg("-data")
            .arg(workspace_dir)
            .work_dir(workspace_dir)
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Directory that must exist before spawn; also the child's cwd.
    #[must_use]
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn stderr(mut self, sink: StderrSink) -> Self {
        self.stderr = sink;
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    /// Bare names go through `PATH`; anything with a directory part must exist.
    fn resolve_program(&self) -> Result<PathBuf, SpawnError> {
        let is_bare = self.program.components().count() == 1 && !self.program.is_absolute();
        if is_bare {
            return which::which(&self.program).map_err(|source| SpawnError::NotFound {
                program: self.program.display().to_string(),
                source,
            });
        }
        if self.program.is_file() {
            Ok(self.program.clone())
        } else {
            Err(SpawnError::MissingExecutable(self.program.clone()))
        }
    }
}

/// Config directory name shipped with JDT.LS for the host platform.
#[must_use]
pub fn platform_config_dir() -> &'static str {
    if cfg!(target_os = "macos") {
        "config_mac"
    } else if cfg!(windows) {
        "config_win"
    } else {
        "config_linux"
    }
}

/// A freshly spawned process plus the pipe endpoints the transport takes over.
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Spawn the analyzer described by `spec`.
///
/// Creates the working directory first. The child is killed if its handle is
/// dropped without being reaped.
pub fn spawn(spec: &LaunchSpec) -> Result<SpawnedProcess, SpawnError> {
    if let Some(dir) = &spec.work_dir {
        std::fs::create_dir_all(dir).map_err(|source| SpawnError::WorkDir {
            path: dir.clone(),
            source,
        })?;
    }

    let program = spec.resolve_program()?;
    let mut cmd = Command::new(&program);
    cmd.args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(spec.stderr.open()?)
        .kill_on_drop(true);
    if let Some(dir) = &spec.work_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|source| SpawnError::Spawn { program, source })?;

    let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe("stdin"))?;
    let stdout = child.stdout.take().ok_or(SpawnError::MissingPipe("stdout"))?;
    let pid = child.id();

    tracing::info!(program = %spec.program.display(), pid, "Analyzer process started");

    Ok(SpawnedProcess {
        handle: ProcessHandle { pid, child },
        stdin,
        stdout,
    })
}

/// Exclusive owner of a running analyzer process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    child: Child,
}

/// How a supervised process ended.
#[derive(Debug)]
pub enum ExitOutcome {
    /// Exited on its own within the grace period.
    Exited(ExitStatus),
    /// Did not exit in time and was killed.
    Terminated(Option<ExitStatus>),
    /// The exit status could not be collected.
    Unknown(String),
}

impl ProcessHandle {
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Send a kill signal. Best-effort and non-blocking.
    pub fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            // Already exited processes report InvalidInput here.
            tracing::debug!(pid = self.pid, "Kill signal not delivered: {e}");
        }
    }

    /// Block until the process exits.
    ///
    /// Wrap in a timeout: a wedged analyzer may never exit on its own.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Move the child onto an exit-observer task.
    ///
    /// The returned watcher can request termination while the observer is
    /// still waiting; dropping the watcher also kills the process.
    pub fn watch_exit(self) -> ExitWatcher {
        let Self { pid, mut child } = self;
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(pid, "Kill signal not delivered: {e}");
                    }
                    child.wait().await
                }
            }
        });
        ExitWatcher {
            kill_tx: Some(kill_tx),
            task,
        }
    }

    /// Race natural exit against `grace`; kill on timeout.
    ///
    /// Always joins the observer task before returning.
    pub async fn reap(self, grace: Duration) -> ExitOutcome {
        let pid = self.pid;
        let mut watcher = self.watch_exit();

        match tokio::time::timeout(grace, &mut watcher.task).await {
            Ok(joined) => match flatten(joined) {
                Ok(status) => ExitOutcome::Exited(status),
                Err(e) => ExitOutcome::Unknown(e),
            },
            Err(_) => {
                tracing::info!(pid, "Analyzer did not exit in time, terminating");
                watcher.terminate();
                match watcher.join().await {
                    Ok(status) => ExitOutcome::Terminated(Some(status)),
                    Err(e) => {
                        tracing::debug!(pid, "Exit status after kill unavailable: {e}");
                        ExitOutcome::Terminated(None)
                    }
                }
            }
        }
    }
}

/// Handle to the exit-observer task created by [`ProcessHandle::watch_exit`].
pub struct ExitWatcher {
    kill_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<io::Result<ExitStatus>>,
}

impl ExitWatcher {
    /// Ask the observer to kill the process. Safe while a wait is outstanding.
    pub fn terminate(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Wait for the observer task to finish and return the exit status.
    pub async fn join(self) -> Result<ExitStatus, String> {
        let Self { kill_tx, task, .. } = self;
        // Keep the kill channel open while joining so a pending natural exit
        // is not turned into a kill.
        let joined = task.await;
        drop(kill_tx);
        flatten(joined)
    }
}

fn flatten(
    joined: Result<io::Result<ExitStatus>, tokio::task::JoinError>,
) -> Result<ExitStatus, String> {
    match joined {
        Ok(Ok(status)) => Ok(status),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("exit observer failed: {e}")),
    }
}
