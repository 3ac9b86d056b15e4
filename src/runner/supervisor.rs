//! Child process supervision
//!
//! Locates and spawns the node's program with all three standard streams
//! piped, then owns it for the run:
//!
//! - stderr is the control channel, driven by the [`Multiplexer`]
//! - stdin carries the replies
//! - stdout is captured line by line into the report log
//!
//! The run task races the control loop against the run deadline and against
//! any other task moving the run to a terminal status. Whoever loses is
//! dropped and the child is killed unless it exited cleanly.

use crate::config::{NodeIdentity, RunConfig};
use crate::distributed::inbound::inbound_queues;
use crate::distributed::transport::{PeerListener, TcpPeerLink};
use crate::runner::multiplexer::Multiplexer;
use crate::runner::{AgentError, RunState};
use crate::stats::ReportAggregator;
use crate::util::resource::sample_child_memory;
use crate::util::time::Timestamp;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Extension of the program file a node runs when none is named explicitly
pub const PROGRAM_EXTENSION: &str = "app";

/// Environment variable telling the child its ordinal
pub const CHILD_NODE_ID_ENV: &str = "MESHRUN_NODE_ID";

/// Environment variable telling the child how many nodes take part
pub const CHILD_NODE_COUNT_ENV: &str = "MESHRUN_NODE_COUNT";

/// How long stdout may keep draining after the control channel closes
const STDOUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How long to wait for a killed child to be reaped
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Deadline used when `now + timeout` does not fit an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A concrete command line for the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    pub command: PathBuf,
    pub args: Vec<String>,
    /// Working directory for the child, inherited when None
    pub work_dir: Option<PathBuf>,
}

impl ProgramSpec {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Run `script` through `/bin/sh -c`
    pub fn shell(script: &str) -> Self {
        Self::new("/bin/sh").with_args(["-c", script])
    }

    pub fn display(&self) -> String {
        let mut line = self.command.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Where the program for a run comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramSource {
    /// Run exactly this command
    Explicit(ProgramSpec),
    /// Run the single `*.app` file found in this directory
    Discover(PathBuf),
}

impl ProgramSource {
    /// Settle on a command line; discovery happens here, at run start
    pub fn resolve(&self) -> Result<ProgramSpec, AgentError> {
        match self {
            ProgramSource::Explicit(spec) => Ok(spec.clone()),
            ProgramSource::Discover(dir) => {
                let program = locate_program(dir, PROGRAM_EXTENSION)?;
                Ok(ProgramSpec::new(program).with_work_dir(dir))
            }
        }
    }
}

/// Find the one file in `dir` with the given extension
pub fn locate_program(dir: &Path, extension: &str) -> Result<PathBuf, AgentError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        AgentError::ProgramNotFound(format!("cannot read {}: {}", dir.display(), e))
    })?;

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension() == Some(OsStr::new(extension)))
        .collect();

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(AgentError::ProgramNotFound(format!(
            "no *.{} file in {}",
            extension,
            dir.display()
        ))),
        n => Err(AgentError::ProgramNotFound(format!(
            "{} *.{} files in {}, expected exactly one",
            n,
            extension,
            dir.display()
        ))),
    }
}

/// Spawn the child with piped standard streams
///
/// The child is killed if its handle is dropped, so an abandoned run never
/// leaves it behind.
pub fn spawn_program(program: &ProgramSpec, identity: &NodeIdentity) -> Result<Child, AgentError> {
    let mut command = Command::new(&program.command);
    command
        .args(&program.args)
        .env(CHILD_NODE_ID_ENV, identity.node_id().to_string())
        .env(CHILD_NODE_COUNT_ENV, identity.node_count().to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(ref dir) = program.work_dir {
        command.current_dir(dir);
    }

    let child = command.spawn().map_err(|source| AgentError::Spawn {
        program: program.display(),
        source,
    })?;
    info!(
        node = identity.node_id(),
        pid = child.id(),
        program = %program.display(),
        "spawned child"
    );
    Ok(child)
}

/// The child's three standard streams
pub(crate) struct ChildPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl ChildPipes {
    pub fn take(child: &mut Child) -> Result<Self, AgentError> {
        let missing = |stream| AgentError::Pipe {
            stream,
            source: io::Error::new(io::ErrorKind::BrokenPipe, "stream not captured"),
        };
        Ok(Self {
            stdin: child.stdin.take().ok_or_else(|| missing("stdin"))?,
            stdout: child.stdout.take().ok_or_else(|| missing("stdout"))?,
            stderr: child.stderr.take().ok_or_else(|| missing("stderr"))?,
        })
    }
}

/// Append each stdout line to the report until end-of-stream
async fn capture_stdout(stdout: ChildStdout, state: Arc<RunState>) {
    let mut reader = BufReader::new(stdout);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => return,
            Ok(_) => {
                while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
                    line.pop();
                }
                state
                    .report()
                    .append_log(format!("stdout: {}", String::from_utf8_lossy(&line)));
            }
            Err(source) => {
                state.fail(&AgentError::Pipe {
                    stream: "stdout",
                    source,
                });
                return;
            }
        }
    }
}

/// Force-kill the child and reap it; harmless if it already exited
pub(crate) async fn terminate(child: &mut Child, node_id: u32) {
    if let Err(e) = child.start_kill() {
        debug!(node = node_id, "kill skipped: {}", e);
    }
    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(node = node_id, %status, "child reaped"),
        Ok(Err(e)) => warn!(node = node_id, "failed to reap child: {}", e),
        Err(_) => warn!(node = node_id, "child not reaped after kill"),
    }
}

/// `now + timeout`, saturating to a far-future deadline on overflow
fn run_deadline(now: tokio::time::Instant, timeout: Duration) -> tokio::time::Instant {
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

async fn wait_for_exit(child: &mut Child) -> Result<(), AgentError> {
    let status = child.wait().await.map_err(AgentError::pipe("process"))?;
    if status.success() {
        Ok(())
    } else {
        Err(AgentError::ChildExit(status))
    }
}

enum Outcome {
    Completed,
    Failed(AgentError),
    /// Another task already moved the run to a terminal status
    Interrupted,
}

/// Everything the run task owns
pub(crate) struct RunTask {
    pub identity: NodeIdentity,
    pub config: RunConfig,
    pub state: Arc<RunState>,
    pub child: Child,
    pub pipes: ChildPipes,
    pub listener: PeerListener,
}

impl RunTask {
    /// Drive the run to a terminal status
    pub async fn run(self) {
        let RunTask {
            identity,
            config,
            state,
            mut child,
            pipes,
            listener,
        } = self;
        let node_id = identity.node_id();
        let report: Arc<ReportAggregator> = state.report().clone();
        let started = Timestamp::now();
        let deadline = run_deadline(tokio::time::Instant::now(), config.timeout());

        let (senders, receivers) = inbound_queues(identity.node_count());
        let listener_task = tokio::spawn(listener.run(
            senders,
            config.max_message_bytes,
            report.clone(),
        ));
        let mut stdout_task = tokio::spawn(capture_stdout(pipes.stdout, state.clone()));
        let memory_task = child
            .id()
            .map(|pid| tokio::spawn(sample_child_memory(pid, report.clone())));

        let mut mux = Multiplexer::new(
            node_id,
            config.max_messages_per_node,
            config.max_message_bytes,
            TcpPeerLink::new(identity.peers().to_vec()),
            receivers,
            report.clone(),
        );
        let mut terminal = state.subscribe();
        let control = BufReader::new(pipes.stderr);
        let reply = pipes.stdin;

        let outcome = tokio::select! {
            result = async {
                mux.run(control, reply).await?;
                wait_for_exit(&mut child).await
            } => match result {
                Ok(()) => Outcome::Completed,
                Err(e) => Outcome::Failed(e),
            },
            _ = tokio::time::sleep_until(deadline) => {
                Outcome::Failed(AgentError::Timeout(config.timeout()))
            }
            _ = terminal.wait_for(|status| status.is_terminal()) => Outcome::Interrupted,
        };
        drop(mux);

        match outcome {
            Outcome::Completed => {
                if tokio::time::timeout(STDOUT_DRAIN_GRACE, &mut stdout_task)
                    .await
                    .is_err()
                {
                    debug!(node = node_id, "stdout still open after exit");
                    stdout_task.abort();
                }
                report.record_run_time(started.elapsed());
                state.complete();
            }
            Outcome::Failed(e) => {
                state.fail(&e);
                terminate(&mut child, node_id).await;
                report.record_run_time(started.elapsed());
                stdout_task.abort();
            }
            Outcome::Interrupted => {
                terminate(&mut child, node_id).await;
                report.record_run_time(started.elapsed());
                stdout_task.abort();
            }
        }

        listener_task.abort();
        if let Some(task) = memory_task {
            task.abort();
        }
        info!(node = node_id, status = %state.status(), "run finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_locate_single_program() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("solution.app"), b"").unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let found = locate_program(dir.path(), "app").unwrap();
        assert_eq!(found, dir.path().join("solution.app"));
    }

    #[test]
    fn test_locate_no_program() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let err = locate_program(dir.path(), "app").unwrap_err();
        assert!(matches!(err, AgentError::ProgramNotFound(_)));
        assert!(err.to_string().contains("no *.app file"));
    }

    #[test]
    fn test_locate_ambiguous_program() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.app"), b"").unwrap();
        fs::write(dir.path().join("b.app"), b"").unwrap();

        let err = locate_program(dir.path(), "app").unwrap_err();
        assert!(err.to_string().contains("2 *.app files"));
    }

    #[test]
    fn test_locate_ignores_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("build.app")).unwrap();
        assert!(locate_program(dir.path(), "app").is_err());
    }

    #[test]
    fn test_discover_sets_work_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("run.app"), b"").unwrap();

        let spec = ProgramSource::Discover(dir.path().to_path_buf())
            .resolve()
            .unwrap();
        assert_eq!(spec.command, dir.path().join("run.app"));
        assert_eq!(spec.work_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_run_deadline_saturates() {
        let now = tokio::time::Instant::now();
        assert_eq!(run_deadline(now, Duration::from_secs(10)), now + Duration::from_secs(10));

        let huge = Duration::from_secs(i64::MAX as u64);
        assert_eq!(run_deadline(now, huge), now + FAR_FUTURE);
    }

    #[test]
    fn test_shell_spec_display() {
        let spec = ProgramSpec::shell("echo hi");
        assert_eq!(spec.display(), "/bin/sh -c echo hi");
    }

    #[tokio::test]
    async fn test_spawn_passes_identity_env() {
        let identity = NodeIdentity::new(1, vec!["a".into(), "b".into(), "c".into()]).unwrap();
        let spec = ProgramSpec::shell("echo $MESHRUN_NODE_ID/$MESHRUN_NODE_COUNT");
        let mut child = spawn_program(&spec, &identity).unwrap();
        let pipes = ChildPipes::take(&mut child).unwrap();

        let mut out = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut { pipes.stdout }, &mut out)
            .await
            .unwrap();
        assert_eq!(out.trim(), "1/3");
        assert!(child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let identity = NodeIdentity::new(0, vec!["a".into()]).unwrap();
        let spec = ProgramSpec::new("/nonexistent/meshrun-test-program");
        let err = spawn_program(&spec, &identity).unwrap_err();
        assert!(matches!(err, AgentError::Spawn { .. }));
    }
}
