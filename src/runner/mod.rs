//! Node agent
//!
//! One [`Agent`] runs one program on this node for one run. The caller builds
//! it from the node's identity, calls [`Agent::start`], then polls
//! [`Agent::status`] / [`Agent::report`] or awaits [`Agent::wait`].
//!
//! Status only moves forward:
//!
//! ```text
//! INITIALIZED -> RUNNING -> DONE
//!                       \-> ERROR
//! ```
//!
//! DONE and ERROR are terminal. Several tasks can detect a failure at once
//! (control loop, stdout capture, timer, a caller's stop), so the move to a
//! terminal status is a single compare-and-set made while holding the report
//! lock: the first caller wins and writes its reason into the log, later ones
//! are only traced.

pub mod error;
pub mod multiplexer;
pub mod supervisor;

pub use error::AgentError;
pub use supervisor::{ProgramSource, ProgramSpec};

use crate::config::identity::IdentitySource;
use crate::config::validator::validate_run;
use crate::config::{NodeIdentity, RunConfig};
use crate::distributed::transport::PeerListener;
use crate::stats::{ReportAggregator, RunReport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use supervisor::{spawn_program, ChildPipes, RunTask};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Initialized,
    Running,
    Done,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Error)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Initialized => "INITIALIZED",
            RunStatus::Running => "RUNNING",
            RunStatus::Done => "DONE",
            RunStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Status plus report, shared by every task of a run
#[derive(Debug)]
pub(crate) struct RunState {
    status: watch::Sender<RunStatus>,
    report: Arc<ReportAggregator>,
}

impl RunState {
    fn new(report: Arc<ReportAggregator>) -> Self {
        let (status, _) = watch::channel(RunStatus::Initialized);
        Self { status, report }
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub fn report(&self) -> &Arc<ReportAggregator> {
        &self.report
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    /// Move `from` to `to` atomically; false if the status was not `from`
    fn transition(&self, from: RunStatus, to: RunStatus) -> bool {
        let mut report = self.report.lock();
        let moved = self.status.send_if_modified(|status| {
            if *status == from {
                *status = to;
                true
            } else {
                false
            }
        });
        if moved {
            report.status = to;
            debug!(node = report.node_id, %from, %to, "status changed");
        }
        moved
    }

    /// INITIALIZED -> RUNNING
    fn begin(&self) -> bool {
        self.transition(RunStatus::Initialized, RunStatus::Running)
    }

    /// RUNNING -> DONE
    pub fn complete(&self) -> bool {
        self.transition(RunStatus::Running, RunStatus::Done)
    }

    /// Fail the run once; true only for the call that made it terminal
    pub fn fail(&self, err: &AgentError) -> bool {
        let mut report = self.report.lock();
        let failed = self.status.send_if_modified(|status| {
            if status.is_terminal() {
                false
            } else {
                *status = RunStatus::Error;
                true
            }
        });
        if failed {
            report.status = RunStatus::Error;
            report.messages.push(err.to_string());
            warn!(node = report.node_id, "run failed: {}", err);
        } else {
            debug!(node = report.node_id, "ignoring failure after terminal status: {}", err);
        }
        failed
    }
}

/// Runs one program on this node and reports on it
pub struct Agent {
    identity: NodeIdentity,
    program: ProgramSource,
    listen_addr: String,
    listener: Mutex<Option<PeerListener>>,
    state: Arc<RunState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    pub fn new(identity: NodeIdentity, program: ProgramSource) -> Self {
        let report = Arc::new(ReportAggregator::new(identity.node_id(), identity.address()));
        let listen_addr = identity.listen_addr();
        Self {
            identity,
            program,
            listen_addr,
            listener: Mutex::new(None),
            state: Arc::new(RunState::new(report)),
            task: Mutex::new(None),
        }
    }

    /// Discover this node's ordinal and peers from its environment
    pub fn init(source: &IdentitySource, program: ProgramSource) -> crate::Result<Self> {
        let identity = NodeIdentity::discover(source)?;
        info!(
            node = identity.node_id(),
            peers = identity.node_count(),
            address = identity.address(),
            "node identity discovered"
        );
        Ok(Self::new(identity, program))
    }

    /// Bind the peer listener here instead of the wildcard address
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Bind the peer listener ahead of [`Agent::start`]
    ///
    /// Peers may send as soon as their own child runs, so a launcher that
    /// starts several nodes binds all of them first.
    pub async fn bind(&self) -> crate::Result<SocketAddr> {
        let listener = PeerListener::bind(&self.listen_addr).await?;
        let addr = listener.local_addr();
        *self.listener.lock() = Some(listener);
        Ok(addr)
    }

    /// Begin the run
    ///
    /// Returns once the peer listener is bound and the child is spawned, so
    /// peers started afterwards can reach this node. A failure here is also
    /// recorded in the report and leaves the agent in ERROR.
    pub async fn start(&self, config: RunConfig) -> crate::Result<()> {
        validate_run(&config, &self.identity)?;
        if !self.state.begin() {
            anyhow::bail!(
                "node {} already started (status {})",
                self.identity.node_id(),
                self.status()
            );
        }
        info!(node = self.identity.node_id(), %config, "starting run");

        match self.launch(config).await {
            Ok(handle) => {
                *self.task.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.state.fail(&e);
                Err(e.into())
            }
        }
    }

    async fn launch(&self, config: RunConfig) -> Result<JoinHandle<()>, AgentError> {
        let program = self.program.resolve()?;
        let bound = self.listener.lock().take();
        let listener = match bound {
            Some(listener) => listener,
            None => PeerListener::bind(&self.listen_addr).await?,
        };
        let mut child = spawn_program(&program, &self.identity)?;
        self.state.report().record_start();
        let pipes = ChildPipes::take(&mut child)?;

        let task = RunTask {
            identity: self.identity.clone(),
            config,
            state: self.state.clone(),
            child,
            pipes,
            listener,
        };
        Ok(tokio::spawn(task.run()))
    }

    /// Stop the run; a stop is a failure with reason "received stop"
    ///
    /// Idempotent, and a no-op once the run is terminal.
    pub fn stop(&self) {
        self.state.fail(&AgentError::Stopped);
    }

    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    /// Snapshot of the report, valid at any point of the run
    pub fn report(&self) -> RunReport {
        self.state.report().snapshot()
    }

    /// Wait until the run is terminal and its child is gone
    pub async fn wait(&self) -> RunReport {
        let handle = self.task.lock().take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    warn!(node = self.identity.node_id(), "run task ended abnormally: {}", e);
                }
            }
            None => {
                let mut status = self.state.subscribe();
                // The sender lives in `self.state`, so this cannot see a
                // closed channel.
                let _ = status.wait_for(|s| s.is_terminal()).await;
            }
        }
        self.report()
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}
