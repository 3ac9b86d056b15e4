//! meshrun - per-node execution agent for distributed message-passing programs
//!
//! Each participating node runs one agent. The agent spawns the node's
//! program, speaks a small binary protocol with it over the program's own
//! standard streams, and relays its messages to the other nodes over TCP.
//!
//! # Architecture
//!
//! - **Pipe protocol**: control requests (SEND / RECEIVE / DEBUG) on the
//!   child's stderr, replies on its stdin, free text on its stdout
//! - **Peer transport**: one TCP connection per message, framed as
//!   `[sender ordinal][payload]`, queued per sender on arrival
//! - **Limits**: run timeout, messages per node, bytes per message
//! - **Report**: send count, largest message, log lines, run time, peak
//!   memory and a terminal status of DONE or ERROR

pub mod config;
pub mod distributed;
pub mod output;
pub mod runner;
pub mod stats;
pub mod util;

// Re-export commonly used types
pub use config::{NodeIdentity, RunConfig};
pub use runner::{Agent, AgentError, ProgramSource, ProgramSpec, RunStatus};
pub use stats::RunReport;

/// Result type used throughout meshrun
pub type Result<T> = anyhow::Result<T>;
