//! Run failure taxonomy
//!
//! Every failure a run can hit maps onto one of these variants. The
//! `Display` text is what lands in the report log when the run fails.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Truncated or unreadable control-channel data
    #[error("framing error while reading {context}: {source}")]
    Framing {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("message too large: {length} bytes (max {max})")]
    MessageTooLarge { length: u64, max: u64 },

    #[error("too many messages: limit of {max} sends per node reached")]
    TooManyMessages { max: u64 },

    #[error("transport error with {peer}: {source}")]
    Transport {
        peer: String,
        #[source]
        source: io::Error,
    },

    #[error("inbound queue for node {source_node} closed")]
    InboundClosed { source_node: u32 },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("pipe error on child {stream}: {source}")]
    Pipe {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("child exited abnormally: {0}")]
    ChildExit(ExitStatus),

    #[error("program not found: {0}")]
    ProgramNotFound(String),

    #[error("listener failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timeout: run exceeded {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("invalid control byte: {0:#04x}")]
    InvalidControlByte(u8),

    #[error("invalid node ordinal {ordinal} (nodes: {nodes})")]
    InvalidOrdinal { ordinal: u32, nodes: usize },

    #[error("received stop")]
    Stopped,
}

impl AgentError {
    pub(crate) fn framing(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| AgentError::Framing { context, source }
    }

    pub(crate) fn pipe(stream: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| AgentError::Pipe { stream, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let err = AgentError::MessageTooLarge { length: 2 * 1024 * 1024, max: 1024 * 1024 };
        assert_eq!(err.to_string(), "message too large: 2097152 bytes (max 1048576)");

        let err = AgentError::InvalidControlByte(7);
        assert_eq!(err.to_string(), "invalid control byte: 0x07");

        let err = AgentError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "timeout: run exceeded 10s");
    }

    #[test]
    fn test_framing_keeps_context() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "early eof");
        let err = AgentError::framing("send length")(io_err);
        assert!(err.to_string().contains("send length"));
        assert!(err.to_string().contains("early eof"));
    }
}
