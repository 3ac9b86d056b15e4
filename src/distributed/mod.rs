//! Node-to-node messaging
//!
//! # Modules
//!
//! - `protocol`: integer framing shared by the pipe protocol and the TCP transport
//! - `inbound`: per-sender FIFO queues between the listener and the control loop
//! - `transport`: the peer listener and the outbound per-message connections

pub mod inbound;
pub mod protocol;
pub mod transport;

// Re-export key types
pub use inbound::{inbound_queues, InboundReceivers, InboundSenders, INBOUND_QUEUE_CAPACITY};
pub use protocol::{ControlOp, DEFAULT_AGENT_PORT, INT_WIDTH};
pub use transport::{PeerLink, PeerListener, TcpPeerLink};
