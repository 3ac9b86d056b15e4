//! Peer network transport
//!
//! Inbound: a TCP listener that reads one message per connection and queues
//! it for its sender. Connections are handled inline, one at a time, so a
//! burst of peers serializes behind the accept loop.
//!
//! Outbound: one short-lived connection per message, no pooling, no retry.
//! An unreachable peer is a transport error for the run.

use crate::distributed::inbound::InboundSenders;
use crate::distributed::protocol::{encode_peer_message, read_int};
use crate::runner::AgentError;
use crate::stats::ReportAggregator;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Outbound path to peer agents
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Deliver `payload` to node `target`, tagged with `sender`
    async fn deliver(&self, target: u32, sender: u32, payload: &[u8]) -> Result<(), AgentError>;
}

/// Opens a fresh TCP connection per message
#[derive(Debug, Clone)]
pub struct TcpPeerLink {
    peers: Vec<String>,
}

impl TcpPeerLink {
    pub fn new(peers: Vec<String>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl PeerLink for TcpPeerLink {
    async fn deliver(&self, target: u32, sender: u32, payload: &[u8]) -> Result<(), AgentError> {
        let peer = self
            .peers
            .get(target as usize)
            .ok_or(AgentError::InvalidOrdinal {
                ordinal: target,
                nodes: self.peers.len(),
            })?;
        let transport = |source| AgentError::Transport {
            peer: peer.clone(),
            source,
        };

        let mut stream = TcpStream::connect(peer.as_str()).await.map_err(transport)?;
        stream
            .write_all(&encode_peer_message(sender, payload))
            .await
            .map_err(transport)?;
        stream.shutdown().await.map_err(transport)?;
        debug!(target_node = target, bytes = payload.len(), "delivered message");
        Ok(())
    }
}

/// Listener accepting messages from peer agents
#[derive(Debug)]
pub struct PeerListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl PeerListener {
    pub async fn bind(addr: &str) -> Result<Self, AgentError> {
        let bind_err = |source| AgentError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        info!(%local_addr, "peer listener bound");
        Ok(Self { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop; runs until the task is aborted at the end of the run
    ///
    /// A malformed connection is logged against that exchange and dropped,
    /// it never fails the run.
    pub async fn run(
        self,
        queues: InboundSenders,
        max_message_bytes: u64,
        report: Arc<ReportAggregator>,
    ) {
        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept peer connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            match read_inbound(stream, queues.peers(), max_message_bytes).await {
                Ok((source, payload)) => {
                    let pending = queues.pending(source);
                    if pending > 0 {
                        warn!(
                            "message from node {} when {} already in queue",
                            source, pending
                        );
                    }
                    if !queues.push(source, payload).await {
                        debug!(source, "inbound queue closed, dropping message");
                    }
                }
                Err(e) => {
                    warn!(%peer_addr, "dropping inbound connection: {}", e);
                    report.append_log(format!("listener: connection from {}: {}", peer_addr, e));
                }
            }
        }
    }
}

/// Read `[sender][payload...]` until the peer closes
async fn read_inbound(
    mut stream: TcpStream,
    peers: usize,
    max_message_bytes: u64,
) -> Result<(u32, Vec<u8>), AgentError> {
    let source = read_int(&mut stream)
        .await
        .map_err(AgentError::framing("inbound sender ordinal"))?;
    if source as usize >= peers {
        return Err(AgentError::InvalidOrdinal { ordinal: source, nodes: peers });
    }

    let mut payload = Vec::new();
    (&mut stream)
        .take(max_message_bytes + 1)
        .read_to_end(&mut payload)
        .await
        .map_err(AgentError::framing("inbound payload"))?;
    if payload.len() as u64 > max_message_bytes {
        return Err(AgentError::MessageTooLarge {
            length: payload.len() as u64,
            max: max_message_bytes,
        });
    }
    Ok((source, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::inbound::{inbound_queues, InboundReceivers};
    use tokio::task::JoinHandle;

    async fn start_listener(
        peers: usize,
        max: u64,
    ) -> (SocketAddr, InboundReceivers, Arc<ReportAggregator>, JoinHandle<()>) {
        let listener = PeerListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        let (tx, rx) = inbound_queues(peers);
        let report = Arc::new(ReportAggregator::new(0, addr.to_string()));
        let handle = tokio::spawn(listener.run(tx, max, report.clone()));
        (addr, rx, report, handle)
    }

    #[tokio::test]
    async fn test_deliver_reaches_listener_queue() {
        let (addr, mut rx, _report, handle) = start_listener(3, 1024).await;
        let link = TcpPeerLink::new(vec![addr.to_string(); 3]);

        link.deliver(0, 2, b"0123456789").await.unwrap();
        assert_eq!(rx.recv(2).await.unwrap(), b"0123456789");
        handle.abort();
    }

    #[tokio::test]
    async fn test_fifo_per_sender() {
        let (addr, mut rx, _report, handle) = start_listener(2, 1024).await;
        let link = TcpPeerLink::new(vec![addr.to_string(); 2]);

        for i in 0..5u8 {
            link.deliver(0, 1, &[i]).await.unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(rx.recv(1).await.unwrap(), vec![i]);
        }
        handle.abort();
    }

    #[tokio::test]
    async fn test_backlogged_queue_still_accepts() {
        let listener = PeerListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr();
        let (tx, mut rx) = inbound_queues(2);
        let observer = tx.clone();
        let report = Arc::new(ReportAggregator::new(0, addr.to_string()));
        let handle = tokio::spawn(listener.run(tx, 1024, report.clone()));
        let link = TcpPeerLink::new(vec![addr.to_string(); 2]);

        // Second arrival finds the first one still queued
        link.deliver(0, 1, b"first").await.unwrap();
        link.deliver(0, 1, b"second").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while observer.pending(1) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both messages queued");

        assert_eq!(observer.pending(1), 2);
        assert_eq!(observer.pending(0), 0);
        assert_eq!(rx.recv(1).await.unwrap(), b"first");
        assert_eq!(rx.recv(1).await.unwrap(), b"second");
        assert_eq!(observer.pending(1), 0);
        // A backlog is a warning, never a report entry
        assert!(report.snapshot().messages.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn test_empty_payload() {
        let (addr, mut rx, _report, handle) = start_listener(2, 1024).await;
        let link = TcpPeerLink::new(vec![addr.to_string(); 2]);

        link.deliver(0, 1, b"").await.unwrap();
        assert!(rx.recv(1).await.unwrap().is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn test_malformed_connection_is_not_fatal() {
        let (addr, mut rx, report, handle) = start_listener(2, 1024).await;

        // Two bytes only: truncated sender ordinal
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[1, 0]).await.unwrap();
        stream.shutdown().await.unwrap();
        drop(stream);

        // Listener keeps serving afterwards
        let link = TcpPeerLink::new(vec![addr.to_string(); 2]);
        link.deliver(0, 0, b"ok").await.unwrap();
        assert_eq!(rx.recv(0).await.unwrap(), b"ok");

        let log = report.snapshot().messages;
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("framing error"));
        handle.abort();
    }

    #[tokio::test]
    async fn test_unknown_sender_is_dropped() {
        let (addr, mut rx, report, handle) = start_listener(2, 1024).await;
        let link = TcpPeerLink::new(vec![addr.to_string()]);

        link.deliver(0, 9, b"who").await.unwrap();
        // Connections are handled in accept order, so once this one is
        // queued the bad one has been processed.
        link.deliver(0, 0, b"sync").await.unwrap();
        assert_eq!(rx.recv(0).await.unwrap(), b"sync");

        let log = report.snapshot().messages;
        assert!(log.iter().any(|l| l.contains("invalid node ordinal 9")));
        handle.abort();
    }

    #[tokio::test]
    async fn test_oversized_inbound_is_dropped() {
        let (addr, mut rx, report, handle) = start_listener(2, 4).await;
        let link = TcpPeerLink::new(vec![addr.to_string()]);

        link.deliver(0, 1, b"too long").await.unwrap();
        link.deliver(0, 1, b"fit").await.unwrap();

        assert_eq!(rx.recv(1).await.unwrap(), b"fit");
        let log = report.snapshot().messages;
        assert!(log.iter().any(|l| l.contains("message too large")));
        handle.abort();
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let link = TcpPeerLink::new(vec![addr.to_string()]);

        let err = link.deliver(0, 0, b"lost").await.unwrap_err();
        assert!(matches!(err, AgentError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_deliver_to_unknown_target() {
        let link = TcpPeerLink::new(vec!["127.0.0.1:1".to_string()]);
        let err = link.deliver(4, 0, b"x").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidOrdinal { ordinal: 4, nodes: 1 }));
    }
}
