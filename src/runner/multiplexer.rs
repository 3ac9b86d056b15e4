//! Protocol multiplexer
//!
//! Reads the child's control stream one request at a time and carries each
//! request out before reading the next byte:
//!
//! - SEND: validate, forward to the target peer, count it
//! - RECEIVE: block on the source peer's inbound queue, answer on the reply
//!   channel
//! - DEBUG: append the text to the report log
//!
//! End-of-stream at a request boundary is the normal end of the run. This
//! loop is the only writer of the child's reply channel.

use crate::distributed::inbound::InboundReceivers;
use crate::distributed::protocol::{encode_receive_reply, read_int, ControlOp};
use crate::distributed::transport::PeerLink;
use crate::runner::AgentError;
use crate::stats::ReportAggregator;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Per-run state of the control loop
pub struct Multiplexer<L> {
    node_id: u32,
    max_messages: u64,
    max_message_bytes: u64,
    link: L,
    inbound: InboundReceivers,
    report: Arc<ReportAggregator>,
}

impl<L: PeerLink> Multiplexer<L> {
    pub fn new(
        node_id: u32,
        max_messages: u64,
        max_message_bytes: u64,
        link: L,
        inbound: InboundReceivers,
        report: Arc<ReportAggregator>,
    ) -> Self {
        Self {
            node_id,
            max_messages,
            max_message_bytes,
            link,
            inbound,
            report,
        }
    }

    /// Serve requests until the control stream ends
    pub async fn run<R, W>(&mut self, mut control: R, mut reply: W) -> Result<(), AgentError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut byte = [0u8; 1];
        loop {
            let n = control
                .read(&mut byte)
                .await
                .map_err(AgentError::pipe("stderr"))?;
            if n == 0 {
                debug!(node = self.node_id, "control stream closed");
                return Ok(());
            }

            match ControlOp::from_byte(byte[0]) {
                Some(ControlOp::Send) => self.handle_send(&mut control).await?,
                Some(ControlOp::Receive) => self.handle_receive(&mut control, &mut reply).await?,
                Some(ControlOp::Debug) => self.handle_debug(&mut control).await?,
                None => return Err(AgentError::InvalidControlByte(byte[0])),
            }
        }
    }

    async fn handle_send<R>(&mut self, control: &mut R) -> Result<(), AgentError>
    where
        R: AsyncRead + Unpin,
    {
        let target = read_int(control)
            .await
            .map_err(AgentError::framing("send target"))?;
        let length = read_int(control)
            .await
            .map_err(AgentError::framing("send length"))? as u64;

        // Limits are checked before the payload is touched
        if length > self.max_message_bytes {
            return Err(AgentError::MessageTooLarge {
                length,
                max: self.max_message_bytes,
            });
        }
        if self.report.send_count() >= self.max_messages {
            return Err(AgentError::TooManyMessages {
                max: self.max_messages,
            });
        }
        let nodes = self.inbound.peers();
        if target as usize >= nodes {
            return Err(AgentError::InvalidOrdinal { ordinal: target, nodes });
        }

        let mut payload = vec![0u8; length as usize];
        control
            .read_exact(&mut payload)
            .await
            .map_err(AgentError::framing("send payload"))?;

        self.link.deliver(target, self.node_id, &payload).await?;
        self.report.record_send(length);
        Ok(())
    }

    async fn handle_receive<R, W>(&mut self, control: &mut R, reply: &mut W) -> Result<(), AgentError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let source = read_int(control)
            .await
            .map_err(AgentError::framing("receive source"))?;
        let nodes = self.inbound.peers();
        if source as usize >= nodes {
            return Err(AgentError::InvalidOrdinal { ordinal: source, nodes });
        }

        // Blocks until the peer's message arrives; only the run timeout
        // bounds this wait.
        let payload = self
            .inbound
            .recv(source)
            .await
            .ok_or(AgentError::InboundClosed { source_node: source })?;

        reply
            .write_all(&encode_receive_reply(source, &payload))
            .await
            .map_err(AgentError::pipe("stdin"))?;
        reply.flush().await.map_err(AgentError::pipe("stdin"))?;
        Ok(())
    }

    async fn handle_debug<R>(&mut self, control: &mut R) -> Result<(), AgentError>
    where
        R: AsyncRead + Unpin,
    {
        let length = read_int(control)
            .await
            .map_err(AgentError::framing("debug length"))? as u64;

        let mut text = Vec::new();
        control
            .take(length)
            .read_to_end(&mut text)
            .await
            .map_err(AgentError::framing("debug payload"))?;
        if (text.len() as u64) < length {
            return Err(AgentError::Framing {
                context: "debug payload",
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("declared {} bytes, got {}", length, text.len()),
                ),
            });
        }

        self.report.append_log(String::from_utf8_lossy(&text).into_owned());
        Ok(())
    }
}
