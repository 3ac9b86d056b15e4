//! Inbound message store
//!
//! One FIFO per peer ordinal holding payloads that arrived over the network
//! before the local program asked for them. The listener is the only producer
//! and the control loop the only consumer, so each queue is a plain bounded
//! mpsc channel split into a sender half and a receiver half.

use tokio::sync::mpsc;

/// Pending messages buffered per peer before the listener waits
pub const INBOUND_QUEUE_CAPACITY: usize = 10;

/// Create `peers` empty queues with the default capacity
pub fn inbound_queues(peers: usize) -> (InboundSenders, InboundReceivers) {
    inbound_queues_with_capacity(peers, INBOUND_QUEUE_CAPACITY)
}

pub fn inbound_queues_with_capacity(
    peers: usize,
    capacity: usize,
) -> (InboundSenders, InboundReceivers) {
    let (senders, receivers): (Vec<_>, Vec<_>) =
        (0..peers).map(|_| mpsc::channel::<Vec<u8>>(capacity)).unzip();
    (InboundSenders { senders }, InboundReceivers { receivers })
}

/// Producer side, owned by the listener
#[derive(Debug, Clone)]
pub struct InboundSenders {
    senders: Vec<mpsc::Sender<Vec<u8>>>,
}

impl InboundSenders {
    pub fn peers(&self) -> usize {
        self.senders.len()
    }

    /// Messages from `source` waiting to be received
    pub fn pending(&self, source: u32) -> usize {
        self.senders
            .get(source as usize)
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Queue a payload from `source`, waiting while that queue is full
    ///
    /// Returns false when the consumer side is gone or `source` is out of
    /// range.
    pub async fn push(&self, source: u32, payload: Vec<u8>) -> bool {
        match self.senders.get(source as usize) {
            Some(tx) => tx.send(payload).await.is_ok(),
            None => false,
        }
    }
}

/// Consumer side, owned by the control loop
#[derive(Debug)]
pub struct InboundReceivers {
    receivers: Vec<mpsc::Receiver<Vec<u8>>>,
}

impl InboundReceivers {
    pub fn peers(&self) -> usize {
        self.receivers.len()
    }

    /// Wait for the next payload from `source`
    ///
    /// No timeout of its own; the run's overall timeout bounds it. Returns
    /// `None` if `source` is out of range or the producer side is gone.
    pub async fn recv(&mut self, source: u32) -> Option<Vec<u8>> {
        self.receivers.get_mut(source as usize)?.recv().await
    }
}
