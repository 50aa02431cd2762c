//! Where flushed deltas go.

use crate::error::{EntityError, Result};
use crate::reply::OutgoingDelta;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives the deltas entities flush, on behalf of the replication layer.
#[async_trait]
pub trait DeltaSink: Send + Sync + 'static {
    async fn send(&self, delta: OutgoingDelta) -> Result<()>;
}

/// Collects deltas in memory (for testing).
#[derive(Clone, Default)]
pub struct MemorySink {
    deltas: Arc<Mutex<Vec<OutgoingDelta>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far.
    pub fn take(&self) -> Vec<OutgoingDelta> {
        std::mem::take(&mut *self.deltas.lock())
    }

    pub fn len(&self) -> usize {
        self.deltas.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.lock().is_empty()
    }
}

#[async_trait]
impl DeltaSink for MemorySink {
    async fn send(&self, delta: OutgoingDelta) -> Result<()> {
        self.deltas.lock().push(delta);
        Ok(())
    }
}

/// Forwards deltas into a channel.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<OutgoingDelta>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<OutgoingDelta>) -> Self {
        Self { tx }
    }

    /// A sink and the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutgoingDelta>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl DeltaSink for ChannelSink {
    async fn send(&self, delta: OutgoingDelta) -> Result<()> {
        self.tx
            .send(delta)
            .await
            .map_err(|e| EntityError::Channel(e.to_string()))
    }
}
