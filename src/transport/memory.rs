//! In-process broadcast transport
//!
//! Mirrors the topology of the production message bus (a socket room that
//! echoes every frame to all members, sender included) without any I/O.
//! Used by the test suite and the demos; also handy as a reference for
//! writing a real adapter.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use super::{SignalTransport, TransportError};

/// Broadcast bus delivering every frame to every subscriber
///
/// Frames are `Bytes`, so fan-out clones are reference-counted rather
/// than copied. Subscribers whose receiver has been dropped are pruned on
/// the next send.
pub struct MemoryTransport {
    subscribers: Mutex<Vec<mpsc::Sender<Bytes>>>,
    connected: AtomicBool,
    capacity: usize,
}

impl MemoryTransport {
    /// Create a bus whose per-subscriber queues hold `capacity` frames
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            capacity,
        }
    }

    /// Simulate the channel dropping or recovering
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of live subscriptions
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait::async_trait]
impl SignalTransport for MemoryTransport {
    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }

        let mut subscribers = self.subscribers.lock().await;
        let mut dropped = false;
        for tx in subscribers.iter() {
            if tx.send(frame.clone()).await.is_err() {
                dropped = true;
            }
        }
        if dropped {
            subscribers.retain(|tx| !tx.is_closed());
        }
        Ok(())
    }

    async fn subscribe(&self) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().await.push(tx);
        rx
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
