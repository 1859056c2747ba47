//! Shutdown coordination.
//!
//! Shutdown happens in two phases: `drain()` flips a flag that makes
//! the dispatcher answer 503 while in-flight requests finish, then
//! `trigger()` tells every listener to close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    draining: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the listener-close signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// The flag the dispatcher checks on every request.
    pub fn draining_flag(&self) -> Arc<AtomicBool> {
        self.draining.clone()
    }

    /// Enter the drain phase: new requests are answered 503.
    pub fn drain(&self) {
        self.draining.store(true, Ordering::Relaxed);
    }

    /// Close all listeners.
    pub fn trigger(&self) {
        self.drain();
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_all_subscribers() {
        let shutdown = Shutdown::new();
        let mut a = shutdown.subscribe();
        let mut b = shutdown.subscribe();
        shutdown.trigger();
        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
        assert!(shutdown.draining_flag().load(Ordering::Relaxed));
    }

    #[test]
    fn test_drain_precedes_close() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.draining_flag().load(Ordering::Relaxed));
        shutdown.drain();
        assert!(shutdown.draining_flag().load(Ordering::Relaxed));
    }
}
