//! One-shot completion primitive with explicit reset.
//!
//! A [`Rendezvous`] stays signaled until [`Rendezvous::reset`] is called, so a
//! signal that arrives before the waiter is not lost. Only one waiter is
//! served at a time.

use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
    Interrupted,
}

pub struct Rendezvous {
    name: &'static str,
    tx: watch::Sender<bool>,
    rx: Mutex<watch::Receiver<bool>>,
}

impl Rendezvous {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            name,
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signals the primitive. Signaling an already signaled primitive is a no-op.
    pub fn signal(&self) {
        let changed = self.tx.send_if_modified(|signaled| {
            if *signaled {
                false
            } else {
                *signaled = true;
                true
            }
        });
        trace!(rendezvous = self.name, changed, "signal");
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
        trace!(rendezvous = self.name, "reset");
    }

    pub fn is_signaled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until signaled. The primitive stays signaled afterwards.
    pub async fn wait(&self) {
        let mut rx = self.rx.lock().await;
        // the sender lives in `self`, so the channel cannot close
        let _ = rx.wait_for(|signaled| *signaled).await;
    }

    pub async fn wait_with_timeout(&self, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(()) => WaitOutcome::Signaled,
            Err(_) => {
                trace!(rendezvous = self.name, ?timeout, "wait timed out");
                WaitOutcome::TimedOut
            }
        }
    }

    /// Waits until signaled or until `interrupt` fires. An interrupted wait
    /// leaves the primitive untouched.
    pub async fn wait_interruptible(&self, interrupt: &CancellationToken) -> WaitOutcome {
        tokio::select! {
            biased;
            () = self.wait() => WaitOutcome::Signaled,
            () = interrupt.cancelled() => {
                trace!(rendezvous = self.name, "wait interrupted");
                WaitOutcome::Interrupted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn signal_before_wait_is_kept() {
        let rv = Rendezvous::new("test");
        rv.signal();
        rv.signal();
        assert_eq!(
            rv.wait_with_timeout(Duration::from_millis(10)).await,
            WaitOutcome::Signaled
        );
        // still signaled until reset
        assert!(rv.is_signaled());
        rv.reset();
        assert!(!rv.is_signaled());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_later_signal_reaches_next_waiter() {
        let rv = Arc::new(Rendezvous::new("test"));
        assert_eq!(
            rv.wait_with_timeout(Duration::from_secs(6)).await,
            WaitOutcome::TimedOut
        );
        let waiter = {
            let rv = rv.clone();
            tokio::spawn(async move { rv.wait_with_timeout(Duration::from_secs(6)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        rv.signal();
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Signaled);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_wait_leaves_state() {
        let rv = Rendezvous::new("test");
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(rv.wait_interruptible(&token).await, WaitOutcome::Interrupted);
        assert!(!rv.is_signaled());

        rv.signal();
        assert_eq!(rv.wait_interruptible(&token).await, WaitOutcome::Signaled);
        assert!(rv.is_signaled());
    }
}
