//! Single-threaded deferred work queues.
//!
//! Each queue owns one task that runs items strictly in submission order.
//! Queueing an item that is already pending is a no-op, so a burst of
//! interrupts collapses into one run. [`WorkQueue::queue`] never blocks and
//! may be called from interrupt context.

use async_trait::async_trait;
use std::{
    collections::HashSet,
    fmt::Debug,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError, Weak},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::trace;

/// Executes the items of one queue.
#[async_trait]
pub trait WorkHandler<W: Send + 'static>: Send + Sync + 'static {
    async fn run(&self, work: W);
}

pub struct WorkQueue<W> {
    name: &'static str,
    tx: mpsc::UnboundedSender<W>,
    pending: Arc<Mutex<HashSet<W>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl<W> WorkQueue<W>
where
    W: Copy + Eq + Hash + Debug + Send + 'static,
{
    /// Spawns the queue task. Must be called from within a tokio runtime.
    ///
    /// The handler is held weakly; the queue stops once it is gone.
    pub fn spawn<H>(name: &'static str, handler: Weak<H>) -> Self
    where
        H: WorkHandler<W>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(HashSet::new()));
        let join = tokio::spawn(run_queue(name, rx, pending.clone(), handler));
        Self {
            name,
            tx,
            pending,
            join: Mutex::new(Some(join)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queues `work` unless it is already pending. Returns whether it was queued.
    pub fn queue(&self, work: W) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !pending.insert(work) {
            trace!(queue = self.name, ?work, "work already pending");
            return false;
        }
        if self.tx.send(work).is_err() {
            pending.remove(&work);
            trace!(queue = self.name, ?work, "queue stopped; work dropped");
            return false;
        }
        true
    }

    pub fn is_pending(&self, work: W) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&work)
    }

    /// Stops the queue task, dropping pending work.
    pub fn shutdown(&self) {
        let join = self
            .join
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(join) = join {
            join.abort();
            trace!(queue = self.name, "queue stopped");
        }
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<W> Drop for WorkQueue<W> {
    fn drop(&mut self) {
        if let Some(join) = self
            .join
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            join.abort();
        }
    }
}

async fn run_queue<W, H>(
    name: &'static str,
    mut rx: mpsc::UnboundedReceiver<W>,
    pending: Arc<Mutex<HashSet<W>>>,
    handler: Weak<H>,
) where
    W: Copy + Eq + Hash + Debug + Send + 'static,
    H: WorkHandler<W>,
{
    while let Some(work) = rx.recv().await {
        pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&work);
        let Some(handler) = handler.upgrade() else {
            break;
        };
        trace!(queue = name, ?work, "run work");
        handler.run(work).await;
    }
    trace!(queue = name, "queue exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Job {
        A,
        B,
    }

    #[derive(Default)]
    struct Recorder {
        runs: Mutex<Vec<Job>>,
    }

    #[async_trait]
    impl WorkHandler<Job> for Recorder {
        async fn run(&self, work: Job) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.runs.lock().unwrap().push(work);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_work_is_coalesced() {
        let recorder = Arc::new(Recorder::default());
        let queue = WorkQueue::spawn("test", Arc::downgrade(&recorder));
        assert!(queue.queue(Job::A));
        assert!(!queue.queue(Job::A));
        assert!(queue.queue(Job::B));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*recorder.runs.lock().unwrap(), vec![Job::A, Job::B]);
    }

    #[tokio::test(start_paused = true)]
    async fn running_work_can_be_requeued() {
        let recorder = Arc::new(Recorder::default());
        let queue = WorkQueue::spawn("test", Arc::downgrade(&recorder));
        queue.queue(Job::A);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!queue.is_pending(Job::A));
        assert!(queue.queue(Job::A));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*recorder.runs.lock().unwrap(), vec![Job::A, Job::A]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_work() {
        let recorder = Arc::new(Recorder::default());
        let queue = WorkQueue::spawn("test", Arc::downgrade(&recorder));
        queue.shutdown();
        queue.queue(Job::A);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recorder.runs.lock().unwrap().is_empty());
    }
}
