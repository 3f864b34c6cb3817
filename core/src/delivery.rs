//! Delivery contexts: where completion callbacks run.
//!
//! The background worker never calls a completion directly. It hands a task
//! to the client's `DeliveryContext`, which decides the thread:
//!
//! - `WorkerDelivery` runs it right away on the worker thread;
//! - a `tokio::runtime::Handle` spawns it onto that runtime;
//! - a `DeliveryQueue` sends it to a `DeliveryLoop` that some other thread
//!   drains, the way a UI thread drains its message queue.

use std::sync::mpsc;
use std::time::Duration;

use tracing::warn;

/// A completion bound to its outcome, ready to run.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait DeliveryContext: Send + Sync {
    fn dispatch(&self, task: Task);
}

/// Runs completions on the background worker that produced them.
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerDelivery;

impl DeliveryContext for WorkerDelivery {
    fn dispatch(&self, task: Task) {
        task();
    }
}

impl DeliveryContext for tokio::runtime::Handle {
    fn dispatch(&self, task: Task) {
        self.spawn(async move { task() });
    }
}

/// Create a queue and the loop that drains it.
pub fn delivery_queue() -> (DeliveryQueue, DeliveryLoop) {
    let (tx, rx) = mpsc::channel();
    (DeliveryQueue { tx }, DeliveryLoop { rx })
}

/// Sending half: hand this to the client.
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<Task>,
}

impl DeliveryContext for DeliveryQueue {
    fn dispatch(&self, task: Task) {
        if self.tx.send(task).is_err() {
            warn!("delivery loop dropped; completion discarded");
        }
    }
}

/// Receiving half: run it on the thread that should see completions.
#[derive(Debug)]
pub struct DeliveryLoop {
    rx: mpsc::Receiver<Task>,
}

impl DeliveryLoop {
    /// Run every completion already queued. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one completion and run it.
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }
}
