//! Execution contexts that continuations are posted to.
//!
//! The engine never runs a continuation inline: every dispatch goes through a
//! [`Queue`], which must run submitted tasks later, in submission order.
//! Two backends are provided: [`WorkerQueue`], a dedicated thread draining a
//! multi-producer channel, and [`ManualQueue`], a FIFO the caller drains
//! explicitly (deterministic tests, or embedding into an external loop).

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An ordered execution context.
///
/// Contract: `submit` must not run the task synchronously, and tasks
/// submitted to the same queue run in submission order. Tasks on different
/// queues have no relative ordering.
pub trait Queue: Send + Sync {
    /// Hands a task over for later, order-preserving execution.
    fn submit(&self, task: Task);
}

/// Shared handle to a queue.
pub type QueueRef = Arc<dyn Queue>;

/// A queue backed by one worker thread draining an mpsc channel.
///
/// The worker exits once every handle to the queue is gone and all submitted
/// tasks have run.
///
/// # Examples
///
/// ```
/// use promise_chain::{Producer, WorkerQueue};
/// use futures::executor::block_on;
///
/// let queue = WorkerQueue::spawn();
/// let (producer, promise) = Producer::new(queue);
/// let doubled = promise.then(|n: i32| n * 2);
/// producer.resolve(21);
/// assert_eq!(block_on(doubled).unwrap(), 42);
/// ```
pub struct WorkerQueue {
    sender: Mutex<Sender<Task>>,
}

impl WorkerQueue {
    /// Spawns the worker thread and returns a handle to its queue.
    pub fn spawn() -> QueueRef {
        let (tx, rx) = channel::<Task>();
        thread::spawn(move || {
            // Ends when the channel disconnects.
            for task in rx {
                task();
            }
        });
        Arc::new(Self {
            sender: Mutex::new(tx),
        })
    }
}

impl Queue for WorkerQueue {
    fn submit(&self, task: Task) {
        // A disconnected worker means the queue was torn down; dropping the
        // task here is abandonment, not an error the submitter can act on.
        let _ = self.sender.lock().unwrap().send(task);
    }
}

/// A FIFO queue drained by the caller.
///
/// `submit` only enqueues; nothing runs until [`run_one`](Self::run_one) or
/// [`run_all`](Self::run_all) is called. Tasks may themselves submit more
/// tasks, which land at the back of the queue.
///
/// # Examples
///
/// ```
/// use promise_chain::{ManualQueue, Promise};
///
/// let queue = ManualQueue::new();
/// let _sum = Promise::resolved(queue.clone().into_ref(), 40).then(|n: i32| n + 2);
/// assert_eq!(queue.run_all(), 1);
/// ```
#[derive(Clone, Default)]
pub struct ManualQueue {
    tasks: Arc<Mutex<VecDeque<Task>>>,
}

impl ManualQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upcasts into the [`QueueRef`] the promise API takes.
    pub fn into_ref(self) -> QueueRef {
        Arc::new(self)
    }

    /// Runs the task at the front of the queue. Returns `false` when empty.
    pub fn run_one(&self) -> bool {
        // Pop before running so a task that submits more work does not
        // deadlock on the queue lock.
        let task = self.tasks.lock().unwrap().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Drains the queue, including tasks enqueued while draining.
    /// Returns how many tasks ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Number of tasks currently waiting.
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Queue for ManualQueue {
    fn submit(&self, task: Task) {
        self.tasks.lock().unwrap().push_back(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn manual_queue_runs_in_submission_order() {
        let queue = ManualQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let seen = seen.clone();
            queue.submit(Box::new(move || seen.lock().unwrap().push(i)));
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.run_all(), 4);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn manual_queue_drains_tasks_submitted_while_draining() {
        let queue = ManualQueue::new();
        let inner = queue.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let inner_hits = hits.clone();
        queue.submit(Box::new(move || {
            let inner_hits = inner_hits.clone();
            inner.submit(Box::new(move || {
                inner_hits.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        assert_eq!(queue.run_all(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn worker_queue_runs_submitted_tasks() {
        let queue = WorkerQueue::spawn();
        let (tx, rx) = channel();
        queue.submit(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn worker_queue_preserves_order() {
        let queue = WorkerQueue::spawn();
        let (tx, rx) = channel();
        for i in 0..8 {
            let tx = tx.clone();
            queue.submit(Box::new(move || tx.send(i).unwrap()));
        }
        drop(tx);
        let order: Vec<i32> = rx.iter().collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
    }
}
