//! The producer side of a promise pair.
//!
//! Whoever initiates an asynchronous operation holds the [`Producer`] and
//! must settle it exactly once. Consuming `self` in
//! [`resolve`](Producer::resolve)/[`reject`](Producer::reject) makes a second
//! resolution impossible from this API. An unresolved producer rejects on
//! drop so consumers never wait on a promise that can no longer be settled.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{Producer, WorkerQueue};
//! use futures::executor::block_on;
//! use std::thread;
//!
//! let queue = WorkerQueue::spawn();
//! let (producer, promise) = Producer::new(queue);
//! let task1 = thread::spawn(move || block_on(async {
//!     println!("Received {:?}", promise.await);
//! }));
//! producer.resolve(String::from("Hi"));
//! task1.join().expect("The task1 thread has panicked.");
//! ```

use std::fmt;
use std::sync::Arc;

use crate::expect::{ErrorToken, Expect};
use crate::promise::Promise;
use crate::queue::QueueRef;
use crate::state::State;
use crate::Error;

/// Consume-once handle that settles one promise.
pub struct Producer<T: Send + 'static> {
    state: Arc<State<T>>,
}

impl<T: Send + 'static> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl<T: Send + 'static> Producer<T> {
    /// Creates a pending promise pair. `queue` becomes the promise's default
    /// dispatch queue.
    pub fn new(queue: QueueRef) -> (Self, Promise<T>) {
        let state = State::new();
        (
            Self {
                state: state.clone(),
            },
            Promise::new(state, queue),
        )
    }

    /// Settles the promise with a value.
    pub fn resolve(self, value: T) {
        self.state.resolve(Expect::Value(value));
    }

    /// Settles the promise with an error.
    pub fn reject<E>(self, err: E)
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.state.resolve(Expect::Error(ErrorToken::new(err)));
    }

    /// Settles the promise with an already-captured error token.
    pub fn reject_token(self, token: ErrorToken) {
        self.state.resolve(Expect::Error(token));
    }

    /// Settles the promise with a complete outcome.
    pub fn settle(self, outcome: Expect<T>) {
        self.state.resolve(outcome);
    }

    /// Whether this producer's promise has been settled.
    pub fn is_resolved(&self) -> bool {
        self.state.is_resolved()
    }
}

impl<T: Send + 'static> Drop for Producer<T> {
    /// An unresolved producer rejects with [`Error::ProducerDropped`].
    fn drop(&mut self) {
        if !self.state.is_resolved() {
            self.state
                .resolve(Expect::Error(ErrorToken::new(Error::ProducerDropped)));
        }
    }
}
