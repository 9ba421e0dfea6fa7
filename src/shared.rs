//! The copyable promise handle: many consumers, one value, independent
//! copies.
//!
//! A [`SharedPromise`] clones freely and every consumer (combinator chain or
//! `.await`) receives its own copy of the resolved value, which is why the
//! value type must be `Clone`. Conversion goes both ways:
//! [`Promise::share`](crate::Promise::share) and
//! [`SharedPromise::unshare`].
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
//! let shared = promise.share();
//! let other = shared.clone();
//! let task1 = thread::spawn(move || block_on(async move {
//!     assert_eq!(shared.await.unwrap(), vec![1, 2, 3]);
//! }));
//! let task2 = thread::spawn(move || block_on(async move {
//!     assert_eq!(other.await.unwrap(), vec![1, 2, 3]);
//! }));
//! producer.resolve(vec![1, 2, 3]);
//! task1.join().expect("The task1 thread has panicked");
//! task2.join().expect("The task2 thread has panicked");
//! ```

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::expect::{ErrorToken, Expect};
use crate::promise::{Promise, Settle};
use crate::queue::QueueRef;
use crate::state::{clone_extract, State};

/// A duplicable handle to a deferred outcome.
pub struct SharedPromise<T: Clone + Send + 'static> {
    state: Arc<State<T>>,
    queue: QueueRef,
}

impl<T: Clone + Send + 'static> Clone for SharedPromise<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> SharedPromise<T> {
    pub(crate) fn new(state: Arc<State<T>>, queue: QueueRef) -> Self {
        Self { state, queue }
    }

    /// The queue consumers inherit by default.
    pub fn queue(&self) -> &QueueRef {
        &self.queue
    }

    /// Whether the backing state has been resolved yet.
    pub fn is_resolved(&self) -> bool {
        self.state.is_resolved()
    }

    /// Splits off a fresh consume-once promise that resolves with a copy of
    /// this promise's outcome. Each call yields an independent chain.
    pub fn unshare(&self) -> Promise<T> {
        let state = State::new();
        let settle = Settle::new(state.clone());
        self.state.attach(
            self.queue.clone(),
            clone_extract(move |outcome| settle.set(outcome)),
        );
        Promise::new(state, self.queue.clone())
    }

    /// [`Promise::then`] over a copy of the outcome.
    pub fn then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.unshare().then(f)
    }

    /// [`Promise::then_on`] over a copy of the outcome.
    pub fn then_on<U, F>(&self, queue: QueueRef, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.unshare().then_on(queue, f)
    }

    /// [`Promise::and_then`] over a copy of the outcome.
    pub fn and_then<U, F>(&self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.unshare().and_then(f)
    }

    /// [`Promise::fail`] over a copy of the outcome.
    pub fn fail<E, F>(&self, f: F) -> Promise<T>
    where
        E: Any,
        F: FnOnce(&E) -> T + Send + 'static,
    {
        self.unshare().fail(f)
    }

    /// [`Promise::fail_any`] over a copy of the outcome.
    pub fn fail_any<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(ErrorToken) -> T + Send + 'static,
    {
        self.unshare().fail_any(f)
    }

    /// [`Promise::finally`] over a copy of the outcome.
    pub fn finally<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.unshare().finally(f)
    }

    /// [`Promise::reflect`] over a copy of the outcome.
    pub fn reflect(&self) -> Promise<Expect<T>> {
        self.unshare().reflect()
    }

    /// [`Promise::strip`] over a copy of the outcome.
    pub fn strip(&self) -> Promise<()> {
        self.unshare().strip()
    }

    /// [`Promise::done`] over a copy of the outcome.
    pub fn done(&self) {
        self.unshare().done()
    }
}

/// Await bridge: each awaiting clone gets its own copy of the outcome.
impl<T: Clone + Send + 'static> Future for SharedPromise<T> {
    type Output = Result<T, ErrorToken>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.state.poll_clone(cx)
    }
}
