//! The consume-once promise handle and its combinators.
//!
//! Every combinator consumes the handle and returns a new one wrapping a
//! fresh downstream state, so a single-consumer promise can never have two
//! incompatible continuations attached. Plain combinators inherit the
//! upstream promise's queue; `_on` variants dispatch to an explicit queue.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{ManualQueue, Producer};
//!
//! let queue = ManualQueue::new();
//! let (producer, promise) = Producer::new(queue.clone().into_ref());
//! let _chained = promise.then(|n: i32| n + 1).reflect();
//! producer.resolve(42);
//! queue.run_all();
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::expect::{ErrorToken, Expect};
use crate::queue::QueueRef;
use crate::shared::SharedPromise;
use crate::state::{take_extract, State};
use crate::Error;

/// Runs a continuation body, converting a panic into a captured error.
pub(crate) fn run_caught<U>(f: impl FnOnce() -> U) -> Expect<U> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Expect::Value(value),
        Err(payload) => Expect::Error(ErrorToken::from_panic(payload)),
    }
}

/// Resolver for a downstream state, handed to continuation glue.
///
/// Resolves with [`Error::ProducerDropped`] if dropped unused, so a chain
/// whose continuation task never ran (torn-down queue) settles instead of
/// hanging its consumers.
pub(crate) struct Settle<T: Send + 'static> {
    state: Arc<State<T>>,
}

impl<T: Send + 'static> Settle<T> {
    pub(crate) fn new(state: Arc<State<T>>) -> Self {
        Self { state }
    }

    pub(crate) fn set(self, outcome: Expect<T>) {
        self.state.resolve(outcome);
    }
}

impl<T: Send + 'static> Drop for Settle<T> {
    fn drop(&mut self) {
        if !self.state.is_resolved() {
            self.state
                .resolve(Expect::Error(ErrorToken::new(Error::ProducerDropped)));
        }
    }
}

/// A one-time-consumable handle to a deferred outcome.
///
/// Produced by [`Producer::new`](crate::Producer::new) or by another
/// combinator. Consumed by exactly one of: a combinator call, `.await`, or
/// [`done`](Self::done).
pub struct Promise<T: Send + 'static> {
    pub(crate) state: Arc<State<T>>,
    pub(crate) queue: QueueRef,
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn new(state: Arc<State<T>>, queue: QueueRef) -> Self {
        Self { state, queue }
    }

    /// A promise already resolved with `value`.
    pub fn resolved(queue: QueueRef, value: T) -> Self {
        Self::new(State::settled(Expect::Value(value)), queue)
    }

    /// A promise already resolved with `err`.
    pub fn rejected<E>(queue: QueueRef, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(State::settled(Expect::Error(ErrorToken::new(err))), queue)
    }

    /// A promise already carrying `outcome`.
    pub fn from_expect(queue: QueueRef, outcome: Expect<T>) -> Self {
        Self::new(State::settled(outcome), queue)
    }

    /// The queue combinators inherit by default.
    pub fn queue(&self) -> &QueueRef {
        &self.queue
    }

    /// Whether the backing state has been resolved yet.
    pub fn is_resolved(&self) -> bool {
        self.state.is_resolved()
    }

    /// Consumes the handle, returning one with a different default queue.
    pub fn use_queue(self, queue: QueueRef) -> Self {
        Self::new(self.state, queue)
    }

    /// The shared spine of every combinator: registers glue that receives the
    /// upstream outcome and must settle the downstream state.
    fn pipe<U, F>(self, queue: QueueRef, apply: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(Expect<T>, Settle<U>) + Send + 'static,
    {
        let state = State::new();
        let settle = Settle::new(state.clone());
        self.state
            .attach(queue.clone(), take_extract(move |outcome| apply(outcome, settle)));
        Promise::new(state, queue)
    }

    /// Routes this promise's eventual outcome into `settle` (flattening).
    pub(crate) fn forward(self, settle: Settle<T>) {
        let queue = self.queue.clone();
        self.state
            .attach(queue, take_extract(move |outcome| settle.set(outcome)));
    }

    /// Transforms the resolved value. Skipped entirely on an upstream error,
    /// which propagates untouched. A panic in `f` becomes the downstream
    /// error.
    pub fn then<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let queue = self.queue.clone();
        self.then_on(queue, f)
    }

    /// [`then`](Self::then) dispatched on an explicit queue.
    pub fn then_on<U, F>(self, queue: QueueRef, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.pipe(queue, move |outcome, settle| match outcome {
            Expect::Value(value) => settle.set(run_caught(move || f(value))),
            Expect::Error(token) => settle.set(Expect::Error(token)),
        })
    }

    /// Like [`then`](Self::then), but `f` returns a promise and the result
    /// flattens: the downstream adopts the inner promise's eventual outcome
    /// rather than wrapping it.
    pub fn and_then<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let queue = self.queue.clone();
        self.and_then_on(queue, f)
    }

    /// [`and_then`](Self::and_then) dispatched on an explicit queue.
    pub fn and_then_on<U, F>(self, queue: QueueRef, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.pipe(queue, move |outcome, settle| match outcome {
            Expect::Value(value) => match catch_unwind(AssertUnwindSafe(move || f(value))) {
                Ok(inner) => inner.forward(settle),
                Err(payload) => settle.set(Expect::Error(ErrorToken::from_panic(payload))),
            },
            Expect::Error(token) => settle.set(Expect::Error(token)),
        })
    }

    /// Recovers from an error of concrete type `E`. A value, or an error of
    /// any other type, passes through unchanged.
    pub fn fail<E, F>(self, f: F) -> Promise<T>
    where
        E: Any,
        F: FnOnce(&E) -> T + Send + 'static,
    {
        let queue = self.queue.clone();
        self.fail_on(queue, f)
    }

    /// [`fail`](Self::fail) dispatched on an explicit queue.
    pub fn fail_on<E, F>(self, queue: QueueRef, f: F) -> Promise<T>
    where
        E: Any,
        F: FnOnce(&E) -> T + Send + 'static,
    {
        self.pipe(queue, move |outcome, settle| match outcome {
            Expect::Error(token) if token.is::<E>() => settle.set(run_caught(move || {
                f(token.downcast_ref::<E>().expect("type matched above"))
            })),
            other => settle.set(other),
        })
    }

    /// Typed recovery returning a promise (retry flow), flattened.
    pub fn and_fail<E, F>(self, f: F) -> Promise<T>
    where
        E: Any,
        F: FnOnce(&E) -> Promise<T> + Send + 'static,
    {
        let queue = self.queue.clone();
        self.and_fail_on(queue, f)
    }

    /// [`and_fail`](Self::and_fail) dispatched on an explicit queue.
    pub fn and_fail_on<E, F>(self, queue: QueueRef, f: F) -> Promise<T>
    where
        E: Any,
        F: FnOnce(&E) -> Promise<T> + Send + 'static,
    {
        self.pipe(queue, move |outcome, settle| match outcome {
            Expect::Error(token) if token.is::<E>() => {
                let attempt = catch_unwind(AssertUnwindSafe(|| {
                    f(token.downcast_ref::<E>().expect("type matched above"))
                }));
                match attempt {
                    Ok(inner) => inner.forward(settle),
                    Err(payload) => settle.set(Expect::Error(ErrorToken::from_panic(payload))),
                }
            }
            other => settle.set(other),
        })
    }

    /// Recovers from any error; the token itself is handed to `f`.
    pub fn fail_any<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(ErrorToken) -> T + Send + 'static,
    {
        let queue = self.queue.clone();
        self.fail_any_on(queue, f)
    }

    /// [`fail_any`](Self::fail_any) dispatched on an explicit queue.
    pub fn fail_any_on<F>(self, queue: QueueRef, f: F) -> Promise<T>
    where
        F: FnOnce(ErrorToken) -> T + Send + 'static,
    {
        self.pipe(queue, move |outcome, settle| match outcome {
            Expect::Error(token) => settle.set(run_caught(move || f(token))),
            value => settle.set(value),
        })
    }

    /// Catch-all recovery returning a promise, flattened.
    pub fn and_fail_any<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce(ErrorToken) -> Promise<T> + Send + 'static,
    {
        let queue = self.queue.clone();
        self.and_fail_any_on(queue, f)
    }

    /// [`and_fail_any`](Self::and_fail_any) dispatched on an explicit queue.
    pub fn and_fail_any_on<F>(self, queue: QueueRef, f: F) -> Promise<T>
    where
        F: FnOnce(ErrorToken) -> Promise<T> + Send + 'static,
    {
        self.pipe(queue, move |outcome, settle| match outcome {
            Expect::Error(token) => match catch_unwind(AssertUnwindSafe(move || f(token))) {
                Ok(inner) => inner.forward(settle),
                Err(payload) => settle.set(Expect::Error(ErrorToken::from_panic(payload))),
            },
            value => settle.set(value),
        })
    }

    /// Runs `f` whatever the outcome, then propagates the original outcome.
    /// A panic in `f` replaces the original outcome with the panic error.
    pub fn finally<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let queue = self.queue.clone();
        self.finally_on(queue, f)
    }

    /// [`finally`](Self::finally) dispatched on an explicit queue.
    pub fn finally_on<F>(self, queue: QueueRef, f: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pipe(queue, move |outcome, settle| {
            match catch_unwind(AssertUnwindSafe(f)) {
                Ok(()) => settle.set(outcome),
                Err(payload) => settle.set(Expect::Error(ErrorToken::from_panic(payload))),
            }
        })
    }

    /// Like [`finally`](Self::finally), but the cleanup is itself
    /// asynchronous: the original outcome propagates only once `f`'s promise
    /// resolves. A cleanup failure overrides the original outcome.
    pub fn and_finally<F>(self, f: F) -> Promise<T>
    where
        F: FnOnce() -> Promise<()> + Send + 'static,
    {
        let queue = self.queue.clone();
        self.and_finally_on(queue, f)
    }

    /// [`and_finally`](Self::and_finally) dispatched on an explicit queue.
    pub fn and_finally_on<F>(self, queue: QueueRef, f: F) -> Promise<T>
    where
        F: FnOnce() -> Promise<()> + Send + 'static,
    {
        self.pipe(queue, move |outcome, settle| {
            match catch_unwind(AssertUnwindSafe(f)) {
                Ok(cleanup) => {
                    let cleanup_queue = cleanup.queue.clone();
                    cleanup.state.attach(
                        cleanup_queue,
                        take_extract(move |done| match done {
                            Expect::Value(()) => settle.set(outcome),
                            Expect::Error(token) => settle.set(Expect::Error(token)),
                        }),
                    );
                }
                Err(payload) => settle.set(Expect::Error(ErrorToken::from_panic(payload))),
            }
        })
    }

    /// Converts success and failure alike into a successfully-resolved
    /// [`Expect`], so the resulting promise never carries an error.
    pub fn reflect(self) -> Promise<Expect<T>> {
        let queue = self.queue.clone();
        self.pipe(queue, |outcome, settle| {
            settle.set(Expect::Value(outcome));
        })
    }

    /// Discards the value, keeping error and timing semantics.
    pub fn strip(self) -> Promise<()> {
        self.then(|_| ())
    }

    /// Terminal consumption. An error reaching the end of a chain is handed
    /// to the uncaught-error hook (see
    /// [`set_uncaught_handler`](crate::set_uncaught_handler)) rather than
    /// silently dropped.
    pub fn done(self) {
        let queue = self.queue.clone();
        self.state.attach(
            queue,
            take_extract(|outcome| {
                if let Expect::Error(token) = outcome {
                    crate::uncaught(&token);
                }
            }),
        );
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Converts into a shared promise supporting multiple consumers, each
    /// observing an independent copy of the value.
    pub fn share(self) -> SharedPromise<T> {
        SharedPromise::new(self.state, self.queue)
    }
}

/// Direct await bridge: the handle is the single consumer and the outcome is
/// moved to it.
impl<T: Send + 'static> Future for Promise<T> {
    type Output = Result<T, ErrorToken>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.state.poll_take(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ManualQueue;
    use std::sync::Mutex;

    fn harness() -> (ManualQueue, QueueRef) {
        let queue = ManualQueue::new();
        let queue_ref = queue.clone().into_ref();
        (queue, queue_ref)
    }

    #[test]
    fn queue_inheritance_keeps_chain_on_one_queue() {
        let (queue, queue_ref) = harness();
        let out = Arc::new(Mutex::new(None));
        let seen = out.clone();
        Promise::resolved(queue_ref, 1)
            .then(|n| n + 1)
            .then(|n| n * 10)
            .then(move |n| *seen.lock().unwrap() = Some(n))
            .done();
        queue.run_all();
        assert_eq!(*out.lock().unwrap(), Some(20));
    }

    #[test]
    fn then_on_targets_the_explicit_queue() {
        let (home, home_ref) = harness();
        let (away, away_ref) = harness();
        let out = Arc::new(Mutex::new(None));
        let seen = out.clone();
        Promise::resolved(home_ref, 5)
            .then_on(away_ref, move |n| *seen.lock().unwrap() = Some(n))
            .done();
        // The continuation went to the explicit queue, not the inherited one.
        assert_eq!(home.len(), 0);
        away.run_all();
        home.run_all();
        assert_eq!(*out.lock().unwrap(), Some(5));
    }

    #[test]
    fn use_queue_rebinds_the_default() {
        let (_home, home_ref) = harness();
        let (away, away_ref) = harness();
        let promise = Promise::resolved(home_ref, ()).use_queue(away_ref.clone());
        assert!(Arc::ptr_eq(promise.queue(), &away_ref));
        promise.then(|()| ()).done();
        assert_eq!(away.run_all(), 2);
    }

    #[test]
    fn settle_dropped_unused_rejects_downstream() {
        let state: Arc<State<i32>> = State::new();
        let settle = Settle::new(state.clone());
        // Continuation glue that never ran, e.g. on a torn-down queue.
        drop(settle);
        assert!(state.is_resolved());
        let (queue, queue_ref) = harness();
        let out = Arc::new(Mutex::new(None));
        let seen = out.clone();
        Promise::new(state, queue_ref)
            .fail_any(move |token| {
                *seen.lock().unwrap() = Some(token.is::<Error>());
                0
            })
            .done();
        queue.run_all();
        assert_eq!(*out.lock().unwrap(), Some(true));
    }
}
