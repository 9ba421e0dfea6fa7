//! Queue-dispatched promise combinators.
//!
//! A [`Producer`] settles a deferred outcome exactly once; a [`Promise`] is
//! the consume-once handle to it, chained through `then`/`fail`/`finally`/
//! `reflect` combinators; a [`SharedPromise`] fans the same outcome out to
//! many consumers by copy. Continuations never run inline: each is posted to
//! a [`Queue`], which preserves submission order. Errors travel as
//! type-erased [`ErrorToken`]s so a downstream [`fail`](Promise::fail) can
//! match them by their original concrete type.
//!
//! # Examples
//!
//! ```
//! use promise_chain::{ManualQueue, Producer};
//! use std::sync::{Arc, Mutex};
//!
//! let queue = ManualQueue::new();
//! let (producer, promise) = Producer::new(queue.clone().into_ref());
//!
//! let out = Arc::new(Mutex::new(None));
//! let sink = out.clone();
//! promise
//!     .then(|n: i32| n + 1)
//!     .then(move |n| *sink.lock().unwrap() = Some(n))
//!     .done();
//!
//! producer.resolve(42);
//! queue.run_all();
//! assert_eq!(*out.lock().unwrap(), Some(43));
//! ```

use std::sync::RwLock;

pub mod expect;
pub mod producer;
pub mod promise;
pub mod queue;
pub mod shared;
mod state;

pub use expect::{ErrorToken, Expect, Panicked};
pub use producer::Producer;
pub use promise::Promise;
pub use queue::{ManualQueue, Queue, QueueRef, Task, WorkerQueue};
pub use shared::SharedPromise;

/// Errors raised by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The producer was dropped without resolving its promise.
    #[error("producer dropped without resolving")]
    ProducerDropped,
}

type UncaughtHandler = Box<dyn Fn(&ErrorToken) + Send + Sync>;

static UNCAUGHT: RwLock<Option<UncaughtHandler>> = RwLock::new(None);

/// Installs the hook invoked when an error reaches the end of a chain via
/// [`Promise::done`] without having been consumed by a `fail`/`reflect`.
///
/// The default hook logs through [`log::error!`]. Errors are never silently
/// dropped.
pub fn set_uncaught_handler<F>(handler: F)
where
    F: Fn(&ErrorToken) + Send + Sync + 'static,
{
    *UNCAUGHT.write().unwrap() = Some(Box::new(handler));
}

/// Restores the default logging hook.
pub fn clear_uncaught_handler() {
    *UNCAUGHT.write().unwrap() = None;
}

pub(crate) fn uncaught(token: &ErrorToken) {
    match &*UNCAUGHT.read().unwrap() {
        Some(handler) => handler(token),
        None => log::error!("uncaught promise error: {token}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn uncaught_hook_sees_terminal_errors() {
        let queue = ManualQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        set_uncaught_handler(move |token| {
            assert!(token.is::<Error>());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        Promise::<i32>::rejected(queue.clone().into_ref(), Error::ProducerDropped)
            .then(|n| n + 1)
            .done();
        queue.run_all();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        clear_uncaught_handler();
    }
}
