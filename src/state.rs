//! The shared cell backing one deferred computation.
//!
//! A [`State`] is jointly owned by the producer and every outstanding handle.
//! It transitions `pending -> resolved` exactly once; a second resolution is
//! a producer bug and panics. One mutex guards the transition, the pending
//! continuation list, and the waker list, so resolution and registration are
//! safe to race from different threads.

use std::mem;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::expect::{ErrorToken, Expect};
use crate::queue::{QueueRef, Task};

/// Turns the stored resolution into a ready-to-run task.
///
/// Each registration decides how it extracts the outcome: a consume-once
/// handle moves it out of the cell, a shared handle clones it. The extraction
/// runs inside the state's critical section; the returned task runs later on
/// the registration's queue.
pub(crate) type Extract<T> = Box<dyn FnOnce(&mut Option<Expect<T>>) -> Task + Send>;

struct Inner<T> {
    /// Set exactly once. A consume-once extraction empties it again, which is
    /// why `resolved` is tracked separately.
    resolution: Option<Expect<T>>,
    resolved: bool,
    /// Continuations registered before resolution, in registration order.
    pending: Vec<(QueueRef, Extract<T>)>,
    /// Wakers parked by direct `.await` consumers.
    wakers: Vec<Waker>,
}

pub(crate) struct State<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Send + 'static> State<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                resolution: None,
                resolved: false,
                pending: Vec::new(),
                wakers: Vec::new(),
            }),
        })
    }

    /// Creates a state already carrying its outcome.
    pub(crate) fn settled(outcome: Expect<T>) -> Arc<Self> {
        let state = Self::new();
        state.resolve(outcome);
        state
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.inner.lock().unwrap().resolved
    }

    /// The pending -> resolved transition.
    ///
    /// Every continuation registered so far is handed its task and submitted,
    /// in registration order, inside the critical section: a queue never runs
    /// a task inline or touches promise state, so submitting under the lock
    /// cannot re-enter, and any continuation attached after resolution
    /// serializes behind the ones registered earlier. Parked wakers are woken
    /// last, after the lock drops.
    ///
    /// # Panics
    ///
    /// Panics if the state was already resolved. Resolving twice is a
    /// producer-side logic error, never a runtime condition.
    pub(crate) fn resolve(&self, outcome: Expect<T>) {
        let wakers = {
            let mut inner = self.inner.lock().unwrap();
            if inner.resolved {
                panic!("promise resolved twice");
            }
            inner.resolved = true;
            inner.resolution = Some(outcome);
            let pending = mem::take(&mut inner.pending);
            for (queue, extract) in pending {
                let task = extract(&mut inner.resolution);
                queue.submit(task);
            }
            mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Registers a continuation.
    ///
    /// If the state is already resolved the task is submitted immediately,
    /// still under the lock so it cannot overtake a concurrent
    /// [`resolve`](Self::resolve)'s dispatch; otherwise it waits for
    /// resolution. The continuation cannot tell the two paths apart.
    pub(crate) fn attach(&self, queue: QueueRef, extract: Extract<T>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.resolved {
            let task = extract(&mut inner.resolution);
            queue.submit(task);
        } else {
            inner.pending.push((queue, extract));
        }
    }

    /// Poll path for the consume-once handle: moves the outcome out.
    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<Result<T, ErrorToken>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.resolved {
            let outcome = inner
                .resolution
                .take()
                .expect("resolution already consumed");
            Poll::Ready(outcome.get())
        } else {
            inner.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl<T: Clone + Send + 'static> State<T> {
    /// Poll path for shared handles: every consumer gets its own copy.
    pub(crate) fn poll_clone(&self, cx: &mut Context<'_>) -> Poll<Result<T, ErrorToken>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.resolved {
            let outcome = inner
                .resolution
                .as_ref()
                .expect("shared resolution missing")
                .clone();
            Poll::Ready(outcome.get())
        } else {
            inner.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Extraction that moves the resolution out of the cell. At most one of
/// these is ever registered per state, enforced by the consume-once handle.
pub(crate) fn take_extract<T, F>(run: F) -> Extract<T>
where
    T: Send + 'static,
    F: FnOnce(Expect<T>) + Send + 'static,
{
    Box::new(move |slot| {
        let outcome = slot.take().expect("resolution already consumed");
        Box::new(move || run(outcome))
    })
}

/// Extraction that clones the resolution, leaving it for other consumers.
pub(crate) fn clone_extract<T, F>(run: F) -> Extract<T>
where
    T: Clone + Send + 'static,
    F: FnOnce(Expect<T>) + Send + 'static,
{
    Box::new(move |slot| {
        let outcome = slot
            .as_ref()
            .expect("shared resolution missing")
            .clone();
        Box::new(move || run(outcome))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ManualQueue;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    #[should_panic(expected = "promise resolved twice")]
    fn double_resolution_is_fatal() {
        let state: Arc<State<i32>> = State::new();
        state.resolve(Expect::value(1));
        state.resolve(Expect::value(2));
    }

    #[test]
    fn attach_before_resolve_dispatches_on_resolve() {
        let queue = ManualQueue::new();
        let state: Arc<State<i32>> = State::new();
        let hit = Arc::new(AtomicBool::new(false));
        let seen = hit.clone();
        state.attach(
            queue.clone().into_ref(),
            take_extract(move |outcome| {
                assert_eq!(outcome.get().unwrap(), 5);
                seen.store(true, Ordering::SeqCst);
            }),
        );
        assert!(queue.is_empty());
        state.resolve(Expect::value(5));
        assert_eq!(queue.len(), 1);
        queue.run_all();
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn attach_after_resolve_dispatches_immediately() {
        let queue = ManualQueue::new();
        let state: Arc<State<i32>> = State::settled(Expect::value(5));
        let hit = Arc::new(AtomicBool::new(false));
        let seen = hit.clone();
        state.attach(
            queue.clone().into_ref(),
            take_extract(move |outcome| {
                assert_eq!(outcome.get().unwrap(), 5);
                seen.store(true, Ordering::SeqCst);
            }),
        );
        assert_eq!(queue.len(), 1);
        queue.run_all();
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn continuations_dispatch_in_registration_order() {
        let queue = ManualQueue::new();
        let state: Arc<State<i32>> = State::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            state.attach(
                queue.clone().into_ref(),
                clone_extract(move |_| order.lock().unwrap().push(i)),
            );
        }
        state.resolve(Expect::value(0));
        queue.run_all();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn clone_extract_leaves_resolution_for_later_consumers() {
        let queue = ManualQueue::new();
        let state: Arc<State<Vec<i32>>> = State::settled(Expect::value(vec![1, 2, 3]));
        for _ in 0..2 {
            state.attach(
                queue.clone().into_ref(),
                clone_extract(move |outcome| {
                    assert_eq!(outcome.get().unwrap(), vec![1, 2, 3]);
                }),
            );
        }
        assert_eq!(queue.run_all(), 2);
    }
}
