//! One-shot completion cell.
//!
//! A [`Promise`] is completed at most once. Consumers either block on
//! [`Promise::wait`], poll with [`Promise::try_get`], or register a listener
//! with [`Promise::on_complete`] and cancel it again with
//! [`Promise::cancel_listener`], the cancellable-get pair used by the
//! interruptible evaluation race.

use std::sync::{Condvar, Mutex};

/// Handle for a registered completion listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener<T> = Box<dyn FnOnce(T) + Send>;

struct PromiseInner<T> {
    /// The value, once completed.
    value: Option<T>,
    /// Listeners awaiting completion, with their cancellation handles.
    listeners: Vec<(ListenerId, Listener<T>)>,
    /// Source for listener handles.
    next_listener: u64,
}

/// A one-shot completion cell.
///
/// `complete` is idempotent: the first call wins and every registered
/// listener observes exactly that value.
pub struct Promise<T> {
    inner: Mutex<PromiseInner<T>>,
    filled: Condvar,
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Creates an empty promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PromiseInner {
                value: None,
                listeners: Vec::new(),
                next_listener: 0,
            }),
            filled: Condvar::new(),
        }
    }

    /// Completes the promise.
    ///
    /// Returns true if this call won; false if the promise was already
    /// complete (the value is dropped in that case).
    pub fn complete(&self, value: T) -> bool {
        let listeners = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            if inner.value.is_some() {
                return false;
            }
            inner.value = Some(value.clone());
            std::mem::take(&mut inner.listeners)
        };
        self.filled.notify_all();
        // Listeners run outside the lock so they may re-enter the promise.
        for (_, listener) in listeners {
            listener(value.clone());
        }
        true
    }

    /// Returns the value if the promise is complete.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        self.inner.lock().expect("lock poisoned").value.clone()
    }

    /// Blocks until the promise completes and returns the value.
    #[must_use]
    pub fn wait(&self) -> T {
        let mut inner = self.inner.lock().expect("lock poisoned");
        loop {
            if let Some(value) = &inner.value {
                return value.clone();
            }
            inner = self.filled.wait(inner).expect("lock poisoned");
        }
    }

    /// Registers a listener invoked with the completion value.
    ///
    /// If the promise is already complete, the listener runs on the calling
    /// thread before this returns and `None` is returned (there is nothing
    /// left to cancel). Otherwise the returned id can be passed to
    /// [`Promise::cancel_listener`].
    pub fn on_complete(&self, listener: impl FnOnce(T) + Send + 'static) -> Option<ListenerId> {
        let ready = {
            let mut inner = self.inner.lock().expect("lock poisoned");
            match &inner.value {
                Some(value) => Some(value.clone()),
                None => {
                    let id = ListenerId(inner.next_listener);
                    inner.next_listener += 1;
                    inner.listeners.push((id, Box::new(listener)));
                    return Some(id);
                }
            }
        };
        if let Some(value) = ready {
            listener(value);
        }
        None
    }

    /// Removes a listener registered with [`Promise::on_complete`].
    ///
    /// Returns true if the listener was still pending.
    pub fn cancel_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock().expect("lock poisoned");
        let before = inner.listeners.len();
        inner.listeners.retain(|(lid, _)| *lid != id);
        inner.listeners.len() != before
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let complete = self
            .inner
            .lock()
            .map(|inner| inner.value.is_some())
            .unwrap_or(false);
        f.debug_struct("Promise").field("complete", &complete).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn first_complete_wins() {
        let promise = Promise::new();
        assert!(promise.complete(1));
        assert!(!promise.complete(2));
        assert_eq!(promise.try_get(), Some(1));
    }

    #[test]
    fn wait_returns_completed_value() {
        let promise = Arc::new(Promise::new());
        let waiter = {
            let promise = promise.clone();
            std::thread::spawn(move || promise.wait())
        };
        promise.complete(42);
        assert_eq!(waiter.join().expect("waiter panicked"), 42);
    }

    #[test]
    fn listener_fires_once_on_complete() {
        let promise = Promise::new();
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        let id = promise.on_complete(move |v: u32| {
            hits2.fetch_add(v, Ordering::SeqCst);
        });
        assert!(id.is_some());
        promise.complete(5);
        promise.complete(9);
        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn listener_on_completed_promise_runs_inline() {
        let promise = Promise::new();
        promise.complete(3);
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        let id = promise.on_complete(move |v: u32| {
            hits2.fetch_add(v, Ordering::SeqCst);
        });
        assert!(id.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancelled_listener_never_fires() {
        let promise = Promise::new();
        let hits = Arc::new(AtomicU32::new(0));
        let hits2 = hits.clone();
        let id = promise
            .on_complete(move |_: u32| {
                hits2.fetch_add(1, Ordering::SeqCst);
            })
            .expect("pending listener");
        assert!(promise.cancel_listener(id));
        assert!(!promise.cancel_listener(id));
        promise.complete(1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
