// Observable state container shared by every dashboard store

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable handle to a piece of state with publish/subscribe semantics.
///
/// Each mutation is applied in a single call, so subscribers never observe a
/// partially updated value. Subscribers are notified only when the value
/// actually changes.
pub struct Store<T> {
    sender: Arc<watch::Sender<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T: Clone + PartialEq> Store<T> {
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Clone of the current value.
    pub fn snapshot(&self) -> T {
        self.sender.borrow().clone()
    }

    /// Read a projection of the current value without cloning all of it.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.sender.borrow())
    }

    /// Apply `f` to the state and return its result. Subscribers are woken
    /// only if the state differs afterwards.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut result = None;
        self.sender.send_if_modified(|state| {
            let before = state.clone();
            result = Some(f(state));
            *state != before
        });
        // send_if_modified always runs the closure
        result.unwrap_or_else(|| unreachable!())
    }

    pub fn replace(&self, value: T) -> T {
        self.sender.send_replace(value)
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }
}

impl<T: Clone + PartialEq + Default> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
