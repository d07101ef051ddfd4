//! Typed publish/subscribe registry.
//!
//! One producer owns an [`Observers<T>`] and calls [`Observers::notify`]; any
//! number of consumers register a callback and hold the returned
//! [`Subscription`]. Dropping the subscription unregisters the callback, so a
//! consumer can never be invoked after it has been torn down.
//!
//! Callbacks run synchronously on the publisher's thread and must not block.
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_token: u64,
    handlers: Vec<(u64, Callback<T>)>,
}

trait Detach: Send + Sync {
    fn detach(&self, token: u64);
}

impl<T: 'static> Detach for Mutex<Registry<T>> {
    fn detach(&self, token: u64) {
        self.lock().handlers.retain(|(t, _)| *t != token);
    }
}

/// Broadcast channel for values of type `T`.
pub struct Observers<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Observers<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_token: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Registers `handler` and returns the handle that keeps it alive.
    #[must_use = "the callback is removed as soon as the subscription is dropped"]
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let token = {
            let mut registry = self.registry.lock();
            let token = registry.next_token;
            registry.next_token += 1;
            registry.handlers.push((token, Arc::new(handler)));
            token
        };
        let registry: Arc<dyn Detach> = self.registry.clone();
        Subscription {
            registry: Arc::downgrade(&registry),
            token,
        }
    }

    /// Calls every registered handler with `value`.
    ///
    /// The handler list is cloned before dispatch so handlers may subscribe or
    /// unsubscribe without deadlocking the registry.
    pub fn notify(&self, value: &T) {
        let handlers: Vec<Callback<T>> = self
            .registry
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(value);
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII registration handle returned by [`Observers::subscribe`].
pub struct Subscription {
    registry: Weak<dyn Detach>,
    token: u64,
}

impl Subscription {
    /// Unregisters the callback now instead of at drop time.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.token);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("live", &(self.registry.strong_count() > 0))
            .finish()
    }
}
