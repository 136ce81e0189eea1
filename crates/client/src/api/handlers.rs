//! Listeners notified of every request failure, keyed by error kind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::error::{ApiError, ApiErrorKind};

/// Callback invoked with each error of the kind it was registered for.
pub type ErrorHandler = Arc<dyn Fn(&ApiError) + Send + Sync>;

/// Registry of error listeners.
#[derive(Default)]
pub struct ErrorHandlerRegistry {
    next_id: AtomicU64,
    handlers: DashMap<ApiErrorKind, Vec<(u64, ErrorHandler)>>,
}

impl std::fmt::Debug for ErrorHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandlerRegistry")
            .field("handlers", &self.handlers.iter().map(|e| e.value().len()).sum::<usize>())
            .finish_non_exhaustive()
    }
}

impl ErrorHandlerRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a listener for `kind`. Several listeners per kind are allowed.
    pub fn register(self: &Arc<Self>, kind: ApiErrorKind, handler: ErrorHandler) -> HandlerRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.entry(kind).or_default().push((id, handler));

        HandlerRegistration {
            registry: Arc::downgrade(self),
            kind,
            id,
        }
    }

    /// Invoke every listener registered for the error's kind, in registration order.
    pub fn dispatch(&self, error: &ApiError) {
        // Snapshot first so listeners may register or unregister while running
        let handlers: Vec<ErrorHandler> = self
            .handlers
            .get(&error.kind())
            .map(|entry| entry.value().iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(error);
        }
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn len(&self, kind: ApiErrorKind) -> usize {
        self.handlers.get(&kind).map_or(0, |entry| entry.value().len())
    }

    fn remove(&self, kind: ApiErrorKind, id: u64) {
        if let Some(mut entry) = self.handlers.get_mut(&kind) {
            entry.value_mut().retain(|(handler_id, _)| *handler_id != id);
        }
    }
}

/// Handle returned by registration; removes exactly that listener.
#[derive(Debug)]
#[must_use = "dropping the registration keeps the handler installed; call `unregister` to remove it"]
pub struct HandlerRegistration {
    registry: Weak<ErrorHandlerRegistry>,
    kind: ApiErrorKind,
    id: u64,
}

impl HandlerRegistration {
    /// Remove the listener. No-op if the registry is gone.
    pub fn unregister(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, self.id);
        }
    }

    /// Keep the listener installed for the registry's lifetime.
    pub fn forget(self) {}
}
