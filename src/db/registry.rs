//! Registry of live statements.
//!
//! When the pool takes a connection out of circulation, every live statement
//! must drop the compiled form it holds for that connection. Statements
//! register a weak handle to their cache here on construction and unregister
//! on close, so the registry never keeps a statement alive.

use crate::db::pool::ConnectionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Per-statement cache of compiled forms, keyed by connection.
pub trait CompiledCache: Send + Sync {
    /// Drop the compiled form held for `connection`, if any.
    fn forget(&self, connection: ConnectionId);
}

/// Handle returned by [`StatementRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration(u64);

#[derive(Default)]
pub struct StatementRegistry {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Weak<dyn CompiledCache>>>,
}

impl std::fmt::Debug for StatementRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementRegistry")
            .field("live", &self.len())
            .finish()
    }
}

impl StatementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cache: Weak<dyn CompiledCache>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live.lock().insert(id, cache);
        Registration(id)
    }

    /// After this returns no further invalidation reaches the statement.
    pub fn unregister(&self, registration: Registration) {
        self.live.lock().remove(&registration.0);
    }

    /// Broadcast the invalidation of `connection` to every live statement.
    pub fn invalidate(&self, connection: ConnectionId) {
        // Callbacks take each statement's own lock, so run them outside ours.
        let caches: Vec<Arc<dyn CompiledCache>> = {
            let mut live = self.live.lock();
            live.retain(|_, cache| cache.strong_count() > 0);
            live.values().filter_map(Weak::upgrade).collect()
        };
        debug!(
            connection_id = %connection,
            statements = caches.len(),
            "Broadcasting connection invalidation"
        );
        for cache in caches {
            cache.forget(connection);
        }
    }

    /// Number of registered statements.
    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
