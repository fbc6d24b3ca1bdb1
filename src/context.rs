//! Resolution Contexts
//!
//! A `ResolutionContext` is the isolation boundary that determines how symbolic
//! names are resolved while a remote call executes. Contexts are created once
//! by their owner (typically from an archive-directory scan, see [`crate::libdir`]),
//! shared by many calls, and compared by identity. The core never destroys a
//! context; dropping the last external `Arc` retires it.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::delegate::{DelegateFactory, SerializationDelegate};

/// Process-unique identity of a resolution context. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ContextId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric form, for logging and map keys.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Shared interior of a resolution context.
///
/// Held behind an `Arc` so the context is cheap to clone onto threads and into
/// slots; the delegate cache holds only a `Weak` to this core so it can never
/// be the reason a context stays alive.
pub(crate) struct ContextCore {
    id: ContextId,
    label: String,
    entries: Vec<PathBuf>,
    providers: RwLock<HashMap<String, DelegateFactory>>,
}

/// Opaque, identity-compared handle to a class-resolution boundary.
///
/// Cloning is cheap (`Arc` clone). Two handles are equal iff they refer to the
/// same underlying context, regardless of label or entries.
#[derive(Clone)]
pub struct ResolutionContext {
    core: Arc<ContextCore>,
}

impl ResolutionContext {
    /// Create a context with a human-readable label and no backing entries.
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_entries(label, Vec::new())
    }

    /// Create a context backed by the given archive paths.
    pub fn with_entries(label: impl Into<String>, entries: Vec<PathBuf>) -> Self {
        Self {
            core: Arc::new(ContextCore {
                id: ContextId::next(),
                label: label.into(),
                entries,
                providers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Identity of this context.
    pub fn id(&self) -> ContextId {
        self.core.id
    }

    /// Human-readable label, used in logs and error messages.
    pub fn label(&self) -> &str {
        &self.core.label
    }

    /// Archive paths backing this context.
    pub fn entries(&self) -> &[PathBuf] {
        &self.core.entries
    }

    /// Register a delegate factory local to this context.
    ///
    /// This is the analog of an implementation shipped inside the context's own
    /// archives: it is consulted before the process-wide resolver registry.
    pub fn register_provider(&self, implementation: impl Into<String>, factory: DelegateFactory) {
        self.core
            .providers
            .write()
            .insert(implementation.into(), factory);
    }

    /// Instantiate a delegate through this context's own provider table.
    ///
    /// Returns `None` when the context carries no provider for the
    /// implementation; the caller falls back to the process-wide registry.
    pub(crate) fn instantiate(
        &self,
        implementation: &str,
    ) -> Option<anyhow::Result<Arc<dyn SerializationDelegate>>> {
        let providers = self.core.providers.read();
        providers.get(implementation).map(|factory| factory(self))
    }

    /// Non-owning liveness witness for cache entries.
    pub(crate) fn downgrade(&self) -> Weak<ContextCore> {
        Arc::downgrade(&self.core)
    }
}

impl PartialEq for ResolutionContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for ResolutionContext {}

impl fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionContext")
            .field("id", &self.core.id)
            .field("label", &self.core.label)
            .field("entries", &self.core.entries.len())
            .finish()
    }
}
