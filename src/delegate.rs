//! Serialization Delegates and the per-context Delegate Cache
//!
//! Different application-server runtimes need mutually incompatible
//! serialization implementations alive in one process at the same time. The
//! cache keys delegate instances by resolution-context identity, creates them
//! lazily on first use, and holds only a weak liveness witness per context so
//! it can never pin a retired context in memory.
//!
//! Creation resolves the implementation name from process-wide configuration,
//! then instantiates through the active context's own provider table first,
//! falling back to the process-wide resolver registry.

use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::config;
use crate::context::{ContextCore, ContextId, ResolutionContext};
use crate::error::DelegateError;
use crate::switch;

/// Pluggable marshaling seam. The core never interprets the bytes.
pub trait SerializationDelegate: Send + Sync {
    /// Name of the implementation that built this delegate.
    fn implementation(&self) -> &str;

    /// Marshal a value for the remote transport.
    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>, DelegateError>;

    /// Unmarshal bytes received from the remote transport.
    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value, DelegateError>;
}

impl std::fmt::Debug for dyn SerializationDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializationDelegate")
            .field("implementation", &self.implementation())
            .finish()
    }
}

/// Builds a delegate instance for a given resolution context.
pub type DelegateFactory =
    Box<dyn Fn(&ResolutionContext) -> anyhow::Result<Arc<dyn SerializationDelegate>> + Send + Sync>;

fn resolver_registry() -> &'static RwLock<Vec<(String, DelegateFactory)>> {
    static REGISTRY: OnceLock<RwLock<Vec<(String, DelegateFactory)>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(Vec::new()))
}

/// Register a process-wide delegate resolver.
///
/// Consulted when the active context's own provider table cannot produce the
/// configured implementation. Later registrations for the same name shadow
/// earlier ones.
pub fn register_resolver(implementation: impl Into<String>, factory: DelegateFactory) {
    resolver_registry()
        .write()
        .insert(0, (implementation.into(), factory));
}

fn resolve_process_wide(
    implementation: &str,
    context: &ResolutionContext,
) -> Option<anyhow::Result<Arc<dyn SerializationDelegate>>> {
    let registry = resolver_registry().read();
    registry
        .iter()
        .find(|(name, _)| name == implementation)
        .map(|(_, factory)| factory(context))
}

/// One cached association. The weak witness is the liveness check: once the
/// owner drops its last strong reference to the context, the entry is garbage
/// and is pruned on the next miss or `purge`.
struct CacheEntry {
    witness: Weak<ContextCore>,
    delegate: Arc<dyn SerializationDelegate>,
}

/// Lazily-populated, weakly-keyed map from resolution context to its
/// serialization delegate.
///
/// Lookups for different contexts proceed on different shards of the
/// underlying concurrent map; two concurrent misses for the same context may
/// both attempt creation, but all subsequent reads converge on one winner's
/// instance.
pub struct DelegateCache {
    entries: DashMap<ContextId, CacheEntry>,
}

impl DelegateCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Process-global cache instance.
    pub fn global() -> &'static DelegateCache {
        static GLOBAL: OnceLock<DelegateCache> = OnceLock::new();
        GLOBAL.get_or_init(DelegateCache::new)
    }

    /// The delegate for `context`, creating it on first use.
    ///
    /// Fails with [`DelegateError::ConfigurationMissing`] when no
    /// implementation is configured, and with [`DelegateError::CreationFailed`]
    /// when both the context's provider table and the process-wide registry
    /// fail to produce one. Failures are never cached.
    pub fn get(
        &self,
        context: &ResolutionContext,
    ) -> Result<Arc<dyn SerializationDelegate>, DelegateError> {
        if let Some(entry) = self.entries.get(&context.id()) {
            return Ok(Arc::clone(&entry.delegate));
        }

        // Miss path. Opportunistically drop entries whose context is gone
        // before attempting creation.
        self.prune_dead();

        let implementation = config::delegate_implementation().ok_or_else(|| {
            DelegateError::ConfigurationMissing(config::DELEGATE_IMPLEMENTATION_KEY.to_string())
        })?;

        let delegate = create_delegate(&implementation, context)?;

        debug!(
            context = context.id().as_u64(),
            implementation = implementation.as_str(),
            "Created serialization delegate"
        );

        // Concurrent misses for the same context may race here; entry() makes
        // the insertion atomic per shard, so every caller leaves with the same
        // instance the map ended up holding.
        let entry = self
            .entries
            .entry(context.id())
            .or_insert_with(|| CacheEntry {
                witness: context.downgrade(),
                delegate,
            });
        Ok(Arc::clone(&entry.delegate))
    }

    /// The delegate for the calling thread's active context.
    ///
    /// Fails with [`DelegateError::NoActiveContext`] when no context is
    /// installed on this thread.
    pub fn for_current(&self) -> Result<Arc<dyn SerializationDelegate>, DelegateError> {
        let context = switch::current().ok_or(DelegateError::NoActiveContext)?;
        self.get(&context)
    }

    /// Number of live cached delegates.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.witness.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry whose context has been retired.
    pub fn purge(&self) {
        self.prune_dead();
    }

    fn prune_dead(&self) {
        self.entries.retain(|id, entry| {
            let live = entry.witness.strong_count() > 0;
            if !live {
                debug!(context = id.as_u64(), "Evicting delegate for retired context");
            }
            live
        });
    }
}

impl Default for DelegateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Instantiate through the context's provider table, then the process-wide
/// registry. The first underlying cause is the one reported.
fn create_delegate(
    implementation: &str,
    context: &ResolutionContext,
) -> Result<Arc<dyn SerializationDelegate>, DelegateError> {
    let mut first_cause: Option<anyhow::Error> = None;

    match context.instantiate(implementation) {
        Some(Ok(delegate)) => return Ok(delegate),
        Some(Err(e)) => {
            warn!(
                context = context.id().as_u64(),
                implementation,
                error = %e,
                "Context-local delegate provider failed, trying process-wide registry"
            );
            first_cause = Some(e);
        }
        None => {}
    }

    match resolve_process_wide(implementation, context) {
        Some(Ok(delegate)) => Ok(delegate),
        Some(Err(e)) => {
            let cause = first_cause.unwrap_or(e);
            Err(DelegateError::CreationFailed {
                implementation: implementation.to_string(),
                source: cause.into(),
            })
        }
        None => {
            let cause = first_cause.unwrap_or_else(|| {
                anyhow::anyhow!("no provider registered for '{}'", implementation)
            });
            Err(DelegateError::CreationFailed {
                implementation: implementation.to_string(),
                source: cause.into(),
            })
        }
    }
}
