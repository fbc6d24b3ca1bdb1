//! Context-Scoped Naming Client
//!
//! Wraps a naming/directory service so that connection, lookups, and teardown
//! all execute with a fixed resolution context installed on the calling
//! thread. The bound context is set at construction and never re-evaluated
//! per call.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::ResolutionContext;
use crate::error::{ContextSwitchError, NamingError};
use crate::switch;

/// Well-known naming environment keys.
pub mod env {
    /// Connection URL of the directory provider.
    pub const PROVIDER_URL: &str = "provider.url";
    /// Authentication principal.
    pub const PRINCIPAL: &str = "security.principal";
    /// Authentication credential.
    pub const CREDENTIALS: &str = "security.credentials";
}

/// String-keyed environment handed to the directory provider.
///
/// Ordered so that serialized forms are stable. Holds the well-known
/// connection keys plus arbitrary provider-specific entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamingEnvironment {
    entries: BTreeMap<String, String>,
}

impl NamingEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an environment from a TOML file of string key/value pairs.
    pub fn from_toml_file(path: &Path) -> Result<Self, NamingError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NamingError::Provider(format!("read {}: {}", path.display(), e)))?;
        toml::from_str(&raw)
            .map_err(|e| NamingError::Provider(format!("parse {}: {}", path.display(), e)))
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn provider_url(&self) -> Option<&str> {
        self.get(env::PROVIDER_URL)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Opaque handle to an open directory session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySession {
    pub id: u64,
    pub provider_url: Option<String>,
}

/// A resolved directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingEntry {
    /// The name that was looked up.
    pub name: String,
    /// Opaque provider address of the remote object.
    pub address: String,
    /// Remote interface the entry claims to implement, when declared.
    pub remote_interface: Option<String>,
    /// Arbitrary provider metadata.
    pub metadata: BTreeMap<String, String>,
}

/// External naming/directory collaborator. Implementations are expected to
/// observe thread interruption during blocking operations and return
/// [`NamingError::Interrupted`].
pub trait DirectoryService: Send + Sync {
    /// Open (or validate) a session against the directory provider.
    fn open(&self, environment: &NamingEnvironment) -> Result<DirectorySession, NamingError>;

    /// Resolve `name` within an open session.
    fn lookup(&self, session: &DirectorySession, name: &str) -> Result<NamingEntry, NamingError>;

    /// Tear down a session. May fail; callers treat failure as non-fatal.
    fn close(&self, session: DirectorySession) -> Result<(), NamingError>;
}

/// Naming client bound to one resolution context.
///
/// Every operation runs through [`switch::run_in`] with the bound context, so
/// provider code that consults the active context sees the right one.
pub struct ContextNamingClient {
    directory: Arc<dyn DirectoryService>,
    context: ResolutionContext,
    environment: NamingEnvironment,
    session: Mutex<Option<DirectorySession>>,
}

impl ContextNamingClient {
    /// Build a client around `directory`, bound to `context`.
    ///
    /// The environment is cloned here: later mutation of the caller's copy
    /// does not reach this client.
    pub fn new(
        directory: Arc<dyn DirectoryService>,
        context: ResolutionContext,
        environment: &NamingEnvironment,
    ) -> Self {
        Self {
            directory,
            context,
            environment: environment.clone(),
            session: Mutex::new(None),
        }
    }

    /// The context every operation of this client runs in.
    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    /// Establish the directory session inside the bound context.
    ///
    /// Idempotent: an already-open session is kept.
    pub fn connect(&self) -> Result<(), NamingError> {
        let mut session = self.session.lock();
        if session.is_some() {
            return Ok(());
        }

        let opened = switch::run_in(&self.context, || self.directory.open(&self.environment))?;
        debug!(
            context = self.context.id().as_u64(),
            session = opened.id,
            "Opened directory session"
        );
        *session = Some(opened);
        Ok(())
    }

    /// Resolve `name` inside the bound context, connecting first if needed.
    ///
    /// Naming failures propagate unchanged; nothing here retries.
    pub fn lookup(&self, name: &str) -> Result<NamingEntry, NamingError> {
        self.connect()?;
        let session = self.session.lock();
        let session = session
            .as_ref()
            .ok_or_else(|| NamingError::ConnectionFailed("session closed concurrently".into()))?;
        switch::run_in(&self.context, || self.directory.lookup(session, name))
    }

    /// Best-effort teardown of the held session inside the bound context.
    ///
    /// Any underlying failure is logged and wrapped in
    /// [`ContextSwitchError`]; callers are not expected to recover the
    /// original resource anyway. Releasing a client with no open session is a
    /// no-op.
    pub fn release(&self) -> Result<(), ContextSwitchError> {
        let taken = self.session.lock().take();
        let Some(session) = taken else {
            return Ok(());
        };

        let session_id = session.id;
        let result = switch::run_in(&self.context, || self.directory.close(session));
        match result {
            Ok(()) => {
                debug!(
                    context = self.context.id().as_u64(),
                    session = session_id,
                    "Closed directory session"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    context = self.context.id().as_u64(),
                    session = session_id,
                    error = %e,
                    "Directory session teardown failed"
                );
                Err(ContextSwitchError::new(self.context.id(), e))
            }
        }
    }

    /// Whether a directory session is currently open.
    pub fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }
}

impl Drop for ContextNamingClient {
    fn drop(&mut self) {
        // Sessions are external resources; make a last best-effort pass.
        if self.is_connected() {
            let _ = self.release();
        }
    }
}
