//! Context-Scoped Remote Proxy
//!
//! `SessionProxy` presents a local call surface for one remote session
//! object. Every invocation runs inside the proxy's bound resolution context,
//! resolves the target through a [`ContextNamingClient`] built at
//! construction, and dispatches on the calling thread. An optional per-call
//! deadline arms a one-shot interrupt against the calling thread; the
//! dispatch is expected to observe the interruption and unwind.
//!
//! Timeout supervision is a construction-time policy of this one type, not a
//! separate proxy variant.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::context::ResolutionContext;
use crate::error::{DispatchError, InvokeError, NamingError};
use crate::interrupt::{self, InterruptToken};
use crate::naming::{ContextNamingClient, DirectoryService, NamingEntry, NamingEnvironment};
use crate::switch;
use crate::timer::InterruptScheduler;

/// Timeout configuration sentinel: zero or negative milliseconds disable
/// supervision entirely.
pub const NO_TIMEOUT: i64 = -1;

/// External remote-call collaborator. Implementations that block should
/// observe thread interruption and return [`DispatchError::Interrupted`].
pub trait RemoteDispatcher: Send + Sync {
    /// Invoke `method` on the remote object behind `entry`.
    fn dispatch(
        &self,
        entry: &NamingEntry,
        method: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError>;
}

/// Builder for [`SessionProxy`]. The resolution context, directory service,
/// dispatcher, and service name are required; everything else has a default.
pub struct SessionProxyBuilder {
    context: Option<ResolutionContext>,
    directory: Option<Arc<dyn DirectoryService>>,
    dispatcher: Option<Arc<dyn RemoteDispatcher>>,
    service_name: Option<String>,
    remote_interface: Option<String>,
    environment: NamingEnvironment,
    call_timeout: Option<Duration>,
    scheduler: Option<Arc<InterruptScheduler>>,
    lookup_on_startup: bool,
    refresh_on_connect_failure: bool,
}

impl SessionProxyBuilder {
    pub fn new() -> Self {
        Self {
            context: None,
            directory: None,
            dispatcher: None,
            service_name: None,
            remote_interface: None,
            environment: NamingEnvironment::new(),
            call_timeout: None,
            scheduler: None,
            lookup_on_startup: false,
            refresh_on_connect_failure: true,
        }
    }

    /// Resolution context every call of this proxy runs in. Required.
    pub fn context(mut self, context: ResolutionContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Naming/directory collaborator. Required.
    pub fn directory(mut self, directory: Arc<dyn DirectoryService>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Remote-dispatch collaborator. Required.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn RemoteDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Directory name of the target session object. Required.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Interface the resolved entry must declare, when it declares one.
    pub fn remote_interface(mut self, interface: impl Into<String>) -> Self {
        self.remote_interface = Some(interface.into());
        self
    }

    /// Naming environment. Copied at `build`; later mutation of the caller's
    /// map does not reach the proxy.
    pub fn environment(mut self, environment: &NamingEnvironment) -> Self {
        self.environment = environment.clone();
        self
    }

    /// Set the well-known provider URL key in the environment.
    pub fn provider_url(mut self, url: impl Into<String>) -> Self {
        self.environment.set(crate::naming::env::PROVIDER_URL, url);
        self
    }

    /// Set the well-known principal key in the environment.
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.environment.set(crate::naming::env::PRINCIPAL, principal);
        self
    }

    /// Set the well-known credentials key in the environment.
    pub fn credentials(mut self, credentials: impl Into<String>) -> Self {
        self.environment
            .set(crate::naming::env::CREDENTIALS, credentials);
        self
    }

    /// Per-call deadline in milliseconds; `<= 0` disables supervision.
    pub fn call_timeout_millis(mut self, millis: i64) -> Self {
        self.call_timeout = if millis > 0 {
            Some(Duration::from_millis(millis as u64))
        } else {
            None
        };
        self
    }

    /// Per-call deadline. `None` disables supervision.
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Share an existing interrupt scheduler instead of owning one.
    pub fn scheduler(mut self, scheduler: Arc<InterruptScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Eagerly connect and resolve the service at `build` time instead of on
    /// first invocation.
    pub fn lookup_on_startup(mut self, eager: bool) -> Self {
        self.lookup_on_startup = eager;
        self
    }

    /// On a lost connection during dispatch, re-resolve the entry and retry
    /// the dispatch once. Enabled by default.
    pub fn refresh_on_connect_failure(mut self, refresh: bool) -> Self {
        self.refresh_on_connect_failure = refresh;
        self
    }

    /// Validate configuration and assemble the proxy.
    ///
    /// Fails fast with [`InvokeError::MissingConfiguration`] naming the first
    /// absent requirement; the resolution context is checked first.
    pub fn build(self) -> Result<SessionProxy, InvokeError> {
        let context = self
            .context
            .ok_or(InvokeError::MissingConfiguration("context"))?;
        let directory = self
            .directory
            .ok_or(InvokeError::MissingConfiguration("directory"))?;
        let dispatcher = self
            .dispatcher
            .ok_or(InvokeError::MissingConfiguration("dispatcher"))?;
        let service_name = self
            .service_name
            .ok_or(InvokeError::MissingConfiguration("service_name"))?;

        let naming = ContextNamingClient::new(directory, context.clone(), &self.environment);

        let scheduler = match (&self.call_timeout, self.scheduler) {
            (Some(_), Some(shared)) => Some(shared),
            (Some(_), None) => Some(Arc::new(InterruptScheduler::new())),
            (None, _) => None,
        };

        let proxy = SessionProxy {
            context,
            dispatcher,
            naming,
            service_name,
            remote_interface: self.remote_interface,
            call_timeout: self.call_timeout,
            scheduler,
            refresh_on_connect_failure: self.refresh_on_connect_failure,
            entry: Mutex::new(None),
        };

        if self.lookup_on_startup {
            proxy.resolve_entry()?;
        }

        Ok(proxy)
    }
}

impl Default for SessionProxyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Local stand-in for one remote session object.
///
/// Reusable across calls and threads; a failed call leaves the proxy usable
/// for the next one.
pub struct SessionProxy {
    context: ResolutionContext,
    dispatcher: Arc<dyn RemoteDispatcher>,
    naming: ContextNamingClient,
    service_name: String,
    remote_interface: Option<String>,
    call_timeout: Option<Duration>,
    scheduler: Option<Arc<InterruptScheduler>>,
    refresh_on_connect_failure: bool,
    entry: Mutex<Option<NamingEntry>>,
}

impl std::fmt::Debug for SessionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProxy")
            .field("service_name", &self.service_name)
            .field("remote_interface", &self.remote_interface)
            .field("call_timeout", &self.call_timeout)
            .field("refresh_on_connect_failure", &self.refresh_on_connect_failure)
            .finish_non_exhaustive()
    }
}

impl SessionProxy {
    pub fn builder() -> SessionProxyBuilder {
        SessionProxyBuilder::new()
    }

    /// The context this proxy's calls run in.
    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    /// Name of the target session object.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The configured per-call deadline, if any.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Invoke `method` with `args` on the remote session object.
    ///
    /// Runs inside the bound context: first use establishes the naming
    /// connection and resolves the service entry (cached afterwards), then
    /// the dispatcher runs on the calling thread. With a configured deadline
    /// the call is supervised; the thread's interruption flag is cleared
    /// unconditionally after every supervised call.
    #[instrument(skip(self, args), fields(service = %self.service_name))]
    pub fn invoke(
        &self,
        method: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, InvokeError> {
        match self.call_timeout {
            Some(timeout) => self.invoke_supervised(method, args, timeout),
            None => self.invoke_unsupervised(method, args),
        }
    }

    /// Typed facade over [`invoke`](Self::invoke).
    pub fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        args: &serde_json::Value,
    ) -> Result<R, InvokeError> {
        let value = self.invoke(method, args)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Drop the cached naming entry; the next call re-resolves.
    pub fn refresh(&self) {
        *self.entry.lock() = None;
    }

    /// Release the underlying naming session. The proxy remains usable; the
    /// next call reconnects.
    pub fn release(&self) -> Result<(), crate::error::ContextSwitchError> {
        self.refresh();
        self.naming.release()
    }

    fn invoke_supervised(
        &self,
        method: &str,
        args: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, InvokeError> {
        // scheduler is always present when a timeout is configured
        let Some(scheduler) = self.scheduler.as_deref() else {
            return self.invoke_unsupervised(method, args);
        };

        let armed = scheduler.schedule_after(InterruptToken::current(), timeout);
        let result = self.invoke_unsupervised(method, args);
        let prevented = armed.disarm();

        // Preserved behavior: the flag is cleared after every supervised
        // call, even when nothing fired. Pooled threads must not carry a
        // stale interruption into their next task.
        interrupt::clear_current();

        if !prevented && armed.fired() {
            if let Err(e) = &result {
                if is_interruption(e) {
                    warn!(timeout = ?timeout, "Call interrupted by its deadline");
                    return Err(InvokeError::Timeout { timeout });
                }
            }
        }

        result
    }

    fn invoke_unsupervised(
        &self,
        method: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, InvokeError> {
        let entry = self.resolve_entry()?;

        let dispatched =
            switch::run_in(&self.context, || self.dispatcher.dispatch(&entry, method, args));

        match dispatched {
            Err(DispatchError::ConnectionLost(reason)) if self.refresh_on_connect_failure => {
                debug!(reason = %reason, "Connection lost, refreshing entry and retrying once");
                self.refresh();
                let entry = self.resolve_entry()?;
                let retried =
                    switch::run_in(&self.context, || self.dispatcher.dispatch(&entry, method, args));
                Ok(retried?)
            }
            other => Ok(other?),
        }
    }

    /// Resolve (and cache) the target's naming entry inside the bound
    /// context, verifying the declared remote interface when one was
    /// configured.
    fn resolve_entry(&self) -> Result<NamingEntry, InvokeError> {
        let mut cached = self.entry.lock();
        if let Some(entry) = cached.as_ref() {
            return Ok(entry.clone());
        }

        let entry = self.naming.lookup(&self.service_name)?;

        if let (Some(expected), Some(actual)) =
            (self.remote_interface.as_deref(), entry.remote_interface.as_deref())
        {
            if expected != actual {
                return Err(InvokeError::Naming(NamingError::TypeMismatch {
                    name: self.service_name.clone(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                }));
            }
        }

        debug!(
            service = %self.service_name,
            address = %entry.address,
            "Resolved remote session object"
        );
        *cached = Some(entry.clone());
        Ok(entry)
    }
}

fn is_interruption(error: &InvokeError) -> bool {
    matches!(
        error,
        InvokeError::Dispatch(DispatchError::Interrupted)
            | InvokeError::Naming(NamingError::Interrupted)
    )
}
