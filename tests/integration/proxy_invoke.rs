//! Session proxy configuration and invocation behavior

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;
use switchyard::context::ResolutionContext;
use switchyard::error::{InvokeError, NamingError};
use switchyard::naming::{env, NamingEnvironment};
use switchyard::proxy::SessionProxy;

use super::test_utils::{EchoDispatcher, FlakyDispatcher, InMemoryDirectory};

fn directory_with(name: &str, address: &str, interface: Option<&str>) -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.bind(name, address, interface);
    directory
}

#[test]
fn test_build_fails_fast_naming_each_missing_requirement() {
    let ctx = ResolutionContext::new("fail-fast");
    let directory = directory_with("svc", "addr", None);

    let err = SessionProxy::builder().build().unwrap_err();
    assert!(matches!(err, InvokeError::MissingConfiguration("context")));

    let err = SessionProxy::builder().context(ctx.clone()).build().unwrap_err();
    assert!(matches!(err, InvokeError::MissingConfiguration("directory")));

    let err = SessionProxy::builder()
        .context(ctx.clone())
        .directory(directory.clone())
        .build()
        .unwrap_err();
    assert!(matches!(err, InvokeError::MissingConfiguration("dispatcher")));

    let err = SessionProxy::builder()
        .context(ctx)
        .directory(directory)
        .dispatcher(Arc::new(EchoDispatcher::new()))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        InvokeError::MissingConfiguration("service_name")
    ));
}

#[test]
fn test_invoke_dispatches_inside_bound_context() {
    let ctx = ResolutionContext::new("dispatching");
    let directory = directory_with("billing/Session", "node-2:slot-9", None);
    let dispatcher = Arc::new(EchoDispatcher::new());

    let proxy = SessionProxy::builder()
        .context(ctx.clone())
        .directory(directory)
        .dispatcher(dispatcher.clone())
        .service_name("billing/Session")
        .build()
        .unwrap();

    let result = proxy.invoke("charge", &json!({"amount": 42})).unwrap();
    assert_eq!(result["address"], "node-2:slot-9");
    assert_eq!(result["method"], "charge");
    assert_eq!(result["args"]["amount"], 42);

    let contexts = dispatcher.dispatch_contexts.lock().unwrap();
    assert_eq!(contexts.as_slice(), &[Some(ctx.id().as_u64())]);
}

#[test]
fn test_lookup_happens_once_and_is_cached() {
    let ctx = ResolutionContext::new("caching");
    let directory = directory_with("svc", "addr", None);
    let dispatcher = Arc::new(EchoDispatcher::new());

    let proxy = SessionProxy::builder()
        .context(ctx)
        .directory(directory.clone())
        .dispatcher(dispatcher)
        .service_name("svc")
        .build()
        .unwrap();

    proxy.invoke("a", &json!(null)).unwrap();
    proxy.invoke("b", &json!(null)).unwrap();
    proxy.invoke("c", &json!(null)).unwrap();

    assert_eq!(directory.lookup_contexts.lock().unwrap().len(), 1);
    assert_eq!(directory.open_count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_lookup_on_startup_connects_eagerly() {
    let ctx = ResolutionContext::new("eager");
    let directory = directory_with("svc", "addr", None);

    let _proxy = SessionProxy::builder()
        .context(ctx)
        .directory(directory.clone())
        .dispatcher(Arc::new(EchoDispatcher::new()))
        .service_name("svc")
        .lookup_on_startup(true)
        .build()
        .unwrap();

    assert_eq!(directory.open_count.load(Ordering::SeqCst), 1);
    assert_eq!(directory.lookup_contexts.lock().unwrap().len(), 1);
}

#[test]
fn test_eager_lookup_surfaces_naming_failure_at_build() {
    let ctx = ResolutionContext::new("eager-missing");
    let directory = Arc::new(InMemoryDirectory::new());

    let err = SessionProxy::builder()
        .context(ctx)
        .directory(directory)
        .dispatcher(Arc::new(EchoDispatcher::new()))
        .service_name("absent")
        .lookup_on_startup(true)
        .build()
        .unwrap_err();
    assert!(matches!(err, InvokeError::Naming(NamingError::NotFound(_))));
}

#[test]
fn test_environment_copied_at_build_time() {
    let ctx = ResolutionContext::new("env-copy");
    let directory = directory_with("svc", "addr", None);

    let mut environment = NamingEnvironment::new();
    environment.set(env::PROVIDER_URL, "remote://original:1099");

    let proxy = SessionProxy::builder()
        .context(ctx)
        .directory(directory.clone())
        .dispatcher(Arc::new(EchoDispatcher::new()))
        .service_name("svc")
        .environment(&environment)
        .build()
        .unwrap();

    environment.set(env::PROVIDER_URL, "remote://mutated:1099");
    proxy.invoke("m", &json!(null)).unwrap();

    let opened = directory.opened_urls.lock().unwrap();
    assert_eq!(
        opened.as_slice(),
        &[Some("remote://original:1099".to_string())]
    );
}

#[test]
fn test_interface_mismatch_rejected() {
    let ctx = ResolutionContext::new("narrowing");
    let directory = directory_with("svc", "addr", Some("com.example.OrderService"));

    let proxy = SessionProxy::builder()
        .context(ctx)
        .directory(directory)
        .dispatcher(Arc::new(EchoDispatcher::new()))
        .service_name("svc")
        .remote_interface("com.example.BillingService")
        .build()
        .unwrap();

    let err = proxy.invoke("m", &json!(null)).unwrap_err();
    match err {
        InvokeError::Naming(NamingError::TypeMismatch {
            expected, actual, ..
        }) => {
            assert_eq!(expected, "com.example.BillingService");
            assert_eq!(actual, "com.example.OrderService");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_matching_interface_accepted() {
    let ctx = ResolutionContext::new("narrow-ok");
    let directory = directory_with("svc", "addr", Some("com.example.OrderService"));

    let proxy = SessionProxy::builder()
        .context(ctx)
        .directory(directory)
        .dispatcher(Arc::new(EchoDispatcher::new()))
        .service_name("svc")
        .remote_interface("com.example.OrderService")
        .build()
        .unwrap();

    proxy.invoke("m", &json!(null)).unwrap();
}

#[test]
fn test_connection_lost_refreshes_and_retries_once() {
    let ctx = ResolutionContext::new("refreshing");
    let directory = directory_with("svc", "addr", None);
    let dispatcher = Arc::new(FlakyDispatcher::new(1));

    let proxy = SessionProxy::builder()
        .context(ctx)
        .directory(directory.clone())
        .dispatcher(dispatcher.clone())
        .service_name("svc")
        .build()
        .unwrap();

    let result = proxy.invoke("m", &json!(null)).unwrap();
    assert_eq!(result, json!("recovered"));
    assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
    // Entry was re-resolved for the retry.
    assert_eq!(directory.lookup_contexts.lock().unwrap().len(), 2);
}

#[test]
fn test_retry_happens_at_most_once() {
    let ctx = ResolutionContext::new("still-down");
    let directory = directory_with("svc", "addr", None);
    let dispatcher = Arc::new(FlakyDispatcher::new(5));

    let proxy = SessionProxy::builder()
        .context(ctx)
        .directory(directory)
        .dispatcher(dispatcher.clone())
        .service_name("svc")
        .build()
        .unwrap();

    let err = proxy.invoke("m", &json!(null)).unwrap_err();
    assert!(matches!(err, InvokeError::Dispatch(_)));
    assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_refresh_disabled_fails_without_retry() {
    let ctx = ResolutionContext::new("no-refresh");
    let directory = directory_with("svc", "addr", None);
    let dispatcher = Arc::new(FlakyDispatcher::new(1));

    let proxy = SessionProxy::builder()
        .context(ctx)
        .directory(directory)
        .dispatcher(dispatcher.clone())
        .service_name("svc")
        .refresh_on_connect_failure(false)
        .build()
        .unwrap();

    let err = proxy.invoke("m", &json!(null)).unwrap_err();
    assert!(matches!(err, InvokeError::Dispatch(_)));
    assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_call_leaves_proxy_reusable() {
    let ctx = ResolutionContext::new("reusable");
    let directory = Arc::new(InMemoryDirectory::new());
    let dispatcher = Arc::new(EchoDispatcher::new());

    let proxy = SessionProxy::builder()
        .context(ctx)
        .directory(directory.clone())
        .dispatcher(dispatcher)
        .service_name("late/Service")
        .build()
        .unwrap();

    // Name not bound yet: the call fails.
    assert!(proxy.invoke("m", &json!(null)).is_err());

    // It appears; the same proxy now succeeds.
    directory.bind("late/Service", "addr", None);
    proxy.invoke("m", &json!(null)).unwrap();
}

#[test]
fn test_typed_call_deserializes_response() {
    #[derive(serde::Deserialize)]
    struct Echoed {
        method: String,
    }

    let ctx = ResolutionContext::new("typed");
    let directory = directory_with("svc", "addr", None);

    let proxy = SessionProxy::builder()
        .context(ctx)
        .directory(directory)
        .dispatcher(Arc::new(EchoDispatcher::new()))
        .service_name("svc")
        .build()
        .unwrap();

    let echoed: Echoed = proxy.call("status", &json!(null)).unwrap();
    assert_eq!(echoed.method, "status");
}
