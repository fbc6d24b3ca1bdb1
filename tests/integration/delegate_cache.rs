//! Delegate cache creation, identity, and eviction behavior

use std::sync::{Arc, Barrier};

use switchyard::delegate::DelegateCache;
use switchyard::error::DelegateError;
use switchyard::switch;

use super::test_utils::{context_with_provider, DelegateEnvGuard};

#[test]
fn test_distinct_contexts_get_distinct_delegates() {
    let _env = DelegateEnvGuard::set("it-distinct-impl");
    let cache = DelegateCache::new();
    let c1 = context_with_provider("runtime-a", "it-distinct-impl");
    let c2 = context_with_provider("runtime-b", "it-distinct-impl");

    let d1 = cache.get(&c1).unwrap();
    let d2 = cache.get(&c2).unwrap();
    assert!(!Arc::ptr_eq(&d1, &d2));
}

#[test]
fn test_repeat_lookup_returns_reference_identical_instance() {
    let _env = DelegateEnvGuard::set("it-identity-impl");
    let cache = DelegateCache::new();
    let ctx = context_with_provider("runtime", "it-identity-impl");

    let first = cache.get(&ctx).unwrap();
    let second = cache.get(&ctx).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_concurrent_first_access_converges_to_one_instance() {
    let _env = DelegateEnvGuard::set("it-concurrent-impl");
    let cache = Arc::new(DelegateCache::new());
    let ctx = context_with_provider("contended", "it-concurrent-impl");

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let ctx = ctx.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                cache.get(&ctx).unwrap()
            })
        })
        .collect();

    let delegates: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Every caller, and every later reader, sees the one winning instance.
    let winner = cache.get(&ctx).unwrap();
    for delegate in &delegates {
        assert!(Arc::ptr_eq(delegate, &winner));
    }
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_missing_configuration_fails_every_time_with_no_entry() {
    let _env = DelegateEnvGuard::unset();
    let cache = DelegateCache::new();
    let ctx = context_with_provider("unconfigured", "it-unused-impl");

    for _ in 0..3 {
        let err = cache.get(&ctx).unwrap_err();
        assert!(matches!(err, DelegateError::ConfigurationMissing(_)));
    }
    assert!(cache.is_empty());
}

#[test]
fn test_creation_failure_not_cached_so_retry_can_succeed() {
    let _env = DelegateEnvGuard::set("it-retry-impl");
    let cache = DelegateCache::new();

    // No provider anywhere: creation fails.
    let ctx = context_with_provider("late-provider", "it-other-impl");
    let err = cache.get(&ctx).unwrap_err();
    assert!(matches!(err, DelegateError::CreationFailed { .. }));
    assert!(cache.is_empty());

    // Provider appears; the same context now succeeds.
    ctx.register_provider(
        "it-retry-impl",
        super::test_utils::recording_factory("it-retry-impl"),
    );
    let delegate = cache.get(&ctx).unwrap();
    assert_eq!(delegate.implementation(), "it-retry-impl");
}

#[test]
fn test_retired_context_entry_evicted_on_purge() {
    let _env = DelegateEnvGuard::set("it-purge-impl");
    let cache = DelegateCache::new();

    {
        let retired = context_with_provider("retired", "it-purge-impl");
        cache.get(&retired).unwrap();
        assert_eq!(cache.len(), 1);
    }

    cache.purge();
    assert!(cache.is_empty());
}

#[test]
fn test_for_current_uses_active_slot() {
    let _env = DelegateEnvGuard::set("it-current-impl");
    let cache = DelegateCache::new();
    let ctx = context_with_provider("active", "it-current-impl");

    let err = cache.for_current().unwrap_err();
    assert!(matches!(err, DelegateError::NoActiveContext));

    let (inside, direct) = switch::run_in(&ctx, || {
        let inside = cache.for_current().unwrap();
        let direct = cache.get(&ctx).unwrap();
        (inside, direct)
    });
    assert!(Arc::ptr_eq(&inside, &direct));
}
