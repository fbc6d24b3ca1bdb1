//! Context-Switch Executor
//!
//! Runs a unit of work with a given [`ResolutionContext`] temporarily installed
//! as the calling thread's active context. Each thread owns exactly one
//! active-context slot; no cross-thread locking is involved. The slot is always
//! restored to its pre-call value before `run_in` returns, on normal return,
//! early `?`, and unwind alike.

use std::cell::RefCell;

use tracing::trace;

use crate::context::ResolutionContext;

thread_local! {
    static ACTIVE_CONTEXT: RefCell<Option<ResolutionContext>> = const { RefCell::new(None) };
}

/// The calling thread's currently active context, if any.
pub fn current() -> Option<ResolutionContext> {
    ACTIVE_CONTEXT.with(|slot| slot.borrow().clone())
}

/// Restores the previous slot value when dropped.
///
/// Restoration via `Drop` is what makes the executor panic-safe: the guard
/// runs during unwind exactly as it does on normal return.
struct RestoreGuard {
    previous: Option<ResolutionContext>,
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_CONTEXT.with(|slot| {
            trace!(
                restored = previous.as_ref().map(|c| c.id().as_u64()),
                "Restoring active context"
            );
            *slot.borrow_mut() = previous;
        });
    }
}

/// Run `work` with `context` installed as the thread's active context.
///
/// If `context` is already the active context, `work` runs directly: no slot
/// write, no guard, no switch logging. Otherwise the slot is written, `work`
/// runs, and the previous value is restored before this function returns.
/// Whatever `work` returns (including an `Err`) propagates unchanged; the
/// executor wraps nothing.
pub fn run_in<T>(context: &ResolutionContext, work: impl FnOnce() -> T) -> T {
    let already_active =
        ACTIVE_CONTEXT.with(|slot| slot.borrow().as_ref().map(|c| c == context).unwrap_or(false));

    if already_active {
        // Idempotent fast path: nested entry into the active context.
        return work();
    }

    let previous = ACTIVE_CONTEXT.with(|slot| slot.borrow_mut().replace(context.clone()));
    trace!(
        context = context.id().as_u64(),
        label = context.label(),
        previous = previous.as_ref().map(|c| c.id().as_u64()),
        "Switching active context"
    );

    let _guard = RestoreGuard { previous };
    work()
}
