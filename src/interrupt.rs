//! Thread interruption
//!
//! Cooperative cancellation tokens with per-thread identity. A token is bound
//! to one thread; interrupting it sets a flag and unparks the thread, nothing
//! more. Blocking code that wants to be cancellable must poll
//! [`InterruptToken::is_interrupted`] (or park and re-check on unpark).
//! Nobody is force-terminated: code that never looks at its token simply runs
//! to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::Thread;

use tracing::trace;

struct TokenState {
    interrupted: AtomicBool,
    target: Thread,
}

/// Interruption flag for one thread. Cheap to clone and `Send`, so it can be
/// handed to a scheduler or another thread while the owner keeps running.
#[derive(Clone)]
pub struct InterruptToken {
    state: Arc<TokenState>,
}

impl InterruptToken {
    /// The calling thread's token, created on first use.
    pub fn current() -> Self {
        thread_local! {
            static TOKEN: InterruptToken = InterruptToken {
                state: Arc::new(TokenState {
                    interrupted: AtomicBool::new(false),
                    target: std::thread::current(),
                }),
            };
        }
        TOKEN.with(InterruptToken::clone)
    }

    /// Set the interruption flag and unpark the target thread.
    pub fn interrupt(&self) {
        self.state.interrupted.store(true, Ordering::SeqCst);
        trace!(thread = ?self.state.target.id(), "Interrupt delivered");
        self.state.target.unpark();
    }

    /// Observe the flag without clearing it.
    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }

    /// Clear the flag, reporting whether it was set.
    pub fn take(&self) -> bool {
        self.state.interrupted.swap(false, Ordering::SeqCst)
    }
}

/// Check and clear the calling thread's interruption flag.
pub fn interrupted() -> bool {
    InterruptToken::current().take()
}

/// Unconditionally clear the calling thread's interruption flag.
pub fn clear_current() {
    InterruptToken::current().take();
}
