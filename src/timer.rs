//! One-shot interrupt scheduler
//!
//! A dedicated timer thread that fires scheduled interrupts against
//! [`InterruptToken`]s when their deadline elapses. The timer communicates
//! with target threads only by interrupting them; it mutates no other shared
//! state. Disarming an entry after it has fired is a safe no-op.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::interrupt::InterruptToken;

const STATE_ARMED: u8 = 0;
const STATE_FIRED: u8 = 1;
const STATE_DISARMED: u8 = 2;

struct Entry {
    deadline: Instant,
    state: Arc<EntryState>,
}

struct EntryState {
    token: InterruptToken,
    state: AtomicU8,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

/// Handle to one scheduled interrupt.
///
/// Exactly one exists per armed timeout. Dropping it without disarming leaves
/// the interrupt armed.
pub struct ArmedInterrupt {
    state: Arc<EntryState>,
}

impl ArmedInterrupt {
    /// Prevent the interrupt from firing.
    ///
    /// Returns `true` when the firing was actually prevented; `false` when
    /// the interrupt had already fired (in which case the caller is expected
    /// to clear its thread's interruption flag). Calling this twice is safe.
    pub fn disarm(&self) -> bool {
        self.state
            .state
            .compare_exchange(
                STATE_ARMED,
                STATE_DISARMED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Whether the interrupt has fired.
    pub fn fired(&self) -> bool {
        self.state.state.load(Ordering::SeqCst) == STATE_FIRED
    }
}

struct SchedulerShared {
    queue: Mutex<BinaryHeap<Reverse<Entry>>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
}

/// Timer thread firing one-shot interrupts at their deadlines.
///
/// Cheap to share (`Arc`); one scheduler serves any number of proxies. The
/// thread is joined on drop with a bounded wait.
pub struct InterruptScheduler {
    shared: Arc<SchedulerShared>,
    worker: Option<JoinHandle<()>>,
}

impl InterruptScheduler {
    pub fn new() -> Self {
        let shared = Arc::new(SchedulerShared {
            queue: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = match std::thread::Builder::new()
            .name("switchyard-interrupt-timer".to_string())
            .spawn(move || run_timer(worker_shared))
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn interrupt timer thread");
                None
            }
        };

        Self { shared, worker }
    }

    /// Arm an interrupt against `token` at `deadline`.
    pub fn schedule(&self, token: InterruptToken, deadline: Instant) -> ArmedInterrupt {
        let state = Arc::new(EntryState {
            token,
            state: AtomicU8::new(STATE_ARMED),
        });

        trace!(deadline = ?deadline, "Arming interrupt");
        {
            let mut queue = self.shared.queue.lock();
            queue.push(Reverse(Entry {
                deadline,
                state: Arc::clone(&state),
            }));
        }
        self.shared.wakeup.notify_one();

        ArmedInterrupt { state }
    }

    /// Convenience: arm an interrupt `timeout` from now.
    pub fn schedule_after(&self, token: InterruptToken, timeout: Duration) -> ArmedInterrupt {
        self.schedule(token, Instant::now() + timeout)
    }
}

impl Default for InterruptScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_timer(shared: Arc<SchedulerShared>) {
    let mut queue = shared.queue.lock();
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return;
        }

        let now = Instant::now();

        // Fire everything due, skipping disarmed entries.
        while queue
            .peek()
            .map(|Reverse(head)| head.deadline <= now)
            .unwrap_or(false)
        {
            if let Some(Reverse(entry)) = queue.pop() {
                let armed = entry.state.state.compare_exchange(
                    STATE_ARMED,
                    STATE_FIRED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                if armed.is_ok() {
                    debug!("Call deadline elapsed, interrupting caller");
                    entry.state.token.interrupt();
                }
            }
        }

        match queue.peek() {
            Some(Reverse(next)) => {
                let wait = next.deadline.saturating_duration_since(Instant::now());
                shared.wakeup.wait_for(&mut queue, wait);
            }
            None => {
                shared.wakeup.wait(&mut queue);
            }
        }
    }
}
