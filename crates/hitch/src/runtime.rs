//! Tokio integration: a [`Scheduler`] backed by a `LocalSet`.
//!
//! Hitch's runtime types are `!Send`, so everything runs on one thread. Use a
//! current-thread runtime with a [`LocalSet`] and create the scheduler inside
//! it:
//!
//! ```ignore
//! hitch::block_on_local(async {
//!     let scheduler = Rc::new(TokioScheduler::new());
//!     let root = MountRoot::new(tree, scheduler);
//!     // mount components, await host events...
//! })?;
//! ```

use hitch_core::{Scheduler, Task, TimerId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::task::{AbortHandle, LocalSet};

/// Scheduler that spawns deferred work and timers onto the current `LocalSet`.
///
/// Every method must be called from inside a `LocalSet` context.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    inner: Rc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    next_timer: Cell<u64>,
    timers: RefCell<HashMap<TimerId, AbortHandle>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timers that have neither fired nor been cleared.
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }
}

impl Scheduler for TokioScheduler {
    fn defer(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }

    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.inner.next_timer.get());
        self.inner.next_timer.set(id.0 + 1);

        let inner: Weak<SchedulerInner> = Rc::downgrade(&self.inner);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.timers.borrow_mut().remove(&id);
            }
            task();
        });

        tracing::trace!(timer = %id, ?delay, "timer armed");
        self.inner
            .timers
            .borrow_mut()
            .insert(id, handle.abort_handle());
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        if let Some(handle) = self.inner.timers.borrow_mut().remove(&id) {
            tracing::trace!(timer = %id, "timer cleared");
            handle.abort();
        }
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

/// Run `future` to completion on a fresh current-thread runtime inside a
/// `LocalSet`.
pub fn block_on_local<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let local = LocalSet::new();
    Ok(local.block_on(&runtime, future))
}
