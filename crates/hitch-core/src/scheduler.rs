//! Deferred work supplied by the host.

use std::fmt;
use std::time::Duration;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + 'static>;

/// Identifier returned by [`Scheduler::set_timeout`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The host's task queue.
///
/// Everything runs on one cooperative thread. `defer` runs a task after the
/// current synchronous turn finishes (effects are flushed this way), and
/// `set_timeout` runs one after a delay (context polling uses it). Neither
/// may run the task inline.
pub trait Scheduler {
    /// Queue `task` to run once the current turn completes.
    fn defer(&self, task: Task);

    /// Run `task` after `delay`.
    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a timer. Unknown or already fired ids are ignored.
    fn clear_timeout(&self, id: TimerId);
}
