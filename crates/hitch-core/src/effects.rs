//! Effect hooks and the deferred effect queue.
//!
//! An effect body never runs inside render. When a render finds that an
//! effect's dependencies changed, the slot is marked pending and, once the
//! render commits, handed to its root's [`EffectQueue`]. The queue is
//! flushed by a task deferred through the host [`Scheduler`]; for each slot
//! it first runs the cleanup left by the previous run, then the new body.
//!
//! [`Scheduler`]: crate::scheduler::Scheduler

use crate::instance::{self, InstanceId, Liveness};
use crate::ledger::SlotKind;
use crate::root::MountRoot;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

pub(crate) type Cleanup = Box<dyn FnOnce()>;
type EffectBody = Box<dyn FnOnce() -> Option<Cleanup>>;

/// Storage for one effect slot.
pub(crate) struct EffectCell {
    state: RefCell<EffectState>,
}

struct EffectState {
    /// Dependencies of the last committed run; `None` before the first run
    /// and for effects without dependencies
    deps: Option<Box<dyn Any>>,
    /// Cleanup returned by the last completed run
    cleanup: Option<Cleanup>,
    /// Body committed and waiting for the next flush
    pending: Option<EffectBody>,
    /// Body and dependencies recorded by a render that has not committed
    staged: Option<(EffectBody, Option<Box<dyn Any>>)>,
}

impl EffectCell {
    fn new() -> Self {
        Self {
            state: RefCell::new(EffectState {
                deps: None,
                cleanup: None,
                pending: None,
                staged: None,
            }),
        }
    }

    pub(crate) fn take_cleanup(&self) -> Option<Cleanup> {
        self.state.borrow_mut().cleanup.take()
    }

    pub(crate) fn discard_pending(&self) {
        let mut state = self.state.borrow_mut();
        state.pending = None;
        state.staged = None;
    }

    /// Forget what the current render recorded; committed deps stay as they were.
    pub(crate) fn discard_staged(&self) {
        self.state.borrow_mut().staged = None;
    }

    /// Promote the staged run to pending. Returns `false` when a committed
    /// run was already waiting, i.e. the cell is already in the queue.
    pub(crate) fn commit(&self) -> bool {
        let mut state = self.state.borrow_mut();
        let Some((body, deps)) = state.staged.take() else {
            return false;
        };
        state.deps = deps;
        state.pending.replace(body).is_none()
    }

    fn take_pending(&self) -> Option<EffectBody> {
        self.state.borrow_mut().pending.take()
    }

    fn store_cleanup(&self, cleanup: Cleanup) {
        let previous = self.state.borrow_mut().cleanup.replace(cleanup);
        debug_assert!(previous.is_none(), "effect cleanup was not acknowledged");
    }
}

/// One queued effect run, in render-commit order.
struct EffectTask {
    owner: InstanceId,
    liveness: Liveness,
    cell: Rc<EffectCell>,
}

/// Effects committed by renders under one root and not yet flushed.
#[derive(Default)]
pub(crate) struct EffectQueue {
    tasks: RefCell<VecDeque<EffectTask>>,
    flush_scheduled: Cell<bool>,
}

impl EffectQueue {
    pub(crate) fn push(&self, owner: InstanceId, liveness: Liveness, cell: Rc<EffectCell>) {
        self.tasks.borrow_mut().push_back(EffectTask {
            owner,
            liveness,
            cell,
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    fn pop(&self) -> Option<EffectTask> {
        self.tasks.borrow_mut().pop_front()
    }
}

/// Defer a flush of `root`'s queue unless one is already waiting.
pub(crate) fn schedule_flush(root: &MountRoot) {
    let queue = root.effects();
    if queue.flush_scheduled.replace(true) {
        return;
    }

    let weak = root.downgrade();
    root.scheduler().defer(Box::new(move || {
        if let Some(root) = MountRoot::from_weak(&weak) {
            flush(&root);
        }
    }));
}

/// Run every queued effect of `root`.
///
/// A panicking cleanup or body is logged and skipped so the rest of the
/// queue still runs; the first panic is resumed at the end when the root's
/// config asks for it.
pub(crate) fn flush(root: &MountRoot) {
    let queue = root.effects();
    queue.flush_scheduled.set(false);

    let mut first_panic = None;
    let mut ran = 0_usize;

    while let Some(task) = queue.pop() {
        if !task.liveness.is_live() {
            tracing::trace!(instance = %task.owner, "dropping effect of disconnected instance");
            task.cell.discard_pending();
            continue;
        }

        // Already run by an earlier task for the same slot.
        let Some(body) = task.cell.take_pending() else {
            continue;
        };

        if let Some(cleanup) = task.cell.take_cleanup() {
            run_guarded(task.owner, "cleanup", cleanup, &mut first_panic);
            if !task.liveness.is_live() {
                continue;
            }
        }

        ran += 1;
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Some(cleanup)) if task.liveness.is_live() => {
                task.cell.store_cleanup(cleanup);
            }
            Ok(Some(cleanup)) => {
                // Teardown already ran; this cleanup would otherwise be lost.
                run_guarded(task.owner, "cleanup", cleanup, &mut first_panic);
            }
            Ok(None) => {}
            Err(payload) => {
                tracing::error!(
                    instance = %task.owner,
                    "effect panicked: {}",
                    panic_message(payload.as_ref())
                );
                first_panic.get_or_insert(payload);
            }
        }
    }

    tracing::trace!(ran, "flushed effects");

    if let Some(payload) = first_panic
        && root.config().propagate_effect_panics
    {
        panic::resume_unwind(payload);
    }
}

/// Run `f`, logging and recording a panic instead of unwinding.
pub(crate) fn run_guarded(
    owner: InstanceId,
    what: &str,
    f: impl FnOnce(),
    first_panic: &mut Option<Box<dyn Any + Send>>,
) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        tracing::error!(
            instance = %owner,
            "effect {what} panicked: {}",
            panic_message(payload.as_ref())
        );
        first_panic.get_or_insert(payload);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// Record an effect for the current render; queue it if `deps` changed.
#[track_caller]
fn use_effect_slot<D: PartialEq + 'static>(deps: Option<D>, body: EffectBody) {
    let slot = instance::use_slot(SlotKind::Effect, |_| EffectCell::new());

    let mut state = slot.cell.state.borrow_mut();
    let changed = match (&state.deps, &deps) {
        (Some(old), Some(new)) => old.downcast_ref::<D>().is_none_or(|old| old != new),
        _ => true,
    };
    if !changed {
        return;
    }

    let deps = deps.map(|deps| Box::new(deps) as Box<dyn Any>);
    let already_staged = state.staged.replace((body, deps)).is_some();
    drop(state);

    if !already_staged {
        slot.instance.stage_effect(slot.cell);
    }
}

/// Run a side effect after render when dependencies change.
///
/// The effect runs after the render that queued it has returned, on the
/// host's scheduler, and again after any later render whose `deps` differ.
/// Dependencies are compared with `PartialEq`; tuples and arrays compare
/// element by element.
///
/// # Example
///
/// ```ignore
/// fn render(&mut self) -> String {
///     let (count, _) = use_state(|| 0);
///
///     use_effect(move || {
///         tracing::info!("count is now {count}");
///     }, count);
///     // ...
/// }
/// ```
#[track_caller]
pub fn use_effect<F, D>(effect_fn: F, deps: D)
where
    F: FnOnce() + 'static,
    D: PartialEq + 'static,
{
    use_effect_slot(
        Some(deps),
        Box::new(move || {
            effect_fn();
            None
        }),
    );
}

/// Run a side effect with a cleanup function when dependencies change.
///
/// The cleanup runs before the next run of this effect, or when the
/// instance disconnects, whichever comes first. It always runs, even if the
/// instance disconnects while the body is still executing.
///
/// # Example
///
/// ```ignore
/// use_effect_cleanup(move || {
///     let subscription = feed.subscribe(id);
///     move || subscription.cancel()
/// }, id);
/// ```
#[track_caller]
pub fn use_effect_cleanup<F, C, D>(effect_fn: F, deps: D)
where
    F: FnOnce() -> C + 'static,
    C: FnOnce() + 'static,
    D: PartialEq + 'static,
{
    use_effect_slot(
        Some(deps),
        Box::new(move || Some(Box::new(effect_fn()) as Cleanup)),
    );
}

/// Run a side effect once, after the first render.
///
/// The returned cleanup runs on disconnect.
#[track_caller]
pub fn use_mount<F, C>(effect_fn: F)
where
    F: FnOnce() -> C + 'static,
    C: FnOnce() + 'static,
{
    // Unit deps never change
    use_effect_cleanup(effect_fn, ());
}

/// Run a side effect after every render.
#[track_caller]
pub fn use_effect_always<F, C>(effect_fn: F)
where
    F: FnOnce() -> C + 'static,
    C: FnOnce() + 'static,
{
    use_effect_slot::<()>(
        None,
        Box::new(move || Some(Box::new(effect_fn()) as Cleanup)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::use_state;
    use crate::lifecycle::Lifecycle;
    use crate::testing::TestHost;

    type Log = Rc<RefCell<Vec<String>>>;

    fn log(log: &Log, entry: impl Into<String>) {
        log.borrow_mut().push(entry.into());
    }

    struct Watcher {
        dep: Rc<Cell<u32>>,
        log: Log,
    }

    impl Lifecycle for Watcher {
        type Output = String;

        fn render(&mut self) -> String {
            let dep = self.dep.get();
            let log_run = Rc::clone(&self.log);
            use_effect_cleanup(
                move || {
                    log(&log_run, format!("run {dep}"));
                    let log_cleanup = Rc::clone(&log_run);
                    move || log(&log_cleanup, format!("cleanup {dep}"))
                },
                dep,
            );
            log(&self.log, format!("render {dep}"));
            dep.to_string()
        }
    }

    #[test]
    fn effects_run_after_render_and_clean_up_before_rerun() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let dep = Rc::new(Cell::new(1));
        let entries: Log = Rc::default();

        let node = host.mount(
            &root,
            container,
            Watcher {
                dep: Rc::clone(&dep),
                log: Rc::clone(&entries),
            },
        );
        assert_eq!(*entries.borrow(), vec!["render 1"]);
        assert_eq!(root.pending_effects(), 1);

        host.run_until_idle();
        assert_eq!(*entries.borrow(), vec!["render 1", "run 1"]);

        // Same deps: nothing queued.
        host.render(node);
        host.run_until_idle();
        assert_eq!(entries.borrow().len(), 3);

        dep.set(2);
        host.render(node);
        host.run_until_idle();
        assert_eq!(
            *entries.borrow(),
            vec!["render 1", "run 1", "render 1", "render 2", "cleanup 1", "run 2"]
        );

        host.remove(node);
        assert_eq!(entries.borrow().last().unwrap(), "cleanup 2");
    }

    #[test]
    fn two_renders_before_flush_run_the_latest_body_once() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let dep = Rc::new(Cell::new(1));
        let entries: Log = Rc::default();

        let node = host.mount(
            &root,
            container,
            Watcher {
                dep: Rc::clone(&dep),
                log: Rc::clone(&entries),
            },
        );
        dep.set(2);
        host.render(node);
        assert_eq!(root.pending_effects(), 1);

        host.run_until_idle();
        assert_eq!(*entries.borrow(), vec!["render 1", "render 2", "run 2"]);
    }

    #[test]
    fn effect_queued_for_removed_instance_never_runs() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let entries: Log = Rc::default();

        let node = host.mount(
            &root,
            container,
            Watcher {
                dep: Rc::new(Cell::new(7)),
                log: Rc::clone(&entries),
            },
        );
        host.remove(node);
        host.run_until_idle();

        assert_eq!(*entries.borrow(), vec!["render 7"]);
    }

    /// Records its effect, then fails the render when asked to.
    struct Flaky {
        dep: Rc<Cell<u32>>,
        fail: Rc<Cell<bool>>,
        runs: Rc<RefCell<Vec<u32>>>,
    }

    impl Lifecycle for Flaky {
        type Output = String;

        fn render(&mut self) -> String {
            let dep = self.dep.get();
            let runs = Rc::clone(&self.runs);
            use_effect(move || runs.borrow_mut().push(dep), dep);
            assert!(!self.fail.get(), "render failed");
            dep.to_string()
        }
    }

    #[test]
    fn failed_render_does_not_swallow_the_next_effect() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let dep = Rc::new(Cell::new(1));
        let fail = Rc::new(Cell::new(false));
        let runs = Rc::new(RefCell::new(Vec::new()));

        let node = host.mount(
            &root,
            container,
            Flaky {
                dep: Rc::clone(&dep),
                fail: Rc::clone(&fail),
                runs: Rc::clone(&runs),
            },
        );
        host.run_until_idle();

        dep.set(2);
        fail.set(true);
        let rendered = panic::catch_unwind(AssertUnwindSafe(|| host.render(node)));
        assert!(rendered.is_err());
        assert_eq!(root.pending_effects(), 0);

        fail.set(false);
        host.render(node);
        host.run_until_idle();

        assert_eq!(host.output(node), "2");
        assert_eq!(*runs.borrow(), vec![1, 2]);
    }

    #[test]
    fn failed_render_keeps_an_earlier_committed_run() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let dep = Rc::new(Cell::new(1));
        let fail = Rc::new(Cell::new(false));
        let runs = Rc::new(RefCell::new(Vec::new()));

        let node = host.mount(
            &root,
            container,
            Flaky {
                dep: Rc::clone(&dep),
                fail: Rc::clone(&fail),
                runs: Rc::clone(&runs),
            },
        );
        dep.set(2);
        fail.set(true);
        let rendered = panic::catch_unwind(AssertUnwindSafe(|| host.render(node)));
        assert!(rendered.is_err());

        host.run_until_idle();
        assert_eq!(*runs.borrow(), vec![1]);
    }

    struct Always {
        runs: Rc<Cell<u32>>,
    }

    impl Lifecycle for Always {
        type Output = String;

        fn render(&mut self) -> String {
            let runs = Rc::clone(&self.runs);
            use_effect_always(move || {
                runs.set(runs.get() + 1);
                || {}
            });
            String::new()
        }
    }

    #[test]
    fn effect_without_deps_runs_after_every_render() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let runs = Rc::new(Cell::new(0));

        let node = host.mount(&root, container, Always { runs: Rc::clone(&runs) });
        host.run_until_idle();
        host.render(node);
        host.run_until_idle();
        host.render(node);
        host.run_until_idle();

        assert_eq!(runs.get(), 3);
    }

    struct Panicky {
        log: Log,
    }

    impl Lifecycle for Panicky {
        type Output = String;

        fn render(&mut self) -> String {
            use_mount(|| -> Box<dyn FnOnce()> { panic!("boom") });
            let log_run = Rc::clone(&self.log);
            use_effect(move || log(&log_run, "second effect"), ());
            let (_, set) = use_state(|| 0);
            use_effect(move || set.set(1), ());
            String::new()
        }
    }

    #[test]
    fn panicking_effect_does_not_block_the_queue() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let entries: Log = Rc::default();

        host.mount(&root, container, Panicky { log: Rc::clone(&entries) });
        let flushed = panic::catch_unwind(AssertUnwindSafe(|| host.run_until_idle()));

        assert!(flushed.is_err());
        assert_eq!(*entries.borrow(), vec!["second effect"]);
        assert_eq!(root.pending_effects(), 0);
    }

    #[test]
    fn panics_can_be_kept_inside_the_flush() {
        let host = TestHost::new();
        let config = crate::config::RuntimeConfig::default().with_propagate_effect_panics(false);
        let (root, container) = host.create_root_with(config);
        let entries: Log = Rc::default();

        host.mount(&root, container, Panicky { log: Rc::clone(&entries) });
        host.run_until_idle();

        assert_eq!(*entries.borrow(), vec!["second effect"]);
    }
}
