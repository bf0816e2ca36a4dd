//! Hooked component instances.
//!
//! A [`HookInstance`] is the runtime's view of one host component: its
//! ledger, its liveness flag, the host's "schedule update" trigger, and the
//! teardown work registered by context hooks. While an instance renders it
//! sits on a thread-local stack so hook functions can find it.

use crate::error::{self, HookError};
use crate::effects::{self, EffectCell};
use crate::ledger::{HookLedger, HookMeta, SlotKind};
use crate::root::{MountRoot, NodeId};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a hooked instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global counter for generating unique instance IDs.
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(0);

fn next_instance_id() -> InstanceId {
    InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::SeqCst))
}

/// Where an instance is in its lifecycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LifeState {
    /// Mounted; setters and effects work normally.
    Live,
    /// Teardown in progress; cleanups run, nothing new starts.
    Disconnecting,
    /// Torn down for good.
    Disconnected,
}

/// Shared liveness flag, captured by setters and queued effect tasks.
#[derive(Clone)]
pub(crate) struct Liveness(Rc<Cell<LifeState>>);

impl Liveness {
    fn new() -> Self {
        Self(Rc::new(Cell::new(LifeState::Live)))
    }

    pub(crate) fn get(&self) -> LifeState {
        self.0.get()
    }

    pub(crate) fn is_live(&self) -> bool {
        self.0.get() == LifeState::Live
    }

    fn set(&self, state: LifeState) {
        self.0.set(state);
    }
}

/// Guarded access to the host's "schedule update" trigger.
///
/// Every state-mutating handle carries one. Once the instance is no longer
/// live, mutations and update requests become silent no-ops.
#[derive(Clone)]
pub(crate) struct Updater {
    id: InstanceId,
    liveness: Liveness,
    request: Rc<dyn Fn()>,
}

impl Updater {
    pub(crate) fn is_live(&self) -> bool {
        if self.liveness.is_live() {
            true
        } else {
            tracing::trace!(instance = %self.id, "ignoring state update after disconnect");
            false
        }
    }

    pub(crate) fn request_update(&self) {
        if self.is_live() {
            (self.request)();
        }
    }
}

/// What the host hands to [`with_hooks`](crate::lifecycle::with_hooks) for each instance.
#[derive(Clone)]
pub struct HostBinding {
    root: MountRoot,
    node: NodeId,
    request_update: Rc<dyn Fn()>,
}

impl HostBinding {
    /// Bind an instance at `node` under `root`. `request_update` is the
    /// host's trigger for re-rendering this instance.
    pub fn new(root: MountRoot, node: NodeId, request_update: impl Fn() + 'static) -> Self {
        Self {
            root,
            node,
            request_update: Rc::new(request_update),
        }
    }

    pub fn root(&self) -> &MountRoot {
        &self.root
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl fmt::Debug for HostBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBinding")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// The hook state of one component instance.
#[derive(Clone)]
pub struct HookInstance {
    inner: Rc<InstanceInner>,
}

struct InstanceInner {
    id: InstanceId,
    binding: HostBinding,
    ledger: RefCell<HookLedger>,
    liveness: Liveness,
    /// Effect slots whose run was queued by the render in progress
    staged: RefCell<Vec<Rc<EffectCell>>>,
    /// Context subscriptions and timers to release on disconnect
    teardowns: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// Non-owning handle, held by timers that must not keep an instance alive.
#[derive(Clone)]
pub(crate) struct WeakInstance(Weak<InstanceInner>);

impl WeakInstance {
    pub(crate) fn upgrade(&self) -> Option<HookInstance> {
        self.0.upgrade().map(|inner| HookInstance { inner })
    }
}

// Instances currently rendering, innermost last.
thread_local! {
    static RENDERING: RefCell<Vec<HookInstance>> = const { RefCell::new(Vec::new()) };
}

impl HookInstance {
    pub(crate) fn new(binding: HostBinding) -> Self {
        let id = next_instance_id();
        tracing::trace!(instance = %id, node = %binding.node, "installing hooks");
        Self {
            inner: Rc::new(InstanceInner {
                id,
                binding,
                ledger: RefCell::new(HookLedger::new()),
                liveness: Liveness::new(),
                staged: RefCell::new(Vec::new()),
                teardowns: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    pub fn node(&self) -> NodeId {
        self.inner.binding.node
    }

    pub fn root(&self) -> &MountRoot {
        &self.inner.binding.root
    }

    pub fn state(&self) -> LifeState {
        self.inner.liveness.get()
    }

    pub fn is_live(&self) -> bool {
        self.inner.liveness.is_live()
    }

    /// Number of completed renders.
    pub fn render_count(&self) -> usize {
        self.inner.ledger.borrow().render_count()
    }

    /// Describe every hook slot of this instance.
    pub fn hooks_debug_info(&self) -> Vec<HookMeta> {
        self.inner.ledger.borrow().debug_info()
    }

    /// Ask the host to re-render this instance (no-op once disconnected).
    pub fn request_update(&self) {
        self.updater().request_update();
    }

    pub(crate) fn updater(&self) -> Updater {
        Updater {
            id: self.inner.id,
            liveness: self.inner.liveness.clone(),
            request: Rc::clone(&self.inner.binding.request_update),
        }
    }

    pub(crate) fn liveness(&self) -> Liveness {
        self.inner.liveness.clone()
    }

    pub(crate) fn downgrade(&self) -> WeakInstance {
        WeakInstance(Rc::downgrade(&self.inner))
    }

    /// Register work to run when this instance disconnects.
    pub(crate) fn on_teardown(&self, teardown: impl FnOnce() + 'static) {
        self.inner.teardowns.borrow_mut().push(Box::new(teardown));
    }

    pub(crate) fn stage_effect(&self, cell: Rc<EffectCell>) {
        self.inner.staged.borrow_mut().push(cell);
    }

    /// Run `body` as this instance's render: reset the cursor, make the
    /// instance current for hook calls, then commit staged effects.
    pub(crate) fn render_with<R>(&self, body: impl FnOnce() -> R) -> R {
        // Pops the rendering stack even if the body unwinds.
        struct Frame<'a>(&'a HookInstance);

        impl Drop for Frame<'_> {
            fn drop(&mut self) {
                RENDERING.with(|stack| {
                    stack.borrow_mut().pop();
                });
                if std::thread::panicking() {
                    if let Ok(mut ledger) = self.0.inner.ledger.try_borrow_mut() {
                        ledger.abort_render();
                    }
                    self.0.discard_staged();
                }
            }
        }

        self.inner.ledger.borrow_mut().begin_render();
        RENDERING.with(|stack| stack.borrow_mut().push(self.clone()));

        let output = {
            let _frame = Frame(self);
            body()
        };

        let strict = self.root().config().strict_hook_count;
        let finished = self.inner.ledger.borrow_mut().end_render(strict);
        if let Err(err) = finished {
            self.discard_staged();
            error::fail(err);
        }

        self.commit_effects();
        output
    }

    /// Hand the effects staged by the last render to the root's queue.
    fn commit_effects(&self) {
        let staged = std::mem::take(&mut *self.inner.staged.borrow_mut());
        if staged.is_empty() {
            return;
        }

        if !self.is_live() {
            tracing::debug!(instance = %self.inner.id, "render after disconnect; dropping effects");
            for cell in &staged {
                cell.discard_staged();
            }
            return;
        }

        tracing::trace!(instance = %self.inner.id, count = staged.len(), "committing effects");
        let root = self.root();
        let mut queued = false;
        for cell in staged {
            if cell.commit() {
                root.effects().push(self.inner.id, self.liveness(), cell);
                queued = true;
            }
        }
        if queued {
            effects::schedule_flush(root);
        }
    }

    /// Drop what a failed render recorded, keeping effects it did not touch.
    fn discard_staged(&self) {
        let staged = std::mem::take(&mut *self.inner.staged.borrow_mut());
        for cell in staged {
            cell.discard_staged();
        }
    }

    /// Run outstanding cleanups and registered teardowns, then mark the
    /// instance disconnected. Happens at most once; returns the first panic
    /// caught along the way.
    pub(crate) fn teardown(&self) -> Option<Box<dyn Any + Send>> {
        if self.state() != LifeState::Live {
            tracing::debug!(instance = %self.inner.id, "already disconnected");
            return None;
        }

        tracing::debug!(instance = %self.inner.id, node = %self.node(), "disconnecting");
        self.inner.liveness.set(LifeState::Disconnecting);

        let mut first_panic = None;

        let cells = self
            .inner
            .ledger
            .borrow()
            .slots_of::<EffectCell>(SlotKind::Effect);
        for cell in cells {
            cell.discard_pending();
            if let Some(cleanup) = cell.take_cleanup() {
                effects::run_guarded(self.inner.id, "cleanup", cleanup, &mut first_panic);
            }
        }

        let teardowns = std::mem::take(&mut *self.inner.teardowns.borrow_mut());
        for teardown in teardowns {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(teardown)) {
                tracing::error!(instance = %self.inner.id, "teardown panicked");
                first_panic.get_or_insert(payload);
            }
        }

        self.inner.liveness.set(LifeState::Disconnected);
        first_panic
    }
}

impl fmt::Debug for HookInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookInstance")
            .field("id", &self.inner.id)
            .field("node", &self.node())
            .field("state", &self.state())
            .field("ledger", &*self.inner.ledger.borrow())
            .finish()
    }
}

/// A slot claimed by a hook during render.
pub(crate) struct Slot<T> {
    pub(crate) instance: HookInstance,
    pub(crate) cell: Rc<T>,
    /// Whether this render created the slot
    pub(crate) created: bool,
}

/// The instance currently rendering. Panics with `OutsideRender` if none.
#[track_caller]
pub(crate) fn current_instance(hook: SlotKind) -> HookInstance {
    RENDERING
        .with(|stack| stack.borrow().last().cloned())
        .unwrap_or_else(|| error::fail(HookError::OutsideRender { hook }))
}

/// Core hook implementation: get or create the slot at the cursor.
///
/// `init` runs only on the first render and must not call hooks itself.
#[track_caller]
pub(crate) fn use_slot<T: 'static>(kind: SlotKind, init: impl FnOnce(&HookInstance) -> T) -> Slot<T> {
    let instance = current_instance(kind);

    let existing = instance.inner.ledger.borrow_mut().try_slot::<T>(kind);
    match existing {
        Ok(Some(cell)) => Slot {
            instance,
            cell,
            created: false,
        },
        Ok(None) => {
            let cell = Rc::new(init(&instance));
            instance
                .inner
                .ledger
                .borrow_mut()
                .push_slot(kind, Rc::clone(&cell));
            Slot {
                instance,
                cell,
                created: true,
            }
        }
        Err(err) => error::fail(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHost;

    fn instance(host: &TestHost) -> HookInstance {
        let (root, node) = host.create_root();
        HookInstance::new(HostBinding::new(root, node, || {}))
    }

    #[test]
    fn ids_are_unique() {
        let host = TestHost::new();
        let a = instance(&host);
        let b = instance(&host);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn teardown_happens_once() {
        let host = TestHost::new();
        let instance = instance(&host);
        let runs = Rc::new(Cell::new(0));

        let counter = Rc::clone(&runs);
        instance.on_teardown(move || counter.set(counter.get() + 1));

        assert_eq!(instance.state(), LifeState::Live);
        assert!(instance.teardown().is_none());
        assert!(instance.teardown().is_none());
        assert_eq!(instance.state(), LifeState::Disconnected);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn updater_is_inert_after_teardown() {
        let host = TestHost::new();
        let (root, node) = host.create_root();
        let requests = Rc::new(Cell::new(0));
        let counter = Rc::clone(&requests);
        let instance = HookInstance::new(HostBinding::new(root, node, move || {
            counter.set(counter.get() + 1)
        }));

        let updater = instance.updater();
        updater.request_update();
        instance.teardown();
        updater.request_update();
        instance.request_update();

        assert_eq!(requests.get(), 1);
    }

    #[test]
    fn render_stack_is_restored_after_panic() {
        let host = TestHost::new();
        let instance = instance(&host);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            instance.render_with::<()>(|| panic!("render failed"));
        }));
        assert!(result.is_err());
        assert!(RENDERING.with(|stack| stack.borrow().is_empty()));
        assert_eq!(instance.render_count(), 0);

        // The instance renders normally afterwards.
        instance.render_with(|| ());
        assert_eq!(instance.render_count(), 1);
    }

    #[test]
    #[should_panic(expected = "called outside of render")]
    fn hooks_need_a_rendering_instance() {
        let _ = current_instance(SlotKind::State);
    }
}
