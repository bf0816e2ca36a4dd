//! A deterministic in-process host for tests.
//!
//! [`TestHost`] plays the part of the external component model: it owns a
//! node tree, connects, renders and disconnects hooked components, and
//! provides the [`Scheduler`] with a microtask queue and a virtual clock.
//! Nothing runs until the test asks for it, so every interleaving is
//! explicit:
//!
//! ```ignore
//! let host = TestHost::new();
//! let (root, container) = host.create_root();
//! let node = host.mount(&root, container, Counter::default());
//!
//! host.run_until_idle();                 // effects and requested renders
//! host.advance(Duration::from_millis(100)); // timers due within 100ms
//! host.remove(node);                     // disconnect, children first
//! ```

use crate::config::RuntimeConfig;
use crate::lifecycle::{Hooked, Lifecycle, with_hooks};
use crate::instance::HostBinding;
use crate::root::{HostTree, MountRoot, NodeId};
use crate::scheduler::{Scheduler, Task, TimerId};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Upper bound on tasks run by one drain, to turn render loops into failures.
const MAX_TASKS_PER_DRAIN: usize = 10_000;

/// A hooked component as seen by [`TestHost`].
trait HostedComponent {
    fn connected(&mut self);
    fn render(&mut self) -> String;
    fn disconnected(&mut self);
    fn as_any(&self) -> &dyn Any;
}

impl<C> HostedComponent for Hooked<C>
where
    C: Lifecycle<Output = String> + 'static,
{
    fn connected(&mut self) {
        self.connected_callback();
    }

    fn render(&mut self) -> String {
        Lifecycle::render(self)
    }

    fn disconnected(&mut self) {
        self.disconnected_callback();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct NodeEntry {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    component: Option<Rc<RefCell<dyn HostedComponent>>>,
    mounted: bool,
    render_pending: bool,
    renders: usize,
    updates: usize,
    output: String,
}

impl NodeEntry {
    fn new(parent: Option<NodeId>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            component: None,
            mounted: true,
            render_pending: false,
            renders: 0,
            updates: 0,
            output: String::new(),
        }
    }
}

#[derive(Default)]
struct HostInner {
    now: Cell<Duration>,
    next_node: Cell<u64>,
    next_timer: Cell<u64>,
    microtasks: RefCell<VecDeque<Task>>,
    timers: RefCell<BTreeMap<(Duration, u64), Task>>,
    nodes: RefCell<HashMap<NodeId, NodeEntry>>,
}

/// Deterministic host: node tree, microtask queue and virtual clock.
///
/// Cloning is cheap; clones share the same host.
#[derive(Clone)]
pub struct TestHost {
    inner: Rc<HostInner>,
}

impl TestHost {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();

        Self {
            inner: Rc::new(HostInner::default()),
        }
    }

    fn from_inner(inner: Rc<HostInner>) -> Self {
        Self { inner }
    }

    /// Create an empty container node and a mount root for it.
    pub fn create_root(&self) -> (MountRoot, NodeId) {
        self.create_root_with(RuntimeConfig::default())
    }

    pub fn create_root_with(&self, config: RuntimeConfig) -> (MountRoot, NodeId) {
        let container = self.insert_node(None);
        let handle = Rc::new(WeakHost(Rc::downgrade(&self.inner)));
        let root = MountRoot::with_config(handle.clone(), handle, config);
        (root, container)
    }

    /// Attach `component` under `parent`, connect it and render it once.
    pub fn mount<C>(&self, root: &MountRoot, parent: NodeId, component: C) -> NodeId
    where
        C: Lifecycle<Output = String> + 'static,
    {
        let node = self.attach(root, parent, component);
        self.render(node);
        node
    }

    /// Attach and connect `component` under `parent` without rendering it,
    /// as hosts do when a child upgrades before its ancestors.
    pub fn attach<C>(&self, root: &MountRoot, parent: NodeId, component: C) -> NodeId
    where
        C: Lifecycle<Output = String> + 'static,
    {
        let node = self.insert_node(Some(parent));

        let weak = Rc::downgrade(&self.inner);
        let binding = HostBinding::new(root.clone(), node, move || {
            if let Some(inner) = weak.upgrade() {
                TestHost::from_inner(inner).request_render(node);
            }
        });
        let hosted: Rc<RefCell<dyn HostedComponent>> =
            Rc::new(RefCell::new(with_hooks(component, binding)));

        if let Some(entry) = self.inner.nodes.borrow_mut().get_mut(&node) {
            entry.component = Some(Rc::clone(&hosted));
        }

        tracing::debug!(%node, %parent, "attaching component");
        hosted.borrow_mut().connected();
        node
    }

    fn insert_node(&self, parent: Option<NodeId>) -> NodeId {
        let node = NodeId(self.inner.next_node.get());
        self.inner.next_node.set(node.0 + 1);

        let mut nodes = self.inner.nodes.borrow_mut();
        if let Some(parent) = parent.and_then(|parent| nodes.get_mut(&parent)) {
            parent.children.push(node);
        }
        nodes.insert(node, NodeEntry::new(parent));
        node
    }

    /// Render `node` now. Returns `None` if nothing is mounted there.
    pub fn render(&self, node: NodeId) -> Option<String> {
        let component = {
            let mut nodes = self.inner.nodes.borrow_mut();
            let entry = nodes.get_mut(&node).filter(|entry| entry.mounted)?;
            entry.render_pending = false;
            entry.component.clone()?
        };

        let output = component.borrow_mut().render();

        if let Some(entry) = self.inner.nodes.borrow_mut().get_mut(&node) {
            entry.renders += 1;
            entry.output.clone_from(&output);
        }
        Some(output)
    }

    /// Queue a render of `node`; requests made before it runs are coalesced.
    pub fn request_render(&self, node: NodeId) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let Some(entry) = nodes.get_mut(&node).filter(|entry| entry.mounted) else {
                return;
            };
            entry.updates += 1;
            if std::mem::replace(&mut entry.render_pending, true) {
                return;
            }
        }

        let host = self.clone();
        self.defer(Box::new(move || {
            let pending = host
                .inner
                .nodes
                .borrow()
                .get(&node)
                .is_some_and(|entry| entry.mounted && entry.render_pending);
            if pending {
                host.render(node);
            }
        }));
    }

    /// Disconnect `node` and its whole subtree, children before parents,
    /// then detach it.
    ///
    /// Every node is disconnected even if one of them panics; the first
    /// panic is resumed afterwards.
    pub fn remove(&self, node: NodeId) {
        let order = self.post_order(node);
        tracing::debug!(%node, count = order.len(), "removing subtree");

        let mut first_panic = None;
        for id in &order {
            let component = self
                .inner
                .nodes
                .borrow()
                .get(id)
                .filter(|entry| entry.mounted)
                .and_then(|entry| entry.component.clone());

            if let Some(component) = component
                && let Err(payload) =
                    panic::catch_unwind(AssertUnwindSafe(|| component.borrow_mut().disconnected()))
            {
                first_panic.get_or_insert(payload);
            }
        }

        {
            let mut nodes = self.inner.nodes.borrow_mut();
            for id in &order {
                if let Some(entry) = nodes.get_mut(id) {
                    entry.mounted = false;
                    entry.render_pending = false;
                    entry.component = None;
                }
            }
            let parent = nodes.get(&node).and_then(|entry| entry.parent);
            if let Some(parent) = parent.and_then(|parent| nodes.get_mut(&parent)) {
                parent.children.retain(|child| *child != node);
            }
        }

        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    fn post_order(&self, node: NodeId) -> Vec<NodeId> {
        fn visit(nodes: &HashMap<NodeId, NodeEntry>, node: NodeId, out: &mut Vec<NodeId>) {
            if let Some(entry) = nodes.get(&node) {
                for child in &entry.children {
                    visit(nodes, *child, out);
                }
                out.push(node);
            }
        }

        let mut order = Vec::new();
        visit(&self.inner.nodes.borrow(), node, &mut order);
        order
    }

    /// Run queued microtasks, including any they queue, until none are left.
    /// Timers are not touched.
    pub fn run_until_idle(&self) {
        for _ in 0..MAX_TASKS_PER_DRAIN {
            let Some(task) = self.inner.microtasks.borrow_mut().pop_front() else {
                return;
            };
            task();
        }
        panic!("microtask queue did not settle after {MAX_TASKS_PER_DRAIN} tasks");
    }

    /// Move the clock forward by `by`, firing due timers in order and
    /// draining microtasks after each one.
    pub fn advance(&self, by: Duration) {
        self.run_until_idle();
        let target = self.inner.now.get() + by;

        loop {
            let due = {
                let mut timers = self.inner.timers.borrow_mut();
                let next = timers.first_key_value().map(|(&(at, _), _)| at);
                if next.is_some_and(|at| at <= target) {
                    timers.pop_first()
                } else {
                    None
                }
            };
            let Some(((at, _), task)) = due else {
                break;
            };

            self.inner.now.set(at);
            task();
            self.run_until_idle();
        }

        self.inner.now.set(target);
    }

    /// Drain microtasks and fire every timer, however far away.
    pub fn run_to_completion(&self) {
        self.run_until_idle();
        for _ in 0..MAX_TASKS_PER_DRAIN {
            let next = self
                .inner
                .timers
                .borrow()
                .first_key_value()
                .map(|(&(at, _), _)| at);
            let Some(at) = next else {
                return;
            };
            self.advance(at.saturating_sub(self.inner.now.get()));
        }
        panic!("timers did not settle after {MAX_TASKS_PER_DRAIN} rounds");
    }

    /// Virtual time elapsed since the host was created.
    pub fn now(&self) -> Duration {
        self.inner.now.get()
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    pub fn pending_microtasks(&self) -> usize {
        self.inner.microtasks.borrow().len()
    }

    /// Completed renders of `node`.
    pub fn render_count(&self, node: NodeId) -> usize {
        self.inner.nodes.borrow().get(&node).map_or(0, |entry| entry.renders)
    }

    /// Re-render requests received by `node`, before coalescing.
    pub fn update_requests(&self, node: NodeId) -> usize {
        self.inner.nodes.borrow().get(&node).map_or(0, |entry| entry.updates)
    }

    /// Output of the last render of `node`.
    pub fn output(&self, node: NodeId) -> String {
        self.inner
            .nodes
            .borrow()
            .get(&node)
            .map(|entry| entry.output.clone())
            .unwrap_or_default()
    }

    pub fn is_mounted(&self, node: NodeId) -> bool {
        self.inner
            .nodes
            .borrow()
            .get(&node)
            .is_some_and(|entry| entry.mounted)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .nodes
            .borrow()
            .get(&node)
            .map(|entry| entry.children.clone())
            .unwrap_or_default()
    }

    /// Inspect the component mounted at `node`, if it is a `C`.
    pub fn with_component<C, R>(&self, node: NodeId, f: impl FnOnce(&C) -> R) -> Option<R>
    where
        C: Lifecycle<Output = String> + 'static,
    {
        let component = self
            .inner
            .nodes
            .borrow()
            .get(&node)
            .and_then(|entry| entry.component.clone())?;
        let component = component.borrow();
        let hooked = component.as_any().downcast_ref::<Hooked<C>>()?;
        Some(f(hooked.component()))
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TestHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestHost")
            .field("now", &self.inner.now.get())
            .field("nodes", &self.inner.nodes.borrow().len())
            .field("microtasks", &self.inner.microtasks.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .finish()
    }
}

impl HostTree for TestHost {
    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.nodes.borrow().get(&node)?.parent
    }
}

impl Scheduler for TestHost {
    fn defer(&self, task: Task) {
        self.inner.microtasks.borrow_mut().push_back(task);
    }

    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId {
        let id = self.inner.next_timer.get();
        self.inner.next_timer.set(id + 1);
        let due = self.inner.now.get() + delay;
        self.inner.timers.borrow_mut().insert((due, id), task);
        TimerId(id)
    }

    fn clear_timeout(&self, id: TimerId) {
        self.inner.timers.borrow_mut().retain(|&(_, timer), _| timer != id.0);
    }
}

/// What a [`MountRoot`] created by the host holds on to, so roots never keep
/// the host alive.
struct WeakHost(Weak<HostInner>);

impl WeakHost {
    fn host(&self) -> Option<TestHost> {
        self.0.upgrade().map(TestHost::from_inner)
    }
}

impl HostTree for WeakHost {
    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.host()?.parent(node)
    }
}

impl Scheduler for WeakHost {
    fn defer(&self, task: Task) {
        if let Some(host) = self.host() {
            host.defer(task);
        }
    }

    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId {
        match self.host() {
            Some(host) => host.set_timeout(delay, task),
            None => TimerId(u64::MAX),
        }
    }

    fn clear_timeout(&self, id: TimerId) {
        if let Some(host) = self.host() {
            host.clear_timeout(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Label(&'static str);

    impl Lifecycle for Label {
        type Output = String;

        fn render(&mut self) -> String {
            self.0.to_string()
        }
    }

    #[test]
    fn timers_fire_in_due_order() {
        let host = TestHost::new();
        let fired = Rc::new(RefCell::new(Vec::new()));

        for (delay, name) in [(30, "c"), (10, "a"), (20, "b")] {
            let fired = Rc::clone(&fired);
            host.set_timeout(
                Duration::from_millis(delay),
                Box::new(move || fired.borrow_mut().push(name)),
            );
        }
        let cancelled = host.set_timeout(Duration::from_millis(15), Box::new(|| panic!("cancelled")));
        host.clear_timeout(cancelled);

        host.advance(Duration::from_millis(20));
        assert_eq!(*fired.borrow(), vec!["a", "b"]);
        assert_eq!(host.now(), Duration::from_millis(20));

        host.run_to_completion();
        assert_eq!(*fired.borrow(), vec!["a", "b", "c"]);
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn render_requests_coalesce() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let node = host.mount(&root, container, Label("hi"));

        host.request_render(node);
        host.request_render(node);
        assert_eq!(host.pending_microtasks(), 1);

        host.run_until_idle();
        assert_eq!(host.render_count(node), 2);
        assert_eq!(host.update_requests(node), 2);
        assert_eq!(host.output(node), "hi");
    }

    #[test]
    fn remove_detaches_subtree() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let parent = host.mount(&root, container, Label("parent"));
        let child = host.mount(&root, parent, Label("child"));

        assert_eq!(host.parent(child), Some(parent));
        assert_eq!(host.children(container), vec![parent]);

        host.remove(parent);
        assert!(!host.is_mounted(parent));
        assert!(!host.is_mounted(child));
        assert!(host.children(container).is_empty());
        assert_eq!(host.render(child), None);
        assert_eq!(host.with_component(parent, |label: &Label| label.0), None);
    }

    #[test]
    fn with_component_downcasts() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let node = host.mount(&root, container, Label("x"));

        assert_eq!(host.with_component(node, |label: &Label| label.0), Some("x"));
    }
}
