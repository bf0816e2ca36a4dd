//! Mount roots: one logical component tree.
//!
//! A [`MountRoot`] groups what every instance in one tree shares: the host's
//! ancestry lookup, the host's scheduler, the context registry and the
//! effect queue. Independent trees (for example, two tests) get independent
//! roots and never observe each other's providers or effects.

use crate::config::RuntimeConfig;
use crate::context::ContextRegistry;
use crate::effects::EffectQueue;
use crate::scheduler::Scheduler;
use std::fmt;
use std::rc::{Rc, Weak};

/// Host-assigned position of a component in its tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// DOM ancestry, as seen by the host.
pub trait HostTree {
    /// The parent of `node`, or `None` for a root or detached node.
    fn parent(&self, node: NodeId) -> Option<NodeId>;
}

impl<F> HostTree for F
where
    F: Fn(NodeId) -> Option<NodeId>,
{
    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self(node)
    }
}

/// Shared state for one mounted tree.
#[derive(Clone)]
pub struct MountRoot {
    inner: Rc<RootInner>,
}

pub(crate) struct RootInner {
    tree: Rc<dyn HostTree>,
    scheduler: Rc<dyn Scheduler>,
    registry: ContextRegistry,
    effects: EffectQueue,
    config: RuntimeConfig,
}

impl MountRoot {
    /// Create a root with the default [`RuntimeConfig`].
    pub fn new(tree: Rc<dyn HostTree>, scheduler: Rc<dyn Scheduler>) -> Self {
        Self::with_config(tree, scheduler, RuntimeConfig::default())
    }

    /// Create a root with an explicit configuration.
    pub fn with_config(
        tree: Rc<dyn HostTree>,
        scheduler: Rc<dyn Scheduler>,
        config: RuntimeConfig,
    ) -> Self {
        tracing::debug!("creating mount root");
        Self {
            inner: Rc::new(RootInner {
                tree,
                scheduler,
                registry: ContextRegistry::new(),
                effects: EffectQueue::default(),
                config,
            }),
        }
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.inner.registry
    }

    pub fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.inner.scheduler
    }

    pub fn tree(&self) -> &Rc<dyn HostTree> {
        &self.inner.tree
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Number of effect tasks waiting for the next flush.
    pub fn pending_effects(&self) -> usize {
        self.inner.effects.len()
    }

    /// Strict ancestors of `node`, nearest first.
    pub fn ancestors(&self, node: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self.inner.tree.as_ref(),
            next: self.inner.tree.parent(node),
        }
    }

    pub(crate) fn effects(&self) -> &EffectQueue {
        &self.inner.effects
    }

    pub(crate) fn downgrade(&self) -> Weak<RootInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &Weak<RootInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for MountRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountRoot")
            .field("registry", &self.inner.registry)
            .field("pending_effects", &self.inner.effects.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Iterator over a node's ancestors. See [`MountRoot::ancestors`].
pub struct Ancestors<'a> {
    tree: &'a dyn HostTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.parent(current);
        Some(current)
    }
}

impl fmt::Debug for Ancestors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ancestors").field("next", &self.next).finish()
    }
}
