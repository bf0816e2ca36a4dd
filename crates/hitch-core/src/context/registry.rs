use super::{ContextKey, KeyId};
use crate::root::NodeId;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Identifies one consumer's subscription to a provider.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct SubscriptionId(u64);

/// The value published by one provider instance, plus its subscribers.
pub(crate) struct ProviderRecord<T> {
    node: NodeId,
    value: RefCell<T>,
    subscribers: RefCell<Vec<(SubscriptionId, Rc<dyn Fn()>)>>,
    next_subscription: Cell<u64>,
    retired: Cell<bool>,
}

impl<T> ProviderRecord<T> {
    pub(crate) fn new(node: NodeId, value: T) -> Self {
        Self {
            node,
            value: RefCell::new(value),
            subscribers: RefCell::new(Vec::new()),
            next_subscription: Cell::new(0),
            retired: Cell::new(false),
        }
    }

    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn value(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }

    pub(crate) fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Write the new value, then notify every current subscriber.
    ///
    /// Subscribers added or removed while notifying take effect on the next
    /// write.
    pub(crate) fn set(&self, value: T) {
        *self.value.borrow_mut() = value;

        let notify: Vec<Rc<dyn Fn()>> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        for callback in notify {
            callback();
        }
    }

    pub(crate) fn subscribe(&self, callback: Rc<dyn Fn()>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.get());
        self.next_subscription.set(id.0 + 1);
        if !self.retired.get() {
            self.subscribers.borrow_mut().push((id, callback));
        }
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.borrow_mut().retain(|(sub, _)| *sub != id);
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    /// The provider disconnected: drop subscribers, refuse new ones.
    pub(crate) fn retire(&self) {
        self.retired.set(true);
        self.subscribers.borrow_mut().clear();
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.get()
    }
}

/// Active providers of one mount root, by key.
///
/// Several providers may be registered for the same key at different depths;
/// a lookup from a node returns the one on its nearest ancestor.
#[derive(Clone, Default)]
pub struct ContextRegistry {
    inner: Rc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    providers: RefCell<HashMap<KeyId, Vec<Rc<dyn Any>>>>,
    lookups: Cell<usize>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register<T: 'static>(&self, key: ContextKey<T>, record: Rc<ProviderRecord<T>>) {
        tracing::debug!(key = key.name(), node = %record.node(), "registering context provider");
        self.inner
            .providers
            .borrow_mut()
            .entry(key.id())
            .or_default()
            .push(record);
    }

    pub(crate) fn unregister<T: 'static>(&self, key: ContextKey<T>, record: &Rc<ProviderRecord<T>>) {
        let mut providers = self.inner.providers.borrow_mut();
        let Some(records) = providers.get_mut(&key.id()) else {
            return;
        };

        records.retain(|entry| {
            entry
                .downcast_ref::<ProviderRecord<T>>()
                .is_none_or(|entry| !std::ptr::eq(entry, Rc::as_ptr(record)))
        });
        if records.is_empty() {
            providers.remove(&key.id());
        }
        tracing::debug!(key = key.name(), node = %record.node(), "unregistered context provider");
    }

    /// Find the provider for `key` on the nearest of `ancestors`.
    ///
    /// `ancestors` must be ordered nearest first. If one node registered the
    /// same key twice, the later registration wins.
    pub(crate) fn resolve<T: 'static>(
        &self,
        key: ContextKey<T>,
        ancestors: impl IntoIterator<Item = NodeId>,
    ) -> Option<Rc<ProviderRecord<T>>> {
        self.inner.lookups.set(self.inner.lookups.get() + 1);

        let candidates: Vec<Rc<ProviderRecord<T>>> = self
            .inner
            .providers
            .borrow()
            .get(&key.id())?
            .iter()
            .filter_map(|entry| Rc::clone(entry).downcast::<ProviderRecord<T>>().ok())
            .collect();

        ancestors.into_iter().find_map(|node| {
            candidates
                .iter()
                .rev()
                .find(|record| record.node() == node)
                .cloned()
        })
    }

    /// Number of providers currently registered for `key`.
    pub fn provider_count<T: 'static>(&self, key: ContextKey<T>) -> usize {
        self.inner
            .providers
            .borrow()
            .get(&key.id())
            .map_or(0, Vec::len)
    }

    /// Number of lookups performed so far, including poll retries.
    pub fn lookup_count(&self) -> usize {
        self.inner.lookups.get()
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers = self.inner.providers.borrow();
        let mut keys: Vec<_> = providers
            .iter()
            .map(|((name, _), records)| (*name, records.len()))
            .collect();
        keys.sort_unstable();

        f.debug_struct("ContextRegistry")
            .field("providers", &keys)
            .field("lookups", &self.inner.lookups.get())
            .finish()
    }
}
