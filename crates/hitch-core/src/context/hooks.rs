use super::{ContextKey, ProviderRecord, SubscriptionId};
use crate::config::PollOptions;
use crate::instance::{self, HookInstance, Updater, WeakInstance};
use crate::ledger::SlotKind;
use crate::root::MountRoot;
use crate::scheduler::TimerId;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

// ============================================================================
// Provider
// ============================================================================

/// Setter returned by [`use_context_state`].
pub struct ContextSetter<T> {
    record: Rc<ProviderRecord<T>>,
    updater: Updater,
}

impl<T: 'static> ContextSetter<T> {
    /// Publish a new value.
    ///
    /// The value is written first, then every subscribed consumer is asked
    /// to re-render, then the provider itself. No-op once the provider has
    /// disconnected.
    pub fn set(&self, value: T) {
        if !self.updater.is_live() {
            return;
        }
        self.record.set(value);
        self.updater.request_update();
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if !self.updater.is_live() {
            return;
        }
        let next = self.record.with_value(f);
        self.set(next);
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.record, &other.record)
    }
}

impl<T> Clone for ContextSetter<T> {
    fn clone(&self) -> Self {
        Self {
            record: Rc::clone(&self.record),
            updater: self.updater.clone(),
        }
    }
}

impl<T> PartialEq for ContextSetter<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.record, &other.record)
    }
}

impl<T> fmt::Debug for ContextSetter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextSetter(...)")
    }
}

/// Read-only view of a provider's registration.
pub struct ProviderHandle<T> {
    key: ContextKey<T>,
    record: Rc<ProviderRecord<T>>,
}

impl<T> ProviderHandle<T> {
    pub fn key(&self) -> ContextKey<T> {
        self.key
    }

    /// Current published value.
    pub fn value(&self) -> T
    where
        T: Clone,
    {
        self.record.value()
    }

    /// Number of consumers currently subscribed to this provider.
    pub fn subscriber_count(&self) -> usize {
        self.record.subscriber_count()
    }
}

impl<T> Clone for ProviderHandle<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            record: Rc::clone(&self.record),
        }
    }
}

impl<T> fmt::Debug for ProviderHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("key", &self.key)
            .field("node", &self.record.node())
            .field("subscribers", &self.record.subscriber_count())
            .finish()
    }
}

struct ProviderCell<T> {
    setter: ContextSetter<T>,
    handle: ProviderHandle<T>,
}

/// Provide a value to every descendant that asks for `key`.
///
/// Works like [`use_state`](crate::hooks::use_state), but the value is also
/// registered in the mount root's context registry under this component's
/// node. It stays registered until the component disconnects. A nearer
/// provider of the same key shadows this one for its own subtree.
#[track_caller]
pub fn use_context_state<T: Clone + 'static>(
    key: ContextKey<T>,
    init: impl FnOnce() -> T,
) -> (T, ContextSetter<T>, ProviderHandle<T>) {
    let slot = instance::use_slot(SlotKind::ContextProvider, |instance| {
        let record = Rc::new(ProviderRecord::new(instance.node(), init()));
        if instance.is_live() {
            let registry = instance.root().registry().clone();
            registry.register(key, Rc::clone(&record));

            let registered = Rc::clone(&record);
            instance.on_teardown(move || {
                registry.unregister(key, &registered);
                registered.retire();
            });
        } else {
            // Teardown already ran and would never unregister it.
            tracing::debug!(
                key = key.name(),
                node = %instance.node(),
                "provider rendered after disconnect; not registering"
            );
            record.retire();
        }

        ProviderCell {
            setter: ContextSetter {
                record: Rc::clone(&record),
                updater: instance.updater(),
            },
            handle: ProviderHandle { key, record },
        }
    });

    (
        slot.cell.handle.value(),
        slot.cell.setter.clone(),
        slot.cell.handle.clone(),
    )
}

// ============================================================================
// Consumer
// ============================================================================

enum ConsumerState<T> {
    /// No provider yet; `retries` lookups have been retried so far.
    Pending { retries: u32, timer: Option<TimerId> },
    Resolved {
        record: Rc<ProviderRecord<T>>,
        subscription: SubscriptionId,
    },
    /// Poll budget spent, or the consumer disconnected.
    Unresolved,
}

struct ConsumerCell<T> {
    key: ContextKey<T>,
    options: PollOptions,
    state: RefCell<ConsumerState<T>>,
}

impl<T: Clone + 'static> ConsumerCell<T> {
    fn current(&self) -> Option<T> {
        match &*self.state.borrow() {
            ConsumerState::Resolved { record, .. } => Some(record.value()),
            ConsumerState::Pending { .. } | ConsumerState::Unresolved => None,
        }
    }

    /// Look the provider up from `instance`'s position; subscribe if found.
    fn try_resolve(&self, instance: &HookInstance) -> bool {
        let root = instance.root();
        let Some(record) = root.registry().resolve(self.key, root.ancestors(instance.node())) else {
            return false;
        };

        let updater = instance.updater();
        let subscription = record.subscribe(Rc::new(move || updater.request_update()));
        tracing::trace!(
            key = self.key.name(),
            consumer = %instance.node(),
            provider = %record.node(),
            retired = record.is_retired(),
            "context resolved"
        );
        *self.state.borrow_mut() = ConsumerState::Resolved {
            record,
            subscription,
        };
        true
    }

    fn give_up(&self, instance: &HookInstance, retries: u32) {
        tracing::debug!(
            key = self.key.name(),
            consumer = %instance.node(),
            retries,
            "no context provider found; giving up"
        );
        *self.state.borrow_mut() = ConsumerState::Unresolved;
    }

    /// Stop polling and drop the subscription.
    fn release(&self, root: &MountRoot) {
        let state = std::mem::replace(&mut *self.state.borrow_mut(), ConsumerState::Unresolved);
        match state {
            ConsumerState::Pending {
                timer: Some(timer), ..
            } => root.scheduler().clear_timeout(timer),
            ConsumerState::Resolved {
                record,
                subscription,
            } => record.unsubscribe(subscription),
            ConsumerState::Pending { timer: None, .. } | ConsumerState::Unresolved => {}
        }
    }
}

/// Arm the next lookup for a pending consumer.
fn schedule_poll<T: Clone + 'static>(instance: &HookInstance, cell: &Rc<ConsumerCell<T>>) {
    let weak_instance = instance.downgrade();
    let weak_cell = Rc::downgrade(cell);

    let timer = instance.root().scheduler().set_timeout(
        cell.options.interval,
        Box::new(move || {
            if let Some(cell) = weak_cell.upgrade() {
                poll(&weak_instance, &cell);
            }
        }),
    );

    if let ConsumerState::Pending { timer: slot, .. } = &mut *cell.state.borrow_mut() {
        *slot = Some(timer);
    }
}

fn poll<T: Clone + 'static>(weak_instance: &WeakInstance, cell: &Rc<ConsumerCell<T>>) {
    let Some(instance) = weak_instance.upgrade() else {
        return;
    };
    if !instance.is_live() {
        return;
    }

    let retries = match &*cell.state.borrow() {
        ConsumerState::Pending { retries, .. } => retries + 1,
        ConsumerState::Resolved { .. } | ConsumerState::Unresolved => return,
    };

    if cell.try_resolve(&instance) {
        // Render again so the value is observed.
        instance.request_update();
        return;
    }

    if retries >= cell.options.attempts {
        cell.give_up(&instance, retries);
        return;
    }

    *cell.state.borrow_mut() = ConsumerState::Pending {
        retries,
        timer: None,
    };
    schedule_poll(&instance, cell);
}

/// Read the value of the nearest ancestor provider of `key`.
///
/// The lookup happens on the first render. If no ancestor has registered a
/// provider yet, the lookup is retried every `options.interval`, at most
/// `options.attempts` times; the first successful retry requests a
/// re-render. Until a provider is found, and for good once the retries are
/// spent, this returns `None`.
///
/// Once resolved, the consumer re-renders whenever the provider publishes a
/// new value. Disconnecting cancels the subscription and any pending retry.
#[track_caller]
pub fn use_context<T: Clone + 'static>(key: ContextKey<T>, options: PollOptions) -> Option<T> {
    let slot = instance::use_slot(SlotKind::ContextConsumer, |_| ConsumerCell {
        key,
        options,
        state: RefCell::new(ConsumerState::Pending {
            retries: 0,
            timer: None,
        }),
    });

    if slot.created && !slot.instance.is_live() {
        *slot.cell.state.borrow_mut() = ConsumerState::Unresolved;
    } else if slot.created {
        let cell = Rc::clone(&slot.cell);
        let root = slot.instance.root().clone();
        slot.instance.on_teardown(move || cell.release(&root));

        if !slot.cell.try_resolve(&slot.instance) {
            if options.attempts == 0 {
                slot.cell.give_up(&slot.instance, 0);
            } else {
                schedule_poll(&slot.instance, &slot.cell);
            }
        }
    }

    slot.cell.current()
}

/// [`use_context`] with the poll options of the mount root's
/// [`RuntimeConfig`](crate::config::RuntimeConfig).
#[track_caller]
pub fn use_context_default<T: Clone + 'static>(key: ContextKey<T>) -> Option<T> {
    let options = instance::current_instance(SlotKind::ContextConsumer)
        .root()
        .config()
        .context_polling;
    use_context(key, options)
}
