//! Tree-scoped context: values provided by one component and read by its
//! descendants.
//!
//! A provider calls [`use_context_state`] to publish a value under a
//! [`ContextKey`]. A consumer anywhere below it calls [`use_context`] and
//! gets the value of its nearest ancestor provider for that key. Providers
//! are registered in the [`ContextRegistry`] of their [`MountRoot`], so
//! separate trees never see each other's values.
//!
//! Descendants may render before their ancestor has registered. A consumer
//! that finds no provider keeps looking on a timer, as configured by
//! [`PollOptions`], and gives up with `None` once the budget is spent.
//!
//! ```ignore
//! const COUNT: ContextKey<i32> = ContextKey::new("domcontext:count");
//!
//! impl Lifecycle for Provider {
//!     type Output = String;
//!     fn render(&mut self) -> String {
//!         let (count, set_count, _) = use_context_state(COUNT, || 10);
//!         format!("<button>{count}</button><slot></slot>")
//!     }
//! }
//!
//! impl Lifecycle for Consumer {
//!     type Output = String;
//!     fn render(&mut self) -> String {
//!         let count = use_context(COUNT, PollOptions::from_millis(100, 2));
//!         count.map_or_else(|| "NONE".into(), |c| c.to_string())
//!     }
//! }
//! ```
//!
//! [`MountRoot`]: crate::root::MountRoot
//! [`PollOptions`]: crate::config::PollOptions

mod hooks;
mod registry;

pub use hooks::{ContextSetter, ProviderHandle, use_context, use_context_default, use_context_state};
pub use registry::ContextRegistry;

pub(crate) use registry::{ProviderRecord, SubscriptionId};

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;

/// Names a context and the type of its value.
///
/// Keys with the same name but different value types are distinct.
pub struct ContextKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ContextKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: 'static> ContextKey<T> {
    pub(crate) fn id(&self) -> KeyId {
        (self.name, TypeId::of::<T>())
    }
}

pub(crate) type KeyId = (&'static str, TypeId);

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> PartialEq for ContextKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({:?}: {})", self.name, std::any::type_name::<T>())
    }
}

impl<T> fmt::Display for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
