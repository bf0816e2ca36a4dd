//! Hitch - React-style hooks and context for host-driven component trees.
//!
//! Hitch gives components that are driven by an external host (a custom
//! element registry, a retained-mode widget tree, a test harness) persistent
//! per-instance state, deferred side effects with cleanup, and values
//! propagated from an ancestor to any descendant.
//!
//! The host keeps control: it decides when components connect, render and
//! disconnect. Hitch only asks for re-renders through the trigger the host
//! hands over in a [`HostBinding`].
//!
//! # Quick Start
//!
//! ```ignore
//! use hitch::prelude::*;
//!
//! struct Counter;
//!
//! impl Lifecycle for Counter {
//!     type Output = String;
//!
//!     fn render(&mut self) -> String {
//!         let (count, set_count) = use_state(|| 10);
//!
//!         use_mount(move || {
//!             tracing::info!("mounted");
//!             || tracing::info!("unmounted")
//!         });
//!
//!         format!("<button>{count}</button>")
//!     }
//! }
//!
//! // In the host, once per instance:
//! let mut counter = with_hooks(Counter, HostBinding::new(root, node, schedule_update));
//! counter.connected_callback();
//! let html = counter.render();
//! ```
//!
//! # Context
//!
//! ```ignore
//! const THEME: ContextKey<String> = ContextKey::new("app:theme");
//!
//! // Ancestor
//! let (theme, set_theme, _) = use_context_state(THEME, || "dark".to_string());
//!
//! // Any descendant
//! let theme = use_context(THEME, PollOptions::from_millis(100, 2));
//! ```
//!
//! ## Rules of Hooks
//!
//! Hooks must be called in the **same order** on every render:
//!
//! - ✅ Call hooks at the top level of `render`
//! - ❌ Don't call hooks inside conditionals (`if`/`match`)
//! - ❌ Don't call hooks inside loops
//! - ❌ Don't call hooks after early returns
//! - ❌ Don't call hooks in event handlers, effects or timers
//!
//! See [`hitch_core::hooks`] for detailed documentation and examples.
//!
//! [`HostBinding`]: prelude::HostBinding

#[cfg(feature = "tokio")]
pub mod runtime;

pub mod prelude {
    //! Common imports for hitch components and hosts.
    pub use hitch_core::{
        Callback, ContextKey, ContextSetter, Dispatch, Hooked, HostBinding, Lifecycle, MountRoot,
        NodeId, PollOptions, ProviderHandle, RefHandle, RuntimeConfig, StateSetter, use_callback,
        use_context, use_context_default, use_context_state, use_effect, use_effect_always,
        use_effect_cleanup, use_memo, use_mount, use_reducer, use_ref, use_state, with_hooks,
    };
}

// Re-export core types at crate root
pub use hitch_core::{
    HookError, HookInstance, HookMeta, HostTree, InstanceId, LifeState, Scheduler, SlotKind, Task,
    TimerId,
};
pub use prelude::*;

pub use hitch_core as core;

#[cfg(feature = "tokio")]
pub use runtime::{TokioScheduler, block_on_local};

/// Install a `tracing` subscriber that prints to stdout.
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    if tracing_subscriber::fmt::try_init().is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
