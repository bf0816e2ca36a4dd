//! Core runtime for hitch: hooks and context for host-driven components.

pub mod config;
pub mod context;
pub mod effects;
pub mod error;
pub mod hooks;
pub mod instance;
pub mod ledger;
pub mod lifecycle;
pub mod root;
pub mod scheduler;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export hooks for ergonomic state management
pub use hooks::{
    Callback, Dispatch, RefHandle, StateSetter, use_callback, use_memo, use_reducer, use_ref,
    use_state,
};

pub use effects::{use_effect, use_effect_always, use_effect_cleanup, use_mount};

pub use context::{
    ContextKey, ContextRegistry, ContextSetter, ProviderHandle, use_context, use_context_default,
    use_context_state,
};

// Re-export host-facing types
pub use config::{PollOptions, RuntimeConfig};
pub use error::HookError;
pub use instance::{HookInstance, HostBinding, InstanceId, LifeState};
pub use ledger::{HookLedger, HookMeta, SlotKind};
pub use lifecycle::{Hooked, Lifecycle, with_hooks};
pub use root::{HostTree, MountRoot, NodeId};
pub use scheduler::{Scheduler, Task, TimerId};
