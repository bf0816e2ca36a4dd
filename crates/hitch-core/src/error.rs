//! Errors raised when hooks are misused.

use crate::ledger::SlotKind;
use thiserror::Error;

/// A violation of the rules of hooks.
///
/// Hook functions cannot return `Result` without forcing every render body
/// to handle it, so the public hooks panic with this error's message. Hosts
/// that want to probe the ledger directly can use
/// [`HookLedger::try_slot`](crate::ledger::HookLedger::try_slot), which
/// returns it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// The hook at `index` is not the same kind as on the previous render.
    #[error(
        "Hook order mismatch at index {index}!\n\
         Previous render: `{expected}`\n\
         Current render: `{found}`\n\n\
         Hooks must be called in the exact same order every render."
    )]
    OrderingViolation {
        index: usize,
        expected: SlotKind,
        found: SlotKind,
    },

    /// A render called a different number of hooks than the one before it.
    #[error(
        "Hook count mismatch!\n\
         Previous render had {expected} hooks, current render has {found} hooks.\n\
         Render number: {render}\n\n\
         This usually happens when:\n\
         - A hook is called inside a conditional (if/match)\n\
         - A hook is called inside a loop with varying iterations\n\
         - A hook is called after an early return\n\n\
         Hooks must be called in the exact same order every render."
    )]
    HookCountMismatch {
        expected: usize,
        found: usize,
        render: usize,
    },

    /// A hook was called while no hooked component was rendering.
    #[error(
        "`{hook}` called outside of render!\n\
         Hooks can only be called while a hooked component renders.\n\
         Make sure you're not calling hooks in:\n\
         - Event handlers\n\
         - Effect bodies or timers\n\
         - Static initializers"
    )]
    OutsideRender { hook: SlotKind },

    /// The slot at `index` has the right kind but holds a different value type.
    #[error("Hook value type mismatch at index {index}: expected `{expected}`")]
    TypeMismatch { index: usize, expected: &'static str },
}

/// Panics with the formatted hook error. Used by every public hook.
#[track_caller]
pub(crate) fn fail(err: HookError) -> ! {
    panic!("\n\nhitch hooks error: {err}\n")
}
