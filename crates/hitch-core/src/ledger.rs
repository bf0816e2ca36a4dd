//! Per-instance hook storage.
//!
//! Every hooked instance owns one [`HookLedger`]: an ordered list of slots
//! plus a cursor that is reset to zero at the start of each render. Hooks
//! are identified only by their position in the call sequence, so the
//! ledger records which kind of hook created each slot and refuses to hand a
//! slot to a different kind on a later render.

use crate::error::HookError;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// The hook that created a slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SlotKind {
    State,
    Reducer,
    Memo,
    Ref,
    Callback,
    Effect,
    ContextProvider,
    ContextConsumer,
}

impl SlotKind {
    /// Name of the public hook function for this kind.
    pub fn hook_name(self) -> &'static str {
        match self {
            SlotKind::State => "use_state",
            SlotKind::Reducer => "use_reducer",
            SlotKind::Memo => "use_memo",
            SlotKind::Ref => "use_ref",
            SlotKind::Callback => "use_callback",
            SlotKind::Effect => "use_effect",
            SlotKind::ContextProvider => "use_context_state",
            SlotKind::ContextConsumer => "use_context",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hook_name())
    }
}

/// Metadata about a slot for debugging purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookMeta {
    /// The hook kind that owns the slot.
    pub kind: SlotKind,
    /// The type of value stored (from `std::any::type_name`).
    pub value_type: &'static str,
}

struct HookSlot {
    value: Rc<dyn Any>,
    meta: HookMeta,
}

/// Ordered hook slots for one component instance.
pub struct HookLedger {
    /// Slot values, indexed by call order
    slots: Vec<HookSlot>,
    /// Position of the next hook call (reset to 0 each render)
    cursor: usize,
    /// Whether a render is in progress
    rendering: bool,
    /// Hook count of the previous completed render
    expected_count: Option<usize>,
    /// Number of completed renders
    render_count: usize,
}

impl HookLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            cursor: 0,
            rendering: false,
            expected_count: None,
            render_count: 0,
        }
    }

    pub(crate) fn begin_render(&mut self) {
        self.cursor = 0;
        self.rendering = true;
    }

    /// Finish a render, checking the hook count against the previous one.
    pub(crate) fn end_render(&mut self, strict: bool) -> Result<(), HookError> {
        self.rendering = false;
        self.render_count += 1;

        if strict
            && let Some(expected) = self.expected_count
            && self.cursor != expected
        {
            return Err(HookError::HookCountMismatch {
                expected,
                found: self.cursor,
                render: self.render_count,
            });
        }

        self.expected_count = Some(self.cursor);
        Ok(())
    }

    /// Leave the render state without counting the render (its body panicked).
    pub(crate) fn abort_render(&mut self) {
        self.rendering = false;
    }

    /// Claim the slot at the cursor for a hook of `kind`, advancing the cursor.
    ///
    /// Returns `Ok(Some(value))` when the slot exists and matches, and
    /// `Ok(None)` when the cursor is past the end, in which case the caller
    /// must [`push_slot`](Self::push_slot) a fresh value.
    pub fn try_slot<T: 'static>(&mut self, kind: SlotKind) -> Result<Option<Rc<T>>, HookError> {
        if !self.rendering {
            return Err(HookError::OutsideRender { hook: kind });
        }

        let index = self.cursor;
        self.cursor += 1;

        let Some(slot) = self.slots.get(index) else {
            return Ok(None);
        };

        if slot.meta.kind != kind {
            return Err(HookError::OrderingViolation {
                index,
                expected: slot.meta.kind,
                found: kind,
            });
        }

        Rc::clone(&slot.value)
            .downcast::<T>()
            .map(Some)
            .map_err(|_| HookError::TypeMismatch {
                index,
                expected: slot.meta.value_type,
            })
    }

    /// Store the value for a slot that [`try_slot`](Self::try_slot) reported as new.
    pub fn push_slot<T: 'static>(&mut self, kind: SlotKind, value: Rc<T>) {
        debug_assert_eq!(
            self.slots.len() + 1,
            self.cursor,
            "push_slot must directly follow the try_slot that claimed it"
        );
        self.slots.push(HookSlot {
            value,
            meta: HookMeta {
                kind,
                value_type: std::any::type_name::<T>(),
            },
        });
    }

    /// All slots of `kind`, in slot order, downcast to `T`.
    pub(crate) fn slots_of<T: 'static>(&self, kind: SlotKind) -> Vec<Rc<T>> {
        self.slots
            .iter()
            .filter(|slot| slot.meta.kind == kind)
            .filter_map(|slot| Rc::clone(&slot.value).downcast::<T>().ok())
            .collect()
    }

    /// Number of slots recorded so far.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no hook has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current cursor position.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of completed renders.
    pub fn render_count(&self) -> usize {
        self.render_count
    }

    /// Whether a render is in progress.
    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    /// Describe every slot, for devtools-style inspection.
    pub fn debug_info(&self) -> Vec<HookMeta> {
        self.slots.iter().map(|slot| slot.meta.clone()).collect()
    }
}

impl Default for HookLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookLedger")
            .field("slots", &self.debug_info())
            .field("cursor", &self.cursor)
            .field("render_count", &self.render_count)
            .finish()
    }
}
