//! React-style hooks for host-driven components.
//!
//! Hooks give a component persistent, ordered local state across renders.
//! They can only be called from inside a [`Hooked`] component's `render`;
//! the runtime finds the rendering instance and hands each hook the slot at
//! the current cursor position.
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
//!         let (count, set_count) = use_state(|| 0);
//!         let doubled = use_memo(|| count * 2, count);
//!
//!         use_effect(move || tracing::info!("count is {count}"), count);
//!
//!         format!("<button>{count} ({doubled})</button>")
//!     }
//! }
//! ```
//!
//! # Available Hooks
//!
//! | Hook | Purpose |
//! |------|---------|
//! | [`use_state`] | State with a `(value, setter)` pair |
//! | [`use_reducer`] | State updated through a reducer and dispatched actions |
//! | [`use_ref`] | Mutable box that doesn't trigger re-renders |
//! | [`use_memo`] | Memoized computations |
//! | [`use_callback`] | Memoized callbacks with stable identity |
//! | [`use_effect`] | Side effects that run after render when dependencies change |
//! | [`use_effect_cleanup`] | Effects with cleanup functions |
//! | [`use_mount`] | One-time effect after the first render |
//! | [`use_context_state`] | Provide a value to descendants |
//! | [`use_context`] | Read the nearest ancestor's provided value |
//!
//! # Rules of Hooks
//!
//! Hooks must be called in the **exact same order** on every render. This is
//! because hooks are identified by their position in the call sequence, not
//! by any name or key.
//!
//! ## ✅ DO: Call hooks at the top level
//!
//! ```ignore
//! fn render(&mut self) -> String {
//!     let (count, set_count) = use_state(|| 0);
//!     let name = use_ref(String::new);
//!     // ...
//! }
//! ```
//!
//! ## ❌ DON'T: Call hooks conditionally, in loops, or after early returns
//!
//! ```ignore
//! fn render(&mut self) -> String {
//!     let (show_extra, _) = use_state(|| false);
//!
//!     if show_extra {
//!         let extra = use_ref(|| "extra data");  // ❌ WRONG!
//!     }
//!     // ...
//! }
//! ```
//!
//! ## ❌ DON'T: Call hooks in event handlers, effects or timers
//!
//! Those run outside of render, so there is no slot to hand out.
//!
//! # Error Messages
//!
//! Misuse fails fast instead of silently handing out the wrong state:
//!
//! ```text
//! hitch hooks error: Hook order mismatch at index 1!
//! Previous render: `use_effect`
//! Current render: `use_state`
//!
//! Hooks must be called in the exact same order every render.
//! ```
//!
//! A render that calls fewer or more hooks than the previous one fails with
//! "Hook count mismatch", and a hook called with no component rendering
//! fails with "called outside of render". See [`HookError`].
//!
//! # Unmount safety
//!
//! Setters and dispatchers stay valid forever, but once their instance has
//! disconnected they become silent no-ops. Timers and other asynchronous
//! work started by an effect may keep a setter and call it late; nothing
//! happens.
//!
//! [`Hooked`]: crate::lifecycle::Hooked
//! [`use_effect`]: crate::effects::use_effect
//! [`use_effect_cleanup`]: crate::effects::use_effect_cleanup
//! [`use_mount`]: crate::effects::use_mount
//! [`use_context_state`]: crate::context::use_context_state
//! [`use_context`]: crate::context::use_context
//! [`HookError`]: crate::error::HookError

use crate::instance::{self, Updater};
use crate::ledger::SlotKind;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

// ============================================================================
// State
// ============================================================================

/// Setter returned by [`use_state`].
///
/// The same setter is returned on every render of an instance, so it can be
/// used as an effect dependency. Equality is identity.
pub struct StateSetter<T> {
    value: Rc<RefCell<T>>,
    updater: Updater,
}

impl<T: 'static> StateSetter<T> {
    /// Replace the value and request a re-render.
    ///
    /// Every call requests a re-render, even when the value is unchanged.
    /// After the owning instance disconnects this does nothing.
    pub fn set(&self, value: T) {
        if !self.updater.is_live() {
            return;
        }
        *self.value.borrow_mut() = value;
        self.updater.request_update();
    }

    /// Compute the next value from the current one, then behave like [`set`](Self::set).
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if !self.updater.is_live() {
            return;
        }
        let next = f(&self.value.borrow());
        self.set(next);
    }

    /// Whether both setters write the same slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl<T> Clone for StateSetter<T> {
    fn clone(&self) -> Self {
        Self {
            value: Rc::clone(&self.value),
            updater: self.updater.clone(),
        }
    }
}

impl<T> PartialEq for StateSetter<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl<T> fmt::Debug for StateSetter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StateSetter(...)")
    }
}

struct StateCell<T> {
    value: Rc<RefCell<T>>,
    setter: StateSetter<T>,
}

/// Create or retrieve a state value with a setter.
///
/// The initializer only runs on the first render.
///
/// # Example
///
/// ```ignore
/// fn render(&mut self) -> String {
///     let (count, set_count) = use_state(|| 10);
///     // later, from an event handler: set_count.set(count + 1);
///     format!("<div>{count}</div>")
/// }
/// ```
#[track_caller]
pub fn use_state<T: Clone + 'static>(init: impl FnOnce() -> T) -> (T, StateSetter<T>) {
    let slot = instance::use_slot(SlotKind::State, |instance| {
        let value = Rc::new(RefCell::new(init()));
        StateCell {
            setter: StateSetter {
                value: Rc::clone(&value),
                updater: instance.updater(),
            },
            value,
        }
    });

    let value = slot.cell.value.borrow().clone();
    (value, slot.cell.setter.clone())
}

// ============================================================================
// Reducer
// ============================================================================

/// Dispatcher returned by [`use_reducer`]. Stable across renders.
pub struct Dispatch<A> {
    send: Rc<dyn Fn(A)>,
}

impl<A> Dispatch<A> {
    /// Apply the reducer to the current state and `action`, then request a
    /// re-render. A panic in the reducer reaches the caller; the state is
    /// left untouched. After the owning instance disconnects this does
    /// nothing.
    pub fn dispatch(&self, action: A) {
        (self.send)(action)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.send), Rc::as_ptr(&other.send))
    }
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self {
            send: Rc::clone(&self.send),
        }
    }
}

impl<A> PartialEq for Dispatch<A> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<A> fmt::Debug for Dispatch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dispatch(...)")
    }
}

type Reduce<S, A> = Rc<dyn Fn(&S, A) -> S>;

struct ReducerCell<S, A> {
    value: Rc<RefCell<S>>,
    reduce: Rc<RefCell<Reduce<S, A>>>,
    dispatch: Dispatch<A>,
}

/// State updated by dispatching actions through a reducer.
///
/// Dispatch always uses the reducer passed by the most recent render. A
/// reducer may dispatch to its own dispatcher; the outer result is stored
/// last and wins.
///
/// # Example
///
/// ```ignore
/// enum Action { Increment, Reset }
///
/// let (count, dispatch) = use_reducer(
///     |count: &i32, action: Action| match action {
///         Action::Increment => count + 1,
///         Action::Reset => 0,
///     },
///     || 3,
/// );
/// ```
#[track_caller]
pub fn use_reducer<S, A>(
    reduce: impl Fn(&S, A) -> S + 'static,
    init: impl FnOnce() -> S,
) -> (S, Dispatch<A>)
where
    S: Clone + 'static,
    A: 'static,
{
    let reduce: Reduce<S, A> = Rc::new(reduce);

    let slot = instance::use_slot(SlotKind::Reducer, |instance| {
        let value = Rc::new(RefCell::new(init()));
        let current: Rc<RefCell<Reduce<S, A>>> = Rc::new(RefCell::new(Rc::clone(&reduce)));
        let updater = instance.updater();

        let send = {
            let value = Rc::clone(&value);
            let current = Rc::clone(&current);
            move |action: A| {
                if !updater.is_live() {
                    return;
                }
                let reduce = Rc::clone(&*current.borrow());
                // No borrow is held while the reducer runs.
                let state = value.borrow().clone();
                let next = reduce(&state, action);
                *value.borrow_mut() = next;
                updater.request_update();
            }
        };

        ReducerCell {
            value,
            reduce: current,
            dispatch: Dispatch {
                send: Rc::new(send),
            },
        }
    });

    if !slot.created {
        *slot.cell.reduce.borrow_mut() = reduce;
    }

    let value = slot.cell.value.borrow().clone();
    (value, slot.cell.dispatch.clone())
}

// ============================================================================
// Ref
// ============================================================================

/// Handle to a ref value created by [`use_ref`].
///
/// The same box is returned on every render. Mutating it never triggers a
/// re-render.
pub struct RefHandle<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> RefHandle<T> {
    /// Get a reference to the current value.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    /// Get a mutable reference to the current value.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    /// Set the value directly.
    pub fn set(&self, value: T) {
        *self.inner.borrow_mut() = value;
    }

    /// Whether both handles point at the same box.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> RefHandle<T> {
    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.inner.borrow().clone()
    }
}

impl<T> Clone for RefHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for RefHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefHandle").field(&*self.inner.borrow()).finish()
    }
}

/// Create or retrieve a mutable box that persists across renders.
///
/// # Example
///
/// ```ignore
/// let render_count = use_ref(|| 0);
/// *render_count.borrow_mut() += 1;
/// ```
#[track_caller]
pub fn use_ref<T: 'static>(init: impl FnOnce() -> T) -> RefHandle<T> {
    let slot = instance::use_slot(SlotKind::Ref, |_| RefHandle {
        inner: Rc::new(RefCell::new(init())),
    });
    (*slot.cell).clone()
}

// ============================================================================
// Memo and callback
// ============================================================================

/// A cached value and the dependencies it was computed from.
struct DepsCell<T, D> {
    cached: RefCell<Option<(T, D)>>,
}

impl<T: Clone, D: PartialEq> DepsCell<T, D> {
    fn new() -> Self {
        Self {
            cached: RefCell::new(None),
        }
    }

    fn get_or_compute(&self, deps: D, compute: impl FnOnce() -> T) -> T {
        {
            let cached = self.cached.borrow();
            if let Some((value, old_deps)) = cached.as_ref()
                && *old_deps == deps
            {
                return value.clone();
            }
        }

        // A panicking factory leaves the previous cache in place.
        let value = compute();
        *self.cached.borrow_mut() = Some((value.clone(), deps));
        value
    }
}

/// Memoize a computation based on dependencies.
///
/// `compute` only runs when `deps` differs from the previous render's. On
/// other renders the cached value is returned, so an `Rc` result keeps its
/// identity.
///
/// # Example
///
/// ```ignore
/// let (n, _) = use_state(|| 13);
/// let fib = use_memo(|| fibonacci(n), n);
/// ```
#[track_caller]
pub fn use_memo<T, D>(compute: impl FnOnce() -> T, deps: D) -> T
where
    T: Clone + 'static,
    D: PartialEq + 'static,
{
    let slot = instance::use_slot(SlotKind::Memo, |_| DepsCell::<T, D>::new());
    slot.cell.get_or_compute(deps, compute)
}

/// A shared function with identity, returned by [`use_callback`].
pub struct Callback<A = (), R = ()> {
    f: Rc<dyn Fn(A) -> R>,
}

impl<A, R> Callback<A, R> {
    pub fn new(f: impl Fn(A) -> R + 'static) -> Self {
        Self { f: Rc::new(f) }
    }

    /// Invoke the callback.
    pub fn call(&self, args: A) -> R {
        (self.f)(args)
    }

    /// Whether both callbacks are the same function object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.f), Rc::as_ptr(&other.f))
    }
}

impl<A, R> Clone for Callback<A, R> {
    fn clone(&self) -> Self {
        Self {
            f: Rc::clone(&self.f),
        }
    }
}

impl<A, R> PartialEq for Callback<A, R> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<A, R> fmt::Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(...)")
    }
}

/// Create a memoized callback that only changes when dependencies change.
///
/// Useful for passing callbacks to children or effects without changing
/// their identity every render.
///
/// # Example
///
/// ```ignore
/// let (count, set_count) = use_state(|| 0);
///
/// let increment = use_callback(move |()| set_count.set(count + 1), count);
/// ```
#[track_caller]
pub fn use_callback<A, R, D>(callback: impl Fn(A) -> R + 'static, deps: D) -> Callback<A, R>
where
    A: 'static,
    R: 'static,
    D: PartialEq + 'static,
{
    let slot = instance::use_slot(SlotKind::Callback, |_| DepsCell::<Callback<A, R>, D>::new());
    slot.cell.get_or_compute(deps, || Callback::new(callback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;
    use crate::testing::TestHost;
    use std::cell::Cell;

    /// Renders `body` with hooks; the closure gets the render number.
    struct Probe<F>(F, usize);

    impl<F: FnMut(usize) -> String> Lifecycle for Probe<F> {
        type Output = String;

        fn render(&mut self) -> String {
            self.1 += 1;
            (self.0)(self.1)
        }
    }

    #[test]
    fn use_state_persists_across_renders() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let setter: Rc<RefCell<Option<StateSetter<i32>>>> = Rc::default();

        let captured = Rc::clone(&setter);
        let node = host.mount(
            &root,
            container,
            Probe(
                move |_| {
                    let (value, set) = use_state(|| 42);
                    *captured.borrow_mut() = Some(set);
                    value.to_string()
                },
                0,
            ),
        );
        assert_eq!(host.output(node), "42");

        setter.borrow().as_ref().unwrap().update(|v| v + 58);
        host.run_until_idle();
        assert_eq!(host.output(node), "100");
    }

    #[test]
    fn use_memo_caches_value() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let computed = Rc::new(Cell::new(0));
        let dep = Rc::new(Cell::new("dep1"));

        let count = Rc::clone(&computed);
        let current = Rc::clone(&dep);
        let node = host.mount(
            &root,
            container,
            Probe(
                move |render| {
                    use_memo(
                        || {
                            count.set(count.get() + 1);
                            format!("computed on render {render}")
                        },
                        current.get(),
                    )
                },
                0,
            ),
        );
        host.render(node);
        assert_eq!(host.output(node), "computed on render 1");
        assert_eq!(computed.get(), 1);

        dep.set("dep2");
        host.render(node);
        assert_eq!(host.output(node), "computed on render 3");
        assert_eq!(computed.get(), 2);
    }

    #[test]
    fn use_ref_persists_without_rerenders() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let handles: Rc<RefCell<Vec<RefHandle<i32>>>> = Rc::default();

        let captured = Rc::clone(&handles);
        let node = host.mount(
            &root,
            container,
            Probe(
                move |_| {
                    let handle = use_ref(|| 0);
                    *handle.borrow_mut() += 1;
                    captured.borrow_mut().push(handle.clone());
                    handle.get().to_string()
                },
                0,
            ),
        );
        host.render(node);
        host.run_until_idle();

        let handles = handles.borrow();
        assert_eq!(handles.len(), 2);
        assert!(handles[0].ptr_eq(&handles[1]));
        assert_eq!(handles[1].get(), 2);
        assert_eq!(host.render_count(node), 2);
    }

    #[test]
    fn reducer_uses_latest_reducer() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let step = Rc::new(Cell::new(1));
        let dispatch: Rc<RefCell<Option<Dispatch<()>>>> = Rc::default();

        let current_step = Rc::clone(&step);
        let captured = Rc::clone(&dispatch);
        let node = host.mount(
            &root,
            container,
            Probe(
                move |_| {
                    let by = current_step.get();
                    let (value, send) = use_reducer(move |n: &i32, ()| n + by, || 0);
                    *captured.borrow_mut() = Some(send);
                    value.to_string()
                },
                0,
            ),
        );

        step.set(5);
        host.render(node);
        dispatch.borrow().as_ref().unwrap().dispatch(());
        host.run_until_idle();
        assert_eq!(host.output(node), "5");
    }

    #[test]
    fn panicking_reducer_reaches_the_dispatcher() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let dispatch: Rc<RefCell<Option<Dispatch<bool>>>> = Rc::default();

        let captured = Rc::clone(&dispatch);
        let node = host.mount(
            &root,
            container,
            Probe(
                move |_| {
                    let (value, send) = use_reducer(
                        |n: &i32, fail: bool| {
                            assert!(!fail, "reducer rejected action");
                            n + 1
                        },
                        || 0,
                    );
                    *captured.borrow_mut() = Some(send);
                    value.to_string()
                },
                0,
            ),
        );

        let send = dispatch.borrow().clone().unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| send.dispatch(true)));
        assert!(result.is_err());

        send.dispatch(false);
        host.run_until_idle();
        assert_eq!(host.output(node), "1");
    }

    #[test]
    fn reducer_may_dispatch_to_itself() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let dispatch: Rc<RefCell<Option<Dispatch<bool>>>> = Rc::default();

        let captured = Rc::clone(&dispatch);
        let node = host.mount(
            &root,
            container,
            Probe(
                move |_| {
                    let inner = Rc::clone(&captured);
                    let (value, send) = use_reducer(
                        move |n: &i32, cascade: bool| {
                            let again = inner.borrow().clone();
                            if let (true, Some(again)) = (cascade, again) {
                                again.dispatch(false);
                            }
                            n + 1
                        },
                        || 0,
                    );
                    *captured.borrow_mut() = Some(send);
                    value.to_string()
                },
                0,
            ),
        );

        let send = dispatch.borrow().clone().unwrap();
        send.dispatch(true);
        host.run_until_idle();

        // The outer reduction started from 0 and is stored last.
        assert_eq!(host.output(node), "1");
        assert_eq!(host.update_requests(node), 2);
    }

    #[test]
    #[should_panic(expected = "Hook order mismatch")]
    fn hook_order_mismatch_panics() {
        let host = TestHost::new();
        let (root, container) = host.create_root();

        let node = host.mount(
            &root,
            container,
            Probe(
                |render| {
                    if render == 1 {
                        let _ = use_state(|| 0);
                        let _ = use_ref(|| 0);
                    } else {
                        let _ = use_ref(|| 0);
                        let _ = use_state(|| 0);
                    }
                    String::new()
                },
                0,
            ),
        );
        host.render(node);
    }

    #[test]
    #[should_panic(expected = "Hook count mismatch")]
    fn hook_count_mismatch_panics() {
        let host = TestHost::new();
        let (root, container) = host.create_root();

        let node = host.mount(
            &root,
            container,
            Probe(
                |render| {
                    let _ = use_state(|| 0);
                    if render == 1 {
                        let _ = use_state(|| 0);
                    }
                    String::new()
                },
                0,
            ),
        );
        host.render(node);
    }

    #[test]
    #[should_panic(expected = "outside of render")]
    fn hook_outside_render_panics() {
        let _ = use_state(|| 0);
    }
}
