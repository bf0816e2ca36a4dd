//! Installing hooks on a host component.
//!
//! The host drives every component through three entry points. [`with_hooks`]
//! wraps a component so that its `render` can call hooks and so that
//! disconnecting it tears down effects and context subscriptions before the
//! component's own disconnect logic runs.

use crate::instance::{HookInstance, HostBinding};
use std::fmt;
use std::panic;

/// The per-instance contract of the host's component model.
pub trait Lifecycle {
    /// What `render` produces for the host.
    type Output;

    /// The host attached the instance.
    fn connected_callback(&mut self) {}

    /// Produce the renderable tree. Hooks may be called here.
    fn render(&mut self) -> Self::Output;

    /// The host detached the instance.
    fn disconnected_callback(&mut self) {}
}

/// A component with hooks installed. Created by [`with_hooks`].
pub struct Hooked<C> {
    component: C,
    instance: HookInstance,
}

/// Install hooks on `component`, bound to the host position in `binding`.
///
/// Call once per instance, before its first render. The component is moved
/// into the returned wrapper, so a second installation is not possible.
pub fn with_hooks<C: Lifecycle>(component: C, binding: HostBinding) -> Hooked<C> {
    Hooked {
        component,
        instance: HookInstance::new(binding),
    }
}

impl<C: Lifecycle> Hooked<C> {
    pub fn component(&self) -> &C {
        &self.component
    }

    pub fn component_mut(&mut self) -> &mut C {
        &mut self.component
    }

    pub fn instance(&self) -> &HookInstance {
        &self.instance
    }

    pub fn into_component(self) -> C {
        self.component
    }
}

impl<C: Lifecycle> Lifecycle for Hooked<C> {
    type Output = C::Output;

    fn connected_callback(&mut self) {
        if !self.instance.is_live() {
            tracing::warn!(
                instance = %self.instance.id(),
                "connected after disconnect; hooks stay inert"
            );
        }
        self.component.connected_callback();
    }

    fn render(&mut self) -> C::Output {
        let component = &mut self.component;
        self.instance.render_with(|| component.render())
    }

    /// Run effect cleanups and context teardown, then the component's own
    /// disconnect logic.
    fn disconnected_callback(&mut self) {
        let caught = self.instance.teardown();
        self.component.disconnected_callback();

        if let Some(payload) = caught
            && self.instance.root().config().propagate_effect_panics
        {
            panic::resume_unwind(payload);
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for Hooked<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooked")
            .field("component", &self.component)
            .field("instance", &self.instance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::use_mount;
    use crate::instance::LifeState;
    use crate::config::PollOptions;
    use crate::context::{ContextKey, use_context, use_context_state};
    use crate::testing::TestHost;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    struct Traced {
        log: Log,
        with_effect: bool,
    }

    impl Lifecycle for Traced {
        type Output = String;

        fn connected_callback(&mut self) {
            self.log.borrow_mut().push("connected");
        }

        fn render(&mut self) -> String {
            self.log.borrow_mut().push("render");
            if self.with_effect {
                let log = Rc::clone(&self.log);
                use_mount(move || {
                    log.borrow_mut().push("effect");
                    move || log.borrow_mut().push("effect.cleanup")
                });
            }
            String::new()
        }

        fn disconnected_callback(&mut self) {
            self.log.borrow_mut().push("disconnected");
        }
    }

    #[test]
    fn cleanup_runs_before_own_disconnect() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let log: Log = Rc::default();

        let node = host.mount(
            &root,
            container,
            Traced {
                log: Rc::clone(&log),
                with_effect: true,
            },
        );
        host.run_until_idle();
        assert_eq!(*log.borrow(), vec!["connected", "render", "effect"]);

        host.remove(node);
        assert_eq!(
            *log.borrow(),
            vec!["connected", "render", "effect", "effect.cleanup", "disconnected"]
        );
    }

    #[test]
    fn direct_use_without_a_host_loop() {
        let host = TestHost::new();
        let (root, container) = host.create_root();
        let log: Log = Rc::default();

        let binding = HostBinding::new(root, container, || {});
        let mut hooked = with_hooks(
            Traced {
                log: Rc::clone(&log),
                with_effect: false,
            },
            binding,
        );

        hooked.connected_callback();
        hooked.render();
        hooked.disconnected_callback();
        assert_eq!(hooked.instance().state(), LifeState::Disconnected);

        // Reconnecting does not resurrect the instance.
        hooked.connected_callback();
        hooked.render();
        assert!(!hooked.instance().is_live());
        assert_eq!(
            *hooked.component().log.borrow(),
            vec!["connected", "render", "disconnected", "connected", "render"]
        );
    }

    const THEME: ContextKey<&'static str> = ContextKey::new("app:theme");
    const LOCALE: ContextKey<&'static str> = ContextKey::new("app:locale");

    struct ThemeRoot;

    impl Lifecycle for ThemeRoot {
        type Output = String;

        fn render(&mut self) -> String {
            let (theme, _, _) = use_context_state(THEME, || "dark");
            let locale = use_context(LOCALE, PollOptions::from_millis(100, 2));
            format!("{theme} {}", locale.unwrap_or("NONE"))
        }
    }

    #[test]
    fn first_render_after_disconnect_leaves_no_registrations() {
        let host = TestHost::new();
        let (root, container) = host.create_root();

        let binding = HostBinding::new(root.clone(), container, || {});
        let mut hooked = with_hooks(ThemeRoot, binding);

        hooked.connected_callback();
        hooked.disconnected_callback();
        assert_eq!(hooked.render(), "dark NONE");

        assert_eq!(root.registry().provider_count(THEME), 0);
        assert_eq!(root.registry().lookup_count(), 0);
        assert_eq!(host.pending_timers(), 0);
    }
}
