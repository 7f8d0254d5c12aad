//! Lifecycle hooks invoked around Create/Update/Delete side effects
//!
//! Hooks are registered into a scope's [`ChangeHookSettings`]; the scheduler
//! collects them along the acting entity's scope chain, outermost scope
//! first, and runs them in registration order. There is no priority model.

use crate::entity::Entity;
use crate::scope::ScopeRef;
use anyhow::Result;
use std::rc::Rc;

/// Before/after interceptors around entity side effects. Every method
/// defaults to a no-op so implementations override only what they need.
#[allow(unused_variables)]
pub trait ChangeHook {
    fn before_create(&self, entity: &Entity) -> Result<()> {
        Ok(())
    }

    fn after_create(&self, entity: &Entity) -> Result<()> {
        Ok(())
    }

    fn before_update(&self, current: &Entity, pending: &Entity, changed: &[String]) -> Result<()> {
        Ok(())
    }

    fn after_update(&self, current: &Entity, pending: &Entity, changed: &[String]) -> Result<()> {
        Ok(())
    }

    fn before_delete(&self, entity: &Entity) -> Result<()> {
        Ok(())
    }

    fn after_delete(&self, entity: &Entity) -> Result<()> {
        Ok(())
    }
}

/// Scope settings slot holding registered hooks
#[derive(Default)]
pub struct ChangeHookSettings {
    pub hooks: Vec<Rc<dyn ChangeHook>>,
}

/// Register a hook on a scope (usually the root scope).
pub fn register_hook(scope: &ScopeRef, hook: Rc<dyn ChangeHook>) {
    scope
        .settings::<ChangeHookSettings>()
        .borrow_mut()
        .hooks
        .push(hook);
}

/// Collect the hook chain for an entity: every scope from the entity's own
/// scope out to the root contributes its hooks, outermost first.
pub fn collect_hooks(scope: Option<&ScopeRef>) -> Vec<Rc<dyn ChangeHook>> {
    let mut collected: Vec<Rc<dyn ChangeHook>> = Vec::new();
    let mut next = scope.cloned();

    while let Some(s) = next {
        let settings = s.settings::<ChangeHookSettings>();
        let hooks = settings.borrow();

        for (i, hook) in hooks.hooks.iter().enumerate() {
            collected.insert(i, Rc::clone(hook));
        }

        next = s.parent().cloned();
    }

    collected
}
