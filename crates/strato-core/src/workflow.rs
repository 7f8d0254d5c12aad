//! Replace workflows
//!
//! A Replace is never performed automatically: tearing a resource down and
//! recreating it in place is unsafe to default. Instead a workflow
//! registered for the entity's type runs a substitute sequence of
//! create/update/delete steps; a Replace with no workflow is reported as
//! skipped and the run continues.

use crate::entity::Entity;
use crate::schema::TypeRegistry;
use crate::scope::ScopeRef;
use crate::state::{StateBackend, StateTracker};
use anyhow::Result;
use indexmap::IndexMap;
use std::rc::Rc;

/// Context a workflow runs its substitute steps in
pub struct WorkflowContext<'a> {
    pub registry: &'a TypeRegistry,
    pub state: &'a mut StateTracker,
    pub backend: &'a dyn StateBackend,
}

/// A substitute execution procedure for replacing entities of one type
pub trait ReplaceWorkflow {
    fn name(&self) -> &str;

    fn execute(
        &self,
        current: &Entity,
        pending: &mut Entity,
        cx: &mut WorkflowContext<'_>,
    ) -> Result<()>;
}

/// Scope settings slot mapping entity type name to workflow
#[derive(Default)]
pub struct WorkflowSettings {
    pub workflows: IndexMap<String, Rc<dyn ReplaceWorkflow>>,
}

/// Register a replace workflow for `type_name` on a scope (usually root).
pub fn register_workflow(scope: &ScopeRef, type_name: &str, workflow: Rc<dyn ReplaceWorkflow>) {
    scope
        .settings::<WorkflowSettings>()
        .borrow_mut()
        .workflows
        .insert(type_name.to_string(), workflow);
}

/// Find the workflow for `type_name`, walking the scope chain outward.
pub fn find_workflow(
    scope: Option<&ScopeRef>,
    type_name: &str,
) -> Option<Rc<dyn ReplaceWorkflow>> {
    let mut next = scope.cloned();

    while let Some(s) = next {
        let settings = s.settings::<WorkflowSettings>();
        let found = settings.borrow().workflows.get(type_name).cloned();

        if found.is_some() {
            return found;
        }

        next = s.parent().cloned();
    }

    None
}
