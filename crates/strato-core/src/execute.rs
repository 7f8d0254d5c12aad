//! Change scheduler: runs a diff's side effects in dependency-safe order
//!
//! Three passes over the change forest: Create/Keep/Update runs depth-first
//! with a parent before its children, so a resource exists before its
//! subresources are created against it; Replace runs next in the same
//! order, delegated to a registered workflow; Delete runs last in reverse,
//! children before their parent. Each node executes at most once, guarded
//! by an atomic flag, and recorded state is persisted after every side
//! effect so an interrupted run resumes instead of repeating work.

use crate::diff::{Action, Change, Diff};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::hooks::{collect_hooks, ChangeHook};
use crate::provider::ProviderContext;
use crate::schema::TypeRegistry;
use crate::scope::ScopeRef;
use crate::state::{StateBackend, StateTracker};
use crate::workflow::{find_workflow, WorkflowContext};
use std::rc::Rc;

/// Receives progress callbacks while a diff executes
#[allow(unused_variables)]
pub trait ExecutionListener {
    /// A side effect is about to run.
    fn on_execute(&mut self, change: &Change) {}

    /// A Replace had no workflow registered and was skipped.
    fn on_replace_skipped(&mut self, change: &Change) {}
}

/// Listener that reports nothing.
pub struct NullListener;

impl ExecutionListener for NullListener {}

/// Everything one execution run needs
pub struct ExecuteContext<'a> {
    pub registry: &'a TypeRegistry,
    pub state: &'a mut StateTracker,
    pub backend: &'a dyn StateBackend,
    pub listener: &'a mut dyn ExecutionListener,
    /// Fallback scope for hook/workflow lookups when the acting entity has
    /// no scope of its own (deletes of state-loaded entities).
    pub root: Option<ScopeRef>,
}

impl Diff {
    /// Run every side effect in this diff tree exactly once.
    pub fn execute(&self, cx: &mut ExecuteContext<'_>) -> Result<()> {
        self.execute_create_update(cx)?;
        self.execute_replace(cx)?;
        self.execute_delete(cx)
    }

    fn execute_create_update(&self, cx: &mut ExecuteContext<'_>) -> Result<()> {
        for change in &self.changes {
            if matches!(change.action, Action::Create | Action::Keep | Action::Update) {
                execute_change(change, cx)?;
            }

            for child in &change.sub_diffs {
                child.diff.execute_create_update(cx)?;
            }
        }

        Ok(())
    }

    fn execute_replace(&self, cx: &mut ExecuteContext<'_>) -> Result<()> {
        for change in &self.changes {
            if change.action == Action::Replace {
                execute_change(change, cx)?;
            }

            for child in &change.sub_diffs {
                child.diff.execute_replace(cx)?;
            }
        }

        Ok(())
    }

    fn execute_delete(&self, cx: &mut ExecuteContext<'_>) -> Result<()> {
        for change in self.changes.iter().rev() {
            for child in &change.sub_diffs {
                child.diff.execute_delete(cx)?;
            }

            if change.action == Action::Delete {
                execute_change(change, cx)?;
            }
        }

        Ok(())
    }
}

fn execute_change(change: &Change, cx: &mut ExecuteContext<'_>) -> Result<()> {
    let entity = change.entity();

    // Unmanaged entities have no lifecycle of their own; their changes were
    // folded into the owning entity's update.
    if !entity.schema().is_managed() {
        return Ok(());
    }

    // At most once, even if this node is reachable through several passes.
    if !change.begin_execution() {
        return Ok(());
    }

    let scope = entity.scope().cloned().or_else(|| cx.root.clone());
    let hooks = collect_hooks(scope.as_ref());

    match change.action {
        Action::Keep => {
            // No side effect, but refresh the recorded entity.
            commit(change, cx)?;
        }
        Action::Create => {
            cx.listener.on_execute(change);

            let mut pending = change
                .pending
                .clone()
                .expect("create changes carry a pending entity");

            run_create(&mut pending, &hooks, cx).map_err(|e| wrap(change, "create", e))?;
            commit_entity(change, Some(pending), cx)?;
        }
        Action::Update => {
            cx.listener.on_execute(change);

            let current = change
                .current
                .as_ref()
                .expect("update changes carry a current entity");
            let mut pending = change
                .pending
                .clone()
                .expect("update changes carry a pending entity");

            run_update(current, &mut pending, &change.changed_fields, &hooks, cx)
                .map_err(|e| wrap(change, "update", e))?;
            commit_entity(change, Some(pending), cx)?;
        }
        Action::Delete => {
            cx.listener.on_execute(change);

            let current = change
                .current
                .as_ref()
                .expect("delete changes carry a current entity");

            run_delete(current, &hooks, cx).map_err(|e| wrap(change, "delete", e))?;
            commit(change, cx)?;
        }
        Action::Replace => {
            let type_name = entity.type_name().to_string();

            let Some(workflow) = find_workflow(scope.as_ref(), &type_name) else {
                cx.listener.on_replace_skipped(change);
                return Ok(());
            };

            cx.listener.on_execute(change);

            let current = change
                .current
                .as_ref()
                .expect("replace changes carry a current entity");
            let mut pending = change
                .pending
                .clone()
                .expect("replace changes carry a pending entity");

            let mut wcx = WorkflowContext {
                registry: cx.registry,
                state: &mut *cx.state,
                backend: cx.backend,
            };

            workflow
                .execute(current, &mut pending, &mut wcx)
                .map_err(|e| wrap(change, "replace", e))?;
            // The workflow's own steps recorded state; Replace itself is
            // not a recordable outcome.
        }
    }

    Ok(())
}

fn run_create(
    pending: &mut Entity,
    hooks: &[Rc<dyn ChangeHook>],
    cx: &ExecuteContext<'_>,
) -> anyhow::Result<()> {
    for hook in hooks {
        hook.before_create(pending)?;
    }

    let provider = provider_for(pending, cx)?;
    provider.create(
        pending,
        &ProviderContext {
            registry: cx.registry,
            state: &*cx.state,
        },
    )?;

    for hook in hooks {
        hook.after_create(pending)?;
    }

    Ok(())
}

fn run_update(
    current: &Entity,
    pending: &mut Entity,
    changed: &[String],
    hooks: &[Rc<dyn ChangeHook>],
    cx: &ExecuteContext<'_>,
) -> anyhow::Result<()> {
    for hook in hooks {
        hook.before_update(current, pending, changed)?;
    }

    let provider = provider_for(pending, cx)?;
    provider.update(
        current,
        pending,
        changed,
        &ProviderContext {
            registry: cx.registry,
            state: &*cx.state,
        },
    )?;

    for hook in hooks {
        hook.after_update(current, pending, changed)?;
    }

    Ok(())
}

fn run_delete(
    current: &Entity,
    hooks: &[Rc<dyn ChangeHook>],
    cx: &ExecuteContext<'_>,
) -> anyhow::Result<()> {
    for hook in hooks {
        hook.before_delete(current)?;
    }

    let provider = provider_for(current, cx)?;
    provider.delete(
        current,
        &ProviderContext {
            registry: cx.registry,
            state: &*cx.state,
        },
    )?;

    for hook in hooks {
        hook.after_delete(current)?;
    }

    Ok(())
}

fn provider_for(
    entity: &Entity,
    cx: &ExecuteContext<'_>,
) -> anyhow::Result<Rc<dyn crate::provider::ResourceProvider>> {
    cx.registry
        .provider(entity.type_name())
        .ok_or_else(|| anyhow::anyhow!("no provider registered for '{}'", entity.type_name()))
}

/// Record the change as diffed and persist before the next change runs.
fn commit(change: &Change, cx: &mut ExecuteContext<'_>) -> Result<()> {
    cx.state.update(change);
    cx.backend.save(cx.state).map_err(Error::state)
}

/// Record a post-execution entity (with provider-written output fields)
/// in place of the originally diffed pending copy.
fn commit_entity(change: &Change, executed: Option<Entity>, cx: &mut ExecuteContext<'_>) -> Result<()> {
    let recorded = Change {
        action: change.action,
        current: change.current.clone(),
        pending: executed,
        changed_fields: change.changed_fields.clone(),
        sub_diffs: Vec::new(),
        executed: std::sync::atomic::AtomicBool::new(true),
    };

    cx.state.update(&recorded);
    cx.backend.save(cx.state).map_err(Error::state)
}

fn wrap(change: &Change, action: &'static str, source: anyhow::Error) -> Error {
    Error::execution(action, change.entity().label(), source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ResourceProvider;
    use crate::schema::{EntityType, FieldSchema};
    use crate::state::NullStateBackend;
    use crate::workflow::register_workflow;
    use crate::{entity::FieldValue, hooks::register_hook, scope::Scope};
    use std::cell::RefCell;
    use strato_lang::Value;

    #[derive(Default)]
    struct Log {
        events: RefCell<Vec<String>>,
    }

    impl Log {
        fn push(&self, event: impl Into<String>) {
            self.events.borrow_mut().push(event.into());
        }

        fn take(&self) -> Vec<String> {
            self.events.borrow().clone()
        }
    }

    struct RecordingProvider {
        log: Rc<Log>,
        fail_on: Option<String>,
    }

    impl ResourceProvider for RecordingProvider {
        fn refresh(
            &self,
            _entity: &mut Entity,
            _cx: &ProviderContext<'_>,
        ) -> anyhow::Result<bool> {
            Ok(true)
        }

        fn create(&self, entity: &mut Entity, _cx: &ProviderContext<'_>) -> anyhow::Result<()> {
            let key = entity.primary_key();

            if self.fail_on.as_deref() == Some(key.as_str()) {
                anyhow::bail!("provider exploded on {key}");
            }

            self.log.push(format!("create {key}"));
            entity.set_field("id", FieldValue::Scalar(Value::from(format!("id-{key}"))));
            Ok(())
        }

        fn update(
            &self,
            _current: &Entity,
            pending: &mut Entity,
            changed: &[String],
            _cx: &ProviderContext<'_>,
        ) -> anyhow::Result<()> {
            self.log
                .push(format!("update {} [{}]", pending.primary_key(), changed.join(",")));
            Ok(())
        }

        fn delete(&self, entity: &Entity, _cx: &ProviderContext<'_>) -> anyhow::Result<()> {
            self.log.push(format!("delete {}", entity.primary_key()));
            Ok(())
        }
    }

    struct CountingBackend {
        saves: RefCell<usize>,
    }

    impl StateBackend for CountingBackend {
        fn load(&self, _registry: &TypeRegistry) -> anyhow::Result<StateTracker> {
            Ok(StateTracker::new())
        }

        fn save(&self, _state: &StateTracker) -> anyhow::Result<()> {
            *self.saves.borrow_mut() += 1;
            Ok(())
        }
    }

    fn registry_with(log: &Rc<Log>, fail_on: Option<&str>) -> TypeRegistry {
        let provider = Rc::new(RecordingProvider {
            log: Rc::clone(log),
            fail_on: fail_on.map(ToString::to_string),
        });

        let mut registry = TypeRegistry::new();
        registry.register_with_provider(
            EntityType::root("test::server")
                .field(FieldSchema::scalar("id").output())
                .field(FieldSchema::scalar("size").updatable())
                .field(FieldSchema::scalar("kind"))
                .field(FieldSchema::entity_list("disk", "test::disk"))
                .id_field("id"),
            provider.clone(),
        );
        registry.register_with_provider(
            EntityType::subresource("test::disk")
                .field(FieldSchema::scalar("device"))
                .key_fields(&["device"]),
            provider,
        );
        registry
    }

    fn server(registry: &TypeRegistry, name: &str, size: i64) -> Entity {
        let mut entity = Entity::new(registry.schema("test::server").unwrap(), name);
        entity.set_field("size", FieldValue::Scalar(Value::Int(size)));
        entity.mark_configured("size");
        entity
    }

    fn with_disk(mut entity: Entity, registry: &TypeRegistry, device: &str) -> Entity {
        let mut disk = Entity::new(registry.schema("test::disk").unwrap(), "disk");
        disk.set_field("device", FieldValue::Scalar(Value::from(device)));
        disk.mark_configured("device");
        entity.set_field("disk", FieldValue::EntityList(vec![disk]));
        entity.mark_configured("disk");
        entity
    }

    fn run(diff: &Diff, registry: &TypeRegistry, state: &mut StateTracker) -> Result<()> {
        let backend = NullStateBackend;
        let mut listener = NullListener;
        let mut cx = ExecuteContext {
            registry,
            state,
            backend: &backend,
            listener: &mut listener,
            root: None,
        };
        diff.execute(&mut cx)
    }

    #[test]
    fn test_parent_created_before_children_and_deleted_after() {
        let log = Rc::new(Log::default());
        let registry = registry_with(&log, None);

        let old = with_disk(server(&registry, "old", 1), &registry, "sda");
        let new = with_disk(server(&registry, "new", 1), &registry, "sdb");

        let diff = Diff::between(std::slice::from_ref(&old), std::slice::from_ref(&new));
        let mut state = StateTracker::new();
        state.put("main.strato", old.clone());

        run(&diff, &registry, &mut state).unwrap();

        assert_eq!(
            log.take(),
            vec![
                "create test::server::new",
                "create sdb",
                "delete sda",
                "delete test::server::old",
            ]
        );
    }

    #[test]
    fn test_update_receives_changed_fields() {
        let log = Rc::new(Log::default());
        let registry = registry_with(&log, None);

        let diff = Diff::between(
            &[server(&registry, "a", 1)],
            &[server(&registry, "a", 2)],
        );

        let mut state = StateTracker::new();
        run(&diff, &registry, &mut state).unwrap();

        assert_eq!(log.take(), vec!["update test::server::a [size]"]);
    }

    #[test]
    fn test_side_effects_run_at_most_once() {
        let log = Rc::new(Log::default());
        let registry = registry_with(&log, None);

        let diff = Diff::between(&[], &[server(&registry, "a", 1)]);
        let mut state = StateTracker::new();

        run(&diff, &registry, &mut state).unwrap();
        run(&diff, &registry, &mut state).unwrap();

        assert_eq!(log.take(), vec!["create test::server::a"]);
    }

    #[test]
    fn test_state_is_persisted_after_every_side_effect() {
        let log = Rc::new(Log::default());
        let registry = registry_with(&log, None);

        let diff = Diff::between(
            &[],
            &[server(&registry, "a", 1), server(&registry, "b", 1)],
        );

        let backend = CountingBackend {
            saves: RefCell::new(0),
        };
        let mut state = StateTracker::new();
        let mut listener = NullListener;
        let mut cx = ExecuteContext {
            registry: &registry,
            state: &mut state,
            backend: &backend,
            listener: &mut listener,
            root: None,
        };

        diff.execute(&mut cx).unwrap();
        assert_eq!(*backend.saves.borrow(), 2);
    }

    #[test]
    fn test_failure_keeps_completed_work_in_state() {
        let log = Rc::new(Log::default());
        let registry = registry_with(&log, Some("test::server::b"));

        let diff = Diff::between(
            &[],
            &[server(&registry, "a", 1), server(&registry, "b", 1)],
        );

        let mut state = StateTracker::new();
        let error = run(&diff, &registry, &mut state).unwrap_err();

        assert!(matches!(error, Error::Execution { .. }));
        assert!(state.find_resource("test::server::a").is_some());
        assert!(state.find_resource("test::server::b").is_none());
    }

    #[test]
    fn test_replace_without_workflow_is_skipped_not_fatal() {
        struct SkipCounter {
            skipped: usize,
        }

        impl ExecutionListener for SkipCounter {
            fn on_replace_skipped(&mut self, _change: &Change) {
                self.skipped += 1;
            }
        }

        let log = Rc::new(Log::default());
        let registry = registry_with(&log, None);

        // 'kind' is not updatable: changing it forces a Replace.
        let mut current = server(&registry, "a", 1);
        current.set_field("kind", FieldValue::Scalar(Value::from("t1")));
        current.mark_configured("kind");
        let mut pending = server(&registry, "a", 1);
        pending.set_field("kind", FieldValue::Scalar(Value::from("t2")));
        pending.mark_configured("kind");

        let diff = Diff::between(&[current], &[pending]);
        assert_eq!(diff.changes[0].action, Action::Replace);

        let backend = NullStateBackend;
        let mut listener = SkipCounter { skipped: 0 };
        let mut state = StateTracker::new();
        let mut cx = ExecuteContext {
            registry: &registry,
            state: &mut state,
            backend: &backend,
            listener: &mut listener,
            root: None,
        };

        diff.execute(&mut cx).unwrap();

        assert_eq!(listener.skipped, 1);
        assert!(log.take().is_empty(), "no side effects for a skipped replace");
    }

    #[test]
    fn test_replace_delegates_to_registered_workflow() {
        struct Relabel {
            log: Rc<Log>,
        }

        impl crate::workflow::ReplaceWorkflow for Relabel {
            fn name(&self) -> &str {
                "relabel"
            }

            fn execute(
                &self,
                current: &Entity,
                pending: &mut Entity,
                _cx: &mut WorkflowContext<'_>,
            ) -> anyhow::Result<()> {
                self.log.push(format!(
                    "workflow {} -> {}",
                    current.primary_key(),
                    pending.primary_key()
                ));
                Ok(())
            }
        }

        let log = Rc::new(Log::default());
        let registry = registry_with(&log, None);

        let root = Scope::root();
        register_workflow(&root, "test::server", Rc::new(Relabel { log: Rc::clone(&log) }));

        let mut current = server(&registry, "a", 1);
        current.set_field("kind", FieldValue::Scalar(Value::from("t1")));
        current.mark_configured("kind");
        let mut pending = server(&registry, "a", 1);
        pending.set_field("kind", FieldValue::Scalar(Value::from("t2")));
        pending.mark_configured("kind");

        let diff = Diff::between(&[current], &[pending]);

        let backend = NullStateBackend;
        let mut listener = NullListener;
        let mut state = StateTracker::new();
        let mut cx = ExecuteContext {
            registry: &registry,
            state: &mut state,
            backend: &backend,
            listener: &mut listener,
            root: Some(root),
        };

        diff.execute(&mut cx).unwrap();

        assert_eq!(
            log.take(),
            vec!["workflow test::server::a -> test::server::a"]
        );
    }

    #[test]
    fn test_hooks_run_around_side_effects_in_order() {
        struct Tracing {
            name: &'static str,
            log: Rc<Log>,
        }

        impl ChangeHook for Tracing {
            fn before_create(&self, entity: &Entity) -> anyhow::Result<()> {
                self.log
                    .push(format!("{} before-create {}", self.name, entity.name()));
                Ok(())
            }

            fn after_create(&self, entity: &Entity) -> anyhow::Result<()> {
                self.log
                    .push(format!("{} after-create {}", self.name, entity.name()));
                Ok(())
            }
        }

        let log = Rc::new(Log::default());
        let registry = registry_with(&log, None);

        let root = Scope::root();
        register_hook(
            &root,
            Rc::new(Tracing {
                name: "first",
                log: Rc::clone(&log),
            }),
        );
        register_hook(
            &root,
            Rc::new(Tracing {
                name: "second",
                log: Rc::clone(&log),
            }),
        );

        let diff = Diff::between(&[], &[server(&registry, "a", 1)]);

        let backend = NullStateBackend;
        let mut listener = NullListener;
        let mut state = StateTracker::new();
        let mut cx = ExecuteContext {
            registry: &registry,
            state: &mut state,
            backend: &backend,
            listener: &mut listener,
            root: Some(root),
        };

        diff.execute(&mut cx).unwrap();

        assert_eq!(
            log.take(),
            vec![
                "first before-create a",
                "second before-create a",
                "create test::server::a",
                "first after-create a",
                "second after-create a",
            ]
        );
    }

    #[test]
    fn test_output_fields_written_by_create_reach_state() {
        let log = Rc::new(Log::default());
        let registry = registry_with(&log, None);

        let diff = Diff::between(&[], &[server(&registry, "a", 1)]);
        let mut state = StateTracker::new();
        run(&diff, &registry, &mut state).unwrap();

        let recorded = state.find_resource("test::server::a").unwrap();
        assert_eq!(
            recorded.scalar("id"),
            Some(&Value::from("id-test::server::a"))
        );
    }
}
