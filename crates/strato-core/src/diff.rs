//! Structural diff between current and pending entity collections
//!
//! Matching is by primary key in pending order, with unclaimed current
//! entities becoming deletes. Matched pairs classify per field schema:
//! nested-entity fields recurse into sub-diffs, scalar fields feed the
//! changed set, and a single non-updatable changed field forces Replace.

use crate::entity::{Entity, FieldValue};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Replace,
    Keep,
    Delete,
}

impl Action {
    pub fn is_keep(self) -> bool {
        self == Self::Keep
    }
}

/// A classified difference for one entity, with sub-diffs for its
/// nested-entity fields
#[derive(Debug)]
pub struct Change {
    pub action: Action,
    pub current: Option<Entity>,
    pub pending: Option<Entity>,
    /// Names of the scalar fields whose values differ (Update/Replace)
    pub changed_fields: Vec<String>,
    pub sub_diffs: Vec<ChildDiff>,
    /// At-most-once execution guard
    pub(crate) executed: AtomicBool,
}

/// The sub-diff of one nested-entity field
#[derive(Debug)]
pub struct ChildDiff {
    pub field: String,
    pub diff: Diff,
}

impl Change {
    fn new(
        action: Action,
        current: Option<Entity>,
        pending: Option<Entity>,
        changed_fields: Vec<String>,
        sub_diffs: Vec<ChildDiff>,
    ) -> Self {
        Self {
            action,
            current,
            pending,
            changed_fields,
            sub_diffs,
            executed: AtomicBool::new(false),
        }
    }

    /// The entity this change acts on: pending where available, otherwise
    /// the current one being deleted.
    pub fn entity(&self) -> &Entity {
        self.pending
            .as_ref()
            .or(self.current.as_ref())
            .expect("a change references at least one entity")
    }

    /// Marks the change executed; returns false if it already was.
    pub(crate) fn begin_execution(&self) -> bool {
        !self.executed.swap(true, Ordering::SeqCst)
    }

    pub fn was_executed(&self) -> bool {
        self.executed.load(Ordering::SeqCst)
    }
}

/// An ordered list of sibling changes
#[derive(Debug, Default)]
pub struct Diff {
    pub changes: Vec<Change>,
}

impl Diff {
    /// Diff two sibling collections. Either side may be empty, meaning
    /// "none exist" / "none desired".
    pub fn between(current: &[Entity], pending: &[Entity]) -> Self {
        let mut current: Vec<Entity> = current.to_vec();
        let mut pending: Vec<Entity> = pending.to_vec();

        for entity in current.iter_mut().chain(pending.iter_mut()) {
            entity.update_children();
        }

        let mut current_by_key: IndexMap<String, Entity> = current
            .into_iter()
            .map(|e| (e.primary_key(), e))
            .collect();

        let mut changes = Vec::new();

        for entity in pending {
            let change = match current_by_key.shift_remove(&entity.primary_key()) {
                Some(matched) => Self::classify(matched, entity),
                None => Self::new_create(entity),
            };
            changes.push(change);
        }

        for leftover in current_by_key.into_values() {
            changes.push(Self::new_delete(leftover));
        }

        Self { changes }
    }

    /// Whether anything in this diff tree is not a Keep.
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| !c.action.is_keep())
            || self
                .changes
                .iter()
                .any(|c| c.sub_diffs.iter().any(|d| d.diff.has_changes()))
    }

    fn new_create(entity: Entity) -> Change {
        let sub_diffs = nested_fields(&entity)
            .into_iter()
            .filter_map(|field| {
                let diff = match entity.field(&field) {
                    Some(FieldValue::Entity(child)) => {
                        Self::between(&[], std::slice::from_ref(child))
                    }
                    Some(FieldValue::EntityList(children)) => Self::between(&[], children),
                    _ => return None,
                };
                Some(ChildDiff { field, diff })
            })
            .collect();

        Change::new(Action::Create, None, Some(entity), Vec::new(), sub_diffs)
    }

    fn new_delete(entity: Entity) -> Change {
        let sub_diffs = nested_fields(&entity)
            .into_iter()
            .filter_map(|field| {
                let diff = match entity.field(&field) {
                    Some(FieldValue::Entity(child)) => {
                        Self::between(std::slice::from_ref(child), &[])
                    }
                    Some(FieldValue::EntityList(children)) => Self::between(children, &[]),
                    _ => return None,
                };
                Some(ChildDiff { field, diff })
            })
            .collect();

        Change::new(Action::Delete, Some(entity), None, Vec::new(), sub_diffs)
    }

    fn classify(current: Entity, pending: Entity) -> Change {
        let mut sub_diffs: Vec<ChildDiff> = Vec::new();

        for field in nested_fields(&pending) {
            // A nested field configured on neither side was auto-populated;
            // leave it alone.
            if !current.is_configured(&field) && !pending.is_configured(&field) {
                continue;
            }

            let diff = match (current.field(&field), pending.field(&field)) {
                (Some(FieldValue::EntityList(c)), Some(FieldValue::EntityList(p))) => {
                    Self::between(c, p)
                }
                (Some(FieldValue::EntityList(c)), None) => Self::between(c, &[]),
                (None, Some(FieldValue::EntityList(p))) => Self::between(&[], p),
                (Some(FieldValue::Entity(c)), Some(FieldValue::Entity(p))) => {
                    Self::between(std::slice::from_ref(c), std::slice::from_ref(p))
                }
                (Some(FieldValue::Entity(c)), None) => Self::between(std::slice::from_ref(c), &[]),
                (None, Some(FieldValue::Entity(p))) => Self::between(&[], std::slice::from_ref(p)),
                _ => continue,
            };

            sub_diffs.push(ChildDiff { field, diff });
        }

        let mut changed_fields = changed_scalar_fields(&current, &pending);

        // Changes to nested entities without a lifecycle of their own are
        // applied through the owning entity's update, so their field joins
        // the changed set and its updatable flag decides Update vs Replace.
        for child in &sub_diffs {
            let folds = child.diff.changes.iter().any(|c| {
                !c.action.is_keep() && !c.entity().schema().is_managed()
            });

            if folds && !changed_fields.contains(&child.field) {
                changed_fields.push(child.field.clone());
            }
        }

        let action = if changed_fields.is_empty()
            && sub_diffs.iter().all(|d| !d.diff.has_changes())
        {
            Action::Keep
        } else if changed_fields
            .iter()
            .all(|name| {
                pending
                    .schema()
                    .field(name)
                    .is_some_and(|f| f.is_updatable())
            })
        {
            Action::Update
        } else {
            Action::Replace
        };

        Change::new(
            action,
            Some(current),
            Some(pending),
            changed_fields,
            sub_diffs,
        )
    }
}

fn nested_fields(entity: &Entity) -> Vec<String> {
    entity
        .schema()
        .fields()
        .iter()
        .filter(|f| f.is_diffable())
        .map(|f| f.name().to_string())
        .collect()
}

fn changed_scalar_fields(current: &Entity, pending: &Entity) -> Vec<String> {
    let mut changed = Vec::new();

    for field in pending.schema().fields() {
        // Nested entities are handled by the sub-diffs.
        if field.is_diffable() {
            continue;
        }

        // Provider-computed values drift on their own; never compare them.
        if field.is_output() {
            continue;
        }

        let name = field.name();

        // Absent on the pending side and never configured on either: the
        // value was auto-populated by a prior run, keep it as is.
        if !current.is_configured(name) && !pending.is_configured(name) {
            continue;
        }

        if current.field(name) != pending.field(name) {
            changed.push(name.to_string());
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityType, FieldSchema, TypeRegistry};
    use strato_lang::Value;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register(
            EntityType::root("test::server")
                .field(FieldSchema::scalar("size").updatable())
                .field(FieldSchema::scalar("kind"))
                .field(FieldSchema::entity_list("tag", "test::tag")),
        );
        registry.register(
            EntityType::subresource("test::tag")
                .field(FieldSchema::scalar("key"))
                .field(FieldSchema::scalar("value").updatable())
                .key_fields(&["key"]),
        );
        registry
    }

    fn server(registry: &TypeRegistry, name: &str, size: i64, kind: &str) -> Entity {
        let mut entity = Entity::new(registry.schema("test::server").unwrap(), name);
        entity.set_field("size", FieldValue::Scalar(Value::Int(size)));
        entity.set_field("kind", FieldValue::Scalar(Value::from(kind)));
        entity.mark_configured("size");
        entity.mark_configured("kind");
        entity
    }

    fn tag(registry: &TypeRegistry, key: &str, value: &str) -> Entity {
        let mut entity = Entity::new(registry.schema("test::tag").unwrap(), "tag");
        entity.set_field("key", FieldValue::Scalar(Value::from(key)));
        entity.set_field("value", FieldValue::Scalar(Value::from(value)));
        entity.mark_configured("key");
        entity.mark_configured("value");
        entity
    }

    #[test]
    fn test_create_when_no_current() {
        let registry = registry();
        let diff = Diff::between(&[], &[server(&registry, "a", 1, "t1")]);

        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].action, Action::Create);
        assert!(diff.changes[0].changed_fields.is_empty());
    }

    #[test]
    fn test_updatable_field_yields_update() {
        let registry = registry();
        let diff = Diff::between(
            &[server(&registry, "a", 1, "t1")],
            &[server(&registry, "a", 2, "t1")],
        );

        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].action, Action::Update);
        assert_eq!(diff.changes[0].changed_fields, vec!["size"]);
    }

    #[test]
    fn test_non_updatable_field_yields_replace() {
        let registry = registry();
        let diff = Diff::between(
            &[server(&registry, "a", 1, "t1")],
            &[server(&registry, "a", 1, "t2")],
        );

        assert_eq!(diff.changes[0].action, Action::Replace);
        assert_eq!(diff.changes[0].changed_fields, vec!["kind"]);
    }

    #[test]
    fn test_mixed_changes_yield_replace() {
        let registry = registry();
        let diff = Diff::between(
            &[server(&registry, "a", 1, "t1")],
            &[server(&registry, "a", 2, "t2")],
        );

        assert_eq!(diff.changes[0].action, Action::Replace);
        assert_eq!(diff.changes[0].changed_fields.len(), 2);
    }

    #[test]
    fn test_identical_collections_keep_at_every_level() {
        let registry = registry();

        let mut a = server(&registry, "a", 1, "t1");
        a.set_field(
            "tag",
            FieldValue::EntityList(vec![tag(&registry, "env", "prod")]),
        );
        a.mark_configured("tag");

        let diff = Diff::between(std::slice::from_ref(&a), std::slice::from_ref(&a));

        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].action, Action::Keep);
        assert!(!diff.has_changes());

        let tag_diff = &diff.changes[0].sub_diffs[0].diff;
        assert!(tag_diff.changes.iter().all(|c| c.action.is_keep()));
    }

    #[test]
    fn test_unclaimed_current_becomes_delete_in_order() {
        let registry = registry();
        let diff = Diff::between(
            &[server(&registry, "a", 1, "t1"), server(&registry, "b", 1, "t1")],
            &[server(&registry, "b", 1, "t1")],
        );

        assert_eq!(diff.changes.len(), 2);
        assert_eq!(diff.changes[0].action, Action::Keep);
        assert_eq!(diff.changes[1].action, Action::Delete);
        assert_eq!(diff.changes[1].entity().name(), "a");
    }

    #[test]
    fn test_nested_change_folds_into_parent_changed_set() {
        let registry = registry();

        let mut current = server(&registry, "a", 1, "t1");
        current.set_field(
            "tag",
            FieldValue::EntityList(vec![tag(&registry, "env", "prod")]),
        );
        current.mark_configured("tag");

        let mut pending = server(&registry, "a", 1, "t1");
        pending.set_field(
            "tag",
            FieldValue::EntityList(vec![tag(&registry, "env", "staging")]),
        );
        pending.mark_configured("tag");

        let diff = Diff::between(&[current], &[pending]);
        let change = &diff.changes[0];

        // The tag type is unmanaged, so its change is applied through the
        // server's update: tag joins the changed set, and because the tag
        // field itself is not updatable, the server must be replaced.
        assert_eq!(change.action, Action::Replace);
        assert!(change.changed_fields.contains(&"tag".to_string()));

        let tag_diff = &change.sub_diffs[0].diff;
        assert_eq!(tag_diff.changes[0].action, Action::Update);
        assert_eq!(tag_diff.changes[0].changed_fields, vec!["value"]);
    }

    #[test]
    fn test_unconfigured_absent_field_is_skipped() {
        let registry = registry();

        // Current has a size that was auto-populated (never configured);
        // pending doesn't mention it: not a change.
        let mut current = Entity::new(registry.schema("test::server").unwrap(), "a");
        current.set_field("size", FieldValue::Scalar(Value::Int(4)));
        current.set_field("kind", FieldValue::Scalar(Value::from("t1")));
        current.mark_configured("kind");

        let mut pending = Entity::new(registry.schema("test::server").unwrap(), "a");
        pending.set_field("kind", FieldValue::Scalar(Value::from("t1")));
        pending.mark_configured("kind");

        let diff = Diff::between(&[current], &[pending]);
        assert_eq!(diff.changes[0].action, Action::Keep);
    }

    #[test]
    fn test_intentional_clear_is_a_change() {
        let registry = registry();

        // size was configured before; pending drops it: that's a change.
        let mut current = Entity::new(registry.schema("test::server").unwrap(), "a");
        current.set_field("size", FieldValue::Scalar(Value::Int(4)));
        current.mark_configured("size");

        let pending = Entity::new(registry.schema("test::server").unwrap(), "a");

        let diff = Diff::between(&[current], &[pending]);
        assert_eq!(diff.changes[0].action, Action::Update);
        assert_eq!(diff.changes[0].changed_fields, vec!["size"]);
    }

    #[test]
    fn test_execution_guard_flips_once() {
        let registry = registry();
        let diff = Diff::between(&[], &[server(&registry, "a", 1, "t1")]);

        let change = &diff.changes[0];
        assert!(change.begin_execution());
        assert!(!change.begin_execution());
        assert!(change.was_executed());
    }
}
