//! Recorded state: which entities currently exist, partitioned by the
//! source file that declared them
//!
//! The tracker is updated and persisted after every successful side effect,
//! so an interrupted run loses at most the operation that was in flight.
//! Root resources are addressed `type::name`; a subresource has no address
//! of its own and is located through the owning parent's field value.

use crate::diff::{Action, Change};
use crate::entity::{Entity, FieldValue};
use crate::schema::TypeRegistry;
use anyhow::Result as AnyResult;
use indexmap::IndexMap;

/// Fallback partition for entities that can't be attributed to a file
const DEFAULT_FILE: &str = "main.strato";

/// The entities recorded for one source file
#[derive(Debug, Default)]
pub struct FileState {
    /// `type::name` -> entity, in recorded order
    pub resources: IndexMap<String, Entity>,
}

#[derive(Debug, Default)]
pub struct StateTracker {
    files: IndexMap<String, FileState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a partition exists for `file`, so files whose resources
    /// were all deleted still round-trip.
    pub fn ensure_file(&mut self, file: &str) {
        self.files.entry(file.to_string()).or_default();
    }

    /// Record a root entity under its address, used when loading.
    pub fn put(&mut self, file: &str, entity: Entity) {
        let key = entity.primary_key();
        self.files
            .entry(file.to_string())
            .or_default()
            .resources
            .insert(key, entity);
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &FileState)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.files.values().all(|f| f.resources.is_empty())
    }

    /// All recorded root entities, in file order then recorded order.
    pub fn resources(&self) -> impl Iterator<Item = &Entity> {
        self.files.values().flat_map(|f| f.resources.values())
    }

    pub fn find_resource(&self, key: &str) -> Option<&Entity> {
        self.files.values().find_map(|f| f.resources.get(key))
    }

    /// Drop a root entity from every partition, e.g. after a refresh
    /// discovered it no longer exists.
    pub fn remove_resource(&mut self, key: &str) {
        for file in self.files.values_mut() {
            file.resources.shift_remove(key);
        }
    }

    /// Record the outcome of an executed change.
    ///
    /// Replace is recorded by its substitute workflow's own steps; deletes
    /// remove the entity (or detach a subresource from its parent);
    /// everything else upserts the post-execution entity.
    pub fn update(&mut self, change: &Change) {
        if change.action == Action::Replace {
            return;
        }

        let entity = match change.action {
            Action::Delete => change.current.as_ref(),
            _ => change.pending.as_ref(),
        };

        let Some(entity) = entity else {
            return;
        };

        // Nested entities without their own lifecycle are recorded as part
        // of the owning entity's value.
        if !entity.schema().is_managed() {
            return;
        }

        if change.action == Action::Delete {
            self.remove(entity);
        } else {
            self.upsert(entity);
        }
    }

    fn remove(&mut self, entity: &Entity) {
        if entity.schema().is_root() {
            let key = entity.primary_key();
            for file in self.files.values_mut() {
                file.resources.shift_remove(&key);
            }
            return;
        }

        let Some(parent_key) = entity.parent().map(ToString::to_string) else {
            log::warn!(
                "can't remove subresource '{}' without a parent address",
                entity.label()
            );
            return;
        };

        for file in self.files.values_mut() {
            if let Some(parent) = file.resources.get_mut(&parent_key) {
                update_subresource(parent, entity, true);
            }
        }
    }

    fn upsert(&mut self, entity: &Entity) {
        if entity.schema().is_root() {
            let key = entity.primary_key();
            let file = self.target_file(entity, &key);

            // A resource that moved between files leaves its old partition.
            for (path, state) in &mut self.files {
                if *path != file {
                    state.resources.shift_remove(&key);
                }
            }

            self.files
                .entry(file)
                .or_default()
                .resources
                .insert(key, entity.clone());
            return;
        }

        let Some(parent_key) = entity.parent().map(ToString::to_string) else {
            log::warn!(
                "can't record subresource '{}' without a parent address",
                entity.label()
            );
            return;
        };

        for file in self.files.values_mut() {
            if let Some(parent) = file.resources.get_mut(&parent_key) {
                update_subresource(parent, entity, false);
            }
        }
    }

    /// The partition a root entity belongs to: its declaring file, else
    /// wherever it is already recorded, else the default.
    fn target_file(&self, entity: &Entity, key: &str) -> String {
        if let Some(file) = entity.file() {
            return file;
        }

        self.files
            .iter()
            .find(|(_, state)| state.resources.contains_key(key))
            .map_or_else(|| DEFAULT_FILE.to_string(), |(path, _)| path.clone())
    }
}

/// Upsert or detach a subresource inside its parent's field value.
fn update_subresource(parent: &mut Entity, sub: &Entity, delete: bool) {
    let field_name = sub.name().to_string();

    let Some(field) = parent.schema().field(&field_name).cloned() else {
        log::warn!(
            "parent '{}' has no '{}' field for subresource '{}'",
            parent.label(),
            field_name,
            sub.label()
        );
        return;
    };

    if field.is_collection() {
        match parent.field_mut(&field_name) {
            Some(FieldValue::EntityList(list)) => {
                if delete {
                    list.retain(|e| e.primary_key() != sub.primary_key());
                } else {
                    match list.iter_mut().find(|e| e.primary_key() == sub.primary_key()) {
                        Some(existing) => *existing = sub.clone(),
                        None => list.push(sub.clone()),
                    }
                }
            }
            _ if !delete => {
                parent.set_field(&field_name, FieldValue::EntityList(vec![sub.clone()]));
            }
            _ => {}
        }
    } else if delete {
        parent.remove_field(&field_name);
    } else {
        parent.set_field(&field_name, FieldValue::Entity(sub.clone()));
    }
}

/// Opaque persistence for recorded state
pub trait StateBackend {
    fn load(&self, registry: &TypeRegistry) -> AnyResult<StateTracker>;
    fn save(&self, state: &StateTracker) -> AnyResult<()>;
}

/// Backend that persists nothing; used for plan-only runs and tests.
pub struct NullStateBackend;

impl StateBackend for NullStateBackend {
    fn load(&self, _registry: &TypeRegistry) -> AnyResult<StateTracker> {
        Ok(StateTracker::new())
    }

    fn save(&self, _state: &StateTracker) -> AnyResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Diff;
    use crate::schema::{EntityType, FieldSchema, TypeRegistry};
    use std::rc::Rc;
    use strato_lang::Value;

    struct NoopProvider;

    impl crate::provider::ResourceProvider for NoopProvider {
        fn refresh(
            &self,
            _entity: &mut Entity,
            _cx: &crate::provider::ProviderContext<'_>,
        ) -> AnyResult<bool> {
            Ok(true)
        }

        fn create(
            &self,
            _entity: &mut Entity,
            _cx: &crate::provider::ProviderContext<'_>,
        ) -> AnyResult<()> {
            Ok(())
        }

        fn update(
            &self,
            _current: &Entity,
            _pending: &mut Entity,
            _changed: &[String],
            _cx: &crate::provider::ProviderContext<'_>,
        ) -> AnyResult<()> {
            Ok(())
        }

        fn delete(
            &self,
            _entity: &Entity,
            _cx: &crate::provider::ProviderContext<'_>,
        ) -> AnyResult<()> {
            Ok(())
        }
    }

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        let provider = Rc::new(NoopProvider);
        registry.register_with_provider(
            EntityType::root("test::server")
                .field(FieldSchema::scalar("size").updatable())
                .field(FieldSchema::entity_list("disk", "test::disk")),
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

    fn server(registry: &TypeRegistry, name: &str) -> Entity {
        Entity::new(registry.schema("test::server").unwrap(), name)
    }

    fn disk(registry: &TypeRegistry, device: &str) -> Entity {
        let mut disk = Entity::new(registry.schema("test::disk").unwrap(), "disk");
        disk.set_field("device", FieldValue::Scalar(Value::from(device)));
        disk.mark_configured("device");
        disk.set_parent(Some("test::server::web".into()));
        disk
    }

    #[test]
    fn test_root_create_and_delete_round_trip() {
        let registry = registry();
        let mut tracker = StateTracker::new();

        let diff = Diff::between(&[], &[server(&registry, "web")]);
        tracker.update(&diff.changes[0]);
        assert!(tracker.find_resource("test::server::web").is_some());

        let diff = Diff::between(&[server(&registry, "web")], &[]);
        tracker.update(&diff.changes[0]);
        assert!(tracker.find_resource("test::server::web").is_none());
    }

    #[test]
    fn test_subresource_upsert_appends_then_replaces() {
        let registry = registry();
        let mut tracker = StateTracker::new();
        tracker.put(DEFAULT_FILE, server(&registry, "web"));

        // Append.
        let diff = Diff::between(&[], &[disk(&registry, "sda")]);
        tracker.update(&diff.changes[0]);

        let parent = tracker.find_resource("test::server::web").unwrap();
        let Some(FieldValue::EntityList(disks)) = parent.field("disk") else {
            panic!("expected disk list");
        };
        assert_eq!(disks.len(), 1);

        // Upsert in place, not append.
        let diff = Diff::between(&[], &[disk(&registry, "sda")]);
        tracker.update(&diff.changes[0]);

        let parent = tracker.find_resource("test::server::web").unwrap();
        let Some(FieldValue::EntityList(disks)) = parent.field("disk") else {
            panic!("expected disk list");
        };
        assert_eq!(disks.len(), 1);
    }

    #[test]
    fn test_subresource_delete_detaches_from_parent() {
        let registry = registry();
        let mut tracker = StateTracker::new();

        let mut parent = server(&registry, "web");
        parent.set_field("disk", FieldValue::EntityList(vec![disk(&registry, "sda")]));
        tracker.put(DEFAULT_FILE, parent);

        let diff = Diff::between(&[disk(&registry, "sda")], &[]);
        tracker.update(&diff.changes[0]);

        let parent = tracker.find_resource("test::server::web").unwrap();
        let Some(FieldValue::EntityList(disks)) = parent.field("disk") else {
            panic!("expected disk list");
        };
        assert!(disks.is_empty());
    }

    #[test]
    fn test_replace_changes_are_not_recorded() {
        let registry = registry();
        let mut tracker = StateTracker::new();

        let mut current = server(&registry, "web");
        current.set_field("size", FieldValue::Scalar(Value::Int(1)));
        current.mark_configured("size");
        tracker.put(DEFAULT_FILE, current.clone());

        let change = Change {
            action: Action::Replace,
            current: Some(current),
            pending: Some(server(&registry, "web")),
            changed_fields: vec!["size".into()],
            sub_diffs: Vec::new(),
            executed: std::sync::atomic::AtomicBool::new(false),
        };

        tracker.update(&change);
        let recorded = tracker.find_resource("test::server::web").unwrap();
        assert_eq!(recorded.scalar("size"), Some(&Value::Int(1)));
    }
}
