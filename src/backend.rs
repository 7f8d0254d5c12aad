//! Local filesystem state backend
//!
//! Recorded state is one JSON document per source file, written under the
//! project's state directory. The format is private to this backend; the
//! engine only sees the `StateBackend` trait.

use anyhow::{anyhow, bail, Context as _, Result};
use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{json, Map, Value as Json};
use std::fs;
use std::path::PathBuf;
use strato_core::{Entity, FieldValue, StateBackend, StateTracker, TypeRegistry};
use strato_lang::Value;

pub struct LocalStateBackend {
    dir: PathBuf,
}

impl LocalStateBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn document_path(&self, file: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file.replace('/', "__")))
    }
}

impl StateBackend for LocalStateBackend {
    fn load(&self, registry: &TypeRegistry) -> Result<StateTracker> {
        let mut tracker = StateTracker::new();

        if !self.dir.exists() {
            return Ok(tracker);
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();

        paths.sort();

        for path in paths {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let doc: Json = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;

            let file = doc
                .get("file")
                .and_then(Json::as_str)
                .ok_or_else(|| anyhow!("state document {} has no file", path.display()))?
                .to_string();

            tracker.ensure_file(&file);

            for resource in doc
                .get("resources")
                .and_then(Json::as_array)
                .into_iter()
                .flatten()
            {
                tracker.put(&file, entity_from_doc(resource, registry)?);
            }

            log::debug!("loaded state for {} from {}", file, path.display());
        }

        Ok(tracker)
    }

    fn save(&self, state: &StateTracker) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        for (file, file_state) in state.files() {
            let path = self.document_path(file);

            if file_state.resources.is_empty() {
                if path.exists() {
                    fs::remove_file(&path)
                        .with_context(|| format!("failed to delete {}", path.display()))?;
                }
                continue;
            }

            let doc = json!({
                "file": file,
                "saved_at": Utc::now().to_rfc3339(),
                "resources": file_state
                    .resources
                    .values()
                    .map(entity_to_doc)
                    .collect::<Vec<_>>(),
            });

            let content = serde_json::to_string_pretty(&doc)?;
            fs::write(&path, content)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------
// Entity <-> JSON document conversion
// ----------------------------------------------------------------------

fn entity_to_doc(entity: &Entity) -> Json {
    let mut fields = Map::new();

    for (name, value) in entity.fields() {
        let encoded = match value {
            FieldValue::Scalar(value) => value_to_json(value),
            FieldValue::Entity(child) => json!({ "@entity": entity_to_doc(child) }),
            FieldValue::EntityList(children) => {
                json!({ "@entities": children.iter().map(entity_to_doc).collect::<Vec<_>>() })
            }
        };

        fields.insert(name.to_string(), encoded);
    }

    json!({
        "type": entity.type_name(),
        "name": entity.name(),
        "key-name": entity.key_name(),
        "parent": entity.parent(),
        "configured": entity.configured().iter().collect::<Vec<_>>(),
        "fields": fields,
    })
}

fn entity_from_doc(doc: &Json, registry: &TypeRegistry) -> Result<Entity> {
    let type_name = doc
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| anyhow!("state entity has no type"))?;

    let Some(schema) = registry.schema(type_name) else {
        bail!("state references unknown resource type '{type_name}'");
    };

    let name = doc.get("name").and_then(Json::as_str).unwrap_or_default();
    let mut entity = Entity::new(schema, name);

    entity.set_key_name(
        doc.get("key-name")
            .and_then(Json::as_str)
            .map(ToString::to_string),
    );
    entity.set_parent(
        doc.get("parent")
            .and_then(Json::as_str)
            .map(ToString::to_string),
    );

    for configured in doc
        .get("configured")
        .and_then(Json::as_array)
        .into_iter()
        .flatten()
        .filter_map(Json::as_str)
    {
        entity.mark_configured(configured);
    }

    for (name, value) in doc
        .get("fields")
        .and_then(Json::as_object)
        .into_iter()
        .flatten()
    {
        let decoded = if let Some(child) = value.get("@entity") {
            FieldValue::Entity(entity_from_doc(child, registry)?)
        } else if let Some(children) = value.get("@entities").and_then(Json::as_array) {
            FieldValue::EntityList(
                children
                    .iter()
                    .map(|c| entity_from_doc(c, registry))
                    .collect::<Result<Vec<_>>>()?,
            )
        } else {
            FieldValue::Scalar(json_to_value(value))
        };

        entity.set_field(name, decoded);
    }

    Ok(entity)
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(n) => json!(n),
        Value::Float(n) => json!(n),
        Value::String(s) => json!(s),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::Ref(address) => json!({ "@ref": address }),
    }
}

fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => n
            .as_i64()
            .map_or_else(|| Value::Float(n.as_f64().unwrap_or_default()), Value::Int),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        Json::Object(entries) => {
            if let Some(address) = entries.get("@ref").and_then(Json::as_str) {
                if entries.len() == 1 {
                    return Value::Ref(address.to_string());
                }
            }

            Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), json_to_value(v)))
                    .collect::<IndexMap<_, _>>(),
            )
        }
    }
}
