//! Built-in local resource providers
//!
//! These manage resources on the local machine; cloud providers plug into
//! the same `ResourceProvider` boundary.

pub mod file;
pub mod symlink;

use anyhow::{anyhow, Result};
use std::rc::Rc;
use strato_core::{Entity, EntityType, FieldSchema, TypeRegistry};
use strato_lang::Value;

/// The type registry with every built-in provider attached.
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();

    registry.register_with_provider(
        EntityType::root("local::file")
            .field(FieldSchema::scalar("path").required())
            .field(FieldSchema::scalar("content").updatable())
            .id_field("path"),
        Rc::new(file::FileProvider),
    );

    registry.register_with_provider(
        EntityType::root("local::symlink")
            .field(FieldSchema::scalar("link").required())
            .field(FieldSchema::scalar("target").required().updatable())
            .id_field("link"),
        Rc::new(symlink::SymlinkProvider),
    );

    registry
}

/// A required string field, as providers read them.
pub(crate) fn scalar_str<'a>(entity: &'a Entity, field: &str) -> Result<&'a str> {
    entity
        .scalar(field)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("{} requires a string '{}' field", entity.label(), field))
}
