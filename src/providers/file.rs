//! Managed plain files on the local machine

use super::scalar_str;
use anyhow::{Context as _, Result};
use std::fs;
use std::path::Path;
use strato_core::{Entity, FieldValue, ProviderContext, ResourceProvider};
use strato_lang::Value;

pub struct FileProvider;

impl FileProvider {
    fn write(&self, entity: &Entity) -> Result<()> {
        let path = Path::new(scalar_str(entity, "path")?);
        let content = entity
            .scalar("content")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }
}

impl ResourceProvider for FileProvider {
    fn refresh(&self, entity: &mut Entity, _cx: &ProviderContext<'_>) -> Result<bool> {
        let path = Path::new(scalar_str(entity, "path")?).to_path_buf();

        if !path.exists() {
            return Ok(false);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        entity.set_field("content", FieldValue::Scalar(Value::String(content)));

        Ok(true)
    }

    fn create(&self, entity: &mut Entity, _cx: &ProviderContext<'_>) -> Result<()> {
        self.write(entity)
    }

    fn update(
        &self,
        _current: &Entity,
        pending: &mut Entity,
        changed: &[String],
        _cx: &ProviderContext<'_>,
    ) -> Result<()> {
        if changed.iter().any(|f| f == "content") {
            self.write(pending)?;
        }

        Ok(())
    }

    fn delete(&self, entity: &Entity, _cx: &ProviderContext<'_>) -> Result<()> {
        let path = Path::new(scalar_str(entity, "path")?);

        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("failed to delete {}", path.display()))?;
        }

        Ok(())
    }
}
