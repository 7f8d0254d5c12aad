//! Managed symlinks on the local machine

use super::scalar_str;
use anyhow::{Context as _, Result};
use std::fs;
use std::path::Path;
use strato_core::{Entity, ProviderContext, ResourceProvider};

pub struct SymlinkProvider;

fn create_link(link: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if link.is_symlink() {
        fs::remove_file(link)
            .with_context(|| format!("failed to remove existing symlink {}", link.display()))?;
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link).with_context(|| {
            format!(
                "failed to create symlink {} -> {}",
                link.display(),
                target.display()
            )
        })
    }

    #[cfg(not(unix))]
    {
        let _ = target;
        anyhow::bail!("symlink resources are only supported on unix")
    }
}

impl ResourceProvider for SymlinkProvider {
    fn refresh(&self, entity: &mut Entity, _cx: &ProviderContext<'_>) -> Result<bool> {
        let link = Path::new(scalar_str(entity, "link")?);
        Ok(link.is_symlink())
    }

    fn create(&self, entity: &mut Entity, _cx: &ProviderContext<'_>) -> Result<()> {
        let link = Path::new(scalar_str(entity, "link")?).to_path_buf();
        let target = Path::new(scalar_str(entity, "target")?).to_path_buf();
        create_link(&link, &target)
    }

    fn update(
        &self,
        _current: &Entity,
        pending: &mut Entity,
        changed: &[String],
        _cx: &ProviderContext<'_>,
    ) -> Result<()> {
        // Retargeting means removing and recreating the link.
        if changed.iter().any(|f| f == "target") {
            let link = Path::new(scalar_str(pending, "link")?).to_path_buf();
            let target = Path::new(scalar_str(pending, "target")?).to_path_buf();
            create_link(&link, &target)?;
        }

        Ok(())
    }

    fn delete(&self, entity: &Entity, _cx: &ProviderContext<'_>) -> Result<()> {
        let link = Path::new(scalar_str(entity, "link")?);

        if link.is_symlink() {
            fs::remove_file(link)
                .with_context(|| format!("failed to delete {}", link.display()))?;
        }

        Ok(())
    }
}
