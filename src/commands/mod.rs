pub mod apply;
pub mod plan;

use crate::backend::LocalStateBackend;
use crate::config::Config;
use crate::providers;
use anyhow::{Context as _, Result};
use std::path::Path;
use strato_core::{
    Entity, ProviderContext, Resolution, Resolver, StateBackend, StateTracker, TypeRegistry,
};

/// Everything a plan or apply run works with
pub(crate) struct Run {
    pub registry: TypeRegistry,
    pub backend: LocalStateBackend,
    pub state: StateTracker,
    pub resolution: Resolution,
}

/// Load configuration and recorded state, then resolve the pending graph
/// against it.
pub(crate) fn prepare(dir: &Path, refresh: bool) -> Result<Run> {
    let config = Config::load(dir)?;
    let sources = config.load_sources()?;

    let registry = providers::registry();
    let backend = LocalStateBackend::new(&config.state_dir);

    let mut state = backend
        .load(&registry)
        .context("failed to load recorded state")?;

    if refresh {
        refresh_state(&mut state, &registry)?;
    }

    let resolution = Resolver::new(&registry)
        .with_current(&state)
        .resolve(&sources)?;
    resolution.validate()?;

    Ok(Run {
        registry,
        backend,
        state,
        resolution,
    })
}

/// Re-read every recorded entity from its provider, dropping the ones that
/// no longer exist.
fn refresh_state(state: &mut StateTracker, registry: &TypeRegistry) -> Result<()> {
    let mut refreshed: Vec<(String, String, Option<Entity>)> = Vec::new();

    for (file, file_state) in state.files() {
        for (key, entity) in &file_state.resources {
            let Some(provider) = registry.provider(entity.type_name()) else {
                continue;
            };

            let mut copy = entity.clone();
            let found = provider
                .refresh(
                    &mut copy,
                    &ProviderContext {
                        registry,
                        state: &*state,
                    },
                )
                .with_context(|| format!("failed to refresh {}", entity.label()))?;

            refreshed.push((file.to_string(), key.clone(), found.then_some(copy)));
        }
    }

    for (file, key, entity) in refreshed {
        match entity {
            Some(entity) => {
                log::debug!("refreshed {key}");
                state.put(&file, entity);
            }
            None => {
                log::info!("{key} no longer exists, dropping from state");
                state.remove_resource(&key);
            }
        }
    }

    Ok(())
}
