//! The boundary between the engine and concrete resource implementations
//!
//! Each managed entity type plugs in one provider; the scheduler calls it
//! synchronously and commits state after every successful side effect.
//! Providers report failures as `anyhow` errors, which the scheduler wraps
//! into the run's execution-error taxonomy.

use crate::entity::Entity;
use crate::schema::TypeRegistry;
use crate::state::StateTracker;
use anyhow::Result;

/// Read-only context handed to provider operations, for dependency lookups
/// (e.g. resolving a subresource's parent).
pub struct ProviderContext<'a> {
    pub registry: &'a TypeRegistry,
    pub state: &'a StateTracker,
}

impl ProviderContext<'_> {
    /// The recorded entity a `type::name` address currently points at.
    pub fn find_current(&self, address: &str) -> Option<&Entity> {
        self.state.find_resource(address)
    }
}

/// Lifecycle operations of one entity type against its external API
pub trait ResourceProvider {
    /// Re-read the entity from the external API into `entity`; returns
    /// false when it no longer exists.
    fn refresh(&self, entity: &mut Entity, cx: &ProviderContext<'_>) -> Result<bool>;

    /// Create the entity; output fields are written back into `entity`.
    fn create(&self, entity: &mut Entity, cx: &ProviderContext<'_>) -> Result<()>;

    /// Apply the changed fields in place, mutating `pending` into the
    /// post-update entity.
    fn update(
        &self,
        current: &Entity,
        pending: &mut Entity,
        changed: &[String],
        cx: &ProviderContext<'_>,
    ) -> Result<()>;

    fn delete(&self, entity: &Entity, cx: &ProviderContext<'_>) -> Result<()>;
}
