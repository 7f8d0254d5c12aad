//! Declared field schemas and the entity type registry
//!
//! Every entity type declares an explicit table of field schemas at
//! registration time; the table is immutable afterwards and shared through
//! `Rc`. The registry is passed by reference wherever type information is
//! needed - there is no process-wide schema cache.

use crate::provider::ResourceProvider;
use indexmap::IndexMap;
use std::rc::Rc;

/// Per-field metadata driving diff classification
#[derive(Debug, Clone)]
pub struct FieldSchema {
    name: String,
    /// Nested entities that are recursively reconciled, vs a plain value
    diffable: bool,
    /// A list of nested entities, vs a single one
    collection: bool,
    /// A change to this field can be applied in place; anything else
    /// forces a Replace
    updatable: bool,
    /// Populated by the provider, never compared
    output: bool,
    required: bool,
    /// Registered type of nested entities
    item_type: Option<String>,
}

impl FieldSchema {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            diffable: false,
            collection: false,
            updatable: false,
            output: false,
            required: false,
            item_type: None,
        }
    }

    pub fn entity(name: impl Into<String>, item_type: impl Into<String>) -> Self {
        Self {
            item_type: Some(item_type.into()),
            diffable: true,
            ..Self::scalar(name)
        }
    }

    pub fn entity_list(name: impl Into<String>, item_type: impl Into<String>) -> Self {
        Self {
            collection: true,
            ..Self::entity(name, item_type)
        }
    }

    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    pub fn output(mut self) -> Self {
        self.output = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_diffable(&self) -> bool {
        self.diffable
    }

    pub fn is_collection(&self) -> bool {
        self.collection
    }

    pub fn is_updatable(&self) -> bool {
        self.updatable
    }

    pub fn is_output(&self) -> bool {
        self.output
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn item_type(&self) -> Option<&str> {
        self.item_type.as_deref()
    }
}

/// The declared schema of one entity type
#[derive(Debug)]
pub struct EntityType {
    name: String,
    /// Top-level resources carry a `type::name` address of their own;
    /// everything else is addressed through its parent
    root: bool,
    /// Whether a provider owns this type's lifecycle; set during
    /// registration
    managed: bool,
    /// Provider-assigned identifier, shown in labels
    id_field: Option<String>,
    /// Fields a subresource derives its primary key from
    key_fields: Vec<String>,
    fields: Vec<FieldSchema>,
}

impl EntityType {
    pub fn root(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            inner: Self {
                name: name.into(),
                root: true,
                managed: false,
                id_field: None,
                key_fields: Vec::new(),
                fields: Vec::new(),
            },
        }
    }

    pub fn subresource(name: impl Into<String>) -> EntityTypeBuilder {
        EntityTypeBuilder {
            inner: Self {
                name: name.into(),
                root: false,
                managed: false,
                id_field: None,
                key_fields: Vec::new(),
                fields: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub fn id_field(&self) -> Option<&str> {
        self.id_field.as_deref()
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Builder for [`EntityType`]; finished by registering the type
pub struct EntityTypeBuilder {
    inner: EntityType,
}

impl EntityTypeBuilder {
    pub fn field(mut self, field: FieldSchema) -> Self {
        debug_assert!(
            self.inner.field(field.name()).is_none(),
            "duplicate field schema '{}' on '{}'",
            field.name(),
            self.inner.name
        );
        self.inner.fields.push(field);
        self
    }

    pub fn id_field(mut self, name: impl Into<String>) -> Self {
        self.inner.id_field = Some(name.into());
        self
    }

    pub fn key_fields(mut self, names: &[&str]) -> Self {
        self.inner.key_fields = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    fn build(self, managed: bool) -> EntityType {
        let mut inner = self.inner;
        inner.managed = managed;
        inner
    }
}

/// A registered type plus the provider owning its lifecycle, if any
pub struct RegisteredType {
    pub schema: Rc<EntityType>,
    pub provider: Option<Rc<dyn ResourceProvider>>,
}

/// All entity types known to one run
#[derive(Default)]
pub struct TypeRegistry {
    types: IndexMap<String, RegisteredType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type with no lifecycle of its own: its changes fold into
    /// the owning entity's update.
    pub fn register(&mut self, builder: EntityTypeBuilder) -> Rc<EntityType> {
        let schema = Rc::new(builder.build(false));
        self.types.insert(
            schema.name().to_string(),
            RegisteredType {
                schema: Rc::clone(&schema),
                provider: None,
            },
        );
        schema
    }

    /// Register a type whose create/update/delete go through `provider`.
    pub fn register_with_provider(
        &mut self,
        builder: EntityTypeBuilder,
        provider: Rc<dyn ResourceProvider>,
    ) -> Rc<EntityType> {
        let schema = Rc::new(builder.build(true));
        self.types.insert(
            schema.name().to_string(),
            RegisteredType {
                schema: Rc::clone(&schema),
                provider: Some(provider),
            },
        );
        schema
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredType> {
        self.types.get(name)
    }

    pub fn schema(&self, name: &str) -> Option<Rc<EntityType>> {
        self.types.get(name).map(|t| Rc::clone(&t.schema))
    }

    pub fn provider(&self, name: &str) -> Option<Rc<dyn ResourceProvider>> {
        self.types.get(name).and_then(|t| t.provider.clone())
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}
