//! The diffable unit: top-level resources and nested sub-entities
//!
//! Entities are plain data built during resolution (or loaded from recorded
//! state); the diff engine owns the copies it reconciles and Update
//! execution mutates the pending copy in place. The parent back-link is an
//! address, never an owning pointer: the nearest root resource's
//! `type::name`, used for dependency lookups and state addressing.

use crate::schema::EntityType;
use crate::scope::ScopeRef;
use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::rc::Rc;
use strato_lang::Value;

/// The value of one entity field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Entity(Entity),
    EntityList(Vec<Entity>),
}

impl FieldValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entity {
    ty: Rc<EntityType>,
    /// Declared name for root resources; the field name in the parent for
    /// nested entities
    name: String,
    /// Declared label of a named nested block, kept for identity when the
    /// type declares no key fields
    key_name: Option<String>,
    /// Address of the nearest root ancestor
    parent: Option<String>,
    /// Field names the user wrote explicitly, vs values auto-populated
    /// from current state
    configured: BTreeSet<String>,
    fields: IndexMap<String, FieldValue>,
    scope: Option<ScopeRef>,
}

impl Entity {
    pub fn new(ty: Rc<EntityType>, name: impl Into<String>) -> Self {
        Self {
            ty,
            name: name.into(),
            key_name: None,
            parent: None,
            configured: BTreeSet::new(),
            fields: IndexMap::new(),
            scope: None,
        }
    }

    pub fn schema(&self) -> &EntityType {
        &self.ty
    }

    pub fn ty(&self) -> Rc<EntityType> {
        Rc::clone(&self.ty)
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn key_name(&self) -> Option<&str> {
        self.key_name.as_deref()
    }

    pub fn set_key_name(&mut self, name: Option<String>) {
        self.key_name = name;
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn set_parent(&mut self, parent: Option<String>) {
        self.parent = parent;
    }

    pub fn scope(&self) -> Option<&ScopeRef> {
        self.scope.as_ref()
    }

    pub fn set_scope(&mut self, scope: ScopeRef) {
        self.scope = Some(scope);
    }

    /// The file this entity was declared in, via its scope chain.
    pub fn file(&self) -> Option<String> {
        self.scope.as_ref().and_then(|s| s.file_path())
    }

    pub fn configured(&self) -> &BTreeSet<String> {
        &self.configured
    }

    pub fn is_configured(&self, field: &str) -> bool {
        self.configured.contains(field)
    }

    pub fn mark_configured(&mut self, field: &str) {
        self.configured.insert(field.to_string());
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn remove_field(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.shift_remove(name)
    }

    pub fn scalar(&self, name: &str) -> Option<&Value> {
        self.field(name).and_then(FieldValue::as_scalar)
    }

    /// Stable identity within this entity's sibling collection.
    ///
    /// Root resources are addressed `type::name`; subresources join their
    /// declared key fields, falling back to the block label or the field
    /// name.
    pub fn primary_key(&self) -> String {
        if self.ty.is_root() {
            return format!("{}::{}", self.ty.name(), self.name);
        }

        if !self.ty.key_fields().is_empty() {
            return self
                .ty
                .key_fields()
                .iter()
                .map(|f| {
                    self.scalar(f)
                        .map_or_else(|| "null".to_string(), ToString::to_string)
                })
                .collect::<Vec<_>>()
                .join(",");
        }

        self.key_name.clone().unwrap_or_else(|| self.name.clone())
    }

    /// Human label for plan and execution output.
    pub fn label(&self) -> String {
        if self.ty.is_root() {
            let mut label = format!("{} {}", self.ty.name(), self.name);

            if let Some(id) = self.ty.id_field().and_then(|f| self.scalar(f)) {
                label.push_str(&format!(" ({id})"));
            }

            return label;
        }

        let mut label = self.name.clone();
        let key = self.primary_key();

        if key != self.name {
            label.push_str(&format!(" {key}"));
        }

        if let Some(parent) = &self.parent {
            label.push_str(&format!(" for {parent}"));
        }

        label
    }

    /// Same entity across the current/pending divide.
    pub fn same_identity(&self, other: &Entity) -> bool {
        self.type_name() == other.type_name() && self.primary_key() == other.primary_key()
    }

    /// Normalize parent/name linkage of nested entities before diffing:
    /// each child gets the field name it lives under and the address of the
    /// nearest root ancestor.
    pub fn update_children(&mut self) {
        let owner = if self.ty.is_root() {
            Some(self.primary_key())
        } else {
            self.parent.clone()
        };

        let diffable: Vec<String> = self
            .ty
            .fields()
            .iter()
            .filter(|f| f.is_diffable())
            .map(|f| f.name().to_string())
            .collect();

        for name in diffable {
            match self.fields.get_mut(&name) {
                Some(FieldValue::Entity(child)) => {
                    child.name = name.clone();
                    child.parent.clone_from(&owner);
                    child.update_children();
                }
                Some(FieldValue::EntityList(children)) => {
                    for child in children {
                        child.name = name.clone();
                        child.parent.clone_from(&owner);
                        child.update_children();
                    }
                }
                _ => {}
            }
        }
    }

    /// Copy values the user never configured from the current entity, so a
    /// later diff can tell "auto-populated by a prior run" apart from
    /// "intentionally cleared". Nested entities are matched by primary key.
    pub fn copy_from_current(&mut self, current: &Entity) {
        for field in self.ty().fields() {
            let name = field.name();

            if !current.is_configured(name) && !self.is_configured(name) {
                if let Some(value) = current.field(name) {
                    self.fields.insert(name.to_string(), value.clone());
                }
            } else if field.is_diffable() {
                match (current.field(name), self.fields.get_mut(name)) {
                    (Some(FieldValue::Entity(c)), Some(FieldValue::Entity(p))) => {
                        if c.primary_key() == p.primary_key() {
                            p.copy_from_current(c);
                        }
                    }
                    (Some(FieldValue::EntityList(cs)), Some(FieldValue::EntityList(ps))) => {
                        for p in ps {
                            if let Some(c) = cs.iter().find(|c| c.primary_key() == p.primary_key())
                            {
                                p.copy_from_current(c);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.type_name() == other.type_name()
            && self.parent == other.parent
            && self.name == other.name
            && self.primary_key() == other.primary_key()
    }
}
