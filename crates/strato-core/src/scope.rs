//! Lexically nested name/value environments used during resolution
//!
//! A scope chain runs body scope -> file scope -> root scope; lookups walk
//! outward until found. Each scope also carries a lazily-built cache of
//! settings objects keyed by type, shared within that scope only.

use indexmap::IndexMap;
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use strato_lang::{Location, Value};

pub type ScopeRef = Rc<Scope>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKind {
    Root,
    File(String),
    Body,
}

/// A value bound in a scope: either a plain evaluated value or the body
/// scopes of one or more nested blocks, converted into entities when the
/// enclosing entity is built.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(Value),
    Blocks(Vec<BlockBinding>),
}

#[derive(Debug, Clone)]
pub struct BlockBinding {
    pub name: Option<String>,
    pub scope: ScopeRef,
}

pub struct Scope {
    parent: Option<ScopeRef>,
    kind: ScopeKind,
    values: RefCell<IndexMap<String, Binding>>,
    locations: RefCell<HashMap<String, Location>>,
    settings: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
}

impl Scope {
    pub fn root() -> ScopeRef {
        Rc::new(Self::new(None, ScopeKind::Root))
    }

    pub fn file(parent: &ScopeRef, path: impl Into<String>) -> ScopeRef {
        Rc::new(Self::new(Some(Rc::clone(parent)), ScopeKind::File(path.into())))
    }

    pub fn body(parent: &ScopeRef) -> ScopeRef {
        Rc::new(Self::new(Some(Rc::clone(parent)), ScopeKind::Body))
    }

    fn new(parent: Option<ScopeRef>, kind: ScopeKind) -> Self {
        Self {
            parent,
            kind,
            values: RefCell::new(IndexMap::new()),
            locations: RefCell::new(HashMap::new()),
            settings: RefCell::new(HashMap::new()),
        }
    }

    pub fn parent(&self) -> Option<&ScopeRef> {
        self.parent.as_ref()
    }

    pub fn kind(&self) -> &ScopeKind {
        &self.kind
    }

    /// The file this scope belongs to, walking outward.
    pub fn file_path(&self) -> Option<String> {
        if let ScopeKind::File(path) = &self.kind {
            return Some(path.clone());
        }

        self.parent.as_ref().and_then(|p| p.file_path())
    }

    pub fn put(&self, key: impl Into<String>, binding: Binding) {
        self.values.borrow_mut().insert(key.into(), binding);
    }

    pub fn put_value(&self, key: impl Into<String>, value: Value) {
        self.put(key, Binding::Value(value));
    }

    /// Append a nested block body under `key`.
    pub fn add_block(&self, key: &str, name: Option<String>, scope: ScopeRef) {
        let mut values = self.values.borrow_mut();
        let binding = BlockBinding { name, scope };

        match values.get_mut(key) {
            Some(Binding::Blocks(blocks)) => blocks.push(binding),
            _ => {
                values.insert(key.to_string(), Binding::Blocks(vec![binding]));
            }
        }
    }

    pub fn remove(&self, key: &str) -> Option<Binding> {
        self.values.borrow_mut().shift_remove(key)
    }

    /// Lookup in this scope only.
    pub fn get(&self, key: &str) -> Option<Binding> {
        self.values.borrow().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.borrow().contains_key(key)
    }

    /// Lookup walking outward through parents.
    pub fn find(&self, key: &str) -> Option<Binding> {
        if let Some(binding) = self.get(key) {
            return Some(binding);
        }

        self.parent.as_ref().and_then(|p| p.find(key))
    }

    /// Whether any enclosing scope of the given kind binds `key`; used by
    /// the shadowing checks.
    pub fn enclosing_binding_kind(&self, key: &str) -> Option<ScopeKind> {
        let mut scope = self.parent.as_ref();

        while let Some(s) = scope {
            if s.contains(key) {
                return Some(s.kind.clone());
            }
            scope = s.parent.as_ref();
        }

        None
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.borrow().keys().cloned().collect()
    }

    /// Snapshot of the bindings, in insertion order.
    pub fn bindings(&self) -> Vec<(String, Binding)> {
        self.values
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn put_location(&self, key: &str, location: Location) {
        self.locations.borrow_mut().insert(key.to_string(), location);
    }

    pub fn location(&self, key: &str) -> Option<Location> {
        self.locations.borrow().get(key).cloned()
    }

    /// The settings object of type `S` for this scope, built on first
    /// access and cached here afterwards.
    pub fn settings<S: Default + 'static>(&self) -> Rc<RefCell<S>> {
        let mut settings = self.settings.borrow_mut();

        let entry = settings
            .entry(TypeId::of::<S>())
            .or_insert_with(|| Rc::new(RefCell::new(S::default())) as Rc<dyn Any>);

        Rc::clone(entry)
            .downcast::<RefCell<S>>()
            .ok()
            .expect("settings cache keyed by TypeId")
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("kind", &self.kind)
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_walks_parents() {
        let root = Scope::root();
        root.put_value("region", Value::from("us-east-1"));

        let file = Scope::file(&root, "main.strato");
        let body = Scope::body(&file);

        assert!(matches!(
            body.find("region"),
            Some(Binding::Value(Value::String(s))) if s == "us-east-1"
        ));
        assert!(body.find("missing").is_none());
    }

    #[test]
    fn test_inner_binding_shadows_outer() {
        let root = Scope::root();
        root.put_value("count", Value::Int(1));

        let body = Scope::body(&root);
        body.put_value("count", Value::Int(2));

        assert!(matches!(
            body.find("count"),
            Some(Binding::Value(Value::Int(2)))
        ));
        assert_eq!(body.enclosing_binding_kind("count"), Some(ScopeKind::Root));
    }

    #[test]
    fn test_blocks_accumulate() {
        let root = Scope::root();
        let body = Scope::body(&root);

        root.add_block("rule", Some("http".into()), Rc::clone(&body));
        root.add_block("rule", Some("https".into()), body);

        let Some(Binding::Blocks(blocks)) = root.get("rule") else {
            panic!("expected blocks");
        };
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_settings_cached_per_scope() {
        #[derive(Default)]
        struct Counter {
            value: usize,
        }

        let scope = Scope::root();
        scope.settings::<Counter>().borrow_mut().value = 7;
        assert_eq!(scope.settings::<Counter>().borrow().value, 7);

        // A different scope gets its own instance.
        let other = Scope::body(&scope);
        assert_eq!(other.settings::<Counter>().borrow().value, 0);
    }

    #[test]
    fn test_file_path() {
        let root = Scope::root();
        let file = Scope::file(&root, "net.strato");
        let body = Scope::body(&file);

        assert_eq!(body.file_path().as_deref(), Some("net.strato"));
        assert_eq!(root.file_path(), None);
    }
}
