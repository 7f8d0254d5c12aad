//! Deferred fixed-point resolver
//!
//! Statements are evaluated in source order; a statement that needs a value
//! nothing has produced yet returns a suspension instead of failing. Each
//! round re-attempts only the still-pending statements, and progress is the
//! strictly decreasing pending count - when a round resolves nothing, the
//! leftover suspensions become the run's convergence-failure report. The
//! result is order independent whenever a fixpoint exists; statement order
//! only affects how many rounds it takes.

use crate::entity::{Entity, FieldValue};
use crate::error::{Error, Result};
use crate::schema::{EntityType, TypeRegistry};
use crate::scope::{Binding, Scope, ScopeRef};
use crate::state::StateTracker;
use crate::suspend::{ConvergenceReport, EvalError, EvalResult, Suspension};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use strato_lang::ast::{
    BinaryOp, Expr, FilterOp, ForNode, IfNode, KeyBlockNode, Location, Node, PairNode,
    ReferenceExpr, ResourceNode, SourceFile,
};
use strato_lang::Value;

/// The fully resolved configuration: populated scopes plus every declared
/// resource entity, in declaration order.
#[derive(Debug)]
pub struct Resolution {
    pub root: ScopeRef,
    pub resources: IndexMap<String, Entity>,
    pub files: Vec<String>,
}

impl Resolution {
    /// Root entities as a slice-friendly list for diffing.
    pub fn entities(&self) -> Vec<Entity> {
        self.resources.values().cloned().collect()
    }

    /// Check declared `required` fields on every resolved entity.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for entity in self.resources.values() {
            validate_entity(entity, &mut problems);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::structural(
                format!("invalid configuration:\n  {}", problems.join("\n  ")),
                None,
            ))
        }
    }
}

fn validate_entity(entity: &Entity, problems: &mut Vec<String>) {
    for field in entity.schema().fields() {
        let name = field.name();

        if field.is_required() && entity.field(name).is_none() {
            problems.push(format!("{}: '{}' is required", entity.label(), name));
        }

        match entity.field(name) {
            Some(FieldValue::Entity(child)) => validate_entity(child, problems),
            Some(FieldValue::EntityList(children)) => {
                for child in children {
                    validate_entity(child, problems);
                }
            }
            _ => {}
        }
    }
}

pub struct Resolver<'a> {
    registry: &'a TypeRegistry,
    current: Option<&'a StateTracker>,
}

/// Mutable evaluation state for one resolve run
#[derive(Default)]
struct Cx {
    /// Resolved resources by `type::name`, in declaration order
    resources: IndexMap<String, Entity>,
    /// Where (and in which iteration instance) each resource was defined,
    /// so a retried statement may redefine its own resource but a second
    /// definition elsewhere is an error
    defined_at: HashMap<String, (Location, Vec<usize>)>,
    /// Per resource type, the top-level statements that may still produce
    /// resources of it; wildcard references wait for these to drain
    type_nodes: HashMap<String, HashSet<usize>>,
    /// Indices of the repeated-iteration instances currently expanding
    iteration: Vec<usize>,
    /// Statically collected pair keys per file, for shadowing checks
    file_keys: HashMap<String, HashSet<String>>,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            current: None,
        }
    }

    /// Use recorded state as the current side: unconfigured fields of
    /// matching resources are copied onto the pending entities.
    pub fn with_current(mut self, current: &'a StateTracker) -> Self {
        self.current = Some(current);
        self
    }

    /// Evaluate every statement of every file to a fixpoint.
    pub fn resolve(&self, files: &[SourceFile]) -> Result<Resolution> {
        let root = Scope::root();
        let mut cx = Cx::default();

        let mut units: Vec<(usize, &Node, ScopeRef)> = Vec::new();
        let mut file_paths = Vec::new();

        for file in files {
            validate_inline_bindings(&file.body, "file")?;

            cx.file_keys.insert(
                file.path.clone(),
                file.body
                    .iter()
                    .filter_map(|n| n.pair_key().map(ToString::to_string))
                    .collect(),
            );

            let file_scope = Scope::file(&root, &file.path);
            file_paths.push(file.path.clone());

            for node in &file.body {
                let id = units.len();
                units.push((id, node, Rc::clone(&file_scope)));
                index_types(node, id, &mut cx.type_nodes);
            }
        }

        let mut pending: Vec<&(usize, &Node, ScopeRef)> = units.iter().collect();

        loop {
            let mut errors: Vec<Suspension> = Vec::new();
            let mut deferred: Vec<&(usize, &Node, ScopeRef)> = Vec::new();

            for &unit in &pending {
                match self.visit(unit.1, &unit.2, &mut cx) {
                    Ok(()) => complete(unit.0, &mut cx.type_nodes),
                    Err(EvalError::Suspend(suspension)) => {
                        errors.push(suspension);
                        deferred.push(unit);
                    }
                    Err(EvalError::Fatal(error)) => return Err(error),
                }
            }

            if deferred.is_empty() {
                break;
            }

            if deferred.len() == pending.len() {
                return Err(ConvergenceReport::from_suspensions(errors).into_error());
            }

            log::debug!(
                "resolver round finished with {} of {} statements pending",
                deferred.len(),
                pending.len()
            );
            pending = deferred;
        }

        Ok(Resolution {
            root,
            resources: cx.resources,
            files: file_paths,
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn visit(&self, node: &Node, scope: &ScopeRef, cx: &mut Cx) -> EvalResult<()> {
        match node {
            Node::Pair(pair) => self.visit_pair(pair, scope, cx),
            Node::Resource(resource) => self.visit_resource(resource, scope, cx),
            Node::KeyBlock(block) => self.visit_key_block(block, scope, cx),
            Node::For(for_node) => self.visit_for(for_node, scope, cx),
            Node::If(if_node) => self.visit_if(if_node, scope, cx),
        }
    }

    fn visit_pair(&self, pair: &PairNode, scope: &ScopeRef, cx: &mut Cx) -> EvalResult<()> {
        let value = self.eval(&pair.value, scope, cx)?;
        scope.put_value(&pair.key, value);
        scope.put_location(&pair.key, pair.location.clone());
        Ok(())
    }

    fn visit_resource(
        &self,
        resource: &ResourceNode,
        scope: &ScopeRef,
        cx: &mut Cx,
    ) -> EvalResult<()> {
        let name_value = self.eval(&resource.name, scope, cx)?;
        let name = name_string(&name_value, &resource.location)?;
        let key = format!("{}::{}", resource.type_name, name);

        let Some(schema) = self.registry.schema(&resource.type_name) else {
            return Err(Error::structural(
                format!("unknown resource type '{}'", resource.type_name),
                Some(&resource.location),
            )
            .into());
        };

        if !schema.is_root() {
            return Err(Error::structural(
                format!(
                    "'{}' is a subresource type and can't be declared at the top level",
                    resource.type_name
                ),
                Some(&resource.location),
            )
            .into());
        }

        if let Some((location, iteration)) = cx.defined_at.get(&key) {
            if *location != resource.location || *iteration != cx.iteration {
                return Err(Error::structural(
                    format!("'{key}' has been defined already (previously at {location})"),
                    Some(&resource.location),
                )
                .into());
            }
        }

        validate_inline_bindings(&resource.body, "inline").map_err(EvalError::from)?;

        let body_scope = Scope::body(scope);

        for item in &resource.body {
            self.visit(item, &body_scope, cx).map_err(|e| match e {
                EvalError::Suspend(suspension) => EvalError::Suspend(Suspension::create(
                    &key,
                    &resource.location,
                    suspension,
                )),
                fatal => fatal,
            })?;
        }

        let mut entity = self.instantiate(&schema, &name, &body_scope)?;

        if let Some(current) = self.current.and_then(|s| s.find_resource(&key)) {
            entity.copy_from_current(current);
        }

        entity.set_scope(Rc::clone(&body_scope));
        entity.update_children();

        cx.defined_at
            .insert(key.clone(), (resource.location.clone(), cx.iteration.clone()));
        cx.resources.insert(key, entity);

        Ok(())
    }

    fn visit_key_block(
        &self,
        block: &KeyBlockNode,
        scope: &ScopeRef,
        cx: &mut Cx,
    ) -> EvalResult<()> {
        validate_inline_bindings(&block.body, "inline").map_err(EvalError::from)?;

        let body_scope = Scope::body(scope);

        for item in &block.body {
            self.visit(item, &body_scope, cx)?;
        }

        let name = match &block.name {
            Some(expr) => Some(name_string(&self.eval(expr, scope, cx)?, &block.location)?),
            None => None,
        };

        scope.add_block(&block.key, name, body_scope);
        scope.put_location(&block.key, block.location.clone());
        Ok(())
    }

    fn visit_for(&self, for_node: &ForNode, scope: &ScopeRef, cx: &mut Cx) -> EvalResult<()> {
        self.validate_for(for_node, scope, cx)?;

        if for_node.lists.len() != for_node.variables.len() {
            return Err(Error::structural(
                format!(
                    "expected {} iteration lists for {} variables, found {}",
                    for_node.variables.len(),
                    for_node.variables.len(),
                    for_node.lists.len()
                ),
                Some(&for_node.location),
            )
            .into());
        }

        let mut lists: Vec<Vec<Value>> = Vec::with_capacity(for_node.lists.len());

        for expr in &for_node.lists {
            match self.eval(expr, scope, cx)? {
                Value::List(items) => lists.push(items),
                other => {
                    return Err(Error::structural(
                        format!(
                            "can't iterate over '{other}' because it's not a collection"
                        ),
                        Some(expr.location()),
                    )
                    .into());
                }
            }
        }

        let length = lists.first().map_or(0, Vec::len);

        if lists.iter().any(|l| l.len() != length) {
            return Err(Error::structural(
                format!(
                    "iterated lists must have equal lengths, found {}",
                    lists
                        .iter()
                        .map(|l| l.len().to_string())
                        .collect::<Vec<_>>()
                        .join(" and ")
                ),
                Some(&for_node.location),
            )
            .into());
        }

        // The loop variables are rebound in the enclosing scope for the
        // duration of each expanded instance, then the prior bindings are
        // restored (or removed).
        let saved: Vec<(String, Option<Binding>)> = for_node
            .variables
            .iter()
            .map(|v| (v.clone(), scope.get(v)))
            .collect();

        let depth = cx.iteration.len();
        let outcome = self.run_iterations(for_node, scope, cx, &lists, length);
        cx.iteration.truncate(depth);

        for (variable, binding) in saved {
            match binding {
                Some(binding) => scope.put(variable, binding),
                None => {
                    scope.remove(&variable);
                }
            }
        }

        outcome
    }

    fn run_iterations(
        &self,
        for_node: &ForNode,
        scope: &ScopeRef,
        cx: &mut Cx,
        lists: &[Vec<Value>],
        length: usize,
    ) -> EvalResult<()> {
        for i in 0..length {
            cx.iteration.push(i);

            for (variable, list) in for_node.variables.iter().zip(lists) {
                scope.put_value(variable, list[i].clone());
            }

            // Each expanded instance evaluates a fresh copy of the body so
            // instances never share resolved state.
            let body: Vec<Node> = for_node.body.clone();

            for item in &body {
                self.visit(item, scope, cx)?;
            }

            cx.iteration.pop();
        }

        Ok(())
    }

    fn validate_for(&self, for_node: &ForNode, scope: &ScopeRef, cx: &Cx) -> EvalResult<()> {
        if let Some(duplicate) = first_duplicate(&for_node.variables) {
            return Err(shadow_error(&duplicate, "inline", &for_node.location).into());
        }

        let file_keys = scope
            .file_path()
            .and_then(|f| cx.file_keys.get(&f).cloned())
            .unwrap_or_default();

        for variable in &for_node.variables {
            if file_keys.contains(variable) {
                return Err(shadow_error(variable, "file", &for_node.location).into());
            }
        }

        validate_inline_bindings(&for_node.body, "inline").map_err(EvalError::from)?;

        for node in &for_node.body {
            let Some(key) = node.pair_key() else { continue };

            if for_node.variables.iter().any(|v| v == key) {
                return Err(shadow_error(key, "inline", node.location()).into());
            }

            if file_keys.contains(key) {
                return Err(shadow_error(key, "file", node.location()).into());
            }
        }

        Ok(())
    }

    fn visit_if(&self, if_node: &IfNode, scope: &ScopeRef, cx: &mut Cx) -> EvalResult<()> {
        let condition = self.eval(&if_node.condition, scope, cx)?;

        let body = if truthy(&condition) {
            &if_node.then_body
        } else {
            &if_node.else_body
        };

        validate_inline_bindings(body, "inline").map_err(EvalError::from)?;

        for item in body {
            self.visit(item, scope, cx)?;
        }

        Ok(())
    }

    /// Build an entity from a fully evaluated body scope, type-checking
    /// every binding against the declared field schemas.
    fn instantiate(
        &self,
        schema: &Rc<EntityType>,
        name: &str,
        body_scope: &ScopeRef,
    ) -> EvalResult<Entity> {
        let mut entity = Entity::new(Rc::clone(schema), name);

        for (key, binding) in body_scope.bindings() {
            let location = body_scope.location(&key);

            let Some(field) = schema.field(&key) else {
                return Err(Error::structural(
                    format!("can't find field '{}' in type '{}'", key, schema.name()),
                    location.as_ref(),
                )
                .into());
            };

            match binding {
                Binding::Value(Value::Null) => {}
                Binding::Value(value) => {
                    if field.is_diffable() {
                        return Err(Error::structural(
                            format!(
                                "field '{}' of '{}' expects a block, found '{value}'",
                                key,
                                schema.name()
                            ),
                            location.as_ref(),
                        )
                        .into());
                    }

                    entity.set_field(&key, FieldValue::Scalar(value));
                }
                Binding::Blocks(blocks) => {
                    if !field.is_diffable() {
                        return Err(Error::structural(
                            format!(
                                "field '{}' of '{}' doesn't accept a block",
                                key,
                                schema.name()
                            ),
                            location.as_ref(),
                        )
                        .into());
                    }

                    let item_type = field.item_type().unwrap_or_default();

                    let Some(item_schema) = self.registry.schema(item_type) else {
                        return Err(Error::structural(
                            format!("unknown resource type '{item_type}'"),
                            location.as_ref(),
                        )
                        .into());
                    };

                    let mut children = Vec::with_capacity(blocks.len());

                    for block in blocks {
                        let mut child = self.instantiate(&item_schema, &key, &block.scope)?;
                        child.set_key_name(block.name.clone());
                        child.set_scope(Rc::clone(&block.scope));
                        children.push(child);
                    }

                    if field.is_collection() {
                        entity.set_field(&key, FieldValue::EntityList(children));
                    } else if children.len() == 1 {
                        entity.set_field(&key, FieldValue::Entity(children.swap_remove(0)));
                    } else {
                        return Err(Error::structural(
                            format!(
                                "field '{}' of '{}' accepts a single block, found {}",
                                key,
                                schema.name(),
                                children.len()
                            ),
                            location.as_ref(),
                        )
                        .into());
                    }
                }
            }

            entity.mark_configured(&key);
        }

        Ok(entity)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn eval(&self, expr: &Expr, scope: &ScopeRef, cx: &mut Cx) -> EvalResult<Value> {
        match expr {
            Expr::Literal(value, _) => Ok(value.clone()),
            Expr::Interpolated(parts, _) => {
                let mut out = String::new();

                for part in parts {
                    let value = self.eval(part, scope, cx)?;
                    if !value.is_null() {
                        out.push_str(&value.to_string());
                    }
                }

                Ok(Value::String(out))
            }
            Expr::List(items, _) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, scope, cx)?);
                }
                Ok(Value::List(out))
            }
            Expr::Map(entries, _) => {
                let mut out = IndexMap::new();
                for (key, value) in entries {
                    out.insert(key.clone(), self.eval(value, scope, cx)?);
                }
                Ok(Value::Map(out))
            }
            Expr::Binary(binary) => {
                let left = self.eval(&binary.left, scope, cx)?;
                let right = self.eval(&binary.right, scope, cx)?;
                apply_binary(binary.op, &left, &right, &binary.location).map_err(EvalError::from)
            }
            Expr::Reference(reference) => self.eval_reference(reference, scope, cx),
        }
    }

    fn eval_reference(
        &self,
        reference: &ReferenceExpr,
        scope: &ScopeRef,
        cx: &mut Cx,
    ) -> EvalResult<Value> {
        if !reference.is_resource() {
            return match scope.find(&reference.target) {
                Some(Binding::Value(value)) => {
                    if !reference.filters.is_empty() {
                        return Err(Error::structural(
                            "query filters require a resource reference",
                            Some(&reference.location),
                        )
                        .into());
                    }
                    self.value_path(value, &reference.path, &reference.location, cx)
                }
                Some(Binding::Blocks(_)) => Err(Error::structural(
                    format!(
                        "'{}' is a block and can't be used as a value",
                        reference.target
                    ),
                    Some(&reference.location),
                )
                .into()),
                None => Err(EvalError::Suspend(Suspension::value(
                    &reference.target,
                    &reference.location,
                ))),
            };
        }

        let Some(name_expr) = &reference.name else {
            return Err(Error::structural(
                format!("reference to '{}' requires a resource name", reference.target),
                Some(&reference.location),
            )
            .into());
        };

        let name = name_string(&self.eval(name_expr, scope, cx)?, &reference.location)?;

        let mut filters = Vec::with_capacity(reference.filters.len());
        for filter in &reference.filters {
            filters.push((
                filter.field.clone(),
                filter.op,
                self.eval(&filter.value, scope, cx)?,
            ));
        }

        if let Some(prefix) = name.strip_suffix('*') {
            // A wildcard can't resolve while any statement that may still
            // produce resources of this type is pending.
            if cx
                .type_nodes
                .get(&reference.target)
                .is_some_and(|nodes| !nodes.is_empty())
            {
                return Err(EvalError::Suspend(Suspension::wildcard(
                    &reference.target,
                    &reference.location,
                )));
            }

            let matches: Vec<Entity> = cx
                .resources
                .values()
                .filter(|e| e.type_name() == reference.target)
                .filter(|e| prefix.is_empty() || e.name().starts_with(prefix))
                .filter(|e| filters_match(e, &filters))
                .cloned()
                .collect();

            if reference.path.is_empty() {
                return Ok(Value::List(
                    matches.iter().map(|e| Value::Ref(e.primary_key())).collect(),
                ));
            }

            let mut out = Vec::new();
            for entity in &matches {
                match self.entity_path(entity, &reference.path, &reference.location, cx)? {
                    Value::List(items) => out.extend(items),
                    value => out.push(value),
                }
            }
            return Ok(Value::List(out));
        }

        let key = format!("{}::{}", reference.target, name);

        let Some(entity) = cx.resources.get(&key) else {
            return Err(EvalError::Suspend(Suspension::find(
                &reference.target,
                &name,
                &reference.location,
            )));
        };

        if !filters_match(entity, &filters) {
            return Ok(Value::Null);
        }

        if reference.path.is_empty() {
            return Ok(Value::Ref(key));
        }

        let entity = entity.clone();
        self.entity_path(&entity, &reference.path, &reference.location, cx)
    }

    /// Drill an attribute path into an entity's fields.
    fn entity_path(
        &self,
        entity: &Entity,
        path: &[String],
        location: &Location,
        cx: &mut Cx,
    ) -> EvalResult<Value> {
        let first = &path[0];

        if entity.schema().field(first).is_none() {
            return Err(Error::structural(
                format!(
                    "can't find field '{}' in type '{}'",
                    first,
                    entity.type_name()
                ),
                Some(location),
            )
            .into());
        };

        let value = match entity.field(first) {
            None => Value::Null,
            Some(FieldValue::Scalar(value)) => value.clone(),
            Some(FieldValue::Entity(_) | FieldValue::EntityList(_)) => {
                return Err(Error::structural(
                    format!("can't traverse nested entity field '{first}'"),
                    Some(location),
                )
                .into());
            }
        };

        self.value_path(value, &path[1..], location, cx)
    }

    /// Drill an attribute path into a plain value.
    fn value_path(
        &self,
        mut value: Value,
        path: &[String],
        location: &Location,
        cx: &mut Cx,
    ) -> EvalResult<Value> {
        for (i, segment) in path.iter().enumerate() {
            value = match value {
                Value::Null => return Ok(Value::Null),
                Value::Map(mut entries) => {
                    entries.shift_remove(segment).unwrap_or(Value::Null)
                }
                Value::List(items) => {
                    let index: i64 = segment.parse().map_err(|_| {
                        Error::structural(
                            format!(
                                "'{}' isn't a valid index to a list of {} items",
                                segment,
                                items.len()
                            ),
                            Some(location),
                        )
                    })?;

                    let length = items.len() as i64;
                    let index = if index < 0 { index + length } else { index };

                    if index < 0 || index >= length {
                        return Err(Error::structural(
                            format!(
                                "'{}' isn't a valid index to a list of {} items",
                                segment, length
                            ),
                            Some(location),
                        )
                        .into());
                    }

                    items.into_iter().nth(index as usize).unwrap_or(Value::Null)
                }
                Value::Ref(address) => {
                    let Some(entity) = cx.resources.get(&address).cloned() else {
                        return Err(Error::structural(
                            format!("'{address}' doesn't refer to a known resource"),
                            Some(location),
                        )
                        .into());
                    };

                    return self.entity_path(&entity, &path[i..], location, cx);
                }
                other => {
                    return Err(Error::structural(
                        format!(
                            "can't find property '{}' in '{}' ({})",
                            segment,
                            other,
                            other.type_name()
                        ),
                        Some(location),
                    )
                    .into());
                }
            };
        }

        Ok(value)
    }
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

/// Register which resource types a top-level statement may still produce.
fn index_types(node: &Node, id: usize, type_nodes: &mut HashMap<String, HashSet<usize>>) {
    match node {
        Node::Resource(resource) => {
            type_nodes
                .entry(resource.type_name.clone())
                .or_default()
                .insert(id);

            for item in &resource.body {
                index_types(item, id, type_nodes);
            }
        }
        Node::KeyBlock(block) => {
            for item in &block.body {
                index_types(item, id, type_nodes);
            }
        }
        Node::For(for_node) => {
            for item in &for_node.body {
                index_types(item, id, type_nodes);
            }
        }
        Node::If(if_node) => {
            for item in if_node.then_body.iter().chain(&if_node.else_body) {
                index_types(item, id, type_nodes);
            }
        }
        Node::Pair(_) => {}
    }
}

/// Drop a completed statement from the wildcard wait index.
fn complete(id: usize, type_nodes: &mut HashMap<String, HashSet<usize>>) {
    type_nodes.retain(|_, nodes| {
        nodes.remove(&id);
        !nodes.is_empty()
    });
}

/// Duplicate bindings within one body are definite errors.
fn validate_inline_bindings(body: &[Node], scope_word: &str) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();

    for node in body {
        let Some(key) = node.pair_key() else { continue };

        if !seen.insert(key) {
            return Err(shadow_error(key, scope_word, node.location()));
        }
    }

    Ok(())
}

fn shadow_error(variable: &str, scope_word: &str, location: &Location) -> Error {
    Error::structural(
        format!(
            "'{variable}' is already defined as a {scope_word} variable and cannot be reused"
        ),
        Some(location),
    )
}

fn first_duplicate(names: &[String]) -> Option<String> {
    let mut seen = HashSet::new();
    names.iter().find(|n| !seen.insert(n.as_str())).cloned()
}

fn name_string(value: &Value, location: &Location) -> EvalResult<String> {
    match value {
        Value::String(name) => Ok(name.clone()),
        Value::Int(name) => Ok(name.to_string()),
        other => Err(Error::structural(
            format!("resource name must be a string, found {}", other.type_name()),
            Some(location),
        )
        .into()),
    }
}

/// Truthiness of a condition value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Float(n) => *n != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::List(items) => !items.is_empty(),
        Value::Map(entries) => !entries.is_empty(),
        Value::Ref(_) => true,
    }
}

fn filters_match(entity: &Entity, filters: &[(String, FilterOp, Value)]) -> bool {
    filters.iter().all(|(field, op, expected)| {
        let actual = entity.scalar(field).cloned().unwrap_or(Value::Null);

        match op {
            FilterOp::Eq => actual == *expected,
            FilterOp::Ne => actual != *expected,
        }
    })
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value, location: &Location) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Ne => Ok(Value::Bool(left != right)),
        BinaryOp::And => Ok(Value::Bool(truthy(left) && truthy(right))),
        BinaryOp::Or => Ok(Value::Bool(truthy(left) || truthy(right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right, location)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, left, right, location)
        }
    }
}

fn compare(left: &Value, right: &Value, location: &Location) -> Result<std::cmp::Ordering> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        _ => {
            let l = as_number(left, location)?;
            let r = as_number(right, location)?;
            Ok(l.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Equal))
        }
    }
}

fn as_number(value: &Value, location: &Location) -> Result<f64> {
    match value {
        Value::Int(n) => Ok(*n as f64),
        Value::Float(n) => Ok(*n),
        other => Err(Error::structural(
            format!(
                "can't do arithmetic on '{}' because it's not a number",
                other
            ),
            Some(location),
        )),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value, location: &Location) -> Result<Value> {
    if let (Value::Int(l), Value::Int(r)) = (left, right) {
        if *r == 0 && matches!(op, BinaryOp::Div | BinaryOp::Mod) {
            return Err(Error::structural("division by zero", Some(location)));
        }

        return Ok(Value::Int(match op {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            _ => l % r,
        }));
    }

    let l = as_number(left, location)?;
    let r = as_number(right, location)?;

    Ok(Value::Float(match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l / r,
        _ => l % r,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityType, FieldSchema};
    use crate::suspend::Diagnostic;
    use strato_lang::parse_file;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry.register(
            EntityType::root("test::network")
                .field(FieldSchema::scalar("cidr").required())
                .field(FieldSchema::scalar("label").updatable())
                .field(FieldSchema::scalar("id").output())
                .id_field("id"),
        );
        registry.register(
            EntityType::root("test::subnet")
                .field(FieldSchema::scalar("network"))
                .field(FieldSchema::scalar("zone").updatable())
                .field(FieldSchema::entity_list("route", "test::route")),
        );
        registry.register(
            EntityType::subresource("test::route")
                .field(FieldSchema::scalar("destination"))
                .field(FieldSchema::scalar("gateway").updatable())
                .key_fields(&["destination"]),
        );
        registry
    }

    fn resolve(source: &str) -> Result<Resolution> {
        resolve_with(source, None)
    }

    fn resolve_with(source: &str, current: Option<&StateTracker>) -> Result<Resolution> {
        let file = parse_file(source, "main.strato").expect("parse");
        let registry = registry();
        let resolver = Resolver::new(&registry);
        let resolver = match current {
            Some(state) => resolver.with_current(state),
            None => resolver,
        };
        resolver.resolve(&[file])
    }

    #[test]
    fn test_forward_reference_converges() {
        let resolution = resolve(
            "test::subnet \"a\"\n\
             \x20   network: $(test::network main cidr)\n\
             \x20   zone: $(region)\n\
             end\n\
             region: \"us-east-1\"\n\
             test::network \"main\"\n\
             \x20   cidr: \"10.0.0.0/16\"\n\
             end\n",
        )
        .unwrap();

        let subnet = &resolution.resources["test::subnet::a"];
        assert_eq!(subnet.scalar("network"), Some(&Value::from("10.0.0.0/16")));
        assert_eq!(subnet.scalar("zone"), Some(&Value::from("us-east-1")));
    }

    #[test]
    fn test_statement_order_does_not_change_the_result() {
        let statements = [
            "region: \"us-east-1\"",
            "label: \"net-$(region)\"",
            "test::network \"main\"\n    cidr: \"10.0.0.0/16\"\n    label: $(label)\nend",
        ];

        let orders: [[usize; 3]; 3] = [[0, 1, 2], [2, 1, 0], [1, 2, 0]];
        let mut labels = Vec::new();

        for order in orders {
            let source: Vec<&str> = order.iter().map(|&i| statements[i]).collect();
            let resolution = resolve(&source.join("\n")).unwrap();
            let network = &resolution.resources["test::network::main"];
            labels.push(network.scalar("label").cloned());
        }

        assert!(labels.iter().all(|l| *l == Some(Value::from("net-us-east-1"))));
    }

    #[test]
    fn test_unresolvable_reference_reports_convergence_failure() {
        let error = resolve("zone: $(missing)").unwrap_err();
        assert!(error.is_convergence());
    }

    #[test]
    fn test_circular_dependency_reports_single_diagnostic() {
        let error = resolve(
            "test::subnet \"a\"\n\
             \x20   network: $(test::subnet b zone)\n\
             end\n\
             test::subnet \"b\"\n\
             \x20   network: $(test::subnet a zone)\n\
             end\n",
        )
        .unwrap_err();

        let Error::Convergence(report) = error else {
            panic!("expected convergence failure");
        };

        let circular: Vec<_> = report
            .diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::Circular { members, .. } => Some(members.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(circular.len(), 1, "one circular diagnostic, got {report}");
        assert!(circular[0].contains(&"test::subnet::a".to_string()));
        assert!(circular[0].contains(&"test::subnet::b".to_string()));
    }

    #[test]
    fn test_duplicate_binding_is_a_definite_error() {
        let error = resolve("region: \"a\"\nregion: \"b\"").unwrap_err();
        assert!(matches!(error, Error::Structural { .. }));
    }

    #[test]
    fn test_duplicate_resource_definition_is_a_definite_error() {
        let error = resolve(
            "test::network \"main\"\n    cidr: \"10.0.0.0/16\"\nend\n\
             test::network \"main\"\n    cidr: \"10.1.0.0/16\"\nend\n",
        )
        .unwrap_err();

        assert!(matches!(error, Error::Structural { .. }));
    }

    #[test]
    fn test_unknown_type_and_field_are_definite_errors() {
        assert!(matches!(
            resolve("bogus::thing \"a\"\nend").unwrap_err(),
            Error::Structural { .. }
        ));

        assert!(matches!(
            resolve("test::network \"main\"\n    bogus: 1\nend").unwrap_err(),
            Error::Structural { .. }
        ));
    }

    #[test]
    fn test_for_expands_once_per_element() {
        let resolution = resolve(
            "for az, cidr in [\"a\", \"b\"], [\"10.0.1.0/24\", \"10.0.2.0/24\"]\n\
             \x20   test::network \"net-$(az)\"\n\
             \x20       cidr: $(cidr)\n\
             \x20   end\n\
             end\n",
        )
        .unwrap();

        assert_eq!(resolution.resources.len(), 2);
        assert_eq!(
            resolution.resources["test::network::net-a"].scalar("cidr"),
            Some(&Value::from("10.0.1.0/24"))
        );
        assert_eq!(
            resolution.resources["test::network::net-b"].scalar("cidr"),
            Some(&Value::from("10.0.2.0/24"))
        );
    }

    #[test]
    fn test_for_restores_prior_bindings() {
        let resolution = resolve(
            "az: \"original\"\n\
             for item in [\"x\", \"y\"]\n\
             \x20   test::network \"net-$(item)\"\n\
             \x20       cidr: \"10.0.0.0/16\"\n\
             \x20   end\n\
             end\n\
             test::network \"after\"\n\
             \x20   cidr: \"10.9.0.0/16\"\n\
             \x20   label: $(az)\n\
             end\n",
        )
        .unwrap();

        // The loop variable 'item' was removed after the loop; 'az' was
        // never touched.
        assert_eq!(
            resolution.resources["test::network::after"].scalar("label"),
            Some(&Value::from("original"))
        );
    }

    #[test]
    fn test_for_mismatched_lengths_is_a_definite_error() {
        let error = resolve(
            "for a, b in [1, 2], [1]\n\
             \x20   test::network \"n-$(a)\"\n\
             \x20       cidr: \"10.0.0.0/16\"\n\
             \x20   end\n\
             end\n",
        )
        .unwrap_err();

        assert!(matches!(error, Error::Structural { .. }));
    }

    #[test]
    fn test_loop_variable_shadowing_file_binding_is_a_definite_error() {
        let error = resolve(
            "region: \"us-east-1\"\n\
             for region in [\"a\"]\n\
             \x20   x: $(region)\n\
             end\n",
        )
        .unwrap_err();

        assert!(matches!(error, Error::Structural { .. }));
    }

    #[test]
    fn test_wildcard_waits_for_producers() {
        // The wildcard reference appears before the loop that produces the
        // networks; it must defer until the loop completes, then see both.
        let resolution = resolve(
            "test::subnet \"all\"\n\
             \x20   network: $(test::network * | cidr == \"10.0.1.0/24\")\n\
             \x20   zone: \"z\"\n\
             end\n\
             for az, cidr in [\"a\", \"b\"], [\"10.0.1.0/24\", \"10.0.2.0/24\"]\n\
             \x20   test::network \"net-$(az)\"\n\
             \x20       cidr: $(cidr)\n\
             \x20   end\n\
             end\n",
        )
        .unwrap();

        let subnet = &resolution.resources["test::subnet::all"];
        let Some(Value::List(networks)) = subnet.scalar("network") else {
            panic!("expected a list");
        };

        assert_eq!(
            networks,
            &vec![Value::Ref("test::network::net-a".into())]
        );
    }

    #[test]
    fn test_conditional_selects_branch() {
        let resolution = resolve(
            "count: 2\n\
             if count > 1\n\
             \x20   zone: \"multi\"\n\
             else\n\
             \x20   zone: \"single\"\n\
             end\n\
             test::subnet \"a\"\n\
             \x20   zone: $(zone)\n\
             end\n",
        )
        .unwrap();

        assert_eq!(
            resolution.resources["test::subnet::a"].scalar("zone"),
            Some(&Value::from("multi"))
        );
    }

    #[test]
    fn test_nested_blocks_build_sub_entities() {
        let resolution = resolve(
            "test::subnet \"a\"\n\
             \x20   zone: \"z\"\n\
             \x20   route \"default\"\n\
             \x20       destination: \"0.0.0.0/0\"\n\
             \x20       gateway: \"igw\"\n\
             \x20   end\n\
             \x20   route \"internal\"\n\
             \x20       destination: \"10.0.0.0/8\"\n\
             \x20       gateway: \"local\"\n\
             \x20   end\n\
             end\n",
        )
        .unwrap();

        let subnet = &resolution.resources["test::subnet::a"];
        let Some(FieldValue::EntityList(routes)) = subnet.field("route") else {
            panic!("expected routes");
        };

        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].primary_key(), "0.0.0.0/0");
        assert_eq!(routes[0].name(), "route");
        assert_eq!(routes[0].parent(), Some("test::subnet::a"));
        assert!(routes[0].is_configured("gateway"));
    }

    #[test]
    fn test_unconfigured_fields_copied_from_current_state() {
        let registry = registry();
        let mut current = StateTracker::new();

        let mut recorded = Entity::new(registry.schema("test::network").unwrap(), "main");
        recorded.set_field("id", FieldValue::Scalar(Value::from("net-123")));
        recorded.set_field("cidr", FieldValue::Scalar(Value::from("10.0.0.0/16")));
        recorded.mark_configured("cidr");
        current.put("main.strato", recorded);

        let resolution = resolve_with(
            "test::network \"main\"\n    cidr: \"10.0.0.0/16\"\nend\n",
            Some(&current),
        )
        .unwrap();

        let network = &resolution.resources["test::network::main"];
        assert_eq!(network.scalar("id"), Some(&Value::from("net-123")));
        assert!(!network.is_configured("id"));
    }

    #[test]
    fn test_required_field_validation() {
        let resolution = resolve("test::network \"main\"\n    label: \"x\"\nend\n").unwrap();
        assert!(resolution.validate().is_err());
    }

    #[test]
    fn test_interpolation_and_arithmetic() {
        let resolution = resolve(
            "count: 1 + 2\n\
             test::subnet \"a\"\n\
             \x20   zone: \"zone-$(count)\"\n\
             end\n",
        )
        .unwrap();

        assert_eq!(
            resolution.resources["test::subnet::a"].scalar("zone"),
            Some(&Value::from("zone-3"))
        );
    }
}
