//! Suspension signals and convergence-failure diagnosis
//!
//! A [`Suspension`] means a statement referenced a value that nothing has
//! produced *yet*; the resolver collects it and retries the statement on the
//! next round. Suspensions become user-visible only when a whole round makes
//! no progress, at which point [`ConvergenceReport::from_suspensions`] links
//! them by cause, deduplicates them, and merges cyclic creation failures
//! into a single circular-dependency diagnostic.

use crate::error::Error;
use indexmap::{IndexMap, IndexSet};
use std::fmt;
use strato_lang::Location;

/// What a suspended statement was waiting for
#[derive(Debug, Clone, PartialEq)]
pub enum SuspendKind {
    /// A scope variable lookup failed
    Value { name: String },
    /// A resource lookup by `type::name` failed
    Find { type_name: String, name: String },
    /// A wildcard lookup can't resolve while statements that may still
    /// produce resources of the type are pending
    Wildcard { type_name: String },
    /// A resource body couldn't be evaluated; wraps the inner suspension
    CreateResource { key: String },
    /// Several statements in one body suspended together
    Multiple(Vec<Suspension>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suspension {
    pub kind: SuspendKind,
    pub message: String,
    pub location: Option<Location>,
    pub cause: Option<Box<Suspension>>,
}

impl Suspension {
    pub fn value(name: &str, location: &Location) -> Self {
        Self {
            kind: SuspendKind::Value {
                name: name.to_string(),
            },
            message: format!("can't resolve '{name}'"),
            location: Some(location.clone()),
            cause: None,
        }
    }

    pub fn find(type_name: &str, name: &str, location: &Location) -> Self {
        Self {
            kind: SuspendKind::Find {
                type_name: type_name.to_string(),
                name: name.to_string(),
            },
            message: format!("can't find resource of type '{type_name}' named '{name}'"),
            location: Some(location.clone()),
            cause: None,
        }
    }

    pub fn wildcard(type_name: &str, location: &Location) -> Self {
        Self {
            kind: SuspendKind::Wildcard {
                type_name: type_name.to_string(),
            },
            message: format!("can't resolve wildcard reference to type '{type_name}'"),
            location: Some(location.clone()),
            cause: None,
        }
    }

    pub fn create(key: &str, location: &Location, cause: Suspension) -> Self {
        Self {
            kind: SuspendKind::CreateResource {
                key: key.to_string(),
            },
            message: format!("can't create resource '{key}'"),
            location: Some(location.clone()),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn multiple(errors: Vec<Suspension>) -> Self {
        Self {
            kind: SuspendKind::Multiple(errors),
            message: "multiple statements suspended".to_string(),
            location: None,
            cause: None,
        }
    }

    /// Walk the cause chain to the innermost suspension.
    pub fn root_cause(&self) -> &Suspension {
        let mut cause = self;
        while let Some(inner) = cause.cause.as_deref() {
            cause = inner;
        }
        cause
    }

    /// The `type::name` key for creation suspensions.
    fn create_key(&self) -> Option<&str> {
        match &self.kind {
            SuspendKind::CreateResource { key } => Some(key),
            _ => None,
        }
    }

    /// The `type::name` key for find suspensions.
    fn find_key(&self) -> Option<String> {
        match &self.kind {
            SuspendKind::Find { type_name, name } => Some(format!("{type_name}::{name}")),
            _ => None,
        }
    }

    fn flatten_into(self, target: &mut Vec<Suspension>) {
        match self.kind {
            SuspendKind::Multiple(errors) => {
                for error in errors {
                    error.flatten_into(target);
                }
            }
            _ => target.push(self),
        }
    }
}

impl fmt::Display for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(location) = &self.location {
            write!(f, " ({location})")?;
        }

        if let Some(cause) = &self.cause {
            write!(f, "\n  caused by: {cause}")?;
        }

        Ok(())
    }
}

/// One entry of a convergence-failure report
#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// A suspension with no deeper structure
    Unresolved(Suspension),
    /// A resource couldn't be created, and other failures hang off it
    Dependent {
        cause: Suspension,
        related: Vec<Suspension>,
    },
    /// A cycle among resource creations
    Circular {
        members: Vec<String>,
        related: Vec<Suspension>,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved(suspension) => write!(f, "{suspension}"),
            Self::Dependent { cause, related } => {
                write!(f, "{cause}")?;
                for suspension in related {
                    write!(f, "\n  blocked: {}", suspension.message)?;
                }
                Ok(())
            }
            Self::Circular { members, related } => {
                write!(f, "circular dependency between {}", members.join(", "))?;
                for suspension in related {
                    write!(f, "\n  blocked: {}", suspension.message)?;
                }
                Ok(())
            }
        }
    }
}

/// Aggregated, deduplicated suspensions after a zero-progress round
#[derive(Debug, Clone)]
pub struct ConvergenceReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl ConvergenceReport {
    /// Build a report out of the suspensions left over by the final round.
    ///
    /// Creation failures are keyed by resource address; failures whose root
    /// cause is a failed lookup of an address that itself failed to create
    /// are grouped under that creation; cycles among those groups collapse
    /// into one circular-dependency diagnostic.
    pub fn from_suspensions(errors: Vec<Suspension>) -> Self {
        let mut flattened: Vec<Suspension> = Vec::new();
        for error in errors {
            error.flatten_into(&mut flattened);
        }

        // Last creation failure per resource address wins; everything else
        // keeps source order.
        let mut create_errors: IndexMap<String, usize> = IndexMap::new();
        let mut other_errors: Vec<usize> = Vec::new();
        let mut caused_by_find: IndexMap<String, Vec<usize>> = IndexMap::new();

        for (i, error) in flattened.iter().enumerate() {
            if let Some(key) = error.create_key() {
                create_errors.insert(key.to_string(), i);
            } else {
                other_errors.push(i);
            }

            if let Some(key) = error.root_cause().find_key() {
                caused_by_find.entry(key).or_default().push(i);
            }
        }

        let mut dependents: IndexMap<String, (usize, Vec<usize>)> = IndexMap::new();
        for (key, related) in &caused_by_find {
            if let Some(&cause) = create_errors.get(key) {
                dependents.insert(key.clone(), (cause, related.clone()));
            }
        }

        enum Item {
            Plain(usize),
            Dependent(String),
            Circular(Vec<String>, Vec<usize>),
        }

        let mut display: Vec<Item> = Vec::new();
        let mut consumed: IndexSet<usize> = IndexSet::new();

        for (cause, related) in dependents.values() {
            consumed.insert(*cause);
            consumed.extend(related.iter().copied());
        }

        for &i in create_errors.values() {
            if !consumed.contains(&i) {
                display.push(Item::Plain(i));
            }
        }

        let mut seen_messages: IndexSet<String> = IndexSet::new();
        for &i in &other_errors {
            if !consumed.contains(&i) && seen_messages.insert(flattened[i].message.clone()) {
                display.push(Item::Plain(i));
            }
        }

        for key in dependents.keys() {
            display.push(Item::Dependent(key.clone()));
        }

        // Peel dependents off one at a time; a creation key revisited within
        // one walk marks a cycle, and everything seen so far is part of it.
        let mut remaining = dependents.clone();

        while !remaining.is_empty() {
            let first = remaining.keys().next().cloned().unwrap_or_default();
            let mut seen: IndexSet<String> = IndexSet::new();

            if find_cycle(&remaining, &flattened, &first, &mut seen) {
                let mut related: Vec<usize> = Vec::new();

                display.retain(|item| match item {
                    Item::Dependent(key) if seen.contains(key) => {
                        if let Some((_, ids)) = dependents.get(key) {
                            related.extend(ids.iter().copied());
                        }
                        false
                    }
                    _ => true,
                });

                related.retain(|&i| {
                    flattened[i]
                        .create_key()
                        .is_none_or(|key| !seen.contains(key))
                });

                display.push(Item::Circular(seen.iter().cloned().collect(), related));
            }

            remaining.shift_remove(&first);
        }

        // Materialize the display items.
        let diagnostics = display
            .into_iter()
            .map(|item| match item {
                Item::Plain(i) => Diagnostic::Unresolved(flattened[i].clone()),
                Item::Dependent(key) => {
                    let (cause, related) = &dependents[&key];
                    Diagnostic::Dependent {
                        cause: flattened[*cause].clone(),
                        related: related
                            .iter()
                            .filter(|&&i| i != *cause)
                            .map(|&i| flattened[i].clone())
                            .collect(),
                    }
                }
                Item::Circular(members, related) => Diagnostic::Circular {
                    members,
                    related: related.into_iter().map(|i| flattened[i].clone()).collect(),
                },
            })
            .collect();

        Self { diagnostics }
    }

    pub fn into_error(self) -> Error {
        Error::Convergence(self)
    }
}

fn find_cycle(
    dependents: &IndexMap<String, (usize, Vec<usize>)>,
    flattened: &[Suspension],
    key: &str,
    seen: &mut IndexSet<String>,
) -> bool {
    if !seen.insert(key.to_string()) {
        return true;
    }

    let Some((_, related)) = dependents.get(key) else {
        return false;
    };

    related.iter().any(|&i| {
        flattened[i]
            .create_key()
            .is_some_and(|next| dependents.contains_key(next) && {
                find_cycle(dependents, flattened, next, seen)
            })
    })
}

impl fmt::Display for ConvergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "couldn't resolve the configuration:")?;

        for (i, diagnostic) in self.diagnostics.iter().enumerate() {
            if i > 0 {
                write!(f, "\n---\n")?;
            }
            write!(f, "{diagnostic}")?;
        }

        Ok(())
    }
}

/// Outcome of evaluating one statement or expression
#[derive(Debug)]
pub enum EvalError {
    /// Try again on a later round
    Suspend(Suspension),
    /// Abort the run now
    Fatal(Error),
}

impl From<Error> for EvalError {
    fn from(error: Error) -> Self {
        Self::Fatal(error)
    }
}

/// Result type for statement/expression evaluation
pub type EvalResult<T> = std::result::Result<T, EvalError>;
