//! # strato-core
//!
//! The engine behind strato: a deferred fixed-point resolver that turns
//! configuration syntax into entity graphs, a structural diff engine that
//! classifies every entity as Create/Update/Replace/Keep/Delete using
//! field-level mutability metadata, and a change scheduler that executes
//! the resulting plan in dependency-safe order while persisting recorded
//! state after every side effect.
//!
//! Providers (concrete resource implementations), the state persistence
//! backend, and the CLI live outside this crate and plug in through the
//! [`provider::ResourceProvider`], [`state::StateBackend`],
//! [`hooks::ChangeHook`], and [`workflow::ReplaceWorkflow`] traits.

pub mod diff;
pub mod entity;
pub mod error;
pub mod execute;
pub mod hooks;
pub mod provider;
pub mod resolver;
pub mod schema;
pub mod scope;
pub mod state;
pub mod suspend;
pub mod workflow;

pub use diff::{Action, Change, ChildDiff, Diff};
pub use entity::{Entity, FieldValue};
pub use error::{Error, Result};
pub use execute::{ExecuteContext, ExecutionListener, NullListener};
pub use hooks::{register_hook, ChangeHook, ChangeHookSettings};
pub use provider::{ProviderContext, ResourceProvider};
pub use resolver::{Resolution, Resolver};
pub use schema::{EntityType, FieldSchema, TypeRegistry};
pub use scope::{Binding, Scope, ScopeKind, ScopeRef};
pub use state::{FileState, NullStateBackend, StateBackend, StateTracker};
pub use suspend::{ConvergenceReport, Diagnostic, SuspendKind, Suspension};
pub use workflow::{find_workflow, register_workflow, ReplaceWorkflow, WorkflowContext, WorkflowSettings};
