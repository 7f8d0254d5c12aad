//! Error taxonomy for the engine
//!
//! Suspensions (see [`crate::suspend`]) are not errors: they drive the
//! resolver's retry loop and only surface here, aggregated, when a round
//! makes no progress.

use crate::suspend::ConvergenceReport;
use strato_lang::{Location, ParseError};
use thiserror::Error;

/// Errors that abort a run
#[derive(Error, Debug)]
pub enum Error {
    /// A definite configuration mistake; retrying cannot fix it
    #[error("{}{message}", prefix(.location))]
    Structural {
        message: String,
        location: Option<Location>,
    },

    /// The resolver stopped making progress with references unresolved
    #[error("{0}")]
    Convergence(ConvergenceReport),

    /// A provider side effect failed; state reflects everything executed
    /// before the failure
    #[error("can't {action} {label}")]
    Execution {
        action: &'static str,
        label: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The state backend failed to load or save
    #[error("state backend error")]
    State(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A source file failed to parse
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl Error {
    pub fn structural(message: impl Into<String>, location: Option<&Location>) -> Self {
        Self::Structural {
            message: message.into(),
            location: location.cloned(),
        }
    }

    pub fn execution(action: &'static str, label: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Execution {
            action,
            label: label.into(),
            source: source.into(),
        }
    }

    pub fn state(source: anyhow::Error) -> Self {
        Self::State(source.into())
    }

    /// Whether this is a convergence failure, i.e. unresolved suspensions
    pub fn is_convergence(&self) -> bool {
        matches!(self, Self::Convergence(_))
    }
}

fn prefix(location: &Option<Location>) -> String {
    location
        .as_ref()
        .map(|l| format!("{l}: "))
        .unwrap_or_default()
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
