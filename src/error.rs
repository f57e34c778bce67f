//! Error types shared across the simulator
//!
//! Only [`ConfigError`] is fatal for a scenario. Backend and remediation errors
//! end a single remediation attempt and are reported through the event stream.

use std::time::Duration;

use thiserror::Error;

/// Errors detected while resolving a scenario configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The scenario does not run any strategy
    #[error("no strategies configured")]
    NoStrategies,

    /// Two strategies share the same name
    #[error("duplicate strategy name `{0}`")]
    DuplicateStrategy(String),

    /// A slow-path strategy has no connector to recreate
    #[error("strategy `{strategy}` has no connector id (set `connector_id` or {env})")]
    MissingConnectorId { strategy: String, env: &'static str },

    /// A numeric field is out of range
    #[error("invalid `{field}`: {details}")]
    Invalid { field: &'static str, details: String },
}

/// Failures of a single call against the remediation backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("describe of {id} failed: {details}")]
    Describe { id: String, details: String },

    #[error("delete of {id} failed: {details}")]
    Delete { id: String, details: String },

    #[error("create of {name} failed: {details}")]
    Create { name: String, details: String },
}

/// Outcome of a remediation attempt that did not restore the unit
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemediationError {
    /// A backend call failed, the attempt was abandoned
    #[error("transient backend error: {0}")]
    TransientBackend(#[from] BackendError),

    /// The connector was still present after the deletion wait bound
    #[error("deletion of {id} not confirmed within {waited:?}")]
    DeletionTimeout { id: String, waited: Duration },

    /// Another remediation already holds the unit
    #[error("a remediation is already in flight for {unit}")]
    AlreadyInFlight { unit: String },
}
