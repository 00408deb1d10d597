//! Error taxonomy shared by both pipelines.
//!
//! Stages never translate errors into transport status codes. The host maps
//! [`ApiError::category`] to whatever its protocol needs.

use std::fmt;

use thiserror::Error;

use crate::model::ModelError;
use crate::provider::ProviderError;
use crate::submit::ChangeSetValidationError;

/// Startup or wiring problem. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("service contract not registered: {contract}")]
    NotRegistered { contract: &'static str },

    #[error("cyclic hook resolution while resolving {contract}")]
    CyclicResolution { contract: &'static str },

    #[error("cyclic expansion of resource '{resource}' (chain: {chain})")]
    CyclicExpansion { resource: String, chain: String },

    #[error("no sourcer claimed resource '{resource}'")]
    Unsourceable { resource: String },

    #[error("sourcing of '{resource}' left logical references in the expression")]
    IncompleteSourcing { resource: String },

    #[error("query pipeline exceeded the maximum depth of {max}")]
    PipelineDepthExceeded { max: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// What the caller tried to do when an authorization check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessAction {
    Read,
    Insert,
    Update,
    Delete,
    Execute,
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessAction::Read => write!(f, "read"),
            AccessAction::Insert => write!(f, "insert"),
            AccessAction::Update => write!(f, "update"),
            AccessAction::Delete => write!(f, "delete"),
            AccessAction::Execute => write!(f, "execute"),
        }
    }
}

/// Coarse classification for the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Authorization,
    NotFound,
    Precondition,
    InvalidRequest,
    Validation,
    Provider,
    Hook,
    Cancelled,
}

/// Unified error returned by every pipeline entry point.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("not authorized to {action} '{resource}'")]
    NotAuthorized {
        resource: String,
        action: AccessAction,
    },

    #[error("resource '{0}' was not found")]
    ResourceNotFound(String),

    #[error("no entity in '{entity_set}' matches key {key}")]
    EntityNotFound { entity_set: String, key: String },

    #[error("precondition failed for '{entity_set}': {reason}")]
    PreconditionFailed { entity_set: String, reason: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Validation(#[from] ChangeSetValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("hook {hook} failed: {source}")]
    Hook {
        hook: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl ApiError {
    #[must_use]
    pub fn not_authorized(resource: impl Into<String>, action: AccessAction) -> Self {
        Self::NotAuthorized {
            resource: resource.into(),
            action,
        }
    }

    #[must_use]
    pub fn hook(hook: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Hook {
            hook: hook.into(),
            source,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ApiError::Configuration(_) | ApiError::Model(_) => ErrorCategory::Configuration,
            ApiError::NotAuthorized { .. } => ErrorCategory::Authorization,
            ApiError::ResourceNotFound(_) | ApiError::EntityNotFound { .. } => {
                ErrorCategory::NotFound
            }
            ApiError::PreconditionFailed { .. } => ErrorCategory::Precondition,
            ApiError::InvalidQuery(_) | ApiError::InvalidRequest(_) => {
                ErrorCategory::InvalidRequest
            }
            ApiError::Validation(_) => ErrorCategory::Validation,
            ApiError::Provider(_) => ErrorCategory::Provider,
            ApiError::Hook { .. } => ErrorCategory::Hook,
            ApiError::Cancelled => ErrorCategory::Cancelled,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// Validation results if this error aborted a change-set.
    #[must_use]
    pub fn validation_results(&self) -> Option<&[crate::submit::ValidationResult]> {
        match self {
            ApiError::Validation(e) => Some(e.results()),
            _ => None,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn categories_are_distinct_for_cancellation_and_authorization() {
        assert_eq!(ApiError::Cancelled.category(), ErrorCategory::Cancelled);
        assert!(ApiError::Cancelled.is_cancelled());

        let denied = ApiError::not_authorized("Orders", AccessAction::Read);
        assert_eq!(denied.category(), ErrorCategory::Authorization);
        assert!(!denied.is_cancelled());
        assert_eq!(denied.to_string(), "not authorized to read 'Orders'");
    }

    #[test]
    fn configuration_errors_convert() {
        let err: ApiError = ConfigurationError::NotRegistered {
            contract: "dyn Sourcer",
        }
        .into();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(
            err.to_string(),
            "service contract not registered: dyn Sourcer"
        );
    }

    #[test]
    fn hook_error_keeps_source() {
        let err = ApiError::hook("OnInsertingCustomers", anyhow::anyhow!("boom"));
        assert_eq!(err.category(), ErrorCategory::Hook);
        assert_eq!(err.to_string(), "hook OnInsertingCustomers failed: boom");
    }
}
