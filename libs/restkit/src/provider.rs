//! Contracts implemented by the underlying data provider.
//!
//! The core never talks to a store directly. A provider supplies the base model, a
//! concrete [`Queryable`] per entity set, query execution over fully sourced
//! expressions, and a per-request [`ChangeTracker`] that stages and commits writes.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::InvocationContext;
use crate::model::ApiModel;
use crate::query::QueryExpr;
use crate::record::{EntityRecord, KeyValues};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("conflict in '{entity_set}': {message}")]
    Conflict { entity_set: String, message: String },

    #[error("entity set '{0}' is not backed by this provider")]
    UnknownEntitySet(String),

    #[error("unsupported query: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    #[must_use]
    pub fn conflict(entity_set: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            entity_set: entity_set.into(),
            message: message.into(),
        }
    }
}

/// Supplies the base schema. Called once per [`crate::ApiBuilder::build`].
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn base_model(&self, ctx: &InvocationContext) -> Result<ApiModel, ProviderError>;
}

/// Hands out concrete queryables rooted at the store.
pub trait QuerySourceProvider: Send + Sync {
    /// `None` when this provider does not back `entity_set`.
    fn queryable(&self, entity_set: &str, element_type: &str) -> Option<Arc<dyn Queryable>>;
}

/// Concrete, provider-owned root of a query.
pub trait Queryable: Send + Sync + fmt::Debug {
    fn entity_set(&self) -> &str;

    fn element_type(&self) -> &str;

    /// Provider able to execute expressions rooted at this queryable.
    fn provider(&self) -> Arc<dyn QueryProvider>;

    fn as_any(&self) -> &dyn Any;
}

/// Executes fully sourced expressions.
#[async_trait]
pub trait QueryProvider: Send + Sync {
    async fn execute(&self, query: &QueryExpr) -> Result<Vec<EntityRecord>, ProviderError>;

    async fn count(&self, query: &QueryExpr) -> Result<u64, ProviderError>;
}

/// Per-request unit of work.
///
/// `track_*` only stage changes; nothing is visible to other requests before
/// [`ChangeTracker::commit`] succeeds.
#[async_trait]
pub trait ChangeTracker: Send + Sync {
    /// Current state of an entity, including changes staged on this tracker.
    async fn find(
        &self,
        entity_set: &str,
        key: &KeyValues,
    ) -> Result<Option<EntityRecord>, ProviderError>;

    async fn track_insert(&self, entity_set: &str, record: EntityRecord)
    -> Result<(), ProviderError>;

    async fn track_update(
        &self,
        entity_set: &str,
        key: &KeyValues,
        record: EntityRecord,
    ) -> Result<(), ProviderError>;

    async fn track_delete(&self, entity_set: &str, key: &KeyValues) -> Result<(), ProviderError>;

    /// Apply every staged change. Returns the number of affected entities.
    async fn commit(&self) -> Result<u64, ProviderError>;
}

pub trait ChangeTrackerFactory: Send + Sync {
    /// Open a tracker for one submission.
    ///
    /// # Errors
    /// Returns a provider error if no unit of work can be started.
    fn open(&self) -> Result<Arc<dyn ChangeTracker>, ProviderError>;
}
