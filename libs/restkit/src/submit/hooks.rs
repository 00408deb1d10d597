//! Submission contracts and their terminal implementations.

use std::sync::Arc;

use async_trait::async_trait;

use super::change_set::{ChangeAction, DataModificationItem};
use super::validation::ValidationResult;
use crate::context::InvocationContext;
use crate::error::{ApiError, ConfigurationError};
use crate::hooks::ServiceScope;
use crate::provider::{ChangeTracker, ChangeTrackerFactory};

/// Write authorization for one item.
#[async_trait]
pub trait ChangeSetItemAuthorizer: Send + Sync {
    /// `Ok(false)` denies the item and aborts the whole change-set.
    ///
    /// # Errors
    /// Errors abort the change-set unchanged.
    async fn authorize(
        &self,
        ctx: &InvocationContext,
        item: &DataModificationItem,
    ) -> Result<bool, ApiError>;
}

/// Appends findings for one item. Must not stop at the first problem.
#[async_trait]
pub trait ChangeSetItemValidator: Send + Sync {
    /// # Errors
    /// Errors abort the change-set; findings belong in `results`.
    async fn validate(
        &self,
        ctx: &InvocationContext,
        item: &DataModificationItem,
        results: &mut Vec<ValidationResult>,
    ) -> Result<(), ApiError>;
}

/// Resolves `item.resource` before submit.
#[async_trait]
pub trait ChangeSetInitializer: Send + Sync {
    /// # Errors
    /// `EntityNotFound`, `PreconditionFailed` and provider errors.
    async fn initialize(
        &self,
        ctx: &InvocationContext,
        tracker: &dyn ChangeTracker,
        item: &mut DataModificationItem,
    ) -> Result<(), ApiError>;
}

/// Per-item interception around the commit.
#[async_trait]
pub trait ChangeSetItemFilter: Send + Sync {
    /// Before submit; may change `item.resource`, the changes are committed.
    ///
    /// # Errors
    /// Errors abort the change-set before anything is written.
    async fn on_processing(
        &self,
        ctx: &InvocationContext,
        item: &mut DataModificationItem,
    ) -> Result<(), ApiError>;

    /// After a successful commit.
    ///
    /// # Errors
    /// Errors are reported in the submit result; the commit stands.
    async fn on_processed(
        &self,
        ctx: &InvocationContext,
        item: &DataModificationItem,
    ) -> Result<(), ApiError>;
}

/// Durable write of a resolved change-set.
#[async_trait]
pub trait SubmitExecutor: Send + Sync {
    /// Returns the number of affected entities.
    ///
    /// # Errors
    /// Provider errors propagate; post-submit hooks are then skipped.
    async fn execute_submit(
        &self,
        ctx: &InvocationContext,
        tracker: &dyn ChangeTracker,
        items: &[DataModificationItem],
    ) -> Result<u64, ApiError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllWrites;

#[async_trait]
impl ChangeSetItemAuthorizer for AllowAllWrites {
    async fn authorize(
        &self,
        _ctx: &InvocationContext,
        _item: &DataModificationItem,
    ) -> Result<bool, ApiError> {
        Ok(true)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoItemFilter;

#[async_trait]
impl ChangeSetItemFilter for NoItemFilter {
    async fn on_processing(
        &self,
        _ctx: &InvocationContext,
        _item: &mut DataModificationItem,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn on_processed(
        &self,
        _ctx: &InvocationContext,
        _item: &DataModificationItem,
    ) -> Result<(), ApiError> {
        Ok(())
    }
}

/// Stages every item on the tracker, then commits once.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackingSubmitExecutor;

#[async_trait]
impl SubmitExecutor for TrackingSubmitExecutor {
    async fn execute_submit(
        &self,
        ctx: &InvocationContext,
        tracker: &dyn ChangeTracker,
        items: &[DataModificationItem],
    ) -> Result<u64, ApiError> {
        for item in items {
            let resource = item.resource.clone().ok_or_else(|| {
                ApiError::InvalidRequest(format!("{} was not initialized", item.describe()))
            })?;
            match item.action {
                ChangeAction::Insert => tracker.track_insert(&item.entity_set, resource).await?,
                ChangeAction::Update => {
                    tracker
                        .track_update(&item.entity_set, &item.key, resource)
                        .await?;
                }
                ChangeAction::Delete => tracker.track_delete(&item.entity_set, &item.key).await?,
            }
        }
        ctx.ensure_active()?;
        Ok(tracker.commit().await?)
    }
}

/// Submission contracts plus the unit of work, resolved once per submission.
#[derive(Clone)]
pub struct SubmitPipelineServices {
    pub authorizer: Arc<dyn ChangeSetItemAuthorizer>,
    pub validator: Arc<dyn ChangeSetItemValidator>,
    pub initializer: Arc<dyn ChangeSetInitializer>,
    pub filter: Arc<dyn ChangeSetItemFilter>,
    pub executor: Arc<dyn SubmitExecutor>,
    pub tracker_factory: Arc<dyn ChangeTrackerFactory>,
}

impl SubmitPipelineServices {
    /// # Errors
    /// Returns the first contract that cannot be resolved.
    pub fn resolve(scope: &ServiceScope) -> Result<Self, ConfigurationError> {
        Ok(Self {
            authorizer: scope.resolve::<dyn ChangeSetItemAuthorizer>()?,
            validator: scope.resolve::<dyn ChangeSetItemValidator>()?,
            initializer: scope.resolve::<dyn ChangeSetInitializer>()?,
            filter: scope.resolve::<dyn ChangeSetItemFilter>()?,
            executor: scope.resolve::<dyn SubmitExecutor>()?,
            tracker_factory: scope.resolve::<dyn ChangeTrackerFactory>()?,
        })
    }
}
