use super::change_set::{
    ChangeSet, DataModificationItem, PostSubmitFailure, SubmitResult, SubmitStage,
};
use super::hooks::SubmitPipelineServices;
use super::validation::{ChangeSetValidationError, ValidationResult, ValidationSeverity};
use crate::context::InvocationContext;
use crate::error::ApiError;

/// Drives one change-set through
/// `Authorization -> Validation -> PreSubmit -> Submit -> PostSubmit`.
///
/// Everything before `Submit` is side-effect free for the store; the first durable
/// write is the tracker commit. Post-submit hook failures are collected into the
/// result and logged: the commit has already happened and is not undone.
pub struct SubmitPipeline<'a> {
    ctx: &'a InvocationContext,
    services: SubmitPipelineServices,
    stage: SubmitStage,
}

impl<'a> SubmitPipeline<'a> {
    /// # Errors
    /// Returns a configuration error if a submission contract cannot be resolved.
    pub fn new(ctx: &'a InvocationContext) -> Result<Self, ApiError> {
        let services = SubmitPipelineServices::resolve(ctx.services())?;
        Ok(Self {
            ctx,
            services,
            stage: SubmitStage::Authorization,
        })
    }

    #[must_use]
    pub fn stage(&self) -> SubmitStage {
        self.stage
    }

    fn advance(&mut self) {
        if let Some(next) = self.stage.next() {
            tracing::debug!(
                operation_id = %self.ctx.id(),
                from = %self.stage,
                to = %next,
                "Submit stage"
            );
            self.stage = next;
        }
    }

    /// Run every stage.
    ///
    /// # Errors
    /// - `NotAuthorized` / `ResourceNotFound` during authorization
    /// - `Validation` with every collected result
    /// - initializer, hook and provider errors before or during the commit
    /// - `Cancelled` when the token fires before the commit
    pub async fn run(mut self, change_set: ChangeSet) -> Result<SubmitResult, ApiError> {
        let max = self.ctx.config().submit.max_change_set_size;
        if change_set.len() > max {
            return Err(ApiError::InvalidRequest(format!(
                "change-set has {} items, the maximum is {max}",
                change_set.len()
            )));
        }
        let mut items = change_set.into_items();

        self.authorize(&mut items).await?;
        self.advance();

        self.validate(&items).await?;
        self.advance();

        let tracker = self.services.tracker_factory.open()?;
        for item in &mut items {
            self.ctx.ensure_active()?;
            self.services
                .initializer
                .initialize(self.ctx, tracker.as_ref(), item)
                .await?;
            self.services.filter.on_processing(self.ctx, item).await?;
        }
        self.advance();

        self.ctx.ensure_active()?;
        let affected = self
            .services
            .executor
            .execute_submit(self.ctx, tracker.as_ref(), &items)
            .await?;
        tracing::info!(
            operation_id = %self.ctx.id(),
            items = items.len(),
            affected,
            "Change-set committed"
        );
        self.advance();

        let post_submit_failures = self.post_submit(&items).await;
        self.advance();

        Ok(SubmitResult {
            items,
            affected,
            post_submit_failures,
        })
    }

    async fn authorize(&self, items: &mut [DataModificationItem]) -> Result<(), ApiError> {
        let model = self.ctx.model();
        for item in items.iter_mut() {
            self.ctx.ensure_active()?;
            let set = model
                .visible_entity_set(&item.entity_set)
                .ok_or_else(|| ApiError::ResourceNotFound(item.entity_set.clone()))?;
            item.entity_type = Some(set.entity_type.clone());

            if !self.services.authorizer.authorize(self.ctx, item).await? {
                tracing::warn!(
                    operation_id = %self.ctx.id(),
                    item = %item.describe(),
                    "Change-set item denied"
                );
                return Err(ApiError::not_authorized(
                    item.entity_set.clone(),
                    item.action.access_action(),
                ));
            }
        }
        Ok(())
    }

    async fn validate(&self, items: &[DataModificationItem]) -> Result<(), ApiError> {
        let mut all = Vec::new();
        for (index, item) in items.iter().enumerate() {
            self.ctx.ensure_active()?;
            let mut results: Vec<ValidationResult> = Vec::new();
            self.services
                .validator
                .validate(self.ctx, item, &mut results)
                .await?;
            for mut r in results {
                r.item_index = Some(index);
                all.push(r);
            }
        }

        for r in all.iter().filter(|r| r.severity == ValidationSeverity::Warning) {
            tracing::warn!(id = %r.id, message = %r.message, "Change-set validation warning");
        }
        let error = ChangeSetValidationError::new(all);
        if error.error_count() > 0 {
            tracing::debug!(
                operation_id = %self.ctx.id(),
                errors = error.error_count(),
                "Change-set rejected by validation"
            );
            return Err(error.into());
        }
        Ok(())
    }

    async fn post_submit(&self, items: &[DataModificationItem]) -> Vec<PostSubmitFailure> {
        let mut failures = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let outcome = if self.ctx.is_cancelled() {
                Err(ApiError::Cancelled)
            } else {
                self.services.filter.on_processed(self.ctx, item).await
            };
            if let Err(e) = outcome {
                tracing::error!(
                    operation_id = %self.ctx.id(),
                    item = %item.describe(),
                    error = %e,
                    "Post-submit hook failed after commit"
                );
                failures.push(PostSubmitFailure {
                    index,
                    entity_set: item.entity_set.clone(),
                    action: item.action,
                    message: e.to_string(),
                });
            }
        }
        failures
    }
}
