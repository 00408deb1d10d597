//! Hook chain links backed by a [`Conventions`] table.
//!
//! Each link answers for the entity sets it has a registration for and delegates
//! everything else to `next`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Conventions, HookPoint};
use crate::context::InvocationContext;
use crate::error::ApiError;
use crate::hooks::HookRegistryBuilder;
use crate::model::{
    ApiModel, EntitySet, ModelBuilder, ModelElement, ModelIssue, ModelVisibilityFilter,
    OperationDescriptor,
};
use crate::operation::{OperationArguments, OperationAuthorizer, OperationExecutor};
use crate::query::{
    QueryExpr, QueryExpressionAuthorizer, QueryExpressionContext, QueryExpressionExpander,
    QueryExpressionProcessor,
};
use crate::submit::{
    ChangeSetItemAuthorizer, ChangeSetItemFilter, ChangeSetItemValidator, DataModificationItem,
    ValidationResult,
};

pub(super) fn install(conventions: &Arc<Conventions>, hooks: &mut HookRegistryBuilder) {
    let c = Arc::clone(conventions);
    hooks.register::<dyn ModelBuilder, _>(move |_, next| {
        Ok(Arc::new(ConventionModelBuilder {
            conventions: Arc::clone(&c),
            next,
        }))
    });
    let c = Arc::clone(conventions);
    hooks.register::<dyn ModelVisibilityFilter, _>(move |_, next| {
        Ok(Arc::new(ConventionVisibility {
            conventions: Arc::clone(&c),
            next,
        }))
    });
    let c = Arc::clone(conventions);
    hooks.register::<dyn QueryExpressionAuthorizer, _>(move |_, next| {
        Ok(Arc::new(ConventionReadAuthorizer {
            conventions: Arc::clone(&c),
            next,
        }))
    });
    let c = Arc::clone(conventions);
    hooks.register::<dyn QueryExpressionExpander, _>(move |_, next| {
        Ok(Arc::new(ConventionExpander {
            conventions: Arc::clone(&c),
            next,
        }))
    });
    let c = Arc::clone(conventions);
    hooks.register::<dyn QueryExpressionProcessor, _>(move |_, next| {
        Ok(Arc::new(ConventionFilterProcessor {
            conventions: Arc::clone(&c),
            next,
        }))
    });
    let c = Arc::clone(conventions);
    hooks.register::<dyn ChangeSetItemAuthorizer, _>(move |_, next| {
        Ok(Arc::new(ConventionWriteAuthorizer {
            conventions: Arc::clone(&c),
            next,
        }))
    });
    let c = Arc::clone(conventions);
    hooks.register::<dyn ChangeSetItemValidator, _>(move |_, next| {
        Ok(Arc::new(ConventionValidator {
            conventions: Arc::clone(&c),
            next,
        }))
    });
    let c = Arc::clone(conventions);
    hooks.register::<dyn ChangeSetItemFilter, _>(move |_, next| {
        Ok(Arc::new(ConventionItemFilter {
            conventions: Arc::clone(&c),
            next,
        }))
    });
    let c = Arc::clone(conventions);
    hooks.register::<dyn OperationAuthorizer, _>(move |_, next| {
        Ok(Arc::new(ConventionOperationAuthorizer {
            conventions: Arc::clone(&c),
            next,
        }))
    });
    let c = Arc::clone(conventions);
    hooks.register::<dyn OperationExecutor, _>(move |_, next| {
        Ok(Arc::new(ConventionOperations {
            conventions: Arc::clone(&c),
            next,
        }))
    });
}

// --- model ---------------------------------------------------------------------------------

struct ConventionModelBuilder {
    conventions: Arc<Conventions>,
    next: Option<Arc<dyn ModelBuilder>>,
}

#[async_trait]
impl ModelBuilder for ConventionModelBuilder {
    async fn build_model(&self, ctx: &InvocationContext) -> Result<ApiModel, ApiError> {
        let mut model = match &self.next {
            Some(next) => next.build_model(ctx).await?,
            None => ApiModel::new(ctx.config().namespace.clone()),
        };
        let c = &self.conventions;

        for (name, composed) in &c.composed {
            model.add_entity_set(EntitySet::composed(name.clone(), composed.entity_type.clone()));
        }
        for registered in c.operations.values() {
            model.add_operation(registered.descriptor.clone());
        }
        for name in &c.duplicate_operations {
            model.record_issue(ModelIssue::new(
                format!("Operation:{name}"),
                "operation registered more than once",
            ));
        }
        for name in c.can_execute.keys() {
            if !c.operations.contains_key(name) && model.operation(name).is_none() {
                model.record_issue(ModelIssue::new(
                    format!("Operation:{name}"),
                    format!("CanExecute{name} names an unknown operation"),
                ));
            }
        }
        for (set, method) in c.referenced_sets() {
            if model.entity_set(set).is_none() {
                model.record_issue(ModelIssue::new(
                    format!("EntitySet:{set}"),
                    format!("{method} names an unknown entity set"),
                ));
            }
        }
        Ok(model)
    }
}

struct ConventionVisibility {
    conventions: Arc<Conventions>,
    next: Option<Arc<dyn ModelVisibilityFilter>>,
}

impl ModelVisibilityFilter for ConventionVisibility {
    fn is_visible(&self, element: &ModelElement<'_>) -> bool {
        let hidden = &self.conventions.hidden;
        let rejected = match element {
            ModelElement::EntitySet(name) => hidden.entity_sets.contains(*name),
            ModelElement::EntityType(name) => hidden.entity_types.contains(*name),
            ModelElement::Property { owner, name } => hidden
                .properties
                .contains(&((*owner).to_owned(), (*name).to_owned())),
            ModelElement::Operation(name) => hidden.operations.contains(*name),
        };
        !rejected && self.next.as_ref().is_none_or(|n| n.is_visible(element))
    }
}

// --- query ---------------------------------------------------------------------------------

struct ConventionReadAuthorizer {
    conventions: Arc<Conventions>,
    next: Option<Arc<dyn QueryExpressionAuthorizer>>,
}

impl QueryExpressionAuthorizer for ConventionReadAuthorizer {
    fn authorize(
        &self,
        ctx: &InvocationContext,
        node: &QueryExpressionContext<'_>,
    ) -> Result<bool, ApiError> {
        if let Some(name) = node.node().as_resource()
            && let Some(rule) = self.conventions.can_read.get(name)
            && !rule(ctx)
        {
            tracing::debug!(hook = %format!("CanRead{name}"), "Read denied by convention");
            return Ok(false);
        }
        match &self.next {
            Some(next) => next.authorize(ctx, node),
            None => Ok(true),
        }
    }
}

struct ConventionExpander {
    conventions: Arc<Conventions>,
    next: Option<Arc<dyn QueryExpressionExpander>>,
}

impl QueryExpressionExpander for ConventionExpander {
    fn expand(
        &self,
        ctx: &InvocationContext,
        node: &QueryExpressionContext<'_>,
    ) -> Result<Option<QueryExpr>, ApiError> {
        if let Some(composed) = node
            .node()
            .as_resource()
            .and_then(|name| self.conventions.composed_set(name))
        {
            return Ok(Some(composed.definition.clone()));
        }
        match &self.next {
            Some(next) => next.expand(ctx, node),
            None => Ok(None),
        }
    }
}

/// Applies `OnFilter{EntitySet}` filters in registration order.
struct ConventionFilterProcessor {
    conventions: Arc<Conventions>,
    next: Option<Arc<dyn QueryExpressionProcessor>>,
}

impl QueryExpressionProcessor for ConventionFilterProcessor {
    fn process(
        &self,
        ctx: &InvocationContext,
        node: &QueryExpressionContext<'_>,
    ) -> Result<Option<QueryExpr>, ApiError> {
        if let Some(name) = node.node().as_resource()
            && let Some(filters) = self.conventions.filters.get(name)
        {
            let method = format!("OnFilter{name}");
            let mut query = node.node().clone();
            for filter in filters {
                query = filter
                    .filter(ctx, query)
                    .map_err(|e| ApiError::hook(method.clone(), e))?;
            }
            tracing::debug!(hook = %method, query = %query, "Entity set filter applied");
            return Ok(Some(query));
        }
        match &self.next {
            Some(next) => next.process(ctx, node),
            None => Ok(None),
        }
    }
}

// --- submit --------------------------------------------------------------------------------

struct ConventionWriteAuthorizer {
    conventions: Arc<Conventions>,
    next: Option<Arc<dyn ChangeSetItemAuthorizer>>,
}

#[async_trait]
impl ChangeSetItemAuthorizer for ConventionWriteAuthorizer {
    async fn authorize(
        &self,
        ctx: &InvocationContext,
        item: &DataModificationItem,
    ) -> Result<bool, ApiError> {
        if let Some(rule) = self
            .conventions
            .can_write
            .get(&(item.action, item.entity_set.clone()))
            && !rule(ctx)
        {
            return Ok(false);
        }
        match &self.next {
            Some(next) => next.authorize(ctx, item).await,
            None => Ok(true),
        }
    }
}

struct ConventionValidator {
    conventions: Arc<Conventions>,
    next: Option<Arc<dyn ChangeSetItemValidator>>,
}

#[async_trait]
impl ChangeSetItemValidator for ConventionValidator {
    async fn validate(
        &self,
        ctx: &InvocationContext,
        item: &DataModificationItem,
        results: &mut Vec<ValidationResult>,
    ) -> Result<(), ApiError> {
        if let Some(next) = &self.next {
            next.validate(ctx, item, results).await?;
        }
        if let Some(validators) = self.conventions.validators.get(&item.entity_set) {
            for v in validators {
                v.validate(ctx, item, results);
            }
        }
        Ok(())
    }
}

/// Runs `On{Inserting,Updating,Deleting}{Set}` before submit and
/// `On{Inserted,Updated,Deleted}{Set}` after it.
struct ConventionItemFilter {
    conventions: Arc<Conventions>,
    next: Option<Arc<dyn ChangeSetItemFilter>>,
}

#[async_trait]
impl ChangeSetItemFilter for ConventionItemFilter {
    async fn on_processing(
        &self,
        ctx: &InvocationContext,
        item: &mut DataModificationItem,
    ) -> Result<(), ApiError> {
        let point = HookPoint::before(item.action);
        if let Some(hooks) = self
            .conventions
            .entity_hooks
            .get(&(point, item.entity_set.clone()))
        {
            let method = point.method_name(&item.entity_set);
            let entity = item.resource.as_mut().ok_or_else(|| {
                ApiError::InvalidRequest(format!("{method} ran before initialization"))
            })?;
            for hook in hooks {
                tracing::debug!(hook = %method, "Running entity hook");
                hook.call(ctx, entity)
                    .await
                    .map_err(|e| ApiError::hook(method.clone(), e))?;
            }
        }
        match &self.next {
            Some(next) => next.on_processing(ctx, item).await,
            None => Ok(()),
        }
    }

    async fn on_processed(
        &self,
        ctx: &InvocationContext,
        item: &DataModificationItem,
    ) -> Result<(), ApiError> {
        let point = HookPoint::after(item.action);
        if let Some(hooks) = self
            .conventions
            .observers
            .get(&(point, item.entity_set.clone()))
            && let Some(entity) = item.resource.as_ref()
        {
            let method = point.method_name(&item.entity_set);
            for hook in hooks {
                tracing::debug!(hook = %method, "Running entity observer");
                hook.call(ctx, entity)
                    .await
                    .map_err(|e| ApiError::hook(method.clone(), e))?;
            }
        }
        match &self.next {
            Some(next) => next.on_processed(ctx, item).await,
            None => Ok(()),
        }
    }
}

// --- operations ----------------------------------------------------------------------------

struct ConventionOperationAuthorizer {
    conventions: Arc<Conventions>,
    next: Option<Arc<dyn OperationAuthorizer>>,
}

impl OperationAuthorizer for ConventionOperationAuthorizer {
    fn authorize(
        &self,
        ctx: &InvocationContext,
        operation: &OperationDescriptor,
    ) -> Result<bool, ApiError> {
        if let Some(rule) = self.conventions.can_execute.get(&operation.name)
            && !rule(ctx)
        {
            return Ok(false);
        }
        match &self.next {
            Some(next) => next.authorize(ctx, operation),
            None => Ok(true),
        }
    }
}

struct ConventionOperations {
    conventions: Arc<Conventions>,
    next: Option<Arc<dyn OperationExecutor>>,
}

#[async_trait]
impl OperationExecutor for ConventionOperations {
    async fn execute_operation(
        &self,
        ctx: &InvocationContext,
        operation: &OperationDescriptor,
        arguments: &OperationArguments,
    ) -> Result<Value, ApiError> {
        let name = &operation.name;
        if let Some(registered) = self.conventions.operations.get(name) {
            tracing::debug!(operation = %name, "Invoking operation handler");
            return registered
                .handler
                .invoke(ctx, arguments)
                .await
                .map_err(|e| ApiError::hook(name.clone(), e));
        }
        match &self.next {
            Some(next) => next.execute_operation(ctx, operation, arguments).await,
            None => Err(ApiError::ResourceNotFound(name.clone())),
        }
    }
}
