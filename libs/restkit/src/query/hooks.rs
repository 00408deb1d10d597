//! Query pipeline contracts and their terminal implementations.
//!
//! Every contract is resolved as a hook chain. A link receives the more inner link as
//! `next` and either answers itself or delegates.

use std::sync::Arc;

use super::context::QueryExpressionContext;
use super::expr::QueryExpr;
use crate::context::InvocationContext;
use crate::error::{ApiError, ConfigurationError};
use crate::hooks::ServiceScope;
use crate::provider::QuerySourceProvider;

/// Checks that a logical node may be queried at all.
pub trait QueryExpressionInspector: Send + Sync {
    /// # Errors
    /// Any error aborts the whole query.
    fn inspect(
        &self,
        ctx: &InvocationContext,
        node: &QueryExpressionContext<'_>,
    ) -> Result<(), ApiError>;
}

/// Read authorization for a logical node.
pub trait QueryExpressionAuthorizer: Send + Sync {
    /// `Ok(false)` denies access; the pipeline turns it into `ApiError::NotAuthorized`.
    ///
    /// # Errors
    /// Errors abort the query unchanged.
    fn authorize(
        &self,
        ctx: &InvocationContext,
        node: &QueryExpressionContext<'_>,
    ) -> Result<bool, ApiError>;
}

/// Rewrites composed resources into their defining expressions.
pub trait QueryExpressionExpander: Send + Sync {
    /// `Ok(None)` when the node is not composed.
    ///
    /// # Errors
    /// Errors abort the query unchanged.
    fn expand(
        &self,
        ctx: &InvocationContext,
        node: &QueryExpressionContext<'_>,
    ) -> Result<Option<QueryExpr>, ApiError>;
}

/// Business rewrites such as row-level filters.
pub trait QueryExpressionProcessor: Send + Sync {
    /// `Ok(None)` leaves the node unchanged. A returned expression is run through the
    /// whole pipeline again.
    ///
    /// # Errors
    /// Errors abort the query unchanged.
    fn process(
        &self,
        ctx: &InvocationContext,
        node: &QueryExpressionContext<'_>,
    ) -> Result<Option<QueryExpr>, ApiError>;
}

/// Binds logical resources to concrete provider queryables.
pub trait QueryExpressionSourcer: Send + Sync {
    /// `Ok(None)` when this sourcer does not claim the node.
    ///
    /// # Errors
    /// Errors abort the query unchanged.
    fn source(
        &self,
        ctx: &InvocationContext,
        node: &QueryExpressionContext<'_>,
    ) -> Result<Option<QueryExpr>, ApiError>;
}

/// Resource must exist in the model and be visible.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelInspector;

impl QueryExpressionInspector for ModelInspector {
    fn inspect(
        &self,
        ctx: &InvocationContext,
        node: &QueryExpressionContext<'_>,
    ) -> Result<(), ApiError> {
        if let Some(name) = node.node().as_resource()
            && ctx.model().visible_entity_set(name).is_none()
        {
            return Err(ApiError::ResourceNotFound(name.to_owned()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllReads;

impl QueryExpressionAuthorizer for AllowAllReads {
    fn authorize(
        &self,
        _ctx: &InvocationContext,
        _node: &QueryExpressionContext<'_>,
    ) -> Result<bool, ApiError> {
        Ok(true)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoExpansion;

impl QueryExpressionExpander for NoExpansion {
    fn expand(
        &self,
        _ctx: &InvocationContext,
        _node: &QueryExpressionContext<'_>,
    ) -> Result<Option<QueryExpr>, ApiError> {
        Ok(None)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProcessing;

impl QueryExpressionProcessor for NoProcessing {
    fn process(
        &self,
        _ctx: &InvocationContext,
        _node: &QueryExpressionContext<'_>,
    ) -> Result<Option<QueryExpr>, ApiError> {
        Ok(None)
    }
}

/// Terminal sourcer over the registered [`QuerySourceProvider`].
pub struct ProviderSourcer {
    provider: Arc<dyn QuerySourceProvider>,
}

impl ProviderSourcer {
    #[must_use]
    pub fn new(provider: Arc<dyn QuerySourceProvider>) -> Self {
        Self { provider }
    }

    /// Hook factory resolving the provider from the request scope.
    ///
    /// # Errors
    /// `ConfigurationError::NotRegistered` if no `QuerySourceProvider` is registered.
    pub fn from_scope(
        scope: &ServiceScope,
    ) -> Result<Arc<dyn QueryExpressionSourcer>, ConfigurationError> {
        let provider = scope.resolve::<dyn QuerySourceProvider>()?;
        Ok(Arc::new(Self::new(provider)))
    }
}

impl QueryExpressionSourcer for ProviderSourcer {
    fn source(
        &self,
        _ctx: &InvocationContext,
        node: &QueryExpressionContext<'_>,
    ) -> Result<Option<QueryExpr>, ApiError> {
        let (Some(name), Some(reference)) = (node.node().as_resource(), node.model_reference())
        else {
            return Ok(None);
        };
        Ok(self
            .provider
            .queryable(name, reference.element_type())
            .map(|q| QueryExpr::source(q, node.is_embedded())))
    }
}

/// Query contracts resolved once per pipeline run.
#[derive(Clone)]
pub struct QueryPipelineServices {
    pub inspector: Arc<dyn QueryExpressionInspector>,
    pub authorizer: Arc<dyn QueryExpressionAuthorizer>,
    pub expander: Arc<dyn QueryExpressionExpander>,
    pub processor: Arc<dyn QueryExpressionProcessor>,
    pub sourcer: Arc<dyn QueryExpressionSourcer>,
}

impl QueryPipelineServices {
    /// # Errors
    /// Returns the first contract that cannot be resolved.
    pub fn resolve(scope: &ServiceScope) -> Result<Self, ConfigurationError> {
        Ok(Self {
            inspector: scope.resolve::<dyn QueryExpressionInspector>()?,
            authorizer: scope.resolve::<dyn QueryExpressionAuthorizer>()?,
            expander: scope.resolve::<dyn QueryExpressionExpander>()?,
            processor: scope.resolve::<dyn QueryExpressionProcessor>()?,
            sourcer: scope.resolve::<dyn QueryExpressionSourcer>()?,
        })
    }
}
