//! Query expression pipeline and executor.

pub mod ast;
mod context;
mod executor;
mod expr;
mod hooks;
pub mod limits;
mod visitor;

pub use context::{QueryExpressionContext, QueryModelReference};
pub use executor::{DefaultQueryExecutor, QueryExecutor, TOTAL_COUNT_PROPERTY};
pub use expr::{QueryExpr, SourceHandle};
pub use hooks::{
    AllowAllReads, ModelInspector, NoExpansion, NoProcessing, ProviderSourcer,
    QueryExpressionAuthorizer, QueryExpressionExpander, QueryExpressionInspector,
    QueryExpressionProcessor, QueryExpressionSourcer, QueryPipelineServices,
};
pub use visitor::QueryPipeline;

use std::sync::Arc;

use crate::hooks::HookRegistryBuilder;
use crate::record::EntityRecord;

/// One inbound query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub expression: QueryExpr,
    /// Compute the number of matching rows ignoring trailing `Skip`/`Take`.
    pub include_total_count: bool,
}

impl QueryRequest {
    #[must_use]
    pub fn new(expression: QueryExpr) -> Self {
        Self {
            expression,
            include_total_count: false,
        }
    }

    #[must_use]
    pub fn with_total_count(mut self) -> Self {
        self.include_total_count = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<EntityRecord>,
    pub total_count: Option<u64>,
}

/// Terminal implementations of every query contract.
pub fn register_query_defaults(hooks: &mut HookRegistryBuilder) {
    hooks
        .register_default_instance::<dyn QueryExpressionInspector>(Arc::new(ModelInspector))
        .register_default_instance::<dyn QueryExpressionAuthorizer>(Arc::new(AllowAllReads))
        .register_default_instance::<dyn QueryExpressionExpander>(Arc::new(NoExpansion))
        .register_default_instance::<dyn QueryExpressionProcessor>(Arc::new(NoProcessing))
        .register_default::<dyn QueryExpressionSourcer, _>(ProviderSourcer::from_scope)
        .register_default_instance::<dyn QueryExecutor>(Arc::new(DefaultQueryExecutor));
}
