use async_trait::async_trait;
use serde_json::Value;

use super::expr::QueryExpr;
use super::{QueryRequest, QueryResult};
use crate::context::InvocationContext;
use crate::error::{ApiError, ConfigurationError};
use crate::model::{ApiModel, PropertyKind};
use crate::record::EntityRecord;

/// Property-bag key holding the total count of the last counted query (`u64`).
pub const TOTAL_COUNT_PROPERTY: &str = "restkit.total_count";

/// Runs a fully sourced expression against its provider.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// # Errors
    /// Provider errors propagate unchanged; there is no retry.
    async fn execute_query(
        &self,
        ctx: &InvocationContext,
        request: &QueryRequest,
        query: QueryExpr,
    ) -> Result<QueryResult, ApiError>;
}

/// Counts (when asked) with paging stripped, then materializes the paged rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultQueryExecutor;

#[async_trait]
impl QueryExecutor for DefaultQueryExecutor {
    async fn execute_query(
        &self,
        ctx: &InvocationContext,
        request: &QueryRequest,
        query: QueryExpr,
    ) -> Result<QueryResult, ApiError> {
        let source = query.root_source().ok_or_else(|| {
            ConfigurationError::IncompleteSourcing {
                resource: query.element_set().unwrap_or_default().to_owned(),
            }
        })?;
        let provider = source.queryable().provider();

        let total_count = if request.include_total_count {
            ctx.ensure_active()?;
            let countable = query.strip_paging();
            let count = provider.count(&countable).await?;
            ctx.properties().set(TOTAL_COUNT_PROPERTY, count);
            tracing::debug!(operation_id = %ctx.id(), count, "Total count computed");
            Some(count)
        } else {
            None
        };

        ctx.ensure_active()?;
        let mut rows = provider.execute(&query).await?;

        let element_type = query
            .element_set()
            .and_then(|set| ctx.model().entity_set(set))
            .map(|set| set.entity_type.clone());
        if let Some(element_type) = element_type {
            for row in &mut rows {
                strip_hidden(ctx.model(), &element_type, row);
            }
        }

        tracing::debug!(operation_id = %ctx.id(), rows = rows.len(), "Query materialized");
        Ok(QueryResult { rows, total_count })
    }
}

/// Drop properties the model hides, descending into complex values.
fn strip_hidden(model: &ApiModel, owner: &str, record: &mut EntityRecord) {
    let Some(properties) = model.properties_of(owner) else {
        return;
    };
    for p in properties {
        if !model.is_property_visible(owner, &p.name) {
            record.remove(&p.name);
            continue;
        }
        if let PropertyKind::Complex(type_name) = &p.kind
            && let Some(Value::Object(nested)) = record.get_mut(&p.name)
        {
            let mut inner = EntityRecord::from(std::mem::take(nested));
            strip_hidden(model, type_name, &mut inner);
            *nested = inner.into_map();
        }
    }
}
