use super::QueryRequest;
use super::context::QueryExpressionContext;
use super::expr::QueryExpr;
use super::hooks::QueryPipelineServices;
use crate::context::InvocationContext;
use crate::error::{AccessAction, ApiError, ConfigurationError};

/// Post-order rewrite of one query expression into a fully sourced expression.
///
/// Per node, after its children:
/// 1. inspect and authorize (logical resources only)
/// 2. expand composed resources and visit the replacement instead
/// 3. process; a rewrite is visited again, without re-processing the same resource
/// 4. source remaining logical resources; the output is terminal
pub struct QueryPipeline<'a> {
    ctx: &'a InvocationContext,
    request: &'a QueryRequest,
    services: QueryPipelineServices,
    expanding: Vec<String>,
    processing: Vec<String>,
    depth: usize,
    max_depth: usize,
}

impl<'a> QueryPipeline<'a> {
    /// # Errors
    /// Returns a configuration error if a pipeline contract cannot be resolved.
    pub fn new(ctx: &'a InvocationContext, request: &'a QueryRequest) -> Result<Self, ApiError> {
        let services = QueryPipelineServices::resolve(ctx.services())?;
        Ok(Self::with_services(ctx, request, services))
    }

    #[must_use]
    pub fn with_services(
        ctx: &'a InvocationContext,
        request: &'a QueryRequest,
        services: QueryPipelineServices,
    ) -> Self {
        Self {
            ctx,
            request,
            services,
            expanding: Vec::new(),
            processing: Vec::new(),
            depth: 0,
            max_depth: ctx.config().query.max_pipeline_depth,
        }
    }

    /// Run the pipeline over the request's expression.
    ///
    /// # Errors
    /// Inspection, authorization and hook errors, `Cancelled`, and configuration errors
    /// for cyclic expansion, unsourceable resources and depth overflow.
    pub fn run(mut self) -> Result<QueryExpr, ApiError> {
        let sourced = self.visit(self.request.expression.clone(), false)?;
        if let Some(left) = sourced.logical_references().first() {
            return Err(ConfigurationError::IncompleteSourcing {
                resource: (*left).to_owned(),
            }
            .into());
        }
        tracing::debug!(
            operation_id = %self.ctx.id(),
            query = %sourced,
            "Query expression sourced"
        );
        Ok(sourced)
    }

    fn visit(&mut self, node: QueryExpr, embedded: bool) -> Result<QueryExpr, ApiError> {
        self.ctx.ensure_active()?;
        if self.depth >= self.max_depth {
            return Err(ConfigurationError::PipelineDepthExceeded {
                max: self.max_depth,
            }
            .into());
        }
        self.depth += 1;
        let out = self.visit_node(node, embedded);
        self.depth -= 1;
        out
    }

    fn visit_children(&mut self, node: QueryExpr) -> Result<QueryExpr, ApiError> {
        Ok(match node {
            leaf @ (QueryExpr::Resource { .. } | QueryExpr::Source(_)) => leaf,
            QueryExpr::Filter { input, predicate } => QueryExpr::Filter {
                input: Box::new(self.visit(*input, false)?),
                predicate,
            },
            QueryExpr::OrderBy { input, keys } => QueryExpr::OrderBy {
                input: Box::new(self.visit(*input, false)?),
                keys,
            },
            QueryExpr::Skip { input, count } => QueryExpr::Skip {
                input: Box::new(self.visit(*input, false)?),
                count,
            },
            QueryExpr::Take { input, count } => QueryExpr::Take {
                input: Box::new(self.visit(*input, false)?),
                count,
            },
            QueryExpr::Select { input, fields } => QueryExpr::Select {
                input: Box::new(self.visit(*input, false)?),
                fields,
            },
            QueryExpr::SelectMany {
                input,
                collection,
                outer_key,
                inner_key,
            } => QueryExpr::SelectMany {
                input: Box::new(self.visit(*input, false)?),
                collection: Box::new(self.visit(*collection, true)?),
                outer_key,
                inner_key,
            },
        })
    }

    fn visit_node(&mut self, node: QueryExpr, embedded: bool) -> Result<QueryExpr, ApiError> {
        let node = self.visit_children(node)?;
        let ctx = self.ctx;
        let model = ctx.model();
        let mut current = QueryExpressionContext::new(self.request, node, model, embedded);
        let resource = current.node().as_resource().map(str::to_owned);

        if let Some(name) = &resource {
            self.services.inspector.inspect(self.ctx, &current)?;
            if !self.services.authorizer.authorize(self.ctx, &current)? {
                tracing::warn!(
                    operation_id = %self.ctx.id(),
                    resource = %name,
                    "Query denied by authorizer"
                );
                return Err(ApiError::not_authorized(name.clone(), AccessAction::Read));
            }

            if let Some(expanded) = self.services.expander.expand(self.ctx, &current)? {
                if self.expanding.contains(name) {
                    let mut chain = self.expanding.clone();
                    chain.push(name.clone());
                    return Err(ConfigurationError::CyclicExpansion {
                        resource: name.clone(),
                        chain: chain.join(" -> "),
                    }
                    .into());
                }
                tracing::debug!(resource = %name, expansion = %expanded, "Resource expanded");
                self.expanding.push(name.clone());
                let out = self.visit(expanded, embedded);
                self.expanding.pop();
                return out;
            }
        }

        let reprocessing = resource
            .as_ref()
            .is_some_and(|name| self.processing.contains(name));
        if !reprocessing
            && let Some(processed) = self.services.processor.process(self.ctx, &current)?
        {
            tracing::debug!(node = %current.node(), rewrite = %processed, "Query node processed");
            if let Some(name) = &resource {
                self.processing.push(name.clone());
            }
            let out = self.visit(processed, embedded);
            if resource.is_some() {
                self.processing.pop();
            }
            return out;
        }

        if let Some(name) = resource {
            let sourced = self
                .services
                .sourcer
                .source(self.ctx, &current)?
                .ok_or_else(|| ConfigurationError::Unsourceable {
                    resource: name.clone(),
                })?;
            if !sourced.is_fully_sourced() {
                return Err(ConfigurationError::IncompleteSourcing { resource: name }.into());
            }
            current.replace_visited_node(sourced, model);
        }

        Ok(current.into_node())
    }
}
