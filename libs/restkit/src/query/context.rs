use super::expr::QueryExpr;
use super::QueryRequest;
use crate::model::ApiModel;

/// What a query node denotes: entity set, its element type, and whether it has
/// already been bound to a concrete source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryModelReference {
    entity_set: String,
    element_type: String,
    sourced: bool,
}

impl QueryModelReference {
    /// Derive the reference for `node`; `None` when the node's element set is unknown.
    #[must_use]
    pub fn for_node(node: &QueryExpr, model: &ApiModel) -> Option<Self> {
        let entity_set = node.element_set()?;
        let element_type = match node {
            QueryExpr::Source(handle) => handle.queryable().element_type().to_owned(),
            _ => model.entity_set(entity_set)?.entity_type.clone(),
        };
        Some(Self {
            entity_set: entity_set.to_owned(),
            element_type,
            sourced: node.is_fully_sourced(),
        })
    }

    #[must_use]
    pub fn entity_set(&self) -> &str {
        &self.entity_set
    }

    #[must_use]
    pub fn element_type(&self) -> &str {
        &self.element_type
    }

    #[must_use]
    pub fn is_sourced(&self) -> bool {
        self.sourced
    }
}

/// Node currently visited by the query pipeline.
#[derive(Debug)]
pub struct QueryExpressionContext<'a> {
    request: &'a QueryRequest,
    node: QueryExpr,
    model_reference: Option<QueryModelReference>,
    embedded: bool,
}

impl<'a> QueryExpressionContext<'a> {
    #[must_use]
    pub fn new(
        request: &'a QueryRequest,
        node: QueryExpr,
        model: &ApiModel,
        embedded: bool,
    ) -> Self {
        let model_reference = QueryModelReference::for_node(&node, model);
        Self {
            request,
            node,
            model_reference,
            embedded,
        }
    }

    #[must_use]
    pub fn request(&self) -> &QueryRequest {
        self.request
    }

    #[must_use]
    pub fn node(&self) -> &QueryExpr {
        &self.node
    }

    #[must_use]
    pub fn model_reference(&self) -> Option<&QueryModelReference> {
        self.model_reference.as_ref()
    }

    /// The node is an operand of another operator (e.g. the collection of `SelectMany`).
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    /// Swap the visited node; the model reference is recomputed to match it.
    pub fn replace_visited_node(&mut self, node: QueryExpr, model: &ApiModel) {
        self.model_reference = QueryModelReference::for_node(&node, model);
        self.node = node;
    }

    #[must_use]
    pub fn into_node(self) -> QueryExpr {
        self.node
    }
}
