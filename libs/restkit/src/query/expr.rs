use std::fmt;
use std::sync::Arc;

use super::ast::{Expr, OrderKey};
use crate::provider::Queryable;

/// Concrete queryable placed into an expression by a sourcer.
#[derive(Clone)]
pub struct SourceHandle {
    queryable: Arc<dyn Queryable>,
    embedded: bool,
}

impl SourceHandle {
    #[must_use]
    pub fn new(queryable: Arc<dyn Queryable>, embedded: bool) -> Self {
        Self {
            queryable,
            embedded,
        }
    }

    #[must_use]
    pub fn queryable(&self) -> &Arc<dyn Queryable> {
        &self.queryable
    }

    /// Sourced as an operand of another operator rather than as the query root.
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        self.embedded
    }
}

impl PartialEq for SourceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.queryable, &other.queryable) && self.embedded == other.embedded
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("entity_set", &self.queryable.entity_set())
            .field("embedded", &self.embedded)
            .finish()
    }
}

/// Query expression tree.
///
/// A tree starts out anchored on logical [`QueryExpr::Resource`] references and is
/// rewritten by the pipeline until every leaf is a [`QueryExpr::Source`].
#[derive(Clone, Debug, PartialEq)]
pub enum QueryExpr {
    /// Logical reference to an exposed entity set.
    Resource { name: String },
    Source(SourceHandle),
    Filter {
        input: Box<QueryExpr>,
        predicate: Expr,
    },
    OrderBy {
        input: Box<QueryExpr>,
        keys: Vec<OrderKey>,
    },
    Skip {
        input: Box<QueryExpr>,
        count: u64,
    },
    Take {
        input: Box<QueryExpr>,
        count: u64,
    },
    Select {
        input: Box<QueryExpr>,
        fields: Vec<String>,
    },
    /// For every row of `input`, the rows of `collection` whose `inner_key` equals the
    /// row's `outer_key`. `collection` is an embedded position.
    SelectMany {
        input: Box<QueryExpr>,
        collection: Box<QueryExpr>,
        outer_key: String,
        inner_key: String,
    },
}

impl QueryExpr {
    #[must_use]
    pub fn resource(name: impl Into<String>) -> Self {
        QueryExpr::Resource { name: name.into() }
    }

    #[must_use]
    pub fn source(queryable: Arc<dyn Queryable>, embedded: bool) -> Self {
        QueryExpr::Source(SourceHandle::new(queryable, embedded))
    }

    #[must_use]
    pub fn filter(self, predicate: Expr) -> Self {
        QueryExpr::Filter {
            input: Box::new(self),
            predicate,
        }
    }

    #[must_use]
    pub fn order_by(self, keys: impl IntoIterator<Item = OrderKey>) -> Self {
        QueryExpr::OrderBy {
            input: Box::new(self),
            keys: keys.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn skip(self, count: u64) -> Self {
        QueryExpr::Skip {
            input: Box::new(self),
            count,
        }
    }

    #[must_use]
    pub fn take(self, count: u64) -> Self {
        QueryExpr::Take {
            input: Box::new(self),
            count,
        }
    }

    #[must_use]
    pub fn select<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        QueryExpr::Select {
            input: Box::new(self),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn select_many(
        self,
        collection: QueryExpr,
        outer_key: impl Into<String>,
        inner_key: impl Into<String>,
    ) -> Self {
        QueryExpr::SelectMany {
            input: Box::new(self),
            collection: Box::new(collection),
            outer_key: outer_key.into(),
            inner_key: inner_key.into(),
        }
    }

    /// Name of the logical resource if this node is one.
    #[must_use]
    pub fn as_resource(&self) -> Option<&str> {
        match self {
            QueryExpr::Resource { name } => Some(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_source(&self) -> Option<&SourceHandle> {
        match self {
            QueryExpr::Source(handle) => Some(handle),
            _ => None,
        }
    }

    #[must_use]
    pub fn input(&self) -> Option<&QueryExpr> {
        match self {
            QueryExpr::Resource { .. } | QueryExpr::Source(_) => None,
            QueryExpr::Filter { input, .. }
            | QueryExpr::OrderBy { input, .. }
            | QueryExpr::Skip { input, .. }
            | QueryExpr::Take { input, .. }
            | QueryExpr::Select { input, .. }
            | QueryExpr::SelectMany { input, .. } => Some(input),
        }
    }

    /// Leaf reached by following `input` edges.
    #[must_use]
    pub fn root(&self) -> &QueryExpr {
        let mut node = self;
        while let Some(input) = node.input() {
            node = input;
        }
        node
    }

    /// Source the query is executed from, once the root has been sourced.
    #[must_use]
    pub fn root_source(&self) -> Option<&SourceHandle> {
        self.root().as_source()
    }

    /// Entity set whose element type this node produces.
    #[must_use]
    pub fn element_set(&self) -> Option<&str> {
        match self {
            QueryExpr::Resource { name } => Some(name),
            QueryExpr::Source(handle) => Some(handle.queryable().entity_set()),
            QueryExpr::SelectMany { collection, .. } => collection.element_set(),
            other => other.input().and_then(QueryExpr::element_set),
        }
    }

    /// Logical resource names still present in the tree, leftmost first.
    #[must_use]
    pub fn logical_references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            QueryExpr::Resource { name } => out.push(name),
            QueryExpr::Source(_) => {}
            QueryExpr::SelectMany {
                input, collection, ..
            } => {
                input.collect_references(out);
                collection.collect_references(out);
            }
            other => {
                if let Some(input) = other.input() {
                    input.collect_references(out);
                }
            }
        }
    }

    /// True when no logical resource reference is left.
    #[must_use]
    pub fn is_fully_sourced(&self) -> bool {
        self.logical_references().is_empty()
    }

    /// Same query without trailing `Skip`/`Take`. A `Select` on top is kept.
    #[must_use]
    pub fn strip_paging(&self) -> QueryExpr {
        match self {
            QueryExpr::Skip { input, .. } | QueryExpr::Take { input, .. } => input.strip_paging(),
            QueryExpr::Select { input, fields } => QueryExpr::Select {
                input: Box::new(input.strip_paging()),
                fields: fields.clone(),
            },
            other => other.clone(),
        }
    }

    /// Number of nodes on the longest path to a leaf.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            QueryExpr::Resource { .. } | QueryExpr::Source(_) => 1,
            QueryExpr::SelectMany {
                input, collection, ..
            } => 1 + input.depth().max(collection.depth()),
            other => 1 + other.input().map_or(0, QueryExpr::depth),
        }
    }
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryExpr::Resource { name } => write!(f, "{name}"),
            QueryExpr::Source(handle) => {
                if handle.is_embedded() {
                    write!(f, "source[embedded]({})", handle.queryable().entity_set())
                } else {
                    write!(f, "source({})", handle.queryable().entity_set())
                }
            }
            QueryExpr::Filter { input, predicate } => write!(f, "{input}.Filter({predicate})"),
            QueryExpr::OrderBy { input, keys } => {
                let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
                write!(f, "{input}.OrderBy({})", keys.join(", "))
            }
            QueryExpr::Skip { input, count } => write!(f, "{input}.Skip({count})"),
            QueryExpr::Take { input, count } => write!(f, "{input}.Take({count})"),
            QueryExpr::Select { input, fields } => {
                write!(f, "{input}.Select({})", fields.join(", "))
            }
            QueryExpr::SelectMany {
                input,
                collection,
                outer_key,
                inner_key,
            } => write!(
                f,
                "{input}.SelectMany({collection} on {outer_key} = {inner_key})"
            ),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn builders_render_in_call_order() {
        let q = QueryExpr::resource("Orders")
            .order_by([OrderKey::asc("OrderDate")])
            .skip(10)
            .take(25);
        assert_eq!(
            q.to_string(),
            "Orders.OrderBy(OrderDate asc).Skip(10).Take(25)"
        );
        assert_eq!(q.root().as_resource(), Some("Orders"));
        assert_eq!(q.element_set(), Some("Orders"));
        assert_eq!(q.depth(), 4);
    }

    #[test]
    fn strip_paging_removes_only_trailing_operators() {
        let q = QueryExpr::resource("Orders")
            .take(100)
            .order_by([OrderKey::asc("OrderDate")])
            .skip(10)
            .take(25);
        let stripped = q.strip_paging();
        assert_eq!(
            stripped,
            QueryExpr::resource("Orders")
                .take(100)
                .order_by([OrderKey::asc("OrderDate")])
        );

        let projected = QueryExpr::resource("Orders").take(5).select(["OrderID"]);
        assert_eq!(
            projected.strip_paging(),
            QueryExpr::resource("Orders").select(["OrderID"])
        );
    }

    #[test]
    fn logical_references_include_embedded_operands() {
        let q = QueryExpr::resource("Customers").select_many(
            QueryExpr::resource("Orders"),
            "CustomerID",
            "CustomerID",
        );
        assert_eq!(q.logical_references(), vec!["Customers", "Orders"]);
        assert!(!q.is_fully_sourced());
        assert_eq!(q.element_set(), Some("Orders"));
    }
}
