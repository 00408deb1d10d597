#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Query pipeline scenarios over the Northwind store

mod common;

use std::sync::Arc;

use common::{api, api_with, builder, ctx};
use restkit::conventions::{Conventions, filter_fn};
use restkit::error::{AccessAction, ApiError, ConfigurationError};
use restkit::query::ast::{Expr, OrderKey};
use restkit::query::{
    QueryExpr, QueryExpressionAuthorizer, QueryExpressionContext, QueryPipeline, QueryRequest,
    TOTAL_COUNT_PROPERTY,
};
use restkit::{CancellationToken, InvocationContext};
use restkit_memory::northwind::{FIRST_ORDER_ID, ORDER_COUNT};
use serde_json::json;

fn orders() -> QueryExpr {
    QueryExpr::resource("Orders")
}

// =============================================================================
// Paging and counting
// =============================================================================

#[tokio::test]
async fn take_keeps_the_total_count_of_the_unpaged_query() {
    let (api, _) = api().await;
    let ctx = ctx(&api);

    let result = api
        .query(&ctx, QueryRequest::new(orders().take(10)).with_total_count())
        .await
        .unwrap();

    assert_eq!(result.rows.len(), 10);
    assert_eq!(result.total_count, Some(830));
    assert_eq!(
        ctx.properties().get::<u64>(TOTAL_COUNT_PROPERTY).as_deref(),
        Some(&830)
    );
}

#[tokio::test]
async fn skip_and_take_page_through_ordered_rows() {
    let (api, _) = api().await;
    let ctx = ctx(&api);
    let query = orders()
        .order_by([OrderKey::asc("OrderDate")])
        .skip(10)
        .take(25);

    let result = api
        .query(&ctx, QueryRequest::new(query).with_total_count())
        .await
        .unwrap();

    assert_eq!(result.rows.len(), 25);
    assert_eq!(result.total_count, Some(830));
    assert_eq!(result.rows[0].get("OrderID"), Some(&json!(FIRST_ORDER_ID + 10)));
    assert_eq!(result.rows[24].get("OrderID"), Some(&json!(FIRST_ORDER_ID + 34)));
}

#[tokio::test]
async fn count_is_skipped_unless_requested() {
    let (api, _) = api().await;
    let ctx = ctx(&api);

    let result = api.query(&ctx, QueryRequest::new(orders().take(3))).await.unwrap();

    assert_eq!(result.total_count, None);
    assert!(!ctx.properties().contains(TOTAL_COUNT_PROPERTY));
}

#[tokio::test]
async fn filtered_count_ignores_paging_only() {
    let (api, _) = api().await;
    let ctx = ctx(&api);
    let query = orders()
        .filter(Expr::field("CustomerID").eq("ALFKI"))
        .order_by([OrderKey::desc("OrderID")])
        .take(5);

    let result = api
        .query(&ctx, QueryRequest::new(query).with_total_count())
        .await
        .unwrap();

    assert_eq!(result.rows.len(), 5);
    assert_eq!(result.total_count, Some(83));
    assert!(result.rows.iter().all(|r| r.get("CustomerID") == Some(&json!("ALFKI"))));
    assert_eq!(
        result.rows[0].get("OrderID"),
        Some(&json!(FIRST_ORDER_ID + ORDER_COUNT - 10))
    );
}

// =============================================================================
// Joins, projection, limits
// =============================================================================

#[tokio::test]
async fn select_many_joins_on_keys() {
    let (api, _) = api().await;
    let ctx = ctx(&api);
    let query = QueryExpr::resource("Customers")
        .filter(Expr::field("Addr/City").eq("Berlin"))
        .select_many(orders(), "CustomerID", "CustomerID")
        .select(["OrderID", "CustomerID"]);

    let result = api
        .query(&ctx, QueryRequest::new(query).with_total_count())
        .await
        .unwrap();

    assert_eq!(result.total_count, Some(83));
    assert!(result.rows.iter().all(|r| r.len() == 2));
    assert!(result.rows.iter().all(|r| r.get("CustomerID") == Some(&json!("ALFKI"))));
}

#[tokio::test]
async fn oversized_take_is_rejected_before_the_pipeline() {
    let (api, _) = api().await;
    let ctx = ctx(&api);

    let err = api
        .query(&ctx, QueryRequest::new(orders().take(5_000)))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::InvalidQuery(_)), "{err}");
}

// =============================================================================
// Pipeline behavior
// =============================================================================

struct DenyAll;

impl QueryExpressionAuthorizer for DenyAll {
    fn authorize(
        &self,
        _ctx: &InvocationContext,
        _node: &QueryExpressionContext<'_>,
    ) -> Result<bool, ApiError> {
        Ok(false)
    }
}

#[tokio::test]
async fn deny_all_authorizer_aborts_every_query() {
    let (builder, _) = builder();
    let api = builder
        .configure_hooks(|hooks| {
            hooks.register::<dyn QueryExpressionAuthorizer, _>(|_, _next| Ok(Arc::new(DenyAll)));
        })
        .build()
        .await
        .unwrap();
    let ctx = ctx(&api);

    let err = api
        .query(&ctx, QueryRequest::new(orders().take(1)))
        .await
        .unwrap_err();

    match err {
        ApiError::NotAuthorized { resource, action } => {
            assert_eq!(resource, "Orders");
            assert_eq!(action, AccessAction::Read);
        }
        other => panic!("expected NotAuthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn sourcing_a_sourced_expression_changes_nothing() {
    let (api, _) = api().await;
    let ctx = ctx(&api);
    let request = QueryRequest::new(orders().filter(Expr::field("Freight").gt(10)).take(2));

    let sourced = QueryPipeline::new(&ctx, &request).unwrap().run().unwrap();
    assert!(sourced.is_fully_sourced());

    let again = QueryRequest::new(sourced.clone());
    let resourced = QueryPipeline::new(&ctx, &again).unwrap().run().unwrap();
    assert_eq!(resourced, sourced);
}

#[tokio::test]
async fn unknown_resource_is_not_found() {
    let (api, _) = api().await;
    let ctx = ctx(&api);

    let err = api
        .query(&ctx, QueryRequest::new(QueryExpr::resource("Suppliers")))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::ResourceNotFound(ref n) if n == "Suppliers"), "{err}");
}

#[tokio::test]
async fn cancelled_context_reports_cancellation() {
    let (api, _) = api().await;
    let token = CancellationToken::new();
    token.cancel();
    let ctx = api.context(token);

    let err = api
        .query(&ctx, QueryRequest::new(orders().take(1)))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
}

#[tokio::test]
async fn concurrent_queries_share_one_api() {
    let (api, _) = api().await;

    let handles: Vec<_> = ["ALFKI", "BERGS", "BOTTM"]
        .into_iter()
        .map(|customer| {
            let api = api.clone();
            tokio::spawn(async move {
                let ctx = api.context(CancellationToken::new());
                let query = orders().filter(Expr::field("CustomerID").eq(customer));
                api.query(&ctx, QueryRequest::new(query).with_total_count())
                    .await
                    .map(|r| r.total_count)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), Some(83));
    }
}

// =============================================================================
// Conventions
// =============================================================================

#[tokio::test]
async fn entity_set_filter_narrows_every_query() {
    let conventions = Conventions::builder()
        .on_filter(
            "Orders",
            filter_fn(|_, q| Ok(q.filter(Expr::field("ShipCountry").eq("Germany")))),
        )
        .build();
    let (api, _) = api_with(conventions).await;
    let ctx = ctx(&api);

    let result = api
        .query(&ctx, QueryRequest::new(orders().take(10)).with_total_count())
        .await
        .unwrap();

    // ALFKI and BLAUS ship to Germany.
    assert_eq!(result.total_count, Some(166));
    assert!(result.rows.iter().all(|r| r.get("ShipCountry") == Some(&json!("Germany"))));
}

#[tokio::test]
async fn failing_entity_set_filter_is_reported_by_name() {
    let conventions = Conventions::builder()
        .on_filter("Orders", filter_fn(|_, _| Err(anyhow::anyhow!("no tenant"))))
        .build();
    let (api, _) = api_with(conventions).await;
    let ctx = ctx(&api);

    let err = api.query(&ctx, QueryRequest::new(orders())).await.unwrap_err();

    assert!(matches!(err, ApiError::Hook { ref hook, .. } if hook == "OnFilterOrders"), "{err}");
}

#[tokio::test]
async fn can_read_convention_denies_the_set() {
    let conventions = Conventions::builder().can_read("Orders", |_| false).build();
    let (api, _) = api_with(conventions).await;
    let ctx = ctx(&api);

    let err = api.query(&ctx, QueryRequest::new(orders())).await.unwrap_err();
    assert!(matches!(err, ApiError::NotAuthorized { .. }), "{err}");

    let customers = api
        .query(&ctx, QueryRequest::new(QueryExpr::resource("Customers")))
        .await
        .unwrap();
    assert_eq!(customers.rows.len(), 10);
}

#[tokio::test]
async fn denial_of_the_joined_collection_aborts_the_query() {
    let conventions = Conventions::builder().can_read("Orders", |_| false).build();
    let (api, _) = api_with(conventions).await;
    let ctx = ctx(&api);
    let query =
        QueryExpr::resource("Customers").select_many(orders(), "CustomerID", "CustomerID");

    let result = api
        .query(&ctx, QueryRequest::new(query).with_total_count())
        .await;

    match result {
        Err(ApiError::NotAuthorized { resource, action }) => {
            assert_eq!(resource, "Orders");
            assert_eq!(action, AccessAction::Read);
        }
        other => panic!("expected NotAuthorized, got {other:?}"),
    }
    assert!(!ctx.properties().contains(TOTAL_COUNT_PROPERTY));
}

#[tokio::test]
async fn composed_set_expands_to_its_definition() {
    let conventions = Conventions::builder()
        .composed_set(
            "CheapOrders",
            "Order",
            orders().filter(Expr::field("Freight").lt(5)),
        )
        .build();
    let (api, _) = api_with(conventions).await;
    let ctx = ctx(&api);

    let result = api
        .query(
            &ctx,
            QueryRequest::new(QueryExpr::resource("CheapOrders").take(3)).with_total_count(),
        )
        .await
        .unwrap();

    let total = result.total_count.unwrap();
    assert!(total > 0 && total < 830, "{total}");
    assert!(
        result
            .rows
            .iter()
            .all(|r| r.get("Freight").and_then(serde_json::Value::as_f64).unwrap() < 5.0)
    );
}

#[tokio::test]
async fn cyclic_composed_sets_are_rejected() {
    let conventions = Conventions::builder()
        .composed_set("Loop", "Order", QueryExpr::resource("Archive"))
        .composed_set("Archive", "Order", QueryExpr::resource("Loop"))
        .build();
    let (api, _) = api_with(conventions).await;
    let ctx = ctx(&api);

    let err = api
        .query(&ctx, QueryRequest::new(QueryExpr::resource("Loop")))
        .await
        .unwrap_err();

    match err {
        ApiError::Configuration(ConfigurationError::CyclicExpansion { chain, .. }) => {
            assert_eq!(chain, "Loop -> Archive -> Loop");
        }
        other => panic!("expected CyclicExpansion, got {other:?}"),
    }
}

#[tokio::test]
async fn hidden_elements_disappear_from_queries() {
    let conventions = Conventions::builder()
        .hide_entity_set("Products")
        .hide_property("Customer", "ContactName")
        .build();
    let (api, _) = api_with(conventions).await;
    let ctx = ctx(&api);

    let err = api
        .query(&ctx, QueryRequest::new(QueryExpr::resource("Products")))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ResourceNotFound(_)), "{err}");

    let customers = api
        .query(&ctx, QueryRequest::new(QueryExpr::resource("Customers").take(1)))
        .await
        .unwrap();
    let first = &customers.rows[0];
    assert!(first.contains("CompanyName"));
    assert!(!first.contains("ContactName"));
}
