//! Conventions the sample service ships with.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};

use restkit::InvocationContext;
use restkit::conventions::{Conventions, filter_fn, hook_fn, validator_fn};
use restkit::model::{FieldKind, OperationDescriptor};
use restkit::operation::{OperationArguments, OperationHandler};
use restkit::query::ast::Expr;
use restkit::submit::ValidationResult;
use restkit_memory::InMemoryStore;

/// `CustomerOrderCount(CustomerID)`: number of stored orders of one customer.
struct CustomerOrderCount {
    store: InMemoryStore,
}

#[async_trait]
impl OperationHandler for CustomerOrderCount {
    async fn invoke(
        &self,
        _ctx: &InvocationContext,
        arguments: &OperationArguments,
    ) -> anyhow::Result<Value> {
        let customer = arguments.get("CustomerID").cloned().unwrap_or(Value::Null);
        let count = self
            .store
            .rows("Orders")
            .iter()
            .filter(|order| order.get("CustomerID") == Some(&customer))
            .count();
        Ok(json!(count))
    }
}

fn is_customer_id(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|id| id.len() == 5 && id.chars().all(|c| c.is_ascii_uppercase()))
}

pub fn conventions(store: &InMemoryStore) -> Arc<Conventions> {
    Conventions::builder()
        .on_filter(
            "Products",
            filter_fn(|_, query| Ok(query.filter(Expr::field("Discontinued").eq(false)))),
        )
        .on_inserting(
            "Orders",
            hook_fn(|_, order| {
                if order.get("OrderDate").is_none_or(Value::is_null) {
                    order.set(
                        "OrderDate",
                        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                    );
                }
                Ok(())
            }),
        )
        .validator(
            "Customers",
            validator_fn(|_, item, results| {
                if let Some(id) = item.values.get("CustomerID")
                    && !is_customer_id(id)
                {
                    results.push(
                        ValidationResult::error(
                            "CustomerIdFormat",
                            "CustomerID must be five upper-case letters",
                        )
                        .for_property("CustomerID"),
                    );
                }
            }),
        )
        .operation(
            OperationDescriptor::function("CustomerOrderCount")
                .bound_to("Customers")
                .parameter("CustomerID", FieldKind::String, false),
            CustomerOrderCount {
                store: store.clone(),
            },
        )
        .build()
}
