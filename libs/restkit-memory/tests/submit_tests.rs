#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Change-set submission scenarios over the Northwind store

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{api, api_with, ctx, key};
use restkit::conventions::{
    Conventions, EntityHook, EntityObserver, hook_fn, observer_fn, validator_fn,
};
use restkit::error::{AccessAction, ApiError, ErrorCategory};
use restkit::submit::{ChangeSet, DataModificationItem, ValidationResult, ValidationSeverity};
use restkit::{ApiConfig, CancellationToken, EntityRecord, InvocationContext};
use restkit_memory::northwind;
use serde_json::{Value, json};

fn record(v: Value) -> EntityRecord {
    EntityRecord::from_json(v).unwrap()
}

fn new_customer(id: &str, company: &str) -> DataModificationItem {
    DataModificationItem::insert(
        "Customers",
        record(json!({
            "CustomerID": id,
            "CompanyName": company,
            "Addr": { "Street": "Main St. 1", "City": "Oslo", "Zip": "0150" }
        })),
    )
}

// =============================================================================
// Hooks
// =============================================================================

/// Async pre-submit hook: appends the hook name to the company name.
struct StampCompanyName;

#[async_trait]
impl EntityHook for StampCompanyName {
    async fn call(
        &self,
        _ctx: &InvocationContext,
        entity: &mut EntityRecord,
    ) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let name = entity
            .get("CompanyName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        entity.set("CompanyName", format!("{name}OnInserting"));
        Ok(())
    }
}

#[tokio::test]
async fn inserting_hook_changes_the_committed_entity() {
    let conventions = Conventions::builder()
        .on_inserting("Customers", StampCompanyName)
        .build();
    let (api, store) = api_with(conventions).await;
    let ctx = ctx(&api);

    let result = api
        .submit(&ctx, ChangeSet::new().with(new_customer("NEWCU", "New Cust")))
        .await
        .unwrap();

    assert_eq!(result.affected, 1);
    assert!(result.is_complete());
    let stored = store.get("Customers", &key("CustomerID", "NEWCU")).unwrap();
    assert_eq!(stored.get("CompanyName"), Some(&json!("New CustOnInserting")));
}

#[derive(Clone, Default)]
struct CountingObserver(Arc<AtomicUsize>);

impl CountingObserver {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityObserver for CountingObserver {
    async fn call(&self, _ctx: &InvocationContext, _entity: &EntityRecord) -> anyhow::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn post_submit_hooks_run_after_commit() {
    let seen = CountingObserver::default();
    let conventions = Conventions::builder()
        .on_inserted("Customers", seen.clone())
        .on_deleted("Customers", seen.clone())
        .build();
    let (api, store) = api_with(conventions).await;
    let ctx = ctx(&api);

    api.submit(&ctx, ChangeSet::new().with(new_customer("TMP01", "Temp")))
        .await
        .unwrap();
    api.submit(
        &ctx,
        ChangeSet::new().with(DataModificationItem::delete(
            "Customers",
            key("CustomerID", "TMP01"),
        )),
    )
    .await
    .unwrap();

    assert_eq!(seen.count(), 2);
    assert!(store.get("Customers", &key("CustomerID", "TMP01")).is_none());
}

#[tokio::test]
async fn failing_post_submit_hook_is_reported_but_commit_stands() {
    let conventions = Conventions::builder()
        .on_inserted(
            "Customers",
            observer_fn(|_, _| Err(anyhow::anyhow!("mail server down"))),
        )
        .build();
    let (api, store) = api_with(conventions).await;
    let ctx = ctx(&api);

    let result = api
        .submit(&ctx, ChangeSet::new().with(new_customer("MAIL1", "Mailer")))
        .await
        .unwrap();

    assert!(!result.is_complete());
    assert_eq!(result.post_submit_failures.len(), 1);
    let failure = &result.post_submit_failures[0];
    assert_eq!(failure.index, 0);
    assert!(failure.message.contains("OnInsertedCustomers"), "{}", failure.message);
    assert!(store.get("Customers", &key("CustomerID", "MAIL1")).is_some());
}

#[tokio::test]
async fn failing_pre_submit_hook_aborts_before_any_write() {
    let conventions = Conventions::builder()
        .on_deleting("Customers", hook_fn(|_, _| Err(anyhow::anyhow!("has orders"))))
        .build();
    let (api, store) = api_with(conventions).await;
    let ctx = ctx(&api);

    let err = api
        .submit(
            &ctx,
            ChangeSet::new()
                .with(new_customer("KEEP1", "Kept"))
                .with(DataModificationItem::delete("Customers", key("CustomerID", "ALFKI"))),
        )
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Hook);
    assert!(store.get("Customers", &key("CustomerID", "KEEP1")).is_none());
    assert!(store.get("Customers", &key("CustomerID", "ALFKI")).is_some());
}

// =============================================================================
// Authorization and validation
// =============================================================================

#[tokio::test]
async fn write_rule_denies_the_whole_change_set() {
    let conventions = Conventions::builder().can_insert("Customers", |_| false).build();
    let (api, store) = api_with(conventions).await;
    let ctx = ctx(&api);

    let err = api
        .submit(&ctx, ChangeSet::new().with(new_customer("DENY1", "Denied")))
        .await
        .unwrap_err();

    match err {
        ApiError::NotAuthorized { resource, action } => {
            assert_eq!(resource, "Customers");
            assert_eq!(action, AccessAction::Insert);
        }
        other => panic!("expected NotAuthorized, got {other:?}"),
    }
    assert_eq!(store.rows("Customers").len(), 10);
}

#[tokio::test]
async fn one_invalid_item_rejects_every_item() {
    let (api, store) = api().await;
    let ctx = ctx(&api);
    let invalid = DataModificationItem::insert(
        "Customers",
        record(json!({ "CustomerID": "TOOLONGID", "Fax": "030-0074321" })),
    );

    let err = api
        .submit(
            &ctx,
            ChangeSet::new()
                .with(new_customer("VALID", "Valid Co"))
                .with(invalid),
        )
        .await
        .unwrap_err();

    let results = err.validation_results().unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
    assert!(ids.contains(&"MaxLengthExceeded"), "{ids:?}");
    assert!(ids.contains(&"UnknownProperty"), "{ids:?}");
    assert!(ids.contains(&"RequiredPropertyMissing"), "{ids:?}");
    assert!(results.iter().all(|r| r.item_index == Some(1)));
    assert!(store.get("Customers", &key("CustomerID", "VALID")).is_none());
}

#[tokio::test]
async fn validation_warnings_do_not_block() {
    let conventions = Conventions::builder()
        .validator(
            "Customers",
            validator_fn(|_, item, results| {
                if item.values.get("Country").is_none() {
                    results.push(
                        ValidationResult::warning("CountryMissing", "country is recommended")
                            .for_property("Country"),
                    );
                }
            }),
        )
        .build();
    let (api, _) = api_with(conventions).await;
    let ctx = ctx(&api);

    let result = api
        .submit(&ctx, ChangeSet::new().with(new_customer("WARN1", "Warned")))
        .await
        .unwrap();
    assert_eq!(result.affected, 1);
}

#[tokio::test]
async fn custom_validator_errors_are_collected_with_model_errors() {
    let conventions = Conventions::builder()
        .validator(
            "Customers",
            validator_fn(|_, _, results| {
                results.push(ValidationResult::error("Blocked", "customers are frozen"));
            }),
        )
        .build();
    let (api, _) = api_with(conventions).await;
    let ctx = ctx(&api);

    let err = api
        .submit(
            &ctx,
            ChangeSet::new().with(DataModificationItem::insert(
                "Customers",
                record(json!({ "CustomerID": "X1" })),
            )),
        )
        .await
        .unwrap_err();

    let results = err.validation_results().unwrap();
    assert!(results.iter().any(|r| r.id == "Blocked"));
    assert!(results.iter().any(|r| r.id == "RequiredPropertyMissing"));
    assert!(results.iter().all(|r| r.severity == ValidationSeverity::Error));
}

#[tokio::test]
async fn hidden_set_cannot_be_written() {
    let conventions = Conventions::builder().hide_entity_set("Products").build();
    let (api, _) = api_with(conventions).await;
    let ctx = ctx(&api);

    let err = api
        .submit(
            &ctx,
            ChangeSet::new().with(DataModificationItem::insert(
                "Products",
                record(json!({ "ProductID": 99, "ProductName": "Ghost", "Discontinued": false })),
            )),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::ResourceNotFound(ref s) if s == "Products"), "{err}");
}

// =============================================================================
// Updates and concurrency
// =============================================================================

#[tokio::test]
async fn nested_update_keeps_sibling_properties() {
    let (api, store) = api().await;
    let ctx = ctx(&api);

    api.submit(
        &ctx,
        ChangeSet::new().with(DataModificationItem::update(
            "Customers",
            key("CustomerID", "ALFKI"),
            record(json!({ "Addr": { "Zip": "332" } })),
        )),
    )
    .await
    .unwrap();

    let stored = store.get("Customers", &key("CustomerID", "ALFKI")).unwrap();
    assert_eq!(
        stored.get("Addr"),
        Some(&json!({ "Street": "Obere Str. 57", "City": "Berlin", "Zip": "332" }))
    );
    assert_eq!(stored.get("CompanyName"), Some(&json!("Alfreds Futterkiste")));
}

#[tokio::test]
async fn full_replace_resets_unspecified_properties() {
    let (api, store) = api().await;
    let ctx = ctx(&api);

    api.submit(
        &ctx,
        ChangeSet::new().with(
            DataModificationItem::update(
                "Customers",
                key("CustomerID", "AROUT"),
                record(json!({ "CompanyName": "Around the Horn Ltd" })),
            )
            .full_replace(),
        ),
    )
    .await
    .unwrap();

    let stored = store.get("Customers", &key("CustomerID", "AROUT")).unwrap();
    assert_eq!(stored.get("CustomerID"), Some(&json!("AROUT")));
    assert_eq!(stored.get("CompanyName"), Some(&json!("Around the Horn Ltd")));
    assert_eq!(stored.get("ContactName"), Some(&Value::Null));
}

#[tokio::test]
async fn full_replace_must_supply_non_null_properties() {
    let (api, store) = api().await;
    let ctx = ctx(&api);

    let err = api
        .submit(
            &ctx,
            ChangeSet::new().with(
                DataModificationItem::update(
                    "Customers",
                    key("CustomerID", "AROUT"),
                    record(json!({ "ContactName": "X" })),
                )
                .full_replace(),
            ),
        )
        .await
        .unwrap_err();

    let results = err.validation_results().unwrap();
    assert!(
        results
            .iter()
            .any(|r| r.id == "RequiredPropertyMissing"
                && r.property_name.as_deref() == Some("CompanyName")),
        "{results:?}"
    );
    let stored = store.get("Customers", &key("CustomerID", "AROUT")).unwrap();
    assert_eq!(stored.get("CompanyName"), Some(&json!("Around the Horn")));
    assert_eq!(stored.get("ContactName"), Some(&json!("Thomas Hardy")));
}

#[tokio::test]
async fn stale_original_values_fail_the_precondition() {
    let (api, store) = api().await;
    let reader = ctx(&api);
    let writer = ctx(&api);

    let original = store.get("Customers", &key("CustomerID", "BONAP")).unwrap();
    let original_name = original.get("CompanyName").cloned().unwrap();

    api.submit(
        &writer,
        ChangeSet::new().with(DataModificationItem::update(
            "Customers",
            key("CustomerID", "BONAP"),
            record(json!({ "CompanyName": "Bon app' SA" })),
        )),
    )
    .await
    .unwrap();

    let err = api
        .submit(
            &reader,
            ChangeSet::new().with(
                DataModificationItem::update(
                    "Customers",
                    key("CustomerID", "BONAP"),
                    record(json!({ "ContactName": "L. Lebihan" })),
                )
                .with_original_values(record(json!({ "CompanyName": original_name }))),
            ),
        )
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Precondition);
    let stored = store.get("Customers", &key("CustomerID", "BONAP")).unwrap();
    assert_eq!(stored.get("ContactName"), Some(&json!("Laurence Lebihan")));
}

#[tokio::test]
async fn missing_entity_is_not_found() {
    let (api, _) = api().await;
    let ctx = ctx(&api);

    let err = api
        .submit(
            &ctx,
            ChangeSet::new().with(DataModificationItem::delete(
                "Customers",
                key("CustomerID", "NOPE1"),
            )),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::EntityNotFound { .. }), "{err}");
}

#[tokio::test]
async fn duplicate_insert_conflicts_at_commit() {
    let (api, store) = api().await;
    let ctx = ctx(&api);

    let err = api
        .submit(
            &ctx,
            ChangeSet::new()
                .with(new_customer("TWIN1", "First"))
                .with(new_customer("ALFKI", "Clash")),
        )
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Provider);
    assert!(store.get("Customers", &key("CustomerID", "TWIN1")).is_none());
}

// =============================================================================
// Failure modes
// =============================================================================

#[tokio::test]
async fn commit_failure_skips_post_submit_hooks() {
    let seen = CountingObserver::default();
    let conventions = Conventions::builder()
        .on_inserted("Customers", seen.clone())
        .build();
    let (api, store) = api_with(conventions).await;
    let ctx = ctx(&api);
    store.fail_next_commit();

    let err = api
        .submit(&ctx, ChangeSet::new().with(new_customer("FAIL1", "Failing")))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Provider);
    assert_eq!(seen.count(), 0);
    assert!(store.get("Customers", &key("CustomerID", "FAIL1")).is_none());
}

#[tokio::test]
async fn cancelled_submission_writes_nothing() {
    let (api, store) = api().await;
    let token = CancellationToken::new();
    token.cancel();
    let ctx = api.context(token);

    let err = api
        .submit(&ctx, ChangeSet::new().with(new_customer("CANC1", "Cancelled")))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(store.get("Customers", &key("CustomerID", "CANC1")).is_none());
}

#[tokio::test]
async fn oversized_change_set_is_rejected() {
    let mut config = ApiConfig::default();
    config.submit.max_change_set_size = 1;
    let (builder, _) = northwind::api_builder(config).unwrap();
    let api = builder.build().await.unwrap();
    let ctx = ctx(&api);

    let err = api
        .submit(
            &ctx,
            ChangeSet::new()
                .with(new_customer("BIG01", "One"))
                .with(new_customer("BIG02", "Two")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::InvalidRequest(_)), "{err}");
}
