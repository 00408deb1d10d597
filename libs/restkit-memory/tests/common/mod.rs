#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

//! Shared fixtures for the Northwind scenario tests

use std::sync::Arc;

use restkit::conventions::Conventions;
use restkit::{Api, ApiBuilder, ApiConfig, CancellationToken, InvocationContext, KeyValues};
use restkit_memory::{InMemoryStore, northwind};
use serde_json::Value;

pub fn builder() -> (ApiBuilder, InMemoryStore) {
    northwind::api_builder(ApiConfig::default()).unwrap()
}

pub async fn api() -> (Api, InMemoryStore) {
    let (builder, store) = builder();
    (builder.build().await.unwrap(), store)
}

pub async fn api_with(conventions: Arc<Conventions>) -> (Api, InMemoryStore) {
    let (builder, store) = builder();
    let api = builder.with_conventions(conventions).build().await.unwrap();
    (api, store)
}

pub fn ctx(api: &Api) -> InvocationContext {
    api.context(CancellationToken::new())
}

pub fn key(name: &str, value: impl Into<Value>) -> KeyValues {
    KeyValues::from([(name.to_owned(), value.into())])
}
