#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! In-memory provider for `restkit`.
//!
//! [`InMemoryStore`] implements the model, query-source and change-tracking provider
//! contracts over plain tables. It evaluates filters, ordering, paging, projection and
//! `SelectMany` joins itself, so it is suitable for tests, demos and small datasets.

mod eval;
pub mod northwind;
mod store;
mod tracker;

pub use store::{InMemoryStore, TableQueryable};
