#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Convention-driven data API pipelines.
//!
//! An [`Api`] exposes a model of entity sets and operations over pluggable providers.
//! Reads go through the query expression pipeline
//! (inspect, authorize, expand, process, source) and the query executor. Writes go
//! through the change-set pipeline
//! (authorization, validation, pre-submit, submit, post-submit). Every step is a hook
//! chain contract that applications can wrap, either directly through
//! [`HookRegistryBuilder`] or by name through [`Conventions`].

pub mod api;
pub mod config;
pub mod context;
pub mod conventions;
pub mod error;
pub mod hooks;
pub mod model;
pub mod operation;
pub mod provider;
pub mod query;
pub mod record;
pub mod submit;

pub use api::{Api, ApiBuilder};
pub use config::ApiConfig;
pub use context::{InvocationContext, PropertyBag};
pub use conventions::{Conventions, ConventionsBuilder, HookPoint};
pub use error::{AccessAction, ApiError, ConfigurationError, ErrorCategory};
pub use hooks::{HookRegistry, HookRegistryBuilder, ServiceScope};
pub use model::ApiModel;
pub use query::{QueryExpr, QueryRequest, QueryResult};
pub use record::{EntityRecord, KeyValues};
pub use submit::{ChangeAction, ChangeSet, DataModificationItem, SubmitResult};

// Re-exported so hosts can build cancellation tokens without a direct dependency.
pub use tokio_util::sync::CancellationToken;
