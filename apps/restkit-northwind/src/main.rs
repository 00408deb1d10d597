mod logging;
mod sample;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};

use restkit::model::{ApiModel, OperationKind, PropertyKind};
use restkit::query::ast::{Expr, OrderKey};
use restkit::{
    Api, ApiConfig, CancellationToken, ChangeSet, DataModificationItem, EntityRecord, KeyValues,
    QueryExpr, QueryRequest,
};
use restkit_memory::northwind;

/// Query and modify the Northwind sample through the restkit pipelines
#[derive(Parser)]
#[command(name = "restkit-northwind")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t)]
    log_format: logging::LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the visible model
    Model,
    /// Run a query against an entity set
    Query(QueryArgs),
    /// Insert one entity given as a JSON object
    Insert {
        entity_set: String,
        entity: String,
    },
    /// Delete one entity by key
    Delete {
        entity_set: String,
        /// Key property as NAME=VALUE; repeat for composite keys
        #[arg(long = "key", required = true, value_parser = parse_assignment)]
        key: Vec<(String, Value)>,
    },
    /// Invoke a function or action with JSON object arguments
    Invoke {
        operation: String,
        #[arg(default_value = "{}")]
        arguments: String,
    },
}

#[derive(Args)]
struct QueryArgs {
    entity_set: String,

    /// Equality filter NAME=VALUE; repeats are combined with `and`
    #[arg(long = "eq", value_parser = parse_assignment)]
    filters: Vec<(String, Value)>,

    /// Sort key; prefix with `-` for descending
    #[arg(long = "order-by", allow_hyphen_values = true)]
    order_by: Vec<String>,

    #[arg(long)]
    skip: Option<u64>,

    #[arg(long)]
    top: Option<u64>,

    /// Comma-separated list of properties to return
    #[arg(long, value_delimiter = ',')]
    select: Vec<String>,

    /// Also report the number of matching entities ignoring paging
    #[arg(long)]
    count: bool,
}

/// `NAME=VALUE`, where VALUE is read as JSON and falls back to a plain string.
fn parse_assignment(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    Ok((name.to_owned(), value))
}

impl QueryArgs {
    fn into_request(self) -> QueryRequest {
        let mut expr = QueryExpr::resource(self.entity_set);
        let predicate = self
            .filters
            .into_iter()
            .map(|(name, value)| Expr::field(name).eq(value))
            .reduce(Expr::and);
        if let Some(predicate) = predicate {
            expr = expr.filter(predicate);
        }
        if !self.order_by.is_empty() {
            expr = expr.order_by(self.order_by.iter().map(|key| match key.strip_prefix('-') {
                Some(field) => OrderKey::desc(field),
                None => OrderKey::asc(key.as_str()),
            }));
        }
        if let Some(skip) = self.skip {
            expr = expr.skip(skip);
        }
        if let Some(top) = self.top {
            expr = expr.take(top);
        }
        if !self.select.is_empty() {
            expr = expr.select(self.select);
        }
        let request = QueryRequest::new(expr);
        if self.count {
            request.with_total_count()
        } else {
            request
        }
    }
}

fn describe_model(model: &ApiModel) -> Value {
    let sets: Vec<Value> = model
        .visible_entity_sets()
        .map(|set| {
            let properties: Vec<Value> = model
                .properties_of(&set.entity_type)
                .unwrap_or_default()
                .iter()
                .filter(|p| model.is_property_visible(&set.entity_type, &p.name))
                .map(|p| {
                    let kind = match &p.kind {
                        PropertyKind::Primitive(kind) => kind.to_string(),
                        PropertyKind::Complex(name) => name.clone(),
                    };
                    json!({ "name": p.name, "type": kind, "nullable": p.nullable })
                })
                .collect();
            json!({
                "name": set.name,
                "entityType": set.entity_type,
                "composed": set.composed,
                "properties": properties,
            })
        })
        .collect();
    let operations: Vec<Value> = model
        .visible_operations()
        .map(|op| {
            json!({
                "name": op.name,
                "kind": match op.kind {
                    OperationKind::Function => "Function",
                    OperationKind::Action => "Action",
                },
                "boundTo": op.bound_to,
                "parameters": op.parameters.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({
        "namespace": model.namespace(),
        "entitySets": sets,
        "operations": operations,
    })
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_api(config: ApiConfig) -> Result<Api> {
    let (builder, store) = northwind::api_builder(config)?;
    let api = builder
        .with_conventions(sample::conventions(&store))
        .build()
        .await?;
    Ok(api)
}

async fn run(api: &Api, command: Commands) -> Result<()> {
    let ctx = api.context(CancellationToken::new());
    match command {
        Commands::Model => print_json(&describe_model(api.model())),
        Commands::Query(args) => {
            let result = api.query(&ctx, args.into_request()).await?;
            let rows: Vec<Value> = result.rows.into_iter().map(EntityRecord::into_json).collect();
            let mut out = json!({ "value": rows });
            if let Some(total) = result.total_count {
                out["count"] = json!(total);
            }
            print_json(&out)
        }
        Commands::Insert { entity_set, entity } => {
            let value: Value =
                serde_json::from_str(&entity).context("entity is not valid JSON")?;
            let record = EntityRecord::from_json(value).context("entity must be a JSON object")?;
            let change_set =
                ChangeSet::new().with(DataModificationItem::insert(entity_set, record));
            report(api.submit(&ctx, change_set).await?)
        }
        Commands::Delete { entity_set, key } => {
            let key: KeyValues = key.into_iter().collect();
            let change_set = ChangeSet::new().with(DataModificationItem::delete(entity_set, key));
            report(api.submit(&ctx, change_set).await?)
        }
        Commands::Invoke {
            operation,
            arguments,
        } => {
            let arguments = match serde_json::from_str::<Value>(&arguments)
                .context("arguments are not valid JSON")?
            {
                Value::Object(map) => map,
                _ => anyhow::bail!("arguments must be a JSON object"),
            };
            let out = api.invoke_operation(&ctx, &operation, arguments).await?;
            print_json(&json!({ "value": out }))
        }
    }
}

fn report(result: restkit::SubmitResult) -> Result<()> {
    for failure in &result.post_submit_failures {
        tracing::warn!(
            index = failure.index,
            entity_set = %failure.entity_set,
            message = %failure.message,
            "Post-submit hook failed"
        );
    }
    let items: Vec<Value> = result
        .items
        .into_iter()
        .filter_map(|item| item.resource.map(EntityRecord::into_json))
        .collect();
    print_json(&json!({ "affected": result.affected, "value": items }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);

    let config = ApiConfig::load(cli.config.as_deref())?;
    tracing::info!(namespace = %config.namespace, "restkit-northwind starting");

    let api = build_api(config).await?;
    run(&api, cli.command).await
}
