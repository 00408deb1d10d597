//! Evaluation of sourced query expressions over in-memory tables.

use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use serde_json::Value;

use restkit::provider::ProviderError;
use restkit::query::QueryExpr;
use restkit::query::ast::{CompareOperator, Expr, SortDir};
use restkit::record::EntityRecord;

use crate::store::{StoreInner, TableQueryable, Tables};

pub(crate) fn evaluate(
    store: &Arc<StoreInner>,
    tables: &Tables,
    query: &QueryExpr,
) -> Result<Vec<EntityRecord>, ProviderError> {
    match query {
        QueryExpr::Resource { name } => Err(ProviderError::Unsupported(format!(
            "logical resource '{name}' reached the provider"
        ))),
        QueryExpr::Source(handle) => {
            let name = handle.queryable().entity_set();
            let owned = handle
                .queryable()
                .as_any()
                .downcast_ref::<TableQueryable>()
                .is_some_and(|t| t.belongs_to(store));
            if !owned {
                return Err(ProviderError::Unsupported(format!(
                    "'{name}' is sourced from another provider"
                )));
            }
            tables
                .get(name)
                .cloned()
                .ok_or_else(|| ProviderError::UnknownEntitySet(name.to_owned()))
        }
        QueryExpr::Filter { input, predicate } => {
            let rows = evaluate(store, tables, input)?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                if matches(predicate, &row)? {
                    out.push(row);
                }
            }
            Ok(out)
        }
        QueryExpr::OrderBy { input, keys } => {
            let mut rows = evaluate(store, tables, input)?;
            rows.sort_by(|a, b| {
                for key in keys {
                    let left = a.get_path(&key.field).unwrap_or(&Value::Null);
                    let right = b.get_path(&key.field).unwrap_or(&Value::Null);
                    let ord = compare(left, right).unwrap_or(Ordering::Equal);
                    let ord = match key.dir {
                        SortDir::Asc => ord,
                        SortDir::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            Ok(rows)
        }
        QueryExpr::Skip { input, count } => {
            let rows = evaluate(store, tables, input)?;
            Ok(rows.into_iter().skip(to_usize(*count)).collect())
        }
        QueryExpr::Take { input, count } => {
            let rows = evaluate(store, tables, input)?;
            Ok(rows.into_iter().take(to_usize(*count)).collect())
        }
        QueryExpr::Select { input, fields } => {
            let rows = evaluate(store, tables, input)?;
            Ok(rows
                .into_iter()
                .map(|row| {
                    fields
                        .iter()
                        .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
                        .collect()
                })
                .collect())
        }
        QueryExpr::SelectMany {
            input,
            collection,
            outer_key,
            inner_key,
        } => {
            let outer = evaluate(store, tables, input)?;
            let inner = evaluate(store, tables, collection)?;
            let mut out = Vec::new();
            for row in &outer {
                let Some(key) = row.get_path(outer_key).filter(|v| !v.is_null()) else {
                    continue;
                };
                out.extend(
                    inner
                        .iter()
                        .filter(|i| i.get_path(inner_key) == Some(key))
                        .cloned(),
                );
            }
            Ok(out)
        }
    }
}

fn to_usize(count: u64) -> usize {
    usize::try_from(count).unwrap_or(usize::MAX)
}

fn matches(predicate: &Expr, row: &EntityRecord) -> Result<bool, ProviderError> {
    match predicate {
        Expr::And(a, b) => Ok(matches(a, row)? && matches(b, row)?),
        Expr::Or(a, b) => Ok(matches(a, row)? || matches(b, row)?),
        Expr::Not(inner) => Ok(!matches(inner, row)?),
        Expr::Compare(lhs, op, rhs) => {
            let left = operand(lhs, row)?;
            let right = operand(rhs, row)?;
            Ok(compare_with(&left, *op, &right))
        }
        Expr::In(lhs, candidates) => {
            let left = operand(lhs, row)?;
            for c in candidates {
                if compare_with(&left, CompareOperator::Eq, &operand(c, row)?) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expr::Function(name, args) => {
            let [subject, needle] = args.as_slice() else {
                return Err(ProviderError::Unsupported(format!(
                    "{name}() expects two arguments"
                )));
            };
            let subject = operand(subject, row)?;
            let needle = operand(needle, row)?;
            let (Some(subject), Some(needle)) = (subject.as_str(), needle.as_str()) else {
                return Ok(false);
            };
            match name.as_str() {
                "contains" => Ok(subject.contains(needle)),
                "startswith" => Ok(subject.starts_with(needle)),
                "endswith" => Ok(subject.ends_with(needle)),
                other => Err(ProviderError::Unsupported(format!("function {other}()"))),
            }
        }
        Expr::Identifier(path) => Ok(row.get_path(path).and_then(Value::as_bool) == Some(true)),
        Expr::Value(v) => Ok(v.to_json().as_bool() == Some(true)),
    }
}

fn operand(expr: &Expr, row: &EntityRecord) -> Result<Value, ProviderError> {
    match expr {
        Expr::Identifier(path) => Ok(row.get_path(path).cloned().unwrap_or(Value::Null)),
        Expr::Value(v) => Ok(v.to_json()),
        other => Ok(Value::Bool(matches(other, row)?)),
    }
}

fn compare_with(left: &Value, op: CompareOperator, right: &Value) -> bool {
    match op {
        CompareOperator::Eq => compare(left, right) == Some(Ordering::Equal),
        CompareOperator::Ne => compare(left, right) != Some(Ordering::Equal),
        _ if left.is_null() || right.is_null() => false,
        CompareOperator::Gt => compare(left, right) == Some(Ordering::Greater),
        CompareOperator::Ge => matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOperator::Lt => compare(left, right) == Some(Ordering::Less),
        CompareOperator::Le => {
            matches!(compare(left, right), Some(Ordering::Less | Ordering::Equal))
        }
    }
}

/// Total order within a kind; nulls sort first. `None` for mismatched kinds.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Number(a), Value::Number(b)) => {
            let a = BigDecimal::from_str(&a.to_string()).ok()?;
            let b = BigDecimal::from_str(&b.to_string()).ok()?;
            Some(a.cmp(&b))
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(v: Value) -> EntityRecord {
        EntityRecord::from_json(v).unwrap()
    }

    #[test]
    fn numbers_compare_by_value() {
        assert_eq!(compare(&json!(10), &json!(9.5)), Some(Ordering::Greater));
        assert_eq!(compare(&json!(2.50), &json!(2.5)), Some(Ordering::Equal));
        assert_eq!(compare(&json!(null), &json!(1)), Some(Ordering::Less));
        assert_eq!(compare(&json!("1"), &json!(1)), None);
    }

    #[test]
    fn predicates_follow_nested_paths() {
        let r = row(json!({"Freight": 32.38, "Addr": {"City": "Berlin"}, "Name": "Alfreds"}));
        assert!(matches(&Expr::field("Freight").gt(30), &r).unwrap());
        assert!(matches(&Expr::field("Addr/City").eq("Berlin"), &r).unwrap());
        assert!(matches(&Expr::field("Name").starts_with("Alf"), &r).unwrap());
        assert!(matches(&Expr::field("Name").is_in(["Bob", "Alfreds"]), &r).unwrap());
        assert!(!matches(&Expr::field("Missing").gt(1), &r).unwrap());
        assert!(matches(&Expr::field("Missing").eq(restkit::query::ast::Value::Null), &r).unwrap());
    }

    #[test]
    fn unknown_functions_are_unsupported() {
        let r = row(json!({"Name": "x"}));
        let expr = Expr::Function(
            "soundex".to_owned(),
            vec![Expr::field("Name"), Expr::value("x")],
        );
        assert!(matches!(matches(&expr, &r), Err(ProviderError::Unsupported(_))));
    }
}
