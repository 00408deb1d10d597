//! Predicate and ordering primitives shared by query expressions and providers.

use std::fmt;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Box<Expr>, CompareOperator, Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
    Function(String, Vec<Expr>),
    Identifier(String),
    Value(Value),
}

impl Expr {
    /// Property reference. Nested complex properties use `/`: `Addr/Zip`.
    #[must_use]
    pub fn field(name: impl Into<String>) -> Expr {
        Expr::Identifier(name.into())
    }

    #[must_use]
    pub fn value(value: impl Into<Value>) -> Expr {
        Expr::Value(value.into())
    }

    /// Combine two expressions with AND: `expr1 and expr2`
    #[must_use]
    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    /// Combine two expressions with OR: `expr1 or expr2`
    #[must_use]
    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    /// Negate an expression: `not expr`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        !self
    }

    #[must_use]
    pub fn compare(self, op: CompareOperator, rhs: impl Into<Value>) -> Expr {
        Expr::Compare(Box::new(self), op, Box::new(Expr::Value(rhs.into())))
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn eq(self, rhs: impl Into<Value>) -> Expr {
        self.compare(CompareOperator::Eq, rhs)
    }

    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn ne(self, rhs: impl Into<Value>) -> Expr {
        self.compare(CompareOperator::Ne, rhs)
    }

    #[must_use]
    pub fn gt(self, rhs: impl Into<Value>) -> Expr {
        self.compare(CompareOperator::Gt, rhs)
    }

    #[must_use]
    pub fn ge(self, rhs: impl Into<Value>) -> Expr {
        self.compare(CompareOperator::Ge, rhs)
    }

    #[must_use]
    pub fn lt(self, rhs: impl Into<Value>) -> Expr {
        self.compare(CompareOperator::Lt, rhs)
    }

    #[must_use]
    pub fn le(self, rhs: impl Into<Value>) -> Expr {
        self.compare(CompareOperator::Le, rhs)
    }

    #[must_use]
    pub fn is_in<I, V>(self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::In(
            Box::new(self),
            values.into_iter().map(|v| Expr::Value(v.into())).collect(),
        )
    }

    /// `contains(field, 'needle')`
    #[must_use]
    pub fn contains(self, needle: impl Into<String>) -> Expr {
        Expr::Function(
            "contains".to_owned(),
            vec![self, Expr::Value(Value::String(needle.into()))],
        )
    }

    /// `startswith(field, 'prefix')`
    #[must_use]
    pub fn starts_with(self, prefix: impl Into<String>) -> Expr {
        Expr::Function(
            "startswith".to_owned(),
            vec![self, Expr::Value(Value::String(prefix.into()))],
        )
    }

    /// Every property path this predicate references, in visiting order.
    #[must_use]
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::And(a, b) | Expr::Or(a, b) | Expr::Compare(a, _, b) => {
                a.collect_identifiers(out);
                b.collect_identifiers(out);
            }
            Expr::Not(e) => e.collect_identifiers(out),
            Expr::In(e, list) => {
                e.collect_identifiers(out);
                for item in list {
                    item.collect_identifiers(out);
                }
            }
            Expr::Function(_, args) => {
                for arg in args {
                    arg.collect_identifiers(out);
                }
            }
            Expr::Identifier(name) => out.push(name),
            Expr::Value(_) => {}
        }
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Self::Output {
        Expr::Not(Box::new(self))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::And(a, b) => write!(f, "({a} and {b})"),
            Expr::Or(a, b) => write!(f, "({a} or {b})"),
            Expr::Not(e) => write!(f, "not {e}"),
            Expr::Compare(a, op, b) => write!(f, "{a} {op} {b}"),
            Expr::In(e, list) => {
                write!(f, "{e} in (")?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Expr::Function(name, args) => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Identifier(name) => f.write_str(name),
            Expr::Value(v) => v.fmt_literal(f),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl fmt::Display for CompareOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOperator::Eq => write!(f, "eq"),
            CompareOperator::Ne => write!(f, "ne"),
            CompareOperator::Gt => write!(f, "gt"),
            CompareOperator::Ge => write!(f, "ge"),
            CompareOperator::Lt => write!(f, "lt"),
            CompareOperator::Le => write!(f, "le"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(BigDecimal),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    String(String),
}

impl Value {
    /// JSON form used by entity records.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::from_str(&n.to_string())
                .unwrap_or_else(|_| serde_json::Value::String(n.to_string())),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::Date(d) => serde_json::Value::String(d.to_string()),
            Value::Time(t) => serde_json::Value::String(t.to_string()),
            Value::String(s) => serde_json::Value::String(s.clone()),
        }
    }

    fn fmt_literal(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::String(s) => write!(f, "'{s}'"),
        }
    }
}

/// Kind name, used in error messages.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(_) => write!(f, "bool"),
            Value::Number(_) => write!(f, "number"),
            Value::Uuid(_) => write!(f, "uuid"),
            Value::DateTime(_) => write!(f, "datetime"),
            Value::Date(_) => write!(f, "date"),
            Value::Time(_) => write!(f, "time"),
            Value::String(_) => write!(f, "string"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(BigDecimal::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(BigDecimal::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Number(BigDecimal::from(v))
    }
}

impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self {
        Value::Number(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

// Ordering primitives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

impl SortDir {
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub field: String,
    pub dir: SortDir,
}

impl OrderKey {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: SortDir::Asc,
        }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            dir: SortDir::Desc,
        }
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dir {
            SortDir::Asc => write!(f, "{} asc", self.field),
            SortDir::Desc => write!(f, "{} desc", self.field),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn builders_compose_and_render() {
        let e = Expr::field("Freight")
            .gt(10)
            .and(Expr::field("ShipCity").eq("Reims").not());
        assert_eq!(e.to_string(), "(Freight gt 10 and not ShipCity eq 'Reims')");
        assert_eq!(e.identifiers(), vec!["Freight", "ShipCity"]);
    }

    #[test]
    fn functions_and_in_lists_expose_identifiers() {
        let e = Expr::field("CompanyName")
            .contains("Wine")
            .or(Expr::field("Addr/Zip").is_in(["332", "100"]));
        assert_eq!(e.identifiers(), vec!["CompanyName", "Addr/Zip"]);
    }

    #[test]
    fn number_values_convert_to_json_numbers() {
        assert_eq!(Value::from(830_u64).to_json(), serde_json::json!(830));
        assert_eq!(Value::from("x").to_json(), serde_json::json!("x"));
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn sort_dir_reverses() {
        assert_eq!(SortDir::Asc.reverse(), SortDir::Desc);
        assert_eq!(OrderKey::desc("OrderDate").to_string(), "OrderDate desc");
    }
}
