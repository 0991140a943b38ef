//! Storage collaborator: constraint model, the `Storage` / `Introspect` traits and an in-memory store.

use crate::entity::{EntityCatalog, ForeignKey, Record};
use crate::error::ResourceException;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),
    #[error("storage backend: {0}")]
    Backend(String),
}

impl From<StorageError> for ResourceException {
    fn from(e: StorageError) -> Self {
        ResourceException::internal("storage_error", e.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    /// SQL `LIKE` with `%` and `_` wildcards.
    Like,
}

impl CompareOp {
    /// Operator with sides swapped (`3 < x` is `x > 3`).
    pub fn flip(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            other => other,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Like => "like",
        }
    }

    pub fn apply(self, left: &Value, right: &Value) -> bool {
        match self {
            CompareOp::Eq => values_equal(left, right),
            CompareOp::Ne => !values_equal(left, right),
            CompareOp::Lt => compare_values(left, right) == Some(Ordering::Less),
            CompareOp::Le => matches!(compare_values(left, right), Some(Ordering::Less | Ordering::Equal)),
            CompareOp::Gt => compare_values(left, right) == Some(Ordering::Greater),
            CompareOp::Ge => matches!(compare_values(left, right), Some(Ordering::Greater | Ordering::Equal)),
            CompareOp::In => contains(right, left),
            CompareOp::NotIn => !contains(right, left),
            CompareOp::Like => match (left, right) {
                (Value::String(s), Value::String(pattern)) => like(s, pattern),
                _ => false,
            },
        }
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Equality with numeric coercion so that query-string values ("3") match stored numbers.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => {
            s.eq_ignore_ascii_case(if *x { "true" } else { "false" })
        }
        _ => a == b,
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Array(items), _) => items.iter().any(|i| values_equal(i, needle)),
        (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
        (Value::Object(m), Value::String(k)) => m.contains_key(k),
        _ => false,
    }
}

fn like(s: &str, pattern: &str) -> bool {
    fn go(s: &[char], p: &[char]) -> bool {
        match p.split_first() {
            None => s.is_empty(),
            Some(('%', rest)) => (0..=s.len()).any(|i| go(&s[i..], rest)),
            Some(('_', rest)) => !s.is_empty() && go(&s[1..], rest),
            Some((c, rest)) => s.first().map(|x| x.eq_ignore_ascii_case(c)).unwrap_or(false) && go(&s[1..], rest),
        }
    }
    let s: Vec<char> = s.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    go(&s, &p)
}

/// Selects `select` from the records of `entity` matching `constraints`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Subquery {
    pub entity: String,
    pub select: String,
    pub constraints: Vec<Constraint>,
}

/// Storage-layer filter predicate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Constraint {
    Compare {
        entity: String,
        field: String,
        op: CompareOp,
        value: Value,
    },
    Const(bool),
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
    Not(Box<Constraint>),
    InSubquery {
        entity: String,
        field: String,
        subquery: Box<Subquery>,
    },
}

impl Constraint {
    pub fn compare(entity: impl Into<String>, field: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Constraint::Compare {
            entity: entity.into(),
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eq(entity: impl Into<String>, field: impl Into<String>, value: Value) -> Self {
        Self::compare(entity, field, CompareOp::Eq, value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            descending: true,
        }
    }
}

/// Foreign-key introspection over the declared entity types.
pub trait Introspect {
    /// Every foreign key (on any entity) that references `entity.field`.
    fn foreign_keys_referencing(&self, entity: &str, field: &str) -> Vec<ForeignKey>;
    fn primary_key_field(&self, entity: &str) -> Option<String>;
}

pub trait Storage: Send + Sync {
    fn query(
        &self,
        entity: &str,
        constraints: &[Constraint],
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<Record>, StorageError>;

    fn get(&self, entity: &str, primary_key: &Value) -> Result<Option<Record>, StorageError>;

    /// Inserts or replaces `record`, assigning a primary key when it has none. Returns the key.
    fn save(&self, record: Record) -> Result<Value, StorageError>;
}

/// In-memory storage keyed by entity type name.
pub struct MemoryStore {
    primary_keys: BTreeMap<String, String>,
    tables: RwLock<BTreeMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new(catalog: &EntityCatalog) -> Self {
        let primary_keys = catalog
            .names()
            .filter_map(|n| catalog.get(n).map(|e| (n.to_string(), e.primary_key().to_string())))
            .collect();
        MemoryStore {
            primary_keys,
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    fn primary_key(&self, entity: &str) -> Result<&str, StorageError> {
        self.primary_keys
            .get(entity)
            .map(String::as_str)
            .ok_or_else(|| StorageError::UnknownEntity(entity.to_string()))
    }

    fn read_tables(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<Record>>>, StorageError> {
        self.tables.read().map_err(|_| StorageError::Backend("store lock poisoned".into()))
    }
}

fn matches(tables: &BTreeMap<String, Vec<Record>>, record: &Record, constraint: &Constraint) -> bool {
    match constraint {
        Constraint::Compare { entity, field, op, value } => {
            if entity != record.entity() {
                tracing::warn!(constraint_entity = %entity, record_entity = %record.entity(), "constraint targets another entity type");
                return false;
            }
            let actual = record.get(field).unwrap_or(&Value::Null);
            op.apply(actual, value)
        }
        Constraint::Const(b) => *b,
        Constraint::And(cs) => cs.iter().all(|c| matches(tables, record, c)),
        Constraint::Or(cs) => cs.iter().any(|c| matches(tables, record, c)),
        Constraint::Not(c) => !matches(tables, record, c),
        Constraint::InSubquery { field, subquery, .. } => {
            let actual = record.get(field).unwrap_or(&Value::Null);
            tables
                .get(&subquery.entity)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| subquery.constraints.iter().all(|c| matches(tables, r, c)))
                        .filter_map(|r| r.get(&subquery.select))
                        .any(|v| values_equal(v, actual))
                })
                .unwrap_or(false)
        }
    }
}

impl Storage for MemoryStore {
    fn query(
        &self,
        entity: &str,
        constraints: &[Constraint],
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<Record>, StorageError> {
        self.primary_key(entity)?;
        tracing::debug!(entity = %entity, constraints = ?constraints, order_by = ?order_by, "query");
        let tables = self.read_tables()?;
        let mut rows: Vec<Record> = tables
            .get(entity)
            .map(|rows| {
                rows.iter()
                    .filter(|r| constraints.iter().all(|c| matches(&tables, r, c)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(order) = order_by {
            rows.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&order.field).unwrap_or(&Value::Null),
                    b.get(&order.field).unwrap_or(&Value::Null),
                )
                .unwrap_or(Ordering::Equal);
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        Ok(rows)
    }

    fn get(&self, entity: &str, primary_key: &Value) -> Result<Option<Record>, StorageError> {
        let pk = self.primary_key(entity)?;
        let tables = self.read_tables()?;
        Ok(tables.get(entity).and_then(|rows| {
            rows.iter()
                .find(|r| r.get(pk).map(|v| values_equal(v, primary_key)).unwrap_or(false))
                .cloned()
        }))
    }

    fn save(&self, mut record: Record) -> Result<Value, StorageError> {
        let pk = self.primary_key(record.entity())?.to_string();
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StorageError::Backend("store lock poisoned".into()))?;
        let rows = tables.entry(record.entity().to_string()).or_default();
        let key = match record.get(&pk) {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                let next = rows
                    .iter()
                    .filter_map(|r| r.get(&pk).and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0)
                    + 1;
                let v = Value::from(next);
                record.set(pk.clone(), v.clone());
                v
            }
        };
        match rows
            .iter_mut()
            .find(|r| r.get(&pk).map(|v| values_equal(v, &key)).unwrap_or(false))
        {
            Some(existing) => *existing = record,
            None => rows.push(record),
        }
        Ok(key)
    }
}
