//! List query parameters: `q` filters, `sort_by` and `sort_dir`.
//!
//! `q` is a comma-separated list of `key<op>value` terms, e.g. `name:bolt,price<=3`. Commas and
//! operator characters inside keys or values must be escaped with a backslash.

use crate::error::ResourceException;
use crate::store::{CompareOp, Constraint};
use serde_json::Value;
use std::collections::BTreeMap;

const OPERATOR_CHARS: &[char] = &[':', '=', '<', '>'];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryOp {
    /// `:` matches values containing the text.
    Contains,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl QueryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            QueryOp::Contains => ":",
            QueryOp::Eq => "=",
            QueryOp::Lt => "<",
            QueryOp::Le => "<=",
            QueryOp::Gt => ">",
            QueryOp::Ge => ">=",
        }
    }

    pub fn constraint(self, entity: &str, field: &str, value: &str) -> Constraint {
        let (op, value) = match self {
            QueryOp::Contains => (CompareOp::Like, format!("%{}%", value)),
            QueryOp::Eq => (CompareOp::Eq, value.to_string()),
            QueryOp::Lt => (CompareOp::Lt, value.to_string()),
            QueryOp::Le => (CompareOp::Le, value.to_string()),
            QueryOp::Gt => (CompareOp::Gt, value.to_string()),
            QueryOp::Ge => (CompareOp::Ge, value.to_string()),
        };
        Constraint::compare(entity, field, op, Value::String(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryFilter {
    pub key: String,
    pub op: QueryOp,
    pub value: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn parse(dir: Option<&str>) -> Result<Self, ResourceException> {
        let Some(dir) = dir.filter(|d| !d.is_empty()) else {
            return Ok(SortDirection::Ascending);
        };
        match dir.to_lowercase().as_str() {
            "asc" | "a" | "ascending" => Ok(SortDirection::Ascending),
            "desc" | "d" | "descending" => Ok(SortDirection::Descending),
            _ => Err(ResourceException::bad_request(
                "bad_sort_dir",
                format!("\"{}\" is not a valid sort direction.", dir),
            )),
        }
    }
}

/// Parsed list parameters of a collection request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListParams {
    pub filters: Vec<QueryFilter>,
    pub sort_by: Option<String>,
    pub sort_dir: SortDirection,
}

impl ListParams {
    pub fn from_query(params: &BTreeMap<String, String>) -> Result<Self, ResourceException> {
        let filters = match params.get("q") {
            Some(q) if !q.is_empty() => parse_query(q)?,
            _ => Vec::new(),
        };
        Ok(ListParams {
            filters,
            sort_by: params.get("sort_by").filter(|s| !s.is_empty()).cloned(),
            sort_dir: SortDirection::parse(params.get("sort_dir").map(String::as_str))?,
        })
    }
}

fn malformed() -> ResourceException {
    ResourceException::bad_request("bad_query", "The query string in the GET parameter is malformed.")
}

/// Splits on characters for which `is_sep` holds, skipping backslash-escaped ones.
fn split_unescaped(s: &str, is_sep: impl Fn(char) -> bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if is_sep(c) {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Position of the first unescaped operator character.
fn find_operator(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if OPERATOR_CHARS.contains(&c) {
            return Some(i);
        }
    }
    None
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) if next == ',' || OPERATOR_CHARS.contains(&next) => out.push(next),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_term(term: &str) -> Result<QueryFilter, ResourceException> {
    let at = find_operator(term).ok_or_else(malformed)?;
    let rest = &term[at..];
    let (op, len) = if rest.starts_with("<=") {
        (QueryOp::Le, 2)
    } else if rest.starts_with(">=") {
        (QueryOp::Ge, 2)
    } else {
        match &rest[..1] {
            ":" => (QueryOp::Contains, 1),
            "=" => (QueryOp::Eq, 1),
            "<" => (QueryOp::Lt, 1),
            _ => (QueryOp::Gt, 1),
        }
    };
    let (key, value) = (&term[..at], &rest[len..]);
    if find_operator(value).is_some() {
        return Err(ResourceException::bad_request(
            "bad_query",
            "The query string in the GET parameter is malformed. Colon or equal signs must be escaped.",
        ));
    }
    Ok(QueryFilter {
        key: unescape(key),
        op,
        value: unescape(value),
    })
}

/// Parses a `q` parameter into filters. An empty string yields no filters.
pub fn parse_query(q: &str) -> Result<Vec<QueryFilter>, ResourceException> {
    if q.is_empty() {
        return Ok(Vec::new());
    }
    split_unescaped(q, |c| c == ',').into_iter().map(parse_term).collect()
}
