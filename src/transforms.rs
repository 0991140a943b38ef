//! Reader (stored → API) and writer (API → stored) value transforms.

use crate::expr::{Callable, EvalError, Term};
use crate::validators::{integral, DATETIME_FORMAT, DATE_FORMAT};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type TransformFn = dyn Fn(&Value) -> Result<Value, EvalError> + Send + Sync;

#[derive(Clone)]
pub struct Transform {
    name: String,
    func: Arc<TransformFn>,
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transform({})", self.name)
    }
}

impl Transform {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        Transform {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Wraps a one-argument config function.
    pub fn from_callable(callable: Callable) -> Self {
        let name = callable.name();
        Transform::new(name, move |v| callable.call_positional(&[Term::Data(v.clone())])?.to_data())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, value: &Value) -> Result<Value, EvalError> {
        (self.func)(value)
    }
}

/// Parses the stored forms of a timestamp: RFC 3339, the API datetime form, or a bare date.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Current time in the stored timestamp form.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn format_stored(value: &Value, format: &str) -> Result<Value, EvalError> {
    match value {
        Value::String(s) if !s.is_empty() => parse_timestamp(s)
            .map(|t| Value::String(t.format(format).to_string()))
            .ok_or_else(|| EvalError::Type(format!("{:?} is not a stored timestamp", s))),
        other => Ok(other.clone()),
    }
}

pub fn date_reader(value: &Value) -> Result<Value, EvalError> {
    format_stored(value, DATE_FORMAT)
}

pub fn datetime_reader(value: &Value) -> Result<Value, EvalError> {
    format_stored(value, DATETIME_FORMAT)
}

pub fn boolean_writer(value: &Value) -> Result<Value, EvalError> {
    let text = match value {
        Value::Bool(b) => return Ok(Value::Bool(*b)),
        Value::String(s) => s.to_lowercase(),
        other => other.to_string(),
    };
    match text.as_str() {
        "t" | "true" | "1" => Ok(Value::Bool(true)),
        "f" | "false" | "0" => Ok(Value::Bool(false)),
        _ => Err(EvalError::Type(format!("{} is not a valid boolean", value))),
    }
}

pub fn date_writer(value: &Value) -> Result<Value, EvalError> {
    match value {
        Value::String(s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
            .map_err(|e| EvalError::Type(format!("{:?}: {}", s, e))),
        Value::Null => Ok(Value::Null),
        other => Err(EvalError::Type(format!("{} is not a date", other))),
    }
}

pub fn datetime_writer(value: &Value) -> Result<Value, EvalError> {
    match value {
        Value::String(s) => NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
            .map(|t| Value::String(t.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true)))
            .map_err(|e| EvalError::Type(format!("{:?}: {}", s, e))),
        Value::Null => Ok(Value::Null),
        other => Err(EvalError::Type(format!("{} is not a datetime", other))),
    }
}

pub fn integer_writer(value: &Value) -> Result<Value, EvalError> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        Value::Number(n) => n
            .as_f64()
            .and_then(integral)
            .map(Value::from)
            .ok_or_else(|| EvalError::Type(format!("invalid literal for int(): {}", n))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| EvalError::Type(format!("invalid literal for int(): {:?}", s))),
        Value::Null => Ok(Value::Null),
        other => Err(EvalError::Type(format!("invalid literal for int(): {}", other))),
    }
}

pub fn float_writer(value: &Value) -> Result<Value, EvalError> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => return Ok(Value::Null),
        _ => None,
    };
    n.map(Value::from)
        .ok_or_else(|| EvalError::Type(format!("could not convert to float: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn datetime_round_trips_through_storage_form() {
        let stored = datetime_writer(&json!("2024-05-01T12:30:00Z")).unwrap();
        assert_eq!(stored, json!("2024-05-01T12:30:00Z"));
        assert_eq!(date_reader(&stored).unwrap(), json!("2024-05-01"));
        assert_eq!(datetime_reader(&json!("2024-05-01T14:30:00+02:00")).unwrap(), json!("2024-05-01T12:30:00Z"));
    }

    #[test]
    fn readers_pass_empty_values_through() {
        assert_eq!(date_reader(&Value::Null).unwrap(), Value::Null);
        assert_eq!(datetime_reader(&json!("")).unwrap(), json!(""));
    }

    #[test]
    fn boolean_writer_tokens() {
        assert_eq!(boolean_writer(&json!("T")).unwrap(), json!(true));
        assert_eq!(boolean_writer(&json!(0)).unwrap(), json!(false));
        assert!(boolean_writer(&json!("maybe")).is_err());
    }

    #[test]
    fn numeric_writers_coerce_strings() {
        assert_eq!(integer_writer(&json!("12")).unwrap(), json!(12));
        assert_eq!(float_writer(&json!("3.5")).unwrap(), json!(3.5));
        assert!(integer_writer(&json!("1.5")).is_err());
        assert_eq!(integer_writer(&json!(5.0)).unwrap(), json!(5));
        assert!(integer_writer(&json!(1.5)).is_err());
    }
}
