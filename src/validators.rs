//! Built-in field validators.
//!
//! Every failure is a 400 [`ResourceException`] with a field-specific error id: `bad_<key>` for
//! malformed values and `duplicate_<key>` for uniqueness collisions.

use crate::error::ResourceException;
use crate::expr::{Callable, EvalError, Term};
use crate::store::{CompareOp, Constraint, Storage};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use validator::ValidateEmail;

static WORD_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w-]+$").expect("valid regex"));
static DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").expect("valid regex"));
static ZIP_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{5}$").expect("valid regex"));

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// The field being validated, and where to look for uniqueness collisions.
#[derive(Clone, Copy)]
pub struct FieldContext<'a> {
    pub key: &'a str,
    pub entity: &'a str,
    pub primary_key: &'a str,
    pub store: Option<&'a dyn Storage>,
    /// Primary key of the record being updated; never counted as a duplicate of itself.
    pub exclude: Option<&'a Value>,
}

impl<'a> FieldContext<'a> {
    pub fn new(key: &'a str, entity: &'a str) -> Self {
        FieldContext {
            key,
            entity,
            primary_key: "id",
            store: None,
            exclude: None,
        }
    }

    pub fn with_store(mut self, store: &'a dyn Storage, primary_key: &'a str) -> Self {
        self.store = Some(store);
        self.primary_key = primary_key;
        self
    }

    pub fn excluding(mut self, primary_key_value: Option<&'a Value>) -> Self {
        self.exclude = primary_key_value;
        self
    }

    fn fail(&self, message: impl Into<String>) -> ResourceException {
        ResourceException::bad_field(self.key, message)
    }
}

impl fmt::Debug for FieldContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldContext")
            .field("key", &self.key)
            .field("entity", &self.entity)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

pub trait Validate: fmt::Debug + Send + Sync {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException>;
}

/// Fails with `duplicate_<key>` when another stored record already holds `value`. Nulls never collide.
pub fn check_unique(value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
    if value.is_null() {
        return Ok(());
    }
    let Some(store) = field.store else {
        tracing::debug!(key = %field.key, "no storage in context, skipping uniqueness check");
        return Ok(());
    };
    let mut constraints = vec![Constraint::eq(field.entity, field.key, value.clone())];
    if let Some(pk) = field.exclude {
        constraints.push(Constraint::compare(field.entity, field.primary_key, CompareOp::Ne, pk.clone()));
    }
    if !store.query(field.entity, &constraints, None)?.is_empty() {
        return Err(ResourceException::bad_request(
            format!("duplicate_{}", field.key),
            format!("The {} {} is already in use.", field.key, display(value)),
        ));
    }
    Ok(())
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Default validator: accepts anything.
#[derive(Debug, Default, Clone)]
pub struct NoopValidator;

impl Validate for NoopValidator {
    fn validate(&self, _value: &Value, _field: &FieldContext<'_>) -> Result<(), ResourceException> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct NumericIdValidator {
    pub unique: bool,
}

impl Validate for NumericIdValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        let ok = match value {
            Value::Number(n) => n.as_u64().is_some(),
            Value::String(s) => !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
            _ => false,
        };
        if !ok {
            return Err(field.fail(format!("The {} field is not a valid positive integer.", field.key)));
        }
        if self.unique {
            check_unique(value, field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StringIdValidator {
    pub length: usize,
    pub unique: bool,
}

impl Default for StringIdValidator {
    fn default() -> Self {
        StringIdValidator {
            length: 6,
            unique: false,
        }
    }
}

impl Validate for StringIdValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        let s = as_text(value);
        let s = s.trim();
        if s.chars().count() != self.length {
            return Err(field.fail(format!(
                "The {} field must be {} characters long.",
                field.key, self.length
            )));
        }
        if !WORD_CHARS.is_match(s) {
            return Err(field.fail(format!(
                "The {} field may only contain alphanumeric characters.",
                field.key
            )));
        }
        if self.unique {
            check_unique(value, field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct BooleanValidator {
    pub nullable: bool,
}

impl Validate for BooleanValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        let ok = match value {
            Value::Null => self.nullable,
            Value::Bool(_) => true,
            Value::Number(n) => matches!(n.as_i64(), Some(0 | 1)),
            Value::String(s) => matches!(s.to_lowercase().as_str(), "true" | "t" | "1" | "false" | "f" | "0"),
            _ => false,
        };
        if !ok {
            return Err(field.fail(format!(
                "The {} field is invalid ({} is not a valid boolean value).",
                field.key,
                display(value)
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IntegerValidator {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub allow_negative: bool,
    pub nullable: bool,
    pub unique: bool,
}

impl Default for IntegerValidator {
    fn default() -> Self {
        IntegerValidator {
            min: None,
            max: None,
            allow_negative: true,
            nullable: false,
            unique: false,
        }
    }
}

fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `5.0` is the integer 5; `5.5` is not an integer.
pub(crate) fn integral(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

impl Validate for IntegerValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        if value.is_null() && self.nullable {
            return Ok(());
        }
        let n = parse_integer(value)
            .ok_or_else(|| field.fail(format!("The {} field must be an integer.", field.key)))?;
        if let Some(min) = self.min {
            if n < min {
                return Err(field.fail(format!("The {} field must be at least {}.", field.key, min)));
            }
        }
        if let Some(max) = self.max {
            if n > max {
                return Err(field.fail(format!("The {} field cannot exceed {}.", field.key, max)));
            }
        }
        if !self.allow_negative && n < 0 {
            return Err(field.fail(format!("The {} field cannot be less than zero.", field.key)));
        }
        if self.unique {
            check_unique(value, field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct FloatValidator {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub nullable: bool,
    pub unique: bool,
}

impl Validate for FloatValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        if value.is_null() && self.nullable {
            return Ok(());
        }
        let n = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
        .ok_or_else(|| field.fail(format!("The {} field must be a decimal number.", field.key)))?;
        if let Some(min) = self.min {
            if n < min {
                return Err(field.fail(format!("The {} field must be at least {}.", field.key, min)));
            }
        }
        if let Some(max) = self.max {
            if n > max {
                return Err(field.fail(format!("The {} field cannot exceed {}.", field.key, max)));
            }
        }
        if self.unique {
            check_unique(value, field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StringValidator {
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub allow_digits: bool,
    pub allow_special_chars: bool,
    pub valid_values: Option<Vec<String>>,
    pub nullable: bool,
    pub unique: bool,
}

impl Default for StringValidator {
    fn default() -> Self {
        StringValidator {
            min_len: None,
            max_len: None,
            allow_digits: true,
            allow_special_chars: true,
            valid_values: None,
            nullable: false,
            unique: false,
        }
    }
}

impl Validate for StringValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        if value.is_null() && self.nullable {
            return Ok(());
        }
        if value.is_array() || value.is_object() {
            return Err(field.fail(format!("The {} field must be a string.", field.key)));
        }
        let text = as_text(value);
        let text = text.trim();
        let len = text.chars().count();
        if let Some(min) = self.min_len {
            if len < min {
                return Err(field.fail(format!(
                    "The {} field must be at least {} characters long.",
                    field.key, min
                )));
            }
        }
        if let Some(max) = self.max_len {
            if len > max {
                return Err(field.fail(format!("The {} field cannot exceed {} characters.", field.key, max)));
            }
        }
        if !self.allow_digits && DIGIT.is_match(text) {
            return Err(field.fail(format!("The {} field cannot contain digits.", field.key)));
        }
        if !self.allow_special_chars && !WORD_CHARS.is_match(text) {
            return Err(field.fail(format!("The {} field cannot contain special characters.", field.key)));
        }
        if let Some(valid) = &self.valid_values {
            if !valid.iter().any(|v| v == text) {
                let accepted: Vec<String> = valid.iter().map(|v| format!("'{}'", v)).collect();
                return Err(field.fail(format!(
                    "The {} field is invalid; '{}' is not a valid value. Accepted values: {}",
                    field.key,
                    text,
                    accepted.join(", ")
                )));
            }
        }
        if self.unique {
            check_unique(value, field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct DateValidator {
    pub nullable: bool,
    pub require_future: bool,
    pub require_past: bool,
}

#[derive(Debug, Default, Clone)]
pub struct DatetimeValidator {
    pub nullable: bool,
    pub require_future: bool,
    pub require_past: bool,
}

fn check_temporal(
    value: &Value,
    field: &FieldContext<'_>,
    nullable: bool,
    parse: impl Fn(&str) -> Option<NaiveDateTime>,
    form: &str,
    (require_future, require_past): (bool, bool),
) -> Result<(), ResourceException> {
    let text = match value {
        Value::Null if nullable => return Ok(()),
        Value::String(s) if !s.is_empty() => s.as_str(),
        Value::String(_) if nullable => return Ok(()),
        Value::Null | Value::String(_) => {
            return Err(field.fail(format!("The {} field is mandatory.", field.key)));
        }
        other => {
            return Err(field.fail(format!(
                "The date {} is invalid for the {} field. Dates must be in {} form.",
                other, field.key, form
            )))
        }
    };
    let when = parse(text).ok_or_else(|| {
        field.fail(format!(
            "The date {} is invalid for the {} field. Dates must be in {} form.",
            text, field.key, form
        ))
    })?;
    let now = Utc::now().naive_utc();
    if require_future && when <= now {
        return Err(field.fail(format!("The {} field must be in the future.", field.key)));
    }
    if require_past && when >= now {
        return Err(field.fail(format!("The {} field must be in the past.", field.key)));
    }
    Ok(())
}

impl Validate for DateValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        check_temporal(
            value,
            field,
            self.nullable,
            |s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok().and_then(|d| d.and_hms_opt(0, 0, 0)),
            "YYYY-mm-dd",
            (self.require_future, self.require_past),
        )
    }
}

impl Validate for DatetimeValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        check_temporal(
            value,
            field,
            self.nullable,
            |s| NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok(),
            "YYYY-mm-ddTHH:MM:SSZ",
            (self.require_future, self.require_past),
        )
    }
}

#[derive(Debug, Default, Clone)]
pub struct EmailValidator {
    pub unique: bool,
}

impl Validate for EmailValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        let base = StringValidator {
            min_len: Some(5),
            max_len: Some(255),
            ..Default::default()
        };
        base.validate(value, field)?;
        let address = as_text(value);
        if !address.trim().validate_email() {
            return Err(field.fail("The email address is not valid."));
        }
        if self.unique {
            check_unique(value, field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ZipCodeValidator {
    pub unique: bool,
}

impl Validate for ZipCodeValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        let text = as_text(value);
        if !ZIP_CODE.is_match(&text) {
            return Err(field.fail(format!("The zip code \"{}\" is not valid.", text)));
        }
        if self.unique {
            check_unique(value, field)?;
        }
        Ok(())
    }
}

/// Validator backed by a config expression: a falsy result rejects the value.
#[derive(Debug, Clone)]
pub struct FnValidator(pub Callable);

impl Validate for FnValidator {
    fn validate(&self, value: &Value, field: &FieldContext<'_>) -> Result<(), ResourceException> {
        match self.0.call_positional(&[Term::Data(value.clone())]) {
            Ok(result) if result.truthy() => Ok(()),
            Ok(_) => Err(field.fail(format!("The {} field is invalid.", field.key))),
            Err(EvalError::Raised(e)) => Err(e),
            Err(e) => {
                tracing::warn!(key = %field.key, error = %e, "validator expression failed");
                Err(field.fail(format!("The {} field is invalid.", field.key)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityCatalog, EntityType, Record};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn field(key: &'static str) -> FieldContext<'static> {
        FieldContext::new(key, "Widget")
    }

    #[test]
    fn integer_bounds_and_type() {
        let v = IntegerValidator {
            min: Some(1),
            max: Some(10),
            ..Default::default()
        };
        let f = field("quantity");
        assert!(v.validate(&json!(5), &f).is_ok());
        assert_eq!(v.validate(&json!(11), &f).unwrap_err().error_id(), "bad_quantity");
        assert_eq!(v.validate(&json!("x"), &f).unwrap_err().error_id(), "bad_quantity");
        assert!(v.validate(&json!("7"), &f).is_ok());
        assert!(v.validate(&json!(5.0), &f).is_ok());
        assert_eq!(v.validate(&json!(5.5), &f).unwrap_err().error_id(), "bad_quantity");
    }

    #[test]
    fn integer_negative_policy() {
        let v = IntegerValidator {
            allow_negative: false,
            ..Default::default()
        };
        assert!(v.validate(&json!(-1), &field("n")).is_err());
    }

    #[test]
    fn float_minimum_of_zero_is_enforced() {
        let v = FloatValidator {
            min: Some(0.0),
            ..Default::default()
        };
        assert!(v.validate(&json!(3.5), &field("price")).is_ok());
        assert_eq!(v.validate(&json!(-0.5), &field("price")).unwrap_err().error_id(), "bad_price");
        assert!(v.validate(&Value::Null, &field("price")).is_err());
    }

    #[test]
    fn email_checks_address_shape() {
        let v = EmailValidator::default();
        assert_eq!(
            v.validate(&json!("not-an-email"), &field("email")).unwrap_err().error_id(),
            "bad_email"
        );
        assert!(v.validate(&json!("a@b.com"), &field("email")).is_ok());
    }

    #[test]
    fn string_policies() {
        let v = StringValidator {
            max_len: Some(5),
            allow_digits: false,
            valid_values: Some(vec!["red".into(), "blue".into()]),
            ..Default::default()
        };
        assert!(v.validate(&json!("red"), &field("color")).is_ok());
        assert!(v.validate(&json!("green"), &field("color")).is_err());
        assert!(v.validate(&json!("purple"), &field("color")).is_err());
        assert!(v.validate(&json!("r3d"), &field("color")).is_err());
    }

    #[test]
    fn boolean_tokens() {
        let v = BooleanValidator::default();
        for ok in [json!(true), json!("T"), json!("0"), json!(1)] {
            assert!(v.validate(&ok, &field("flag")).is_ok(), "{}", ok);
        }
        assert!(v.validate(&json!("yes"), &field("flag")).is_err());
        assert!(v.validate(&Value::Null, &field("flag")).is_err());
        assert!(BooleanValidator { nullable: true }.validate(&Value::Null, &field("flag")).is_ok());
    }

    #[test]
    fn dates_are_strict_and_mandatory() {
        let v = DateValidator::default();
        assert!(v.validate(&json!("2024-02-29"), &field("due")).is_ok());
        assert!(v.validate(&json!("2023-02-29"), &field("due")).is_err());
        let err = v.validate(&json!(""), &field("due")).unwrap_err();
        assert_eq!(err.message(), "The due field is mandatory.");
        let past = DatetimeValidator {
            require_past: true,
            ..Default::default()
        };
        assert!(past.validate(&json!("2001-01-01T00:00:00Z"), &field("at")).is_ok());
        assert!(past.validate(&json!("2999-01-01T00:00:00Z"), &field("at")).is_err());
    }

    #[test]
    fn ids_and_zip_codes() {
        assert!(NumericIdValidator::default().validate(&json!("0042"), &field("id")).is_ok());
        assert!(NumericIdValidator::default().validate(&json!("-4"), &field("id")).is_err());
        assert!(StringIdValidator::default().validate(&json!("ab-12_"), &field("code")).is_ok());
        assert!(StringIdValidator::default().validate(&json!("ab 12_"), &field("code")).is_err());
        assert!(ZipCodeValidator::default().validate(&json!("02139"), &field("zip")).is_ok());
        assert!(ZipCodeValidator::default().validate(&json!("2139"), &field("zip")).is_err());
    }

    #[test]
    fn uniqueness_consults_storage_and_excludes_self() {
        let mut catalog = EntityCatalog::new();
        catalog
            .register(Arc::new(EntityType::builder("Widget").field("name").build()))
            .unwrap();
        let store = MemoryStore::new(&catalog);
        let mut r = Record::new("Widget", Default::default());
        r.set("name", json!("Bolt"));
        let pk = store.save(r).unwrap();

        let v = StringValidator {
            unique: true,
            ..Default::default()
        };
        let f = FieldContext::new("name", "Widget").with_store(&store, "id");
        assert_eq!(v.validate(&json!("Bolt"), &f).unwrap_err().error_id(), "duplicate_name");
        assert!(v.validate(&json!("Nut"), &f).is_ok());
        assert!(v.validate(&json!("Bolt"), &f.excluding(Some(&pk))).is_ok());
    }
}
