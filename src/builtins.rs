//! The built-in library: validator constructors, attribute types and transforms available to
//! every configuration without a `dependencies` entry.

use crate::expr::{EvalError, NativeFunction, Term};
use crate::transforms::{self, Transform};
use crate::validators::{
    BooleanValidator, DateValidator, DatetimeValidator, EmailValidator, FloatValidator, IntegerValidator,
    NoopValidator, NumericIdValidator, StringIdValidator, StringValidator, Validate, ZipCodeValidator,
};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A named bundle of default validator, reader and writer for an attribute.
#[derive(Clone)]
pub struct AttrType {
    name: String,
    validator: Arc<dyn Validate>,
    reader: Option<Transform>,
    writer: Option<Transform>,
    constructor: NativeFunction,
}

impl fmt::Debug for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttrType")
            .field("name", &self.name)
            .field("validator", &self.validator)
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .finish()
    }
}

impl AttrType {
    fn new(
        name: &str,
        constructor: NativeFunction,
        reader: Option<Transform>,
        writer: Option<Transform>,
    ) -> Result<Self, EvalError> {
        let validator = build_validator(&constructor, &[], &BTreeMap::new())?;
        Ok(AttrType {
            name: name.to_string(),
            validator,
            reader,
            writer,
            constructor,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn validator(&self) -> &Arc<dyn Validate> {
        &self.validator
    }

    pub fn reader(&self) -> Option<&Transform> {
        self.reader.as_ref()
    }

    pub fn writer(&self) -> Option<&Transform> {
        self.writer.as_ref()
    }

    /// `Integer(min=1)`: same reader/writer, validator built from the arguments.
    pub fn configure(&self, args: &[Term], kwargs: &BTreeMap<String, Term>) -> Result<AttrType, EvalError> {
        Ok(AttrType {
            validator: build_validator(&self.constructor, args, kwargs)?,
            ..self.clone()
        })
    }
}

fn build_validator(
    constructor: &NativeFunction,
    args: &[Term],
    kwargs: &BTreeMap<String, Term>,
) -> Result<Arc<dyn Validate>, EvalError> {
    match constructor.call(args, kwargs)? {
        Term::Validator(v) => Ok(v),
        other => Err(EvalError::Type(format!(
            "{}() produced a {} instead of a validator",
            constructor.name(),
            other.kind()
        ))),
    }
}

/// Typed access to constructor keyword arguments; unknown keywords are rejected.
struct Options<'a> {
    function: &'a str,
    kwargs: &'a BTreeMap<String, Term>,
}

impl<'a> Options<'a> {
    fn new(function: &'a str, kwargs: &'a BTreeMap<String, Term>, allowed: &[&str]) -> Result<Self, EvalError> {
        if let Some(unknown) = kwargs.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(EvalError::Type(format!(
                "{}() got an unexpected keyword argument '{}'",
                function, unknown
            )));
        }
        Ok(Options { function, kwargs })
    }

    fn data(&self, key: &str) -> Result<Option<Value>, EvalError> {
        match self.kwargs.get(key) {
            None => Ok(None),
            Some(t) => t.to_data().map(|v| Some(v).filter(|v| !v.is_null())),
        }
    }

    fn invalid(&self, key: &str, expected: &str) -> EvalError {
        EvalError::Type(format!("{}(): '{}' must be {}", self.function, key, expected))
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, EvalError> {
        match self.data(key)? {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(b),
            Some(_) => Err(self.invalid(key, "a boolean")),
        }
    }

    fn int(&self, key: &str) -> Result<Option<i64>, EvalError> {
        match self.data(key)? {
            None => Ok(None),
            Some(v) => v.as_i64().map(Some).ok_or_else(|| self.invalid(key, "an integer")),
        }
    }

    fn float(&self, key: &str) -> Result<Option<f64>, EvalError> {
        match self.data(key)? {
            None => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| self.invalid(key, "a number")),
        }
    }

    fn length(&self, key: &str) -> Result<Option<usize>, EvalError> {
        match self.data(key)? {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| self.invalid(key, "a non-negative integer")),
        }
    }

    fn strings(&self, key: &str) -> Result<Option<Vec<String>>, EvalError> {
        match self.data(key)? {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    _ => Err(self.invalid(key, "a list of strings")),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(_) => Err(self.invalid(key, "a list of strings")),
        }
    }
}

fn no_positional(name: &str, args: &[Term]) -> Result<(), EvalError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(EvalError::Type(format!("{}() takes keyword arguments only", name)))
    }
}

fn validator_term(v: impl Validate + 'static) -> Term {
    Term::Validator(Arc::new(v))
}

fn validator_constructors() -> Vec<NativeFunction> {
    vec![
        NativeFunction::constructor("NoopValidator", |args, kwargs| {
            no_positional("NoopValidator", args)?;
            Options::new("NoopValidator", kwargs, &[])?;
            Ok(validator_term(NoopValidator))
        }),
        NativeFunction::constructor("NumericIdValidator", |args, kwargs| {
            no_positional("NumericIdValidator", args)?;
            let o = Options::new("NumericIdValidator", kwargs, &["unique"])?;
            Ok(validator_term(NumericIdValidator {
                unique: o.flag("unique", false)?,
            }))
        }),
        NativeFunction::constructor("StringIdValidator", |args, kwargs| {
            let o = Options::new("StringIdValidator", kwargs, &["id_length", "unique"])?;
            let positional = match args {
                [] => None,
                [len] => Some(
                    len.as_data()
                        .and_then(Value::as_u64)
                        .ok_or_else(|| EvalError::Type("StringIdValidator(): id_length must be an integer".into()))?
                        as usize,
                ),
                _ => return Err(EvalError::Type("StringIdValidator() takes at most 1 positional argument".into())),
            };
            Ok(validator_term(StringIdValidator {
                length: positional.or(o.length("id_length")?).unwrap_or(6),
                unique: o.flag("unique", false)?,
            }))
        }),
        NativeFunction::constructor("BooleanValidator", |args, kwargs| {
            no_positional("BooleanValidator", args)?;
            let o = Options::new("BooleanValidator", kwargs, &["nullable"])?;
            Ok(validator_term(BooleanValidator {
                nullable: o.flag("nullable", false)?,
            }))
        }),
        NativeFunction::constructor("IntegerValidator", |args, kwargs| {
            no_positional("IntegerValidator", args)?;
            let o = Options::new(
                "IntegerValidator",
                kwargs,
                &["min", "max", "allow_negative", "nullable", "unique"],
            )?;
            Ok(validator_term(IntegerValidator {
                min: o.int("min")?,
                max: o.int("max")?,
                allow_negative: o.flag("allow_negative", true)?,
                nullable: o.flag("nullable", false)?,
                unique: o.flag("unique", false)?,
            }))
        }),
        NativeFunction::constructor("FloatValidator", |args, kwargs| {
            no_positional("FloatValidator", args)?;
            let o = Options::new("FloatValidator", kwargs, &["min", "max", "nullable", "unique"])?;
            Ok(validator_term(FloatValidator {
                min: o.float("min")?,
                max: o.float("max")?,
                nullable: o.flag("nullable", false)?,
                unique: o.flag("unique", false)?,
            }))
        }),
        NativeFunction::constructor("StringValidator", |args, kwargs| {
            no_positional("StringValidator", args)?;
            let o = Options::new(
                "StringValidator",
                kwargs,
                &[
                    "min_len",
                    "max_len",
                    "allow_digits",
                    "allow_special_chars",
                    "valid_values",
                    "nullable",
                    "unique",
                ],
            )?;
            Ok(validator_term(StringValidator {
                min_len: o.length("min_len")?,
                max_len: o.length("max_len")?,
                allow_digits: o.flag("allow_digits", true)?,
                allow_special_chars: o.flag("allow_special_chars", true)?,
                valid_values: o.strings("valid_values")?,
                nullable: o.flag("nullable", false)?,
                unique: o.flag("unique", false)?,
            }))
        }),
        NativeFunction::constructor("DateValidator", |args, kwargs| {
            no_positional("DateValidator", args)?;
            let o = Options::new("DateValidator", kwargs, &["nullable", "require_future", "require_past"])?;
            Ok(validator_term(DateValidator {
                nullable: o.flag("nullable", false)?,
                require_future: o.flag("require_future", false)?,
                require_past: o.flag("require_past", false)?,
            }))
        }),
        NativeFunction::constructor("DatetimeValidator", |args, kwargs| {
            no_positional("DatetimeValidator", args)?;
            let o = Options::new("DatetimeValidator", kwargs, &["nullable", "require_future", "require_past"])?;
            Ok(validator_term(DatetimeValidator {
                nullable: o.flag("nullable", false)?,
                require_future: o.flag("require_future", false)?,
                require_past: o.flag("require_past", false)?,
            }))
        }),
        NativeFunction::constructor("EmailValidator", |args, kwargs| {
            no_positional("EmailValidator", args)?;
            let o = Options::new("EmailValidator", kwargs, &["unique"])?;
            Ok(validator_term(EmailValidator {
                unique: o.flag("unique", false)?,
            }))
        }),
        NativeFunction::constructor("ZipCodeValidator", |args, kwargs| {
            no_positional("ZipCodeValidator", args)?;
            let o = Options::new("ZipCodeValidator", kwargs, &["unique"])?;
            Ok(validator_term(ZipCodeValidator {
                unique: o.flag("unique", false)?,
            }))
        }),
    ]
}

fn transform(name: &str, f: fn(&Value) -> Result<Value, EvalError>) -> Transform {
    Transform::new(name, f)
}

fn build_library() -> Result<BTreeMap<String, Term>, EvalError> {
    let mut lib = BTreeMap::new();
    let constructors: BTreeMap<String, NativeFunction> = validator_constructors()
        .into_iter()
        .map(|f| (f.name().to_string(), f))
        .collect();
    let ctor = |name: &str| {
        constructors
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::NameNotFound(name.to_string()))
    };

    let date_reader = transform("date_reader", transforms::date_reader);
    let datetime_reader = transform("datetime_reader", transforms::datetime_reader);
    let boolean_writer = transform("boolean_writer", transforms::boolean_writer);
    let date_writer = transform("date_writer", transforms::date_writer);
    let datetime_writer = transform("datetime_writer", transforms::datetime_writer);
    let integer_writer = transform("integer_writer", transforms::integer_writer);
    let float_writer = transform("float_writer", transforms::float_writer);

    let types = [
        ("NumericId", "NumericIdValidator", None, None),
        ("StringId", "StringIdValidator", None, None),
        ("Boolean", "BooleanValidator", None, Some(boolean_writer.clone())),
        ("Integer", "IntegerValidator", None, Some(integer_writer.clone())),
        ("Float", "FloatValidator", None, Some(float_writer.clone())),
        ("String", "StringValidator", None, None),
        ("Date", "DateValidator", Some(date_reader.clone()), Some(date_writer.clone())),
        (
            "Datetime",
            "DatetimeValidator",
            Some(datetime_reader.clone()),
            Some(datetime_writer.clone()),
        ),
        ("Email", "EmailValidator", None, None),
        ("ZipCode", "ZipCodeValidator", None, None),
    ];
    for (name, validator, reader, writer) in types {
        lib.insert(name.to_string(), Term::AttrType(AttrType::new(name, ctor(validator)?, reader, writer)?));
    }

    for t in [
        date_reader.clone(),
        datetime_reader.clone(),
        boolean_writer,
        date_writer,
        datetime_writer,
        integer_writer,
        float_writer,
    ] {
        lib.insert(t.name().to_string(), Term::Transform(t));
    }
    lib.insert("DateReader".into(), Term::Transform(date_reader));
    lib.insert("DatetimeReader".into(), Term::Transform(datetime_reader));

    for (name, f) in constructors {
        lib.insert(name, Term::Callable(f.into()));
    }
    Ok(lib)
}

static LIBRARY: Lazy<BTreeMap<String, Term>> = Lazy::new(|| match build_library() {
    Ok(lib) => lib,
    Err(e) => {
        tracing::error!(error = %e, "built-in library failed to initialise");
        BTreeMap::new()
    }
});

/// Looks up a built-in by name.
pub fn lookup(name: &str) -> Option<Term> {
    LIBRARY.get(name).cloned()
}

pub fn is_builtin(name: &str) -> bool {
    LIBRARY.contains_key(name)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    LIBRARY.keys().map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::FieldContext;
    use serde_json::json;

    #[test]
    fn library_has_every_type_and_transform() {
        for name in [
            "NumericId", "StringId", "Boolean", "Integer", "Float", "String", "Date", "Datetime", "Email",
            "ZipCode", "date_reader", "datetime_reader", "DateReader", "DatetimeReader", "boolean_writer",
            "date_writer", "datetime_writer", "integer_writer", "float_writer", "IntegerValidator",
        ] {
            assert!(is_builtin(name), "missing {}", name);
        }
    }

    #[test]
    fn configured_type_keeps_writer_and_replaces_validator() {
        let float = match lookup("Float") {
            Some(Term::AttrType(t)) => t,
            other => panic!("unexpected {:?}", other),
        };
        let mut kwargs = BTreeMap::new();
        kwargs.insert("min".to_string(), Term::Data(json!(0)));
        let configured = float.configure(&[], &kwargs).unwrap();
        let f = FieldContext::new("price", "Widget");
        assert!(configured.validator().validate(&json!(-1), &f).is_err());
        assert!(float.validator().validate(&json!(-1), &f).is_ok());
        assert_eq!(configured.writer().unwrap().name(), "float_writer");
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let ctor = match lookup("IntegerValidator") {
            Some(Term::Callable(c)) => c,
            other => panic!("unexpected {:?}", other),
        };
        let mut kwargs = BTreeMap::new();
        kwargs.insert("maximum".to_string(), Term::Data(json!(3)));
        assert!(matches!(ctor.call(&[], &kwargs), Err(EvalError::Type(_))));
    }

    #[test]
    fn string_id_accepts_positional_length() {
        let t = match lookup("StringId") {
            Some(Term::AttrType(t)) => t.configure(&[Term::Data(json!(4))], &BTreeMap::new()).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        let f = FieldContext::new("code", "Widget");
        assert!(t.validator().validate(&json!("ab12"), &f).is_ok());
        assert!(t.validator().validate(&json!("ab123"), &f).is_err());
    }
}
