//! Runtime values produced by evaluating config expressions.

use super::ast::Lambda;
use super::interpreter::Interpreter;
use crate::builtins::AttrType;
use crate::entity::EntityType;
use crate::error::ResourceException;
use crate::store::Constraint;
use crate::transforms::Transform;
use crate::validators::Validate;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("name '{0}' is not defined")]
    NameNotFound(String),
    #[error("{0}")]
    Type(String),
    #[error("{name}() takes {expected} positional arguments but {given} were given")]
    Arity {
        name: String,
        expected: usize,
        given: usize,
    },
    #[error(transparent)]
    Raised(#[from] ResourceException),
}

#[derive(Clone)]
pub enum Term {
    Data(Value),
    Entity(Arc<EntityType>),
    /// `Entity.field`; comparing it with data yields a [`Constraint`].
    Field {
        entity: Arc<EntityType>,
        field: String,
    },
    Constraint(Constraint),
    Callable(Callable),
    Validator(Arc<dyn Validate>),
    AttrType(AttrType),
    Transform(Transform),
    Namespace(Arc<Namespace>),
    Tuple(Vec<Term>),
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Data(v) => write!(f, "Data({})", v),
            Term::Entity(e) => write!(f, "Entity({})", e.name()),
            Term::Field { entity, field } => write!(f, "Field({}.{})", entity.name(), field),
            Term::Constraint(c) => write!(f, "Constraint({:?})", c),
            Term::Callable(c) => write!(f, "Callable({})", c.name()),
            Term::Validator(v) => write!(f, "Validator({:?})", v),
            Term::AttrType(t) => write!(f, "AttrType({})", t.name()),
            Term::Transform(t) => write!(f, "Transform({})", t.name()),
            Term::Namespace(ns) => write!(f, "Namespace({})", ns.path()),
            Term::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
        }
    }
}

impl Term {
    pub fn kind(&self) -> &'static str {
        match self {
            Term::Data(_) => "data",
            Term::Entity(_) => "entity type",
            Term::Field { .. } => "entity field",
            Term::Constraint(_) => "constraint",
            Term::Callable(_) => "function",
            Term::Validator(_) => "validator",
            Term::AttrType(_) => "attribute type",
            Term::Transform(_) => "transform",
            Term::Namespace(_) => "module",
            Term::Tuple(_) => "tuple",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Term::Data(v) => value_truthy(v),
            Term::Constraint(Constraint::Const(b)) => *b,
            Term::Tuple(items) => !items.is_empty(),
            _ => true,
        }
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Term::Data(v) => Some(v),
            _ => None,
        }
    }

    /// Plain JSON view: data as-is, tuples of data as arrays.
    pub fn to_data(&self) -> Result<Value, EvalError> {
        match self {
            Term::Data(v) => Ok(v.clone()),
            Term::Tuple(items) => items.iter().map(Term::to_data).collect::<Result<Vec<_>, _>>().map(Value::Array),
            other => Err(EvalError::Type(format!("expected data, found {}", other.kind()))),
        }
    }

    /// Stable one-line description used in schema descriptions.
    pub fn describe(&self) -> String {
        match self {
            Term::Data(v) => v.to_string(),
            Term::Callable(c) => c.name(),
            other => format!("{:?}", other),
        }
    }
}

pub fn value_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

type NativeFn = dyn Fn(&[Term], &BTreeMap<String, Term>) -> Result<Term, EvalError> + Send + Sync;

/// Function implemented in Rust and exposed to config expressions.
#[derive(Clone)]
pub struct NativeFunction {
    name: String,
    arity: Option<usize>,
    accepts_kwargs: bool,
    constructor: bool,
    func: Arc<NativeFn>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

impl NativeFunction {
    /// Fixed-arity function taking positional arguments only.
    pub fn new<F>(name: impl Into<String>, arity: usize, func: F) -> Self
    where
        F: Fn(&[Term]) -> Result<Term, EvalError> + Send + Sync + 'static,
    {
        NativeFunction {
            name: name.into(),
            arity: Some(arity),
            accepts_kwargs: false,
            constructor: false,
            func: Arc::new(move |args, _| func(args)),
        }
    }

    /// Factory whose bare name stands for its default product (`IntegerValidator` means
    /// `IntegerValidator()`).
    pub fn constructor<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Term], &BTreeMap<String, Term>) -> Result<Term, EvalError> + Send + Sync + 'static,
    {
        NativeFunction {
            constructor: true,
            ..Self::with_kwargs(name, func)
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.constructor
    }

    /// Variadic function that also takes keyword arguments.
    pub fn with_kwargs<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[Term], &BTreeMap<String, Term>) -> Result<Term, EvalError> + Send + Sync + 'static,
    {
        NativeFunction {
            name: name.into(),
            arity: None,
            accepts_kwargs: true,
            constructor: false,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub fn call(&self, args: &[Term], kwargs: &BTreeMap<String, Term>) -> Result<Term, EvalError> {
        if let Some(expected) = self.arity {
            if args.len() != expected {
                return Err(EvalError::Arity {
                    name: self.name.clone(),
                    expected,
                    given: args.len(),
                });
            }
        }
        if !self.accepts_kwargs && !kwargs.is_empty() {
            return Err(EvalError::Type(format!("{}() takes no keyword arguments", self.name)));
        }
        (self.func)(args, kwargs)
    }
}

/// An inline `lambda` with the free names of its body captured at creation.
#[derive(Clone)]
pub struct Closure {
    lambda: Arc<Lambda>,
    captured: Arc<BTreeMap<String, Term>>,
    source: String,
}

impl Closure {
    pub fn new(lambda: Arc<Lambda>, captured: BTreeMap<String, Term>) -> Self {
        let source = format!("lambda {}", lambda.params.join(", "));
        Closure {
            lambda,
            captured: Arc::new(captured),
            source,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn params(&self) -> &[String] {
        &self.lambda.params
    }

    pub fn captured(&self) -> &BTreeMap<String, Term> {
        &self.captured
    }

    fn call(&self, args: &[Term], kwargs: &BTreeMap<String, Term>) -> Result<Term, EvalError> {
        let params = &self.lambda.params;
        if args.len() > params.len() {
            return Err(EvalError::Arity {
                name: self.source.clone(),
                expected: params.len(),
                given: args.len(),
            });
        }
        let mut locals = BTreeMap::new();
        for (name, value) in params.iter().zip(args.iter()) {
            locals.insert(name.clone(), value.clone());
        }
        for (name, value) in kwargs {
            if !params.contains(name) {
                return Err(EvalError::Type(format!("unexpected keyword argument '{}'", name)));
            }
            locals.insert(name.clone(), value.clone());
        }
        if locals.len() != params.len() {
            return Err(EvalError::Arity {
                name: self.source.clone(),
                expected: params.len(),
                given: locals.len(),
            });
        }
        Interpreter::new(&self.captured).with_locals(locals).evaluate(&self.lambda.body)
    }
}

#[derive(Clone)]
pub enum Callable {
    Native(NativeFunction),
    Closure(Closure),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({})", self.name())
    }
}

impl From<NativeFunction> for Callable {
    fn from(f: NativeFunction) -> Self {
        Callable::Native(f)
    }
}

impl From<Closure> for Callable {
    fn from(c: Closure) -> Self {
        Callable::Closure(c)
    }
}

impl Callable {
    pub fn name(&self) -> String {
        match self {
            Callable::Native(f) => f.name().to_string(),
            Callable::Closure(c) => c.source.clone(),
        }
    }

    /// Number of positional parameters, `None` for variadic natives.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Callable::Native(f) => f.arity(),
            Callable::Closure(c) => Some(c.params().len()),
        }
    }

    pub fn call(&self, args: &[Term], kwargs: &BTreeMap<String, Term>) -> Result<Term, EvalError> {
        match self {
            Callable::Native(f) => f.call(args, kwargs),
            Callable::Closure(c) => c.call(args, kwargs),
        }
    }

    pub fn call_positional(&self, args: &[Term]) -> Result<Term, EvalError> {
        self.call(args, &BTreeMap::new())
    }
}

/// Symbols exported by a module path, with sub-modules as nested namespaces.
#[derive(Clone, Debug)]
pub struct Namespace {
    path: String,
    symbols: BTreeMap<String, Term>,
}

impl Namespace {
    pub fn new(path: impl Into<String>, symbols: BTreeMap<String, Term>) -> Self {
        Namespace {
            path: path.into(),
            symbols,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&Term> {
        self.symbols.get(name)
    }

    pub fn symbols(&self) -> &BTreeMap<String, Term> {
        &self.symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn native_arity_is_enforced() {
        let f = NativeFunction::new("double", 1, |args| {
            let n = args[0].as_data().and_then(Value::as_i64).unwrap_or(0);
            Ok(Term::Data(json!(n * 2)))
        });
        let c = Callable::from(f);
        assert_eq!(c.call_positional(&[Term::Data(json!(4))]).unwrap().to_data().unwrap(), json!(8));
        assert!(matches!(c.call_positional(&[]), Err(EvalError::Arity { expected: 1, given: 0, .. })));
    }

    #[test]
    fn empty_and_zero_values_are_falsy() {
        assert!(!Term::Data(json!(0)).truthy());
        assert!(!Term::Data(json!("")).truthy());
        assert!(Term::Data(json!([0])).truthy());
        assert!(!Term::Constraint(Constraint::Const(false)).truthy());
        assert!(!Term::Tuple(vec![]).truthy());
    }

    #[test]
    fn tuples_of_data_convert_to_arrays() {
        let t = Term::Tuple(vec![Term::Data(json!(1)), Term::Data(json!("a"))]);
        assert_eq!(t.to_data().unwrap(), json!([1, "a"]));
    }
}
