//! Tree-walking evaluator for config expressions.

use super::ast::{Expression, Lambda};
use super::term::{Callable, Closure, EvalError, NativeFunction, Term};
use crate::store::{compare_values, CompareOp, Constraint};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Names always available to expressions, after locals and bindings.
pub const INTRINSICS: &[&str] = &[
    "len", "all", "any", "str", "int", "float", "bool", "lower", "upper", "strip",
];

pub struct Interpreter<'a> {
    bindings: &'a BTreeMap<String, Term>,
    locals: BTreeMap<String, Term>,
}

impl<'a> Interpreter<'a> {
    pub fn new(bindings: &'a BTreeMap<String, Term>) -> Self {
        Interpreter {
            bindings,
            locals: BTreeMap::new(),
        }
    }

    pub fn with_locals(mut self, locals: BTreeMap<String, Term>) -> Self {
        self.locals = locals;
        self
    }

    fn lookup(&self, name: &str) -> Result<Term, EvalError> {
        if let Some(t) = self.locals.get(name).or_else(|| self.bindings.get(name)) {
            return Ok(t.clone());
        }
        intrinsic(name)
            .map(|f| Term::Callable(f.into()))
            .ok_or_else(|| EvalError::NameNotFound(name.to_string()))
    }

    pub fn evaluate(&self, expr: &Expression) -> Result<Term, EvalError> {
        match expr {
            Expression::Literal(v) => Ok(Term::Data(v.clone())),
            Expression::Reference(name) => self.lookup(name),
            Expression::Attribute { object, name } => {
                let object = self.evaluate(object)?;
                attribute(object, name)
            }
            Expression::Call { func, args, kwargs } => {
                let func = self.evaluate(func)?;
                let args = args.iter().map(|a| self.evaluate(a)).collect::<Result<Vec<_>, _>>()?;
                let mut named = BTreeMap::new();
                for (k, v) in kwargs {
                    named.insert(k.clone(), self.evaluate(v)?);
                }
                match func {
                    Term::Callable(c) => c.call(&args, &named),
                    Term::AttrType(t) => Ok(Term::AttrType(t.configure(&args, &named)?)),
                    other => Err(EvalError::Type(format!("{} is not callable", other.kind()))),
                }
            }
            Expression::Index { object, index } => {
                let object = self.evaluate(object)?;
                let index = self.evaluate(index)?.to_data()?;
                index_into(object, &index)
            }
            Expression::Compare { left, op, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                compare(left, *op, right)
            }
            Expression::Not(inner) => match self.evaluate(inner)? {
                Term::Constraint(c) => Ok(Term::Constraint(Constraint::Not(Box::new(c)))),
                other => Ok(Term::Data(Value::Bool(!other.truthy()))),
            },
            Expression::Negate(inner) => match self.evaluate(inner)? {
                Term::Data(Value::Number(n)) => match n.as_i64().and_then(i64::checked_neg) {
                    Some(i) => Ok(Term::Data(Value::from(i))),
                    None => Ok(Term::Data(Value::from(-n.as_f64().unwrap_or(0.0)))),
                },
                other => Err(EvalError::Type(format!("bad operand for unary -: {}", other.kind()))),
            },
            Expression::And(items) => self.combine(items, true),
            Expression::Or(items) => self.combine(items, false),
            Expression::Tuple(items) => Ok(Term::Tuple(self.evaluate_all(items)?)),
            Expression::List(items) => {
                let terms = self.evaluate_all(items)?;
                if terms.iter().all(|t| matches!(t, Term::Data(_))) {
                    Ok(Term::Data(Value::Array(
                        terms.into_iter().filter_map(|t| t.as_data().cloned()).collect(),
                    )))
                } else {
                    Ok(Term::Tuple(terms))
                }
            }
            Expression::InlineFunction(lambda) => Ok(Term::Callable(self.capture(lambda)?.into())),
        }
    }

    fn evaluate_all(&self, items: &[Expression]) -> Result<Vec<Term>, EvalError> {
        items.iter().map(|e| self.evaluate(e)).collect()
    }

    /// Resolves the lambda's free names now so the closure never sees later rebinding.
    pub fn capture(&self, lambda: &Arc<Lambda>) -> Result<Closure, EvalError> {
        let mut captured = BTreeMap::new();
        for name in Expression::InlineFunction(lambda.clone()).free_names() {
            match self.locals.get(&name).or_else(|| self.bindings.get(&name)) {
                Some(t) => {
                    captured.insert(name, t.clone());
                }
                None if INTRINSICS.contains(&name.as_str()) => {}
                None => return Err(EvalError::NameNotFound(name)),
            }
        }
        Ok(Closure::new(lambda.clone(), captured))
    }

    /// `and` / `or` with short-circuiting over data and composition over constraints.
    fn combine(&self, items: &[Expression], conjunction: bool) -> Result<Term, EvalError> {
        let mut constraints = Vec::new();
        let mut last = Term::Data(Value::Bool(conjunction));
        for item in items {
            let term = self.evaluate(item)?;
            if let Term::Constraint(c) = term {
                constraints.push(c);
                continue;
            }
            let decisive = term.truthy() != conjunction;
            if decisive {
                if constraints.is_empty() {
                    return Ok(term);
                }
                return Ok(Term::Constraint(Constraint::Const(!conjunction)));
            }
            last = term;
        }
        if constraints.is_empty() {
            return Ok(last);
        }
        if constraints.len() == 1 {
            return Ok(Term::Constraint(constraints.remove(0)));
        }
        Ok(Term::Constraint(if conjunction {
            Constraint::And(constraints)
        } else {
            Constraint::Or(constraints)
        }))
    }
}

fn attribute(object: Term, name: &str) -> Result<Term, EvalError> {
    match object {
        Term::Namespace(ns) => ns
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::Type(format!("module '{}' has no attribute '{}'", ns.path(), name))),
        Term::Entity(entity) => {
            if entity.has_field(name) {
                return Ok(Term::Field {
                    field: name.to_string(),
                    entity,
                });
            }
            entity
                .method(name)
                .map(|m| Term::Callable(m.clone().into()))
                .ok_or_else(|| EvalError::Type(format!("'{}' has no attribute '{}'", entity.name(), name)))
        }
        Term::Data(Value::Object(map)) => Ok(Term::Data(map.get(name).cloned().unwrap_or(Value::Null))),
        other => Err(EvalError::Type(format!("{} has no attribute '{}'", other.kind(), name))),
    }
}

fn index_into(object: Term, index: &Value) -> Result<Term, EvalError> {
    let out_of_range = || EvalError::Type(format!("index {} out of range", index));
    match (object, index) {
        (Term::Tuple(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize).cloned())
            .ok_or_else(out_of_range),
        (Term::Data(Value::Array(items)), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize).cloned())
            .map(Term::Data)
            .ok_or_else(out_of_range),
        (Term::Data(Value::Object(map)), Value::String(k)) => {
            Ok(Term::Data(map.get(k).cloned().unwrap_or(Value::Null)))
        }
        (other, _) => Err(EvalError::Type(format!("{} is not subscriptable", other.kind()))),
    }
}

fn compare(left: Term, op: CompareOp, right: Term) -> Result<Term, EvalError> {
    match (left, right) {
        (Term::Field { entity, field }, other) => Ok(Term::Constraint(Constraint::compare(
            entity.name(),
            field,
            op,
            other.to_data()?,
        ))),
        (other, Term::Field { entity, field }) if !matches!(op, CompareOp::In | CompareOp::NotIn) => {
            Ok(Term::Constraint(Constraint::compare(entity.name(), field, op.flip(), other.to_data()?)))
        }
        (l, r) => {
            let (l, r) = (l.to_data()?, r.to_data()?);
            if matches!(op, CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge)
                && compare_values(&l, &r).is_none()
            {
                return Err(EvalError::Type(format!(
                    "'{}' not supported between {} and {}",
                    op.symbol(),
                    l,
                    r
                )));
            }
            Ok(Term::Data(Value::Bool(op.apply(&l, &r))))
        }
    }
}

fn data_arg(args: &[Term], i: usize) -> Result<Value, EvalError> {
    args.get(i)
        .ok_or_else(|| EvalError::Type("missing argument".into()))?
        .to_data()
}

fn string_arg(args: &[Term], name: &str) -> Result<String, EvalError> {
    match data_arg(args, 0)? {
        Value::String(s) => Ok(s),
        other => Err(EvalError::Type(format!("{}() expects a string, got {}", name, other))),
    }
}

fn iter_arg(args: &[Term]) -> Result<Vec<Term>, EvalError> {
    match args.first() {
        Some(Term::Tuple(items)) => Ok(items.clone()),
        Some(Term::Data(Value::Array(items))) => Ok(items.iter().cloned().map(Term::Data).collect()),
        Some(other) => Err(EvalError::Type(format!("{} is not iterable", other.kind()))),
        None => Err(EvalError::Type("missing argument".into())),
    }
}

pub fn intrinsic(name: &str) -> Option<NativeFunction> {
    let f = match name {
        "len" => NativeFunction::new("len", 1, |args| {
            let n = match &args[0] {
                Term::Tuple(items) => items.len(),
                Term::Data(Value::Array(a)) => a.len(),
                Term::Data(Value::Object(o)) => o.len(),
                Term::Data(Value::String(s)) => s.chars().count(),
                other => return Err(EvalError::Type(format!("{} has no len()", other.kind()))),
            };
            Ok(Term::Data(Value::from(n)))
        }),
        "all" => NativeFunction::new("all", 1, |args| {
            Ok(Term::Data(Value::Bool(iter_arg(args)?.iter().all(Term::truthy))))
        }),
        "any" => NativeFunction::new("any", 1, |args| {
            Ok(Term::Data(Value::Bool(iter_arg(args)?.iter().any(Term::truthy))))
        }),
        "str" => NativeFunction::new("str", 1, |args| {
            Ok(Term::Data(Value::String(match data_arg(args, 0)? {
                Value::String(s) => s,
                other => other.to_string(),
            })))
        }),
        "int" => NativeFunction::new("int", 1, |args| {
            let v = data_arg(args, 0)?;
            let n = match &v {
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                Value::Bool(b) => Some(*b as i64),
                _ => None,
            };
            n.map(|n| Term::Data(Value::from(n)))
                .ok_or_else(|| EvalError::Type(format!("invalid literal for int(): {}", v)))
        }),
        "float" => NativeFunction::new("float", 1, |args| {
            let v = data_arg(args, 0)?;
            let n = match &v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            n.map(|n| Term::Data(Value::from(n)))
                .ok_or_else(|| EvalError::Type(format!("could not convert to float: {}", v)))
        }),
        "bool" => NativeFunction::new("bool", 1, |args| Ok(Term::Data(Value::Bool(args[0].truthy())))),
        "lower" => NativeFunction::new("lower", 1, |args| {
            Ok(Term::Data(Value::String(string_arg(args, "lower")?.to_lowercase())))
        }),
        "upper" => NativeFunction::new("upper", 1, |args| {
            Ok(Term::Data(Value::String(string_arg(args, "upper")?.to_uppercase())))
        }),
        "strip" => NativeFunction::new("strip", 1, |args| {
            Ok(Term::Data(Value::String(string_arg(args, "strip")?.trim().to_string())))
        }),
        _ => return None,
    };
    Some(f)
}

/// Calls `callable` with data arguments and returns its result as data.
pub fn call_with_data(callable: &Callable, args: &[Value]) -> Result<Value, EvalError> {
    let args: Vec<Term> = args.iter().cloned().map(Term::Data).collect();
    callable.call_positional(&args)?.to_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;
    use crate::expr::parse_expression;
    use serde_json::json;

    fn eval(src: &str, bindings: &BTreeMap<String, Term>) -> Result<Term, EvalError> {
        Interpreter::new(bindings).evaluate(&parse_expression(src).unwrap())
    }

    fn widget_bindings() -> BTreeMap<String, Term> {
        let widget = EntityType::builder("Widget").fields(["owner_id", "price"]).build();
        let mut b = BTreeMap::new();
        b.insert("Widget".to_string(), Term::Entity(Arc::new(widget)));
        b
    }

    #[test]
    fn data_comparisons_yield_booleans() {
        let b = BTreeMap::new();
        assert_eq!(eval("1 < 2 and 'a' in ['a', 'b']", &b).unwrap().to_data().unwrap(), json!(true));
        assert_eq!(eval("not (3 == 3)", &b).unwrap().to_data().unwrap(), json!(false));
    }

    #[test]
    fn field_comparison_builds_constraint() {
        let b = widget_bindings();
        match eval("5 < Widget.price", &b).unwrap() {
            Term::Constraint(c) => assert_eq!(c, Constraint::compare("Widget", "price", CompareOp::Gt, json!(5))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn constraints_compose_with_and() {
        let b = widget_bindings();
        match eval("Widget.owner_id == 1 and Widget.price > 0", &b).unwrap() {
            Term::Constraint(Constraint::And(cs)) => assert_eq!(cs.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        match eval("Widget.owner_id == 1 and False", &b).unwrap() {
            Term::Constraint(Constraint::Const(false)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn negation_widens_past_the_integer_range() {
        let f = match eval("lambda v: -v", &BTreeMap::new()).unwrap() {
            Term::Callable(c) => c,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(call_with_data(&f, &[json!(5)]).unwrap(), json!(-5));
        let widened = call_with_data(&f, &[json!(i64::MIN)]).unwrap();
        assert_eq!(widened.as_f64(), Some(-(i64::MIN as f64)));
    }

    #[test]
    fn lambda_captures_free_names_at_creation() {
        let mut b = BTreeMap::new();
        b.insert("LIMIT".to_string(), Term::Data(json!(3)));
        let f = match eval("lambda n: n < LIMIT", &b).unwrap() {
            Term::Callable(c) => c,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(call_with_data(&f, &[json!(2)]).unwrap(), json!(true));
        assert_eq!(call_with_data(&f, &[json!(5)]).unwrap(), json!(false));
        assert_eq!(f.arity(), Some(1));
    }

    #[test]
    fn lambda_with_unknown_free_name_reports_it() {
        let b = BTreeMap::new();
        assert_eq!(eval("lambda: missing", &b).unwrap_err(), EvalError::NameNotFound("missing".into()));
    }

    #[test]
    fn attribute_lookup_on_context_objects() {
        let b = BTreeMap::new();
        let f = match eval("lambda ctx: ctx.caller_id == 7", &b).unwrap() {
            Term::Callable(c) => c,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(call_with_data(&f, &[json!({"caller_id": 7})]).unwrap(), json!(true));
        assert_eq!(call_with_data(&f, &[json!({})]).unwrap(), json!(false));
    }

    #[test]
    fn intrinsics_are_available() {
        let b = BTreeMap::new();
        assert_eq!(eval("len(upper('ab'))", &b).unwrap().to_data().unwrap(), json!(2));
        assert_eq!(eval("all([True, 1])", &b).unwrap().to_data().unwrap(), json!(true));
        assert_eq!(eval("int('42') == 42", &b).unwrap().to_data().unwrap(), json!(true));
    }

    #[test]
    fn ordering_mismatched_types_is_a_type_error() {
        let b = BTreeMap::new();
        assert!(matches!(eval("'a' < 1", &b), Err(EvalError::Type(_))));
    }
}
