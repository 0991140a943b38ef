//! Expression syntax tree.

use crate::store::CompareOp;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// `lambda a, b: body`
#[derive(Clone, Debug, PartialEq)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Expression,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Literal(Value),
    /// Bare identifier.
    Reference(String),
    Attribute {
        object: Box<Expression>,
        name: String,
    },
    Call {
        func: Box<Expression>,
        args: Vec<Expression>,
        kwargs: Vec<(String, Expression)>,
    },
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
    },
    Compare {
        left: Box<Expression>,
        op: CompareOp,
        right: Box<Expression>,
    },
    Not(Box<Expression>),
    Negate(Box<Expression>),
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Tuple(Vec<Expression>),
    List(Vec<Expression>),
    InlineFunction(Arc<Lambda>),
}

impl Expression {
    /// Names referenced but not bound by an enclosing lambda.
    pub fn free_names(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_free(&mut Vec::new(), &mut out);
        out
    }

    fn collect_free(&self, bound: &mut Vec<String>, out: &mut BTreeSet<String>) {
        match self {
            Expression::Literal(_) => {}
            Expression::Reference(name) => {
                if !bound.iter().any(|b| b == name) {
                    out.insert(name.clone());
                }
            }
            Expression::Attribute { object, .. } => object.collect_free(bound, out),
            Expression::Call { func, args, kwargs } => {
                func.collect_free(bound, out);
                for a in args {
                    a.collect_free(bound, out);
                }
                for (_, v) in kwargs {
                    v.collect_free(bound, out);
                }
            }
            Expression::Index { object, index } => {
                object.collect_free(bound, out);
                index.collect_free(bound, out);
            }
            Expression::Compare { left, right, .. } => {
                left.collect_free(bound, out);
                right.collect_free(bound, out);
            }
            Expression::Not(e) | Expression::Negate(e) => e.collect_free(bound, out),
            Expression::And(es) | Expression::Or(es) | Expression::Tuple(es) | Expression::List(es) => {
                for e in es {
                    e.collect_free(bound, out);
                }
            }
            Expression::InlineFunction(lambda) => {
                let depth = bound.len();
                bound.extend(lambda.params.iter().cloned());
                lambda.body.collect_free(bound, out);
                bound.truncate(depth);
            }
        }
    }

    /// Bare identifier (`Foo`), as opposed to any composite expression.
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            Expression::Reference(name) => Some(name),
            _ => None,
        }
    }
}
