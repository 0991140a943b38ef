//! Recursive-descent parser for config expressions.

use super::ast::{Expression, Lambda};
use super::lexer::{tokenize, Spanned, SyntaxError, Token};
use crate::store::CompareOp;
use serde_json::Value;
use std::sync::Arc;

const KEYWORDS: &[&str] = &["lambda", "and", "or", "not", "in"];

pub fn parse_expression(src: &str) -> Result<Expression, SyntaxError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.error(format!("unexpected {:?}", other))),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(message, self.offset())
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), SyntaxError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", token, self.peek())))
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s == kw)
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Token::Ident(s) if !KEYWORDS.contains(&s.as_str()) => {
                self.advance();
                Ok(s)
            }
            other => Err(self.error(format!("expected identifier, found {:?}", other))),
        }
    }

    fn expr(&mut self) -> Result<Expression, SyntaxError> {
        if self.is_keyword("lambda") {
            return self.lambda(true);
        }
        self.tuple()
    }

    /// `lambda a, b: body`; a top-level body may be a bare tuple.
    fn lambda(&mut self, top_level: bool) -> Result<Expression, SyntaxError> {
        self.advance();
        let mut params = Vec::new();
        if self.peek() != &Token::Colon {
            params.push(self.ident()?);
            while self.eat(&Token::Comma) {
                params.push(self.ident()?);
            }
        }
        self.expect(&Token::Colon)?;
        let body = if top_level { self.tuple()? } else { self.or()? };
        Ok(Expression::InlineFunction(Arc::new(Lambda { params, body })))
    }

    fn tuple(&mut self) -> Result<Expression, SyntaxError> {
        let first = self.or()?;
        if self.peek() != &Token::Comma {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.ends_sequence() {
                break;
            }
            items.push(self.or()?);
        }
        Ok(Expression::Tuple(items))
    }

    fn ends_sequence(&self) -> bool {
        matches!(self.peek(), Token::Eof | Token::RParen | Token::RBracket)
    }

    fn or(&mut self) -> Result<Expression, SyntaxError> {
        if self.is_keyword("lambda") {
            return self.lambda(false);
        }
        let first = self.and()?;
        if !self.is_keyword("or") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.is_keyword("or") {
            self.advance();
            items.push(self.and()?);
        }
        Ok(Expression::Or(items))
    }

    fn and(&mut self) -> Result<Expression, SyntaxError> {
        let first = self.not()?;
        if !self.is_keyword("and") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.is_keyword("and") {
            self.advance();
            items.push(self.not()?);
        }
        Ok(Expression::And(items))
    }

    fn not(&mut self) -> Result<Expression, SyntaxError> {
        if self.is_keyword("not") {
            self.advance();
            return Ok(Expression::Not(Box::new(self.not()?)));
        }
        self.compare()
    }

    fn compare(&mut self) -> Result<Expression, SyntaxError> {
        let left = self.postfix()?;
        let op = match self.peek().clone() {
            Token::EqEq => CompareOp::Eq,
            Token::NotEq => CompareOp::Ne,
            Token::Lt => CompareOp::Lt,
            Token::Le => CompareOp::Le,
            Token::Gt => CompareOp::Gt,
            Token::Ge => CompareOp::Ge,
            Token::Ident(s) if s == "in" => CompareOp::In,
            Token::Ident(s) if s == "not" && matches!(self.peek_at(1), Token::Ident(n) if n == "in") => {
                self.advance();
                CompareOp::NotIn
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.postfix()?;
        Ok(Expression::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn postfix(&mut self) -> Result<Expression, SyntaxError> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let name = self.ident()?;
                    expr = Expression::Attribute {
                        object: Box::new(expr),
                        name,
                    };
                }
                Token::LParen => {
                    self.advance();
                    let (args, kwargs) = self.args()?;
                    expr = Expression::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.or()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expression::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn args(&mut self) -> Result<(Vec<Expression>, Vec<(String, Expression)>), SyntaxError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expression)> = Vec::new();
        while self.peek() != &Token::RParen {
            let keyword = match (self.peek().clone(), self.peek_at(1)) {
                (Token::Ident(name), Token::Assign) => Some(name),
                _ => None,
            };
            if let Some(name) = keyword {
                self.advance();
                self.advance();
                kwargs.push((name, self.or()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.or()?);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> Result<Expression, SyntaxError> {
        match self.advance() {
            Token::Int(i) => Ok(Expression::Literal(Value::from(i))),
            Token::Float(f) => Ok(Expression::Literal(Value::from(f))),
            Token::Str(s) => Ok(Expression::Literal(Value::String(s))),
            Token::Minus => Ok(Expression::Negate(Box::new(self.atom()?))),
            Token::LParen => {
                if self.eat(&Token::RParen) {
                    return Ok(Expression::Tuple(Vec::new()));
                }
                let first = self.or()?;
                let inner = if self.peek() == &Token::Comma {
                    let mut items = vec![first];
                    while self.eat(&Token::Comma) {
                        if self.ends_sequence() {
                            break;
                        }
                        items.push(self.or()?);
                    }
                    Expression::Tuple(items)
                } else {
                    first
                };
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                while self.peek() != &Token::RBracket {
                    items.push(self.or()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expression::List(items))
            }
            Token::Ident(name) => match name.as_str() {
                "True" | "true" => Ok(Expression::Literal(Value::Bool(true))),
                "False" | "false" => Ok(Expression::Literal(Value::Bool(false))),
                "None" | "null" => Ok(Expression::Literal(Value::Null)),
                kw if KEYWORDS.contains(&kw) => {
                    self.pos -= 1;
                    Err(self.error(format!("unexpected keyword '{}'", kw)))
                }
                _ => Ok(Expression::Reference(name)),
            },
            Token::Eof => Err(self.error("unexpected end of expression")),
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {:?}", other)))
            }
        }
    }
}
