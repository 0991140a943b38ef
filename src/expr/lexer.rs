//! Tokenizer for config expressions.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} at offset {offset}")]
pub struct SyntaxError {
    pub message: String,
    pub offset: usize,
}

impl SyntaxError {
    pub(crate) fn new(message: impl Into<String>, offset: usize) -> Self {
        SyntaxError {
            message: message.into(),
            offset,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    Assign,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Minus,
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(src: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let peek = chars.get(i + 1).map(|(_, c)| *c);
        let (token, len) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            ',' => (Token::Comma, 1),
            ':' => (Token::Colon, 1),
            '.' if !peek.map(|p| p.is_ascii_digit()).unwrap_or(false) => (Token::Dot, 1),
            '-' => (Token::Minus, 1),
            '=' if peek == Some('=') => (Token::EqEq, 2),
            '=' => (Token::Assign, 1),
            '!' if peek == Some('=') => (Token::NotEq, 2),
            '<' if peek == Some('=') => (Token::Le, 2),
            '<' => (Token::Lt, 1),
            '>' if peek == Some('=') => (Token::Ge, 2),
            '>' => (Token::Gt, 1),
            '\'' | '"' => {
                let (s, consumed) = lex_string(&chars, i)?;
                (Token::Str(s), consumed)
            }
            c if c.is_ascii_digit() || c == '.' => lex_number(&chars, i)?,
            c if c.is_alphabetic() || c == '_' => {
                let mut j = i;
                while j < chars.len() && (chars[j].1.is_alphanumeric() || chars[j].1 == '_') {
                    j += 1;
                }
                let ident: String = chars[i..j].iter().map(|(_, c)| c).collect();
                (Token::Ident(ident), j - i)
            }
            other => return Err(SyntaxError::new(format!("unexpected character {:?}", other), offset)),
        };
        out.push(Spanned { token, offset });
        i += len;
    }
    out.push(Spanned {
        token: Token::Eof,
        offset: src.len(),
    });
    Ok(out)
}

fn lex_string(chars: &[(usize, char)], start: usize) -> Result<(String, usize), SyntaxError> {
    let quote = chars[start].1;
    let mut s = String::new();
    let mut j = start + 1;
    while j < chars.len() {
        match chars[j].1 {
            '\\' => {
                let escaped = chars
                    .get(j + 1)
                    .ok_or_else(|| SyntaxError::new("unterminated string", chars[start].0))?
                    .1;
                s.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                j += 2;
            }
            c if c == quote => return Ok((s, j - start + 1)),
            c => {
                s.push(c);
                j += 1;
            }
        }
    }
    Err(SyntaxError::new("unterminated string", chars[start].0))
}

fn lex_number(chars: &[(usize, char)], start: usize) -> Result<(Token, usize), SyntaxError> {
    let mut j = start;
    let mut seen_dot = false;
    while j < chars.len() {
        let c = chars[j].1;
        if c.is_ascii_digit() {
            j += 1;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            j += 1;
        } else {
            break;
        }
    }
    let text: String = chars[start..j].iter().map(|(_, c)| c).collect();
    let offset = chars[start].0;
    let token = if seen_dot {
        Token::Float(text.parse().map_err(|_| SyntaxError::new(format!("invalid number {:?}", text), offset))?)
    } else {
        Token::Int(text.parse().map_err(|_| SyntaxError::new(format!("invalid number {:?}", text), offset))?)
    };
    Ok((token, j - start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        tokenize(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn lexes_comparison_and_call() {
        assert_eq!(
            kinds("f(x, n=1.5) <= 'a'"),
            vec![
                Token::Ident("f".into()),
                Token::LParen,
                Token::Ident("x".into()),
                Token::Comma,
                Token::Ident("n".into()),
                Token::Assign,
                Token::Float(1.5),
                Token::RParen,
                Token::Le,
                Token::Str("a".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn dotted_access_is_not_a_float() {
        assert_eq!(
            kinds("ctx.caller_id"),
            vec![
                Token::Ident("ctx".into()),
                Token::Dot,
                Token::Ident("caller_id".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_offset() {
        let err = tokenize("x == 'abc").unwrap_err();
        assert_eq!(err.offset, 5);
    }

    #[test]
    fn rejects_unknown_characters() {
        assert!(tokenize("a & b").is_err());
    }
}
