//! Query parser.
//!
//! Grammar:
//!
//! ```text
//! query := call
//! call  := '(' name arg* ')'
//! arg   := call | number | text | variable
//! text  := '\'' ... '\'' | '"' ... '"'     (backslash escapes the next char)
//! var   := '$' name
//! ```
//!
//! Names are runs of lowercase letters, digits, `-` and `.`.

use inf_types::Attribute;

use crate::atom::{variable, Atom};
use crate::error::RayError;

/// Parsed query, before functors turn it into a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Functor call
    Call {
        /// Functor name
        name: String,
        /// Arguments in order
        args: Vec<Expr>,
        /// Byte offset of the opening parenthesis
        pos: usize,
    },
    /// Literal or variable
    Atom(Atom),
}

/// Parse a whole query into one call.
pub fn parse(query: &str) -> Result<Expr, RayError> {
    let mut parser = Parser { src: query, pos: 0 };
    parser.skip_ws();
    if parser.peek() != Some('(') {
        return Err(parser.error("expected '('"));
    }
    let expr = parser.call()?;
    parser.skip_ws();
    if parser.pos < query.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.'
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, what: &str) -> RayError {
        match self.peek() {
            Some(c) => RayError::Syntax(format!("{} at {}, found {:?}", what, self.pos, c)),
            None => RayError::Syntax(format!("{} at {}, found end of query", what, self.pos)),
        }
    }

    fn name(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_name_char) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn call(&mut self) -> Result<Expr, RayError> {
        let pos = self.pos;
        self.bump();
        self.skip_ws();
        let name = self.name().to_string();
        if name.is_empty() {
            return Err(self.error("expected functor name"));
        }
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some(')') => {
                    self.bump();
                    return Ok(Expr::Call { name, args, pos });
                }
                Some(_) => args.push(self.arg()?),
                None => return Err(self.error("expected ')'")),
            }
        }
    }

    fn arg(&mut self) -> Result<Expr, RayError> {
        match self.peek() {
            Some('(') => self.call(),
            Some(q @ ('\'' | '"')) => self.text(q),
            Some('$') => self.variable(),
            Some(c) if c == '-' || c.is_ascii_digit() => self.number(),
            _ => Err(self.error("expected an argument")),
        }
    }

    fn text(&mut self, quote: char) -> Result<Expr, RayError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => break,
                },
                Some(c) if c == quote => return Ok(Expr::Atom(Atom::Text(out))),
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(RayError::Syntax(format!("unterminated text starting at {}", start)))
    }

    fn variable(&mut self) -> Result<Expr, RayError> {
        let start = self.pos;
        self.bump();
        let name = self.name();
        if name.is_empty() {
            return Err(self.error("expected variable name"));
        }
        let attr = match variable(name) {
            Some(attr) => attr,
            None => Attribute::new(name)
                .map_err(|e| RayError::Syntax(format!("{} at {}", e, start)))?,
        };
        Ok(Expr::Atom(Atom::Variable(attr)))
    }

    fn number(&mut self) -> Result<Expr, RayError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let digits = &self.src[start..self.pos];
        digits
            .parse::<i64>()
            .map(|n| Expr::Atom(Atom::Number(n)))
            .map_err(|_| RayError::Syntax(format!("bad number {:?} at {}", digits, start)))
    }
}
