//! Boolean feature expressions used by `REQUIRES:`, `XFAIL:` and `UNSUPPORTED:`.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := not ( "&&" not )*
//! not     := "!" not | primary
//! primary := "(" or ")" | "*" | "always" | IDENT
//! ```
//!
//! Identifiers may contain ASCII letters, digits and `- + = . _ /`, which covers
//! feature names as well as target-triple fragments such as `x86_64` or `apple-darwin`.

use std::fmt;

use crate::diagnostics::ExprError;

/// A parsed feature expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureExpr {
    /// `*` or `always`: matches unconditionally.
    Always,
    Feature(String),
    Not(Box<FeatureExpr>),
    And(Box<FeatureExpr>, Box<FeatureExpr>),
    Or(Box<FeatureExpr>, Box<FeatureExpr>),
}

impl FeatureExpr {
    /// Evaluate the expression, asking `is_true` about each identifier.
    pub fn evaluate<F>(&self, is_true: &F) -> bool
    where
        F: Fn(&str) -> bool + ?Sized,
    {
        match self {
            FeatureExpr::Always => true,
            FeatureExpr::Feature(name) => is_true(name.as_str()),
            FeatureExpr::Not(inner) => !inner.evaluate(is_true),
            FeatureExpr::And(lhs, rhs) => lhs.evaluate(is_true) && rhs.evaluate(is_true),
            FeatureExpr::Or(lhs, rhs) => lhs.evaluate(is_true) || rhs.evaluate(is_true),
        }
    }
}

impl fmt::Display for FeatureExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureExpr::Always => write!(f, "*"),
            FeatureExpr::Feature(name) => write!(f, "{}", name),
            FeatureExpr::Not(inner) => match inner.as_ref() {
                FeatureExpr::And(..) | FeatureExpr::Or(..) => write!(f, "!({})", inner),
                _ => write!(f, "!{}", inner),
            },
            FeatureExpr::And(lhs, rhs) => {
                write_operand(f, lhs, matches!(lhs.as_ref(), FeatureExpr::Or(..)))?;
                write!(f, " && ")?;
                write_operand(f, rhs, matches!(rhs.as_ref(), FeatureExpr::Or(..)))
            }
            FeatureExpr::Or(lhs, rhs) => write!(f, "{} || {}", lhs, rhs),
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &FeatureExpr, parens: bool) -> fmt::Result {
    if parens { write!(f, "({})", expr) } else { write!(f, "{}", expr) }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Star,
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "{}", s),
            Tok::Star => write!(f, "*"),
            Tok::And => write!(f, "&&"),
            Tok::Or => write!(f, "||"),
            Tok::Not => write!(f, "!"),
            Tok::LParen => write!(f, "("),
            Tok::RParen => write!(f, ")"),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '=' | '.' | '_' | '/')
}

/// Tokenize an expression; columns are 1-based.
fn tokenize(source: &str) -> Result<Vec<(Tok, usize)>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let column = idx + 1;
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push((Tok::LParen, column)),
            ')' => tokens.push((Tok::RParen, column)),
            '!' => tokens.push((Tok::Not, column)),
            '*' => tokens.push((Tok::Star, column)),
            '&' | '|' => {
                if chars.peek().map(|&(_, next)| next) != Some(c) {
                    return Err(ExprError::UnexpectedChar { ch: c, column });
                }
                chars.next();
                tokens.push((if c == '&' { Tok::And } else { Tok::Or }, column));
            }
            c if is_ident_char(c) => {
                let mut ident = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if !is_ident_char(next) {
                        break;
                    }
                    ident.push(next);
                    chars.next();
                }
                tokens.push((Tok::Ident(ident), column));
            }
            other => return Err(ExprError::UnexpectedChar { ch: other, column }),
        }
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct ExprParser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn advance(&mut self) -> Option<(Tok, usize)> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn or(&mut self) -> Result<FeatureExpr, ExprError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Tok::Or) {
            self.advance();
            let rhs = self.and()?;
            lhs = FeatureExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<FeatureExpr, ExprError> {
        let mut lhs = self.not()?;
        while self.peek() == Some(&Tok::And) {
            self.advance();
            let rhs = self.not()?;
            lhs = FeatureExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<FeatureExpr, ExprError> {
        if self.peek() == Some(&Tok::Not) {
            self.advance();
            return Ok(FeatureExpr::Not(Box::new(self.not()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<FeatureExpr, ExprError> {
        match self.advance() {
            Some((Tok::LParen, column)) => {
                let inner = self.or()?;
                match self.advance() {
                    Some((Tok::RParen, _)) => Ok(inner),
                    Some((tok, column)) => Err(ExprError::UnexpectedToken {
                        token: tok.to_string(),
                        column,
                    }),
                    None => Err(ExprError::UnclosedParen { column }),
                }
            }
            Some((Tok::Star, _)) => Ok(FeatureExpr::Always),
            Some((Tok::Ident(name), _)) if name == "always" => Ok(FeatureExpr::Always),
            Some((Tok::Ident(name), _)) => Ok(FeatureExpr::Feature(name)),
            Some((tok, column)) => Err(ExprError::UnexpectedToken {
                token: tok.to_string(),
                column,
            }),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

/// Parse a single feature expression.
///
/// ## Errors
/// Returns an [`ExprError`] for empty input, stray operators, unbalanced parentheses,
/// or characters outside the identifier alphabet.
pub fn parse_expr(source: &str) -> Result<FeatureExpr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.or()?;
    if let Some((tok, column)) = parser.advance() {
        return Err(ExprError::UnexpectedToken {
            token: tok.to_string(),
            column,
        });
    }
    Ok(expr)
}
