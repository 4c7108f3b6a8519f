//! Amount formulas for template lines.
//!
//! A formula is parsed once into an [`Expr`] tree and evaluated against a set
//! of named variables. Grammar:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | primary
//! primary := number | variable | '(' expr ')'
//! ```
//!
//! Variables are identifiers (`[A-Za-z_][A-Za-z0-9_.]*`) and are matched
//! case-sensitively. All arithmetic is checked `Decimal` arithmetic.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

/// Named values available to a formula (`Total`, `Tax`, ...).
pub type Variables = BTreeMap<String, Decimal>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormulaError {
    #[error("formula is empty")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unexpected {found} at position {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("unexpected end of formula")]
    UnexpectedEnd,

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply(self, lhs: Decimal, rhs: Decimal) -> Result<Decimal, FormulaError> {
        match self {
            BinaryOp::Add => lhs.checked_add(rhs).ok_or(FormulaError::Overflow),
            BinaryOp::Sub => lhs.checked_sub(rhs).ok_or(FormulaError::Overflow),
            BinaryOp::Mul => lhs.checked_mul(rhs).ok_or(FormulaError::Overflow),
            BinaryOp::Div => {
                if rhs.is_zero() {
                    return Err(FormulaError::DivisionByZero);
                }
                lhs.checked_div(rhs).ok_or(FormulaError::Overflow)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(Decimal),
    Variable(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn eval(&self, vars: &Variables) -> Result<Decimal, FormulaError> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Variable(name) => vars
                .get(name)
                .copied()
                .ok_or_else(|| FormulaError::UnknownVariable(name.clone())),
            Expr::Neg(inner) => Ok(-inner.eval(vars)?),
            Expr::Binary { op, lhs, rhs } => op.apply(lhs.eval(vars)?, rhs.eval(vars)?),
        }
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Neg(inner) => inner.collect_variables(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
        }
    }
}

/// A parsed amount formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(FormulaError::Empty);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if let Some((token, pos)) = parser.peek() {
            return Err(FormulaError::UnexpectedToken {
                found: token.describe(),
                pos,
            });
        }

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn eval(&self, vars: &Variables) -> Result<Decimal, FormulaError> {
        self.expr.eval(vars)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Variable names referenced by the formula, in first-use order.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.expr.collect_variables(&mut out);
        out
    }
}

impl FromStr for Formula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Formula::parse(s)
    }
}

impl core::fmt::Display for Formula {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and evaluate in one go.
pub fn evaluate(source: &str, vars: &Variables) -> Result<Decimal, FormulaError> {
    Formula::parse(source)?.eval(vars)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(Decimal),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Ident(name) => format!("variable '{name}'"),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, FormulaError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let start = i;
        let token = match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = Decimal::from_str(&literal)
                    .map_err(|_| FormulaError::InvalidNumber(literal.clone()))?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push((Token::Ident(chars[start..i].iter().collect()), start));
                continue;
            }
            other => return Err(FormulaError::UnexpectedChar { ch: other, pos: start }),
        };
        tokens.push((token, start));
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, p)| (t, *p))
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let item = self.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some((Token::Plus, _)) => BinaryOp::Add,
                Some((Token::Minus, _)) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some((Token::Star, _)) => BinaryOp::Mul,
                Some((Token::Slash, _)) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some((Token::Minus, _)) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some((Token::Plus, _)) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some((Token::Number(n), _)) => Ok(Expr::Number(n)),
            Some((Token::Ident(name), _)) => Ok(Expr::Variable(name)),
            Some((Token::LParen, _)) => {
                let inner = self.expr()?;
                match self.next() {
                    Some((Token::RParen, _)) => Ok(inner),
                    Some((token, pos)) => Err(FormulaError::UnexpectedToken {
                        found: token.describe(),
                        pos,
                    }),
                    None => Err(FormulaError::UnexpectedEnd),
                }
            }
            Some((token, pos)) => Err(FormulaError::UnexpectedToken {
                found: token.describe(),
                pos,
            }),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn vars(pairs: &[(&str, Decimal)]) -> Variables {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn evaluates_pos_sale_formulas() {
        let v = vars(&[("Total", dec!(110)), ("Tax", dec!(10))]);
        assert_eq!(evaluate("Total", &v).unwrap(), dec!(110));
        assert_eq!(evaluate("Total-Tax", &v).unwrap(), dec!(100));
        assert_eq!(evaluate("Tax", &v).unwrap(), dec!(10));
    }

    #[test]
    fn respects_precedence_and_parentheses() {
        let v = Variables::new();
        assert_eq!(evaluate("2 + 3 * 4", &v).unwrap(), dec!(14));
        assert_eq!(evaluate("(2 + 3) * 4", &v).unwrap(), dec!(20));
        assert_eq!(evaluate("10 - 4 - 3", &v).unwrap(), dec!(3));
        assert_eq!(evaluate("12 / 4 / 3", &v).unwrap(), dec!(1));
        assert_eq!(evaluate("-2 * -3", &v).unwrap(), dec!(6));
        assert_eq!(evaluate("-(1.5 + 0.5)", &v).unwrap(), dec!(-2));
    }

    #[test]
    fn variable_names_are_not_substring_replaced() {
        // `Total` must not be rewritten inside `SubTotal`.
        let v = vars(&[("Total", dec!(1)), ("SubTotal", dec!(90))]);
        assert_eq!(evaluate("SubTotal + Total", &v).unwrap(), dec!(91));
    }

    #[test]
    fn unknown_variable_fails_fast() {
        let err = evaluate("Total + Discount", &vars(&[("Total", dec!(5))])).unwrap_err();
        assert_eq!(err, FormulaError::UnknownVariable("Discount".to_string()));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let err = evaluate("Total / Qty", &vars(&[("Total", dec!(5)), ("Qty", dec!(0))])).unwrap_err();
        assert_eq!(err, FormulaError::DivisionByZero);
    }

    #[test]
    fn overflow_is_an_error() {
        let v = vars(&[("Big", Decimal::MAX)]);
        assert_eq!(evaluate("Big * 2", &v).unwrap_err(), FormulaError::Overflow);
    }

    #[test]
    fn syntax_errors_are_reported() {
        let v = Variables::new();
        assert_eq!(evaluate("", &v).unwrap_err(), FormulaError::Empty);
        assert_eq!(evaluate("   ", &v).unwrap_err(), FormulaError::Empty);
        assert_eq!(evaluate("1 +", &v).unwrap_err(), FormulaError::UnexpectedEnd);
        assert_eq!(evaluate("(1 + 2", &v).unwrap_err(), FormulaError::UnexpectedEnd);
        assert!(matches!(
            evaluate("1 2", &v).unwrap_err(),
            FormulaError::UnexpectedToken { pos: 2, .. }
        ));
        assert_eq!(
            evaluate("Total; drop", &v).unwrap_err(),
            FormulaError::UnexpectedChar { ch: ';', pos: 5 }
        );
        assert_eq!(
            evaluate("1.2.3", &v).unwrap_err(),
            FormulaError::InvalidNumber("1.2.3".to_string())
        );
    }

    #[test]
    fn lists_referenced_variables_once() {
        let formula = Formula::parse("Total - Tax + Total * 0.1").unwrap();
        assert_eq!(formula.variables(), vec!["Total", "Tax"]);
        assert_eq!(formula.to_string(), "Total - Tax + Total * 0.1");
    }

    proptest! {
        /// Property: integer arithmetic through the parser matches direct arithmetic.
        #[test]
        fn matches_direct_arithmetic(a in -10_000i64..10_000, b in -10_000i64..10_000, c in 1i64..1_000) {
            let v = vars(&[("A", Decimal::from(a)), ("B", Decimal::from(b)), ("C", Decimal::from(c))]);
            let got = evaluate("(A + B) * C - A / C", &v).unwrap();
            let expected = (Decimal::from(a) + Decimal::from(b)) * Decimal::from(c)
                - Decimal::from(a) / Decimal::from(c);
            prop_assert_eq!(got, expected);
        }
    }
}
