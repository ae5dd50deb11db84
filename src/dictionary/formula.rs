//! Calculated metric formulas: `[Bets] - [Wins]`, `([Bets] - [Wins]) / [Bets] * 100`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*(?:\[(?P<ref>[^\]]+)\]|(?P<num>\d+(?:\.\d+)?)|(?P<op>[-+*/()]))").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Parsed formula. `Metric` holds a metric name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    Metric(String),
    Number(f64),
    Binary {
        left: Box<Formula>,
        op: FormulaOp,
        right: Box<Formula>,
    },
    Group(Box<Formula>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ref(String),
    Num(f64),
    Op(char),
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < src.len() {
        if src[pos..].trim().is_empty() {
            break;
        }
        let caps = TOKEN
            .captures_at(src, pos)
            .filter(|c| c.get(0).is_some_and(|m| m.start() == pos))
            .ok_or_else(|| format!("unexpected input at offset {}: '{}'", pos, &src[pos..]))?;
        if let Some(r) = caps.name("ref") {
            tokens.push(Token::Ref(r.as_str().trim().to_string()));
        } else if let Some(n) = caps.name("num") {
            let v = n
                .as_str()
                .parse::<f64>()
                .map_err(|e| format!("bad number '{}': {}", n.as_str(), e))?;
            tokens.push(Token::Num(v));
        } else if let Some(o) = caps.name("op") {
            tokens.extend(o.as_str().chars().next().map(Token::Op));
        }
        pos = caps.get(0).map_or(src.len(), |m| m.end());
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek_op(&self) -> Option<char> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(c)) => Some(*c),
            _ => None,
        }
    }

    fn expr(&mut self) -> Result<Formula, String> {
        let mut left = self.term()?;
        while let Some(c @ ('+' | '-')) = self.peek_op() {
            self.pos += 1;
            let right = self.term()?;
            let op = if c == '+' { FormulaOp::Add } else { FormulaOp::Sub };
            left = Formula::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Formula, String> {
        let mut left = self.factor()?;
        while let Some(c @ ('*' | '/')) = self.peek_op() {
            self.pos += 1;
            let right = self.factor()?;
            let op = if c == '*' { FormulaOp::Mul } else { FormulaOp::Div };
            left = Formula::Binary {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Formula, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of formula".to_string())?;
        self.pos += 1;
        match token {
            Token::Ref(name) => Ok(Formula::Metric(name)),
            Token::Num(v) => Ok(Formula::Number(v)),
            Token::Op('(') => {
                let inner = self.expr()?;
                if self.peek_op() != Some(')') {
                    return Err("missing ')'".into());
                }
                self.pos += 1;
                Ok(Formula::Group(Box::new(inner)))
            }
            Token::Op(c) => Err(format!("unexpected '{}'", c)),
        }
    }
}

impl Formula {
    pub fn parse(src: &str) -> Result<Formula, String> {
        let tokens = tokenize(src)?;
        if tokens.is_empty() {
            return Err("empty formula".into());
        }
        let mut parser = Parser { tokens, pos: 0 };
        let formula = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(format!("trailing input in formula '{}'", src));
        }
        Ok(formula)
    }

    /// Referenced metric names, in order, without duplicates.
    pub fn references(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Formula::Metric(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Formula::Number(_) => {}
            Formula::Binary { left, right, .. } => {
                left.collect_refs(out);
                right.collect_refs(out);
            }
            Formula::Group(inner) => inner.collect_refs(out),
        }
    }

    /// Rename metric references.
    pub fn map_refs(&self, f: &impl Fn(&str) -> String) -> Formula {
        match self {
            Formula::Metric(name) => Formula::Metric(f(name)),
            Formula::Number(v) => Formula::Number(*v),
            Formula::Binary { left, op, right } => Formula::Binary {
                left: Box::new(left.map_refs(f)),
                op: *op,
                right: Box::new(right.map_refs(f)),
            },
            Formula::Group(inner) => Formula::Group(Box::new(inner.map_refs(f))),
        }
    }
}
