//! SQL expression tree.

use crate::dictionary::{Aggregation, DateGrain};
use crate::schema::FieldRef;

use super::dialect::SqlDialect;
use super::params::ParamValue;
use super::query::SqlWriter;

/// Escape character for `LIKE` patterns built from user text.
pub const LIKE_ESCAPE: char = '!';

/// Comparison and arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Plus,
    Minus,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// A SQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `"Table"."Column"`
    Column(FieldRef),
    /// Bound parameter.
    Value(ParamValue),
    /// Numeric constant from a metric formula, rendered inline.
    Number(f64),
    Aggregate {
        func: Aggregation,
        arg: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// `NOT (expr)`
    Not(Box<Expr>),
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
    },
    DatePart {
        grain: DateGrain,
        expr: Box<Expr>,
    },
    /// `NULLIF(expr, 0)`, used for divisors.
    NullIfZero(Box<Expr>),
    /// Parenthesized.
    Nested(Box<Expr>),
}

// Constructors

pub fn col(field: &FieldRef) -> Expr {
    Expr::Column(field.clone())
}

pub fn value(v: ParamValue) -> Expr {
    Expr::Value(v)
}

pub fn aggregate(func: Aggregation, arg: Expr) -> Expr {
    Expr::Aggregate {
        func,
        arg: Box::new(arg),
    }
}

pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
    Expr::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

impl Expr {
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn between(self, low: Expr, high: Expr) -> Expr {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
        }
    }

    pub fn in_list(self, list: Vec<Expr>, negated: bool) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated,
        }
    }

    pub fn is_null(self, negated: bool) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated,
        }
    }

    pub fn like(self, pattern: Expr) -> Expr {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(pattern),
        }
    }

    pub fn date_part(self, grain: DateGrain) -> Expr {
        Expr::DatePart {
            grain,
            expr: Box::new(self),
        }
    }

    /// Direct children.
    fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column(_) | Expr::Value(_) | Expr::Number(_) => vec![],
            Expr::Aggregate { arg, .. } => vec![arg.as_ref()],
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Not(e) | Expr::NullIfZero(e) | Expr::Nested(e) => vec![e.as_ref()],
            Expr::Between { expr, low, high } => {
                vec![expr.as_ref(), low.as_ref(), high.as_ref()]
            }
            Expr::InList { expr, list, .. } => {
                let mut v: Vec<&Expr> = vec![expr.as_ref()];
                v.extend(list.iter());
                v
            }
            Expr::IsNull { expr, .. } | Expr::DatePart { expr, .. } => vec![expr.as_ref()],
            Expr::Like { expr, pattern } => vec![expr.as_ref(), pattern.as_ref()],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Column(_) | Expr::Value(_) | Expr::Number(_) => vec![],
            Expr::Aggregate { arg, .. } => vec![arg.as_mut()],
            Expr::Binary { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            Expr::Not(e) | Expr::NullIfZero(e) | Expr::Nested(e) => vec![e.as_mut()],
            Expr::Between { expr, low, high } => {
                vec![expr.as_mut(), low.as_mut(), high.as_mut()]
            }
            Expr::InList { expr, list, .. } => {
                let mut v: Vec<&mut Expr> = vec![expr.as_mut()];
                v.extend(list.iter_mut());
                v
            }
            Expr::IsNull { expr, .. } | Expr::DatePart { expr, .. } => vec![expr.as_mut()],
            Expr::Like { expr, pattern } => vec![expr.as_mut(), pattern.as_mut()],
        }
    }

    /// Every column referenced, in traversal order.
    pub fn columns(&self) -> Vec<&FieldRef> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a FieldRef>) {
        if let Expr::Column(f) = self {
            out.push(f);
        }
        for child in self.children() {
            child.collect_columns(out);
        }
    }

    /// Every aggregate function applied.
    pub fn aggregations(&self) -> Vec<Aggregation> {
        let mut out = Vec::new();
        self.collect_aggregations(&mut out);
        out
    }

    fn collect_aggregations(&self, out: &mut Vec<Aggregation>) {
        if let Expr::Aggregate { func, .. } = self {
            out.push(*func);
        }
        for child in self.children() {
            child.collect_aggregations(out);
        }
    }

    /// Rewrite column references in place. Stops at the first column `f`
    /// cannot map and returns it.
    pub fn map_columns<F>(&mut self, f: &mut F) -> Result<(), FieldRef>
    where
        F: FnMut(&FieldRef) -> Option<FieldRef>,
    {
        if let Expr::Column(field) = self {
            return match f(field) {
                Some(mapped) => {
                    *field = mapped;
                    Ok(())
                }
                None => Err(field.clone()),
            };
        }
        for child in self.children_mut() {
            child.map_columns(f)?;
        }
        Ok(())
    }

    pub(crate) fn render(&self, w: &mut SqlWriter) {
        match self {
            Expr::Column(field) => {
                let table = w.quote(&field.table);
                let column = w.quote(&field.column);
                w.push(&format!("{}.{}", table, column));
            }
            Expr::Value(v) => w.bind(v.clone()),
            Expr::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    w.push(&format!("{}", *n as i64));
                } else {
                    w.push(&format!("{}", n));
                }
            }
            Expr::Aggregate { func, arg } => {
                w.push(func.sql_function());
                w.push("(");
                if *func == Aggregation::CountDistinct {
                    w.push("DISTINCT ");
                }
                arg.render(w);
                w.push(")");
            }
            Expr::Binary { left, op, right } => {
                left.render(w);
                w.push(&format!(" {} ", op.as_str()));
                right.render(w);
            }
            Expr::Not(e) => {
                w.push("NOT (");
                e.render(w);
                w.push(")");
            }
            Expr::Between { expr, low, high } => {
                expr.render(w);
                w.push(" BETWEEN ");
                low.render(w);
                w.push(" AND ");
                high.render(w);
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                expr.render(w);
                w.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    item.render(w);
                }
                w.push(")");
            }
            Expr::IsNull { expr, negated } => {
                expr.render(w);
                w.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::Like { expr, pattern } => {
                expr.render(w);
                w.push(" LIKE ");
                pattern.render(w);
                w.push(" ESCAPE '");
                w.push(&LIKE_ESCAPE.to_string());
                w.push("'");
            }
            Expr::DatePart { grain, expr } => {
                let inner = w.capture(|w| expr.render(w));
                let rendered = w.dialect().date_part(*grain, &inner);
                w.push(&rendered);
            }
            Expr::NullIfZero(e) => {
                w.push("NULLIF(");
                e.render(w);
                w.push(", 0)");
            }
            Expr::Nested(e) => {
                w.push("(");
                e.render(w);
                w.push(")");
            }
        }
    }

    /// Whether rendering would fail (empty IN list anywhere).
    pub(crate) fn find_empty_list(&self) -> bool {
        if let Expr::InList { list, .. } = self {
            if list.is_empty() {
                return true;
            }
        }
        self.children().into_iter().any(|c| c.find_empty_list())
    }
}
