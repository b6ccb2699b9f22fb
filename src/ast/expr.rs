use chrono::NaiveDate;
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

use super::QueryExpr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum Expr {
    /// `c`, `t.c`, `*` or `t.*`.
    Attribute { name: String },
    Literal(Literal),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Case {
        cases: Vec<(Expr, Expr)>,
        default: Option<Box<Expr>>,
    },
    Func {
        func: FuncName,
        distinct: bool,
        args: Vec<Expr>,
        /// `agg(x) FILTER (WHERE p)`: fold only rows satisfying `p`.
        filter: Option<Box<Expr>>,
    },
    /// `IS [NOT] NULL`; over a sub-query this tests emptiness, which also
    /// covers `[NOT] EXISTS`.
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        exprs: Vec<Expr>,
        subquery: Box<QueryExpr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
    },
    /// Scalar sub-query: the first cell of its output table.
    Subquery(Box<QueryExpr>),
    Tuple(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    /// Seconds since midnight.
    Time(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum BinOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "<>")]
    Neq,
    #[strum(serialize = "AND")]
    And,
    #[strum(serialize = "OR")]
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Gt | BinOp::Gte | BinOp::Lt | BinOp::Lte | BinOp::Eq | BinOp::Neq
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

/// Closed set of supported scalar and aggregate functions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FuncName {
    Min,
    Max,
    Count,
    Sum,
    Avg,
    Abs,
    Ifnull,
    Round,
    Coalesce,
    Timestamp,
    DateAdd,
    Adddate,
    Subdate,
    DateSub,
    Datediff,
    Timestampdiff,
    StrToDate,
    Interval,
    Power,
    Cast,
    AnyValue,
    Extract,
    Concat,
    Trim,
    Ltrim,
    Rtrim,
}

impl FuncName {
    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            FuncName::Min | FuncName::Max | FuncName::Count | FuncName::Sum | FuncName::Avg
        )
    }
}

impl Expr {
    /// Whether any aggregate call appears anywhere in this expression.
    /// Projections containing one collapse to a single scalar row when no
    /// GROUP BY is present.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Func { func, args, .. } => {
                func.is_aggregate() || args.iter().any(Expr::contains_aggregate)
            }
            Expr::Attribute { .. } | Expr::Literal(_) | Expr::Subquery(_) => false,
            Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::Unary { expr, .. } => expr.contains_aggregate(),
            Expr::Case { cases, default } => {
                cases
                    .iter()
                    .any(|(c, r)| c.contains_aggregate() || r.contains_aggregate())
                    || default.as_ref().is_some_and(|d| d.contains_aggregate())
            }
            Expr::IsNull { expr, .. } => expr.contains_aggregate(),
            Expr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(Expr::contains_aggregate)
            }
            Expr::InSubquery { exprs, .. } => exprs.iter().any(Expr::contains_aggregate),
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.contains_aggregate() || low.contains_aggregate() || high.contains_aggregate()
            }
            Expr::Like { expr, .. } => expr.contains_aggregate(),
            Expr::Tuple(items) => items.iter().any(Expr::contains_aggregate),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Attribute { name } => f.write_str(name),
            Expr::Literal(lit) => write!(f, "{lit}"),
            Expr::Binary { op, left, right } => {
                if op.is_logical() || op.is_arithmetic() {
                    write!(f, "({left} {op} {right})")
                } else {
                    write!(f, "{left} {op} {right}")
                }
            }
            Expr::Unary { op, expr } => match op {
                UnOp::Neg => write!(f, "-{expr}"),
                UnOp::Not => write!(f, "NOT ({expr})"),
            },
            Expr::Case { cases, default } => {
                f.write_str("CASE")?;
                for (cond, result) in cases {
                    write!(f, " WHEN {cond} THEN {result}")?;
                }
                if let Some(d) = default {
                    write!(f, " ELSE {d}")?;
                }
                f.write_str(" END")
            }
            Expr::Func {
                func,
                distinct,
                args,
                filter,
            } => {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(
                    f,
                    "{}({}{})",
                    func.to_string().to_uppercase(),
                    if *distinct { "DISTINCT " } else { "" },
                    rendered.join(", ")
                )?;
                if let Some(p) = filter {
                    write!(f, " FILTER (WHERE {p})")?;
                }
                Ok(())
            }
            Expr::IsNull { expr, negated } => {
                if let Expr::Subquery(q) = expr.as_ref() {
                    if *negated {
                        return write!(f, "EXISTS ({q})");
                    }
                    return write!(f, "NOT EXISTS ({q})");
                }
                write!(f, "{expr} IS {}NULL", if *negated { "NOT " } else { "" })
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let rendered: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "{expr} {}IN ({})",
                    if *negated { "NOT " } else { "" },
                    rendered.join(", ")
                )
            }
            Expr::InSubquery {
                exprs,
                subquery,
                negated,
            } => {
                let lhs: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
                let lhs = if lhs.len() == 1 {
                    lhs.into_iter().next().unwrap_or_default()
                } else {
                    format!("({})", lhs.join(", "))
                };
                write!(
                    f,
                    "{lhs} {}IN ({subquery})",
                    if *negated { "NOT " } else { "" }
                )
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{expr} {}BETWEEN {low} AND {high}",
                if *negated { "NOT " } else { "" }
            ),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => write!(
                f,
                "{expr} {}LIKE '{pattern}'",
                if *negated { "NOT " } else { "" }
            ),
            Expr::Subquery(q) => write!(f, "({q})"),
            Expr::Tuple(items) => {
                let rendered: Vec<String> = items.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", rendered.join(", "))
            }
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Null => f.write_str("NULL"),
            Literal::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Float(v) => write!(f, "{v}"),
            Literal::Str(s) => write!(f, "'{s}'"),
            Literal::Date(d) => write!(f, "'{d}'"),
            Literal::Time(secs) => {
                write!(f, "'{:02}:{:02}:{:02}'", secs / 3600, secs / 60 % 60, secs % 60)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_nested_aggregates() {
        let agg = Expr::Func {
            func: FuncName::Ifnull,
            distinct: false,
            args: vec![
                Expr::Func {
                    func: FuncName::Max,
                    distinct: false,
                    args: vec![Expr::Attribute {
                        name: "x".to_string(),
                    }],
                    filter: None,
                },
                Expr::Literal(Literal::Int(0)),
            ],
            filter: None,
        };
        assert!(agg.contains_aggregate());
        assert!(!Expr::Attribute {
            name: "x".to_string()
        }
        .contains_aggregate());
    }

    #[test]
    fn display_is_sql_ish() {
        let e = Expr::Binary {
            op: BinOp::Gt,
            left: Box::new(Expr::Attribute {
                name: "age".to_string(),
            }),
            right: Box::new(Expr::Literal(Literal::Int(30))),
        };
        assert_eq!(e.to_string(), "age > 30");

        let agg = Expr::Func {
            func: FuncName::Count,
            distinct: true,
            args: vec![Expr::Attribute {
                name: "b".to_string(),
            }],
            filter: None,
        };
        assert_eq!(agg.to_string(), "COUNT(DISTINCT b)");
    }
}
