//! Parser for the integrity-constraint DSL.
//!
//! Constraints arrive as semicolon-separated clauses:
//!
//! ```text
//! Employee.dept_id <- Department.id;      -- foreign key
//! Employee.age <- [0, 120];               -- value domain
//! Survey.action <- {'show', 'answer'};    -- enum
//! Survey.action -> {'show'};              -- inclusion (some row holds one)
//! Employee.id != NULL;                    -- not null
//! unique(Employee.id, Employee.dept_id);
//! Employee.age > 18;
//! ```
//!
//! `inc`/`dec`/`consec` and the `V op V => V op V` implication shorthand
//! parse but are skipped with a warning by the encoder.

use chrono::NaiveDate;
use chumsky::prelude::*;
use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConstraintValue {
    Int(i64),
    Str(String),
    Date(NaiveDate),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CmpOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Neq,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    Column(ColumnRef),
    Value(ConstraintValue),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Constraint {
    /// Pairwise tuple distinctness plus not-null on the listed columns.
    /// Produced from the schema's PKeys, not from the DSL.
    Primary { columns: Vec<ColumnRef> },
    /// Pairwise tuple distinctness only.
    Unique { columns: Vec<ColumnRef> },
    ForeignKey { from: ColumnRef, to: ColumnRef },
    NotNull { column: ColumnRef },
    Domain {
        column: ColumnRef,
        low: ConstraintValue,
        high: ConstraintValue,
    },
    Enum {
        column: ColumnRef,
        values: Vec<ConstraintValue>,
    },
    /// At least one non-deleted row holds one of the values.
    Inclusion {
        column: ColumnRef,
        values: Vec<ConstraintValue>,
    },
    InclusionRange {
        column: ColumnRef,
        low: ConstraintValue,
        high: ConstraintValue,
    },
    Comparison {
        op: CmpOp,
        lhs: Operand,
        rhs: Operand,
    },
    Increasing { columns: Vec<ColumnRef> },
    Decreasing { columns: Vec<ColumnRef> },
    Consecutive { columns: Vec<ColumnRef> },
    Implication {
        premise: (Operand, CmpOp, Operand),
        conclusion: (Operand, CmpOp, Operand),
    },
}

fn ident_part() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .map(Some)
        .chain::<char, Vec<_>, _>(
            filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_').repeated(),
        )
        .collect()
}

fn digits() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .at_least(1)
        .collect()
}

fn column_ref() -> impl Parser<char, ColumnRef, Error = Simple<char>> + Clone {
    ident_part()
        .then_ignore(just('.'))
        .then(ident_part())
        .map(|(table, column)| ColumnRef { table, column })
}

fn integer() -> impl Parser<char, i64, Error = Simple<char>> + Clone {
    just('-')
        .or_not()
        .then(digits())
        .try_map(|(neg, body), span| {
            let text = match neg {
                Some(_) => format!("-{body}"),
                None => body,
            };
            text.parse::<i64>()
                .map_err(|_| Simple::custom(span, "integer out of range"))
        })
}

fn date() -> impl Parser<char, NaiveDate, Error = Simple<char>> + Clone {
    digits()
        .then_ignore(just('-'))
        .then(digits())
        .then_ignore(just('-'))
        .then(digits())
        .try_map(|((y, m), d), span| {
            let parse = |s: &String| s.parse::<u32>().ok();
            match (y.parse::<i32>().ok(), parse(&m), parse(&d)) {
                (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d)
                    .ok_or_else(|| Simple::custom(span, "invalid date")),
                _ => Err(Simple::custom(span, "invalid date")),
            }
        })
}

fn quoted_string() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    just('\'')
        .ignore_then(filter(|c: &char| *c != '\'').repeated().collect::<String>())
        .then_ignore(just('\''))
}

fn null_keyword() -> impl Parser<char, (), Error = Simple<char>> + Clone {
    just("NULL").or(just("null")).to(())
}

fn value() -> impl Parser<char, ConstraintValue, Error = Simple<char>> + Clone {
    choice((
        date().map(ConstraintValue::Date),
        integer().map(ConstraintValue::Int),
        quoted_string().map(ConstraintValue::Str),
        null_keyword().to(ConstraintValue::Null),
        // bare words inside value lists count as strings
        ident_part().map(ConstraintValue::Str),
    ))
}

fn operand() -> impl Parser<char, Operand, Error = Simple<char>> + Clone {
    column_ref()
        .map(Operand::Column)
        .or(value().map(Operand::Value))
}

fn cmp_op() -> impl Parser<char, CmpOp, Error = Simple<char>> + Clone {
    choice((
        just(">=").to(CmpOp::Gte),
        just("<=").to(CmpOp::Lte),
        just("!=").to(CmpOp::Neq),
        just(">").to(CmpOp::Gt),
        just("<").to(CmpOp::Lt),
        just("=").to(CmpOp::Eq),
    ))
}

fn value_range() -> impl Parser<char, (ConstraintValue, ConstraintValue), Error = Simple<char>> + Clone {
    just('[')
        .ignore_then(value().padded())
        .then_ignore(just(','))
        .then(value().padded())
        .then_ignore(just(']'))
}

fn value_items() -> impl Parser<char, Vec<ConstraintValue>, Error = Simple<char>> + Clone {
    value()
        .padded()
        .separated_by(just(','))
        .delimited_by(just('{'), just('}'))
}

fn column_list() -> impl Parser<char, Vec<ColumnRef>, Error = Simple<char>> + Clone {
    column_ref()
        .padded()
        .separated_by(just(','))
        .delimited_by(just('('), just(')'))
}

fn named_column_list(
    keyword: &'static str,
) -> impl Parser<char, Vec<ColumnRef>, Error = Simple<char>> + Clone {
    just(keyword).padded().ignore_then(column_list())
}

enum MembershipRhs {
    Column(ColumnRef),
    Range(ConstraintValue, ConstraintValue),
    Items(Vec<ConstraintValue>),
}

fn clause() -> impl Parser<char, Constraint, Error = Simple<char>> + Clone {
    let membership = column_ref()
        .padded()
        .then_ignore(just("<-"))
        .then(
            choice((
                column_ref().map(MembershipRhs::Column),
                value_range().map(|(lo, hi)| MembershipRhs::Range(lo, hi)),
                value_items().map(MembershipRhs::Items),
            ))
            .padded(),
        )
        .map(|(column, rhs)| match rhs {
            MembershipRhs::Column(to) => Constraint::ForeignKey { from: column, to },
            MembershipRhs::Range(low, high) => Constraint::Domain { column, low, high },
            MembershipRhs::Items(values) => Constraint::Enum { column, values },
        });

    let inclusion = column_ref()
        .padded()
        .then_ignore(just("->"))
        .then(
            choice((
                value_items().map(MembershipRhs::Items),
                value_range().map(|(lo, hi)| MembershipRhs::Range(lo, hi)),
            ))
            .padded(),
        )
        .map(|(column, rhs)| match rhs {
            MembershipRhs::Items(values) => Constraint::Inclusion { column, values },
            MembershipRhs::Range(low, high) => Constraint::InclusionRange { column, low, high },
            MembershipRhs::Column(_) => unreachable!(),
        });

    let unique = named_column_list("unique").map(|columns| Constraint::Unique { columns });
    let inc = named_column_list("inc").map(|columns| Constraint::Increasing { columns });
    let dec = named_column_list("dec").map(|columns| Constraint::Decreasing { columns });
    let consec = named_column_list("consec").map(|columns| Constraint::Consecutive { columns });

    let triple = operand()
        .padded()
        .then(cmp_op())
        .then(operand().padded())
        .map(|((lhs, op), rhs)| (lhs, op, rhs));

    let implication = triple
        .clone()
        .then_ignore(just("=>"))
        .then(triple.clone())
        .map(|(premise, conclusion)| Constraint::Implication {
            premise,
            conclusion,
        });

    let comparison = triple.map(|(lhs, op, rhs)| {
        // `A.c != NULL` is the not-null clause
        if let (Operand::Column(column), CmpOp::Neq, Operand::Value(ConstraintValue::Null)) =
            (&lhs, op, &rhs)
        {
            return Constraint::NotNull {
                column: column.clone(),
            };
        }
        Constraint::Comparison { op, lhs, rhs }
    });

    choice((
        membership,
        inclusion,
        unique,
        inc,
        dec,
        consec,
        implication,
        comparison,
    ))
}

fn constraints() -> impl Parser<char, Vec<Constraint>, Error = Simple<char>> + Clone {
    clause()
        .padded()
        .separated_by(just(';'))
        .allow_trailing()
        .padded()
        .then_ignore(end())
}

pub fn parse_constraints(source: &str) -> Result<Vec<Constraint>, Error> {
    if source.trim().is_empty() {
        return Ok(Vec::new());
    }
    constraints().parse(source).map_err(|errors| {
        let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        Error::simple(format!(
            "cannot parse constraints `{source}`: {}",
            rendered.join("; ")
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(table: &str, column: &str) -> ColumnRef {
        ColumnRef {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    #[test]
    fn parses_foreign_keys_and_not_null() {
        let parsed = parse_constraints(
            "Employees.manager_id <- Employees.employee_id; Employees.manager_id != NULL",
        )
        .unwrap();
        assert_eq!(
            parsed,
            vec![
                Constraint::ForeignKey {
                    from: col("Employees", "manager_id"),
                    to: col("Employees", "employee_id"),
                },
                Constraint::NotNull {
                    column: col("Employees", "manager_id"),
                },
            ]
        );
    }

    #[test]
    fn parses_domains_and_enums() {
        let parsed = parse_constraints(
            "Logs.num <- [0, 100]; SurveyLog.action <- {'show', 'answer', skip}",
        )
        .unwrap();
        assert_eq!(
            parsed[0],
            Constraint::Domain {
                column: col("Logs", "num"),
                low: ConstraintValue::Int(0),
                high: ConstraintValue::Int(100),
            }
        );
        assert_eq!(
            parsed[1],
            Constraint::Enum {
                column: col("SurveyLog", "action"),
                values: vec![
                    ConstraintValue::Str("show".to_string()),
                    ConstraintValue::Str("answer".to_string()),
                    ConstraintValue::Str("skip".to_string()),
                ],
            }
        );
    }

    #[test]
    fn parses_unique_and_comparisons() {
        let parsed =
            parse_constraints("unique(T.a, T.b); T.a > 18; T.a <= T.b").unwrap();
        assert_eq!(
            parsed[0],
            Constraint::Unique {
                columns: vec![col("T", "a"), col("T", "b")],
            }
        );
        assert_eq!(
            parsed[1],
            Constraint::Comparison {
                op: CmpOp::Gt,
                lhs: Operand::Column(col("T", "a")),
                rhs: Operand::Value(ConstraintValue::Int(18)),
            }
        );
        assert_eq!(
            parsed[2],
            Constraint::Comparison {
                op: CmpOp::Lte,
                lhs: Operand::Column(col("T", "a")),
                rhs: Operand::Column(col("T", "b")),
            }
        );
    }

    #[test]
    fn parses_dates_and_inclusion() {
        let parsed =
            parse_constraints("T.d <- [2020-01-01, 2020-12-31]; T.x -> {1, 2}").unwrap();
        assert_eq!(
            parsed[0],
            Constraint::Domain {
                column: col("T", "d"),
                low: ConstraintValue::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
                high: ConstraintValue::Date(NaiveDate::from_ymd_opt(2020, 12, 31).unwrap()),
            }
        );
        assert_eq!(
            parsed[1],
            Constraint::Inclusion {
                column: col("T", "x"),
                values: vec![ConstraintValue::Int(1), ConstraintValue::Int(2)],
            }
        );
    }

    #[test]
    fn parses_implications_and_misc_kinds() {
        let parsed = parse_constraints("T.a > 0 => T.b > 0; inc(T.a); consec(T.b)").unwrap();
        assert!(matches!(parsed[0], Constraint::Implication { .. }));
        assert!(matches!(parsed[1], Constraint::Increasing { .. }));
        assert!(matches!(parsed[2], Constraint::Consecutive { .. }));
    }

    #[test]
    fn empty_and_trailing_semicolons() {
        assert_eq!(parse_constraints("  ").unwrap(), Vec::new());
        let parsed = parse_constraints("T.a != NULL;").unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_constraints("T.a <-").is_err());
    }
}
