//! Row expression encoder.
//!
//! Translates an AST expression into a `(value, null)` pair of terms for a
//! fixed row of a table (or a fixed pair of rows when encoding a join
//! predicate). SQL's three-valued logic lives here: every construct produces
//! both the value it evaluates to and the condition under which that value
//! is NULL.

use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;

use crate::ast::{BinOp, Expr, FuncName, Literal, SelectItem, UnOp};
use crate::encode::agg::{self, AggItem};
use crate::encode::query::encode_query;
use crate::encode::Session;
use crate::error::Error;
use crate::schema::TableSchema;
use crate::smt::term::{ensure_bool, ensure_int, TableId, Term};

/// Days between 1000-01-01 and the given date.
pub(crate) fn date_to_days(date: NaiveDate) -> i64 {
    let epoch = NaiveDate::from_ymd_opt(1000, 1, 1).expect("valid epoch date");
    (date - epoch).num_days()
}

pub(crate) fn literal_term(sess: &mut Session, literal: &Literal) -> (Term, Term) {
    match literal {
        Literal::Null => (Term::Int(0), Term::Bool(true)),
        Literal::Bool(b) => (Term::Bool(*b), Term::Bool(false)),
        Literal::Int(v) => (Term::Int(*v), Term::Bool(false)),
        Literal::Float(v) => (Term::Int(*v as i64), Term::Bool(false)),
        Literal::Str(s) => (Term::Int(sess.interner.intern(s)), Term::Bool(false)),
        Literal::Date(d) => (Term::Int(date_to_days(*d)), Term::Bool(false)),
        Literal::Time(secs) => (Term::Int(*secs as i64), Term::Bool(false)),
    }
}

enum RowContext {
    Single(TableSchema),
    Pair {
        left: TableSchema,
        right: TableSchema,
    },
}

pub(crate) struct RowEncoder {
    ctx: RowContext,
    /// Current row (left row for join pairs).
    row: usize,
    right_row: usize,
    /// Row of the enclosing query a correlated reference resolves against.
    outer_row: Option<usize>,
    /// Select list for resolving projection aliases.
    projected: Option<Vec<SelectItem>>,
    /// Sub-query output tables, keyed by rendered query (and outer row for
    /// scalar sub-queries, which may be correlated).
    subqueries: HashMap<String, TableId>,
    /// Domain restrictions collected for LIKE under-approximations; the
    /// operator encoder conjoins them into its own assertion.
    side_constraints: Vec<Term>,
}

impl RowEncoder {
    pub fn single(
        sess: &Session,
        table: TableId,
        outer_row: Option<usize>,
        projected: Option<Vec<SelectItem>>,
    ) -> Self {
        RowEncoder {
            ctx: RowContext::Single(sess.db.table(table).clone()),
            row: 0,
            right_row: 0,
            outer_row,
            projected,
            subqueries: HashMap::new(),
            side_constraints: Vec::new(),
        }
    }

    pub fn pair(sess: &Session, left: TableId, right: TableId) -> Self {
        RowEncoder {
            ctx: RowContext::Pair {
                left: sess.db.table(left).clone(),
                right: sess.db.table(right).clone(),
            },
            row: 0,
            right_row: 0,
            outer_row: None,
            projected: None,
            subqueries: HashMap::new(),
            side_constraints: Vec::new(),
        }
    }

    pub fn take_side_constraints(&mut self) -> Vec<Term> {
        std::mem::take(&mut self.side_constraints)
    }

    /// Evaluates an expression for one row, as an Int-sorted value.
    pub fn value_for_row(
        &mut self,
        sess: &mut Session,
        expr: &Expr,
        row: usize,
    ) -> Result<(Term, Term)> {
        self.row = row;
        let (val, null) = self.encode(sess, expr)?;
        Ok((ensure_int(val), null))
    }

    /// Evaluates a predicate for one row, as a Bool-sorted value.
    pub fn predicate_for_row(
        &mut self,
        sess: &mut Session,
        expr: &Expr,
        row: usize,
    ) -> Result<(Term, Term)> {
        self.row = row;
        let (val, null) = self.encode(sess, expr)?;
        Ok((ensure_bool(val), null))
    }

    /// Evaluates a join predicate for a pair of input rows.
    pub fn predicate_for_pair(
        &mut self,
        sess: &mut Session,
        expr: &Expr,
        left_row: usize,
        right_row: usize,
    ) -> Result<(Term, Term)> {
        self.row = left_row;
        self.right_row = right_row;
        let (val, null) = self.encode(sess, expr)?;
        Ok((ensure_bool(val), null))
    }

    fn encode(&mut self, sess: &mut Session, expr: &Expr) -> Result<(Term, Term)> {
        match expr {
            Expr::Attribute { name } => self.encode_attribute(sess, name),
            Expr::Literal(literal) => Ok(literal_term(sess, literal)),
            Expr::Binary { op, left, right } => self.encode_binary(sess, *op, left, right),
            Expr::Unary { op, expr } => {
                let (val, null) = self.encode(sess, expr)?;
                Ok(match op {
                    UnOp::Neg => (-ensure_int(val), null),
                    UnOp::Not => (!ensure_bool(val), null),
                })
            }
            Expr::Case { cases, default } => self.encode_case(sess, cases, default.as_deref()),
            Expr::IsNull { expr, negated } => self.encode_is_null(sess, expr, *negated),
            Expr::InList {
                expr,
                list,
                negated,
            } => self.encode_in_list(sess, expr, list, *negated),
            Expr::InSubquery {
                exprs,
                subquery,
                negated,
            } => self.encode_in_subquery(sess, exprs, subquery, *negated),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => self.encode_between(sess, expr, low, high, *negated),
            Expr::Like {
                expr,
                pattern,
                negated,
            } => self.encode_like(sess, expr, pattern, *negated),
            Expr::Subquery(query) => self.encode_scalar_subquery(sess, query),
            Expr::Func {
                func,
                distinct,
                args,
                filter,
            } => self.encode_func(sess, *func, *distinct, args, filter.as_deref()),
            Expr::Tuple(_) => {
                Err(Error::unsupported("row value outside of IN").into())
            }
        }
    }

    fn encode_attribute(&mut self, sess: &mut Session, name: &str) -> Result<(Term, Term)> {
        match &self.ctx {
            RowContext::Pair { left, right } => {
                if let Ok(column) = left.resolve(name) {
                    let id = column.column_id;
                    return Ok((
                        sess.cell(left.table_id, self.row, id),
                        sess.null(left.table_id, self.row, id),
                    ));
                }
                let column = right.resolve(name)?;
                let id = column.column_id;
                Ok((
                    sess.cell(right.table_id, self.right_row, id),
                    sess.null(right.table_id, self.right_row, id),
                ))
            }
            RowContext::Single(table) => {
                match table.resolve(name) {
                    Ok(column) => {
                        let id = column.column_id;
                        Ok((
                            sess.cell(table.table_id, self.row, id),
                            sess.null(table.table_id, self.row, id),
                        ))
                    }
                    Err(not_found) => {
                        // a projection alias from the select list
                        if let Some(projected) = self.projected.clone() {
                            for target in &projected {
                                if target.alias.as_deref().is_some_and(|a| {
                                    a.eq_ignore_ascii_case(name)
                                }) {
                                    return self.encode(sess, &target.expr);
                                }
                            }
                        }
                        // a correlated reference into the enclosing query
                        let Some((qualifier, _)) = name.split_once('.') else {
                            return Err(not_found.into());
                        };
                        let outer = sess.db.find_by_name(qualifier, sess.curr_query)?;
                        let column = outer.resolve(name)?;
                        let outer_row = self.outer_row.ok_or_else(|| {
                            Error::internal("correlated reference without an outer row")
                        })?;
                        Ok((
                            sess.cell(outer.table_id, outer_row, column.column_id),
                            sess.null(outer.table_id, outer_row, column.column_id),
                        ))
                    }
                }
            }
        }
    }

    fn encode_binary(
        &mut self,
        sess: &mut Session,
        op: BinOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<(Term, Term)> {
        let (lv, ln) = self.encode(sess, left)?;
        let (rv, rn) = self.encode(sess, right)?;
        let any_null = Term::or(vec![ln.clone(), rn.clone()]);

        if op.is_comparison() {
            let lv = ensure_int(lv);
            let rv = ensure_int(rv);
            let val = match op {
                BinOp::Gt => lv.gt(rv),
                BinOp::Gte => lv.gte(rv),
                BinOp::Lt => lv.lt(rv),
                BinOp::Lte => lv.lte(rv),
                BinOp::Eq => lv.eq(rv),
                BinOp::Neq => lv.ne(rv),
                _ => return Err(Error::internal("non-comparison op").into()),
            };
            return Ok((val, any_null));
        }

        if op.is_arithmetic() {
            let lv = ensure_int(lv);
            let rv = ensure_int(rv);
            let (val, null) = match op {
                BinOp::Add => (lv + rv, any_null),
                BinOp::Sub => (lv - rv, any_null),
                BinOp::Mul => (lv * rv, any_null),
                // division by zero is NULL
                BinOp::Div => (
                    lv / rv.clone(),
                    Term::or(vec![any_null, rv.eq(Term::Int(0))]),
                ),
                _ => return Err(Error::internal("non-arithmetic op").into()),
            };
            return Ok((val, null));
        }

        // Kleene AND/OR: unknown only when no operand decides the outcome
        let lv = ensure_bool(lv);
        let rv = ensure_bool(rv);
        match op {
            BinOp::And => {
                let val = Term::and(vec![lv.clone(), rv.clone()]);
                let null = Term::and(vec![
                    any_null,
                    (!ln).implies(lv),
                    (!rn).implies(rv),
                ]);
                Ok((val, null))
            }
            BinOp::Or => {
                let val = Term::or(vec![lv.clone(), rv.clone()]);
                let null = Term::and(vec![
                    any_null,
                    (!ln).implies(!lv),
                    (!rn).implies(!rv),
                ]);
                Ok((val, null))
            }
            _ => Err(Error::internal("non-logical op").into()),
        }
    }

    fn encode_case(
        &mut self,
        sess: &mut Session,
        cases: &[(Expr, Expr)],
        default: Option<&Expr>,
    ) -> Result<(Term, Term)> {
        let Some(((cond, result), rest)) = cases.split_first() else {
            return match default {
                Some(d) => {
                    let (val, null) = self.encode(sess, d)?;
                    Ok((ensure_int(val), null))
                }
                None => Ok((Term::Int(0), Term::Bool(true))),
            };
        };
        let (cond_val, cond_null) = self.encode(sess, cond)?;
        let cond_val = ensure_bool(cond_val);
        let (result_val, result_null) = self.encode(sess, result)?;
        let result_val = ensure_int(result_val);
        let (next_val, next_null) = self.encode_case(sess, rest, default)?;

        let taken = Term::and(vec![!cond_null, cond_val]);
        Ok((
            Term::ite(taken.clone(), result_val, next_val),
            Term::ite(taken, result_null, next_null),
        ))
    }

    fn encode_is_null(
        &mut self,
        sess: &mut Session,
        expr: &Expr,
        negated: bool,
    ) -> Result<(Term, Term)> {
        // over a sub-query this is an emptiness test
        if let Expr::Subquery(query) = expr {
            let table = self.subquery_table(sess, query, true)?;
            let schema = sess.db.table(table).clone();
            let val = if negated {
                Term::or(
                    (0..schema.bound)
                        .map(|row| !Term::deleted(table, row))
                        .collect(),
                )
            } else {
                Term::and(
                    (0..schema.bound)
                        .map(|row| Term::deleted(table, row))
                        .collect(),
                )
            };
            return Ok((val, Term::Bool(false)));
        }
        let (_, null) = self.encode(sess, expr)?;
        let val = if negated { !null } else { null };
        Ok((val, Term::Bool(false)))
    }

    fn encode_in_list(
        &mut self,
        sess: &mut Session,
        expr: &Expr,
        list: &[Expr],
        negated: bool,
    ) -> Result<(Term, Term)> {
        let (lhs_val, lhs_null) = self.encode(sess, expr)?;
        let lhs_val = ensure_int(lhs_val);
        let mut matches = Vec::new();
        let mut rhs_nulls = Vec::new();
        for item in list {
            let (rhs_val, rhs_null) = self.encode(sess, item)?;
            matches.push(Term::and(vec![
                !lhs_null.clone(),
                !rhs_null.clone(),
                lhs_val.clone().eq(ensure_int(rhs_val)),
            ]));
            rhs_nulls.push(rhs_null);
        }
        let found = Term::or(matches);
        let val = if negated {
            !found.clone()
        } else {
            found.clone()
        };
        // unknown when the needle is null, or nothing matched but some
        // candidate was null
        let null = Term::or(vec![
            lhs_null.clone(),
            Term::and(vec![!lhs_null, !found, Term::or(rhs_nulls)]),
        ]);
        Ok((val, null))
    }

    fn encode_in_subquery(
        &mut self,
        sess: &mut Session,
        exprs: &[Expr],
        subquery: &crate::ast::QueryExpr,
        negated: bool,
    ) -> Result<(Term, Term)> {
        let table = self.subquery_table(sess, subquery, true)?;
        let schema = sess.db.table(table).clone();
        if schema.width() != exprs.len() {
            return Err(Error::simple(format!(
                "IN sub-query width mismatch: {} vs {}",
                exprs.len(),
                schema.width()
            ))
            .into());
        }
        let lhs = exprs
            .iter()
            .map(|e| {
                let (val, null) = self.encode(sess, e)?;
                Ok((ensure_int(val), null))
            })
            .collect::<Result<Vec<_>>>()?;

        if !negated {
            let mut rows = Vec::new();
            for row in 0..schema.bound {
                let mut conjuncts = vec![!Term::deleted(table, row)];
                for (col, (lhs_val, lhs_null)) in lhs.iter().enumerate() {
                    let rhs_val = sess.cell(table, row, col);
                    let rhs_null = sess.null(table, row, col);
                    conjuncts.push(Term::and(vec![
                        Term::and(vec![!lhs_null.clone(), !rhs_null]),
                        lhs_val.clone().eq(rhs_val),
                    ]));
                }
                rows.push(Term::and(conjuncts));
            }
            return Ok((Term::or(rows), Term::Bool(false)));
        }

        let mut rows = Vec::new();
        for row in 0..schema.bound {
            let mut disjuncts = Vec::new();
            for (col, (lhs_val, lhs_null)) in lhs.iter().enumerate() {
                let rhs_val = sess.cell(table, row, col);
                let rhs_null = sess.null(table, row, col);
                disjuncts.push(Term::and(vec![
                    !Term::or(vec![lhs_null.clone(), rhs_null]),
                    lhs_val.clone().ne(rhs_val),
                ]));
            }
            rows.push((!Term::deleted(table, row)).implies(Term::or(disjuncts)));
        }
        let empty = Term::and(
            (0..schema.bound)
                .map(|row| Term::deleted(table, row))
                .collect(),
        );
        Ok((Term::or(vec![empty, Term::and(rows)]), Term::Bool(false)))
    }

    fn encode_between(
        &mut self,
        sess: &mut Session,
        expr: &Expr,
        low: &Expr,
        high: &Expr,
        negated: bool,
    ) -> Result<(Term, Term)> {
        let (value, value_null) = self.encode(sess, expr)?;
        let value = ensure_int(value);
        let (low_val, low_null) = self.encode(sess, low)?;
        let low_val = ensure_int(low_val);
        let (high_val, high_null) = self.encode(sess, high)?;
        let high_val = ensure_int(high_val);

        let val = if negated {
            Term::or(vec![
                value.clone().lt(low_val.clone()),
                value.clone().gt(high_val.clone()),
            ])
        } else {
            Term::and(vec![
                value.clone().gte(low_val.clone()),
                value.clone().lte(high_val.clone()),
            ])
        };
        // unknown when a null bound leaves the outcome undecided
        let null = Term::or(vec![
            value_null.clone(),
            Term::and(vec![
                !value_null.clone(),
                low_null.clone(),
                !high_null.clone(),
                !value.clone().gt(high_val),
            ]),
            Term::and(vec![
                !value_null,
                !low_null.clone(),
                high_null.clone(),
                !value.lt(low_val),
            ]),
            Term::and(vec![low_null, high_null]),
        ]);
        Ok((val, null))
    }

    /// LIKE over interned strings cannot be decided in general; the match is
    /// under-approximated over a handful of witness instances and the cell is
    /// restricted to those instances via a side constraint.
    fn encode_like(
        &mut self,
        sess: &mut Session,
        expr: &Expr,
        pattern: &str,
        negated: bool,
    ) -> Result<(Term, Term)> {
        let (cell_val, cell_null) = self.encode(sess, expr)?;
        let cell_val = ensure_int(cell_val);
        let stripped = pattern.replace('%', "");
        let filled = pattern.replace('%', "1");

        let mut truth_cases = Vec::new();
        let mut considered = Vec::new();
        let mut case = |sess: &mut Session, text: String, truthy: bool| {
            let term = cell_val.clone().eq(Term::Int(sess.interner.intern(&text)));
            if truthy {
                truth_cases.push(term.clone());
            }
            considered.push(term);
        };

        if negated {
            if !pattern.starts_with('%') {
                case(sess, format!("1{stripped}"), true);
            }
            if !pattern.ends_with('%') {
                case(sess, format!("{stripped}1"), true);
            }
            case(sess, filled, false);
            if !pattern.is_empty() {
                case(sess, String::new(), true);
            }
        } else {
            if !pattern.starts_with('%') {
                case(sess, format!("1{stripped}"), false);
            }
            if !pattern.ends_with('%') {
                case(sess, format!("{stripped}1"), false);
            }
            if !pattern.contains('%') {
                case(sess, pattern.to_string(), true);
            }
            case(sess, filled, true);
        }

        self.side_constraints.push(Term::or(considered));
        Ok((Term::or(truth_cases), cell_null))
    }

    fn encode_scalar_subquery(
        &mut self,
        sess: &mut Session,
        query: &crate::ast::QueryExpr,
    ) -> Result<(Term, Term)> {
        let table = self.subquery_table(sess, query, false)?;
        Ok((sess.cell(table, 0, 0), sess.null(table, 0, 0)))
    }

    /// Encodes a sub-query once per rendered text (per outer row when
    /// correlation can reach it) and returns its output table.
    fn subquery_table(
        &mut self,
        sess: &mut Session,
        query: &crate::ast::QueryExpr,
        shared_across_rows: bool,
    ) -> Result<TableId> {
        let correlated = !shared_across_rows && matches!(self.ctx, RowContext::Single(_));
        let key = if correlated {
            format!("{query}@{}", self.row)
        } else {
            query.to_string()
        };
        if let Some(table) = self.subqueries.get(&key) {
            return Ok(*table);
        }
        let outer_row = if correlated { Some(self.row) } else { None };
        let table = encode_query(sess, query, outer_row)?;
        self.subqueries.insert(key, table);
        Ok(table)
    }

    fn encode_func(
        &mut self,
        sess: &mut Session,
        func: FuncName,
        distinct: bool,
        args: &[Expr],
        filter: Option<&Expr>,
    ) -> Result<(Term, Term)> {
        if func.is_aggregate() {
            return self.encode_aggregate(sess, func, distinct, args, filter);
        }
        match func {
            FuncName::Abs => {
                let (val, null) = self.encode(sess, arg(args, 0)?)?;
                let val = ensure_int(val);
                Ok((
                    Term::ite(val.clone().gte(Term::Int(0)), val.clone(), -val),
                    null,
                ))
            }
            FuncName::Ifnull => {
                let (if_val, if_null) = self.encode(sess, arg(args, 0)?)?;
                let (default_val, default_null) = self.encode(sess, arg(args, 1)?)?;
                Ok((
                    Term::ite(!if_null.clone(), ensure_int(if_val), ensure_int(default_val)),
                    Term::and(vec![if_null, default_null]),
                ))
            }
            FuncName::Coalesce => self.encode_coalesce(sess, args),
            FuncName::Timestamp => {
                let (date_val, date_null) = self.encode(sess, arg(args, 0)?)?;
                let (time_val, time_null) = self.encode(sess, arg(args, 1)?)?;
                Ok((
                    ensure_int(time_val) * Term::Int(100_000) + ensure_int(date_val),
                    Term::or(vec![date_null, time_null]),
                ))
            }
            FuncName::DateAdd | FuncName::Adddate => {
                let (date_val, date_null) = self.encode(sess, arg(args, 0)?)?;
                let (days, _) = self.encode(sess, arg(args, 1)?)?;
                Ok((ensure_int(date_val) + ensure_int(days), date_null))
            }
            FuncName::DateSub | FuncName::Subdate => {
                let (date_val, date_null) = self.encode(sess, arg(args, 0)?)?;
                let (days, _) = self.encode(sess, arg(args, 1)?)?;
                Ok((ensure_int(date_val) - ensure_int(days), date_null))
            }
            FuncName::Datediff => {
                let (a_val, a_null) = self.encode(sess, arg(args, 0)?)?;
                let (b_val, b_null) = self.encode(sess, arg(args, 1)?)?;
                Ok((
                    ensure_int(a_val) - ensure_int(b_val),
                    Term::or(vec![a_null, b_null]),
                ))
            }
            FuncName::Timestampdiff => {
                let unit = arg(args, 0)?;
                let is_day = matches!(
                    unit,
                    Expr::Attribute { name } if name.eq_ignore_ascii_case("day")
                );
                if !is_day {
                    return Err(Error::unsupported(format!("TIMESTAMPDIFF unit `{unit}`")).into());
                }
                let (a_val, a_null) = self.encode(sess, arg(args, 1)?)?;
                let (b_val, b_null) = self.encode(sess, arg(args, 2)?)?;
                Ok((
                    ensure_int(b_val) - ensure_int(a_val),
                    Term::or(vec![a_null, b_null]),
                ))
            }
            FuncName::Power => match (arg(args, 0)?, arg(args, 1)?) {
                (
                    Expr::Literal(Literal::Int(base)),
                    Expr::Literal(Literal::Int(exp)),
                ) if *exp >= 0 => {
                    let value = base
                        .checked_pow(*exp as u32)
                        .ok_or_else(|| Error::simple("POWER overflows"))?;
                    Ok((Term::Int(value), Term::Bool(false)))
                }
                _ => Err(Error::unsupported("non-literal POWER").into()),
            },
            // identities on the integer model
            FuncName::Round
            | FuncName::StrToDate
            | FuncName::Cast
            | FuncName::AnyValue
            | FuncName::Extract
            | FuncName::Concat
            | FuncName::Trim
            | FuncName::Ltrim
            | FuncName::Rtrim => self.encode(sess, arg(args, 0)?),
            FuncName::Interval => Err(Error::unsupported("INTERVAL as a function").into()),
            FuncName::Min | FuncName::Max | FuncName::Count | FuncName::Sum | FuncName::Avg => {
                unreachable!("aggregates are handled above")
            }
        }
    }

    fn encode_coalesce(&mut self, sess: &mut Session, args: &[Expr]) -> Result<(Term, Term)> {
        let Some((first, rest)) = args.split_first() else {
            return Ok((Term::Int(0), Term::Bool(true)));
        };
        let (val, null) = self.encode(sess, first)?;
        let val = ensure_int(val);
        if rest.is_empty() {
            return Ok((val, null));
        }
        let (next_val, next_null) = self.encode_coalesce(sess, rest)?;
        Ok((
            Term::ite(!null.clone(), val, next_val),
            Term::and(vec![null, next_null]),
        ))
    }

    /// Aggregates in row context fold over every row of the encoder's table:
    /// this is the scalar-aggregate case (`SELECT SUM(x) FROM t`) and
    /// aggregate predicates of a standalone HAVING.
    fn encode_aggregate(
        &mut self,
        sess: &mut Session,
        func: FuncName,
        distinct: bool,
        args: &[Expr],
        filter: Option<&Expr>,
    ) -> Result<(Term, Term)> {
        let RowContext::Single(table) = &self.ctx else {
            return Err(Error::unsupported("aggregate inside a join predicate").into());
        };
        let table = table.clone();
        let argument = arg(args, 0)?;
        let star = matches!(argument, Expr::Attribute { name } if name == "*");

        let mut inner = RowEncoder::single(sess, table.table_id, None, None);
        let mut items = Vec::with_capacity(table.bound);
        for row in 0..table.bound {
            let (val, null) = if star {
                (Term::Int(1), Term::Bool(false))
            } else {
                inner.value_for_row(sess, argument, row)?
            };
            let mut present = !Term::deleted(table.table_id, row);
            if let Some(predicate) = filter {
                let (pred_val, pred_null) = inner.predicate_for_row(sess, predicate, row)?;
                present = Term::and(vec![present, !pred_null, pred_val]);
            }
            items.push(AggItem { val, null, present });
        }
        self.side_constraints.extend(inner.take_side_constraints());

        Ok(match (func, distinct) {
            (FuncName::Max, _) => agg::fold_max(&items),
            (FuncName::Min, _) => agg::fold_min(&items),
            (FuncName::Count, false) => agg::fold_count(&items),
            (FuncName::Count, true) => agg::fold_count_distinct(&items),
            (FuncName::Sum, false) => agg::fold_sum(&items),
            (FuncName::Sum, true) => agg::fold_sum_distinct(&items),
            (FuncName::Avg, false) => agg::fold_avg(&items),
            (FuncName::Avg, true) => agg::fold_avg_distinct(&items),
            _ => return Err(Error::internal("not an aggregate").into()),
        })
    }
}

pub(crate) fn arg<'e>(args: &'e [Expr], index: usize) -> Result<&'e Expr, Error> {
    args.get(index)
        .ok_or_else(|| Error::internal(format!("missing argument {index}")))
}
