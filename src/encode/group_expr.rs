//! Group expression encoder.
//!
//! Evaluates expressions for a fixed group of a group-by output. Attribute
//! references pick the first input row belonging to the group via the
//! grouping relation; aggregates fold over input rows with group membership
//! as the participation flag.

use std::collections::HashMap;

use anyhow::Result;

use crate::ast::{BinOp, Expr, FuncName, SelectItem, UnOp};
use crate::encode::agg::{self, AggItem};
use crate::encode::expr::{arg, literal_term, RowEncoder};
use crate::encode::query::encode_query;
use crate::encode::Session;
use crate::error::Error;
use crate::schema::TableSchema;
use crate::smt::term::{ensure_bool, ensure_int, TableId, Term};

pub(crate) struct GroupEncoder {
    /// The group-by output table carrying the grouping relation.
    group_table: TableSchema,
    /// The grouped input table.
    input: TableSchema,
    group: usize,
    projected: Option<Vec<SelectItem>>,
    subqueries: HashMap<String, TableId>,
}

impl GroupEncoder {
    pub fn new(
        sess: &Session,
        group_table: TableId,
        input: TableId,
        projected: Option<Vec<SelectItem>>,
    ) -> Self {
        GroupEncoder {
            group_table: sess.db.table(group_table).clone(),
            input: sess.db.table(input).clone(),
            group: 0,
            projected,
            subqueries: HashMap::new(),
        }
    }

    pub fn value_for_group(
        &mut self,
        sess: &mut Session,
        expr: &Expr,
        group: usize,
    ) -> Result<(Term, Term)> {
        self.group = group;
        let (val, null) = self.encode(sess, expr)?;
        Ok((ensure_int(val), null))
    }

    pub fn predicate_for_group(
        &mut self,
        sess: &mut Session,
        expr: &Expr,
        group: usize,
    ) -> Result<(Term, Term)> {
        self.group = group;
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
            Expr::IsNull { expr, negated } => {
                let (_, null) = self.encode(sess, expr)?;
                let val = if *negated { !null } else { null };
                Ok((val, Term::Bool(false)))
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => self.encode_between(sess, expr, low, high, *negated),
            Expr::Subquery(query) => {
                let key = query.to_string();
                let table = match self.subqueries.get(&key) {
                    Some(table) => *table,
                    None => {
                        let table = encode_query(sess, query, None)?;
                        self.subqueries.insert(key, table);
                        table
                    }
                };
                Ok((sess.cell(table, 0, 0), sess.null(table, 0, 0)))
            }
            Expr::Func {
                func,
                distinct,
                args,
                filter,
            } => self.encode_func(sess, *func, *distinct, args, filter.as_deref()),
            other => {
                Err(Error::unsupported(format!("`{other}` in a grouped context")).into())
            }
        }
    }

    /// The representative cell of the group: the first input row whose
    /// grouping bit for this group is set.
    fn encode_attribute(&mut self, sess: &mut Session, name: &str) -> Result<(Term, Term)> {
        let column = match self.input.resolve(name) {
            Ok(column) => column,
            Err(not_found) => {
                // HAVING may use an alias from the select list
                if let Some(projected) = self.projected.clone() {
                    for target in &projected {
                        if target
                            .alias
                            .as_deref()
                            .is_some_and(|a| a.eq_ignore_ascii_case(name))
                        {
                            return self.encode(sess, &target.expr);
                        }
                    }
                }
                return Err(not_found.into());
            }
        };

        let col = column.column_id;
        let mut acc: Option<(Term, Term, Term)> = None;
        for row in 0..self.input.bound {
            let in_group = Term::grouping(self.group_table.table_id, row, self.group);
            let val = sess.cell(self.input.table_id, row, col);
            let null = sess.null(self.input.table_id, row, col);
            acc = Some(match acc {
                None => (in_group, val, null),
                Some((acc_grouping, acc_val, acc_null)) => {
                    let pick_y = Term::and(vec![in_group.clone(), !acc_grouping.clone()]);
                    (
                        Term::or(vec![acc_grouping, in_group]),
                        Term::ite(pick_y.clone(), val, acc_val),
                        Term::ite(pick_y, null, acc_null),
                    )
                }
            });
        }
        match acc {
            Some((_, val, null)) => Ok((val, null)),
            None => Ok((Term::Int(0), Term::Bool(true))),
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
                BinOp::Div => (
                    lv / rv.clone(),
                    Term::or(vec![any_null, rv.eq(Term::Int(0))]),
                ),
                _ => return Err(Error::internal("non-arithmetic op").into()),
            };
            return Ok((val, null));
        }
        let lv = ensure_bool(lv);
        let rv = ensure_bool(rv);
        match op {
            BinOp::And => Ok((
                Term::and(vec![lv.clone(), rv.clone()]),
                Term::and(vec![any_null, (!ln).implies(lv), (!rn).implies(rv)]),
            )),
            BinOp::Or => Ok((
                Term::or(vec![lv.clone(), rv.clone()]),
                Term::and(vec![any_null, (!ln).implies(!lv), (!rn).implies(!rv)]),
            )),
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
            FuncName::Ifnull => {
                let (if_val, if_null) = self.encode(sess, arg(args, 0)?)?;
                let (default_val, default_null) = self.encode(sess, arg(args, 1)?)?;
                Ok((
                    Term::ite(!if_null.clone(), ensure_int(if_val), ensure_int(default_val)),
                    Term::and(vec![if_null, default_null]),
                ))
            }
            FuncName::Coalesce => {
                let Some((first, rest)) = args.split_first() else {
                    return Ok((Term::Int(0), Term::Bool(true)));
                };
                let (val, null) = self.encode(sess, first)?;
                let val = ensure_int(val);
                if rest.is_empty() {
                    return Ok((val, null));
                }
                let (next_val, next_null) =
                    self.encode_func(sess, FuncName::Coalesce, false, rest, None)?;
                Ok((
                    Term::ite(!null.clone(), val, next_val),
                    Term::and(vec![null, next_null]),
                ))
            }
            FuncName::Abs => {
                let (val, null) = self.encode(sess, arg(args, 0)?)?;
                let val = ensure_int(val);
                Ok((
                    Term::ite(val.clone().gte(Term::Int(0)), val.clone(), -val),
                    null,
                ))
            }
            FuncName::Datediff => {
                let (a_val, a_null) = self.encode(sess, arg(args, 0)?)?;
                let (b_val, b_null) = self.encode(sess, arg(args, 1)?)?;
                Ok((
                    ensure_int(a_val) - ensure_int(b_val),
                    Term::or(vec![a_null, b_null]),
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
            FuncName::Round
            | FuncName::StrToDate
            | FuncName::Cast
            | FuncName::AnyValue
            | FuncName::Extract
            | FuncName::Concat
            | FuncName::Trim
            | FuncName::Ltrim
            | FuncName::Rtrim => self.encode(sess, arg(args, 0)?),
            other => {
                Err(Error::unsupported(format!("`{other}` in a grouped context")).into())
            }
        }
    }

    fn encode_aggregate(
        &mut self,
        sess: &mut Session,
        func: FuncName,
        distinct: bool,
        args: &[Expr],
        filter: Option<&Expr>,
    ) -> Result<(Term, Term)> {
        let argument = arg(args, 0)?;
        let star = matches!(argument, Expr::Attribute { name } if name == "*");

        let mut inner = RowEncoder::single(sess, self.input.table_id, None, None);
        let mut items = Vec::with_capacity(self.input.bound);
        for row in 0..self.input.bound {
            let (val, null) = if star {
                (Term::Int(1), Term::Bool(false))
            } else {
                inner.value_for_row(sess, argument, row)?
            };
            let mut present = Term::grouping(self.group_table.table_id, row, self.group);
            if let Some(predicate) = filter {
                let (pred_val, pred_null) = inner.predicate_for_row(sess, predicate, row)?;
                present = Term::and(vec![present, !pred_null, pred_val]);
            }
            items.push(AggItem { val, null, present });
        }

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
