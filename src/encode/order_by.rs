//! Order-by + limit encoder (list semantics).
//!
//! Each input row's choice value is either 0 (absent) or a position `p` in
//! `1..=k`: the row occupies output slot `p-1` iff exactly `p-1` other
//! surviving rows compare before it under the lexicographic sort key. The
//! input is capped to `k` surviving rows, which is the sort approximation;
//! a LIMIT fixes `k` to the retained row count up front.

use anyhow::Result;

use crate::ast::{Expr, Literal, OrderBy, SortOrder};
use crate::encode::expr::RowEncoder;
use crate::encode::{label_of, Session};
use crate::error::Error;
use crate::schema::{Lineage, TableSchema};
use crate::smt::term::{TableId, Term};

pub(crate) fn encode_order_by(
    sess: &mut Session,
    input_id: TableId,
    node: &OrderBy,
    default_k: usize,
) -> Result<TableId> {
    let label = label_of(&node.label)?.to_string();
    let input = sess.db.table(input_id).clone();
    let k = node.limit.unwrap_or(default_k);

    let output_id = sess.next_table_id();
    let mut output = TableSchema::new(output_id, &input.table_name, k, Lineage::Sorted);
    output.columns = input.columns.clone();
    output.ancestors.push(input_id);
    output.op_labels.push(label.clone());
    output.sort_exprs = Some(node.exprs.clone());
    sess.db.add_table(output);

    // the sort approximation: at most k surviving input rows
    let input_size = Term::sum(
        (0..input.bound).map(|row| Term::indicator(!Term::deleted(input_id, row))),
    );
    sess.formulas.append(
        input_size.lte(Term::Int(k as i64)),
        Some(&format!("size_{input_id}")),
    );

    let mut encoder = RowEncoder::single(sess, input_id, None, None);
    // sort-key cells per input row
    let mut keys: Vec<Vec<(Term, Term)>> = Vec::with_capacity(input.bound);
    for row in 0..input.bound {
        let mut key = Vec::new();
        for expr in &node.exprs {
            key.push(sort_cell(sess, &mut encoder, &input, expr, row)?);
        }
        keys.push(key);
    }

    let mut cases = Vec::new();
    let mut choice_constraints = Vec::new();

    for row in 0..input.bound {
        choice_constraints.push(Term::and(vec![
            Term::choice(output_id, row).gte(Term::Int(0)),
            Term::choice(output_id, row).lte(Term::Int(k as i64)),
        ]));

        cases.push(
            Term::choice(output_id, row)
                .eq(Term::Int(0))
                .implies(Term::deleted(input_id, row)),
        );

        for position in 1..=k {
            // how many other surviving rows sort strictly before this one
            let mut before_indicators = Vec::new();
            for other in 0..input.bound {
                if other == row {
                    continue;
                }
                let mut is_before = Vec::new();
                let mut prefix_equal: Vec<Term> = Vec::new();
                for (key_idx, order) in node.orders.iter().enumerate() {
                    let (this_val, this_null) = keys[row][key_idx].clone();
                    let (other_val, other_null) = keys[other][key_idx].clone();

                    // nulls sort low ascending, high descending
                    let wins = match order {
                        SortOrder::Asc => Term::or(vec![
                            Term::and(vec![other_null.clone(), !this_null.clone()]),
                            Term::and(vec![
                                !other_null.clone(),
                                !this_null.clone(),
                                other_val.clone().lte(this_val.clone()),
                            ]),
                        ]),
                        SortOrder::Desc => Term::or(vec![
                            Term::and(vec![!other_null.clone(), this_null.clone()]),
                            Term::and(vec![
                                !other_null.clone(),
                                !this_null.clone(),
                                other_val.clone().gte(this_val.clone()),
                            ]),
                        ]),
                    };
                    is_before.push(Term::and(vec![
                        Term::and(prefix_equal.clone()),
                        Term::and(vec![!Term::deleted(input_id, other), wins]),
                    ]));
                    prefix_equal.push(Term::and(vec![
                        !Term::deleted(input_id, other),
                        Term::or(vec![
                            Term::and(vec![other_null.clone(), this_null.clone()]),
                            Term::and(vec![!other_null, !this_null, other_val.eq(this_val)]),
                        ]),
                    ]));
                }
                before_indicators.push(Term::or(is_before));
            }

            let mapping = Term::and(
                (0..input.width())
                    .map(|col| sess.copy_cell((input_id, row, col), (output_id, position - 1, col)))
                    .collect(),
            );

            cases.push(
                Term::choice(output_id, row)
                    .eq(Term::Int(position as i64))
                    .implies(Term::and(vec![
                        !Term::deleted(input_id, row),
                        !Term::deleted(output_id, position - 1),
                        Term::sum(before_indicators.into_iter().map(Term::indicator))
                            .eq(Term::Int(position as i64 - 1)),
                        mapping,
                    ])),
            );
        }
    }

    // slots past the number of placed rows stay empty
    for slot in 0..k {
        let placed = Term::sum(
            (0..input.bound)
                .map(|row| Term::indicator(Term::choice(output_id, row).ne(Term::Int(0)))),
        );
        cases.push(
            placed
                .lte(Term::Int(slot as i64))
                .implies(Term::deleted(output_id, slot)),
        );
    }

    cases.extend(encoder.take_side_constraints());
    cases.extend(choice_constraints);
    sess.formulas.append(Term::and(cases), Some(&label));
    Ok(output_id)
}

/// A sort key entry: `ORDER BY n` addresses the n-th output column, other
/// expressions evaluate through the row encoder.
pub(crate) fn sort_cell(
    sess: &mut Session,
    encoder: &mut RowEncoder,
    table: &TableSchema,
    expr: &Expr,
    row: usize,
) -> Result<(Term, Term)> {
    if let Expr::Literal(Literal::Int(position)) = expr {
        let col = (*position as usize)
            .checked_sub(1)
            .filter(|col| *col < table.width())
            .ok_or_else(|| Error::simple(format!("ORDER BY position {position}")))?;
        return Ok((
            sess.cell(table.table_id, row, col),
            sess.null(table.table_id, row, col),
        ));
    }
    encoder.value_for_row(sess, expr, row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Budgets;
    use crate::schema::{ColumnDef, TableDef};

    fn session(bound: usize) -> Session {
        let schema = vec![TableDef {
            name: "t".to_string(),
            primary_keys: vec![],
            foreign_keys: vec![],
            others: vec![ColumnDef {
                name: "x".to_string(),
                ty: "int".to_string(),
            }],
        }];
        Session::new(&schema, &[], bound, Budgets::default()).unwrap()
    }

    fn order_node(limit: Option<usize>) -> OrderBy {
        OrderBy {
            exprs: vec![Expr::Attribute {
                name: "x".to_string(),
            }],
            orders: vec![SortOrder::Asc],
            limit,
            label: Some("order_by$1".to_string()),
        }
    }

    #[test]
    fn sorted_outputs_have_the_approximation_bound() {
        let mut sess = session(3);
        let input = sess.base_tables[0];
        let out = encode_order_by(&mut sess, input, &order_node(None), 2).unwrap();
        let table = sess.db.table(out);
        assert_eq!(table.bound, 2);
        assert!(table.lineage.is_sorted());
        assert!(table.sort_exprs.is_some());
        assert!(sess.formulas.has_label(&format!("size_{input}")));
    }

    #[test]
    fn limit_fixes_the_retained_row_count() {
        let mut sess = session(3);
        let input = sess.base_tables[0];
        let out = encode_order_by(&mut sess, input, &order_node(Some(1)), 2).unwrap();
        assert_eq!(sess.db.table(out).bound, 1);
    }

    #[test]
    fn positional_keys_must_be_in_range() {
        let mut sess = session(2);
        let input = sess.base_tables[0];
        let mut node = order_node(None);
        node.exprs = vec![Expr::Literal(Literal::Int(5))];
        assert!(encode_order_by(&mut sess, input, &node, 2).is_err());
    }
}
