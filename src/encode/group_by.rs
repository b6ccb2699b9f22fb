//! Group-by + having encoder.
//!
//! The output has one group slot per input row and a choice vector twice
//! that long. The first half picks group representatives: bit i is 1 iff
//! input row i is the first non-deleted row with its grouping-expression
//! tuple, in which case `grouping(out, i, i)` holds and group i exists.
//! The second half applies HAVING per surviving group. Group existence
//! before HAVING is tracked on the mirrored table id `-out`.

use anyhow::Result;

use crate::ast::{Expr, GroupBy, Literal, SelectItem};
use crate::encode::expr::RowEncoder;
use crate::encode::group_expr::GroupEncoder;
use crate::encode::{label_of, Session};
use crate::error::Error;
use crate::schema::{Lineage, TableSchema};
use crate::smt::term::{TableId, Term};

pub(crate) fn encode_group_by(
    sess: &mut Session,
    input_id: TableId,
    node: &GroupBy,
    select_list: &[SelectItem],
) -> Result<TableId> {
    let label = label_of(&node.label)?.to_string();
    let input = sess.db.table(input_id).clone();

    let output_id = sess.next_table_id();
    let bound = input.bound;
    let mut output = TableSchema::new(output_id, &input.table_name, bound, Lineage::Grouped);
    output.ancestors.push(input_id);
    output.op_labels.push(label.clone());
    // columns are filled in by the projection pass
    sess.db.add_table(output);

    // GROUP BY n refers to the n-th select target
    let resolve_positional = |expr: &Expr| -> Result<Expr> {
        if let Expr::Literal(Literal::Int(position)) = expr {
            let target = select_list
                .get(*position as usize - 1)
                .ok_or_else(|| Error::simple(format!("GROUP BY position {position}")))?;
            return Ok(target.expr.clone());
        }
        Ok(expr.clone())
    };

    // grouping-expression tuples per input row
    let mut encoder = RowEncoder::single(sess, input_id, None, Some(select_list.to_vec()));
    let mut tuples: Vec<Vec<(Term, Term)>> = Vec::with_capacity(input.bound);
    for row in 0..input.bound {
        let mut tuple = Vec::new();
        for expr in &node.exprs {
            if matches!(expr, Expr::Literal(Literal::Bool(_))) {
                continue;
            }
            let expr = resolve_positional(expr)?;
            tuple.push(encoder.value_for_row(sess, &expr, row)?);
        }
        tuples.push(tuple);
    }

    let tuple_equal = |a: usize, b: usize| -> Term {
        Term::and(
            tuples[a]
                .iter()
                .zip(&tuples[b])
                .map(|((a_val, a_null), (b_val, b_null))| {
                    Term::or(vec![
                        Term::and(vec![a_null.clone(), b_null.clone()]),
                        Term::and(vec![
                            !Term::or(vec![a_null.clone(), b_null.clone()]),
                            a_val.clone().eq(b_val.clone()),
                        ]),
                    ])
                })
                .collect(),
        )
    };

    let mut cases = Vec::new();
    let mut choice_constraints = Vec::new();

    // every surviving input row belongs to exactly one group; deleted rows
    // to none
    for row in 0..input.bound {
        cases.push(Term::deleted(input_id, row).implies(Term::and(
            (0..bound)
                .map(|group| !Term::grouping(output_id, row, group))
                .collect(),
        )));
        cases.push((!Term::deleted(input_id, row)).implies(
            Term::sum(
                (0..bound)
                    .map(|group| Term::indicator(Term::grouping(output_id, row, group))),
            )
            .eq(Term::Int(1)),
        ));
    }

    for group in 0..bound {
        choice_constraints.push(Term::or(vec![
            Term::choice(output_id, group).eq(Term::Int(1)),
            Term::choice(output_id, group).eq(Term::Int(0)),
        ]));

        let duplicate_of_earlier = Term::or(
            (0..group)
                .map(|earlier| {
                    Term::and(vec![
                        !Term::deleted(-output_id, earlier),
                        tuple_equal(group, earlier),
                    ])
                })
                .collect(),
        );

        cases.push(Term::choice(output_id, group).eq(Term::Int(1)).implies(
            Term::and(vec![
                !Term::deleted(input_id, group),
                !duplicate_of_earlier.clone(),
                Term::grouping(output_id, group, group),
                !Term::deleted(-output_id, group),
            ]),
        ));

        let joins_earlier_group = Term::or(
            (0..group)
                .map(|earlier| {
                    Term::and(vec![
                        !Term::deleted(-output_id, earlier),
                        tuple_equal(group, earlier),
                        Term::grouping(output_id, group, earlier),
                    ])
                })
                .collect(),
        );
        cases.push(Term::choice(output_id, group).eq(Term::Int(0)).implies(
            Term::and(vec![
                Term::or(vec![
                    Term::deleted(input_id, group),
                    Term::and(vec![!Term::deleted(input_id, group), joins_earlier_group]),
                ]),
                Term::deleted(-output_id, group),
            ]),
        ));
    }

    // second half: HAVING per group
    let mut group_encoder =
        GroupEncoder::new(sess, output_id, input_id, Some(select_list.to_vec()));
    let having_offset = bound;
    for group in 0..bound {
        choice_constraints.push(Term::or(vec![
            Term::choice(output_id, having_offset + group).eq(Term::Int(1)),
            Term::choice(output_id, having_offset + group).eq(Term::Int(0)),
        ]));

        let (having_val, having_null) = match &node.having {
            Some(having) => group_encoder.predicate_for_group(sess, having, group)?,
            None => (Term::Bool(true), Term::Bool(false)),
        };
        let passes = Term::and(vec![!having_null, having_val]);

        cases.push(
            Term::choice(output_id, having_offset + group)
                .eq(Term::Int(1))
                .implies(Term::and(vec![
                    !Term::deleted(-output_id, group),
                    passes.clone(),
                    !Term::deleted(output_id, group),
                ])),
        );
        cases.push(
            Term::choice(output_id, having_offset + group)
                .eq(Term::Int(0))
                .implies(Term::and(vec![
                    Term::or(vec![
                        Term::deleted(-output_id, group),
                        Term::and(vec![!Term::deleted(-output_id, group), !passes]),
                    ]),
                    Term::deleted(output_id, group),
                ])),
        );
    }

    cases.extend(encoder.take_side_constraints());
    cases.extend(choice_constraints);
    sess.formulas.append(Term::and(cases), Some(&label));
    Ok(output_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Budgets;
    use crate::schema::{ColumnDef, TableDef};

    fn session() -> Session {
        let schema = vec![TableDef {
            name: "t".to_string(),
            primary_keys: vec![],
            foreign_keys: vec![],
            others: vec![
                ColumnDef {
                    name: "a".to_string(),
                    ty: "int".to_string(),
                },
                ColumnDef {
                    name: "b".to_string(),
                    ty: "int".to_string(),
                },
            ],
        }];
        Session::new(&schema, &[], 2, Budgets::default()).unwrap()
    }

    #[test]
    fn group_tables_carry_two_choice_halves_and_no_columns_yet() {
        let mut sess = session();
        let input = sess.base_tables[0];
        let node = GroupBy {
            exprs: vec![Expr::Attribute {
                name: "a".to_string(),
            }],
            having: None,
            label: Some("group_by$1".to_string()),
        };
        let out = encode_group_by(&mut sess, input, &node, &[]).unwrap();
        let table = sess.db.table(out);
        assert_eq!(table.lineage, Lineage::Grouped);
        assert_eq!(table.choice_len(), 4);
        assert_eq!(table.width(), 0);
        assert!(sess.formulas.has_label("group_by$1"));
    }

    #[test]
    fn positional_group_keys_resolve_through_the_select_list() {
        let mut sess = session();
        let input = sess.base_tables[0];
        let node = GroupBy {
            exprs: vec![Expr::Literal(Literal::Int(1))],
            having: None,
            label: Some("group_by$1".to_string()),
        };
        let select = vec![SelectItem {
            expr: Expr::Attribute {
                name: "b".to_string(),
            },
            alias: None,
        }];
        assert!(encode_group_by(&mut sess, input, &node, &select).is_ok());
    }
}
