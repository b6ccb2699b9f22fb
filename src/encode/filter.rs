//! Filter encoder (WHERE, and HAVING without GROUP BY).
//!
//! The output copies the input row for row; `choice = 1` iff the input row
//! survives and the predicate evaluates to true-and-not-null.

use anyhow::Result;

use crate::ast::Filter;
use crate::encode::approx::{allocate_under_table, link_under_table, SizeMetric};
use crate::encode::expr::RowEncoder;
use crate::encode::{label_of, Session};
use crate::schema::{Lineage, TableSchema};
use crate::smt::term::{TableId, Term};

pub(crate) fn encode_filter(
    sess: &mut Session,
    input_id: TableId,
    node: &Filter,
    k: usize,
    outer_row: Option<usize>,
) -> Result<TableId> {
    let label = label_of(&node.label)?.to_string();
    let input = sess.db.table(input_id).clone();

    let output_id = sess.next_table_id();
    let mut output = TableSchema::new(output_id, &input.table_name, input.bound, Lineage::Filtered);
    output.columns = input.columns.clone();
    output.ancestors.push(input_id);
    output.op_labels.push(label.clone());
    sess.db.add_table(output);

    let under = (k < input.bound).then(|| allocate_under_table(sess, output_id, k));

    let mut encoder = RowEncoder::single(sess, input_id, outer_row, None);
    let mut cases = Vec::new();
    let mut choice_constraints = Vec::new();
    for row in 0..input.bound {
        choice_constraints.push(Term::or(vec![
            Term::choice(output_id, row).eq(Term::Int(1)),
            Term::choice(output_id, row).eq(Term::Int(0)),
        ]));

        let (val, null) = encoder.predicate_for_row(sess, &node.predicate, row)?;

        let mapping = Term::and(
            (0..input.width())
                .map(|col| sess.copy_cell((input_id, row, col), (output_id, row, col)))
                .collect(),
        );

        cases.push(Term::choice(output_id, row).eq(Term::Int(1)).implies(
            Term::and(vec![
                !Term::deleted(input_id, row),
                Term::and(vec![!null.clone(), val.clone()]),
                mapping,
                !Term::deleted(output_id, row),
            ]),
        ));
        cases.push(Term::choice(output_id, row).eq(Term::Int(0)).implies(
            Term::and(vec![
                Term::or(vec![
                    Term::deleted(input_id, row),
                    Term::and(vec![
                        !Term::deleted(input_id, row),
                        Term::or(vec![null.clone(), Term::and(vec![!null, !val])]),
                    ]),
                ]),
                Term::deleted(output_id, row),
            ]),
        ));
    }
    cases.extend(encoder.take_side_constraints());

    if let Some(under_id) = under {
        link_under_table(
            sess,
            &mut cases,
            output_id,
            under_id,
            SizeMetric::ChoiceSum { offset: 0 },
        );
    }

    cases.extend(choice_constraints);
    sess.formulas.append(Term::and(cases), Some(&label));
    Ok(under.unwrap_or(output_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Expr, Literal};
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

    fn gt_filter() -> Filter {
        Filter {
            predicate: Expr::Binary {
                op: BinOp::Gt,
                left: Box::new(Expr::Attribute {
                    name: "x".to_string(),
                }),
                right: Box::new(Expr::Literal(Literal::Int(5))),
            },
            label: Some("filter$1".to_string()),
        }
    }

    #[test]
    fn filter_output_mirrors_input_width_and_bound() {
        let mut sess = session(2);
        let input = sess.base_tables[0];
        let out = encode_filter(&mut sess, input, &gt_filter(), 2, None).unwrap();
        let table = sess.db.table(out);
        assert_eq!(table.bound, 2);
        assert_eq!(table.width(), 1);
        assert_eq!(table.lineage, Lineage::Filtered);
        assert_eq!(table.op_labels, vec!["filter$1".to_string()]);
        assert!(sess.formulas.has_label("filter$1"));
    }

    #[test]
    fn small_budgets_produce_an_under_approximated_output() {
        let mut sess = session(3);
        let input = sess.base_tables[0];
        let out = encode_filter(&mut sess, input, &gt_filter(), 2, None).unwrap();
        // the returned table is the approximated one
        assert_eq!(sess.db.table(out).bound, 2);
        assert!(sess.formulas.under_to_original.contains_key(&out));
    }
}
