//! Duplicate elimination (DISTINCT projection, UNION without ALL).
//!
//! Row i survives iff it is not deleted and no earlier surviving row holds
//! a tuple-equal row, with NULLs comparing equal to each other.

use anyhow::Result;

use crate::encode::Session;
use crate::schema::{Lineage, TableSchema};
use crate::smt::term::{TableId, Term};

pub(crate) fn encode_distinct(
    sess: &mut Session,
    input_id: TableId,
    label: &str,
) -> Result<TableId> {
    let input = sess.db.table(input_id).clone();

    let output_id = sess.next_table_id();
    let bound = input.bound;
    let mut output = TableSchema::new(output_id, &input.table_name, bound, Lineage::Distinct);
    output.columns = input.columns.clone();
    output.ancestors.push(input_id);
    output.op_labels.push(label.to_string());
    sess.db.add_table(output);

    let tuple_equal = |a: usize, b: usize| -> Term {
        Term::and(
            (0..input.width())
                .map(|col| {
                    let a_null = sess.null(input_id, a, col);
                    let b_null = sess.null(input_id, b, col);
                    Term::or(vec![
                        Term::and(vec![a_null.clone(), b_null.clone()]),
                        Term::and(vec![
                            !Term::or(vec![a_null, b_null]),
                            sess.cell(input_id, a, col).eq(sess.cell(input_id, b, col)),
                        ]),
                    ])
                })
                .collect(),
        )
    };

    let mut cases = Vec::new();
    let mut choice_constraints = Vec::new();
    for row in 0..bound {
        choice_constraints.push(Term::or(vec![
            Term::choice(output_id, row).eq(Term::Int(1)),
            Term::choice(output_id, row).eq(Term::Int(0)),
        ]));

        let mapping = Term::and(
            (0..input.width())
                .map(|col| sess.copy_cell((input_id, row, col), (output_id, row, col)))
                .collect(),
        );

        let duplicate_of_earlier = Term::or(
            (0..row)
                .map(|earlier| {
                    Term::and(vec![
                        !Term::deleted(output_id, earlier),
                        tuple_equal(row, earlier),
                    ])
                })
                .collect(),
        );

        cases.push(Term::choice(output_id, row).eq(Term::Int(1)).implies(
            Term::and(vec![
                !Term::deleted(input_id, row),
                !duplicate_of_earlier.clone(),
                mapping,
                !Term::deleted(output_id, row),
            ]),
        ));
        cases.push(Term::choice(output_id, row).eq(Term::Int(0)).implies(
            Term::and(vec![
                Term::or(vec![
                    Term::deleted(input_id, row),
                    Term::and(vec![!Term::deleted(input_id, row), duplicate_of_earlier]),
                ]),
                Term::deleted(output_id, row),
            ]),
        ));
    }

    cases.extend(choice_constraints);
    sess.formulas.append(Term::and(cases), Some(label));
    Ok(output_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Budgets;
    use crate::schema::{ColumnDef, TableDef};

    #[test]
    fn distinct_preserves_width_and_bound() {
        let schema = vec![TableDef {
            name: "t".to_string(),
            primary_keys: vec![],
            foreign_keys: vec![],
            others: vec![ColumnDef {
                name: "x".to_string(),
                ty: "int".to_string(),
            }],
        }];
        let mut sess = Session::new(&schema, &[], 2, Budgets::default()).unwrap();
        let input = sess.base_tables[0];
        let out = encode_distinct(&mut sess, input, "distinct$1").unwrap();
        let table = sess.db.table(out);
        assert_eq!(table.bound, 2);
        assert_eq!(table.width(), 1);
        assert_eq!(table.lineage, Lineage::Distinct);
        assert!(sess.formulas.has_label("distinct$1"));
    }
}
