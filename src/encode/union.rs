//! Union encoder.
//!
//! Concatenates the inputs row for row into an output of summed bound; each
//! output row's choice bit mirrors whether its source row survived. A plain
//! `UNION` is followed by a distinct pass over the concatenation.

use anyhow::Result;

use crate::ast::UnionQuery;
use crate::encode::{label_of, Session};
use crate::error::Error;
use crate::schema::{Lineage, TableSchema};
use crate::smt::term::{TableId, Term};

pub(crate) fn encode_union(
    sess: &mut Session,
    inputs: &[TableId],
    node: &UnionQuery,
) -> Result<TableId> {
    let label = label_of(&node.label)?.to_string();
    let tables: Vec<TableSchema> = inputs.iter().map(|id| sess.db.table(*id).clone()).collect();
    let Some(first) = tables.first() else {
        return Err(Error::internal("union of no inputs").into());
    };
    if tables.iter().any(|t| t.width() != first.width()) {
        return Err(Error::simple("UNION branches have different widths").into());
    }

    let output_id = sess.next_table_id();
    let mut output = TableSchema::new(
        output_id,
        &format!(
            "!{}!",
            tables
                .iter()
                .map(|t| t.table_name.as_str())
                .collect::<Vec<_>>()
                .join("_UNION_")
        ),
        tables.iter().map(|t| t.bound).sum(),
        Lineage::Union,
    );
    output.columns = first.columns.clone();
    output.ancestors.extend(inputs.iter().copied());
    output.op_labels.push(label.clone());
    sess.db.add_table(output);

    let mut cases = Vec::new();
    let mut choice_constraints = Vec::new();
    let mut out_row = 0;
    for table in &tables {
        for row in 0..table.bound {
            choice_constraints.push(Term::or(vec![
                Term::choice(output_id, out_row).eq(Term::Int(1)),
                Term::choice(output_id, out_row).eq(Term::Int(0)),
            ]));

            let mapping = Term::and(
                (0..table.width())
                    .map(|col| sess.copy_cell((table.table_id, row, col), (output_id, out_row, col)))
                    .collect(),
            );

            cases.push(Term::choice(output_id, out_row).eq(Term::Int(1)).implies(
                Term::and(vec![
                    !Term::deleted(table.table_id, row),
                    mapping,
                    !Term::deleted(output_id, out_row),
                ]),
            ));
            cases.push(Term::choice(output_id, out_row).eq(Term::Int(0)).implies(
                Term::and(vec![
                    Term::deleted(table.table_id, row),
                    Term::deleted(output_id, out_row),
                ]),
            ));
            out_row += 1;
        }
    }

    cases.extend(choice_constraints);
    sess.formulas.append(Term::and(cases), Some(&label));
    Ok(output_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Budgets;
    use crate::schema::{ColumnDef, TableDef};

    #[test]
    fn union_bound_is_the_sum_of_inputs() {
        let table = |name: &str| TableDef {
            name: name.to_string(),
            primary_keys: vec![],
            foreign_keys: vec![],
            others: vec![ColumnDef {
                name: "x".to_string(),
                ty: "int".to_string(),
            }],
        };
        let mut sess =
            Session::new(&[table("r"), table("s")], &[], 2, Budgets::default()).unwrap();
        let inputs = sess.base_tables.clone();
        let node = UnionQuery {
            queries: vec![],
            all: true,
            alias: None,
            label: Some("union$1".to_string()),
            distinct_label: None,
        };
        let out = encode_union(&mut sess, &inputs, &node).unwrap();
        let out = sess.db.table(out);
        assert_eq!(out.bound, 4);
        assert_eq!(out.lineage, Lineage::Union);
    }
}
