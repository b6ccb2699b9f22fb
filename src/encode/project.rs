//! Projection encoder.
//!
//! Three shapes: projecting a grouped table (one output row per group,
//! expressions through the group encoder), a scalar aggregate with no GROUP
//! BY (a single row aggregating the whole input), and the plain row-wise
//! projection.

use anyhow::Result;

use crate::ast::{Expr, Project, SelectItem};
use crate::encode::approx::{allocate_under_table, link_under_table, SizeMetric};
use crate::encode::expr::RowEncoder;
use crate::encode::group_expr::GroupEncoder;
use crate::encode::{label_of, Session};
use crate::error::Error;
use crate::schema::{ColumnSchema, Lineage, SqlType, TableSchema};
use crate::smt::term::{TableId, Term};

pub(crate) fn encode_project(
    sess: &mut Session,
    input_id: TableId,
    node: &Project,
    k: usize,
) -> Result<TableId> {
    let label = label_of(&node.label)?.to_string();
    let input = sess.db.table(input_id).clone();
    let from_group_by = input.lineage.is_grouped();

    // attributes resolve against the grouped table's ancestor
    let resolution_input = if from_group_by {
        let ancestor = *input
            .ancestors
            .first()
            .ok_or_else(|| Error::internal("grouped table without an ancestor"))?;
        sess.db.table(ancestor).clone()
    } else {
        input.clone()
    };

    let targets = expand_wildcards(&node.targets, &resolution_input)?;
    let has_aggregate = targets.iter().any(|t| t.expr.contains_aggregate());

    // build the output columns and the attribute mapping
    let mut columns = Vec::new();
    let mut mapping: Vec<Option<usize>> = Vec::new();
    for (idx, target) in targets.iter().enumerate() {
        match &target.expr {
            Expr::Attribute { name } => {
                let source = resolution_input.resolve(name)?;
                let mut column = source.clone();
                column.column_id = idx;
                if let Some(alias) = &target.alias {
                    column.name_before_project = Some(name.clone());
                    column.column_name = alias.clone();
                }
                mapping.push(Some(source.column_id));
                columns.push(column);
            }
            expr => {
                let rendered = expr.to_string();
                let mut column = ColumnSchema::new(
                    idx,
                    target.alias.as_deref().unwrap_or(&rendered),
                    SqlType::Int,
                    None,
                );
                if target.alias.is_some() {
                    column.name_before_project = Some(rendered);
                }
                mapping.push(None);
                columns.push(column);
            }
        }
    }

    let (output_id, bound) = if from_group_by {
        // the grouped table becomes the projection output in place
        let table = sess.db.table_mut(input_id);
        table.columns = columns;
        table.lineage = Lineage::GroupedProjected;
        table.op_labels.push(label.clone());
        (input_id, table.bound)
    } else {
        let bound = if has_aggregate { 1 } else { input.bound };
        let output_id = sess.next_table_id();
        let mut output =
            TableSchema::new(output_id, &input.table_name, bound, Lineage::Projected);
        output.columns = columns;
        output.ancestors.push(input_id);
        output.op_labels.push(label.clone());
        sess.db.add_table(output);
        (output_id, bound)
    };

    let under = (!has_aggregate && k < bound).then(|| allocate_under_table(sess, output_id, k));

    let mut cases = Vec::new();
    let mut choice_constraints = Vec::new();

    if from_group_by {
        let input_table = resolution_input;
        let mut encoder = GroupEncoder::new(sess, output_id, input_table.table_id, None);
        let having_offset = bound;

        for bit in 0..bound * 2 {
            choice_constraints.push(Term::or(vec![
                Term::choice(output_id, bit).eq(Term::Int(1)),
                Term::choice(output_id, bit).eq(Term::Int(0)),
            ]));
        }

        for group in 0..bound {
            let mut group_mapping = Vec::new();
            for (idx, target) in targets.iter().enumerate() {
                if let Some(input_col) = mapping[idx] {
                    // the representative is the first input row of the group
                    for row in 0..input_table.bound {
                        let first_of_group = Term::and(vec![
                            Term::grouping(output_id, row, group),
                            Term::and(
                                (0..row)
                                    .map(|earlier| !Term::grouping(output_id, earlier, group))
                                    .collect(),
                            ),
                        ]);
                        group_mapping.push(first_of_group.implies(sess.copy_cell(
                            (input_table.table_id, row, input_col),
                            (output_id, group, idx),
                        )));
                    }
                } else {
                    let (val, null) = encoder.value_for_group(sess, &target.expr, group)?;
                    group_mapping.push(sess.cell(output_id, group, idx).eq(val));
                    group_mapping.push(sess.null(output_id, group, idx).eq(null));
                }
            }
            cases.push(
                Term::choice(output_id, having_offset + group)
                    .eq(Term::Int(1))
                    .implies(Term::and(group_mapping)),
            );
        }

        if let Some(under_id) = under {
            link_under_table(
                sess,
                &mut cases,
                output_id,
                under_id,
                SizeMetric::ChoiceSum {
                    offset: having_offset,
                },
            );
        }
        cases.extend(choice_constraints);
        sess.formulas.append(Term::and(cases), Some(&label));
        return Ok(under.unwrap_or(output_id));
    }

    let mut encoder = RowEncoder::single(sess, input_id, None, None);

    if has_aggregate {
        // a single scalar-aggregate row over all surviving input rows
        choice_constraints.push(Term::choice(output_id, 0).eq(Term::Int(1)));
        cases.push(!Term::deleted(output_id, 0));

        let mut row_mapping = Vec::new();
        for (idx, target) in targets.iter().enumerate() {
            if let Some(input_col) = mapping[idx] {
                for row in 0..input.bound {
                    let first_survivor = Term::and(vec![
                        !Term::deleted(input_id, row),
                        Term::and(
                            (0..row)
                                .map(|earlier| Term::deleted(input_id, earlier))
                                .collect(),
                        ),
                    ]);
                    row_mapping.push(first_survivor.implies(
                        sess.copy_cell((input_id, row, input_col), (output_id, 0, idx)),
                    ));
                }
            } else {
                let (val, null) = encoder.value_for_row(sess, &target.expr, 0)?;
                row_mapping.push(sess.cell(output_id, 0, idx).eq(val));
                row_mapping.push(sess.null(output_id, 0, idx).eq(null));
            }
        }
        cases.push(Term::and(row_mapping));
        cases.extend(encoder.take_side_constraints());
        cases.extend(choice_constraints);
        sess.formulas.append(Term::and(cases), Some(&label));
        return Ok(output_id);
    }

    for row in 0..bound {
        choice_constraints.push(Term::or(vec![
            Term::choice(output_id, row).eq(Term::Int(1)),
            Term::choice(output_id, row).eq(Term::Int(0)),
        ]));

        let mut row_mapping = Vec::new();
        for (idx, target) in targets.iter().enumerate() {
            if let Some(input_col) = mapping[idx] {
                row_mapping.push(sess.copy_cell((input_id, row, input_col), (output_id, row, idx)));
            } else {
                let (val, null) = encoder.value_for_row(sess, &target.expr, row)?;
                row_mapping.push(sess.cell(output_id, row, idx).eq(val));
                row_mapping.push(sess.null(output_id, row, idx).eq(null));
            }
        }

        cases.push(Term::choice(output_id, row).eq(Term::Int(1)).implies(
            Term::and(vec![
                !Term::deleted(input_id, row),
                Term::and(row_mapping),
                !Term::deleted(output_id, row),
            ]),
        ));
        cases.push(Term::choice(output_id, row).eq(Term::Int(0)).implies(
            Term::and(vec![
                Term::deleted(input_id, row),
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

/// Expands `*` and `t.*` targets into the input's columns, in schema order.
fn expand_wildcards(
    targets: &[SelectItem],
    input: &TableSchema,
) -> Result<Vec<SelectItem>, Error> {
    let mut expanded = Vec::new();
    for target in targets {
        let Expr::Attribute { name } = &target.expr else {
            expanded.push(target.clone());
            continue;
        };
        let qualified = |column: &ColumnSchema| SelectItem {
            expr: Expr::Attribute {
                name: match &column.table_name {
                    Some(table) => format!("{table}.{}", column.column_name),
                    None => column.column_name.clone(),
                },
            },
            alias: None,
        };
        if name == "*" {
            expanded.extend(input.columns.iter().map(qualified));
        } else if let Some(table) = name.strip_suffix(".*") {
            let mut any = false;
            for column in &input.columns {
                if column
                    .table_name
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case(table))
                {
                    expanded.push(qualified(column));
                    any = true;
                }
            }
            if !any {
                return Err(Error::not_found(name, "table"));
            }
        } else {
            expanded.push(target.clone());
        }
    }
    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FuncName, Literal};
    use crate::encode::Budgets;
    use crate::schema::{ColumnDef, TableDef};

    fn session(bound: usize) -> Session {
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
                    ty: "varchar".to_string(),
                },
            ],
        }];
        Session::new(&schema, &[], bound, Budgets::default()).unwrap()
    }

    fn attr(name: &str) -> SelectItem {
        SelectItem {
            expr: Expr::Attribute {
                name: name.to_string(),
            },
            alias: None,
        }
    }

    #[test]
    fn projection_narrows_and_renames_columns() {
        let mut sess = session(2);
        let input = sess.base_tables[0];
        let node = Project {
            targets: vec![SelectItem {
                expr: Expr::Attribute {
                    name: "a".to_string(),
                },
                alias: Some("renamed".to_string()),
            }],
            distinct: false,
            label: Some("project$1".to_string()),
            distinct_label: None,
        };
        let out = encode_project(&mut sess, input, &node, 2).unwrap();
        let table = sess.db.table(out);
        assert_eq!(table.width(), 1);
        assert_eq!(table.columns[0].column_name, "renamed");
        assert_eq!(table.columns[0].name_before_project.as_deref(), Some("a"));
    }

    #[test]
    fn scalar_aggregates_collapse_to_one_row() {
        let mut sess = session(3);
        let input = sess.base_tables[0];
        let node = Project {
            targets: vec![SelectItem {
                expr: Expr::Func {
                    func: FuncName::Count,
                    distinct: false,
                    args: vec![Expr::Attribute {
                        name: "*".to_string(),
                    }],
                    filter: None,
                },
                alias: None,
            }],
            distinct: false,
            label: Some("project$1".to_string()),
            distinct_label: None,
        };
        let out = encode_project(&mut sess, input, &node, 2).unwrap();
        assert_eq!(sess.db.table(out).bound, 1);
        // aggregates never get an approximated output
        assert!(!sess.formulas.under_to_original.contains_key(&out));
    }

    #[test]
    fn wildcards_expand_in_schema_order() {
        let mut sess = session(2);
        let input = sess.base_tables[0];
        let node = Project {
            targets: vec![attr("*")],
            distinct: false,
            label: Some("project$1".to_string()),
            distinct_label: None,
        };
        let out = encode_project(&mut sess, input, &node, 2).unwrap();
        let table = sess.db.table(out);
        assert_eq!(table.width(), 2);
        assert_eq!(table.columns[0].column_name, "a");
        assert_eq!(table.columns[1].column_name, "b");
    }

    #[test]
    fn literal_targets_become_int_columns() {
        let mut sess = session(2);
        let input = sess.base_tables[0];
        let node = Project {
            targets: vec![SelectItem {
                expr: Expr::Literal(Literal::Int(7)),
                alias: None,
            }],
            distinct: false,
            label: Some("project$1".to_string()),
            distinct_label: None,
        };
        let out = encode_project(&mut sess, input, &node, 2).unwrap();
        assert_eq!(sess.db.table(out).columns[0].column_name, "7");
    }
}
