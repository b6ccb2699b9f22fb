//! Join encoders.
//!
//! The pair region enumerates `(left, right)` input rows bijectively; each
//! pair carries one choice bit deciding whether it joins. Outer joins add
//! null-extension regions for unmatched rows. A right join swaps its inputs
//! and reuses the left-join encoding.

use anyhow::Result;
use itertools::iproduct;

use crate::ast::{Expr, Join, JoinKind, Literal};
use crate::encode::approx::{allocate_under_table, link_under_table, SizeMetric};
use crate::encode::expr::RowEncoder;
use crate::encode::{label_of, Session};
use crate::schema::{Lineage, TableSchema};
use crate::smt::term::{TableId, Term};

/// Which input a joined output column copies from.
#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

pub(crate) fn encode_join(
    sess: &mut Session,
    left_id: TableId,
    right_id: TableId,
    node: &Join,
    k: usize,
) -> Result<TableId> {
    let label = label_of(&node.label)?.to_string();

    // one outer-join implementation: a right join is a left join with the
    // sides swapped
    let (left_id, right_id, kind) = match node.kind {
        JoinKind::Right => (right_id, left_id, JoinKind::Left),
        kind => (left_id, right_id, kind),
    };
    let left = sess.db.table(left_id).clone();
    let right = sess.db.table(right_id).clone();

    let condition = match (&node.condition, &node.using) {
        (Some(condition), _) => condition.clone(),
        (None, Some(column)) => Expr::Binary {
            op: crate::ast::BinOp::Eq,
            left: Box::new(Expr::Attribute {
                name: format!("{}.{column}", left.table_name),
            }),
            right: Box::new(Expr::Attribute {
                name: format!("{}.{column}", right.table_name),
            }),
        },
        (None, None) => Expr::Literal(Literal::Bool(true)),
    };

    let pair_count = left.bound * right.bound;
    let bound = match kind {
        JoinKind::Inner | JoinKind::Cross => pair_count,
        JoinKind::Left => pair_count + left.bound,
        JoinKind::Full => pair_count + left.bound + right.bound,
        JoinKind::Right => unreachable!("right joins were swapped above"),
    };

    let output_id = sess.next_table_id();
    let mut output = TableSchema::new(
        output_id,
        &format!("!{}_JOIN_{}!", left.table_name, right.table_name),
        bound,
        Lineage::Joined,
    );
    let mut mapping: Vec<(Side, usize)> = Vec::new();
    for column in left.columns.iter().chain(right.columns.iter()) {
        let side = if mapping.len() < left.width() {
            Side::Left
        } else {
            Side::Right
        };
        let mut out_column = column.clone();
        out_column.column_id = mapping.len();
        mapping.push((side, column.column_id));
        output.columns.push(out_column);
    }
    output.ancestors.extend([left_id, right_id]);
    output.op_labels.push(label.clone());
    sess.db.add_table(output);

    let under = (k < bound).then(|| allocate_under_table(sess, output_id, k));

    let pairs: Vec<(usize, usize)> = iproduct!(0..left.bound, 0..right.bound).collect();
    let mut encoder = RowEncoder::pair(sess, left_id, right_id);
    let mut cases = Vec::new();
    let mut choice_constraints = Vec::new();

    for (bit, &(l, r)) in pairs.iter().enumerate() {
        let (val, null) = encoder.predicate_for_pair(sess, &condition, l, r)?;

        choice_constraints.push(Term::or(vec![
            Term::choice(output_id, bit).eq(Term::Int(1)),
            Term::choice(output_id, bit).eq(Term::Int(0)),
        ]));

        let copied = Term::and(
            mapping
                .iter()
                .enumerate()
                .map(|(col, &(side, input_col))| match side {
                    Side::Left => sess.copy_cell((left_id, l, input_col), (output_id, bit, col)),
                    Side::Right => {
                        sess.copy_cell((right_id, r, input_col), (output_id, bit, col))
                    }
                })
                .collect(),
        );

        let both_alive = Term::and(vec![
            !Term::deleted(left_id, l),
            !Term::deleted(right_id, r),
        ]);
        cases.push(Term::choice(output_id, bit).eq(Term::Int(1)).implies(
            Term::and(vec![
                !Term::deleted(left_id, l),
                !Term::deleted(right_id, r),
                Term::and(vec![!null.clone(), val.clone()]),
                copied,
                !Term::deleted(output_id, bit),
            ]),
        ));
        cases.push(Term::choice(output_id, bit).eq(Term::Int(0)).implies(
            Term::and(vec![
                Term::or(vec![
                    Term::deleted(left_id, l),
                    Term::deleted(right_id, r),
                    Term::and(vec![
                        both_alive,
                        Term::or(vec![null.clone(), Term::and(vec![!null, !val])]),
                    ]),
                ]),
                Term::deleted(output_id, bit),
            ]),
        ));
    }
    cases.extend(encoder.take_side_constraints());

    if matches!(kind, JoinKind::Left | JoinKind::Full) {
        encode_null_extension(
            sess,
            &mut cases,
            ExtensionSide {
                extended: left_id,
                extended_bound: left.bound,
                region_start: pair_count,
                pair_bits_of: &|row| {
                    (0..right.bound)
                        .map(|r| row * right.bound + r)
                        .collect::<Vec<_>>()
                },
                mapping: &mapping,
                keeps_left: true,
            },
            output_id,
        );
    }
    if matches!(kind, JoinKind::Full) {
        encode_null_extension(
            sess,
            &mut cases,
            ExtensionSide {
                extended: right_id,
                extended_bound: right.bound,
                region_start: pair_count + left.bound,
                pair_bits_of: &|row| {
                    (0..left.bound)
                        .map(|l| l * right.bound + row)
                        .collect::<Vec<_>>()
                },
                mapping: &mapping,
                keeps_left: false,
            },
            output_id,
        );
    }

    if let Some(under_id) = under {
        let metric = match kind {
            JoinKind::Inner | JoinKind::Cross => SizeMetric::ChoiceSum { offset: 0 },
            _ => SizeMetric::NonDeleted,
        };
        link_under_table(sess, &mut cases, output_id, under_id, metric);
    }

    cases.extend(choice_constraints);
    sess.formulas.append(Term::and(cases), Some(&label));
    Ok(under.unwrap_or(output_id))
}

struct ExtensionSide<'a> {
    /// The input whose unmatched rows get null-extended output rows.
    extended: TableId,
    extended_bound: usize,
    /// First output row of this extension region.
    region_start: usize,
    /// The pair-region bits involving a given row of the extended side.
    pair_bits_of: &'a dyn Fn(usize) -> Vec<usize>,
    mapping: &'a [(Side, usize)],
    /// Whether the extended side occupies the left column block.
    keeps_left: bool,
}

/// A row of the extended input that joined no pair produces one output row
/// carrying its columns, with the other side all null.
fn encode_null_extension(
    sess: &Session,
    cases: &mut Vec<Term>,
    ext: ExtensionSide<'_>,
    output_id: TableId,
) {
    for row in 0..ext.extended_bound {
        let out_row = ext.region_start + row;

        let mut null_tuple = Vec::new();
        for (col, &(side, input_col)) in ext.mapping.iter().enumerate() {
            let from_extended = matches!(side, Side::Left) == ext.keeps_left;
            if from_extended {
                null_tuple.push(sess.copy_cell((ext.extended, row, input_col), (output_id, out_row, col)));
            } else {
                null_tuple.push(Term::null(sess.db.cells_of(output_id), out_row, col));
            }
        }

        let unmatched = Term::and(
            (ext.pair_bits_of)(row)
                .into_iter()
                .map(|bit| Term::choice(output_id, bit).eq(Term::Int(0)))
                .collect(),
        );
        let matched_somewhere = Term::or(
            (ext.pair_bits_of)(row)
                .into_iter()
                .map(|bit| Term::choice(output_id, bit).ne(Term::Int(0)))
                .collect(),
        );

        cases.push(
            Term::and(vec![!Term::deleted(ext.extended, row), unmatched]).implies(Term::and(
                vec![Term::and(null_tuple), !Term::deleted(output_id, out_row)],
            )),
        );
        cases.push(
            Term::or(vec![
                Term::deleted(ext.extended, row),
                Term::and(vec![
                    !Term::deleted(ext.extended, row),
                    matched_somewhere,
                ]),
            ])
            .implies(Term::deleted(output_id, out_row)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Budgets;
    use crate::schema::{ColumnDef, TableDef};

    fn session() -> Session {
        let table = |name: &str| TableDef {
            name: name.to_string(),
            primary_keys: vec![],
            foreign_keys: vec![],
            others: vec![ColumnDef {
                name: "x".to_string(),
                ty: "int".to_string(),
            }],
        };
        Session::new(&[table("a"), table("b")], &[], 2, Budgets::default()).unwrap()
    }

    fn join_node(kind: JoinKind) -> Join {
        Join {
            left: crate::ast::FromItem::Scan(crate::ast::Scan {
                table: "a".to_string(),
                alias: None,
            }),
            right: crate::ast::FromItem::Scan(crate::ast::Scan {
                table: "b".to_string(),
                alias: None,
            }),
            kind,
            condition: Some(Expr::Binary {
                op: crate::ast::BinOp::Eq,
                left: Box::new(Expr::Attribute {
                    name: "a.x".to_string(),
                }),
                right: Box::new(Expr::Attribute {
                    name: "b.x".to_string(),
                }),
            }),
            using: None,
            label: Some("inner_join$1".to_string()),
        }
    }

    #[test]
    fn inner_join_bound_is_the_pair_count() {
        let mut sess = session();
        let (a, b) = (sess.base_tables[0], sess.base_tables[1]);
        let out = encode_join(&mut sess, a, b, &join_node(JoinKind::Inner), 8).unwrap();
        let table = sess.db.table(out);
        assert_eq!(table.bound, 4);
        assert_eq!(table.width(), 2);
        assert_eq!(table.ancestors, vec![a, b]);
    }

    #[test]
    fn left_join_adds_a_null_extension_region() {
        let mut sess = session();
        let (a, b) = (sess.base_tables[0], sess.base_tables[1]);
        let mut node = join_node(JoinKind::Left);
        node.label = Some("left_join$1".to_string());
        let out = encode_join(&mut sess, a, b, &node, 8).unwrap();
        assert_eq!(sess.db.table(out).bound, 4 + 2);
    }

    #[test]
    fn full_join_extends_both_sides() {
        let mut sess = session();
        let (a, b) = (sess.base_tables[0], sess.base_tables[1]);
        let mut node = join_node(JoinKind::Full);
        node.label = Some("full_join$1".to_string());
        let out = encode_join(&mut sess, a, b, &node, 16).unwrap();
        assert_eq!(sess.db.table(out).bound, 4 + 2 + 2);
    }

    #[test]
    fn right_join_swaps_and_reuses_the_left_encoding() {
        let mut sess = session();
        let (a, b) = (sess.base_tables[0], sess.base_tables[1]);
        let mut node = join_node(JoinKind::Right);
        node.label = Some("right_join$1".to_string());
        let out = encode_join(&mut sess, a, b, &node, 8).unwrap();
        let table = sess.db.table(out);
        // swapped: b's columns first, b is the preserved side
        assert_eq!(table.bound, 4 + 2);
        assert_eq!(table.ancestors, vec![b, a]);
    }
}
