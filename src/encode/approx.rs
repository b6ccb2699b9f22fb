//! Under-approximated output tables.
//!
//! An operator whose logical output bound exceeds its budget `k` gets a
//! second, smaller table: row `j` of the approximated table equals the j-th
//! non-deleted row of the logical output when at least `j+1` rows survive,
//! and is deleted otherwise. Downstream operators consume the small table;
//! the search engine pins choice bits on the logical one.

use crate::encode::Session;
use crate::smt::term::{TableId, Term};

/// How an output table's cardinality (and row ranks) are counted.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SizeMetric {
    /// Sum of 0/1 choice bits, starting at `offset` into the choice vector
    /// (the HAVING half for grouped tables).
    ChoiceSum { offset: usize },
    /// Count of non-deleted rows (joins with null-extension regions).
    NonDeleted,
}

impl SizeMetric {
    fn occupied(self, table: TableId, row: usize) -> Term {
        match self {
            SizeMetric::ChoiceSum { offset } => {
                Term::choice(table, offset + row).eq(Term::Int(1))
            }
            SizeMetric::NonDeleted => !Term::deleted(table, row),
        }
    }

    fn count(self, table: TableId, rows: std::ops::Range<usize>) -> Term {
        match self {
            SizeMetric::ChoiceSum { offset } => {
                Term::sum(rows.map(|row| Term::choice(table, offset + row)))
            }
            SizeMetric::NonDeleted => {
                Term::sum(rows.map(|row| Term::indicator(!Term::deleted(table, row))))
            }
        }
    }
}

/// Registers a bound-`k` copy of `original` and records the redirect for the
/// search engine's label index.
pub(crate) fn allocate_under_table(sess: &mut Session, original: TableId, k: usize) -> TableId {
    let under_id = sess.next_table_id();
    let mut under = sess.db.table(original).clone();
    under.table_id = under_id;
    under.bound = k;
    sess.db.add_table(under);
    sess.formulas.under_to_original.insert(under_id, original);
    under_id
}

/// Appends the size cap under a `size_<original>` label and pushes the
/// row-mapping implications into the operator's case list.
pub(crate) fn link_under_table(
    sess: &mut Session,
    cases: &mut Vec<Term>,
    original: TableId,
    under: TableId,
    metric: SizeMetric,
) {
    let bound = sess.db.table(original).bound;
    let width = sess.db.table(original).width();
    let k = sess.db.table(under).bound;

    let size = metric.count(original, 0..bound);
    sess.formulas.append(
        size.clone().lte(Term::Int(k as i64)),
        Some(&format!("size_{original}")),
    );

    for target in 0..k {
        let mut mapping = Vec::new();
        for row in 0..bound {
            let is_nth = Term::and(vec![
                metric.occupied(original, row),
                metric.count(original, 0..row).eq(Term::Int(target as i64)),
            ]);
            mapping.push(is_nth.implies(Term::and(
                (0..width)
                    .map(|col| sess.copy_cell((original, row, col), (under, target, col)))
                    .collect(),
            )));
        }
        let occupied = size.clone().gte(Term::Int(target as i64 + 1));
        cases.push(occupied.clone().implies(Term::and(vec![
            !Term::deleted(under, target),
            Term::and(mapping),
        ])));
        cases.push((!occupied).implies(Term::deleted(under, target)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{Budgets, Session};
    use crate::schema::{ColumnDef, TableDef};
    use crate::smt::printer::print_term;

    fn session() -> Session {
        let schema = vec![TableDef {
            name: "t".to_string(),
            primary_keys: vec![],
            foreign_keys: vec![],
            others: vec![ColumnDef {
                name: "x".to_string(),
                ty: "int".to_string(),
            }],
        }];
        Session::new(&schema, &[], 3, Budgets::default()).unwrap()
    }

    #[test]
    fn under_tables_shrink_the_bound_and_register_the_redirect() {
        let mut sess = session();
        let original = sess.base_tables[0];
        let under = allocate_under_table(&mut sess, original, 2);
        assert_eq!(sess.db.table(under).bound, 2);
        assert_eq!(
            sess.formulas.under_to_original.get(&under),
            Some(&original)
        );
    }

    #[test]
    fn linking_emits_a_size_cap_and_row_mappings() {
        let mut sess = session();
        let original = sess.base_tables[0];
        let under = allocate_under_table(&mut sess, original, 2);
        let mut cases = Vec::new();
        link_under_table(
            &mut sess,
            &mut cases,
            original,
            under,
            SizeMetric::NonDeleted,
        );
        // two implications per approximated row
        assert_eq!(cases.len(), 4);
        assert!(sess.formulas.has_label(&format!("size_{original}")));
        let printed = print_term(&cases[0]);
        assert!(printed.contains(&format!("(deleted {under} 0)")));
    }
}
