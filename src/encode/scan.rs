//! Scan encoder and table aliasing.
//!
//! A scan is the input database's degree of freedom: each base-table row is
//! free to exist or not, witnessed by a 0/1 choice bit tied to the row's
//! deleted flag.

use anyhow::Result;

use crate::ast::Scan;
use crate::encode::Session;
use crate::smt::term::{TableId, Term};

pub(crate) fn encode_scan(sess: &mut Session, scan: &Scan) -> Result<TableId> {
    let table = sess.db.find_by_name(&scan.table, sess.curr_query)?;
    let table_id = table.table_id;
    let bound = table.bound;
    let table_name = table.table_name.clone();
    let is_base = table.lineage.is_base();

    // only declared tables get the free row pattern; a scanned CTE output
    // already has its rows fixed by the operator that produced it
    let label = format!("scan_{table_name}");
    if is_base && !sess.formulas.has_label(&label) {
        let mut cases = Vec::new();
        for row in 0..bound {
            cases.push(Term::or(vec![
                Term::choice(table_id, row).eq(Term::Int(1)),
                Term::choice(table_id, row).eq(Term::Int(0)),
            ]));
            cases.push(
                Term::choice(table_id, row)
                    .eq(Term::Int(1))
                    .implies(!Term::deleted(table_id, row)),
            );
            cases.push(
                Term::choice(table_id, row)
                    .eq(Term::Int(0))
                    .implies(Term::deleted(table_id, row)),
            );
        }
        sess.formulas.append(Term::and(cases), Some(&label));
    }

    match &scan.alias {
        Some(alias) => alias_table(sess, table_id, alias),
        None => Ok(table_id),
    }
}

/// `FROM t AS a` over a base table allocates a fresh table id scoped to the
/// current query: its choice/deleted bits are equated with the original's
/// and its cells are backed by the original, so two aliases of one table
/// read the same data. Derived tables are renamed in place.
pub(crate) fn alias_table(sess: &mut Session, table_id: TableId, alias: &str) -> Result<TableId> {
    let source = sess.db.table(table_id).clone();
    if !source.lineage.is_base() {
        let scope = sess.curr_query;
        let table = sess.db.table_mut(table_id);
        table.table_name = alias.to_string();
        table.scope = scope;
        for column in &mut table.columns {
            column.table_name = Some(alias.to_string());
        }
        return Ok(table_id);
    }

    let new_id = sess.next_table_id();
    let mut aliased = source.clone();
    aliased.table_id = new_id;
    aliased.table_name = alias.to_string();
    aliased.backing = Some(source.backing.unwrap_or(table_id));
    aliased.scope = sess.curr_query;
    for column in &mut aliased.columns {
        column.table_name = Some(alias.to_string());
    }
    sess.db.add_table(aliased);

    let mut equalities = Vec::new();
    for row in 0..source.bound {
        equalities.push(Term::choice(new_id, row).eq(Term::choice(table_id, row)));
        equalities.push(Term::deleted(new_id, row).eq(Term::deleted(table_id, row)));
    }
    sess.formulas.append(
        Term::and(equalities),
        Some(&format!("scan_{}", source.table_name)),
    );
    Ok(new_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::Budgets;
    use crate::schema::{ColumnDef, TableDef};

    fn session() -> Session {
        let schema = vec![TableDef {
            name: "Employees".to_string(),
            primary_keys: vec![],
            foreign_keys: vec![],
            others: vec![ColumnDef {
                name: "age".to_string(),
                ty: "int".to_string(),
            }],
        }];
        Session::new(&schema, &[], 2, Budgets::default()).unwrap()
    }

    #[test]
    fn scanning_asserts_the_choice_deleted_linkage_once() {
        let mut sess = session();
        let scan = Scan {
            table: "employees".to_string(),
            alias: None,
        };
        let t1 = encode_scan(&mut sess, &scan).unwrap();
        let t2 = encode_scan(&mut sess, &scan).unwrap();
        assert_eq!(t1, t2);
        assert!(sess.formulas.has_label("scan_employees"));
    }

    #[test]
    fn aliased_scans_share_cells_with_the_original() {
        let mut sess = session();
        sess.curr_query = Some(0);
        let scan = Scan {
            table: "employees".to_string(),
            alias: Some("e".to_string()),
        };
        let aliased = encode_scan(&mut sess, &scan).unwrap();
        let original = sess.base_tables[0];
        assert_ne!(aliased, original);
        assert_eq!(sess.db.cells_of(aliased), original);
        assert_eq!(sess.db.table(aliased).scope, Some(0));
        assert!(sess.db.find_by_name("e", Some(0)).is_ok());
    }
}
