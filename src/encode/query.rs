//! Query walker: drives the operator encoders in execution order
//! (FROM → WHERE → GROUP BY/HAVING → SELECT → ORDER BY) and returns the
//! output table of the operator tree.

use anyhow::Result;

use crate::ast::{FromItem, QueryExpr};
use crate::encode::distinct::encode_distinct;
use crate::encode::filter::encode_filter;
use crate::encode::group_by::encode_group_by;
use crate::encode::join::encode_join;
use crate::encode::order_by::encode_order_by;
use crate::encode::project::encode_project;
use crate::encode::scan::{alias_table, encode_scan};
use crate::encode::union::encode_union;
use crate::encode::{budget_of, label_of, Session};
use crate::smt::term::TableId;

pub(crate) fn encode_query(
    sess: &mut Session,
    query: &QueryExpr,
    outer_row: Option<usize>,
) -> Result<TableId> {
    match query {
        QueryExpr::Select(select) => {
            for (name, cte) in &select.ctes {
                let table = encode_query(sess, cte, None)?;
                let scope = sess.curr_query;
                let table = sess.db.table_mut(table);
                table.table_name = name.clone();
                table.scope = scope;
                for column in &mut table.columns {
                    column.table_name = Some(name.clone());
                }
            }

            let mut output = encode_from(sess, &select.from)?;
            if let Some(filter) = &select.filter {
                let k = budget_of(sess, &filter.label)?;
                output = encode_filter(sess, output, filter, k, outer_row)?;
            }
            if let Some(having) = &select.having_filter {
                let k = budget_of(sess, &having.label)?;
                output = encode_filter(sess, output, having, k, None)?;
            }
            if let Some(group_by) = &select.group_by {
                output = encode_group_by(sess, output, group_by, &select.select.targets)?;
            }
            let k = budget_of(sess, &select.select.label)?;
            output = encode_project(sess, output, &select.select, k)?;
            if select.select.distinct {
                let label = label_of(&select.select.distinct_label)?.to_string();
                output = encode_distinct(sess, output, &label)?;
            }
            if let Some(order_by) = &select.order_by {
                let k = budget_of(sess, &order_by.label)?;
                output = encode_order_by(sess, output, order_by, k)?;
            }
            if let Some(alias) = &select.alias {
                output = alias_table(sess, output, alias)?;
            }
            Ok(output)
        }
        QueryExpr::Union(union) => {
            let mut inputs = Vec::with_capacity(union.queries.len());
            for branch in &union.queries {
                inputs.push(encode_query(sess, branch, None)?);
            }
            let mut output = encode_union(sess, &inputs, union)?;
            if !union.all {
                let label = label_of(&union.distinct_label)?.to_string();
                output = encode_distinct(sess, output, &label)?;
            }
            if let Some(alias) = &union.alias {
                output = alias_table(sess, output, alias)?;
            }
            Ok(output)
        }
    }
}

fn encode_from(sess: &mut Session, from: &FromItem) -> Result<TableId> {
    match from {
        FromItem::Scan(scan) => encode_scan(sess, scan),
        FromItem::Join(join) => {
            let left = encode_from(sess, &join.left)?;
            let right = encode_from(sess, &join.right)?;
            let k = budget_of(sess, &join.label)?;
            encode_join(sess, left, right, join, k)
        }
        FromItem::Subquery(query) => encode_query(sess, query, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::init::init_query;
    use crate::encode::Budgets;
    use crate::parser::parse_query;
    use crate::schema::{ColumnDef, Lineage, TableDef};

    fn session() -> Session {
        let schema = vec![TableDef {
            name: "employees".to_string(),
            primary_keys: vec![ColumnDef {
                name: "emp_id".to_string(),
                ty: "int".to_string(),
            }],
            foreign_keys: vec![],
            others: vec![
                ColumnDef {
                    name: "name".to_string(),
                    ty: "varchar".to_string(),
                },
                ColumnDef {
                    name: "age".to_string(),
                    ty: "int".to_string(),
                },
            ],
        }];
        Session::new(&schema, &[], 2, Budgets::default()).unwrap()
    }

    fn encode(sess: &mut Session, sql: &str) -> TableId {
        let mut query = parse_query(sql).unwrap();
        let budgets = sess.budgets;
        init_query(&mut sess.formulas, &budgets, &mut query);
        sess.curr_query = Some(0);
        encode_query(sess, &query, None).unwrap()
    }

    #[test]
    fn a_filtered_projection_produces_a_projected_table() {
        let mut sess = session();
        let out = encode(&mut sess, "SELECT emp_id FROM employees WHERE age > 30");
        let table = sess.db.table(out);
        assert_eq!(table.lineage, Lineage::Projected);
        assert_eq!(table.width(), 1);
        assert!(sess.formulas.has_label("scan_employees"));
        assert!(sess.formulas.has_label("filter$1"));
        assert!(sess.formulas.has_label("project$2"));
    }

    #[test]
    fn group_by_produces_a_grouped_projected_table() {
        let mut sess = session();
        let out = encode(
            &mut sess,
            "SELECT age FROM employees GROUP BY age HAVING COUNT(*) > 1",
        );
        let table = sess.db.table(out);
        assert_eq!(table.lineage, Lineage::GroupedProjected);
        // both the grouping pass and the projection anchor to this table
        assert_eq!(table.op_labels.len(), 2);
    }

    #[test]
    fn order_by_produces_a_sorted_table() {
        let mut sess = session();
        let out = encode(&mut sess, "SELECT emp_id FROM employees ORDER BY emp_id");
        assert!(sess.db.table(out).lineage.is_sorted());
    }

    #[test]
    fn union_runs_a_distinct_pass() {
        let mut sess = session();
        let out = encode(
            &mut sess,
            "SELECT emp_id FROM employees UNION SELECT emp_id FROM employees",
        );
        assert_eq!(sess.db.table(out).lineage, Lineage::Distinct);
    }

    #[test]
    fn scalar_subqueries_encode_inside_predicates() {
        let mut sess = session();
        let out = encode(
            &mut sess,
            "SELECT emp_id FROM employees WHERE age > (SELECT MIN(age) FROM employees)",
        );
        assert!(sess.db.table(out).lineage == Lineage::Projected);
    }
}
