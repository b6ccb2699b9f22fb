//! AST initializer.
//!
//! Walks each query in execution order and stamps every operator node with
//! a unique `kind$id` label plus its under-approximation budget. Sub-queries
//! inside expressions are initialized in the same pass, so encoding can run
//! over an immutable tree.

use serde::{Deserialize, Serialize};

use crate::ast::{Expr, FromItem, QueryExpr};
use crate::smt::FormulaManager;

/// Per-operator under-approximation budgets (the `k` of spec tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budgets {
    pub filter: usize,
    pub project: usize,
    pub union_all: usize,
    pub inner_join: usize,
    pub left_join: usize,
    pub right_join: usize,
    pub full_join: usize,
    pub product: usize,
    pub order_by: usize,
}

impl Default for Budgets {
    fn default() -> Self {
        Budgets {
            filter: 2,
            project: 2,
            union_all: 2,
            inner_join: 2,
            left_join: 2,
            right_join: 2,
            full_join: 2,
            product: 2,
            order_by: 2,
        }
    }
}

impl Budgets {
    fn for_join(&self, kind: crate::ast::JoinKind) -> usize {
        use crate::ast::JoinKind::*;
        match kind {
            Inner => self.inner_join,
            Left => self.left_join,
            Right => self.right_join,
            Full => self.full_join,
            Cross => self.product,
        }
    }
}

pub(crate) fn init_query(formulas: &mut FormulaManager, budgets: &Budgets, query: &mut QueryExpr) {
    match query {
        QueryExpr::Select(select) => {
            for (_, cte) in &mut select.ctes {
                init_query(formulas, budgets, cte);
            }
            init_from(formulas, budgets, &mut select.from);

            if let Some(filter) = &mut select.filter {
                init_expr(formulas, budgets, &mut filter.predicate);
                filter.label = Some(format!("filter${}", formulas.next_node_id()));
                formulas
                    .under_config
                    .insert(filter.label.clone().unwrap_or_default(), budgets.filter);
            }
            if let Some(group_by) = &mut select.group_by {
                for expr in &mut group_by.exprs {
                    init_expr(formulas, budgets, expr);
                }
                if let Some(having) = &mut group_by.having {
                    init_expr(formulas, budgets, having);
                }
                group_by.label = Some(format!("group_by${}", formulas.next_node_id()));
            }
            if let Some(having) = &mut select.having_filter {
                init_expr(formulas, budgets, &mut having.predicate);
                having.label = Some(format!("filter${}", formulas.next_node_id()));
                formulas
                    .under_config
                    .insert(having.label.clone().unwrap_or_default(), budgets.filter);
            }

            for target in &mut select.select.targets {
                init_expr(formulas, budgets, &mut target.expr);
            }
            let id = formulas.next_node_id();
            select.select.label = Some(format!("project${id}"));
            formulas
                .under_config
                .insert(format!("project${id}"), budgets.project);
            if select.select.distinct {
                select.select.distinct_label = Some(format!("distinct${id}"));
            }

            if let Some(order_by) = &mut select.order_by {
                for expr in &mut order_by.exprs {
                    init_expr(formulas, budgets, expr);
                }
                order_by.label = Some(format!("order_by${}", formulas.next_node_id()));
                formulas
                    .under_config
                    .insert(order_by.label.clone().unwrap_or_default(), budgets.order_by);
            }
        }
        QueryExpr::Union(union) => {
            for branch in &mut union.queries {
                init_query(formulas, budgets, branch);
            }
            let id = formulas.next_node_id();
            union.label = Some(format!("union${id}"));
            formulas
                .under_config
                .insert(format!("union${id}"), budgets.union_all);
            if !union.all {
                union.distinct_label = Some(format!("distinct${id}"));
            }
        }
    }
}

fn init_from(formulas: &mut FormulaManager, budgets: &Budgets, from: &mut FromItem) {
    match from {
        FromItem::Scan(_) => {}
        FromItem::Join(join) => {
            init_from(formulas, budgets, &mut join.left);
            init_from(formulas, budgets, &mut join.right);
            if let Some(condition) = &mut join.condition {
                init_expr(formulas, budgets, condition);
            }
            let label = format!("{}${}", join.kind.label_kind(), formulas.next_node_id());
            formulas
                .under_config
                .insert(label.clone(), budgets.for_join(join.kind));
            join.label = Some(label);
        }
        FromItem::Subquery(query) => init_query(formulas, budgets, query),
    }
}

fn init_expr(formulas: &mut FormulaManager, budgets: &Budgets, expr: &mut Expr) {
    match expr {
        Expr::Attribute { .. } | Expr::Literal(_) | Expr::Like { .. } => {}
        Expr::Binary { left, right, .. } => {
            init_expr(formulas, budgets, left);
            init_expr(formulas, budgets, right);
        }
        Expr::Unary { expr, .. } => init_expr(formulas, budgets, expr),
        Expr::Case { cases, default } => {
            for (condition, result) in cases {
                init_expr(formulas, budgets, condition);
                init_expr(formulas, budgets, result);
            }
            if let Some(default) = default {
                init_expr(formulas, budgets, default);
            }
        }
        Expr::Func { args, filter, .. } => {
            for arg in args {
                init_expr(formulas, budgets, arg);
            }
            if let Some(filter) = filter {
                init_expr(formulas, budgets, filter);
            }
        }
        Expr::IsNull { expr, .. } => init_expr(formulas, budgets, expr),
        Expr::InList { expr, list, .. } => {
            init_expr(formulas, budgets, expr);
            for item in list {
                init_expr(formulas, budgets, item);
            }
        }
        Expr::InSubquery {
            exprs, subquery, ..
        } => {
            for e in exprs {
                init_expr(formulas, budgets, e);
            }
            init_query(formulas, budgets, subquery);
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            init_expr(formulas, budgets, expr);
            init_expr(formulas, budgets, low);
            init_expr(formulas, budgets, high);
        }
        Expr::Subquery(query) => init_query(formulas, budgets, query),
        Expr::Tuple(items) => {
            for item in items {
                init_expr(formulas, budgets, item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;

    #[test]
    fn labels_follow_execution_order() {
        let mut query =
            parse_query("SELECT a FROM t WHERE a > 0 GROUP BY a HAVING COUNT(*) > 1 ORDER BY a")
                .unwrap();
        let mut formulas = FormulaManager::new();
        init_query(&mut formulas, &Budgets::default(), &mut query);

        let select = query.as_select().unwrap();
        assert_eq!(select.filter.as_ref().unwrap().label.as_deref(), Some("filter$1"));
        assert_eq!(
            select.group_by.as_ref().unwrap().label.as_deref(),
            Some("group_by$2")
        );
        assert_eq!(select.select.label.as_deref(), Some("project$3"));
        assert_eq!(
            select.order_by.as_ref().unwrap().label.as_deref(),
            Some("order_by$4")
        );
        assert_eq!(formulas.under_config.get("filter$1"), Some(&2));
    }

    #[test]
    fn distinct_projections_share_the_node_id() {
        let mut query = parse_query("SELECT DISTINCT a FROM t").unwrap();
        let mut formulas = FormulaManager::new();
        init_query(&mut formulas, &Budgets::default(), &mut query);
        let select = query.as_select().unwrap();
        assert_eq!(select.select.label.as_deref(), Some("project$1"));
        assert_eq!(select.select.distinct_label.as_deref(), Some("distinct$1"));
    }

    #[test]
    fn expression_subqueries_are_initialized_eagerly() {
        let mut query =
            parse_query("SELECT a FROM t WHERE a IN (SELECT b FROM s WHERE b > 0)").unwrap();
        let mut formulas = FormulaManager::new();
        init_query(&mut formulas, &Budgets::default(), &mut query);
        let select = query.as_select().unwrap();
        let predicate = &select.filter.as_ref().unwrap().predicate;
        let crate::ast::Expr::InSubquery { subquery, .. } = predicate else {
            panic!("expected IN sub-query");
        };
        let inner = subquery.as_select().unwrap();
        assert!(inner.filter.as_ref().unwrap().label.is_some());
        assert!(inner.select.label.is_some());
    }

    #[test]
    fn union_branches_get_their_own_labels() {
        let mut query = parse_query("SELECT x FROM r UNION SELECT x FROM s").unwrap();
        let mut formulas = FormulaManager::new();
        init_query(&mut formulas, &Budgets::default(), &mut query);
        let union = query.as_union().unwrap();
        assert_eq!(union.label.as_deref(), Some("union$3"));
        assert_eq!(union.distinct_label.as_deref(), Some("distinct$3"));
    }
}
