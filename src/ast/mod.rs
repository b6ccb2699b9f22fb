//! Query AST
//!
//! Strictly typed operator tree the encoders walk. The SQL-text parser (an
//! external collaborator, adapted in [crate::parser]) produces this; the
//! initializer stamps every operator node with a `kind$id` label before
//! encoding starts.

mod expr;

pub use expr::*;

use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum QueryExpr {
    Select(Box<SelectQuery>),
    Union(Box<UnionQuery>),
}

impl QueryExpr {
    pub fn alias(&self) -> Option<&str> {
        match self {
            QueryExpr::Select(q) => q.alias.as_deref(),
            QueryExpr::Union(u) => u.alias.as_deref(),
        }
    }

    pub fn set_alias(&mut self, alias: Option<String>) {
        match self {
            QueryExpr::Select(q) => q.alias = alias,
            QueryExpr::Union(u) => u.alias = alias,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    /// `WITH name AS (...)` bindings, in declaration order.
    pub ctes: Vec<(String, QueryExpr)>,
    pub from: FromItem,
    pub filter: Option<Filter>,
    pub group_by: Option<GroupBy>,
    /// HAVING without GROUP BY; a plain filter whose aggregates range over
    /// the whole input.
    pub having_filter: Option<Filter>,
    pub select: Project,
    pub order_by: Option<OrderBy>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionQuery {
    pub queries: Vec<QueryExpr>,
    /// `UNION ALL` keeps duplicates; plain `UNION` runs a distinct pass.
    pub all: bool,
    pub alias: Option<String>,
    pub label: Option<String>,
    pub distinct_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumAsInner)]
pub enum FromItem {
    Scan(Scan),
    Join(Box<Join>),
    Subquery(Box<QueryExpr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub table: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinKind {
    /// The label prefix for this operator's assertions.
    pub fn label_kind(self) -> &'static str {
        match self {
            JoinKind::Inner => "inner_join",
            JoinKind::Left => "left_join",
            JoinKind::Right => "right_join",
            JoinKind::Full => "full_join",
            JoinKind::Cross => "product",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub left: FromItem,
    pub right: FromItem,
    pub kind: JoinKind,
    /// ON predicate; absent for cross joins and USING joins.
    pub condition: Option<Expr>,
    /// `USING (c)`, rewritten to an equality on the two `t.c` at encode time.
    pub using: Option<String>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub predicate: Expr,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    pub exprs: Vec<Expr>,
    pub having: Option<Expr>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub targets: Vec<SelectItem>,
    pub distinct: bool,
    pub label: Option<String>,
    pub distinct_label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub exprs: Vec<Expr>,
    /// One direction per sort expression.
    pub orders: Vec<SortOrder>,
    pub limit: Option<usize>,
    pub label: Option<String>,
}

impl std::fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryExpr::Select(q) => write!(f, "{q}"),
            QueryExpr::Union(u) => {
                let sep = if u.all { " UNION ALL " } else { " UNION " };
                let parts: Vec<String> = u.queries.iter().map(|q| q.to_string()).collect();
                f.write_str(&parts.join(sep))
            }
        }
    }
}

impl std::fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SELECT ")?;
        if self.select.distinct {
            write!(f, "DISTINCT ")?;
        }
        let targets: Vec<String> = self
            .select
            .targets
            .iter()
            .map(|t| match &t.alias {
                Some(a) => format!("{} AS {a}", t.expr),
                None => t.expr.to_string(),
            })
            .collect();
        write!(f, "{} FROM {}", targets.join(", "), self.from)?;
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {}", filter.predicate)?;
        }
        if let Some(group) = &self.group_by {
            let exprs: Vec<String> = group.exprs.iter().map(|e| e.to_string()).collect();
            write!(f, " GROUP BY {}", exprs.join(", "))?;
            if let Some(having) = &group.having {
                write!(f, " HAVING {having}")?;
            }
        }
        if let Some(having) = &self.having_filter {
            write!(f, " HAVING {}", having.predicate)?;
        }
        if let Some(order) = &self.order_by {
            let keys: Vec<String> = order
                .exprs
                .iter()
                .zip(&order.orders)
                .map(|(e, o)| match o {
                    SortOrder::Asc => e.to_string(),
                    SortOrder::Desc => format!("{e} DESC"),
                })
                .collect();
            write!(f, " ORDER BY {}", keys.join(", "))?;
            if let Some(limit) = order.limit {
                write!(f, " LIMIT {limit}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for FromItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FromItem::Scan(scan) => match &scan.alias {
                Some(a) => write!(f, "{} AS {a}", scan.table),
                None => f.write_str(&scan.table),
            },
            FromItem::Join(join) => {
                let kw = match join.kind {
                    JoinKind::Inner => "JOIN",
                    JoinKind::Left => "LEFT JOIN",
                    JoinKind::Right => "RIGHT JOIN",
                    JoinKind::Full => "FULL JOIN",
                    JoinKind::Cross => "CROSS JOIN",
                };
                write!(f, "{} {kw} {}", join.left, join.right)?;
                if let Some(cond) = &join.condition {
                    write!(f, " ON {cond}")?;
                } else if let Some(using) = &join.using {
                    write!(f, " USING ({using})")?;
                }
                Ok(())
            }
            FromItem::Subquery(q) => {
                write!(f, "({q})")?;
                if let Some(alias) = q.alias() {
                    write!(f, " AS {alias}")?;
                }
                Ok(())
            }
        }
    }
}
