//! Adapter over the external SQL parser.
//!
//! Maps [sqlparser] ASTs into the crate's closed operator/expression AST.
//! Anything the symbolic encoders cannot model surfaces here as an
//! `Unsupported` error, which the orchestrator reports as `ERR`.

use std::str::FromStr;

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime, Timelike};
use sqlparser::ast as sql_ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::ast::*;
use crate::error::Error;

pub fn parse_query(sql: &str) -> Result<QueryExpr> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| Error::simple(format!("parse error: {e}")))?;
    let [statement] = statements.as_slice() else {
        return Err(Error::simple("expected exactly one SQL statement").into());
    };
    match statement {
        sql_ast::Statement::Query(query) => lower_query(query),
        other => Err(Error::unsupported(format!("statement `{other}`")).into()),
    }
}

fn lower_query(query: &sql_ast::Query) -> Result<QueryExpr> {
    let mut ctes = Vec::new();
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            ctes.push((cte.alias.name.value.clone(), lower_query(&cte.query)?));
        }
    }

    let order_by = lower_order_by(&query.order_by, lower_limit(query)?)?;

    match query.body.as_ref() {
        sql_ast::SetExpr::Select(select) => {
            lower_select(select, ctes, order_by).map(|q| QueryExpr::Select(Box::new(q)))
        }
        sql_ast::SetExpr::Query(inner) => {
            if !ctes.is_empty() || order_by.is_some() {
                return Err(
                    Error::unsupported("WITH/ORDER BY around a parenthesized query").into(),
                );
            }
            lower_query(inner)
        }
        body @ sql_ast::SetExpr::SetOperation { .. } => {
            if !ctes.is_empty() {
                return Err(Error::unsupported("WITH over a set operation").into());
            }
            if order_by.is_some() {
                return Err(Error::unsupported("ORDER BY over a set operation").into());
            }
            let mut queries = Vec::new();
            let all = flatten_union(body, &mut queries)?;
            Ok(QueryExpr::Union(Box::new(UnionQuery {
                queries,
                all,
                alias: None,
                label: None,
                distinct_label: None,
            })))
        }
        other => Err(Error::unsupported(format!("query body `{other}`")).into()),
    }
}

/// Collects the branches of a (possibly nested) UNION chain. Mixing `UNION`
/// and `UNION ALL` in one chain is not modeled.
fn flatten_union(body: &sql_ast::SetExpr, out: &mut Vec<QueryExpr>) -> Result<bool> {
    match body {
        sql_ast::SetExpr::SetOperation {
            op: sql_ast::SetOperator::Union,
            set_quantifier,
            left,
            right,
        } => {
            let all = matches!(set_quantifier, sql_ast::SetQuantifier::All);
            let left_all = match left.as_ref() {
                nested @ sql_ast::SetExpr::SetOperation { .. } => {
                    Some(flatten_union(nested, out)?)
                }
                other => {
                    out.push(lower_set_member(other)?);
                    None
                }
            };
            if let Some(left_all) = left_all {
                if left_all != all {
                    return Err(
                        Error::unsupported("mixed UNION and UNION ALL in one chain").into()
                    );
                }
            }
            out.push(lower_set_member(right)?);
            Ok(all)
        }
        sql_ast::SetExpr::SetOperation { op, .. } => {
            Err(Error::unsupported(format!("set operation `{op:?}`")).into())
        }
        other => Err(Error::internal(format!("flatten_union on `{other}`")).into()),
    }
}

fn lower_set_member(body: &sql_ast::SetExpr) -> Result<QueryExpr> {
    match body {
        sql_ast::SetExpr::Select(select) => {
            lower_select(select, Vec::new(), None).map(|q| QueryExpr::Select(Box::new(q)))
        }
        sql_ast::SetExpr::Query(inner) => lower_query(inner),
        other => Err(Error::unsupported(format!("set member `{other}`")).into()),
    }
}

fn lower_select(
    select: &sql_ast::Select,
    ctes: Vec<(String, QueryExpr)>,
    order_by: Option<OrderBy>,
) -> Result<SelectQuery> {
    if select.top.is_some()
        || !select.lateral_views.is_empty()
        || !select.cluster_by.is_empty()
        || !select.distribute_by.is_empty()
        || !select.sort_by.is_empty()
        || select.qualify.is_some()
    {
        return Err(Error::unsupported("non-standard SELECT clause").into());
    }

    let distinct = match &select.distinct {
        None => false,
        Some(sql_ast::Distinct::Distinct) => true,
        Some(sql_ast::Distinct::On(_)) => {
            return Err(Error::unsupported("DISTINCT ON").into());
        }
    };

    let from = lower_from(&select.from)?;
    let filter = select
        .selection
        .as_ref()
        .map(|predicate| {
            Ok::<_, anyhow::Error>(Filter {
                predicate: lower_expr(predicate)?,
                label: None,
            })
        })
        .transpose()?;

    let group_exprs = match &select.group_by {
        sql_ast::GroupByExpr::All => {
            return Err(Error::unsupported("GROUP BY ALL").into());
        }
        sql_ast::GroupByExpr::Expressions(exprs) => exprs
            .iter()
            .map(lower_expr)
            .collect::<Result<Vec<_>>>()?,
    };
    let having = select.having.as_ref().map(lower_expr).transpose()?;

    let (group_by, having_filter) = if group_exprs.is_empty() {
        // HAVING without GROUP BY filters on globally-aggregated predicates
        let having_filter = having.map(|predicate| Filter {
            predicate,
            label: None,
        });
        (None, having_filter)
    } else {
        (
            Some(GroupBy {
                exprs: group_exprs,
                having,
                label: None,
            }),
            None,
        )
    };

    let targets = select
        .projection
        .iter()
        .map(lower_select_item)
        .collect::<Result<Vec<_>>>()?;

    Ok(SelectQuery {
        ctes,
        from,
        filter,
        group_by,
        having_filter,
        select: Project {
            targets,
            distinct,
            label: None,
            distinct_label: None,
        },
        order_by,
        alias: None,
    })
}

fn lower_select_item(item: &sql_ast::SelectItem) -> Result<SelectItem> {
    Ok(match item {
        sql_ast::SelectItem::UnnamedExpr(expr) => SelectItem {
            expr: lower_expr(expr)?,
            alias: None,
        },
        sql_ast::SelectItem::ExprWithAlias { expr, alias } => SelectItem {
            expr: lower_expr(expr)?,
            alias: Some(alias.value.clone()),
        },
        sql_ast::SelectItem::Wildcard(_) => SelectItem {
            expr: Expr::Attribute {
                name: "*".to_string(),
            },
            alias: None,
        },
        sql_ast::SelectItem::QualifiedWildcard(name, _) => SelectItem {
            expr: Expr::Attribute {
                name: format!("{}.*", object_name(name)),
            },
            alias: None,
        },
    })
}

fn lower_from(from: &[sql_ast::TableWithJoins]) -> Result<FromItem> {
    let items = from
        .iter()
        .map(lower_table_with_joins)
        .collect::<Result<Vec<_>>>()?;
    let mut iter = items.into_iter();
    let Some(mut result) = iter.next() else {
        return Err(Error::unsupported("SELECT without FROM").into());
    };
    // comma-separated FROM items are cross joins, folded left-deep
    for right in iter {
        result = FromItem::Join(Box::new(Join {
            left: result,
            right,
            kind: JoinKind::Cross,
            condition: None,
            using: None,
            label: None,
        }));
    }
    Ok(result)
}

fn lower_table_with_joins(twj: &sql_ast::TableWithJoins) -> Result<FromItem> {
    let mut current = lower_table_factor(&twj.relation)?;
    for join in &twj.joins {
        let right = lower_table_factor(&join.relation)?;
        let (kind, constraint) = match &join.join_operator {
            sql_ast::JoinOperator::Inner(c) => (JoinKind::Inner, Some(c)),
            sql_ast::JoinOperator::LeftOuter(c) => (JoinKind::Left, Some(c)),
            sql_ast::JoinOperator::RightOuter(c) => (JoinKind::Right, Some(c)),
            sql_ast::JoinOperator::FullOuter(c) => (JoinKind::Full, Some(c)),
            sql_ast::JoinOperator::CrossJoin => (JoinKind::Cross, None),
            other => {
                return Err(Error::unsupported(format!("join operator `{other:?}`")).into());
            }
        };
        let (condition, using) = match constraint {
            None | Some(sql_ast::JoinConstraint::None) => (None, None),
            Some(sql_ast::JoinConstraint::On(expr)) => (Some(lower_expr(expr)?), None),
            Some(sql_ast::JoinConstraint::Using(columns)) => {
                let [column] = columns.as_slice() else {
                    return Err(Error::unsupported("USING with several columns").into());
                };
                (None, Some(column.value.clone()))
            }
            Some(sql_ast::JoinConstraint::Natural) => {
                return Err(Error::unsupported("NATURAL join").into());
            }
        };
        current = FromItem::Join(Box::new(Join {
            left: current,
            right,
            kind,
            condition,
            using,
            label: None,
        }));
    }
    Ok(current)
}

fn lower_table_factor(factor: &sql_ast::TableFactor) -> Result<FromItem> {
    Ok(match factor {
        sql_ast::TableFactor::Table { name, alias, .. } => FromItem::Scan(Scan {
            table: object_name(name),
            alias: alias.as_ref().map(|a| a.name.value.clone()),
        }),
        sql_ast::TableFactor::Derived {
            subquery, alias, ..
        } => {
            let mut inner = lower_query(subquery)?;
            inner.set_alias(alias.as_ref().map(|a| a.name.value.clone()));
            FromItem::Subquery(Box::new(inner))
        }
        sql_ast::TableFactor::NestedJoin {
            table_with_joins, ..
        } => lower_table_with_joins(table_with_joins)?,
        other => {
            return Err(Error::unsupported(format!("table factor `{other}`")).into());
        }
    })
}

fn lower_limit(query: &sql_ast::Query) -> Result<Option<usize>> {
    let Some(limit) = &query.limit else {
        return Ok(None);
    };
    match lower_expr(limit)? {
        Expr::Literal(Literal::Int(n)) if n >= 0 => Ok(Some(n as usize)),
        other => Err(Error::unsupported(format!("LIMIT `{other}`")).into()),
    }
}

fn lower_order_by(
    order_by: &[sql_ast::OrderByExpr],
    limit: Option<usize>,
) -> Result<Option<OrderBy>> {
    if order_by.is_empty() {
        if limit.is_some() {
            return Err(Error::unsupported("LIMIT without ORDER BY").into());
        }
        return Ok(None);
    }
    let mut exprs = Vec::new();
    let mut orders = Vec::new();
    for entry in order_by {
        if entry.nulls_first.is_some() {
            return Err(Error::unsupported("NULLS FIRST/LAST").into());
        }
        exprs.push(lower_expr(&entry.expr)?);
        orders.push(match entry.asc {
            Some(false) => SortOrder::Desc,
            _ => SortOrder::Asc,
        });
    }
    Ok(Some(OrderBy {
        exprs,
        orders,
        limit,
        label: None,
    }))
}

fn object_name(name: &sql_ast::ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn lower_binary_op(op: &sql_ast::BinaryOperator) -> Result<BinOp> {
    Ok(match op {
        sql_ast::BinaryOperator::Plus => BinOp::Add,
        sql_ast::BinaryOperator::Minus => BinOp::Sub,
        sql_ast::BinaryOperator::Multiply => BinOp::Mul,
        sql_ast::BinaryOperator::Divide => BinOp::Div,
        sql_ast::BinaryOperator::Gt => BinOp::Gt,
        sql_ast::BinaryOperator::GtEq => BinOp::Gte,
        sql_ast::BinaryOperator::Lt => BinOp::Lt,
        sql_ast::BinaryOperator::LtEq => BinOp::Lte,
        sql_ast::BinaryOperator::Eq => BinOp::Eq,
        sql_ast::BinaryOperator::NotEq => BinOp::Neq,
        sql_ast::BinaryOperator::And => BinOp::And,
        sql_ast::BinaryOperator::Or => BinOp::Or,
        other => {
            return Err(Error::unsupported(format!("operator `{other}`")).into());
        }
    })
}

fn lower_string_literal(s: &str) -> Literal {
    // benchmark queries compare date/time columns against plain strings
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Literal::Date(date);
    }
    if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M:%S") {
        return Literal::Time(time.num_seconds_from_midnight());
    }
    Literal::Str(s.to_string())
}

fn lower_value(value: &sql_ast::Value) -> Result<Literal> {
    Ok(match value {
        sql_ast::Value::Number(text, _) => {
            if let Ok(n) = text.parse::<i64>() {
                Literal::Int(n)
            } else {
                text.parse::<f64>()
                    .map(Literal::Float)
                    .map_err(|_| Error::simple(format!("invalid number `{text}`")))?
            }
        }
        sql_ast::Value::SingleQuotedString(s) | sql_ast::Value::DoubleQuotedString(s) => {
            lower_string_literal(s)
        }
        sql_ast::Value::Boolean(b) => Literal::Bool(*b),
        sql_ast::Value::Null => Literal::Null,
        other => {
            return Err(Error::unsupported(format!("literal `{other}`")).into());
        }
    })
}

fn lower_function(function: &sql_ast::Function) -> Result<Expr> {
    if function.over.is_some() {
        return Err(Error::unsupported("window functions").into());
    }
    let name = function
        .name
        .0
        .last()
        .map(|ident| ident.value.to_ascii_lowercase())
        .unwrap_or_default();
    let func = FuncName::from_str(&name)
        .map_err(|_| Error::unsupported(format!("function `{name}`")))?;

    let mut args = Vec::new();
    for arg in &function.args {
        let arg = match arg {
            sql_ast::FunctionArg::Unnamed(arg) => arg,
            sql_ast::FunctionArg::Named { .. } => {
                return Err(Error::unsupported("named function arguments").into());
            }
        };
        match arg {
            sql_ast::FunctionArgExpr::Expr(expr) => args.push(lower_expr(expr)?),
            sql_ast::FunctionArgExpr::Wildcard => args.push(Expr::Attribute {
                name: "*".to_string(),
            }),
            sql_ast::FunctionArgExpr::QualifiedWildcard(name) => args.push(Expr::Attribute {
                name: format!("{}.*", object_name(name)),
            }),
        }
    }

    let filter = function
        .filter
        .as_ref()
        .map(|f| lower_expr(f).map(Box::new))
        .transpose()?;
    if filter.is_some() && !func.is_aggregate() {
        return Err(Error::unsupported("FILTER on a non-aggregate").into());
    }

    Ok(Expr::Func {
        func,
        distinct: function.distinct,
        args,
        filter,
    })
}

fn lower_in_lhs(expr: &sql_ast::Expr) -> Result<Vec<Expr>> {
    match lower_expr(expr)? {
        Expr::Tuple(items) => Ok(items),
        single => Ok(vec![single]),
    }
}

fn lower_expr(expr: &sql_ast::Expr) -> Result<Expr> {
    Ok(match expr {
        sql_ast::Expr::Identifier(ident) => Expr::Attribute {
            name: ident.value.clone(),
        },
        sql_ast::Expr::CompoundIdentifier(parts) => Expr::Attribute {
            name: parts
                .iter()
                .map(|ident| ident.value.clone())
                .collect::<Vec<_>>()
                .join("."),
        },
        sql_ast::Expr::Value(value) => Expr::Literal(lower_value(value)?),
        sql_ast::Expr::TypedString { data_type, value } => match data_type {
            sql_ast::DataType::Date => {
                let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .map_err(|_| Error::simple(format!("invalid date `{value}`")))?;
                Expr::Literal(Literal::Date(date))
            }
            sql_ast::DataType::Time(..) => {
                let time = NaiveTime::parse_from_str(value, "%H:%M:%S")
                    .map_err(|_| Error::simple(format!("invalid time `{value}`")))?;
                Expr::Literal(Literal::Time(time.num_seconds_from_midnight()))
            }
            other => {
                return Err(Error::unsupported(format!("typed string `{other}`")).into());
            }
        },
        sql_ast::Expr::BinaryOp { left, op, right } => Expr::Binary {
            op: lower_binary_op(op)?,
            left: Box::new(lower_expr(left)?),
            right: Box::new(lower_expr(right)?),
        },
        sql_ast::Expr::UnaryOp { op, expr } => match op {
            sql_ast::UnaryOperator::Minus => Expr::Unary {
                op: UnOp::Neg,
                expr: Box::new(lower_expr(expr)?),
            },
            sql_ast::UnaryOperator::Not => Expr::Unary {
                op: UnOp::Not,
                expr: Box::new(lower_expr(expr)?),
            },
            sql_ast::UnaryOperator::Plus => lower_expr(expr)?,
            other => {
                return Err(Error::unsupported(format!("operator `{other}`")).into());
            }
        },
        sql_ast::Expr::Nested(inner) => lower_expr(inner)?,
        sql_ast::Expr::IsNull(inner) => Expr::IsNull {
            expr: Box::new(lower_expr(inner)?),
            negated: false,
        },
        sql_ast::Expr::IsNotNull(inner) => Expr::IsNull {
            expr: Box::new(lower_expr(inner)?),
            negated: true,
        },
        sql_ast::Expr::InList {
            expr,
            list,
            negated,
        } => Expr::InList {
            expr: Box::new(lower_expr(expr)?),
            list: list.iter().map(lower_expr).collect::<Result<Vec<_>>>()?,
            negated: *negated,
        },
        sql_ast::Expr::InSubquery {
            expr,
            subquery,
            negated,
        } => Expr::InSubquery {
            exprs: lower_in_lhs(expr)?,
            subquery: Box::new(lower_query(subquery)?),
            negated: *negated,
        },
        sql_ast::Expr::Between {
            expr,
            negated,
            low,
            high,
        } => Expr::Between {
            expr: Box::new(lower_expr(expr)?),
            low: Box::new(lower_expr(low)?),
            high: Box::new(lower_expr(high)?),
            negated: *negated,
        },
        sql_ast::Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            let pattern = match lower_expr(pattern)? {
                Expr::Literal(Literal::Str(s)) => s,
                other => {
                    return Err(
                        Error::unsupported(format!("non-literal LIKE pattern `{other}`")).into(),
                    );
                }
            };
            Expr::Like {
                expr: Box::new(lower_expr(expr)?),
                pattern,
                negated: *negated,
            }
        }
        sql_ast::Expr::Exists { subquery, negated } => Expr::IsNull {
            expr: Box::new(Expr::Subquery(Box::new(lower_query(subquery)?))),
            // EXISTS is "the sub-query output is not empty"
            negated: !negated,
        },
        sql_ast::Expr::Subquery(subquery) => Expr::Subquery(Box::new(lower_query(subquery)?)),
        sql_ast::Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            let operand = operand.as_ref().map(|o| lower_expr(o)).transpose()?;
            let mut cases = Vec::new();
            for (condition, result) in conditions.iter().zip(results) {
                let mut condition = lower_expr(condition)?;
                if let Some(operand) = &operand {
                    condition = Expr::Binary {
                        op: BinOp::Eq,
                        left: Box::new(operand.clone()),
                        right: Box::new(condition),
                    };
                }
                cases.push((condition, lower_expr(result)?));
            }
            Expr::Case {
                cases,
                default: else_result
                    .as_ref()
                    .map(|e| lower_expr(e).map(Box::new))
                    .transpose()?,
            }
        }
        sql_ast::Expr::Function(function) => lower_function(function)?,
        sql_ast::Expr::Cast { expr, .. } => Expr::Func {
            func: FuncName::Cast,
            distinct: false,
            args: vec![lower_expr(expr)?],
            filter: None,
        },
        sql_ast::Expr::Interval(interval) => {
            match (&interval.leading_field, lower_expr(&interval.value)?) {
                (Some(sql_ast::DateTimeField::Day), Expr::Literal(Literal::Int(n))) => {
                    Expr::Literal(Literal::Int(n))
                }
                (field, _) => {
                    return Err(Error::unsupported(format!("INTERVAL `{field:?}`")).into());
                }
            }
        }
        sql_ast::Expr::Extract { expr, .. } => Expr::Func {
            func: FuncName::Extract,
            distinct: false,
            args: vec![lower_expr(expr)?],
            filter: None,
        },
        sql_ast::Expr::Tuple(items) => {
            Expr::Tuple(items.iter().map(lower_expr).collect::<Result<Vec<_>>>()?)
        }
        other => {
            return Err(Error::unsupported(format!("expression `{other}`")).into());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(sql: &str) -> SelectQuery {
        match parse_query(sql).unwrap() {
            QueryExpr::Select(q) => *q,
            other => panic!("expected a select, got {other:?}"),
        }
    }

    #[test]
    fn lowers_a_simple_filtered_select() {
        let q = select("SELECT emp_id FROM Employees WHERE age > 30");
        assert!(q.from.is_scan());
        let filter = q.filter.unwrap();
        assert_eq!(filter.predicate.to_string(), "age > 30");
        assert_eq!(q.select.targets.len(), 1);
        assert!(!q.select.distinct);
    }

    #[test]
    fn lowers_joins_and_aliases() {
        let q = select("SELECT A.x FROM A LEFT JOIN B ON A.x = B.x");
        let join = q.from.as_join().unwrap();
        assert_eq!(join.kind, JoinKind::Left);
        assert_eq!(join.condition.as_ref().unwrap().to_string(), "A.x = B.x");

        let q = select("SELECT e.name FROM Employees AS e");
        let scan = q.from.as_scan().unwrap();
        assert_eq!(scan.alias.as_deref(), Some("e"));
    }

    #[test]
    fn lowers_group_by_and_having() {
        let q = select("SELECT a FROM T GROUP BY a HAVING COUNT(*) > 1");
        let group = q.group_by.unwrap();
        assert_eq!(group.exprs.len(), 1);
        assert_eq!(group.having.unwrap().to_string(), "COUNT(*) > 1");
    }

    #[test]
    fn standalone_having_becomes_a_filter() {
        let q = select("SELECT SUM(a) FROM T HAVING COUNT(*) > 0");
        assert!(q.group_by.is_none());
        assert!(q.having_filter.is_some());
    }

    #[test]
    fn lowers_union_chains() {
        let union = match parse_query("SELECT x FROM R UNION SELECT x FROM S").unwrap() {
            QueryExpr::Union(u) => *u,
            other => panic!("expected a union, got {other:?}"),
        };
        assert_eq!(union.queries.len(), 2);
        assert!(!union.all);
    }

    #[test]
    fn lowers_order_by_with_limit() {
        let q = select("SELECT a FROM T ORDER BY a DESC, b LIMIT 3");
        let order = q.order_by.unwrap();
        assert_eq!(order.orders, vec![SortOrder::Desc, SortOrder::Asc]);
        assert_eq!(order.limit, Some(3));
    }

    #[test]
    fn lowers_aggregate_filter_clauses() {
        let q = select("SELECT SUM(col_a) FILTER (WHERE col_b > 10) FROM Sales");
        let target = &q.select.targets[0].expr;
        let Expr::Func { func, filter, .. } = target else {
            panic!("expected an aggregate, got {target:?}");
        };
        assert_eq!(*func, FuncName::Sum);
        assert_eq!(filter.as_ref().unwrap().to_string(), "col_b > 10");
    }

    #[test]
    fn lowers_subquery_predicates() {
        let q = select("SELECT a FROM T WHERE a IN (SELECT b FROM S)");
        assert!(matches!(
            q.filter.unwrap().predicate,
            Expr::InSubquery { negated: false, .. }
        ));

        let q = select("SELECT a FROM T WHERE EXISTS (SELECT b FROM S)");
        assert!(matches!(
            q.filter.unwrap().predicate,
            Expr::IsNull { negated: true, .. }
        ));
    }

    #[test]
    fn lowers_ctes() {
        let q = select("WITH young AS (SELECT * FROM T WHERE age < 30) SELECT * FROM young");
        assert_eq!(q.ctes.len(), 1);
        assert_eq!(q.ctes[0].0, "young");
    }

    #[test]
    fn date_strings_become_dates() {
        let q = select("SELECT a FROM T WHERE d = '2020-06-01'");
        let predicate = q.filter.unwrap().predicate.to_string();
        assert_eq!(predicate, "d = '2020-06-01'");
        match select("SELECT a FROM T WHERE d = '2020-06-01'").filter.unwrap().predicate {
            Expr::Binary { right, .. } => {
                assert!(matches!(*right, Expr::Literal(Literal::Date(_))));
            }
            other => panic!("unexpected predicate {other:?}"),
        }
    }

    #[test]
    fn rejects_unsupported_sql() {
        assert!(parse_query("SELECT a FROM T ORDER BY a NULLS FIRST").is_err());
        assert!(parse_query("INSERT INTO T VALUES (1)").is_err());
        assert!(parse_query("SELECT RANK() OVER (ORDER BY a) FROM T").is_err());
    }

    #[test]
    fn wildcards_survive_lowering() {
        let q = select("SELECT T.*, x FROM T");
        assert_eq!(q.select.targets[0].expr.to_string(), "T.*");
        assert_eq!(q.select.targets[1].expr.to_string(), "x");
    }
}
