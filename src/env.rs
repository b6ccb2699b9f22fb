//! Query orchestrator.
//!
//! [Environment] holds the schema, the parsed constraints and the budgets;
//! each `check`/`disambiguate` call builds a fresh [Session], runs encoding
//! and search on a worker thread, and enforces the wall-clock budget by
//! abandoning the worker when the deadline passes (the solver's own `-T`
//! cap bounds whatever round-trip is still in flight).

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::debug;

use crate::ast::{Expr, QueryExpr};
use crate::constraint::{parse_constraints, Constraint};
use crate::encode::expr::RowEncoder;
use crate::encode::init::init_query;
use crate::encode::order_by::sort_cell;
use crate::encode::query::encode_query;
use crate::encode::{Budgets, Session};
use crate::error::{downcast, Error};
use crate::parser::parse_query;
use crate::report::{CheckReport, CounterExample, SearchStats};
use crate::schema::{Lineage, TableDef, TableSchema};
use crate::search::{run_search, CoverStrategy, SearchMode};
use crate::smt::term::{TableId, Term};
use crate::smt::Solver;

/// Number of equivalence classes the disambiguation mode separates queries
/// into.
const DISAMBIGUATION_GROUPS: usize = 2;

pub struct Environment {
    schema: Vec<TableDef>,
    constraints: Vec<Constraint>,
    bound: usize,
    time_budget: Duration,
    budgets: Budgets,
    mode: SearchMode,
    cover_strategy: CoverStrategy,
    solver_path: String,
}

impl Environment {
    /// `bound` is the per-table row budget; `time_budget` caps the wall
    /// clock of each check.
    pub fn new(
        schema: Vec<TableDef>,
        constraints: &str,
        bound: usize,
        time_budget: Duration,
    ) -> Result<Self> {
        if bound == 0 {
            return Err(Error::simple("row bound must be at least 1").into());
        }
        let constraints = parse_constraints(constraints)?;
        Ok(Environment {
            schema,
            constraints,
            bound,
            time_budget,
            budgets: Budgets::default(),
            mode: SearchMode::Incremental,
            cover_strategy: CoverStrategy::default(),
            solver_path: "z3".to_string(),
        })
    }

    /// Like [Environment::new], with the schema given as its JSON encoding.
    pub fn from_json(
        schema_json: &str,
        constraints: &str,
        bound: usize,
        time_budget: Duration,
    ) -> Result<Self> {
        let schema: Vec<TableDef> = serde_json::from_str(schema_json)
            .map_err(|e| Error::simple(format!("invalid schema: {e}")))?;
        Environment::new(schema, constraints, bound, time_budget)
    }

    pub fn with_search_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_budgets(mut self, budgets: Budgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// How backtracking covers leave choice bits free.
    pub fn with_cover_strategy(mut self, strategy: CoverStrategy) -> Self {
        self.cover_strategy = strategy;
        self
    }

    /// Path of the SMT-LIB v2 solver executable (z3 by default).
    pub fn with_solver_path<S: Into<String>>(mut self, path: S) -> Self {
        self.solver_path = path.into();
        self
    }

    /// Decides bounded equivalence of two queries: `EQU` when no database
    /// within the bounds distinguishes them, otherwise `NEQ` with a
    /// counter-example database.
    pub fn check(&self, q1: &str, q2: &str) -> CheckReport {
        let queries = match [q1, q2]
            .iter()
            .map(|sql| parse_query(sql))
            .collect::<Result<Vec<_>>>()
        {
            Ok(queries) => queries,
            Err(e) => return CheckReport::error(downcast(e)),
        };
        self.run(queries, Task::Check)
    }

    /// Splits a set of queries into two equivalence classes witnessed by a
    /// single database; classes must balance within `group_range`.
    pub fn disambiguate(&self, queries: &[&str], group_range: usize) -> CheckReport {
        let queries = match queries
            .iter()
            .map(|sql| parse_query(sql))
            .collect::<Result<Vec<_>>>()
        {
            Ok(queries) => queries,
            Err(e) => return CheckReport::error(downcast(e)),
        };
        self.run(queries, Task::Disambiguate { group_range })
    }

    fn run(&self, queries: Vec<QueryExpr>, task: Task) -> CheckReport {
        let session = match Session::new(&self.schema, &self.constraints, self.bound, self.budgets)
        {
            Ok(session) => session,
            Err(e) => return CheckReport::error(downcast(e)),
        };
        let mode = self.mode;
        let strategy = self.cover_strategy;
        let solver_path = self.solver_path.clone();
        let budget_secs = self.time_budget.as_secs().max(1);

        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("sqlsat-worker".to_string())
            .spawn(move || {
                let report =
                    execute(session, queries, task, mode, strategy, &solver_path, budget_secs);
                let _ = tx.send(report);
            });
        if let Err(e) = spawned {
            return CheckReport::error(format!("failed to spawn worker: {e}"));
        }

        match rx.recv_timeout(self.time_budget) {
            Ok(report) => report,
            Err(_) => CheckReport::timeout(SearchStats::default()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Task {
    Check,
    Disambiguate { group_range: usize },
}

/// The worker body: initialize labels, encode every query, assert the
/// distinguishing condition, search, and read back the model.
fn execute(
    mut sess: Session,
    mut queries: Vec<QueryExpr>,
    task: Task,
    mode: SearchMode,
    strategy: CoverStrategy,
    solver_path: &str,
    budget_secs: u64,
) -> CheckReport {
    let start = Instant::now();
    let mut stats = SearchStats::default();

    for query in &mut queries {
        let budgets = sess.budgets;
        init_query(&mut sess.formulas, &budgets, query);
    }

    let encoded = (|| -> Result<Vec<TableId>> {
        let mut outputs = Vec::with_capacity(queries.len());
        for (query_id, query) in queries.iter().enumerate() {
            sess.curr_query = Some(query_id);
            outputs.push(encode_query(&mut sess, query, None)?);
        }
        match task {
            Task::Check => {
                let [o1, o2] = outputs.as_slice() else {
                    return Err(Error::internal("check needs exactly two queries").into());
                };
                let eq = output_eq(&mut sess, *o1, *o2)?;
                sess.formulas.append(!eq, Some("neq"));
            }
            Task::Disambiguate { group_range } => {
                let condition = disambiguation_condition(&mut sess, &outputs, group_range)?;
                sess.formulas.append(condition, Some("disambiguation"));
            }
        }
        Ok(outputs)
    })();
    let outputs = match encoded {
        Ok(outputs) => outputs,
        Err(e) => return CheckReport::error(downcast(e)),
    };

    let mut solver = Solver::new(solver_path, budget_secs);
    let found = match run_search(&mut sess, &mut solver, &outputs, mode, strategy, &mut stats) {
        Ok(found) => found,
        Err(e) => return CheckReport::error(downcast(e)),
    };
    stats.total_time = start.elapsed().as_secs_f64();

    if !found {
        return CheckReport::equivalent(stats);
    }

    match read_counter_example(&mut sess, &mut solver, &outputs) {
        Ok(cex) => CheckReport::not_equivalent(cex, stats),
        Err(e) => CheckReport::error(downcast(e)),
    }
}

/// The counter-example is the model's assignment of the schema tables.
fn read_counter_example(
    sess: &mut Session,
    solver: &mut Solver,
    outputs: &[TableId],
) -> Result<CounterExample> {
    for output in outputs {
        let table = sess.db.table(*output).clone();
        debug!(
            "output T{}: {:?}",
            output,
            solver.evaluate_table(&table, &sess.interner)?
        );
    }
    let mut cex = CounterExample::new();
    for table_id in sess.base_tables.clone() {
        let table = sess.db.table(table_id).clone();
        let data = solver.evaluate_table(&table, &sess.interner)?;
        cex.insert(table.table_name.clone(), data);
    }
    debug!("counter-example: {cex:?}");
    Ok(cex)
}

/// Bag equality of two operator outputs: equal multiplicities for every
/// tuple (NULLs comparing equal), equal sizes; width-mismatched outputs are
/// equal only when both are empty. When both outputs carry a sort, the sort
/// expressions must additionally agree position by position.
pub(crate) fn output_eq(sess: &mut Session, o1: TableId, o2: TableId) -> Result<Term> {
    let t1 = sess.db.table(o1).clone();
    let t2 = sess.db.table(o2).clone();

    let size_of = |t: &TableSchema| {
        Term::sum((0..t.bound).map(|row| Term::indicator(!Term::deleted(t.table_id, row))))
    };
    let o1_size = size_of(&t1);
    let o2_size = size_of(&t2);

    if t1.width() != t2.width() {
        return Ok(Term::and(vec![
            o1_size.eq(Term::Int(0)),
            o2_size.eq(Term::Int(0)),
        ]));
    }

    // multiplicity of t1's `row` tuple within `within`
    let multiplicity = |within: &TableSchema, row: usize| {
        Term::sum((0..within.bound).map(|candidate| {
            let mut tuple_eq = vec![!Term::deleted(within.table_id, candidate)];
            for col in 0..t1.width() {
                let a_null = sess.null(within.table_id, candidate, col);
                let b_null = sess.null(t1.table_id, row, col);
                tuple_eq.push(Term::or(vec![
                    Term::and(vec![a_null.clone(), b_null.clone()]),
                    Term::and(vec![
                        !Term::or(vec![a_null, b_null]),
                        sess.cell(within.table_id, candidate, col)
                            .eq(sess.cell(t1.table_id, row, col)),
                    ]),
                ]));
            }
            Term::indicator(Term::and(tuple_eq))
        }))
    };

    let mut lateral = Vec::new();
    for row in 0..t1.bound {
        lateral.push((!Term::deleted(t1.table_id, row)).implies(
            multiplicity(&t1, row).eq(multiplicity(&t2, row)),
        ));
    }

    let mut f = vec![o1_size.eq(o2_size), Term::and(lateral)];

    if t1.lineage.is_sorted() && t2.lineage.is_sorted() {
        f.push(sorted_prefix_eq(sess, &t1, &t2)?);
    }
    Ok(Term::and(f))
}

/// List semantics: the sort expressions evaluate equal at every shared
/// output position.
fn sorted_prefix_eq(sess: &mut Session, t1: &TableSchema, t2: &TableSchema) -> Result<Term> {
    let exprs = t1.sort_exprs.clone().unwrap_or_default();
    let mut encoder1 = RowEncoder::single(sess, t1.table_id, None, None);
    let mut encoder2 = RowEncoder::single(sess, t2.table_id, None, None);

    let mut f = Vec::new();
    for row in 0..t1.bound.min(t2.bound) {
        for expr in &exprs {
            // qualifiers from the original query do not survive projection
            let expr = match expr {
                Expr::Attribute { name } => match name.split_once('.') {
                    Some((_, column)) => Expr::Attribute {
                        name: column.to_string(),
                    },
                    None => expr.clone(),
                },
                Expr::Literal(crate::ast::Literal::Bool(_)) => continue,
                other => other.clone(),
            };
            let (v1, n1) = sort_cell(sess, &mut encoder1, t1, &expr, row)?;
            let (v2, n2) = sort_cell(sess, &mut encoder2, t2, &expr, row)?;
            f.push((!Term::deleted(t1.table_id, row)).implies(Term::or(vec![
                Term::and(vec![n1.clone(), n2.clone()]),
                Term::and(vec![!Term::or(vec![n1, n2]), v1.eq(v2)]),
            ])));
        }
    }
    Ok(Term::and(f))
}

/// Every output belongs to exactly one of two groups; outputs agree with
/// their group's representative table, representatives differ, and groups
/// balance within `group_range`.
fn disambiguation_condition(
    sess: &mut Session,
    outputs: &[TableId],
    group_range: usize,
) -> Result<Term> {
    let max_bound = outputs
        .iter()
        .map(|o| sess.db.table(*o).bound)
        .max()
        .unwrap_or(1);
    let max_width = outputs
        .iter()
        .map(|o| sess.db.table(*o).width())
        .max()
        .unwrap_or(1);

    let mut groups = Vec::with_capacity(DISAMBIGUATION_GROUPS);
    for index in 0..DISAMBIGUATION_GROUPS {
        let table_id = sess.next_table_id();
        let mut table = TableSchema::new(
            table_id,
            &format!("!group_{index}!"),
            max_bound,
            Lineage::Helper,
        );
        for col in 0..max_width {
            table.columns.push(crate::schema::ColumnSchema::new(
                col,
                &col.to_string(),
                crate::schema::SqlType::Int,
                None,
            ));
        }
        sess.db.add_table(table);
        groups.push(table_id);
    }

    let mut conditions = Vec::new();
    for &output in outputs {
        conditions.push(Term::or(
            (0..DISAMBIGUATION_GROUPS)
                .map(|g| Term::belongs_to_group(output, g))
                .collect(),
        ));
        for (g, &group_table) in groups.iter().enumerate() {
            let eq = output_eq(sess, output, group_table)?;
            conditions.push(Term::belongs_to_group(output, g).implies(eq));
        }
        conditions.push(
            Term::sum(
                (0..DISAMBIGUATION_GROUPS)
                    .map(|g| Term::indicator(Term::belongs_to_group(output, g))),
            )
            .eq(Term::Int(1)),
        );
    }

    let share = outputs.len() / DISAMBIGUATION_GROUPS;
    let lower = share.saturating_sub(group_range).max(1) as i64;
    let upper = (share + group_range) as i64;
    for g in 0..DISAMBIGUATION_GROUPS {
        let members = Term::sum(
            outputs
                .iter()
                .map(|&output| Term::indicator(Term::belongs_to_group(output, g))),
        );
        conditions.push(Term::and(vec![
            members.clone().gte(Term::Int(lower)),
            members.lte(Term::Int(upper)),
        ]));
    }

    for g in 0..DISAMBIGUATION_GROUPS {
        for other in g + 1..DISAMBIGUATION_GROUPS {
            let eq = output_eq(sess, groups[g], groups[other])?;
            conditions.push(!eq);
        }
    }
    Ok(Term::and(conditions))
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("tables", &self.schema.len())
            .field("constraints", &self.constraints.len())
            .field("bound", &self.bound)
            .field("time_budget", &self.time_budget)
            .finish()
    }
}

// Folds worker failures into `ERR` verdicts at the API edge.
impl From<Error> for CheckReport {
    fn from(error: Error) -> Self {
        CheckReport::error(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Verdict;
    use crate::smt::printer::print_term;

    fn employee_schema() -> Vec<TableDef> {
        serde_json::from_str(
            r#"[{
                "TableName": "Employees",
                "PKeys": [{"Name": "emp_id", "Type": "int"}],
                "FKeys": [],
                "Others": [{"Name": "name", "Type": "varchar"},
                           {"Name": "age", "Type": "int"}]
            }]"#,
        )
        .unwrap()
    }

    fn encode_pair(sess: &mut Session, q1: &str, q2: &str) -> (TableId, TableId) {
        let mut queries = vec![parse_query(q1).unwrap(), parse_query(q2).unwrap()];
        for query in &mut queries {
            let budgets = sess.budgets;
            init_query(&mut sess.formulas, &budgets, query);
        }
        sess.curr_query = Some(0);
        let o1 = encode_query(sess, &queries[0], None).unwrap();
        sess.curr_query = Some(1);
        let o2 = encode_query(sess, &queries[1], None).unwrap();
        (o1, o2)
    }

    #[test]
    fn environments_reject_zero_bounds_and_bad_constraints() {
        assert!(Environment::new(employee_schema(), "", 0, Duration::from_secs(5)).is_err());
        assert!(Environment::new(employee_schema(), "garbage <-", 2, Duration::from_secs(5))
            .is_err());
        assert!(Environment::new(employee_schema(), "", 2, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn parse_errors_surface_as_err_verdicts() {
        let env = Environment::new(employee_schema(), "", 2, Duration::from_secs(5)).unwrap();
        let report = env.check("SELEC nonsense", "SELECT 1 FROM Employees");
        assert_eq!(report.verdict, Verdict::Error);
        assert!(report.message.is_some());
    }

    #[test]
    fn width_mismatched_outputs_are_equal_only_when_empty() {
        let mut sess = Session::new(&employee_schema(), &[], 2, Budgets::default()).unwrap();
        let (o1, o2) = encode_pair(
            &mut sess,
            "SELECT emp_id FROM Employees",
            "SELECT emp_id, age FROM Employees",
        );
        let eq = output_eq(&mut sess, o1, o2).unwrap();
        let printed = print_term(&eq);
        // both sizes pinned to zero
        assert!(printed.contains("(= (+"));
        assert!(!printed.contains("(grouping"));
    }

    #[test]
    fn same_width_outputs_compare_multiplicities() {
        let mut sess = Session::new(&employee_schema(), &[], 2, Budgets::default()).unwrap();
        let (o1, o2) = encode_pair(
            &mut sess,
            "SELECT emp_id FROM Employees WHERE age > 30",
            "SELECT emp_id FROM Employees WHERE age >= 30",
        );
        let eq = output_eq(&mut sess, o1, o2).unwrap();
        let printed = print_term(&eq);
        assert!(printed.contains("(ite"));
        assert!(printed.contains("(deleted"));
    }

    #[test]
    fn disambiguation_declares_group_membership() {
        let mut sess = Session::new(&employee_schema(), &[], 2, Budgets::default()).unwrap();
        let (o1, o2) = encode_pair(
            &mut sess,
            "SELECT emp_id FROM Employees",
            "SELECT emp_id FROM Employees WHERE age > 30",
        );
        let cond = disambiguation_condition(&mut sess, &[o1, o2], 1).unwrap();
        let printed = print_term(&cond);
        assert!(printed.contains("(belongs_to_group"));
    }
}
