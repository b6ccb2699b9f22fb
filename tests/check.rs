//! End-to-end equivalence checks.
//!
//! The scenarios that drive a real solver are `#[ignore]`d so the suite
//! passes on machines without a z3 binary; run them with
//! `cargo test -- --ignored`.

use std::time::Duration;

use similar_asserts::assert_eq;
use sqlsat::{Environment, Value, Verdict};

fn employees_env() -> Environment {
    let schema = r#"[{
        "TableName": "Employees",
        "PKeys": [{"Name": "emp_id", "Type": "int"}],
        "FKeys": [],
        "Others": [{"Name": "name", "Type": "varchar"},
                   {"Name": "age", "Type": "int"}]
    }]"#;
    Environment::from_json(schema, "", 2, Duration::from_secs(120)).unwrap()
}

#[test]
#[ignore = "requires a z3 binary on PATH"]
fn s1_boundary_filter_is_distinguishable() {
    let env = employees_env();
    let report = env.check(
        "SELECT emp_id FROM Employees WHERE age > 30",
        "SELECT emp_id FROM Employees WHERE age >= 30",
    );
    assert_eq!(report.verdict, Verdict::NotEquivalent, "{:?}", report.message);

    // the witness database has an employee aged exactly 30
    let cex = report.counter_example.unwrap();
    let employees = &cex["employees"];
    let age_col = employees
        .columns
        .iter()
        .position(|c| c == "age")
        .unwrap();
    assert!(employees
        .rows
        .iter()
        .any(|row| row[age_col] == Value::Int(30)));
}

#[test]
#[ignore = "requires a z3 binary on PATH"]
fn s2_negated_complement_is_equivalent() {
    let env = employees_env();
    let report = env.check(
        "SELECT emp_id FROM Employees WHERE age > 30",
        "SELECT emp_id FROM Employees WHERE NOT (age <= 30)",
    );
    assert_eq!(report.verdict, Verdict::Equivalent, "{:?}", report.message);
}

#[test]
#[ignore = "requires a z3 binary on PATH"]
fn s3_aggregate_filter_boundary() {
    let schema = r#"[{
        "TableName": "Sales",
        "PKeys": [{"Name": "id", "Type": "int"}],
        "FKeys": [],
        "Others": [{"Name": "col_a", "Type": "int"},
                   {"Name": "col_b", "Type": "int"}]
    }]"#;
    let env = Environment::from_json(schema, "", 2, Duration::from_secs(120)).unwrap();
    let report = env.check(
        "SELECT SUM(col_a) FILTER (WHERE col_b > 10) FROM Sales",
        "SELECT SUM(col_a) FILTER (WHERE col_b >= 10) FROM Sales",
    );
    assert_eq!(report.verdict, Verdict::NotEquivalent, "{:?}", report.message);

    let cex = report.counter_example.unwrap();
    let sales = &cex["sales"];
    let col_b = sales.columns.iter().position(|c| c == "col_b").unwrap();
    assert!(sales.rows.iter().any(|row| row[col_b] == Value::Int(10)));
}

#[test]
#[ignore = "requires a z3 binary on PATH"]
fn s4_union_equals_distinct_over_union_all() {
    let schema = r#"[
        {"TableName": "R", "PKeys": [], "FKeys": [],
         "Others": [{"Name": "x", "Type": "int"}]},
        {"TableName": "S", "PKeys": [], "FKeys": [],
         "Others": [{"Name": "x", "Type": "int"}]}
    ]"#;
    let env = Environment::from_json(schema, "", 2, Duration::from_secs(120)).unwrap();
    let report = env.check(
        "SELECT x FROM R UNION SELECT x FROM S",
        "SELECT DISTINCT x FROM (SELECT x FROM R UNION ALL SELECT x FROM S) T",
    );
    assert_eq!(report.verdict, Verdict::Equivalent, "{:?}", report.message);
}

#[test]
#[ignore = "requires a z3 binary on PATH"]
fn s5_count_star_vs_count_column_differ_under_nulls() {
    let schema = r#"[{
        "TableName": "T", "PKeys": [], "FKeys": [],
        "Others": [{"Name": "a", "Type": "int"}, {"Name": "b", "Type": "int"}]
    }]"#;
    let env = Environment::from_json(schema, "", 2, Duration::from_secs(120)).unwrap();
    let report = env.check(
        "SELECT a FROM T GROUP BY a HAVING COUNT(*) > 1",
        "SELECT a FROM T GROUP BY a HAVING COUNT(b) > 1",
    );
    assert_eq!(report.verdict, Verdict::NotEquivalent, "{:?}", report.message);

    // witnessed by two rows sharing `a` with one null `b`
    let cex = report.counter_example.unwrap();
    let t = &cex["t"];
    let b = t.columns.iter().position(|c| c == "b").unwrap();
    assert!(t.rows.iter().any(|row| row[b] == Value::Null));
}

#[test]
#[ignore = "requires a z3 binary on PATH"]
fn s6_left_join_on_a_foreign_key_preserves_the_left_side() {
    let schema = r#"[
        {"TableName": "A", "PKeys": [{"Name": "x", "Type": "int"}],
         "FKeys": [], "Others": []},
        {"TableName": "B", "PKeys": [], "FKeys":
         [{"FName": "x", "PTable": 0, "PName": "x"}], "Others": []}
    ]"#;
    let env = Environment::from_json(schema, "", 2, Duration::from_secs(120)).unwrap();
    let report = env.check(
        "SELECT A.x FROM A LEFT JOIN B ON A.x = B.x",
        "SELECT A.x FROM A",
    );
    assert_eq!(report.verdict, Verdict::Equivalent, "{:?}", report.message);
}

#[test]
#[ignore = "requires a z3 binary on PATH"]
fn any_query_is_equivalent_to_itself() {
    let env = employees_env();
    for query in [
        "SELECT emp_id FROM Employees",
        "SELECT name FROM Employees WHERE age > 18 ORDER BY name",
        "SELECT age, COUNT(*) FROM Employees GROUP BY age",
        "SELECT DISTINCT age FROM Employees",
    ] {
        let report = env.check(query, query);
        assert_eq!(
            report.verdict,
            Verdict::Equivalent,
            "{query}: {:?}",
            report.message
        );
    }
}

#[test]
#[ignore = "requires a z3 binary on PATH"]
fn union_all_with_an_empty_query_is_identity() {
    let env = employees_env();
    let report = env.check(
        "SELECT emp_id FROM Employees UNION ALL SELECT emp_id FROM Employees WHERE 1 = 0",
        "SELECT emp_id FROM Employees",
    );
    assert_eq!(report.verdict, Verdict::Equivalent, "{:?}", report.message);
}

#[test]
#[ignore = "requires a z3 binary on PATH"]
fn distinct_is_idempotent() {
    let env = employees_env();
    let report = env.check(
        "SELECT DISTINCT age FROM (SELECT DISTINCT age FROM Employees) T",
        "SELECT DISTINCT age FROM Employees",
    );
    assert_eq!(report.verdict, Verdict::Equivalent, "{:?}", report.message);
}

#[test]
#[ignore = "requires a z3 binary on PATH"]
fn disambiguation_splits_inequivalent_queries() {
    let env = employees_env();
    let report = env.disambiguate(
        &[
            "SELECT emp_id FROM Employees WHERE age > 30",
            "SELECT emp_id FROM Employees WHERE age >= 30",
        ],
        1,
    );
    assert_eq!(report.verdict, Verdict::NotEquivalent, "{:?}", report.message);
    assert!(report.counter_example.is_some());
}

// ---------------------------------------------------------------------------
// No-solver behaviors

#[test]
fn unsupported_sql_reports_err_without_a_solver() {
    let env = employees_env();
    let report = env.check(
        "SELECT RANK() OVER (ORDER BY age) FROM Employees",
        "SELECT emp_id FROM Employees",
    );
    assert_eq!(report.verdict, Verdict::Error);
    assert!(report.message.unwrap().contains("window"));
}

#[test]
fn unknown_tables_report_err_without_a_solver() {
    let env = employees_env();
    let report = env.check("SELECT x FROM Missing", "SELECT x FROM Missing");
    assert_eq!(report.verdict, Verdict::Error);
}

#[test]
fn a_missing_solver_binary_reports_err() {
    let schema = r#"[{"TableName": "T", "PKeys": [], "FKeys": [],
                      "Others": [{"Name": "x", "Type": "int"}]}]"#;
    let env = Environment::from_json(schema, "", 2, Duration::from_secs(5))
        .unwrap()
        .with_solver_path("definitely-not-a-solver");
    let report = env.check("SELECT x FROM T", "SELECT x FROM T");
    assert_eq!(report.verdict, Verdict::Error);
}

#[test]
fn reports_serialize_with_spec_shaped_counter_examples() {
    let report = sqlsat::CheckReport::error("boom".to_string());
    let json = serde_json::to_string(&report).unwrap();
    assert_eq!(
        json,
        concat!(
            r#"{"verdict":"ERR","counter_example":null,"message":"boom","#,
            r#""stats":{"iters":0,"backtracks":0,"type2_backtracks":0,"#,
            r#""unsat_core_sizes":[],"considered_sizes":[],"#,
            r#""solving_time_per_iter":[],"nodes_changed":[],"ast_size":0,"#,
            r#""total_time":0.0}}"#
        )
    );
}
