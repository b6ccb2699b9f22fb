//! Result types returned by [crate::Environment::check] and
//! [crate::Environment::disambiguate].

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

/// Outcome of one equivalence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
pub enum Verdict {
    /// No database within the bounds distinguishes the queries.
    #[strum(serialize = "EQU")]
    #[serde(rename = "EQU")]
    Equivalent,
    /// A counter-example database was found.
    #[strum(serialize = "NEQ")]
    #[serde(rename = "NEQ")]
    NotEquivalent,
    /// The wall-clock budget ran out first.
    #[strum(serialize = "TMO")]
    #[serde(rename = "TMO")]
    Timeout,
    #[strum(serialize = "ERR")]
    #[serde(rename = "ERR")]
    Error,
}

/// A decoded model value of one counter-example cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{d}"),
            Value::Time(t) => write!(f, "{t}"),
        }
    }
}

/// One table of a counter-example database. Serializes as a list whose first
/// element is the header row and whose remaining elements are value rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Serialize for TableData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(1 + self.rows.len()))?;
        seq.serialize_element(&self.columns)?;
        for row in &self.rows {
            seq.serialize_element(row)?;
        }
        seq.end()
    }
}

/// Counter-example database: schema-table name → contents.
pub type CounterExample = BTreeMap<String, TableData>;

/// Diagnostics gathered by the search engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchStats {
    /// Solver rounds issued.
    pub iters: u64,
    pub backtracks: u64,
    /// Backtracks whose unsat core included the output-inequality assertion.
    pub type2_backtracks: u64,
    /// Operator labels per unsat core, one entry per backtrack.
    pub unsat_core_sizes: Vec<usize>,
    /// Size of the considered set at each backtrack.
    pub considered_sizes: Vec<usize>,
    /// Solver wall time per satisfiable round, in seconds.
    pub solving_time_per_iter: Vec<f64>,
    /// Choice vectors changed by each successful backtrack.
    pub nodes_changed: Vec<usize>,
    /// Operator nodes carrying a choice vector.
    pub ast_size: usize,
    /// End-to-end time of the check, in seconds.
    pub total_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub verdict: Verdict,
    pub counter_example: Option<CounterExample>,
    /// Present when `verdict` is `Error`.
    pub message: Option<String>,
    pub stats: SearchStats,
}

impl CheckReport {
    pub fn equivalent(stats: SearchStats) -> Self {
        CheckReport {
            verdict: Verdict::Equivalent,
            counter_example: None,
            message: None,
            stats,
        }
    }

    pub fn not_equivalent(cex: CounterExample, stats: SearchStats) -> Self {
        CheckReport {
            verdict: Verdict::NotEquivalent,
            counter_example: Some(cex),
            message: None,
            stats,
        }
    }

    pub fn timeout(stats: SearchStats) -> Self {
        CheckReport {
            verdict: Verdict::Timeout,
            counter_example: None,
            message: None,
            stats,
        }
    }

    pub fn error(message: String) -> Self {
        CheckReport {
            verdict: Verdict::Error,
            counter_example: None,
            message: Some(message),
            stats: SearchStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_strings() {
        assert_eq!(Verdict::Equivalent.to_string(), "EQU");
        assert_eq!(Verdict::Timeout.to_string(), "TMO");
    }

    #[test]
    fn table_data_serializes_header_first() {
        let data = TableData {
            columns: vec!["emp_id".to_string(), "age".to_string()],
            rows: vec![vec![Value::Int(1), Value::Null]],
        };
        let json = serde_json::to_string(&data).unwrap();
        assert_eq!(json, r#"[["emp_id","age"],[1,null]]"#);
    }

    #[test]
    fn values_serialize_naturally() {
        let row = vec![
            Value::Str("alice".to_string()),
            Value::Bool(true),
            Value::Date(NaiveDate::from_ymd_opt(2020, 1, 2).unwrap()),
        ];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"["alice",true,"2020-01-02"]"#);
    }
}
