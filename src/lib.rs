//! Bounded equivalence checking of SQL queries.
//!
//! Given two queries, a schema with integrity constraints and a per-table
//! row bound, [Environment::check] either proves that no database within
//! the bounds distinguishes the queries or returns a concrete
//! counter-example database. [Environment::disambiguate] splits a set of
//! queries into equivalence classes witnessed by one database.
//!
//! ```ascii
//!          SQL text
//!
//!   (parse) │            sqlparser + the lowering in [parser]
//!           ▼
//!       operator AST     [ast], labeled by the initializer
//!           │
//!  (encode) │            per-operator formula builders in [encode]
//!           ▼
//!     labeled SMT-LIB    [smt], one assertion per operator label
//!           │
//!  (search) │            incremental under-approximation loop in [search]
//!           ▼
//!    EQU / NEQ + counter-example database
//! ```
//!
//! The solver is an external z3 process (any SMT-LIB v2 solver with models
//! and unsat cores works); checks run on a worker thread under a wall-clock
//! budget.
//!
//! ```no_run
//! use std::time::Duration;
//! use sqlsat::Environment;
//!
//! let schema = r#"[{
//!     "TableName": "Employees",
//!     "PKeys": [{"Name": "emp_id", "Type": "int"}],
//!     "FKeys": [],
//!     "Others": [{"Name": "name", "Type": "varchar"},
//!                {"Name": "age", "Type": "int"}]
//! }]"#;
//! let env = Environment::from_json(schema, "", 2, Duration::from_secs(60)).unwrap();
//! let report = env.check(
//!     "SELECT emp_id FROM Employees WHERE age > 30",
//!     "SELECT emp_id FROM Employees WHERE age >= 30",
//! );
//! println!("{}", report.verdict);
//! ```

pub mod ast;
pub mod constraint;
mod encode;
mod env;
mod error;
mod interner;
mod parser;
mod report;
mod schema;
mod search;
pub mod smt;

pub use constraint::Constraint;
pub use encode::Budgets;
pub use env::Environment;
pub use error::{Error, Reason, Result};
pub use parser::parse_query;
pub use report::{CheckReport, CounterExample, SearchStats, TableData, Value, Verdict};
pub use schema::{ColumnDef, ForeignKeyDef, SqlType, TableDef};
pub use search::{CoverStrategy, SearchMode};
