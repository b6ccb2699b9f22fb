//! SMT layer: the term algebra, its SMT-LIB v2 printer, the labeled
//! assertion set, the conflict knowledge base, and the solver process
//! driver.

pub mod kb;
pub mod manager;
pub mod printer;
pub mod solver;
pub mod term;

pub use manager::FormulaManager;
pub use solver::Solver;
pub use term::{ChoiceBit, TableId, Term};
