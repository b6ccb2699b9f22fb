//! Typed constraint terms over the uninterpreted cell/null/grouping/deleted/
//! choice/size symbols.
//!
//! A term is either Int- or Bool-sorted; [Term::ty] reports which. Arithmetic
//! composes through `std::ops` so encoder code reads close to the formulas it
//! emits; comparisons and connectives are plain constructors.

use std::ops;

use serde::Serialize;

/// Identifier of a (base or derived) symbolic table.
///
/// Negative ids address the auxiliary deleted-relation the group-by encoder
/// maintains for its pre-HAVING pass, so this stays a plain signed integer
/// rather than a newtype over `usize`.
pub type TableId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermType {
    Int,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CmpOp {
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "distinct")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ArithOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "div")]
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Int(i64),
    Bool(bool),
    /// `cell(table, row, col)`: the integer value of a cell.
    Cell {
        table: TableId,
        row: i64,
        col: i64,
    },
    /// `null(table, row, col)`: whether the cell is NULL. A true `null`
    /// masks whatever integer the matching `cell` holds.
    Null {
        table: TableId,
        row: i64,
        col: i64,
    },
    /// `grouping(table, row, group)`: input row membership in a group.
    Grouping {
        table: TableId,
        row: i64,
        group: i64,
    },
    /// `deleted(table, row)`: the row is logically absent.
    Deleted {
        table: TableId,
        row: i64,
    },
    /// `choice(table, bit)`: an operator's per-row decision variable.
    Choice {
        table: TableId,
        bit: i64,
    },
    /// Declared for solver compatibility; row counts are computed as sums of
    /// non-deleted indicators instead.
    Size {
        table: TableId,
    },
    /// Group-membership indicator used by the disambiguation mode.
    BelongsToGroup {
        output: TableId,
        group: i64,
    },
    Not(Box<Term>),
    And(Vec<Term>),
    Or(Vec<Term>),
    Xor(Box<Term>, Box<Term>),
    Implies(Box<Term>, Box<Term>),
    Ite(Box<Term>, Box<Term>, Box<Term>),
    Cmp(CmpOp, Box<Term>, Box<Term>),
    Arith(ArithOp, Box<Term>, Box<Term>),
    Neg(Box<Term>),
}

impl Term {
    pub fn ty(&self) -> TermType {
        match self {
            Term::Int(_)
            | Term::Cell { .. }
            | Term::Choice { .. }
            | Term::Size { .. }
            | Term::Arith(..)
            | Term::Neg(_) => TermType::Int,
            Term::Bool(_)
            | Term::Null { .. }
            | Term::Grouping { .. }
            | Term::Deleted { .. }
            | Term::BelongsToGroup { .. }
            | Term::Not(_)
            | Term::And(_)
            | Term::Or(_)
            | Term::Xor(..)
            | Term::Implies(..)
            | Term::Cmp(..) => TermType::Bool,
            Term::Ite(_, then, _) => then.ty(),
        }
    }

    pub fn cell(table: TableId, row: usize, col: usize) -> Term {
        Term::Cell {
            table,
            row: row as i64,
            col: col as i64,
        }
    }

    pub fn null(table: TableId, row: usize, col: usize) -> Term {
        Term::Null {
            table,
            row: row as i64,
            col: col as i64,
        }
    }

    pub fn grouping(table: TableId, row: usize, group: usize) -> Term {
        Term::Grouping {
            table,
            row: row as i64,
            group: group as i64,
        }
    }

    pub fn deleted(table: TableId, row: usize) -> Term {
        Term::Deleted {
            table,
            row: row as i64,
        }
    }

    pub fn choice(table: TableId, bit: usize) -> Term {
        Term::Choice {
            table,
            bit: bit as i64,
        }
    }

    pub fn belongs_to_group(output: TableId, group: usize) -> Term {
        Term::BelongsToGroup {
            output,
            group: group as i64,
        }
    }

    pub fn and(conjuncts: Vec<Term>) -> Term {
        Term::And(conjuncts)
    }

    pub fn or(disjuncts: Vec<Term>) -> Term {
        Term::Or(disjuncts)
    }

    pub fn implies(self, conclusion: Term) -> Term {
        Term::Implies(Box::new(self), Box::new(conclusion))
    }

    pub fn ite(cond: Term, then: Term, otherwise: Term) -> Term {
        Term::Ite(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn eq(self, other: Term) -> Term {
        Term::Cmp(CmpOp::Eq, Box::new(self), Box::new(other))
    }

    pub fn ne(self, other: Term) -> Term {
        Term::Cmp(CmpOp::Ne, Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: Term) -> Term {
        Term::Cmp(CmpOp::Lt, Box::new(self), Box::new(other))
    }

    pub fn lte(self, other: Term) -> Term {
        Term::Cmp(CmpOp::Lte, Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: Term) -> Term {
        Term::Cmp(CmpOp::Gt, Box::new(self), Box::new(other))
    }

    pub fn gte(self, other: Term) -> Term {
        Term::Cmp(CmpOp::Gte, Box::new(self), Box::new(other))
    }

    pub fn cmp(op: CmpOp, lhs: Term, rhs: Term) -> Term {
        Term::Cmp(op, Box::new(lhs), Box::new(rhs))
    }

    /// Left fold of `+`; the empty sum is `0`.
    pub fn sum<I: IntoIterator<Item = Term>>(items: I) -> Term {
        let mut iter = items.into_iter();
        match iter.next() {
            None => Term::Int(0),
            Some(first) => iter.fold(first, |acc, t| acc + t),
        }
    }

    /// `1` when the condition holds, `0` otherwise.
    pub fn indicator(cond: Term) -> Term {
        Term::ite(cond, Term::Int(1), Term::Int(0))
    }
}

/// Coerce a term to Int sort (bool becomes 0/1).
pub fn ensure_int(t: Term) -> Term {
    match t.ty() {
        TermType::Int => t,
        TermType::Bool => Term::ite(t, Term::Int(1), Term::Int(0)),
    }
}

/// Coerce a term to Bool sort (int becomes `≠ 0`).
pub fn ensure_bool(t: Term) -> Term {
    match t.ty() {
        TermType::Bool => t,
        TermType::Int => t.ne(Term::Int(0)),
    }
}

impl ops::Add for Term {
    type Output = Term;
    fn add(self, rhs: Term) -> Term {
        Term::Arith(ArithOp::Add, Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for Term {
    type Output = Term;
    fn sub(self, rhs: Term) -> Term {
        Term::Arith(ArithOp::Sub, Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for Term {
    type Output = Term;
    fn mul(self, rhs: Term) -> Term {
        Term::Arith(ArithOp::Mul, Box::new(self), Box::new(rhs))
    }
}

impl ops::Div for Term {
    type Output = Term;
    fn div(self, rhs: Term) -> Term {
        Term::Arith(ArithOp::Div, Box::new(self), Box::new(rhs))
    }
}

impl ops::Neg for Term {
    type Output = Term;
    fn neg(self) -> Term {
        Term::Neg(Box::new(self))
    }
}

impl ops::Not for Term {
    type Output = Term;
    fn not(self) -> Term {
        Term::Not(Box::new(self))
    }
}

/// One entry of an under-approximation choice vector: a pinned concrete value
/// or `T` ("top"), which leaves the bit free for the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChoiceBit {
    Val(i64),
    Top,
}

impl ChoiceBit {
    pub fn is_top(self) -> bool {
        matches!(self, ChoiceBit::Top)
    }
}

impl std::fmt::Display for ChoiceBit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChoiceBit::Val(v) => write!(f, "{v}"),
            ChoiceBit::Top => f.write_str("T"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_types() {
        assert_eq!(Term::cell(1, 0, 0).ty(), TermType::Int);
        assert_eq!(Term::null(1, 0, 0).ty(), TermType::Bool);
        assert_eq!((Term::Int(1) + Term::Int(2)).ty(), TermType::Int);
        assert_eq!(Term::Int(1).eq(Term::Int(2)).ty(), TermType::Bool);
        let ite = Term::ite(Term::Bool(true), Term::Int(1), Term::Int(0));
        assert_eq!(ite.ty(), TermType::Int);
    }

    #[test]
    fn coercions() {
        let b = Term::Bool(true);
        assert_eq!(ensure_int(b.clone()).ty(), TermType::Int);
        assert_eq!(ensure_bool(Term::Int(3)).ty(), TermType::Bool);
        // already the right sort: unchanged
        assert_eq!(ensure_bool(b.clone()), b);
    }

    #[test]
    fn empty_sum_is_zero() {
        assert_eq!(Term::sum(vec![]), Term::Int(0));
    }
}
