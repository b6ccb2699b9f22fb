//! SMT-LIB v2 rendering of [Term]s.
//!
//! The session preamble declares the uninterpreted functions once; every
//! top-level assertion is labeled `(assert (! ... :named L))` so unsat cores
//! come back as label lists.

use super::term::Term;

/// Written at the start of every solver session. The `smt.*` options pin z3's
/// arithmetic solver and phase selection so models are reproducible run to
/// run.
pub const PREAMBLE: &str = "\
(set-logic QF_UFNIA)
(set-option :produce-models true)
(set-option :produce-unsat-cores true)
(set-option :smt.arith.solver 2)
(set-option :smt.arith.random_initial_value true)
(set-option :smt.phase_selection 2)
(declare-fun cell (Int Int Int) Int)
(declare-fun null (Int Int Int) Bool)
(declare-fun grouping (Int Int Int) Bool)
(declare-fun deleted (Int Int) Bool)
(declare-fun choice (Int Int) Int)
(declare-fun size (Int) Int)
(declare-fun belongs_to_group (Int Int) Bool)
";

pub fn print_term(term: &Term) -> String {
    let mut out = String::new();
    write_term(term, &mut out);
    out
}

pub fn print_assert(label: &str, body: &str) -> String {
    format!("(assert (! {body} :named {label}))")
}

fn write_int(v: i64, out: &mut String) {
    // SMT-LIB has no negative numerals; emit an application of unary minus.
    if v < 0 {
        out.push_str("(- ");
        out.push_str(&v.unsigned_abs().to_string());
        out.push(')');
    } else {
        out.push_str(&v.to_string());
    }
}

fn write_term(term: &Term, out: &mut String) {
    match term {
        Term::Int(v) => write_int(*v, out),
        Term::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Term::Cell { table, row, col } => {
            out.push_str("(cell ");
            write_int(*table, out);
            out.push(' ');
            write_int(*row, out);
            out.push(' ');
            write_int(*col, out);
            out.push(')');
        }
        Term::Null { table, row, col } => {
            out.push_str("(null ");
            write_int(*table, out);
            out.push(' ');
            write_int(*row, out);
            out.push(' ');
            write_int(*col, out);
            out.push(')');
        }
        Term::Grouping { table, row, group } => {
            out.push_str("(grouping ");
            write_int(*table, out);
            out.push(' ');
            write_int(*row, out);
            out.push(' ');
            write_int(*group, out);
            out.push(')');
        }
        Term::Deleted { table, row } => {
            out.push_str("(deleted ");
            write_int(*table, out);
            out.push(' ');
            write_int(*row, out);
            out.push(')');
        }
        Term::Choice { table, bit } => {
            out.push_str("(choice ");
            write_int(*table, out);
            out.push(' ');
            write_int(*bit, out);
            out.push(')');
        }
        Term::Size { table } => {
            out.push_str("(size ");
            write_int(*table, out);
            out.push(')');
        }
        Term::BelongsToGroup { output, group } => {
            out.push_str("(belongs_to_group ");
            write_int(*output, out);
            out.push(' ');
            write_int(*group, out);
            out.push(')');
        }
        Term::Not(inner) => {
            out.push_str("(not ");
            write_term(inner, out);
            out.push(')');
        }
        Term::And(conjuncts) => {
            if conjuncts.is_empty() {
                out.push_str("true");
                return;
            }
            out.push_str("(and");
            for c in conjuncts {
                out.push(' ');
                write_term(c, out);
            }
            out.push(')');
        }
        Term::Or(disjuncts) => {
            if disjuncts.is_empty() {
                out.push_str("false");
                return;
            }
            out.push_str("(or");
            for d in disjuncts {
                out.push(' ');
                write_term(d, out);
            }
            out.push(')');
        }
        Term::Xor(a, b) => {
            out.push_str("(xor ");
            write_term(a, out);
            out.push(' ');
            write_term(b, out);
            out.push(')');
        }
        Term::Implies(premise, conclusion) => {
            out.push_str("(=> ");
            write_term(premise, out);
            out.push(' ');
            write_term(conclusion, out);
            out.push(')');
        }
        Term::Ite(cond, then, otherwise) => {
            out.push_str("(ite ");
            write_term(cond, out);
            out.push(' ');
            write_term(then, out);
            out.push(' ');
            write_term(otherwise, out);
            out.push(')');
        }
        Term::Cmp(op, a, b) => {
            out.push('(');
            out.push_str(&op.to_string());
            out.push(' ');
            write_term(a, out);
            out.push(' ');
            write_term(b, out);
            out.push(')');
        }
        Term::Arith(op, a, b) => {
            out.push('(');
            out.push_str(&op.to_string());
            out.push(' ');
            write_term(a, out);
            out.push(' ');
            write_term(b, out);
            out.push(')');
        }
        Term::Neg(inner) => {
            out.push_str("(- ");
            write_term(inner, out);
            out.push(')');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;

    #[test]
    fn prints_uninterpreted_applications() {
        assert_snapshot!(print_term(&Term::cell(2, 1, 0)), @"(cell 2 1 0)");
        assert_snapshot!(print_term(&Term::deleted(3, 1)), @"(deleted 3 1)");
        assert_snapshot!(print_term(&Term::choice(-4, 2)), @"(choice (- 4) 2)");
    }

    #[test]
    fn prints_connectives() {
        let t = Term::and(vec![
            Term::null(1, 0, 0),
            Term::cell(1, 0, 0).eq(Term::Int(-5)),
        ]);
        assert_snapshot!(print_term(&t), @"(and (null 1 0 0) (= (cell 1 0 0) (- 5)))");

        let ite = Term::ite(Term::deleted(1, 0), Term::Int(0), Term::Int(1));
        assert_snapshot!(print_term(&ite), @"(ite (deleted 1 0) 0 1)");
    }

    #[test]
    fn empty_connectives_use_identities() {
        assert_snapshot!(print_term(&Term::And(vec![])), @"true");
        assert_snapshot!(print_term(&Term::Or(vec![])), @"false");
    }

    #[test]
    fn labeled_assertion() {
        let body = print_term(&Term::Bool(true));
        assert_snapshot!(print_assert("filter$1", &body), @"(assert (! true :named filter$1))");
    }

    #[test]
    fn sum_folds_left() {
        let s = Term::sum(vec![Term::Int(1), Term::Int(2), Term::Int(3)]);
        assert_snapshot!(print_term(&s), @"(+ (+ 1 2) 3)");
    }
}
