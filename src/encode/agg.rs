//! Aggregate folds.
//!
//! Row-level aggregation (a projection collapsing a table) and group-level
//! aggregation (folding over the grouping relation) differ only in what
//! "this row participates" means, so both encoders feed the same folds a
//! list of `(value, null, present)` triples, where `present` is the negated
//! deleted bit in the first case and the grouping bit in the second.

use crate::smt::term::Term;

#[derive(Debug, Clone)]
pub(crate) struct AggItem {
    pub val: Term,
    pub null: Term,
    pub present: Term,
}

fn absent_fold(items: &[AggItem]) -> Term {
    // null whenever every participating input is null (vacuously true when
    // nothing participates)
    Term::and(
        items
            .iter()
            .map(|item| item.present.clone().implies(item.null.clone()))
            .collect(),
    )
}

pub(crate) fn fold_max(items: &[AggItem]) -> (Term, Term) {
    fold_extremum(items, true)
}

pub(crate) fn fold_min(items: &[AggItem]) -> (Term, Term) {
    fold_extremum(items, false)
}

fn fold_extremum(items: &[AggItem], is_max: bool) -> (Term, Term) {
    let null = absent_fold(items);
    let Some(first) = items.first() else {
        return (Term::Int(0), Term::Bool(true));
    };
    let mut acc = first.clone();
    for item in &items[1..] {
        let x = acc;
        let y = item;
        // y wins when both participate, neither is null and y is on the
        // winning side, or when x is null and y is not
        let ordered = if is_max {
            x.val.clone().lte(y.val.clone())
        } else {
            x.val.clone().gte(y.val.clone())
        };
        let y_wins = Term::or(vec![
            Term::and(vec![
                ordered,
                !Term::or(vec![x.null.clone(), y.null.clone()]),
            ]),
            Term::and(vec![x.null.clone(), !y.null.clone()]),
        ]);
        let val = Term::ite(
            Term::and(vec![x.present.clone(), !y.present.clone()]),
            x.val.clone(),
            Term::ite(
                Term::and(vec![!x.present.clone(), y.present.clone()]),
                y.val.clone(),
                Term::ite(
                    Term::and(vec![x.present.clone(), y.present.clone()]),
                    Term::ite(y_wins, y.val.clone(), x.val.clone()),
                    Term::Int(0),
                ),
            ),
        );
        acc = AggItem {
            val,
            null: Term::and(vec![
                x.present.clone().implies(x.null.clone()),
                y.present.clone().implies(y.null.clone()),
            ]),
            present: Term::or(vec![x.present, y.present.clone()]),
        };
    }
    (acc.val, null)
}

pub(crate) fn fold_count(items: &[AggItem]) -> (Term, Term) {
    let val = Term::sum(items.iter().map(|item| {
        Term::indicator(Term::and(vec![
            item.present.clone(),
            !item.null.clone(),
        ]))
    }));
    (val, Term::Bool(false))
}

pub(crate) fn fold_count_distinct(items: &[AggItem]) -> (Term, Term) {
    let val = Term::sum(items.iter().enumerate().map(|(idx, item)| {
        Term::indicator(Term::and(vec![
            item.present.clone(),
            !item.null.clone(),
            unseen_so_far(items, idx),
        ]))
    }));
    (val, Term::Bool(false))
}

pub(crate) fn fold_sum(items: &[AggItem]) -> (Term, Term) {
    let val = Term::sum(items.iter().map(|item| {
        Term::ite(
            Term::and(vec![item.present.clone(), !item.null.clone()]),
            item.val.clone(),
            Term::Int(0),
        )
    }));
    (val, absent_fold(items))
}

pub(crate) fn fold_sum_distinct(items: &[AggItem]) -> (Term, Term) {
    let val = Term::sum(items.iter().enumerate().map(|(idx, item)| {
        Term::ite(
            Term::and(vec![
                item.present.clone(),
                !item.null.clone(),
                unseen_so_far(items, idx),
            ]),
            item.val.clone(),
            Term::Int(0),
        )
    }));
    (val, absent_fold(items))
}

pub(crate) fn fold_avg(items: &[AggItem]) -> (Term, Term) {
    let (sum, _) = fold_sum(items);
    let (count, _) = fold_count(items);
    (sum / count, absent_fold(items))
}

pub(crate) fn fold_avg_distinct(items: &[AggItem]) -> (Term, Term) {
    let (sum, _) = fold_sum_distinct(items);
    let (count, _) = fold_count_distinct(items);
    (sum / count, absent_fold(items))
}

/// The item's value differs from every participating non-null value before
/// it, so DISTINCT folds count/add each value once.
fn unseen_so_far(items: &[AggItem], idx: usize) -> Term {
    Term::and(
        items[..idx]
            .iter()
            .map(|prev| {
                Term::and(vec![prev.present.clone(), !prev.null.clone()])
                    .implies(items[idx].val.clone().ne(prev.val.clone()))
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::printer::print_term;
    use crate::smt::term::TermType;

    fn item(table: i64, row: usize) -> AggItem {
        AggItem {
            val: Term::cell(table, row, 0),
            null: Term::null(table, row, 0),
            present: !Term::deleted(table, row),
        }
    }

    #[test]
    fn count_is_never_null() {
        let items = vec![item(1, 0), item(1, 1)];
        let (val, null) = fold_count(&items);
        assert_eq!(val.ty(), TermType::Int);
        assert_eq!(null, Term::Bool(false));
    }

    #[test]
    fn sum_is_null_when_all_inputs_are_absent_or_null() {
        let items = vec![item(1, 0)];
        let (_, null) = fold_sum(&items);
        let printed = print_term(&null);
        assert!(printed.contains("(null 1 0 0)"));
        assert!(printed.contains("=>"));
    }

    #[test]
    fn distinct_count_compares_against_earlier_values() {
        let items = vec![item(1, 0), item(1, 1)];
        let (val, _) = fold_count_distinct(&items);
        let printed = print_term(&val);
        assert!(printed.contains("(distinct (cell 1 1 0) (cell 1 0 0))"));
    }

    #[test]
    fn extrema_of_empty_inputs_are_null() {
        let (_, null) = fold_max(&[]);
        assert_eq!(null, Term::Bool(true));
    }

    #[test]
    fn avg_divides_sum_by_count() {
        let items = vec![item(1, 0)];
        let (val, _) = fold_avg(&items);
        assert!(print_term(&val).starts_with("(div "));
    }
}
