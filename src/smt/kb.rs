//! Conflict knowledge base.
//!
//! Each failed under-approximation is remembered as the negation of its
//! pinned choice-bit assignment, so later rounds never revisit the exact
//! combination.

use std::collections::BTreeMap;

use crate::smt::term::{ChoiceBit, TableId, Term};

#[derive(Debug, Default)]
pub struct KnowledgeBase {
    conflicts: Vec<(String, Term)>,
    next_id: usize,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `NOT(∧_t ∧_i choice(t, i) = v)` over the non-top positions of
    /// the given assignment. The conflict label carries the operator labels
    /// of the unsat core so a later core mentioning the conflict can be
    /// traced back to them.
    pub fn add_conflict(
        &mut self,
        assignment: &BTreeMap<TableId, Vec<ChoiceBit>>,
        core_labels: &[String],
    ) {
        if assignment.is_empty() {
            return;
        }
        let labels: Vec<&str> = core_labels
            .iter()
            .filter(|l| l.contains('$') && !l.contains("conflict"))
            .map(String::as_str)
            .collect();

        let mut per_table = Vec::new();
        for (table, vec) in assignment {
            let pinned: Vec<Term> = vec
                .iter()
                .enumerate()
                .filter_map(|(bit, b)| match b {
                    ChoiceBit::Val(v) => Some(Term::choice(*table, bit).eq(Term::Int(*v))),
                    ChoiceBit::Top => None,
                })
                .collect();
            per_table.push(Term::and(pinned));
        }

        self.next_id += 1;
        let name = format!("conflict{}_{}", self.next_id, labels.join("&"));
        self.conflicts.push((name, !Term::and(per_table)));
    }

    pub fn conflicts(&self) -> &[(String, Term)] {
        &self.conflicts
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Labels of the operators a conflict label was learned from
/// (`conflict3_filter$1&project$2` → `["filter$1", "project$2"]`).
pub fn conflict_source_labels(label: &str) -> Vec<String> {
    match label.split_once('_') {
        Some((_, rest)) => rest.split('&').map(str::to_string).collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_pin_only_non_top_bits() {
        let mut kb = KnowledgeBase::new();
        let mut assignment = BTreeMap::new();
        assignment.insert(
            3,
            vec![ChoiceBit::Val(1), ChoiceBit::Top, ChoiceBit::Val(0)],
        );
        kb.add_conflict(&assignment, &["filter$1".to_string(), "ic".to_string()]);

        assert_eq!(kb.len(), 1);
        let (name, term) = &kb.conflicts()[0];
        assert_eq!(name, "conflict1_filter$1");
        let printed = crate::smt::printer::print_term(term);
        assert!(printed.contains("(choice 3 0)"));
        assert!(!printed.contains("(choice 3 1)"));
        assert!(printed.contains("(choice 3 2)"));
    }

    #[test]
    fn empty_assignments_are_ignored() {
        let mut kb = KnowledgeBase::new();
        kb.add_conflict(&BTreeMap::new(), &["filter$1".to_string()]);
        assert!(kb.is_empty());
    }

    #[test]
    fn conflict_labels_round_trip() {
        assert_eq!(
            conflict_source_labels("conflict2_filter$1&inner_join$3"),
            vec!["filter$1".to_string(), "inner_join$3".to_string()]
        );
    }
}
