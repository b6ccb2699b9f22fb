//! Formula manager (the labeled assertion set).
//!
//! Owns every assertion produced by the encoders, keyed by label, in a
//! stable insertion order so repeated dumps are byte-identical and unsat
//! cores stay interpretable. Also owns the current under-approximation, the
//! conflict knowledge base and the label↔table-id index the search engine
//! pivots on.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::debug;

use crate::schema::Database;
use crate::smt::kb::KnowledgeBase;
use crate::smt::printer::{print_assert, print_term};
use crate::smt::term::{ChoiceBit, TableId, Term};

/// Labels of operator assertions contain `$`; everything else (scan,
/// integrity, size caps, the output-inequality assertion) is always in force.
pub fn is_operator_label(label: &str) -> bool {
    label.contains('$')
}

#[derive(Debug, Default)]
pub struct FormulaManager {
    /// Insertion order of labels; `dump` iterates this.
    order: Vec<String>,
    terms: HashMap<String, Term>,
    /// Printed text per label; operator and schema-level assertions never
    /// change between rounds, so their text is rendered once.
    print_cache: HashMap<String, String>,
    next_anon: usize,
    next_node_id: usize,

    /// Operator labels currently asserted (the considered set `M`).
    pub considered: BTreeSet<String>,
    /// Current under-approximation: per table, a pinned choice vector.
    pub current_under: BTreeMap<TableId, Vec<ChoiceBit>>,
    pub kb: KnowledgeBase,

    /// Per-label under-approximation budget `k` assigned by the initializer.
    pub under_config: HashMap<String, usize>,
    /// Approximated output table → its logical original.
    pub under_to_original: HashMap<TableId, TableId>,
    /// Built once after encoding: operator label → (original) table id.
    pub label_to_table: BTreeMap<String, TableId>,
}

const UNDER_LABEL: &str = "under";

impl FormulaManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an assertion under the given label; a repeated label conjoins
    /// with what is already there.
    pub fn append(&mut self, term: Term, label: Option<&str>) {
        let label = match label {
            Some(l) => l.to_string(),
            None => {
                let l = format!("f_{}", self.next_anon);
                self.next_anon += 1;
                l
            }
        };
        match self.terms.get_mut(&label) {
            Some(existing) => {
                let prior = std::mem::replace(existing, Term::Bool(true));
                *existing = Term::and(vec![prior, term]);
                self.print_cache.remove(&label);
            }
            None => {
                self.order.push(label.clone());
                self.terms.insert(label, term);
            }
        }
    }

    /// Replaces the assertion under a label (used for the mutable
    /// under-approximation conjunct).
    pub fn set(&mut self, label: &str, term: Term) {
        if !self.terms.contains_key(label) {
            self.order.push(label.to_string());
        }
        self.terms.insert(label.to_string(), term);
        self.print_cache.remove(label);
    }

    pub fn remove(&mut self, label: &str) {
        if self.terms.remove(label).is_some() {
            self.order.retain(|l| l != label);
            self.print_cache.remove(label);
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.terms.contains_key(label)
    }

    /// Labels in insertion order.
    pub fn labels(&self) -> &[String] {
        &self.order
    }

    pub fn next_node_id(&mut self) -> usize {
        self.next_node_id += 1;
        self.next_node_id
    }

    /// Number of operator nodes with a choice vector; reported as the AST
    /// size statistic.
    pub fn ast_size(&self) -> usize {
        self.label_to_table.len()
    }

    /// Builds the label → table-id index from the registered tables,
    /// redirecting approximated outputs to their logical originals.
    pub fn init_label_index(&mut self, db: &Database) {
        let mut index = BTreeMap::new();
        for table in db.tables() {
            if table.lineage.is_base() {
                continue;
            }
            let table_id = *self
                .under_to_original
                .get(&table.table_id)
                .unwrap_or(&table.table_id);
            for label in &table.op_labels {
                index.insert(label.clone(), table_id);
            }
        }
        debug!("label index: {index:?}");
        self.label_to_table = index;
    }

    /// Re-encodes `current_under` as the `under` conjunct: one
    /// `choice(t, i) = v` per pinned bit.
    pub fn encode_current_under(&mut self) {
        if self.current_under.is_empty() {
            self.remove(UNDER_LABEL);
            return;
        }
        let mut pins = Vec::new();
        for (table, vec) in &self.current_under {
            for (bit, value) in vec.iter().enumerate() {
                if let ChoiceBit::Val(v) = value {
                    pins.push(Term::choice(*table, bit).eq(Term::Int(*v)));
                }
            }
        }
        self.set(UNDER_LABEL, Term::and(pins));
    }

    /// Learns the current assignment of the core's tables as a conflict.
    pub fn learn_conflict(&mut self, core: &[String]) {
        let mut assignment = BTreeMap::new();
        for label in core {
            let Some(table_id) = self.label_to_table.get(label) else {
                continue;
            };
            if let Some(vec) = self.current_under.get(table_id) {
                assignment.insert(*table_id, vec.clone());
            }
        }
        debug!("learning conflict over {:?} from core {core:?}", assignment.keys());
        self.kb.add_conflict(&assignment, core);
    }

    /// Renders the assertion block: every considered (or always-on) label in
    /// insertion order, then every learned conflict.
    pub fn dump(&mut self) -> String {
        let mut out = String::new();
        for label in &self.order {
            if is_operator_label(label) && !self.considered.contains(label) {
                continue;
            }
            let term = &self.terms[label];
            // operator/scan/ic/neq bodies never change between rounds
            let cacheable = is_operator_label(label)
                || label.starts_with("scan")
                || label == "ic"
                || label == "neq"
                || label == "disambiguation";
            let body = if cacheable {
                self.print_cache
                    .entry(label.clone())
                    .or_insert_with(|| print_term(term))
                    .clone()
            } else {
                print_term(term)
            };
            out.push_str(&print_assert(label, &body));
            out.push('\n');
        }
        for (name, term) in self.kb.conflicts() {
            out.push_str(&print_assert(name, &print_term(term)));
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_conjoins_on_duplicate_labels() {
        let mut m = FormulaManager::new();
        m.append(Term::deleted(1, 0), Some("scan_t"));
        m.append(Term::deleted(1, 1), Some("scan_t"));
        assert_eq!(m.labels(), &["scan_t".to_string()]);
        let dump = m.dump();
        assert!(dump.contains("(and (deleted 1 0) (deleted 1 1))"));
    }

    #[test]
    fn operator_labels_are_gated_by_the_considered_set() {
        let mut m = FormulaManager::new();
        m.append(Term::Bool(true), Some("ic"));
        m.append(Term::deleted(2, 0), Some("filter$1"));
        let dump = m.dump();
        assert!(dump.contains(":named ic"));
        assert!(!dump.contains("filter$1"));

        m.considered.insert("filter$1".to_string());
        assert!(m.dump().contains(":named filter$1"));
    }

    #[test]
    fn under_label_tracks_the_current_assignment() {
        let mut m = FormulaManager::new();
        m.current_under
            .insert(4, vec![ChoiceBit::Val(1), ChoiceBit::Top]);
        m.encode_current_under();
        let dump = m.dump();
        assert!(dump.contains(":named under"));
        assert!(dump.contains("(= (choice 4 0) 1)"));
        assert!(!dump.contains("(choice 4 1)"));

        m.current_under.clear();
        m.encode_current_under();
        assert!(!m.dump().contains(":named under"));
    }

    #[test]
    fn dump_order_is_stable() {
        let mut m = FormulaManager::new();
        m.append(Term::Bool(true), Some("ic"));
        m.append(Term::Bool(true), Some("neq"));
        m.append(Term::Bool(true), Some("scan_a"));
        let first = m.dump();
        let second = m.dump();
        assert_eq!(first, second);
        let ic = first.find("ic").unwrap_or(usize::MAX);
        let neq = first.find("neq").unwrap_or(usize::MAX);
        assert!(ic < neq);
    }

    #[test]
    fn anonymous_labels_are_generated() {
        let mut m = FormulaManager::new();
        m.append(Term::Bool(true), None);
        m.append(Term::Bool(true), None);
        assert_eq!(m.labels(), &["f_0".to_string(), "f_1".to_string()]);
    }
}
