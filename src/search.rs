//! Incremental under-approximation search.
//!
//! Rather than asserting every operator's full semantics at once, the search
//! starts from the root operators of each query, checks satisfiability, pins
//! the choice vectors the model chose, and expands one operator per frontier
//! side per round. An unsat round backtracks: the operators in the unsat
//! core get covers of partial assignments (some positions left free) whose
//! union subsumes everything tried so far, and every failing combination is
//! learned as a conflict.

use std::collections::BTreeSet;

use anyhow::Result;
use itertools::Itertools;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::encode::Session;
use crate::error::Error;
use crate::report::SearchStats;
use crate::schema::TableSchema;
use crate::smt::manager::is_operator_label;
use crate::smt::term::ChoiceBit;
use crate::smt::{kb, Solver};

/// Fixed seed for the sampled-tops cover strategy, so runs are reproducible.
const COVER_SAMPLE_SEED: u64 = 123_456;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// The incremental loop with conflict learning and backtracking.
    Incremental,
    /// Baseline: one pass over the cover product, no learning.
    Naive,
}

/// How a backtracking cover leaves choice positions free. The default pins
/// everything but a left prefix; the alternatives vary the number and
/// position of free bits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoverStrategy {
    /// The leftmost n positions are left free.
    LeftTops(usize),
    /// The rightmost n positions are left free.
    RightTops(usize),
    /// n positions on each flank are left free.
    Middle(usize),
    /// A seeded random fraction of positions is left free.
    Ratio(f64),
}

const NAIVE_STRATEGY: CoverStrategy = CoverStrategy::Ratio(0.25);

impl Default for CoverStrategy {
    fn default() -> Self {
        CoverStrategy::LeftTops(8)
    }
}

pub(crate) fn run_search(
    sess: &mut Session,
    solver: &mut Solver,
    outputs: &[crate::smt::term::TableId],
    mode: SearchMode,
    strategy: CoverStrategy,
    stats: &mut SearchStats,
) -> Result<bool> {
    sess.formulas.init_label_index(&sess.db);
    stats.ast_size = sess.formulas.ast_size();
    match mode {
        SearchMode::Incremental => search(sess, solver, outputs, strategy, stats),
        SearchMode::Naive => search_naive(sess, solver, stats),
    }
}

/// Operator labels in encoding order, split into one frontier segment per
/// query; each segment ends with its query's root label.
fn build_frontiers(
    sess: &Session,
    outputs: &[crate::smt::term::TableId],
) -> Result<Vec<Vec<String>>, Error> {
    let operator_labels: Vec<String> = sess
        .formulas
        .labels()
        .iter()
        .filter(|l| is_operator_label(l))
        .cloned()
        .collect();

    let mut segments = vec![operator_labels];
    for output in outputs {
        let root = sess
            .db
            .table(*output)
            .op_labels
            .last()
            .cloned()
            .ok_or_else(|| Error::internal("output table has no operator label"))?;
        let last = segments
            .pop()
            .ok_or_else(|| Error::internal("no labels to split"))?;
        let at = last
            .iter()
            .position(|l| *l == root)
            .ok_or_else(|| Error::internal(format!("root label `{root}` not encoded")))?;
        let (head, tail) = last.split_at(at + 1);
        segments.push(head.to_vec());
        segments.push(tail.to_vec());
    }
    segments.pop();
    Ok(segments)
}

fn search(
    sess: &mut Session,
    solver: &mut Solver,
    outputs: &[crate::smt::term::TableId],
    strategy: CoverStrategy,
    stats: &mut SearchStats,
) -> Result<bool> {
    // non-operator assertions (scans, integrity, size caps, inequality) are
    // always in force
    sess.formulas.considered = sess
        .formulas
        .labels()
        .iter()
        .filter(|l| !is_operator_label(l))
        .cloned()
        .collect();

    let mut remaining = build_frontiers(sess, outputs)?;
    debug!("frontier segments: {remaining:?}");
    let mut worklist: Vec<String> = Vec::new();

    if outputs.len() > 2 {
        // disambiguation: seed every root, then take the two outermost
        // queries wholesale
        for segment in &mut remaining {
            if let Some(root) = segment.pop() {
                sess.formulas.considered.insert(root.clone());
                worklist.push(root);
            }
        }
        if !remaining.is_empty() {
            for label in remaining.remove(0) {
                sess.formulas.considered.insert(label);
            }
        }
        if !remaining.is_empty() {
            let last = remaining.len() - 1;
            for label in remaining.remove(last) {
                sess.formulas.considered.insert(label);
            }
        }
    } else {
        for segment in &mut remaining {
            if let Some(root) = segment.pop() {
                sess.formulas.considered.insert(root.clone());
                worklist.push(root);
            }
        }
    }
    remaining.retain(|segment| !segment.is_empty());

    while !worklist.is_empty() {
        stats.iters += 1;
        sess.formulas.encode_current_under();
        debug!("current under: {:?}", sess.formulas.current_under);

        let dump = sess.formulas.dump();
        if !solver.check(&dump)? {
            record_backtrack_stats(sess, solver, stats);
            let core = expand_conflict_labels(&solver.unsat_core);
            sess.formulas.learn_conflict(&core);
            if !backtrack(sess, solver, &core, strategy, stats)? {
                debug!("backtrack exhausted; no distinguishing database");
                return Ok(false);
            }
            continue;
        }
        stats.solving_time_per_iter.push(solver.last_check_secs);

        // pin what the model decided for the labels added last round
        for label in &worklist {
            pin_choice_vector(sess, solver, label)?;
        }
        worklist.clear();

        // expand: one label from each end of the frontier
        if let Some(segment) = remaining.first_mut() {
            if let Some(label) = segment.pop() {
                sess.formulas.considered.insert(label.clone());
                worklist.push(label);
            }
        }
        remaining.retain(|segment| !segment.is_empty());
        if remaining.len() > 1 || (remaining.len() == 1 && worklist.is_empty()) {
            if let Some(segment) = remaining.last_mut() {
                if let Some(label) = segment.pop() {
                    sess.formulas.considered.insert(label.clone());
                    worklist.push(label);
                }
            }
            remaining.retain(|segment| !segment.is_empty());
        }
    }

    debug!("final under: {:?}", sess.formulas.current_under);
    debug!("backtracks: {}", stats.backtracks);
    Ok(true)
}

fn record_backtrack_stats(sess: &Session, solver: &Solver, stats: &mut SearchStats) {
    stats.backtracks += 1;
    stats.unsat_core_sizes.push(
        solver
            .unsat_core
            .iter()
            .filter(|l| is_operator_label(l))
            .count(),
    );
    stats.considered_sizes.push(
        sess.formulas
            .considered
            .iter()
            .filter(|l| is_operator_label(l))
            .count(),
    );
    if solver
        .unsat_core
        .iter()
        .any(|l| l == "neq" || l == "disambiguation")
    {
        stats.type2_backtracks += 1;
    }
}

/// Conflict labels in a core stand for the operator labels they were learned
/// from.
fn expand_conflict_labels(core: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for label in core {
        if label.contains("conflict") {
            out.extend(kb::conflict_source_labels(label));
        } else {
            out.push(label.clone());
        }
    }
    out
}

fn pin_choice_vector(sess: &mut Session, solver: &mut Solver, label: &str) -> Result<()> {
    let Some(table_id) = sess.formulas.label_to_table.get(label).copied() else {
        return Ok(());
    };
    let table = sess.db.table(table_id).clone();
    let vector = solver.evaluate_choice_vector(&table)?;
    sess.formulas.current_under.insert(table_id, vector);
    Ok(())
}

/// Retry the unsat core alone under progressively freer covers; the first
/// satisfiable combination wins. Every failing combination is learned.
fn backtrack(
    sess: &mut Session,
    solver: &mut Solver,
    core: &[String],
    strategy: CoverStrategy,
    stats: &mut SearchStats,
) -> Result<bool> {
    debug!("backtracking over core {core:?}");
    let prev_considered = sess.formulas.considered.clone();
    let prev_under = sess.formulas.current_under.clone();
    sess.formulas.current_under.clear();
    sess.formulas.considered = core.iter().cloned().collect::<BTreeSet<_>>();

    // one cover per distinct table in the core
    let mut tables = Vec::new();
    let mut covers = Vec::new();
    for label in core {
        let Some(table_id) = sess.formulas.label_to_table.get(label).copied() else {
            continue;
        };
        if tables.contains(&table_id) {
            continue;
        }
        tables.push(table_id);
        covers.push(cover_assignments(
            &sess.db.table(table_id).clone(),
            strategy,
        ));
    }
    if covers.is_empty() {
        return Ok(false);
    }

    for combination in covers.into_iter().multi_cartesian_product() {
        sess.formulas.current_under = tables.iter().copied().zip(combination).collect();
        debug!("trying cover {:?}", sess.formulas.current_under);
        sess.formulas.encode_current_under();
        if solver.check(&sess.formulas.dump())? {
            for label in core {
                pin_choice_vector(sess, solver, label)?;
            }
            sess.formulas.considered = prev_considered;
            sess.formulas.encode_current_under();
            stats
                .nodes_changed
                .push(count_changed(&prev_under, &sess.formulas.current_under));
            return Ok(true);
        }
        sess.formulas.learn_conflict(core);
    }
    Ok(false)
}

fn count_changed(
    prev: &std::collections::BTreeMap<i64, Vec<ChoiceBit>>,
    current: &std::collections::BTreeMap<i64, Vec<ChoiceBit>>,
) -> usize {
    let keys: BTreeSet<&i64> = prev.keys().chain(current.keys()).collect();
    keys.into_iter()
        .filter(|key| prev.get(key) != current.get(key))
        .count()
}

fn search_naive(sess: &mut Session, solver: &mut Solver, stats: &mut SearchStats) -> Result<bool> {
    sess.formulas.considered = sess.formulas.labels().iter().cloned().collect();

    let operator_labels: Vec<String> = sess
        .formulas
        .label_to_table
        .keys()
        .cloned()
        .collect();
    let mut tables = Vec::new();
    let mut covers = Vec::new();
    for label in &operator_labels {
        let table_id = sess.formulas.label_to_table[label];
        if tables.contains(&table_id) {
            continue;
        }
        tables.push(table_id);
        covers.push(cover_assignments(
            &sess.db.table(table_id).clone(),
            NAIVE_STRATEGY,
        ));
    }
    if covers.is_empty() {
        // no operators at all; a single check decides
        sess.formulas.encode_current_under();
        return solver.check(&sess.formulas.dump());
    }

    for combination in covers.into_iter().multi_cartesian_product() {
        stats.iters += 1;
        sess.formulas.current_under = tables.iter().copied().zip(combination).collect();
        sess.formulas.encode_current_under();
        if solver.check(&sess.formulas.dump())? {
            for label in &operator_labels {
                pin_choice_vector(sess, solver, label)?;
            }
            return Ok(true);
        }
    }
    Ok(false)
}

/// The family of partial assignments tried for one operator during
/// backtracking. Positions marked `T` stay free; the enumeration of the
/// remaining positions over {0,1} subsumes every assignment the
/// approximation may have pinned before.
pub(crate) fn cover_assignments(
    table: &TableSchema,
    strategy: CoverStrategy,
) -> Vec<Vec<ChoiceBit>> {
    let size = table.bound;
    if table.lineage.is_sorted() {
        return vec![vec![ChoiceBit::Top; table.choice_len()]];
    }

    let finish = |vec: Vec<ChoiceBit>| -> Vec<ChoiceBit> {
        if table.lineage.is_grouped() {
            // both vector halves follow the same pattern
            let mut doubled = vec.clone();
            doubled.extend(vec);
            doubled
        } else {
            vec
        }
    };

    let enumerate = |free: Vec<usize>| -> Vec<Vec<ChoiceBit>> {
        let pinned = size - free.len();
        (0..pinned)
            .map(|_| [0i64, 1])
            .multi_cartesian_product()
            .map(|values| {
                let mut vec = Vec::with_capacity(size);
                let mut next = 0;
                for position in 0..size {
                    if free.contains(&position) {
                        vec.push(ChoiceBit::Top);
                    } else {
                        vec.push(ChoiceBit::Val(values[next]));
                        next += 1;
                    }
                }
                finish(vec)
            })
            .collect()
    };

    match strategy {
        CoverStrategy::Middle(n) if n * 2 < size => {
            enumerate((0..n).chain(size - n..size).collect())
        }
        CoverStrategy::LeftTops(n) if n < size => enumerate((0..n).collect()),
        CoverStrategy::RightTops(n) if n < size => enumerate((size - n..size).collect()),
        CoverStrategy::Ratio(ratio) => {
            let count = (size as f64 * ratio) as usize;
            let mut rng = StdRng::seed_from_u64(COVER_SAMPLE_SEED);
            let free = rand::seq::index::sample(&mut rng, size, count).into_vec();
            enumerate(free)
        }
        _ => vec![vec![ChoiceBit::Top; size]],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Lineage, TableSchema};

    fn table(bound: usize, lineage: Lineage) -> TableSchema {
        TableSchema::new(1, "t", bound, lineage)
    }

    #[test]
    fn left_tops_enumerate_the_pinned_suffix() {
        let covers = cover_assignments(&table(3, Lineage::Filtered), CoverStrategy::LeftTops(1));
        assert_eq!(covers.len(), 4);
        for cover in &covers {
            assert_eq!(cover.len(), 3);
            assert_eq!(cover[0], ChoiceBit::Top);
            assert!(!cover[1].is_top());
            assert!(!cover[2].is_top());
        }
    }

    #[test]
    fn right_and_middle_tops_leave_the_other_flanks_pinned() {
        let covers = cover_assignments(&table(3, Lineage::Filtered), CoverStrategy::RightTops(1));
        assert_eq!(covers.len(), 4);
        for cover in &covers {
            assert!(!cover[0].is_top());
            assert!(!cover[1].is_top());
            assert_eq!(cover[2], ChoiceBit::Top);
        }

        let covers = cover_assignments(&table(4, Lineage::Filtered), CoverStrategy::Middle(1));
        assert_eq!(covers.len(), 4);
        for cover in &covers {
            assert_eq!(cover[0], ChoiceBit::Top);
            assert!(!cover[1].is_top());
            assert!(!cover[2].is_top());
            assert_eq!(cover[3], ChoiceBit::Top);
        }
    }

    #[test]
    fn oversized_strategies_fall_back_to_all_free() {
        let covers = cover_assignments(&table(2, Lineage::Filtered), CoverStrategy::LeftTops(8));
        assert_eq!(covers, vec![vec![ChoiceBit::Top, ChoiceBit::Top]]);
    }

    #[test]
    fn sorted_tables_are_never_pinned() {
        let covers = cover_assignments(&table(3, Lineage::Sorted), CoverStrategy::LeftTops(1));
        assert_eq!(covers, vec![vec![ChoiceBit::Top; 3]]);
    }

    #[test]
    fn grouped_tables_double_their_pattern() {
        let covers = cover_assignments(&table(2, Lineage::Grouped), CoverStrategy::LeftTops(1));
        for cover in &covers {
            assert_eq!(cover.len(), 4);
            assert_eq!(cover[0], cover[2]);
            assert_eq!(cover[1], cover[3]);
        }
    }

    #[test]
    fn ratio_sampling_is_deterministic() {
        let a = cover_assignments(&table(8, Lineage::Filtered), CoverStrategy::Ratio(0.25));
        let b = cover_assignments(&table(8, Lineage::Filtered), CoverStrategy::Ratio(0.25));
        assert_eq!(a, b);
        // 8 * 0.25 = 2 free positions → 2^6 assignments
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn conflict_labels_expand_to_their_sources() {
        let core = vec![
            "ic".to_string(),
            "conflict3_filter$1&project$2".to_string(),
        ];
        assert_eq!(
            expand_conflict_labels(&core),
            vec![
                "ic".to_string(),
                "filter$1".to_string(),
                "project$2".to_string()
            ]
        );
    }
}
