//! Integer gain estimation for a candidate set.
//!
//! The model weighs the memory operations a stream removes against the cost
//! of materializing its setup expressions and runtime checks in the
//! preheader. Everything is a small signed integer; a negative total means
//! the loop is not worth streaming and its conflict-tree value clamps to
//! zero.
//!
//! Per access: `trip_product * MEMOP_COST` minus the expansion cost of the
//! base address and per-dimension step/rep expressions. Checks charge on
//! top: 4 per non-overlap pair (two compares, an or, an and, plus the
//! partner's expansion if it is not itself a candidate), 4 per access for
//! scratchpad-range checks, and 2 per contributing loop for bound checks.
//!
//! Trip products saturate: a multiplication that would shrink the running
//! product (overflow) keeps the previous value instead.

use rustc_hash::FxHashSet;

use crate::analysis::affine::{AccessId, AffineAccessAnalysis, ConflictKind};
use crate::ir::cfg::LoopForest;
use crate::ir::Function;

use super::SsrConfig;

/// Cost of one removed memory operation.
const EST_MEMOP_COST: i64 = 2;
/// Cost of one multiply in setup expression materialization.
const EST_MUL_COST: i64 = 3;
/// Default trip-count estimate for loops with unknown trips.
const EST_LOOP_TC: i64 = 25;

/// Estimated cost of materializing the setup data of `a` at `l`.
fn expansion_cost(
    analysis: &AffineAccessAnalysis,
    forest: &LoopForest,
    a: AccessId,
    l: usize,
) -> i64 {
    let chain = analysis.chain_to(forest, a, l).expect("access streams over l");
    let mut cost = i64::from(analysis.base_offset_expr(forest, a, l).size());
    for (d, &idx) in chain.iter().enumerate() {
        cost += i64::from(analysis.step_expr(a, idx).size());
        cost += i64::from(analysis.rep_of(idx).expect("rep known").size());
        cost += EST_MUL_COST; // per-dimension range product
        if d > 0 {
            cost += 1; // prefix-sum addition
        }
    }
    cost
}

/// Estimate the benefit of streaming `accs` at loop `l`.
pub fn estimate_gain(
    func: &Function,
    forest: &LoopForest,
    analysis: &AffineAccessAnalysis,
    accs: &[AccessId],
    l: usize,
    config: &SsrConfig,
) -> i64 {
    estimate_gain_with(func, forest, analysis, accs, l, config, EST_MEMOP_COST)
}

/// Gain with an explicit per-memop saving; factored out so the model's
/// monotonicity is testable.
pub(crate) fn estimate_gain_with(
    func: &Function,
    forest: &LoopForest,
    analysis: &AffineAccessAnalysis,
    accs: &[AccessId],
    l: usize,
    config: &SsrConfig,
    memop_cost: i64,
) -> i64 {
    let mut gain = 0i64;
    let in_set: FxHashSet<AccessId> = accs.iter().copied().collect();
    let mut visited: FxHashSet<AccessId> = FxHashSet::default();
    let mut cont_loops: FxHashSet<usize> = FxHashSet::default();

    for &a in accs {
        visited.insert(a);

        gain -= expansion_cost(analysis, forest, a, l);

        if !config.no_intersect_check {
            for conflict in analysis.conflicts(func, forest, a, l) {
                match conflict.kind {
                    ConflictKind::NoConflict => {}
                    ConflictKind::MustNotIntersect => {
                        let b = conflict.other.expect("intersect conflicts are pairwise");
                        if visited.contains(&b) {
                            continue; // counted when `b` was the candidate
                        }
                        if !in_set.contains(&b) {
                            gain -= expansion_cost(analysis, forest, b, l);
                        }
                        gain -= 4; // two compares, an or, an and
                    }
                    ConflictKind::Bad => {
                        unreachable!("candidate set has a fatal conflict at this loop")
                    }
                }
            }
        }

        if !config.no_tcdm_check {
            gain -= 4; // two compares, two ands
        }

        let chain = analysis.chain_to(forest, a, l).expect("access streams over l");
        let mut trips = 1i64;
        for &idx in &chain {
            let tc = analysis.const_trips(idx).unwrap_or(EST_LOOP_TC);
            trips = (trips * tc).max(trips); // saturate on overflow
            cont_loops.insert(idx);
        }
        gain += memop_cost * trips;
    }

    if !config.no_bound_check {
        gain -= 2 * cont_loops.len() as i64; // one compare, one and per loop
    }

    gain
}

// =============================================================================
// Tests
// =============================================================================
