//! Candidate filtering and ordering.
//!
//! The hardware imposes two hard constraints on a stream: at most
//! [`MAX_DIM`] affine dimensions and `F64` elements. Surviving candidates
//! are ordered by (dimension ascending, reads before writes at equal
//! dimension) and capped at [`NUM_STREAMS`].
//!
//! The ascending sort is deliberate: selection later compares a loop
//! against its children, and a low-dimension candidate at an outer loop
//! must rank fairly against the same access seen with a higher dimension
//! at an inner loop.

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::analysis::affine::{AccessId, AffineAccessAnalysis};
use crate::ir::cfg::LoopForest;
use crate::ir::{Function, Type};

use super::{SsrConfig, MAX_DIM, NUM_STREAMS};

/// Element type the stream hardware supports.
const STREAM_ELEM_TY: Type = Type::F64;

/// Check the hardware constraints for one access at loop `l`.
fn is_valid(
    analysis: &AffineAccessAnalysis,
    forest: &LoopForest,
    a: AccessId,
    l: usize,
) -> bool {
    let access = &analysis.accesses[a];
    if access.elem_ty != STREAM_ELEM_TY {
        return false;
    }
    analysis
        .dim_at(forest, a, l)
        .is_some_and(|dim| dim <= MAX_DIM)
}

/// Compute the candidate set for loop `l`: up to [`NUM_STREAMS`] accesses,
/// dimension ascending, reads before writes. Invalid and non-canonical
/// loops get an empty set.
pub fn candidate_set(
    func: &Function,
    forest: &LoopForest,
    analysis: &AffineAccessAnalysis,
    l: usize,
    ssr_invalid: &FxHashSet<usize>,
    config: &SsrConfig,
) -> SmallVec<[AccessId; NUM_STREAMS]> {
    if ssr_invalid.contains(&l) || !forest.is_canonical(l) {
        return SmallVec::new();
    }

    let mut valid: Vec<AccessId> = analysis
        .expandable_accesses(func, forest, l, config.conflict_free_only)
        .into_iter()
        .filter(|&a| is_valid(analysis, forest, a, l))
        .collect();

    valid.sort_by_key(|&a| {
        (
            analysis.dim_at(forest, a, l).expect("valid access has a dim"),
            analysis.accesses[a].is_write,
        )
    });
    valid.truncate(NUM_STREAMS);
    SmallVec::from_vec(valid)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cfg::{Cfg, DominatorTree};
    use crate::ir::{CmpPred, FunctionBuilder, ValueId};

    /// One loop reading four arrays and writing a fifth, all unit stride.
    fn crowded_loop() -> (Function, LoopForest, AffineAccessAnalysis) {
        let mut b = FunctionBuilder::new(
            "f",
            &[Type::Ptr, Type::Ptr, Type::Ptr, Type::Ptr, Type::Ptr],
        );
        let ptrs: Vec<ValueId> = (0..5).map(|i| b.param(i)).collect();
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        let zero = b.const_i32(0);
        let entry = b.func().entry;
        b.br(body);
        b.switch_to(body);
        let i = b.phi(Type::I32, &[(zero, entry)]);
        let eight = b.const_i32(8);
        let off = b.imul(i, eight);
        let mut acc = None;
        for &p in &ptrs[..4] {
            let addr = b.ptr_add(p, off);
            let x = b.load(addr, Type::F64);
            acc = Some(match acc {
                None => x,
                Some(prev) => b.fadd(prev, x),
            });
        }
        let out = b.ptr_add(ptrs[4], off);
        b.store(out, acc.unwrap());
        let one = b.const_i32(1);
        let i_next = b.iadd(i, one);
        let n = b.const_i32(64);
        let c = b.icmp(CmpPred::Slt, i_next, n);
        b.cond_br(c, body, exit);
        b.add_phi_incoming(i, i_next, body);
        b.switch_to(exit);
        b.ret(None);

        let func = b.finish();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&func, &cfg, &dom);
        let analysis = AffineAccessAnalysis::compute(&func, &cfg, &forest);
        (func, forest, analysis)
    }

    #[test]
    fn cap_prefers_low_dimension_reads() {
        let (func, forest, analysis) = crowded_loop();
        let cands = candidate_set(
            &func,
            &forest,
            &analysis,
            0,
            &FxHashSet::default(),
            &SsrConfig::default(),
        );
        assert_eq!(cands.len(), NUM_STREAMS);
        // all dimension 1, so the tie-break keeps reads ahead of the write
        for &a in &cands {
            assert!(!analysis.accesses[a].is_write);
        }
    }

    #[test]
    fn invalid_loop_yields_no_candidates() {
        let (func, forest, analysis) = crowded_loop();
        let mut invalid = FxHashSet::default();
        invalid.insert(0usize);
        let cands = candidate_set(&func, &forest, &analysis, 0, &invalid, &SsrConfig::default());
        assert!(cands.is_empty());
    }

    #[test]
    fn f32_elements_are_filtered() {
        let mut b = FunctionBuilder::new("f", &[Type::Ptr]);
        let p = b.param(0);
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        let zero = b.const_i32(0);
        let entry = b.func().entry;
        b.br(body);
        b.switch_to(body);
        let i = b.phi(Type::I32, &[(zero, entry)]);
        let four = b.const_i32(4);
        let off = b.imul(i, four);
        let addr = b.ptr_add(p, off);
        b.load(addr, Type::F32);
        let one = b.const_i32(1);
        let i_next = b.iadd(i, one);
        let n = b.const_i32(64);
        let c = b.icmp(CmpPred::Slt, i_next, n);
        b.cond_br(c, body, exit);
        b.add_phi_incoming(i, i_next, body);
        b.switch_to(exit);
        b.ret(None);

        let func = b.finish();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&func, &cfg, &dom);
        let analysis = AffineAccessAnalysis::compute(&func, &cfg, &forest);

        let cands = candidate_set(
            &func,
            &forest,
            &analysis,
            0,
            &FxHashSet::default(),
            &SsrConfig::default(),
        );
        assert!(cands.is_empty());
    }
}
