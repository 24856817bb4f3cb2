//! Expansion engine: materialize setup data and build the guard.
//!
//! Asks the affine analysis to expand bounds, strides, repetitions, base
//! addresses, intersection checks and bound checks at the loop preheader,
//! then ANDs in the scratchpad-membership checks. The result is a single
//! boolean that is true at runtime exactly when the streamed fast path is
//! safe. With every check class disabled the guard folds to constant
//! `true`, which the cloner recognizes as a fast-path-only transform.

use log::debug;

use crate::analysis::affine::{AccessId, AffineAccessAnalysis, ExpandedAccess};
use crate::ir::cfg::LoopForest;
use crate::ir::{CmpPred, Function, InstBuilder, Type, ValueId};

use super::{SsrConfig, NUM_STREAMS, SCRATCHPAD_BEGIN, SCRATCHPAD_END};

/// Scratchpad-membership check for one expanded access:
/// `(SCRATCHPAD_BEGIN <= lower) && (upper <= SCRATCHPAD_END)`.
fn scratchpad_check(b: &mut InstBuilder<'_>, e: &ExpandedAccess) -> ValueId {
    let begin = b.const_ptr(SCRATCHPAD_BEGIN);
    let end = b.const_ptr(SCRATCHPAD_END);
    let lo = b.icmp(CmpPred::Ule, begin, e.lower);
    let hi = b.icmp(CmpPred::Ule, e.upper, end);
    b.and_(lo, hi)
}

/// Expand `accs` in the preheader of `l` and return the expansions plus the
/// composite guard condition.
pub fn expand_in_loop(
    func: &mut Function,
    analysis: &AffineAccessAnalysis,
    forest: &LoopForest,
    accs: &[AccessId],
    l: usize,
    config: &SsrConfig,
) -> (Vec<ExpandedAccess>, ValueId) {
    assert!(!accs.is_empty());
    assert!(accs.len() <= NUM_STREAMS);

    debug!(
        "expanding {} access(es) in loop with header {:?} at depth {}",
        accs.len(),
        forest.loops[l].header,
        forest.loops[l].depth
    );

    let preheader = forest.loops[l].preheader.expect("canonical loop");
    let point = func.terminator(preheader).expect("preheader has a terminator");

    let (expanded, mut cond) = analysis.expand_all_at(
        func,
        forest,
        accs,
        l,
        point,
        !config.no_intersect_check,
        !config.no_bound_check,
    );

    if !config.no_tcdm_check {
        let mut b = InstBuilder::before(func, point);
        for e in &expanded {
            let check = scratchpad_check(&mut b, e);
            // fold `true && check` so a check-free expansion stays clean
            cond = if b.func().value_as_const_int(cond) == Some(1) {
                check
            } else {
                b.and_(cond, check)
            };
        }
    }

    assert_eq!(func.value_ty(cond), Type::I1, "guard must be boolean");

    (expanded, cond)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::affine::AffineAccessAnalysis;
    use crate::ir::cfg::{Cfg, DominatorTree};
    use crate::ir::{FunctionBuilder, InstKind};

    fn fixture() -> (Function, LoopForest, AffineAccessAnalysis) {
        let mut b = FunctionBuilder::new("f", &[Type::Ptr]);
        let a_ptr = b.param(0);
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        let zero = b.const_i32(0);
        let entry = b.func().entry;
        b.br(body);
        b.switch_to(body);
        let i = b.phi(Type::I32, &[(zero, entry)]);
        let eight = b.const_i32(8);
        let off = b.imul(i, eight);
        let addr = b.ptr_add(a_ptr, off);
        b.load(addr, Type::F64);
        let one = b.const_i32(1);
        let i_next = b.iadd(i, one);
        let n = b.const_i32(100);
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
    fn scratchpad_checks_appear_in_preheader() {
        let (mut func, forest, analysis) = fixture();
        let (exp, cond) =
            expand_in_loop(&mut func, &analysis, &forest, &[0], 0, &SsrConfig::default());
        assert_eq!(exp.len(), 1);
        assert!(func.value_as_const_int(cond).is_none());

        let ph = forest.loops[0].preheader.unwrap();
        let cmps = func
            .block(ph)
            .insts
            .iter()
            .filter(|&&i| matches!(func.inst(i).kind, InstKind::Cmp { .. }))
            .count();
        // two pointer comparisons for the single access
        assert_eq!(cmps, 2);
    }

    #[test]
    fn all_checks_disabled_folds_guard_to_true() {
        let (mut func, forest, analysis) = fixture();
        let config = SsrConfig {
            no_intersect_check: true,
            no_tcdm_check: true,
            no_bound_check: true,
            ..SsrConfig::default()
        };
        let (_, cond) = expand_in_loop(&mut func, &analysis, &forest, &[0], 0, &config);
        assert_eq!(func.value_as_const_int(cond), Some(1));
    }
}
