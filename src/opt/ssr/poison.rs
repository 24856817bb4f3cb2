//! Detection of loops already affected by SSR.
//!
//! Streams must not nest: if a loop already contains stream activity —
//! a call into a function tagged `ssr`, a raw SSR intrinsic, or inline
//! assembly that might conceal one — no new stream may be installed in it
//! or in any enclosing loop.
//!
//! The walk carries a `marked` flag along CFG edges: once an SSR intrinsic
//! or inline assembly is seen, every block downstream is considered inside
//! an active stream region until a `Disable` intrinsic clears the flag.
//! Each block is visited at most once per marking, so the walk terminates
//! on cyclic CFGs.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::ir::cfg::LoopForest;
use crate::ir::{BitSet, BlockId, Function, InstKind, SsrOp};

fn invalidate_containing(forest: &LoopForest, block: BlockId, invalid: &mut FxHashSet<usize>) {
    for idx in forest.loops_containing(block) {
        invalid.insert(idx);
    }
}

/// Find all loops in which no new stream may be installed.
pub fn find_ssr_invalid_loops(func: &Function, forest: &LoopForest) -> FxHashSet<usize> {
    let mut invalid = FxHashSet::default();
    let n = func.num_blocks();
    let mut vis_unmarked = BitSet::with_capacity(n);
    let mut vis_marked = BitSet::with_capacity(n);

    let mut worklist: VecDeque<(BlockId, bool)> = VecDeque::new();
    worklist.push_back((func.entry, false));

    while let Some((block, mut marked)) = worklist.pop_front() {
        if marked {
            if vis_marked.contains(block.as_usize()) {
                continue;
            }
            vis_marked.insert(block.as_usize());

            invalidate_containing(forest, block, &mut invalid);

            // A disable in this block clears the marking for successors.
            for &inst in &func.block(block).insts {
                if matches!(
                    func.inst(inst).kind,
                    InstKind::SsrIntrinsic {
                        op: SsrOp::Disable,
                        ..
                    }
                ) {
                    marked = false;
                    break;
                }
            }
        } else {
            if vis_unmarked.contains(block.as_usize()) {
                continue;
            }
            vis_unmarked.insert(block.as_usize());

            for &inst in &func.block(block).insts {
                match &func.inst(inst).kind {
                    InstKind::Call { callee_ssr, .. } if *callee_ssr => {
                        // The callee brackets its own streams; only the loops
                        // around the call site are poisoned, successors are
                        // not marked.
                        invalidate_containing(forest, block, &mut invalid);
                    }
                    InstKind::SsrIntrinsic { .. } => marked = true,
                    InstKind::InlineAsm { .. } => marked = true,
                    _ => {}
                }
            }
            if marked {
                // Revisit under the new marking to record containing loops.
                worklist.push_back((block, true));
            }
        }

        for succ in func.successors(block) {
            worklist.push_back((succ, marked));
        }
    }

    invalid
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cfg::{Cfg, DominatorTree};
    use crate::ir::{FunctionBuilder, Type};

    /// outer { inner {} } with hooks to drop an instruction into a chosen
    /// block.
    fn nest_with(emit: impl FnOnce(&mut FunctionBuilder)) -> (Function, LoopForest) {
        let mut b = FunctionBuilder::new("f", &[Type::I1]);
        let c = b.param(0);
        let outer = b.create_block("outer");
        let inner_ph = b.create_block("inner.ph");
        let inner = b.create_block("inner");
        let latch = b.create_block("outer.latch");
        let exit = b.create_block("exit");
        b.br(outer);
        b.switch_to(outer);
        b.br(inner_ph);
        b.switch_to(inner_ph);
        b.br(inner);
        b.switch_to(inner);
        emit(&mut b);
        b.cond_br(c, inner, latch);
        b.switch_to(latch);
        b.cond_br(c, outer, exit);
        b.switch_to(exit);
        b.ret(None);

        let func = b.finish();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&func, &cfg, &dom);
        (func, forest)
    }

    #[test]
    fn intrinsic_poisons_loop_and_ancestors() {
        let (func, forest) = nest_with(|b| {
            b.ssr(SsrOp::Enable, &[]);
        });
        let invalid = find_ssr_invalid_loops(&func, &forest);
        assert_eq!(invalid.len(), forest.loops.len());
    }

    #[test]
    fn inline_asm_poisons_conservatively() {
        let (func, forest) = nest_with(|b| {
            b.inline_asm("ssr.enable");
        });
        let invalid = find_ssr_invalid_loops(&func, &forest);
        assert_eq!(invalid.len(), forest.loops.len());
    }

    #[test]
    fn tagged_call_poisons_without_marking_successors() {
        let (func, forest) = nest_with(|b| {
            b.call("streamed_kernel", &[], None, true);
        });
        let invalid = find_ssr_invalid_loops(&func, &forest);
        assert_eq!(invalid.len(), forest.loops.len());
    }

    #[test]
    fn untagged_call_does_not_poison() {
        let (func, forest) = nest_with(|b| {
            b.call("plain", &[], None, false);
        });
        let invalid = find_ssr_invalid_loops(&func, &forest);
        assert!(invalid.is_empty());
    }

    #[test]
    fn disable_clears_marking_for_downstream_loops() {
        // enable | disable | loop, each in its own block: the marking ends
        // at the disable block, so the loop stays valid.
        let mut b = FunctionBuilder::new("f", &[Type::I1]);
        let c = b.param(0);
        let done = b.create_block("done");
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        b.ssr(SsrOp::Enable, &[]);
        b.br(done);
        b.switch_to(done);
        b.ssr(SsrOp::Disable, &[]);
        b.br(body);
        b.switch_to(body);
        b.cond_br(c, body, exit);
        b.switch_to(exit);
        b.ret(None);

        let func = b.finish();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&func, &cfg, &dom);

        let invalid = find_ssr_invalid_loops(&func, &forest);
        assert!(invalid.is_empty());
    }

    #[test]
    fn marking_without_disable_poisons_downstream_loop() {
        let mut b = FunctionBuilder::new("f", &[Type::I1]);
        let c = b.param(0);
        let body = b.create_block("body");
        let exit = b.create_block("exit");
        b.ssr(SsrOp::Enable, &[]);
        b.br(body);
        b.switch_to(body);
        b.cond_br(c, body, exit);
        b.switch_to(exit);
        b.ret(None);

        let func = b.finish();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&func, &cfg, &dom);

        let invalid = find_ssr_invalid_loops(&func, &forest);
        assert_eq!(invalid.len(), 1);
    }
}
