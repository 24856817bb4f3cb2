//! Region cloning: fast/slow versioning of a guarded CFG region.
//!
//! Given the preheader terminator (`begin_with`) and the loop exit's first
//! insertion point (`end_before`), duplicates everything reachable between
//! them and installs a conditional branch so the runtime guard selects the
//! original region (where streams will be installed) or the untouched
//! scalar clone.
//!
//! # Preconditions
//!
//! - every CFG path out of `begin_with` reaches `end_before` or a return,
//! - every value defined in the region and live after `end_before` flows
//!   through a phi in `end_before`'s block (LCSSA form).
//!
//! # Procedure
//!
//! 1. Split at `begin_with`: a `head` block takes over all predecessors and
//!    falls through to the region entry.
//! 2. Split at `end_before`: a `fuse` block keeps the exit phis and flows
//!    into the final exit block, whose phis are replicated so both region
//!    copies can contribute incoming values after the merge.
//! 3. BFS from the region entry, cloning blocks and instructions. Operands
//!    are rewritten immediately when their clone already exists; forward
//!    references (back edges) are fixed up in a deferred pass. Phi
//!    incoming-block fields are not value operands and are rewritten
//!    separately.
//! 4. Replace `head`'s branch with `cond ? original : clone`.
//! 5. Extend the exit phis with the cloned predecessors' values.

use std::collections::VecDeque;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::ir::{BlockId, Function, InstBuilder, InstId, InstKind, ValueId};

/// Handles into the CFG produced by [`clone_region`].
#[derive(Debug, Clone, Copy)]
pub struct ClonedRegion {
    /// The block ending in the guard branch.
    pub head: BlockId,
    /// The guard branch itself.
    pub head_branch: InstId,
    /// Terminator of the fast-path fuse block; the stream disable is
    /// inserted before it.
    pub fast_exit_branch: InstId,
    /// Terminator of the slow-path fuse block.
    pub slow_exit_branch: InstId,
}

/// Split the block containing `at`, moving everything before `at` into a
/// new block that falls through. All other predecessors are redirected to
/// the new block, so phis keep their incoming edges.
pub fn split_at(func: &mut Function, at: InstId, name: &str) -> (BlockId, BlockId) {
    assert!(!func.inst(at).kind.is_phi(), "cannot split at a phi");
    let (two, idx) = func.position(at);
    let one = func.new_block(name);

    let moved: Vec<InstId> = func.block_mut(two).insts.drain(..idx).collect();
    for &i in &moved {
        func.inst_mut(i).block = one;
    }
    func.block_mut(one).insts = moved;
    InstBuilder::at_end(func, one).br(two);

    let blocks: Vec<BlockId> = func.blocks().map(|(b, _)| b).collect();
    for block in blocks {
        if block == one {
            continue;
        }
        if let Some(term) = func.terminator(block) {
            func.inst_mut(term).kind.for_each_target_mut(|t| {
                if *t == two {
                    *t = one;
                }
            });
        }
    }
    if func.entry == two {
        func.entry = one;
    }

    (one, two)
}

/// Replicate the phis of `block`'s single predecessor into `block`, so the
/// merge point can later accept incoming values from a cloned predecessor.
/// Users outside the predecessor are rewired to the replica.
fn copy_phis_from_pred(func: &mut Function, block: BlockId) {
    let preds = func.predecessors(block);
    let [pred] = preds[..] else {
        panic!("fuse target must have exactly one predecessor");
    };

    let phis: Vec<InstId> = func.phis(pred).collect();
    for (k, phi) in phis.into_iter().enumerate() {
        let result = func.inst(phi).result.expect("phi has a result");
        let ty = func.value_ty(result);

        // Insert the replica with no incoming edges first; the use rewrite
        // below must not capture it.
        let copy = func.alloc_inst(
            InstKind::Phi {
                incoming: SmallVec::new(),
            },
            Some(ty),
        );
        func.inst_mut(copy).block = block;
        func.block_mut(block).insts.insert(k, copy);
        let copy_val = func.inst(copy).result.expect("phi has a result");

        let all_insts: Vec<InstId> = func
            .blocks()
            .flat_map(|(_, b)| b.insts.iter().copied())
            .collect();
        for inst in all_insts {
            if func.inst(inst).block == pred {
                continue;
            }
            func.inst_mut(inst).kind.for_each_operand_mut(|v| {
                if *v == result {
                    *v = copy_val;
                }
            });
        }

        match &mut func.inst_mut(copy).kind {
            InstKind::Phi { incoming } => incoming.push((result, pred)),
            _ => unreachable!(),
        }
    }
}

/// Clone the region from `begin_with` up to (not including) `end_before`
/// and guard it with `cond`: true takes the original region, false the
/// clone.
pub fn clone_region(
    func: &mut Function,
    begin_with: InstId,
    end_before: InstId,
    cond: ValueId,
) -> ClonedRegion {
    debug!("cloning region {begin_with:?} .. {end_before:?}");

    let (head, begin) = split_at(func, begin_with, "split.before");
    let (fuse, end) = split_at(func, end_before, "fuse.prep");
    copy_phis_from_pred(func, end);

    let mut queue: VecDeque<BlockId> = VecDeque::from([begin]);
    let mut visited: FxHashSet<BlockId> = FxHashSet::default();
    let mut value_map: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    let mut block_map: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    let mut pending: Vec<InstId> = Vec::new();

    while let Some(c) = queue.pop_front() {
        if c == end || !visited.insert(c) {
            continue;
        }
        let name = format!("{}.clone", func.block(c).name);
        let cc = func.new_block(name);
        block_map.insert(c, cc);

        let insts = func.block(c).insts.clone();
        for i in insts {
            let kind = func.inst(i).kind.clone();
            let ty = func.inst(i).result.map(|v| func.value_ty(v));
            let ci = func.alloc_inst(kind, ty);
            func.inst_mut(ci).block = cc;
            func.block_mut(cc).insts.push(ci);
            if let (Some(ov), Some(nv)) = (func.inst(i).result, func.inst(ci).result) {
                value_map.insert(ov, nv);
            }

            // Immediate rewrite where the clone already exists; forward
            // references (back edges) go to the deferred pass. Operands with
            // no clone at all are constants or region-external values and
            // stay as they are.
            let mut unresolved = false;
            func.inst_mut(ci).kind.for_each_operand_mut(|v| match value_map.get(v) {
                Some(&m) => *v = m,
                None => unresolved = true,
            });
            if unresolved {
                pending.push(ci);
            }
        }

        for s in func.successors(c) {
            queue.push_back(s);
        }
    }

    for ci in pending {
        func.inst_mut(ci).kind.for_each_operand_mut(|v| {
            if let Some(&m) = value_map.get(v) {
                *v = m;
            }
        });
    }

    // Branch targets and phi incoming blocks are not value operands;
    // rewrite them over the whole clone now that the block map is complete.
    for &cc in block_map.values() {
        let insts = func.block(cc).insts.clone();
        for i in insts {
            let kind = &mut func.inst_mut(i).kind;
            kind.for_each_target_mut(|t| {
                if let Some(&m) = block_map.get(t) {
                    *t = m;
                }
            });
            if let InstKind::Phi { incoming } = kind {
                for (_, b) in incoming.iter_mut() {
                    if let Some(&m) = block_map.get(b) {
                        *b = m;
                    }
                }
            }
        }
    }

    // Guard branch: true -> original region, where streams get installed.
    let begin_clone = block_map[&begin];
    let old_term = func.terminator(head).expect("head ends in a branch");
    func.erase_inst(old_term);
    InstBuilder::at_end(func, head).cond_br(cond, begin, begin_clone);
    let head_branch = func.terminator(head).expect("guard branch installed");

    // Let both copies contribute to the exit phis. Values without a clone
    // are constants or defined before the region and are reused as-is.
    let phis: Vec<InstId> = func.phis(end).collect();
    for phi in phis {
        let snapshot = match &func.inst(phi).kind {
            InstKind::Phi { incoming } => incoming.clone(),
            _ => unreachable!(),
        };
        for (v, blk) in snapshot {
            if let Some(&cb) = block_map.get(&blk) {
                let nv = value_map.get(&v).copied().unwrap_or(v);
                match &mut func.inst_mut(phi).kind {
                    InstKind::Phi { incoming } => incoming.push((nv, cb)),
                    _ => unreachable!(),
                }
            }
        }
    }

    debug!("done cloning: {} blocks duplicated", block_map.len());

    ClonedRegion {
        head,
        head_branch,
        fast_exit_branch: func.terminator(fuse).expect("fuse ends in a branch"),
        slow_exit_branch: func
            .terminator(block_map[&fuse])
            .expect("cloned fuse ends in a branch"),
    }
}

// =============================================================================
// Tests
// =============================================================================
