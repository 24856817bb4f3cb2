//! Control-flow analyses: edges, dominators, natural loops.
//!
//! The stream inference pass needs exactly three structural facts about a
//! function: reverse-postorder block traversal, dominance (to find back
//! edges), and the natural-loop forest with canonical-form queries
//! (preheader, single exit). All three are built once per pass invocation
//! and never updated incrementally; the pass finishes every query before
//! the first mutation.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::arena::{BitSet, SecondaryMap};
use super::function::{Block, BlockId, Function};

// =============================================================================
// CFG
// =============================================================================

/// Explicit predecessor/successor edges plus a reverse-postorder traversal.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub entry: BlockId,
    preds: SecondaryMap<Block, Vec<BlockId>>,
    succs: SecondaryMap<Block, SmallVec<[BlockId; 2]>>,
    /// Reverse postorder over reachable blocks.
    pub rpo: Vec<BlockId>,
    postorder: SecondaryMap<Block, u32>,
}

impl Cfg {
    /// Build the CFG of a function.
    pub fn build(func: &Function) -> Self {
        let n = func.num_blocks();
        let mut cfg = Cfg {
            entry: func.entry,
            preds: SecondaryMap::with_capacity(n),
            succs: SecondaryMap::with_capacity(n),
            rpo: Vec::with_capacity(n),
            postorder: SecondaryMap::with_capacity(n),
        };

        for (block, _) in func.blocks() {
            let succs = func.successors(block);
            for &s in &succs {
                cfg.preds[s].push(block);
            }
            cfg.succs.set(block, succs);
        }

        // Postorder DFS from the entry; unreachable blocks are left out.
        let mut visited = BitSet::with_capacity(n);
        let mut postorder = Vec::with_capacity(n);
        cfg.dfs_postorder(func.entry, &mut visited, &mut postorder);
        for (i, &block) in postorder.iter().enumerate() {
            cfg.postorder.set(block, i as u32);
        }
        postorder.reverse();
        cfg.rpo = postorder;

        cfg
    }

    fn dfs_postorder(&self, block: BlockId, visited: &mut BitSet, out: &mut Vec<BlockId>) {
        if visited.contains(block.as_usize()) {
            return;
        }
        visited.insert(block.as_usize());
        for i in 0..self.succs[block].len() {
            let succ = self.succs[block][i];
            self.dfs_postorder(succ, visited, out);
        }
        out.push(block);
    }

    /// Predecessors of a block.
    #[inline]
    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        &self.preds[block]
    }

    /// Successors of a block.
    #[inline]
    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        &self.succs[block]
    }

    /// Postorder number of a block (0 for unreachable blocks).
    #[inline]
    pub fn postorder_of(&self, block: BlockId) -> u32 {
        self.postorder.get(block).copied().unwrap_or(0)
    }
}

// =============================================================================
// Dominator Tree
// =============================================================================

/// Immediate-dominator tree, built with the iterative Cooper-Harvey-Kennedy
/// algorithm over reverse postorder.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    idom: SecondaryMap<Block, BlockId>,
}

impl DominatorTree {
    /// Build the dominator tree for a CFG.
    pub fn build(cfg: &Cfg) -> Self {
        let mut dom = DominatorTree {
            idom: SecondaryMap::new(),
        };
        if !cfg.entry.is_valid() {
            return dom;
        }

        for &block in &cfg.rpo {
            dom.idom.set(block, BlockId::INVALID);
        }
        dom.idom.set(cfg.entry, cfg.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &cfg.rpo {
                if block == cfg.entry {
                    continue;
                }
                let preds = cfg.preds(block);
                let mut new_idom = BlockId::INVALID;
                for &pred in preds {
                    if dom.idom_raw(pred).is_valid() {
                        new_idom = pred;
                        break;
                    }
                }
                if !new_idom.is_valid() {
                    continue;
                }
                for &pred in preds {
                    if pred != new_idom && dom.idom_raw(pred).is_valid() {
                        new_idom = dom.intersect(pred, new_idom, cfg);
                    }
                }
                if dom.idom_raw(block) != new_idom {
                    dom.idom.set(block, new_idom);
                    changed = true;
                }
            }
        }

        dom
    }

    #[inline]
    fn idom_raw(&self, block: BlockId) -> BlockId {
        self.idom.get(block).copied().unwrap_or(BlockId::INVALID)
    }

    fn intersect(&self, mut b1: BlockId, mut b2: BlockId, cfg: &Cfg) -> BlockId {
        while b1 != b2 {
            while cfg.postorder_of(b1) < cfg.postorder_of(b2) {
                b1 = self.idom_raw(b1);
                if !b1.is_valid() {
                    return b2;
                }
            }
            while cfg.postorder_of(b2) < cfg.postorder_of(b1) {
                b2 = self.idom_raw(b2);
                if !b2.is_valid() {
                    return b1;
                }
            }
        }
        b1
    }

    /// Immediate dominator of a block, if any.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        let idom = self.idom_raw(block);
        (idom.is_valid() && idom != block).then_some(idom)
    }

    /// Check if `a` dominates `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut current = b;
        while let Some(idom) = self.idom(current) {
            if idom == a {
                return true;
            }
            current = idom;
        }
        false
    }
}

// =============================================================================
// Loop Forest
// =============================================================================

/// A natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    /// The loop header (target of the back edges).
    pub header: BlockId,

    /// Back-edge sources.
    pub latches: Vec<BlockId>,

    /// All blocks in the loop, header included.
    pub blocks: Vec<BlockId>,

    /// Parent loop index, if nested.
    pub parent: Option<usize>,

    /// Child loop indices.
    pub children: Vec<usize>,

    /// Nesting depth (1 = outermost).
    pub depth: u32,

    /// The unique out-of-loop predecessor of the header whose only successor
    /// is the header, when the loop is in canonical form.
    pub preheader: Option<BlockId>,

    /// The unique block outside the loop reached from inside it.
    pub exit: Option<BlockId>,

    block_set: BitSet,
}

/// The loop forest of a function.
#[derive(Debug, Clone)]
pub struct LoopForest {
    pub loops: Vec<Loop>,
    /// Outermost loops, in header order.
    pub top_level: Vec<usize>,
    header_to_loop: FxHashMap<BlockId, usize>,
    /// Innermost containing loop per block.
    block_to_loop: FxHashMap<BlockId, usize>,
}

impl LoopForest {
    /// Detect natural loops and compute nesting and canonical-form queries.
    pub fn compute(func: &Function, cfg: &Cfg, dom: &DominatorTree) -> Self {
        let mut forest = LoopForest {
            loops: Vec::new(),
            top_level: Vec::new(),
            header_to_loop: FxHashMap::default(),
            block_to_loop: FxHashMap::default(),
        };

        // Back edges: target dominates source.
        for &block in &cfg.rpo {
            for &succ in cfg.succs(block) {
                if dom.dominates(succ, block) {
                    forest.add_loop(succ, block, cfg);
                }
            }
        }

        forest.compute_nesting();
        forest.compute_canonical_queries(func, cfg);

        let mut tops: Vec<usize> = (0..forest.loops.len())
            .filter(|&i| forest.loops[i].parent.is_none())
            .collect();
        tops.sort_by_key(|&i| forest.loops[i].header.index());
        forest.top_level = tops;

        forest
    }

    fn add_loop(&mut self, header: BlockId, latch: BlockId, cfg: &Cfg) {
        if let Some(&idx) = self.header_to_loop.get(&header) {
            if !self.loops[idx].latches.contains(&latch) {
                // Extend the body with blocks reaching this new latch.
                let mut set = std::mem::take(&mut self.loops[idx].block_set);
                Self::collect_body(header, latch, cfg, &mut set);
                self.loops[idx].blocks = set.iter().map(|i| BlockId::new(i as u32)).collect();
                self.loops[idx].block_set = set;
                self.loops[idx].latches.push(latch);
            }
            return;
        }

        let mut set = BitSet::with_capacity(cfg.rpo.len());
        set.insert(header.as_usize());
        Self::collect_body(header, latch, cfg, &mut set);

        let idx = self.loops.len();
        self.loops.push(Loop {
            header,
            latches: vec![latch],
            blocks: set.iter().map(|i| BlockId::new(i as u32)).collect(),
            parent: None,
            children: Vec::new(),
            depth: 1,
            preheader: None,
            exit: None,
            block_set: set,
        });
        self.header_to_loop.insert(header, idx);
    }

    /// Reverse-reachability walk from the latch, stopping at the header.
    fn collect_body(header: BlockId, latch: BlockId, cfg: &Cfg, set: &mut BitSet) {
        set.insert(header.as_usize());
        let mut worklist = vec![latch];
        while let Some(block) = worklist.pop() {
            if !set.contains(block.as_usize()) {
                set.insert(block.as_usize());
                worklist.extend(cfg.preds(block).iter().copied());
            }
        }
    }

    fn compute_nesting(&mut self) {
        let n = self.loops.len();
        for i in 0..n {
            let header = self.loops[i].header;
            let mut best: Option<usize> = None;
            let mut best_size = usize::MAX;
            for j in 0..n {
                if i != j
                    && self.loops[j].block_set.contains(header.as_usize())
                    && self.loops[j].blocks.len() < best_size
                {
                    best_size = self.loops[j].blocks.len();
                    best = Some(j);
                }
            }
            if let Some(parent) = best {
                self.loops[i].parent = Some(parent);
                self.loops[parent].children.push(i);
            }
        }

        for i in 0..n {
            let mut depth = 1;
            let mut current = self.loops[i].parent;
            while let Some(p) = current {
                depth += 1;
                current = self.loops[p].parent;
            }
            self.loops[i].depth = depth;
        }

        // Innermost mapping: deeper loops overwrite shallower ones.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| self.loops[i].depth);
        for i in order {
            for &b in &self.loops[i].blocks {
                self.block_to_loop.insert(b, i);
            }
        }
    }

    fn compute_canonical_queries(&mut self, func: &Function, cfg: &Cfg) {
        for idx in 0..self.loops.len() {
            let header = self.loops[idx].header;

            let outside_preds: Vec<BlockId> = cfg
                .preds(header)
                .iter()
                .copied()
                .filter(|&p| !self.contains(idx, p))
                .collect();
            if let [p] = outside_preds[..] {
                if func.successors(p).len() == 1 {
                    self.loops[idx].preheader = Some(p);
                }
            }

            let mut exit: Option<BlockId> = None;
            let mut unique = true;
            for &b in &self.loops[idx].blocks {
                for &s in cfg.succs(b) {
                    if !self.contains(idx, s) {
                        match exit {
                            None => exit = Some(s),
                            Some(e) if e == s => {}
                            Some(_) => unique = false,
                        }
                    }
                }
            }
            self.loops[idx].exit = if unique { exit } else { None };
        }
    }

    /// Check if loop `idx` contains `block`.
    #[inline]
    pub fn contains(&self, idx: usize, block: BlockId) -> bool {
        self.loops[idx].block_set.contains(block.as_usize())
    }

    /// Innermost loop containing a block.
    pub fn loop_for_block(&self, block: BlockId) -> Option<usize> {
        self.block_to_loop.get(&block).copied()
    }

    /// All loops containing a block, innermost first.
    pub fn loops_containing(&self, block: BlockId) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = self.loop_for_block(block);
        while let Some(idx) = cur {
            out.push(idx);
            cur = self.loops[idx].parent;
        }
        out
    }

    /// Loop has both a preheader and a unique exit block.
    pub fn is_canonical(&self, idx: usize) -> bool {
        self.loops[idx].preheader.is_some() && self.loops[idx].exit.is_some()
    }

    /// Check if `outer` is `inner` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, outer: usize, inner: usize) -> bool {
        let mut cur = Some(inner);
        while let Some(idx) = cur {
            if idx == outer {
                return true;
            }
            cur = self.loops[idx].parent;
        }
        false
    }
}

// =============================================================================
// Tests
// =============================================================================
