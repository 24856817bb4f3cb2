//! Affine-access classification and expansion.
//!
//! Classifies every load/store inside a loop nest as an affine function of
//! enclosing induction variables:
//!
//! ```text
//! addr = base + offset + Σ_iv coeff_iv * iv
//! ```
//!
//! where `base` is a pointer and `offset`/`coeff` are invariant symbolic
//! expressions. From that shape the analysis derives, per streaming loop
//! `L`, the per-dimension strides and repetitions a stream engine needs
//! (dimension 1 is the innermost loop), pairwise conflicts with other memory
//! operations in `L`, and a bulk expansion that materializes strides, reps,
//! address bounds and runtime checks in `L`'s preheader.
//!
//! # Conflicts
//!
//! - two affine reads never conflict,
//! - an affine pair involving a write must be proven disjoint at runtime
//!   (`MustNotIntersect`),
//! - an unclassifiable memory operation (opaque call, inline assembly, or a
//!   load/store whose address is not affine) poisons the loop (`Bad`): no
//!   stream can be installed there.
//!
//! # Invariants
//!
//! All expression leaves handed out for a loop `L` are invariant at `L`'s
//! preheader. Negative constant strides are rejected as not well-formed
//! (the address-range bounds would invert); see DESIGN.md.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::analysis::expr::Expr;
use crate::analysis::induction::{find_induction_vars, is_invariant_in};
use crate::analysis::trip_count::loop_trip_count;
use crate::ir::cfg::{Cfg, LoopForest};
use crate::ir::{
    BinOp, BlockId, CmpPred, Function, InstBuilder, InstId, InstKind, Type, ValueId,
};

/// Index of an access within [`AffineAccessAnalysis::accesses`].
pub type AccessId = usize;

// =============================================================================
// Conflicts
// =============================================================================

/// How two memory operations in the same loop interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Provably independent (e.g. two reads).
    NoConflict,
    /// Requires a runtime non-overlap check.
    MustNotIntersect,
    /// Fatal: the loop cannot host streams.
    Bad,
}

/// A conflict reported for a candidate access.
#[derive(Debug, Clone, Copy)]
pub struct Conflict {
    /// The conflicting affine access, if the conflict is with one.
    pub other: Option<AccessId>,
    pub kind: ConflictKind,
}

// =============================================================================
// Affine accesses
// =============================================================================

/// One affine memory access; possibly several instruction sites with the
/// identical shape.
#[derive(Debug, Clone)]
pub struct AffineAccess {
    /// The load/store instructions this access covers.
    pub sites: SmallVec<[InstId; 1]>,
    pub is_write: bool,
    pub elem_ty: Type,
    /// Innermost loop containing the access.
    pub innermost: usize,
    /// Invariant base pointer.
    pub base: ValueId,
    /// Invariant byte offset from `base`.
    pub offset: Expr,
    /// Byte coefficient per induction variable, sorted by IV value ID.
    pub coeffs: Vec<(ValueId, Expr)>,
}

#[derive(Debug, Clone)]
struct IvReg {
    loop_idx: usize,
    init: Expr,
    step: Expr,
}

/// Result of materializing one access at a preheader.
#[derive(Debug, Clone)]
pub struct ExpandedAccess {
    pub access: AccessId,
    pub dim: u8,
    /// Stream base address.
    pub addr: ValueId,
    /// Per-dimension byte strides, innermost first.
    pub steps: SmallVec<[ValueId; 4]>,
    /// Per-dimension repetitions (`trips - 1`), innermost first.
    pub reps: SmallVec<[ValueId; 4]>,
    /// `prefix[d] = Σ_{i<=d} steps[i] * reps[i]`; the cumulative span used
    /// for stride correction and the upper address bound.
    pub prefix_ranges: SmallVec<[ValueId; 4]>,
    /// Inclusive address range of the access.
    pub lower: ValueId,
    pub upper: ValueId,
}

// =============================================================================
// Linear decomposition
// =============================================================================

/// `offset + Σ coeff_iv * iv`, the intermediate shape of address math.
#[derive(Debug, Clone, Default)]
struct LinearForm {
    offset: Expr,
    terms: Vec<(ValueId, Expr)>,
}

impl LinearForm {
    fn constant(offset: Expr) -> Self {
        LinearForm {
            offset,
            terms: Vec::new(),
        }
    }

    fn term(iv: ValueId) -> Self {
        LinearForm {
            offset: Expr::Const(0),
            terms: vec![(iv, Expr::Const(1))],
        }
    }

    fn merge_term(&mut self, iv: ValueId, coeff: Expr) {
        if let Some((_, c)) = self.terms.iter_mut().find(|(v, _)| *v == iv) {
            *c = Expr::add(std::mem::take(c), coeff);
        } else {
            self.terms.push((iv, coeff));
        }
    }

    fn add(mut self, other: LinearForm) -> LinearForm {
        self.offset = Expr::add(self.offset, other.offset);
        for (iv, c) in other.terms {
            self.merge_term(iv, c);
        }
        self
    }

    fn sub(mut self, other: LinearForm) -> LinearForm {
        self.offset = Expr::sub(self.offset, other.offset);
        for (iv, c) in other.terms {
            self.merge_term(iv, Expr::sub(Expr::Const(0), c));
        }
        self
    }

    /// Multiply; defined only when one side carries no IV terms.
    fn mul(self, other: LinearForm) -> Option<LinearForm> {
        let (pure, mut lin) = if self.terms.is_empty() {
            (self.offset, other)
        } else if other.terms.is_empty() {
            (other.offset, self)
        } else {
            return None;
        };
        lin.offset = Expr::mul(lin.offset, pure.clone());
        for (_, c) in &mut lin.terms {
            *c = Expr::mul(std::mem::take(c), pure.clone());
        }
        Some(lin)
    }
}

// =============================================================================
// Analysis
// =============================================================================

/// The per-function affine-access analysis result.
///
/// Computed once, before any IR mutation; the pass must not consult it after
/// the first region is cloned.
#[derive(Debug)]
pub struct AffineAccessAnalysis {
    pub accesses: Vec<AffineAccess>,
    /// Blocks containing memory operations the analysis cannot bound.
    clobber_blocks: Vec<BlockId>,
    /// Per-loop `trips - 1`, for loops with a known trip count.
    reps: FxHashMap<usize, Expr>,
    /// Per-loop constant trip counts, where known.
    trips: FxHashMap<usize, i64>,
    ivs: FxHashMap<ValueId, IvReg>,
}

impl AffineAccessAnalysis {
    /// Run the analysis over all loops of a function.
    pub fn compute(func: &Function, _cfg: &Cfg, forest: &LoopForest) -> Self {
        let mut analysis = AffineAccessAnalysis {
            accesses: Vec::new(),
            clobber_blocks: Vec::new(),
            reps: FxHashMap::default(),
            trips: FxHashMap::default(),
            ivs: FxHashMap::default(),
        };

        for idx in 0..forest.loops.len() {
            let ivs = find_induction_vars(func, forest, idx);
            let tc = loop_trip_count(func, forest, idx, &ivs);
            if let Some(rep) = tc.rep() {
                analysis.reps.insert(idx, rep);
            }
            if let Some(n) = tc.as_const() {
                analysis.trips.insert(idx, n);
            }
            for iv in ivs {
                analysis.ivs.insert(
                    iv.value,
                    IvReg {
                        loop_idx: idx,
                        init: iv.init,
                        step: iv.step,
                    },
                );
            }
        }

        for (block, data) in func.blocks() {
            if forest.loop_for_block(block).is_none() {
                continue;
            }
            for &inst in &data.insts {
                match &func.inst(inst).kind {
                    InstKind::Load { addr } => {
                        let ty = func.value_ty(func.inst(inst).result.expect("load result"));
                        analysis.classify_site(func, forest, block, inst, *addr, false, ty);
                    }
                    InstKind::Store { addr, value } => {
                        let ty = func.value_ty(*value);
                        analysis.classify_site(func, forest, block, inst, *addr, true, ty);
                    }
                    InstKind::Call { .. } | InstKind::InlineAsm { .. } => {
                        analysis.clobber_blocks.push(block);
                    }
                    _ => {}
                }
            }
        }

        analysis
    }

    fn classify_site(
        &mut self,
        func: &Function,
        forest: &LoopForest,
        block: BlockId,
        site: InstId,
        addr: ValueId,
        is_write: bool,
        elem_ty: Type,
    ) {
        let chain = forest.loops_containing(block);
        let outermost = *chain.last().expect("site is inside a loop");

        let Some((base, lin)) = self.decompose_ptr(func, forest, outermost, &chain, addr) else {
            self.clobber_blocks.push(block);
            return;
        };

        let mut coeffs = lin.terms;
        coeffs.sort_by_key(|(iv, _)| iv.index());
        let offset = lin.offset;
        let innermost = chain[0];

        // Merge with an existing access of identical shape.
        for a in self.accesses.iter_mut() {
            if a.is_write == is_write
                && a.elem_ty == elem_ty
                && a.innermost == innermost
                && a.base == base
                && a.offset == offset
                && a.coeffs == coeffs
            {
                a.sites.push(site);
                return;
            }
        }

        self.accesses.push(AffineAccess {
            sites: SmallVec::from_slice(&[site]),
            is_write,
            elem_ty,
            innermost,
            base,
            offset,
            coeffs,
        });
    }

    fn decompose_ptr(
        &self,
        func: &Function,
        forest: &LoopForest,
        outermost: usize,
        chain: &[usize],
        v: ValueId,
    ) -> Option<(ValueId, LinearForm)> {
        if let Some(inst) = func.value_def_inst(v) {
            if let InstKind::PtrAdd { base, offset } = func.inst(inst).kind {
                let (root, lin) = self.decompose_ptr(func, forest, outermost, chain, base)?;
                let off = self.decompose_int(func, forest, outermost, chain, offset)?;
                return Some((root, lin.add(off)));
            }
        }
        if func.value_ty(v) == Type::Ptr && is_invariant_in(func, forest, outermost, v) {
            return Some((v, LinearForm::constant(Expr::Const(0))));
        }
        None
    }

    fn decompose_int(
        &self,
        func: &Function,
        forest: &LoopForest,
        outermost: usize,
        chain: &[usize],
        v: ValueId,
    ) -> Option<LinearForm> {
        if let Some(c) = func.value_as_const_int(v) {
            return Some(LinearForm::constant(Expr::Const(c)));
        }
        if let Some(reg) = self.ivs.get(&v) {
            if chain.contains(&reg.loop_idx) {
                return Some(LinearForm::term(v));
            }
        }
        if is_invariant_in(func, forest, outermost, v) {
            return Some(LinearForm::constant(Expr::Value(v)));
        }
        let inst = func.value_def_inst(v)?;
        if let InstKind::Binary { op, lhs, rhs } = func.inst(inst).kind {
            let a = self.decompose_int(func, forest, outermost, chain, lhs)?;
            let b = self.decompose_int(func, forest, outermost, chain, rhs)?;
            return match op {
                BinOp::Add => Some(a.add(b)),
                BinOp::Sub => Some(a.sub(b)),
                BinOp::Mul => a.mul(b),
                _ => None,
            };
        }
        None
    }

    // --- queries ------------------------------------------------------------

    /// `trips - 1` of a loop, if its trip count is known.
    pub fn rep_of(&self, loop_idx: usize) -> Option<&Expr> {
        self.reps.get(&loop_idx)
    }

    /// Constant trip count of a loop, if known.
    pub fn const_trips(&self, loop_idx: usize) -> Option<i64> {
        self.trips.get(&loop_idx).copied()
    }

    /// Loops contributing dimensions when access `a` streams over `l`,
    /// innermost first; `None` if `l` does not enclose the access.
    pub fn chain_to(&self, forest: &LoopForest, a: AccessId, l: usize) -> Option<Vec<usize>> {
        if !forest.is_ancestor_or_self(l, self.accesses[a].innermost) {
            return None;
        }
        let mut chain = Vec::new();
        let mut cur = Some(self.accesses[a].innermost);
        while let Some(idx) = cur {
            chain.push(idx);
            if idx == l {
                return Some(chain);
            }
            cur = forest.loops[idx].parent;
        }
        None
    }

    /// Dimensionality of access `a` when streaming over `l`.
    pub fn dim_at(&self, forest: &LoopForest, a: AccessId, l: usize) -> Option<u8> {
        self.chain_to(forest, a, l).map(|c| c.len() as u8)
    }

    /// Byte stride of access `a` for one iteration of `loop_idx`.
    pub fn step_expr(&self, a: AccessId, loop_idx: usize) -> Expr {
        let mut step = Expr::Const(0);
        for (iv, coeff) in &self.accesses[a].coeffs {
            let reg = &self.ivs[iv];
            if reg.loop_idx == loop_idx {
                step = Expr::add(step, Expr::mul(coeff.clone(), reg.step.clone()));
            }
        }
        step
    }

    /// Byte offset of the stream base from the access's base pointer when
    /// streaming over `l`: invariant offset, plus the initial value of every
    /// streamed IV, plus the current value of every enclosing IV.
    pub fn base_offset_expr(&self, forest: &LoopForest, a: AccessId, l: usize) -> Expr {
        let chain: FxHashSet<usize> = self
            .chain_to(forest, a, l)
            .expect("access streams over l")
            .into_iter()
            .collect();
        let mut expr = self.accesses[a].offset.clone();
        for (iv, coeff) in &self.accesses[a].coeffs {
            let reg = &self.ivs[iv];
            let contrib = if chain.contains(&reg.loop_idx) {
                Expr::mul(coeff.clone(), reg.init.clone())
            } else {
                Expr::mul(coeff.clone(), Expr::Value(*iv))
            };
            expr = Expr::add(expr, contrib);
        }
        expr
    }

    /// Check that access `a` can be expanded at `l`'s preheader.
    pub fn well_formed(
        &self,
        func: &Function,
        forest: &LoopForest,
        a: AccessId,
        l: usize,
    ) -> bool {
        let Some(chain) = self.chain_to(forest, a, l) else {
            return false;
        };
        for &idx in &chain {
            if !forest.is_canonical(idx) || !self.reps.contains_key(&idx) {
                return false;
            }
            let step = self.step_expr(a, idx);
            if step.as_const().is_some_and(|c| c < 0) {
                return false;
            }
            if !self.invariant_expr_in(func, forest, l, &step) {
                return false;
            }
            if !self.invariant_expr_in(func, forest, l, &self.reps[&idx]) {
                return false;
            }
        }
        if !is_invariant_in(func, forest, l, self.accesses[a].base) {
            return false;
        }
        self.invariant_expr_in(func, forest, l, &self.base_offset_expr(forest, a, l))
    }

    fn invariant_expr_in(
        &self,
        func: &Function,
        forest: &LoopForest,
        l: usize,
        expr: &Expr,
    ) -> bool {
        let mut ok = true;
        expr.for_each_value(&mut |v| {
            ok &= is_invariant_in(func, forest, l, v);
        });
        ok
    }

    /// Conflicts of candidate `a` against everything else in loop `l`.
    /// `NoConflict` pairs are omitted.
    pub fn conflicts(
        &self,
        func: &Function,
        forest: &LoopForest,
        a: AccessId,
        l: usize,
    ) -> Vec<Conflict> {
        let mut out = Vec::new();

        for &block in &self.clobber_blocks {
            if forest.contains(l, block) {
                out.push(Conflict {
                    other: None,
                    kind: ConflictKind::Bad,
                });
            }
        }

        for (b, other) in self.accesses.iter().enumerate() {
            if b == a {
                continue;
            }
            let inside = other
                .sites
                .iter()
                .any(|&s| forest.contains(l, func.inst(s).block));
            if !inside {
                continue;
            }
            if !self.accesses[a].is_write && !other.is_write {
                continue;
            }
            let kind = if self.well_formed(func, forest, b, l) {
                ConflictKind::MustNotIntersect
            } else {
                ConflictKind::Bad
            };
            out.push(Conflict {
                other: Some(b),
                kind,
            });
        }

        out
    }

    /// Accesses that can be expanded at `l`: well-formed, no fatal conflict,
    /// and conflict-free entirely when `conflict_free_only` is set.
    pub fn expandable_accesses(
        &self,
        func: &Function,
        forest: &LoopForest,
        l: usize,
        conflict_free_only: bool,
    ) -> Vec<AccessId> {
        (0..self.accesses.len())
            .filter(|&a| self.well_formed(func, forest, a, l))
            .filter(|&a| {
                let conflicts = self.conflicts(func, forest, a, l);
                if conflict_free_only {
                    conflicts.is_empty()
                } else {
                    conflicts.iter().all(|c| c.kind != ConflictKind::Bad)
                }
            })
            .collect()
    }

    // --- expansion ----------------------------------------------------------

    /// Materialize strides, reps, base addresses, address bounds, bound
    /// checks, and intersection checks for `accs` immediately before
    /// `point` (the preheader terminator of `l`). Returns the expansions
    /// plus one boolean aggregating every generated check; constant `true`
    /// when nothing needed checking.
    pub fn expand_all_at(
        &self,
        func: &mut Function,
        forest: &LoopForest,
        accs: &[AccessId],
        l: usize,
        point: InstId,
        gen_intersect: bool,
        gen_bound: bool,
    ) -> (Vec<ExpandedAccess>, ValueId) {
        let mut b = InstBuilder::before(func, point);
        let mut rep_cache: FxHashMap<usize, ValueId> = FxHashMap::default();
        let mut conds: Vec<ValueId> = Vec::new();

        let mut expanded = Vec::with_capacity(accs.len());
        for &a in accs {
            let chain = self
                .chain_to(forest, a, l)
                .expect("candidate streams over l");
            let range = self.expand_range(forest, a, &chain, &mut b, &mut rep_cache);
            expanded.push(ExpandedAccess {
                access: a,
                dim: chain.len() as u8,
                addr: range.addr,
                steps: range.steps,
                reps: range.reps,
                prefix_ranges: range.prefix,
                lower: range.lower,
                upper: range.upper,
            });
        }

        if gen_bound {
            // One check per contributing loop, shared across accesses.
            let mut checked: Vec<usize> = Vec::new();
            for &a in accs {
                for idx in self.chain_to(forest, a, l).expect("candidate") {
                    if checked.contains(&idx) {
                        continue;
                    }
                    checked.push(idx);
                    match self.reps[&idx].as_const() {
                        Some(c) if c >= 0 => {}
                        Some(_) => conds.push(b.const_bool(false)),
                        None => {
                            let rep = self.expand_rep(idx, &mut b, &mut rep_cache);
                            let zero = b.const_i32(0);
                            conds.push(b.icmp(CmpPred::Sle, zero, rep));
                        }
                    }
                }
            }
        }

        if gen_intersect {
            let mut seen: FxHashSet<(AccessId, AccessId)> = FxHashSet::default();
            let mut partner_bounds: FxHashMap<AccessId, (ValueId, ValueId)> = FxHashMap::default();
            for e in &expanded {
                partner_bounds.insert(e.access, (e.lower, e.upper));
            }
            for &a in accs {
                for conflict in self.conflicts(b.func(), forest, a, l) {
                    let Some(other) = conflict.other else {
                        unreachable!("candidates have no fatal conflicts");
                    };
                    debug_assert_eq!(conflict.kind, ConflictKind::MustNotIntersect);
                    let key = (a.min(other), a.max(other));
                    if !seen.insert(key) {
                        continue;
                    }
                    let (bl, bu) = match partner_bounds.get(&other) {
                        Some(&bounds) => bounds,
                        None => {
                            let chain = self
                                .chain_to(forest, other, l)
                                .expect("conflicting access is well-formed");
                            let range =
                                self.expand_range(forest, other, &chain, &mut b, &mut rep_cache);
                            partner_bounds.insert(other, (range.lower, range.upper));
                            (range.lower, range.upper)
                        }
                    };
                    let (al, au) = partner_bounds[&a];
                    let below = b.icmp(CmpPred::Ult, au, bl);
                    let above = b.icmp(CmpPred::Ult, bu, al);
                    let disjoint = b.or_(below, above);
                    conds.push(disjoint);
                }
            }
        }

        let cond = match conds.split_first() {
            None => b.const_bool(true),
            Some((&first, rest)) => rest.iter().fold(first, |acc, &c| b.and_(acc, c)),
        };

        (expanded, cond)
    }

    fn expand_rep(
        &self,
        loop_idx: usize,
        b: &mut InstBuilder<'_>,
        cache: &mut FxHashMap<usize, ValueId>,
    ) -> ValueId {
        if let Some(&v) = cache.get(&loop_idx) {
            return v;
        }
        let v = self.reps[&loop_idx].expand_i32(b);
        cache.insert(loop_idx, v);
        v
    }

    fn expand_range(
        &self,
        forest: &LoopForest,
        a: AccessId,
        chain: &[usize],
        b: &mut InstBuilder<'_>,
        rep_cache: &mut FxHashMap<usize, ValueId>,
    ) -> Range {
        let l = *chain.last().expect("chain is non-empty");
        let base = self.accesses[a].base;
        let off = self.base_offset_expr(forest, a, l);
        let addr = if off.as_const() == Some(0) {
            base
        } else {
            let off = off.expand_i32(b);
            b.ptr_add(base, off)
        };

        let mut steps = SmallVec::new();
        let mut reps = SmallVec::new();
        let mut prefix = SmallVec::new();
        let mut running: Option<ValueId> = None;
        for &idx in chain {
            let step = self.step_expr(a, idx).expand_i32(b);
            let rep = self.expand_rep(idx, b, rep_cache);
            let range = b.imul(step, rep);
            let total = match running {
                None => range,
                Some(prev) => b.iadd(prev, range),
            };
            running = Some(total);
            steps.push(step);
            reps.push(rep);
            prefix.push(total);
        }

        let span = *prefix.last().expect("at least one dimension");
        let upper = b.ptr_add(addr, span);
        Range {
            addr,
            steps,
            reps,
            prefix,
            lower: addr,
            upper,
        }
    }
}

struct Range {
    addr: ValueId,
    steps: SmallVec<[ValueId; 4]>,
    reps: SmallVec<[ValueId; 4]>,
    prefix: SmallVec<[ValueId; 4]>,
    lower: ValueId,
    upper: ValueId,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::cfg::DominatorTree;
    use crate::ir::FunctionBuilder;

    /// `for (i = 0; i < 100; i++) acc += A[i];` with an optional extra store
    /// `B[i] = acc`.
    fn one_d_loop(with_store: bool) -> (Function, LoopForest, AffineAccessAnalysis) {
        let mut b = FunctionBuilder::new("f", &[Type::Ptr, Type::Ptr]);
        let a_ptr = b.param(0);
        let b_ptr = b.param(1);
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
        let x = b.load(addr, Type::F64);
        if with_store {
            let baddr = b.ptr_add(b_ptr, off);
            b.store(baddr, x);
        }
        let one = b.const_i32(1);
        let i_next = b.iadd(i, one);
        let hundred = b.const_i32(100);
        let c = b.icmp(CmpPred::Slt, i_next, hundred);
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
    fn classifies_unit_stride_read() {
        let (func, forest, analysis) = one_d_loop(false);
        assert_eq!(analysis.accesses.len(), 1);

        let a = &analysis.accesses[0];
        assert!(!a.is_write);
        assert_eq!(a.elem_ty, Type::F64);
        assert_eq!(a.sites.len(), 1);

        assert_eq!(analysis.dim_at(&forest, 0, 0), Some(1));
        assert_eq!(analysis.step_expr(0, 0), Expr::Const(8));
        assert_eq!(analysis.rep_of(0), Some(&Expr::Const(99)));
        assert!(analysis.well_formed(&func, &forest, 0, 0));
        assert!(analysis.conflicts(&func, &forest, 0, 0).is_empty());
    }

    #[test]
    fn read_write_pair_must_not_intersect() {
        let (func, forest, analysis) = one_d_loop(true);
        assert_eq!(analysis.accesses.len(), 2);

        let read = analysis.accesses.iter().position(|a| !a.is_write).unwrap();
        let conflicts = analysis.conflicts(&func, &forest, read, 0);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::MustNotIntersect);

        assert_eq!(analysis.expandable_accesses(&func, &forest, 0, false).len(), 2);
        assert!(analysis.expandable_accesses(&func, &forest, 0, true).is_empty());
    }

    #[test]
    fn call_poisons_loop() {
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
        b.call("helper", &[], None, false);
        let one = b.const_i32(1);
        let i_next = b.iadd(i, one);
        let ten = b.const_i32(10);
        let c = b.icmp(CmpPred::Slt, i_next, ten);
        b.cond_br(c, body, exit);
        b.add_phi_incoming(i, i_next, body);
        b.switch_to(exit);
        b.ret(None);

        let func = b.finish();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        let forest = LoopForest::compute(&func, &cfg, &dom);
        let analysis = AffineAccessAnalysis::compute(&func, &cfg, &forest);

        assert!(analysis
            .conflicts(&func, &forest, 0, 0)
            .iter()
            .any(|c| c.kind == ConflictKind::Bad));
        assert!(analysis.expandable_accesses(&func, &forest, 0, false).is_empty());
    }

    #[test]
    fn expansion_produces_bounds_and_true_guard_without_checks() {
        let (mut func, forest, analysis) = one_d_loop(false);
        let ph = forest.loops[0].preheader.unwrap();
        let point = func.terminator(ph).unwrap();

        let (exp, cond) =
            analysis.expand_all_at(&mut func, &forest, &[0], 0, point, false, false);
        assert_eq!(exp.len(), 1);
        assert_eq!(exp[0].dim, 1);
        assert_eq!(exp[0].steps.len(), 1);
        // constant-trip loop with no checks folds the guard to `true`
        assert_eq!(func.value_as_const_int(cond), Some(1));
    }

    #[test]
    fn intersect_check_is_emitted_for_conflicting_pair() {
        let (mut func, forest, analysis) = one_d_loop(true);
        let ph = forest.loops[0].preheader.unwrap();
        let point = func.terminator(ph).unwrap();

        let accs = analysis.expandable_accesses(&func, &forest, 0, false);
        let (_, cond) = analysis.expand_all_at(&mut func, &forest, &accs, 0, point, true, true);
        // non-constant guard rooted in an Or/And of comparisons
        assert!(func.value_as_const_int(cond).is_none());
        assert_eq!(func.value_ty(cond), Type::I1);
    }
}
