//! Read-only analyses consumed by the stream inference pass.
//!
//! - **Expressions** (`expr.rs`): loop-invariant symbolic expressions that
//!   can be sized for the cost model and materialized as IR at a preheader
//! - **Induction** (`induction.rs`): canonical induction variables
//! - **Trip counts** (`trip_count.rs`): symbolic iteration counts
//! - **Affine accesses** (`affine.rs`): classification of loads/stores as
//!   affine functions of induction variables, pairwise conflicts, and bulk
//!   materialization of bounds/strides/checks
//!
//! All results are computed once per function and never updated after the
//! pass starts mutating the IR.

pub mod affine;
pub mod expr;
pub mod induction;
pub mod trip_count;

pub use affine::{
    AccessId, AffineAccess, AffineAccessAnalysis, Conflict, ConflictKind, ExpandedAccess,
};
pub use expr::Expr;
pub use induction::{find_induction_vars, is_invariant_in, InductionVar};
pub use trip_count::{loop_trip_count, TripCount};
