//! Streaming-semantic-register (SSR) inference for affine loops.
//!
//! SSR is a hardware facility on a small RISC-class core: instead of issuing
//! explicit loads and stores inside a loop, the compiler configures a stream
//! engine (bounds, strides, repetition, base address) once in the loop
//! preheader, and the hardware then delivers operands straight to the
//! register file on every access. This crate infers such streams
//! automatically:
//!
//! - **IR** (`ir`): a compact SSA IR with basic blocks, phi nodes, loads and
//!   stores, and the SSR hardware intrinsics, plus CFG / dominator / loop
//!   analyses and a structural verifier.
//! - **Analysis** (`analysis`): induction variables, symbolic trip counts,
//!   and the affine-access analysis that classifies memory accesses as
//!   affine functions of enclosing induction variables and materializes
//!   their bounds at expansion time.
//! - **Pass** (`opt::ssr`): candidate selection over the loop nest, an
//!   integer cost model, runtime safety checks, fast/slow region cloning,
//!   and ordered intrinsic emission.
//!
//! The pass is a function-level transformation: it reads all analysis
//! results first, then mutates the IR, and tags transformed functions with
//! the `ssr` attribute so a second run is a no-op.

pub mod analysis;
pub mod ir;
pub mod opt;

pub use ir::{Block, BlockId, Function, FunctionBuilder, InstBuilder, InstId, Type, ValueId};
pub use opt::ssr::{SsrConfig, SsrInference, SsrStats};
pub use opt::FunctionPass;
