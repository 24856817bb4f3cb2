//! SSA intermediate representation.
//!
//! - **Arena** (`arena.rs`): typed IDs and flat storage
//! - **Function** (`function.rs`): values, instructions, blocks, intrinsics
//! - **Builder** (`builder.rs`): construction and insertion cursors
//! - **CFG** (`cfg.rs`): edges, dominators, natural-loop forest
//! - **Verify** (`verify.rs`): structural well-formedness checks
//!
//! The IR is deliberately small: it carries exactly the shapes the stream
//! inference pass needs to observe (affine address arithmetic, phi nodes,
//! memory operations, calls, inline assembly, SSR intrinsics) and nothing
//! else. Instructions live in an arena; a block owns an ordered list of
//! instruction IDs whose last entry is the terminator.

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod function;
pub mod verify;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::{FunctionBuilder, InstBuilder};
pub use cfg::{Cfg, DominatorTree, Loop, LoopForest};
pub use function::{
    BinOp, Block, BlockId, CmpPred, Const, FBinOp, FnAttrs, Function, InstId, InstKind,
    Instruction, SsrOp, Type, Value, ValueDef, ValueId,
};
pub use verify::{verify, VerifyError};
