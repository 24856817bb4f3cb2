//! Transformation passes.

pub mod ssr;

use crate::ir::Function;

/// A function-level transformation pass.
pub trait FunctionPass {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Run the pass; returns `true` if the function was modified.
    fn run(&mut self, func: &mut Function) -> bool;
}
