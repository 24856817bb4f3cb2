//! Symbolic loop-invariant expressions.
//!
//! A small expression language over constants and IR values, used to carry
//! bounds, strides, and base-address offsets symbolically until the pass
//! decides to materialize them in a preheader. Smart constructors fold
//! constants so the cost model sees realistic expression sizes.

use crate::ir::{InstBuilder, Type, ValueId};

/// A symbolic integer expression.
///
/// `Value` leaves must be invariant at the point the expression is expanded;
/// the affine analysis enforces this before handing expressions to the pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(i64),
    Value(ValueId),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
}

impl Default for Expr {
    fn default() -> Self {
        Expr::Const(0)
    }
}

impl Expr {
    /// Folding addition.
    pub fn add(a: Expr, b: Expr) -> Expr {
        match (a, b) {
            (Expr::Const(x), Expr::Const(y)) => Expr::Const(x + y),
            (Expr::Const(0), e) | (e, Expr::Const(0)) => e,
            (a, b) => Expr::Add(Box::new(a), Box::new(b)),
        }
    }

    /// Folding subtraction.
    pub fn sub(a: Expr, b: Expr) -> Expr {
        match (a, b) {
            (Expr::Const(x), Expr::Const(y)) => Expr::Const(x - y),
            (e, Expr::Const(0)) => e,
            (a, b) if a == b => Expr::Const(0),
            (a, b) => Expr::Sub(Box::new(a), Box::new(b)),
        }
    }

    /// Folding multiplication.
    pub fn mul(a: Expr, b: Expr) -> Expr {
        match (a, b) {
            (Expr::Const(x), Expr::Const(y)) => Expr::Const(x * y),
            (Expr::Const(0), _) | (_, Expr::Const(0)) => Expr::Const(0),
            (Expr::Const(1), e) | (e, Expr::Const(1)) => e,
            (a, b) => Expr::Mul(Box::new(a), Box::new(b)),
        }
    }

    /// Constant payload, if the expression folded to a constant.
    pub fn as_const(&self) -> Option<i64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// Expression size: the number of nodes. This is what the gain model
    /// charges for materializing the expression in a preheader.
    pub fn size(&self) -> u32 {
        match self {
            Expr::Const(_) | Expr::Value(_) => 1,
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) => 1 + a.size() + b.size(),
        }
    }

    /// Visit every `Value` leaf.
    pub fn for_each_value(&self, f: &mut impl FnMut(ValueId)) {
        match self {
            Expr::Const(_) => {}
            Expr::Value(v) => f(*v),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) => {
                a.for_each_value(f);
                b.for_each_value(f);
            }
        }
    }

    /// Materialize the expression as `I32` arithmetic at the cursor.
    pub fn expand_i32(&self, b: &mut InstBuilder<'_>) -> ValueId {
        match self {
            Expr::Const(c) => b.const_int(Type::I32, *c),
            Expr::Value(v) => *v,
            Expr::Add(x, y) => {
                let (x, y) = (x.expand_i32(b), y.expand_i32(b));
                b.iadd(x, y)
            }
            Expr::Sub(x, y) => {
                let (x, y) = (x.expand_i32(b), y.expand_i32(b));
                b.isub(x, y)
            }
            Expr::Mul(x, y) => {
                let (x, y) = (x.expand_i32(b), y.expand_i32(b));
                b.imul(x, y)
            }
        }
    }
}
