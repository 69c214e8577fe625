//! Built-in path-sensitive checkers.

mod bad_scaled_pointer_arithmetic;

pub use bad_scaled_pointer_arithmetic::{BAD_SCALED_POINTER_ARITHMETIC, BUG_TYPE, BadScaledPointerArithmetic};

use crate::checker::Checker;

/// Every built-in checker, in registration order.
pub fn builtin() -> Vec<Box<dyn Checker>> {
    vec![Box::new(BadScaledPointerArithmetic)]
}
