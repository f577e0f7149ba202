//! Built-in operator implementations.
//!
//! This module contains the standard operators that ship with tilegraph.

mod copy;
mod linear;
mod normalized_difference;

use crate::operators::registry::OperatorRegistry;

/// Register all built-in operators.
pub fn register_all(registry: &mut OperatorRegistry) {
    copy::register(registry);
    linear::register(registry);
    normalized_difference::register(registry);
}

// Re-export for direct access
pub use copy::{CopyConfig, CopyOperator};
pub use linear::{LinearConfig, LinearTransform};
pub use normalized_difference::{
    NormalizedDifference, NormalizedDifferenceConfig, ARITHMETIC_FLAG, FLAGS_BAND, HIGH_FLAG, INDEX_BAND, LOW_FLAG,
};
