//! Operator module.
//!
//! Contains the operator registry and built-in operator implementations.

pub mod builtin;
pub mod registry;

pub use registry::{
    FnOperatorSpi, OperatorConfig, OperatorFactory, OperatorRegistry, OperatorSpi, RegistryBuilder, RegistryEntry,
};
