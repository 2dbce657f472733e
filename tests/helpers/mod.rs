//! Test helper modules for integration tests

pub mod harness;

pub use harness::*;
