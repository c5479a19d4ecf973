//! Testing utilities and mock implementations
//!
//! Lets the service be exercised end to end without a STOMP broker.

pub mod mocks;

pub use mocks::*;
