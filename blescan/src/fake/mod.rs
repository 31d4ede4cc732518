//! An in-process radio stack for host-side testing.

pub mod stack;
pub use stack::{FakeStack, StackCall};
