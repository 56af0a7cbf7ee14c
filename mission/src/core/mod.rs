//! Deterministic, pure logic shared by the mission engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod baseline;
pub mod contract;
pub mod criteria;
pub mod expr;
pub mod memory;
pub mod recovery;
pub mod sections;
pub mod signals;
pub mod types;
