//! Deterministic, pure logic shared by the harness.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests (sentinel
//! generation draws randomness but performs no I/O).

pub mod framing;
pub mod policy;
pub mod state;
pub mod types;
