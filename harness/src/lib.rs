//! Tool-execution harness for a conversational agent loop.
//!
//! The centrepiece is a persistent shell session: one long-lived interpreter
//! that runs commands sequentially, detects completion with per-command
//! sentinels, and respawns itself on timeouts and faults. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (command policy, sentinel framing, session state
//!   machine, wire types). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting components (output reader thread, shell
//!   session, execution handler, file editor, configuration).
//!
//! [`tools`] routes named tool calls to the handlers and is what an
//! orchestration loop drives.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
