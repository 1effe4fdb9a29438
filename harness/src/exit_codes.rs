//! Stable exit codes for the harness CLI.

/// Command ran and exited 0, or the policy allowed it.
pub const OK: i32 = 0;
/// Invalid config/input or other harness errors.
pub const INVALID: i32 = 1;
/// `harness exec` ran a command that failed, timed out, or was rejected.
pub const FAILED: i32 = 2;
/// `harness check` found the command on the denylist.
pub const BLOCKED: i32 = 3;
