//! Stable exit codes for chill-vibe CLI commands.

/// Mission verified, or an auxiliary command succeeded.
pub const OK: i32 = 0;
/// Mission ran but did not verify (retries exhausted, loop broken, no recovery).
pub const FAILED: i32 = 1;
/// Invalid input: config, contract, preflight, unknown agent, or other setup errors.
pub const INVALID: i32 = 2;
/// Operator interrupted the mission.
pub const INTERRUPTED: i32 = 130;
