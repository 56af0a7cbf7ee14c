//! Mission verification and recovery engine behind `chill-vibe`.
//!
//! An external coding agent is handed a mission contract and supervised
//! through run, verify and recover cycles until the contract's success
//! criteria pass or the retry budget runs out. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (criteria parsing, signal
//!   classification, memory ranking, state transitions). No I/O.
//! - **[`io`]**: Side-effecting operations (processes, git, filesystem,
//!   strategist calls, history log).
//!
//! Orchestration modules ([`plan`], [`mission`]) coordinate the two to
//! implement the CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod mission;
pub mod plan;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
