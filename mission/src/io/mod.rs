//! Side-effecting adapters: processes, git, filesystem, strategist and history.

pub mod agent;
pub mod baseline;
pub mod config;
pub mod context;
pub mod doctor;
pub mod git;
pub mod history;
pub mod interrupt;
pub mod preflight;
pub mod process;
pub mod snapshot;
pub mod strategist;
pub mod verify;
