//! Typed failures the CLI maps to distinct exit codes.
//!
//! Everything else travels as `anyhow::Error` with context.

use thiserror::Error;

use crate::core::contract::ContractError;

#[derive(Debug, Error)]
pub enum MissionError {
    #[error("could not parse mission contract: {0}")]
    ContractParse(#[from] ContractError),
    #[error("mission contract rejected: {}", .0.join("; "))]
    ContractInvalid(Vec<String>),
    #[error("strategist could not classify the failure: {0}")]
    ClassificationUnavailable(String),
    #[error("rollback failed: {0}")]
    Rollback(String),
    #[error("strategist call failed: {0}")]
    Strategist(String),
    #[error("unknown agent '{name}' (available: {})", .available.join(", "))]
    UnknownAgent {
        name: String,
        available: Vec<String>,
    },
}
