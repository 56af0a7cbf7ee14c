//! Mission contract parsing and validation.
//!
//! A contract is produced by the strategist as JSON, often wrapped in prose or
//! markdown. Parsing extracts the outermost object, validates it against the
//! embedded schema, and fails closed on anything malformed.

use std::sync::LazyLock;

use jsonschema::{Validator, validator_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

static CONTRACT_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    serde_json::from_str(include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/schemas/mission_contract.schema.json"
    )))
    .expect("embedded contract schema should be valid JSON")
});

static CONTRACT_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    validator_for(&CONTRACT_SCHEMA).expect("embedded contract schema should compile")
});

/// Structured mission agreed with the strategist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionContract {
    pub objectives: Vec<String>,
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub agent_prompt: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_goals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checklist: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("Invalid mission JSON: {0}")]
    Json(String),
    #[error("mission contract failed schema validation: {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

impl MissionContract {
    pub fn new(
        objectives: Vec<String>,
        success_criteria: Vec<String>,
        agent_prompt: impl Into<String>,
    ) -> Self {
        Self {
            objectives,
            success_criteria,
            agent_prompt: agent_prompt.into(),
            summary: String::new(),
            non_goals: Vec::new(),
            checklist: Vec::new(),
            forbidden_actions: Vec::new(),
        }
    }

    /// Parse a raw strategist response into a validated contract.
    ///
    /// When the payload omits `agent_prompt`, `fallback_prompt` is used; a contract
    /// that still has no prompt is rejected.
    pub fn from_response(raw: &str, fallback_prompt: Option<&str>) -> Result<Self, ContractError> {
        let payload = extract_json_payload(raw)
            .ok_or_else(|| ContractError::Json("no JSON object found in response".to_string()))?;
        let value: Value =
            serde_json::from_str(payload).map_err(|err| ContractError::Json(err.to_string()))?;

        let errors = CONTRACT_VALIDATOR
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        if !errors.is_empty() {
            return Err(ContractError::Schema(errors));
        }

        let mut contract: MissionContract =
            serde_json::from_value(value).map_err(|err| ContractError::Json(err.to_string()))?;
        if contract.agent_prompt.trim().is_empty()
            && let Some(fallback) = fallback_prompt
        {
            contract.agent_prompt = fallback.to_string();
        }
        contract.validate()?;
        Ok(contract)
    }

    /// Check the structural requirements every executable contract must meet.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.objectives.is_empty() {
            return Err(ContractError::EmptyField("objectives"));
        }
        if self.success_criteria.is_empty() {
            return Err(ContractError::EmptyField("success_criteria"));
        }
        if self.agent_prompt.trim().is_empty() {
            return Err(ContractError::EmptyField("agent_prompt"));
        }
        Ok(())
    }

    /// Swap in a recovery prompt; objectives and criteria stay fixed.
    pub fn replace_prompt(&mut self, prompt: impl Into<String>) {
        self.agent_prompt = prompt.into();
    }
}

/// Slice from the first `{` to the last `}` of a response.
pub fn extract_json_payload(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
