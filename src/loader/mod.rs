//! Plan file loading and validation.

use std::collections::HashSet;
use std::path::Path;

use crate::errors::{ConfigError, PlanError};
use crate::protocol::Plan;

pub fn load_plan_from_file(path: &Path) -> Result<Plan, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
    let plan: Plan = serde_yaml::from_str(&content)
        .map_err(|e| ConfigError::InvalidYaml(path.display().to_string(), e.to_string()))?;
    Ok(plan)
}

/// Validates structural properties the Executor relies on: unique step
/// ids. Unknown actions are already rejected at deserialize time since
/// `Action` is a closed serde enum; forward references are a resolve-time
/// concern and are not checked here.
pub fn validate_plan(plan: &Plan) -> Result<(), PlanError> {
    let mut seen = HashSet::new();
    for step in &plan.steps {
        if !seen.insert(step.id.clone()) {
            return Err(PlanError::DuplicateStepId(step.id.clone()));
        }
    }
    Ok(())
}
