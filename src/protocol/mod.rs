//! Plan data model: the declarative, step-based intermediate representation
//! the Executor drives to completion.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One of the fixed, closed set of control-plane operations a Step may
/// perform. New actions are not pluggable at runtime; the table is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    FindFarm,
    FindFarmRole,
    FindProject,
    ImportServer,
    CreateFarm,
    CreateFarmRole,
    LaunchFarm,
}

/// HTTP method a given action dispatches as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    List,
    Post,
}

impl Action {
    /// URL template, HTTP method, and whether this action is skipped in
    /// dry-run mode.
    pub fn url_template(&self) -> &'static str {
        match self {
            Action::FindFarm => "/api/v1beta0/user/{envId}/farms/",
            Action::FindFarmRole => "/api/v1beta0/user/{envId}/farms/{farmId}/farm-roles/",
            Action::FindProject => "/api/v1beta0/user/{envId}/projects/",
            Action::ImportServer => {
                "/api/v1beta0/user/{envId}/farm-roles/{farmRoleId}/actions/import-server/"
            }
            Action::CreateFarm => "/api/v1beta0/user/{envId}/farms/",
            Action::CreateFarmRole => "/api/v1beta0/user/{envId}/farms/{farmId}/farm-roles/",
            Action::LaunchFarm => "/api/v1beta0/user/{envId}/farms/{farmId}/actions/launch/",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Action::FindFarm | Action::FindFarmRole | Action::FindProject => Method::List,
            Action::ImportServer | Action::CreateFarm | Action::CreateFarmRole | Action::LaunchFarm => {
                Method::Post
            }
        }
    }

    pub fn skip_on_dry_run(&self) -> bool {
        matches!(self.method(), Method::Post)
    }

    /// The action's canonical name as it appears in plan files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::FindFarm => "find-farm",
            Action::FindFarmRole => "find-farm-role",
            Action::FindProject => "find-project",
            Action::ImportServer => "import-server",
            Action::CreateFarm => "create-farm",
            Action::CreateFarmRole => "create-farm-role",
            Action::LaunchFarm => "launch-farm",
        }
    }
}

/// One `{name, location}` output declaration: after a Step succeeds, the
/// value at `location` in the response record is captured under `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub location: String,
}

/// One unit of work in a Plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub action: Action,

    #[serde(default)]
    pub params: HashMap<String, Value>,

    #[serde(default)]
    pub query: HashMap<String, Value>,

    #[serde(default)]
    pub body: Value,

    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
}

/// A finite ordered sequence of Steps. Execution order is declared order;
/// there is no topological re-sort. A Plan file is a bare top-level YAML
/// sequence of Step mappings, so `Plan` deserializes transparently from
/// (and serializes back to) a plain list rather than a `steps:`-keyed map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    pub steps: Vec<Step>,
}

/// Maps each Step id to its position in a Plan, so reference resolution can
/// reject a `$ref` to a Step that does not precede the one resolving it.
#[derive(Debug, Clone, Default)]
pub struct StepOrder {
    positions: HashMap<String, usize>,
}

impl StepOrder {
    pub fn from_plan(plan: &Plan) -> Self {
        let positions = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id.clone(), i))
            .collect();
        Self { positions }
    }

    /// True iff `candidate` is a known Step id whose position is strictly
    /// before `current_index`.
    pub fn precedes(&self, candidate: &str, current_index: usize) -> bool {
        self.positions
            .get(candidate)
            .is_some_and(|&pos| pos < current_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_round_trips_kebab_case_names() {
        assert_eq!(Action::FindFarm.as_str(), "find-farm");
        assert_eq!(Action::ImportServer.as_str(), "import-server");
    }

    #[test]
    fn post_actions_skip_on_dry_run_list_actions_do_not() {
        assert!(!Action::FindFarm.skip_on_dry_run());
        assert!(Action::CreateFarm.skip_on_dry_run());
        assert!(Action::LaunchFarm.skip_on_dry_run());
    }

    #[test]
    fn deserializes_step_with_defaults() {
        let yaml = "id: s1\naction: find-farm\n";
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.id, "s1");
        assert_eq!(step.action, Action::FindFarm);
        assert!(step.params.is_empty());
        assert!(step.outputs.is_empty());
    }

    #[test]
    fn plan_deserializes_from_a_bare_top_level_sequence() {
        let yaml = "- id: s1\n  action: find-farm\n- id: s2\n  action: create-farm\n";
        let plan: Plan = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].id, "s1");
        assert_eq!(plan.steps[1].id, "s2");
    }

    #[test]
    fn plan_serializes_back_to_a_bare_sequence() {
        let plan = Plan {
            steps: vec![Step {
                id: "s1".to_string(),
                action: Action::FindFarm,
                params: HashMap::new(),
                query: HashMap::new(),
                body: Value::Null,
                outputs: vec![],
            }],
        };
        let yaml = serde_yaml::to_string(&plan).unwrap();
        let reparsed: Value = serde_yaml::from_str(&yaml).unwrap();
        assert!(reparsed.is_sequence());
    }

    #[test]
    fn step_order_rejects_a_step_that_does_not_precede() {
        let plan = Plan {
            steps: vec![
                Step {
                    id: "s1".to_string(),
                    action: Action::FindFarm,
                    params: HashMap::new(),
                    query: HashMap::new(),
                    body: Value::Null,
                    outputs: vec![],
                },
                Step {
                    id: "s2".to_string(),
                    action: Action::FindFarm,
                    params: HashMap::new(),
                    query: HashMap::new(),
                    body: Value::Null,
                    outputs: vec![],
                },
            ],
        };
        let order = StepOrder::from_plan(&plan);
        assert!(order.precedes("s1", 1));
        assert!(!order.precedes("s2", 1));
        assert!(!order.precedes("unknown", 1));
    }
}
