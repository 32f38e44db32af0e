//! Drives a Plan to completion, one Step at a time, strictly in declared
//! order: resolves references, dispatches each Step's action to the
//! correct HTTP verb/URL template, extracts declared outputs, persists the
//! outputs journal after every successful Step, skips Steps already marked
//! complete on a previous run, and applies create-or-find reconciliation
//! on POST failure.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::client::{build_raw_query, SignedHttpClient};
use crate::errors::{ClientError, StepError};
use crate::journal::Journal;
use crate::protocol::{Action, Method, Plan, Step, StepOrder};
use crate::resolver;

/// HTTP statuses the control plane uses for "object already exists" /
/// validation-conflict responses. Reconciliation is attempted only when a
/// failed POST carries one of these; any other status propagates.
const RECONCILIATION_STATUSES: [u16; 2] = [400, 409];

pub struct Executor {
    client: SignedHttpClient,
    dry_run: bool,
    journal_path: PathBuf,
}

#[derive(Debug)]
pub struct StepOutcome {
    pub step_id: String,
    pub skipped: bool,
    pub dry_run_skipped: bool,
}

impl Executor {
    pub fn new(client: SignedHttpClient, dry_run: bool, journal_path: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dry_run,
            journal_path: journal_path.into(),
        }
    }

    /// Drives `plan` to completion against `journal`, persisting after
    /// every successful Step. Returns the outcomes of the Steps actually
    /// attempted (skips included) up to, and including, the first failure.
    pub async fn run(&self, plan: &Plan, journal: &mut Journal) -> Result<Vec<StepOutcome>, StepError> {
        let order = StepOrder::from_plan(plan);
        let mut outcomes = Vec::with_capacity(plan.steps.len());

        for (index, step) in plan.steps.iter().enumerate() {
            if journal.is_complete(&step.id) {
                info!(step_id = %step.id, "already complete, skipping");
                outcomes.push(StepOutcome {
                    step_id: step.id.clone(),
                    skipped: true,
                    dry_run_skipped: false,
                });
                continue;
            }

            let outcome = self.run_step(step, index, &order, journal).await?;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    async fn run_step(
        &self,
        step: &Step,
        index: usize,
        order: &StepOrder,
        journal: &mut Journal,
    ) -> Result<StepOutcome, StepError> {
        info!(step_id = %step.id, action = step.action.as_str(), "executing step");

        if self.dry_run && step.action.skip_on_dry_run() {
            let url = self.resolve_url(step, index, order, journal)?;
            let body = resolver::resolve(&step.id, index, order, &step.body, journal)?;
            info!(step_id = %step.id, url = %url, body = %body, "dry run: skipping mutating step");
            return Ok(StepOutcome {
                step_id: step.id.clone(),
                skipped: false,
                dry_run_skipped: true,
            });
        }

        let url = self.resolve_url(step, index, order, journal)?;
        let query = resolver::resolve(
            &step.id,
            index,
            order,
            &Value::Object(step.query.clone().into_iter().collect()),
            journal,
        )?;
        let query_map: HashMap<String, Value> = query
            .as_object()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        let raw_query = build_raw_query(&query_map);
        let full_path = if raw_query.is_empty() {
            url.clone()
        } else {
            format!("{}?{}", url, raw_query)
        };

        let result = match step.action.method() {
            Method::List => self.run_list(step, &full_path).await?,
            Method::Post => {
                let body = resolver::resolve(&step.id, index, order, &step.body, journal)?;
                self.run_post(step, &full_path, &url, &body).await?
            }
        };

        self.apply_outputs(step, &result, journal)?;
        journal.mark_complete(&step.id);
        journal
            .persist(&self.journal_path)
            .map_err(StepError::Config)?;

        Ok(StepOutcome {
            step_id: step.id.clone(),
            skipped: false,
            dry_run_skipped: false,
        })
    }

    fn resolve_url(
        &self,
        step: &Step,
        index: usize,
        order: &StepOrder,
        journal: &Journal,
    ) -> Result<String, StepError> {
        let params = resolver::resolve(
            &step.id,
            index,
            order,
            &Value::Object(step.params.clone().into_iter().collect()),
            journal,
        )?;
        let mut url = step.action.url_template().to_string();

        if let Value::Object(map) = &params {
            for (key, value) in map {
                let placeholder = format!("{{{}}}", key);
                let value_str = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                url = url.replace(&placeholder, &value_str);
            }
        }

        if url.contains('{') {
            let start = url.find('{').unwrap();
            let end = url[start..].find('}').map(|e| start + e + 1).unwrap_or(url.len());
            let var = url[start + 1..end.saturating_sub(1)].to_string();
            return Err(crate::errors::PlanError::MissingTemplateVar {
                step_id: step.id.clone(),
                var,
            }
            .into());
        }

        Ok(url)
    }

    async fn run_list(&self, step: &Step, full_path: &str) -> Result<Value, StepError> {
        let data = self.client.list(full_path).await.map_err(StepError::Client)?;
        if data.len() != 1 {
            warn!(step_id = %step.id, count = data.len(), "list action did not return exactly one result");
            return Err(StepError::WrongResultCount {
                step_id: step.id.clone(),
                count: data.len(),
            });
        }
        Ok(data.into_iter().next().unwrap())
    }

    async fn run_post(
        &self,
        step: &Step,
        full_path: &str,
        base_url: &str,
        body: &Value,
    ) -> Result<Value, StepError> {
        match self.client.post(full_path, body).await {
            Ok(data) => Ok(data),
            Err(err) => self.reconcile(step, base_url, body, err).await,
        }
    }

    /// Attempted only for the three whitelisted actions, and only when the
    /// failure's status indicates a pre-existing-object conflict.
    async fn reconcile(
        &self,
        step: &Step,
        url: &str,
        body: &Value,
        original_err: ClientError,
    ) -> Result<Value, StepError> {
        let should_attempt = original_err
            .status()
            .map(|s| RECONCILIATION_STATUSES.contains(&s))
            .unwrap_or(false);

        if !should_attempt {
            return Err(StepError::Client(original_err));
        }

        let lookup = reconciliation_lookup(step.action, url, body);

        let Some((base, query)) = lookup else {
            return Err(StepError::Client(original_err));
        };

        let full_path = format!("{}?{}", base, query);
        let data = self.client.list(&full_path).await.map_err(StepError::Client)?;

        match data.into_iter().next() {
            Some(record) => {
                info!(step_id = %step.id, "reconciled via lookup after create failure");
                Ok(record)
            }
            None => Err(StepError::Client(original_err)),
        }
    }

    fn apply_outputs(&self, step: &Step, result: &Value, journal: &mut Journal) -> Result<(), StepError> {
        for output in &step.outputs {
            let value = result.get(&output.location).cloned().ok_or_else(|| {
                StepError::MissingOutputLocation {
                    step_id: step.id.clone(),
                    location: output.location.clone(),
                }
            })?;
            journal.set_output(&step.id, output.name.clone(), value);
        }
        Ok(())
    }
}

pub fn journal_path_for(plan_path: &Path) -> PathBuf {
    Journal::path_for_plan(plan_path)
}

/// Determines the action-specific create-or-find lookup (path + raw query)
/// for a failed post. Returns `None` for actions with no reconciliation
/// rule, or when the body lacks the field the lookup needs.
fn reconciliation_lookup(action: Action, url: &str, body: &Value) -> Option<(String, String)> {
    match action {
        Action::CreateFarm => body
            .get("name")
            .and_then(Value::as_str)
            .map(|name| (url.to_string(), format!("name={}", urlencoding::encode(name)))),
        Action::CreateFarmRole => body
            .get("alias")
            .and_then(Value::as_str)
            .map(|alias| (url.to_string(), format!("alias={}", urlencoding::encode(alias)))),
        Action::ImportServer => body.get("cloudServerId").and_then(Value::as_str).map(|id| {
            (
                url.replace("actions/import-server", "servers"),
                format!("cloudServerId={}", urlencoding::encode(id)),
            )
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OutputSpec;
    use std::collections::HashMap;

    fn step(id: &str, action: Action) -> Step {
        Step {
            id: id.to_string(),
            action,
            params: HashMap::new(),
            query: HashMap::new(),
            body: Value::Null,
            outputs: vec![],
        }
    }

    fn single_step_order(s: &Step) -> StepOrder {
        StepOrder::from_plan(&Plan {
            steps: vec![s.clone()],
        })
    }

    #[test]
    fn resolve_url_substitutes_params() {
        let exec = Executor::new(
            SignedHttpClient::new("https://x", "k", "s"),
            false,
            "/tmp/plan.yaml.status",
        );
        let mut s = step("s1", Action::FindFarm);
        s.params.insert("envId".to_string(), Value::String("42".to_string()));
        let order = single_step_order(&s);
        let journal = Journal::default();
        let url = exec.resolve_url(&s, 0, &order, &journal).unwrap();
        assert_eq!(url, "/api/v1beta0/user/42/farms/");
    }

    #[test]
    fn resolve_url_missing_param_is_fatal() {
        let exec = Executor::new(
            SignedHttpClient::new("https://x", "k", "s"),
            false,
            "/tmp/plan.yaml.status",
        );
        let s = step("s1", Action::FindFarm);
        let order = single_step_order(&s);
        let journal = Journal::default();
        let err = exec.resolve_url(&s, 0, &order, &journal).unwrap_err();
        assert!(matches!(err, StepError::Plan(crate::errors::PlanError::MissingTemplateVar { .. })));
    }

    #[test]
    fn apply_outputs_writes_declared_locations() {
        let exec = Executor::new(
            SignedHttpClient::new("https://x", "k", "s"),
            false,
            "/tmp/plan.yaml.status",
        );
        let mut s = step("s1", Action::FindFarm);
        s.outputs.push(OutputSpec {
            name: "farmid".to_string(),
            location: "id".to_string(),
        });
        let mut journal = Journal::default();
        let result = serde_json::json!({"id": "f-1"});
        exec.apply_outputs(&s, &result, &mut journal).unwrap();
        assert_eq!(journal.get_output("s1", "farmid"), Some(&Value::String("f-1".to_string())));
    }

    #[test]
    fn reconciliation_lookup_for_create_farm_uses_name() {
        let body = serde_json::json!({"name": "acme", "project": {"id": "p1"}});
        let (base, query) = reconciliation_lookup(Action::CreateFarm, "/api/v1beta0/user/1/farms/", &body).unwrap();
        assert_eq!(base, "/api/v1beta0/user/1/farms/");
        assert_eq!(query, "name=acme");
    }

    #[test]
    fn reconciliation_lookup_for_create_farm_role_uses_alias() {
        let body = serde_json::json!({"alias": "web"});
        let (_, query) = reconciliation_lookup(Action::CreateFarmRole, "/x/farm-roles/", &body).unwrap();
        assert_eq!(query, "alias=web");
    }

    #[test]
    fn reconciliation_lookup_for_import_server_substitutes_path_and_uses_cloud_id() {
        let body = serde_json::json!({"cloudServerId": "i-abc"});
        let (base, query) = reconciliation_lookup(
            Action::ImportServer,
            "/api/v1beta0/user/1/farm-roles/5/actions/import-server/",
            &body,
        )
        .unwrap();
        assert_eq!(base, "/api/v1beta0/user/1/farm-roles/5/servers/");
        assert_eq!(query, "cloudServerId=i-abc");
    }

    #[test]
    fn reconciliation_lookup_for_launch_farm_has_no_rule() {
        let body = serde_json::json!({});
        assert!(reconciliation_lookup(Action::LaunchFarm, "/x", &body).is_none());
    }

    #[test]
    fn reconciliation_lookup_missing_field_yields_none() {
        let body = serde_json::json!({});
        assert!(reconciliation_lookup(Action::CreateFarm, "/x", &body).is_none());
    }

    #[test]
    fn apply_outputs_missing_location_is_fatal() {
        let exec = Executor::new(
            SignedHttpClient::new("https://x", "k", "s"),
            false,
            "/tmp/plan.yaml.status",
        );
        let mut s = step("s1", Action::FindFarm);
        s.outputs.push(OutputSpec {
            name: "farmid".to_string(),
            location: "missing".to_string(),
        });
        let mut journal = Journal::default();
        let result = serde_json::json!({"id": "f-1"});
        let err = exec.apply_outputs(&s, &result, &mut journal).unwrap_err();
        assert!(matches!(err, StepError::MissingOutputLocation { .. }));
    }
}
