//! Resolves `$ref/<step-id>/<output-name>` placeholders against the outputs
//! journal, walking arbitrary-shape JSON. Every scalar leaf reachable
//! through mappings and sequences is visited; a `$ref/`-prefixed string is
//! replaced with the value it names, everything else passes through
//! unchanged.

use serde_json::{Map, Value};

use crate::errors::PlanError;
use crate::journal::Journal;
use crate::protocol::StepOrder;

const REF_PREFIX: &str = "$ref/";

/// Recursively resolves every `$ref/` scalar leaf in `value` against
/// `journal`, returning a new, fully-resolved value. Non-string leaves
/// (notably integers, used for role identifiers) pass through unchanged.
/// `current_index` and `order` are used to reject a reference to a Step
/// that does not precede the one being resolved.
pub fn resolve(
    step_id: &str,
    current_index: usize,
    order: &StepOrder,
    value: &Value,
    journal: &Journal,
) -> Result<Value, PlanError> {
    match value {
        Value::String(s) => resolve_string(step_id, current_index, order, s, journal),
        Value::Array(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                resolved.push(resolve(step_id, current_index, order, item, journal)?);
            }
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve(step_id, current_index, order, v, journal)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    step_id: &str,
    current_index: usize,
    order: &StepOrder,
    s: &str,
    journal: &Journal,
) -> Result<Value, PlanError> {
    let Some(rest) = s.strip_prefix(REF_PREFIX) else {
        return Ok(Value::String(s.to_string()));
    };

    let segments: Vec<&str> = rest.split('/').collect();
    let [ref_step, ref_name] = segments.as_slice() else {
        return Err(PlanError::MalformedReference {
            step_id: step_id.to_string(),
            reference: s.to_string(),
        });
    };

    if !order.precedes(ref_step, current_index) {
        return Err(PlanError::ForwardReference {
            step_id: step_id.to_string(),
            ref_step: ref_step.to_string(),
            ref_name: ref_name.to_string(),
        });
    }

    if !journal.is_complete(ref_step) {
        return Err(PlanError::UnresolvedReference {
            step_id: step_id.to_string(),
            ref_step: ref_step.to_string(),
            ref_name: ref_name.to_string(),
        });
    }

    journal
        .get_output(ref_step, ref_name)
        .cloned()
        .ok_or_else(|| PlanError::UnresolvedReference {
            step_id: step_id.to_string(),
            ref_step: ref_step.to_string(),
            ref_name: ref_name.to_string(),
        })
}
