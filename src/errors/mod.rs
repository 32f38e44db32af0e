//! Error taxonomy: configuration errors, Plan errors, and protocol (HTTP)
//! errors. A reconciliation that succeeds after a failed POST is not an
//! error at all and is logged, not surfaced, through this taxonomy.

use thiserror::Error;

/// Fatal before execution begins: bad flags, missing files, malformed YAML.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(String, String),

    #[error("malformed YAML in {0}: {1}")]
    InvalidYaml(String, String),
}

/// Fatal for the current Step: unknown action, unresolved `$ref`, missing
/// path-template variable, duplicate step id.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("step '{0}': duplicate step id")]
    DuplicateStepId(String),

    #[error("step '{step_id}': unresolved reference '$ref/{ref_step}/{ref_name}'")]
    UnresolvedReference {
        step_id: String,
        ref_step: String,
        ref_name: String,
    },

    #[error("step '{step_id}': malformed reference '{reference}' (expected '$ref/<step-id>/<output-name>')")]
    MalformedReference { step_id: String, reference: String },

    #[error("step '{step_id}': reference '$ref/{ref_step}/{ref_name}' does not precede this step")]
    ForwardReference {
        step_id: String,
        ref_step: String,
        ref_name: String,
    },

    #[error("step '{step_id}': missing path-template variable '{var}'")]
    MissingTemplateVar { step_id: String, var: String },
}

/// Fatal for the current Step unless a reconciliation rule applies:
/// non-2xx HTTP, malformed response body, list returning != 1 record.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {method} {path} -> HTTP {status}: {body}")]
    RequestFailed {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response body: {0}")]
    MalformedResponse(String),

    #[error("malformed query string: {0}")]
    MalformedQuery(String),
}

impl ClientError {
    /// HTTP status carried by this error, if any (used to gate whether
    /// create-or-find reconciliation is attempted after a failed POST).
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Step-level outcome: either of the two failure categories above, or a
/// list Step that did not return exactly one record.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("step '{step_id}': list action returned {count} results (expected 1)")]
    WrongResultCount { step_id: String, count: usize },

    #[error("step '{step_id}': output location '{location}' not found in result")]
    MissingOutputLocation { step_id: String, location: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
