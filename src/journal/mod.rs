//! The outputs journal: the sole durable record of Plan execution progress.
//!
//! Keyed by Step id, each entry holds the captured outputs plus a
//! `complete` flag. Persisted to disk after every successful Step so that a
//! crash leaves the system in a resumable state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutputs {
    #[serde(default)]
    pub complete: bool,

    #[serde(flatten)]
    pub values: HashMap<String, Value>,
}

/// Mapping from Step id to its captured outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Journal {
    #[serde(flatten)]
    entries: HashMap<String, StepOutputs>,
}

impl Journal {
    /// Journal path for a given plan file: `<plan-file>.status`.
    pub fn path_for_plan(plan_path: &Path) -> PathBuf {
        let mut os = plan_path.as_os_str().to_owned();
        os.push(".status");
        PathBuf::from(os)
    }

    /// Loads a journal from disk, returning an empty one if the file does
    /// not exist yet (first run).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::InvalidYaml(path.display().to_string(), e.to_string()))
    }

    pub fn is_complete(&self, step_id: &str) -> bool {
        self.entries.get(step_id).map(|e| e.complete).unwrap_or(false)
    }

    pub fn outputs_for(&self, step_id: &str) -> Option<&HashMap<String, Value>> {
        self.entries.get(step_id).map(|e| &e.values)
    }

    /// Resolves a single `$ref/<step>/<name>` path against the journal.
    pub fn get_output(&self, step_id: &str, name: &str) -> Option<&Value> {
        self.entries.get(step_id).and_then(|e| e.values.get(name))
    }

    pub fn set_output(&mut self, step_id: &str, name: String, value: Value) {
        self.entries.entry(step_id.to_string()).or_default().values.insert(name, value);
    }

    pub fn mark_complete(&mut self, step_id: &str) {
        self.entries.entry(step_id.to_string()).or_default().complete = true;
    }

    /// Persists the journal atomically: write to a sibling temp file, then
    /// rename over the destination. Never observed in a partially-written
    /// state.
    pub fn persist(&self, path: &Path) -> Result<(), ConfigError> {
        let serialized = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::InvalidYaml(path.display().to_string(), e.to_string()))?;

        let tmp_path = path.with_extension("status.tmp");
        {
            let mut tmp = std::fs::File::create(&tmp_path)
                .map_err(|e| ConfigError::Io(tmp_path.display().to_string(), e.to_string()))?;
            tmp.write_all(serialized.as_bytes())
                .map_err(|e| ConfigError::Io(tmp_path.display().to_string(), e.to_string()))?;
            tmp.sync_all()
                .map_err(|e| ConfigError::Io(tmp_path.display().to_string(), e.to_string()))?;
        }
        std::fs::rename(&tmp_path, path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile_shim::temp_path;

    mod tempfile_shim {
        use std::path::PathBuf;
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub fn temp_path(name: &str) -> PathBuf {
            let n = COUNTER.fetch_add(1, Ordering::SeqCst);
            std::env::temp_dir().join(format!("journal-test-{}-{}.yaml", name, n))
        }
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let path = temp_path("missing");
        let journal = Journal::load(&path).unwrap();
        assert!(!journal.is_complete("s1"));
    }

    #[test]
    fn persist_then_load_round_trips() {
        let path = temp_path("roundtrip");
        let mut journal = Journal::default();
        journal.set_output("s1", "farmid".to_string(), json!(42));
        journal.mark_complete("s1");
        journal.persist(&path).unwrap();

        let reloaded = Journal::load(&path).unwrap();
        assert!(reloaded.is_complete("s1"));
        assert_eq!(reloaded.get_output("s1", "farmid"), Some(&json!(42)));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn path_for_plan_appends_status_suffix() {
        let p = Journal::path_for_plan(Path::new("/tmp/plan.yaml"));
        assert_eq!(p, PathBuf::from("/tmp/plan.yaml.status"));
    }

    #[test]
    fn complete_requires_explicit_flag() {
        let mut journal = Journal::default();
        journal.set_output("s1", "x".to_string(), json!(1));
        assert!(!journal.is_complete("s1"));
        journal.mark_complete("s1");
        assert!(journal.is_complete("s1"));
    }
}
