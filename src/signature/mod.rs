//! In-memory signature stores.
//!
//! Three key-value stores owned exclusively by the controller actor:
//! target fingerprints, per-substep step fingerprints, and an ordered record
//! log per workflow run. They live from controller start to shutdown;
//! persistence is a concern of whoever feeds them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::target::Target;

/// One entry in a workflow's record log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Record kind, e.g. `placeholder` or `step`.
    pub entry_type: String,
    pub payload: String,
    pub recorded_at: DateTime<Utc>,
}

impl WorkflowRecord {
    pub fn new(entry_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.into(),
            payload: payload.into(),
            recorded_at: Utc::now(),
        }
    }

    /// A placeholder record: a promised output that is not materialised yet.
    pub fn placeholder(payload: impl Into<String>) -> Self {
        Self::new("placeholder", payload)
    }
}

/// Fingerprints of individual targets.
#[derive(Debug, Default)]
pub struct TargetSignatures {
    map: HashMap<Target, String>,
}

impl TargetSignatures {
    pub fn set(&mut self, target: Target, signature: String) {
        self.map.insert(target, signature);
    }

    pub fn get(&self, target: &Target) -> Option<String> {
        self.map.get(target).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Fingerprints of executed steps, keyed by `(step_key, substep_index)`.
#[derive(Debug, Default)]
pub struct StepSignatures {
    map: HashMap<(String, u32), String>,
}

impl StepSignatures {
    pub fn set(&mut self, key: impl Into<String>, substep: u32, signature: String) {
        self.map.insert((key.into(), substep), signature);
    }

    pub fn get(&self, key: &str, substep: u32) -> Option<String> {
        self.map.get(&(key.to_string(), substep)).cloned()
    }
}

/// Ordered record logs per workflow id.
#[derive(Debug, Default)]
pub struct WorkflowSignatures {
    map: HashMap<String, Vec<WorkflowRecord>>,
}

impl WorkflowSignatures {
    pub fn write(&mut self, workflow_id: impl Into<String>, record: WorkflowRecord) {
        self.map.entry(workflow_id.into()).or_default().push(record);
    }

    pub fn records(&self, workflow_id: &str) -> Vec<WorkflowRecord> {
        self.map.get(workflow_id).cloned().unwrap_or_default()
    }

    /// Payloads of placeholder records for one workflow.
    pub fn placeholders(&self, workflow_id: &str) -> Vec<String> {
        self.map
            .get(workflow_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.entry_type == "placeholder")
                    .map(|r| r.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
