//! Shared run state threaded through every pipeline step.
//!
//! The context is a string-keyed map of JSON values so steps can exchange
//! heterogeneous structured data without knowing each other's types. Steps
//! only add or overwrite the keys they own; nothing is removed during a run.
use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Files handed to the run by the upstream producer.
pub const UPLOADED_FILES: &str = "uploaded_files";
/// Per-file raw content written by the extraction step.
pub const EXTRACTED_DATA: &str = "extracted_data";
/// Fixed-shape financial figures written by the extraction step.
pub const TAX_DATA: &str = "tax_data";
/// Primary form, schedules, and drafting rationale.
pub const DRAFTED_FORMS: &str = "drafted_forms";
/// Diagnostic issues plus severity counts.
pub const DIAGNOSTICS: &str = "diagnostics";
/// Proposed corrections for flagged issues.
pub const ADJUSTMENTS: &str = "adjustments";
/// Reserved for the orchestrator's per-step status and timing.
pub const STEP_PROGRESS: &str = "step_progress";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WorkflowContext {
    values: BTreeMap<String, Value>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `value` and store it under `key`, replacing any previous value.
    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value =
            serde_json::to_value(value).with_context(|| format!("serialize context key {key}"))?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn insert_value(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Decode the value under `key`, returning `None` when the key is absent or null.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.values.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .with_context(|| format!("decode context key {key}"))
                .map(Some),
        }
    }

    /// Decode the value under `key`, failing when an upstream step did not provide it.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| anyhow!("missing context key {key}"))
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn typed_round_trip_through_json_values() {
        let mut ctx = WorkflowContext::new();
        let sample = Sample {
            name: "a".to_string(),
            count: 2,
        };
        ctx.insert("sample", &sample).unwrap();
        assert_eq!(ctx.get::<Sample>("sample").unwrap(), Some(sample));
        assert!(ctx.contains_key("sample"));
    }

    #[test]
    fn null_and_missing_keys_read_as_absent() {
        let mut ctx = WorkflowContext::new();
        ctx.insert_value("empty", Value::Null);
        assert_eq!(ctx.get::<Sample>("empty").unwrap(), None);
        assert_eq!(ctx.get::<Sample>("missing").unwrap(), None);
        let err = ctx.require::<Sample>("missing").unwrap_err();
        assert!(err.to_string().contains("missing context key missing"));
    }

    #[test]
    fn mismatched_shape_is_an_error_not_absent() {
        let mut ctx = WorkflowContext::new();
        ctx.insert_value("sample", serde_json::json!({"name": 3}));
        assert!(ctx.get::<Sample>("sample").is_err());
    }
}
