//! Append-only provenance ledger for audit trails.
//!
//! Every derived value written by a step is recorded here with its source and
//! a heuristic confidence. Records are never mutated or removed individually;
//! the ledger outlives a single run and is only emptied by `clear`.
use crate::util::now_epoch_ms;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One immutable fact about the origin of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub step: String,
    pub field: String,
    pub value: Value,
    pub source_ref: String,
    /// Expected in `[0, 1]`; out-of-range values are stored as given.
    pub confidence: f64,
    /// Milliseconds since the Unix epoch, non-decreasing within a ledger.
    pub timestamp: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Default)]
pub struct ProvenanceLedger {
    records: Vec<ProvenanceRecord>,
    last_timestamp: u64,
}

impl ProvenanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Never fails; callers are trusted to pass sane confidences.
    pub fn add_record(
        &mut self,
        step: &str,
        field: &str,
        value: impl Into<Value>,
        source_ref: &str,
        confidence: f64,
        metadata: Map<String, Value>,
    ) {
        let timestamp = now_epoch_ms().max(self.last_timestamp);
        self.last_timestamp = timestamp;
        tracing::trace!(step, field, source_ref, confidence, "provenance record");
        self.records.push(ProvenanceRecord {
            step: step.to_string(),
            field: field.to_string(),
            value: value.into(),
            source_ref: source_ref.to_string(),
            confidence,
            timestamp,
            metadata,
        });
    }

    pub fn records(&self) -> &[ProvenanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get_by_step(&self, step: &str) -> Vec<&ProvenanceRecord> {
        self.records.iter().filter(|r| r.step == step).collect()
    }

    pub fn get_by_field(&self, field: &str) -> Vec<&ProvenanceRecord> {
        self.records.iter().filter(|r| r.field == field).collect()
    }

    /// Value of the chronologically last record for `field`.
    ///
    /// Ties on timestamp resolve to the later insertion.
    pub fn latest_value(&self, field: &str) -> Option<&Value> {
        self.records
            .iter()
            .filter(|r| r.field == field)
            .max_by_key(|r| r.timestamp)
            .map(|r| &r.value)
    }

    /// Mean recorded confidence per field.
    pub fn confidence_summary(&self) -> BTreeMap<String, f64> {
        let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for record in &self.records {
            let entry = sums.entry(record.field.as_str()).or_insert((0.0, 0));
            entry.0 += record.confidence;
            entry.1 += 1;
        }
        sums.into_iter()
            .map(|(field, (sum, count))| (field.to_string(), sum / count as f64))
            .collect()
    }

    /// Flat copy of every record in insertion order.
    pub fn export(&self) -> Vec<ProvenanceRecord> {
        self.records.clone()
    }

    /// Write the export as JSONL, one record per line.
    pub fn write_jsonl(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for record in &self.records {
            let line = serde_json::to_string(record).context("serialize provenance record")?;
            writer
                .write_all(line.as_bytes())
                .with_context(|| format!("write {}", path.display()))?;
            writer
                .write_all(b"\n")
                .with_context(|| format!("write {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("flush {}", path.display()))?;
        Ok(())
    }

    /// Drop every record. Intended for a full process reset, not between runs.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Build a metadata map from `(key, value)` pairs.
pub fn metadata<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
