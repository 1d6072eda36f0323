//! Fourth step: suggestions for the issues found by diagnostics.
//!
//! Reads `diagnostics`, `drafted_forms`, and `tax_data`; writes `adjustments`.

use crate::context::{WorkflowContext, ADJUSTMENTS, DIAGNOSTICS, DRAFTED_FORMS, TAX_DATA};
use crate::diagnostics::{DiagnosticsSummary, Severity};
use crate::forms::{DraftedForms, TaxData};
use crate::inference::InferenceClient;
use crate::pipeline::Step;
use crate::provenance::{metadata, ProvenanceLedger};
use crate::suggestions::{AdjustmentsReport, SuggestionEngine};
use anyhow::Result;
use serde_json::json;

/// Propose a correction for every critical or warning issue.
///
/// The forms are left untouched; applying suggestions is up to the caller.
pub struct Adjustments<'a> {
    client: Option<&'a InferenceClient>,
    temperature: f64,
    max_tokens: Option<u32>,
}

impl<'a> Adjustments<'a> {
    pub const NAME: &'static str = "Adjustments";

    pub fn new(client: Option<&'a InferenceClient>) -> Self {
        Self {
            client,
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }
}

impl Step for Adjustments<'_> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Suggest corrections for flagged diagnostic issues"
    }

    fn run(&self, ctx: &mut WorkflowContext, ledger: &mut ProvenanceLedger) -> Result<()> {
        let diagnostics: DiagnosticsSummary = ctx.require(DIAGNOSTICS)?;
        let forms: DraftedForms = ctx.require(DRAFTED_FORMS)?;
        let tax_data: TaxData = ctx.get(TAX_DATA)?.unwrap_or_default();

        let engine = SuggestionEngine::new(self.client)
            .with_sampling(self.temperature, self.max_tokens);
        let outcomes = engine.suggest_all(&diagnostics.issues, &forms, &tax_data);
        let report = AdjustmentsReport::from_outcomes(outcomes);
        ctx.insert(ADJUSTMENTS, &report)?;

        let critical = diagnostics
            .issues
            .iter()
            .filter(|issue| issue.severity == Severity::Critical)
            .count();
        ledger.add_record(
            Self::NAME,
            "adjustment_summary",
            format!("Generated {} suggestions", report.total_suggestions),
            "adjustment_step",
            0.8,
            metadata([
                ("total_suggestions", json!(report.total_suggestions)),
                ("issues_processed", json!(diagnostics.issues.len())),
                ("critical_issues", json!(critical)),
                ("skipped", json!(report.skipped.len())),
            ]),
        );
        Ok(())
    }
}
