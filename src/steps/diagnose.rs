//! Third step: rule-based checks over `drafted_forms`, written to `diagnostics`.

use crate::context::{WorkflowContext, DIAGNOSTICS, DRAFTED_FORMS};
use crate::diagnostics::{diagnose_forms, DiagnosticRules, DiagnosticsSummary};
use crate::forms::DraftedForms;
use crate::pipeline::Step;
use crate::provenance::{metadata, ProvenanceLedger};
use anyhow::Result;
use serde_json::json;

/// Run the configured diagnostic rules over the drafted forms.
pub struct Diagnostics {
    rules: DiagnosticRules,
}

impl Diagnostics {
    pub const NAME: &'static str = "Diagnostics";

    pub fn new(rules: DiagnosticRules) -> Self {
        Self { rules }
    }
}

impl Step for Diagnostics {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Run rule-based checks for arithmetic, completeness, and consistency issues"
    }

    fn run(&self, ctx: &mut WorkflowContext, ledger: &mut ProvenanceLedger) -> Result<()> {
        let forms: DraftedForms = ctx.require(DRAFTED_FORMS)?;
        let summary = DiagnosticsSummary::from_issues(diagnose_forms(&self.rules, &forms));
        ctx.insert(DIAGNOSTICS, &summary)?;

        ledger.add_record(
            Self::NAME,
            "diagnostic_summary",
            format!("Found {} issues", summary.total_issues),
            "diagnostic_step",
            0.95,
            metadata([
                ("total_issues", json!(summary.total_issues)),
                ("critical_issues", json!(summary.critical_issues)),
                ("warnings", json!(summary.warnings)),
                ("info", json!(summary.info)),
            ]),
        );
        Ok(())
    }
}
