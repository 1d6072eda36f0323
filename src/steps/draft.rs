//! Second step: draft the forms with the inference client.
//!
//! Reads `tax_data` and `extracted_data`; writes `drafted_forms`. A reply
//! that does not parse as drafted forms fails the step.

use crate::context::{WorkflowContext, DRAFTED_FORMS, EXTRACTED_DATA, TAX_DATA};
use crate::extract::ExtractedFile;
use crate::forms::{DraftedForms, TaxData};
use crate::inference::{InferenceClient, InferenceRequest};
use crate::pipeline::Step;
use crate::prompts::{render_draft_prompt, DRAFT_SYSTEM};
use crate::provenance::{metadata, ProvenanceLedger};
use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;

/// Ask the inference client to fill in the primary form and both schedules.
pub struct DraftForms<'a> {
    client: &'a InferenceClient,
    temperature: f64,
    max_tokens: Option<u32>,
}

impl<'a> DraftForms<'a> {
    pub const NAME: &'static str = "DraftForms";

    pub fn new(client: &'a InferenceClient) -> Self {
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

impl Step for DraftForms<'_> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Draft the primary form and schedules from the extracted figures"
    }

    fn run(&self, ctx: &mut WorkflowContext, ledger: &mut ProvenanceLedger) -> Result<()> {
        let tax_data: TaxData = ctx.get(TAX_DATA)?.unwrap_or_default();
        let extracted: BTreeMap<String, ExtractedFile> =
            ctx.get(EXTRACTED_DATA)?.unwrap_or_default();
        let documents: Vec<(&str, &str)> = extracted
            .iter()
            .map(|(name, file)| (name.as_str(), file.text.as_str()))
            .collect();

        let request = InferenceRequest::new(render_draft_prompt(&tax_data, &documents))
            .with_system(DRAFT_SYSTEM)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        let drafted: DraftedForms = self
            .client
            .complete_structured(&request)
            .context("form drafting failed")?;

        ctx.insert(DRAFTED_FORMS, &drafted)?;

        for (line, form_line) in drafted.primary_form.iter() {
            let Some(value) = form_line.value else {
                continue;
            };
            ledger.add_record(
                Self::NAME,
                &format!("primary_form.{line}"),
                value,
                "llm_drafting",
                0.85,
                metadata([("description", json!(form_line.description))]),
            );
        }
        ledger.add_record(
            Self::NAME,
            "drafting_summary",
            format!("Drafted {} primary form lines", drafted.primary_form.len()),
            "llm_drafting_step",
            0.85,
            metadata([
                ("primary_form_lines", json!(drafted.primary_form.len())),
                ("schedule_a_lines", json!(drafted.schedule_a.len())),
                ("schedule_b_lines", json!(drafted.schedule_b.len())),
                ("reasoning", json!(drafted.reasoning)),
            ]),
        );
        Ok(())
    }
}
