//! Corrections for diagnostic issues.
//!
//! Each issue kind with a known fix has a deterministic corrector; anything
//! else is handed to the inference client. Every processed issue yields a
//! `SuggestionOutcome` so callers can see which issues were left unaddressed
//! and why. Suggestions never touch the forms; `apply_suggestion` does that on
//! request.
use crate::diagnostics::{DiagnosticIssue, IssueKind, Severity};
use crate::forms::{number_from_value, DraftedForms, FormId, TaxData};
use crate::inference::{InferenceClient, InferenceRequest};
use crate::prompts::render_adjustment_prompt;
use crate::util::format_amount;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// COGS share of gross receipts proposed for an over-threshold ratio.
const TYPICAL_COGS_RATIO: f64 = 0.7;
const DEFAULT_LM_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    MathematicalCorrection,
    RatioAdjustment,
    MissingFieldPopulation,
    NegativeValueCorrection,
    ScheduleCorrection,
    LlmSuggestion,
}

impl AdjustmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentType::MathematicalCorrection => "mathematical_correction",
            AdjustmentType::RatioAdjustment => "ratio_adjustment",
            AdjustmentType::MissingFieldPopulation => "missing_field_population",
            AdjustmentType::NegativeValueCorrection => "negative_value_correction",
            AdjustmentType::ScheduleCorrection => "schedule_correction",
            AdjustmentType::LlmSuggestion => "llm_suggestion",
        }
    }
}

impl fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A proposed new value for one form line, tied to the issue that prompted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentSuggestion {
    pub issue_id: String,
    pub form: FormId,
    pub field: String,
    pub current_value: Option<f64>,
    pub suggested_value: f64,
    pub adjustment_type: AdjustmentType,
    pub description: String,
    pub reasoning: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub priority: Priority,
}

/// Result of processing one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SuggestionOutcome {
    Suggested(AdjustmentSuggestion),
    /// Nothing to propose: informational issue, or inputs the corrector needs are absent.
    Skipped { issue_id: String, reason: String },
    /// The inference-backed corrector was attempted and did not produce a usable value.
    Failed { issue_id: String, reason: String },
}

impl SuggestionOutcome {
    fn skipped(issue: &DiagnosticIssue, reason: impl Into<String>) -> Self {
        SuggestionOutcome::Skipped {
            issue_id: issue.id.clone(),
            reason: reason.into(),
        }
    }

    fn failed(issue: &DiagnosticIssue, reason: impl Into<String>) -> Self {
        SuggestionOutcome::Failed {
            issue_id: issue.id.clone(),
            reason: reason.into(),
        }
    }

    pub fn suggestion(&self) -> Option<&AdjustmentSuggestion> {
        match self {
            SuggestionOutcome::Suggested(suggestion) => Some(suggestion),
            _ => None,
        }
    }

    pub fn issue_id(&self) -> &str {
        match self {
            SuggestionOutcome::Suggested(suggestion) => &suggestion.issue_id,
            SuggestionOutcome::Skipped { issue_id, .. }
            | SuggestionOutcome::Failed { issue_id, .. } => issue_id,
        }
    }
}

/// Shape requested from the inference client for issues without a dedicated corrector.
#[derive(Debug, Deserialize)]
struct LmSuggestion {
    #[serde(default)]
    suggested_value: Value,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

pub struct SuggestionEngine<'a> {
    client: Option<&'a InferenceClient>,
    temperature: f64,
    max_tokens: Option<u32>,
}

impl<'a> SuggestionEngine<'a> {
    /// Without a client, issues that need inference are skipped.
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

    /// Outcomes for every critical or warning issue, in issue order.
    pub fn suggest_all(
        &self,
        issues: &[DiagnosticIssue],
        forms: &DraftedForms,
        tax_data: &TaxData,
    ) -> Vec<SuggestionOutcome> {
        issues
            .iter()
            .filter(|issue| issue.severity != Severity::Info)
            .map(|issue| self.suggest(issue, forms, tax_data))
            .collect()
    }

    pub fn suggest(
        &self,
        issue: &DiagnosticIssue,
        forms: &DraftedForms,
        tax_data: &TaxData,
    ) -> SuggestionOutcome {
        if issue.severity == Severity::Info {
            return SuggestionOutcome::skipped(issue, "informational issues are not corrected");
        }
        let outcome = match issue.kind {
            IssueKind::MathError => suggest_math_correction(issue),
            IssueKind::HighCogsRatio => suggest_cogs_adjustment(issue, forms),
            IssueKind::MissingField => suggest_missing_field(issue, tax_data),
            IssueKind::NegativeValue => suggest_negative_correction(issue),
            IssueKind::ScheduleInconsistency => suggest_schedule_correction(issue),
            IssueKind::LargeValue | IssueKind::Unclassified => self.suggest_generic(issue, tax_data),
        };
        match &outcome {
            SuggestionOutcome::Suggested(suggestion) => tracing::debug!(
                issue = %issue.id,
                adjustment = %suggestion.adjustment_type,
                suggested_value = suggestion.suggested_value,
                "suggestion generated"
            ),
            SuggestionOutcome::Skipped { reason, .. } => {
                tracing::debug!(issue = %issue.id, reason = %reason, "suggestion skipped")
            }
            SuggestionOutcome::Failed { reason, .. } => {
                tracing::debug!(issue = %issue.id, reason = %reason, "suggestion failed")
            }
        }
        outcome
    }

    fn suggest_generic(&self, issue: &DiagnosticIssue, tax_data: &TaxData) -> SuggestionOutcome {
        let Some(client) = self.client else {
            return SuggestionOutcome::skipped(issue, "no inference providers configured");
        };
        let request = InferenceRequest::new(render_adjustment_prompt(issue, tax_data))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        let reply: LmSuggestion = match client.complete_structured(&request) {
            Ok(reply) => reply,
            Err(err) => return SuggestionOutcome::failed(issue, err.to_string()),
        };
        let Some(suggested_value) = number_from_value(&reply.suggested_value) else {
            return SuggestionOutcome::failed(issue, "response carried no numeric suggested_value");
        };
        SuggestionOutcome::Suggested(AdjustmentSuggestion {
            issue_id: issue.id.clone(),
            form: issue.form,
            field: issue.field.clone(),
            current_value: issue.value,
            suggested_value,
            adjustment_type: AdjustmentType::LlmSuggestion,
            description: format!("Model-suggested adjustment for {}", issue.field),
            reasoning: reply
                .reasoning
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "Model-generated suggestion".to_string()),
            confidence: reply
                .confidence
                .unwrap_or(DEFAULT_LM_CONFIDENCE)
                .clamp(0.0, 1.0),
            priority: Priority::Medium,
        })
    }
}

fn suggest_math_correction(issue: &DiagnosticIssue) -> SuggestionOutcome {
    let Some(expected) = issue.expected else {
        return SuggestionOutcome::skipped(issue, "issue carries no expected value");
    };
    let current = display_value(issue.value);
    SuggestionOutcome::Suggested(AdjustmentSuggestion {
        issue_id: issue.id.clone(),
        form: issue.form,
        field: issue.field.clone(),
        current_value: issue.value,
        suggested_value: expected,
        adjustment_type: AdjustmentType::MathematicalCorrection,
        description: format!("Correct {} from {current} to {expected}", issue.field),
        reasoning: format!("Mathematical calculation error. {}", issue.description),
        confidence: 0.95,
        priority: Priority::High,
    })
}

fn suggest_cogs_adjustment(issue: &DiagnosticIssue, forms: &DraftedForms) -> SuggestionOutcome {
    let Some(gross) = forms
        .primary_form
        .value("line_1a")
        .filter(|gross| *gross > 0.0)
    else {
        return SuggestionOutcome::skipped(issue, "gross receipts are unknown");
    };
    let suggested = gross * TYPICAL_COGS_RATIO;
    let ratio = issue
        .actual_ratio
        .or_else(|| issue.value.map(|cogs| cogs / gross));
    let reasoning = match ratio {
        Some(ratio) => format!(
            "Current COGS ratio of {:.1}% is unusually high. Suggesting a {:.0}% ratio based on industry norms.",
            ratio * 100.0,
            TYPICAL_COGS_RATIO * 100.0
        ),
        None => format!(
            "COGS ratio is unusually high. Suggesting a {:.0}% ratio based on industry norms.",
            TYPICAL_COGS_RATIO * 100.0
        ),
    };
    let description = match issue.value {
        Some(current) => format!(
            "Reduce COGS from {} to {}",
            format_amount(current),
            format_amount(suggested)
        ),
        None => format!("Set COGS to {}", format_amount(suggested)),
    };
    SuggestionOutcome::Suggested(AdjustmentSuggestion {
        issue_id: issue.id.clone(),
        form: issue.form,
        field: issue.field.clone(),
        current_value: issue.value,
        suggested_value: suggested,
        adjustment_type: AdjustmentType::RatioAdjustment,
        description,
        reasoning,
        confidence: 0.75,
        priority: Priority::Medium,
    })
}

/// Primary-form line to the extracted figure that can fill it.
fn source_figure(line: &str) -> Option<&'static str> {
    match line {
        "line_1a" => Some("gross_receipts"),
        "line_4" => Some("cost_of_goods_sold"),
        "line_26" => Some("net_income"),
        _ => None,
    }
}

fn suggest_missing_field(issue: &DiagnosticIssue, tax_data: &TaxData) -> SuggestionOutcome {
    let Some(figure) = source_figure(&issue.field) else {
        return SuggestionOutcome::skipped(
            issue,
            format!("no extracted figure maps to {}", issue.field),
        );
    };
    let Some(value) = tax_data.get(figure).filter(|v| *v != 0.0) else {
        return SuggestionOutcome::skipped(issue, format!("extracted {figure} is not available"));
    };
    SuggestionOutcome::Suggested(AdjustmentSuggestion {
        issue_id: issue.id.clone(),
        form: issue.form,
        field: issue.field.clone(),
        current_value: issue.value,
        suggested_value: value,
        adjustment_type: AdjustmentType::MissingFieldPopulation,
        description: format!(
            "Populate {} with {} from extracted data",
            issue.field,
            format_amount(value)
        ),
        reasoning: format!(
            "Critical field {} is missing. Using extracted {figure} value.",
            issue.field
        ),
        confidence: 0.8,
        priority: Priority::High,
    })
}

fn suggest_negative_correction(issue: &DiagnosticIssue) -> SuggestionOutcome {
    let Some(current) = issue.value else {
        return SuggestionOutcome::skipped(issue, "issue carries no value");
    };
    let suggested = current.abs();
    SuggestionOutcome::Suggested(AdjustmentSuggestion {
        issue_id: issue.id.clone(),
        form: issue.form,
        field: issue.field.clone(),
        current_value: Some(current),
        suggested_value: suggested,
        adjustment_type: AdjustmentType::NegativeValueCorrection,
        description: format!("Change {} from {current} to {suggested}", issue.field),
        reasoning: format!(
            "Field {} should not be negative. Converting to positive value.",
            issue.field
        ),
        confidence: 0.9,
        priority: Priority::Medium,
    })
}

fn suggest_schedule_correction(issue: &DiagnosticIssue) -> SuggestionOutcome {
    let Some(expected) = issue.expected else {
        return SuggestionOutcome::skipped(issue, "issue carries no primary form value");
    };
    SuggestionOutcome::Suggested(AdjustmentSuggestion {
        issue_id: issue.id.clone(),
        form: issue.form,
        field: issue.field.clone(),
        current_value: issue.value,
        suggested_value: expected,
        adjustment_type: AdjustmentType::ScheduleCorrection,
        description: format!("Correct {} {} to match the primary form", issue.form, issue.field),
        reasoning: "Schedule value should match the corresponding primary form value.".to_string(),
        confidence: 0.85,
        priority: Priority::Medium,
    })
}

fn display_value(value: Option<f64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "blank".to_string())
}

/// A suggestion that was written into the forms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedAdjustment {
    pub issue_id: String,
    pub form: FormId,
    pub field: String,
    pub previous_value: Option<f64>,
    pub new_value: f64,
    pub confidence: f64,
}

/// Contents of the `adjustments` context key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentsReport {
    pub suggestions: Vec<AdjustmentSuggestion>,
    pub total_suggestions: usize,
    /// Issues that were processed without producing a suggestion.
    #[serde(default)]
    pub skipped: Vec<SuggestionOutcome>,
    #[serde(default)]
    pub applied_adjustments: Vec<AppliedAdjustment>,
}

impl AdjustmentsReport {
    pub fn from_outcomes(outcomes: Vec<SuggestionOutcome>) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            match outcome {
                SuggestionOutcome::Suggested(suggestion) => report.suggestions.push(suggestion),
                other => report.skipped.push(other),
            }
        }
        report.total_suggestions = report.suggestions.len();
        report
    }

    /// Apply every suggestion whose confidence is at least `min_confidence`.
    ///
    /// Suggestions are applied in order, so a later suggestion for the same
    /// line wins. Returns the adjustments made by this call.
    pub fn apply_above(
        &mut self,
        forms: &mut DraftedForms,
        min_confidence: f64,
    ) -> Result<Vec<AppliedAdjustment>> {
        let mut applied = Vec::new();
        for suggestion in self
            .suggestions
            .iter()
            .filter(|s| s.confidence >= min_confidence)
        {
            let previous_value = apply_suggestion(forms, suggestion)?;
            applied.push(AppliedAdjustment {
                issue_id: suggestion.issue_id.clone(),
                form: suggestion.form,
                field: suggestion.field.clone(),
                previous_value,
                new_value: suggestion.suggested_value,
                confidence: suggestion.confidence,
            });
        }
        self.applied_adjustments.extend(applied.iter().cloned());
        Ok(applied)
    }
}

/// Write the suggested value into its form line and return the value it replaced.
pub fn apply_suggestion(
    forms: &mut DraftedForms,
    suggestion: &AdjustmentSuggestion,
) -> Result<Option<f64>> {
    if !suggestion.suggested_value.is_finite() {
        return Err(anyhow!(
            "refusing to apply non-finite value to {} {}",
            suggestion.form,
            suggestion.field
        ));
    }
    let form = forms.form_mut(suggestion.form);
    let previous = form.value(&suggestion.field);
    form.set_value(&suggestion.field, suggestion.suggested_value);
    Ok(previous)
}

#[cfg(test)]
#[path = "suggestions_tests.rs"]
mod tests;
