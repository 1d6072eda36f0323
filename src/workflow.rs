use crate::cli::{DiagnoseArgs, ProvidersArgs, RunArgs};
use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use taxdraft::config::{self, Config, LM_COMMAND_ENV};
use taxdraft::context::{WorkflowContext, ADJUSTMENTS, DIAGNOSTICS, DRAFTED_FORMS, UPLOADED_FILES};
use taxdraft::diagnostics::{diagnose_forms, DiagnosticsSummary};
use taxdraft::extract::{TextExtractor, UploadedFile};
use taxdraft::forms::{DraftedForms, TaxData};
use taxdraft::inference::InferenceClient;
use taxdraft::pipeline::{Pipeline, RunOutcome, StepReport};
use taxdraft::provenance::{metadata, ProvenanceLedger};
use taxdraft::steps::{Adjustments, Diagnostics, DraftForms, ExtractData};
use taxdraft::suggestions::{AdjustmentsReport, SuggestionEngine, SuggestionOutcome};
use taxdraft::util::format_amount;

/// Step name recorded in the ledger for changes made by `--apply-above`.
const APPLY_STEP: &str = "ApplyAdjustments";

pub fn run_run(args: RunArgs) -> Result<ExitCode> {
    let config = config::load_config(args.config.as_deref())?;
    let client = config::build_client(&config, &config::env_lookup)?.ok_or_else(|| {
        anyhow!(
            "no inference providers available; set OPENAI_API_KEY, COHERE_API_KEY, \
             GROQ_API_KEY, GEMINI_API_KEY or {LM_COMMAND_ENV}, or list providers in the config"
        )
    })?;
    let uploads = uploaded_files(&args.inputs)?;

    let mut pipeline = build_pipeline(&config, &client)?;
    let mut ctx = WorkflowContext::new();
    ctx.insert(UPLOADED_FILES, &uploads)?;
    let mut ledger = ProvenanceLedger::new();

    let outcome = pipeline.execute(&mut ctx, &mut ledger)?;
    if outcome.completed {
        if let Some(min_confidence) = args.apply_above {
            apply_adjustments(&mut ctx, &mut ledger, min_confidence)?;
        }
    }

    if let Some(path) = args.provenance_out.as_deref() {
        ledger.write_jsonl(path)?;
        if args.verbose {
            eprintln!("wrote {}", path.display());
        }
    }

    if args.json {
        let payload = json!({
            "outcome": outcome,
            "progress": pipeline.overall_progress(),
            "context": ctx,
            "confidence": ledger.confidence_summary(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_run_text(&pipeline.reports(), &outcome, &ctx)?;
    }

    Ok(if outcome.completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub fn run_diagnose(args: DiagnoseArgs) -> Result<ExitCode> {
    let config = config::load_config(args.config.as_deref())?;
    let bytes = fs::read(&args.forms).with_context(|| format!("read {}", args.forms.display()))?;
    let forms: DraftedForms = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse drafted forms {}", args.forms.display()))?;
    let tax_data: TaxData = match args.tax_data.as_deref() {
        Some(path) => {
            let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("parse tax data {}", path.display()))?
        }
        None => TaxData::default(),
    };
    let client = config::build_client(&config, &config::env_lookup)?;

    let summary = DiagnosticsSummary::from_issues(diagnose_forms(&config.diagnostics, &forms));
    let engine = SuggestionEngine::new(client.as_ref())
        .with_sampling(config.temperature, config.max_tokens);
    let outcomes = engine.suggest_all(&summary.issues, &forms, &tax_data);
    let report = AdjustmentsReport::from_outcomes(outcomes);
    tracing::debug!(
        issues = summary.total_issues,
        suggestions = report.total_suggestions,
        "diagnosed forms"
    );

    if args.json {
        let payload = json!({ "diagnostics": summary, "adjustments": report });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_diagnostics_text(&summary);
        print_adjustments_text(&report);
    }
    Ok(ExitCode::SUCCESS)
}

pub fn run_providers(args: ProvidersArgs) -> Result<ExitCode> {
    let config = config::load_config(args.config.as_deref())?;
    let client = config::build_client(&config, &config::env_lookup)?;
    let providers = client
        .as_ref()
        .map(InferenceClient::providers)
        .unwrap_or_default();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&providers)?);
        return Ok(ExitCode::SUCCESS);
    }
    if providers.is_empty() {
        println!("no inference providers configured");
        return Ok(ExitCode::SUCCESS);
    }
    for (idx, provider) in providers.iter().enumerate() {
        println!(
            "{}. {} (model {}, priority {})",
            idx + 1,
            provider.name,
            provider.model,
            provider.priority
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn uploaded_files(inputs: &[PathBuf]) -> Result<Vec<UploadedFile>> {
    inputs
        .iter()
        .map(|path| {
            if !path.is_file() {
                return Err(anyhow!("input file not found: {}", path.display()));
            }
            Ok(UploadedFile::from_path(path))
        })
        .collect()
}

fn build_pipeline<'a>(config: &Config, client: &'a InferenceClient) -> Result<Pipeline<'a>> {
    let mut pipeline = Pipeline::new();
    pipeline.add_step(ExtractData::new(Box::new(TextExtractor::new()?)))?;
    pipeline.add_step(
        DraftForms::new(client).with_sampling(config.temperature, config.max_tokens),
    )?;
    pipeline.add_step(Diagnostics::new(config.diagnostics.clone()))?;
    pipeline.add_step(
        Adjustments::new(Some(client)).with_sampling(config.temperature, config.max_tokens),
    )?;
    Ok(pipeline)
}

/// Write confident suggestions into the drafted forms and record each change.
fn apply_adjustments(
    ctx: &mut WorkflowContext,
    ledger: &mut ProvenanceLedger,
    min_confidence: f64,
) -> Result<()> {
    let Some(mut report) = ctx.get::<AdjustmentsReport>(ADJUSTMENTS)? else {
        return Ok(());
    };
    let mut forms: DraftedForms = ctx.require(DRAFTED_FORMS)?;
    let applied = report.apply_above(&mut forms, min_confidence)?;
    for change in &applied {
        ledger.add_record(
            APPLY_STEP,
            &format!("{}.{}", change.form, change.field),
            change.new_value,
            &format!("adjustment:{}", change.issue_id),
            change.confidence,
            metadata([("previous_value", json!(change.previous_value))]),
        );
    }
    ctx.insert(DRAFTED_FORMS, &forms)?;
    ctx.insert(ADJUSTMENTS, &report)?;
    tracing::info!(
        applied = applied.len(),
        min_confidence,
        "applied adjustments"
    );
    Ok(())
}

fn print_run_text(
    reports: &[StepReport],
    outcome: &RunOutcome,
    ctx: &WorkflowContext,
) -> Result<()> {
    for report in reports {
        let duration = report
            .duration_ms
            .map(|ms| format!(" ({ms} ms)"))
            .unwrap_or_default();
        println!(
            "step {}/{} {:<12} {}{}",
            report.step_number, report.total_steps, report.name, report.status, duration
        );
        if let Some(error) = report.error.as_deref() {
            println!("  error: {error}");
        }
    }
    if let Some(failure) = outcome.failure.as_ref() {
        println!(
            "halted at step {} ({}); later steps were not run",
            failure.position, failure.name
        );
        return Ok(());
    }
    if let Some(summary) = ctx.get::<DiagnosticsSummary>(DIAGNOSTICS)? {
        print_diagnostics_text(&summary);
    }
    if let Some(report) = ctx.get::<AdjustmentsReport>(ADJUSTMENTS)? {
        print_adjustments_text(&report);
    }
    Ok(())
}

fn print_diagnostics_text(summary: &DiagnosticsSummary) {
    println!(
        "issues: {} ({} critical, {} warnings, {} info)",
        summary.total_issues, summary.critical_issues, summary.warnings, summary.info
    );
    for issue in &summary.issues {
        println!(
            "  [{}] {} {}: {}",
            issue.severity, issue.form, issue.field, issue.title
        );
    }
}

fn print_adjustments_text(report: &AdjustmentsReport) {
    println!(
        "suggestions: {} (skipped {}, applied {})",
        report.total_suggestions,
        report.skipped.len(),
        report.applied_adjustments.len()
    );
    for suggestion in &report.suggestions {
        let current = suggestion
            .current_value
            .map(format_amount)
            .unwrap_or_else(|| "blank".to_string());
        println!(
            "  {} {}: {} -> {} ({}, confidence {:.2}, {})",
            suggestion.form,
            suggestion.field,
            current,
            format_amount(suggestion.suggested_value),
            suggestion.adjustment_type,
            suggestion.confidence,
            suggestion.priority
        );
    }
    for outcome in &report.skipped {
        match outcome {
            SuggestionOutcome::Skipped { issue_id, reason } => {
                println!("  skipped {issue_id}: {reason}");
            }
            SuggestionOutcome::Failed { issue_id, reason } => {
                println!("  failed {issue_id}: {reason}");
            }
            SuggestionOutcome::Suggested(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taxdraft::forms::FormId;
    use taxdraft::suggestions::{AdjustmentSuggestion, AdjustmentType, Priority};

    fn suggestion(field: &str, value: f64, confidence: f64) -> AdjustmentSuggestion {
        AdjustmentSuggestion {
            issue_id: format!("math_error:primary_form:{field}"),
            form: FormId::PrimaryForm,
            field: field.to_string(),
            current_value: Some(1.0),
            suggested_value: value,
            adjustment_type: AdjustmentType::MathematicalCorrection,
            description: "d".to_string(),
            reasoning: "r".to_string(),
            confidence,
            priority: Priority::High,
        }
    }

    #[test]
    fn apply_adjustments_updates_forms_and_ledger() {
        let forms: DraftedForms = serde_json::from_str(
            r#"{"primary_form": {"line_3": {"value": 1.0}, "line_11": {"value": 1.0}}}"#,
        )
        .expect("forms");

        let mut ctx = WorkflowContext::new();
        ctx.insert(DRAFTED_FORMS, &forms).unwrap();
        let report = AdjustmentsReport::from_outcomes(vec![
            SuggestionOutcome::Suggested(suggestion("line_3", 950.0, 0.95)),
            SuggestionOutcome::Suggested(suggestion("line_11", 10.0, 0.5)),
        ]);
        ctx.insert(ADJUSTMENTS, &report).unwrap();
        let mut ledger = ProvenanceLedger::new();

        apply_adjustments(&mut ctx, &mut ledger, 0.9).expect("apply");

        let forms: DraftedForms = ctx.require(DRAFTED_FORMS).unwrap();
        assert_eq!(forms.primary_form.value("line_3"), Some(950.0));
        assert_eq!(forms.primary_form.value("line_11"), Some(1.0));
        let report: AdjustmentsReport = ctx.require(ADJUSTMENTS).unwrap();
        assert_eq!(report.applied_adjustments.len(), 1);

        let records = ledger.get_by_step(APPLY_STEP);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field, "primary_form.line_3");
        assert_eq!(records[0].source_ref, "adjustment:math_error:primary_form:line_3");
        assert_eq!(records[0].metadata["previous_value"], 1.0);
    }

    #[test]
    fn apply_adjustments_without_report_is_a_no_op() {
        let mut ctx = WorkflowContext::new();
        let mut ledger = ProvenanceLedger::new();
        apply_adjustments(&mut ctx, &mut ledger, 0.5).expect("apply");
        assert!(ledger.is_empty());
    }

    #[test]
    fn missing_input_is_reported_before_running() {
        let err = uploaded_files(&[PathBuf::from("/nonexistent/ledger.txt")])
            .unwrap_err();
        assert!(err.to_string().contains("input file not found"));
    }
}
