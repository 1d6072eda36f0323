use super::*;
use crate::diagnostics::diagnose;
use crate::forms::Form;
use crate::inference::Provider;

struct CannedProvider(Result<&'static str, &'static str>);

impl Provider for CannedProvider {
    fn name(&self) -> &str {
        "canned"
    }

    fn model(&self) -> &str {
        "canned-model"
    }

    fn complete(&self, _request: &InferenceRequest) -> anyhow::Result<String> {
        match self.0 {
            Ok(text) => Ok(text.to_string()),
            Err(message) => Err(anyhow!(message)),
        }
    }
}

fn client(reply: Result<&'static str, &'static str>) -> InferenceClient {
    InferenceClient::new(vec![(1, Box::new(CannedProvider(reply)) as Box<dyn Provider>)])
        .expect("client")
}

fn forms(primary: Form) -> DraftedForms {
    DraftedForms {
        primary_form: primary,
        ..DraftedForms::default()
    }
}

fn issue_for(kind: IssueKind, primary: Form) -> DiagnosticIssue {
    diagnose(&primary, &Form::new(), &Form::new())
        .into_iter()
        .find(|issue| issue.kind == kind)
        .expect("issue of requested kind")
}

fn unclassified_issue() -> DiagnosticIssue {
    serde_json::from_value(serde_json::json!({
        "id": "unclassified:primary_form:line_20",
        "type": "depreciation_outlier",
        "severity": "warning",
        "title": "Depreciation outlier",
        "description": "Depreciation is far above prior year",
        "form": "primary_form",
        "field": "line_20",
        "value": 90000.0
    }))
    .expect("issue")
}

#[test]
fn math_error_uses_expected_value() {
    let primary = Form::from([
        ("line_1a", 1_000_000.0),
        ("line_2", 50_000.0),
        ("line_3", 1_000_000.0),
        ("line_4", 1.0),
        ("line_26", 1.0),
    ]);
    let issue = issue_for(IssueKind::MathError, primary.clone());
    let engine = SuggestionEngine::new(None);
    let outcome = engine.suggest(&issue, &forms(primary), &TaxData::default());
    let suggestion = outcome.suggestion().expect("suggested");
    assert_eq!(suggestion.suggested_value, 950_000.0);
    assert_eq!(suggestion.current_value, Some(1_000_000.0));
    assert_eq!(suggestion.confidence, 0.95);
    assert_eq!(suggestion.priority, Priority::High);
    assert_eq!(suggestion.adjustment_type, AdjustmentType::MathematicalCorrection);
    assert_eq!(suggestion.issue_id, issue.id);
}

#[test]
fn deterministic_branches_are_reproducible() {
    let primary = Form::from([
        ("line_1a", 1_000_000.0),
        ("line_2", 50_000.0),
        ("line_3", 1_000_000.0),
        ("line_4", -10.0),
        ("line_26", 1.0),
    ]);
    let drafted = forms(primary.clone());
    let issues = diagnose(&primary, &Form::new(), &Form::new());
    let engine = SuggestionEngine::new(None);
    let first = engine.suggest_all(&issues, &drafted, &TaxData::default());
    let second = engine.suggest_all(&issues, &drafted, &TaxData::default());
    assert_eq!(first, second);
}

#[test]
fn high_cogs_ratio_proposes_seventy_percent_of_receipts() {
    let primary = Form::from([("line_1a", 1_000_000.0), ("line_4", 900_000.0), ("line_26", 1.0)]);
    let issue = issue_for(IssueKind::HighCogsRatio, primary.clone());
    let outcome = SuggestionEngine::new(None).suggest(&issue, &forms(primary), &TaxData::default());
    let suggestion = outcome.suggestion().expect("suggested");
    assert!((suggestion.suggested_value - 700_000.0).abs() < 1e-6);
    assert_eq!(suggestion.confidence, 0.75);
    assert_eq!(suggestion.field, "line_4");
    assert!(suggestion.description.contains("$900,000"));
    assert!(suggestion.reasoning.contains("90.0%"));
}

#[test]
fn high_cogs_ratio_without_receipts_is_skipped() {
    let primary = Form::from([("line_1a", 1_000_000.0), ("line_4", 900_000.0)]);
    let issue = issue_for(IssueKind::HighCogsRatio, primary);
    let outcome = SuggestionEngine::new(None).suggest(&issue, &forms(Form::new()), &TaxData::default());
    assert!(matches!(outcome, SuggestionOutcome::Skipped { .. }));
}

#[test]
fn missing_field_is_filled_from_extracted_figures() {
    let primary = Form::from([("line_1a", 1_000.0), ("line_4", 500.0)]);
    let issue = issue_for(IssueKind::MissingField, primary.clone());
    assert_eq!(issue.field, "line_26");
    let tax_data = TaxData {
        net_income: Some(42_000.0),
        ..TaxData::default()
    };
    let outcome = SuggestionEngine::new(None).suggest(&issue, &forms(primary), &tax_data);
    let suggestion = outcome.suggestion().expect("suggested");
    assert_eq!(suggestion.suggested_value, 42_000.0);
    assert_eq!(suggestion.confidence, 0.8);
    assert_eq!(suggestion.adjustment_type, AdjustmentType::MissingFieldPopulation);
}

#[test]
fn missing_field_without_source_value_is_skipped() {
    let primary = Form::from([("line_1a", 1_000.0), ("line_4", 500.0)]);
    let issue = issue_for(IssueKind::MissingField, primary.clone());
    let outcome = SuggestionEngine::new(None).suggest(&issue, &forms(primary), &TaxData::default());
    match outcome {
        SuggestionOutcome::Skipped { issue_id, reason } => {
            assert_eq!(issue_id, issue.id);
            assert!(reason.contains("net_income"), "{reason}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn negative_value_proposes_absolute_value() {
    let primary = Form::from([("line_1a", 1_000.0), ("line_4", 500.0), ("line_26", -250.0)]);
    let issue = issue_for(IssueKind::NegativeValue, primary.clone());
    let outcome = SuggestionEngine::new(None).suggest(&issue, &forms(primary), &TaxData::default());
    let suggestion = outcome.suggestion().expect("suggested");
    assert_eq!(suggestion.suggested_value, 250.0);
    assert_eq!(suggestion.confidence, 0.9);
}

#[test]
fn schedule_inconsistency_copies_primary_value() {
    let primary = Form::from([("line_1a", 1_000.0), ("line_4", 500.0), ("line_26", 1.0)]);
    let schedule_a = Form::from([("line_1", 900.0)]);
    let issue = diagnose(&primary, &schedule_a, &Form::new())
        .into_iter()
        .find(|issue| issue.kind == IssueKind::ScheduleInconsistency)
        .expect("issue");
    let drafted = DraftedForms {
        primary_form: primary,
        schedule_a,
        ..DraftedForms::default()
    };
    let outcome = SuggestionEngine::new(None).suggest(&issue, &drafted, &TaxData::default());
    let suggestion = outcome.suggestion().expect("suggested");
    assert_eq!(suggestion.form, FormId::ScheduleA);
    assert_eq!(suggestion.field, "line_1");
    assert_eq!(suggestion.suggested_value, 1_000.0);
    assert_eq!(suggestion.confidence, 0.85);
}

#[test]
fn info_issues_never_produce_suggestions() {
    let primary = Form::from([("line_1a", 5e9), ("line_4", 1e9), ("line_26", 1.0)]);
    let issues = diagnose(&primary, &Form::new(), &Form::new());
    assert!(issues.iter().any(|issue| issue.severity == Severity::Info));
    let client = client(Ok(r#"{"suggested_value": 1}"#));
    let engine = SuggestionEngine::new(Some(&client));
    let outcomes = engine.suggest_all(&issues, &forms(primary), &TaxData::default());
    assert!(outcomes.is_empty(), "{outcomes:?}");
}

#[test]
fn generic_issue_uses_inference_reply() {
    let client = client(Ok(
        "```json\n{\"suggested_value\": \"45,000\", \"reasoning\": \"prior year\", \"confidence\": 0.6}\n```",
    ));
    let engine = SuggestionEngine::new(Some(&client));
    let issue = unclassified_issue();
    let outcome = engine.suggest(&issue, &DraftedForms::default(), &TaxData::default());
    let suggestion = outcome.suggestion().expect("suggested");
    assert_eq!(suggestion.suggested_value, 45_000.0);
    assert_eq!(suggestion.reasoning, "prior year");
    assert_eq!(suggestion.confidence, 0.6);
    assert_eq!(suggestion.adjustment_type, AdjustmentType::LlmSuggestion);
    assert_eq!(suggestion.priority, Priority::Medium);
}

#[test]
fn generic_issue_defaults_confidence() {
    let client = client(Ok(r#"{"suggested_value": 10}"#));
    let outcome = SuggestionEngine::new(Some(&client)).suggest(
        &unclassified_issue(),
        &DraftedForms::default(),
        &TaxData::default(),
    );
    assert_eq!(outcome.suggestion().expect("suggested").confidence, 0.7);
}

#[test]
fn generic_issue_failures_are_reported_not_raised() {
    let issue = unclassified_issue();

    let unparseable = client(Ok("I think it should be lower"));
    let outcome = SuggestionEngine::new(Some(&unparseable)).suggest(
        &issue,
        &DraftedForms::default(),
        &TaxData::default(),
    );
    assert!(matches!(outcome, SuggestionOutcome::Failed { .. }));

    let down = client(Err("connection refused"));
    let outcome = SuggestionEngine::new(Some(&down)).suggest(
        &issue,
        &DraftedForms::default(),
        &TaxData::default(),
    );
    match outcome {
        SuggestionOutcome::Failed { reason, .. } => assert!(reason.contains("connection refused")),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let no_number = client(Ok(r#"{"reasoning": "unsure"}"#));
    let outcome = SuggestionEngine::new(Some(&no_number)).suggest(
        &issue,
        &DraftedForms::default(),
        &TaxData::default(),
    );
    assert!(matches!(outcome, SuggestionOutcome::Failed { .. }));
}

#[test]
fn generic_issue_without_client_is_skipped() {
    let outcome = SuggestionEngine::new(None).suggest(
        &unclassified_issue(),
        &DraftedForms::default(),
        &TaxData::default(),
    );
    assert_eq!(
        outcome,
        SuggestionOutcome::Skipped {
            issue_id: "unclassified:primary_form:line_20".to_string(),
            reason: "no inference providers configured".to_string(),
        }
    );
}

#[test]
fn outcomes_serialize_with_outcome_tag() {
    let outcome = SuggestionEngine::new(None).suggest(
        &unclassified_issue(),
        &DraftedForms::default(),
        &TaxData::default(),
    );
    let value = serde_json::to_value(&outcome).expect("serialize");
    assert_eq!(value["outcome"], "skipped");
    assert_eq!(value["issue_id"], "unclassified:primary_form:line_20");
}

#[test]
fn apply_suggestion_writes_form_line() {
    let mut drafted = forms(Form::from([("line_3", 10.0)]));
    let suggestion = AdjustmentSuggestion {
        issue_id: "math_error:primary_form:line_3".to_string(),
        form: FormId::PrimaryForm,
        field: "line_3".to_string(),
        current_value: Some(10.0),
        suggested_value: 12.0,
        adjustment_type: AdjustmentType::MathematicalCorrection,
        description: String::new(),
        reasoning: String::new(),
        confidence: 0.95,
        priority: Priority::High,
    };
    let previous = apply_suggestion(&mut drafted, &suggestion).expect("apply");
    assert_eq!(previous, Some(10.0));
    assert_eq!(drafted.primary_form.value("line_3"), Some(12.0));

    let bad = AdjustmentSuggestion {
        suggested_value: f64::NAN,
        ..suggestion
    };
    assert!(apply_suggestion(&mut drafted, &bad).is_err());
}

#[test]
fn report_partitions_outcomes_and_applies_confident_suggestions() {
    let primary = Form::from([
        ("line_1a", 1_000_000.0),
        ("line_4", 900_000.0),
        ("line_26", -5.0),
    ]);
    let mut drafted = forms(primary.clone());
    let mut issues = diagnose(&primary, &Form::new(), &Form::new());
    issues.push(unclassified_issue());
    let outcomes = SuggestionEngine::new(None).suggest_all(&issues, &drafted, &TaxData::default());
    let mut report = AdjustmentsReport::from_outcomes(outcomes);

    // COGS ratio (0.75) and negative line_26 (0.9) are suggested; the
    // unclassified issue is skipped without a client.
    assert_eq!(report.total_suggestions, 2);
    assert_eq!(report.skipped.len(), 1);

    let applied = report.apply_above(&mut drafted, 0.8).expect("apply");
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].field, "line_26");
    assert_eq!(applied[0].previous_value, Some(-5.0));
    assert_eq!(drafted.primary_form.value("line_26"), Some(5.0));
    assert_eq!(drafted.primary_form.value("line_4"), Some(900_000.0));
    assert_eq!(report.applied_adjustments, applied);
}
