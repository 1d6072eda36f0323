//! Rule-based diagnostics over drafted forms.
//!
//! `diagnose` is a pure function: it runs five independent checks against the
//! primary form and its two schedules and concatenates whatever they find. A
//! line that is absent (or blank) is "no value", never zero, for the ratio and
//! arithmetic checks; those checks simply do not fire without their inputs.
use crate::forms::{DraftedForms, Form, FormId};
use crate::util::format_amount;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of issue kinds. `Unclassified` covers issues produced elsewhere
/// (or by newer rule sets) that no dedicated corrector understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HighCogsRatio,
    MathError,
    MissingField,
    NegativeValue,
    LargeValue,
    ScheduleInconsistency,
    #[serde(other)]
    Unclassified,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::HighCogsRatio => "high_cogs_ratio",
            IssueKind::MathError => "math_error",
            IssueKind::MissingField => "missing_field",
            IssueKind::NegativeValue => "negative_value",
            IssueKind::LargeValue => "large_value",
            IssueKind::ScheduleInconsistency => "schedule_inconsistency",
            IssueKind::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticIssue {
    /// Stable identifier: `<kind>:<form>:<field>`.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub form: FormId,
    pub field: String,
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_ratio: Option<f64>,
}

impl DiagnosticIssue {
    fn new(
        kind: IssueKind,
        severity: Severity,
        form: FormId,
        field: &str,
        title: String,
        description: String,
        value: Option<f64>,
    ) -> Self {
        Self {
            id: format!("{kind}:{form}:{field}"),
            kind,
            severity,
            title,
            description,
            form,
            field: field.to_string(),
            value,
            expected: None,
            threshold: None,
            actual_ratio: None,
        }
    }
}

/// A schedule line that must agree with a primary-form line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrossCheck {
    pub schedule: FormId,
    pub schedule_line: String,
    pub primary_line: String,
}

impl CrossCheck {
    fn new(schedule: FormId, schedule_line: &str, primary_line: &str) -> Self {
        Self {
            schedule,
            schedule_line: schedule_line.to_string(),
            primary_line: primary_line.to_string(),
        }
    }
}

/// Thresholds and field sets used by the checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagnosticRules {
    /// COGS / gross receipts above this ratio is flagged.
    pub cogs_ratio_threshold: f64,
    /// Absolute slack allowed in arithmetic and cross-document comparisons.
    pub tolerance: f64,
    /// Gross receipts above this amount are flagged for verification.
    pub large_value_threshold: f64,
    /// Missing or zero values here are critical.
    pub critical_fields: Vec<String>,
    /// Negative values here are suspicious.
    pub positive_fields: Vec<String>,
    pub cross_checks: Vec<CrossCheck>,
}

impl Default for DiagnosticRules {
    fn default() -> Self {
        let fields = || {
            vec![
                "line_1a".to_string(),
                "line_4".to_string(),
                "line_26".to_string(),
            ]
        };
        Self {
            cogs_ratio_threshold: 0.8,
            tolerance: 1.0,
            large_value_threshold: 1_000_000_000.0,
            critical_fields: fields(),
            positive_fields: fields(),
            cross_checks: vec![
                CrossCheck::new(FormId::ScheduleA, "line_1", "line_1a"),
                CrossCheck::new(FormId::ScheduleA, "line_2", "line_2"),
                CrossCheck::new(FormId::ScheduleA, "line_3", "line_3"),
                CrossCheck::new(FormId::ScheduleA, "line_4", "line_4"),
                CrossCheck::new(FormId::ScheduleA, "line_5", "line_5"),
                CrossCheck::new(FormId::ScheduleB, "line_8", "line_23"),
            ],
        }
    }
}

const GROSS_RECEIPTS: &str = "line_1a";
const COGS: &str = "line_4";

/// `target == minuend - subtrahend` on the primary form.
struct ArithmeticRule {
    target: &'static str,
    minuend: &'static str,
    subtrahend: &'static str,
    title: &'static str,
    label: &'static str,
}

const ARITHMETIC_RULES: [ArithmeticRule; 2] = [
    ArithmeticRule {
        target: "line_3",
        minuend: "line_1a",
        subtrahend: "line_2",
        title: "Mathematical Error in Net Receipts",
        label: "Line 3 should equal Line 1a - Line 2",
    },
    ArithmeticRule {
        target: "line_5",
        minuend: "line_3",
        subtrahend: "line_4",
        title: "Mathematical Error in Gross Profit",
        label: "Line 5 should equal Line 3 - Line 4",
    },
];

/// Run every check with the default rules.
pub fn diagnose(primary: &Form, schedule_a: &Form, schedule_b: &Form) -> Vec<DiagnosticIssue> {
    diagnose_with(&DiagnosticRules::default(), primary, schedule_a, schedule_b)
}

pub fn diagnose_forms(rules: &DiagnosticRules, forms: &DraftedForms) -> Vec<DiagnosticIssue> {
    diagnose_with(rules, &forms.primary_form, &forms.schedule_a, &forms.schedule_b)
}

pub fn diagnose_with(
    rules: &DiagnosticRules,
    primary: &Form,
    schedule_a: &Form,
    schedule_b: &Form,
) -> Vec<DiagnosticIssue> {
    let mut issues = Vec::new();
    issues.extend(check_cogs_ratio(rules, primary));
    issues.extend(check_arithmetic(rules, primary));
    issues.extend(check_missing_fields(rules, primary));
    issues.extend(check_unusual_values(rules, primary));
    issues.extend(check_schedule_consistency(
        rules, primary, schedule_a, schedule_b,
    ));
    issues
}

fn check_cogs_ratio(rules: &DiagnosticRules, primary: &Form) -> Option<DiagnosticIssue> {
    let gross = primary.value(GROSS_RECEIPTS)?;
    let cogs = primary.value(COGS)?;
    if gross <= 0.0 {
        return None;
    }
    let ratio = cogs / gross;
    if ratio <= rules.cogs_ratio_threshold {
        return None;
    }
    let mut issue = DiagnosticIssue::new(
        IssueKind::HighCogsRatio,
        Severity::Warning,
        FormId::PrimaryForm,
        COGS,
        "High Cost of Goods Sold Ratio".to_string(),
        format!(
            "COGS ratio is {:.1}%, which is unusually high. Typical ratios are 60-70%.",
            ratio * 100.0
        ),
        Some(cogs),
    );
    issue.threshold = Some(rules.cogs_ratio_threshold);
    issue.actual_ratio = Some(ratio);
    Some(issue)
}

fn check_arithmetic(rules: &DiagnosticRules, primary: &Form) -> Vec<DiagnosticIssue> {
    ARITHMETIC_RULES
        .iter()
        .filter_map(|rule| {
            let minuend = primary.value(rule.minuend)?;
            let subtrahend = primary.value(rule.subtrahend)?;
            let found = primary.value(rule.target)?;
            let expected = minuend - subtrahend;
            if (found - expected).abs() <= rules.tolerance {
                return None;
            }
            let mut issue = DiagnosticIssue::new(
                IssueKind::MathError,
                Severity::Critical,
                FormId::PrimaryForm,
                rule.target,
                rule.title.to_string(),
                format!("{}. Expected: {expected}, Found: {found}", rule.label),
                Some(found),
            );
            issue.expected = Some(expected);
            Some(issue)
        })
        .collect()
}

// Zero and missing are indistinguishable here: a legitimate zero still fires.
fn check_missing_fields(rules: &DiagnosticRules, primary: &Form) -> Vec<DiagnosticIssue> {
    rules
        .critical_fields
        .iter()
        .filter(|field| !matches!(primary.value(field), Some(v) if v != 0.0))
        .map(|field| {
            DiagnosticIssue::new(
                IssueKind::MissingField,
                Severity::Critical,
                FormId::PrimaryForm,
                field,
                format!("Missing Critical Field: {field}"),
                format!("Critical field {field} is missing or zero"),
                None,
            )
        })
        .collect()
}

fn check_unusual_values(rules: &DiagnosticRules, primary: &Form) -> Vec<DiagnosticIssue> {
    let mut issues: Vec<DiagnosticIssue> = rules
        .positive_fields
        .iter()
        .filter_map(|field| {
            let value = primary.value(field).filter(|v| *v < 0.0)?;
            Some(DiagnosticIssue::new(
                IssueKind::NegativeValue,
                Severity::Warning,
                FormId::PrimaryForm,
                field,
                format!("Negative Value in {field}"),
                format!("Field {field} has a negative value: {value}"),
                Some(value),
            ))
        })
        .collect();

    if let Some(gross) = primary
        .value(GROSS_RECEIPTS)
        .filter(|v| *v > rules.large_value_threshold)
    {
        issues.push(DiagnosticIssue::new(
            IssueKind::LargeValue,
            Severity::Info,
            FormId::PrimaryForm,
            GROSS_RECEIPTS,
            "Unusually Large Gross Receipts".to_string(),
            format!(
                "Gross receipts of {} may need verification",
                format_amount(gross)
            ),
            Some(gross),
        ));
    }
    issues
}

fn check_schedule_consistency(
    rules: &DiagnosticRules,
    primary: &Form,
    schedule_a: &Form,
    schedule_b: &Form,
) -> Vec<DiagnosticIssue> {
    rules
        .cross_checks
        .iter()
        .filter_map(|check| {
            let schedule = match check.schedule {
                FormId::ScheduleA => schedule_a,
                FormId::ScheduleB => schedule_b,
                FormId::PrimaryForm => return None,
            };
            let primary_value = primary.value(&check.primary_line)?;
            let schedule_value = schedule.value(&check.schedule_line)?;
            if (primary_value - schedule_value).abs() <= rules.tolerance {
                return None;
            }
            let mut issue = DiagnosticIssue::new(
                IssueKind::ScheduleInconsistency,
                Severity::Warning,
                check.schedule,
                &check.schedule_line,
                format!("{} Inconsistency", schedule_title(check.schedule)),
                format!(
                    "Primary form {} ({primary_value}) doesn't match {} {} ({schedule_value})",
                    check.primary_line,
                    schedule_title(check.schedule),
                    check.schedule_line
                ),
                Some(schedule_value),
            );
            issue.expected = Some(primary_value);
            Some(issue)
        })
        .collect()
}

fn schedule_title(form: FormId) -> &'static str {
    match form {
        FormId::PrimaryForm => "Primary Form",
        FormId::ScheduleA => "Schedule A",
        FormId::ScheduleB => "Schedule B",
    }
}

/// Issues plus per-severity counts, as stored under the `diagnostics` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsSummary {
    pub issues: Vec<DiagnosticIssue>,
    pub total_issues: usize,
    pub critical_issues: usize,
    pub warnings: usize,
    pub info: usize,
}

impl DiagnosticsSummary {
    pub fn from_issues(issues: Vec<DiagnosticIssue>) -> Self {
        let count = |severity: Severity| issues.iter().filter(|i| i.severity == severity).count();
        let critical_issues = count(Severity::Critical);
        let warnings = count(Severity::Warning);
        let info = count(Severity::Info);
        Self {
            total_issues: issues.len(),
            critical_issues,
            warnings,
            info,
            issues,
        }
    }
}

#[cfg(test)]
#[path = "diagnostics_tests.rs"]
mod tests;
