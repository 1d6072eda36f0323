//! Prompt templates compiled into the binary and their renderers.
use crate::diagnostics::DiagnosticIssue;
use crate::forms::TaxData;
use crate::util::{format_amount, truncate_string};

pub const DRAFT_SYSTEM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/draft_system.md"
));
const DRAFT_FORMS: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/draft_forms.md"
));
const ADJUSTMENT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/prompts/adjustment.md"
));

/// Raw text beyond this many bytes per document is not sent to the drafter.
pub const DOCUMENT_EXCERPT_BYTES: usize = 2000;

/// Build the drafting prompt from extracted figures and `(file name, text)` pairs.
pub fn render_draft_prompt(tax_data: &TaxData, documents: &[(&str, &str)]) -> String {
    let documents = documents
        .iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(name, text)| {
            let excerpt = truncate_string(text, DOCUMENT_EXCERPT_BYTES);
            if excerpt.len() < text.len() {
                format!("### {name}\n{excerpt}\n[truncated]")
            } else {
                format!("### {name}\n{excerpt}")
            }
        })
        .collect::<Vec<_>>();
    let documents = if documents.is_empty() {
        "(no document text)".to_string()
    } else {
        documents.join("\n\n")
    };

    DRAFT_FORMS
        .replace("{figures}", &figure_list(tax_data))
        .replace("{documents}", &documents)
}

pub fn render_adjustment_prompt(issue: &DiagnosticIssue, tax_data: &TaxData) -> String {
    let value = issue
        .value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    ADJUSTMENT
        .replace("{title}", &issue.title)
        .replace("{description}", &issue.description)
        .replace("{form}", issue.form.as_str())
        .replace("{field}", &issue.field)
        .replace("{value}", &value)
        .replace("{severity}", issue.severity.as_str())
        .replace("{figures}", &figure_list(tax_data))
}

fn figure_list(tax_data: &TaxData) -> String {
    let present = tax_data.present();
    if present.is_empty() {
        return "(none extracted)".to_string();
    }
    present
        .into_iter()
        .map(|(field, value)| format!("- {}: {}", field_label(field), format_amount(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `cost_of_goods_sold` -> `Cost Of Goods Sold`.
fn field_label(field: &str) -> String {
    field
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
