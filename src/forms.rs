//! Drafted form data model and extracted financial figures.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One line of a drafted form.
///
/// Deserializes from `{value, description}`, from a bare number or numeric
/// string, or from anything else as a blank line.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormLine {
    /// `None` when the drafter left the line blank or wrote something non-numeric.
    pub value: Option<f64>,
    pub description: String,
}

impl<'de> Deserialize<'de> for FormLine {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let line = match &raw {
            Value::Object(fields) => FormLine {
                value: fields.get("value").and_then(number_from_value),
                description: fields.get("description").map(text_from_value).unwrap_or_default(),
            },
            other => FormLine {
                value: number_from_value(other),
                description: String::new(),
            },
        };
        Ok(line)
    }
}

impl FormLine {
    pub fn new(value: f64, description: &str) -> Self {
        Self {
            value: Some(value),
            description: description.to_string(),
        }
    }
}

/// Line identifier (e.g. `line_1a`) to drafted value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Form {
    lines: BTreeMap<String, FormLine>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    /// Numeric value of `line`, or `None` when the line is absent or blank.
    pub fn value(&self, line: &str) -> Option<f64> {
        self.lines.get(line).and_then(|l| l.value)
    }

    pub fn line(&self, line: &str) -> Option<&FormLine> {
        self.lines.get(line)
    }

    /// Set the value of `line`, keeping its description when it already exists.
    pub fn set_value(&mut self, line: &str, value: f64) {
        self.lines.entry(line.to_string()).or_default().value = Some(value);
    }

    pub fn insert(&mut self, line: &str, form_line: FormLine) {
        self.lines.insert(line.to_string(), form_line);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormLine)> {
        self.lines.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl<const N: usize> From<[(&str, f64); N]> for Form {
    fn from(lines: [(&str, f64); N]) -> Self {
        let mut form = Form::new();
        for (line, value) in lines {
            form.insert(line, FormLine::new(value, ""));
        }
        form
    }
}

/// Which of the three concurrently drafted documents a field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormId {
    PrimaryForm,
    ScheduleA,
    ScheduleB,
}

impl FormId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormId::PrimaryForm => "primary_form",
            FormId::ScheduleA => "schedule_a",
            FormId::ScheduleB => "schedule_b",
        }
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the drafting step: a primary form, two schedules, and rationale.
///
/// Drafter responses naming the forms `form_1120`, `schedule_c`, and
/// `schedule_m1` are accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftedForms {
    #[serde(default, alias = "form_1120", deserialize_with = "lenient_form")]
    pub primary_form: Form,
    #[serde(default, alias = "schedule_c", deserialize_with = "lenient_form")]
    pub schedule_a: Form,
    #[serde(default, alias = "schedule_m1", deserialize_with = "lenient_form")]
    pub schedule_b: Form,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reasoning: String,
}

impl DraftedForms {
    pub fn form(&self, id: FormId) -> &Form {
        match id {
            FormId::PrimaryForm => &self.primary_form,
            FormId::ScheduleA => &self.schedule_a,
            FormId::ScheduleB => &self.schedule_b,
        }
    }

    pub fn form_mut(&mut self, id: FormId) -> &mut Form {
        match id {
            FormId::PrimaryForm => &mut self.primary_form,
            FormId::ScheduleA => &mut self.schedule_a,
            FormId::ScheduleB => &mut self.schedule_b,
        }
    }
}

/// Fixed-shape financial figures pulled from source documents; any may be absent.
///
/// Keys other than the seven figures are ignored on input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxData {
    #[serde(default, deserialize_with = "lenient_number")]
    pub gross_receipts: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub cost_of_goods_sold: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub operating_expenses: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub net_income: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_assets: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_liabilities: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub equity: Option<f64>,
}

impl TaxData {
    pub const FIELDS: [&'static str; 7] = [
        "gross_receipts",
        "cost_of_goods_sold",
        "operating_expenses",
        "net_income",
        "total_assets",
        "total_liabilities",
        "equity",
    ];

    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "gross_receipts" => self.gross_receipts,
            "cost_of_goods_sold" => self.cost_of_goods_sold,
            "operating_expenses" => self.operating_expenses,
            "net_income" => self.net_income,
            "total_assets" => self.total_assets,
            "total_liabilities" => self.total_liabilities,
            "equity" => self.equity,
            _ => None,
        }
    }

    fn slot_mut(&mut self, field: &str) -> Option<&mut Option<f64>> {
        match field {
            "gross_receipts" => Some(&mut self.gross_receipts),
            "cost_of_goods_sold" => Some(&mut self.cost_of_goods_sold),
            "operating_expenses" => Some(&mut self.operating_expenses),
            "net_income" => Some(&mut self.net_income),
            "total_assets" => Some(&mut self.total_assets),
            "total_liabilities" => Some(&mut self.total_liabilities),
            "equity" => Some(&mut self.equity),
            _ => None,
        }
    }

    /// Set `field` when it is a known figure; unknown names are ignored.
    pub fn set(&mut self, field: &str, value: f64) {
        if let Some(slot) = self.slot_mut(field) {
            *slot = Some(value);
        }
    }

    /// Fill every absent figure from `other`, keeping values already present.
    pub fn merge_missing(&mut self, other: &TaxData) {
        for field in Self::FIELDS {
            if self.get(field).is_none() {
                if let Some(value) = other.get(field) {
                    self.set(field, value);
                }
            }
        }
    }

    /// Present figures in declaration order.
    pub fn present(&self) -> Vec<(&'static str, f64)> {
        Self::FIELDS
            .iter()
            .filter_map(|field| self.get(field).map(|value| (*field, value)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }
}

/// Accept numbers, numeric strings (with `$` and `,`), or null.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}

/// A form that is null or not an object reads as empty.
fn lenient_form<'de, D>(deserializer: D) -> Result<Form, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(lines) => {
            let mut form = Form::new();
            for (line, raw) in lines {
                let form_line = FormLine::deserialize(raw).map_err(serde::de::Error::custom)?;
                form.insert(&line, form_line);
            }
            Ok(form)
        }
        _ => Ok(Form::new()),
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(text_from_value(&value))
}

/// Null reads as empty; non-string scalars keep their JSON spelling.
fn text_from_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '$' | ',' | ' '))
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drafted_forms_accept_source_form_names() {
        let drafted: DraftedForms = serde_json::from_value(json!({
            "form_1120": {
                "line_1a": {"value": 1000, "description": "Gross receipts"},
                "line_2": {"value": "1,250", "description": "Returns"},
                "line_3": {"value": null}
            },
            "schedule_c": {"line_1": {"value": 1000}},
            "reasoning": "totals"
        }))
        .expect("parse drafted forms");
        assert_eq!(drafted.primary_form.value("line_1a"), Some(1000.0));
        assert_eq!(drafted.primary_form.value("line_2"), Some(1250.0));
        assert_eq!(drafted.primary_form.value("line_3"), None);
        assert_eq!(drafted.schedule_a.value("line_1"), Some(1000.0));
        assert!(drafted.schedule_b.is_empty());
    }

    #[test]
    fn non_numeric_values_read_as_blank() {
        let line: FormLine =
            serde_json::from_value(json!({"value": "n/a", "description": "x"})).unwrap();
        assert_eq!(line.value, None);
    }

    #[test]
    fn loosely_shaped_drafts_still_parse() {
        let drafted: DraftedForms = serde_json::from_value(json!({
            "primary_form": {
                "line_1a": {"value": 1000, "description": null},
                "line_2": 0,
                "line_3": "1,000",
                "line_4": true,
                "line_5": [1, 2]
            },
            "schedule_a": null,
            "schedule_b": "none",
            "reasoning": null
        }))
        .expect("parse drafted forms");

        let line_1a = drafted.primary_form.line("line_1a").expect("line_1a");
        assert_eq!(line_1a.value, Some(1000.0));
        assert_eq!(line_1a.description, "");
        assert_eq!(drafted.primary_form.value("line_2"), Some(0.0));
        assert_eq!(drafted.primary_form.value("line_3"), Some(1000.0));
        assert_eq!(drafted.primary_form.value("line_4"), None);
        assert_eq!(drafted.primary_form.value("line_5"), None);
        assert_eq!(drafted.primary_form.len(), 5);
        assert!(drafted.schedule_a.is_empty());
        assert!(drafted.schedule_b.is_empty());
        assert_eq!(drafted.reasoning, "");
    }

    #[test]
    fn non_string_descriptions_keep_their_json_text() {
        let line: FormLine =
            serde_json::from_value(json!({"value": 5, "description": 12})).unwrap();
        assert_eq!(line.value, Some(5.0));
        assert_eq!(line.description, "12");
    }

    #[test]
    fn merge_missing_keeps_first_value() {
        let mut first = TaxData {
            gross_receipts: Some(10.0),
            ..TaxData::default()
        };
        let second = TaxData {
            gross_receipts: Some(99.0),
            net_income: Some(5.0),
            ..TaxData::default()
        };
        first.merge_missing(&second);
        assert_eq!(first.gross_receipts, Some(10.0));
        assert_eq!(first.net_income, Some(5.0));
        assert_eq!(first.present().len(), 2);
    }
}
