//! Source document extraction.
//!
//! The pipeline only depends on the `Extractor` trait. `TextExtractor` covers
//! the formats that need no external tooling: a JSON object of named figures,
//! or plain text/markdown scanned for labelled amounts.
use crate::forms::TaxData;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A document handed to the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub path: PathBuf,
}

impl UploadedFile {
    /// Name the file after the last path component.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            path: path.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Figures read verbatim from a JSON document.
    Structured,
    /// Figures found by matching labelled amounts in free text.
    PatternMatching,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Structured => "structured",
            ExtractionMethod::PatternMatching => "pattern_matching",
        }
    }

    /// Ledger confidence for a figure obtained this way.
    pub fn confidence(&self) -> f64 {
        match self {
            ExtractionMethod::Structured => 1.0,
            ExtractionMethod::PatternMatching => 0.8,
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file extraction result stored under `extracted_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFile {
    pub file_type: String,
    pub text: String,
    pub method: ExtractionMethod,
    pub tax_data: TaxData,
}

pub trait Extractor {
    fn extract(&self, file: &UploadedFile) -> Result<ExtractedFile>;
}

/// Label patterns per figure, tried in order; the first match wins.
const FIGURE_PATTERNS: [(&str, [&str; 2]); 7] = [
    ("gross_receipts", ["gross receipts", "revenue"]),
    ("cost_of_goods_sold", ["cost of goods sold", "cogs"]),
    ("operating_expenses", ["operating expenses", "expenses"]),
    ("net_income", ["net income", "profit"]),
    ("total_assets", ["total assets", "assets"]),
    ("total_liabilities", ["total liabilities", "liabilities"]),
    ("equity", ["equity", "owner'?s equity"]),
];

const AMOUNT_SUFFIX: &str = r"[:\s]*\$?([\d,]+\.?\d*)";

pub struct TextExtractor {
    patterns: Vec<(&'static str, Vec<Regex>)>,
}

impl TextExtractor {
    pub fn new() -> Result<Self> {
        let mut patterns = Vec::with_capacity(FIGURE_PATTERNS.len());
        for (field, labels) in FIGURE_PATTERNS {
            let mut compiled = Vec::with_capacity(labels.len());
            for label in labels {
                let pattern = format!("(?i){label}{AMOUNT_SUFFIX}");
                compiled.push(
                    Regex::new(&pattern)
                        .with_context(|| format!("compile figure pattern for {field}"))?,
                );
            }
            patterns.push((field, compiled));
        }
        Ok(Self { patterns })
    }

    /// Scan free text for labelled amounts.
    pub fn figures_from_text(&self, text: &str) -> TaxData {
        let mut tax_data = TaxData::default();
        for (field, regexes) in &self.patterns {
            let value = regexes.iter().find_map(|regex| {
                let captured = regex.captures(text)?.get(1)?.as_str().replace(',', "");
                captured.parse::<f64>().ok()
            });
            if let Some(value) = value {
                tax_data.set(field, value);
            }
        }
        tax_data
    }
}

impl Extractor for TextExtractor {
    fn extract(&self, file: &UploadedFile) -> Result<ExtractedFile> {
        let file_type = file
            .path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match file_type.as_str() {
            "json" => {
                let text = read_text(&file.path)?;
                let raw: Value = serde_json::from_str(&text)
                    .with_context(|| format!("parse figures from {}", file.path.display()))?;
                if let Some(fields) = raw.as_object() {
                    let ignored: Vec<&str> = fields
                        .keys()
                        .map(String::as_str)
                        .filter(|key| !TaxData::FIELDS.iter().any(|field| field == key))
                        .collect();
                    if !ignored.is_empty() {
                        tracing::debug!(file = %file.name, ?ignored, "ignoring unknown figure keys");
                    }
                }
                let tax_data: TaxData = serde_json::from_value(raw)
                    .with_context(|| format!("parse figures from {}", file.path.display()))?;
                Ok(ExtractedFile {
                    file_type,
                    text,
                    method: ExtractionMethod::Structured,
                    tax_data,
                })
            }
            "txt" | "md" => {
                let text = read_text(&file.path)?;
                let tax_data = self.figures_from_text(&text);
                Ok(ExtractedFile {
                    file_type,
                    text,
                    method: ExtractionMethod::PatternMatching,
                    tax_data,
                })
            }
            "" => Err(anyhow!(
                "unsupported file type for {} (no extension)",
                file.name
            )),
            other => Err(anyhow!("unsupported file type .{other} for {}", file.name)),
        }
    }
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> TextExtractor {
        TextExtractor::new().expect("patterns compile")
    }

    #[test]
    fn labelled_amounts_are_found_case_insensitively() {
        let text = "Annual summary\nGross Receipts: $1,250,000.50\nCost of Goods Sold $700,000\nNet income: 95000\n";
        let data = extractor().figures_from_text(text);
        assert_eq!(data.gross_receipts, Some(1_250_000.5));
        assert_eq!(data.cost_of_goods_sold, Some(700_000.0));
        assert_eq!(data.net_income, Some(95_000.0));
        assert_eq!(data.total_assets, None);
    }

    #[test]
    fn fallback_labels_apply_when_primary_label_is_absent() {
        let data = extractor().figures_from_text("revenue 5,000\nprofit: 1,000\nCOGS: 2,000");
        assert_eq!(data.gross_receipts, Some(5_000.0));
        assert_eq!(data.net_income, Some(1_000.0));
        assert_eq!(data.cost_of_goods_sold, Some(2_000.0));
    }

    #[test]
    fn text_and_json_files_are_extracted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let text_path = dir.path().join("summary.txt");
        fs::write(&text_path, "Total assets: $10,000").expect("write text");
        let json_path = dir.path().join("figures.json");
        fs::write(&json_path, r#"{"gross_receipts": "2,000", "equity": 50}"#).expect("write json");

        let text = extractor()
            .extract(&UploadedFile::from_path(&text_path))
            .expect("extract text");
        assert_eq!(text.method, ExtractionMethod::PatternMatching);
        assert_eq!(text.tax_data.total_assets, Some(10_000.0));

        let json = extractor()
            .extract(&UploadedFile::from_path(&json_path))
            .expect("extract json");
        assert_eq!(json.method, ExtractionMethod::Structured);
        assert_eq!(json.file_type, "json");
        assert_eq!(json.tax_data.gross_receipts, Some(2_000.0));
        assert_eq!(json.tax_data.equity, Some(50.0));
    }

    #[test]
    fn unsupported_types_are_rejected() {
        let file = UploadedFile {
            name: "scan.pdf".to_string(),
            path: PathBuf::from("scan.pdf"),
        };
        let err = extractor().extract(&file).unwrap_err();
        assert!(err.to_string().contains("unsupported file type .pdf"));
    }

    #[test]
    fn unknown_json_fields_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("company.json");
        fs::write(
            &path,
            r#"{"company_name": "Acme Corp", "tax_year": 2024, "net_income": "42,000"}"#,
        )
        .expect("write json");
        let extracted = extractor()
            .extract(&UploadedFile::from_path(&path))
            .expect("extract json");
        assert_eq!(extracted.tax_data.net_income, Some(42_000.0));
        assert_eq!(extracted.tax_data.present().len(), 1);
    }

    #[test]
    fn json_that_is_not_an_object_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("note.json");
        fs::write(&path, r#""see attached ledger""#).expect("write json");
        assert!(extractor().extract(&UploadedFile::from_path(&path)).is_err());
    }
}
