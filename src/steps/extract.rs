//! First step: turn uploaded files into extracted text and figures.
//!
//! Reads `uploaded_files`; writes `extracted_data` and `tax_data`. Each
//! figure found is recorded in the ledger against the file it came from.

use crate::context::{WorkflowContext, EXTRACTED_DATA, TAX_DATA, UPLOADED_FILES};
use crate::extract::{ExtractedFile, Extractor, UploadedFile};
use crate::forms::TaxData;
use crate::pipeline::Step;
use crate::provenance::{metadata, ProvenanceLedger};
use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::collections::BTreeMap;

/// Pull raw text and named figures out of every uploaded file.
///
/// Figures are merged across files in upload order; the first file to supply
/// a figure wins.
pub struct ExtractData {
    extractor: Box<dyn Extractor>,
}

impl ExtractData {
    pub const NAME: &'static str = "ExtractData";

    pub fn new(extractor: Box<dyn Extractor>) -> Self {
        Self { extractor }
    }
}

impl Step for ExtractData {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Extract financial figures and raw text from uploaded documents"
    }

    fn run(&self, ctx: &mut WorkflowContext, ledger: &mut ProvenanceLedger) -> Result<()> {
        let files: Vec<UploadedFile> = ctx.get(UPLOADED_FILES)?.unwrap_or_default();
        if files.is_empty() {
            return Err(anyhow!("No files uploaded for processing"));
        }

        let mut extracted: BTreeMap<String, ExtractedFile> = BTreeMap::new();
        let mut tax_data = TaxData::default();
        for file in &files {
            let result = self
                .extractor
                .extract(file)
                .with_context(|| format!("extract {}", file.name))?;
            for (figure, value) in result.tax_data.present() {
                if tax_data.get(figure).is_some() {
                    continue;
                }
                tax_data.set(figure, value);
                ledger.add_record(
                    Self::NAME,
                    figure,
                    value,
                    result.method.as_str(),
                    result.method.confidence(),
                    metadata([("file", json!(file.name))]),
                );
            }
            tracing::debug!(
                file = %file.name,
                method = %result.method,
                figures = result.tax_data.present().len(),
                "file extracted"
            );
            extracted.insert(file.name.clone(), result);
        }

        ctx.insert(EXTRACTED_DATA, &extracted)?;
        ctx.insert(TAX_DATA, &tax_data)?;

        let file_names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        ledger.add_record(
            Self::NAME,
            "extraction_summary",
            format!("Processed {} files", files.len()),
            "extract_data_step",
            0.9,
            metadata([
                ("files_processed", json!(files.len())),
                ("file_names", json!(file_names)),
                ("tax_fields_found", json!(tax_data.present().len())),
            ]),
        );
        Ok(())
    }
}
