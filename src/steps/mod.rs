//! The four steps of a drafting run, in execution order.
//!
//! | step | reads | writes |
//! |---|---|---|
//! | `ExtractData` | `uploaded_files` | `extracted_data`, `tax_data` |
//! | `DraftForms` | `tax_data`, `extracted_data` | `drafted_forms` |
//! | `Diagnostics` | `drafted_forms` | `diagnostics` |
//! | `Adjustments` | `diagnostics`, `drafted_forms`, `tax_data` | `adjustments` |
mod adjust;
mod diagnose;
mod draft;
mod extract;

pub use adjust::Adjustments;
pub use diagnose::Diagnostics;
pub use draft::DraftForms;
pub use extract::ExtractData;
