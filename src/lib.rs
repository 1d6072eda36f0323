//! Drafting pipeline core for corporate income tax returns.
//!
//! - `pipeline` runs named steps in order over a shared `context`, halting on
//!   the first failure.
//! - `provenance` records where every extracted or drafted figure came from.
//! - `diagnostics` applies rule-based checks to drafted forms.
//! - `suggestions` proposes corrections for flagged issues.
//! - `inference` talks to language-model providers with ordered fallback.
//!
//! `steps` wires these into the four-step drafting run used by the CLI.

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod extract;
pub mod forms;
pub mod inference;
pub mod pipeline;
pub mod prompts;
pub mod provenance;
pub mod steps;
pub mod suggestions;
pub mod util;
