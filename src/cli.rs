//! CLI argument parsing for the drafting workflow.
//!
//! Each subcommand maps onto one runner in `workflow`.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "taxdraft",
    version,
    about = "LM-assisted corporate return drafting with diagnostics and provenance",
    after_help = "Commands:\n  run --input <file>...      Extract, draft, diagnose, and suggest adjustments\n  diagnose --forms <file>    Diagnose an existing drafted-forms JSON file\n  providers                  List inference providers in fallback order\n\nExamples:\n  taxdraft run --input ledger.txt --input totals.json\n  taxdraft run --input ledger.txt --json --provenance-out provenance.jsonl\n  taxdraft run --input ledger.txt --apply-above 0.9\n  taxdraft diagnose --forms drafted.json --json\n  taxdraft providers",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Diagnose(DiagnoseArgs),
    Providers(ProvidersArgs),
}

impl Command {
    pub fn verbose(&self) -> bool {
        match self {
            Command::Run(args) => args.verbose,
            Command::Diagnose(args) => args.verbose,
            Command::Providers(_) => false,
        }
    }
}

/// Run command inputs for the full drafting pipeline.
#[derive(Parser, Debug)]
#[command(about = "Run extraction, drafting, diagnostics, and adjustments")]
pub struct RunArgs {
    /// Source document to extract figures from (.txt, .md, or .json)
    #[arg(long = "input", value_name = "FILE", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Config file (defaults to ./taxdraft.json when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit the final workflow context as JSON
    #[arg(long)]
    pub json: bool,

    /// Write the provenance ledger as JSON lines
    #[arg(long, value_name = "PATH")]
    pub provenance_out: Option<PathBuf>,

    /// Apply suggestions with at least this confidence to the drafted forms
    #[arg(long, value_name = "CONFIDENCE", value_parser = parse_confidence)]
    pub apply_above: Option<f64>,

    /// Emit debug logging
    #[arg(long)]
    pub verbose: bool,
}

/// Diagnose command inputs for an already drafted set of forms.
#[derive(Parser, Debug)]
#[command(about = "Diagnose drafted forms and suggest adjustments")]
pub struct DiagnoseArgs {
    /// Drafted forms JSON (primary_form, schedule_a, schedule_b)
    #[arg(long, value_name = "FILE")]
    pub forms: PathBuf,

    /// Extracted figures JSON used to fill missing critical fields
    #[arg(long, value_name = "FILE")]
    pub tax_data: Option<PathBuf>,

    /// Config file (defaults to ./taxdraft.json when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,

    /// Emit debug logging
    #[arg(long)]
    pub verbose: bool,
}

/// Providers command inputs.
#[derive(Parser, Debug)]
#[command(about = "List inference providers in fallback order")]
pub struct ProvidersArgs {
    /// Config file (defaults to ./taxdraft.json when present)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

fn parse_confidence(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("{raw:?} is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("confidence must be between 0 and 1 (got {value})"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_repeated_inputs() {
        let args = RootArgs::try_parse_from([
            "taxdraft",
            "run",
            "--input",
            "a.txt",
            "--input",
            "b.json",
            "--apply-above",
            "0.9",
        ])
        .expect("parse");
        let Command::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.inputs.len(), 2);
        assert_eq!(run.apply_above, Some(0.9));
    }

    #[test]
    fn run_requires_an_input() {
        assert!(RootArgs::try_parse_from(["taxdraft", "run"]).is_err());
    }

    #[test]
    fn apply_above_must_be_a_confidence() {
        let result = RootArgs::try_parse_from([
            "taxdraft",
            "run",
            "--input",
            "a.txt",
            "--apply-above",
            "1.5",
        ]);
        assert!(result.is_err());
    }
}
