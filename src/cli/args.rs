//! Command line argument parsing for the segmerge CLI using clap.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Segmerge - inspect the output of segment merges
#[derive(Parser, Debug, Clone)]
#[command(name = "segmerge")]
#[command(about = "Inspect merge metas and reclaim maps written by segmerge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct SegmergeArgs {
    /// Verbosity level (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl SegmergeArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n + 1,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the merge meta of a completed plan
    Meta(MetaArgs),

    /// Translate an old doc id through a stored reclaim map
    Lookup(LookupArgs),

    /// Report whether a plan has already completed
    Check(CheckArgs),
}

/// Arguments for printing a merge meta
#[derive(Parser, Debug, Clone)]
pub struct MetaArgs {
    /// Merge output directory
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Plan index within the merge
    #[arg(short, long, default_value = "0")]
    pub plan: usize,

    /// Also list task markers and truncate failures
    #[arg(long)]
    pub detailed: bool,
}

/// Arguments for translating a doc id
#[derive(Parser, Debug, Clone)]
pub struct LookupArgs {
    /// Merge output directory
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Ordinal of the source segment within the plan
    #[arg(value_name = "SEGMENT_INDEX")]
    pub segment_index: usize,

    /// Local doc id within that segment
    #[arg(value_name = "OLD_DOC_ID")]
    pub old_doc_id: u32,

    /// Plan index within the merge
    #[arg(short, long, default_value = "0")]
    pub plan: usize,
}

/// Arguments for checking plan completion
#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    /// Merge output directory
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Merge plan file (JSON)
    #[arg(value_name = "PLAN_JSON")]
    pub plan_file: PathBuf,

    /// Plan index within the merge
    #[arg(short, long, default_value = "0")]
    pub plan: usize,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_lookup_command() {
        let args = SegmergeArgs::try_parse_from([
            "segmerge", "lookup", "/merge/out", "1", "42", "--plan", "2",
        ])
        .unwrap();

        if let Command::Lookup(lookup_args) = args.command {
            assert_eq!(lookup_args.dir, PathBuf::from("/merge/out"));
            assert_eq!(lookup_args.segment_index, 1);
            assert_eq!(lookup_args.old_doc_id, 42);
            assert_eq!(lookup_args.plan, 2);
        } else {
            panic!("Expected Lookup command");
        }
    }

    #[test]
    fn test_check_command() {
        let args =
            SegmergeArgs::try_parse_from(["segmerge", "check", "/merge/out", "plan.json"]).unwrap();

        if let Command::Check(check_args) = args.command {
            assert_eq!(check_args.plan_file, PathBuf::from("plan.json"));
            assert_eq!(check_args.plan, 0);
        } else {
            panic!("Expected Check command");
        }
    }

    #[test]
    fn test_verbosity_levels() {
        let args = SegmergeArgs::try_parse_from(["segmerge", "meta", "out"]).unwrap();
        assert_eq!(args.verbosity(), 1);

        let args = SegmergeArgs::try_parse_from(["segmerge", "-v", "meta", "out"]).unwrap();
        assert_eq!(args.verbosity(), 2);

        let args = SegmergeArgs::try_parse_from(["segmerge", "-vv", "meta", "out"]).unwrap();
        assert_eq!(args.verbosity(), 3);

        let args = SegmergeArgs::try_parse_from(["segmerge", "-q", "-v", "meta", "out"]).unwrap();
        assert_eq!(args.verbosity(), 0);
    }

    #[test]
    fn test_output_format() {
        let args =
            SegmergeArgs::try_parse_from(["segmerge", "--format", "json", "meta", "out"]).unwrap();
        assert_eq!(args.output_format, OutputFormat::Json);

        assert!(SegmergeArgs::try_parse_from(["segmerge", "--format", "yaml", "meta", "out"]).is_err());
    }
}
