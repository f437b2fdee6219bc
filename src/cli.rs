//! Command-line interface definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::scheduler::FailurePolicy;

/// Task-graph code-synthesis orchestrator
#[derive(Debug, Parser)]
#[command(name = "forge", version, about)]
pub struct Cli {
    /// Path to a config file (defaults: .codeforge.yml, then user config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decompose a request, generate code, and merge the result
    Run {
        /// The code-generation request
        request: String,

        /// Output directory for checkpoints, contracts, and the corpus
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Worker pool size (default: one per core, minimum 2)
        #[arg(long)]
        workers: Option<usize>,

        /// LLM generation rounds per task
        #[arg(long)]
        max_attempts: Option<u32>,

        /// block, fail-fast, skip-failed, or skip-missing
        #[arg(long)]
        failure_policy: Option<FailurePolicy>,

        /// Root namespace for generated types
        #[arg(long)]
        project_name: Option<String>,

        /// Skip the complexity/splitter pass
        #[arg(long)]
        no_split: bool,

        /// Skip contract-first generation
        #[arg(long)]
        no_contracts: bool,
    },

    /// Show the latest checkpoint for an output directory
    Status {
        /// Output directory of a previous run
        #[arg(long, default_value = "codeforge-out")]
        output_dir: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["forge", "run", "build a parser", "--workers", "4"]);
        match cli.command {
            Command::Run { request, workers, .. } => {
                assert_eq!(request, "build a parser");
                assert_eq!(workers, Some(4));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_failure_policy() {
        let cli = Cli::parse_from(["forge", "run", "x", "--failure-policy", "fail-fast"]);
        match cli.command {
            Command::Run { failure_policy, .. } => {
                assert_eq!(failure_policy, Some(FailurePolicy::FailFast));
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_parse_status() {
        let cli = Cli::parse_from(["forge", "status", "--output-dir", "/tmp/out"]);
        match cli.command {
            Command::Status { output_dir } => {
                assert_eq!(output_dir, PathBuf::from("/tmp/out"));
            }
            _ => panic!("expected status command"),
        }
    }
}
