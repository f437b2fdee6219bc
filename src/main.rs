//! codeforge - task-graph code-synthesis orchestrator
//!
//! CLI entry point: wires the LLM client, validator, and clarifier into the
//! orchestrator and maps the run report onto the process exit code.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use codeforge::checkpoint::Checkpointer;
use codeforge::clarifier::AutoApprove;
use codeforge::cli::{Cli, Command};
use codeforge::config::Config;
use codeforge::llm::create_client;
use codeforge::orchestrator::{Orchestrator, RunReport};
use codeforge::validator::CommandValidator;

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup_logging();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            request,
            output_dir,
            workers,
            max_attempts,
            failure_policy,
            project_name,
            no_split,
            no_contracts,
        } => {
            if let Some(dir) = output_dir {
                config.run.output_directory = dir;
            }
            if let Some(workers) = workers {
                config.run.worker_count = Some(workers);
            }
            if let Some(attempts) = max_attempts {
                config.run.max_attempts = attempts;
            }
            if let Some(policy) = failure_policy {
                config.run.failure_policy = policy;
            }
            if let Some(name) = project_name {
                config.run.project_name = name;
            }
            if no_split {
                config.run.enable_complexity_analysis = false;
            }
            if no_contracts {
                config.run.enable_contract_first = false;
            }

            let llm = create_client(&config.llm).context("Failed to create LLM client")?;
            if config.validation.command.is_empty() {
                eyre::bail!("no validator command configured; set validation.command in the config file");
            }
            let validator = Arc::new(CommandValidator::new(
                config.validation.command.clone(),
                Duration::from_millis(config.validation.timeout_ms),
            ));

            let orchestrator = Orchestrator::new(llm, validator, Arc::new(AutoApprove), config.run);

            // Ctrl-C requests cooperative cancellation
            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling run");
                    signal_cancel.cancel();
                }
            });

            let report = orchestrator.run_cancellable(&request, cancel).await;
            print_report(&report);
            Ok(ExitCode::from(report.exit_status.code() as u8))
        }

        Command::Status { output_dir } => {
            let checkpointer = Checkpointer::new(&output_dir);
            match checkpointer.load_latest().await {
                Ok(Some(checkpoint)) => {
                    print!("{}", checkpoint.render_view());
                    Ok(ExitCode::SUCCESS)
                }
                Ok(None) => {
                    println!("No checkpoints under {}", output_dir.display());
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("Failed to load checkpoint: {}", e);
                    Ok(ExitCode::from(2))
                }
            }
        }
    }
}

fn print_report(report: &RunReport) {
    info!(exit = report.exit_status.code(), "run report ready");

    println!("codeforge v{}", env!("CARGO_PKG_VERSION"));
    if let Some(fatal) = &report.fatal {
        println!("FATAL: {}", fatal);
        return;
    }

    let completed = report
        .tasks
        .iter()
        .filter(|t| t.status == codeforge::domain::TaskStatus::Validated)
        .count();
    println!(
        "Tasks: {}/{} completed in {} ms",
        completed,
        report.tasks.len(),
        report.duration_ms
    );

    for task in &report.tasks {
        if task.status != codeforge::domain::TaskStatus::Validated {
            println!("  {} -> {}", task.id, task.status);
            for diagnostic in &task.diagnostics {
                println!("     {}", diagnostic);
            }
        }
    }

    if !report.conflicts.is_empty() {
        println!("Merge conflicts: {}", report.conflicts.len());
        for conflict in &report.conflicts {
            let state = if conflict.resolved { "resolved" } else { "UNRESOLVED" };
            println!(
                "  {} ({} vs {}): {} [{}]",
                conflict.fully_qualified_name,
                conflict.first_task_id,
                conflict.second_task_id,
                conflict.resolution,
                state
            );
        }
    }

    if !report.collisions.is_empty() {
        println!("Symbol collisions: {}", report.collisions.len());
        for collision in &report.collisions {
            println!("  {} '{}': {} vs {}", collision.kind, collision.simple_name, collision.existing, collision.incoming);
        }
    }

    for warning in &report.warnings {
        println!("warning: {}", warning);
    }

    println!("Output: {}", report.output_directory.display());
}
