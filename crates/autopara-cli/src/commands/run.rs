use crate::cli::RunArgs;
use crate::config::PartialRunConfig;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use autopara::{
    core::calculators::BuiltinCalculators,
    core::io::jsonl::StructureReader,
    engine::{
        config::WorkerCommand,
        progress::ProgressReporter,
        sink::{JsonLinesSink, ResultSink},
    },
    workflows::{self, evaluate::WORKER_SUBCOMMAND},
};
use tracing::{info, warn};

/// Global flags forwarded to worker processes so their stderr logging matches ours.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFlags {
    pub verbose: u8,
    pub quiet: bool,
}

impl LogFlags {
    fn worker_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.quiet {
            args.push("--quiet".to_string());
        } else if self.verbose > 0 {
            args.push(format!("-{}", "v".repeat(self.verbose as usize)));
        }
        args.push(WORKER_SUBCOMMAND.to_string());
        args
    }
}

pub fn run(args: RunArgs, log_flags: LogFlags) -> Result<()> {
    let partial_config = PartialRunConfig::from_file(&args.config)?;
    info!("Merging configuration from file, CLI arguments and environment...");
    let mut final_config = partial_config.merge_with_cli(&args, |key| std::env::var(key).ok())?;

    if final_config.autopara.worker_command.is_none() {
        let command = WorkerCommand::current_exe(log_flags.worker_args())?;
        final_config.autopara.worker_command = Some(command);
    }

    let mut sink = JsonLinesSink::open(&args.output).map_err(|source| CliError::Output {
        path: args.output.clone(),
        source,
    })?;
    if sink.is_complete() {
        println!(
            "Output {} is already complete ({} records); nothing to do.",
            args.output.display(),
            sink.resume_point()
        );
        return Ok(());
    }

    info!("Opening input structures from {:?}", &args.input);
    let inputs = StructureReader::open(&args.input).map_err(|e| CliError::FileParsing {
        path: args.input.clone(),
        source: e.into(),
    })?;

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    println!(
        "Evaluating {} calculator with {} worker(s)...",
        final_config.calculator.backend_name(),
        final_config.autopara.num_workers
    );
    info!("Invoking the core evaluation workflow...");

    let summary = workflows::evaluate::try_run(
        inputs,
        &mut sink,
        &final_config,
        &BuiltinCalculators,
        &reporter,
    )?;

    if summary.skipped > 0 {
        println!(
            "Resumed after {} previously stored record(s).",
            summary.skipped
        );
    }
    println!(
        "✓ {} record(s) written to {} ({} computed, {} failed).",
        summary.skipped + summary.processed(),
        sink.final_path().display(),
        summary.computed,
        summary.failed
    );
    if summary.failed > 0 {
        warn!(
            "{} structure(s) failed; their records carry the error message.",
            summary.failed
        );
    }

    Ok(())
}
