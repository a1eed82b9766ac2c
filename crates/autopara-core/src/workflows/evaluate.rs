use crate::core::calculators::{BUILTIN_FACTORY_ID, CalculatorFactory};
use crate::core::models::structure::Structure;
use crate::engine::adapter::CalculatorAdapter;
use crate::engine::chunker::chunked;
use crate::engine::config::{ConfigError, EvaluationConfig};
use crate::engine::dispatcher::{self, Tally};
use crate::engine::error::EngineError;
use crate::engine::pool::{WorkerCommand, WorkerPool};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::protocol::WorkerJob;
use crate::engine::sink::ResultSink;
use std::convert::Infallible;
use tracing::{info, instrument};

/// Subcommand the default worker command appends to the running executable.
pub const WORKER_SUBCOMMAND: &str = "worker";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Inputs whose records were already stored by a previous run.
    pub skipped: usize,
    pub computed: usize,
    pub failed: usize,
    /// The destination was already finalized; nothing was read or computed.
    pub already_complete: bool,
}

impl RunSummary {
    /// Records produced by this run.
    pub fn processed(&self) -> usize {
        self.computed + self.failed
    }
}

/// Evaluates every structure of an infallible input sequence. See [`try_run`].
pub fn run<I, S>(
    inputs: I,
    sink: &mut S,
    config: &EvaluationConfig,
    factory: &dyn CalculatorFactory,
    reporter: &ProgressReporter,
) -> Result<RunSummary, EngineError>
where
    I: IntoIterator<Item = Structure>,
    S: ResultSink,
{
    try_run(
        inputs.into_iter().map(Ok::<_, Infallible>),
        sink,
        config,
        factory,
        reporter,
    )
}

/// Evaluates the calculator described by `config` over every input and writes one record
/// per input to `sink`, in input order.
///
/// Inputs the sink already holds records for are skipped. With one worker everything runs
/// in this process using `factory`; with more, a pool of worker processes is started
/// (by default the running executable with the `worker` subcommand), each building its
/// own calculator. Workers must serve the same factory as `factory`, compared by
/// [`CalculatorFactory::factory_id`]; the default worker serves
/// [`BuiltinCalculators`](crate::core::calculators::BuiltinCalculators), so
/// a custom factory needs a custom `worker_command`. The sink is finalized only after every
/// input has been processed.
///
/// # Errors
///
/// Input read errors, calculator construction errors, run-directory errors, worker
/// crashes, chunk timeouts and destination errors abort the run and leave the sink
/// unfinalized. Per-structure calculator failures never do; they become failed records.
#[instrument(skip_all, name = "evaluate_workflow")]
pub fn try_run<I, E, S>(
    inputs: I,
    sink: &mut S,
    config: &EvaluationConfig,
    factory: &dyn CalculatorFactory,
    reporter: &ProgressReporter,
) -> Result<RunSummary, EngineError>
where
    I: IntoIterator<Item = Result<Structure, E>>,
    E: Into<EngineError>,
    S: ResultSink,
{
    config.autopara.validate()?;
    config.settings.rundir.validate()?;

    if sink.is_complete() {
        info!(
            "Destination already complete with {} records; nothing to do.",
            sink.resume_point()
        );
        return Ok(RunSummary {
            skipped: sink.resume_point(),
            already_complete: true,
            ..RunSummary::default()
        });
    }

    // === Phase 1: Skip what a previous run already stored ===
    reporter.report(Progress::PhaseStart {
        name: "Preparation",
    });
    let skipped = sink.resume_point();
    let remaining = sink.remaining_inputs(inputs)?;
    if skipped > 0 {
        info!("Resuming after {} already stored records.", skipped);
        reporter.message(format!("Resuming after {skipped} stored records"));
    }
    let total = match remaining.size_hint() {
        (lo, Some(hi)) if lo == hi => Some(lo as u64),
        _ => None,
    };
    reporter.report(Progress::PhaseFinish);

    // === Phase 2: Evaluate ===
    reporter.report(Progress::PhaseStart { name: "Evaluation" });
    reporter.report(Progress::TaskStart { total_steps: total });

    let autopara = &config.autopara;
    let chunks = chunked(remaining, autopara.inputs_per_worker, skipped);
    let mut tally = Tally::default();

    if autopara.is_parallel() {
        let command = match &autopara.worker_command {
            Some(command) => command.clone(),
            None if factory.factory_id() != BUILTIN_FACTORY_ID => {
                return Err(ConfigError::Invalid {
                    parameter: "worker_command",
                    reason: format!(
                        "the default worker only serves the built-in calculators; factory '{}' needs a worker command that serves it",
                        factory.factory_id()
                    ),
                }
                .into());
            }
            None => WorkerCommand::current_exe([WORKER_SUBCOMMAND])
                .map_err(|source| EngineError::WorkerSpawn { worker: 0, source })?,
        };
        let job = WorkerJob {
            factory: factory.factory_id().to_string(),
            calculator: config.calculator.clone(),
            settings: config.settings.clone(),
            resources: autopara.resources.clone(),
        };
        info!(
            "Evaluating with {} workers, {} inputs per chunk.",
            autopara.num_workers, autopara.inputs_per_worker
        );
        let pool = WorkerPool::spawn(&command, autopara.num_workers, &job)?;
        dispatcher::run_parallel(
            chunks,
            skipped,
            &pool,
            autopara.chunk_timeout,
            sink,
            reporter,
            &mut tally,
        )?;
        pool.shutdown()?;
    } else {
        info!("Evaluating in-process, {} inputs per chunk.", autopara.inputs_per_worker);
        let mut adapter = CalculatorAdapter::new(
            factory,
            config.calculator.clone(),
            config.settings.clone(),
            autopara.resources.clone(),
        );
        dispatcher::run_serial(chunks, &mut adapter, sink, reporter, &mut tally)?;
    }

    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);

    // === Phase 3: Finalize ===
    sink.finalize()?;
    let summary = RunSummary {
        skipped,
        computed: tally.computed,
        failed: tally.failed,
        already_complete: false,
    };
    info!(
        "Workflow complete: {} computed, {} failed, {} skipped.",
        summary.computed, summary.failed, summary.skipped
    );
    Ok(summary)
}
