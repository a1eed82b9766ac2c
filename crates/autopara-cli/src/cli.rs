use autopara::core::models::record::Property;
use autopara::engine::rundir::KeepFiles;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu",
    version,
    about = "AUTOPARA CLI - Evaluate atomistic calculators over large structure sets with parallel, resumable workers.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate a calculator over every structure of a JSON-lines input file.
    Run(RunArgs),
    /// Report whether an output file is absent, partial or complete.
    Status(StatusArgs),
    /// Serve the worker protocol on standard input and output (started by `run`).
    #[command(hide = true)]
    Worker,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    // --- Core Arguments ---
    /// Path to the input structures, one JSON object per line.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// Path of the JSON-lines output. Progress is kept in `<PATH>.partial` until the run
    /// completes; rerunning resumes from there.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Path to the configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    // --- Parallelism Overrides ---
    /// Number of worker processes. 1 evaluates everything in this process.
    #[arg(short = 'n', long, value_name = "INT")]
    pub num_workers: Option<usize>,

    /// Number of structures sent to a worker at a time.
    #[arg(long = "chunk-size", alias = "inputs-per-worker", value_name = "INT")]
    pub chunk_size: Option<usize>,

    /// Threads one calculation may use (exported as OMP_NUM_THREADS).
    #[arg(long, value_name = "INT")]
    pub threads_per_task: Option<usize>,

    /// Memory one calculation may use, in the backend's notation (e.g., 16GB).
    #[arg(long, value_name = "SIZE")]
    pub memory: Option<String>,

    /// Abort if no chunk completes within this many seconds.
    #[arg(long, value_name = "SECONDS")]
    pub chunk_timeout: Option<f64>,

    // --- Evaluation Overrides ---
    /// Properties to compute, comma-separated (energy, forces, stress).
    #[arg(short, long, value_name = "LIST", value_delimiter = ',')]
    pub properties: Vec<Property>,

    /// Prefix of the keys computed properties are stored under.
    #[arg(long, value_name = "PREFIX")]
    pub prefix: Option<String>,

    // --- Run Directory Overrides ---
    /// Directory in which run directories are created.
    #[arg(long, value_name = "PATH")]
    pub workdir: Option<PathBuf>,

    /// Run calculations on this scratch root and copy kept files back.
    #[arg(long, value_name = "PATH")]
    pub scratchdir: Option<PathBuf>,

    /// Files kept after a successful calculation: all, none, default, or a
    /// comma-separated glob list.
    #[arg(long, value_name = "POLICY")]
    pub keep_files: Option<KeepFiles>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S autopara.num-workers=4
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `status` subcommand.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Path of the JSON-lines output to inspect.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,
}
