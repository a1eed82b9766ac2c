use super::rundir::RunDirConfig;
use crate::core::calculators::{CalculatorSpec, ResourceHints};
use crate::core::models::record::Property;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_NUM_WORKERS: usize = 1;
pub const DEFAULT_INPUTS_PER_WORKER: usize = 1;
pub const DEFAULT_OUTPUT_PREFIX: &str = "calc_";

/// Environment variable supplying the worker count when none is configured.
pub const NUM_WORKERS_ENV: &str = "AUTOPARA_NUM_WORKERS";
/// Environment variable supplying the chunk size when none is configured.
pub const INPUTS_PER_WORKER_ENV: &str = "AUTOPARA_INPUTS_PER_WORKER";

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for {parameter}: {reason}")]
    Invalid {
        parameter: &'static str,
        reason: String,
    },
}

/// The program (and leading arguments) started for every pooled worker process.
///
/// The process must speak the worker protocol on its standard input and output, see
/// [`crate::engine::protocol::serve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-invokes the running executable with `args`.
    pub fn current_exe<I, S>(args: I) -> Result<Self, io::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

/// Parallelism settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoparaInfo {
    /// Number of worker processes; 1 means in-process serial execution.
    pub num_workers: usize,
    /// Number of inputs grouped into one chunk, i.e. one worker round trip.
    pub inputs_per_worker: usize,
    pub resources: ResourceHints,
    /// Longest time to wait for the next completed chunk before giving up.
    pub chunk_timeout: Option<Duration>,
    /// Worker program; defaults to the running executable's `worker` subcommand.
    pub worker_command: Option<WorkerCommand>,
}

impl Default for AutoparaInfo {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            inputs_per_worker: DEFAULT_INPUTS_PER_WORKER,
            resources: ResourceHints::default(),
            chunk_timeout: None,
            worker_command: None,
        }
    }
}

impl AutoparaInfo {
    pub fn is_parallel(&self) -> bool {
        self.num_workers > 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::Invalid {
                parameter: "num_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.inputs_per_worker == 0 {
            return Err(ConfigError::Invalid {
                parameter: "inputs_per_worker",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.chunk_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Invalid {
                parameter: "chunk_timeout",
                reason: "must be longer than zero".to_string(),
            });
        }
        if self.resources.threads_per_task == Some(0) {
            return Err(ConfigError::Invalid {
                parameter: "threads_per_task",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct AutoparaInfoBuilder {
    num_workers: Option<usize>,
    inputs_per_worker: Option<usize>,
    threads_per_task: Option<usize>,
    memory: Option<String>,
    chunk_timeout: Option<Duration>,
    worker_command: Option<WorkerCommand>,
}

impl AutoparaInfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = Some(n);
        self
    }
    pub fn inputs_per_worker(mut self, n: usize) -> Self {
        self.inputs_per_worker = Some(n);
        self
    }
    pub fn threads_per_task(mut self, n: usize) -> Self {
        self.threads_per_task = Some(n);
        self
    }
    pub fn memory(mut self, memory: impl Into<String>) -> Self {
        self.memory = Some(memory.into());
        self
    }
    pub fn chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = Some(timeout);
        self
    }
    pub fn worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }

    /// Fills the worker count and chunk size from environment-style variables when they
    /// have not been set explicitly.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`.
    pub fn env_defaults<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.num_workers.is_none() {
            self.num_workers = parse_env_count(&lookup, NUM_WORKERS_ENV, "num_workers")?;
        }
        if self.inputs_per_worker.is_none() {
            self.inputs_per_worker =
                parse_env_count(&lookup, INPUTS_PER_WORKER_ENV, "inputs_per_worker")?;
        }
        Ok(self)
    }

    pub fn build(self) -> Result<AutoparaInfo, ConfigError> {
        let info = AutoparaInfo {
            num_workers: self.num_workers.unwrap_or(DEFAULT_NUM_WORKERS),
            inputs_per_worker: self.inputs_per_worker.unwrap_or(DEFAULT_INPUTS_PER_WORKER),
            resources: ResourceHints {
                threads_per_task: self.threads_per_task,
                memory: self.memory,
            },
            chunk_timeout: self.chunk_timeout,
            worker_command: self.worker_command,
        };
        info.validate()?;
        Ok(info)
    }
}

fn parse_env_count<F>(
    lookup: &F,
    key: &str,
    parameter: &'static str,
) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                parameter,
                reason: format!("{key}='{raw}' is not a non-negative integer"),
            }),
    }
}

/// What to compute for every structure and where to do it.
///
/// Shipped verbatim to every worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EvaluationSettings {
    pub properties: Vec<Property>,
    /// Prefix of every key the computed properties are stored under.
    pub output_prefix: String,
    pub rundir: RunDirConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    pub calculator: CalculatorSpec,
    pub settings: EvaluationSettings,
    pub autopara: AutoparaInfo,
}

#[derive(Default)]
pub struct EvaluationConfigBuilder {
    calculator: Option<CalculatorSpec>,
    properties: Option<Vec<Property>>,
    output_prefix: Option<String>,
    rundir: Option<RunDirConfig>,
    autopara: Option<AutoparaInfo>,
}

impl EvaluationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calculator(mut self, spec: CalculatorSpec) -> Self {
        self.calculator = Some(spec);
        self
    }
    pub fn properties(mut self, properties: Vec<Property>) -> Self {
        self.properties = Some(properties);
        self
    }
    pub fn output_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.output_prefix = Some(prefix.into());
        self
    }
    pub fn rundir(mut self, rundir: RunDirConfig) -> Self {
        self.rundir = Some(rundir);
        self
    }
    pub fn autopara(mut self, info: AutoparaInfo) -> Self {
        self.autopara = Some(info);
        self
    }

    pub fn build(self) -> Result<EvaluationConfig, ConfigError> {
        let mut properties = self
            .properties
            .ok_or(ConfigError::MissingParameter("properties"))?;
        if properties.is_empty() {
            return Err(ConfigError::Invalid {
                parameter: "properties",
                reason: "at least one property must be requested".to_string(),
            });
        }
        let mut seen = Vec::with_capacity(properties.len());
        properties.retain(|p| {
            let fresh = !seen.contains(p);
            seen.push(*p);
            fresh
        });

        let rundir = self.rundir.unwrap_or_default();
        rundir.validate()?;
        let autopara = self.autopara.unwrap_or_default();
        autopara.validate()?;

        Ok(EvaluationConfig {
            calculator: self
                .calculator
                .ok_or(ConfigError::MissingParameter("calculator"))?,
            settings: EvaluationSettings {
                properties,
                output_prefix: self
                    .output_prefix
                    .unwrap_or_else(|| DEFAULT_OUTPUT_PREFIX.to_string()),
                rundir,
            },
            autopara,
        })
    }
}
