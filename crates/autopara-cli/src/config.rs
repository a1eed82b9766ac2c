mod defaults;

use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use autopara::core::calculators::CalculatorSpec;
use autopara::core::models::record::Property;
use autopara::engine::config::{AutoparaInfoBuilder, EvaluationConfig, EvaluationConfigBuilder};
use autopara::engine::rundir::{DEFAULT_RUNDIR_PREFIX, KeepFiles, RunDirConfig};
use defaults::DefaultsConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialAutoparaConfig {
    num_workers: Option<usize>,
    inputs_per_worker: Option<usize>,
    threads_per_task: Option<usize>,
    memory: Option<String>,
    /// Seconds.
    chunk_timeout: Option<f64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialEvaluationConfig {
    properties: Option<Vec<Property>>,
    output_prefix: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialRunDirConfig {
    workdir: Option<PathBuf>,
    rundir_prefix: Option<String>,
    scratchdir: Option<PathBuf>,
    keep_files: Option<KeepFiles>,
}

/// The `run` configuration as read from a TOML file, before CLI flags are applied.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialRunConfig {
    calculator: Option<CalculatorSpec>,
    autopara: Option<PartialAutoparaConfig>,
    evaluation: Option<PartialEvaluationConfig>,
    rundir: Option<PartialRunDirConfig>,
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Resolves the final configuration. Precedence, highest first: CLI flag, `--set`,
    /// config file, environment (through `env`), built-in default.
    pub fn merge_with_cli<F>(mut self, args: &RunArgs, env: F) -> Result<EvaluationConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.apply_set_values(&args.set_values)?;
        let defaults = DefaultsConfig::default();

        let calculator = self.calculator.take().ok_or_else(|| {
            CliError::Config("A `[calculator]` section is required in the config file.".to_string())
        })?;
        let auto_config = self.autopara.take().unwrap_or_default();
        let eval_config = self.evaluation.take().unwrap_or_default();
        let rundir_config = self.rundir.take().unwrap_or_default();

        let mut autopara = AutoparaInfoBuilder::new();
        if let Some(n) = args.num_workers.or(auto_config.num_workers) {
            autopara = autopara.num_workers(n);
        }
        if let Some(n) = args.chunk_size.or(auto_config.inputs_per_worker) {
            autopara = autopara.inputs_per_worker(n);
        }
        if let Some(n) = args.threads_per_task.or(auto_config.threads_per_task) {
            autopara = autopara.threads_per_task(n);
        }
        if let Some(memory) = args.memory.clone().or(auto_config.memory) {
            autopara = autopara.memory(memory);
        }
        if let Some(secs) = args.chunk_timeout.or(auto_config.chunk_timeout) {
            let timeout = Duration::try_from_secs_f64(secs).map_err(|_| {
                CliError::Config(format!(
                    "`chunk-timeout` must be a non-negative number of seconds, got {}",
                    secs
                ))
            })?;
            autopara = autopara.chunk_timeout(timeout);
        }
        let autopara = autopara
            .env_defaults(env)
            .and_then(|b| b.build())
            .map_err(|e| CliError::Config(e.to_string()))?;

        let properties = if args.properties.is_empty() {
            eval_config.properties.unwrap_or(defaults.properties)
        } else {
            args.properties.clone()
        };
        let output_prefix = args
            .prefix
            .clone()
            .or(eval_config.output_prefix)
            .unwrap_or(defaults.output_prefix);

        let rundir = RunDirConfig {
            workdir: args.workdir.clone().or(rundir_config.workdir),
            rundir_prefix: rundir_config
                .rundir_prefix
                .unwrap_or_else(|| DEFAULT_RUNDIR_PREFIX.to_string()),
            scratchdir: args.scratchdir.clone().or(rundir_config.scratchdir),
            keep_files: args
                .keep_files
                .clone()
                .or(rundir_config.keep_files)
                .unwrap_or_default(),
        };

        EvaluationConfigBuilder::new()
            .calculator(calculator)
            .properties(properties)
            .output_prefix(output_prefix)
            .rundir(rundir)
            .autopara(autopara)
            .build()
            .map_err(|e| CliError::Config(e.to_string()))
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let Some((key, value_str)) = kv_pair.split_once('=') else {
                return Err(CliError::Config(format!(
                    "Invalid --set format: '{}'. Expected KEY=VALUE.",
                    kv_pair
                )));
            };

            match key {
                "autopara.num-workers" => {
                    self.autopara
                        .get_or_insert_with(Default::default)
                        .num_workers = Some(parse_value(key, value_str)?);
                }
                "autopara.inputs-per-worker" => {
                    self.autopara
                        .get_or_insert_with(Default::default)
                        .inputs_per_worker = Some(parse_value(key, value_str)?);
                }
                "autopara.threads-per-task" => {
                    self.autopara
                        .get_or_insert_with(Default::default)
                        .threads_per_task = Some(parse_value(key, value_str)?);
                }
                "autopara.memory" => {
                    self.autopara.get_or_insert_with(Default::default).memory =
                        Some(value_str.to_string());
                }
                "autopara.chunk-timeout" => {
                    self.autopara
                        .get_or_insert_with(Default::default)
                        .chunk_timeout = Some(parse_value(key, value_str)?);
                }
                "evaluation.properties" => {
                    let properties = value_str
                        .split(',')
                        .filter(|p| !p.trim().is_empty())
                        .map(|p| parse_value(key, p))
                        .collect::<Result<Vec<Property>>>()?;
                    self.evaluation
                        .get_or_insert_with(Default::default)
                        .properties = Some(properties);
                }
                "evaluation.output-prefix" => {
                    self.evaluation
                        .get_or_insert_with(Default::default)
                        .output_prefix = Some(value_str.to_string());
                }
                "rundir.workdir" => {
                    self.rundir.get_or_insert_with(Default::default).workdir =
                        Some(PathBuf::from(value_str));
                }
                "rundir.rundir-prefix" => {
                    self.rundir
                        .get_or_insert_with(Default::default)
                        .rundir_prefix = Some(value_str.to_string());
                }
                "rundir.scratchdir" => {
                    self.rundir.get_or_insert_with(Default::default).scratchdir =
                        Some(PathBuf::from(value_str));
                }
                "rundir.keep-files" => {
                    self.rundir.get_or_insert_with(Default::default).keep_files =
                        Some(parse_value(key, value_str)?);
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value_str: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value_str.trim().parse().map_err(|e| {
        CliError::Config(format!("Invalid value for {}: '{}' ({})", key, value_str, e))
    })
}
