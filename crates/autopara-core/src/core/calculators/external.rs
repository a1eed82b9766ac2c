//! A backend that delegates every calculation to a user-supplied program.
//!
//! For each structure the program is started inside the run directory. Its standard input
//! is the request file `calc.in`, a JSON object holding the structure, the requested
//! properties, the positional arguments and the passthrough parameters. The program must
//! print one JSON object with the computed properties (the [`Computed`] layout) on its
//! standard output, which is saved to `calc.out`; standard error goes to `calc.err`.

use super::{
    Calculator, CalculatorError, CalculatorSpec, Computed, ExternalParams, ResourceHints,
};
use crate::core::models::record::Property;
use crate::core::models::structure::Structure;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

pub const REQUEST_FILE: &str = "calc.in";
pub const OUTPUT_FILE: &str = "calc.out";
pub const ERROR_FILE: &str = "calc.err";

const STDERR_TAIL_CHARS: usize = 500;

#[derive(Serialize)]
struct Request<'a> {
    structure: &'a Structure,
    properties: &'a [Property],
    args: &'a [String],
    parameters: &'a BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: PathBuf,
    args: Vec<String>,
    parameters: BTreeMap<String, Value>,
    env: BTreeMap<String, String>,
    default_keep_files: Vec<String>,
}

impl ExternalCommand {
    pub fn from_spec(
        params: &ExternalParams,
        spec: &CalculatorSpec,
        resources: &ResourceHints,
    ) -> Result<Self, CalculatorError> {
        if params.command.trim().is_empty() {
            return Err(CalculatorError::InvalidParameters(
                "external backend requires a command".to_string(),
            ));
        }

        // the program runs inside the run directory, so pin relative paths now
        let mut program = PathBuf::from(&params.command);
        if program.is_relative() && params.command.contains(['/', '\\']) {
            program = std::env::current_dir()?.join(program);
        }

        let mut env = params.env.clone();
        if let Some(threads) = resources.threads_per_task {
            env.entry("OMP_NUM_THREADS".to_string())
                .or_insert_with(|| threads.to_string());
        }
        if let Some(memory) = &resources.memory {
            env.entry("AUTOPARA_MEMORY".to_string())
                .or_insert_with(|| memory.clone());
        }

        Ok(Self {
            program,
            args: spec.args.clone(),
            parameters: spec.passthrough.clone(),
            env,
            default_keep_files: params.default_keep_files.clone(),
        })
    }

    fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl Calculator for ExternalCommand {
    fn name(&self) -> &str {
        "external"
    }

    fn calculate(
        &mut self,
        structure: &Structure,
        properties: &[Property],
        workdir: &Path,
    ) -> Result<Computed, CalculatorError> {
        let request = Request {
            structure,
            properties,
            args: &self.args,
            parameters: &self.parameters,
        };
        let request_path = workdir.join(REQUEST_FILE);
        let payload = serde_json::to_vec_pretty(&request)
            .map_err(|e| CalculatorError::Parse(e.to_string()))?;
        fs::write(&request_path, payload)?;

        let command_line = self.command_line();
        debug!("submit cmdline: {} (in {:?})", command_line, workdir);

        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(workdir)
            .envs(&self.env)
            .env("AUTOPARA_RUN_DIR", workdir)
            .stdin(Stdio::from(File::open(&request_path)?))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| CalculatorError::Launch {
                command: command_line.clone(),
                source,
            })?;

        fs::write(workdir.join(OUTPUT_FILE), &output.stdout)?;
        if !output.stderr.is_empty() {
            fs::write(workdir.join(ERROR_FILE), &output.stderr)?;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = {
                let trimmed = stderr.trim_end();
                let skip = trimmed.chars().count().saturating_sub(STDERR_TAIL_CHARS);
                trimmed.chars().skip(skip).collect()
            };
            return Err(CalculatorError::CommandFailed {
                command: command_line,
                status: output.status.to_string(),
                stderr: tail,
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            CalculatorError::Parse(format!(
                "{e} (stdout of '{command_line}' saved to {OUTPUT_FILE})"
            ))
        })
    }

    fn default_keep_files(&self) -> Vec<String> {
        self.default_keep_files.clone()
    }
}
