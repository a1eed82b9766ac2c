use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A serializable description of how to build one calculator instance.
///
/// The value is immutable and self-contained, so it can be shipped to any worker process,
/// which builds its own calculator from it. Recognized backends have typed parameters;
/// anything else the backend should see goes into `passthrough`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CalculatorSpec {
    pub backend: BackendConfig,
    /// Positional arguments handed to the backend.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Backend-specific keyword parameters that have no typed counterpart.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub passthrough: BTreeMap<String, Value>,
}

impl CalculatorSpec {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            args: Vec::new(),
            passthrough: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_passthrough(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.passthrough.insert(key.into(), value.into());
        self
    }

    /// Name of the backend type, as used in configuration files.
    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            BackendConfig::LennardJones(_) => "lennard-jones",
            BackendConfig::External(_) => "external",
        }
    }
}

/// The recognized calculator backends and their typed options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BackendConfig {
    LennardJones(LennardJonesParams),
    External(ExternalParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LennardJonesParams {
    /// Well depth of the pair potential.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Distance at which the pair potential crosses zero.
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    /// Pairs farther apart than this are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutoff: Option<f64>,
    /// Atoms closer than this are treated as an unphysical input and fail the evaluation.
    #[serde(default = "default_min_distance")]
    pub min_distance: f64,
}

fn default_epsilon() -> f64 {
    1.0
}

fn default_sigma() -> f64 {
    1.0
}

fn default_min_distance() -> f64 {
    0.5
}

impl Default for LennardJonesParams {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            sigma: default_sigma(),
            cutoff: None,
            min_distance: default_min_distance(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExternalParams {
    /// Program to run for every structure. Relative paths containing a separator are
    /// resolved against the directory the calculator is built in.
    pub command: String,
    /// Extra environment variables for the program.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// File globs kept from a successful run under the `default` keep policy.
    #[serde(default = "default_external_keep_files")]
    pub default_keep_files: Vec<String>,
}

fn default_external_keep_files() -> Vec<String> {
    vec!["calc.in".to_string(), "calc.out".to_string()]
}

impl ExternalParams {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            env: BTreeMap::new(),
            default_keep_files: default_external_keep_files(),
        }
    }
}
