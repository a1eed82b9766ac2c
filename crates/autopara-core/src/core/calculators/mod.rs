//! # Calculators Module
//!
//! The capability interface between the engine and the programs that actually compute
//! energies, forces or stresses.
//!
//! The engine only needs one operation from a backend: compute the requested properties
//! of one structure inside a given working directory. Backends are built from a
//! [`CalculatorSpec`] by a [`CalculatorFactory`], which lets every worker process rebuild
//! its own instance from the same serializable description.
//!
//! - [`spec`] - the serializable calculator description and typed backend options
//! - [`computed`] - the properties returned by a backend and how they annotate a structure
//! - [`lennard_jones`] - an in-process reference pair potential
//! - [`external`] - runs a user-supplied program once per structure

pub mod computed;
pub mod external;
pub mod lennard_jones;
pub mod spec;

pub use computed::Computed;
pub use spec::{BackendConfig, CalculatorSpec, ExternalParams, LennardJonesParams};

use crate::core::models::record::Property;
use crate::core::models::structure::{Structure, StructureError};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("Invalid calculator parameters: {0}")]
    InvalidParameters(String),

    #[error("Calculator '{calculator}' cannot compute property '{property}'")]
    Unsupported {
        calculator: String,
        property: Property,
    },

    #[error("Calculator returned no value for requested property '{0}'")]
    MissingProperty(Property),

    #[error("Property '{property}' has {len} entries, expected {natoms}")]
    PropertyShape {
        property: Property,
        len: usize,
        natoms: usize,
    },

    #[error("Calculator returned a non-finite value for property '{0}'")]
    NonFinite(Property),

    #[error("Invalid input structure: {0}")]
    Structure(#[from] StructureError),

    #[error("Failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Command '{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to parse calculator output: {0}")]
    Parse(String),

    #[error("I/O error in working directory: {0}")]
    Io(#[from] io::Error),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

/// Resource hints passed through to every calculator instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResourceHints {
    /// Number of threads one calculation may use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads_per_task: Option<usize>,
    /// Memory one calculation may use, in the backend's own notation (e.g., "16GB").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// A calculator backend: computes properties of one structure at a time.
pub trait Calculator {
    /// Short backend name used in logs and error messages.
    fn name(&self) -> &str;

    /// Computes `properties` for `structure`, using `workdir` for any files it produces.
    ///
    /// # Errors
    ///
    /// Any error is treated as a failure of this one structure, never of the run.
    fn calculate(
        &mut self,
        structure: &Structure,
        properties: &[Property],
        workdir: &Path,
    ) -> Result<Computed, CalculatorError>;

    /// File globs kept after a successful calculation under the `default` keep policy.
    fn default_keep_files(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Builds calculator instances from their serializable description.
pub trait CalculatorFactory {
    fn create(
        &self,
        spec: &CalculatorSpec,
        resources: &ResourceHints,
    ) -> Result<Box<dyn Calculator>, CalculatorError>;

    /// Identifies the factory across processes. A pooled run only proceeds if every worker
    /// serves the same factory as the caller, so serial and pooled runs build identical
    /// calculators.
    fn factory_id(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// [`CalculatorFactory::factory_id`] of [`BuiltinCalculators`].
pub const BUILTIN_FACTORY_ID: &str = "autopara::builtin";

/// Factory for the backends shipped with the library.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinCalculators;

impl CalculatorFactory for BuiltinCalculators {
    fn create(
        &self,
        spec: &CalculatorSpec,
        resources: &ResourceHints,
    ) -> Result<Box<dyn Calculator>, CalculatorError> {
        match &spec.backend {
            BackendConfig::LennardJones(params) => Ok(Box::new(
                lennard_jones::LennardJones::from_spec(params, spec)?,
            )),
            BackendConfig::External(params) => Ok(Box::new(external::ExternalCommand::from_spec(
                params, spec, resources,
            )?)),
        }
    }

    fn factory_id(&self) -> &'static str {
        BUILTIN_FACTORY_ID
    }
}
