use super::structure::Structure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A property a calculator can be asked to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Property {
    /// Total potential energy (per configuration, scalar).
    Energy,
    /// Forces on every atom (per atom, vector).
    Forces,
    /// Virial stress in Voigt order `xx yy zz yz xz xy` (per configuration, 6 components).
    Stress,
}

impl Property {
    pub fn as_str(&self) -> &'static str {
        match self {
            Property::Energy => "energy",
            Property::Forces => "forces",
            Property::Stress => "stress",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown property '{0}'. Expected one of: energy, forces, stress")]
pub struct UnknownProperty(pub String);

impl FromStr for Property {
    type Err = UnknownProperty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "energy" => Ok(Property::Energy),
            "forces" => Ok(Property::Forces),
            "stress" => Ok(Property::Stress),
            _ => Err(UnknownProperty(s.to_string())),
        }
    }
}

/// The outcome of evaluating one input structure.
///
/// The index is the position of the input in the global sequence. A failed evaluation
/// still carries the (unannotated) input structure, so the output keeps exactly one
/// record per input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ResultRecord {
    Computed {
        index: usize,
        structure: Structure,
    },
    Failed {
        index: usize,
        structure: Structure,
        error: String,
    },
}

impl ResultRecord {
    pub fn index(&self) -> usize {
        match self {
            ResultRecord::Computed { index, .. } | ResultRecord::Failed { index, .. } => *index,
        }
    }

    pub fn structure(&self) -> &Structure {
        match self {
            ResultRecord::Computed { structure, .. } | ResultRecord::Failed { structure, .. } => {
                structure
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ResultRecord::Failed { .. })
    }

    /// The error description of a failed record.
    pub fn error(&self) -> Option<&str> {
        match self {
            ResultRecord::Failed { error, .. } => Some(error),
            ResultRecord::Computed { .. } => None,
        }
    }
}
