use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised when a structure is inconsistent.
#[derive(Debug, Error, PartialEq)]
pub enum StructureError {
    /// The number of species labels does not match the number of positions.
    #[error("Structure has {symbols} species labels but {positions} positions")]
    LengthMismatch { symbols: usize, positions: usize },
    /// A per-atom array does not have one entry per atom.
    #[error("Per-atom array '{key}' has {len} entries, expected {natoms}")]
    ArrayLength {
        key: String,
        len: usize,
        natoms: usize,
    },
    /// An atom position contains NaN or infinite components.
    #[error("Invalid position of atom {atom}: {position:?}")]
    NonFinitePosition { atom: usize, position: [f64; 3] },
    #[error("Cell contains non-finite lattice vectors: {0:?}")]
    NonFiniteCell([[f64; 3]; 3]),
    #[error("Per-atom array '{key}' has a non-finite entry for atom {atom}")]
    NonFiniteArray { key: String, atom: usize },
}

/// One atomistic configuration.
///
/// A structure is treated as immutable by the engine: every evaluation works on an owned
/// copy and returns a new, annotated structure. Its identity is its position in the input
/// sequence, so no identifier is stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    /// Chemical species label of every atom (e.g., "C", "H").
    pub symbols: Vec<String>,
    /// Cartesian positions in Angstroms, one per atom.
    pub positions: Vec<[f64; 3]>,
    /// Lattice vectors as rows, if the structure has a cell.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<[[f64; 3]; 3]>,
    /// Periodic boundary flags along the three lattice vectors.
    #[serde(default)]
    pub pbc: [bool; 3],
    /// Arbitrary per-configuration metadata and computed scalar/vector properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub info: BTreeMap<String, Value>,
    /// Per-atom vector properties (e.g., forces), one entry per atom.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arrays: BTreeMap<String, Vec<[f64; 3]>>,
}

impl Structure {
    /// Creates a non-periodic structure from species labels and positions.
    ///
    /// # Errors
    ///
    /// Returns [`StructureError::LengthMismatch`] if the two lists differ in length.
    pub fn new(symbols: Vec<String>, positions: Vec<[f64; 3]>) -> Result<Self, StructureError> {
        if symbols.len() != positions.len() {
            return Err(StructureError::LengthMismatch {
                symbols: symbols.len(),
                positions: positions.len(),
            });
        }
        Ok(Self {
            symbols,
            positions,
            cell: None,
            pbc: [false; 3],
            info: BTreeMap::new(),
            arrays: BTreeMap::new(),
        })
    }

    /// Attaches a fully periodic cell.
    pub fn with_cell(mut self, cell: [[f64; 3]; 3]) -> Self {
        self.cell = Some(cell);
        self.pbc = [true; 3];
        self
    }

    /// Adds a metadata entry.
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }

    pub fn natoms(&self) -> usize {
        self.positions.len()
    }

    pub fn is_periodic(&self) -> bool {
        self.cell.is_some() && self.pbc.iter().any(|&p| p)
    }

    /// Checks the internal consistency of the structure.
    ///
    /// Calculators never see a structure that fails this check; the engine turns the
    /// error into a failure record for that input instead.
    pub fn validate(&self) -> Result<(), StructureError> {
        if self.symbols.len() != self.positions.len() {
            return Err(StructureError::LengthMismatch {
                symbols: self.symbols.len(),
                positions: self.positions.len(),
            });
        }
        for (atom, p) in self.positions.iter().enumerate() {
            if p.iter().any(|x| !x.is_finite()) {
                return Err(StructureError::NonFinitePosition { atom, position: *p });
            }
        }
        if let Some(cell) = self.cell {
            if cell.iter().flatten().any(|x| !x.is_finite()) {
                return Err(StructureError::NonFiniteCell(cell));
            }
        }
        for (key, values) in &self.arrays {
            if values.len() != self.natoms() {
                return Err(StructureError::ArrayLength {
                    key: key.clone(),
                    len: values.len(),
                    natoms: self.natoms(),
                });
            }
            if let Some(atom) = values.iter().position(|v| v.iter().any(|x| !x.is_finite())) {
                return Err(StructureError::NonFiniteArray {
                    key: key.clone(),
                    atom,
                });
            }
        }
        Ok(())
    }

    /// Cell volume in cubic Angstroms, if a cell is present.
    pub fn volume(&self) -> Option<f64> {
        self.cell.map(|[a, b, c]| {
            let cross = [
                b[1] * c[2] - b[2] * c[1],
                b[2] * c[0] - b[0] * c[2],
                b[0] * c[1] - b[1] * c[0],
            ];
            (a[0] * cross[0] + a[1] * cross[1] + a[2] * cross[2]).abs()
        })
    }
}
