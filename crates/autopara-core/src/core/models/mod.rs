//! # Core Models Module
//!
//! Data structures describing what flows through the engine.
//!
//! - [`structure`] - one atomistic configuration with species, positions, cell and metadata
//! - [`record`] - the requested property names and the per-input result record
//!
//! ```ignore
//! use autopara::core::models::structure::Structure;
//!
//! let water = Structure::new(
//!     vec!["O".into(), "H".into(), "H".into()],
//!     vec![[0.0, 0.0, 0.0], [0.96, 0.0, 0.0], [-0.24, 0.93, 0.0]],
//! )?;
//! assert_eq!(water.natoms(), 3);
//! ```

pub mod record;
pub mod structure;
