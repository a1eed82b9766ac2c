//! # Core Module
//!
//! Stateless building blocks shared by every layer of the engine.
//!
//! - **Structures and results** ([`models`]) - atomistic configurations, computed
//!   properties and the per-input result records
//! - **Calculators** ([`calculators`]) - the backend capability interface, the serializable
//!   calculator descriptions and the bundled backends
//! - **File I/O** ([`io`]) - streaming JSON-lines readers for structures and records

pub mod calculators;
pub mod io;
pub mod models;
