//! # Workflows Module
//!
//! High-level entry points that wire the engine together for complete runs.
//!
//! ## Overview
//!
//! A workflow takes an input sequence, a destination and a configuration, and takes care
//! of everything in between: skipping work a previous run already finished, batching the
//! remaining inputs, choosing between in-process and pooled execution, reporting progress,
//! and finalizing the destination once every input has a record.
//!
//! ## Architecture
//!
//! - **Evaluation Workflow** ([`evaluate`]) - the generic runner that evaluates one
//!   calculator over every input structure.

pub mod evaluate;
