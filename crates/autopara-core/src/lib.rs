//! # AUTOPARA Core Library
//!
//! A parallel, resumable evaluation engine that runs a calculator over long (possibly
//! streamed) sequences of atomistic structures and writes the annotated results, in input
//! order, exactly once.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Structure`, `ResultRecord`),
//!   calculator backends behind the `Calculator` trait, and structure/record I/O.
//!
//! - **[`engine`]: The Logic Core.** Run directories, the single-item calculator adapter,
//!   the chunker, the resumable output sink, the worker-process pool and the dispatcher
//!   that keeps results in order.
//!
//! - **[`workflows`]: The Public API.** The generic runner that wires the engine together
//!   and decides between in-process and pooled execution.

pub mod core;
pub mod engine;
pub mod workflows;
