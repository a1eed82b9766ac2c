//! # Engine Module
//!
//! The parallel evaluation engine: everything between an input sequence of structures and
//! an ordered, resumable output.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - parallelism settings, evaluation settings and builders
//! - **Run Directories** ([`rundir`]) - isolated, optionally scratch-backed working
//!   directories with a keep/discard policy
//! - **Calculator Adapter** ([`adapter`]) - evaluates one structure inside its own run directory
//! - **Chunker** ([`chunker`]) - lazy, index-tagged batching of a possibly streamed input
//! - **Output Sink** ([`sink`]) - resumable, append-only destinations with atomic finalization
//! - **Worker Pool** ([`pool`], [`protocol`]) - long-lived worker processes and their wire format
//! - **Dispatcher** ([`dispatcher`]) - serial and pooled execution with in-order delivery
//! - **Progress Monitoring** ([`progress`]) - callback-based progress events
//! - **Error Handling** ([`error`]) - run-level errors
//!
//! ## Error Policy
//!
//! Item-level failures (a calculator error for one structure) become failure records and
//! never stop a run. Directory-, pool- and destination-level failures always abort it.

pub mod adapter;
pub mod chunker;
pub mod config;
pub(crate) mod dispatcher;
pub mod error;
pub mod pool;
pub mod progress;
pub mod protocol;
pub mod rundir;
pub mod sink;
