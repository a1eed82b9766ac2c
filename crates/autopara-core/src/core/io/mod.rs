//! Provides input/output functionality for structures and result records.
//!
//! Both are stored as JSON lines: one self-contained JSON object per line, which keeps
//! reading streamable and lets a partially written file be resumed line by line.

pub mod jsonl;
