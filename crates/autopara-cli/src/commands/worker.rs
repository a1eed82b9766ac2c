use crate::error::Result;
use autopara::core::calculators::BuiltinCalculators;
use autopara::engine::protocol;
use std::io;
use tracing::{debug, info_span};

/// Serves chunks from the parent `run` process until it shuts the worker down.
pub fn run() -> Result<()> {
    let _span = info_span!("worker", pid = std::process::id()).entered();
    debug!("Worker ready for the handshake.");

    let stdin = io::stdin();
    let stdout = io::stdout();
    protocol::serve(stdin.lock(), stdout.lock(), &BuiltinCalculators)?;

    debug!("Worker shutting down.");
    Ok(())
}
