use tracing_subscriber::EnvFilter;

use crate::redaction::RedactingWriter;

/// Install the global tracing subscriber used by the backend binaries.
///
/// Log level comes from `RUST_LOG` (default `info`). All output passes
/// through the redacting writer so provider credentials never reach logs.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr())
        .with_target(true)
        .init();
}
