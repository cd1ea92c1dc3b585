pub mod redaction;
pub mod telemetry;

pub use redaction::{RedactingWriter, redact_secrets};
pub use telemetry::init_tracing;
