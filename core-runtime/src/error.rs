use thiserror::Error;

/// Errors raised while assembling the runtime (configuration, logging).
#[derive(Error, Debug)]
pub enum Error {
    /// A tunable is missing or out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required host bridge was not injected
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
