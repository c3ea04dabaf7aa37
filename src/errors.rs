use thiserror::Error;

/// Crate-level error, aggregating the per-module error enums.
///
/// Each module keeps its own `Result<T>` alias and error type; this only
/// exists so callers that don't care which stage failed can use a single
/// error type end to end.
#[derive(Error, Debug)]
pub enum WharfieError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Registry(#[from] crate::registry::RegistryError),
    #[error(transparent)]
    Tarball(#[from] crate::tarball::TarballError),
    #[error(transparent)]
    Extract(#[from] crate::extract::ExtractError),
    #[error("operation canceled")]
    Canceled,
}

pub type Result<T> = std::result::Result<T, WharfieError>;
