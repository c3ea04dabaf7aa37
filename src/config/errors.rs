use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse private registry config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("cannot read private registry config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("configured CA/cert file is unreadable: {0}")]
    Invalid(#[from] std::io::Error),
}
