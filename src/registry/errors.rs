use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Error taxonomy for a network pull, per the error-handling design:
/// `EndpointFailure` and `ConfigInvalid` move on to the next endpoint,
/// `AuthFailure` stops the cascade outright, everything else is a bug to
/// surface as-is.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid image reference {reference:?}: {source}")]
    InvalidReference {
        reference: String,
        #[source]
        source: oci_distribution::ParseError,
    },

    #[error("endpoint {endpoint} failed for {reference}: {source}")]
    EndpointFailure {
        reference: String,
        endpoint: String,
        #[source]
        source: oci_distribution::errors::OciDistributionError,
    },

    #[error("authentication failed for {reference} at {endpoint}: {source}")]
    AuthFailure {
        reference: String,
        endpoint: String,
        #[source]
        source: oci_distribution::errors::OciDistributionError,
    },

    #[error("TLS configuration for endpoint {endpoint} is invalid: {source}")]
    ConfigInvalid {
        endpoint: String,
        #[source]
        source: crate::config::ConfigError,
    },

    #[error("no endpoint could serve {reference}; last tried {last_endpoint}: {source}")]
    AllEndpointsFailed {
        reference: String,
        last_endpoint: String,
        #[source]
        source: Box<RegistryError>,
    },

    #[error("pull of {reference} was canceled")]
    Canceled { reference: String },
}

/// `oci-distribution`'s own `AuthenticationFailure` variant covers the
/// token-exchange failures; a registry-level 401/403 otherwise shows up
/// wrapped in `RegistryError`/`GenericError`, so those are caught by
/// sniffing the rendered message for the same markers a `WWW-Authenticate`
/// challenge response leaves behind.
pub(crate) fn is_auth_failure(source: &oci_distribution::errors::OciDistributionError) -> bool {
    use oci_distribution::errors::OciDistributionError;
    if matches!(source, OciDistributionError::AuthenticationFailure(_)) {
        return true;
    }
    let rendered = source.to_string().to_ascii_lowercase();
    rendered.contains("401") || rendered.contains("unauthorized") || rendered.contains("forbidden")
}
