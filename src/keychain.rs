//! Keychain composer (component D, spec §4.D).
//!
//! Presents the `Keychain` contract the external registry client expects:
//! given a resource, return a credential, trying sources in order with no
//! shared state between them (spec §9, "config-driven polymorphism").

use crate::config::{Auth, Config};

/// The resource a credential is being resolved for: a registry host
/// (optionally `:port`) plus the repository it's about to touch.
#[derive(Clone, Debug)]
pub struct Resource {
    pub host: String,
    pub port: Option<u16>,
}

/// A resolved credential, or anonymous.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authenticator {
    Basic { username: String, password: String },
    Bearer { token: String },
    Anonymous,
}

/// A single credential source. Implementors never cache — the composer's
/// caller (or the delegate itself) owns caching, if any.
pub trait Keychain: Send + Sync {
    fn resolve(&self, resource: &Resource) -> Option<Authenticator>;
}

/// Reads `configs[host:port].auth`, then `configs[host].auth`, then
/// `configs["*"].auth` (spec §4.D step 1).
pub struct ConfigKeychain<'a> {
    config: &'a Config,
}

impl<'a> ConfigKeychain<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }
}

impl Keychain for ConfigKeychain<'_> {
    fn resolve(&self, resource: &Resource) -> Option<Authenticator> {
        let auth = self
            .config
            .registry_config_for(&resource.host, resource.port)
            .and_then(|c| c.auth.clone())
            .or_else(|| {
                self.config
                    .basic_auth_for(&resource.host, resource.port)
                    .map(|b| Auth::Basic {
                        username: b.username.clone(),
                        password: b.password.clone(),
                    })
            })?;
        Some(to_authenticator(auth))
    }
}

fn to_authenticator(auth: Auth) -> Authenticator {
    match auth {
        Auth::Basic { username, password } => Authenticator::Basic { username, password },
        Auth::Token { identity_token } => Authenticator::Bearer { token: identity_token },
        Auth::Encoded { auth } => match decode_basic(&auth) {
            Some((username, password)) => Authenticator::Basic { username, password },
            None => Authenticator::Anonymous,
        },
    }
}

fn decode_basic(encoded: &str) -> Option<(String, String)> {
    use base64::Engine;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// The standard docker-config keychain: reads `~/.docker/config.json` (or
/// whatever `docker_credential` finds via `DOCKER_CONFIG`/podman's
/// `auth.json`), including any configured credential helper. A reasonable
/// default to hand to [`crate::registry::Wharfie::with_delegate_keychain`]
/// when the caller has no kubelet credential-provider plugin configured.
#[derive(Default)]
pub struct DockerConfigKeychain;

impl Keychain for DockerConfigKeychain {
    fn resolve(&self, resource: &Resource) -> Option<Authenticator> {
        let server = match resource.port {
            Some(port) => format!("{}:{port}", resource.host),
            None => resource.host.clone(),
        };
        match docker_credential::get_credential(&server) {
            Ok(docker_credential::DockerCredential::UsernamePassword(username, password)) => {
                Some(Authenticator::Basic { username, password })
            }
            Ok(docker_credential::DockerCredential::IdentityToken(token)) => {
                Some(Authenticator::Bearer { token })
            }
            Err(_) => None,
        }
    }
}

/// Tries each source in order, falling back to anonymous. Never caches.
pub struct ComposedKeychain<'a> {
    config_keychain: ConfigKeychain<'a>,
    delegate: Option<&'a dyn Keychain>,
}

impl<'a> ComposedKeychain<'a> {
    pub fn new(config: &'a Config, delegate: Option<&'a dyn Keychain>) -> Self {
        Self {
            config_keychain: ConfigKeychain::new(config),
            delegate,
        }
    }

    pub fn resolve(&self, resource: &Resource) -> Authenticator {
        if let Some(auth) = self.config_keychain.resolve(resource) {
            return auth;
        }
        if let Some(delegate) = self.delegate {
            if let Some(auth) = delegate.resolve(resource) {
                return auth;
            }
        }
        Authenticator::Anonymous
    }

    /// Resolves credentials for one cascade endpoint: the endpoint's own
    /// host first, falling back to the owning registry's own credentials
    /// when the endpoint has none of its own configured (spec §4.C step 2 —
    /// a mirror with no `configs` entry inherits the registry it mirrors),
    /// then the delegate, then anonymous.
    pub fn resolve_for_endpoint(&self, endpoint: &Resource, registry: &Resource) -> Authenticator {
        if let Some(auth) = self.config_keychain.resolve(endpoint) {
            return auth;
        }
        if let Some(auth) = self.config_keychain.resolve(registry) {
            return auth;
        }
        if let Some(delegate) = self.delegate {
            if let Some(auth) = delegate.resolve(endpoint) {
                return auth;
            }
        }
        Authenticator::Anonymous
    }
}
