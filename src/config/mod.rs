//! The private-registry configuration model (component A, spec §3 & §4.A).
//!
//! The document is parsed once at startup and held immutable for the
//! process lifetime; regex compilation for rewrites is deferred to first use
//! (see [`crate::rewrite`]) so a single malformed pattern can never make the
//! whole document fail to load.

pub mod errors;

pub use errors::{ConfigError, Result};

use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

/// Root document: `mirrors`, `configs`, `auths`, keyed by host-pattern
/// (exact host, `host:port`, or the wildcard `"*"`).
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub mirrors: HashMap<String, Mirror>,
    pub configs: HashMap<String, RegistryConfig>,
    pub auths: HashMap<String, BasicAuth>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Mirror {
    pub endpoints: Vec<String>,
    pub rewrites: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub auth: Option<Auth>,
    pub tls: Option<Tls>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Auth {
    Basic {
        username: String,
        password: String,
    },
    /// `auth` carries a base64-encoded `username:password` pair, the same
    /// shape a Docker `config.json` uses.
    Encoded { auth: String },
    Token {
        identity_token: String,
    },
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct Tls {
    pub ca_file: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub insecure_skip_verify: bool,
}

impl Config {
    /// Looks up the host-pattern space in the order the spec mandates:
    /// `host:port` (if present), bare `host`, then `"*"`. Returns the first
    /// match, never consulting the wildcard when an exact host entry exists.
    fn lookup<'a, T>(map: &'a HashMap<String, T>, host: &str, port: Option<u16>) -> Option<&'a T> {
        if let Some(port) = port {
            if let Some(v) = map.get(&format!("{host}:{port}")) {
                return Some(v);
            }
        }
        if let Some(v) = map.get(host) {
            return Some(v);
        }
        map.get("*")
    }

    pub fn mirror_for(&self, host: &str, port: Option<u16>) -> Option<&Mirror> {
        Self::lookup(&self.mirrors, host, port)
    }

    /// Exact-host mirror lookup only — the wildcard is never consulted for
    /// rewrites (spec §4.B step 1).
    pub fn exact_mirror_for(&self, registry: &str) -> Option<&Mirror> {
        self.mirrors.get(registry)
    }

    pub fn registry_config_for(&self, host: &str, port: Option<u16>) -> Option<&RegistryConfig> {
        Self::lookup(&self.configs, host, port)
    }

    pub fn basic_auth_for(&self, host: &str, port: Option<u16>) -> Option<&BasicAuth> {
        Self::lookup(&self.auths, host, port)
    }
}

/// Loads the config document at `path`. A missing file is not an error and
/// yields an empty [`Config`]; a malformed document is fatal.
pub fn load_config(path: &Path) -> Result<Config> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source: e,
            })
        }
    };
    Ok(serde_yaml::from_reader(file)?)
}
