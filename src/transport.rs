//! Transport factory (component E, spec §4.E).
//!
//! The external registry client (`oci-distribution`) builds and owns its own
//! HTTP transport per call, so there is no `reqwest::Client` handle worth
//! caching here. What is worth caching is the TLS material derived from a
//! `(host, TLS-profile)` key — reading a CA file is the one part of this that
//! actually touches the filesystem, and the same key is reused across every
//! layer of every pull against that endpoint. The cache is write-once per
//! key under a single mutex, held for the process lifetime (spec §5).

use std::collections::HashMap;
use std::sync::Mutex;

use oci_distribution::client::{Certificate, CertificateEncoding, ClientConfig, ClientProtocol};
use tracing::warn;

use crate::config::{ConfigError, Tls};

#[derive(Clone, Default)]
struct TlsMaterial {
    accept_invalid_certificates: bool,
    accept_invalid_hostnames: bool,
    extra_root_certificates: Vec<Certificate>,
}

#[derive(Default)]
pub struct TransportFactory {
    cache: Mutex<HashMap<(String, Option<Tls>), TlsMaterial>>,
}

impl TransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the `ClientConfig` for `(host, tls)` under `protocol`,
    /// building and caching the underlying TLS material on first use. An
    /// unreadable `ca_file` is fatal for this endpoint attempt — it is never
    /// silently downgraded to the system trust store.
    pub fn client_config(
        &self,
        host: &str,
        protocol: ClientProtocol,
        tls: Option<&Tls>,
    ) -> Result<ClientConfig, ConfigError> {
        let key = (host.to_string(), tls.cloned());

        {
            let cache = self.cache.lock().expect("transport cache poisoned");
            if let Some(material) = cache.get(&key) {
                return Ok(apply(material.clone(), protocol));
            }
        }

        let material = build_material(tls)?;

        let mut cache = self.cache.lock().expect("transport cache poisoned");
        let material = cache.entry(key).or_insert(material).clone();
        Ok(apply(material, protocol))
    }
}

fn apply(material: TlsMaterial, protocol: ClientProtocol) -> ClientConfig {
    ClientConfig {
        protocol,
        accept_invalid_certificates: material.accept_invalid_certificates,
        accept_invalid_hostnames: material.accept_invalid_hostnames,
        extra_root_certificates: material.extra_root_certificates,
        ..Default::default()
    }
}

fn build_material(tls: Option<&Tls>) -> Result<TlsMaterial, ConfigError> {
    let Some(tls) = tls else {
        return Ok(TlsMaterial::default());
    };

    let mut material = TlsMaterial {
        accept_invalid_certificates: tls.insecure_skip_verify,
        accept_invalid_hostnames: tls.insecure_skip_verify,
        extra_root_certificates: Vec::new(),
    };

    if let Some(ca_file) = &tls.ca_file {
        let data = std::fs::read(ca_file)?;
        material.extra_root_certificates.push(Certificate {
            encoding: CertificateEncoding::Pem,
            data,
        });
    }

    if tls.cert_file.is_some() && tls.key_file.is_some() {
        warn!("client-certificate TLS is configured but the registry client has no client-certificate hook; connecting without it");
    }

    Ok(material)
}
