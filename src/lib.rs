//! Pulls OCI/Docker images through a mirror-aware private registry resolver
//! (or a local tarball cache) and unpacks selected paths from the result
//! onto the host.

pub mod cancel;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod extract;
pub mod host;
pub mod keychain;
pub mod registry;
pub mod rewrite;
pub mod tarball;
pub mod transport;

pub use cancel::CancellationToken;
pub use config::Config;
pub use errors::{Result, WharfieError};
pub use extract::DirectoryMap;
pub use registry::{Platform, PullRequest, PulledImage, Wharfie};

use std::io::Read;
use std::path::Path;

/// Loads a local tarball image the same way [`Wharfie::pull_image`] would
/// when it falls through to its images directory, without needing a loaded
/// [`Config`] or attempting any network I/O.
pub fn load_tarball(dir: &Path, tag_reference: &str) -> tarball::Result<PulledImage> {
    let is_tag_only = !tag_reference.contains('@');
    tarball::find_image(dir, tag_reference, is_tag_only, |stream, _tag| Some(stream)).map(PulledImage::Tarball)
}

/// Unpacks `image` into the host directories described by `map`. A
/// network-pulled image is a sequence of layer tars, extracted lowest to
/// highest so a later layer's files win over an earlier layer's.
pub fn extract(image: PulledImage, map: &DirectoryMap, cancel: CancellationToken) -> extract::Result<()> {
    match image {
        PulledImage::Tarball(stream) => extract::extract(stream, map, &cancel),
        PulledImage::Layers(layers) => {
            for layer in layers {
                extract::extract(decompress_layer(&layer), map, &cancel)?;
            }
            Ok(())
        }
    }
}

/// Each layer is itself gzip-compressed in the overwhelming common case;
/// a plain, uncompressed tar layer is rare but valid, detected by its
/// absent gzip magic number.
fn decompress_layer(data: &[u8]) -> Box<dyn Read + '_> {
    if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
        Box::new(flate2::read::GzDecoder::new(data))
    } else {
        Box::new(data)
    }
}
