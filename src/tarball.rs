//! Local tarball image loader (component F, spec §4.F).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

pub type Result<T> = std::result::Result<T, TarballError>;

#[derive(Error, Debug)]
pub enum TarballError {
    #[error("directory not found: {0}")]
    NotFound(String),
    #[error("local tarball lookup requires a tag, not a digest reference")]
    NotImageTag,
    #[error("zstd window exceeds the {limit}-byte decoder cap")]
    WindowExceeded { limit: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Maximum zstd decoder window, kept small so low-memory hosts stay safe
/// (spec §4.F).
const ZSTD_MAX_WINDOW_LOG: u32 = 25; // 2^25 bytes = 32 MiB
const ZSTD_WINDOW_LIMIT_BYTES: u64 = 1u64 << ZSTD_MAX_WINDOW_LOG;

/// A candidate tar stream found on disk, already wrapped in the right
/// decompressor. Closing it closes the underlying file (spec §4.F
/// "Ownership" — guaranteed here by plain Rust ownership/RAII).
pub struct TarStream {
    pub path: PathBuf,
    reader: Box<dyn Read + Send>,
}

impl Read for TarStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

/// Finds a file under `dir` whose decompressed contents are a tar image
/// matching `tag_reference`, and hands matching candidates to `opener` one
/// at a time — first match wins. `opener` stands in for the external
/// registry-client library's tarball-opener contract (spec §6).
pub fn find_image<T>(
    dir: &Path,
    tag_reference: &str,
    is_tag_only: bool,
    mut opener: impl FnMut(TarStream, &str) -> Option<T>,
) -> Result<T> {
    if !is_tag_only {
        return Err(TarballError::NotImageTag);
    }
    if !dir.exists() {
        return Err(TarballError::NotFound(dir.display().to_string()));
    }

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("txt")) {
            continue;
        }

        match open_candidate(path) {
            Ok(Some(stream)) => {
                if let Some(image) = opener(stream, tag_reference) {
                    return Ok(image);
                }
            }
            Ok(None) => {
                debug!(path = %path.display(), "unknown tarball suffix, skipping");
            }
            Err(err) => {
                debug!(path = %path.display(), error = %err, "could not open tarball candidate, skipping");
            }
        }
    }

    Err(TarballError::NotFound(dir.display().to_string()))
}

fn open_candidate(path: &Path) -> Result<Option<TarStream>> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let lower = name.to_ascii_lowercase();

    let reader: Box<dyn Read + Send> = if lower.ends_with(".tar") {
        Box::new(BufReader::new(File::open(path)?))
    } else if lower.ends_with(".tar.lz4") {
        Box::new(lz4_flex::frame::FrameDecoder::new(BufReader::new(File::open(path)?)))
    } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz") {
        Box::new(bzip2::read::BzDecoder::new(BufReader::new(File::open(path)?)))
    } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Box::new(flate2::read::GzDecoder::new(BufReader::new(File::open(path)?)))
    } else if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
        let mut decoder = zstd::stream::Decoder::new(BufReader::new(File::open(path)?))?;
        decoder.window_log_max(ZSTD_MAX_WINDOW_LOG)?;
        probe_zstd_window(decoder)?
    } else {
        return Ok(None);
    };

    Ok(Some(TarStream {
        path: path.to_path_buf(),
        reader,
    }))
}

/// Eagerly reads one byte from a freshly-constructed zstd decoder so an
/// over-the-cap window shows up as [`TarballError::WindowExceeded`] at open
/// time instead of surfacing later, mid-extraction, as a bare I/O error. The
/// probed byte is spliced back onto the stream so downstream reads are
/// unaffected.
fn probe_zstd_window<R: Read + Send + 'static>(mut decoder: R) -> Result<Box<dyn Read + Send>> {
    let mut probe = [0u8; 1];
    match decoder.read(&mut probe) {
        Ok(0) => Ok(Box::new(decoder)),
        Ok(n) => Ok(Box::new(io::Cursor::new(probe[..n].to_vec()).chain(decoder))),
        Err(err) => {
            let message = err.to_string().to_ascii_lowercase();
            if message.contains("window") || message.contains("too much memory") {
                Err(TarballError::WindowExceeded { limit: ZSTD_WINDOW_LIMIT_BYTES })
            } else {
                Err(TarballError::Io(err))
            }
        }
    }
}
