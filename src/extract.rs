//! Layered extractor (component G, spec §4.G).
//!
//! Applies a streaming tar (the already-merged root filesystem the external
//! registry-client library hands back) to a set of host directories through
//! a source→destination path map. One extractor processes one image
//! serially; no parallel layer writes (spec §5).

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tar::EntryType;
use thiserror::Error;
use tracing::debug;

use crate::cancel::CancellationToken;

pub type Result<T> = std::result::Result<T, ExtractError>;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("tar entry or mapping escapes its destination: {0}")]
    IllegalPath(String),
    #[error("extraction canceled")]
    Canceled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A source→destination mapping. Order is preserved exactly as given — the
/// extractor walks up the source path looking for a match, so earlier,
/// more-specific entries must come first if they're meant to take
/// precedence over a shorter prefix later in the list (spec §4.G, §8 S7).
#[derive(Clone, Debug, Default)]
pub struct DirectoryMap {
    entries: Vec<(String, PathBuf)>,
}

impl DirectoryMap {
    /// Cleans `raw` per spec §4.G step 1: trims a trailing `/` from each
    /// source (unless it's exactly `/`), and resolves each destination to
    /// an absolute path, similarly trimmed.
    pub fn clean(raw: impl IntoIterator<Item = (String, PathBuf)>) -> io::Result<Self> {
        let mut entries = Vec::new();
        for (source, destination) in raw {
            let source = trim_trailing_slash(&source);
            let destination = std::path::absolute(&destination)?;
            let destination = trim_trailing_slash_path(&destination);
            entries.push((source, destination));
        }
        Ok(Self { entries })
    }

    /// Walks up `name`'s parent chain looking for a mapped source prefix,
    /// per spec §4.G step 2. Returns the matching `(source, destination)`
    /// pair, if any.
    fn lookup(&self, name: &str) -> Option<&(String, PathBuf)> {
        let mut candidate = parent(name);
        loop {
            if let Some(entry) = self.entries.iter().find(|(s, _)| s == &candidate) {
                return Some(entry);
            }
            if candidate == "/" {
                return None;
            }
            candidate = parent(&candidate);
        }
    }
}

fn trim_trailing_slash(s: &str) -> String {
    if s == "/" {
        s.to_string()
    } else {
        s.trim_end_matches('/').to_string()
    }
}

fn trim_trailing_slash_path(p: &Path) -> PathBuf {
    let s = p.to_string_lossy();
    if s == "/" {
        p.to_path_buf()
    } else {
        PathBuf::from(s.trim_end_matches('/'))
    }
}

/// OCI layers mark a deletion with a `.wh.<name>` sentinel file rather than
/// an actual tar removal. This crate doesn't model layer deletion (§9 open
/// question), so whiteout entries are skipped rather than written verbatim.
fn is_whiteout(cleaned_path: &str) -> bool {
    cleaned_path
        .rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with(".wh."))
}

fn parent(path: &str) -> String {
    if path == "/" {
        return "/".to_string();
    }
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

/// Collapses `.`/`..`/repeated `/`, always returning an absolute, `/`
/// prefixed path. Returns `None` if the cleaned path would escape `/`
/// (spec §4.G step 1 header-normalization, and the `IllegalPath` condition).
fn clean_path(name: &str) -> Option<String> {
    let name = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };

    let mut components: Vec<&str> = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                if components.pop().is_none() {
                    return None;
                }
            }
            other => components.push(other),
        }
    }

    Some(format!("/{}", components.join("/")))
}

/// Extracts `reader`'s tar entries into the host directories described by
/// `map`. Returns on the first I/O error; partial files are left in place
/// for the caller to clean up (spec §4.G step 6, §5 cancellation).
pub fn extract(reader: impl Read, map: &DirectoryMap, cancel: &CancellationToken) -> Result<()> {
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries()? {
        if cancel.is_canceled() {
            return Err(ExtractError::Canceled);
        }

        let mut entry = entry?;
        let raw_name = entry.path()?.to_string_lossy().into_owned();

        let Some(cleaned) = clean_path(&raw_name) else {
            return Err(ExtractError::IllegalPath(raw_name));
        };

        if is_whiteout(&cleaned) {
            debug!(name = %cleaned, "skipping OCI whiteout marker, not interpreting as a delete");
            continue;
        }

        let Some((source, destination_root)) = map.lookup(&cleaned) else {
            debug!(name = %cleaned, "no mapped source prefix, skipping tar entry");
            continue;
        };

        let relative = relative_to(&cleaned, source);
        let destination = join_checked(destination_root, &relative)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&destination)?;
                set_mode(&destination, 0o755)?;
            }
            EntryType::Regular => {
                if let Some(parent_dir) = destination.parent() {
                    fs::create_dir_all(parent_dir)?;
                }
                let mode = (entry.header().mode().unwrap_or(0o644) & 0o755) as u32;
                let mut file = fs::File::create(&destination)?;
                io::copy(&mut entry, &mut file)?;
                set_mode(&destination, mode)?;
            }
            _ => {
                debug!(name = %cleaned, "skipping non directory/file tar entry");
            }
        }
    }

    Ok(())
}

fn relative_to(name: &str, source: &str) -> String {
    if source == "/" {
        return name.trim_start_matches('/').to_string();
    }
    name.strip_prefix(source)
        .unwrap_or(name)
        .trim_start_matches('/')
        .to_string()
}

/// Joins `destination_root` with `relative`, rejecting the result with
/// `IllegalPath` if it would not be lexically contained within
/// `destination_root` (spec §4.G step 4).
fn join_checked(destination_root: &Path, relative: &str) -> Result<PathBuf> {
    let joined = if relative.is_empty() {
        destination_root.to_path_buf()
    } else {
        destination_root.join(relative)
    };

    let cleaned = clean_absolute(&joined);
    let root_cleaned = clean_absolute(destination_root);

    if cleaned != root_cleaned && !cleaned.starts_with(&root_cleaned) {
        return Err(ExtractError::IllegalPath(joined.display().to_string()));
    }

    Ok(joined)
}

fn clean_absolute(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                components.pop();
            }
            std::path::Component::Normal(part) => components.push(part),
            std::path::Component::RootDir | std::path::Component::CurDir => {}
            std::path::Component::Prefix(_) => {}
        }
    }
    let mut result = PathBuf::from("/");
    for component in components {
        result.push(component);
    }
    result
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::tempdir;

    fn build_tar(entries: &[(&str, tar::EntryType, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, kind, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(contents.len() as u64);
            header.set_entry_type(*kind);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *contents).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn clean_path_collapses_dot_segments() {
        assert_eq!(clean_path("a/./b/../c").as_deref(), Some("/a/c"));
        assert_eq!(clean_path("/a//b").as_deref(), Some("/a/b"));
    }

    #[test]
    fn clean_path_rejects_escape_above_root() {
        assert_eq!(clean_path("../../etc/passwd"), None);
    }

    #[test]
    fn directory_map_clean_trims_trailing_slashes() {
        let map = DirectoryMap::clean(vec![
            ("/Files/bin/".to_string(), PathBuf::from("/t/A/")),
            ("/".to_string(), PathBuf::from("/t/root")),
        ])
        .unwrap();
        assert_eq!(map.entries[0].0, "/Files/bin");
        assert_eq!(map.entries[0].1, PathBuf::from("/t/A"));
        assert_eq!(map.entries[1].0, "/");
    }

    #[test]
    fn s6_path_escape_is_rejected() {
        let dir = tempdir().unwrap();
        let map = DirectoryMap::clean(vec![("/".to_string(), dir.path().to_path_buf())]).unwrap();
        let tar_bytes = build_tar(&[("../../etc/passwd", tar::EntryType::Regular, b"pwned")]);

        let result = extract(tar_bytes.as_slice(), &map, &CancellationToken::new());
        assert!(matches!(result, Err(ExtractError::IllegalPath(_))));
        assert!(!dir.path().parent().unwrap().join("etc/passwd").exists());
    }

    #[rstest(
        map_entries,
        tar_path,
        expected_destination,
        case(&[("/Files/bin", "A"), ("/Files", "B")], "Files/bin/mount", "A"),
        // a more specific prefix wins regardless of where it sits in the list
        case(&[("/Files", "B"), ("/Files/bin", "A")], "Files/bin/mount", "A"),
        // two entries sharing the same source: the first one in the list wins
        case(&[("/Files", "A"), ("/Files", "B")], "Files/readme", "A")
    )]
    fn s7_directory_map_precedence(map_entries: &[(&str, &str)], tar_path: &str, expected_destination: &str) {
        let dir = tempdir().unwrap();
        let a = dir.path().join("A");
        let b = dir.path().join("B");
        let resolve = |name: &str| if name == "A" { a.clone() } else { b.clone() };

        let map = DirectoryMap::clean(
            map_entries.iter().map(|(source, dest)| (source.to_string(), resolve(dest))),
        )
        .unwrap();

        let file_name = tar_path.rsplit('/').next().unwrap();
        let tar_bytes = build_tar(&[(tar_path, tar::EntryType::Regular, b"contents")]);

        extract(tar_bytes.as_slice(), &map, &CancellationToken::new()).unwrap();

        assert_eq!(fs::read(resolve(expected_destination).join(file_name)).unwrap(), b"contents");
    }

    #[test]
    fn entry_outside_any_mapped_prefix_is_skipped_without_error() {
        let dir = tempdir().unwrap();
        let map = DirectoryMap::clean(vec![("/opt".to_string(), dir.path().to_path_buf())]).unwrap();
        let tar_bytes = build_tar(&[("etc/hosts", tar::EntryType::Regular, b"ignored")]);

        let result = extract(tar_bytes.as_slice(), &map, &CancellationToken::new());
        assert!(result.is_ok());
        let mut entries = fs::read_dir(dir.path()).unwrap();
        assert!(entries.next().is_none());
    }

    #[test]
    fn directory_entries_are_created() {
        let dir = tempdir().unwrap();
        let map = DirectoryMap::clean(vec![("/".to_string(), dir.path().to_path_buf())]).unwrap();
        let tar_bytes = build_tar(&[("var/lib", tar::EntryType::Directory, b"")]);

        extract(tar_bytes.as_slice(), &map, &CancellationToken::new()).unwrap();
        assert!(dir.path().join("var/lib").is_dir());
    }

    #[test]
    fn symlinks_are_silently_skipped() {
        let dir = tempdir().unwrap();
        let map = DirectoryMap::clean(vec![("/".to_string(), dir.path().to_path_buf())]).unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_path("link").unwrap();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        builder.append_link(&mut header, "link", "target").unwrap();
        let tar_bytes = builder.into_inner().unwrap();

        extract(tar_bytes.as_slice(), &map, &CancellationToken::new()).unwrap();
        assert!(!dir.path().join("link").exists());
    }

    #[test]
    fn cancellation_stops_before_next_entry() {
        let dir = tempdir().unwrap();
        let map = DirectoryMap::clean(vec![("/".to_string(), dir.path().to_path_buf())]).unwrap();
        let tar_bytes = build_tar(&[
            ("a", tar::EntryType::Regular, b"a"),
            ("b", tar::EntryType::Regular, b"b"),
        ]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = extract(tar_bytes.as_slice(), &map, &cancel);
        assert!(matches!(result, Err(ExtractError::Canceled)));
    }

}
