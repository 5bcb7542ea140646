//! Output filename sanitizing and unique path resolution.
//!
//! Uniqueness is checked against the filesystem without a lock. Two writers
//! outside this process can still race for a name between the check and the
//! capture tool creating its output; [`reserve_unique_path`] closes the race
//! between jobs of this process by creating an empty placeholder.

use std::fs::OpenOptions;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

pub const DEFAULT_FILENAME: &str = "video.mp4";

/// Keep letters, digits, space, `.`, `_` and `-`; strip trailing whitespace.
///
/// Falls back to [`DEFAULT_FILENAME`] when nothing usable is left, including
/// names made only of dots and spaces such as `..`.
pub fn sanitize_filename(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect();
    let trimmed = filtered.trim_end();

    if trimmed.chars().all(|c| c == '.' || c == ' ') {
        return DEFAULT_FILENAME.to_string();
    }
    trimmed.to_string()
}

/// First of `name`, `stem_1.ext`, `stem_2.ext`, ... that does not exist in `dir`.
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    candidates(dir, name)
        .find(|path| !path.exists())
        .unwrap_or_else(|| dir.join(name))
}

/// Like [`unique_path`], but claims the path by creating an empty file.
///
/// Creation uses `create_new`, so concurrent callers never get the same path.
pub fn reserve_unique_path(dir: &Path, name: &str) -> io::Result<PathBuf> {
    for path in candidates(dir, name) {
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok(path),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        ErrorKind::AlreadyExists,
        "no free output name left",
    ))
}

fn candidates<'a>(dir: &'a Path, name: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
    let (stem, ext) = split_extension(name);
    std::iter::once(dir.join(name))
        .chain((1..=u32::MAX).map(move |n| dir.join(format!("{stem}_{n}{ext}"))))
}

/// Split off the last `.ext`; leading dots never start an extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => name.split_at(idx),
        _ => (name, ""),
    }
}
