//! Virtual path syntax.
//!
//! Virtual paths are POSIX-style regardless of the host: absolute, segments
//! separated by `/`, no trailing slash except for the root. These helpers
//! work on the string form directly instead of going through
//! [`camino::Utf8Path::join`], which would use `\` on Windows.

use camino::{Utf8Path, Utf8PathBuf};

use super::Error;

/// Normalize a virtual path: make it absolute, drop empty and `.` segments
/// and resolve `..` against the segments before it. `..` above the root
/// stays at the root.
pub fn normalize(path: &str) -> Result<Utf8PathBuf, Error> {
    if path.contains('\0') {
        return Err(Error::invalid_argument(format!(
            "path contains a NUL byte: {path:?}"
        )));
    }

    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }

    Ok(Utf8PathBuf::from(format!("/{}", segments.join("/"))))
}

/// Join a single entry name onto a normalized directory path.
pub fn join(dir: &Utf8Path, name: &str) -> Utf8PathBuf {
    let dir = dir.as_str().trim_end_matches('/');
    Utf8PathBuf::from(format!("{dir}/{name}"))
}

/// The parent of a normalized path, or `None` for the root.
pub fn parent(path: &Utf8Path) -> Option<Utf8PathBuf> {
    let path = path.as_str();

    if path == "/" {
        return None;
    }

    match path.rfind('/') {
        Some(0) | None => Some(Utf8PathBuf::from("/")),
        Some(idx) => Some(Utf8PathBuf::from(&path[..idx])),
    }
}

/// The final segment of a normalized path, or `None` for the root.
pub fn file_name(path: &Utf8Path) -> Option<&str> {
    match path.as_str().rsplit_once('/') {
        Some((_, "")) | None => None,
        Some((_, name)) => Some(name),
    }
}

/// Whether `path` is `ancestor` or lies somewhere beneath it. Matches whole
/// segments, so `/local2` is not within `/local`.
pub fn is_within(path: &Utf8Path, ancestor: &Utf8Path) -> bool {
    let (path, ancestor) = (path.as_str(), ancestor.as_str());

    if ancestor == "/" {
        return true;
    }

    match path.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Number of segments in a normalized path; the root has none.
pub fn depth(path: &Utf8Path) -> usize {
    path.as_str().split('/').filter(|s| !s.is_empty()).count()
}
