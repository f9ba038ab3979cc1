//! Blob path validation.
//!
//! Every path handed to a backend is relative to that backend's root (a
//! directory, or a bucket prefix). Package blobs live at
//! `{normalized-name}/{uuid}`, and read-only indexes serve
//! `{package}/{file}`, so legitimate paths are always short and plain.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

/// Resolves `path` to a clean relative path that stays inside the storage
/// root, or fails with [`InvalidPath`](ErrorKind::InvalidPath).
///
/// `.` segments, repeated separators and leading or trailing slashes are
/// dropped, and `..` is resolved lexically. Climbing above the root, drive
/// prefixes, NUL bytes and paths that resolve to nothing are rejected.
/// Backslashes are only separators where the platform says so.
///
/// ```
/// use std::path::Path;
/// use wheelhouse_storage::validate_path;
///
/// assert_eq!(
///     validate_path("/requests//./0f6f1b5f/").unwrap(),
///     Path::new("requests/0f6f1b5f")
/// );
/// assert!(validate_path("requests/../../etc/passwd").is_err());
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut resolved: Vec<_> = Vec::new();
    for component in original.components() {
        match component {
            // NUL passes through `components()` on Unix but truncates syscalls.
            Component::Normal(segment) if segment.as_encoded_bytes().contains(&0) => exn::bail!(invalid()),
            Component::Normal(segment) => resolved.push(segment),
            Component::ParentDir => {
                if resolved.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
            Component::CurDir | Component::RootDir => (),
            Component::Prefix(_) => exn::bail!(invalid()),
        }
    }
    if resolved.is_empty() {
        exn::bail!(invalid());
    }
    Ok(resolved.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("foo/0f6f1b5f", "foo/0f6f1b5f")]
    #[case("zope-interface/c5e1a1f6-3b0e-4a38-9f7e-4f7d0b2c9a11", "zope-interface/c5e1a1f6-3b0e-4a38-9f7e-4f7d0b2c9a11")]
    #[case("foo-1.0.tar.gz", "foo-1.0.tar.gz")]
    #[case("/foo/bar.whl", "foo/bar.whl")]
    #[case("foo//bar///baz", "foo/bar/baz")]
    #[case("./foo/./bar", "foo/bar")]
    #[case("foo/bar/", "foo/bar")]
    #[case("foo///", "foo")]
    #[case("foo/bar/..", "foo")]
    #[case("wrong/../foo/bar.whl", "foo/bar.whl")]
    fn test_accepted(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }

    #[rstest]
    #[case::empty("")]
    #[case::current(".")]
    #[case::current_slash("./")]
    #[case::root("/")]
    #[case::only_separators("//")]
    #[case::parent("..")]
    #[case::parents("../..")]
    #[case::escape("../foo/0f6f1b5f")]
    #[case::escape_midway("foo/../../bar")]
    #[case::nul("foo\0bar")]
    #[case::only_nul("\0")]
    fn test_rejected(#[case] input: &str) {
        let err = validate(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(path) if path == Path::new(input)));
    }

    #[cfg(windows)]
    #[rstest]
    #[case("foo\\bar", "foo/bar")]
    #[case("foo\\bar/baz", "foo/bar/baz")]
    fn test_backslash_separators(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(validate(input).unwrap(), Path::new(expected));
    }
}
