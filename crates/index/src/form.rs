//! The legacy upload form (`POST /legacy/`).
//!
//! Uploaders such as `twine` send every metadata field as a form field and
//! the artifact itself as a file part named `content`. Fields they have no
//! value for are frequently sent empty; those are treated as absent.

use crate::error::{ErrorKind, Result};
use crate::models::UploadRequest;
use exn::OptionExt;
use std::collections::HashMap;
use wheelhouse_registry::Digests;
use wheelhouse_version::{Version, is_valid_name};

const ACTION: &str = "file_upload";
const PROTOCOL_VERSION: &str = "1";

/// Text fields of an upload form. Repeated fields keep their order.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    fields: HashMap<String, Vec<String>>,
}
impl UploadForm {
    pub fn from_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut form = Self::default();
        for (name, value) in fields {
            form.fields.entry(name.into()).or_default().push(value.into());
        }
        form
    }

    /// Parses an `application/x-www-form-urlencoded` body.
    pub fn from_urlencoded(body: &[u8]) -> Self {
        Self::from_fields(url::form_urlencoded::parse(body).into_owned())
    }

    fn first(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|values| values.first()).map(|value| value.trim()).filter(|v| !v.is_empty())
    }

    fn optional(&self, name: &str) -> Option<String> {
        self.first(name).map(ToString::to_string)
    }

    fn required(&self, name: &str) -> Result<String> {
        self.optional(name).ok_or_raise(|| invalid(format!("missing field {name:?}")))
    }

    fn digest(&self, name: &str, length: usize) -> Result<Option<String>> {
        match self.first(name) {
            None => Ok(None),
            Some(value) if value.len() == length && value.chars().all(|c| c.is_ascii_hexdigit()) => {
                Ok(Some(value.to_ascii_lowercase()))
            },
            Some(_) => exn::bail!(invalid(format!("{name} must be {length} hexadecimal characters"))),
        }
    }

    /// Validates the form and combines it with the file name of the
    /// `content` part.
    ///
    /// Only `:action=file_upload` with `protocol_version=1` is accepted. The
    /// package name and version are checked here so that a malformed upload
    /// is rejected before anything is written.
    pub fn into_request(self, file_name: &str) -> Result<UploadRequest> {
        match self.first(":action") {
            Some(ACTION) => (),
            other => exn::bail!(invalid(format!("unsupported action {other:?}, only {ACTION} is supported"))),
        }
        match self.first("protocol_version") {
            Some(PROTOCOL_VERSION) => (),
            other => exn::bail!(invalid(format!("unsupported protocol_version {other:?}"))),
        }

        let package_name = self.required("name")?;
        if !is_valid_name(&package_name) {
            exn::bail!(invalid(format!("invalid package name {package_name:?}")));
        }
        let version = self.required("version")?;
        if version.parse::<Version>().is_err() {
            exn::bail!(invalid(format!("invalid version {version:?}")));
        }
        validate_file_name(file_name)?;

        let digests = Digests {
            md5: self.digest("md5_digest", 32)?,
            sha256: self.digest("sha256_digest", 64)?,
            blake2_256: self.digest("blake2_256_digest", 64)?,
        };
        let requires_dist = self
            .fields
            .get("requires_dist")
            .into_iter()
            .flatten()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
            .collect();

        Ok(UploadRequest {
            package_name,
            version,
            file_name: file_name.to_string(),
            file_type: self.required("filetype")?,
            metadata_version: self.required("metadata_version")?,
            summary: self.optional("summary"),
            description: self.optional("description"),
            description_content_type: self.optional("description_content_type"),
            pyversion: self.optional("pyversion"),
            requires_python: self.optional("requires_python"),
            requires_dist,
            digests,
        })
    }
}

/// A file name must be a single, plain path component.
pub(crate) fn validate_file_name(file_name: &str) -> Result<()> {
    let valid = !file_name.is_empty()
        && file_name != "."
        && file_name != ".."
        && !file_name.contains(['/', '\\', '\0'])
        && file_name.trim() == file_name;
    if !valid {
        exn::bail!(invalid(format!("invalid file name {file_name:?}")));
    }
    Ok(())
}

fn invalid(message: String) -> ErrorKind {
    ErrorKind::InvalidInput(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn fields() -> Vec<(&'static str, &'static str)> {
        vec![
            (":action", "file_upload"),
            ("protocol_version", "1"),
            ("name", "Foo_Bar"),
            ("version", "1.0.0"),
            ("filetype", "bdist_wheel"),
            ("metadata_version", "2.1"),
            ("pyversion", "py3"),
            ("summary", ""),
            ("requires_python", ">=3.9"),
            ("requires_dist", "requests>=2"),
            ("requires_dist", "click; extra == \"cli\""),
            ("sha256_digest", "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"),
        ]
    }

    fn without(name: &str) -> Vec<(&'static str, &'static str)> {
        fields().into_iter().filter(|(n, _)| *n != name).collect()
    }

    fn with(name: &'static str, value: &'static str) -> Vec<(&'static str, &'static str)> {
        let mut fields = without(name);
        fields.push((name, value));
        fields
    }

    #[test]
    fn test_valid_form() {
        let request = UploadForm::from_fields(fields()).into_request("foo_bar-1.0.0-py3-none-any.whl").unwrap();
        assert_eq!(request.package_name, "Foo_Bar");
        assert_eq!(request.version, "1.0.0");
        assert_eq!(request.file_type, "bdist_wheel");
        assert_eq!(request.summary, None);
        assert_eq!(request.requires_dist, ["requests>=2", "click; extra == \"cli\""]);
        assert_eq!(
            request.digests.sha256.as_deref(),
            Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
        assert_eq!(request.digests.md5, None);
    }

    #[test]
    fn test_urlencoded_body() {
        let body = b":action=file_upload&protocol_version=1&name=foo&version=2.0&filetype=sdist\
            &metadata_version=2.1&requires_python=%3E%3D3.9&summary=A+foo";
        let request = UploadForm::from_urlencoded(body).into_request("foo-2.0.tar.gz").unwrap();
        assert_eq!(request.requires_python.as_deref(), Some(">=3.9"));
        assert_eq!(request.summary.as_deref(), Some("A foo"));
    }

    #[rstest]
    #[case::wrong_action(with(":action", "submit"))]
    #[case::missing_action(without(":action"))]
    #[case::wrong_protocol(with("protocol_version", "2"))]
    #[case::missing_name(without("name"))]
    #[case::bad_name(with("name", "-foo"))]
    #[case::missing_version(without("version"))]
    #[case::bad_version(with("version", "one"))]
    #[case::missing_filetype(without("filetype"))]
    #[case::missing_metadata_version(without("metadata_version"))]
    #[case::bad_digest(with("md5_digest", "xyz"))]
    fn test_rejected_forms(#[case] fields: Vec<(&'static str, &'static str)>) {
        let err = UploadForm::from_fields(fields).into_request("foo-1.0.tar.gz").unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidInput(_)), "{err:?}");
    }

    #[rstest]
    #[case("foo-1.0.tar.gz", true)]
    #[case("", false)]
    #[case("..", false)]
    #[case("../foo-1.0.tar.gz", false)]
    #[case("dir/foo-1.0.tar.gz", false)]
    #[case("dir\\foo-1.0.tar.gz", false)]
    #[case(" foo.tar.gz", false)]
    fn test_file_names(#[case] file_name: &str, #[case] valid: bool) {
        assert_eq!(validate_file_name(file_name).is_ok(), valid);
    }
}
