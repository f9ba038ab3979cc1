//! PEP 503 "simple" repository pages.
//!
//! Both pages are rendered with [upon]. Every interpolated value is
//! HTML-escaped for a double-quoted attribute, except `data-requires-python`,
//! which is query-encoded with the `urlencode` formatter so specifiers such as
//! `>=3.9,<4` survive intact.

use crate::error::{ErrorKind, Result};
use crate::models::PackageFile;
use exn::ResultExt;
use std::fmt::Write;
use upon::{Engine, Template, Value, fmt as upon_fmt};

const INDEX_TEMPLATE: &str = concat!(
    "<!DOCTYPE html><html><body>",
    "{% for name in packages %}<a href=\"/simple/{{ name }}/\">{{ name }}</a>{% endfor %}",
    "</body></html>",
);

const PACKAGE_TEMPLATE: &str = concat!(
    "<!DOCTYPE html><html><body>",
    "{% for file in files %}",
    "<a href=\"/simple/{{ package }}/{{ file.name }}",
    "{% if file.hash_type %}#{{ file.hash_type }}={{ file.hash_value }}{% endif %}\"",
    "{% if file.requires_python %} data-requires-python=\"{{ file.requires_python | urlencode }}\"{% endif %}",
    " data-gpg-sig=\"{{ file.gpg_sig }}\">{{ file.name }}</a><br/>",
    "{% endfor %}",
    "</body></html>",
);

/// Renders the package index and per-package file listings.
///
/// Templates are compiled once, at construction.
pub struct SimpleRenderer {
    engine: Engine<'static>,
    index: Template<'static>,
    package: Template<'static>,
}
impl std::fmt::Debug for SimpleRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleRenderer").finish_non_exhaustive()
    }
}
impl SimpleRenderer {
    pub fn new() -> Result<Self> {
        let mut engine = Engine::new();
        engine.set_default_formatter(&escape_html);
        engine.add_formatter("urlencode", urlencode);
        let index = engine.compile(INDEX_TEMPLATE).or_raise(|| ErrorKind::Render)?;
        let package = engine.compile(PACKAGE_TEMPLATE).or_raise(|| ErrorKind::Render)?;
        Ok(Self { engine, index, package })
    }

    /// `GET /simple/`: one link per package.
    pub fn render_index(&self, packages: &[String]) -> Result<String> {
        let packages = packages.iter().map(|name| Value::from(name.as_str())).collect();
        self.index
            .render(&self.engine, upon::value! { packages: Value::List(packages) })
            .to_string()
            .or_raise(|| ErrorKind::Render)
    }

    /// `GET /simple/{package}/`: one link per file, with the digest as a URL
    /// fragment when one is known.
    pub fn render_package(&self, package: &str, files: &[PackageFile]) -> Result<String> {
        let files = files
            .iter()
            .map(|file| {
                upon::value! {
                    name: file.file_name.as_str(),
                    hash_type: file.hash.as_ref().map(|hash| hash.hash_type.to_string()),
                    hash_value: file.hash.as_ref().map(|hash| hash.value.as_str()),
                    requires_python: file.requires_python.as_deref(),
                    gpg_sig: file.has_gpg_signature,
                }
            })
            .collect();
        self.package
            .render(&self.engine, upon::value! { package: package, files: Value::List(files) })
            .to_string()
            .or_raise(|| ErrorKind::Render)
    }
}

/// Values land both in `href="..."` and in link text; the attribute encoding
/// covers both.
fn escape_html(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
    match value {
        Value::String(s) => f.write_str(&html_escape::encode_double_quoted_attribute(s))?,
        v => upon_fmt::default(f, v)?,
    };
    Ok(())
}

fn urlencode(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
    match value {
        Value::String(s) => {
            let encoded: String = url::form_urlencoded::byte_serialize(s.as_bytes()).collect();
            f.write_str(&encoded)?
        },
        v => upon_fmt::default(f, v)?,
    };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileHash, HashType};

    fn file(name: &str, hash: Option<(HashType, &str)>, requires_python: Option<&str>) -> PackageFile {
        PackageFile {
            file_name: name.to_string(),
            file_type: "sdist".to_string(),
            hash: hash.map(|(hash_type, value)| FileHash { hash_type, value: value.to_string() }),
            requires_python: requires_python.map(ToString::to_string),
            has_gpg_signature: false,
        }
    }

    #[test]
    fn test_index_page() {
        let renderer = SimpleRenderer::new().unwrap();
        let html = renderer.render_index(&["bar".to_string(), "foo-bar".to_string()]).unwrap();
        assert_eq!(
            html,
            "<!DOCTYPE html><html><body><a href=\"/simple/bar/\">bar</a>\
             <a href=\"/simple/foo-bar/\">foo-bar</a></body></html>"
        );
    }

    #[test]
    fn test_empty_index_page() {
        let renderer = SimpleRenderer::new().unwrap();
        assert_eq!(renderer.render_index(&[]).unwrap(), "<!DOCTYPE html><html><body></body></html>");
    }

    #[test]
    fn test_package_page() {
        let renderer = SimpleRenderer::new().unwrap();
        let files = [
            file("foo-1.0.tar.gz", Some((HashType::Md5, "abc")), Some(">=3.9")),
            file("foo-1.0-py3-none-any.whl", None, None),
        ];
        let html = renderer.render_package("foo", &files).unwrap();
        assert_eq!(
            html,
            "<!DOCTYPE html><html><body>\
             <a href=\"/simple/foo/foo-1.0.tar.gz#md5=abc\" data-requires-python=\"%3E%3D3.9\" data-gpg-sig=\"false\">\
             foo-1.0.tar.gz</a><br/>\
             <a href=\"/simple/foo/foo-1.0-py3-none-any.whl\" data-gpg-sig=\"false\">foo-1.0-py3-none-any.whl</a><br/>\
             </body></html>"
        );
    }

    #[test]
    fn test_file_names_are_escaped() {
        let renderer = SimpleRenderer::new().unwrap();
        let html = renderer.render_package("foo", &[file("<b>\"x.tar.gz", None, None)]).unwrap();
        assert_eq!(
            html,
            "<!DOCTYPE html><html><body>\
             <a href=\"/simple/foo/&lt;b&gt;&quot;x.tar.gz\" data-gpg-sig=\"false\">&lt;b&gt;&quot;x.tar.gz</a><br/>\
             </body></html>"
        );
    }

    #[test]
    fn test_package_names_are_escaped() {
        let renderer = SimpleRenderer::new().unwrap();
        let html = renderer.render_index(&["a\"><script>".to_string()]).unwrap();
        assert!(html.contains("<a href=\"/simple/a&quot;&gt;&lt;script&gt;/\">a&quot;&gt;&lt;script&gt;</a>"));
        assert!(!html.contains("<script>"));

        let html = renderer.render_package("a&b", &[file("x.tar.gz", Some((HashType::Sha256, "\"<")), None)]).unwrap();
        assert!(html.contains("href=\"/simple/a&amp;b/x.tar.gz#sha256=&quot;&lt;\""));
    }

    #[test]
    fn test_requires_python_is_urlencoded() {
        let renderer = SimpleRenderer::new().unwrap();
        let html = renderer.render_package("foo", &[file("foo.tar.gz", None, Some(">=3.9, <4"))]).unwrap();
        assert!(html.contains("data-requires-python=\"%3E%3D3.9%2C+%3C4\""));
    }
}
