use regex::Regex;
use std::sync::LazyLock;

static SEPARATOR_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-_.]+").expect("separator regex is valid"));
static VALID_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z0-9]|[a-z0-9][a-z0-9._-]*[a-z0-9])$").expect("project name regex is valid")
});

/// Canonical form of a package name: lowercased, with every run of `-`, `_`
/// and `.` collapsed into a single `-`.
///
/// Normalizing an already normalized name returns it unchanged.
///
/// ```
/// use wheelhouse_version::normalize;
///
/// assert_eq!(normalize("Foo_Bar"), "foo-bar");
/// assert_eq!(normalize("foo--bar__baz..qux"), "foo-bar-baz-qux");
/// ```
pub fn normalize(name: &str) -> String {
    SEPARATOR_RUNS.replace_all(&name.to_lowercase(), "-").into_owned()
}

/// Whether the name is an acceptable project name: ASCII letters, digits and
/// the separators `-_.`, starting and ending with a letter or digit.
pub fn is_valid_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}
