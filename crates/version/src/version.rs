use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use regex::{Captures, Regex};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::LazyLock;

// Matched against the trimmed, lowercased input. Release segments may carry
// leading zeros (they are dropped during parsing), the epoch may not.
static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:(?P<epoch>0|[1-9][0-9]*)!)?",
        r"(?P<release>[0-9]+(?:\.[0-9]+)*)",
        r"(?:(?P<pre_tag>alpha|beta|rc|a|b|c)(?P<pre>[0-9]+))?",
        r"(?:\.post(?P<post>[0-9]+))?",
        r"(?:\.dev(?P<dev>[0-9]+))?",
        r"(?:\+(?P<local>[a-z0-9]+(?:\.[a-z0-9]+)*))?$",
    ))
    .expect("version regex is valid")
});

/// Pre-release phase, ordered `a < b < rc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PreReleaseTag {
    Alpha,
    Beta,
    ReleaseCandidate,
}
impl PreReleaseTag {
    /// Canonical spelling used when serializing a version.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alpha => "a",
            Self::Beta => "b",
            Self::ReleaseCandidate => "rc",
        }
    }

    /// Ranking used for ordering pre-releases of the same release.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Alpha => 1,
            Self::Beta => 2,
            Self::ReleaseCandidate => 3,
        }
    }
}
impl FromStr for PreReleaseTag {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "a" | "alpha" => Self::Alpha,
            "b" | "beta" => Self::Beta,
            "rc" | "c" => Self::ReleaseCandidate,
            _ => exn::bail!(ErrorKind::InvalidVersion(s.to_string())),
        })
    }
}
impl Display for PreReleaseTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// A pre-release marker: the tag and its number always travel together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PreRelease {
    pub tag: PreReleaseTag,
    pub number: u64,
}

/// A parsed package version.
///
/// Grammar (case-insensitive, surrounding whitespace ignored):
///
/// ```text
/// [epoch!]release(.release)*[{a|b|rc|alpha|beta|c}N][.postN][.devN][+local]
/// ```
///
/// Values are immutable once parsed. [`Display`] produces the canonical form,
/// which is what gets stored in the metadata database: already-canonical input
/// round-trips exactly.
///
/// Equality follows the ordering rules (see the [`Ord`] implementation), so
/// `1.0` and `1.0.0` compare equal even though they serialize differently.
///
/// ```
/// use wheelhouse_version::Version;
///
/// let version: Version = "1!2.0.3RC1.post4.dev5+local.7".parse().unwrap();
/// assert_eq!(version.epoch(), Some(1));
/// assert_eq!(version.release(), &[2, 0, 3]);
/// assert_eq!(version.to_string(), "1!2.0.3rc1.post4.dev5+local.7");
/// ```
#[derive(Debug, Clone)]
pub struct Version {
    pub(crate) epoch: Option<u64>,
    pub(crate) release: Vec<u64>,
    pub(crate) pre: Option<PreRelease>,
    pub(crate) post: Option<u64>,
    pub(crate) dev: Option<u64>,
    pub(crate) local: Option<String>,
}
impl Version {
    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    /// Release segments; never empty.
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    pub fn pre(&self) -> Option<PreRelease> {
        self.pre
    }

    pub fn post(&self) -> Option<u64> {
        self.post
    }

    pub fn dev(&self) -> Option<u64> {
        self.dev
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    /// Whether this is a pre-release or development build.
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    fn number(captures: &Captures<'_>, group: &str, input: &str) -> Result<Option<u64>> {
        captures
            .name(group)
            .map(|m| Self::segment(m.as_str(), input))
            .transpose()
    }

    /// The grammar only admits digits here, so the one failure is overflow.
    fn segment(digits: &str, input: &str) -> Result<u64> {
        digits.parse::<u64>().or_raise(|| ErrorKind::InvalidVersion(input.to_string()))
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let Some(captures) = VERSION_REGEX.captures(&normalized) else {
            exn::bail!(ErrorKind::InvalidVersion(s.to_string()));
        };

        let epoch = Self::number(&captures, "epoch", s)?;
        let release = match captures.name("release") {
            Some(m) => m
                .as_str()
                .split('.')
                .map(|segment| {
                    if segment.is_empty() {
                        exn::bail!(ErrorKind::InvalidVersion(s.to_string()));
                    }
                    // Leading zeros disappear with the integer conversion.
                    Self::segment(segment, s)
                })
                .collect::<Result<Vec<_>>>()?,
            None => exn::bail!(ErrorKind::InvalidVersion(s.to_string())),
        };
        let pre = match (captures.name("pre_tag"), Self::number(&captures, "pre", s)?) {
            (Some(tag), Some(number)) => Some(PreRelease { tag: tag.as_str().parse()?, number }),
            (None, None) => None,
            _ => exn::bail!(ErrorKind::InvalidVersion(s.to_string())),
        };

        Ok(Self {
            epoch,
            release,
            pre,
            post: Self::number(&captures, "post", s)?,
            dev: Self::number(&captures, "dev", s)?,
            local: captures.name("local").map(|m| m.as_str().to_string()),
        })
    }
}
impl TryFrom<&str> for Version {
    type Error = Error;
    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}
impl TryFrom<String> for Version {
    type Error = Error;
    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.as_str().parse()
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if let Some(epoch) = self.epoch {
            write!(f, "{epoch}!")?;
        }
        for (i, segment) in self.release.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        if let Some(PreRelease { tag, number }) = self.pre {
            write!(f, "{tag}{number}")?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{post}")?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{dev}")?;
        }
        if let Some(local) = &self.local {
            write!(f, "+{local}")?;
        }
        Ok(())
    }
}
