//! Version Comparison

use crate::error::Result;
use crate::version::{PreRelease, Version};
use std::cmp::Ordering;

/// Compare release segments as if the shorter one was padded with zeros.
fn compare_release(left: &[u64], right: &[u64]) -> Ordering {
    let len = left.len().max(right.len());
    (0..len)
        .map(|i| left.get(i).unwrap_or(&0).cmp(right.get(i).unwrap_or(&0)))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// A final release sorts after any of its pre-releases.
fn compare_pre(left: Option<PreRelease>, right: Option<PreRelease>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(l), Some(r)) => l.tag.rank().cmp(&r.tag.rank()).then(l.number.cmp(&r.number)),
    }
}

/// A development build sorts before the release it leads up to.
fn compare_dev(left: Option<u64>, right: Option<u64>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(l), Some(r)) => l.cmp(&r),
    }
}

impl Ord for Version {
    /// Compare two versions, short-circuiting on the first deciding criterion.
    fn cmp(&self, other: &Self) -> Ordering {
        // Step 1: Epoch. A version with an explicit epoch beats one without;
        // `Option`'s ordering (None < Some) expresses exactly that.
        if self.epoch != other.epoch {
            return self.epoch.cmp(&other.epoch);
        }
        // Step 2: Release segments.
        let release = compare_release(&self.release, &other.release);
        if release.is_ne() {
            return release;
        }
        // Step 3-5: Pre-release presence, then tag rank, then number.
        let pre = compare_pre(self.pre, other.pre);
        if pre.is_ne() {
            return pre;
        }
        // Step 6: Post-release, presence wins.
        if self.post != other.post {
            return self.post.cmp(&other.post);
        }
        // Step 7: Dev-release, absence wins.
        let dev = compare_dev(self.dev, other.dev);
        if dev.is_ne() {
            return dev;
        }
        // Step 8: Local segment, plain string comparison (absence is lowest).
        self.local.cmp(&other.local)
    }
}
impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}
impl Eq for Version {}

/// Parse and compare two version strings.
///
/// ```
/// use std::cmp::Ordering;
/// use wheelhouse_version::compare;
///
/// assert_eq!(compare("1.0.0a1", "1.0.0").unwrap(), Ordering::Less);
/// assert_eq!(compare("2!1.0.0", "1!1.0.0").unwrap(), Ordering::Greater);
/// assert!(compare("1.0", "not-a-version").is_err());
/// ```
pub fn compare(left: &str, right: &str) -> Result<Ordering> {
    let left: Version = left.parse()?;
    let right: Version = right.parse()?;
    Ok(left.cmp(&right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[rstest]
    #[case("1.0.0a1", "1.0.0", Ordering::Less)]
    #[case("1.0.0.post1", "1.0.0", Ordering::Greater)]
    #[case("1.0.0.dev1", "1.0.0", Ordering::Less)]
    #[case("2!1.0.0", "1!1.0.0", Ordering::Greater)]
    #[case("1.0.0+abc", "1.0.0+abd", Ordering::Less)]
    #[case("1!0.1", "9.9.9", Ordering::Greater)]
    #[case("0!1.0", "1.0", Ordering::Greater)]
    #[case("1.0", "1.0.0", Ordering::Equal)]
    #[case("1.0.1", "1.0", Ordering::Greater)]
    #[case("1.10", "1.9", Ordering::Greater)]
    #[case("1.0a2", "1.0b1", Ordering::Less)]
    #[case("1.0b9", "1.0rc1", Ordering::Less)]
    #[case("1.0rc1", "1.0c1", Ordering::Equal)]
    #[case("1.0a1", "1.0a2", Ordering::Less)]
    #[case("1.0a1.post1", "1.0a1", Ordering::Greater)]
    #[case("1.0.post1", "1.0.post2", Ordering::Less)]
    #[case("1.0.dev1", "1.0.dev2", Ordering::Less)]
    #[case("1.0a1.dev1", "1.0a1", Ordering::Less)]
    #[case("1.0+local", "1.0", Ordering::Greater)]
    #[case("1.0+10", "1.0+9", Ordering::Less)]
    #[case("1.0.post1", "1.0.0.post1", Ordering::Equal)]
    fn test_known_orderings(#[case] left: &str, #[case] right: &str, #[case] expected: Ordering) {
        assert_eq!(v(left).cmp(&v(right)), expected, "{left} vs {right}");
        assert_eq!(v(right).cmp(&v(left)), expected.reverse(), "{right} vs {left}");
    }

    #[test]
    fn test_compare_strings() {
        assert_eq!(compare("1.0.0", "0.9.0").unwrap(), Ordering::Greater);
        assert!(compare("bogus", "1.0").is_err());
        assert!(compare("1.0", "bogus").is_err());
    }

    #[test]
    fn test_dev_release_sorts_before_pre_release_of_same_version_only_through_pre() {
        // Pre-release presence is decided before dev-release presence.
        assert!(v("1.0.dev1") > v("1.0a1"));
        assert!(v("1.0a1.dev1") < v("1.0a1"));
    }

    const CORPUS: &[&str] = &[
        "0",
        "0.1",
        "0.9.0",
        "1",
        "1.0",
        "1.0.0",
        "1.0.0.0",
        "1.0.0a1",
        "1.0.0a2",
        "1.0.0b1",
        "1.0.0rc1",
        "1.0.0a1.post1",
        "1.0.0a1.dev1",
        "1.0.0.post1",
        "1.0.0.post1.dev1",
        "1.0.0.dev1",
        "1.0.0.dev2",
        "1.0.0+abc",
        "1.0.0+abd",
        "1.0.0+abc.1",
        "1.0.1",
        "1.1",
        "2.0.0",
        "0!1.0",
        "1!0.1",
        "1!1.0.0",
        "2!1.0.0",
        "10.0",
        "1.0.0rc1+local",
    ];

    #[test]
    fn test_antisymmetry() {
        let versions: Vec<Version> = CORPUS.iter().map(|s| v(s)).collect();
        for a in &versions {
            for b in &versions {
                assert_eq!(a.cmp(b), b.cmp(a).reverse(), "{a} vs {b}");
                assert_eq!(a == b, a.cmp(b).is_eq());
            }
        }
    }

    #[test]
    fn test_transitivity() {
        let versions: Vec<Version> = CORPUS.iter().map(|s| v(s)).collect();
        for a in &versions {
            for b in &versions {
                for c in &versions {
                    if a < b && b < c {
                        assert!(a < c, "{a} < {b} < {c}");
                    }
                    if a == b && b == c {
                        assert!(a == c, "{a} == {b} == {c}");
                    }
                    if a <= b && b <= c {
                        assert!(a <= c, "{a} <= {b} <= {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_sorting_is_stable_with_total_order() {
        let mut versions: Vec<Version> =
            ["2.0.0", "1.0.0", "1.0.0rc1", "1.0.0.dev1", "1.0.0.post1", "1!0.1", "1.0.0a1"].iter().map(|s| v(s)).collect();
        versions.sort();
        let sorted: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(sorted, ["1.0.0a1", "1.0.0rc1", "1.0.0.dev1", "1.0.0", "1.0.0.post1", "2.0.0", "1!0.1"]);
    }
}
