//! Picks one release out of a provider listing for a version constraint.
//!
//! Constraints use the npm range dialect that CI workflow files are written
//! in (`5.1.2`, `^4.0.0`, `>=4 <5`, `4.x`, `4.0.0 - 5.0.0`, `4 || 6`). They
//! are translated into [`semver::VersionReq`] alternatives before matching.

use semver::{Version, VersionReq};
use tracing::debug;

use crate::error::{Error, Result};
use crate::release::ReleaseDescriptor;

const OPERATORS: [&str; 7] = [">=", "<=", ">", "<", "=", "^", "~"];

/// A parsed version constraint: a union of semver requirements.
#[derive(Debug, Clone)]
pub struct VersionRange {
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// Parse an npm-style range.
    pub fn parse(range: &str) -> Result<Self> {
        let alternatives = range
            .split("||")
            .map(|alt| {
                let translated = translate_alternative(alt.trim());
                VersionReq::parse(&translated).map_err(|source| Error::InvalidVersionRange {
                    range: range.to_owned(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Whether `version` names exactly one version rather than a range.
pub fn is_explicit_version(version: &str) -> bool {
    parse_version(version).is_some()
}

/// Parse a concrete version, tolerating a leading `v` or `=`.
pub fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.trim().trim_start_matches(['v', '='])).ok()
}

/// Select the release with the highest version satisfying `constraint`.
///
/// Releases sharing the winning version resolve to the first one listed.
pub fn resolve(constraint: &str, releases: &[ReleaseDescriptor]) -> Result<ReleaseDescriptor> {
    let range = VersionRange::parse(constraint)?;

    let mut best: Option<(Version, &ReleaseDescriptor)> = None;
    let mut highest: Option<Version> = None;
    for release in releases {
        let Some(version) = parse_version(&release.version) else {
            debug!(version = %release.version, "Skipping release with non-semver version");
            continue;
        };
        if highest.as_ref().is_none_or(|h| version > *h) {
            highest = Some(version.clone());
        }
        if range.matches(&version) && best.as_ref().is_none_or(|(b, _)| version > *b) {
            best = Some((version, release));
        }
    }

    match best {
        Some((version, release)) => {
            debug!(%constraint, %version, "Resolved version constraint");
            Ok(release.clone())
        }
        None => Err(Error::VersionNotAvailable {
            constraint: constraint.to_owned(),
            highest: highest.map(|v| v.to_string()),
        }),
    }
}

fn translate_alternative(alt: &str) -> String {
    if alt.is_empty() {
        return "*".to_owned();
    }

    if let Some((low, high)) = alt.split_once(" - ") {
        return format!(">={}, <={}", low.trim(), high.trim());
    }

    // Glue detached operators (">= 4") back onto their operand.
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for token in alt.split(|c: char| c.is_whitespace() || c == ',') {
        if token.is_empty() {
            continue;
        }
        if OPERATORS.contains(&token) {
            pending_op.push_str(token);
            continue;
        }
        let comparator = format!("{}{token}", std::mem::take(&mut pending_op));
        comparators.push(translate_comparator(&comparator));
    }
    if !pending_op.is_empty() {
        comparators.push(pending_op);
    }
    comparators.join(", ")
}

/// A bare version without an operator means "exactly this" for full
/// versions and "this prefix" for partial ones (`4.2` is `4.2.*`).
fn translate_comparator(comparator: &str) -> String {
    let has_operator = comparator.starts_with(|c: char| "<>=^~".contains(c));
    if has_operator {
        return comparator.to_owned();
    }
    let bare = comparator.trim_start_matches('v');
    if Version::parse(bare).is_ok() {
        return format!("={bare}");
    }
    let is_wildcard = |part: &str| matches!(part, "x" | "X" | "*");
    let parts: Vec<&str> = bare.split('.').collect();
    if parts.len() < 3 && !parts.iter().any(|p| is_wildcard(p)) {
        return format!("{bare}.*");
    }
    bare.to_owned()
}
