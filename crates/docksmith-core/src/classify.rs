//! Pure candidate-selection logic for the discovery classifier: filtering
//! and ranking registry tags against a container's managed labels. Kept
//! free of I/O so it can be tested without a runtime or registry fake.

use docksmith_types::{ChangeType, ManagedLabels, VersionPin};
use regex::Regex;
use semver::Version;

/// Parse a tag as strict semver, tolerating a leading `v` (e.g. `v1.2.3`),
/// which is common enough in the wild that treating it as floating would
/// make `version-pin`/`version-min`/`version-max` useless for most images.
pub fn parse_semver(tag: &str) -> Option<Version> {
  let trimmed = tag.strip_prefix('v').unwrap_or(tag);
  Version::parse(trimmed).ok()
}

pub fn is_prerelease(version: &Version) -> bool {
  !version.pre.is_empty()
}

/// Pick the best candidate tag for `current` out of `tags`, applying the
/// filters in the order spec.md fixes: tag-regex, pre-release, semver
/// parseability, version-min/max, version-pin. Returns `None` when no tag
/// passes (which the caller — already knowing the container is running a
/// resolvable image — reports as `UpToDate` against itself).
pub fn pick_candidate(
  tags: &[String],
  current: Option<&Version>,
  labels: &ManagedLabels,
) -> Result<Option<(String, Version)>, regex::Error> {
  let regex = match &labels.tag_regex {
    Some(pattern) => Some(Regex::new(pattern)?),
    None => None,
  };
  let version_min = labels.version_min.as_deref().and_then(parse_semver);
  let version_max = labels.version_max.as_deref().and_then(parse_semver);

  let mut candidates: Vec<(String, Version)> = tags
    .iter()
    .filter(|tag| regex.as_ref().is_none_or(|re| re.is_match(tag)))
    .filter_map(|tag| parse_semver(tag).map(|v| (tag.clone(), v)))
    .filter(|(_, v)| labels.allow_prerelease || !is_prerelease(v))
    .filter(|(_, v)| version_min.as_ref().is_none_or(|min| v >= min))
    .filter(|(_, v)| version_max.as_ref().is_none_or(|max| v <= max))
    .filter(|(_, v)| match (labels.version_pin, current) {
      (Some(VersionPin::Major), Some(cur)) => v.major == cur.major,
      (Some(VersionPin::Minor), Some(cur)) => {
        v.major == cur.major && v.minor == cur.minor
      }
      (Some(VersionPin::Patch), Some(cur)) => {
        v.major == cur.major
          && v.minor == cur.minor
          && v.patch == cur.patch
      }
      _ => true,
    })
    .collect();

  candidates.sort_by(|a, b| a.1.cmp(&b.1));
  Ok(candidates.into_iter().next_back())
}

/// Whether a floating tag (no parseable semver) has a concrete versioned
/// tag available that would be preferable — the "pinnable" condition.
pub fn has_pinnable_concrete_version(
  tags: &[String],
  labels: &ManagedLabels,
) -> bool {
  pick_candidate(tags, None, labels)
    .ok()
    .flatten()
    .is_some()
}

pub fn change_type(current: &Version, candidate: &Version) -> ChangeType {
  if candidate <= current {
    ChangeType::None
  } else if candidate.major != current.major {
    ChangeType::Major
  } else if candidate.minor != current.minor {
    ChangeType::Minor
  } else if candidate.patch != current.patch {
    ChangeType::Patch
  } else {
    ChangeType::Unknown
  }
}
