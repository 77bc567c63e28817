use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Version-pin granularity. At most one of major/minor/patch may be set on
/// a container at a time.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
pub enum VersionPin {
  Major,
  Minor,
  Patch,
}

/// The fixed set of label keys this system owns on a container.
/// All other labels on the container are left untouched.
pub const IGNORE: &str = "docksmith.ignore";
pub const ALLOW_LATEST: &str = "docksmith.allow-latest";
pub const ALLOW_PRERELEASE: &str = "docksmith.allow-prerelease";
pub const VERSION_PIN_MAJOR: &str = "docksmith.version-pin-major";
pub const VERSION_PIN_MINOR: &str = "docksmith.version-pin-minor";
pub const VERSION_PIN_PATCH: &str = "docksmith.version-pin-patch";
pub const TAG_REGEX: &str = "docksmith.tag-regex";
pub const VERSION_MIN: &str = "docksmith.version-min";
pub const VERSION_MAX: &str = "docksmith.version-max";
pub const PRE_UPDATE_CHECK: &str = "docksmith.pre-update-check";
pub const RESTART_AFTER: &str = "docksmith.restart-after";

/// All managed label keys, in a stable order. Used to enumerate "every key
/// present in the managed set" for rollback coverage checks.
pub const ALL_KEYS: &[&str] = &[
  IGNORE,
  ALLOW_LATEST,
  ALLOW_PRERELEASE,
  VERSION_PIN_MAJOR,
  VERSION_PIN_MINOR,
  VERSION_PIN_PATCH,
  TAG_REGEX,
  VERSION_MIN,
  VERSION_MAX,
  PRE_UPDATE_CHECK,
  RESTART_AFTER,
];

pub const TAG_REGEX_MAX_LEN: usize = 500;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LabelError {
  #[error("tag-regex exceeds {TAG_REGEX_MAX_LEN} characters")]
  TagRegexTooLong,
  #[error(
    "at most one of version-pin-major/minor/patch may be true, got: {0}"
  )]
  ConflictingVersionPin(String),
}

/// Parsed, typed view over a container's managed labels. Unset fields mean
/// the label was absent or held its default value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedLabels {
  pub ignore: bool,
  pub allow_latest: bool,
  pub allow_prerelease: bool,
  pub version_pin: Option<VersionPin>,
  pub tag_regex: Option<String>,
  pub version_min: Option<String>,
  pub version_max: Option<String>,
  pub pre_update_check: Option<String>,
  pub restart_after: Vec<String>,
}

impl ManagedLabels {
  /// Parse the managed subset out of a container's full label map.
  pub fn parse(
    labels: &BTreeMap<String, String>,
  ) -> Result<Self, LabelError> {
    let tag_regex = labels.get(TAG_REGEX).filter(|s| !s.is_empty());
    if let Some(re) = tag_regex
      && re.len() > TAG_REGEX_MAX_LEN
    {
      return Err(LabelError::TagRegexTooLong);
    }
    let pins = [
      (VersionPin::Major, is_true(labels.get(VERSION_PIN_MAJOR))),
      (VersionPin::Minor, is_true(labels.get(VERSION_PIN_MINOR))),
      (VersionPin::Patch, is_true(labels.get(VERSION_PIN_PATCH))),
    ];
    let set: Vec<VersionPin> =
      pins.iter().filter(|(_, set)| *set).map(|(p, _)| *p).collect();
    let version_pin = match set.as_slice() {
      [] => None,
      [pin] => Some(*pin),
      _ => {
        return Err(LabelError::ConflictingVersionPin(format!(
          "{VERSION_PIN_MAJOR}={}, {VERSION_PIN_MINOR}={}, {VERSION_PIN_PATCH}={}",
          pins[0].1, pins[1].1, pins[2].1
        )));
      }
    };
    Ok(ManagedLabels {
      ignore: is_true(labels.get(IGNORE)),
      allow_latest: is_true(labels.get(ALLOW_LATEST)),
      allow_prerelease: is_true(labels.get(ALLOW_PRERELEASE)),
      version_pin,
      tag_regex: tag_regex.cloned(),
      version_min: labels
        .get(VERSION_MIN)
        .filter(|s| !s.is_empty())
        .cloned(),
      version_max: labels
        .get(VERSION_MAX)
        .filter(|s| !s.is_empty())
        .cloned(),
      pre_update_check: labels
        .get(PRE_UPDATE_CHECK)
        .filter(|s| !s.is_empty())
        .cloned(),
      restart_after: labels
        .get(RESTART_AFTER)
        .map(|s| {
          s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
        })
        .unwrap_or_default(),
    })
  }

  /// Serialize back to the on-container label representation. A label is
  /// omitted entirely when it holds its default/unset value, matching the
  /// "setting a boolean to its default is equivalent to removing it" rule.
  pub fn to_map(&self) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    if self.ignore {
      map.insert(IGNORE.to_string(), "true".to_string());
    }
    if self.allow_latest {
      map.insert(ALLOW_LATEST.to_string(), "true".to_string());
    }
    if self.allow_prerelease {
      map.insert(ALLOW_PRERELEASE.to_string(), "true".to_string());
    }
    if let Some(pin) = self.version_pin {
      let key = match pin {
        VersionPin::Major => VERSION_PIN_MAJOR,
        VersionPin::Minor => VERSION_PIN_MINOR,
        VersionPin::Patch => VERSION_PIN_PATCH,
      };
      map.insert(key.to_string(), "true".to_string());
    }
    if let Some(re) = &self.tag_regex {
      map.insert(TAG_REGEX.to_string(), re.clone());
    }
    if let Some(v) = &self.version_min {
      map.insert(VERSION_MIN.to_string(), v.clone());
    }
    if let Some(v) = &self.version_max {
      map.insert(VERSION_MAX.to_string(), v.clone());
    }
    if let Some(v) = &self.pre_update_check {
      map.insert(PRE_UPDATE_CHECK.to_string(), v.clone());
    }
    if !self.restart_after.is_empty() {
      map.insert(
        RESTART_AFTER.to_string(),
        self.restart_after.join(","),
      );
    }
    map
  }

  /// Every managed key this set would write, for rollback-coverage tests.
  pub fn set_keys(&self) -> Vec<&'static str> {
    self.to_map().into_keys().filter_map(|k| {
      ALL_KEYS.iter().find(|candidate| **candidate == k).copied()
    }).collect()
  }
}

fn is_true(v: Option<&String>) -> bool {
  matches!(v.map(String::as_str), Some("true") | Some("1"))
}

/// A single label assignment requested by a caller of the label transaction.
/// `None` means "remove / reset to default".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelAssignment {
  pub key: String,
  pub value: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_round_trips_through_to_map() {
    let mut labels = BTreeMap::new();
    labels.insert(IGNORE.to_string(), "true".to_string());
    labels.insert(ALLOW_LATEST.to_string(), "true".to_string());
    labels
      .insert(RESTART_AFTER.to_string(), "redis, cache".to_string());
    let parsed = ManagedLabels::parse(&labels).unwrap();
    assert!(parsed.ignore);
    assert_eq!(parsed.restart_after, vec!["redis", "cache"]);
    let back = parsed.to_map();
    assert_eq!(back.get(IGNORE).unwrap(), "true");
    assert_eq!(back.get(RESTART_AFTER).unwrap(), "redis,cache");
  }

  #[test]
  fn tag_regex_too_long_is_rejected() {
    let mut labels = BTreeMap::new();
    labels.insert(TAG_REGEX.to_string(), "a".repeat(501));
    assert_eq!(
      ManagedLabels::parse(&labels).unwrap_err(),
      LabelError::TagRegexTooLong
    );
  }

  #[test]
  fn default_managed_labels_serialize_to_empty_map() {
    assert!(ManagedLabels::default().to_map().is_empty());
  }

  #[test]
  fn set_keys_covers_every_populated_field() {
    let labels = ManagedLabels {
      ignore: true,
      version_pin: Some(VersionPin::Minor),
      tag_regex: Some("^v".to_string()),
      ..Default::default()
    };
    let keys = labels.set_keys();
    assert!(keys.contains(&IGNORE));
    assert!(keys.contains(&VERSION_PIN_MINOR));
    assert!(keys.contains(&TAG_REGEX));
    assert_eq!(keys.len(), 3);
  }

  #[test]
  fn version_pin_parses_the_three_spec_keys() {
    let mut labels = BTreeMap::new();
    labels.insert(VERSION_PIN_MAJOR.to_string(), "true".to_string());
    let parsed = ManagedLabels::parse(&labels).unwrap();
    assert_eq!(parsed.version_pin, Some(VersionPin::Major));
    assert_eq!(
      parsed.to_map().get(VERSION_PIN_MAJOR).unwrap(),
      "true"
    );
  }

  #[test]
  fn more_than_one_version_pin_key_true_is_rejected() {
    let mut labels = BTreeMap::new();
    labels.insert(VERSION_PIN_MAJOR.to_string(), "true".to_string());
    labels.insert(VERSION_PIN_MINOR.to_string(), "true".to_string());
    assert!(matches!(
      ManagedLabels::parse(&labels).unwrap_err(),
      LabelError::ConflictingVersionPin(_)
    ));
  }
}
