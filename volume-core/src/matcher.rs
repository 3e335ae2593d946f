// SPDX-License-Identifier: GPL-3.0-only

//! Locator and label filters used by enumeration.

use regex::Regex;
use volume_types::{Labels, Volume, VolumeLocator, VolumeSnap};

use crate::error::{Result, VolumeError};

const PATTERN_CHARS: &[char] = &[
    '.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|', '^', '$', '\\',
];

/// Whether `name` uses regular-expression syntax rather than naming a volume.
fn is_pattern(name: &str) -> bool {
    name.contains(PATTERN_CHARS)
}

/// Every key of `query` is present in `target` with an equal value.
fn labels_match(query: &Labels, target: &Labels) -> bool {
    query
        .iter()
        .all(|(key, value)| target.get(key) == Some(value))
}

#[derive(Debug, Clone)]
enum NameFilter {
    Any,
    Exact(String),
    Pattern(Regex),
}

impl NameFilter {
    fn parse(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Ok(Self::Any);
        }
        if !is_pattern(name) {
            return Ok(Self::Exact(name.to_string()));
        }

        Regex::new(&format!("^(?:{name})$"))
            .map(Self::Pattern)
            .map_err(|e| VolumeError::InvalidArgument(format!("bad name pattern '{name}': {e}")))
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == name,
            Self::Pattern(re) => re.is_match(name),
        }
    }
}

/// A compiled enumeration query. Missing fields act as wildcards.
#[derive(Debug, Clone)]
pub struct LocatorQuery {
    name: NameFilter,
    locator_labels: Labels,
    labels: Labels,
}

impl LocatorQuery {
    /// `locator` is matched against volume locators, `labels` against the
    /// volume's config labels (or the snapshot's own labels).
    pub fn new(locator: &VolumeLocator, labels: &Labels) -> Result<Self> {
        Ok(Self {
            name: NameFilter::parse(&locator.name)?,
            locator_labels: locator.volume_labels.clone(),
            labels: labels.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.name, NameFilter::Any)
            && self.locator_labels.is_empty()
            && self.labels.is_empty()
    }

    pub fn matches_locator(&self, locator: &VolumeLocator) -> bool {
        self.name.matches(&locator.name) && labels_match(&self.locator_labels, &locator.volume_labels)
    }

    /// Match a volume known only by its locator and config labels.
    pub fn matches_parts(&self, locator: &VolumeLocator, config_labels: &Labels) -> bool {
        self.matches_locator(locator) && labels_match(&self.labels, config_labels)
    }

    pub fn matches_volume(&self, volume: &Volume) -> bool {
        self.matches_parts(&volume.locator, &volume.spec.config_labels)
    }

    /// `source` is the volume the snapshot was taken from, if it still exists.
    pub fn matches_snap(&self, snap: &VolumeSnap, source: Option<&Volume>) -> bool {
        if !labels_match(&self.labels, &snap.snap_labels) {
            return false;
        }

        match source {
            Some(volume) => self.matches_locator(&volume.locator),
            None => matches!(self.name, NameFilter::Any) && self.locator_labels.is_empty(),
        }
    }
}
