// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Metric tags attached to a call.
//!
//! A [`TagMap`] annotates the measurements recorded while a call is in flight; a metrics
//! pipeline groups them by the [`TagKey`]s listed in its [`View`](crate::View)s.

use crate::error::{Error, Result};
use faststr::FastStr;
use opentelemetry::{Key, KeyValue};
use std::cmp::Ordering;
use std::fmt;

const MAX_TAG_LEN: usize = 255;

/// Tag key for the Cloud Run revision name.
pub static KEY_REVISION_NAME: TagKey = TagKey::from_static("cloud_run_revision_name");

/// Tag key for the Cloud Run location (region) name.
pub static KEY_LOCATION_NAME: TagKey = TagKey::from_static("cloud_run_location_name");

fn is_printable(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

/// Name of a tag. Keys are meant to be created once and shared.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TagKey(Key);

impl TagKey {
    /// Creates a key from a static name without validation.
    pub const fn from_static(name: &'static str) -> Self {
        TagKey(Key::from_static_str(name))
    }

    /// Creates a key, checking the name is 1 to 255 printable ASCII characters.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_TAG_LEN || !is_printable(&name) {
            return Err(Error::InvalidTagKey(name));
        }
        Ok(TagKey(Key::from(name)))
    }

    /// The key name.
    #[inline]
    pub fn name(&self) -> &str {
        self.0.as_str()
    }

    /// The key as an OpenTelemetry attribute key.
    #[inline]
    pub fn as_key(&self) -> &Key {
        &self.0
    }
}

impl PartialOrd for TagKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TagKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name().cmp(other.name())
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A change to apply to a [`TagMap`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutator {
    /// Adds the tag only if the key is absent.
    Insert(TagKey, FastStr),
    /// Replaces the value only if the key is present.
    Update(TagKey, FastStr),
    /// Adds the tag, replacing any value already stored under the key.
    Upsert(TagKey, FastStr),
    /// Removes the key.
    Delete(TagKey),
}

impl Mutator {
    /// Shorthand for [`Mutator::Upsert`].
    pub fn upsert(key: &TagKey, value: impl Into<FastStr>) -> Self {
        Mutator::Upsert(key.clone(), value.into())
    }
}

/// Tags of one call, ordered by key name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagMap {
    tags: Vec<(TagKey, FastStr)>,
}

impl TagMap {
    /// Creates an empty tag map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &TagKey) -> Option<&str> {
        self.position(key).ok().map(|i| self.tags[i].1.as_str())
    }

    /// Number of tags.
    #[inline]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether there are no tags.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterates over the tags, ordered by key name.
    pub fn iter(&self) -> impl Iterator<Item = (&TagKey, &str)> {
        self.tags.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Returns a new map with all `mutators` applied in order.
    ///
    /// Either every mutator is applied or, if any value is invalid, none is and `self` is
    /// left as the only valid map.
    pub fn apply(&self, mutators: &[Mutator]) -> Result<TagMap> {
        let mut next = self.clone();
        for m in mutators {
            match m {
                Mutator::Insert(key, value) => {
                    check_value(key, value)?;
                    if let Err(i) = next.position(key) {
                        next.tags.insert(i, (key.clone(), value.clone()));
                    }
                },
                Mutator::Update(key, value) => {
                    check_value(key, value)?;
                    if let Ok(i) = next.position(key) {
                        next.tags[i].1 = value.clone();
                    }
                },
                Mutator::Upsert(key, value) => {
                    check_value(key, value)?;
                    match next.position(key) {
                        Ok(i) => next.tags[i].1 = value.clone(),
                        Err(i) => next.tags.insert(i, (key.clone(), value.clone())),
                    }
                },
                Mutator::Delete(key) => {
                    if let Ok(i) = next.position(key) {
                        next.tags.remove(i);
                    }
                },
            }
        }
        Ok(next)
    }

    /// The tags as OpenTelemetry attributes, for recording measurements.
    pub fn to_attributes(&self) -> Vec<KeyValue> {
        self.tags.iter().map(|(k, v)| KeyValue::new(k.as_key().clone(), v.to_string())).collect()
    }

    fn position(&self, key: &TagKey) -> std::result::Result<usize, usize> {
        self.tags.binary_search_by(|(k, _)| k.cmp(key))
    }
}

fn check_value(key: &TagKey, value: &str) -> Result<()> {
    if value.len() > MAX_TAG_LEN || !is_printable(value) {
        return Err(Error::InvalidTagValue { key: key.name().to_string() });
    }
    Ok(())
}

impl fmt::Display for TagMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v:?}")?;
        }
        f.write_str("}")
    }
}
