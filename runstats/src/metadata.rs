// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Incoming request metadata.

use bytes::Bytes;
use faststr::FastStr;
use opentelemetry::propagation::Extractor;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A single metadata value.
///
/// Keys ending in `-bin` carry binary values by gRPC convention, every other key carries ASCII text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MetadataValue {
    /// ASCII text value.
    Ascii(FastStr),
    /// Binary value.
    Binary(Bytes),
}

impl MetadataValue {
    /// Returns the text value, or `None` for a binary value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Ascii(s) => Some(s.as_str()),
            MetadataValue::Binary(_) => None,
        }
    }

    /// Returns the raw bytes of the value.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MetadataValue::Ascii(s) => s.as_bytes(),
            MetadataValue::Binary(b) => &b[..],
        }
    }

    /// Whether this is a binary value.
    pub fn is_binary(&self) -> bool {
        matches!(self, MetadataValue::Binary(_))
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Ascii(FastStr::new(value))
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Ascii(FastStr::from(value))
    }
}

impl From<FastStr> for MetadataValue {
    fn from(value: FastStr) -> Self {
        MetadataValue::Ascii(value)
    }
}

impl From<Bytes> for MetadataValue {
    fn from(value: Bytes) -> Self {
        MetadataValue::Binary(value)
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(value: Vec<u8>) -> Self {
        MetadataValue::Binary(Bytes::from(value))
    }
}

/// Header map of one incoming call.
///
/// Keys are case-insensitive (stored lower-cased) and may carry several values.
/// Cloning is cheap; the entries are shared until one of the clones is modified,
/// at which point that clone gets its own copy. A `Metadata` observed through one
/// [`CallContext`](crate::CallContext) therefore never changes underneath it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Arc<BTreeMap<String, Vec<MetadataValue>>>,
}

fn normalize(key: &str) -> Cow<'_, str> {
    if key.bytes().any(|b| b.is_ascii_uppercase()) {
        Cow::Owned(key.to_ascii_lowercase())
    } else {
        Cow::Borrowed(key)
    }
}

impl Metadata {
    /// Creates an empty metadata map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the first value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.get_all(key).first()
    }

    /// Returns all values stored under `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> &[MetadataValue] {
        self.entries.get(&*normalize(key)).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether at least one value is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        !self.get_all(key).is_empty()
    }

    /// Adds a value under `key`, keeping the existing ones.
    pub fn append(&mut self, key: &str, value: impl Into<MetadataValue>) {
        let key = normalize(key).into_owned();
        Arc::make_mut(&mut self.entries).entry(key).or_default().push(value.into());
    }

    /// Replaces all values under `key` with `value`.
    pub fn set(&mut self, key: &str, value: impl Into<MetadataValue>) {
        let key = normalize(key).into_owned();
        Arc::make_mut(&mut self.entries).insert(key, vec![value.into()]);
    }

    /// Removes `key` and returns its values.
    pub fn remove(&mut self, key: &str) -> Option<Vec<MetadataValue>> {
        if !self.entries.contains_key(&*normalize(key)) {
            return None;
        }
        Arc::make_mut(&mut self.entries).remove(&*normalize(key))
    }

    /// Iterates over keys and their values, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[MetadataValue])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: AsRef<str>,
    V: Into<MetadataValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut md = Metadata::new();
        for (k, v) in iter {
            md.append(k.as_ref(), v);
        }
        md
    }
}

impl Extractor for Metadata {
    fn get(&self, key: &str) -> Option<&str> {
        Metadata::get(self, key).and_then(MetadataValue::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}
