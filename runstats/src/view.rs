// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Metric view definitions.

use crate::tag::TagKey;
use faststr::FastStr;

/// A view tells the metrics backend which tag keys to group a measure by.
///
/// Only the grouping keys matter here; measures and aggregations belong to the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct View {
    /// Unique name of the view.
    pub name: FastStr,
    /// Human readable description.
    pub description: FastStr,
    /// Keys the recorded measurements are grouped by.
    pub tag_keys: Vec<TagKey>,
}

impl View {
    /// Creates a view without grouping keys.
    pub fn new(name: impl Into<FastStr>, description: impl Into<FastStr>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            tag_keys: Vec::new(),
        }
    }

    /// Appends the keys this view does not group by yet.
    pub fn add_tag_keys(&mut self, keys: &[&TagKey]) {
        for &key in keys {
            if !self.tag_keys.contains(key) {
                self.tag_keys.push(key.clone());
            }
        }
    }
}

/// Adds `keys` to every view, before the views are registered with the metrics backend.
/// Calling it again on the same views adds nothing.
///
/// Use [`CloudRunHandler::add_tag_keys_to_views`](crate::CloudRunHandler::add_tag_keys_to_views)
/// to add exactly the keys a handler writes.
pub fn add_tag_keys_to_views(views: &mut [View], keys: &[&TagKey]) {
    for view in views {
        view.add_tag_keys(keys);
    }
}
