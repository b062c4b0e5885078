// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Per-call context.

use crate::metadata::Metadata;
use crate::tag::TagMap;

/// Data threaded through the callbacks of one call.
///
/// A context is never changed in place: every `with_*` method returns a new context and
/// leaves the one it was called on as it was.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct CallContext {
    incoming: Option<Metadata>,
    tags: Option<TagMap>,
}

impl CallContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata received with the call, if the runtime attached any.
    #[inline]
    pub fn incoming_metadata(&self) -> Option<&Metadata> {
        self.incoming.as_ref()
    }

    /// Returns a context carrying `md` as its incoming metadata.
    pub fn with_incoming_metadata(&self, md: Metadata) -> Self {
        Self {
            incoming: Some(md),
            tags: self.tags.clone(),
        }
    }

    /// Metric tags of the call, if any were set.
    #[inline]
    pub fn tags(&self) -> Option<&TagMap> {
        self.tags.as_ref()
    }

    /// Returns a context carrying `tags` as its metric tags.
    pub fn with_tags(&self, tags: TagMap) -> Self {
        Self {
            incoming: self.incoming.clone(),
            tags: Some(tags),
        }
    }
}
