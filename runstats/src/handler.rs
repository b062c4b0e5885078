// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Cloud Run stats handler decorator.

use crate::context::CallContext;
use crate::propagation::{BinaryFormat, CloudTraceFormat, BINARY_HEADER, CLOUD_TRACE_HEADER};
use crate::stats::{ConnStats, ConnTagInfo, RpcStats, RpcTagInfo, StatsHandler};
use crate::tag::{Mutator, TagKey, TagMap, KEY_LOCATION_NAME, KEY_REVISION_NAME};
use crate::view::{self, View};
use bytes::Bytes;
use faststr::FastStr;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Decides who has the last word on the deployment tags when the wrapped handler writes
/// the same keys.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Precedence {
    /// Tags are added before delegating, so a wrapped handler that upserts the same keys
    /// overwrites them.
    #[default]
    WrappedHandlerWins,
    /// Tags are added after delegating, so the configured values are always the final ones.
    DecoratorWins,
}

/// When a [`TagInspector`] is invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagPhase {
    /// Before the deployment tags are added.
    BeforeInjection,
    /// After the deployment tags are added.
    AfterInjection,
}

/// Diagnostic hook that observes the tag set of each call around tag injection.
///
/// It only ever sees tags, never header values.
pub trait TagInspector: Send + Sync {
    /// Observes `tags` of the call described by `info`.
    fn inspect(&self, phase: TagPhase, info: &RpcTagInfo, tags: Option<&TagMap>);
}

impl<T: TagInspector + ?Sized> TagInspector for Arc<T> {
    fn inspect(&self, phase: TagPhase, info: &RpcTagInfo, tags: Option<&TagMap>) {
        (**self).inspect(phase, info, tags)
    }
}

/// A [`TagInspector`] that logs the tag set at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTags;

impl TagInspector for LogTags {
    fn inspect(&self, phase: TagPhase, info: &RpcTagInfo, tags: Option<&TagMap>) {
        match tags {
            Some(tags) => debug!(method = %info.full_method_name, ?phase, "[RUNSTATS] tags: {tags}"),
            None => debug!(method = %info.full_method_name, ?phase, "[RUNSTATS] tags: none"),
        }
    }
}

/// Cloud Run handler config.
#[derive(Clone)]
#[non_exhaustive]
pub struct Config {
    /// Cloud Run revision name, written under [`KEY_REVISION_NAME`].
    pub(crate) revision_name: FastStr,
    /// Cloud Run location name, written under [`KEY_LOCATION_NAME`] when set.
    pub(crate) location_name: Option<FastStr>,
    /// Ordering of tag injection and delegation.
    pub(crate) precedence: Precedence,
    /// Optional diagnostic hook, disabled by default.
    pub(crate) inspector: Option<Arc<dyn TagInspector>>,
}

impl Config {
    /// Create a new config for a revision. Empty names are accepted and written as empty tag values.
    pub fn new(revision_name: impl Into<FastStr>) -> Self {
        Self {
            revision_name: revision_name.into(),
            location_name: None,
            precedence: Default::default(),
            inspector: None,
        }
    }
    /// Revision name.
    pub fn revision_name(&self) -> &str {
        &self.revision_name
    }
    /// Set the location name. Without one, no location tag is written.
    pub fn with_location(mut self, location_name: impl Into<FastStr>) -> Self {
        self.location_name = Some(location_name.into());
        self
    }
    /// Location name.
    pub fn location_name(&self) -> Option<&str> {
        self.location_name.as_deref()
    }
    /// Set the ordering of tag injection and delegation, default is [`Precedence::WrappedHandlerWins`].
    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }
    /// Ordering of tag injection and delegation.
    pub fn precedence(&self) -> Precedence {
        self.precedence
    }
    /// Set a diagnostic hook called before and after tag injection.
    pub fn with_inspector(mut self, inspector: impl TagInspector + 'static) -> Self {
        self.inspector = Some(Arc::new(inspector));
        self
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("revision_name", &self.revision_name)
            .field("location_name", &self.location_name)
            .field("precedence", &self.precedence)
            .field("inspector", &self.inspector.is_some())
            .finish()
    }
}

/// A [`StatsHandler`] that wraps another one for Google Cloud Run.
///
/// When a call starts it:
/// 1. translates the `X-Cloud-Trace-Context` header into `grpc-trace-bin`
///    (see [`translate_cloud_trace_header`]);
/// 2. upserts the revision and location names into the call's [`TagMap`];
/// 3. delegates to the wrapped handler.
///
/// Steps 2 and 3 swap under [`Precedence::DecoratorWins`]. The connection callbacks and
/// call events are passed through untouched.
#[derive(Clone, Debug)]
pub struct CloudRunHandler<H> {
    inner: H,
    config: Config,
}

impl<H: StatsHandler> CloudRunHandler<H> {
    /// Wraps `inner`, tagging calls with `revision_name` only.
    pub fn new(inner: H, revision_name: impl Into<FastStr>) -> Self {
        Self::with_config(inner, Config::new(revision_name))
    }

    /// Wraps `inner` with a full config.
    pub fn with_config(inner: H, config: Config) -> Self {
        Self { inner, config }
    }

    /// The handler config.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The wrapped handler.
    #[inline]
    pub fn get_ref(&self) -> &H {
        &self.inner
    }

    /// The tag keys this handler writes.
    pub fn tag_keys(&self) -> Vec<&'static TagKey> {
        if self.config.location_name.is_some() {
            vec![&KEY_REVISION_NAME, &KEY_LOCATION_NAME]
        } else {
            vec![&KEY_REVISION_NAME]
        }
    }

    /// Adds the keys this handler writes to every view, before the views are registered with
    /// the metrics backend. Keys a view already has are not added again.
    pub fn add_tag_keys_to_views(&self, views: &mut [View]) {
        view::add_tag_keys_to_views(views, &self.tag_keys());
    }

    /// Upserts the deployment tags into the context's tag map.
    ///
    /// If the tag map rejects a value, the failure is logged and `ctx` is returned as is.
    pub fn add_metric_tags(&self, ctx: CallContext, info: &RpcTagInfo) -> CallContext {
        if let Some(inspector) = &self.config.inspector {
            inspector.inspect(TagPhase::BeforeInjection, info, ctx.tags());
        }

        let mut mutators = Vec::with_capacity(2);
        mutators.push(Mutator::upsert(&KEY_REVISION_NAME, self.config.revision_name.clone()));
        if let Some(location_name) = &self.config.location_name {
            mutators.push(Mutator::upsert(&KEY_LOCATION_NAME, location_name.clone()));
        }
        let result = match ctx.tags() {
            Some(tags) => tags.apply(&mutators),
            None => TagMap::new().apply(&mutators),
        };
        let ctx = match result {
            Ok(tags) => ctx.with_tags(tags),
            Err(err) => {
                warn!(method = %info.full_method_name, "[RUNSTATS] add_metric_tags: error adding tags: {err}");
                ctx
            },
        };

        if let Some(inspector) = &self.config.inspector {
            inspector.inspect(TagPhase::AfterInjection, info, ctx.tags());
        }
        ctx
    }
}

impl<H: StatsHandler> StatsHandler for CloudRunHandler<H> {
    fn tag_conn(&self, ctx: CallContext, info: &ConnTagInfo) -> CallContext {
        self.inner.tag_conn(ctx, info)
    }

    fn handle_conn(&self, ctx: &CallContext, stats: &ConnStats) {
        self.inner.handle_conn(ctx, stats)
    }

    fn tag_call(&self, ctx: CallContext, info: &RpcTagInfo) -> CallContext {
        // The wrapped handler may read the trace header to tag the call, so translate first.
        let ctx = translate_cloud_trace_header(ctx);
        match self.config.precedence {
            Precedence::WrappedHandlerWins => {
                let ctx = self.add_metric_tags(ctx, info);
                self.inner.tag_call(ctx, info)
            },
            Precedence::DecoratorWins => {
                let ctx = self.inner.tag_call(ctx, info);
                self.add_metric_tags(ctx, info)
            },
        }
    }

    fn handle_call(&self, ctx: &CallContext, stats: &RpcStats) {
        self.inner.handle_call(ctx, stats)
    }
}

/// Puts the span context from the incoming `X-Cloud-Trace-Context` header into the
/// `grpc-trace-bin` header.
///
/// The context is returned unchanged when it has no incoming metadata or no cloud trace
/// header, when `grpc-trace-bin` is already present (an upstream hop propagated the trace),
/// or when the header does not parse. Only the first cloud trace value is used. The metadata
/// is copied, never modified in place.
pub fn translate_cloud_trace_header(ctx: CallContext) -> CallContext {
    let Some(md) = ctx.incoming_metadata() else {
        return ctx;
    };
    if md.contains_key(BINARY_HEADER) {
        return ctx;
    }
    let Some(value) = md.get(CLOUD_TRACE_HEADER) else {
        return ctx;
    };
    let Some(value) = value.as_str() else {
        trace!("[RUNSTATS] ignoring binary {CLOUD_TRACE_HEADER} value");
        return ctx;
    };
    let sc = match CloudTraceFormat.span_context_from_header(value) {
        Ok(sc) => sc,
        Err(err) => {
            trace!("[RUNSTATS] ignoring {CLOUD_TRACE_HEADER}: {err}");
            return ctx;
        },
    };
    let Some(bin) = BinaryFormat.to_bytes(&sc) else {
        return ctx;
    };

    let mut md = md.clone();
    md.set(BINARY_HEADER, Bytes::copy_from_slice(&bin));
    ctx.with_incoming_metadata(md)
}
