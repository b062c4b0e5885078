// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! RPC lifecycle callbacks.

use crate::context::CallContext;
use faststr::FastStr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Information about a connection, passed when it is established.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ConnTagInfo {
    /// Address of the peer.
    pub remote_addr: Option<SocketAddr>,
    /// Local address of the connection.
    pub local_addr: Option<SocketAddr>,
}

impl ConnTagInfo {
    /// Creates connection info from both addresses.
    pub fn new(remote_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Self {
            remote_addr: Some(remote_addr),
            local_addr: Some(local_addr),
        }
    }
}

/// Connection events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnStats {
    /// The connection was established.
    Begin {
        /// Whether this is the client side of the connection.
        client: bool,
    },
    /// The connection was closed.
    End {
        /// Whether this is the client side of the connection.
        client: bool,
    },
}

/// Information about a call, passed when it starts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct RpcTagInfo {
    /// Full method name, formatted as `/package.Service/Method`.
    pub full_method_name: FastStr,
}

impl RpcTagInfo {
    /// Creates call info for a method.
    pub fn new(full_method_name: impl Into<FastStr>) -> Self {
        Self {
            full_method_name: full_method_name.into(),
        }
    }
}

/// Call events, in the order they occur.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RpcStats {
    /// The call started.
    Begin {
        /// Whether this is the client side of the call.
        client: bool,
    },
    /// A message was received.
    InPayload {
        /// Length of the encoded message in bytes.
        length: usize,
    },
    /// A message was sent.
    OutPayload {
        /// Length of the encoded message in bytes.
        length: usize,
    },
    /// The call finished.
    End {
        /// Whether this is the client side of the call.
        client: bool,
        /// Time the call took.
        elapsed: Duration,
        /// Error message, if the call failed.
        error: Option<FastStr>,
    },
}

/// Callbacks an RPC runtime invokes over the lifetime of connections and calls.
///
/// Implementations are shared by every concurrent call, so they must not block and must keep
/// per-call state inside the [`CallContext`] they return.
pub trait StatsHandler: Send + Sync {
    /// Attaches connection-scoped data to the context. Called once per connection.
    fn tag_conn(&self, ctx: CallContext, info: &ConnTagInfo) -> CallContext;

    /// Processes a connection event.
    fn handle_conn(&self, ctx: &CallContext, stats: &ConnStats);

    /// Attaches call-scoped data to the context. Called once when a call starts, before any
    /// [`RpcStats`] are reported for it.
    fn tag_call(&self, ctx: CallContext, info: &RpcTagInfo) -> CallContext;

    /// Processes a call event. The last event of every call is [`RpcStats::End`].
    fn handle_call(&self, ctx: &CallContext, stats: &RpcStats);
}

impl<H: StatsHandler + ?Sized> StatsHandler for Arc<H> {
    #[inline]
    fn tag_conn(&self, ctx: CallContext, info: &ConnTagInfo) -> CallContext {
        (**self).tag_conn(ctx, info)
    }
    #[inline]
    fn handle_conn(&self, ctx: &CallContext, stats: &ConnStats) {
        (**self).handle_conn(ctx, stats)
    }
    #[inline]
    fn tag_call(&self, ctx: CallContext, info: &RpcTagInfo) -> CallContext {
        (**self).tag_call(ctx, info)
    }
    #[inline]
    fn handle_call(&self, ctx: &CallContext, stats: &RpcStats) {
        (**self).handle_call(ctx, stats)
    }
}

impl<H: StatsHandler + ?Sized> StatsHandler for Box<H> {
    #[inline]
    fn tag_conn(&self, ctx: CallContext, info: &ConnTagInfo) -> CallContext {
        (**self).tag_conn(ctx, info)
    }
    #[inline]
    fn handle_conn(&self, ctx: &CallContext, stats: &ConnStats) {
        (**self).handle_conn(ctx, stats)
    }
    #[inline]
    fn tag_call(&self, ctx: CallContext, info: &RpcTagInfo) -> CallContext {
        (**self).tag_call(ctx, info)
    }
    #[inline]
    fn handle_call(&self, ctx: &CallContext, stats: &RpcStats) {
        (**self).handle_call(ctx, stats)
    }
}

/// A handler that does nothing, useful as the innermost handler of a chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl StatsHandler for NoopHandler {
    fn tag_conn(&self, ctx: CallContext, _: &ConnTagInfo) -> CallContext {
        ctx
    }
    fn handle_conn(&self, _: &CallContext, _: &ConnStats) {}
    fn tag_call(&self, ctx: CallContext, _: &RpcTagInfo) -> CallContext {
        ctx
    }
    fn handle_call(&self, _: &CallContext, _: &RpcStats) {}
}
