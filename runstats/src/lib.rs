// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! runstats decorates a gRPC stats handler for Google Cloud Run.
//!
//! The [`CloudRunHandler`] wraps any [`StatsHandler`] and, for every call:
//! 1. translates the Google Cloud `X-Cloud-Trace-Context` header into the binary
//!    `grpc-trace-bin` header expected by the tracing layer;
//! 2. adds the Cloud Run revision (and optionally location) name to the call's
//!    [`TagMap`], so that metrics recorded for the call can be grouped by deployment.
//!
//! ```
//! use runstats::{CallContext, CloudRunHandler, Config, Metadata, NoopHandler, RpcTagInfo, StatsHandler};
//!
//! let handler = CloudRunHandler::with_config(NoopHandler, Config::new("hello-00042-abc").with_location("europe-west1"));
//! let md: Metadata = [("X-Cloud-Trace-Context", "105445aa7843bc8bf206b12000100000/1;o=1")].into_iter().collect();
//! let ctx = handler.tag_call(CallContext::new().with_incoming_metadata(md), &RpcTagInfo::new("/hello.World/Hello"));
//! assert!(ctx.incoming_metadata().unwrap().contains_key(runstats::propagation::BINARY_HEADER));
//! assert_eq!(ctx.tags().unwrap().get(&runstats::KEY_REVISION_NAME), Some("hello-00042-abc"));
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod context;
pub mod error;
pub mod handler;
pub mod metadata;
pub mod propagation;
pub mod stats;
pub mod tag;
pub mod view;

pub use crate::context::CallContext;
pub use crate::error::{Error, Result};
pub use crate::handler::{translate_cloud_trace_header, CloudRunHandler, Config, LogTags, Precedence, TagInspector, TagPhase};
pub use crate::metadata::{Metadata, MetadataValue};
pub use crate::stats::{ConnStats, ConnTagInfo, NoopHandler, RpcStats, RpcTagInfo, StatsHandler};
pub use crate::tag::{Mutator, TagKey, TagMap, KEY_LOCATION_NAME, KEY_REVISION_NAME};
pub use crate::view::{add_tag_keys_to_views, View};
