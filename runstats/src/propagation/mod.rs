// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Span context propagation formats.
//!
//! Two formats meet in the handler: the text header Google Cloud adds to incoming requests
//! ([`CloudTraceFormat`]) and the binary header the gRPC tracing layer reads ([`BinaryFormat`]).

mod binary;
mod cloud;

pub use binary::{BinaryFormat, BINARY_LEN};
pub use cloud::{CloudTraceFormat, MAX_HEADER_LEN};

/// Metadata key where Google Cloud puts the incoming trace context.
pub const CLOUD_TRACE_HEADER: &str = "X-Cloud-Trace-Context";

/// Metadata key where gRPC expects the binary trace context.
pub const BINARY_HEADER: &str = "grpc-trace-bin";
