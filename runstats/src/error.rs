// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Error types.

use thiserror::Error;

/// A specialized [`Result`](std::result::Result) for runstats operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced by the tag substrate and the trace propagation formats.
///
/// None of these ever fail an RPC: the handler logs them and carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A tag key name is empty, too long, or contains non-printable characters.
    #[error("invalid tag key: {0:?}")]
    InvalidTagKey(String),
    /// A tag value is too long or contains non-printable characters.
    #[error("invalid value for tag key {key}")]
    InvalidTagValue {
        /// The key the value was meant for.
        key: String,
    },
    /// The `X-Cloud-Trace-Context` value could not be parsed.
    #[error("invalid cloud trace header: {0}")]
    InvalidCloudTraceHeader(#[from] CloudTraceError),
    /// A `grpc-trace-bin` value could not be decoded.
    #[error("invalid binary span context")]
    InvalidBinaryContext,
}

/// Reasons an `X-Cloud-Trace-Context` value is rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudTraceError {
    /// The value is empty.
    #[error("header is empty")]
    Empty,
    /// The value is longer than the accepted maximum.
    #[error("header exceeds {max} bytes")]
    TooLong {
        /// Maximum accepted length in bytes.
        max: usize,
    },
    /// There is no `/` separating trace id and span id.
    #[error("missing `/` before span id")]
    MissingSpanId,
    /// The trace id is not an even-length hex string.
    #[error("trace id is not an even-length hex string")]
    InvalidTraceId,
    /// The span id is not a decimal `u64`.
    #[error("span id is not a decimal u64")]
    InvalidSpanId,
    /// The `o=` options are not a decimal integer.
    #[error("trace options are not a decimal integer")]
    InvalidOptions,
}
