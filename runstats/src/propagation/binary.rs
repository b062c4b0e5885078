// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Binary span context format carried in `grpc-trace-bin`.
//!
//! Layout: version `0`, then fields each prefixed by their id:
//! `0` trace id (16 bytes), `1` span id (8 bytes), `2` trace options (1 byte).

use crate::error::{Error, Result};
use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

/// Length of an encoded span context.
pub const BINARY_LEN: usize = 29;

const VERSION: u8 = 0;
const TRACE_ID_FIELD: u8 = 0;
const SPAN_ID_FIELD: u8 = 1;
const OPTIONS_FIELD: u8 = 2;

/// Encoder and decoder for the binary span context format.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryFormat;

impl BinaryFormat {
    /// Encodes a span context. Returns `None` for an all-zero context, which has no encoding.
    pub fn to_bytes(&self, sc: &SpanContext) -> Option<[u8; BINARY_LEN]> {
        if sc.trace_id() == TraceId::INVALID && sc.span_id() == SpanId::INVALID && sc.trace_flags().to_u8() == 0 {
            return None;
        }
        let mut b = [0u8; BINARY_LEN];
        b[0] = VERSION;
        b[1] = TRACE_ID_FIELD;
        b[2..18].copy_from_slice(&sc.trace_id().to_bytes());
        b[18] = SPAN_ID_FIELD;
        b[19..27].copy_from_slice(&sc.span_id().to_bytes());
        b[27] = OPTIONS_FIELD;
        b[28] = sc.trace_flags().to_u8();
        Some(b)
    }

    /// Decodes a remote span context.
    ///
    /// The trace id field is required; span id and options may be missing but must keep
    /// their order when present.
    pub fn from_bytes(&self, b: &[u8]) -> Result<SpanContext> {
        let Some((&VERSION, mut b)) = b.split_first() else {
            return Err(Error::InvalidBinaryContext);
        };

        let mut trace_id = [0u8; 16];
        match b {
            [TRACE_ID_FIELD, rest @ ..] if rest.len() >= 16 => {
                trace_id.copy_from_slice(&rest[..16]);
                b = &rest[16..];
            },
            _ => return Err(Error::InvalidBinaryContext),
        }

        let mut span_id = [0u8; 8];
        if let [SPAN_ID_FIELD, rest @ ..] = b {
            if rest.len() >= 8 {
                span_id.copy_from_slice(&rest[..8]);
                b = &rest[8..];
            }
        }

        let flags = match b {
            [OPTIONS_FIELD, options, ..] => *options,
            _ => 0,
        };

        Ok(SpanContext::new(
            TraceId::from_bytes(trace_id),
            SpanId::from_bytes(span_id),
            TraceFlags::new(flags),
            true,
            TraceState::default(),
        ))
    }
}
