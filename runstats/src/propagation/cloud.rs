// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! `X-Cloud-Trace-Context` header format.
//!
//! The value looks like `TRACE_ID/SPAN_ID;o=OPTIONS`, where `TRACE_ID` is hex, `SPAN_ID` is
//! decimal and the options part is optional. See <https://cloud.google.com/trace/docs/trace-context>.

use super::CLOUD_TRACE_HEADER;
use crate::error::{CloudTraceError, Result};
use opentelemetry::propagation::text_map_propagator::FieldIter;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::Context;
use std::sync::LazyLock;

/// Longest header value that is parsed. Anything larger is rejected without copying it.
pub const MAX_HEADER_LEN: usize = 200;

static FIELDS: LazyLock<[String; 1]> = LazyLock::new(|| [CLOUD_TRACE_HEADER.to_ascii_lowercase()]);

/// Parser and formatter for the Google Cloud trace header.
#[derive(Clone, Copy, Debug, Default)]
pub struct CloudTraceFormat;

impl CloudTraceFormat {
    /// Parses a header value into a remote span context.
    ///
    /// A trace id shorter than 32 hex characters fills the leading bytes of the id, a longer
    /// one is truncated to its first 16 bytes. Text after `;` that does not start with `o=` is
    /// ignored.
    pub fn span_context_from_header(&self, value: &str) -> Result<SpanContext> {
        if value.is_empty() {
            return Err(CloudTraceError::Empty.into());
        }
        if value.len() > MAX_HEADER_LEN {
            return Err(CloudTraceError::TooLong { max: MAX_HEADER_LEN }.into());
        }
        let (tid, rest) = value.split_once('/').ok_or(CloudTraceError::MissingSpanId)?;
        let trace_id = decode_trace_id(tid).ok_or(CloudTraceError::InvalidTraceId)?;

        let (sid, options) = match rest.split_once(';') {
            Some((sid, options)) => (sid, Some(options)),
            None => (rest, None),
        };
        let span_id = parse_decimal(sid).ok_or(CloudTraceError::InvalidSpanId)?;

        let flags = match options.and_then(|o| o.strip_prefix("o=")) {
            Some(o) => parse_decimal(o).ok_or(CloudTraceError::InvalidOptions)? as u8,
            None => 0,
        };

        Ok(SpanContext::new(
            TraceId::from_bytes(trace_id),
            SpanId::from_bytes(span_id.to_be_bytes()),
            TraceFlags::new(flags),
            true,
            TraceState::default(),
        ))
    }

    /// Formats a span context as a header value.
    pub fn header_value(&self, sc: &SpanContext) -> String {
        format!(
            "{:032x}/{};o={}",
            u128::from_be_bytes(sc.trace_id().to_bytes()),
            u64::from_be_bytes(sc.span_id().to_bytes()),
            sc.trace_flags().to_u8()
        )
    }
}

fn decode_trace_id(s: &str) -> Option<[u8; 16]> {
    if s.len() % 2 != 0 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut id = [0u8; 16];
    for (i, pair) in s.as_bytes().chunks(2).take(id.len()).enumerate() {
        // both bytes are ASCII hex digits, so the slice is valid UTF-8
        let pair = std::str::from_utf8(pair).ok()?;
        id[i] = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(id)
}

fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl TextMapPropagator for CloudTraceFormat {
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        let span = cx.span();
        let sc = span.span_context();
        if sc.is_valid() {
            injector.set(&FIELDS[0], self.header_value(sc));
        }
    }

    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context {
        extractor
            .get(&FIELDS[0])
            .and_then(|value| self.span_context_from_header(value).ok())
            .filter(SpanContext::is_valid)
            .map(|sc| cx.with_remote_span_context(sc))
            .unwrap_or_else(|| cx.clone())
    }

    fn fields(&self) -> FieldIter<'_> {
        FieldIter::new(FIELDS.as_slice())
    }
}
