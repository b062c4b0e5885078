// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::trace::Config;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use runstats::propagation::{BinaryFormat, CloudTraceFormat, BINARY_HEADER};
use runstats::{CallContext, ConnStats, ConnTagInfo, RpcStats, RpcTagInfo, StatsHandler};
use tracing::{info, info_span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Init tracing: fmt logs filtered by `RUST_LOG`, plus spans exported over OTLP.
pub fn init_tracing(service_name: &'static str) -> anyhow::Result<()> {
    global::set_text_map_propagator(CloudTraceFormat);

    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic())
        .with_trace_config(Config::default().with_resource(Resource::new([KeyValue::new(SERVICE_NAME, service_name)])))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    Ok(())
}

/// Stands in for the metrics/tracing handler of an RPC framework: it continues the trace
/// carried in `grpc-trace-bin` and logs every event with the call's tags.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHandler;

impl StatsHandler for LoggingHandler {
    fn tag_conn(&self, ctx: CallContext, info: &ConnTagInfo) -> CallContext {
        info!(remote = ?info.remote_addr, local = ?info.local_addr, "connection tagged");
        ctx
    }

    fn handle_conn(&self, _: &CallContext, stats: &ConnStats) {
        info!(?stats, "connection event");
    }

    fn tag_call(&self, ctx: CallContext, info: &RpcTagInfo) -> CallContext {
        let span = info_span!("rpc.server", method = %info.full_method_name);
        let parent = ctx.incoming_metadata().and_then(|md| md.get(BINARY_HEADER)).map(|v| BinaryFormat.from_bytes(v.as_bytes()));
        match parent {
            Some(Ok(sc)) => span.set_parent(opentelemetry::Context::new().with_remote_span_context(sc)),
            Some(Err(err)) => warn!("dropping {BINARY_HEADER}: {err}"),
            None => {},
        }
        span.in_scope(|| match ctx.tags() {
            Some(tags) => info!("call tagged with {tags}"),
            None => info!("call has no tags"),
        });
        ctx
    }

    fn handle_call(&self, ctx: &CallContext, stats: &RpcStats) {
        let attributes = ctx.tags().map(|tags| tags.to_attributes()).unwrap_or_default();
        match stats {
            RpcStats::End { elapsed, error: Some(error), .. } => warn!(?elapsed, ?attributes, "call failed: {error}"),
            RpcStats::End { elapsed, .. } => info!(?elapsed, ?attributes, "call completed"),
            other => info!(stats = ?other, "call event"),
        }
    }
}
