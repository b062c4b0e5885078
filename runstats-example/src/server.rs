// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::{Parser, ValueEnum};
use runstats::propagation::CLOUD_TRACE_HEADER;
use runstats::{
    CallContext, CloudRunHandler, Config, ConnStats, ConnTagInfo, LogTags, Metadata, Precedence, RpcStats, RpcTagInfo, StatsHandler, View,
};
use service::{init_tracing, LoggingHandler};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PrecedenceArg {
    /// The wrapped handler may overwrite the deployment tags.
    Wrapped,
    /// The deployment tags are always the final ones.
    Decorator,
}

impl From<PrecedenceArg> for Precedence {
    fn from(value: PrecedenceArg) -> Self {
        match value {
            PrecedenceArg::Wrapped => Precedence::WrappedHandlerWins,
            PrecedenceArg::Decorator => Precedence::DecoratorWins,
        }
    }
}

#[derive(Parser)]
struct Flags {
    /// Cloud Run revision name.
    #[clap(long, env = "K_REVISION", default_value = "local")]
    revision: String,
    /// Cloud Run location name.
    #[clap(long, env = "CLOUD_RUN_LOCATION")]
    location: Option<String>,
    /// Which writer wins on the deployment tags.
    #[clap(long, value_enum, default_value = "wrapped")]
    precedence: PrecedenceArg,
    /// X-Cloud-Trace-Context value attached to the simulated calls.
    #[clap(long, default_value = "105445aa7843bc8bf206b120001000/000000001;o=1")]
    trace_header: String,
    /// Number of concurrent simulated calls.
    #[clap(long, default_value_t = 3)]
    calls: usize,
    /// Log the tag set of every call before and after injection.
    #[clap(long)]
    log_tags: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing("Runstats Example Server")?;

    let mut config = Config::new(flags.revision).with_precedence(flags.precedence.into());
    if let Some(location) = flags.location {
        config = config.with_location(location);
    }
    if flags.log_tags {
        config = config.with_inspector(LogTags);
    }
    let handler = Arc::new(CloudRunHandler::with_config(LoggingHandler, config));
    tracing::info!(config = ?handler.config(), "handler configured");

    let mut views = vec![
        View::new("grpc.io/server/server_latency", "Distribution of server latency in milliseconds"),
        View::new("grpc.io/server/completed_rpcs", "Count of RPCs by method and status"),
    ];
    handler.add_tag_keys_to_views(&mut views);
    for view in &views {
        let keys: Vec<_> = view.tag_keys.iter().map(|k| k.name()).collect();
        tracing::info!(view = %view.name, ?keys, "view registered");
    }

    let remote: SocketAddr = "[::1]:50000".parse()?;
    let local: SocketAddr = "[::1]:8080".parse()?;
    let conn = handler.tag_conn(CallContext::new(), &ConnTagInfo::new(remote, local));
    handler.handle_conn(&conn, &ConnStats::Begin { client: false });

    let calls = (0..flags.calls).map(|i| {
        let handler = handler.clone();
        let md: Metadata = [(CLOUD_TRACE_HEADER, flags.trace_header.as_str()), ("user-agent", "grpc-rust")].into_iter().collect();
        let ctx = conn.with_incoming_metadata(md);
        tokio::spawn(async move {
            let start = Instant::now();
            let ctx = handler.tag_call(ctx, &RpcTagInfo::new("/helloworld.Greeter/SayHello"));
            handler.handle_call(&ctx, &RpcStats::Begin { client: false });
            handler.handle_call(&ctx, &RpcStats::InPayload { length: 12 });
            sleep(Duration::from_millis(5 * i as u64)).await;
            handler.handle_call(&ctx, &RpcStats::OutPayload { length: 24 });
            handler.handle_call(
                &ctx,
                &RpcStats::End {
                    client: false,
                    elapsed: start.elapsed(),
                    error: None,
                },
            );
        })
    });
    futures::future::try_join_all(calls).await?;

    handler.handle_conn(&conn, &ConnStats::End { client: false });

    // Let the background span processor finish.
    sleep(Duration::from_micros(10)).await;
    opentelemetry::global::shutdown_tracer_provider();

    Ok(())
}
