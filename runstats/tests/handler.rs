use runstats::propagation::{BinaryFormat, BINARY_HEADER, CLOUD_TRACE_HEADER};
use runstats::{
    CallContext, CloudRunHandler, Config, ConnStats, ConnTagInfo, Metadata, Mutator, NoopHandler, Precedence, RpcStats, RpcTagInfo, StatsHandler,
    TagInspector, TagMap, TagPhase, View, KEY_LOCATION_NAME, KEY_REVISION_NAME,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HEADER: &str = "105445aa7843bc8bf206b120001000/000000001;o=1";

#[derive(Debug, Clone, PartialEq)]
enum Event {
    TagConn(CallContext, ConnTagInfo),
    HandleConn(CallContext, ConnStats),
    TagCall(CallContext, RpcTagInfo),
    HandleCall(CallContext, RpcStats),
}

/// Records every callback and optionally writes its own revision tag.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
    revision_override: Option<&'static str>,
}

impl Recorder {
    fn overriding(revision: &'static str) -> Self {
        Self {
            events: Default::default(),
            revision_override: Some(revision),
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl StatsHandler for Recorder {
    fn tag_conn(&self, ctx: CallContext, info: &ConnTagInfo) -> CallContext {
        self.events.lock().unwrap().push(Event::TagConn(ctx.clone(), info.clone()));
        ctx
    }

    fn handle_conn(&self, ctx: &CallContext, stats: &ConnStats) {
        self.events.lock().unwrap().push(Event::HandleConn(ctx.clone(), stats.clone()));
    }

    fn tag_call(&self, ctx: CallContext, info: &RpcTagInfo) -> CallContext {
        self.events.lock().unwrap().push(Event::TagCall(ctx.clone(), info.clone()));
        match self.revision_override {
            Some(revision) => {
                let tags = ctx.tags().cloned().unwrap_or_default();
                ctx.with_tags(tags.apply(&[Mutator::upsert(&KEY_REVISION_NAME, revision)]).unwrap())
            },
            None => ctx,
        }
    }

    fn handle_call(&self, ctx: &CallContext, stats: &RpcStats) {
        self.events.lock().unwrap().push(Event::HandleCall(ctx.clone(), stats.clone()));
    }
}

fn incoming(pairs: &[(&str, &str)]) -> CallContext {
    CallContext::new().with_incoming_metadata(pairs.iter().copied().collect::<Metadata>())
}

fn info() -> RpcTagInfo {
    RpcTagInfo::new("/helloworld.Greeter/SayHello")
}

#[test]
fn wrapped_handler_sees_translated_and_tagged_context() {
    let handler = CloudRunHandler::with_config(Recorder::default(), Config::new("hello-00001-abc").with_location("us-central1"));
    let out = handler.tag_call(incoming(&[(CLOUD_TRACE_HEADER, HEADER)]), &info());

    let events = handler.get_ref().events();
    assert_eq!(events.len(), 1);
    let Event::TagCall(seen, seen_info) = &events[0] else {
        panic!("unexpected event: {:?}", events[0]);
    };
    assert_eq!(seen_info, &info());
    assert_eq!(seen, &out);

    let md = seen.incoming_metadata().unwrap();
    let sc = BinaryFormat.from_bytes(md.get(BINARY_HEADER).unwrap().as_bytes()).unwrap();
    assert_eq!(u64::from_be_bytes(sc.span_id().to_bytes()), 1);
    assert_eq!(&sc.trace_id().to_bytes()[..15], &[0x10, 0x54, 0x45, 0xaa, 0x78, 0x43, 0xbc, 0x8b, 0xf2, 0x06, 0xb1, 0x20, 0x00, 0x10, 0x00]);

    let tags = seen.tags().unwrap();
    assert_eq!(tags.get(&KEY_REVISION_NAME), Some("hello-00001-abc"));
    assert_eq!(tags.get(&KEY_LOCATION_NAME), Some("us-central1"));
}

#[test]
fn wrapped_handler_wins_by_default() {
    let handler = CloudRunHandler::new(Recorder::overriding("inner"), "outer");
    let out = handler.tag_call(CallContext::new(), &info());
    assert_eq!(out.tags().unwrap().get(&KEY_REVISION_NAME), Some("inner"));
}

#[test]
fn decorator_wins_when_configured() {
    let handler = CloudRunHandler::with_config(Recorder::overriding("inner"), Config::new("outer").with_precedence(Precedence::DecoratorWins));
    let out = handler.tag_call(incoming(&[(CLOUD_TRACE_HEADER, HEADER)]), &info());
    assert_eq!(out.tags().unwrap().get(&KEY_REVISION_NAME), Some("outer"));

    // the wrapped handler still gets the translated header, only the tags come later
    let events = handler.get_ref().events();
    let Event::TagCall(seen, _) = &events[0] else {
        panic!("unexpected event: {:?}", events[0]);
    };
    assert!(seen.incoming_metadata().unwrap().contains_key(BINARY_HEADER));
    assert_eq!(seen.tags(), None);
}

#[test]
fn existing_tag_values_are_overwritten() {
    let handler = CloudRunHandler::with_config(Recorder::default(), Config::new("new-rev").with_location("europe-west1"));
    let before = TagMap::new()
        .apply(&[Mutator::upsert(&KEY_REVISION_NAME, "old-rev"), Mutator::upsert(&KEY_LOCATION_NAME, "asia-east1")])
        .unwrap();
    let out = handler.tag_call(CallContext::new().with_tags(before), &info());
    let tags = out.tags().unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags.get(&KEY_REVISION_NAME), Some("new-rev"));
    assert_eq!(tags.get(&KEY_LOCATION_NAME), Some("europe-west1"));
}

#[test]
fn empty_identity_is_written_as_empty_values() {
    let handler = CloudRunHandler::with_config(Recorder::default(), Config::new("").with_location(""));
    let out = handler.tag_call(CallContext::new(), &info());
    assert_eq!(out.tags().unwrap().get(&KEY_REVISION_NAME), Some(""));
    assert_eq!(out.tags().unwrap().get(&KEY_LOCATION_NAME), Some(""));
}

#[test]
fn malformed_header_does_not_block_the_call() {
    let handler = CloudRunHandler::new(Recorder::default(), "rev");
    let ctx = incoming(&[(CLOUD_TRACE_HEADER, "not-a-valid-trace-context")]);
    let out = handler.tag_call(ctx.clone(), &info());
    assert_eq!(out.incoming_metadata(), ctx.incoming_metadata());
    assert_eq!(out.tags().unwrap().get(&KEY_REVISION_NAME), Some("rev"));
    assert_eq!(handler.get_ref().events().len(), 1);
}

#[test]
fn rejected_tag_value_still_delegates_once() {
    let handler = CloudRunHandler::with_config(Recorder::default(), Config::new("bad\nrevision").with_location("us-central1"));
    let before = TagMap::new().apply(&[Mutator::upsert(&KEY_REVISION_NAME, "old-rev")]).unwrap();
    let ctx = incoming(&[(CLOUD_TRACE_HEADER, HEADER)]).with_tags(before.clone());

    let out = handler.tag_call(ctx, &info());
    assert_eq!(out.tags(), Some(&before));
    assert!(out.incoming_metadata().unwrap().contains_key(BINARY_HEADER));

    let events = handler.get_ref().events();
    assert_eq!(events.len(), 1);
    let Event::TagCall(seen, _) = &events[0] else {
        panic!("unexpected event: {:?}", events[0]);
    };
    assert_eq!(seen, &out);
}

#[test]
fn views_get_only_the_keys_the_handler_writes() {
    let handler = CloudRunHandler::new(NoopHandler, "rev");
    assert_eq!(handler.config().location_name(), None);

    let mut views = vec![View::new("grpc.io/server/server_latency", "latency")];
    handler.add_tag_keys_to_views(&mut views);
    assert_eq!(views[0].tag_keys, vec![KEY_REVISION_NAME.clone()]);

    let out = handler.tag_call(CallContext::new(), &info());
    assert_eq!(out.tags().unwrap().get(&KEY_LOCATION_NAME), None);

    let handler = CloudRunHandler::with_config(NoopHandler, Config::new("rev").with_location("us-central1"));
    handler.add_tag_keys_to_views(&mut views);
    assert_eq!(views[0].tag_keys, vec![KEY_REVISION_NAME.clone(), KEY_LOCATION_NAME.clone()]);
}

#[test]
fn connection_and_call_events_pass_through() {
    let handler = CloudRunHandler::with_config(Recorder::default(), Config::new("rev").with_location("us-central1"));
    let ctx = incoming(&[(CLOUD_TRACE_HEADER, HEADER)]);
    let conn = ConnTagInfo::new("10.0.0.1:5000".parse().unwrap(), "10.0.0.2:8080".parse().unwrap());
    let end = RpcStats::End {
        client: false,
        elapsed: Duration::from_millis(3),
        error: None,
    };

    let tagged = handler.tag_conn(ctx.clone(), &conn);
    handler.handle_conn(&ctx, &ConnStats::Begin { client: false });
    handler.handle_call(&ctx, &end);
    handler.handle_conn(&ctx, &ConnStats::End { client: false });

    assert_eq!(tagged, ctx);
    assert_eq!(
        handler.get_ref().events(),
        vec![
            Event::TagConn(ctx.clone(), conn),
            Event::HandleConn(ctx.clone(), ConnStats::Begin { client: false }),
            Event::HandleCall(ctx.clone(), end),
            Event::HandleConn(ctx.clone(), ConnStats::End { client: false }),
        ]
    );
}

#[test]
fn decorators_compose() {
    let inner = CloudRunHandler::with_config(Recorder::default(), Config::new("inner-rev").with_location("us-east1"));
    let handler: Box<dyn StatsHandler> = Box::new(CloudRunHandler::with_config(inner, Config::new("outer-rev").with_precedence(Precedence::DecoratorWins)));

    let out = handler.tag_call(incoming(&[(CLOUD_TRACE_HEADER, HEADER)]), &info());
    let tags = out.tags().unwrap();
    assert_eq!(tags.get(&KEY_REVISION_NAME), Some("outer-rev"));
    assert_eq!(tags.get(&KEY_LOCATION_NAME), Some("us-east1"));
    assert_eq!(out.incoming_metadata().unwrap().get_all(BINARY_HEADER).len(), 1);
}

#[derive(Default)]
struct CountingInspector {
    before: AtomicUsize,
    after: AtomicUsize,
}

impl TagInspector for CountingInspector {
    fn inspect(&self, phase: TagPhase, _: &RpcTagInfo, tags: Option<&TagMap>) {
        match phase {
            TagPhase::BeforeInjection => {
                assert!(tags.is_none());
                self.before.fetch_add(1, Ordering::SeqCst);
            },
            TagPhase::AfterInjection => {
                assert_eq!(tags.and_then(|t| t.get(&KEY_REVISION_NAME)), Some("rev"));
                self.after.fetch_add(1, Ordering::SeqCst);
            },
        }
    }
}

#[test]
fn inspector_observes_both_phases() {
    let inspector = Arc::new(CountingInspector::default());
    let handler = CloudRunHandler::with_config(Recorder::default(), Config::new("rev").with_inspector(inspector.clone()));
    let _ = handler.tag_call(CallContext::new(), &info());
    let _ = handler.tag_call(CallContext::new(), &info());
    assert_eq!(inspector.before.load(Ordering::SeqCst), 2);
    assert_eq!(inspector.after.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_stay_independent() -> anyhow::Result<()> {
    let handler = Arc::new(CloudRunHandler::with_config(Recorder::default(), Config::new("rev").with_location("us-central1")));
    let shared = incoming(&[("user-agent", "grpc-go")]);

    let tasks = (1..=64u64).map(|span_id| {
        let handler = handler.clone();
        let shared = shared.clone();
        tokio::spawn(async move {
            let mut md = shared.incoming_metadata().cloned().unwrap_or_default();
            md.set(CLOUD_TRACE_HEADER, format!("4bf92f3577b34da6a3ce929d0e0e4736/{span_id};o=1"));
            let out = handler.tag_call(shared.with_incoming_metadata(md), &info());
            (span_id, out)
        })
    });

    for (span_id, out) in futures::future::try_join_all(tasks).await? {
        let bin = out.incoming_metadata().unwrap().get(BINARY_HEADER).unwrap().as_bytes().to_vec();
        let sc = BinaryFormat.from_bytes(&bin)?;
        assert_eq!(u64::from_be_bytes(sc.span_id().to_bytes()), span_id);
        assert_eq!(out.tags().unwrap().get(&KEY_REVISION_NAME), Some("rev"));
    }
    assert_eq!(handler.get_ref().events().len(), 64);
    assert!(!shared.incoming_metadata().unwrap().contains_key(BINARY_HEADER));
    Ok(())
}
