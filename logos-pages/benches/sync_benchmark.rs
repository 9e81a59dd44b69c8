use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use logos_pages::{
    ChangeSet, ClientEvent, ClientFrame, CollabDocument, Cursor, EventBus, EventKind, PageMeta,
    PageSet, PendingRequests, RequestKind, Rope, ServerFrame, Update,
};
use serde_json::json;

fn sample_update(client: &str) -> Update {
    Update::new(ChangeSet::insert(1024, 512, "hello").unwrap(), client)
        .with_cursor(Cursor::new(client, 517))
}

fn bench_request_encode(c: &mut Criterion) {
    let wire = serde_json::to_value(sample_update("c1").to_wire().unwrap()).unwrap();
    let frame = ClientFrame::Request {
        id: 42,
        event: RequestKind::PushUpdates,
        args: vec![json!("doc1"), json!(5), json!([wire])],
    };

    c.bench_function("push_request_encode", |b| {
        b.iter(|| black_box(frame.encode().unwrap()))
    });
}

fn bench_response_decode(c: &mut Criterion) {
    let updates: Vec<_> = (0..16)
        .map(|i| serde_json::to_value(sample_update(&format!("c{i}")).to_wire().unwrap()).unwrap())
        .collect();
    let encoded = ServerFrame::ok(7, json!(updates)).encode().unwrap();

    c.bench_function("pull_response_decode_16", |b| {
        b.iter(|| black_box(ServerFrame::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_changeset_apply(c: &mut Criterion) {
    let doc = Rope::from_str(&"x".repeat(1024));
    let changes = ChangeSet::replace(1024, 100, 200, "replacement text").unwrap();

    c.bench_function("changeset_apply_1KB", |b| {
        b.iter(|| {
            let mut rope = doc.clone();
            changes.apply(black_box(&mut rope)).unwrap();
            black_box(rope)
        })
    });
}

fn bench_apply_updates(c: &mut Criterion) {
    let base = "x".repeat(1024);
    let mut len = 1024;
    let updates: Vec<Update> = (0..32)
        .map(|i| {
            let update = Update::new(ChangeSet::insert(len, i * 8, "ab").unwrap(), "peer");
            len += 2;
            update
        })
        .collect();

    c.bench_function("apply_32_updates", |b| {
        b.iter(|| {
            let mut doc = CollabDocument::new("notes", &base, 0);
            doc.apply_updates(0, black_box(&updates)).unwrap();
            black_box(doc.version());
        })
    });
}

fn bench_correlator(c: &mut Criterion) {
    c.bench_function("correlator_register_resolve_100", |b| {
        b.iter(|| {
            let mut pending = PendingRequests::new();
            let ids: Vec<_> = (0..100)
                .map(|i| pending.register(RequestKind::IndexGet, i))
                .collect();
            for id in ids.into_iter().rev() {
                black_box(pending.resolve(id));
            }
        })
    });
}

fn bench_event_fanout(c: &mut Criterion) {
    let bus = EventBus::new();
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let hits = hits.clone();
        bus.on(EventKind::PageListUpdated, move |_| {
            hits.fetch_add(1, Ordering::Relaxed);
        });
    }
    let event = ClientEvent::PageListUpdated(vec![PageMeta::new("a"), PageMeta::new("b")]);

    c.bench_function("event_fanout_10_subscribers", |b| {
        b.iter(|| black_box(bus.emit(&event)))
    });
}

fn bench_registry_snapshot(c: &mut Criterion) {
    let mut pages = PageSet::new();
    pages.replace_all((0..500).map(|i| PageMeta::new(format!("page-{i:03}"))));

    c.bench_function("registry_snapshot_500", |b| {
        b.iter(|| black_box(pages.snapshot()))
    });
}

criterion_group!(
    benches,
    bench_request_encode,
    bench_response_decode,
    bench_changeset_apply,
    bench_apply_updates,
    bench_correlator,
    bench_event_fanout,
    bench_registry_snapshot,
);
criterion_main!(benches);
