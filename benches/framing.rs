//! Performance benchmarks for a3s-mcp-http
//!
//! Run with: cargo bench

use a3s_mcp_http::types::OutgoingMessage;
use a3s_mcp_http::{decode_events, encode_event, MemoryMessageSource, MessageSource, SessionId};
use criterion::{criterion_group, criterion_main, Criterion};

fn sample_payload() -> String {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "sampling/createMessage",
        "params": {
            "messages": [{ "role": "user", "content": { "type": "text", "text": "Analyze this" } }],
            "maxTokens": 500
        }
    })
    .to_string()
}

fn bench_encode(c: &mut Criterion) {
    let single = sample_payload();
    let multi = serde_json::to_string_pretty(&serde_json::json!({
        "content": [{ "type": "text", "text": "line one\nline two" }],
        "isError": false
    }))
    .unwrap();

    c.bench_function("encode_event single-line", |b| {
        b.iter(|| encode_event(&single));
    });

    c.bench_function("encode_event multi-line", |b| {
        b.iter(|| encode_event(&multi));
    });
}

fn bench_decode(c: &mut Criterion) {
    let stream: String = (0..100).map(|_| encode_event(&sample_payload())).collect();

    c.bench_function("decode_events 100 blocks", |b| {
        b.iter(|| decode_events(&stream));
    });
}

fn bench_bus_drain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = MemoryMessageSource::new();
    let session = SessionId::new();
    let payload = sample_payload();

    c.bench_function("MemoryMessageSource enqueue+drain 10", |b| {
        b.to_async(&rt).iter(|| async {
            for _ in 0..10 {
                bus.enqueue(&session, OutgoingMessage::notification(payload.clone()))
                    .await;
            }
            bus.outgoing_messages(&session).await.unwrap()
        });
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_bus_drain);
criterion_main!(benches);
