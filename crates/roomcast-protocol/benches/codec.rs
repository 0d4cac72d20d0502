//! Handshake codec benchmarks for roomcast-protocol.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use roomcast_protocol::{codec, Handshake, RoomId};

fn bench_decode(c: &mut Criterion) {
    let encoded = Handshake::new(RoomId::new(513)).encode();

    let mut group = c.benchmark_group("handshake");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("decode", |b| {
        b.iter(|| codec::decode_handshake(black_box(&encoded)))
    });
    group.finish();
}

fn bench_encode_into(c: &mut Criterion) {
    let hs = Handshake::new(RoomId::new(513));
    let mut buf = BytesMut::with_capacity(1024);

    c.bench_function("handshake_encode_into", |b| {
        b.iter(|| {
            buf.clear();
            black_box(&hs).encode_into(&mut buf);
        })
    });
}

criterion_group!(benches, bench_decode, bench_encode_into);
criterion_main!(benches);
