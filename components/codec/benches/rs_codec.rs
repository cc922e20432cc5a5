use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cloudraid_codec::ErasureCoder;

const STRIPE: usize = 4 << 20;

fn bench_encode(c: &mut Criterion) {
    let coder = ErasureCoder::new(4, 2).unwrap();
    let data = vec![0xA5u8; STRIPE];
    c.bench_function("encode 4MiB k=4 m=2", |b| {
        b.iter(|| coder.encode(black_box(&data)).unwrap())
    });
}

fn bench_decode_with_erasures(c: &mut Criterion) {
    let coder = ErasureCoder::new(4, 2).unwrap();
    let data = vec![0xA5u8; STRIPE];
    let mut chunks = coder.encode(&data).unwrap();
    chunks[1] = Bytes::new();
    chunks[4] = Bytes::new();
    c.bench_function("decode 4MiB with 2 erasures", |b| {
        b.iter(|| coder.decode(black_box(&chunks)).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode_with_erasures);
criterion_main!(benches);
