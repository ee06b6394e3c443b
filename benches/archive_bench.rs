use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sqpack_archive::packed::empty::pack_passthrough;
use sqpack_archive::packed::standard::pack_compressing as pack_standard;
use sqpack_archive::packed::{unpack, PackedStream};
use sqpack_archive::path_spec::{ArchiveId, PathSpec};
use sqpack_archive::{MemoryStream, Stream};
use std::sync::Arc;

fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn as_packed(bytes: Vec<u8>) -> PackedStream {
    let stream: Arc<dyn Stream> = Arc::new(MemoryStream::new(bytes));
    PackedStream::new(PathSpec::empty(ArchiveId::new(0, 0, 0)), stream, 0, u64::MAX)
}

fn bench_pack(c: &mut Criterion) {
    let data = sample_data(1024 * 1024);
    c.bench_function("standard_pack_1mb", |b| {
        b.iter(|| pack_standard(black_box(&data), 6).unwrap())
    });
    c.bench_function("empty_passthrough_pack_1mb", |b| {
        b.iter(|| pack_passthrough(black_box(&data)))
    });
}

fn bench_unpack(c: &mut Criterion) {
    let data = sample_data(1024 * 1024);
    let packed_bytes = pack_standard(&data, 6).unwrap();

    c.bench_function("standard_unpack_1mb", |b| {
        b.iter(|| {
            let packed = as_packed(packed_bytes.clone());
            let mut unpacker = unpack(&packed).unwrap();
            let mut out = vec![0u8; data.len()];
            unpacker.read_exact_at(0, &mut out).unwrap();
            black_box(out);
        })
    });
}

criterion_group!(benches, bench_pack, bench_unpack);
criterion_main!(benches);
