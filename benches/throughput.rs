use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kz::entropy;
use kz::stream::{CompressedInputStream, CompressedOutputStream};
use kz::transform;

const SIZES: &[usize] = &[65_536, 1_048_576];

/// Mixed synthetic corpus: text, runs, and structured binary.
fn test_data(size: usize) -> Vec<u8> {
    let mut v = Vec::with_capacity(size);
    let mut i = 0usize;
    while v.len() < size {
        match i % 3 {
            0 => v.extend(b"benchmark corpora should not be purely random nor purely flat. "),
            1 => v.extend(vec![(i % 251) as u8; 120]),
            _ => v.extend((0..96).map(|k| ((k * 17 + i) % 256) as u8)),
        }
        i += 1;
    }
    v.truncate(size);
    v
}

fn compress(input: &[u8], t: u8, e: u8) -> Vec<u8> {
    let mut out = CompressedOutputStream::new(Vec::new(), t, e, 1 << 20, false).unwrap();
    out.write(input).unwrap();
    out.close().unwrap();
    out.into_inner()
}

fn bench_pairs(c: &mut Criterion) {
    let pairs: &[(&str, u8, u8)] = &[
        ("bwt_huffman", transform::BWT_TYPE, entropy::HUFFMAN_TYPE),
        ("bwt_ans", transform::BWT_TYPE, entropy::ANS_TYPE),
        ("lz4_range", transform::LZ4_TYPE, entropy::RANGE_TYPE),
        ("snappy_huffman", transform::SNAPPY_TYPE, entropy::HUFFMAN_TYPE),
        ("rle_fpaq", transform::RLT_TYPE, entropy::FPAQ_TYPE),
        ("none_none", transform::NONE_TYPE, entropy::NONE_TYPE),
    ];

    let mut group = c.benchmark_group("pipeline");

    for &size in SIZES {
        let data = test_data(size);
        group.throughput(Throughput::Bytes(size as u64));

        for &(name, t, e) in pairs {
            group.bench_with_input(
                BenchmarkId::new(format!("encode_{name}"), size),
                &data,
                |b, data| {
                    b.iter(|| compress(data, t, e));
                },
            );

            let stream = compress(&data, t, e);
            group.bench_with_input(
                BenchmarkId::new(format!("decode_{name}"), size),
                &stream,
                |b, stream| {
                    b.iter(|| {
                        let mut input = CompressedInputStream::new(&stream[..]).unwrap();
                        let mut out = vec![0u8; size];
                        let mut total = 0;
                        loop {
                            let n = input.read(&mut out[total..]).unwrap();
                            if n == 0 {
                                break;
                            }
                            total += n;
                        }
                        total
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_pairs);
criterion_main!(benches);
