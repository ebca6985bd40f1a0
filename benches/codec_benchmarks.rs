use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mdas_core::codec::{LayoutRegistry, TddfDecoder, SAMPLE_BATCH_HEADER_LINE, SAMPLE_DETAIL_LINE};

fn decoder() -> TddfDecoder {
    let registry = LayoutRegistry::builtin().expect("builtin layouts");
    TddfDecoder::new(registry.get("2022.2").expect("2022.2 is builtin"))
}

fn benchmark_detail_line_decode(c: &mut Criterion) {
    let decoder = decoder();
    c.bench_function("decode_detail_line", |b| {
        b.iter(|| decoder.decode_line(black_box(SAMPLE_DETAIL_LINE)))
    });
}

fn benchmark_header_line_decode(c: &mut Criterion) {
    let decoder = decoder();
    c.bench_function("decode_header_line", |b| {
        b.iter(|| decoder.decode_line(black_box(SAMPLE_BATCH_HEADER_LINE)))
    });
}

fn benchmark_mixed_file_decode(c: &mut Criterion) {
    let decoder = decoder();
    let lines: Vec<String> = (0..1_000)
        .map(|i| {
            if i % 50 == 0 {
                SAMPLE_BATCH_HEADER_LINE.to_string()
            } else {
                SAMPLE_DETAIL_LINE.to_string()
            }
        })
        .collect();

    c.bench_function("decode_mixed_file_1000_lines", |b| {
        b.iter(|| {
            let mut decoded = 0usize;
            for line in &lines {
                if decoder.decode_line(black_box(line)).is_ok() {
                    decoded += 1;
                }
            }
            decoded
        })
    });
}

fn benchmark_registry_lookup(c: &mut Criterion) {
    let registry = LayoutRegistry::builtin().expect("builtin layouts");
    c.bench_function("layout_registry_lookup", |b| {
        b.iter(|| registry.get(black_box("2022.2")))
    });
}

criterion_group!(
    benches,
    benchmark_detail_line_decode,
    benchmark_header_line_decode,
    benchmark_mixed_file_decode,
    benchmark_registry_lookup
);
criterion_main!(benches);
