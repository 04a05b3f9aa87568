use context_engine::indexer::chunking::{ChunkingConfig, chunk_file};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn rust_source(functions: usize, lines_per_fn: usize) -> String {
    let mut source = String::from("use std::collections::HashMap;\n\n");
    for f in 0..functions {
        source.push_str(&format!("fn handler_{f}(input: &Request) -> Response {{\n"));
        for l in 0..lines_per_fn {
            source.push_str(&format!("    let step_{l} = transform_{l}(input);\n"));
        }
        source.push_str("    respond(input)\n}\n\n");
    }
    source
}

fn plain_text(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("line {i} of some plain unstructured notes\n"))
        .collect()
}

fn bench_symbol_chunking(c: &mut Criterion) {
    let config = ChunkingConfig::default();
    let small = rust_source(10, 8);
    let large = rust_source(200, 20);

    c.bench_function("chunk_rust_small", |b| {
        b.iter(|| chunk_file("src/small.rs", "rust", black_box(&small), 0, &config))
    });

    c.bench_function("chunk_rust_large", |b| {
        b.iter(|| chunk_file("src/large.rs", "rust", black_box(&large), 0, &config))
    });
}

fn bench_fallback_chunking(c: &mut Criterion) {
    let config = ChunkingConfig::default();
    let notes = plain_text(2000);

    c.bench_function("chunk_text_stride", |b| {
        b.iter(|| chunk_file("notes.txt", "text", black_box(&notes), 0, &config))
    });
}

criterion_group!(benches, bench_symbol_chunking, bench_fallback_chunking);
criterion_main!(benches);
