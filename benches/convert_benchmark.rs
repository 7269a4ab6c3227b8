//! Conversion throughput benchmarks.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ruleconv::convertor::{
    self, Behavior, ConvertOptions, ConvertorType, Format, SourceOptions, TargetOptions,
};

/// Clash domain list with a mix of exact and suffix entries.
fn domain_list(count: usize) -> String {
    let mut out = String::with_capacity(count * 24);
    for i in 0..count {
        if i % 2 == 0 {
            out.push_str(&format!("domain{}.example.com\n", i));
        } else {
            out.push_str(&format!("+.suffix{}.example.net\n", i));
        }
    }
    out
}

fn classical_list(count: usize) -> String {
    let mut out = String::with_capacity(count * 32);
    for i in 0..count {
        match i % 3 {
            0 => out.push_str(&format!("DOMAIN-SUFFIX,site{}.com\n", i)),
            1 => out.push_str(&format!("IP-CIDR,10.{}.{}.0/24\n", (i / 256) % 256, i % 256)),
            _ => out.push_str(&format!("DST-PORT,{}\n", 1000 + i % 60000)),
        }
    }
    out
}

fn clash(format: Format, behavior: Behavior) -> (SourceOptions, TargetOptions) {
    (
        SourceOptions {
            source_format: Some(format),
            source_behavior: Some(behavior),
            ..SourceOptions::new(ConvertorType::Clash)
        },
        TargetOptions {
            target_format: Some(format),
            target_behavior: Some(behavior),
            ..TargetOptions::new(ConvertorType::Clash)
        },
    )
}

fn bench_domain_to_binary(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain_to_binary");
    for count in [1_000, 10_000, 100_000] {
        let input = domain_list(count);
        let (source, _) = clash(Format::Text, Behavior::Domain);
        let options = ConvertOptions::new(source, TargetOptions::new(ConvertorType::Binary));
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
            b.iter(|| convertor::convert(black_box(input.as_bytes()), &options).unwrap())
        });
    }
    group.finish();
}

fn bench_domain_to_mrs(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain_to_mrs");
    for count in [1_000, 10_000] {
        let input = domain_list(count);
        let (source, _) = clash(Format::Text, Behavior::Domain);
        let (_, target) = clash(Format::Mrs, Behavior::Domain);
        let options = ConvertOptions::new(source, target);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
            b.iter(|| convertor::convert(black_box(input.as_bytes()), &options).unwrap())
        });
    }
    group.finish();
}

fn bench_classical_to_json(c: &mut Criterion) {
    let input = classical_list(10_000);
    let (source, _) = clash(Format::Text, Behavior::Classical);
    let options = ConvertOptions::new(source, TargetOptions::new(ConvertorType::Source));
    c.bench_function("classical_to_json_10k", |b| {
        b.iter(|| convertor::convert(black_box(input.as_bytes()), &options).unwrap())
    });
}

criterion_group!(
    benches,
    bench_domain_to_binary,
    bench_domain_to_mrs,
    bench_classical_to_json
);
criterion_main!(benches);
