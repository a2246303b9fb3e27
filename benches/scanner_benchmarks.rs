// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Haavi Scanner - Performance Benchmarks
//! © 2026 Bountyy Oy
//!
//! Benchmarks for the match engine hot path and supporting pieces.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use haavi_scanner::buffer_pool::ContentPool;
use haavi_scanner::cancel::CancelToken;
use haavi_scanner::matcher::Matcher;
use haavi_scanner::signatures::{CommonString, Signature, SignatureSet};
use haavi_scanner::vulnerabilities::compare_versions;

fn bench_signature_set(gated: usize) -> SignatureSet {
    let mut set = SignatureSet::new();

    let literals = [
        "eval", "base64_decode", "gzinflate", "str_rot13", "assert", "preg_replace",
        "create_function", "shell_exec", "passthru", "system",
    ];
    for literal in literals {
        set.common_strings.push(CommonString::new(literal));
    }

    for i in 0..gated {
        let literal_index = i % literals.len();
        set.add_signature(Signature::new(
            i as u32 + 1,
            format!(r"{}\s*\(", literals[literal_index]),
            format!("Rule {i}"),
            "",
            vec![literal_index],
        ));
    }
    set
}

fn sample_content(size: usize) -> Vec<u8> {
    let mut content = Vec::with_capacity(size);
    let filler = b"<?php echo 'hello world'; $x = 42; function f($a) { return $a; } ?>\n";
    while content.len() < size {
        content.extend_from_slice(filler);
    }
    content.truncate(size);
    content
}

fn benchmark_clean_file_matching(c: &mut Criterion) {
    let set = bench_signature_set(200);
    let matcher = Matcher::new(&set, Duration::from_secs(1), false);
    let cancel = CancelToken::new();

    let mut group = c.benchmark_group("clean_file_matching");
    for size in [4 * 1024, 64 * 1024, 512 * 1024] {
        let content = sample_content(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &content, |b, content| {
            b.iter(|| {
                let found = matcher.match_content(black_box(content), &cancel).unwrap();
                assert!(!found.has_matches());
            })
        });
    }
    group.finish();
}

fn benchmark_infected_file_matching(c: &mut Criterion) {
    let set = bench_signature_set(200);
    let matcher = Matcher::new(&set, Duration::from_secs(1), false);
    let cancel = CancelToken::new();

    let mut content = sample_content(64 * 1024);
    let payload = b"<?php eval(base64_decode('cGhwIGluZm8oKTs=')); ?>";
    content.extend_from_slice(payload);

    c.bench_function("infected_file_matching", |b| {
        b.iter(|| {
            let found = matcher.match_content(black_box(&content), &cancel).unwrap();
            assert!(found.has_matches());
        })
    });
}

fn benchmark_prefilter_scaling(c: &mut Criterion) {
    let cancel = CancelToken::new();
    let content = sample_content(64 * 1024);

    let mut group = c.benchmark_group("prefilter_scaling");
    for rules in [100usize, 1000, 5000] {
        let set = bench_signature_set(rules);
        let matcher = Matcher::new(&set, Duration::from_secs(1), false);
        group.bench_with_input(BenchmarkId::from_parameter(rules), &matcher, |b, matcher| {
            b.iter(|| {
                let _ = matcher.match_content(black_box(&content), &cancel).unwrap();
            })
        });
    }
    group.finish();
}

fn benchmark_buffer_pool(c: &mut Criterion) {
    let pool = ContentPool::new();

    c.bench_function("buffer_pool_acquire_release", |b| {
        b.iter(|| {
            let buf = pool.acquire(black_box(32 * 1024));
            pool.release(buf);
        })
    });
}

fn benchmark_version_compare(c: &mut Criterion) {
    let pairs = [
        ("1.2.3", "1.2.4"),
        ("6.4.2", "6.4.2"),
        ("v5.0-beta1", "5.0"),
        ("10.0.0", "9.99.99"),
    ];

    c.bench_function("version_compare", |b| {
        b.iter(|| {
            for (lhs, rhs) in pairs {
                black_box(compare_versions(black_box(lhs), black_box(rhs)));
            }
        })
    });
}

criterion_group!(
    benches,
    benchmark_clean_file_matching,
    benchmark_infected_file_matching,
    benchmark_prefilter_scaling,
    benchmark_buffer_pool,
    benchmark_version_compare,
);
criterion_main!(benches);
