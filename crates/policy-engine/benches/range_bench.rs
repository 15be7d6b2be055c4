//! 범위 매처 벤치마크
//!
//! 포함 검사는 패킷마다 모든 범위에 대해 수행되므로 핫 패스입니다.
//! 조기 수락(첫 옥텟에서 두 경계 사이로 들어오는 경우)과 조기 거부,
//! 그리고 끝까지 비교해야 하는 경계 주소를 나눠 측정합니다.

use std::net::IpAddr;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use palisade_policy_engine::AddressRange;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn bench_contains(c: &mut Criterion) {
    let range = AddressRange::new(ip("10.0.0.0"), ip("12.0.0.0"));
    let narrow = AddressRange::new(ip("66.172.10.0"), ip("66.172.10.255"));

    let mut group = c.benchmark_group("address_range_contains");

    // 첫 옥텟에서 조기 수락
    group.bench_function("early_accept", |b| {
        b.iter(|| black_box(range.contains(black_box(ip("11.4.5.6")))))
    });

    // 첫 옥텟에서 조기 거부
    group.bench_function("early_reject", |b| {
        b.iter(|| black_box(range.contains(black_box(ip("99.4.5.6")))))
    });

    // 마지막 옥텟까지 양쪽 경계와 일치가 유지되는 최악 경로
    group.bench_function("full_walk", |b| {
        b.iter(|| black_box(narrow.contains(black_box(ip("66.172.10.29")))))
    });

    group.finish();
}

fn bench_scan_list(c: &mut Criterion) {
    // 256개 인접 /24 범위를 순차 검사 (리스트 전체 순회 비용)
    let ranges: Vec<AddressRange> = (0..=255u8)
        .map(|octet| {
            AddressRange::new(
                IpAddr::from([66, 172, octet, 0]),
                IpAddr::from([66, 172, octet, 255]),
            )
        })
        .collect();
    let miss = ip("203.0.113.9");

    c.bench_function("address_range_list_miss", |b| {
        b.iter(|| {
            black_box(
                ranges
                    .iter()
                    .any(|range| range.contains(black_box(miss))),
            )
        })
    });
}

criterion_group!(benches, bench_contains, bench_scan_list);
criterion_main!(benches);
