//! 범위 매처 속성 테스트
//!
//! 바이트 단위 비교 루프의 조기 종료 최적화가 사전순 비교와 항상
//! 일치하는지를 임의 주소에 대해 검증합니다.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use proptest::prelude::*;

use palisade_policy_engine::AddressRange;

proptest! {
    /// 모든 주소 a에 대해 [a, a]는 a를 포함한다.
    #[test]
    fn singleton_v4_contains_itself(bits in any::<u32>()) {
        let addr = IpAddr::V4(Ipv4Addr::from(bits));
        let range = AddressRange::new(addr, addr);
        prop_assert!(range.contains(addr));
    }

    #[test]
    fn singleton_v6_contains_itself(bits in any::<u128>()) {
        let addr = IpAddr::V6(Ipv6Addr::from(bits));
        let range = AddressRange::new(addr, addr);
        prop_assert!(range.contains(addr));
    }

    /// 포함 여부는 옥텟 사전순(= 정수 값 순)과 정확히 일치한다.
    #[test]
    fn v4_containment_agrees_with_integer_order(
        a in any::<u32>(),
        b in any::<u32>(),
        candidate in any::<u32>(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let range = AddressRange::new(
            IpAddr::V4(Ipv4Addr::from(lo)),
            IpAddr::V4(Ipv4Addr::from(hi)),
        );
        let expected = lo <= candidate && candidate <= hi;
        prop_assert_eq!(range.contains(IpAddr::V4(Ipv4Addr::from(candidate))), expected);
    }

    #[test]
    fn v6_containment_agrees_with_integer_order(
        a in any::<u128>(),
        b in any::<u128>(),
        candidate in any::<u128>(),
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let range = AddressRange::new(
            IpAddr::V6(Ipv6Addr::from(lo)),
            IpAddr::V6(Ipv6Addr::from(hi)),
        );
        let expected = lo <= candidate && candidate <= hi;
        prop_assert_eq!(range.contains(IpAddr::V6(Ipv6Addr::from(candidate))), expected);
    }

    /// 패밀리가 다른 주소는 어떤 범위에도 포함되지 않는다.
    #[test]
    fn family_mismatch_is_always_false(
        lo in any::<u32>(),
        hi in any::<u32>(),
        candidate in any::<u128>(),
    ) {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let range = AddressRange::new(
            IpAddr::V4(Ipv4Addr::from(lo)),
            IpAddr::V4(Ipv4Addr::from(hi)),
        );
        prop_assert!(!range.contains(IpAddr::V6(Ipv6Addr::from(candidate))));
    }
}
