//! 파이프라인 trait — 정책 확장 포인트와 캡처 계층 경계
//!
//! 캡처 계층(외부 협력자)은 프레임마다 [`PacketView`]를 만들어 활성
//! 정책들의 [`PacketPolicy::evaluate`]를 호출하고, 반환된 [`Decision`]에
//! 따라 패킷을 처리합니다. 정책이 합성한 패킷은 [`PacketInjector`]를
//! 통해 내보냅니다.

use crate::error::PalisadeError;
use crate::types::{Decision, PacketView, SynthPacket};

/// 패킷 검사 정책을 구현하는 trait
///
/// 새로운 정책 모듈을 추가하려면 이 trait을 구현합니다.
/// `evaluate`는 캡처 스레드에서 패킷마다 동기 호출되므로
/// 블로킹 I/O 없이 유한한 비용으로 끝나야 합니다.
pub trait PacketPolicy: Send + Sync {
    /// 정책 이름 (로깅과 메트릭 레이블에 사용)
    fn name(&self) -> &str;

    /// 패킷 하나를 검사하여 판정을 반환합니다.
    fn evaluate(&self, packet: &PacketView) -> Result<Decision, PalisadeError>;
}

/// 캡처 계층의 패킷 송신 능력
///
/// 클로킹 모드의 SYN-ACK과 포트 노킹의 SYN이 이 경로로 나갑니다.
pub trait PacketInjector: Send + Sync {
    /// 합성 패킷을 송신합니다.
    fn send(&self, packet: SynthPacket) -> Result<(), PalisadeError>;
}

/// 정책 경계의 fail-open 래퍼
///
/// 평가 중 에러가 나면 로그를 남기고 패킷을 통과시킵니다.
/// 탐지 하나를 놓치는 쪽이 파이프라인 전체를 세우는 쪽보다 낫다는
/// 가용성 우선 원칙입니다. 파이프라인 호스트는 이 함수를 통해
/// 정책을 호출해야 합니다.
pub fn evaluate_fail_open(policy: &dyn PacketPolicy, packet: &PacketView) -> Decision {
    match policy.evaluate(packet) {
        Ok(decision) => decision,
        Err(e) => {
            tracing::warn!(
                policy = policy.name(),
                error = %e,
                packet = %packet,
                "policy evaluation failed, failing open"
            );
            Decision::allow()
        }
    }
}
