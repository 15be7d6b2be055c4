//! 정책 엔진 에러 타입
//!
//! [`PolicyEngineError`]는 정책 엔진 내부에서 발생하는 에러를 표현합니다.
//! `From<PolicyEngineError> for PalisadeError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use palisade_core::error::{PalisadeError, PolicyError, StoreError};

/// 정책 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum PolicyEngineError {
    /// 공유 IP 리스트 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 정책 상태 테이블의 락 타임아웃
    #[error("lock timeout in policy '{policy}'")]
    LockTimeout { policy: &'static str },

    /// 규칙 인덱스가 목록 범위를 벗어남
    #[error("rule index {index} out of bounds (len {len})")]
    RuleIndex { index: usize, len: usize },
}

impl From<PolicyEngineError> for PalisadeError {
    fn from(err: PolicyEngineError) -> Self {
        match err {
            PolicyEngineError::Store(e) => PalisadeError::Store(e),
            PolicyEngineError::LockTimeout { policy } => {
                PalisadeError::Policy(PolicyError::LockTimeout { policy })
            }
            PolicyEngineError::RuleIndex { index, len } => {
                PalisadeError::Policy(PolicyError::Rule(format!(
                    "rule index {index} out of bounds (len {len})"
                )))
            }
        }
    }
}
