//! 에러 타입 — 도메인별 에러 정의
//!
//! 에러 처리 원칙:
//! - 잘못된 입력(리스트 파일의 깨진 줄 등)은 해당 항목만 건너뛰고 전파하지 않음
//! - 락 획득 타임아웃은 해당 호출을 no-op으로 처리하고 로그로 보고
//! - 패킷 평가 중의 예기치 못한 에러는 정책 경계에서 잡아 fail-open
//!   ([`crate::pipeline::evaluate_fail_open`])
//! - 저장/복원 실패는 로그 후 빈 기본 상태로 대체
//!
//! 어떤 에러도 프로세스를 중단시키지 않습니다.

/// Palisade 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum PalisadeError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 공유 IP 리스트 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 정책 평가 에러
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// 상태 스냅샷 저장/복원 에러
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 공유 IP 리스트 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 락 획득 타임아웃 — 보고 대상이지만 치명적이지 않음
    #[error("lock timeout on list '{list}' during {op}")]
    LockTimeout { list: String, op: &'static str },
}

/// 정책 평가 에러
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// 합성 패킷 송신 실패
    #[error("packet injection failed: {0}")]
    Inject(String),

    /// 알림 채널 전송 실패 (가득 참 또는 닫힘)
    #[error("alert channel send failed: {0}")]
    ChannelSend(String),

    /// 정책 내부 상태 테이블의 락 타임아웃
    #[error("lock timeout in policy '{policy}'")]
    LockTimeout { policy: &'static str },

    /// 규칙 목록 조작 실패
    #[error("rule error: {0}")]
    Rule(String),
}

/// 상태 스냅샷 저장/복원 에러
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// 직렬화 실패
    #[error("failed to serialize state for {path}: {reason}")]
    Serialize { path: String, reason: String },

    /// 역직렬화 실패
    #[error("failed to deserialize state from {path}: {reason}")]
    Deserialize { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_with_context() {
        let err = PalisadeError::Store(StoreError::LockTimeout {
            list: "blacklist".to_owned(),
            op: "add",
        });
        assert_eq!(
            err.to_string(),
            "store error: lock timeout on list 'blacklist' during add"
        );

        let err = PalisadeError::Config(ConfigError::InvalidValue {
            field: "ddos.threshold_ms".to_owned(),
            reason: "must be positive".to_owned(),
        });
        assert!(err.to_string().contains("ddos.threshold_ms"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PalisadeError = io.into();
        assert!(matches!(err, PalisadeError::Io(_)));
    }
}
