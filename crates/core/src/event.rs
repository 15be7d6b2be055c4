//! 알림 이벤트 — 정책과 운영자 표면 사이의 통신 단위
//!
//! `Popup` 수식자가 붙은 판정은 [`AlertEvent`]로 변환되어 mpsc 채널을 통해
//! 운영자 표면(외부 협력자)으로 전달됩니다. 정책은 핫 패스에서 절대
//! 블로킹하지 않도록 `try_send`만 사용하고, 채널이 가득 차면 이벤트를
//! 버리고 로그로 남깁니다.

use std::fmt;
use std::net::IpAddr;
use std::time::SystemTime;

use tokio::sync::mpsc;

use crate::types::Decision;

// --- 모듈명 상수 ---

/// 스캔 탐지 모듈명
pub const MODULE_SCAN: &str = "scan-detector";
/// DDoS 완화 모듈명
pub const MODULE_DDOS: &str = "ddos";
/// MAC 필터 모듈명
pub const MODULE_MAC: &str = "mac-filter";
/// 포트 노킹 모듈명
pub const MODULE_KNOCK: &str = "port-knocker";
/// 포트 트랩 모듈명
pub const MODULE_TRAP: &str = "port-trap";
/// IP 범위 차단 모듈명
pub const MODULE_GUARD: &str = "range-guard";
/// 공유 IP 리스트 저장소 모듈명
pub const MODULE_STORE: &str = "ip-list-store";

/// 이벤트 메타데이터 — 발생 시각과 발생 모듈
#[derive(Debug, Clone)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: SystemTime,
    /// 이벤트를 생성한 모듈명 (예: "scan-detector")
    pub source_module: String,
}

impl EventMetadata {
    /// 현재 시각으로 메타데이터를 생성합니다.
    pub fn new(source_module: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
        }
    }
}

/// 운영자에게 전달되는 보안 알림
///
/// `Popup` 판정 수식자의 전달 수단입니다. 메시지는 정책이
/// 위치 치환까지 끝낸 평문 문자열입니다.
#[derive(Debug, Clone)]
pub struct AlertEvent {
    /// 알림 고유 ID (UUID v4)
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 평문 알림 메시지
    pub message: String,
    /// 관련 출발지 IP (있을 경우)
    pub source_ip: Option<IpAddr>,
    /// 알림을 발생시킨 판정
    pub decision: Decision,
}

impl AlertEvent {
    /// 새 알림 이벤트를 생성합니다.
    pub fn new(
        source_module: impl Into<String>,
        message: impl Into<String>,
        source_ip: Option<IpAddr>,
        decision: Decision,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(source_module),
            message: message.into(),
            source_ip,
            decision,
        }
    }
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({})",
            self.metadata.source_module, self.message, self.decision,
        )
    }
}

/// 알림을 채널로 비블로킹 전송합니다.
///
/// 핫 패스 전용: 채널이 가득 찼거나 닫혔으면 이벤트를 버리고
/// 로그만 남깁니다. 재시도하지 않습니다.
pub fn try_send_alert(tx: Option<&mpsc::Sender<AlertEvent>>, event: AlertEvent) {
    if let Some(tx) = tx
        && let Err(e) = tx.try_send(event)
    {
        tracing::warn!(error = %e, "alert channel full or closed, alert dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_event_carries_decision_and_source() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let event = AlertEvent::new(
            MODULE_DDOS,
            "DoS attempt detected from IP 10.0.0.5 (likely spoofed)",
            Some(ip),
            Decision::drop().with_log().with_popup(),
        );
        assert_eq!(event.metadata.source_module, MODULE_DDOS);
        assert_eq!(event.source_ip, Some(ip));
        assert!(event.decision.is_drop());
        assert!(event.to_string().contains("ddos"));
    }

    #[test]
    fn alert_ids_are_unique() {
        let a = AlertEvent::new(MODULE_MAC, "m", None, Decision::drop());
        let b = AlertEvent::new(MODULE_MAC, "m", None, Decision::drop());
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn try_send_alert_delivers_when_capacity() {
        let (tx, mut rx) = mpsc::channel(4);
        try_send_alert(
            Some(&tx),
            AlertEvent::new(MODULE_TRAP, "trapped", None, Decision::drop().with_log()),
        );
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "trapped");
    }

    #[test]
    fn try_send_alert_drops_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        try_send_alert(
            Some(&tx),
            AlertEvent::new(MODULE_TRAP, "first", None, Decision::drop()),
        );
        // 두 번째는 버려지지만 패닉하지 않아야 함
        try_send_alert(
            Some(&tx),
            AlertEvent::new(MODULE_TRAP, "second", None, Decision::drop()),
        );
    }

    #[test]
    fn try_send_alert_handles_absent_channel() {
        try_send_alert(None, AlertEvent::new(MODULE_SCAN, "m", None, Decision::allow()));
    }
}
