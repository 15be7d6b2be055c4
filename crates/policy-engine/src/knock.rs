//! 포트 노킹 — 트리거 관찰 시 노크 패킷 송신
//!
//! 송신 TCP SYN이 규칙의 `(트리거 주소, 트리거 포트)`와 일치하면
//! `(노크 주소, 노크 포트)`로 SYN 하나를 합성해 내보냅니다. 트리거
//! 패킷의 출발지 포트를 재사용하며, 첫 매치에서 멈춥니다.
//!
//! 이 정책은 어떤 패킷도 폐기하지 않고 로그도 남기지 않습니다 —
//! 노킹 시퀀스가 트래픽에 드러나지 않아야 하기 때문입니다.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use palisade_core::config::KnockConfig;
use palisade_core::error::PalisadeError;
use palisade_core::event::MODULE_KNOCK;
use palisade_core::metrics::KNOCK_TRIGGERS_TOTAL;
use palisade_core::pipeline::{PacketInjector, PacketPolicy};
use palisade_core::types::{Decision, PacketView, SynthPacket};

use crate::error::PolicyEngineError;

/// 포트 노킹 규칙: 트리거 -> 노크 대상
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnockRule {
    /// 트리거 목적지 주소
    pub trigger_addr: IpAddr,
    /// 트리거 목적지 포트
    pub trigger_port: u16,
    /// 노크 패킷을 보낼 주소
    pub knock_addr: IpAddr,
    /// 노크 패킷을 보낼 포트
    pub knock_port: u16,
}

/// 포트 노킹 정책
pub struct PortKnocker {
    config: KnockConfig,
    lock_wait: Duration,
    injector: Option<Arc<dyn PacketInjector>>,
    rules: RwLock<Arc<Vec<KnockRule>>>,
}

impl PortKnocker {
    /// 빈 규칙 목록으로 생성합니다.
    pub fn new(config: KnockConfig, lock_wait: Duration) -> Self {
        PortKnocker {
            config,
            lock_wait,
            injector: None,
            rules: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// 노크 패킷을 내보낼 송신 능력을 연결합니다.
    #[must_use]
    pub fn with_injector(mut self, injector: Arc<dyn PacketInjector>) -> Self {
        self.injector = Some(injector);
        self
    }

    /// 현재 규칙 목록의 복사본을 반환합니다.
    pub fn rules(&self) -> Vec<KnockRule> {
        match self.rules.try_read_for(self.lock_wait) {
            Some(guard) => guard.as_ref().clone(),
            None => Vec::new(),
        }
    }

    /// 규칙을 추가합니다.
    pub fn add_rule(&self, rule: KnockRule) -> Result<(), PalisadeError> {
        self.mutate(move |list| {
            list.push(rule);
            Ok(())
        })
    }

    /// 해당 위치의 규칙을 제거합니다.
    pub fn remove_rule(&self, index: usize) -> Result<(), PalisadeError> {
        self.mutate(move |list| {
            if index >= list.len() {
                return Err(PolicyEngineError::RuleIndex {
                    index,
                    len: list.len(),
                });
            }
            list.remove(index);
            Ok(())
        })
    }

    /// 규칙 목록을 스냅샷 파일에서 복원합니다.
    pub async fn load_state(&self, path: impl AsRef<Path>) -> Result<(), PalisadeError> {
        let loaded: Option<Vec<KnockRule>> = palisade_core::persist::load_state(path).await?;
        let rules = loaded.unwrap_or_default();
        self.mutate(move |list| {
            *list = rules;
            Ok(())
        })
    }

    /// 규칙 목록을 스냅샷 파일에 기록합니다.
    pub async fn save_state(&self, path: impl AsRef<Path>) -> Result<(), PalisadeError> {
        let rules = self.rules();
        palisade_core::persist::save_state(path, &rules).await
    }

    fn mutate(
        &self,
        f: impl FnOnce(&mut Vec<KnockRule>) -> Result<(), PolicyEngineError>,
    ) -> Result<(), PalisadeError> {
        let mut guard = self
            .rules
            .try_write_for(self.lock_wait)
            .ok_or(PolicyEngineError::LockTimeout {
                policy: "port-knocker",
            })
            .map_err(PalisadeError::from)?;

        let mut next = guard.as_ref().clone();
        f(&mut next).map_err(PalisadeError::from)?;
        *guard = Arc::new(next);
        Ok(())
    }
}

impl PacketPolicy for PortKnocker {
    fn name(&self) -> &str {
        MODULE_KNOCK
    }

    fn evaluate(&self, packet: &PacketView) -> Result<Decision, PalisadeError> {
        if !self.config.enabled || !packet.outbound || !packet.is_syn_only() {
            return Ok(Decision::allow());
        }

        let snapshot = {
            let Some(guard) = self.rules.try_read_for(self.lock_wait) else {
                // 규칙을 못 읽으면 노크만 건너뜀 — 트리거 패킷은 그대로 나감
                return Ok(Decision::allow());
            };
            Arc::clone(&guard)
        };

        for rule in snapshot.iter() {
            if packet.dst_ip == rule.trigger_addr && packet.dst_port == Some(rule.trigger_port) {
                let knock = SynthPacket::syn(
                    packet.src_mac,
                    packet.dst_mac,
                    packet.src_ip,
                    rule.knock_addr,
                    packet.src_port.unwrap_or(0),
                    rule.knock_port,
                );
                if let Some(injector) = self.injector.as_deref() {
                    match injector.send(knock) {
                        Ok(()) => {
                            counter!(KNOCK_TRIGGERS_TOTAL).increment(1);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "knock packet injection failed");
                        }
                    }
                }
                // 첫 매치에서 종료: 같은 트리거에 규칙이 더 있어도 무시
                break;
            }
        }

        Ok(Decision::allow())
    }
}
