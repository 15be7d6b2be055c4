//! 포트 트랩 — 트랩 포트 접속 시도를 블랙리스트로 승격
//!
//! 설정된 트랩 포트로 들어오는 연결 시도는 출발지를 공유 저장소의
//! `"blacklist"` 리스트에 올리고 패킷을 폐기합니다. 모든 IP 패킷에
//! 대해 트랩 검사보다 먼저 블랙리스트 사전 검사가 수행되므로, 한 번
//! 걸린 주소는 이후 프로토콜과 무관하게 차단됩니다.
//!
//! 블랙리스트는 [`IpListStore`]를 통해 다른 정책과 공유됩니다 —
//! 트랩이 올린 주소를 다른 정책의 사전 검사도 볼 수 있습니다.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::RwLock;

use palisade_core::config::TrapConfig;
use palisade_core::error::PalisadeError;
use palisade_core::event::MODULE_TRAP;
use palisade_core::metrics::{
    LABEL_POLICY, POLICY_PACKETS_DROPPED_TOTAL, POLICY_PACKETS_TOTAL, TRAP_HITS_TOTAL,
};
use palisade_core::pipeline::PacketPolicy;
use palisade_core::types::{Decision, Layer, PacketView};

use crate::error::PolicyEngineError;
use crate::store::{BLACKLIST, IpListStore};

/// 포트 트랩 정책
pub struct PortTrap {
    config: TrapConfig,
    lock_wait: Duration,
    store: Arc<IpListStore>,
    traps: RwLock<HashSet<u16>>,
}

impl PortTrap {
    /// 설정의 트랩 포트로 초기화합니다.
    pub fn new(config: TrapConfig, lock_wait: Duration, store: Arc<IpListStore>) -> Self {
        let traps = config.ports.iter().copied().collect();
        PortTrap {
            config,
            lock_wait,
            store,
            traps: RwLock::new(traps),
        }
    }

    /// 트랩 포트를 추가합니다.
    pub fn add_trap(&self, port: u16) -> Result<(), PalisadeError> {
        let mut traps = self
            .traps
            .try_write_for(self.lock_wait)
            .ok_or(PolicyEngineError::LockTimeout { policy: "port-trap" })
            .map_err(PalisadeError::from)?;
        traps.insert(port);
        Ok(())
    }

    /// 트랩 포트를 제거합니다.
    pub fn remove_trap(&self, port: u16) -> Result<(), PalisadeError> {
        let mut traps = self
            .traps
            .try_write_for(self.lock_wait)
            .ok_or(PolicyEngineError::LockTimeout { policy: "port-trap" })
            .map_err(PalisadeError::from)?;
        traps.remove(&port);
        Ok(())
    }

    /// 현재 트랩 포트 목록을 반환합니다.
    pub fn traps(&self) -> Vec<u16> {
        match self.traps.try_read_for(self.lock_wait) {
            Some(traps) => {
                let mut ports: Vec<u16> = traps.iter().copied().collect();
                ports.sort_unstable();
                ports
            }
            None => Vec::new(),
        }
    }

    /// 트랩 포트 목록을 스냅샷 파일에서 복원합니다.
    pub async fn load_state(&self, path: impl AsRef<Path>) -> Result<(), PalisadeError> {
        let loaded: Option<Vec<u16>> = palisade_core::persist::load_state(path).await?;
        if let Some(ports) = loaded {
            let mut traps = self
                .traps
                .try_write_for(self.lock_wait)
                .ok_or(PolicyEngineError::LockTimeout { policy: "port-trap" })
                .map_err(PalisadeError::from)?;
            *traps = ports.into_iter().collect();
        }
        Ok(())
    }

    /// 트랩 포트 목록을 스냅샷 파일에 기록합니다.
    pub async fn save_state(&self, path: impl AsRef<Path>) -> Result<(), PalisadeError> {
        let ports = self.traps();
        palisade_core::persist::save_state(path, &ports).await
    }
}

impl PacketPolicy for PortTrap {
    fn name(&self) -> &str {
        MODULE_TRAP
    }

    fn evaluate(&self, packet: &PacketView) -> Result<Decision, PalisadeError> {
        if !self.config.enabled || !packet.layers.has(Layer::Ip) {
            return Ok(Decision::allow());
        }
        counter!(POLICY_PACKETS_TOTAL, LABEL_POLICY => MODULE_TRAP).increment(1);

        // 블랙리스트 사전 검사: 수신이면 출발지, 송신이면 목적지
        let relevant = if packet.outbound {
            packet.dst_ip
        } else {
            packet.src_ip
        };
        match self.store.in_list(BLACKLIST, relevant) {
            Ok(true) => {
                counter!(POLICY_PACKETS_DROPPED_TOTAL, LABEL_POLICY => MODULE_TRAP).increment(1);
                return Ok(Decision::drop());
            }
            Ok(false) => {}
            Err(e) => {
                // 리스트를 못 읽으면 차단 근거가 없으므로 트랩 검사로 진행
                tracing::warn!(error = %e, "blacklist pre-check failed");
            }
        }

        // 트랩 검사: 수신 연결 시도만
        if packet.outbound || !packet.is_syn_only() {
            return Ok(Decision::allow());
        }
        let Some(dst_port) = packet.dst_port else {
            return Ok(Decision::allow());
        };

        let trapped = self
            .traps
            .try_read_for(self.lock_wait)
            .is_some_and(|traps| traps.contains(&dst_port));
        if !trapped {
            return Ok(Decision::allow());
        }

        if let Err(e) = self.store.add_to_list(BLACKLIST, packet.src_ip) {
            // 리스트 등록에 실패해도 이번 패킷은 폐기
            tracing::warn!(error = %e, source = %packet.src_ip, "failed to blacklist source");
        }
        counter!(TRAP_HITS_TOTAL).increment(1);
        counter!(POLICY_PACKETS_DROPPED_TOTAL, LABEL_POLICY => MODULE_TRAP).increment(1);
        tracing::info!(
            source = %packet.src_ip,
            port = dst_port,
            "{} tried to access port {} and is now blacklisted",
            packet.src_ip,
            dst_port,
        );

        Ok(Decision::drop().with_log())
    }
}
