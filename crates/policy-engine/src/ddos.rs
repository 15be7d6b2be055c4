//! DDoS 완화 — SYN 플러드 / 프래글 / 스머프 휴리스틱
//!
//! 분산 공격을 막아주지는 못합니다. 로컬에서 가능한 휴리스틱 완화만
//! 수행하며, 제대로 된 방어는 상위(하드웨어, ISP)에서 해야 합니다.
//!
//! # 구조
//! - 영속 차단 캐시: `(주소, 차단 시각, 사유)` — 모든 IP 패킷에 대해
//!   가장 먼저 조회되고, 걸리면 추가 처리 없이 폐기
//! - 레이트 테이블: 출발지별 패킷 카운터. 프로토콜마다 독립된 카운터
//!   네임스페이스를 가지며, 전체 엔트리가 상한을 넘으면 통째로 비움
//!   (LRU가 아닌 거친 압력 완화)
//! - 직전 패킷 포인터: TCP/ICMP 각각 직전 패킷의 모양과 시각
//!
//! 세 휴리스틱 모두 "임계 간격(`threshold_ms`) 안에 같은 출발지에서
//! 50개 초과"를 플러드로 봅니다.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, SystemTime};

use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use palisade_core::config::DdosConfig;
use palisade_core::error::PalisadeError;
use palisade_core::event::{AlertEvent, MODULE_DDOS, try_send_alert};
use palisade_core::metrics::{
    DDOS_BLOCKED_TOTAL, DDOS_RATE_TABLE_CLEARS_TOTAL, LABEL_POLICY, LABEL_REASON,
    POLICY_PACKETS_DROPPED_TOTAL, POLICY_PACKETS_TOTAL,
};
use palisade_core::pipeline::PacketPolicy;
use palisade_core::types::{Decision, Layer, PacketView};

use crate::error::PolicyEngineError;

/// 프래글 공격이 노리는 에코 계열 서비스 포트
const FRAGGLE_PORTS: [u16; 4] = [7, 13, 17, 19];

/// 차단 캐시 엔트리
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockedEntry {
    /// 차단 시각
    pub blocked_at: SystemTime,
    /// 차단 사유 태그 (예: "DoS Attempt")
    pub reason: String,
}

/// 출발지별 패킷 카운터
#[derive(Debug)]
struct RateCounter {
    count: u32,
    last_seen: SystemTime,
}

/// 프로토콜별 카운터 네임스페이스
///
/// UDP 플러드 증거가 TCP의 리셋 규칙에 지워지지 않도록
/// 프로토콜마다 독립된 맵을 유지합니다.
#[derive(Debug, Default)]
struct RateTable {
    tcp: HashMap<IpAddr, RateCounter>,
    udp: HashMap<IpAddr, RateCounter>,
    icmp: HashMap<IpAddr, RateCounter>,
}

impl RateTable {
    fn total_len(&self) -> usize {
        self.tcp.len() + self.udp.len() + self.icmp.len()
    }

    fn clear(&mut self) {
        self.tcp.clear();
        self.udp.clear();
        self.icmp.clear();
    }
}

/// 직전 TCP SYN 패킷의 출발지와 시각
#[derive(Debug, Clone, Copy)]
struct PrevTcp {
    src: IpAddr,
    at: SystemTime,
}

/// 직전 ICMP 패킷의 모양과 시각
#[derive(Debug, Clone, Copy)]
struct PrevIcmp {
    src: IpAddr,
    icmp_type: Option<u8>,
    icmp_code: Option<u8>,
    at: SystemTime,
}

/// 패킷 경로에서만 변하는 탐지 상태 (한 락 아래)
#[derive(Debug, Default)]
struct DdosState {
    rates: RateTable,
    prev_tcp: Option<PrevTcp>,
    prev_icmp: Option<PrevIcmp>,
}

/// DDoS 완화 정책
pub struct DdosDetector {
    config: DdosConfig,
    lock_wait: Duration,
    alert_tx: Option<mpsc::Sender<AlertEvent>>,
    state: RwLock<DdosState>,
    block_cache: RwLock<HashMap<IpAddr, BlockedEntry>>,
}

impl DdosDetector {
    /// 새 DDoS 완화 정책을 생성합니다.
    pub fn new(config: DdosConfig, lock_wait: Duration) -> Self {
        DdosDetector {
            config,
            lock_wait,
            alert_tx: None,
            state: RwLock::new(DdosState::default()),
            block_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Popup 판정을 내보낼 알림 채널을 연결합니다.
    #[must_use]
    pub fn with_alert_tx(mut self, tx: mpsc::Sender<AlertEvent>) -> Self {
        self.alert_tx = Some(tx);
        self
    }

    /// 주소를 수동으로 차단 캐시에 올립니다.
    pub fn block(&self, ip: IpAddr, reason: impl Into<String>) {
        let Some(mut cache) = self.block_cache.try_write_for(self.lock_wait) else {
            tracing::warn!(%ip, "block cache lock timeout, manual block skipped");
            return;
        };
        cache.insert(
            ip,
            BlockedEntry {
                blocked_at: SystemTime::now(),
                reason: reason.into(),
            },
        );
    }

    /// 주소를 차단 캐시에서 내립니다. 있었는지 여부를 반환합니다.
    pub fn unblock(&self, ip: IpAddr) -> bool {
        match self.block_cache.try_write_for(self.lock_wait) {
            Some(mut cache) => cache.remove(&ip).is_some(),
            None => {
                tracing::warn!(%ip, "block cache lock timeout, unblock skipped");
                false
            }
        }
    }

    /// 차단 캐시의 스냅샷을 반환합니다.
    pub fn blocked(&self) -> Vec<(IpAddr, BlockedEntry)> {
        match self.block_cache.try_read_for(self.lock_wait) {
            Some(cache) => cache.iter().map(|(ip, e)| (*ip, e.clone())).collect(),
            None => Vec::new(),
        }
    }

    /// 레이트 테이블의 현재 엔트리 수 (운영자 표시용)
    pub fn rate_table_len(&self) -> usize {
        self.state
            .try_read_for(self.lock_wait)
            .map_or(0, |s| s.rates.total_len())
    }

    /// 차단 캐시를 스냅샷 파일에서 복원합니다.
    pub async fn load_state(&self, path: impl AsRef<Path>) -> Result<(), PalisadeError> {
        let loaded: Option<HashMap<IpAddr, BlockedEntry>> =
            palisade_core::persist::load_state(path).await?;
        let restored = loaded.unwrap_or_default();

        let mut cache = self
            .block_cache
            .try_write_for(self.lock_wait)
            .ok_or(PolicyEngineError::LockTimeout { policy: "ddos" })
            .map_err(PalisadeError::from)?;
        *cache = restored;
        Ok(())
    }

    /// 차단 캐시를 스냅샷 파일에 기록합니다.
    pub async fn save_state(&self, path: impl AsRef<Path>) -> Result<(), PalisadeError> {
        let copy: HashMap<IpAddr, BlockedEntry> = {
            let cache = self
                .block_cache
                .try_read_for(self.lock_wait)
                .ok_or(PolicyEngineError::LockTimeout { policy: "ddos" })
                .map_err(PalisadeError::from)?;
            cache.clone()
        };
        palisade_core::persist::save_state(path, &copy).await
    }

    /// 플러드 판정의 공통 처리: 차단 캐시 등록, 로그, 알림.
    fn flood_detected(&self, src: IpAddr, reason: &'static str, label: &'static str) -> Decision {
        let decision = Decision::drop().with_log().with_popup();

        let message = match label {
            "dos" => format!(
                "DoS attempt detected from IP {src} (likely spoofed). Packets from this IP will be dropped."
            ),
            "fraggle" => format!(
                "Potential fraggle attack from IP {src} (likely spoofed). Packets from this IP will be dropped."
            ),
            _ => format!(
                "Potential smurf attack from IP {src} (likely spoofed). Packets from this IP will be dropped."
            ),
        };

        if let Some(mut cache) = self.block_cache.try_write_for(self.lock_wait) {
            cache.insert(
                src,
                BlockedEntry {
                    blocked_at: SystemTime::now(),
                    reason: reason.to_owned(),
                },
            );
        } else {
            // 캐시에 못 올려도 이번 패킷은 폐기됨
            tracing::warn!(%src, "block cache lock timeout, flood source not cached");
        }

        counter!(DDOS_BLOCKED_TOTAL, LABEL_REASON => label).increment(1);
        counter!(POLICY_PACKETS_DROPPED_TOTAL, LABEL_POLICY => MODULE_DDOS).increment(1);
        tracing::warn!(source = %src, reason, "{message}");
        try_send_alert(
            self.alert_tx.as_ref(),
            AlertEvent::new(MODULE_DDOS, message, Some(src), decision),
        );

        decision
    }

    /// SYN 플러드 검사. 플러드면 true.
    fn check_syn_flood(&self, state: &mut DdosState, packet: &PacketView) -> bool {
        let src = packet.src_ip;
        let now = packet.timestamp;
        let threshold = self.config.threshold();

        let mut flood = false;
        if let Some(prev) = state.prev_tcp {
            let elapsed = now.duration_since(prev.at).unwrap_or_default();
            let same_source = prev.src == src;

            let counter = state.rates.tcp.entry(src).or_insert(RateCounter {
                count: 0,
                last_seen: now,
            });
            if same_source && elapsed <= threshold {
                counter.count += 1;
            } else {
                counter.count = 1;
            }
            counter.last_seen = now;

            flood = same_source
                && elapsed <= threshold
                && counter.count > self.config.counter_threshold;
        } else {
            state.rates.tcp.insert(
                src,
                RateCounter {
                    count: 1,
                    last_seen: now,
                },
            );
        }

        state.prev_tcp = Some(PrevTcp { src, at: now });
        flood
    }

    /// 프래글 검사. 카운터는 모든 수신 UDP 패킷에서 증가하고,
    /// 판정은 빈 페이로드 + 에코 계열 포트에서만 내려집니다.
    fn check_fraggle(&self, state: &mut DdosState, packet: &PacketView) -> bool {
        let counter = state
            .rates
            .udp
            .entry(packet.src_ip)
            .or_insert(RateCounter {
                count: 0,
                last_seen: packet.timestamp,
            });
        counter.count += 1;
        counter.last_seen = packet.timestamp;
        let count = counter.count;

        let eligible = packet.has_empty_payload()
            && packet
                .dst_port
                .is_some_and(|p| FRAGGLE_PORTS.contains(&p));
        eligible && count > self.config.counter_threshold
    }

    /// 스머프 검사. 로컬 주소가 설정되지 않았으면 판정 불가.
    fn check_smurf(&self, state: &mut DdosState, packet: &PacketView) -> bool {
        let src = packet.src_ip;
        let now = packet.timestamp;
        let threshold = self.config.threshold();

        let mut flood = false;
        if let Some(prev) = state.prev_icmp {
            let elapsed = now.duration_since(prev.at).unwrap_or_default();
            let same_shape = prev.src == src
                && prev.icmp_type == packet.icmp_type
                && prev.icmp_code == packet.icmp_code;

            match state.rates.icmp.entry(src) {
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(RateCounter {
                        count: 1,
                        last_seen: now,
                    });
                }
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    let counter = entry.get_mut();
                    if elapsed >= threshold && same_shape {
                        counter.count = 1;
                    } else if elapsed <= threshold {
                        counter.count += 1;
                    }
                    counter.last_seen = now;
                }
            }

            // 반사된 브로드캐스트 응답: 자기 자신이 보낸 것처럼 위조된 에코 응답
            let is_reflected_echo_reply = packet.icmp_type == Some(0)
                && packet.icmp_code == Some(0)
                && self.config.local_ip == Some(src);

            flood = is_reflected_echo_reply
                && elapsed <= threshold
                && state
                    .rates
                    .icmp
                    .get(&src)
                    .is_some_and(|c| c.count > self.config.counter_threshold);
        } else {
            state.rates.icmp.insert(
                src,
                RateCounter {
                    count: 1,
                    last_seen: now,
                },
            );
        }

        state.prev_icmp = Some(PrevIcmp {
            src,
            icmp_type: packet.icmp_type,
            icmp_code: packet.icmp_code,
            at: now,
        });
        flood
    }
}

impl PacketPolicy for DdosDetector {
    fn name(&self) -> &str {
        MODULE_DDOS
    }

    fn evaluate(&self, packet: &PacketView) -> Result<Decision, PalisadeError> {
        if !self.config.enabled || !packet.layers.has(Layer::Ip) {
            return Ok(Decision::allow());
        }
        counter!(POLICY_PACKETS_TOTAL, LABEL_POLICY => MODULE_DDOS).increment(1);

        // 차단 캐시가 최우선 — 걸리면 추가 처리 없이 폐기
        match self.block_cache.try_read_for(self.lock_wait) {
            Some(cache) => {
                if cache.contains_key(&packet.src_ip) {
                    counter!(POLICY_PACKETS_DROPPED_TOTAL, LABEL_POLICY => MODULE_DDOS)
                        .increment(1);
                    return Ok(Decision::drop());
                }
            }
            None => {
                // 캐시를 못 읽으면 차단 근거가 없으므로 탐지만 계속
                tracing::warn!("block cache lock timeout, pre-check skipped");
            }
        }

        let mut state = self
            .state
            .try_write_for(self.lock_wait)
            .ok_or(PolicyEngineError::LockTimeout { policy: "ddos" })
            .map_err(PalisadeError::from)?;

        // 압력 완화: 테이블이 상한을 넘으면 통째로 비움.
        // 차단 캐시에는 영향을 주지 않습니다.
        if state.rates.total_len() > self.config.rate_table_cap {
            state.rates.clear();
            counter!(DDOS_RATE_TABLE_CLEARS_TOTAL).increment(1);
            tracing::debug!(cap = self.config.rate_table_cap, "rate table cleared");
        }

        if packet.is_syn_only() && self.check_syn_flood(&mut state, packet) {
            drop(state);
            return Ok(self.flood_detected(packet.src_ip, "DoS Attempt", "dos"));
        }
        if packet.layers.has(Layer::Udp)
            && !packet.outbound
            && self.check_fraggle(&mut state, packet)
        {
            drop(state);
            return Ok(self.flood_detected(packet.src_ip, "Fraggle Attempt", "fraggle"));
        }
        if packet.layers.has(Layer::Icmp)
            && !packet.outbound
            && self.check_smurf(&mut state, packet)
        {
            drop(state);
            return Ok(self.flood_detected(packet.src_ip, "Smurf Attempt", "smurf"));
        }

        Ok(Decision::allow())
    }
}
