//! 포트 스캔 탐지 — 출발지별 포트 접촉 추적과 감쇠
//!
//! 출발지 주소마다 접촉한 고유 목적지 포트와 패킷 간격 평균을 기록하고,
//! 짧은 시간 안에 많은 포트가 찔리면 보고합니다. TTL 검사로 같은 서브넷
//! 트래픽(특성상 TTL이 최대치에 가까움)을 걸러냅니다.
//!
//! # 탐지 흐름
//! 1. 출발지가 차단 리스트에 있으면 즉시 폐기 (상태 갱신 없음)
//! 2. 레코드 갱신: 포트 집합 추가, 간격 평균 `avg = (avg + delta) / 2`
//! 3. 포트 수·평균 간격이 임계값을 넘으면 한 번만 보고하고,
//!    설정에 따라 즉시 차단하거나 잠정 목록에 올림
//!
//! # 감쇠
//! 독립 주기 작업([`spawn_sweeper`])이 비활성 레코드를 정리합니다:
//! 30초 이상 조용하면 포트 집합만 비우고, 60초 이상이면 레코드를
//! 제거합니다. 보고된 레코드는 감쇠 대상이 아닙니다.
//!
//! # 클로킹 모드
//! 모든 수신 TCP SYN에 대해 탐지와 무관하게 위장 SYN-ACK을 송신하여
//! 스캐너의 결과를 가짜 양성으로 뒤덮습니다. 실제 열린 포트가
//! 위장 응답들 사이에 숨습니다.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use palisade_core::config::ScanConfig;
use palisade_core::error::PalisadeError;
use palisade_core::event::MODULE_SCAN;
use palisade_core::metrics::{
    LABEL_POLICY, POLICY_PACKETS_DROPPED_TOTAL, POLICY_PACKETS_TOTAL, SCAN_CLOAK_REPLIES_TOTAL,
    SCAN_REPORTS_TOTAL, SCAN_TRACKED_SOURCES,
};
use palisade_core::pipeline::{PacketInjector, PacketPolicy};
use palisade_core::types::{Decision, Layer, PacketView, SynthPacket};

use crate::error::PolicyEngineError;
use crate::store::{IpListStore, SCAN_BLOCKLIST};

/// 포트 집합을 비우는 비활성 기준
const PORT_WASH_AFTER: Duration = Duration::from_secs(30);

/// 레코드를 제거하는 비활성 기준
const EVICT_AFTER: Duration = Duration::from_secs(60);

/// 출발지별 추적 레코드
#[derive(Debug)]
struct ScanRecord {
    touched_ports: HashSet<u16>,
    last_access: SystemTime,
    last_packet: SystemTime,
    average_interval_ms: f64,
    reported: bool,
}

impl ScanRecord {
    fn new(first_seen: SystemTime) -> Self {
        ScanRecord {
            touched_ports: HashSet::new(),
            last_access: first_seen,
            last_packet: first_seen,
            average_interval_ms: 0.0,
            reported: false,
        }
    }

    /// 포트 접촉과 타이밍을 기록합니다.
    ///
    /// 간격 평균은 가중치 0.5의 단순 지수 평활입니다.
    fn touch(&mut self, port: u16, now: SystemTime) {
        self.touched_ports.insert(port);
        let delta_ms = now
            .duration_since(self.last_packet)
            .unwrap_or_default()
            .as_secs_f64()
            * 1000.0;
        self.average_interval_ms = (self.average_interval_ms + delta_ms) / 2.0;
        self.last_packet = now;
        self.last_access = now;
    }
}

/// 운영자 표시용 레코드 요약
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecordStats {
    /// 접촉한 고유 포트 수
    pub touched_ports: usize,
    /// 평균 패킷 간격 (밀리초)
    pub average_interval_ms: f64,
    /// 보고 여부
    pub reported: bool,
}

/// 포트 스캔 탐지 정책
pub struct ScanDetector {
    config: ScanConfig,
    lock_wait: Duration,
    store: Arc<IpListStore>,
    injector: Option<Arc<dyn PacketInjector>>,
    table: RwLock<HashMap<IpAddr, ScanRecord>>,
    // 보고만 되고 아직 차단되지 않은 잠정 출발지들.
    // 재시작을 거쳐 보존할 상태가 아니므로 스냅샷에 포함되지 않습니다.
    potentials: RwLock<HashSet<IpAddr>>,
}

impl ScanDetector {
    /// 새 스캔 탐지기를 생성합니다.
    pub fn new(config: ScanConfig, lock_wait: Duration, store: Arc<IpListStore>) -> Self {
        ScanDetector {
            config,
            lock_wait,
            store,
            injector: None,
            table: RwLock::new(HashMap::new()),
            potentials: RwLock::new(HashSet::new()),
        }
    }

    /// 클로킹 모드가 사용할 패킷 송신 능력을 연결합니다.
    #[must_use]
    pub fn with_injector(mut self, injector: Arc<dyn PacketInjector>) -> Self {
        self.injector = Some(injector);
        self
    }

    /// 잠정 목록의 스냅샷을 반환합니다.
    pub fn potentials(&self) -> Vec<IpAddr> {
        match self.potentials.try_read_for(self.lock_wait) {
            Some(guard) => guard.iter().copied().collect(),
            None => {
                tracing::warn!("potentials lock timeout, returning empty snapshot");
                Vec::new()
            }
        }
    }

    /// 추적 중인 출발지의 요약을 반환합니다. 추적하지 않으면 `None`.
    pub fn record_stats(&self, source: IpAddr) -> Option<ScanRecordStats> {
        let guard = self.table.try_read_for(self.lock_wait)?;
        guard.get(&source).map(|rec| ScanRecordStats {
            touched_ports: rec.touched_ports.len(),
            average_interval_ms: rec.average_interval_ms,
            reported: rec.reported,
        })
    }

    /// 비활성 레코드를 현재 시각 기준으로 정리합니다.
    pub fn sweep(&self) {
        self.sweep_at(SystemTime::now());
    }

    /// 비활성 레코드를 `now` 기준으로 정리합니다.
    ///
    /// 보고되지 않은 레코드만 대상: 30초 이상 조용하면 포트 집합을
    /// 비우고(레코드는 유지), 60초 이상이면 레코드를 제거합니다.
    pub fn sweep_at(&self, now: SystemTime) {
        let Some(mut table) = self.table.try_write_for(self.lock_wait) else {
            tracing::warn!("scan table lock timeout, skipping sweep");
            return;
        };

        table.retain(|_, rec| {
            if rec.reported {
                return true;
            }
            let idle = now.duration_since(rec.last_access).unwrap_or_default();
            if idle >= EVICT_AFTER {
                return false;
            }
            if idle >= PORT_WASH_AFTER {
                rec.touched_ports.clear();
            }
            true
        });

        gauge!(SCAN_TRACKED_SOURCES).set(table.len() as f64);
    }

    /// 수신 SYN에 위장 SYN-ACK으로 응답합니다 (클로킹 모드).
    fn send_cloak_reply(&self, packet: &PacketView) {
        let Some(injector) = self.injector.as_deref() else {
            return;
        };
        let reply = SynthPacket::syn_ack_reply(packet, rand::random::<u32>());
        match injector.send(reply) {
            Ok(()) => {
                counter!(SCAN_CLOAK_REPLIES_TOTAL).increment(1);
            }
            Err(e) => {
                // 위장 응답 실패가 판정을 바꾸지는 않음
                tracing::warn!(error = %e, "cloak reply injection failed");
            }
        }
    }

    /// 추적 대상 패킷인지 판별합니다.
    ///
    /// 수신 방향이고 TTL이 250 미만이어야 하며(같은 서브넷 배제 휴리스틱),
    /// TCP는 SYN-only, UDP는 DNS가 아닌 것만 셉니다.
    fn qualifies(packet: &PacketView) -> bool {
        if packet.outbound || packet.ttl >= 250 {
            return false;
        }
        if packet.layers.has(Layer::Tcp) {
            return packet.is_syn_only();
        }
        if packet.layers.has(Layer::Udp) {
            return !packet.is_dns();
        }
        false
    }
}

impl PacketPolicy for ScanDetector {
    fn name(&self) -> &str {
        MODULE_SCAN
    }

    fn evaluate(&self, packet: &PacketView) -> Result<Decision, PalisadeError> {
        if !self.config.enabled {
            return Ok(Decision::allow());
        }
        if !packet.layers.has(Layer::Tcp) && !packet.layers.has(Layer::Udp) {
            return Ok(Decision::allow());
        }
        counter!(POLICY_PACKETS_TOTAL, LABEL_POLICY => MODULE_SCAN).increment(1);

        // 클로킹 응답은 탐지 결과와 무관하게 먼저 나감
        if self.config.cloaked_mode
            && !packet.outbound
            && packet.layers.has(Layer::Tcp)
            && packet.syn
        {
            self.send_cloak_reply(packet);
        }

        // 이미 차단된 출발지는 상태 갱신 없이 폐기
        match self.store.in_list(SCAN_BLOCKLIST, packet.src_ip) {
            Ok(true) => {
                counter!(POLICY_PACKETS_DROPPED_TOTAL, LABEL_POLICY => MODULE_SCAN).increment(1);
                return Ok(Decision::drop());
            }
            Ok(false) => {}
            Err(e) => {
                // 리스트를 못 읽으면 차단 근거가 없으므로 추적만 계속
                tracing::warn!(error = %e, "scan blocklist check failed");
            }
        }

        if !Self::qualifies(packet) {
            return Ok(Decision::allow());
        }
        let Some(dst_port) = packet.dst_port else {
            return Ok(Decision::allow());
        };

        let mut table = self
            .table
            .try_write_for(self.lock_wait)
            .ok_or(PolicyEngineError::LockTimeout {
                policy: "scan-detector",
            })
            .map_err(PalisadeError::from)?;

        let now = packet.timestamp;
        let record = table
            .entry(packet.src_ip)
            .or_insert_with(|| ScanRecord::new(now));
        record.touch(dst_port, now);

        let should_report = record.touched_ports.len() >= self.config.port_threshold
            && record.average_interval_ms < self.config.max_average_interval_ms
            && !record.reported;

        if !should_report {
            gauge!(SCAN_TRACKED_SOURCES).set(table.len() as f64);
            return Ok(Decision::allow());
        }

        record.reported = true;
        let count = record.touched_ports.len();
        let average = record.average_interval_ms;
        gauge!(SCAN_TRACKED_SOURCES).set(table.len() as f64);
        drop(table);

        counter!(SCAN_REPORTS_TOTAL).increment(1);
        tracing::info!(
            source = %packet.src_ip,
            ports = count,
            average_ms = average,
            "{} touched {} ports with an average of {}",
            packet.src_ip,
            count,
            average,
        );

        if self.config.block_immediately {
            if let Err(e) = self.store.add_to_list(SCAN_BLOCKLIST, packet.src_ip) {
                tracing::warn!(error = %e, source = %packet.src_ip, "failed to blocklist scanner");
            }
        } else if let Some(mut potentials) = self.potentials.try_write_for(self.lock_wait) {
            potentials.insert(packet.src_ip);
        } else {
            tracing::warn!(source = %packet.src_ip, "potentials lock timeout, source not recorded");
        }

        // 보고를 유발한 패킷 자체는 통과시킴
        Ok(Decision::allow().with_log())
    }
}

/// 감쇠 작업을 백그라운드 태스크로 띄웁니다.
///
/// 설정된 주기마다 [`ScanDetector::sweep`]을 호출하고, 취소 시
/// 마지막 정리를 한 번 더 수행한 뒤 종료합니다.
pub fn spawn_sweeper(
    detector: Arc<ScanDetector>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(detector.config.sweep_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 첫 tick은 즉시 발화하므로 소비하고 시작
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    detector.sweep();
                    break;
                }
                _ = interval.tick() => detector.sweep(),
            }
        }
    })
}
