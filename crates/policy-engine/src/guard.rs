//! IP 범위 차단 — 리스트 기반 주소 범위 차단 정책
//!
//! PeerBlock 계열 도구의 동작을 따릅니다: `tag:lowIP-highIP` 형식의
//! 리스트 파일들을 읽어 들이고, 차단 범위를 향하는 송신 연결 시도를
//! (설정에 따라 수신도) 폐기합니다.
//!
//! 범위 목록은 불변 스냅샷으로 교체됩니다. 리스트 제거 시 어느 범위가
//! 어느 파일에서 왔는지 역추적하려면 보조 인덱스가 필요하므로, 부분
//! 갱신 대신 전체를 비우고 다시 읽는 [`RangeGuard::rebuild`]만
//! 지원합니다.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::RwLock;

use palisade_core::config::GuardConfig;
use palisade_core::error::PalisadeError;
use palisade_core::event::MODULE_GUARD;
use palisade_core::metrics::{
    GUARD_RANGES_LOADED, LABEL_POLICY, POLICY_PACKETS_DROPPED_TOTAL, POLICY_PACKETS_TOTAL,
};
use palisade_core::pipeline::PacketPolicy;
use palisade_core::types::{Decision, Layer, PacketView};

use crate::error::PolicyEngineError;
use crate::range::{AddressRange, parse_range_line};

/// IP 범위 차단 정책
pub struct RangeGuard {
    config: GuardConfig,
    lock_wait: Duration,
    ranges: RwLock<Arc<Vec<AddressRange>>>,
}

impl RangeGuard {
    /// 빈 범위 목록으로 생성합니다. 범위는 [`rebuild`](Self::rebuild)로 채웁니다.
    pub fn new(config: GuardConfig, lock_wait: Duration) -> Self {
        RangeGuard {
            config,
            lock_wait,
            ranges: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// 현재 로드된 범위 수
    pub fn ranges_len(&self) -> usize {
        self.ranges
            .try_read_for(self.lock_wait)
            .map_or(0, |guard| guard.len())
    }

    /// 리스트 파일 하나를 best-effort로 파싱해 범위를 추가합니다.
    ///
    /// 깨진 줄은 조용히 건너뛰고 나머지를 계속 읽습니다. 파일이 없으면
    /// 경고만 남기고 0을 반환합니다 (로드와 제거 사이에 파일이 사라질
    /// 수 있음). 추가된 범위 수를 반환합니다.
    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<usize, PalisadeError> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "block list file missing, skipped");
                return Ok(0);
            }
            Err(e) => return Err(PalisadeError::Io(e)),
        };

        let parsed: Vec<AddressRange> = content.lines().filter_map(parse_range_line).collect();
        let added = parsed.len();

        let mut guard = self
            .ranges
            .try_write_for(self.lock_wait)
            .ok_or(PolicyEngineError::LockTimeout {
                policy: "range-guard",
            })
            .map_err(PalisadeError::from)?;
        let mut next = guard.as_ref().clone();
        next.extend(parsed);
        *guard = Arc::new(next);

        gauge!(GUARD_RANGES_LOADED).set(guard.len() as f64);
        tracing::debug!(path = %path.display(), added, "block list file loaded");
        Ok(added)
    }

    /// 전체 범위를 비우고 설정된 모든 리스트 파일을 다시 읽습니다.
    ///
    /// 로드된 총 범위 수를 반환합니다.
    pub async fn rebuild(&self) -> Result<usize, PalisadeError> {
        {
            let mut guard = self
                .ranges
                .try_write_for(self.lock_wait)
                .ok_or(PolicyEngineError::LockTimeout {
                    policy: "range-guard",
                })
                .map_err(PalisadeError::from)?;
            *guard = Arc::new(Vec::new());
        }

        let files = self.config.list_files.clone();
        for file in &files {
            self.load_file(file).await?;
        }
        Ok(self.ranges_len())
    }

    fn in_any_range(ranges: &[AddressRange], addr: IpAddr) -> bool {
        ranges.iter().any(|range| range.contains(addr))
    }
}

impl PacketPolicy for RangeGuard {
    fn name(&self) -> &str {
        MODULE_GUARD
    }

    fn evaluate(&self, packet: &PacketView) -> Result<Decision, PalisadeError> {
        if !self.config.enabled || !packet.layers.has(Layer::Tcp) {
            return Ok(Decision::allow());
        }
        counter!(POLICY_PACKETS_TOTAL, LABEL_POLICY => MODULE_GUARD).increment(1);

        let snapshot = {
            let guard = self
                .ranges
                .try_read_for(self.lock_wait)
                .ok_or(PolicyEngineError::LockTimeout {
                    policy: "range-guard",
                })
                .map_err(PalisadeError::from)?;
            Arc::clone(&guard)
        };

        // 차단 범위를 향하는 송신 연결 시도
        if packet.syn && packet.outbound && Self::in_any_range(&snapshot, packet.dst_ip) {
            counter!(POLICY_PACKETS_DROPPED_TOTAL, LABEL_POLICY => MODULE_GUARD).increment(1);
            let mut decision = Decision::drop();
            if self.config.log_blocked {
                decision = decision.with_log();
                tracing::info!(
                    dst = %packet.dst_ip,
                    "blocked outgoing packet to {}",
                    packet.dst_ip,
                );
            }
            return Ok(decision);
        }

        // 설정 시 수신도 같은 범위로 차단
        if self.config.block_inbound
            && !packet.outbound
            && Self::in_any_range(&snapshot, packet.src_ip)
        {
            counter!(POLICY_PACKETS_DROPPED_TOTAL, LABEL_POLICY => MODULE_GUARD).increment(1);
            let mut decision = Decision::drop();
            if self.config.log_blocked {
                decision = decision.with_log();
                tracing::info!(
                    src = %packet.src_ip,
                    "blocked incoming packet from {}",
                    packet.src_ip,
                );
            }
            return Ok(decision);
        }

        Ok(Decision::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn guard(config: GuardConfig) -> RangeGuard {
        RangeGuard::new(config, Duration::from_secs(1))
    }

    fn enabled_config() -> GuardConfig {
        GuardConfig {
            enabled: true,
            ..GuardConfig::default()
        }
    }

    fn outbound_syn(dst: &str) -> PacketView {
        PacketView::builder()
            .layer(Layer::Eth)
            .layer(Layer::Ip)
            .layer(Layer::Tcp)
            .src_ip(ip("192.168.0.2"))
            .dst_ip(ip(dst))
            .src_port(40000)
            .dst_port(80)
            .outbound(true)
            .syn(true)
            .timestamp(SystemTime::now())
            .build()
    }

    fn inbound_from(src: &str) -> PacketView {
        PacketView::builder()
            .layer(Layer::Eth)
            .layer(Layer::Ip)
            .layer(Layer::Tcp)
            .src_ip(ip(src))
            .dst_ip(ip("192.168.0.2"))
            .src_port(40000)
            .dst_port(80)
            .syn(true)
            .timestamp(SystemTime::now())
            .build()
    }

    async fn write_list(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn load_file_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_list(
            &dir,
            "level1.txt",
            "# comment line\n\
             badnet:66.172.10.0-66.172.10.255\n\
             \n\
             garbage without dash\n\
             broken:1.2.3.999-1.2.3.4\n\
             another:10.1.0.0-10.1.255.255\n",
        )
        .await;

        let guard = guard(enabled_config());
        let added = guard.load_file(&file).await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(guard.ranges_len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_skipped() {
        let guard = guard(enabled_config());
        let added = guard.load_file("/nonexistent/level1.txt").await.unwrap();
        assert_eq!(added, 0);
    }

    #[tokio::test]
    async fn blocks_outgoing_syn_into_range() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_list(&dir, "l.txt", "badnet:66.172.10.0-66.172.10.255\n").await;

        let config = GuardConfig {
            enabled: true,
            list_files: vec![file],
            ..GuardConfig::default()
        };
        let guard = guard(config);
        guard.rebuild().await.unwrap();

        let decision = guard.evaluate(&outbound_syn("66.172.10.29")).unwrap();
        assert!(decision.is_drop());
        assert!(decision.should_log());

        assert!(guard.evaluate(&outbound_syn("66.172.11.1")).unwrap().is_allow());

        // 기본 설정은 수신을 차단하지 않음
        assert!(guard.evaluate(&inbound_from("66.172.10.29")).unwrap().is_allow());
    }

    #[tokio::test]
    async fn block_inbound_mirrors_check_to_sources() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_list(&dir, "l.txt", "badnet:66.172.10.0-66.172.10.255\n").await;

        let config = GuardConfig {
            enabled: true,
            list_files: vec![file],
            block_inbound: true,
            log_blocked: false,
        };
        let guard = guard(config);
        guard.rebuild().await.unwrap();

        let decision = guard.evaluate(&inbound_from("66.172.10.29")).unwrap();
        assert!(decision.is_drop());
        // log_blocked가 꺼져 있으면 평문 drop
        assert!(!decision.should_log());
    }

    #[tokio::test]
    async fn rebuild_replaces_previous_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let file_a = write_list(&dir, "a.txt", "a:10.0.0.0-10.0.0.255\n").await;
        let file_b = write_list(&dir, "b.txt", "b:20.0.0.0-20.0.0.255\n").await;

        let config = GuardConfig {
            enabled: true,
            list_files: vec![file_b],
            ..GuardConfig::default()
        };
        let guard = guard(config);

        // 직접 로드한 파일은 rebuild에서 사라짐 (설정 파일 목록만 반영)
        guard.load_file(&file_a).await.unwrap();
        assert_eq!(guard.ranges_len(), 1);
        assert!(guard.evaluate(&outbound_syn("10.0.0.7")).unwrap().is_drop());

        let total = guard.rebuild().await.unwrap();
        assert_eq!(total, 1);
        assert!(guard.evaluate(&outbound_syn("10.0.0.7")).unwrap().is_allow());
        assert!(guard.evaluate(&outbound_syn("20.0.0.7")).unwrap().is_drop());
    }

    #[test]
    fn disabled_guard_passes_everything() {
        let guard = guard(GuardConfig::default());
        assert!(guard.evaluate(&outbound_syn("66.172.10.29")).unwrap().is_allow());
    }
}
