//! MAC 필터 — 순서 있는 first-match-wins 링크 계층 규칙 체인
//!
//! 규칙은 목록 순서대로 평가되며, 확정 판정(`Allowed`/`Blocked`)을 내는
//! 첫 규칙이 결과를 결정합니다. 목록 순서 자체가 의미 있는 상태이므로
//! 올리기/내리기가 일급 연산입니다.
//!
//! 평가 경로는 규칙 목록의 불변 스냅샷(`Arc<Vec<MacRule>>`)을 복제해
//! 사용하고, 편집 연산은 새 목록을 만들어 통째로 교체합니다. 따라서
//! 진행 중인 평가가 반쯤 재배열된 목록을 보는 일은 없습니다.

use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use palisade_core::config::MacConfig;
use palisade_core::error::PalisadeError;
use palisade_core::event::{AlertEvent, MODULE_MAC, try_send_alert};
use palisade_core::metrics::{
    LABEL_POLICY, POLICY_PACKETS_DROPPED_TOTAL, POLICY_PACKETS_TOTAL,
};
use palisade_core::pipeline::PacketPolicy;
use palisade_core::types::{Decision, Layer, MacAddr, PacketView};

use crate::error::PolicyEngineError;

/// 규칙이 내리는 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    /// 통과 확정
    Allowed,
    /// 차단 확정
    Blocked,
    /// 판정 없음 — 다음 규칙으로
    Undetermined,
}

/// 규칙이 적용되는 방향의 비트셋
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Direction(u8);

impl Direction {
    /// 수신 방향
    pub const IN: Direction = Direction(1);
    /// 송신 방향
    pub const OUT: Direction = Direction(1 << 1);
    /// 양방향
    pub const BOTH: Direction = Direction(1 | 1 << 1);

    /// 수신 방향 포함 여부
    pub const fn inbound(self) -> bool {
        self.0 & Direction::IN.0 != 0
    }

    /// 송신 방향 포함 여부
    pub const fn outbound(self) -> bool {
        self.0 & Direction::OUT.0 != 0
    }
}

impl BitOr for Direction {
    type Output = Direction;

    fn bitor(self, rhs: Direction) -> Direction {
        Direction(self.0 | rhs.0)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.inbound(), self.outbound()) {
            (true, true) => write!(f, "in and out"),
            (true, false) => write!(f, "in"),
            (false, true) => write!(f, "out"),
            (false, false) => write!(f, "nowhere"),
        }
    }
}

/// MAC 필터 규칙
///
/// `mac`이 `None`이면 와일드카드로 모든 주소에 매치됩니다.
/// 송신 패킷은 목적지 MAC, 수신 패킷은 출발지 MAC과 비교합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacRule {
    /// 매치 시 내릴 판정
    pub action: RuleAction,
    /// 비교 대상 MAC (None = 와일드카드)
    pub mac: Option<MacAddr>,
    /// 적용 방향
    pub direction: Direction,
    /// 차단 시 로그 여부
    pub log: bool,
    /// 차단 시 운영자 알림 여부
    pub notify: bool,
}

impl MacRule {
    /// 패킷에 대한 이 규칙의 판정을 계산합니다.
    fn status_for(&self, packet: &PacketView) -> RuleAction {
        if packet.outbound && self.direction.outbound() {
            if self.mac.is_none() || self.mac == Some(packet.dst_mac) {
                return self.action;
            }
        } else if !packet.outbound && self.direction.inbound()
            && (self.mac.is_none() || self.mac == Some(packet.src_mac))
        {
            return self.action;
        }
        RuleAction::Undetermined
    }
}

impl fmt::Display for MacRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            RuleAction::Allowed => write!(f, "allows")?,
            RuleAction::Blocked => write!(f, "blocks")?,
            RuleAction::Undetermined => write!(f, "ignores")?,
        }
        match self.mac {
            Some(mac) => write!(f, " MAC {mac}")?,
            None => write!(f, " all MACs")?,
        }
        write!(f, " {}", self.direction)?;
        if self.notify {
            write!(f, " and notifies")?;
        }
        if self.log {
            write!(f, " and logs")?;
        }
        Ok(())
    }
}

/// MAC 규칙 체인 정책
pub struct MacRuleChain {
    config: MacConfig,
    lock_wait: Duration,
    alert_tx: Option<mpsc::Sender<AlertEvent>>,
    rules: RwLock<Arc<Vec<MacRule>>>,
}

impl MacRuleChain {
    /// 빈 규칙 체인을 생성합니다.
    pub fn new(config: MacConfig, lock_wait: Duration) -> Self {
        MacRuleChain {
            config,
            lock_wait,
            alert_tx: None,
            rules: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Popup 판정을 내보낼 알림 채널을 연결합니다.
    #[must_use]
    pub fn with_alert_tx(mut self, tx: mpsc::Sender<AlertEvent>) -> Self {
        self.alert_tx = Some(tx);
        self
    }

    /// 현재 규칙 목록의 복사본을 반환합니다.
    pub fn rules(&self) -> Vec<MacRule> {
        match self.rules.try_read_for(self.lock_wait) {
            Some(guard) => guard.as_ref().clone(),
            None => {
                tracing::warn!("mac rules lock timeout, returning empty snapshot");
                Vec::new()
            }
        }
    }

    /// 규칙 목록을 통째로 교체합니다.
    pub fn set_rules(&self, rules: Vec<MacRule>) -> Result<(), PalisadeError> {
        self.mutate(move |list| {
            *list = rules;
            Ok(())
        })
    }

    /// 규칙을 목록 끝에 추가합니다.
    pub fn add_rule(&self, rule: MacRule) -> Result<(), PalisadeError> {
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

    /// 규칙을 한 칸 위로 올립니다. 맨 위 규칙이면 no-op.
    pub fn move_up(&self, index: usize) -> Result<(), PalisadeError> {
        self.mutate(move |list| {
            if index >= list.len() {
                return Err(PolicyEngineError::RuleIndex {
                    index,
                    len: list.len(),
                });
            }
            if index > 0 {
                list.swap(index, index - 1);
            }
            Ok(())
        })
    }

    /// 규칙을 한 칸 아래로 내립니다. 맨 아래 규칙이면 no-op.
    pub fn move_down(&self, index: usize) -> Result<(), PalisadeError> {
        self.mutate(move |list| {
            if index >= list.len() {
                return Err(PolicyEngineError::RuleIndex {
                    index,
                    len: list.len(),
                });
            }
            if index + 1 < list.len() {
                list.swap(index, index + 1);
            }
            Ok(())
        })
    }

    /// 규칙 목록을 스냅샷 파일에서 복원합니다.
    pub async fn load_state(&self, path: impl AsRef<Path>) -> Result<(), PalisadeError> {
        let loaded: Option<Vec<MacRule>> = palisade_core::persist::load_state(path).await?;
        self.set_rules(loaded.unwrap_or_default())
    }

    /// 규칙 목록을 스냅샷 파일에 기록합니다.
    pub async fn save_state(&self, path: impl AsRef<Path>) -> Result<(), PalisadeError> {
        let rules = self.rules();
        palisade_core::persist::save_state(path, &rules).await
    }

    /// 복사 후 교체: 현재 목록을 복제해 고치고 새 Arc로 바꿔 끼웁니다.
    fn mutate(
        &self,
        f: impl FnOnce(&mut Vec<MacRule>) -> Result<(), PolicyEngineError>,
    ) -> Result<(), PalisadeError> {
        let mut guard = self
            .rules
            .try_write_for(self.lock_wait)
            .ok_or(PolicyEngineError::LockTimeout {
                policy: "mac-filter",
            })
            .map_err(PalisadeError::from)?;

        let mut next = guard.as_ref().clone();
        f(&mut next).map_err(PalisadeError::from)?;
        *guard = Arc::new(next);
        Ok(())
    }
}

impl PacketPolicy for MacRuleChain {
    fn name(&self) -> &str {
        MODULE_MAC
    }

    fn evaluate(&self, packet: &PacketView) -> Result<Decision, PalisadeError> {
        if !self.config.enabled || !packet.layers.has(Layer::Eth) {
            return Ok(Decision::allow());
        }
        counter!(POLICY_PACKETS_TOTAL, LABEL_POLICY => MODULE_MAC).increment(1);

        let snapshot = {
            let guard = self
                .rules
                .try_read_for(self.lock_wait)
                .ok_or(PolicyEngineError::LockTimeout {
                    policy: "mac-filter",
                })
                .map_err(PalisadeError::from)?;
            Arc::clone(&guard)
        };

        for rule in snapshot.iter() {
            match rule.status_for(packet) {
                RuleAction::Undetermined => continue,
                RuleAction::Allowed => {
                    if rule.log {
                        tracing::debug!(
                            src = %packet.src_mac,
                            dst = %packet.dst_mac,
                            "allowed packet from {} to {}",
                            packet.src_mac,
                            packet.dst_mac,
                        );
                    }
                    return Ok(Decision::allow());
                }
                RuleAction::Blocked => {
                    let mut decision = Decision::drop();
                    let message =
                        format!("blocked packet from {} to {}", packet.src_mac, packet.dst_mac);
                    if rule.log {
                        decision = decision.with_log();
                        tracing::info!(
                            src = %packet.src_mac,
                            dst = %packet.dst_mac,
                            "{message}"
                        );
                    }
                    if rule.notify {
                        decision = decision.with_popup();
                        try_send_alert(
                            self.alert_tx.as_ref(),
                            AlertEvent::new(MODULE_MAC, message, None, decision),
                        );
                    }
                    counter!(POLICY_PACKETS_DROPPED_TOTAL, LABEL_POLICY => MODULE_MAC)
                        .increment(1);
                    return Ok(decision);
                }
            }
        }

        // 어느 규칙도 확정하지 않으면 기본 통과
        Ok(Decision::allow())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(s: &str) -> MacAddr {
        s.parse().unwrap()
    }

    fn chain() -> MacRuleChain {
        MacRuleChain::new(MacConfig::default(), Duration::from_secs(1))
    }

    fn outbound_to(dst: &str) -> PacketView {
        PacketView::builder()
            .layer(Layer::Eth)
            .layer(Layer::Ip)
            .src_mac(mac("aa:aa:aa:aa:aa:aa"))
            .dst_mac(mac(dst))
            .outbound(true)
            .build()
    }

    fn inbound_from(src: &str) -> PacketView {
        PacketView::builder()
            .layer(Layer::Eth)
            .layer(Layer::Ip)
            .src_mac(mac(src))
            .dst_mac(mac("aa:aa:aa:aa:aa:aa"))
            .build()
    }

    fn block_rule(target: Option<&str>, direction: Direction) -> MacRule {
        MacRule {
            action: RuleAction::Blocked,
            mac: target.map(mac),
            direction,
            log: false,
            notify: false,
        }
    }

    fn allow_rule(target: Option<&str>, direction: Direction) -> MacRule {
        MacRule {
            action: RuleAction::Allowed,
            mac: target.map(mac),
            direction,
            log: false,
            notify: false,
        }
    }

    #[test]
    fn first_match_wins_and_order_matters() {
        let chain = chain();
        chain
            .add_rule(block_rule(Some("ee:ee:ee:ee:ee:ee"), Direction::OUT))
            .unwrap();
        chain.add_rule(allow_rule(None, Direction::OUT)).unwrap();

        // X로 나가는 패킷은 차단, 다른 곳은 와일드카드 허용
        assert!(chain
            .evaluate(&outbound_to("ee:ee:ee:ee:ee:ee"))
            .unwrap()
            .is_drop());
        assert!(chain
            .evaluate(&outbound_to("bb:bb:bb:bb:bb:bb"))
            .unwrap()
            .is_allow());

        // 순서를 뒤집으면 와일드카드 허용이 먼저 걸려 X도 통과
        chain.move_up(1).unwrap();
        assert!(chain
            .evaluate(&outbound_to("ee:ee:ee:ee:ee:ee"))
            .unwrap()
            .is_allow());
    }

    #[test]
    fn default_is_allow_when_no_rule_decides() {
        let chain = chain();
        assert!(chain.evaluate(&outbound_to("bb:bb:bb:bb:bb:bb")).unwrap().is_allow());

        // 방향이 다른 규칙은 판정을 내리지 못함
        chain.add_rule(block_rule(None, Direction::IN)).unwrap();
        assert!(chain.evaluate(&outbound_to("bb:bb:bb:bb:bb:bb")).unwrap().is_allow());
    }

    #[test]
    fn inbound_rules_compare_source_mac() {
        let chain = chain();
        chain
            .add_rule(block_rule(Some("ee:ee:ee:ee:ee:ee"), Direction::IN))
            .unwrap();

        assert!(chain
            .evaluate(&inbound_from("ee:ee:ee:ee:ee:ee"))
            .unwrap()
            .is_drop());
        assert!(chain
            .evaluate(&inbound_from("bb:bb:bb:bb:bb:bb"))
            .unwrap()
            .is_allow());
    }

    #[test]
    fn undetermined_rules_pass_to_next() {
        let chain = chain();
        chain
            .add_rule(MacRule {
                action: RuleAction::Undetermined,
                mac: None,
                direction: Direction::BOTH,
                log: false,
                notify: false,
            })
            .unwrap();
        chain.add_rule(block_rule(None, Direction::BOTH)).unwrap();

        assert!(chain.evaluate(&inbound_from("bb:bb:bb:bb:bb:bb")).unwrap().is_drop());
    }

    #[tokio::test]
    async fn blocked_rule_flags_drive_log_and_popup() {
        let (tx, mut rx) = mpsc::channel(4);
        let chain = MacRuleChain::new(MacConfig::default(), Duration::from_secs(1))
            .with_alert_tx(tx);
        chain
            .add_rule(MacRule {
                action: RuleAction::Blocked,
                mac: None,
                direction: Direction::BOTH,
                log: true,
                notify: true,
            })
            .unwrap();

        let decision = chain.evaluate(&inbound_from("ee:ee:ee:ee:ee:ee")).unwrap();
        assert!(decision.is_drop());
        assert!(decision.should_log());
        assert!(decision.should_popup());

        let alert = rx.recv().await.unwrap();
        assert!(alert.message.contains("ee:ee:ee:ee:ee:ee"));
    }

    #[test]
    fn allowed_verdict_is_plain_even_with_flags() {
        let chain = chain();
        chain
            .add_rule(MacRule {
                action: RuleAction::Allowed,
                mac: None,
                direction: Direction::BOTH,
                log: true,
                notify: true,
            })
            .unwrap();

        let decision = chain.evaluate(&inbound_from("bb:bb:bb:bb:bb:bb")).unwrap();
        assert!(decision.is_allow());
        assert!(!decision.should_log());
        assert!(!decision.should_popup());
    }

    #[test]
    fn move_and_remove_respect_bounds() {
        let chain = chain();
        chain.add_rule(block_rule(None, Direction::OUT)).unwrap();

        // 맨 위/맨 아래에서의 이동은 no-op
        chain.move_up(0).unwrap();
        chain.move_down(0).unwrap();
        assert_eq!(chain.rules().len(), 1);

        assert!(chain.move_up(5).is_err());
        assert!(chain.remove_rule(5).is_err());

        chain.remove_rule(0).unwrap();
        assert!(chain.rules().is_empty());
    }

    #[test]
    fn rule_display_matches_human_rendering() {
        let rule = MacRule {
            action: RuleAction::Blocked,
            mac: Some(mac("00:1a:2b:3c:4d:5e")),
            direction: Direction::BOTH,
            log: true,
            notify: true,
        };
        assert_eq!(
            rule.to_string(),
            "blocks MAC 00:1a:2b:3c:4d:5e in and out and notifies and logs"
        );

        let rule = MacRule {
            action: RuleAction::Allowed,
            mac: None,
            direction: Direction::OUT,
            log: false,
            notify: false,
        };
        assert_eq!(rule.to_string(), "allows all MACs out");
    }

    #[tokio::test]
    async fn rules_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mac.json");

        let chain = chain();
        chain
            .add_rule(block_rule(Some("ee:ee:ee:ee:ee:ee"), Direction::OUT))
            .unwrap();
        chain.add_rule(allow_rule(None, Direction::BOTH)).unwrap();
        chain.save_state(&path).await.unwrap();

        let restored = MacRuleChain::new(MacConfig::default(), Duration::from_secs(1));
        restored.load_state(&path).await.unwrap();
        assert_eq!(restored.rules(), chain.rules());
    }

    #[test]
    fn non_ethernet_packets_pass_through() {
        let chain = chain();
        chain.add_rule(block_rule(None, Direction::BOTH)).unwrap();

        let packet = PacketView::builder().layer(Layer::Ip).build();
        assert!(chain.evaluate(&packet).unwrap().is_allow());
    }
}
