//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 캡처 계층이 디코딩한 패킷의 읽기 전용 뷰([`PacketView`])와
//! 정책 모듈이 반환하는 판정([`Decision`]), 그리고 클로킹/포트 노킹이
//! 합성하는 송신 패킷([`SynthPacket`])을 정의합니다.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::SystemTime;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// =============================================================================
// 프로토콜 레이어
// =============================================================================

/// 패킷이 포함하는 프로토콜 레이어
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// 이더넷 프레임
    Eth,
    /// IP 헤더
    Ip,
    /// TCP 세그먼트
    Tcp,
    /// UDP 데이터그램
    Udp,
    /// ICMP 메시지
    Icmp,
}

impl Layer {
    const fn bit(self) -> u8 {
        match self {
            Layer::Eth => 1,
            Layer::Ip => 1 << 1,
            Layer::Tcp => 1 << 2,
            Layer::Udp => 1 << 3,
            Layer::Icmp => 1 << 4,
        }
    }
}

/// 한 패킷에 존재하는 레이어들의 집합
///
/// 디코딩된 패킷은 자신이 포함하는 모든 레이어를 기록합니다.
/// 예: TCP 패킷은 `ETH | IP | TCP`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSet(u8);

impl LayerSet {
    /// 빈 레이어 집합
    pub const fn empty() -> Self {
        LayerSet(0)
    }

    /// 레이어를 추가한 새 집합을 반환합니다.
    #[must_use]
    pub const fn with(self, layer: Layer) -> Self {
        LayerSet(self.0 | layer.bit())
    }

    /// 해당 레이어 포함 여부
    pub const fn has(self, layer: Layer) -> bool {
        self.0 & layer.bit() != 0
    }
}

impl fmt::Display for LayerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (layer, name) in [
            (Layer::Eth, "eth"),
            (Layer::Ip, "ip"),
            (Layer::Tcp, "tcp"),
            (Layer::Udp, "udp"),
            (Layer::Icmp, "icmp"),
        ] {
            if self.has(layer) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

// =============================================================================
// MAC 주소
// =============================================================================

/// 링크 계층(MAC) 주소
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// 모든 바이트가 0인 주소 (합성 패킷의 기본값)
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// 원시 바이트를 반환합니다.
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5],
        )
    }
}

/// MAC 주소 파싱 실패
#[derive(Debug, thiserror::Error)]
#[error("invalid mac address: {0}")]
pub struct MacAddrParseError(String);

impl FromStr for MacAddr {
    type Err = MacAddrParseError;

    /// `aa:bb:cc:dd:ee:ff` 또는 `aa-bb-cc-dd-ee-ff` 형식을 받습니다.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(MacAddrParseError(s.to_owned()));
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] =
                u8::from_str_radix(part, 16).map_err(|_| MacAddrParseError(s.to_owned()))?;
        }
        Ok(MacAddr(bytes))
    }
}

// 설정/상태 파일에서는 사람이 읽는 문자열 형태로 직렬화합니다.
impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// PacketView — 디코딩된 패킷의 읽기 전용 뷰
// =============================================================================

/// 캡처 계층이 전달하는 디코딩된 패킷 한 개의 읽기 전용 뷰
///
/// 정책 모듈은 `evaluate` 호출 동안만 이 뷰를 빌려 사용합니다.
/// 필드 변경은 불가능하며, 새 패킷 합성은 [`SynthPacket`]으로 합니다.
#[derive(Debug, Clone)]
pub struct PacketView {
    /// 포함된 프로토콜 레이어
    pub layers: LayerSet,
    /// 출발지 MAC
    pub src_mac: MacAddr,
    /// 목적지 MAC
    pub dst_mac: MacAddr,
    /// 출발지 IP
    pub src_ip: IpAddr,
    /// 목적지 IP
    pub dst_ip: IpAddr,
    /// 출발지 포트 (TCP/UDP만)
    pub src_port: Option<u16>,
    /// 목적지 포트 (TCP/UDP만)
    pub dst_port: Option<u16>,
    /// IP TTL
    pub ttl: u8,
    /// 송신 방향 여부 (false = 수신)
    pub outbound: bool,
    /// TCP SYN 플래그
    pub syn: bool,
    /// TCP ACK 플래그
    pub ack: bool,
    /// ICMP 타입 (ICMP만)
    pub icmp_type: Option<u8>,
    /// ICMP 코드 (ICMP만)
    pub icmp_code: Option<u8>,
    /// 페이로드 (헤더 제외)
    pub payload: Bytes,
    /// 캡처 시각
    pub timestamp: SystemTime,
}

impl PacketView {
    /// 빌더를 반환합니다. 캡처 계층과 테스트가 사용합니다.
    pub fn builder() -> PacketViewBuilder {
        PacketViewBuilder::default()
    }

    /// SYN만 서 있고 ACK는 없는 TCP 세그먼트 여부
    ///
    /// 연결 개시 패킷의 판별에 사용합니다. TCP 레이어가 없으면 false.
    pub fn is_syn_only(&self) -> bool {
        self.layers.has(Layer::Tcp) && self.syn && !self.ack
    }

    /// 페이로드가 비어 있는지 여부
    pub fn has_empty_payload(&self) -> bool {
        self.payload.is_empty()
    }

    /// DNS 트래픽 여부 (어느 쪽이든 포트 53)
    pub fn is_dns(&self) -> bool {
        self.src_port == Some(53) || self.dst_port == Some(53)
    }
}

impl fmt::Display for PacketView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} [{}] {}",
            self.src_ip,
            self.src_port.unwrap_or(0),
            self.dst_ip,
            self.dst_port.unwrap_or(0),
            self.layers,
            if self.outbound { "out" } else { "in" },
        )
    }
}

/// [`PacketView`] 빌더
///
/// 지정하지 않은 필드의 기본값: 레이어 없음, 주소 0.0.0.0 / MAC 0,
/// 포트 없음, TTL 64, 수신 방향, 플래그 해제, 빈 페이로드, 생성 시각.
#[derive(Debug, Clone)]
pub struct PacketViewBuilder {
    layers: LayerSet,
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: IpAddr,
    dst_ip: IpAddr,
    src_port: Option<u16>,
    dst_port: Option<u16>,
    ttl: u8,
    outbound: bool,
    syn: bool,
    ack: bool,
    icmp_type: Option<u8>,
    icmp_code: Option<u8>,
    payload: Bytes,
    timestamp: SystemTime,
}

impl Default for PacketViewBuilder {
    fn default() -> Self {
        Self {
            layers: LayerSet::empty(),
            src_mac: MacAddr::ZERO,
            dst_mac: MacAddr::ZERO,
            src_ip: IpAddr::from([0, 0, 0, 0]),
            dst_ip: IpAddr::from([0, 0, 0, 0]),
            src_port: None,
            dst_port: None,
            ttl: 64,
            outbound: false,
            syn: false,
            ack: false,
            icmp_type: None,
            icmp_code: None,
            payload: Bytes::new(),
            timestamp: SystemTime::now(),
        }
    }
}

impl PacketViewBuilder {
    /// 레이어를 추가합니다. 누적됩니다.
    #[must_use]
    pub fn layer(mut self, layer: Layer) -> Self {
        self.layers = self.layers.with(layer);
        self
    }

    #[must_use]
    pub fn src_mac(mut self, mac: MacAddr) -> Self {
        self.src_mac = mac;
        self
    }

    #[must_use]
    pub fn dst_mac(mut self, mac: MacAddr) -> Self {
        self.dst_mac = mac;
        self
    }

    #[must_use]
    pub fn src_ip(mut self, ip: IpAddr) -> Self {
        self.src_ip = ip;
        self
    }

    #[must_use]
    pub fn dst_ip(mut self, ip: IpAddr) -> Self {
        self.dst_ip = ip;
        self
    }

    #[must_use]
    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = Some(port);
        self
    }

    #[must_use]
    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = Some(port);
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn outbound(mut self, outbound: bool) -> Self {
        self.outbound = outbound;
        self
    }

    #[must_use]
    pub fn syn(mut self, syn: bool) -> Self {
        self.syn = syn;
        self
    }

    #[must_use]
    pub fn ack(mut self, ack: bool) -> Self {
        self.ack = ack;
        self
    }

    #[must_use]
    pub fn icmp(mut self, icmp_type: u8, icmp_code: u8) -> Self {
        self.icmp_type = Some(icmp_type);
        self.icmp_code = Some(icmp_code);
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 뷰를 완성합니다.
    pub fn build(self) -> PacketView {
        PacketView {
            layers: self.layers,
            src_mac: self.src_mac,
            dst_mac: self.dst_mac,
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            src_port: self.src_port,
            dst_port: self.dst_port,
            ttl: self.ttl,
            outbound: self.outbound,
            syn: self.syn,
            ack: self.ack,
            icmp_type: self.icmp_type,
            icmp_code: self.icmp_code,
            payload: self.payload,
            timestamp: self.timestamp,
        }
    }
}

// =============================================================================
// Decision — 정책 판정
// =============================================================================

/// 패킷의 최종 처분
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// 통과
    Allow,
    /// 폐기
    Drop,
}

/// 정책 모듈이 반환하는 판정
///
/// `Allow`와 `Drop`은 타입 구조상 동시에 성립할 수 없고,
/// `log`/`popup`은 어느 쪽에도 붙일 수 있는 수식자입니다.
/// 기본값은 수식자 없는 `Allow`입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    verdict: Verdict,
    log: bool,
    popup: bool,
}

impl Decision {
    /// 통과 판정
    pub const fn allow() -> Self {
        Decision {
            verdict: Verdict::Allow,
            log: false,
            popup: false,
        }
    }

    /// 폐기 판정
    pub const fn drop() -> Self {
        Decision {
            verdict: Verdict::Drop,
            log: false,
            popup: false,
        }
    }

    /// 로그 수식자를 붙입니다.
    #[must_use]
    pub const fn with_log(mut self) -> Self {
        self.log = true;
        self
    }

    /// 팝업(운영자 알림) 수식자를 붙입니다.
    #[must_use]
    pub const fn with_popup(mut self) -> Self {
        self.popup = true;
        self
    }

    pub const fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub const fn is_drop(&self) -> bool {
        matches!(self.verdict, Verdict::Drop)
    }

    pub const fn is_allow(&self) -> bool {
        matches!(self.verdict, Verdict::Allow)
    }

    pub const fn should_log(&self) -> bool {
        self.log
    }

    pub const fn should_popup(&self) -> bool {
        self.popup
    }
}

impl Default for Decision {
    fn default() -> Self {
        Decision::allow()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.verdict {
            Verdict::Allow => write!(f, "allow")?,
            Verdict::Drop => write!(f, "drop")?,
        }
        if self.log {
            write!(f, "+log")?;
        }
        if self.popup {
            write!(f, "+popup")?;
        }
        Ok(())
    }
}

// =============================================================================
// SynthPacket — 합성 송신 패킷
// =============================================================================

/// 정책이 합성하여 캡처 계층으로 내보내는 패킷
///
/// 클로킹 모드의 위장 SYN-ACK 응답과 포트 노킹의 트리거 SYN,
/// 두 용도만 존재하므로 TCP 필드만 담습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthPacket {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    /// 초기 시퀀스 번호
    pub seq: u32,
    /// TCP 윈도우 크기
    pub window: u16,
    pub syn: bool,
    pub ack: bool,
    pub ttl: u8,
}

impl SynthPacket {
    /// 수신 SYN에 대한 위장 SYN-ACK 응답을 만듭니다.
    ///
    /// 출발지/목적지의 주소·포트·MAC을 맞바꾸고, 호출자가 넘긴
    /// 시퀀스 번호와 고정 윈도우 8192를 사용합니다.
    pub fn syn_ack_reply(probe: &PacketView, seq: u32) -> Self {
        SynthPacket {
            src_mac: probe.dst_mac,
            dst_mac: probe.src_mac,
            src_ip: probe.dst_ip,
            dst_ip: probe.src_ip,
            src_port: probe.dst_port.unwrap_or(0),
            dst_port: probe.src_port.unwrap_or(0),
            seq,
            window: 8192,
            syn: true,
            ack: true,
            ttl: 64,
        }
    }

    /// 포트 노킹용 SYN 패킷을 만듭니다.
    pub fn syn(
        src_mac: MacAddr,
        dst_mac: MacAddr,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        src_port: u16,
        dst_port: u16,
    ) -> Self {
        SynthPacket {
            src_mac,
            dst_mac,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            seq: 0,
            window: 8192,
            syn: true,
            ack: false,
            ttl: 64,
        }
    }
}

impl fmt::Display for SynthPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} syn={} ack={}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.syn, self.ack,
        )
    }
}
