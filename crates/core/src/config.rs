//! 설정 관리 — palisade.toml 파싱 및 런타임 설정
//!
//! [`PalisadeConfig`]는 모든 정책 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. 환경변수 (`PALISADE_SCAN_CLOAKED_MODE=true` 형식)
//! 2. 설정 파일 (`palisade.toml`)
//! 3. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), palisade_core::error::PalisadeError> {
//! use palisade_core::config::PalisadeConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = PalisadeConfig::load("palisade.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = PalisadeConfig::parse("[scan]\nblock_immediately = true")?;
//! # Ok(())
//! # }
//! ```

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, PalisadeError};

/// Palisade 통합 설정
///
/// `palisade.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 정책 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PalisadeConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 스캔 탐지 설정
    #[serde(default)]
    pub scan: ScanConfig,
    /// DDoS 완화 설정
    #[serde(default)]
    pub ddos: DdosConfig,
    /// MAC 필터 설정
    #[serde(default)]
    pub mac: MacConfig,
    /// 포트 노킹 설정
    #[serde(default)]
    pub knock: KnockConfig,
    /// 포트 트랩 설정
    #[serde(default)]
    pub trap: TrapConfig,
    /// IP 범위 차단 설정
    #[serde(default)]
    pub guard: GuardConfig,
}

impl PalisadeConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PalisadeError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, PalisadeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PalisadeError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                PalisadeError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, PalisadeError> {
        toml::from_str(toml_str).map_err(|e| {
            PalisadeError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `PALISADE_{SECTION}_{FIELD}`
    /// 예: `PALISADE_DDOS_THRESHOLD_MS=25`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "PALISADE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.data_dir, "PALISADE_GENERAL_DATA_DIR");
        override_u64(
            &mut self.general.lock_wait_secs,
            "PALISADE_GENERAL_LOCK_WAIT_SECS",
        );

        // Scan
        override_bool(&mut self.scan.enabled, "PALISADE_SCAN_ENABLED");
        override_bool(
            &mut self.scan.block_immediately,
            "PALISADE_SCAN_BLOCK_IMMEDIATELY",
        );
        override_bool(&mut self.scan.cloaked_mode, "PALISADE_SCAN_CLOAKED_MODE");
        override_usize(&mut self.scan.port_threshold, "PALISADE_SCAN_PORT_THRESHOLD");
        override_f64(
            &mut self.scan.max_average_interval_ms,
            "PALISADE_SCAN_MAX_AVERAGE_INTERVAL_MS",
        );
        override_u64(
            &mut self.scan.sweep_interval_secs,
            "PALISADE_SCAN_SWEEP_INTERVAL_SECS",
        );

        // DDoS
        override_bool(&mut self.ddos.enabled, "PALISADE_DDOS_ENABLED");
        override_u64(&mut self.ddos.threshold_ms, "PALISADE_DDOS_THRESHOLD_MS");
        override_ip(&mut self.ddos.local_ip, "PALISADE_DDOS_LOCAL_IP");

        // MAC / Knock
        override_bool(&mut self.mac.enabled, "PALISADE_MAC_ENABLED");
        override_bool(&mut self.knock.enabled, "PALISADE_KNOCK_ENABLED");

        // Trap
        override_bool(&mut self.trap.enabled, "PALISADE_TRAP_ENABLED");
        override_port_csv(&mut self.trap.ports, "PALISADE_TRAP_PORTS");

        // Guard
        override_bool(&mut self.guard.enabled, "PALISADE_GUARD_ENABLED");
        override_bool(&mut self.guard.block_inbound, "PALISADE_GUARD_BLOCK_INBOUND");
        override_bool(&mut self.guard.log_blocked, "PALISADE_GUARD_LOG_BLOCKED");
        override_csv(&mut self.guard.list_files, "PALISADE_GUARD_LIST_FILES");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), PalisadeError> {
        const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!(
                    "'{}' is not one of {:?}",
                    self.general.log_level, LOG_LEVELS
                ),
            }
            .into());
        }
        if self.general.lock_wait_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "general.lock_wait_secs".to_owned(),
                reason: "must be positive".to_owned(),
            }
            .into());
        }
        if self.scan.port_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan.port_threshold".to_owned(),
                reason: "must be positive".to_owned(),
            }
            .into());
        }
        if self.scan.max_average_interval_ms <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "scan.max_average_interval_ms".to_owned(),
                reason: "must be positive".to_owned(),
            }
            .into());
        }
        if self.scan.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan.sweep_interval_secs".to_owned(),
                reason: "must be positive".to_owned(),
            }
            .into());
        }
        if self.ddos.threshold_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ddos.threshold_ms".to_owned(),
                reason: "must be positive".to_owned(),
            }
            .into());
        }
        if self.ddos.counter_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ddos.counter_threshold".to_owned(),
                reason: "must be positive".to_owned(),
            }
            .into());
        }
        if self.ddos.rate_table_cap == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ddos.rate_table_cap".to_owned(),
                reason: "must be positive".to_owned(),
            }
            .into());
        }
        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 상태 스냅샷이 저장되는 디렉토리
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// 공유 저장소/정책 테이블 락의 최대 대기 시간 (초)
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,
}

impl GeneralConfig {
    /// 락 대기 시간을 [`Duration`]으로 반환합니다.
    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            lock_wait_secs: default_lock_wait_secs(),
        }
    }
}

/// 스캔 탐지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// 모듈 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 보고 기준이 되는 고유 목적지 포트 수
    ///
    /// 기본 100은 nmap -F(Fast 모드, 상위 100 포트)에 맞춘 값입니다.
    #[serde(default = "default_scan_port_threshold")]
    pub port_threshold: usize,
    /// 보고 기준이 되는 평균 패킷 간격 상한 (밀리초)
    #[serde(default = "default_scan_max_average_interval_ms")]
    pub max_average_interval_ms: f64,
    /// 보고 즉시 공유 차단 리스트에 추가할지 여부
    ///
    /// false면 잠정(potentials) 목록에만 올려 운영자 판단에 맡깁니다.
    #[serde(default)]
    pub block_immediately: bool,
    /// 클로킹 모드 — 모든 수신 SYN에 위장 SYN-ACK으로 응답
    #[serde(default)]
    pub cloaked_mode: bool,
    /// 추적 레코드 정리 주기 (초)
    #[serde(default = "default_scan_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port_threshold: default_scan_port_threshold(),
            max_average_interval_ms: default_scan_max_average_interval_ms(),
            block_immediately: false,
            cloaked_mode: false,
            sweep_interval_secs: default_scan_sweep_interval_secs(),
        }
    }
}

/// DDoS 완화 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DdosConfig {
    /// 모듈 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 패킷 간격 임계값 (밀리초) — 이보다 빠르게 몰려오면 카운트
    ///
    /// 값을 낮추면 오탐이 줄지만 탐지는 느려집니다.
    #[serde(default = "default_ddos_threshold_ms")]
    pub threshold_ms: u64,
    /// 플러드 판정 카운터 임계값
    #[serde(default = "default_ddos_counter_threshold")]
    pub counter_threshold: u32,
    /// 레이트 테이블 엔트리 상한 — 초과 시 테이블 전체를 비움
    #[serde(default = "default_ddos_rate_table_cap")]
    pub rate_table_cap: usize,
    /// 스머프 판정에 쓰는 로컬 호스트 주소
    ///
    /// 미설정 시 스머프 휴리스틱은 비활성 (자기 주소를 모르면 반사 판정 불가).
    #[serde(default)]
    pub local_ip: Option<IpAddr>,
}

impl DdosConfig {
    /// 패킷 간격 임계값을 [`Duration`]으로 반환합니다.
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }
}

impl Default for DdosConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ms: default_ddos_threshold_ms(),
            counter_threshold: default_ddos_counter_threshold(),
            rate_table_cap: default_ddos_rate_table_cap(),
            local_ip: None,
        }
    }
}

/// MAC 필터 설정 — 규칙 목록 자체는 상태 스냅샷으로 관리됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacConfig {
    /// 모듈 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// 포트 노킹 설정 — 규칙 목록 자체는 상태 스냅샷으로 관리됩니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnockConfig {
    /// 모듈 활성화 여부
    #[serde(default)]
    pub enabled: bool,
}

/// 포트 트랩 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrapConfig {
    /// 모듈 활성화 여부
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 트랩 포트 목록 — 여기 접속을 시도한 출발지는 즉시 블랙리스트
    #[serde(default)]
    pub ports: Vec<u16>,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ports: Vec::new(),
        }
    }
}

/// IP 범위 차단 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// 모듈 활성화 여부
    #[serde(default)]
    pub enabled: bool,
    /// 차단 범위 리스트 파일 경로들 (`tag:lowIP-highIP` 형식)
    #[serde(default)]
    pub list_files: Vec<String>,
    /// 수신 패킷도 같은 범위로 차단할지 여부
    #[serde(default)]
    pub block_inbound: bool,
    /// 차단 시 로그를 남길지 여부
    #[serde(default = "default_true")]
    pub log_blocked: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            list_files: Vec::new(),
            block_inbound: false,
            log_blocked: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_data_dir() -> String {
    "/var/lib/palisade".to_owned()
}

fn default_lock_wait_secs() -> u64 {
    60
}

fn default_scan_port_threshold() -> usize {
    100
}

fn default_scan_max_average_interval_ms() -> f64 {
    2000.0
}

fn default_scan_sweep_interval_secs() -> u64 {
    60
}

fn default_ddos_threshold_ms() -> u64 {
    10
}

fn default_ddos_counter_threshold() -> u32 {
    50
}

fn default_ddos_rate_table_cap() -> usize {
    500
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(env_key, value = %val, "ignoring non-boolean env override"),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(env_key, value = %val, "ignoring non-numeric env override"),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(env_key, value = %val, "ignoring non-numeric env override"),
        }
    }
}

fn override_f64(target: &mut f64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<f64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => tracing::warn!(env_key, value = %val, "ignoring non-numeric env override"),
        }
    }
}

fn override_ip(target: &mut Option<IpAddr>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<IpAddr>() {
            Ok(parsed) => *target = Some(parsed),
            Err(_) => tracing::warn!(env_key, value = %val, "ignoring unparsable ip env override"),
        }
    }
}

fn override_port_csv(target: &mut Vec<u16>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .filter_map(|s| s.trim().parse::<u16>().ok())
            .collect();
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val.split(',').map(|s| s.trim().to_owned()).collect();
    }
}
