//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 정책 모듈은 이 상수를 사용하여 `metrics::counter!()`,
//! `metrics::gauge!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `palisade_`
//! - 접미어: `_total` (counter), 없음 (gauge)

use metrics::{describe_counter, describe_gauge};

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 정책 레이블 키 (scan, ddos, mac, knock, trap, guard)
pub const LABEL_POLICY: &str = "policy";

/// 차단 사유 레이블 키 (dos, fraggle, smurf)
pub const LABEL_REASON: &str = "reason";

/// 리스트명 레이블 키
pub const LABEL_LIST: &str = "list";

// ─── 정책 공통 메트릭 ──────────────────────────────────────────────

/// 평가된 전체 패킷 수 (counter, label: policy)
pub const POLICY_PACKETS_TOTAL: &str = "palisade_policy_packets_total";

/// 폐기 판정된 패킷 수 (counter, label: policy)
pub const POLICY_PACKETS_DROPPED_TOTAL: &str = "palisade_policy_packets_dropped_total";

// ─── 스캔 탐지 메트릭 ──────────────────────────────────────────────

/// 스캔 보고 횟수 (counter)
pub const SCAN_REPORTS_TOTAL: &str = "palisade_scan_reports_total";

/// 현재 추적 중인 출발지 수 (gauge)
pub const SCAN_TRACKED_SOURCES: &str = "palisade_scan_tracked_sources";

/// 클로킹 모드로 송신한 위장 SYN-ACK 수 (counter)
pub const SCAN_CLOAK_REPLIES_TOTAL: &str = "palisade_scan_cloak_replies_total";

// ─── DDoS 메트릭 ──────────────────────────────────────────────────

/// 플러드 판정으로 차단된 출발지 수 (counter, label: reason)
pub const DDOS_BLOCKED_TOTAL: &str = "palisade_ddos_blocked_total";

/// 압력 완화로 레이트 테이블을 비운 횟수 (counter)
pub const DDOS_RATE_TABLE_CLEARS_TOTAL: &str = "palisade_ddos_rate_table_clears_total";

// ─── 공유 저장소 메트릭 ────────────────────────────────────────────

/// 락 타임아웃 횟수 (counter)
pub const STORE_LOCK_TIMEOUTS_TOTAL: &str = "palisade_store_lock_timeouts_total";

/// 리스트별 엔트리 수 (gauge, label: list)
pub const STORE_LIST_ENTRIES: &str = "palisade_store_list_entries";

// ─── 기타 정책 메트릭 ──────────────────────────────────────────────

/// 트랩 포트 적중 횟수 (counter)
pub const TRAP_HITS_TOTAL: &str = "palisade_trap_hits_total";

/// 포트 노킹 트리거 횟수 (counter)
pub const KNOCK_TRIGGERS_TOTAL: &str = "palisade_knock_triggers_total";

/// 로드된 차단 범위 수 (gauge)
pub const GUARD_RANGES_LOADED: &str = "palisade_guard_ranges_loaded";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 프로세스 시작 시(recorder 설치 후) 한 번 호출합니다.
pub fn describe_metrics() {
    describe_counter!(
        POLICY_PACKETS_TOTAL,
        "Total packets evaluated, labeled by policy"
    );
    describe_counter!(
        POLICY_PACKETS_DROPPED_TOTAL,
        "Total packets dropped, labeled by policy"
    );
    describe_counter!(SCAN_REPORTS_TOTAL, "Port scan reports emitted");
    describe_gauge!(SCAN_TRACKED_SOURCES, "Sources currently tracked by scan detector");
    describe_counter!(
        SCAN_CLOAK_REPLIES_TOTAL,
        "Spoofed SYN-ACK replies sent in cloaked mode"
    );
    describe_counter!(
        DDOS_BLOCKED_TOTAL,
        "Sources added to the DDoS block cache, labeled by reason"
    );
    describe_counter!(
        DDOS_RATE_TABLE_CLEARS_TOTAL,
        "Rate table pressure-relief clears"
    );
    describe_counter!(
        STORE_LOCK_TIMEOUTS_TOTAL,
        "IP list store lock acquisition timeouts"
    );
    describe_gauge!(STORE_LIST_ENTRIES, "Entries per named IP list");
    describe_counter!(TRAP_HITS_TOTAL, "Connections caught by trap ports");
    describe_counter!(KNOCK_TRIGGERS_TOTAL, "Port knock triggers fired");
    describe_gauge!(GUARD_RANGES_LOADED, "Address ranges currently loaded");
}
