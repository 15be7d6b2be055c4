#![doc = include_str!("../README.md")]

pub mod ddos;
pub mod error;
pub mod guard;
pub mod knock;
pub mod mac;
pub mod range;
pub mod scan;
pub mod store;
pub mod trap;

// --- 주요 타입 re-export ---

pub use ddos::{BlockedEntry, DdosDetector};
pub use error::PolicyEngineError;
pub use guard::RangeGuard;
pub use knock::{KnockRule, PortKnocker};
pub use mac::{Direction, MacRule, MacRuleChain, RuleAction};
pub use range::{AddressRange, parse_range_line};
pub use scan::{ScanDetector, ScanRecordStats, spawn_sweeper};
pub use store::{BLACKLIST, IpListStore, SCAN_BLOCKLIST};
pub use trap::PortTrap;
