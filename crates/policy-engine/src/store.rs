//! 공유 IP 리스트 저장소 — 정책들을 가로지르는 차단/허용 기반
//!
//! 이름 있는 리스트마다 `주소 -> 마지막 추가 시각` 매핑을 보관합니다.
//! 포트 트랩이 올린 주소를 스캔 탐지가 바로 볼 수 있도록, 저장소
//! 핸들(`Arc<IpListStore>`)은 프로세스 시작 시 한 번 만들어 모든
//! 정책에 주입됩니다.
//!
//! # 락 규율
//! 모든 패킷 처리 호출이 동시에 읽고, 정책이 위반자를 올릴 때만 씁니다.
//! 쓰기가 필요한 호출은 업그레이드 가능한 읽기 클레임으로 들어와
//! 제자리에서 쓰기로 승격하고, 쓰기가 끝나면 읽기 클레임으로 강등하여
//! 원래의 락 컨텍스트를 유지한 채 마무리 조회를 수행합니다.
//! 모든 획득은 유한 대기이며, 타임아웃은 [`StoreError::LockTimeout`]으로
//! 보고됩니다 — 해당 호출만 no-op이 되고 프로세스는 계속 동작합니다.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::{Duration, SystemTime};

use metrics::{counter, gauge};
use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};

use palisade_core::error::{PalisadeError, StoreError};
use palisade_core::metrics::{LABEL_LIST, STORE_LIST_ENTRIES, STORE_LOCK_TIMEOUTS_TOTAL};

/// 포트 트랩이 쓰는 전역 블랙리스트 이름
pub const BLACKLIST: &str = "blacklist";

/// 스캔 탐지기가 소유하는 차단 리스트 이름
pub const SCAN_BLOCKLIST: &str = "scan-blocklist";

type Lists = HashMap<String, HashMap<IpAddr, SystemTime>>;

/// 이름 있는 IP 리스트들의 스레드 안전 저장소
#[derive(Debug)]
pub struct IpListStore {
    lists: RwLock<Lists>,
    lock_wait: Duration,
}

impl IpListStore {
    /// 주어진 락 대기 한도로 빈 저장소를 만듭니다.
    pub fn new(lock_wait: Duration) -> Self {
        IpListStore {
            lists: RwLock::new(HashMap::new()),
            lock_wait,
        }
    }

    /// 주소를 리스트에 현재 시각으로 추가합니다.
    ///
    /// 이미 있던 주소는 마지막 추가 시각이 갱신됩니다.
    /// 반환값은 이번 호출로 새로 추가되었는지 여부입니다.
    pub fn add_to_list(&self, list: &str, ip: IpAddr) -> Result<bool, StoreError> {
        self.add_to_list_at(list, ip, SystemTime::now())
    }

    /// 주소를 명시된 시각으로 추가합니다.
    ///
    /// 스냅샷 복원처럼 추가 시각이 현재가 아닌 경우에 사용합니다.
    pub fn add_to_list_at(
        &self,
        list: &str,
        ip: IpAddr,
        when: SystemTime,
    ) -> Result<bool, StoreError> {
        let guard = self
            .lists
            .try_upgradable_read_for(self.lock_wait)
            .ok_or_else(|| self.timeout(list, "add"))?;

        let was_listed = guard.get(list).is_some_and(|l| l.contains_key(&ip));

        // 제자리 승격: 읽기 클레임을 놓지 않고 쓰기로 올라감
        let mut write = RwLockUpgradableReadGuard::try_upgrade_for(guard, self.lock_wait)
            .map_err(|_| self.timeout(list, "add"))?;
        write.entry(list.to_owned()).or_default().insert(ip, when);

        // 쓰기 완료 후 읽기 클레임으로 강등하여 마무리 조회
        let read = RwLockWriteGuard::downgrade(write);
        let len = read.get(list).map_or(0, HashMap::len);
        gauge!(STORE_LIST_ENTRIES, LABEL_LIST => list.to_owned()).set(len as f64);

        Ok(!was_listed)
    }

    /// 주소가 리스트에 있는지 검사합니다.
    pub fn in_list(&self, list: &str, ip: IpAddr) -> Result<bool, StoreError> {
        let guard = self
            .lists
            .try_read_for(self.lock_wait)
            .ok_or_else(|| self.timeout(list, "read"))?;
        Ok(guard.get(list).is_some_and(|l| l.contains_key(&ip)))
    }

    /// 마지막 추가가 `max_age` 이내인 경우에만 있는 것으로 칩니다.
    pub fn in_list_max_age(
        &self,
        list: &str,
        ip: IpAddr,
        max_age: Duration,
    ) -> Result<bool, StoreError> {
        self.in_list_max_age_at(list, ip, max_age, SystemTime::now())
    }

    /// `now` 기준으로 마지막 추가가 `max_age` 이내인지 검사합니다.
    pub fn in_list_max_age_at(
        &self,
        list: &str,
        ip: IpAddr,
        max_age: Duration,
        now: SystemTime,
    ) -> Result<bool, StoreError> {
        let guard = self
            .lists
            .try_read_for(self.lock_wait)
            .ok_or_else(|| self.timeout(list, "read"))?;
        let Some(added) = guard.get(list).and_then(|l| l.get(&ip)) else {
            return Ok(false);
        };
        // 추가 시각이 now보다 미래인 경우(시계 역행)는 방금 추가된 것으로 취급
        Ok(now.duration_since(*added).map_or(true, |age| age <= max_age))
    }

    /// 주소를 리스트에서 제거합니다. 있었는지 여부를 반환합니다.
    pub fn remove_from_list(&self, list: &str, ip: IpAddr) -> Result<bool, StoreError> {
        let guard = self
            .lists
            .try_upgradable_read_for(self.lock_wait)
            .ok_or_else(|| self.timeout(list, "remove"))?;

        if !guard.get(list).is_some_and(|l| l.contains_key(&ip)) {
            return Ok(false);
        }

        let mut write = RwLockUpgradableReadGuard::try_upgrade_for(guard, self.lock_wait)
            .map_err(|_| self.timeout(list, "remove"))?;
        if let Some(l) = write.get_mut(list) {
            l.remove(&ip);
        }

        let read = RwLockWriteGuard::downgrade(write);
        let len = read.get(list).map_or(0, HashMap::len);
        gauge!(STORE_LIST_ENTRIES, LABEL_LIST => list.to_owned()).set(len as f64);

        Ok(true)
    }

    /// 리스트의 모든 엔트리를 비웁니다.
    pub fn clear_list(&self, list: &str) -> Result<(), StoreError> {
        let mut write = self
            .lists
            .try_write_for(self.lock_wait)
            .ok_or_else(|| self.timeout(list, "clear"))?;
        write.remove(list);
        gauge!(STORE_LIST_ENTRIES, LABEL_LIST => list.to_owned()).set(0.0);
        Ok(())
    }

    /// 리스트의 엔트리 수를 반환합니다. 없는 리스트는 0.
    pub fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        let guard = self
            .lists
            .try_read_for(self.lock_wait)
            .ok_or_else(|| self.timeout(list, "read"))?;
        Ok(guard.get(list).map_or(0, HashMap::len))
    }

    /// 운영자 표시용 리스트 스냅샷
    pub fn snapshot(&self, list: &str) -> Result<Vec<(IpAddr, SystemTime)>, StoreError> {
        let guard = self
            .lists
            .try_read_for(self.lock_wait)
            .ok_or_else(|| self.timeout(list, "read"))?;
        Ok(guard
            .get(list)
            .map(|l| l.iter().map(|(ip, ts)| (*ip, *ts)).collect())
            .unwrap_or_default())
    }

    /// 스냅샷 파일에서 전체 리스트를 복원합니다.
    ///
    /// 파일이 없거나 깨져 있으면 빈 상태로 시작합니다.
    pub async fn load_state(&self, path: impl AsRef<Path>) -> Result<(), PalisadeError> {
        let loaded: Option<Lists> = palisade_core::persist::load_state(path).await?;
        let restored = loaded.unwrap_or_default();

        let mut write = self
            .lists
            .try_write_for(self.lock_wait)
            .ok_or_else(|| self.timeout("*", "load"))?;
        *write = restored;
        Ok(())
    }

    /// 전체 리스트를 스냅샷 파일에 기록합니다.
    pub async fn save_state(&self, path: impl AsRef<Path>) -> Result<(), PalisadeError> {
        // 가드를 await 너머로 들고 가지 않도록 복사 후 해제
        let copy: Lists = {
            let guard = self
                .lists
                .try_read_for(self.lock_wait)
                .ok_or_else(|| self.timeout("*", "save"))?;
            guard.clone()
        };
        palisade_core::persist::save_state(path, &copy).await
    }

    fn timeout(&self, list: &str, op: &'static str) -> StoreError {
        counter!(STORE_LOCK_TIMEOUTS_TOTAL).increment(1);
        tracing::warn!(list, op, wait = ?self.lock_wait, "ip list store lock timeout");
        StoreError::LockTimeout {
            list: list.to_owned(),
            op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> IpListStore {
        IpListStore::new(Duration::from_secs(1))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn add_then_in_list_is_immediately_true() {
        let store = store();
        assert!(store.add_to_list(BLACKLIST, ip("10.0.0.5")).unwrap());
        assert!(store.in_list(BLACKLIST, ip("10.0.0.5")).unwrap());
        assert!(!store.in_list(BLACKLIST, ip("10.0.0.6")).unwrap());
        assert!(!store.in_list("other", ip("10.0.0.5")).unwrap());
    }

    #[test]
    fn re_add_reports_already_listed() {
        let store = store();
        assert!(store.add_to_list(BLACKLIST, ip("10.0.0.5")).unwrap());
        assert!(!store.add_to_list(BLACKLIST, ip("10.0.0.5")).unwrap());
        assert_eq!(store.list_len(BLACKLIST).unwrap(), 1);
    }

    #[test]
    fn max_age_expires_entries() {
        let store = store();
        let now = SystemTime::now();
        let added = now - Duration::from_secs(5);
        store.add_to_list_at(BLACKLIST, ip("10.0.0.5"), added).unwrap();

        // 5초 전 추가: 10초 한도 안, 2초 한도 밖
        assert!(store
            .in_list_max_age_at(BLACKLIST, ip("10.0.0.5"), Duration::from_secs(10), now)
            .unwrap());
        assert!(!store
            .in_list_max_age_at(BLACKLIST, ip("10.0.0.5"), Duration::from_secs(2), now)
            .unwrap());

        // 재추가는 시각을 갱신
        store.add_to_list_at(BLACKLIST, ip("10.0.0.5"), now).unwrap();
        assert!(store
            .in_list_max_age_at(BLACKLIST, ip("10.0.0.5"), Duration::from_secs(2), now)
            .unwrap());
    }

    #[test]
    fn max_age_of_absent_entry_is_false() {
        let store = store();
        assert!(!store
            .in_list_max_age(BLACKLIST, ip("10.0.0.5"), Duration::from_secs(60))
            .unwrap());
    }

    #[test]
    fn remove_and_clear() {
        let store = store();
        store.add_to_list(BLACKLIST, ip("10.0.0.5")).unwrap();
        store.add_to_list(BLACKLIST, ip("10.0.0.6")).unwrap();

        assert!(store.remove_from_list(BLACKLIST, ip("10.0.0.5")).unwrap());
        assert!(!store.remove_from_list(BLACKLIST, ip("10.0.0.5")).unwrap());
        assert_eq!(store.list_len(BLACKLIST).unwrap(), 1);

        store.clear_list(BLACKLIST).unwrap();
        assert_eq!(store.list_len(BLACKLIST).unwrap(), 0);
    }

    #[test]
    fn lists_are_independent() {
        let store = store();
        store.add_to_list(BLACKLIST, ip("10.0.0.5")).unwrap();
        store.add_to_list(SCAN_BLOCKLIST, ip("10.0.0.6")).unwrap();

        assert!(!store.in_list(SCAN_BLOCKLIST, ip("10.0.0.5")).unwrap());
        assert!(!store.in_list(BLACKLIST, ip("10.0.0.6")).unwrap());
    }

    #[test]
    fn concurrent_readers_and_writers_see_whole_entries() {
        let store = Arc::new(IpListStore::new(Duration::from_secs(5)));
        let mut handles = Vec::new();

        // 쓰기 4스레드 x 64주소, 읽기 4스레드가 동시에 조회
        for t in 0..4u8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..64u8 {
                    let addr = IpAddr::from([10, 0, t, i]);
                    store.add_to_list(BLACKLIST, addr).unwrap();
                }
            }));
        }
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..64u8 {
                    let addr = IpAddr::from([10, 0, 0, i]);
                    // 부분 기록이 보이면 안 되므로 에러 없이 bool만 나와야 함
                    let _ = store.in_list(BLACKLIST, addr).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.list_len(BLACKLIST).unwrap(), 4 * 64);
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iplists.json");

        let store = store();
        let added = SystemTime::now() - Duration::from_secs(30);
        store.add_to_list_at(BLACKLIST, ip("10.0.0.5"), added).unwrap();
        store.add_to_list(SCAN_BLOCKLIST, ip("192.0.2.7")).unwrap();
        store.save_state(&path).await.unwrap();

        let restored = IpListStore::new(Duration::from_secs(1));
        restored.load_state(&path).await.unwrap();
        assert!(restored.in_list(BLACKLIST, ip("10.0.0.5")).unwrap());
        assert!(restored.in_list(SCAN_BLOCKLIST, ip("192.0.2.7")).unwrap());

        // 추가 시각도 보존: 30초 전 엔트리는 10초 한도 밖
        assert!(!restored
            .in_list_max_age(BLACKLIST, ip("10.0.0.5"), Duration::from_secs(10))
            .unwrap());
    }

    #[tokio::test]
    async fn load_from_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store();
        store.add_to_list(BLACKLIST, ip("10.0.0.5")).unwrap();
        store.load_state(dir.path().join("absent.json")).await.unwrap();
        assert_eq!(store.list_len(BLACKLIST).unwrap(), 0);
    }
}
