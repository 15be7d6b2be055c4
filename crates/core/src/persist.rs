//! 상태 스냅샷 저장/복원 헬퍼
//!
//! 각 정책의 가변 상태(규칙 목록, 차단 캐시, IP 리스트)는 시작 시
//! 로드되고 종료 시 저장됩니다. 포맷은 JSON이며, 쓰기는 임시 파일에
//! 쓴 뒤 rename하는 방식으로 부분 기록을 남기지 않습니다.
//!
//! 복원 실패는 치명적이지 않습니다: 파일이 없으면 `Ok(None)`,
//! 내용이 깨져 있으면 경고 로그 후 `Ok(None)` — 호출자는 빈 기본
//! 상태로 시작합니다.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{PalisadeError, PersistError};

/// 상태 스냅샷을 읽습니다.
///
/// 파일이 없거나 역직렬화에 실패하면 `Ok(None)`을 반환합니다.
/// I/O 자체의 실패(권한 등)만 에러로 전파합니다.
pub async fn load_state<T: DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<Option<T>, PalisadeError> {
    let path = path.as_ref();
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PalisadeError::Io(e)),
    };

    match serde_json::from_str(&content) {
        Ok(state) => Ok(Some(state)),
        Err(e) => {
            // 깨진 스냅샷은 버리고 빈 기본 상태로 출발
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "state snapshot corrupt, falling back to empty default"
            );
            Ok(None)
        }
    }
}

/// 상태 스냅샷을 기록합니다.
///
/// 같은 디렉토리의 임시 파일에 전체를 쓴 뒤 rename합니다.
pub async fn save_state<T: Serialize>(
    path: impl AsRef<Path>,
    state: &T,
) -> Result<(), PalisadeError> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(state).map_err(|e| {
        PalisadeError::Persist(PersistError::Serialize {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    })?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state: HashMap<String, u32> = HashMap::new();
        state.insert("a".to_owned(), 1);
        state.insert("b".to_owned(), 2);

        save_state(&path, &state).await.unwrap();
        let loaded: HashMap<String, u32> = load_state(&path).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let loaded: Option<Vec<u16>> = load_state(&path).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let loaded: Option<Vec<u16>> = load_state(&path).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state(&path, &vec![31337u16]).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
