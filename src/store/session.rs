use super::kv::KeyValueStore;
use super::tags_key;
use crate::error::StoreError;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const SESSIONS_KEY: &str = "bagtag_sessions";
const CURRENT_KEY: &str = "bagtag_current_session";

/// Identity of a scanning scope: `YYYYMMDD_FLIGHT`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn for_flight(date: NaiveDate, flight: &str) -> Self {
        let flight = normalize_flight(flight);
        let flight = if flight.is_empty() {
            "UNKNOWN".to_string()
        } else {
            flight
        };
        Self(format!("{}_{}", date.format("%Y%m%d"), flight))
    }

    /// Wrap an identifier read back from storage or the command line
    pub fn from_raw<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_flight(flight: &str) -> String {
    flight
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: SessionId,
    pub flight: String,
    /// ISO date, `YYYY-MM-DD`
    pub date: String,
    /// Epoch milliseconds
    pub opened_at: i64,
}

/// Minimal session bookkeeping: which scope is current, and when scopes expire
pub struct SessionRegistry {
    kv: Arc<dyn KeyValueStore>,
}

impl SessionRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn load(&self) -> Result<Vec<SessionInfo>, StoreError> {
        match self.kv.get(SESSIONS_KEY)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key: SESSIONS_KEY.to_string(),
                details: e.to_string(),
            }),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, sessions: &[SessionInfo]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(sessions).map_err(|e| StoreError::Corrupt {
            key: SESSIONS_KEY.to_string(),
            details: e.to_string(),
        })?;
        self.kv.set(SESSIONS_KEY, &raw)
    }

    /// Open (or re-open) the session for a flight and make it current
    pub fn open(&self, flight: &str, date: NaiveDate) -> Result<SessionInfo, StoreError> {
        let flight = normalize_flight(flight);
        if flight.is_empty() {
            return Err(StoreError::InvalidSession {
                details: "flight number is required".to_string(),
            });
        }

        let id = SessionId::for_flight(date, &flight);
        let mut sessions = self.load()?;
        let info = match sessions.iter().find(|s| s.id == id) {
            Some(existing) => existing.clone(),
            None => {
                let info = SessionInfo {
                    id: id.clone(),
                    flight,
                    date: date.format("%Y-%m-%d").to_string(),
                    opened_at: Utc::now().timestamp_millis(),
                };
                sessions.push(info.clone());
                self.save(&sessions)?;
                info!("Opened session {}", id);
                info
            }
        };

        self.kv.set(CURRENT_KEY, id.as_str())?;
        Ok(info)
    }

    pub fn get(&self, id: &SessionId) -> Result<Option<SessionInfo>, StoreError> {
        Ok(self.load()?.into_iter().find(|s| &s.id == id))
    }

    pub fn current(&self) -> Result<Option<SessionInfo>, StoreError> {
        match self.kv.get(CURRENT_KEY)? {
            Some(id) if !id.is_empty() => self.get(&SessionId::from_raw(id)),
            _ => Ok(None),
        }
    }

    /// Close a session: forget it and delete its recorded tags
    pub fn close(&self, id: &SessionId) -> Result<bool, StoreError> {
        let mut sessions = self.load()?;
        let before = sessions.len();
        sessions.retain(|s| &s.id != id);
        let removed = sessions.len() != before;

        self.save(&sessions)?;
        self.kv.remove(&tags_key(id))?;

        if self.kv.get(CURRENT_KEY)?.as_deref() == Some(id.as_str()) {
            self.kv.remove(CURRENT_KEY)?;
        }

        if removed {
            info!("Closed session {}", id);
        }
        Ok(removed)
    }

    /// Drop sessions opened longer than `ttl` ago, returning how many were removed
    pub fn cleanup_expired(&self, ttl: Duration) -> Result<usize, StoreError> {
        self.cleanup_expired_at(ttl, Utc::now().timestamp_millis())
    }

    pub(crate) fn cleanup_expired_at(&self, ttl: Duration, now_ms: i64) -> Result<usize, StoreError> {
        let cutoff = now_ms - ttl.as_millis() as i64;
        let sessions = self.load()?;
        let (keep, expired): (Vec<_>, Vec<_>) =
            sessions.into_iter().partition(|s| s.opened_at >= cutoff);

        if expired.is_empty() {
            return Ok(0);
        }

        for session in &expired {
            self.kv.remove(&tags_key(&session.id))?;
            debug!("Expired session {}", session.id);
        }
        self.save(&keep)?;

        if let Some(current) = self.kv.get(CURRENT_KEY)? {
            if !keep.iter().any(|s| s.id.as_str() == current) {
                self.kv.remove(CURRENT_KEY)?;
            }
        }

        info!("Removed {} expired sessions", expired.len());
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryKvStore;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
    }

    #[test]
    fn test_session_id_format() {
        assert_eq!(
            SessionId::for_flight(date(), " ba 117 ").as_str(),
            "20240309_BA117"
        );
        assert_eq!(
            SessionId::for_flight(date(), "").as_str(),
            "20240309_UNKNOWN"
        );
    }

    #[test]
    fn test_open_sets_current() {
        let registry = SessionRegistry::new(Arc::new(MemoryKvStore::new()));
        let info = registry.open("lh400", date()).unwrap();

        assert_eq!(info.flight, "LH400");
        assert_eq!(info.date, "2024-03-09");
        assert_eq!(registry.current().unwrap(), Some(info.clone()));

        // Reopening does not duplicate
        let again = registry.open("LH 400", date()).unwrap();
        assert_eq!(again, info);
        assert_eq!(registry.load().unwrap().len(), 1);
    }

    #[test]
    fn test_open_requires_flight() {
        let registry = SessionRegistry::new(Arc::new(MemoryKvStore::new()));
        assert!(matches!(
            registry.open("   ", date()),
            Err(StoreError::InvalidSession { .. })
        ));
    }

    #[test]
    fn test_close_removes_tags_and_current() {
        let kv = Arc::new(MemoryKvStore::new());
        let registry = SessionRegistry::new(kv.clone());
        let info = registry.open("AF1", date()).unwrap();
        kv.set(&tags_key(&info.id), "[]").unwrap();

        assert!(registry.close(&info.id).unwrap());
        assert_eq!(registry.current().unwrap(), None);
        assert_eq!(kv.get(&tags_key(&info.id)).unwrap(), None);
        assert!(!registry.close(&info.id).unwrap());
    }

    #[test]
    fn test_cleanup_expired() {
        let kv = Arc::new(MemoryKvStore::new());
        let registry = SessionRegistry::new(kv.clone());
        let old = registry.open("OLD1", date()).unwrap();
        kv.set(&tags_key(&old.id), "[]").unwrap();

        let ttl = Duration::from_secs(48 * 3600);
        let later = old.opened_at + ttl.as_millis() as i64 + 1;

        assert_eq!(registry.cleanup_expired_at(ttl, old.opened_at).unwrap(), 0);
        assert_eq!(registry.cleanup_expired_at(ttl, later).unwrap(), 1);
        assert_eq!(kv.get(&tags_key(&old.id)).unwrap(), None);
        assert_eq!(registry.current().unwrap(), None);
    }
}
