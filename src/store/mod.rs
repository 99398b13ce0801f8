//! Persistent record of tagged bags, scoped per session.

pub mod export;
pub mod kv;
pub mod prefs;
pub mod session;

#[cfg(test)]
mod tests;

pub use export::{export_file_name, records_to_csv};
pub use kv::{FileKvStore, KeyValueStore, MemoryKvStore};
pub use prefs::{PreferenceStore, Preferences};
pub use session::{SessionId, SessionInfo, SessionRegistry};

use crate::code::{BaggageCode, CodeNormalizer};
use crate::error::StoreError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_RECORDS: usize = 2000;

/// Storage key for a session's tag records
pub fn tags_key(session: &SessionId) -> String {
    format!("bagtag_tags_{}", session.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordNote {
    /// Saved although the check digit failed
    Lenient,
}

/// One recorded bag. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub code: String,
    #[serde(rename = "ts")]
    pub recorded_at: i64,
    #[serde(default)]
    pub matched: bool,
    #[serde(rename = "matchedTs", default, skip_serializing_if = "Option::is_none")]
    pub matched_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<RecordNote>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagCounts {
    pub total: usize,
    pub matched: usize,
}

/// Why a scan was not recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    InvalidCode,
    Duplicate,
}

impl Rejection {
    pub fn message(&self) -> &'static str {
        match self {
            Rejection::InvalidCode => "Invalid code",
            Rejection::Duplicate => "Already saved",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Saved(TagRecord),
    Rejected(Rejection),
}

impl RecordOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, RecordOutcome::Saved(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MatchMark {
    code: String,
    matched_at: i64,
}

/// Tag records of one session, persisted on every mutation
pub struct TagStore {
    kv: Arc<dyn KeyValueStore>,
    session: SessionId,
    normalizer: CodeNormalizer,
    max_records: usize,
    /// Newest first
    records: Vec<TagRecord>,
    match_history: Vec<MatchMark>,
}

impl TagStore {
    /// Load the records of `session` from `kv`
    pub fn open(
        kv: Arc<dyn KeyValueStore>,
        session: SessionId,
        normalizer: CodeNormalizer,
        max_records: usize,
    ) -> Result<Self, StoreError> {
        let key = tags_key(&session);
        let records: Vec<TagRecord> = match kv.get(&key)? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key: key.clone(),
                details: e.to_string(),
            })?,
            None => Vec::new(),
        };

        debug!("Loaded {} tag records for session {}", records.len(), session);

        // Undo order survives restarts through the persisted match times
        let mut match_history: Vec<MatchMark> = records
            .iter()
            .filter(|r| r.matched)
            .filter_map(|r| {
                r.matched_at.map(|matched_at| MatchMark {
                    code: r.code.clone(),
                    matched_at,
                })
            })
            .collect();
        match_history.sort_by_key(|m| m.matched_at);

        Ok(Self {
            kv,
            session,
            normalizer,
            max_records: max_records.max(1),
            records,
            match_history,
        })
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn normalizer(&self) -> &CodeNormalizer {
        &self.normalizer
    }

    pub fn records(&self) -> &[TagRecord] {
        &self.records
    }

    /// Write `records` and only then make them the in-memory state
    fn commit(&mut self, records: Vec<TagRecord>) -> Result<(), StoreError> {
        let key = tags_key(&self.session);
        let raw = serde_json::to_string(&records).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            details: e.to_string(),
        })?;
        self.kv.set(&key, &raw)?;
        self.records = records;
        Ok(())
    }

    /// Record a newly tagged bag
    pub fn record(&mut self, raw: &str) -> Result<RecordOutcome, StoreError> {
        let Some(code) = self.normalizer.normalize(raw) else {
            return Ok(RecordOutcome::Rejected(Rejection::InvalidCode));
        };
        self.record_code(&code)
    }

    /// Record an already normalized code
    pub fn record_code(&mut self, code: &BaggageCode) -> Result<RecordOutcome, StoreError> {
        if self.records.iter().any(|r| r.code == code.as_str()) {
            return Ok(RecordOutcome::Rejected(Rejection::Duplicate));
        }

        let record = TagRecord {
            code: code.as_str().to_string(),
            recorded_at: Utc::now().timestamp_millis(),
            matched: false,
            matched_at: None,
            note: code.is_lenient().then_some(RecordNote::Lenient),
        };
        let mut records = Vec::with_capacity(self.records.len() + 1);
        records.push(record.clone());
        records.extend(self.records.iter().take(self.max_records - 1).cloned());

        let evicted = self.records.len() + 1 - records.len();
        self.commit(records)?;
        if evicted > 0 {
            warn!(
                "Session {} reached {} records, evicted {} oldest",
                self.session, self.max_records, evicted
            );
        }
        info!("Saved tag {}", record.code);
        Ok(RecordOutcome::Saved(record))
    }

    pub fn exists(&self, raw: &str) -> bool {
        self.normalizer
            .normalize(raw)
            .map(|code| self.contains(code.as_str()))
            .unwrap_or(false)
    }

    /// Exact lookup of a canonical code
    pub fn contains(&self, code: &str) -> bool {
        self.records.iter().any(|r| r.code == code)
    }

    /// Mark a recorded bag as retrieved. Already matched records are left untouched.
    pub fn mark_matched(&mut self, raw: &str) -> Result<bool, StoreError> {
        let Some(code) = self.normalizer.normalize(raw) else {
            return Ok(false);
        };
        let now = Utc::now().timestamp_millis();

        let Some(index) = self.records.iter().position(|r| r.code == code.as_str()) else {
            return Ok(false);
        };
        if self.records[index].matched {
            return Ok(true);
        }

        let mut records = self.records.clone();
        records[index].matched = true;
        records[index].matched_at = Some(now);
        self.commit(records)?;

        self.match_history.push(MatchMark {
            code: code.into_string(),
            matched_at: now,
        });
        Ok(true)
    }

    /// Reverse the most recent match, but only if it was for `raw`
    pub fn unmatch(&mut self, raw: &str) -> Result<bool, StoreError> {
        let Some(code) = self.normalizer.normalize(raw) else {
            return Ok(false);
        };

        self.discard_stale_marks();
        let is_latest = self
            .match_history
            .last()
            .map(|mark| mark.code == code.as_str())
            .unwrap_or(false);
        if !is_latest {
            return Ok(false);
        }
        Ok(self.undo_last_match()?.is_some())
    }

    /// Reverse the most recent match, returning its code
    pub fn undo_last_match(&mut self) -> Result<Option<String>, StoreError> {
        while let Some(mark) = self.match_history.pop() {
            let Some(index) = self.records.iter().position(|r| {
                r.code == mark.code && r.matched && r.matched_at == Some(mark.matched_at)
            }) else {
                continue;
            };

            let mut records = self.records.clone();
            records[index].matched = false;
            records[index].matched_at = None;
            if let Err(e) = self.commit(records) {
                self.match_history.push(mark);
                return Err(e);
            }
            info!("Undid match for {}", mark.code);
            return Ok(Some(mark.code));
        }
        Ok(None)
    }

    /// Drop history entries whose record was evicted or already unmatched
    fn discard_stale_marks(&mut self) {
        while let Some(mark) = self.match_history.last() {
            let live = self.records.iter().any(|r| {
                r.code == mark.code && r.matched && r.matched_at == Some(mark.matched_at)
            });
            if live {
                break;
            }
            self.match_history.pop();
        }
    }

    pub fn counts(&self) -> TagCounts {
        TagCounts {
            total: self.records.len(),
            matched: self.records.iter().filter(|r| r.matched).count(),
        }
    }

    pub fn export_csv(&self) -> String {
        records_to_csv(&self.records)
    }
}
