use crate::acquisition::{SourceFactory, SourceMessage};
use crate::camera::{provider_from_config, CameraProvider};
use crate::code::CodeNormalizer;
use crate::config::{BagtagConfig, StoreConfig};
use crate::coordinator::{CoordinatorSettings, ScanCoordinator, ScanFeedback};
use crate::error::{Result, StoreError};
use crate::store::{
    FileKvStore, KeyValueStore, PreferenceStore, SessionId, SessionInfo, SessionRegistry, TagStore,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The persisted state under `store.path`
pub struct DataStores {
    kv: Arc<dyn KeyValueStore>,
    sessions: SessionRegistry,
}

impl DataStores {
    /// Open the data directory and drop expired sessions
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileKvStore::open(&config.path)?);
        Self::with_kv(kv, config)
    }

    pub fn with_kv(kv: Arc<dyn KeyValueStore>, config: &StoreConfig) -> Result<Self> {
        let sessions = SessionRegistry::new(Arc::clone(&kv));
        match sessions.cleanup_expired(config.session_ttl()) {
            Ok(0) => {}
            Ok(n) => info!("Cleaned up {} expired sessions", n),
            Err(e) => warn!("Session cleanup failed: {}", e),
        }
        Ok(Self { kv, sessions })
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn preferences(&self) -> PreferenceStore {
        PreferenceStore::new(Arc::clone(&self.kv))
    }

    /// The session named by `id`, or the current one
    pub fn session(&self, id: Option<&str>) -> Result<SessionInfo> {
        let found = match id {
            Some(id) => self.sessions.get(&SessionId::from_raw(id))?,
            None => self.sessions.current()?,
        };
        found.ok_or_else(|| StoreError::NoSession.into())
    }

    pub fn tag_store(&self, session: &SessionInfo, config: &BagtagConfig) -> Result<TagStore> {
        Ok(TagStore::open(
            Arc::clone(&self.kv),
            session.id.clone(),
            CodeNormalizer::new(config.scanner.validation),
            config.store.max_records,
        )?)
    }

    /// Coordinator for `session` using the configured camera backend
    pub fn coordinator(
        &self,
        session: &SessionInfo,
        config: &BagtagConfig,
        feedback: Arc<dyn ScanFeedback>,
    ) -> Result<(ScanCoordinator, mpsc::Receiver<SourceMessage>)> {
        self.coordinator_with(session, config, feedback, provider_from_config(&config.camera))
    }

    pub fn coordinator_with(
        &self,
        session: &SessionInfo,
        config: &BagtagConfig,
        feedback: Arc<dyn ScanFeedback>,
        cameras: Arc<dyn CameraProvider>,
    ) -> Result<(ScanCoordinator, mpsc::Receiver<SourceMessage>)> {
        let store = self.tag_store(session, config)?;
        info!(
            "Session {} loaded with {} tagged bags",
            session.id,
            store.counts().total
        );

        Ok(ScanCoordinator::new(
            store,
            self.preferences(),
            SourceFactory::from_config(config, cameras),
            feedback,
            CoordinatorSettings::from(config),
        ))
    }
}
