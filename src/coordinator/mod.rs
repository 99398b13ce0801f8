//! Scan coordination: owns the session store, the one active acquisition
//! source, and the Idle/Tagging/Retrieving state machine.

mod feedback;


pub use feedback::ScanFeedback;

use crate::acquisition::{
    AcquisitionSource, ScanEvent, SourceFactory, SourceKind, SourceMessage, SourceMessageKind,
    WedgeKey,
};
use crate::code::{extract_digits, BaggageCode};
use crate::config::{BagtagConfig, InputMode};
use crate::fragment::FragmentAssembler;
use crate::store::{PreferenceStore, RecordOutcome, Rejection, TagCounts, TagStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Capacity of the source message channel
const SOURCE_CHANNEL_CAPACITY: usize = 32;

/// Digit runs of this length that do not resolve are held as possible halves
const HELD_FRAGMENT_LEN: std::ops::RangeInclusive<usize> = 4..=9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Tagging,
    Retrieving,
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanState::Idle => "idle",
            ScanState::Tagging => "tagging",
            ScanState::Retrieving => "retrieving",
        };
        f.write_str(name)
    }
}

/// What the operator asked to scan for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Tag,
    Retrieve,
}

impl ScanMode {
    pub fn state(self) -> ScanState {
        match self {
            ScanMode::Tag => ScanState::Tagging,
            ScanMode::Retrieve => ScanState::Retrieving,
        }
    }
}

/// Operator requests, usually from the keyboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanCommand {
    Start(ScanMode),
    Stop,
    SetVisibility { hidden: bool },
    SetInput(InputMode),
    ToggleInput,
    Continue,
    Undo,
    ToggleTorch,
    Manual(String),
    Key(WedgeKey),
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub dedupe_window: Duration,
    pub unmatched_dismiss: Duration,
    pub prefer_torch: bool,
    pub fragment_window: Duration,
    pub fragment_capacity: usize,
    pub input: InputMode,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&BagtagConfig::default())
    }
}

impl From<&BagtagConfig> for CoordinatorSettings {
    fn from(config: &BagtagConfig) -> Self {
        Self {
            dedupe_window: config.scanner.dedupe_window(),
            unmatched_dismiss: config.scanner.unmatched_dismiss(),
            prefer_torch: config.camera.prefer_torch,
            fragment_window: config.fragments.window(),
            fragment_capacity: config.fragments.capacity,
            input: config.scanner.input,
        }
    }
}

/// Outcome of resolving raw scan text into a code
enum Resolution {
    Code(BaggageCode),
    /// A possible half of a split label, kept for assembly
    Held,
    Invalid,
}

pub struct ScanCoordinator {
    store: TagStore,
    prefs: PreferenceStore,
    sources: SourceFactory,
    feedback: Arc<dyn ScanFeedback>,
    fragments: FragmentAssembler,
    settings: CoordinatorSettings,
    tx: mpsc::Sender<SourceMessage>,

    state: ScanState,
    selected: Option<ScanMode>,
    input: InputMode,
    hidden: bool,
    active: Option<AcquisitionSource>,
    generation: u64,

    last_accepted: Option<(String, Instant)>,
    /// Code shown as MATCH until the operator continues
    holding: Option<String>,
    dismiss_at: Option<Instant>,
}

impl ScanCoordinator {
    /// Create the coordinator and the receiving end its sources report to
    pub fn new(
        store: TagStore,
        prefs: PreferenceStore,
        sources: SourceFactory,
        feedback: Arc<dyn ScanFeedback>,
        settings: CoordinatorSettings,
    ) -> (Self, mpsc::Receiver<SourceMessage>) {
        let (tx, rx) = mpsc::channel(SOURCE_CHANNEL_CAPACITY);
        let fragments = FragmentAssembler::new(settings.fragment_window, settings.fragment_capacity);
        let input = settings.input;

        let coordinator = Self {
            store,
            prefs,
            sources,
            feedback,
            fragments,
            settings,
            tx,
            state: ScanState::Idle,
            selected: None,
            input,
            hidden: false,
            active: None,
            generation: 0,
            last_accepted: None,
            holding: None,
            dismiss_at: None,
        };
        (coordinator, rx)
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn selected_mode(&self) -> Option<ScanMode> {
        self.selected
    }

    pub fn input(&self) -> InputMode {
        self.input
    }

    pub fn active_source(&self) -> Option<SourceKind> {
        self.active.as_ref().map(|s| s.kind())
    }

    /// Code held as MATCH, if any
    pub fn holding(&self) -> Option<&str> {
        self.holding.as_deref()
    }

    pub fn counts(&self) -> TagCounts {
        self.store.counts()
    }

    pub fn store(&self) -> &TagStore {
        &self.store
    }

    /// When the current UNMATCHED result should be cleared
    pub fn dismiss_deadline(&self) -> Option<Instant> {
        self.dismiss_at
    }

    pub async fn apply(&mut self, command: ScanCommand) {
        match command {
            ScanCommand::Start(mode) => self.start(mode).await,
            ScanCommand::Stop => self.stop().await,
            ScanCommand::SetVisibility { hidden } => self.set_visibility(hidden).await,
            ScanCommand::SetInput(input) => self.set_input(input).await,
            ScanCommand::ToggleInput => self.set_input(self.input.toggled()).await,
            ScanCommand::Continue => self.continue_scanning().await,
            ScanCommand::Undo => self.undo_last_match().await,
            ScanCommand::ToggleTorch => {
                self.toggle_torch();
            }
            ScanCommand::Manual(raw) => self.submit_manual(&raw).await,
            ScanCommand::Key(key) => self.feed_key(key),
        }
    }

    /// Begin scanning in `mode`, replacing whatever was running
    pub async fn start(&mut self, mode: ScanMode) {
        if self.selected == Some(mode) && self.state != ScanState::Idle {
            debug!("Already {}", self.state);
            return;
        }

        self.stop_source().await;
        self.clear_result();
        self.fragments.clear();
        self.selected = Some(mode);
        info!("Starting {:?} mode", mode);

        if self.hidden {
            debug!("Hidden; {:?} resumes when visible", mode);
            return;
        }
        self.start_source().await;
    }

    /// Stop scanning and forget the selected mode
    pub async fn stop(&mut self) {
        self.stop_source().await;
        self.clear_result();
        self.fragments.clear();
        self.selected = None;
        self.set_state(ScanState::Idle);
        info!("Scanning stopped");
    }

    /// Suspend while hidden; resume the selected mode when visible again
    pub async fn set_visibility(&mut self, hidden: bool) {
        if self.hidden == hidden {
            return;
        }
        self.hidden = hidden;

        if hidden {
            if self.state != ScanState::Idle || self.active.is_some() {
                info!("Hidden; suspending scanning");
            }
            self.stop_source().await;
            self.clear_result();
            self.set_state(ScanState::Idle);
        } else if self.selected.is_some() && self.active.is_none() && self.holding.is_none() {
            info!("Visible; resuming scanning");
            self.start_source().await;
        }
    }

    /// Switch between camera and hardware scanner input
    pub async fn set_input(&mut self, input: InputMode) {
        if self.input == input {
            return;
        }
        info!("Input switched to {:?}", input);
        self.input = input;

        if self.active.is_some() {
            self.stop_source().await;
            self.start_source().await;
        }
    }

    /// Forward a keystroke to an active hardware wedge
    pub fn feed_key(&mut self, key: WedgeKey) {
        match &self.active {
            Some(source) => {
                if !source.feed(key) {
                    debug!("Key ignored by {} source", source.kind());
                }
            }
            None => debug!("Key ignored while idle"),
        }
    }

    pub async fn handle_source_message(&mut self, message: SourceMessage) {
        let current = self.active.as_ref().map(|s| s.generation());
        if current != Some(message.generation) {
            debug!(
                "Dropping message from stale source generation {}",
                message.generation
            );
            return;
        }

        match message.kind {
            SourceMessageKind::Scan(event) => self.on_scan(event).await,
            SourceMessageKind::Degraded { reason } => self.degrade(reason).await,
            SourceMessageKind::Failed { error } => {
                error!("Scan source failed: {}", error);
                self.stop_source().await;
                self.selected = None;
                self.set_state(ScanState::Idle);
                self.feedback.on_camera_error(&error);
            }
        }
    }

    /// Handle one raw read from the active source
    pub async fn on_scan(&mut self, event: ScanEvent) {
        let raw = event.raw_text.trim();
        if raw.is_empty() {
            return;
        }

        if let Some((last, at)) = &self.last_accepted {
            if last == raw
                && event.observed_at.saturating_duration_since(*at) < self.settings.dedupe_window
            {
                debug!("Duplicate read of {} discarded", raw);
                return;
            }
        }
        self.last_accepted = Some((raw.to_string(), event.observed_at));

        let mode = match self.state {
            ScanState::Tagging => ScanMode::Tag,
            ScanState::Retrieving if self.holding.is_none() => ScanMode::Retrieve,
            _ => {
                debug!("Read of {} ignored in state {}", raw, self.state);
                return;
            }
        };

        debug!("Read {} from {}", raw, event.source);
        match self.resolve(raw, event.observed_at) {
            Resolution::Code(code) => self.dispatch(mode, raw, code).await,
            Resolution::Held => debug!("Holding fragment {}", raw),
            Resolution::Invalid => self.reject(mode, raw),
        }
    }

    /// Typed entry; skips the de-dupe gate and fragment assembly
    pub async fn submit_manual(&mut self, raw: &str) {
        let raw = raw.trim();
        if raw.is_empty() {
            return;
        }
        if self.holding.is_some() {
            debug!("Manual entry ignored during MATCH hold");
            return;
        }

        let mode = match self.state {
            ScanState::Retrieving => ScanMode::Retrieve,
            _ => ScanMode::Tag,
        };
        self.enter(mode, raw).await;
    }

    /// Run a typed code through the tag or retrieve path directly
    pub async fn enter(&mut self, mode: ScanMode, raw: &str) {
        let raw = raw.trim();
        match self.store.normalizer().normalize(raw) {
            Some(code) => self.dispatch(mode, raw, code).await,
            None => self.reject(mode, raw),
        }
    }

    /// Leave the MATCH hold and resume retrieving
    pub async fn continue_scanning(&mut self) {
        if self.holding.take().is_none() {
            return;
        }
        self.feedback.on_dismiss();

        if self.selected == Some(ScanMode::Retrieve) && !self.hidden {
            self.start_source().await;
        }
    }

    /// Undo the held MATCH if there is one, otherwise the latest match in the session
    pub async fn undo_last_match(&mut self) {
        let result = match self.holding.clone() {
            Some(code) => match self.store.unmatch(&code) {
                Ok(true) => Ok(Some(code)),
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            },
            None => self.store.undo_last_match(),
        };

        match result {
            Ok(Some(code)) => {
                info!("Match for {} undone", code);
                self.feedback.on_undo(&code);
                self.feedback.on_counts(self.store.counts());
                self.continue_scanning().await;
            }
            Ok(None) => debug!("No match to undo"),
            Err(e) => self.store_failed(e),
        }
    }

    /// Flip the torch of the active camera and remember the choice
    pub fn toggle_torch(&mut self) -> bool {
        let Some(torch) = self.active.as_ref().and_then(|s| s.torch()) else {
            debug!("No torch on the active source");
            return false;
        };

        let on = !torch.is_on();
        if let Err(e) = torch.set(on) {
            warn!("Failed to switch torch: {}", e);
            return false;
        }
        if let Err(e) = self.prefs.update(|p| p.torch_preferred = on) {
            warn!("Failed to save torch preference: {}", e);
        }
        self.feedback.on_torch(on);
        true
    }

    /// Clear an UNMATCHED result whose deadline has passed
    pub fn poll_dismiss(&mut self, now: Instant) {
        if self.dismiss_at.is_some_and(|at| at <= now) {
            self.dismiss_at = None;
            self.feedback.on_dismiss();
        }
    }

    pub async fn shutdown(&mut self) {
        self.stop().await;
    }

    fn resolve(&mut self, raw: &str, observed_at: Instant) -> Resolution {
        if let Some(code) = self.store.normalizer().normalize(raw) {
            return Resolution::Code(code);
        }

        let digits = extract_digits(raw);
        if digits.is_empty() {
            return Resolution::Invalid;
        }

        self.fragments.add_fragment_at(&digits, observed_at);
        if let Some(joined) = self.fragments.try_assemble_at(observed_at) {
            if let Some(code) = self.store.normalizer().normalize(&joined) {
                debug!("Assembled {} from fragments", code);
                self.fragments.clear();
                return Resolution::Code(code);
            }
        }

        if HELD_FRAGMENT_LEN.contains(&digits.len()) {
            Resolution::Held
        } else {
            Resolution::Invalid
        }
    }

    async fn dispatch(&mut self, mode: ScanMode, raw: &str, code: BaggageCode) {
        match mode {
            ScanMode::Tag => self.tag(raw, code),
            ScanMode::Retrieve => self.retrieve(code).await,
        }
    }

    fn tag(&mut self, raw: &str, code: BaggageCode) {
        match self.store.record_code(&code) {
            Ok(RecordOutcome::Saved(record)) => {
                self.feedback.on_saved(&record);
                self.feedback.on_counts(self.store.counts());
            }
            Ok(RecordOutcome::Rejected(reason)) => {
                debug!("{} rejected: {}", raw, reason.message());
                self.feedback.on_invalid(raw, reason);
            }
            Err(e) => self.store_failed(e),
        }
    }

    /// Unreadable text: invalid when tagging, simply not found when retrieving
    fn reject(&mut self, mode: ScanMode, raw: &str) {
        match mode {
            ScanMode::Tag => self.feedback.on_invalid(raw, Rejection::InvalidCode),
            ScanMode::Retrieve => self.unmatched(raw),
        }
    }

    fn unmatched(&mut self, shown: &str) {
        info!("UNMATCHED {}", shown);
        self.feedback.on_unmatched(shown);
        self.dismiss_at = Some(Instant::now() + self.settings.unmatched_dismiss);
    }

    async fn retrieve(&mut self, code: BaggageCode) {
        if !self.store.contains(code.as_str()) {
            self.unmatched(code.as_str());
            return;
        }

        if let Err(e) = self.store.mark_matched(code.as_str()) {
            self.store_failed(e);
            return;
        }

        info!("MATCH {}", code);
        self.dismiss_at = None;
        self.stop_source().await;
        let code = code.into_string();
        self.feedback.on_match(&code);
        self.holding = Some(code);
        self.feedback.on_counts(self.store.counts());
    }

    /// Swap the native detector for the fallback decoder on the same camera
    async fn degrade(&mut self, reason: String) {
        warn!("Native detection failed, degrading: {}", reason);
        let Some(source) = self.active.take() else {
            return;
        };

        match source.into_camera().await {
            Some(camera) => {
                self.generation += 1;
                let fallback = self
                    .sources
                    .fallback_with(camera, self.generation, self.tx.clone());
                self.active = Some(fallback);
                self.feedback.on_degraded(&reason);
                self.feedback.on_source(Some(SourceKind::Fallback));
            }
            None => {
                self.selected = None;
                self.set_state(ScanState::Idle);
                self.feedback.on_source(None);
                self.feedback.on_camera_error(&reason);
            }
        }
    }

    async fn start_source(&mut self) {
        let Some(mode) = self.selected else {
            return;
        };

        self.generation += 1;
        let prefs = self.prefs.load();
        let started = self
            .sources
            .start(
                self.input,
                self.generation,
                prefs.last_camera_id.clone(),
                self.tx.clone(),
            )
            .await;

        let source = match started {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to start scan source: {}", e);
                self.selected = None;
                self.set_state(ScanState::Idle);
                self.feedback.on_camera_error(&e.user_message());
                return;
            }
        };

        if let Some(device) = source.device_id() {
            if prefs.last_camera_id.as_deref() != Some(device) {
                let device = device.to_string();
                if let Err(e) = self.prefs.update(|p| p.last_camera_id = Some(device)) {
                    warn!("Failed to remember camera: {}", e);
                }
            }
        }

        if self.settings.prefer_torch && prefs.torch_preferred {
            if let Some(torch) = source.torch() {
                match torch.set(true) {
                    Ok(()) => self.feedback.on_torch(true),
                    Err(e) => warn!("Failed to restore torch: {}", e),
                }
            }
        }

        info!("Scanning with {} source", source.kind());
        self.feedback.on_source(Some(source.kind()));
        self.active = Some(source);
        self.set_state(mode.state());
    }

    async fn stop_source(&mut self) {
        if let Some(mut source) = self.active.take() {
            debug!("Stopping {} source", source.kind());
            source.stop().await;
            self.feedback.on_source(None);
        }
    }

    fn clear_result(&mut self) {
        if self.holding.take().is_some() || self.dismiss_at.take().is_some() {
            self.feedback.on_dismiss();
        }
    }

    fn set_state(&mut self, state: ScanState) {
        if self.state != state {
            self.state = state;
            self.feedback.on_state(state);
        }
    }

    fn store_failed(&self, e: crate::error::StoreError) {
        error!("Tag store error: {}", e);
        self.feedback.on_error("store", &e.to_string());
    }
}
