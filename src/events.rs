use crate::acquisition::SourceKind;
use crate::coordinator::ScanState;
use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Scan outcomes and state changes, published for the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BagtagEvent {
    /// A code was recorded in Tag mode
    TagSaved { code: String, lenient: bool },
    /// A scan was refused (invalid code or already saved)
    TagRejected { raw: String, reason: String },
    /// A recovered bag was found in the session record
    Matched { code: String },
    /// A scanned bag is not in the session record
    Unmatched { code: String },
    /// The current MATCH/UNMATCHED result was cleared
    ResultDismissed,
    /// A match was reversed by the operator
    MatchUndone { code: String },
    /// Session totals after a mutation
    CountsChanged { total: usize, matched: usize },
    /// Coordinator state changed
    ModeChanged { state: ScanState },
    /// Active acquisition source changed (`None` when stopped)
    SourceChanged { source: Option<SourceKind> },
    /// Native detection failed and scanning moved to the fallback decoder
    SourceDegraded { reason: String },
    /// Torch state changed
    TorchChanged { on: bool },
    /// The camera could not be started
    CameraError { message: String },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl BagtagEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            BagtagEvent::TagSaved { code, lenient } => {
                if *lenient {
                    format!("Saved {} (check digit failed)", code)
                } else {
                    format!("Saved {}", code)
                }
            }
            BagtagEvent::TagRejected { raw, reason } => format!("{}: {}", reason, raw),
            BagtagEvent::Matched { code } => format!("MATCH {}", code),
            BagtagEvent::Unmatched { code } => format!("UNMATCHED {}", code),
            BagtagEvent::ResultDismissed => "Result dismissed".to_string(),
            BagtagEvent::MatchUndone { code } => format!("Undid match {}", code),
            BagtagEvent::CountsChanged { total, matched } => {
                format!("{} tagged, {} matched", total, matched)
            }
            BagtagEvent::ModeChanged { state } => format!("Mode: {}", state),
            BagtagEvent::SourceChanged { source } => match source {
                Some(source) => format!("Source: {}", source),
                None => "Source stopped".to_string(),
            },
            BagtagEvent::SourceDegraded { reason } => {
                format!("Switched to fallback decoder: {}", reason)
            }
            BagtagEvent::TorchChanged { on } => {
                format!("Torch {}", if *on { "on" } else { "off" })
            }
            BagtagEvent::CameraError { message } => message.clone(),
            BagtagEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            BagtagEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            BagtagEvent::TagSaved { .. } => "tag_saved",
            BagtagEvent::TagRejected { .. } => "tag_rejected",
            BagtagEvent::Matched { .. } => "matched",
            BagtagEvent::Unmatched { .. } => "unmatched",
            BagtagEvent::ResultDismissed => "result_dismissed",
            BagtagEvent::MatchUndone { .. } => "match_undone",
            BagtagEvent::CountsChanged { .. } => "counts_changed",
            BagtagEvent::ModeChanged { .. } => "mode_changed",
            BagtagEvent::SourceChanged { .. } => "source_changed",
            BagtagEvent::SourceDegraded { .. } => "source_degraded",
            BagtagEvent::TorchChanged { .. } => "torch_changed",
            BagtagEvent::CameraError { .. } => "camera_error",
            BagtagEvent::SystemError { .. } => "system_error",
            BagtagEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Event bus between the scan pipeline and its observers, on a broadcast channel
pub struct EventBus {
    sender: broadcast::Sender<BagtagEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<BagtagEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Never blocks; the coordinator calls this from inside its message loop.
    pub fn publish(&self, event: BagtagEvent) -> Result<usize, EventBusError> {
        match &event {
            BagtagEvent::TagSaved { code, .. } => info!("Tag saved: {}", code),
            BagtagEvent::Matched { code } => info!("Match: {}", code),
            BagtagEvent::Unmatched { code } => info!("Unmatched: {}", code),
            BagtagEvent::SourceDegraded { reason } => {
                warn!("Native detection degraded: {}", reason);
            }
            BagtagEvent::CameraError { message } => warn!("{}", message),
            BagtagEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            BagtagEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Custom filter function
    Custom(fn(&BagtagEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &BagtagEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<BagtagEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<BagtagEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event. Lagging skips the missed events and carries on.
    pub async fn recv(&mut self) -> Result<BagtagEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<BagtagEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
