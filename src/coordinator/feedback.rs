use super::ScanState;
use crate::acquisition::SourceKind;
use crate::events::{BagtagEvent, EventBus};
use crate::store::{Rejection, TagCounts, TagRecord};
use tracing::trace;

/// Receives scan outcomes from the coordinator.
///
/// Calls happen on the coordinator's task, in the order the outcomes occur,
/// so implementations must not block.
pub trait ScanFeedback: Send + Sync {
    fn on_saved(&self, record: &TagRecord);

    /// A scan was refused; `raw` is the text as read
    fn on_invalid(&self, raw: &str, reason: Rejection);

    fn on_match(&self, code: &str);

    fn on_unmatched(&self, code: &str);

    fn on_camera_error(&self, message: &str);

    /// The MATCH hold or UNMATCHED result was cleared
    fn on_dismiss(&self);

    fn on_counts(&self, counts: TagCounts);

    fn on_source(&self, source: Option<SourceKind>);

    fn on_state(&self, state: ScanState);

    fn on_degraded(&self, reason: &str);

    fn on_torch(&self, on: bool);

    fn on_undo(&self, code: &str);

    fn on_error(&self, component: &str, message: &str);
}

impl EventBus {
    fn notify(&self, event: BagtagEvent) {
        // Nobody listening is normal for headless commands
        if let Err(e) = self.publish(event) {
            trace!("Feedback not delivered: {}", e);
        }
    }
}

impl ScanFeedback for EventBus {
    fn on_saved(&self, record: &TagRecord) {
        self.notify(BagtagEvent::TagSaved {
            code: record.code.clone(),
            lenient: record.note.is_some(),
        });
    }

    fn on_invalid(&self, raw: &str, reason: Rejection) {
        self.notify(BagtagEvent::TagRejected {
            raw: raw.to_string(),
            reason: reason.message().to_string(),
        });
    }

    fn on_match(&self, code: &str) {
        self.notify(BagtagEvent::Matched {
            code: code.to_string(),
        });
    }

    fn on_unmatched(&self, code: &str) {
        self.notify(BagtagEvent::Unmatched {
            code: code.to_string(),
        });
    }

    fn on_camera_error(&self, message: &str) {
        self.notify(BagtagEvent::CameraError {
            message: message.to_string(),
        });
    }

    fn on_dismiss(&self) {
        self.notify(BagtagEvent::ResultDismissed);
    }

    fn on_counts(&self, counts: TagCounts) {
        self.notify(BagtagEvent::CountsChanged {
            total: counts.total,
            matched: counts.matched,
        });
    }

    fn on_source(&self, source: Option<SourceKind>) {
        self.notify(BagtagEvent::SourceChanged { source });
    }

    fn on_state(&self, state: ScanState) {
        self.notify(BagtagEvent::ModeChanged { state });
    }

    fn on_degraded(&self, reason: &str) {
        self.notify(BagtagEvent::SourceDegraded {
            reason: reason.to_string(),
        });
    }

    fn on_torch(&self, on: bool) {
        self.notify(BagtagEvent::TorchChanged { on });
    }

    fn on_undo(&self, code: &str) {
        self.notify(BagtagEvent::MatchUndone {
            code: code.to_string(),
        });
    }

    fn on_error(&self, component: &str, message: &str) {
        self.notify(BagtagEvent::SystemError {
            component: component.to_string(),
            error: message.to_string(),
        });
    }
}
