//! Terminal rendering of scan feedback.

use crate::events::{BagtagEvent, EventBus, EventFilter, EventReceiver};
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor, Stylize};
use crossterm::{execute, terminal};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Colour and text for one feedback line, `None` for events not shown
pub fn feedback_line(event: &BagtagEvent) -> Option<(Color, String)> {
    let color = match event {
        BagtagEvent::TagSaved { lenient: false, .. } => Color::Green,
        BagtagEvent::TagSaved { lenient: true, .. } => Color::Yellow,
        BagtagEvent::Matched { .. } => Color::Green,
        BagtagEvent::TagRejected { .. }
        | BagtagEvent::Unmatched { .. }
        | BagtagEvent::CameraError { .. }
        | BagtagEvent::SystemError { .. } => Color::Red,
        BagtagEvent::SourceDegraded { .. } | BagtagEvent::MatchUndone { .. } => Color::Yellow,
        BagtagEvent::ModeChanged { .. }
        | BagtagEvent::SourceChanged { .. }
        | BagtagEvent::TorchChanged { .. }
        | BagtagEvent::CountsChanged { .. } => Color::Cyan,
        BagtagEvent::ResultDismissed | BagtagEvent::ShutdownRequested { .. } => return None,
    };

    let mut text = event.description();
    if matches!(event, BagtagEvent::Matched { .. }) {
        text.push_str("  (space to continue, u to undo)");
    }
    Some((color, text))
}

/// Key help shown once when the interactive session starts
pub fn help_text() -> String {
    [
        "t tag  r retrieve  s stop  space continue  u undo",
        "tab camera/scanner  l torch  / type a code  q quit",
    ]
    .join("\r\n")
}

/// Prints feedback events to the terminal while scanning runs
pub struct ConsoleRenderer {
    event_bus: Arc<EventBus>,
    cancellation_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ConsoleRenderer {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            event_bus,
            cancellation_token: CancellationToken::new(),
            task: None,
        }
    }

    pub fn start(&mut self) {
        info!("Starting console renderer");

        let receiver = self.event_bus.subscribe();
        let filter = EventFilter::Custom(|event| feedback_line(event).is_some());
        let mut events = EventReceiver::new(receiver, filter, "console".to_string());
        let token = self.cancellation_token.clone();

        print_line(Color::White, &help_text());

        self.task = Some(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => {
                        print_event(&event);
                    }
                    Err(e) => {
                        debug!("Console renderer stopping: {}", e);
                        break;
                    }
                }
            }
        }));
    }

    pub async fn stop(&mut self) {
        self.cancellation_token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Console renderer task failed: {}", e);
            }
        }
    }
}

/// Print one event the way the interactive renderer would; `false` if it is not shown
pub fn print_event(event: &BagtagEvent) -> bool {
    match feedback_line(event) {
        Some((color, text)) => {
            print_line(color, &text);
            true
        }
        None => false,
    }
}

/// Raw mode needs an explicit carriage return
fn print_line(color: Color, text: &str) {
    let mut stdout = io::stdout();
    let raw = terminal::is_raw_mode_enabled().unwrap_or(false);
    let ending = if raw { "\r\n" } else { "\n" };

    if let Err(e) = execute!(
        stdout,
        SetForegroundColor(color),
        Print(text),
        ResetColor,
        Print(ending)
    ) {
        warn!("Failed to write to terminal: {}", e);
    }
    let _ = stdout.flush();
}

/// Plain single-line status, for non-interactive commands
pub fn status_line(label: &str, value: impl std::fmt::Display) -> String {
    format!("{} {}", format!("{:>9}", label).bold(), value)
}
