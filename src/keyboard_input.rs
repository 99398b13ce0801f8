use crate::acquisition::WedgeKey;
use crate::coordinator::{ScanCommand, ScanMode};
use crate::error::Result;
use crate::events::{BagtagEvent, EventBus};
use crossterm::event::{
    self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a terminal event asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Command(ScanCommand),
    Quit,
}

/// Turns terminal events into scan commands.
///
/// `/` opens a manual entry line that collects characters until Enter
/// (submit) or Esc (cancel). Outside it, digits and Enter go to the
/// hardware wedge so a scanner typing into the terminal works. While such
/// a burst is running (the last burst key came less than `burst_idle` ago)
/// letters are part of the scanned text, not commands.
#[derive(Debug)]
pub struct KeyMapper {
    manual: Option<String>,
    burst_idle: Duration,
    burst_at: Option<Instant>,
}

impl KeyMapper {
    pub fn new(burst_idle: Duration) -> Self {
        Self {
            manual: None,
            burst_idle,
            burst_at: None,
        }
    }

    /// Text typed so far on the manual entry line
    pub fn manual_line(&self) -> Option<&str> {
        self.manual.as_deref()
    }

    pub fn map(&mut self, event: &Event) -> Option<KeyAction> {
        self.map_at(event, Instant::now())
    }

    pub fn map_at(&mut self, event: &Event, now: Instant) -> Option<KeyAction> {
        match event {
            Event::FocusLost => Some(KeyAction::Command(ScanCommand::SetVisibility {
                hidden: true,
            })),
            Event::FocusGained => Some(KeyAction::Command(ScanCommand::SetVisibility {
                hidden: false,
            })),
            Event::Key(key) if key.kind == KeyEventKind::Press => self.map_key(key, now),
            _ => None,
        }
    }

    fn map_key(&mut self, key: &KeyEvent, now: Instant) -> Option<KeyAction> {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        if ctrl && key.code == KeyCode::Char('c') {
            return Some(KeyAction::Quit);
        }

        if let Some(line) = self.manual.as_mut() {
            return match key.code {
                KeyCode::Enter => {
                    let line = std::mem::take(line);
                    self.manual = None;
                    Some(KeyAction::Command(ScanCommand::Manual(line)))
                }
                KeyCode::Esc => {
                    self.manual = None;
                    None
                }
                KeyCode::Backspace => {
                    line.pop();
                    None
                }
                KeyCode::Char(c) => {
                    line.push(c);
                    None
                }
                _ => None,
            };
        }

        let in_burst = self
            .burst_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.burst_idle);

        let command = match key.code {
            KeyCode::Char('z') if ctrl => ScanCommand::Undo,
            KeyCode::Char(c) if c.is_ascii_digit() || (in_burst && !ctrl) => {
                self.burst_at = Some(now);
                ScanCommand::Key(WedgeKey::Char(c))
            }
            KeyCode::Enter => {
                self.burst_at = None;
                ScanCommand::Key(WedgeKey::Enter)
            }
            KeyCode::Char('t') => ScanCommand::Start(ScanMode::Tag),
            KeyCode::Char('r') => ScanCommand::Start(ScanMode::Retrieve),
            KeyCode::Char('s') => ScanCommand::Stop,
            KeyCode::Char(' ') | KeyCode::Char('c') => ScanCommand::Continue,
            KeyCode::Char('u') | KeyCode::F(4) => ScanCommand::Undo,
            KeyCode::Char('l') | KeyCode::F(3) => ScanCommand::ToggleTorch,
            KeyCode::Tab | KeyCode::F(2) => ScanCommand::ToggleInput,
            KeyCode::Char('/') => {
                self.manual = Some(String::new());
                return None;
            }
            KeyCode::Char('q') | KeyCode::Esc => return Some(KeyAction::Quit),
            other => {
                debug!("Key pressed: {:?}", other);
                return None;
            }
        };
        Some(KeyAction::Command(command))
    }
}

/// Reads the terminal in raw mode and forwards operator commands
pub struct KeyboardInputHandler {
    commands: mpsc::Sender<ScanCommand>,
    event_bus: Arc<EventBus>,
    burst_idle: Duration,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    pub fn new(
        commands: mpsc::Sender<ScanCommand>,
        event_bus: Arc<EventBus>,
        burst_idle: Duration,
    ) -> Self {
        Self {
            commands,
            event_bus,
            burst_idle,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler");

        let commands = self.commands.clone();
        let event_bus = Arc::clone(&self.event_bus);
        let cancellation_token = self.cancellation_token.clone();
        let burst_idle = self.burst_idle;

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }
            if let Err(e) = execute!(io::stdout(), EnableFocusChange) {
                debug!("Terminal focus reporting unavailable: {}", e);
            }

            let mut mapper = KeyMapper::new(burst_idle);
            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                let event = match event::poll(Duration::from_millis(100)) {
                    Ok(true) => match event::read() {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Error reading keyboard event: {}", e);
                            continue;
                        }
                    },
                    Ok(false) => continue,
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                        continue;
                    }
                };

                match mapper.map(&event) {
                    Some(KeyAction::Command(command)) => {
                        if commands.blocking_send(command).is_err() {
                            debug!("Command channel closed");
                            break;
                        }
                    }
                    Some(KeyAction::Quit) => {
                        info!("Quit key pressed - requesting shutdown");
                        let shutdown_event = BagtagEvent::ShutdownRequested {
                            timestamp: SystemTime::now(),
                            reason: "User requested via keyboard".to_string(),
                        };
                        if let Err(e) = event_bus.publish(shutdown_event) {
                            warn!("Failed to publish shutdown event: {}", e);
                        }
                        break;
                    }
                    None => {}
                }
            }

            let _ = execute!(io::stdout(), DisableFocusChange);
            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }

            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Give the task a moment to clean up and disable raw mode
        tokio::time::sleep(Duration::from_millis(200)).await;

        let _ = disable_raw_mode();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BURST_IDLE: Duration = Duration::from_millis(60);

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn ctrl(c: char) -> Event {
        Event::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
    }

    fn command(action: Option<KeyAction>) -> ScanCommand {
        match action {
            Some(KeyAction::Command(command)) => command,
            other => panic!("expected a command, got {:?}", other),
        }
    }

    #[test]
    fn test_mode_and_control_keys() {
        let mut mapper = KeyMapper::new(BURST_IDLE);
        assert_eq!(
            command(mapper.map(&press(KeyCode::Char('t')))),
            ScanCommand::Start(ScanMode::Tag)
        );
        assert_eq!(
            command(mapper.map(&press(KeyCode::Char('r')))),
            ScanCommand::Start(ScanMode::Retrieve)
        );
        assert_eq!(
            command(mapper.map(&press(KeyCode::Char(' ')))),
            ScanCommand::Continue
        );
        assert_eq!(command(mapper.map(&press(KeyCode::Tab))), ScanCommand::ToggleInput);
        assert_eq!(command(mapper.map(&press(KeyCode::F(3)))), ScanCommand::ToggleTorch);
        assert_eq!(command(mapper.map(&ctrl('z'))), ScanCommand::Undo);
        assert_eq!(mapper.map(&ctrl('c')), Some(KeyAction::Quit));
        assert_eq!(mapper.map(&press(KeyCode::Esc)), Some(KeyAction::Quit));
    }

    #[test]
    fn test_digits_go_to_wedge() {
        let mut mapper = KeyMapper::new(BURST_IDLE);
        assert_eq!(
            command(mapper.map(&press(KeyCode::Char('7')))),
            ScanCommand::Key(WedgeKey::Char('7'))
        );
        assert_eq!(
            command(mapper.map(&press(KeyCode::Enter))),
            ScanCommand::Key(WedgeKey::Enter)
        );
    }

    #[test]
    fn test_letters_inside_burst_go_to_wedge() {
        let mut mapper = KeyMapper::new(BURST_IDLE);
        let t0 = Instant::now();
        let at = |ms| t0 + Duration::from_millis(ms);

        mapper.map_at(&press(KeyCode::Char('1')), at(0));
        for (i, c) in "sqc".chars().enumerate() {
            assert_eq!(
                command(mapper.map_at(&press(KeyCode::Char(c)), at(10 + i as u64 * 10))),
                ScanCommand::Key(WedgeKey::Char(c))
            );
        }
        assert_eq!(
            command(mapper.map_at(&press(KeyCode::Enter), at(50))),
            ScanCommand::Key(WedgeKey::Enter)
        );

        // Enter ends the burst
        assert_eq!(
            command(mapper.map_at(&press(KeyCode::Char('s')), at(55))),
            ScanCommand::Stop
        );

        // So does going idle
        mapper.map_at(&press(KeyCode::Char('2')), at(100));
        assert_eq!(
            mapper.map_at(&press(KeyCode::Char('q')), at(200)),
            Some(KeyAction::Quit)
        );
    }

    #[test]
    fn test_manual_entry_line() {
        let mut mapper = KeyMapper::new(BURST_IDLE);
        assert_eq!(mapper.map(&press(KeyCode::Char('/'))), None);
        for c in "01234567845".chars() {
            assert_eq!(mapper.map(&press(KeyCode::Char(c))), None);
        }
        assert_eq!(mapper.map(&press(KeyCode::Backspace)), None);
        assert_eq!(mapper.manual_line(), Some("0123456784"));

        assert_eq!(
            command(mapper.map(&press(KeyCode::Enter))),
            ScanCommand::Manual("0123456784".to_string())
        );
        assert_eq!(mapper.manual_line(), None);

        // Esc cancels the line instead of quitting
        mapper.map(&press(KeyCode::Char('/')));
        mapper.map(&press(KeyCode::Char('q')));
        assert_eq!(mapper.map(&press(KeyCode::Esc)), None);
        assert_eq!(mapper.manual_line(), None);
    }

    #[test]
    fn test_focus_changes_visibility() {
        let mut mapper = KeyMapper::new(BURST_IDLE);
        assert_eq!(
            command(mapper.map(&Event::FocusLost)),
            ScanCommand::SetVisibility { hidden: true }
        );
        assert_eq!(
            command(mapper.map(&Event::FocusGained)),
            ScanCommand::SetVisibility { hidden: false }
        );
    }

    #[tokio::test]
    async fn test_keyboard_handler_stop() {
        let (tx, _rx) = mpsc::channel(4);
        let handler = KeyboardInputHandler::new(tx, Arc::new(EventBus::new(16)), BURST_IDLE);

        handler.stop().await.unwrap();
        assert!(handler.cancellation_token.is_cancelled());
    }
}
