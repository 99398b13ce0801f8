//! Keyboard-wedge scanners: devices that type the barcode as keystrokes.
//!
//! Keys are gathered into bursts. Each character re-arms an idle timer; when
//! it expires the burst is flushed if it is long enough to be a scan, else
//! dropped as stray typing. Enter flushes immediately.

use super::{ScanEvent, SourceKind, SourceMessage, SourceMessageKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Keystrokes queued for the wedge before it catches up
const KEY_QUEUE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WedgeKey {
    Char(char),
    Enter,
}

/// Pure burst accumulator; callers supply the clock
#[derive(Debug, Clone)]
pub struct BurstAssembler {
    buffer: String,
    idle: Duration,
    min_length: usize,
    deadline: Option<Instant>,
}

impl BurstAssembler {
    pub fn new(idle: Duration, min_length: usize) -> Self {
        Self {
            buffer: String::new(),
            idle,
            min_length,
            deadline: None,
        }
    }

    /// Feed one key. Returns a completed burst when Enter ends a non-empty buffer.
    pub fn key(&mut self, key: WedgeKey, now: Instant) -> Option<String> {
        match key {
            WedgeKey::Char(c) => {
                self.buffer.push(c);
                self.deadline = Some(now + self.idle);
                None
            }
            WedgeKey::Enter => {
                self.deadline = None;
                if self.buffer.is_empty() {
                    None
                } else {
                    Some(std::mem::take(&mut self.buffer))
                }
            }
        }
    }

    /// Handle idle expiry at `now`
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                let burst = std::mem::take(&mut self.buffer);
                if burst.chars().count() >= self.min_length {
                    Some(burst)
                } else {
                    trace!("Dropping short keystroke burst ({} chars)", burst.len());
                    None
                }
            }
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.deadline = None;
    }
}

/// Hardware scanner source
pub struct HardwareWedge {
    generation: u64,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    keys: Option<mpsc::Sender<WedgeKey>>,
    task: Option<JoinHandle<()>>,
}

impl HardwareWedge {
    /// Wedge fed from the terminal through [`HardwareWedge::feed`]
    pub fn start_terminal(
        generation: u64,
        idle: Duration,
        min_length: usize,
        tx: mpsc::Sender<SourceMessage>,
    ) -> Self {
        let (key_tx, key_rx) = mpsc::channel(KEY_QUEUE);
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(burst_loop(
            key_rx,
            BurstAssembler::new(idle, min_length),
            generation,
            tx,
            Arc::clone(&running),
            cancel.clone(),
        ));

        info!("Hardware scanner listening on terminal (generation {})", generation);
        Self {
            generation,
            running,
            cancel,
            keys: Some(key_tx),
            task: Some(task),
        }
    }

    /// Wedge reading a grabbed evdev node; the grab is released on stop
    #[cfg(all(target_os = "linux", feature = "wedge_evdev"))]
    pub fn start_evdev(
        device: &str,
        generation: u64,
        idle: Duration,
        min_length: usize,
        tx: mpsc::Sender<SourceMessage>,
    ) -> Result<Self, crate::error::CameraError> {
        let open_error = |e: std::io::Error| crate::error::CameraError::DeviceOpen {
            device: device.to_string(),
            details: e.to_string(),
        };

        let mut input = evdev::Device::open(device).map_err(open_error)?;
        input.grab().map_err(open_error)?;
        let stream = input.into_event_stream().map_err(open_error)?;

        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(evdev_loop(
            stream,
            BurstAssembler::new(idle, min_length),
            generation,
            tx,
            Arc::clone(&running),
            cancel.clone(),
        ));

        info!("Hardware scanner grabbed {} (generation {})", device, generation);
        Ok(Self {
            generation,
            running,
            cancel,
            keys: None,
            task: Some(task),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Pass a terminal keystroke. Ignored once the wedge is stopping.
    pub fn feed(&self, key: WedgeKey) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        match &self.keys {
            Some(keys) => keys.try_send(key).is_ok(),
            None => false,
        }
    }

    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        self.keys = None;

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Hardware scanner task failed: {}", e);
            }
            debug!("Hardware scanner stopped (generation {})", self.generation);
        }
    }
}

impl Drop for HardwareWedge {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

/// Far-off instant standing in for "no deadline" inside `select!`
fn idle_sleep(deadline: Option<Instant>) -> tokio::time::Sleep {
    let at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
    tokio::time::sleep_until(tokio::time::Instant::from_std(at))
}

async fn emit(
    tx: &mpsc::Sender<SourceMessage>,
    running: &AtomicBool,
    cancel: &CancellationToken,
    generation: u64,
    burst: String,
) -> bool {
    if !running.load(Ordering::SeqCst) {
        return false;
    }
    debug!("Hardware scanner burst: {}", burst);
    let message = SourceMessage {
        generation,
        kind: SourceMessageKind::Scan(ScanEvent::new(burst, SourceKind::Hardware)),
    };
    deliver(tx, cancel, message).await
}

/// Send to the coordinator unless stopped first; `false` means stop the loop
async fn deliver(
    tx: &mpsc::Sender<SourceMessage>,
    cancel: &CancellationToken,
    message: SourceMessage,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(message) => sent.is_ok(),
    }
}

async fn burst_loop(
    mut keys: mpsc::Receiver<WedgeKey>,
    mut bursts: BurstAssembler,
    generation: u64,
    tx: mpsc::Sender<SourceMessage>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let deadline = bursts.deadline();
        let completed = tokio::select! {
            _ = cancel.cancelled() => break,
            key = keys.recv() => match key {
                Some(key) => bursts.key(key, Instant::now()),
                None => break,
            },
            _ = idle_sleep(deadline), if deadline.is_some() => bursts.poll(Instant::now()),
        };

        if let Some(burst) = completed {
            if !emit(&tx, &running, &cancel, generation, burst).await {
                break;
            }
        }
    }
}

#[cfg(all(target_os = "linux", feature = "wedge_evdev"))]
fn evdev_key(key: evdev::Key) -> Option<WedgeKey> {
    use evdev::Key;
    let c = match key {
        Key::KEY_0 | Key::KEY_KP0 => '0',
        Key::KEY_1 | Key::KEY_KP1 => '1',
        Key::KEY_2 | Key::KEY_KP2 => '2',
        Key::KEY_3 | Key::KEY_KP3 => '3',
        Key::KEY_4 | Key::KEY_KP4 => '4',
        Key::KEY_5 | Key::KEY_KP5 => '5',
        Key::KEY_6 | Key::KEY_KP6 => '6',
        Key::KEY_7 | Key::KEY_KP7 => '7',
        Key::KEY_8 | Key::KEY_KP8 => '8',
        Key::KEY_9 | Key::KEY_KP9 => '9',
        Key::KEY_ENTER | Key::KEY_KPENTER => return Some(WedgeKey::Enter),
        _ => return None,
    };
    Some(WedgeKey::Char(c))
}

#[cfg(all(target_os = "linux", feature = "wedge_evdev"))]
async fn evdev_loop(
    mut stream: evdev::EventStream,
    mut bursts: BurstAssembler,
    generation: u64,
    tx: mpsc::Sender<SourceMessage>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let deadline = bursts.deadline();
        let completed = tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next_event() => match event {
                Ok(event) => match event.kind() {
                    // value 1 is key-down
                    evdev::InputEventKind::Key(key) if event.value() == 1 => {
                        evdev_key(key).and_then(|k| bursts.key(k, Instant::now()))
                    }
                    _ => None,
                },
                Err(e) => {
                    if running.swap(false, Ordering::SeqCst) {
                        let failed = SourceMessage {
                            generation,
                            kind: SourceMessageKind::Failed {
                                error: format!("Scanner device error: {}", e),
                            },
                        };
                        if !deliver(&tx, &cancel, failed).await {
                            debug!("Scanner failure not reported; source already stopping");
                        }
                    }
                    break;
                }
            },
            _ = idle_sleep(deadline), if deadline.is_some() => bursts.poll(Instant::now()),
        };

        if let Some(burst) = completed {
            if !emit(&tx, &running, &cancel, generation, burst).await {
                break;
            }
        }
    }

    if let Err(e) = stream.device_mut().ungrab() {
        warn!("Failed to release scanner grab: {}", e);
    }
}
