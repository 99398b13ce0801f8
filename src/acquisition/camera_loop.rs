use super::{ScanEvent, SourceKind, SourceMessage, SourceMessageKind};
use crate::camera::{FrameSource, TorchControl};
use crate::config::ScannerConfig;
use crate::decode::BarcodeEngine;
use crate::error::DecodeError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Detection pacing shared by both camera sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTiming {
    /// Minimum gap between detection attempts
    pub frame_interval: Duration,
    /// Pause after a successful read
    pub read_cooldown: Duration,
}

impl Default for ScanTiming {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(70),
            read_cooldown: Duration::from_millis(500),
        }
    }
}

impl From<&ScannerConfig> for ScanTiming {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            read_cooldown: config.read_cooldown(),
        }
    }
}

/// What the loop reports when its engine becomes unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FatalPolicy {
    /// Ask the coordinator to switch engines
    Degrade,
    /// Give up
    Fail,
}

/// Frame-polling loop that owns a camera while it runs
pub(crate) struct CameraScanner {
    kind: SourceKind,
    generation: u64,
    device_id: String,
    torch: Option<Arc<dyn TorchControl>>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Box<dyn FrameSource>>>,
}

impl CameraScanner {
    pub(crate) fn spawn(
        camera: Box<dyn FrameSource>,
        engine: Box<dyn BarcodeEngine>,
        kind: SourceKind,
        policy: FatalPolicy,
        generation: u64,
        timing: ScanTiming,
        tx: mpsc::Sender<SourceMessage>,
    ) -> Self {
        let device_id = camera.device_id().to_string();
        let torch = camera.torch();
        let running = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        info!(
            "Starting {} scanning on {} with {} engine (generation {})",
            kind,
            device_id,
            engine.name(),
            generation
        );

        let task = tokio::spawn(scan_loop(
            camera,
            engine,
            kind,
            policy,
            generation,
            timing,
            tx,
            Arc::clone(&running),
            cancel.clone(),
        ));

        Self {
            kind,
            generation,
            device_id,
            torch,
            running,
            cancel,
            task: Some(task),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn device_id(&self) -> &str {
        &self.device_id
    }

    pub(crate) fn torch(&self) -> Option<Arc<dyn TorchControl>> {
        self.torch.clone()
    }

    /// Stop the loop and take back the camera, still open
    pub(crate) async fn detach(&mut self) -> Option<Box<dyn FrameSource>> {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();

        let task = self.task.take()?;
        match task.await {
            Ok(camera) => Some(camera),
            Err(e) => {
                error!("{} scan task failed: {}", self.kind, e);
                None
            }
        }
    }

    /// Stop the loop, turn the torch off and release the camera
    pub(crate) async fn stop(&mut self) {
        let Some(mut camera) = self.detach().await else {
            return;
        };

        if let Some(torch) = &self.torch {
            if torch.is_on() {
                if let Err(e) = torch.set(false) {
                    warn!("Failed to turn torch off: {}", e);
                }
            }
        }

        camera.release().await;
        debug!("{} source stopped (generation {})", self.kind, self.generation);
    }
}

impl Drop for CameraScanner {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

#[allow(clippy::too_many_arguments)]
async fn scan_loop(
    mut camera: Box<dyn FrameSource>,
    engine: Box<dyn BarcodeEngine>,
    kind: SourceKind,
    policy: FatalPolicy,
    generation: u64,
    timing: ScanTiming,
    tx: mpsc::Sender<SourceMessage>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> Box<dyn FrameSource> {
    let mut engine = Some(engine);
    let mut next_attempt = Instant::now();

    // A full channel must not keep a stopping loop from returning the camera
    let send = |kind: SourceMessageKind| {
        let tx = tx.clone();
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                _ = cancel.cancelled() => false,
                sent = tx.send(SourceMessage { generation, kind }) => sent.is_ok(),
            }
        }
    };

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(next_attempt) => {}
        }

        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = camera.next_frame() => frame,
        };
        next_attempt = Instant::now() + timing.frame_interval;

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                if running.swap(false, Ordering::SeqCst) {
                    error!("{} capture failed: {}", kind, e);
                    send(SourceMessageKind::Failed {
                        error: e.user_message(),
                    })
                    .await;
                }
                break;
            }
        };

        let Some(current) = engine.take() else { break };
        let detect = tokio::task::spawn_blocking(move || {
            let mut current = current;
            let result = current.detect(&frame);
            (current, result)
        });

        let result = match detect.await {
            Ok((returned, result)) => {
                engine = Some(returned);
                result
            }
            Err(e) => Err(DecodeError::Fatal {
                details: format!("decoder task failed: {}", e),
            }),
        };

        match result {
            Ok(detections) => {
                let Some(detection) = detections.into_iter().next() else {
                    continue;
                };
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                debug!("{} read {} ({})", kind, detection.text, detection.symbology);
                let event = ScanEvent::new(detection.text, kind);
                if !send(SourceMessageKind::Scan(event)).await {
                    break;
                }
                next_attempt = Instant::now() + timing.read_cooldown;
            }
            Err(DecodeError::Transient { details }) => {
                trace!("{} detection attempt failed: {}", kind, details);
            }
            Err(DecodeError::Fatal { details }) => {
                if running.swap(false, Ordering::SeqCst) {
                    warn!("{} engine unusable: {}", kind, details);
                    let message = match policy {
                        FatalPolicy::Degrade => SourceMessageKind::Degraded { reason: details },
                        FatalPolicy::Fail => SourceMessageKind::Failed { error: details },
                    };
                    send(message).await;
                }
                break;
            }
        }
    }

    debug!("{} scan loop exited (generation {})", kind, generation);
    camera
}
