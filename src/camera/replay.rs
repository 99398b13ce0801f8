use super::{CameraCapabilities, CameraProvider, FrameSource, TorchControl};
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "pgm"];

/// Cycles through still images at the configured frame rate
pub struct ReplayCamera {
    id: String,
    frames: Vec<(Arc<Vec<u8>>, u32, u32)>,
    capabilities: CameraCapabilities,
    interval: Duration,
    next_due: Instant,
    counter: u64,
    released: bool,
}

impl ReplayCamera {
    /// Load every decodable image in `dir`, sorted by file name
    pub fn load(dir: &Path, fps: u32) -> Result<Self, CameraError> {
        let id = dir.to_string_lossy().into_owned();
        let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => CameraError::PermissionDenied {
                device: id.clone(),
            },
            _ => CameraError::DeviceOpen {
                device: id.clone(),
                details: e.to_string(),
            },
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            match image::open(path) {
                Ok(img) => {
                    let luma = img.to_luma8();
                    let (width, height) = luma.dimensions();
                    frames.push((Arc::new(luma.into_raw()), width, height));
                    debug!("Loaded replay frame {}", path.display());
                }
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        if frames.is_empty() {
            return Err(CameraError::NoDevice);
        }

        info!("Replaying {} still images from {}", frames.len(), id);
        Ok(Self {
            id,
            frames,
            capabilities: CameraCapabilities::default(),
            interval: Duration::from_millis(1000 / fps.max(1) as u64),
            next_due: Instant::now(),
            counter: 0,
            released: false,
        })
    }
}

#[async_trait]
impl FrameSource for ReplayCamera {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &CameraCapabilities {
        &self.capabilities
    }

    fn torch(&self) -> Option<Arc<dyn TorchControl>> {
        None
    }

    async fn next_frame(&mut self) -> Result<FrameData, CameraError> {
        if self.released {
            return Err(CameraError::CaptureStream {
                details: "replay released".to_string(),
            });
        }

        tokio::time::sleep_until(self.next_due).await;
        self.next_due = Instant::now() + self.interval;

        let (data, width, height) = &self.frames[(self.counter as usize) % self.frames.len()];
        let frame = FrameData {
            id: self.counter,
            timestamp: SystemTime::now(),
            data: Arc::clone(data),
            width: *width,
            height: *height,
            format: FrameFormat::Gray8,
        };
        self.counter += 1;
        Ok(frame)
    }

    async fn release(&mut self) {
        if !self.released {
            self.released = true;
            debug!("Replay {} released", self.id);
        }
    }
}

/// Provider for `camera.replay_dir`
pub struct ReplayCameraProvider {
    dir: PathBuf,
    fps: u32,
}

impl ReplayCameraProvider {
    pub fn new(dir: PathBuf, fps: u32) -> Self {
        Self { dir, fps }
    }
}

#[async_trait]
impl CameraProvider for ReplayCameraProvider {
    async fn open(&self, _remembered: Option<String>) -> Result<Box<dyn FrameSource>, CameraError> {
        let dir = self.dir.clone();
        let fps = self.fps;
        let camera = tokio::task::spawn_blocking(move || ReplayCamera::load(&dir, fps))
            .await
            .map_err(|e| CameraError::Configuration {
                details: format!("Replay load task failed: {}", e),
            })??;
        Ok(Box::new(camera))
    }
}
