//! Frame sources: live V4L2 cameras and still-image replay.

pub mod controls;
pub mod devices;
#[cfg(all(target_os = "linux", feature = "camera"))]
mod interface;
#[cfg(test)]
pub(crate) mod mock;
#[cfg(feature = "stills")]
mod replay;

#[cfg(all(target_os = "linux", feature = "camera"))]
pub use interface::{GstCamera, V4l2CameraProvider};
#[cfg(feature = "stills")]
pub use replay::{ReplayCamera, ReplayCameraProvider};

use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::FrameData;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Inclusive range reported by a V4L2 integer control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

impl ControlRange {
    /// Middle of the range, snapped to the control's step
    pub fn midpoint(&self) -> i32 {
        let step = self.step.max(1);
        let half = (self.max - self.min) / 2;
        self.min + (half / step) * step
    }
}

/// What a camera can do, queried once when it is opened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraCapabilities {
    pub torch: bool,
    pub zoom: Option<ControlRange>,
}

/// Handle for switching the torch while the camera is owned by a scan loop
pub trait TorchControl: Send + Sync {
    fn set(&self, on: bool) -> Result<(), CameraError>;
    fn is_on(&self) -> bool;
}

/// An open camera producing frames
#[async_trait]
pub trait FrameSource: Send {
    /// Stable identifier, remembered as the operator's last camera
    fn device_id(&self) -> &str;

    fn capabilities(&self) -> &CameraCapabilities;

    fn torch(&self) -> Option<Arc<dyn TorchControl>>;

    /// Wait for the next frame
    async fn next_frame(&mut self) -> Result<FrameData, CameraError>;

    /// Stop streaming and release the device. Safe to call more than once.
    async fn release(&mut self);
}

/// A camera the host exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraCandidate {
    pub id: String,
    pub label: String,
    pub torch_capable: bool,
}

/// Pick a camera: the remembered one, else a rear-facing label, else one with a torch, else the first
pub fn select_camera<'a>(
    candidates: &'a [CameraCandidate],
    remembered: Option<&str>,
) -> Option<&'a CameraCandidate> {
    if let Some(id) = remembered {
        if let Some(found) = candidates.iter().find(|c| c.id == id) {
            return Some(found);
        }
    }

    let rear_facing = |c: &&CameraCandidate| {
        let label = c.label.to_lowercase();
        ["back", "rear", "environment"]
            .iter()
            .any(|word| label.contains(word))
    };

    candidates
        .iter()
        .find(rear_facing)
        .or_else(|| candidates.iter().find(|c| c.torch_capable))
        .or_else(|| candidates.first())
}

/// Opens frame sources
#[async_trait]
pub trait CameraProvider: Send + Sync {
    /// Open the best camera, preferring `remembered` when it is still present
    async fn open(&self, remembered: Option<String>) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Provider used when this build has no way to reach a camera
pub struct UnavailableCameraProvider {
    reason: String,
}

#[async_trait]
impl CameraProvider for UnavailableCameraProvider {
    async fn open(&self, _remembered: Option<String>) -> Result<Box<dyn FrameSource>, CameraError> {
        warn!("Camera requested but unavailable: {}", self.reason);
        Err(CameraError::NoDevice)
    }
}

/// Choose the frame source backend for `config`
pub fn provider_from_config(config: &CameraConfig) -> Arc<dyn CameraProvider> {
    if let Some(dir) = &config.replay_dir {
        #[cfg(feature = "stills")]
        {
            return Arc::new(ReplayCameraProvider::new(dir.clone(), config.fps));
        }
        #[cfg(not(feature = "stills"))]
        {
            return Arc::new(UnavailableCameraProvider {
                reason: format!(
                    "replay from {} needs the 'stills' feature",
                    dir.display()
                ),
            });
        }
    }

    #[cfg(all(target_os = "linux", feature = "camera"))]
    {
        Arc::new(V4l2CameraProvider::new(config.clone()))
    }

    #[cfg(not(all(target_os = "linux", feature = "camera")))]
    {
        Arc::new(UnavailableCameraProvider {
            reason: "built without the 'camera' feature".to_string(),
        })
    }
}
