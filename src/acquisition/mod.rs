//! Scan sources: native camera detection, the fallback decoder, and keyboard-wedge scanners.
//!
//! Every source runs as a tokio task and reports through one
//! `mpsc::Sender<SourceMessage>`. Messages carry the generation the source
//! was started with so the coordinator can drop anything a stopped source
//! sent after the fact.

mod camera_loop;
pub mod factory;
pub mod fallback;
pub mod native;
pub mod wedge;


pub use camera_loop::ScanTiming;
pub use factory::{DefaultEngines, EngineFactory, SourceFactory, WedgeSettings};
pub use fallback::FallbackDecoder;
pub use native::NativeDetector;
pub use wedge::{BurstAssembler, HardwareWedge, WedgeKey};

use crate::camera::{FrameSource, TorchControl};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Where a scan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Native,
    Fallback,
    Hardware,
    Manual,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Native => "native",
            SourceKind::Fallback => "fallback",
            SourceKind::Hardware => "hardware",
            SourceKind::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Raw text from a source, consumed immediately by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub raw_text: String,
    pub source: SourceKind,
    pub observed_at: Instant,
}

impl ScanEvent {
    pub fn new(raw_text: impl Into<String>, source: SourceKind) -> Self {
        Self {
            raw_text: raw_text.into(),
            source,
            observed_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceMessageKind {
    Scan(ScanEvent),
    /// Native detection hit a fatal engine error; the camera is still open
    Degraded { reason: String },
    /// The source cannot continue
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub generation: u64,
    pub kind: SourceMessageKind,
}

/// The one active acquisition source
pub enum AcquisitionSource {
    Native(NativeDetector),
    Fallback(FallbackDecoder),
    Hardware(HardwareWedge),
}

impl AcquisitionSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            AcquisitionSource::Native(_) => SourceKind::Native,
            AcquisitionSource::Fallback(_) => SourceKind::Fallback,
            AcquisitionSource::Hardware(_) => SourceKind::Hardware,
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            AcquisitionSource::Native(s) => s.generation(),
            AcquisitionSource::Fallback(s) => s.generation(),
            AcquisitionSource::Hardware(s) => s.generation(),
        }
    }

    /// Camera id of camera-backed sources
    pub fn device_id(&self) -> Option<&str> {
        match self {
            AcquisitionSource::Native(s) => Some(s.device_id()),
            AcquisitionSource::Fallback(s) => Some(s.device_id()),
            AcquisitionSource::Hardware(_) => None,
        }
    }

    pub fn torch(&self) -> Option<Arc<dyn TorchControl>> {
        match self {
            AcquisitionSource::Native(s) => s.torch(),
            AcquisitionSource::Fallback(s) => s.torch(),
            AcquisitionSource::Hardware(_) => None,
        }
    }

    /// Forward a keystroke; only the hardware wedge accepts them
    pub fn feed(&self, key: WedgeKey) -> bool {
        match self {
            AcquisitionSource::Hardware(wedge) => wedge.feed(key),
            _ => false,
        }
    }

    /// Stop the source and release its hardware
    pub async fn stop(&mut self) {
        match self {
            AcquisitionSource::Native(s) => s.stop().await,
            AcquisitionSource::Fallback(s) => s.stop().await,
            AcquisitionSource::Hardware(s) => s.stop().await,
        }
    }

    /// Stop a camera source but keep its camera open, for handing it to another engine
    pub async fn into_camera(self) -> Option<Box<dyn FrameSource>> {
        match self {
            AcquisitionSource::Native(s) => s.into_camera().await,
            AcquisitionSource::Fallback(s) => s.into_camera().await,
            AcquisitionSource::Hardware(mut s) => {
                s.stop().await;
                None
            }
        }
    }
}
