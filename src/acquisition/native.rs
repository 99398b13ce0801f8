use super::camera_loop::{CameraScanner, FatalPolicy, ScanTiming};
use super::{SourceKind, SourceMessage};
use crate::camera::{FrameSource, TorchControl};
use crate::decode::BarcodeEngine;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Camera scanning with the platform's barcode engine.
///
/// A fatal engine error ends the loop and sends `Degraded`; the coordinator
/// then moves the camera to a [`super::FallbackDecoder`]. There is no way back.
pub struct NativeDetector {
    scanner: CameraScanner,
}

impl NativeDetector {
    pub fn start(
        camera: Box<dyn FrameSource>,
        engine: Box<dyn BarcodeEngine>,
        generation: u64,
        timing: ScanTiming,
        tx: mpsc::Sender<SourceMessage>,
    ) -> Self {
        Self {
            scanner: CameraScanner::spawn(
                camera,
                engine,
                SourceKind::Native,
                FatalPolicy::Degrade,
                generation,
                timing,
                tx,
            ),
        }
    }

    pub fn generation(&self) -> u64 {
        self.scanner.generation()
    }

    pub fn device_id(&self) -> &str {
        self.scanner.device_id()
    }

    pub fn torch(&self) -> Option<Arc<dyn TorchControl>> {
        self.scanner.torch()
    }

    pub async fn stop(&mut self) {
        self.scanner.stop().await;
    }

    /// End scanning without releasing the camera
    pub async fn into_camera(mut self) -> Option<Box<dyn FrameSource>> {
        self.scanner.detach().await
    }
}
