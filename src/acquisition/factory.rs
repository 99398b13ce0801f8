use super::{
    AcquisitionSource, FallbackDecoder, HardwareWedge, NativeDetector, ScanTiming, SourceMessage,
};
use crate::camera::{CameraProvider, FrameSource};
use crate::config::{BagtagConfig, InputMode};
use crate::decode::{BarcodeEngine, ScanlineEngine};
use crate::error::CameraError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Builds decoding engines for camera sources
pub trait EngineFactory: Send + Sync {
    /// The native engine, or `None` when this host has none
    fn native(&self) -> Option<Box<dyn BarcodeEngine>>;

    fn fallback(&self) -> Box<dyn BarcodeEngine>;
}

/// zbar (with the `camera` feature) plus the built-in scanline decoder
pub struct DefaultEngines {
    try_harder: bool,
}

impl DefaultEngines {
    pub fn new(try_harder: bool) -> Self {
        Self { try_harder }
    }
}

impl EngineFactory for DefaultEngines {
    fn native(&self) -> Option<Box<dyn BarcodeEngine>> {
        #[cfg(all(target_os = "linux", feature = "camera"))]
        {
            match crate::decode::ZbarEngine::new() {
                Ok(engine) => return Some(Box::new(engine)),
                Err(e) => warn!("Native barcode detection unavailable: {}", e),
            }
        }
        None
    }

    fn fallback(&self) -> Box<dyn BarcodeEngine> {
        Box::new(ScanlineEngine::fallback(self.try_harder))
    }
}

#[derive(Debug, Clone)]
pub struct WedgeSettings {
    pub idle: Duration,
    pub min_length: usize,
    /// evdev node to grab instead of reading the terminal
    pub device: Option<String>,
}

/// Chooses and starts the acquisition source, once per start
pub struct SourceFactory {
    cameras: Arc<dyn CameraProvider>,
    engines: Arc<dyn EngineFactory>,
    timing: ScanTiming,
    wedge: WedgeSettings,
}

impl SourceFactory {
    pub fn new(
        cameras: Arc<dyn CameraProvider>,
        engines: Arc<dyn EngineFactory>,
        timing: ScanTiming,
        wedge: WedgeSettings,
    ) -> Self {
        Self {
            cameras,
            engines,
            timing,
            wedge,
        }
    }

    pub fn from_config(config: &BagtagConfig, cameras: Arc<dyn CameraProvider>) -> Self {
        Self::new(
            cameras,
            Arc::new(DefaultEngines::new(config.scanner.try_harder)),
            ScanTiming::from(&config.scanner),
            WedgeSettings {
                idle: config.wedge.idle(),
                min_length: config.wedge.min_length,
                device: config.wedge.device.clone(),
            },
        )
    }

    /// Start the source for `input`. Device errors abort the start.
    pub async fn start(
        &self,
        input: InputMode,
        generation: u64,
        remembered_camera: Option<String>,
        tx: mpsc::Sender<SourceMessage>,
    ) -> Result<AcquisitionSource, CameraError> {
        match input {
            InputMode::Hardware => self.start_wedge(generation, tx),
            InputMode::Camera => {
                let camera = self.cameras.open(remembered_camera).await?;
                Ok(match self.engines.native() {
                    Some(engine) => AcquisitionSource::Native(NativeDetector::start(
                        camera, engine, generation, self.timing, tx,
                    )),
                    None => {
                        info!("Using fallback decoder");
                        self.fallback_with(camera, generation, tx)
                    }
                })
            }
        }
    }

    /// Continue scanning on an already open camera with the fallback decoder
    pub fn fallback_with(
        &self,
        camera: Box<dyn FrameSource>,
        generation: u64,
        tx: mpsc::Sender<SourceMessage>,
    ) -> AcquisitionSource {
        AcquisitionSource::Fallback(FallbackDecoder::start(
            camera,
            self.engines.fallback(),
            generation,
            self.timing,
            tx,
        ))
    }

    fn start_wedge(
        &self,
        generation: u64,
        tx: mpsc::Sender<SourceMessage>,
    ) -> Result<AcquisitionSource, CameraError> {
        if let Some(device) = &self.wedge.device {
            #[cfg(all(target_os = "linux", feature = "wedge_evdev"))]
            {
                return HardwareWedge::start_evdev(
                    device,
                    generation,
                    self.wedge.idle,
                    self.wedge.min_length,
                    tx,
                )
                .map(AcquisitionSource::Hardware);
            }
            #[cfg(not(all(target_os = "linux", feature = "wedge_evdev")))]
            warn!(
                "Scanner device {} ignored: built without 'wedge_evdev'; reading the terminal",
                device
            );
        }

        Ok(AcquisitionSource::Hardware(HardwareWedge::start_terminal(
            generation,
            self.wedge.idle,
            self.wedge.min_length,
            tx,
        )))
    }
}
