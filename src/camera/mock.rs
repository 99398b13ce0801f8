//! In-memory frame sources for pipeline tests.

use super::{CameraCapabilities, CameraProvider, FrameSource, TorchControl};
use crate::error::CameraError;
use crate::frame::FrameData;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct MockTorch {
    on: AtomicBool,
}

impl TorchControl for MockTorch {
    fn set(&self, on: bool) -> Result<(), CameraError> {
        self.on.store(on, Ordering::Relaxed);
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}

/// Shared view of what happened to mock cameras
#[derive(Default)]
pub(crate) struct MockCameraLog {
    pub opened: AtomicUsize,
    pub released: AtomicUsize,
    pub remembered: Mutex<Vec<Option<String>>>,
}

/// Serves the same frame forever, `interval` apart
pub(crate) struct MockFrameSource {
    id: String,
    frame: FrameData,
    interval: Duration,
    capabilities: CameraCapabilities,
    torch: Option<Arc<MockTorch>>,
    log: Arc<MockCameraLog>,
    released: bool,
}

#[async_trait]
impl FrameSource for MockFrameSource {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &CameraCapabilities {
        &self.capabilities
    }

    fn torch(&self) -> Option<Arc<dyn TorchControl>> {
        self.torch
            .as_ref()
            .map(|t| Arc::clone(t) as Arc<dyn TorchControl>)
    }

    async fn next_frame(&mut self) -> Result<FrameData, CameraError> {
        if self.released {
            return Err(CameraError::CaptureStream {
                details: "released".to_string(),
            });
        }
        tokio::time::sleep(self.interval).await;
        Ok(self.frame.clone())
    }

    async fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.released.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub(crate) enum MockOutcome {
    Frame(FrameData),
    Fail(CameraError),
}

pub(crate) struct MockCameraProvider {
    outcome: Mutex<MockOutcome>,
    torch: bool,
    pub log: Arc<MockCameraLog>,
    pub torch_handle: Arc<MockTorch>,
}

impl MockCameraProvider {
    pub fn with_frame(frame: FrameData) -> Self {
        Self {
            outcome: Mutex::new(MockOutcome::Frame(frame)),
            torch: true,
            log: Arc::new(MockCameraLog::default()),
            torch_handle: Arc::new(MockTorch::default()),
        }
    }

    pub fn failing(error: CameraError) -> Self {
        Self {
            outcome: Mutex::new(MockOutcome::Fail(error)),
            torch: false,
            log: Arc::new(MockCameraLog::default()),
            torch_handle: Arc::new(MockTorch::default()),
        }
    }

    /// Swap the frame served by cameras opened from now on
    pub fn set_frame(&self, frame: FrameData) {
        *self.outcome.lock() = MockOutcome::Frame(frame);
    }
}

#[async_trait]
impl CameraProvider for MockCameraProvider {
    async fn open(&self, remembered: Option<String>) -> Result<Box<dyn FrameSource>, CameraError> {
        self.log.remembered.lock().push(remembered);
        let frame = match &*self.outcome.lock() {
            MockOutcome::Frame(frame) => frame.clone(),
            MockOutcome::Fail(error) => return Err(error.clone()),
        };
        self.log.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockFrameSource {
            id: "/dev/video-mock".to_string(),
            frame,
            interval: Duration::from_millis(5),
            capabilities: CameraCapabilities {
                torch: self.torch,
                zoom: None,
            },
            torch: self.torch.then(|| Arc::clone(&self.torch_handle)),
            log: Arc::clone(&self.log),
            released: false,
        }))
    }
}
