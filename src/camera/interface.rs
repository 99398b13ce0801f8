use super::{
    controls, devices, select_camera, CameraCapabilities, CameraProvider, FrameSource,
    TorchControl,
};
use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{FrameData, FrameFormat};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::{MessageView, Pipeline};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Frames buffered between the appsink and the scan loop
const SAMPLE_QUEUE: usize = 2;
const STATE_CHANGE_TIMEOUT_SECS: u64 = 5;

/// Live V4L2 camera read through GStreamer as GRAY8 frames
pub struct GstCamera {
    device: String,
    capabilities: CameraCapabilities,
    torch: Option<Arc<controls::V4l2Torch>>,
    pipeline: Option<Pipeline>,
    samples: mpsc::Receiver<gstreamer::Sample>,
    frame_counter: u64,
    frame_timeout: Duration,
}

impl GstCamera {
    pub fn open(device: &str, config: &CameraConfig) -> Result<Self, CameraError> {
        devices::check_access(device)?;

        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let capabilities = controls::probe_capabilities(device);
        if config.zoom_midpoint {
            if let Some(range) = capabilities.zoom {
                if let Err(e) = controls::apply_zoom_midpoint(device, range) {
                    warn!("Could not set zoom: {}", e);
                }
            }
        }

        let pipeline_desc = Self::build_pipeline_string(device, config);
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| CameraError::Configuration {
                details: "appsink missing from pipeline".to_string(),
            })?
            .downcast::<AppSink>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to AppSink".to_string(),
            })?;

        let (tx, rx) = mpsc::channel(SAMPLE_QUEUE);
        appsink.set_callbacks(
            gstreamer_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink
                        .pull_sample()
                        .map_err(|_| gstreamer::FlowError::Eos)?;
                    // A full queue means the scan loop is behind; drop the frame
                    let _ = tx.try_send(sample);
                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        if let Err(e) = Self::start_pipeline(&pipeline, device) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(e);
        }

        info!("Camera {} streaming", device);
        Ok(Self {
            device: device.to_string(),
            torch: capabilities
                .torch
                .then(|| Arc::new(controls::V4l2Torch::new(device))),
            capabilities,
            pipeline: Some(pipeline),
            samples: rx,
            frame_counter: 0,
            frame_timeout: config.frame_timeout(),
        })
    }

    fn build_pipeline_string(device: &str, config: &CameraConfig) -> String {
        let (width, height) = config.resolution;
        format!(
            "v4l2src device={} do-timestamp=true ! videoconvert ! videoscale ! \
             video/x-raw,format=GRAY8,width={},height={},framerate={}/1 ! \
             appsink name=sink sync=false max-buffers=2 drop=true enable-last-sample=false",
            device, width, height, config.fps
        )
    }

    fn start_pipeline(pipeline: &Pipeline, device: &str) -> Result<(), CameraError> {
        let open_error = |details: String| CameraError::DeviceOpen {
            device: device.to_string(),
            details,
        };

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_error(e.to_string()))?;

        let (result, _, _) =
            pipeline.state(gstreamer::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
        if result.is_ok() {
            return Ok(());
        }

        let details = pipeline
            .bus()
            .and_then(|bus| bus.pop_filtered(&[gstreamer::MessageType::Error]))
            .and_then(|msg| match msg.view() {
                MessageView::Error(err) => Some(err.error().to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "pipeline failed to start".to_string());
        error!("Camera {} failed to start: {}", device, details);
        Err(open_error(details))
    }

    fn sample_to_frame(&mut self, sample: gstreamer::Sample) -> Result<FrameData, CameraError> {
        let buffer = sample.buffer().ok_or_else(|| CameraError::CaptureStream {
            details: "No buffer in sample".to_string(),
        })?;
        let caps = sample.caps().ok_or_else(|| CameraError::CaptureStream {
            details: "No caps in sample".to_string(),
        })?;
        let info = VideoInfo::from_caps(caps).map_err(|e| CameraError::CaptureStream {
            details: format!("Failed to get video info: {}", e),
        })?;
        let map = buffer
            .map_readable()
            .map_err(|e| CameraError::CaptureStream {
                details: format!("Failed to map buffer: {}", e),
            })?;

        let width = info.width() as usize;
        let height = info.height() as usize;
        let stride = info.stride()[0] as usize;
        let data: Vec<u8> = if stride == width {
            map.as_slice().get(..width * height).unwrap_or_default().to_vec()
        } else {
            map.as_slice()
                .chunks(stride)
                .take(height)
                .flat_map(|row| row.iter().take(width).copied())
                .collect()
        };

        let id = self.frame_counter;
        self.frame_counter += 1;
        trace!("Captured frame {} ({}x{})", id, width, height);

        Ok(FrameData::new(
            id,
            SystemTime::now(),
            data,
            width as u32,
            height as u32,
            FrameFormat::Gray8,
        ))
    }
}

#[async_trait]
impl FrameSource for GstCamera {
    fn device_id(&self) -> &str {
        &self.device
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
        if self.pipeline.is_none() {
            return Err(CameraError::CaptureStream {
                details: "camera released".to_string(),
            });
        }

        let mut sample = tokio::time::timeout(self.frame_timeout, self.samples.recv())
            .await
            .map_err(|_| CameraError::CaptureStream {
                details: format!("no frames for {:?}", self.frame_timeout),
            })?
            .ok_or_else(|| CameraError::CaptureStream {
                details: "capture stream ended".to_string(),
            })?;

        // Skip to the newest queued sample
        while let Ok(newer) = self.samples.try_recv() {
            sample = newer;
        }

        self.sample_to_frame(sample)
    }

    async fn release(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            return;
        };

        if let Some(torch) = &self.torch {
            if torch.is_on() {
                if let Err(e) = torch.set(false) {
                    warn!("Failed to turn torch off: {}", e);
                }
            }
        }

        if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
            error!("Failed to stop camera pipeline: {}", e);
        }
        info!("Camera {} released", self.device);
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            debug!("Camera {} dropped while streaming", self.device);
            let _ = pipeline.set_state(gstreamer::State::Null);
        }
    }
}

/// Opens V4L2 cameras, forced by configuration or ranked by [`select_camera`]
pub struct V4l2CameraProvider {
    config: CameraConfig,
}

impl V4l2CameraProvider {
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CameraProvider for V4l2CameraProvider {
    async fn open(&self, remembered: Option<String>) -> Result<Box<dyn FrameSource>, CameraError> {
        let config = self.config.clone();
        let camera = tokio::task::spawn_blocking(move || {
            let device = match &config.device {
                Some(device) => device.clone(),
                None => {
                    let candidates = devices::enumerate();
                    let chosen = select_camera(&candidates, remembered.as_deref())
                        .ok_or(CameraError::NoDevice)?;
                    info!("Selected camera {} ({})", chosen.id, chosen.label);
                    chosen.id.clone()
                }
            };
            GstCamera::open(&device, &config)
        })
        .await
        .map_err(|e| CameraError::Configuration {
            details: format!("Camera open task failed: {}", e),
        })??;

        Ok(Box::new(camera))
    }
}
