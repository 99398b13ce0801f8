use super::{BarcodeEngine, Detection, Symbology, NATIVE_FORMATS};
use crate::error::DecodeError;
use crate::frame::FrameData;
use gstreamer::prelude::*;
use gstreamer::{MessageType, MessageView, Pipeline};
use gstreamer_app::AppSrc;
use tracing::{debug, info, trace, warn};

/// How long to wait for zbar to report on a pushed frame
const RESULT_WAIT_MS: u64 = 40;

/// Native detector backed by the GStreamer `zbar` element
pub struct ZbarEngine {
    pipeline: Pipeline,
    appsrc: AppSrc,
    bus: gstreamer::Bus,
    geometry: Option<(u32, u32)>,
}

fn fatal<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> DecodeError + '_ {
    move |e| DecodeError::Fatal {
        details: format!("{}: {}", context, e),
    }
}

impl ZbarEngine {
    /// Build the detection pipeline. Fails when GStreamer or the zbar plugin is missing.
    pub fn new() -> Result<Self, DecodeError> {
        gstreamer::init().map_err(fatal("Failed to initialize GStreamer"))?;

        if gstreamer::ElementFactory::find("zbar").is_none() {
            return Err(DecodeError::Fatal {
                details: "zbar element is not installed".to_string(),
            });
        }

        let pipeline = gstreamer::parse::launch(
            "appsrc name=src format=time do-timestamp=true ! videoconvert ! \
             zbar name=zbar cache=false attach-frame=false ! fakesink sync=false",
        )
        .map_err(fatal("Failed to create zbar pipeline"))?
        .downcast::<Pipeline>()
        .map_err(|_| DecodeError::Fatal {
            details: "Failed to downcast to Pipeline".to_string(),
        })?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| DecodeError::Fatal {
                details: "appsrc missing from pipeline".to_string(),
            })?
            .downcast::<AppSrc>()
            .map_err(|_| DecodeError::Fatal {
                details: "Failed to downcast to AppSrc".to_string(),
            })?;

        let bus = pipeline.bus().ok_or_else(|| DecodeError::Fatal {
            details: "Pipeline has no bus".to_string(),
        })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(fatal("Failed to start zbar pipeline"))?;

        info!("zbar detection pipeline started");
        Ok(Self {
            pipeline,
            appsrc,
            bus,
            geometry: None,
        })
    }

    fn set_geometry(&mut self, width: u32, height: u32) {
        if self.geometry == Some((width, height)) {
            return;
        }
        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "GRAY8")
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", gstreamer::Fraction::new(0, 1))
            .build();
        self.appsrc.set_caps(Some(&caps));
        self.geometry = Some((width, height));
        debug!("zbar input set to {}x{}", width, height);
    }
}

/// GRAY8 rows are padded to four-byte strides
fn pad_rows(luma: &[u8], width: usize, height: usize) -> Vec<u8> {
    let stride = (width + 3) & !3;
    if stride == width {
        return luma.to_vec();
    }
    let mut out = vec![0u8; stride * height];
    for (dst, src) in out.chunks_exact_mut(stride).zip(luma.chunks_exact(width)) {
        dst[..width].copy_from_slice(src);
    }
    out
}

impl BarcodeEngine for ZbarEngine {
    fn name(&self) -> &'static str {
        "zbar"
    }

    fn detect(&mut self, frame: &FrameData) -> Result<Vec<Detection>, DecodeError> {
        let luma = frame.luma().ok_or_else(|| DecodeError::Transient {
            details: format!("frame {} has a short buffer", frame.id),
        })?;

        self.set_geometry(frame.width, frame.height);
        let data = pad_rows(&luma, frame.width as usize, frame.height as usize);
        self.appsrc
            .push_buffer(gstreamer::Buffer::from_mut_slice(data))
            .map_err(fatal("zbar pipeline rejected frame"))?;

        let mut found = Vec::new();
        let mut wait = gstreamer::ClockTime::from_mseconds(RESULT_WAIT_MS);
        while let Some(msg) = self
            .bus
            .timed_pop_filtered(wait, &[MessageType::Element, MessageType::Error])
        {
            match msg.view() {
                MessageView::Error(err) => {
                    return Err(DecodeError::Fatal {
                        details: err.error().to_string(),
                    });
                }
                _ => {
                    let Some(s) = msg.structure() else { continue };
                    if !s.has_name("barcode") {
                        continue;
                    }
                    let (Ok(kind), Ok(symbol)) = (s.get::<String>("type"), s.get::<String>("symbol"))
                    else {
                        continue;
                    };
                    match Symbology::from_zbar(&kind).filter(|f| NATIVE_FORMATS.contains(f)) {
                        Some(symbology) => {
                            trace!("zbar found {} {}", symbology, symbol);
                            found.push(Detection {
                                text: symbol,
                                symbology,
                            });
                        }
                        None => trace!("Ignoring unsupported symbol type {}", kind),
                    }
                }
            }
            wait = gstreamer::ClockTime::ZERO;
        }

        Ok(found)
    }
}

impl Drop for ZbarEngine {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop zbar pipeline: {}", e);
        }
    }
}
