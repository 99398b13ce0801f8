//! V4L2 torch and zoom controls through raw ioctls.

use super::{CameraCapabilities, ControlRange, TorchControl};
use crate::error::CameraError;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub const V4L2_CID_FLASH_LED_MODE: u32 = 0x009c_0901;
pub const V4L2_CID_ZOOM_ABSOLUTE: u32 = 0x009a_090d;

const FLASH_LED_MODE_NONE: i32 = 0;
const FLASH_LED_MODE_TORCH: i32 = 2;

#[cfg(target_os = "linux")]
mod ioctl {
    use super::ControlRange;
    use crate::error::CameraError;
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC044_5624;
    const VIDIOC_S_CTRL: libc::c_ulong = 0xC008_561C;
    const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;

    #[repr(C)]
    struct QueryCtrl {
        id: u32,
        kind: u32,
        name: [u8; 32],
        minimum: i32,
        maximum: i32,
        step: i32,
        default_value: i32,
        flags: u32,
        reserved: [u32; 2],
    }

    #[repr(C)]
    struct Control {
        id: u32,
        value: i32,
    }

    fn open(device: &str) -> Result<std::fs::File, CameraError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|e| CameraError::Control {
                details: format!("Failed to open {}: {}", device, e),
            })
    }

    pub fn query(device: &str, id: u32) -> Result<Option<ControlRange>, CameraError> {
        let file = open(device)?;
        let mut query = QueryCtrl {
            id,
            kind: 0,
            name: [0; 32],
            minimum: 0,
            maximum: 0,
            step: 0,
            default_value: 0,
            flags: 0,
            reserved: [0; 2],
        };

        // SAFETY: `query` is a properly sized v4l2_queryctrl that outlives the call
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_QUERYCTRL as _, &mut query) };
        if rc < 0 || query.flags & V4L2_CTRL_FLAG_DISABLED != 0 {
            return Ok(None);
        }

        Ok(Some(ControlRange {
            min: query.minimum,
            max: query.maximum,
            step: query.step,
        }))
    }

    pub fn set(device: &str, id: u32, value: i32) -> Result<(), CameraError> {
        let file = open(device)?;
        let mut control = Control { id, value };

        // SAFETY: `control` is a properly sized v4l2_control that outlives the call
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_S_CTRL as _, &mut control) };
        if rc < 0 {
            return Err(CameraError::Control {
                details: format!(
                    "Setting control {:#x} on {} failed: {}",
                    id,
                    device,
                    std::io::Error::last_os_error()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod ioctl {
    use super::ControlRange;
    use crate::error::CameraError;

    pub fn query(_device: &str, _id: u32) -> Result<Option<ControlRange>, CameraError> {
        Ok(None)
    }

    pub fn set(_device: &str, _id: u32, _value: i32) -> Result<(), CameraError> {
        Err(CameraError::Control {
            details: "V4L2 controls are only available on Linux".to_string(),
        })
    }
}

pub fn query_control(device: &str, id: u32) -> Result<Option<ControlRange>, CameraError> {
    ioctl::query(device, id)
}

pub fn set_control(device: &str, id: u32, value: i32) -> Result<(), CameraError> {
    ioctl::set(device, id, value)
}

/// Whether the flash LED control offers torch mode
pub fn has_torch(device: &str) -> bool {
    matches!(
        query_control(device, V4L2_CID_FLASH_LED_MODE),
        Ok(Some(range)) if range.max >= FLASH_LED_MODE_TORCH
    )
}

/// Query torch and zoom support; failures read as "not supported"
pub fn probe_capabilities(device: &str) -> CameraCapabilities {
    let zoom = query_control(device, V4L2_CID_ZOOM_ABSOLUTE)
        .ok()
        .flatten()
        .filter(|range| range.max > range.min);
    let capabilities = CameraCapabilities {
        torch: has_torch(device),
        zoom,
    };
    debug!("Capabilities of {}: {:?}", device, capabilities);
    capabilities
}

/// Set zoom to the middle of its range
pub fn apply_zoom_midpoint(device: &str, range: ControlRange) -> Result<i32, CameraError> {
    let value = range.midpoint();
    set_control(device, V4L2_CID_ZOOM_ABSOLUTE, value)?;
    info!("Zoom on {} set to {} ({}..{})", device, value, range.min, range.max);
    Ok(value)
}

/// Torch driven through the flash LED mode control
pub struct V4l2Torch {
    device: String,
    on: AtomicBool,
}

impl V4l2Torch {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            on: AtomicBool::new(false),
        }
    }
}

impl TorchControl for V4l2Torch {
    fn set(&self, on: bool) -> Result<(), CameraError> {
        let mode = if on {
            FLASH_LED_MODE_TORCH
        } else {
            FLASH_LED_MODE_NONE
        };
        set_control(&self.device, V4L2_CID_FLASH_LED_MODE, mode)?;
        self.on.store(on, Ordering::Relaxed);
        debug!("Torch on {} {}", self.device, if on { "on" } else { "off" });
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}
