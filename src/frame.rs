use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::SystemTime;

/// Pixel layouts a frame source may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// 8-bit grayscale
    Gray8,
    /// YUV 4:2:2, Y0 U Y1 V
    Yuyv,
    /// Packed RGB, 3 bytes per pixel
    Rgb24,
}

impl FrameFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Gray8 => 1,
            FrameFormat::Yuyv => 2,
            FrameFormat::Rgb24 => 3,
        }
    }
}

/// One captured frame; the pixel buffer is shared so frames clone cheaply
#[derive(Debug, Clone)]
pub struct FrameData {
    pub id: u64,
    pub timestamp: SystemTime,
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    pub fn expected_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    pub fn validate_size(&self) -> bool {
        self.data.len() == self.expected_size()
    }

    /// Grayscale view of the frame, `width * height` bytes.
    ///
    /// Returns `None` when the buffer is too short for the declared geometry.
    pub fn luma(&self) -> Option<Cow<'_, [u8]>> {
        if !self.validate_size() {
            return None;
        }

        match self.format {
            FrameFormat::Gray8 => Some(Cow::Borrowed(self.data.as_slice())),
            // Y samples sit on even byte offsets
            FrameFormat::Yuyv => Some(Cow::Owned(
                self.data.iter().step_by(2).copied().collect(),
            )),
            FrameFormat::Rgb24 => Some(Cow::Owned(
                self.data
                    .chunks_exact(3)
                    .map(|px| {
                        let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
                        ((r * 299 + g * 587 + b * 114) / 1000) as u8
                    })
                    .collect(),
            )),
        }
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gray_luma_is_borrowed() {
        let frame = FrameData::new(1, SystemTime::now(), vec![10, 20, 30, 40], 2, 2, FrameFormat::Gray8);
        let luma = frame.luma().unwrap();
        assert!(matches!(luma, Cow::Borrowed(_)));
        assert_eq!(&*luma, &[10, 20, 30, 40]);
    }

    #[test]
    fn test_rgb_and_yuyv_conversion() {
        let rgb = FrameData::new(
            1,
            SystemTime::now(),
            vec![255, 255, 255, 0, 0, 0],
            2,
            1,
            FrameFormat::Rgb24,
        );
        assert_eq!(&*rgb.luma().unwrap(), &[255, 0]);

        let yuyv = FrameData::new(2, SystemTime::now(), vec![200, 128, 50, 128], 2, 1, FrameFormat::Yuyv);
        assert_eq!(&*yuyv.luma().unwrap(), &[200, 50]);
    }

    #[test]
    fn test_short_buffer_has_no_luma() {
        let frame = FrameData::new(1, SystemTime::now(), vec![0; 5], 2, 2, FrameFormat::Rgb24);
        assert!(!frame.validate_size());
        assert!(frame.luma().is_none());
    }
}
