use super::{ean13, itf, BarcodeEngine, Detection, Symbology, FALLBACK_FORMATS};
use crate::error::DecodeError;
use crate::frame::FrameData;
use tracing::trace;

/// Rows narrower than this cannot hold a tag barcode
const MIN_ROW_WIDTH: usize = 64;
/// Minimum spread between darkest and lightest pixel on a usable row
const MIN_CONTRAST: u8 = 40;

/// A run of same-colored pixels along a scanline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub dark: bool,
    pub width: u32,
}

/// Threshold a row at the midpoint of its range and collapse it into runs.
///
/// Returns an empty vector for flat rows.
pub fn binarize_row(row: &[u8]) -> Vec<Run> {
    let (Some(&min), Some(&max)) = (row.iter().min(), row.iter().max()) else {
        return Vec::new();
    };
    if max - min < MIN_CONTRAST {
        return Vec::new();
    }
    let threshold = min as u16 + ((max - min) as u16) / 2;

    let mut runs: Vec<Run> = Vec::new();
    for &px in row {
        let dark = (px as u16) < threshold;
        match runs.last_mut() {
            Some(run) if run.dark == dark => run.width += 1,
            _ => runs.push(Run { dark, width: 1 }),
        }
    }
    runs
}

/// Built-in 1D decoder scanning horizontal lines of the luma plane
pub struct ScanlineEngine {
    formats: Vec<Symbology>,
    try_harder: bool,
}

impl ScanlineEngine {
    /// Restrict decoding to `formats`; unsupported entries are ignored
    pub fn new(formats: &[Symbology], try_harder: bool) -> Self {
        let formats = formats
            .iter()
            .copied()
            .filter(|f| FALLBACK_FORMATS.contains(f))
            .collect();
        Self {
            formats,
            try_harder,
        }
    }

    /// The fallback configuration: ITF and EAN-13
    pub fn fallback(try_harder: bool) -> Self {
        Self::new(FALLBACK_FORMATS, try_harder)
    }

    fn row_positions(&self, height: usize) -> Vec<usize> {
        let count = if self.try_harder { 15 } else { 5 };
        let count = count.min(height);
        // Centre outwards so the most likely row is tried first
        let centre = height / 2;
        let step = (height / (count + 1)).max(1);
        let mut rows = vec![centre];
        for k in 1..=count / 2 {
            if let Some(up) = centre.checked_sub(k * step) {
                rows.push(up);
            }
            if centre + k * step < height {
                rows.push(centre + k * step);
            }
        }
        rows
    }

    fn decode_runs(&self, runs: &[Run]) -> Option<Detection> {
        for format in &self.formats {
            let text = match format {
                Symbology::Itf => itf::decode(runs),
                Symbology::Ean13 => ean13::decode(runs),
                _ => None,
            };
            if let Some(text) = text {
                return Some(Detection {
                    text,
                    symbology: *format,
                });
            }
        }
        None
    }
}

impl BarcodeEngine for ScanlineEngine {
    fn name(&self) -> &'static str {
        "scanline"
    }

    fn detect(&mut self, frame: &FrameData) -> Result<Vec<Detection>, DecodeError> {
        let luma = frame.luma().ok_or_else(|| DecodeError::Transient {
            details: format!(
                "frame {} is shorter than {}x{}",
                frame.id, frame.width, frame.height
            ),
        })?;

        let width = frame.width as usize;
        let height = frame.height as usize;
        if width < MIN_ROW_WIDTH || height == 0 {
            return Ok(Vec::new());
        }

        let mut found: Vec<Detection> = Vec::new();
        for y in self.row_positions(height) {
            let row = &luma[y * width..(y + 1) * width];
            let mut runs = binarize_row(row);
            if runs.len() < 10 {
                continue;
            }

            let mut detection = self.decode_runs(&runs);
            if detection.is_none() && self.try_harder {
                // Upside-down tag
                runs.reverse();
                detection = self.decode_runs(&runs);
            }

            if let Some(detection) = detection {
                trace!("Row {} decoded {} {}", y, detection.symbology, detection.text);
                if !found.contains(&detection) {
                    found.push(detection);
                }
                if !self.try_harder {
                    break;
                }
            }
        }

        Ok(found)
    }
}

/// Widths of `runs` as floats, for the symbology decoders
pub(crate) fn widths(runs: &[Run]) -> Vec<f32> {
    runs.iter().map(|r| r.width as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::testing::{ean13_row, frame_from_row, itf_row};

    #[test]
    fn test_binarize_row() {
        let row = [250, 250, 10, 10, 10, 240, 5, 255];
        let runs = binarize_row(&row);
        assert_eq!(
            runs,
            vec![
                Run { dark: false, width: 2 },
                Run { dark: true, width: 3 },
                Run { dark: false, width: 1 },
                Run { dark: true, width: 1 },
                Run { dark: false, width: 1 },
            ]
        );
    }

    #[test]
    fn test_flat_row_has_no_runs() {
        assert!(binarize_row(&[120; 50]).is_empty());
        assert!(binarize_row(&[]).is_empty());
    }

    #[test]
    fn test_detects_itf_frame() {
        let frame = frame_from_row(&itf_row("0123456784"), 9);
        let mut engine = ScanlineEngine::fallback(false);

        let detections = engine.detect(&frame).unwrap();
        assert_eq!(
            detections,
            vec![Detection {
                text: "0123456784".to_string(),
                symbology: Symbology::Itf,
            }]
        );
    }

    #[test]
    fn test_detects_ean13_frame() {
        let frame = frame_from_row(&ean13_row("4006381333931"), 9);
        let mut engine = ScanlineEngine::fallback(false);

        let detections = engine.detect(&frame).unwrap();
        assert_eq!(detections[0].text, "4006381333931");
        assert_eq!(detections[0].symbology, Symbology::Ean13);
    }

    #[test]
    fn test_upside_down_needs_try_harder() {
        let mut row = itf_row("4012345676");
        row.reverse();
        let frame = frame_from_row(&row, 9);

        assert!(ScanlineEngine::fallback(false).detect(&frame).unwrap().is_empty());
        let detections = ScanlineEngine::fallback(true).detect(&frame).unwrap();
        assert_eq!(detections[0].text, "4012345676");
    }

    #[test]
    fn test_format_allow_list() {
        let frame = frame_from_row(&ean13_row("4006381333931"), 9);
        let mut itf_only = ScanlineEngine::new(&[Symbology::Itf, Symbology::QrCode], true);
        assert!(itf_only.detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn test_short_frame_is_transient() {
        let mut frame = frame_from_row(&itf_row("0123456784"), 3);
        frame.height += 1;
        let err = ScanlineEngine::fallback(true).detect(&frame).unwrap_err();
        assert!(matches!(err, DecodeError::Transient { .. }));
    }
}
