//! Barcode engines that turn frames into decoded text.

pub mod ean13;
pub mod itf;
pub mod scanline;
#[cfg(all(target_os = "linux", feature = "camera"))]
pub mod zbar;

#[cfg(test)]
pub(crate) mod testing;

pub use scanline::ScanlineEngine;
#[cfg(all(target_os = "linux", feature = "camera"))]
pub use zbar::ZbarEngine;

use crate::error::DecodeError;
use crate::frame::FrameData;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Barcode formats the scan pipeline knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbology {
    Code128,
    Itf,
    Ean13,
    Ean8,
    UpcA,
    QrCode,
}

/// Formats requested from the native engine
pub const NATIVE_FORMATS: &[Symbology] = &[
    Symbology::Code128,
    Symbology::Itf,
    Symbology::Ean13,
    Symbology::Ean8,
    Symbology::UpcA,
    Symbology::QrCode,
];

/// Restricted allow-list for the fallback decoder
pub const FALLBACK_FORMATS: &[Symbology] = &[Symbology::Itf, Symbology::Ean13];

impl Symbology {
    pub fn name(&self) -> &'static str {
        match self {
            Symbology::Code128 => "code_128",
            Symbology::Itf => "itf",
            Symbology::Ean13 => "ean_13",
            Symbology::Ean8 => "ean_8",
            Symbology::UpcA => "upc_a",
            Symbology::QrCode => "qr_code",
        }
    }

    /// Map a zbar symbol type name
    pub fn from_zbar(kind: &str) -> Option<Self> {
        match kind {
            "CODE-128" => Some(Symbology::Code128),
            "I2/5" => Some(Symbology::Itf),
            "EAN-13" => Some(Symbology::Ean13),
            "EAN-8" => Some(Symbology::Ean8),
            "UPC-A" => Some(Symbology::UpcA),
            "QR-Code" => Some(Symbology::QrCode),
            _ => None,
        }
    }
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub text: String,
    pub symbology: Symbology,
}

/// A barcode decoding engine.
///
/// `detect` returns every symbol found in the frame, most confident first.
/// [`DecodeError::Transient`] means this frame failed; [`DecodeError::Fatal`]
/// means the engine cannot be used any more.
pub trait BarcodeEngine: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &FrameData) -> Result<Vec<Detection>, DecodeError>;
}
