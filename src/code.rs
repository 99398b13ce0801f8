//! Baggage code validation and normalization.
//!
//! A baggage code is 10 digits (IATA license plate, last digit is a 7-3-1
//! weighted check digit) or 13 digits (GS1/EAN-13 style, passed through).

use serde::{Deserialize, Serialize};
use std::fmt;

const CHECK_WEIGHTS: [u32; 3] = [7, 3, 1];

/// Length of an IATA license plate code
pub const LICENSE_PLATE_LEN: usize = 10;
/// Length of the permissive GS1/EAN-13 style code
pub const GS1_LEN: usize = 13;

/// Check digit enforcement for 10-digit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationPolicy {
    /// Reject 10-digit codes with a bad check digit
    #[default]
    Strict,
    /// Accept them and flag the code as lenient
    Lenient,
}

/// A canonical baggage code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaggageCode {
    digits: String,
    lenient: bool,
}

impl BaggageCode {
    pub fn as_str(&self) -> &str {
        &self.digits
    }

    /// True when the code was only accepted because of lenient validation
    pub fn is_lenient(&self) -> bool {
        self.lenient
    }

    pub fn len(&self) -> usize {
        self.digits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digits.is_empty()
    }

    pub fn into_string(self) -> String {
        self.digits
    }
}

impl fmt::Display for BaggageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digits)
    }
}

impl AsRef<str> for BaggageCode {
    fn as_ref(&self) -> &str {
        &self.digits
    }
}

/// Concatenate every decimal digit run in `raw`, dropping everything else
pub fn extract_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// IATA license plate check: weights 7,3,1 over the first nine digits,
/// sum mod 10 must equal the tenth digit.
pub fn valid_check_digit(digits: &str) -> bool {
    let bytes = digits.as_bytes();
    if bytes.len() != LICENSE_PLATE_LEN || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }

    let sum: u32 = bytes[..9]
        .iter()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * CHECK_WEIGHTS[i % 3])
        .sum();

    sum % 10 == u32::from(bytes[9] - b'0')
}

/// Validates raw decoded text into a [`BaggageCode`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeNormalizer {
    policy: ValidationPolicy,
}

impl CodeNormalizer {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    pub fn normalize(&self, raw: &str) -> Option<BaggageCode> {
        let digits = extract_digits(raw);
        match digits.len() {
            LICENSE_PLATE_LEN => {
                if valid_check_digit(&digits) {
                    Some(BaggageCode {
                        digits,
                        lenient: false,
                    })
                } else {
                    match self.policy {
                        ValidationPolicy::Strict => None,
                        ValidationPolicy::Lenient => Some(BaggageCode {
                            digits,
                            lenient: true,
                        }),
                    }
                }
            }
            GS1_LEN => Some(BaggageCode {
                digits,
                lenient: false,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> CodeNormalizer {
        CodeNormalizer::new(ValidationPolicy::Strict)
    }

    /// Reference formula written out longhand
    fn reference_check(d: &str) -> bool {
        let w = [7, 3, 1];
        let v: Vec<u32> = d.chars().map(|c| c.to_digit(10).unwrap()).collect();
        let sum: u32 = (0..9).map(|i| v[i] * w[i % 3]).sum();
        sum % 10 == v[9]
    }

    #[test]
    fn test_check_digit_known_values() {
        assert!(valid_check_digit("0123456784"));
        assert!(valid_check_digit("4012345676"));
        assert!(!valid_check_digit("4012345678"));
        assert!(!valid_check_digit("0123456785"));
    }

    #[test]
    fn test_check_digit_matches_formula() {
        for seed in 0u64..500 {
            let n = seed.wrapping_mul(2_654_435_761) % 10_000_000_000;
            let d = format!("{:010}", n);
            assert_eq!(valid_check_digit(&d), reference_check(&d), "{}", d);
        }
    }

    #[test]
    fn test_check_digit_rejects_bad_shapes() {
        assert!(!valid_check_digit("012345678"));
        assert!(!valid_check_digit("01234567a4"));
        assert!(!valid_check_digit(""));
    }

    #[test]
    fn test_normalize_strips_separators() {
        let code = strict().normalize("0 123-456 784").unwrap();
        assert_eq!(code.as_str(), "0123456784");
        assert!(!code.is_lenient());
    }

    #[test]
    fn test_normalize_rejects_bad_check_digit_when_strict() {
        assert!(strict().normalize("4012345678").is_none());
    }

    #[test]
    fn test_normalize_lenient_flags_code() {
        let lenient = CodeNormalizer::new(ValidationPolicy::Lenient);
        let code = lenient.normalize("4012345678").unwrap();
        assert_eq!(code.as_str(), "4012345678");
        assert!(code.is_lenient());

        let valid = lenient.normalize("4012345676").unwrap();
        assert!(!valid.is_lenient());
    }

    #[test]
    fn test_normalize_accepts_thirteen_digits() {
        let code = strict().normalize("]C1 4006381333931").unwrap();
        assert_eq!(code.as_str(), "4006381333931");
    }

    #[test]
    fn test_normalize_rejects_other_lengths() {
        assert!(strict().normalize("").is_none());
        assert!(strict().normalize("12345").is_none());
        assert!(strict().normalize("01234567840").is_none());
        assert!(strict().normalize("no digits here").is_none());
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let normalizer = CodeNormalizer::new(ValidationPolicy::Lenient);
        for raw in ["0123456784", "TAG 4012345678", "4006381333931", "40-0638-1333931"] {
            let once = normalizer.normalize(raw).unwrap();
            let twice = normalizer.normalize(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
    }
}
