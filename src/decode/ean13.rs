//! EAN-13 decoding from scanline runs.

use super::scanline::{widths, Run};

/// Module widths of the L code set (space, bar, space, bar)
pub(crate) const L_WIDTHS: [[u8; 4]; 10] = [
    [3, 2, 1, 1],
    [2, 2, 2, 1],
    [2, 1, 2, 2],
    [1, 4, 1, 1],
    [1, 1, 3, 2],
    [1, 2, 3, 1],
    [1, 1, 1, 4],
    [1, 3, 1, 2],
    [1, 2, 1, 3],
    [3, 1, 1, 2],
];

/// Left-half parity per leading digit, `true` is the G set
pub(crate) const PARITY: [[bool; 6]; 10] = [
    [false, false, false, false, false, false],
    [false, false, true, false, true, true],
    [false, false, true, true, false, true],
    [false, false, true, true, true, false],
    [false, true, false, false, true, true],
    [false, true, true, false, false, true],
    [false, true, true, true, false, false],
    [false, true, false, true, false, true],
    [false, true, false, true, true, false],
    [false, true, true, false, true, false],
];

/// guard + 6 digits + middle guard + 6 digits + guard
const SYMBOL_RUNS: usize = 3 + 24 + 5 + 24 + 3;
const QUIET_ZONE: f32 = 5.0;

fn near(width: f32, module: f32) -> bool {
    width >= module * 0.5 && width <= module * 1.5
}

/// Quantize four element widths to modules; the digit is always 7 modules wide
fn modules(w: &[f32]) -> Option<[u8; 4]> {
    let unit = w.iter().sum::<f32>() / 7.0;
    if unit <= 0.0 {
        return None;
    }
    let mut out = [0u8; 4];
    for (slot, &width) in out.iter_mut().zip(w) {
        *slot = (width / unit).round().clamp(1.0, 4.0) as u8;
    }
    (out.iter().map(|&m| m as u32).sum::<u32>() == 7).then_some(out)
}

/// Returns the digit and whether it used the G set
fn left_digit(w: &[f32]) -> Option<(u8, bool)> {
    let m = modules(w)?;
    if let Some(d) = L_WIDTHS.iter().position(|l| *l == m) {
        return Some((d as u8, false));
    }
    let reversed = [m[3], m[2], m[1], m[0]];
    L_WIDTHS
        .iter()
        .position(|l| *l == reversed)
        .map(|d| (d as u8, true))
}

fn right_digit(w: &[f32]) -> Option<u8> {
    let m = modules(w)?;
    L_WIDTHS.iter().position(|l| *l == m).map(|d| d as u8)
}

/// Weights 1,3 alternating from the left over the first twelve digits
pub fn checksum_ok(digits: &[u8]) -> bool {
    if digits.len() != 13 {
        return false;
    }
    let sum: u32 = digits[..12]
        .iter()
        .enumerate()
        .map(|(i, &d)| d as u32 * if i % 2 == 0 { 1 } else { 3 })
        .sum();
    (10 - sum % 10) % 10 == digits[12] as u32
}

fn decode_symbol(w: &[f32]) -> Option<String> {
    let module = (w[0] + w[1] + w[2]) / 3.0;
    if !w[..3].iter().all(|&x| near(x, module)) {
        return None;
    }

    let mut digits = Vec::with_capacity(13);
    let mut parity = [false; 6];
    let mut pos = 3;

    for slot in parity.iter_mut() {
        let (digit, g_set) = left_digit(&w[pos..pos + 4])?;
        digits.push(digit);
        *slot = g_set;
        pos += 4;
    }

    if !w[pos..pos + 5].iter().all(|&x| near(x, module)) {
        return None;
    }
    pos += 5;

    for _ in 0..6 {
        digits.push(right_digit(&w[pos..pos + 4])?);
        pos += 4;
    }

    if !w[pos..pos + 3].iter().all(|&x| near(x, module)) {
        return None;
    }

    let first = PARITY.iter().position(|p| *p == parity)? as u8;
    digits.insert(0, first);
    if !checksum_ok(&digits) {
        return None;
    }

    Some(digits.iter().map(|d| char::from(b'0' + d)).collect())
}

/// Decode the first EAN-13 symbol found along `runs`
pub fn decode(runs: &[Run]) -> Option<String> {
    let w = widths(runs);

    for start in 0..runs.len() {
        if !runs[start].dark {
            continue;
        }
        if start + SYMBOL_RUNS > runs.len() {
            break;
        }

        let module = (w[start] + w[start + 1] + w[start + 2]) / 3.0;
        if start > 0 && w[start - 1] < module * QUIET_ZONE {
            continue;
        }

        if let Some(text) = decode_symbol(&w[start..start + SYMBOL_RUNS]) {
            return Some(text);
        }
    }
    None
}
