//! Interleaved 2 of 5, the symbology printed on IATA bag tags.
//!
//! Digits come in pairs: the first is carried by five bars, the second by
//! the five interleaved spaces. Each digit has exactly two wide elements.

use super::scanline::{widths, Run};

/// Wide/narrow layout per digit, `true` is wide
pub(crate) const PATTERNS: [[bool; 5]; 10] = [
    [false, false, true, true, false],
    [true, false, false, false, true],
    [false, true, false, false, true],
    [true, true, false, false, false],
    [false, false, true, false, true],
    [true, false, true, false, false],
    [false, true, true, false, false],
    [false, false, false, true, true],
    [true, false, false, true, false],
    [false, true, false, true, false],
];

/// Quiet zone in narrow-element widths
const QUIET_ZONE: f32 = 5.0;
const MIN_DIGITS: usize = 6;

fn is_narrow(width: f32, narrow: f32) -> bool {
    width >= narrow * 0.5 && width <= narrow * 1.5
}

fn is_wide(width: f32, narrow: f32) -> bool {
    width >= narrow * 1.8 && width <= narrow * 4.0
}

fn decode_digit(elements: [f32; 5]) -> Option<u8> {
    let mut order = [0usize, 1, 2, 3, 4];
    order.sort_by(|&a, &b| elements[b].total_cmp(&elements[a]));

    let wide_min = elements[order[0]].min(elements[order[1]]);
    let narrow_max = elements[order[2]];
    if wide_min < narrow_max * 1.5 {
        return None;
    }

    let mut pattern = [false; 5];
    pattern[order[0]] = true;
    pattern[order[1]] = true;
    PATTERNS.iter().position(|p| *p == pattern).map(|d| d as u8)
}

fn is_stop(w: &[f32], pos: usize, narrow: f32) -> bool {
    if pos + 3 > w.len() {
        return false;
    }
    let quiet_after = w.get(pos + 3).map_or(true, |&q| q >= narrow * QUIET_ZONE);
    is_wide(w[pos], narrow) && is_narrow(w[pos + 1], narrow) && is_narrow(w[pos + 2], narrow) && quiet_after
}

fn decode_from(w: &[f32], mut pos: usize, narrow: f32) -> Option<String> {
    let mut digits = String::new();
    loop {
        if is_stop(w, pos, narrow) {
            return (digits.len() >= MIN_DIGITS).then_some(digits);
        }
        if pos + 10 > w.len() {
            return None;
        }

        let bars = [w[pos], w[pos + 2], w[pos + 4], w[pos + 6], w[pos + 8]];
        let spaces = [w[pos + 1], w[pos + 3], w[pos + 5], w[pos + 7], w[pos + 9]];
        let first = decode_digit(bars)?;
        let second = decode_digit(spaces)?;
        digits.push(char::from(b'0' + first));
        digits.push(char::from(b'0' + second));
        pos += 10;
    }
}

/// Decode the first ITF symbol found along `runs`
pub fn decode(runs: &[Run]) -> Option<String> {
    let w = widths(runs);

    for start in 0..runs.len() {
        if !runs[start].dark {
            continue;
        }
        // start guard + one digit pair + stop
        if start + 4 + 10 + 3 > runs.len() {
            break;
        }

        let narrow = w[start..start + 4].iter().sum::<f32>() / 4.0;
        if !w[start..start + 4].iter().all(|&x| is_narrow(x, narrow)) {
            continue;
        }
        if start > 0 && w[start - 1] < narrow * QUIET_ZONE {
            continue;
        }

        if let Some(text) = decode_from(&w, start + 4, narrow) {
            return Some(text);
        }
    }
    None
}
