//! Synthetic barcode rows for decoder and pipeline tests.

use super::ean13::{L_WIDTHS, PARITY};
use super::itf::PATTERNS;
use crate::frame::{FrameData, FrameFormat};
use std::time::SystemTime;

const LIGHT: u8 = 230;
const DARK: u8 = 20;
const QUIET: usize = 20;
const NARROW: usize = 2;
const WIDE: usize = 5;
const MODULE: usize = 2;

fn push(row: &mut Vec<u8>, dark: bool, width: usize) {
    row.extend(std::iter::repeat(if dark { DARK } else { LIGHT }).take(width));
}

fn digit(c: char) -> usize {
    c.to_digit(10).expect("digit") as usize
}

/// Render an even-length digit string as ITF
pub(crate) fn itf_row(digits: &str) -> Vec<u8> {
    assert!(digits.len() % 2 == 0);
    let chars: Vec<char> = digits.chars().collect();

    let mut row = Vec::new();
    push(&mut row, false, QUIET);
    for i in 0..4 {
        push(&mut row, i % 2 == 0, NARROW);
    }

    for pair in chars.chunks(2) {
        let bars = PATTERNS[digit(pair[0])];
        let spaces = PATTERNS[digit(pair[1])];
        for k in 0..5 {
            push(&mut row, true, if bars[k] { WIDE } else { NARROW });
            push(&mut row, false, if spaces[k] { WIDE } else { NARROW });
        }
    }

    push(&mut row, true, WIDE);
    push(&mut row, false, NARROW);
    push(&mut row, true, NARROW);
    push(&mut row, false, QUIET);
    row
}

/// Render a 13-digit string as EAN-13 (the check digit is not recomputed)
pub(crate) fn ean13_row(digits: &str) -> Vec<u8> {
    let d: Vec<usize> = digits.chars().map(digit).collect();
    assert_eq!(d.len(), 13);
    let parity = PARITY[d[0]];

    let mut row = Vec::new();
    push(&mut row, false, QUIET);
    for k in 0..3 {
        push(&mut row, k % 2 == 0, MODULE);
    }

    for (i, &value) in d[1..7].iter().enumerate() {
        let mut widths = L_WIDTHS[value];
        if parity[i] {
            widths.reverse();
        }
        for (k, w) in widths.iter().enumerate() {
            push(&mut row, k % 2 == 1, *w as usize * MODULE);
        }
    }

    for k in 0..5 {
        push(&mut row, k % 2 == 1, MODULE);
    }

    for &value in &d[7..13] {
        for (k, w) in L_WIDTHS[value].iter().enumerate() {
            push(&mut row, k % 2 == 0, *w as usize * MODULE);
        }
    }

    for k in 0..3 {
        push(&mut row, k % 2 == 0, MODULE);
    }
    push(&mut row, false, QUIET);
    row
}

/// Grayscale frame repeating `row` on every line
pub(crate) fn frame_from_row(row: &[u8], height: u32) -> FrameData {
    let mut data = Vec::with_capacity(row.len() * height as usize);
    for _ in 0..height {
        data.extend_from_slice(row);
    }
    FrameData::new(
        0,
        SystemTime::now(),
        data,
        row.len() as u32,
        height,
        FrameFormat::Gray8,
    )
}

/// Featureless grey frame
pub(crate) fn blank_frame(width: u32, height: u32) -> FrameData {
    FrameData::new(
        0,
        SystemTime::now(),
        vec![128; (width * height) as usize],
        width,
        height,
        FrameFormat::Gray8,
    )
}
