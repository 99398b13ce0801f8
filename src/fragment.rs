//! Split-label reassembly.
//!
//! Some scanners deliver one baggage tag as two separate reads when the
//! barcode is printed across a template boundary. The assembler keeps the
//! last few digit strings and tries to join two halves into a code of
//! length 10 or 13.
//!
//! This is a heuristic: pairs are tried most-recent first and only when
//! their lengths differ by at most one (tolerating a dropped leading zero).
//! Neither rule guarantees a correct reconstruction.

use crate::code::{valid_check_digit, GS1_LEN, LICENSE_PLATE_LEN};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1000);
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub digits: String,
    pub observed_at: Instant,
}

#[derive(Debug)]
pub struct FragmentAssembler {
    buffer: VecDeque<Fragment>,
    window: Duration,
    capacity: usize,
}

impl Default for FragmentAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_CAPACITY)
    }
}

impl FragmentAssembler {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.max(1)),
            window,
            capacity: capacity.max(1),
        }
    }

    pub fn add_fragment(&mut self, digits: &str) {
        self.add_fragment_at(digits, Instant::now());
    }

    /// Append a fragment observed at `now`, then prune by age, duplicates and capacity
    pub fn add_fragment_at(&mut self, digits: &str, now: Instant) {
        if digits.is_empty() {
            return;
        }

        self.buffer.push_back(Fragment {
            digits: digits.to_string(),
            observed_at: now,
        });
        self.prune(now);

        trace!("Fragment buffer holds {} entries", self.buffer.len());
    }

    fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.buffer
            .retain(|f| now.saturating_duration_since(f.observed_at) <= window);

        let mut seen = Vec::with_capacity(self.buffer.len());
        self.buffer.retain(|f| {
            if seen.contains(&f.digits) {
                false
            } else {
                seen.push(f.digits.clone());
                true
            }
        });

        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    pub fn try_assemble(&mut self) -> Option<String> {
        self.try_assemble_at(Instant::now())
    }

    /// Attempt to join two buffered halves into a 10 or 13 digit string
    pub fn try_assemble_at(&mut self, now: Instant) -> Option<String> {
        self.prune(now);
        if self.buffer.len() < 2 {
            return None;
        }

        let mut recent: Vec<&Fragment> = self.buffer.iter().collect();
        // Stable sort keeps insertion order for equal timestamps, so reverse first
        recent.reverse();
        recent.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        let recent: Vec<&str> = recent.iter().map(|f| f.digits.as_str()).collect();

        for (i, a) in recent.iter().enumerate() {
            for b in recent.iter().skip(i + 1) {
                if a == b || a.len().abs_diff(b.len()) > 1 {
                    continue;
                }
                for joined in [format!("{}{}", a, b), format!("{}{}", b, a)] {
                    if joined.len() == LICENSE_PLATE_LEN || joined.len() == GS1_LEN {
                        return Some(joined);
                    }
                }
            }
        }

        recent
            .iter()
            .find(|d| {
                (d.len() == LICENSE_PLATE_LEN && valid_check_digit(d)) || d.len() == GS1_LEN
            })
            .map(|d| d.to_string())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_needs_two_fragments() {
        let mut assembler = FragmentAssembler::default();
        let t0 = Instant::now();
        assembler.add_fragment_at("12345", t0);
        assert_eq!(assembler.try_assemble_at(t0), None);
    }

    #[test]
    fn test_most_recent_first_order() {
        let mut assembler = FragmentAssembler::default();
        let t0 = Instant::now();
        assembler.add_fragment_at("67890", t0);
        assembler.add_fragment_at("12345", t0 + ms(100));

        // Most recent fragment leads the concatenation
        assert_eq!(
            assembler.try_assemble_at(t0 + ms(150)),
            Some("1234567890".to_string())
        );
    }

    #[test]
    fn test_reverse_arrival_order() {
        let mut assembler = FragmentAssembler::default();
        let t0 = Instant::now();
        assembler.add_fragment_at("12345", t0);
        assembler.add_fragment_at("67890", t0 + ms(100));

        assert_eq!(
            assembler.try_assemble_at(t0 + ms(150)),
            Some("6789012345".to_string())
        );
    }

    #[test]
    fn test_near_equal_lengths_for_thirteen() {
        let mut assembler = FragmentAssembler::default();
        let t0 = Instant::now();
        assembler.add_fragment_at("400638", t0);
        assembler.add_fragment_at("1333931", t0 + ms(10));

        assert_eq!(
            assembler.try_assemble_at(t0 + ms(20)),
            Some("1333931400638".to_string())
        );
    }

    #[test]
    fn test_unbalanced_pair_is_not_joined() {
        let mut assembler = FragmentAssembler::default();
        let t0 = Instant::now();
        assembler.add_fragment_at("123", t0);
        assembler.add_fragment_at("4567890", t0 + ms(10));

        assert_eq!(assembler.try_assemble_at(t0 + ms(20)), None);
    }

    #[test]
    fn test_expired_fragments_are_pruned() {
        let mut assembler = FragmentAssembler::default();
        let t0 = Instant::now();
        assembler.add_fragment_at("12345", t0);
        assembler.add_fragment_at("67890", t0 + ms(1500));

        assert_eq!(assembler.len(), 1);
        assert_eq!(assembler.try_assemble_at(t0 + ms(1500)), None);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let mut assembler = FragmentAssembler::default();
        let t0 = Instant::now();
        assembler.add_fragment_at("12345", t0);
        assembler.add_fragment_at("12345", t0 + ms(10));

        assert_eq!(assembler.len(), 1);
        assert_eq!(assembler.try_assemble_at(t0 + ms(20)), None);
    }

    #[test]
    fn test_capacity_keeps_most_recent() {
        let mut assembler = FragmentAssembler::new(DEFAULT_WINDOW, 3);
        let t0 = Instant::now();
        for (i, d) in ["1", "22", "333", "4444"].iter().enumerate() {
            assembler.add_fragment_at(d, t0 + ms(i as u64));
        }

        assert_eq!(assembler.len(), 3);
        assert!(assembler.buffer.iter().all(|f| f.digits != "1"));
    }

    #[test]
    fn test_single_valid_fragment_fallback() {
        let mut assembler = FragmentAssembler::default();
        let t0 = Instant::now();
        assembler.add_fragment_at("0123456784", t0);
        assembler.add_fragment_at("99", t0 + ms(5));

        assert_eq!(
            assembler.try_assemble_at(t0 + ms(10)),
            Some("0123456784".to_string())
        );
    }

    #[test]
    fn test_clear_empties_buffer() {
        let mut assembler = FragmentAssembler::default();
        assembler.add_fragment("12345");
        assembler.clear();
        assert!(assembler.is_empty());
    }
}
