//! Output size selection.
//!
//! Devices advertise a list of output resolutions. The session picks exactly one
//! of them before opening the frame source:
//!
//! 1. Candidates are normalized to (long side, short side).
//! 2. Candidates whose long/short ratio lies within `aspect_tolerance` of
//!    `aspect_ratio` are accepted.
//! 3. Among accepted candidates, the one whose short side is closest to the ideal
//!    short side wins. Ties keep the first candidate in input order.
//!
//!    The ideal short side is not a fixed constant: it follows the requested
//!    target's short side, so asking for 1920x1080 prefers 1080 rows. Only a
//!    degenerate target (a zero dimension) falls back to the fixed
//!    `SizePolicy::ideal_short_side`, which defaults to 720.
//! 4. With no accepted candidate, the largest pixel area wins (first in input order
//!    on ties).
//!
//! Selection is pure and deterministic for identical inputs.

use serde::{Deserialize, Serialize};

/// Default target aspect ratio (16:9).
pub const DEFAULT_ASPECT_RATIO: f64 = 16.0 / 9.0;

/// Default absolute tolerance on the long/short ratio.
pub const DEFAULT_ASPECT_TOLERANCE: f64 = 0.1;

/// Default ideal short side, used when the target is degenerate.
pub const DEFAULT_IDEAL_SHORT_SIDE: u32 = 720;

/// A width/height pair in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn long_side(&self) -> u32 {
        self.width.max(self.height)
    }

    pub fn short_side(&self) -> u32 {
        self.width.min(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Long side over short side. `None` when either side is zero.
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.short_side() == 0 {
            return None;
        }
        Some(self.long_side() as f64 / self.short_side() as f64)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Aspect and size preferences for [`select_output_size`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SizePolicy {
    pub aspect_ratio: f64,
    pub aspect_tolerance: f64,
    pub ideal_short_side: u32,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self {
            aspect_ratio: DEFAULT_ASPECT_RATIO,
            aspect_tolerance: DEFAULT_ASPECT_TOLERANCE,
            ideal_short_side: DEFAULT_IDEAL_SHORT_SIDE,
        }
    }
}

impl SizePolicy {
    fn accepts(&self, candidate: &Resolution) -> bool {
        candidate
            .aspect_ratio()
            .map(|ratio| (ratio - self.aspect_ratio).abs() <= self.aspect_tolerance)
            .unwrap_or(false)
    }

    fn ideal_short_side_for(&self, target: Resolution) -> u32 {
        match target.short_side() {
            0 => self.ideal_short_side,
            short => short,
        }
    }
}

/// Choose one output size from `candidates` for the requested `target`.
///
/// Returns `None` only when `candidates` is empty.
pub fn select_output_size(
    candidates: &[Resolution],
    target: Resolution,
    policy: &SizePolicy,
) -> Option<Resolution> {
    let ideal = policy.ideal_short_side_for(target);

    let mut best: Option<(Resolution, u32)> = None;
    for candidate in candidates.iter().filter(|c| policy.accepts(c)) {
        let distance = candidate.short_side().abs_diff(ideal);
        match best {
            Some((_, best_distance)) if best_distance <= distance => {}
            _ => best = Some((*candidate, distance)),
        }
    }
    if let Some((chosen, _)) = best {
        return Some(chosen);
    }

    log::debug!(
        "no output size within {:.3} of aspect {:.3}; falling back to largest area",
        policy.aspect_tolerance,
        policy.aspect_ratio
    );
    let mut largest: Option<Resolution> = None;
    for candidate in candidates {
        match largest {
            Some(current) if current.area() >= candidate.area() => {}
            _ => largest = Some(*candidate),
        }
    }
    largest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(width: u32, height: u32) -> Resolution {
        Resolution::new(width, height)
    }

    #[test]
    fn exact_match_wins_over_larger_same_aspect() {
        let candidates = [res(1920, 1080), res(640, 480), res(1280, 720)];
        let chosen = select_output_size(&candidates, res(1280, 720), &SizePolicy::default());
        assert_eq!(chosen, Some(res(1280, 720)));
    }

    #[test]
    fn falls_back_to_largest_area_without_aspect_match() {
        let candidates = [res(4000, 3000), res(800, 600)];
        let chosen = select_output_size(&candidates, res(1280, 720), &SizePolicy::default());
        assert_eq!(chosen, Some(res(4000, 3000)));
    }

    #[test]
    fn portrait_candidates_are_normalized() {
        let candidates = [res(480, 640), res(720, 1280)];
        let chosen = select_output_size(&candidates, res(720, 1280), &SizePolicy::default());
        assert_eq!(chosen, Some(res(720, 1280)));
    }

    #[test]
    fn distance_ties_keep_input_order() {
        // 960x540 and 1600x900 are both 180 away from 720.
        let candidates = [res(1600, 900), res(960, 540)];
        let chosen = select_output_size(&candidates, res(1280, 720), &SizePolicy::default());
        assert_eq!(chosen, Some(res(1600, 900)));

        let reversed = [res(960, 540), res(1600, 900)];
        let chosen = select_output_size(&reversed, res(1280, 720), &SizePolicy::default());
        assert_eq!(chosen, Some(res(960, 540)));
    }

    #[test]
    fn area_ties_keep_input_order() {
        let candidates = [res(600, 800), res(800, 600), res(640, 480)];
        let chosen = select_output_size(&candidates, res(1280, 720), &SizePolicy::default());
        assert_eq!(chosen, Some(res(600, 800)));
    }

    #[test]
    fn degenerate_target_uses_policy_ideal() {
        let candidates = [res(3840, 2160), res(1280, 720), res(1920, 1080)];
        let chosen = select_output_size(&candidates, res(0, 0), &SizePolicy::default());
        assert_eq!(chosen, Some(res(1280, 720)));
    }

    #[test]
    fn zero_sized_candidates_never_match_aspect() {
        let candidates = [res(0, 0), res(800, 600)];
        let chosen = select_output_size(&candidates, res(1280, 720), &SizePolicy::default());
        assert_eq!(chosen, Some(res(800, 600)));
    }

    #[test]
    fn empty_candidates_yield_none() {
        assert_eq!(
            select_output_size(&[], res(1280, 720), &SizePolicy::default()),
            None
        );
    }

    #[test]
    fn selection_is_deterministic() {
        let candidates = [
            res(1920, 1080),
            res(1280, 720),
            res(1440, 1080),
            res(960, 540),
            res(3840, 2160),
        ];
        let first = select_output_size(&candidates, res(1000, 560), &SizePolicy::default());
        for _ in 0..16 {
            assert_eq!(
                select_output_size(&candidates, res(1000, 560), &SizePolicy::default()),
                first
            );
        }
        assert!(first.is_some_and(|chosen| candidates.contains(&chosen)));
    }
}
