//! Angle and geometry helpers
//!
//! All angles are radians in `[0, 2π)` with 0 pointing along +x (3 o'clock)
//! and angles growing counter-clockwise, since +y points up in the arena.

use std::f64::consts::{PI, TAU};

/// Normalize any finite angle into `[0, 2π)`
pub fn normalize_angle(a: f64) -> f64 {
    let n = a.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if n >= TAU {
        0.0
    } else {
        n
    }
}

/// Shortest signed rotation from `from` to `to`, in `(-π, π]`
pub fn signed_angle_delta(from: f64, to: f64) -> f64 {
    let d = normalize_angle(to - from);
    if d > PI {
        d - TAU
    } else {
        d
    }
}

/// Bearing from (x1, y1) to (x2, y2)
pub fn angle(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    normalize_angle((y2 - y1).atan2(x2 - x1))
}

/// Euclidean distance between two points
pub fn distance(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let dx = x2 - x1;
    let dy = y2 - y1;
    (dx * dx + dy * dy).sqrt()
}

/// Distance from (x1, y1) to (x2, y2) if the bearing to the second point
/// lies in the counter-clockwise window `start..=end`, otherwise 0.
///
/// A window with `start > end` wraps over 0 radians.
pub fn contains(x1: f64, y1: f64, start: f64, end: f64, x2: f64, y2: f64) -> f64 {
    let a = angle(x1, y1, x2, y2);
    let inside = if start > end {
        start <= a || a <= end
    } else {
        start <= a && a <= end
    };

    if inside {
        distance(x1, y1, x2, y2)
    } else {
        0.0
    }
}

/// Point reached by travelling `dist` from (x, y) along bearing `rad`
pub fn project(x: f64, y: f64, rad: f64, dist: f64) -> (f64, f64) {
    (x + dist * rad.cos(), y + dist * rad.sin())
}

/// True if the segment (x1, y1)-(x2, y2) touches the circle at (cx, cy)
pub fn intersect_segment_circle(
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    cx: f64,
    cy: f64,
    r: f64,
) -> bool {
    let dx = x2 - x1;
    let dy = y2 - y1;
    let len_sq = dx * dx + dy * dy;

    // Closest point on the segment to the circle center
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((cx - x1) * dx + (cy - y1) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let px = x1 + t * dx;
    let py = y1 + t * dy;

    distance(px, py, cx, cy) <= r
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const E: f64 = 1e-9;

    #[test]
    fn normalize_wraps_both_directions() {
        assert!((normalize_angle(-PI / 2.0) - 3.0 * PI / 2.0).abs() < E);
        assert!((normalize_angle(TAU + 1.0) - 1.0).abs() < E);
        assert_eq!(normalize_angle(TAU), 0.0);
        assert_eq!(normalize_angle(-1e-20), 0.0);
        assert!((normalize_angle(-7.0 * TAU - 0.5) - (TAU - 0.5)).abs() < 1e-9);
    }

    #[test]
    fn signed_delta_takes_short_way() {
        assert!((signed_angle_delta(0.1, TAU - 0.1) + 0.2).abs() < E);
        assert!((signed_angle_delta(TAU - 0.1, 0.1) - 0.2).abs() < E);
        assert!((signed_angle_delta(0.0, PI) - PI).abs() < E);
    }

    #[test]
    fn bearing_uses_y_up() {
        assert!((angle(0.0, 0.0, 0.0, 10.0) - PI / 2.0).abs() < E);
        assert!((angle(0.0, 0.0, -10.0, 0.0) - PI).abs() < E);
        assert!((angle(0.0, 0.0, 0.0, -10.0) - 3.0 * PI / 2.0).abs() < E);
    }

    #[test]
    fn contains_handles_wrapping_window() {
        // target straight east, window wraps over 0
        assert!((contains(0.0, 0.0, TAU - 0.2, 0.2, 10.0, 0.0) - 10.0).abs() < E);
        assert_eq!(contains(0.0, 0.0, 0.2, 1.0, 10.0, 0.0), 0.0);
        assert!((contains(0.0, 0.0, 1.0, 2.0, 0.0, 5.0) - 5.0).abs() < E);
    }

    #[test]
    fn segment_circle_intersection() {
        assert!(intersect_segment_circle(0.0, 0.0, 100.0, 0.0, 50.0, 5.0, 10.0));
        assert!(!intersect_segment_circle(0.0, 0.0, 100.0, 0.0, 50.0, 20.0, 10.0));
        // circle beyond the segment end
        assert!(!intersect_segment_circle(0.0, 0.0, 10.0, 0.0, 50.0, 0.0, 10.0));
        // zero-length segment inside the circle
        assert!(intersect_segment_circle(50.0, 0.0, 50.0, 0.0, 50.0, 0.0, 1.0));
    }

    proptest! {
        #[test]
        fn normalize_is_in_range_and_idempotent(a in -1.0e6f64..1.0e6f64) {
            let n = normalize_angle(a);
            prop_assert!((0.0..TAU).contains(&n));
            prop_assert_eq!(normalize_angle(n), n);
        }
    }
}
