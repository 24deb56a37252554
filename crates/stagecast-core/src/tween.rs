// crates/stagecast-core/src/tween.rs
//
// Easing library. A Tweener is a named curve with the classic
// (time, begin, delta, duration) signature; keyframes, the expression
// language's animate() and the framerate speed tween all resolve curves
// from user-supplied strings through `Tweener::from_name`.

use std::f64::consts::PI;

use crate::error::CoreError;

type EaseFn = fn(t: f64, b: f64, c: f64, d: f64) -> f64;

/// A named easing curve.
///
/// Calling convention: `t` is the elapsed time, `b` the start value, `c` the
/// total delta and `d` the duration. `tween(d, b, c, d) == b + c` for every
/// curve.
#[derive(Clone, Copy)]
pub struct Tweener {
    name: &'static str,
    f:    EaseFn,
}

impl Tweener {
    pub fn linear() -> Self {
        Self { name: "linear", f: linear }
    }

    /// Resolve an easing curve by name, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        let lower = name.to_ascii_lowercase();
        EASINGS
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|&(name, f)| Self { name, f })
            .ok_or_else(|| CoreError::InvalidArgument(format!("unknown easing curve {name}")))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn tween(&self, t: f64, b: f64, c: f64, d: f64) -> f64 {
        if d <= 0.0 {
            return b + c;
        }
        (self.f)(t, b, c, d)
    }
}

impl Default for Tweener {
    fn default() -> Self {
        Self::linear()
    }
}

impl PartialEq for Tweener {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl std::fmt::Debug for Tweener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Tweener").field(&self.name).finish()
    }
}

const EASINGS: &[(&str, EaseFn)] = &[
    ("linear",        linear),
    ("easeinsine",    ease_in_sine),
    ("easeoutsine",   ease_out_sine),
    ("easeinoutsine", ease_in_out_sine),
    ("easeinquad",    ease_in_quad),
    ("easeoutquad",   ease_out_quad),
    ("easeinoutquad", ease_in_out_quad),
    ("easeincubic",   ease_in_cubic),
    ("easeoutcubic",  ease_out_cubic),
    ("easeinoutcubic", ease_in_out_cubic),
    ("easeinexpo",    ease_in_expo),
    ("easeoutexpo",   ease_out_expo),
    ("easeinoutexpo", ease_in_out_expo),
    ("easeinbounce",  ease_in_bounce),
    ("easeoutbounce", ease_out_bounce),
];

// ── Curves ────────────────────────────────────────────────────────────────────

fn linear(t: f64, b: f64, c: f64, d: f64) -> f64 {
    c * t / d + b
}

fn ease_in_sine(t: f64, b: f64, c: f64, d: f64) -> f64 {
    -c * (t / d * (PI / 2.0)).cos() + c + b
}

fn ease_out_sine(t: f64, b: f64, c: f64, d: f64) -> f64 {
    c * (t / d * (PI / 2.0)).sin() + b
}

fn ease_in_out_sine(t: f64, b: f64, c: f64, d: f64) -> f64 {
    -c / 2.0 * ((PI * t / d).cos() - 1.0) + b
}

fn ease_in_quad(t: f64, b: f64, c: f64, d: f64) -> f64 {
    let t = t / d;
    c * t * t + b
}

fn ease_out_quad(t: f64, b: f64, c: f64, d: f64) -> f64 {
    let t = t / d;
    -c * t * (t - 2.0) + b
}

fn ease_in_out_quad(t: f64, b: f64, c: f64, d: f64) -> f64 {
    let t = t / (d / 2.0);
    if t < 1.0 {
        c / 2.0 * t * t + b
    } else {
        let t = t - 1.0;
        -c / 2.0 * (t * (t - 2.0) - 1.0) + b
    }
}

fn ease_in_cubic(t: f64, b: f64, c: f64, d: f64) -> f64 {
    let t = t / d;
    c * t * t * t + b
}

fn ease_out_cubic(t: f64, b: f64, c: f64, d: f64) -> f64 {
    let t = t / d - 1.0;
    c * (t * t * t + 1.0) + b
}

fn ease_in_out_cubic(t: f64, b: f64, c: f64, d: f64) -> f64 {
    let t = t / (d / 2.0);
    if t < 1.0 {
        c / 2.0 * t * t * t + b
    } else {
        let t = t - 2.0;
        c / 2.0 * (t * t * t + 2.0) + b
    }
}

fn ease_in_expo(t: f64, b: f64, c: f64, d: f64) -> f64 {
    if t == 0.0 {
        b
    } else {
        c * 2f64.powf(10.0 * (t / d - 1.0)) + b
    }
}

fn ease_out_expo(t: f64, b: f64, c: f64, d: f64) -> f64 {
    if t == d {
        b + c
    } else {
        c * (1.0 - 2f64.powf(-10.0 * t / d)) + b
    }
}

fn ease_in_out_expo(t: f64, b: f64, c: f64, d: f64) -> f64 {
    if t == 0.0 {
        return b;
    }
    if t == d {
        return b + c;
    }
    let t = t / (d / 2.0);
    if t < 1.0 {
        c / 2.0 * 2f64.powf(10.0 * (t - 1.0)) + b
    } else {
        c / 2.0 * (2.0 - 2f64.powf(-10.0 * (t - 1.0))) + b
    }
}

fn ease_in_bounce(t: f64, b: f64, c: f64, d: f64) -> f64 {
    c - ease_out_bounce(d - t, 0.0, c, d) + b
}

fn ease_out_bounce(t: f64, b: f64, c: f64, d: f64) -> f64 {
    let t = t / d;
    if t < 1.0 / 2.75 {
        c * (7.5625 * t * t) + b
    } else if t < 2.0 / 2.75 {
        let t = t - 1.5 / 2.75;
        c * (7.5625 * t * t + 0.75) + b
    } else if t < 2.5 / 2.75 {
        let t = t - 2.25 / 2.75;
        c * (7.5625 * t * t + 0.9375) + b
    } else {
        let t = t - 2.625 / 2.75;
        c * (7.5625 * t * t + 0.984375) + b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_midpoint() {
        let tw = Tweener::linear();
        assert_eq!(tw.tween(5.0, 0.0, 10.0, 10.0), 5.0);
    }

    #[test]
    fn every_curve_hits_endpoints() {
        for (name, _) in EASINGS {
            let tw = Tweener::from_name(name).unwrap();
            let start = tw.tween(0.0, 2.0, 8.0, 20.0);
            let end   = tw.tween(20.0, 2.0, 8.0, 20.0);
            assert!((start - 2.0).abs() < 1e-9, "{name} start: {start}");
            assert!((end - 10.0).abs() < 1e-9, "{name} end: {end}");
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(Tweener::from_name("EaseInOutSine").is_ok());
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!(Tweener::from_name("wobble").is_err());
    }

    #[test]
    fn zero_duration_jumps_to_destination() {
        let tw = Tweener::linear();
        assert_eq!(tw.tween(0.0, 1.0, 4.0, 0.0), 5.0);
    }
}
