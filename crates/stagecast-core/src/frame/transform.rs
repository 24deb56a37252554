// crates/stagecast-core/src/frame/transform.rs
//
// Compositional transforms. An image transform, an audio transform and a
// side-data transform combine into the frame transform attached to every
// draw-frame node. Composition is associative so the flattening visitor can
// multiply transforms top-down; range fields (levels) intersect so chained
// level corrections never widen.

use std::ops::{Mul, MulAssign};

use crate::tween::Tweener;

/// Absolute tolerance for transform float comparisons.
pub const EPSILON: f64 = 5e-8;

fn eq(lhs: f64, rhs: f64) -> bool {
    (lhs - rhs).abs() < EPSILON
}

// ── Field mode ────────────────────────────────────────────────────────────────

/// 2-bit mask over {upper, lower}. Progressive has both bits set; combining
/// two transforms intersects the masks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldMode {
    Empty,
    Upper,
    Lower,
    Progressive,
}

impl FieldMode {
    pub fn bits(self) -> u8 {
        match self {
            FieldMode::Empty => 0,
            FieldMode::Upper => 1,
            FieldMode::Lower => 2,
            FieldMode::Progressive => 3,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => FieldMode::Empty,
            1 => FieldMode::Upper,
            2 => FieldMode::Lower,
            _ => FieldMode::Progressive,
        }
    }

    pub fn and(self, other: FieldMode) -> FieldMode {
        FieldMode::from_bits(self.bits() & other.bits())
    }

    /// The opposite field; progressive and empty are their own inverse.
    pub fn invert(self) -> FieldMode {
        match self {
            FieldMode::Upper => FieldMode::Lower,
            FieldMode::Lower => FieldMode::Upper,
            other => other,
        }
    }
}

impl Default for FieldMode {
    fn default() -> Self {
        FieldMode::Progressive
    }
}

// ── Levels ────────────────────────────────────────────────────────────────────

/// Input/output level mapping. Identity maps [0, 1] onto [0, 1] with gamma 1.
#[derive(Clone, Copy, Debug)]
pub struct Levels {
    pub min_input:  f64,
    pub max_input:  f64,
    pub gamma:      f64,
    pub min_output: f64,
    pub max_output: f64,
}

impl Default for Levels {
    fn default() -> Self {
        Self { min_input: 0.0, max_input: 1.0, gamma: 1.0, min_output: 0.0, max_output: 1.0 }
    }
}

// ── Image transform ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
pub struct ImageTransform {
    pub opacity:    f64,
    pub contrast:   f64,
    pub brightness: f64,
    pub saturation: f64,
    pub fill_translation: [f64; 2],
    pub fill_scale:       [f64; 2],
    pub clip_translation: [f64; 2],
    pub clip_scale:       [f64; 2],
    pub levels:     Levels,
    pub field_mode: FieldMode,
    pub is_key:     bool,
    pub is_mix:     bool,
    pub is_still:   bool,
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self {
            opacity:    1.0,
            contrast:   1.0,
            brightness: 1.0,
            saturation: 1.0,
            fill_translation: [0.0, 0.0],
            fill_scale:       [1.0, 1.0],
            clip_translation: [0.0, 0.0],
            clip_scale:       [1.0, 1.0],
            levels:     Levels::default(),
            field_mode: FieldMode::Progressive,
            is_key:     false,
            is_mix:     false,
            is_still:   false,
        }
    }
}

impl MulAssign<&ImageTransform> for ImageTransform {
    fn mul_assign(&mut self, other: &ImageTransform) {
        self.opacity    *= other.opacity;
        self.brightness *= other.brightness;
        self.contrast   *= other.contrast;
        self.saturation *= other.saturation;
        // Translation is additive after the parent's scale is applied to the
        // child's offset; scale itself is multiplicative.
        self.fill_translation[0] += other.fill_translation[0] * self.fill_scale[0];
        self.fill_translation[1] += other.fill_translation[1] * self.fill_scale[1];
        self.fill_scale[0] *= other.fill_scale[0];
        self.fill_scale[1] *= other.fill_scale[1];
        self.clip_translation[0] += other.clip_translation[0] * self.clip_scale[0];
        self.clip_translation[1] += other.clip_translation[1] * self.clip_scale[1];
        self.clip_scale[0] *= other.clip_scale[0];
        self.clip_scale[1] *= other.clip_scale[1];
        // Levels intersect: chained corrections can only narrow the ranges.
        self.levels.min_input  = self.levels.min_input.max(other.levels.min_input);
        self.levels.max_input  = self.levels.max_input.min(other.levels.max_input);
        self.levels.min_output = self.levels.min_output.max(other.levels.min_output);
        self.levels.max_output = self.levels.max_output.min(other.levels.max_output);
        self.levels.gamma *= other.levels.gamma;
        self.field_mode = self.field_mode.and(other.field_mode);
        self.is_key   |= other.is_key;
        self.is_mix   |= other.is_mix;
        self.is_still |= other.is_still;
    }
}

impl Mul for ImageTransform {
    type Output = ImageTransform;

    fn mul(mut self, other: ImageTransform) -> ImageTransform {
        self *= &other;
        self
    }
}

impl ImageTransform {
    pub fn tween(
        time: f64,
        source: &ImageTransform,
        dest: &ImageTransform,
        duration: f64,
        tweener: &Tweener,
    ) -> ImageTransform {
        let tw = |s: f64, d: f64| tweener.tween(time, s, d - s, duration);

        ImageTransform {
            opacity:    tw(source.opacity, dest.opacity),
            brightness: tw(source.brightness, dest.brightness),
            contrast:   tw(source.contrast, dest.contrast),
            saturation: tw(source.saturation, dest.saturation),
            fill_translation: [
                tw(source.fill_translation[0], dest.fill_translation[0]),
                tw(source.fill_translation[1], dest.fill_translation[1]),
            ],
            fill_scale: [
                tw(source.fill_scale[0], dest.fill_scale[0]),
                tw(source.fill_scale[1], dest.fill_scale[1]),
            ],
            clip_translation: [
                tw(source.clip_translation[0], dest.clip_translation[0]),
                tw(source.clip_translation[1], dest.clip_translation[1]),
            ],
            clip_scale: [
                tw(source.clip_scale[0], dest.clip_scale[0]),
                tw(source.clip_scale[1], dest.clip_scale[1]),
            ],
            levels: Levels {
                min_input:  tw(source.levels.min_input, dest.levels.min_input),
                max_input:  tw(source.levels.max_input, dest.levels.max_input),
                gamma:      tw(source.levels.gamma, dest.levels.gamma),
                min_output: tw(source.levels.min_output, dest.levels.min_output),
                max_output: tw(source.levels.max_output, dest.levels.max_output),
            },
            field_mode: source.field_mode.and(dest.field_mode),
            is_key:     source.is_key | dest.is_key,
            is_mix:     source.is_mix | dest.is_mix,
            is_still:   source.is_still | dest.is_still,
        }
    }
}

impl PartialEq for ImageTransform {
    fn eq(&self, other: &Self) -> bool {
        eq(self.opacity, other.opacity)
            && eq(self.contrast, other.contrast)
            && eq(self.brightness, other.brightness)
            && eq(self.saturation, other.saturation)
            && eq(self.fill_translation[0], other.fill_translation[0])
            && eq(self.fill_translation[1], other.fill_translation[1])
            && eq(self.fill_scale[0], other.fill_scale[0])
            && eq(self.fill_scale[1], other.fill_scale[1])
            && eq(self.clip_translation[0], other.clip_translation[0])
            && eq(self.clip_translation[1], other.clip_translation[1])
            && eq(self.clip_scale[0], other.clip_scale[0])
            && eq(self.clip_scale[1], other.clip_scale[1])
            && eq(self.levels.min_input, other.levels.min_input)
            && eq(self.levels.max_input, other.levels.max_input)
            && eq(self.levels.gamma, other.levels.gamma)
            && eq(self.levels.min_output, other.levels.min_output)
            && eq(self.levels.max_output, other.levels.max_output)
            && self.field_mode == other.field_mode
            && self.is_key == other.is_key
            && self.is_mix == other.is_mix
            && self.is_still == other.is_still
    }
}

// ── Audio transform ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
pub struct AudioTransform {
    pub volume:   f64,
    pub is_still: bool,
}

impl Default for AudioTransform {
    fn default() -> Self {
        Self { volume: 1.0, is_still: false }
    }
}

impl MulAssign<&AudioTransform> for AudioTransform {
    fn mul_assign(&mut self, other: &AudioTransform) {
        self.volume *= other.volume;
        self.is_still |= other.is_still;
    }
}

impl Mul for AudioTransform {
    type Output = AudioTransform;

    fn mul(mut self, other: AudioTransform) -> AudioTransform {
        self *= &other;
        self
    }
}

impl AudioTransform {
    pub fn tween(
        time: f64,
        source: &AudioTransform,
        dest: &AudioTransform,
        duration: f64,
        tweener: &Tweener,
    ) -> AudioTransform {
        AudioTransform {
            volume:   tweener.tween(time, source.volume, dest.volume - source.volume, duration),
            is_still: source.is_still | dest.is_still,
        }
    }
}

impl PartialEq for AudioTransform {
    fn eq(&self, other: &Self) -> bool {
        eq(self.volume, other.volume) && self.is_still == other.is_still
    }
}

// ── Side-data transform ───────────────────────────────────────────────────────

/// Side-data routing flags. `use_closed_captions` combines with AND: captions
/// survive only when every level of the tree keeps them enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SideDataTransform {
    pub use_closed_captions: bool,
}

impl Default for SideDataTransform {
    fn default() -> Self {
        Self { use_closed_captions: true }
    }
}

impl MulAssign<&SideDataTransform> for SideDataTransform {
    fn mul_assign(&mut self, other: &SideDataTransform) {
        self.use_closed_captions &= other.use_closed_captions;
    }
}

impl Mul for SideDataTransform {
    type Output = SideDataTransform;

    fn mul(mut self, other: SideDataTransform) -> SideDataTransform {
        self *= &other;
        self
    }
}

// ── Frame transform ───────────────────────────────────────────────────────────

/// Product of the image, audio and side-data transforms.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameTransform {
    pub image:     ImageTransform,
    pub audio:     AudioTransform,
    pub side_data: SideDataTransform,
}

impl MulAssign<&FrameTransform> for FrameTransform {
    fn mul_assign(&mut self, other: &FrameTransform) {
        self.image *= &other.image;
        self.audio *= &other.audio;
        self.side_data *= &other.side_data;
    }
}

impl Mul for FrameTransform {
    type Output = FrameTransform;

    fn mul(mut self, other: FrameTransform) -> FrameTransform {
        self *= &other;
        self
    }
}

impl FrameTransform {
    pub fn tween(
        time: f64,
        source: &FrameTransform,
        dest: &FrameTransform,
        duration: f64,
        tweener: &Tweener,
    ) -> FrameTransform {
        FrameTransform {
            image:     ImageTransform::tween(time, &source.image, &dest.image, duration, tweener),
            audio:     AudioTransform::tween(time, &source.audio, &dest.audio, duration, tweener),
            side_data: source.side_data * dest.side_data,
        }
    }
}

// ── Tweened transform ─────────────────────────────────────────────────────────

/// A transform animating from `source` to `dest` over `duration` ticks.
#[derive(Clone, Debug)]
pub struct TweenedTransform {
    source:   FrameTransform,
    dest:     FrameTransform,
    duration: i32,
    time:     i32,
    tweener:  Tweener,
}

impl Default for TweenedTransform {
    fn default() -> Self {
        Self {
            source:   FrameTransform::default(),
            dest:     FrameTransform::default(),
            duration: 0,
            time:     0,
            tweener:  Tweener::linear(),
        }
    }
}

impl TweenedTransform {
    pub fn new(source: FrameTransform, dest: FrameTransform, duration: i32, tweener: Tweener) -> Self {
        Self { source, dest, duration, time: 0, tweener }
    }

    pub fn fetch(&self) -> FrameTransform {
        if self.time == self.duration {
            self.dest
        } else {
            FrameTransform::tween(
                self.time as f64,
                &self.source,
                &self.dest,
                self.duration as f64,
                &self.tweener,
            )
        }
    }

    pub fn fetch_and_tick(&mut self, num: i32) -> FrameTransform {
        self.time = (self.time + num).min(self.duration);
        self.fetch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_multiplicative_neutral() {
        let mut t = ImageTransform::default();
        t.opacity = 0.5;
        t.fill_translation = [0.25, -0.5];
        t.fill_scale = [2.0, 0.5];
        t.is_key = true;

        let frame = FrameTransform { image: t, ..Default::default() };
        assert_eq!(frame * FrameTransform::default(), frame);
        assert_eq!(FrameTransform::default() * frame, frame);
    }

    #[test]
    fn composition_is_associative() {
        let mk = |op: f64, tx: f64, sx: f64| {
            let mut t = FrameTransform::default();
            t.image.opacity = op;
            t.image.fill_translation = [tx, tx / 2.0];
            t.image.fill_scale = [sx, sx];
            t.audio.volume = op;
            t
        };
        let a = mk(0.9, 0.1, 2.0);
        let b = mk(0.5, -0.3, 0.5);
        let c = mk(0.7, 0.2, 1.5);

        assert_eq!((a * b) * c, a * (b * c));
    }

    #[test]
    fn translation_composes_through_parent_scale() {
        let mut a = ImageTransform::default();
        a.opacity = 0.5;
        a.fill_scale = [2.0, 2.0];
        a.fill_translation = [10.0, 0.0];
        let mut b = ImageTransform::default();
        b.opacity = 0.5;
        b.fill_translation = [5.0, 0.0];

        let ab = a * b;
        assert!(eq(ab.opacity, 0.25));
        assert!(eq(ab.fill_translation[0], 20.0));
        assert!(eq(ab.fill_translation[1], 0.0));
        assert!(eq(ab.fill_scale[0], 2.0));
        assert!(eq(ab.fill_scale[1], 2.0));
    }

    #[test]
    fn levels_intersect() {
        let mut a = ImageTransform::default();
        a.levels.min_input = 0.1;
        a.levels.max_input = 0.9;
        let mut b = ImageTransform::default();
        b.levels.min_input = 0.2;
        b.levels.max_input = 0.8;

        let ab = a * b;
        assert!(eq(ab.levels.min_input, 0.2));
        assert!(eq(ab.levels.max_input, 0.8));
    }

    #[test]
    fn field_mode_combines_by_mask_intersection() {
        assert_eq!(FieldMode::Upper.and(FieldMode::Progressive), FieldMode::Upper);
        assert_eq!(FieldMode::Upper.and(FieldMode::Lower), FieldMode::Empty);
        assert_eq!(FieldMode::Progressive.and(FieldMode::Progressive), FieldMode::Progressive);
    }

    #[test]
    fn tween_midpoint_of_scenario_one() {
        let mut a = ImageTransform::default();
        a.opacity = 0.5;
        a.fill_scale = [2.0, 2.0];
        a.fill_translation = [10.0, 0.0];
        let mut b = ImageTransform::default();
        b.opacity = 0.5;
        b.fill_translation = [5.0, 0.0];

        let mid = ImageTransform::tween(5.0, &a, &b, 10.0, &Tweener::linear());
        assert!(eq(mid.opacity, 0.5));
        assert!(eq(mid.fill_translation[0], 7.5));
    }

    #[test]
    fn side_data_flag_combines_with_and() {
        let on = SideDataTransform { use_closed_captions: true };
        let off = SideDataTransform { use_closed_captions: false };
        assert!(!(on * off).use_closed_captions);
        assert!((on * on).use_closed_captions);
    }

    #[test]
    fn tweened_transform_reaches_destination() {
        let mut dest = FrameTransform::default();
        dest.image.opacity = 0.0;
        let mut tt = TweenedTransform::new(FrameTransform::default(), dest, 4, Tweener::linear());

        assert!(eq(tt.fetch_and_tick(1).image.opacity, 0.75));
        assert!(eq(tt.fetch_and_tick(1).image.opacity, 0.5));
        tt.fetch_and_tick(2);
        assert_eq!(tt.fetch(), dest);
        // Over-ticking clamps at the destination.
        assert_eq!(tt.fetch_and_tick(5), dest);
    }
}
