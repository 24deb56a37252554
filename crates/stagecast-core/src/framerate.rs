// crates/stagecast-core/src/framerate.rs
//
// Framerate adaptation. Wraps a source producer and emits frames at the
// destination rate: exact multiples drop or repeat frames, everything else
// goes through a frame interpolator. Audio keeps the destination cadence as
// long as the user speed is exactly 1; slow/fast motion mutes audio rather
// than time-stretching it.

use num_rational::{Rational32, Rational64};
use num_traits::Signed;
use uuid::Uuid;

use crate::error::CoreError;
use crate::frame::draw_frame::{DrawFrame, FrameVisitor};
use crate::frame::frame::{ConstFrame, MutableFrame};
use crate::frame::transform::{AudioTransform, FieldMode, FrameTransform};
use crate::producer::{Constraints, Producer};
use crate::registry::AudioChannelLayout;
use crate::tween::Tweener;

fn ratio_to_f64(value: Rational64) -> f64 {
    *value.numer() as f64 / *value.denom() as f64
}

fn widen(value: Rational32) -> Rational64 {
    Rational64::new(*value.numer() as i64, *value.denom() as i64)
}

// ── Interpolators ─────────────────────────────────────────────────────────────

/// Two-frame blend: sharp when the distance is 0, blurry in between.
fn blend(source: &DrawFrame, destination: &DrawFrame, distance: Rational64) -> DrawFrame {
    if destination.is_empty() {
        return source.clone();
    }

    let float_distance = ratio_to_f64(distance);

    let mut under = source.clone();
    under.transform_mut().image.is_mix = true;
    under.transform_mut().image.opacity = 1.0 - float_distance;

    let mut over = destination.clone();
    over.transform_mut().image.is_mix = true;
    over.transform_mut().image.opacity = float_distance;

    DrawFrame::over(&under, &over)
}

/// Three-frame moving window, one frame-duration wide:
/// * distance 0.0  → 50% previous, 50% current, 0% next
/// * distance 0.5  → 25% previous, 50% current, 25% next
/// * distance 0.75 → 12.5% previous, 50% current, 37.5% next
/// Blurrier than `blend` but evenly so, instead of sharp-blurry-sharp.
#[derive(Default)]
struct BlendAll {
    previous_frame:   DrawFrame,
    last_source:      DrawFrame,
    last_destination: DrawFrame,
}

impl BlendAll {
    fn new() -> Self {
        Self {
            previous_frame:   DrawFrame::empty(),
            last_source:      DrawFrame::empty(),
            last_destination: DrawFrame::empty(),
        }
    }

    fn interpolate(
        &mut self,
        source: &DrawFrame,
        destination: &DrawFrame,
        distance: Rational64,
    ) -> DrawFrame {
        if !self.last_source.is_empty() && self.last_source != *source {
            if self.last_destination == *source {
                self.previous_frame = self.last_source.clone();
            } else {
                // A two frame jump.
                self.previous_frame = self.last_destination.clone();
            }
        }

        self.last_source = source.clone();
        self.last_destination = destination.clone();

        if self.previous_frame.is_empty() {
            return blend(source, destination, distance);
        }

        let float_distance = ratio_to_f64(distance);
        let previous_opacity = (0.5 - float_distance * 0.5).max(0.0);

        let mut previous = self.previous_frame.clone();
        previous.transform_mut().image.is_mix = true;
        previous.transform_mut().image.opacity = previous_opacity;

        let mut middle = self.last_source.clone();
        middle.transform_mut().image.is_mix = true;
        middle.transform_mut().image.opacity = 0.5;

        let mut next = destination.clone();
        next.transform_mut().image.is_mix = true;
        next.transform_mut().image.opacity = 1.0 - previous_opacity - 0.5;

        DrawFrame::from_frames(vec![previous, middle, next])
    }
}

enum Interpolator {
    DropAndSkip,
    Blend,
    BlendAll(BlendAll),
}

impl Interpolator {
    fn interpolate(
        &mut self,
        source: &DrawFrame,
        destination: &DrawFrame,
        distance: Rational64,
    ) -> DrawFrame {
        match self {
            Interpolator::DropAndSkip => source.clone(),
            Interpolator::Blend => blend(source, destination, distance),
            Interpolator::BlendAll(state) => state.interpolate(source, destination, distance),
        }
    }
}

// ── Audio extraction ──────────────────────────────────────────────────────────

/// Visitor that collects audible leaves. Leaves under an `is_still` audio
/// transform are repeats of already-played content and are skipped.
pub struct AudioExtractor<F: FnMut(&ConstFrame)> {
    transform_stack: Vec<AudioTransform>,
    on_frame:        F,
}

impl<F: FnMut(&ConstFrame)> AudioExtractor<F> {
    pub fn new(on_frame: F) -> Self {
        Self { transform_stack: vec![AudioTransform::default()], on_frame }
    }
}

impl<F: FnMut(&ConstFrame)> FrameVisitor for AudioExtractor<F> {
    fn push(&mut self, transform: &FrameTransform) {
        let top = *self.transform_stack.last().unwrap();
        self.transform_stack.push(top * transform.audio);
    }

    fn visit(&mut self, frame: &ConstFrame) {
        if !frame.audio_data().is_empty() && !self.transform_stack.last().unwrap().is_still {
            (self.on_frame)(frame);
        }
    }

    fn pop(&mut self) {
        self.transform_stack.pop();
    }
}

// ── Speed tweener ─────────────────────────────────────────────────────────────

/// Like a tweened transform, but for playback speed ratios.
struct SpeedTweener {
    source:   Rational64,
    dest:     Rational64,
    duration: i32,
    time:     i32,
    tweener:  Tweener,
}

impl Default for SpeedTweener {
    fn default() -> Self {
        Self {
            source:   Rational64::from_integer(1),
            dest:     Rational64::from_integer(1),
            duration: 0,
            time:     0,
            tweener:  Tweener::linear(),
        }
    }
}

impl SpeedTweener {
    fn new(source: Rational64, dest: Rational64, duration: i32, tweener: Tweener) -> Self {
        Self { source, dest, duration, time: 0, tweener }
    }

    fn dest(&self) -> Rational64 {
        self.dest
    }

    fn fetch(&self) -> Rational64 {
        if self.time == self.duration {
            return self.dest;
        }
        let source = ratio_to_f64(self.source);
        let delta = ratio_to_f64(self.dest) - source;
        let result = self
            .tweener
            .tween(self.time as f64, source, delta, self.duration as f64);
        Rational64::new((result * 1_000_000.0) as i64, 1_000_000)
    }

    fn fetch_and_tick(&mut self) -> Rational64 {
        self.time = (self.time + 1).min(self.duration);
        self.fetch()
    }
}

// ── Framerate producer ────────────────────────────────────────────────────────

/// Register the `FRAMERATE` call surface with a help sink.
pub fn describe_framerate_producer(sink: &mut dyn crate::registry::HelpSink) {
    sink.text("Framerate conversion control / slow motion:");
    sink.example(
        "CALL 1-10 FRAMERATE INTERPOLATION BLEND",
        "enables 2 frame blend interpolation.",
    );
    sink.example(
        "CALL 1-10 FRAMERATE INTERPOLATION BLEND_ALL",
        "enables 3 frame blend interpolation.",
    );
    sink.example(
        "CALL 1-10 FRAMERATE INTERPOLATION DROP_AND_SKIP",
        "disables frame interpolation.",
    );
    sink.example(
        "CALL 1-10 FRAMERATE SPEED 0.25",
        "immediately changes the speed to 25%. Sound will be disabled.",
    );
    sink.example(
        "CALL 1-10 FRAMERATE SPEED 0.25 50",
        "changes the speed to 25% linearly over 50 frames. Sound will be disabled.",
    );
    sink.example(
        "CALL 1-10 FRAMERATE SPEED 1 50",
        "changes the speed back to 100% linearly over 50 frames. Sound is enabled once 100% is reached.",
    );
}

pub struct FramerateProducer {
    source:                Box<dyn Producer>,
    source_framerate:      Rational32,
    destination_framerate: Rational32,
    destination_fieldmode: FieldMode,
    destination_audio_cadence: Vec<usize>,
    speed:                 Rational64,
    user_speed:            SpeedTweener,
    interpolator:          Interpolator,
    current_frame_number:  Rational64,
    previous_frame:        DrawFrame,
    next_frame:            DrawFrame,
    audio_samples:         Vec<i32>,
    source_channel_layout: Option<AudioChannelLayout>,
    output_repeat:         u32,
    output_frame:          u32,
    last_frame:            DrawFrame,
    tag:                   Uuid,
}

impl FramerateProducer {
    pub fn new(
        source: Box<dyn Producer>,
        source_framerate: Rational32,
        mut destination_framerate: Rational32,
        mut destination_fieldmode: FieldMode,
        mut destination_audio_cadence: Vec<usize>,
    ) -> Self {
        let mut output_repeat = 0;

        // Coarse adjustment to the correct fps family (23.98–30 vs 47.95–60).
        if destination_fieldmode != FieldMode::Progressive {
            let diff_double = (source_framerate - destination_framerate * 2).abs();
            let diff_keep = (source_framerate - destination_framerate).abs();

            if diff_double < diff_keep {
                // Double rate interlaced.
                destination_framerate *= 2;
            } else {
                // Progressive non interlaced.
                destination_fieldmode = FieldMode::Progressive;
            }
        } else {
            let diff_halve = (source_framerate * 2 - destination_framerate).abs();
            let diff_keep = (source_framerate - destination_framerate).abs();

            if diff_halve < diff_keep {
                // Repeat every frame two times.
                destination_framerate /= 2;
                output_repeat = 2;
            }
        }

        let speed = widen(source_framerate / destination_framerate);

        // drop_and_skip covers exact framerate multiples (half, same, double);
        // anything else needs a frame interpolator.
        let mut interpolator = Interpolator::DropAndSkip;
        if speed != Rational64::from_integer(1)
            && speed * 2 != Rational64::from_integer(1)
            && speed != Rational64::from_integer(2)
        {
            let high_source_framerate = source_framerate > Rational32::from_integer(47);
            let high_destination_framerate = destination_framerate > Rational32::from_integer(47)
                || destination_fieldmode != FieldMode::Progressive;

            // blend_all's bluriness is acceptable on high framerates; on low
            // framerates blend is the better compromise.
            interpolator = if high_source_framerate && high_destination_framerate {
                Interpolator::BlendAll(BlendAll::new())
            } else {
                Interpolator::Blend
            };

            log::warn!(
                "[framerate] {} frame blending framerate conversion required to conform to channel framerate",
                source.print()
            );
        }

        // 1-step rotated cadence for 1001 modes (1602, 1602, 1601, 1602, 1601)
        // fills the audio mixer most optimally.
        destination_audio_cadence.rotate_right(1);

        Self {
            source,
            source_framerate,
            destination_framerate,
            destination_fieldmode,
            destination_audio_cadence,
            speed,
            user_speed: SpeedTweener::default(),
            interpolator,
            current_frame_number: Rational64::from_integer(0),
            previous_frame: DrawFrame::empty(),
            next_frame: DrawFrame::empty(),
            audio_samples: Vec::new(),
            source_channel_layout: None,
            output_repeat,
            output_frame: 0,
            last_frame: DrawFrame::empty(),
            tag: Uuid::new_v4(),
        }
    }

    pub fn destination_framerate(&self) -> Rational32 {
        self.destination_framerate
    }

    pub fn destination_fieldmode(&self) -> FieldMode {
        self.destination_fieldmode
    }

    fn get_speed(&self) -> Rational64 {
        self.speed * self.user_speed.fetch()
    }

    fn do_render_progressive_frame(&mut self, sound: bool) -> DrawFrame {
        self.user_speed.fetch_and_tick();

        if self.output_repeat != 0 {
            let output_frame = self.output_frame;
            self.output_frame += 1;
            if output_frame % self.output_repeat != 0 {
                let mut frame = DrawFrame::still(&self.last_frame);
                frame.transform_mut().audio.volume = 0.0;
                return self.attach_sound(frame);
            }
        }

        if self.previous_frame.is_empty() {
            self.previous_frame = self.pop_frame_from_source();
        }

        let current_frame_number = self.current_frame_number;
        let distance = current_frame_number.fract();
        let needs_next = distance > Rational64::from_integer(0) || !self.enough_sound();

        if needs_next && self.next_frame.is_empty() {
            self.next_frame = self.pop_frame_from_source();
        }

        let previous = self.previous_frame.clone();
        let next = self.next_frame.clone();
        let result = self.interpolator.interpolate(&previous, &next, distance);

        let speed = self.get_speed();
        self.current_frame_number += speed;
        let integer_current = current_frame_number.to_integer();
        let integer_next = self.current_frame_number.to_integer();

        self.fast_forward_integer_frames(integer_next - integer_current);

        if sound {
            self.attach_sound(result)
        } else {
            result
        }
    }

    fn fast_forward_integer_frames(&mut self, num_frames: i64) {
        for _ in 0..num_frames {
            if self.next_frame.is_empty() {
                self.previous_frame = self.pop_frame_from_source();
            } else {
                self.previous_frame = std::mem::replace(&mut self.next_frame, DrawFrame::empty());
                self.next_frame = self.pop_frame_from_source();
            }
        }
    }

    fn pop_frame_from_source(&mut self) -> DrawFrame {
        let nb_samples = self.destination_audio_cadence[0];
        let mut frame = self.source.receive(nb_samples);

        if self.user_speed.fetch() == Rational64::from_integer(1) {
            let mut audio_frames = Vec::new();
            {
                let mut extractor =
                    AudioExtractor::new(|audible: &ConstFrame| audio_frames.push(audible.clone()));
                frame.accept(&mut extractor);
            }

            for audible in audio_frames {
                let layout = audible.audio_channel_layout().cloned();
                if layout != self.source_channel_layout {
                    self.source_channel_layout = layout;

                    if let Some(layout) = &self.source_channel_layout {
                        // Pre-roll silence equal to the cadence safety margin
                        // so the audio mixer is guaranteed to stay filled
                        // across the layout switch.
                        let min = *self.destination_audio_cadence.iter().min().unwrap();
                        let max = *self.destination_audio_cadence.iter().max().unwrap();
                        let safety_samples = max - min;
                        self.audio_samples
                            .resize(layout.num_channels * safety_samples, 0);
                    }
                }
                self.audio_samples.extend_from_slice(audible.audio_data());
            }
        } else {
            self.source_channel_layout = None;
            self.audio_samples.clear();
        }

        frame.transform_mut().audio.volume = 0.0;
        frame
    }

    fn attach_sound(&mut self, frame: DrawFrame) -> DrawFrame {
        if self.user_speed.fetch() != Rational64::from_integer(1) {
            return frame;
        }
        let Some(layout) = self.source_channel_layout.clone() else {
            return frame;
        };

        let needed = self.destination_audio_cadence[0] * layout.num_channels;

        let buffer: Vec<i32> = if self.audio_samples.len() == needed {
            std::mem::take(&mut self.audio_samples)
        } else if self.audio_samples.len() >= needed {
            self.audio_samples.drain(..needed).collect()
        } else {
            let got = self.audio_samples.len() / layout.num_channels;
            if got != 0 {
                // At end of stream the shortfall is expected.
                log::debug!(
                    "[framerate] {} too few audio samples, needed {} but got {got}",
                    self.source.print(),
                    self.destination_audio_cadence[0]
                );
            }
            let mut buffer = std::mem::take(&mut self.audio_samples);
            buffer.resize(needed, 0);
            buffer
        };

        self.destination_audio_cadence.rotate_left(1);

        let audio_frame = MutableFrame::audio_only(self.tag, buffer, layout).seal();
        DrawFrame::over(&frame, &DrawFrame::from_frame(audio_frame))
    }

    fn enough_sound(&self) -> bool {
        let Some(layout) = &self.source_channel_layout else {
            return true;
        };
        if self.user_speed.fetch() != Rational64::from_integer(1) {
            return true;
        }
        self.audio_samples.len() / layout.num_channels >= self.destination_audio_cadence[0]
    }
}

impl Producer for FramerateProducer {
    fn receive(&mut self, _nb_samples: usize) -> DrawFrame {
        let frame = if self.destination_fieldmode == FieldMode::Progressive {
            self.do_render_progressive_frame(true)
        } else {
            let field1 = self.do_render_progressive_frame(true);
            let field2 = self.do_render_progressive_frame(false);
            DrawFrame::interlace(&field1, &field2, self.destination_fieldmode)
        };

        if !frame.is_empty() {
            self.last_frame = frame.clone();
        }
        frame
    }

    fn last_frame(&mut self) -> DrawFrame {
        DrawFrame::still(&self.last_frame)
    }

    /// `FRAMERATE SPEED v [frames] [easing]`, `FRAMERATE INTERPOLATION
    /// blend|blend_all|drop_and_skip`, `FRAMERATE OUTPUT_REPEAT n` (debug
    /// override: repeated fields stay silent and the audio cadence is not
    /// re-synchronized). Anything else is forwarded to the source.
    fn call(&mut self, params: &[String]) -> Result<String, CoreError> {
        if params.is_empty() || !params[0].eq_ignore_ascii_case("framerate") {
            return self.source.call(params);
        }

        let sub = params
            .get(1)
            .ok_or_else(|| CoreError::User("missing FRAMERATE sub command".into()))?;

        if sub.eq_ignore_ascii_case("speed") {
            let value: f64 = params
                .get(2)
                .ok_or_else(|| CoreError::User("missing speed value".into()))?
                .parse()
                .map_err(|_| CoreError::User("speed must be a number".into()))?;
            let destination_user_speed = Rational64::new((value * 1_000_000.0) as i64, 1_000_000);
            let frames: i32 = match params.get(3) {
                Some(frames) => frames
                    .parse()
                    .map_err(|_| CoreError::User("speed duration must be an integer".into()))?,
                None => 0,
            };
            let easing = params.get(4).map(String::as_str).unwrap_or("linear");

            self.user_speed = SpeedTweener::new(
                self.user_speed.fetch(),
                destination_user_speed,
                frames,
                Tweener::from_name(easing)?,
            );
        } else if sub.eq_ignore_ascii_case("interpolation") {
            let kind = params
                .get(2)
                .ok_or_else(|| CoreError::User("missing interpolation kind".into()))?;
            self.interpolator = if kind.eq_ignore_ascii_case("blend") {
                Interpolator::Blend
            } else if kind.eq_ignore_ascii_case("blend_all") {
                Interpolator::BlendAll(BlendAll::new())
            } else {
                Interpolator::DropAndSkip
            };
        } else if sub.eq_ignore_ascii_case("output_repeat") {
            self.output_repeat = params
                .get(2)
                .ok_or_else(|| CoreError::User("missing output repeat count".into()))?
                .parse()
                .map_err(|_| CoreError::User("output repeat must be an integer".into()))?;
        }

        Ok(String::new())
    }

    fn nb_frames(&self) -> u32 {
        let source_nb_frames = self.source.nb_frames();
        if source_nb_frames == u32::MAX {
            return u32::MAX;
        }
        let speed = self.get_speed();
        if speed == Rational64::from_integer(0) {
            return source_nb_frames;
        }
        let multiple =
            1.0 / ratio_to_f64(speed) * if self.output_repeat != 0 { 2.0 } else { 1.0 };
        (source_nb_frames as f64 * multiple) as u32
    }

    fn frame_number(&self) -> u32 {
        // The next source frame is already buffered.
        let source_frame_number = self.source.frame_number().saturating_sub(1);
        let speed = self.get_speed();
        if speed == Rational64::from_integer(0) {
            return source_frame_number;
        }
        let multiple =
            1.0 / ratio_to_f64(speed) * if self.output_repeat != 0 { 2.0 } else { 1.0 };
        (source_frame_number as f64 * multiple) as u32
    }

    fn pixel_constraints(&self) -> &Constraints {
        self.source.pixel_constraints()
    }

    fn name(&self) -> &str {
        self.source.name()
    }

    fn print(&self) -> String {
        self.source.print()
    }

    fn state(&self) -> serde_json::Value {
        self.source.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::draw_frame::flatten;

    struct SequenceProducer {
        constraints: Constraints,
        frames:      Vec<DrawFrame>,
        index:       usize,
    }

    impl SequenceProducer {
        fn new(frames: Vec<DrawFrame>) -> Self {
            Self { constraints: Constraints::new(1920.0, 1080.0), frames, index: 0 }
        }
    }

    impl Producer for SequenceProducer {
        fn receive(&mut self, _nb_samples: usize) -> DrawFrame {
            let frame = self.frames[self.index % self.frames.len()].clone();
            self.index += 1;
            frame
        }

        fn nb_frames(&self) -> u32 {
            self.frames.len() as u32
        }

        fn frame_number(&self) -> u32 {
            self.index as u32
        }

        fn pixel_constraints(&self) -> &Constraints {
            &self.constraints
        }

        fn name(&self) -> &str {
            "sequence"
        }
    }

    const CHANNELS: usize = 2;

    fn stereo_layout() -> AudioChannelLayout {
        AudioChannelLayout::new(CHANNELS, "STEREO", "L R").unwrap()
    }

    fn source_frame(samples_per_channel: usize) -> DrawFrame {
        let frame = MutableFrame::audio_only(
            Uuid::new_v4(),
            vec![0i32; samples_per_channel * CHANNELS],
            stereo_layout(),
        )
        .seal();
        DrawFrame::from_frame(frame)
    }

    fn source_frames(count: usize, samples_per_channel: usize) -> Vec<DrawFrame> {
        (0..count).map(|_| source_frame(samples_per_channel)).collect()
    }

    fn leaf_tags(frame: &DrawFrame) -> Vec<Uuid> {
        flatten(frame).iter().map(|(leaf, _)| leaf.tag()).collect()
    }

    fn audio_leaf_samples(frame: &DrawFrame, adapter_tag: Uuid) -> Option<usize> {
        flatten(frame)
            .iter()
            .find(|(leaf, _)| leaf.tag() == adapter_tag)
            .map(|(leaf, _)| leaf.audio_data().len())
    }

    #[test]
    fn same_rate_progressive_passes_frames_through() {
        let _ = env_logger::builder().is_test(true).try_init();

        let frames = source_frames(8, 1920);
        let expected: Vec<Uuid> = frames.iter().map(|f| leaf_tags(f)[0]).collect();
        let mut adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(25, 1),
            Rational32::new(25, 1),
            FieldMode::Progressive,
            vec![1920],
        );

        for expected_tag in expected.iter().take(6) {
            let output = adapter.receive(1920);
            let tags = leaf_tags(&output);
            assert_eq!(tags[0], *expected_tag);
        }
    }

    #[test]
    fn downrate_with_drop_and_skip_picks_every_second_frame() {
        let frames = source_frames(16, 960);
        let expected: Vec<Uuid> = frames.iter().map(|f| leaf_tags(f)[0]).collect();
        let mut adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(50, 1),
            Rational32::new(25, 1),
            FieldMode::Progressive,
            vec![1920],
        );
        let adapter_tag = adapter.tag;

        for k in 0..5 {
            let output = adapter.receive(1920);
            assert_eq!(leaf_tags(&output)[0], expected[2 * k]);
            // Audio is carried: one full destination cadence entry per frame.
            assert_eq!(
                audio_leaf_samples(&output, adapter_tag),
                Some(1920 * CHANNELS)
            );
        }
    }

    #[test]
    fn ntsc_cadence_rotates_one_step_per_output_frame() {
        let frames = source_frames(16, 1602);
        let mut adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(30000, 1001),
            Rational32::new(30000, 1001),
            FieldMode::Progressive,
            vec![1602, 1601, 1602, 1601, 1602],
        );
        let adapter_tag = adapter.tag;

        let mut produced = Vec::new();
        for _ in 0..5 {
            let output = adapter.receive(1602);
            produced.push(audio_leaf_samples(&output, adapter_tag).unwrap() / CHANNELS);
        }
        // The constructor rotates the cadence one step back.
        assert_eq!(produced, vec![1602, 1602, 1601, 1602, 1601]);
        assert_eq!(produced.iter().sum::<usize>(), 8008);
    }

    #[test]
    fn layout_change_inserts_cadence_safety_silence() {
        // 4 stereo frames, then frames with a different layout.
        let mut frames = source_frames(2, 1602);
        let other_layout = AudioChannelLayout::new(1, "MONO", "C").unwrap();
        for _ in 0..14 {
            let frame = MutableFrame::audio_only(
                Uuid::new_v4(),
                vec![0i32; 1602],
                other_layout.clone(),
            )
            .seal();
            frames.push(DrawFrame::from_frame(frame));
        }

        let mut adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(30000, 1001),
            Rational32::new(30000, 1001),
            FieldMode::Progressive,
            vec![1602, 1601, 1602, 1601, 1602],
        );

        adapter.receive(1602);
        adapter.receive(1602);
        // The mono frames have arrived by now: the buffer was reset to the
        // safety margin (max - min = 1 sample) in the new layout's width.
        adapter.receive(1602);
        assert_eq!(
            adapter.source_channel_layout.as_ref().unwrap().num_channels,
            1
        );
    }

    #[test]
    fn non_unit_user_speed_silences_audio() {
        let frames = source_frames(16, 1920);
        let mut adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(25, 1),
            Rational32::new(25, 1),
            FieldMode::Progressive,
            vec![1920],
        );
        let adapter_tag = adapter.tag;

        adapter
            .call(&["FRAMERATE".into(), "SPEED".into(), "0.5".into()])
            .unwrap();

        let output = adapter.receive(1920);
        assert_eq!(audio_leaf_samples(&output, adapter_tag), None);
        // The source's own audio leaf is muted by transform.
        let leaves = flatten(&output);
        assert!(leaves.iter().all(|(_, t)| t.audio.volume == 0.0));
    }

    #[test]
    fn speed_tween_ramps_over_requested_frames() {
        let frames = source_frames(64, 1920);
        let mut adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(25, 1),
            Rational32::new(25, 1),
            FieldMode::Progressive,
            vec![1920],
        );

        adapter
            .call(&[
                "FRAMERATE".into(),
                "SPEED".into(),
                "2".into(),
                "10".into(),
                "linear".into(),
            ])
            .unwrap();

        assert_eq!(adapter.user_speed.dest(), Rational64::from_integer(2));
        adapter.receive(1920);
        let early = adapter.user_speed.fetch();
        assert!(early > Rational64::from_integer(0) && early < Rational64::from_integer(2));

        for _ in 0..10 {
            adapter.receive(1920);
        }
        assert_eq!(adapter.user_speed.fetch(), Rational64::from_integer(2));
    }

    #[test]
    fn interlaced_destination_prefers_double_rate_when_closer() {
        // (Sf, Df) = (60, 29.97): |60 - 59.94| < |60 - 29.97| → double rate.
        let frames = source_frames(32, 800);
        let mut adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(60, 1),
            Rational32::new(30000, 1001),
            FieldMode::Upper,
            vec![1602, 1601, 1602, 1601, 1602],
        );

        assert_eq!(adapter.destination_fieldmode(), FieldMode::Upper);
        assert_eq!(adapter.destination_framerate(), Rational32::new(60000, 1001));

        let output = adapter.receive(1602);
        let leaves = flatten(&output);
        assert!(leaves.iter().any(|(_, t)| t.image.field_mode == FieldMode::Upper));
        assert!(leaves.iter().any(|(_, t)| t.image.field_mode == FieldMode::Lower));
    }

    #[test]
    fn interlaced_destination_falls_back_to_progressive_when_closer() {
        // (Sf, Df) = (25, 29.97): keeping the rate is closer than doubling,
        // so the output is forced progressive.
        let frames = source_frames(32, 1920);
        let adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(25, 1),
            Rational32::new(30000, 1001),
            FieldMode::Upper,
            vec![1602, 1601, 1602, 1601, 1602],
        );

        assert_eq!(adapter.destination_fieldmode(), FieldMode::Progressive);
    }

    #[test]
    fn progressive_destination_halves_and_repeats_when_closer() {
        // (Sf, Df) = (25, 50) progressive: halving the destination wins and
        // every output frame is shown twice.
        let frames = source_frames(32, 1920);
        let mut adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(25, 1),
            Rational32::new(50, 1),
            FieldMode::Progressive,
            vec![960],
        );

        assert_eq!(adapter.destination_framerate(), Rational32::new(25, 1));
        assert_eq!(adapter.output_repeat, 2);

        let adapter_tag = adapter.tag;
        let first = adapter.receive(960);
        assert!(!first.is_empty());
        let repeat = adapter.receive(960);
        // The repeated frame is a silent still of the previous output; the
        // cadence keeps feeding the mixer alongside it.
        let leaves = flatten(&repeat);
        assert!(leaves
            .iter()
            .filter(|(leaf, _)| leaf.tag() != adapter_tag)
            .all(|(_, t)| t.image.is_still && t.audio.volume == 0.0));
        assert_eq!(audio_leaf_samples(&repeat, adapter_tag), Some(960 * CHANNELS));

        // nb_frames is rescaled by the repeat factor.
        assert_eq!(adapter.nb_frames(), 64);
    }

    #[test]
    fn non_integer_ratio_selects_an_interpolator() {
        let frames = source_frames(32, 1920);
        let adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(30000, 1001),
            Rational32::new(25, 1),
            FieldMode::Progressive,
            vec![1920],
        );
        assert!(matches!(adapter.interpolator, Interpolator::Blend));
    }

    #[test]
    fn blend_weights_follow_distance() {
        let a = source_frame(0);
        let b = source_frame(0);
        let mixed = blend(&a, &b, Rational64::new(1, 4));
        let leaves = flatten(&mixed);
        assert_eq!(leaves.len(), 2);
        assert!((leaves[0].1.image.opacity - 0.75).abs() < 1e-9);
        assert!((leaves[1].1.image.opacity - 0.25).abs() < 1e-9);
        assert!(leaves.iter().all(|(_, t)| t.image.is_mix));
    }

    #[test]
    fn blend_all_needs_history_before_widening_the_window() {
        let mut state = BlendAll::new();
        let a = source_frame(0);
        let b = source_frame(0);
        let c = source_frame(0);

        // No previous frame yet: falls back to two-frame blend.
        let first = state.interpolate(&a, &b, Rational64::new(1, 2));
        assert_eq!(flatten(&first).len(), 2);

        // Source advanced: the previous source joins the window.
        let second = state.interpolate(&b, &c, Rational64::new(1, 2));
        let leaves = flatten(&second);
        assert_eq!(leaves.len(), 3);
        assert!((leaves[0].1.image.opacity - 0.25).abs() < 1e-9);
        assert!((leaves[1].1.image.opacity - 0.5).abs() < 1e-9);
        assert!((leaves[2].1.image.opacity - 0.25).abs() < 1e-9);
    }

    #[test]
    fn unrelated_calls_are_forwarded_to_the_source() {
        let frames = source_frames(4, 1920);
        let mut adapter = FramerateProducer::new(
            Box::new(SequenceProducer::new(frames)),
            Rational32::new(25, 1),
            Rational32::new(25, 1),
            FieldMode::Progressive,
            vec![1920],
        );
        // SequenceProducer has no call support.
        assert!(adapter.call(&["OTHER".into()]).is_err());
    }
}
