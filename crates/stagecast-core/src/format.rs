// crates/stagecast-core/src/format.rs
//
// Wire-stable video format descriptors. `time_scale / duration` is the output
// tick rate (fields for interlaced formats), `framerate` the frame rate as a
// rational. The audio cadence lists samples per frame; for 1001-family rates
// the per-frame counts differ, but every full pattern sums to exactly one
// pattern's worth of 48 kHz samples.

use num_rational::Rational32;

use crate::frame::transform::FieldMode;

/// Which field of an interlaced frame a consumer is asking for. Progressive
/// callers always ask for `A`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoField {
    A,
    B,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum VideoFormat {
    Pal,
    Ntsc,
    X576p2500,
    X720p2398,
    X720p2400,
    X720p2500,
    X720p2997,
    X720p3000,
    X720p5000,
    X720p5994,
    X720p6000,
    X1080p2398,
    X1080p2400,
    X1080p2500,
    X1080p2997,
    X1080p3000,
    X1080p5000,
    X1080p5994,
    X1080p6000,
    X1080i5000,
    X1080i5994,
    X1080i6000,
    X1556p2398,
    X1556p2400,
    X1556p2500,
    X2160p2398,
    X2160p2400,
    X2160p2500,
    X2160p2997,
    X2160p3000,
    X2160p5000,
    X2160p5994,
    X2160p6000,
    Invalid,
}

struct FormatEntry {
    format:        VideoFormat,
    name:          &'static str,
    width:         u32,
    height:        u32,
    square_width:  u32,
    square_height: u32,
    field_count:   u32,
    time_scale:    i32,
    duration:      i32,
}

const fn entry(
    format: VideoFormat,
    name: &'static str,
    width: u32,
    height: u32,
    square_width: u32,
    square_height: u32,
    field_count: u32,
    time_scale: i32,
    duration: i32,
) -> FormatEntry {
    FormatEntry { format, name, width, height, square_width, square_height, field_count, time_scale, duration }
}

#[rustfmt::skip]
const FORMATS: &[FormatEntry] = &[
    entry(VideoFormat::Pal,        "PAL",       720, 576,  1024, 576,  2, 25000, 1000),
    entry(VideoFormat::Ntsc,       "NTSC",      720, 486,  720,  540,  2, 30000, 1001),
    entry(VideoFormat::X576p2500,  "576p2500",  720, 576,  1024, 576,  1, 25000, 1000),
    entry(VideoFormat::X720p2398,  "720p2398",  1280, 720, 1280, 720,  1, 24000, 1001),
    entry(VideoFormat::X720p2400,  "720p2400",  1280, 720, 1280, 720,  1, 24000, 1000),
    entry(VideoFormat::X720p2500,  "720p2500",  1280, 720, 1280, 720,  1, 25000, 1000),
    entry(VideoFormat::X720p2997,  "720p2997",  1280, 720, 1280, 720,  1, 30000, 1001),
    entry(VideoFormat::X720p3000,  "720p3000",  1280, 720, 1280, 720,  1, 30000, 1000),
    entry(VideoFormat::X720p5000,  "720p5000",  1280, 720, 1280, 720,  1, 50000, 1000),
    entry(VideoFormat::X720p5994,  "720p5994",  1280, 720, 1280, 720,  1, 60000, 1001),
    entry(VideoFormat::X720p6000,  "720p6000",  1280, 720, 1280, 720,  1, 60000, 1000),
    entry(VideoFormat::X1080p2398, "1080p2398", 1920, 1080, 1920, 1080, 1, 24000, 1001),
    entry(VideoFormat::X1080p2400, "1080p2400", 1920, 1080, 1920, 1080, 1, 24000, 1000),
    entry(VideoFormat::X1080p2500, "1080p2500", 1920, 1080, 1920, 1080, 1, 25000, 1000),
    entry(VideoFormat::X1080p2997, "1080p2997", 1920, 1080, 1920, 1080, 1, 30000, 1001),
    entry(VideoFormat::X1080p3000, "1080p3000", 1920, 1080, 1920, 1080, 1, 30000, 1000),
    entry(VideoFormat::X1080p5000, "1080p5000", 1920, 1080, 1920, 1080, 1, 50000, 1000),
    entry(VideoFormat::X1080p5994, "1080p5994", 1920, 1080, 1920, 1080, 1, 60000, 1001),
    entry(VideoFormat::X1080p6000, "1080p6000", 1920, 1080, 1920, 1080, 1, 60000, 1000),
    entry(VideoFormat::X1080i5000, "1080i5000", 1920, 1080, 1920, 1080, 2, 25000, 1000),
    entry(VideoFormat::X1080i5994, "1080i5994", 1920, 1080, 1920, 1080, 2, 30000, 1001),
    entry(VideoFormat::X1080i6000, "1080i6000", 1920, 1080, 1920, 1080, 2, 30000, 1000),
    entry(VideoFormat::X1556p2398, "1556p2398", 2048, 1556, 2048, 1556, 1, 24000, 1001),
    entry(VideoFormat::X1556p2400, "1556p2400", 2048, 1556, 2048, 1556, 1, 24000, 1000),
    entry(VideoFormat::X1556p2500, "1556p2500", 2048, 1556, 2048, 1556, 1, 25000, 1000),
    entry(VideoFormat::X2160p2398, "2160p2398", 3840, 2160, 3840, 2160, 1, 24000, 1001),
    entry(VideoFormat::X2160p2400, "2160p2400", 3840, 2160, 3840, 2160, 1, 24000, 1000),
    entry(VideoFormat::X2160p2500, "2160p2500", 3840, 2160, 3840, 2160, 1, 25000, 1000),
    entry(VideoFormat::X2160p2997, "2160p2997", 3840, 2160, 3840, 2160, 1, 30000, 1001),
    entry(VideoFormat::X2160p3000, "2160p3000", 3840, 2160, 3840, 2160, 1, 30000, 1000),
    entry(VideoFormat::X2160p5000, "2160p5000", 3840, 2160, 3840, 2160, 1, 50000, 1000),
    entry(VideoFormat::X2160p5994, "2160p5994", 3840, 2160, 3840, 2160, 1, 60000, 1001),
    entry(VideoFormat::X2160p6000, "2160p6000", 3840, 2160, 3840, 2160, 1, 60000, 1000),
];

impl VideoFormat {
    pub fn from_name(name: &str) -> Option<VideoFormat> {
        FORMATS
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.format)
    }
}

/// Complete description of an output channel's video and audio timing.
/// `time_scale / duration` is the frame rate; `fps` is the output tick rate
/// (fields per second when interlaced).
#[derive(Clone, Debug, PartialEq)]
pub struct VideoFormatDesc {
    pub format:        VideoFormat,
    pub width:         u32,
    pub height:        u32,
    pub square_width:  u32,
    pub square_height: u32,
    pub field_count:   u32,
    pub field_mode:    FieldMode,
    /// Output ticks per second (fields per second when interlaced).
    pub fps:           f64,
    /// Frame rate.
    pub framerate:     Rational32,
    pub time_scale:    i32,
    pub duration:      i32,
    pub name:          String,
    pub audio_sample_rate: i32,
    pub audio_channels:    usize,
    /// Samples per frame, cycled frame by frame.
    pub audio_cadence: Vec<usize>,
}

impl VideoFormatDesc {
    pub fn new(format: VideoFormat) -> Option<VideoFormatDesc> {
        let entry = FORMATS.iter().find(|entry| entry.format == format)?;
        let framerate = Rational32::new(entry.time_scale, entry.duration);

        Some(VideoFormatDesc {
            format: entry.format,
            width: entry.width,
            height: entry.height,
            square_width: entry.square_width,
            square_height: entry.square_height,
            field_count: entry.field_count,
            field_mode: if entry.field_count == 2 { FieldMode::Upper } else { FieldMode::Progressive },
            fps: entry.time_scale as f64 / entry.duration as f64 * entry.field_count as f64,
            framerate,
            time_scale: entry.time_scale,
            duration: entry.duration,
            name: entry.name.to_string(),
            audio_sample_rate: 48000,
            audio_channels: crate::frame::AUDIO_CHANNELS,
            audio_cadence: audio_cadence(48000, framerate),
        })
    }

    pub fn from_name(name: &str) -> Option<VideoFormatDesc> {
        VideoFormat::from_name(name).and_then(VideoFormatDesc::new)
    }

    pub fn is_interlaced(&self) -> bool {
        self.field_count == 2
    }
}

/// Distribute `sample_rate / framerate` samples per frame over the shortest
/// repeating pattern. Integral rates give a single-entry cadence; 1001-family
/// rates spread the remainder so each pattern sums exactly.
pub fn audio_cadence(sample_rate: i64, framerate: Rational32) -> Vec<usize> {
    let num = *framerate.numer() as i64;
    let den = *framerate.denom() as i64;

    // samples per frame = sample_rate * den / num, as a reduced fraction.
    let total = sample_rate * den;
    let gcd = gcd(total, num);
    let pattern_len = (num / gcd) as usize;

    let mut cadence = Vec::with_capacity(pattern_len);
    let mut previous = 0i64;
    for i in 1..=pattern_len as i64 {
        // Round to nearest so the larger counts lead the pattern.
        let boundary = (i * total + num / 2) / num;
        cadence.push((boundary - previous) as usize);
        previous = boundary;
    }
    cadence
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pal_is_interlaced_at_25_frames() {
        let desc = VideoFormatDesc::new(VideoFormat::Pal).unwrap();
        assert_eq!(desc.field_count, 2);
        assert_eq!(desc.framerate, Rational32::new(25, 1));
        assert_eq!(desc.fps, 50.0);
        assert_eq!(desc.audio_cadence, vec![1920]);
    }

    #[test]
    fn ntsc_cadence_sums_to_one_pattern_of_samples() {
        let desc = VideoFormatDesc::new(VideoFormat::Ntsc).unwrap();
        assert_eq!(desc.framerate, Rational32::new(30000, 1001));
        assert_eq!(desc.audio_cadence, vec![1602, 1601, 1602, 1601, 1602]);
        assert_eq!(desc.audio_cadence.iter().sum::<usize>(), 8008);
    }

    #[test]
    fn p2398_has_a_single_entry_cadence() {
        let desc = VideoFormatDesc::new(VideoFormat::X1080p2398).unwrap();
        assert_eq!(desc.audio_cadence, vec![2002]);
    }

    #[test]
    fn p5994_cadence_sums_exactly() {
        let desc = VideoFormatDesc::new(VideoFormat::X1080p5994).unwrap();
        assert_eq!(desc.audio_cadence.len(), 5);
        assert_eq!(desc.audio_cadence.iter().sum::<usize>(), 4004);
    }

    #[test]
    fn lookup_by_name_is_case_insensitive() {
        assert_eq!(VideoFormat::from_name("pal"), Some(VideoFormat::Pal));
        assert_eq!(VideoFormat::from_name("1080I5000"), Some(VideoFormat::X1080i5000));
        assert_eq!(VideoFormat::from_name("bogus"), None);
    }

    #[test]
    fn every_format_cadence_averages_to_sample_rate() {
        for entry in super::FORMATS {
            let desc = VideoFormatDesc::new(entry.format).unwrap();
            let sum: usize = desc.audio_cadence.iter().sum();
            let frames = desc.audio_cadence.len() as f64;
            let frame_rate =
                *desc.framerate.numer() as f64 / *desc.framerate.denom() as f64;
            let expected = 48000.0 * frames / frame_rate;
            assert!(
                (sum as f64 - expected).abs() < 1e-6,
                "{}: cadence sum {sum} vs {expected}",
                desc.name
            );
        }
    }
}
