// crates/stagecast-media/src/util.rs
//
// Conversions between FFmpeg frames and stagecast-core frames, timestamp
// rescaling, the sample FIFO behind the audio filter sink, and plain-data
// stream descriptions that can cross thread boundaries.

use ffmpeg_the_third as ffmpeg;

use ffmpeg::format::Pixel;
use ffmpeg::frame;
use ffmpeg::Rational;

use rayon::prelude::*;
use uuid::Uuid;

use stagecast_core::frame::{
    BitDepth, ColorSpace, MutableFrame, PixelFormat, PixelFormatDesc, PlaneDesc, SideData,
    SideDataType, AUDIO_CHANNELS,
};
use stagecast_core::registry::AudioChannelLayout;
use stagecast_core::FrameFactory;

pub const NOPTS: i64 = ffmpeg::ffi::AV_NOPTS_VALUE;
pub const TIME_BASE: i32 = ffmpeg::ffi::AV_TIME_BASE;

pub fn time_base_q() -> Rational {
    Rational::new(1, TIME_BASE)
}

pub fn rescale(ts: i64, src: Rational, dst: Rational) -> i64 {
    unsafe { ffmpeg::ffi::av_rescale_q(ts, src.into(), dst.into()) }
}

/// The layout decoded frames are padded to.
pub fn default_channel_layout() -> AudioChannelLayout {
    AudioChannelLayout::new(AUDIO_CHANNELS, "16CH", "")
        .expect("the default channel layout is valid")
}

// ── Stream descriptions ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Eia608,
    Other,
}

/// Plain-data snapshot of a demuxed stream, taken on the reader thread so no
/// FFmpeg context has to cross threads.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    pub index:         usize,
    pub kind:          StreamKind,
    pub codec_id:      ffmpeg::codec::Id,
    pub time_base:     (i32, i32),
    pub width:         i32,
    pub height:        i32,
    pub sample_aspect_ratio: (i32, i32),
    pub field_order:   i32,
    pub framerate:     (i32, i32),
    pub channels:      i32,
    pub sample_rate:   i32,
    pub sample_format: i32,
    pub pixel_format:  i32,
    pub disposition:   i32,
    pub is_default:    bool,
    pub extradata:     Vec<u8>,
    pub profile:       i32,
    pub level:         i32,
}

impl StreamInfo {
    pub fn time_base_q(&self) -> Rational {
        Rational::new(self.time_base.0, self.time_base.1)
    }

    /// Streams with matching raster properties can be alpha-merged.
    pub fn same_video_properties(&self, other: &StreamInfo) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.sample_aspect_ratio == other.sample_aspect_ratio
            && self.field_order == other.field_order
    }
}

pub fn stream_info(stream: &ffmpeg::format::stream::Stream) -> StreamInfo {
    let parameters = stream.parameters();
    let time_base = stream.time_base();
    let framerate = unsafe {
        ffmpeg::ffi::av_guess_frame_rate(std::ptr::null_mut(), stream.as_ptr() as *mut _, std::ptr::null_mut())
    };

    // The safe wrapper exposes only a slice of the codec parameters; read the
    // rest straight off the struct.
    let par = unsafe { &*parameters.as_ptr() };
    let codec_id = ffmpeg::codec::Id::from(par.codec_id);

    let kind = if codec_id == ffmpeg::codec::Id::EIA_608 {
        StreamKind::Eia608
    } else {
        match par.codec_type {
            ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO => StreamKind::Video,
            ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO => StreamKind::Audio,
            _ => StreamKind::Other,
        }
    };

    let extradata = if par.extradata.is_null() || par.extradata_size <= 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(par.extradata, par.extradata_size as usize).to_vec() }
    };

    StreamInfo {
        index: stream.index(),
        kind,
        codec_id,
        time_base: (time_base.numerator(), time_base.denominator()),
        width: par.width,
        height: par.height,
        sample_aspect_ratio: (par.sample_aspect_ratio.num, par.sample_aspect_ratio.den),
        field_order: par.field_order as i32,
        framerate: (framerate.num, framerate.den),
        channels: unsafe { par.ch_layout.nb_channels },
        sample_rate: par.sample_rate,
        sample_format: par.format,
        pixel_format: par.format,
        disposition: stream.disposition().bits(),
        is_default: stream
            .disposition()
            .contains(ffmpeg::format::stream::Disposition::DEFAULT),
        extradata,
        profile: par.profile,
        level: par.level,
    }
}

/// Rebuild codec parameters from a snapshot, for decoder construction on a
/// different thread than the demuxer's.
pub fn parameters_from_info(info: &StreamInfo) -> ffmpeg::codec::Parameters {
    let mut parameters = ffmpeg::codec::Parameters::new();
    unsafe {
        let par = &mut *parameters.as_mut_ptr();
        par.codec_id = info.codec_id.into();
        par.codec_type = match info.kind {
            StreamKind::Video | StreamKind::Eia608 => {
                ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO
            }
            StreamKind::Audio => ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO,
            StreamKind::Other => ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_UNKNOWN,
        };
        par.width = info.width;
        par.height = info.height;
        par.sample_aspect_ratio = ffmpeg::ffi::AVRational {
            num: info.sample_aspect_ratio.0,
            den: info.sample_aspect_ratio.1,
        };
        par.format = match info.kind {
            StreamKind::Audio => info.sample_format,
            _ => info.pixel_format,
        };
        par.sample_rate = info.sample_rate;
        ffmpeg::ffi::av_channel_layout_default(&mut par.ch_layout, info.channels);
        par.profile = info.profile;
        par.level = info.level;

        if !info.extradata.is_empty() {
            let size = info.extradata.len();
            let extradata = ffmpeg::ffi::av_mallocz(
                size + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize,
            ) as *mut u8;
            std::ptr::copy_nonoverlapping(info.extradata.as_ptr(), extradata, size);
            par.extradata = extradata;
            par.extradata_size = size as i32;
        }
    }
    parameters
}

// ── Pixel formats ─────────────────────────────────────────────────────────────

pub fn get_pixel_format(pix_fmt: Pixel) -> (PixelFormat, BitDepth) {
    match pix_fmt {
        Pixel::GRAY8 => (PixelFormat::Gray, BitDepth::Bit8),
        Pixel::RGB24 => (PixelFormat::Rgb, BitDepth::Bit8),
        Pixel::BGR24 => (PixelFormat::Bgr, BitDepth::Bit8),
        Pixel::BGRA => (PixelFormat::Bgra, BitDepth::Bit8),
        Pixel::ARGB => (PixelFormat::Argb, BitDepth::Bit8),
        Pixel::RGBA => (PixelFormat::Rgba, BitDepth::Bit8),
        Pixel::ABGR => (PixelFormat::Abgr, BitDepth::Bit8),
        Pixel::YUV444P | Pixel::YUV422P | Pixel::YUV420P | Pixel::YUV411P | Pixel::YUV410P => {
            (PixelFormat::Ycbcr, BitDepth::Bit8)
        }
        Pixel::YUV422P10LE | Pixel::YUV420P10LE => (PixelFormat::Ycbcr, BitDepth::Bit10),
        Pixel::YUV422P12LE | Pixel::YUV420P12LE => (PixelFormat::Ycbcr, BitDepth::Bit12),
        Pixel::YUVA444P | Pixel::YUVA422P | Pixel::YUVA420P => {
            (PixelFormat::Ycbcra, BitDepth::Bit8)
        }
        Pixel::UYVY422 => (PixelFormat::Uyvy, BitDepth::Bit8),
        Pixel::GBRP => (PixelFormat::Gbrp, BitDepth::Bit8),
        Pixel::GBRP10LE => (PixelFormat::Gbrp, BitDepth::Bit10),
        Pixel::GBRP12LE => (PixelFormat::Gbrp, BitDepth::Bit12),
        Pixel::GBRP16LE => (PixelFormat::Gbrp, BitDepth::Bit16),
        Pixel::GBRAP => (PixelFormat::Gbrap, BitDepth::Bit8),
        Pixel::GBRAP16LE => (PixelFormat::Gbrap, BitDepth::Bit16),
        _ => (PixelFormat::Invalid, BitDepth::Bit8),
    }
}

fn chroma_shift(pix_fmt: Pixel) -> (usize, usize) {
    match pix_fmt {
        Pixel::YUV444P | Pixel::YUVA444P => (0, 0),
        Pixel::YUV422P | Pixel::YUV422P10LE | Pixel::YUV422P12LE | Pixel::YUVA422P => (1, 0),
        Pixel::YUV420P | Pixel::YUV420P10LE | Pixel::YUV420P12LE | Pixel::YUVA420P => (1, 1),
        Pixel::YUV411P => (2, 0),
        Pixel::YUV410P => (2, 2),
        _ => (0, 0),
    }
}

/// Describe the plane layout of a decoded frame. `data_map`, when non-empty,
/// maps descriptor planes back onto AVFrame planes (uyvy aliases one source
/// plane twice).
pub fn pixel_format_desc(
    pix_fmt: Pixel,
    width: usize,
    height: usize,
    data_map: &mut Vec<usize>,
) -> PixelFormatDesc {
    data_map.clear();

    let (format, depth) = get_pixel_format(pix_fmt);
    let mut desc = PixelFormatDesc::new(format);

    match format {
        PixelFormat::Gray => {
            desc.planes.push(PlaneDesc::new(width, height, 1, depth));
        }
        PixelFormat::Rgb | PixelFormat::Bgr => {
            desc.planes.push(PlaneDesc::new(width, height, 3, depth));
        }
        PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Argb | PixelFormat::Abgr => {
            desc.planes.push(PlaneDesc::new(width, height, 4, depth));
        }
        PixelFormat::Gbrp => {
            for _ in 0..3 {
                desc.planes.push(PlaneDesc::new(width, height, 1, depth));
            }
        }
        PixelFormat::Gbrap => {
            for _ in 0..4 {
                desc.planes.push(PlaneDesc::new(width, height, 1, depth));
            }
        }
        PixelFormat::Ycbcr | PixelFormat::Ycbcra => {
            let (shift_x, shift_y) = chroma_shift(pix_fmt);
            let chroma_width = (width + (1 << shift_x) - 1) >> shift_x;
            let chroma_height = (height + (1 << shift_y) - 1) >> shift_y;

            desc.planes.push(PlaneDesc::new(width, height, 1, depth));
            desc.planes.push(PlaneDesc::new(chroma_width, chroma_height, 1, depth));
            desc.planes.push(PlaneDesc::new(chroma_width, chroma_height, 1, depth));
            if format == PixelFormat::Ycbcra {
                desc.planes.push(PlaneDesc::new(width, height, 1, depth));
            }
        }
        PixelFormat::Uyvy => {
            // Both descriptors alias the same packed UYVY bytes.
            desc.planes.push(PlaneDesc::new(width, height, 2, depth));
            desc.planes.push(PlaneDesc::new(width / 2, height, 4, depth));
            data_map.push(0);
            data_map.push(0);
        }
        PixelFormat::Invalid => {}
    }

    desc
}

pub fn color_space_of(video: &frame::Video) -> ColorSpace {
    use ffmpeg::color::Space;
    match video.color_space() {
        Space::BT2020NCL => ColorSpace::Bt2020,
        Space::BT470BG | Space::SMPTE170M | Space::SMPTE240M => ColorSpace::Bt601,
        _ => ColorSpace::Bt709,
    }
}

// ── Side data ─────────────────────────────────────────────────────────────────

pub fn extract_side_data(video: &frame::Video) -> Vec<SideData> {
    let mut out = Vec::new();
    for side_data in video.side_data() {
        if side_data.kind() == frame::side_data::Type::A53CC {
            out.push(SideData::new(SideDataType::A53Cc, side_data.data().to_vec()));
        }
    }
    out
}

/// Replace the frame's A53-CC side data with `payload`; used to pair EIA-608
/// captions with their video frame.
pub fn set_a53_side_data(video: &mut frame::Video, payload: &[u8]) {
    unsafe {
        ffmpeg::ffi::av_frame_remove_side_data(
            video.as_mut_ptr(),
            ffmpeg::ffi::AVFrameSideDataType::AV_FRAME_DATA_A53_CC,
        );
        let side_data = ffmpeg::ffi::av_frame_new_side_data(
            video.as_mut_ptr(),
            ffmpeg::ffi::AVFrameSideDataType::AV_FRAME_DATA_A53_CC,
            payload.len(),
        );
        if side_data.is_null() {
            log::error!("[decode] failed to allocate a53-cc side data");
            return;
        }
        std::ptr::copy_nonoverlapping(payload.as_ptr(), (*side_data).data, payload.len());
    }
}

// ── Audio chunks ──────────────────────────────────────────────────────────────

/// One cadence-sized block of filtered audio, interleaved signed 32-bit.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    pub samples:     Vec<i32>,
    pub channels:    usize,
    pub pts:         i64,
    pub sample_rate: i32,
}

impl AudioChunk {
    pub fn nb_samples(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }
}

/// FIFO between the audio filter sink and the cadence-sized chunks the
/// pipeline emits. Filtered frames arrive in arbitrary sizes; the pipeline
/// pops exactly the destination cadence per output frame.
pub struct SampleFifo {
    samples:     Vec<i32>,
    channels:    usize,
    sample_rate: i32,
    next_pts:    i64,
}

impl SampleFifo {
    pub fn new() -> Self {
        Self { samples: Vec::new(), channels: 0, sample_rate: 0, next_pts: NOPTS }
    }

    pub fn len_samples(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn push(&mut self, audio: &frame::Audio) {
        let channels = audio.ch_layout().channels() as usize;
        let nb_samples = audio.samples();
        if nb_samples == 0 {
            return;
        }

        if self.samples.is_empty() {
            self.channels = channels;
            self.sample_rate = audio.rate() as i32;
            self.next_pts = audio.pts().unwrap_or(NOPTS);
        }

        // Packed S32: one interleaved plane.
        let data = audio.data(0);
        let samples = unsafe {
            std::slice::from_raw_parts(data.as_ptr() as *const i32, nb_samples * channels)
        };
        self.samples.extend_from_slice(samples);
    }

    /// Pop exactly `nb_samples` samples per channel, or nothing if the FIFO
    /// does not hold that much yet.
    pub fn take(&mut self, nb_samples: usize) -> Option<AudioChunk> {
        if self.len_samples() < nb_samples || nb_samples == 0 {
            return None;
        }
        let chunk_len = nb_samples * self.channels;
        let samples: Vec<i32> = self.samples.drain(..chunk_len).collect();
        let pts = self.next_pts;
        if self.next_pts != NOPTS {
            self.next_pts += nb_samples as i64;
        }
        Some(AudioChunk {
            samples,
            channels: self.channels,
            pts,
            sample_rate: self.sample_rate,
        })
    }

    /// Drain whatever remains; used at end of stream.
    pub fn take_rest(&mut self) -> Option<AudioChunk> {
        if self.samples.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.samples);
        let pts = self.next_pts;
        self.next_pts = NOPTS;
        Some(AudioChunk {
            samples,
            channels: self.channels,
            pts,
            sample_rate: self.sample_rate,
        })
    }
}

// ── Frame conversion ──────────────────────────────────────────────────────────

/// Convert a filtered video frame and/or audio chunk into a core frame.
/// Planes are copied stride-to-packed in parallel; audio is zero-padded out
/// to the mixer's fixed channel count.
pub fn make_frame(
    tag: Uuid,
    factory: &dyn FrameFactory,
    video: Option<&frame::Video>,
    audio: Option<&AudioChunk>,
) -> MutableFrame {
    let mut data_map = Vec::new();
    let pix_desc = match video {
        Some(video) => pixel_format_desc(
            video.format(),
            video.width() as usize,
            video.height() as usize,
            &mut data_map,
        ),
        None => PixelFormatDesc::invalid(),
    };

    let mut frame = factory.create_frame(tag, &pix_desc);

    if let Some(video) = video {
        frame.set_color_space(color_space_of(video));
        for side_data in extract_side_data(video) {
            frame.side_data_mut().push(side_data);
        }

        // Borrow the source spans up front so the parallel loop captures
        // plain slices only.
        let sources: Vec<(&[u8], usize)> = (0..pix_desc.planes.len())
            .map(|n| {
                let source_plane = if data_map.is_empty() { n } else { data_map[n] };
                (video.data(source_plane), video.stride(source_plane))
            })
            .collect();
        let planes: Vec<PlaneDesc> = pix_desc.planes.clone();

        frame
            .image_planes_mut()
            .par_iter_mut()
            .zip(planes.par_iter())
            .zip(sources.par_iter())
            .for_each(|((dest, plane), (src, stride))| {
                let row_bytes =
                    plane.linesize * plane.channels * plane.depth.bytes_per_component();
                for y in 0..plane.height {
                    let from = y * stride;
                    let to = y * row_bytes;
                    dest[to..to + row_bytes].copy_from_slice(&src[from..from + row_bytes]);
                }
            });
    }

    if let Some(audio) = audio {
        let nb_samples = audio.nb_samples();
        let mut data = vec![0i32; nb_samples * AUDIO_CHANNELS];

        if audio.channels == AUDIO_CHANNELS {
            data.copy_from_slice(&audio.samples);
        } else {
            // Some sources provide fewer than the mixer's channel count.
            let channels = audio.channels.min(AUDIO_CHANNELS);
            for i in 0..nb_samples {
                for j in 0..channels {
                    data[i * AUDIO_CHANNELS + j] = audio.samples[i * audio.channels + j];
                }
            }
        }

        *frame.audio_data_mut() = data;
        frame.set_audio_channel_layout(default_channel_layout());
    }

    frame
}

// ── Buffersink properties ─────────────────────────────────────────────────────

pub fn sink_time_base(sink: &ffmpeg::filter::Context) -> Rational {
    unsafe { ffmpeg::ffi::av_buffersink_get_time_base(sink.as_ptr()).into() }
}

pub fn sink_frame_rate(sink: &ffmpeg::filter::Context) -> Rational {
    unsafe { ffmpeg::ffi::av_buffersink_get_frame_rate(sink.as_ptr()).into() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagecast_core::frame::BufferFrameFactory;

    #[test]
    fn yuv420p_describes_three_subsampled_planes() {
        let mut data_map = Vec::new();
        let desc = pixel_format_desc(Pixel::YUV420P, 1920, 1080, &mut data_map);
        assert_eq!(desc.format, PixelFormat::Ycbcr);
        assert_eq!(desc.planes.len(), 3);
        assert_eq!(desc.planes[0].linesize, 1920);
        assert_eq!(desc.planes[1].linesize, 960);
        assert_eq!(desc.planes[1].height, 540);
        assert!(data_map.is_empty());
        assert!(desc.planes_match_format());
    }

    #[test]
    fn uyvy_aliases_its_single_source_plane() {
        let mut data_map = Vec::new();
        let desc = pixel_format_desc(Pixel::UYVY422, 1920, 1080, &mut data_map);
        assert_eq!(desc.planes.len(), 2);
        assert_eq!(data_map, vec![0, 0]);
    }

    #[test]
    fn ten_bit_formats_use_two_bytes_per_component() {
        let mut data_map = Vec::new();
        let desc = pixel_format_desc(Pixel::YUV422P10LE, 1920, 1080, &mut data_map);
        assert_eq!(desc.planes[0].depth, BitDepth::Bit10);
        assert_eq!(desc.planes[0].size_bytes(), 1920 * 1080 * 2);
    }

    #[test]
    fn unknown_formats_map_to_invalid() {
        let mut data_map = Vec::new();
        let desc = pixel_format_desc(Pixel::NV12, 64, 64, &mut data_map);
        assert_eq!(desc.format, PixelFormat::Invalid);
        assert!(desc.planes.is_empty());
    }

    #[test]
    fn audio_chunks_are_padded_to_the_mixer_width() {
        let chunk = AudioChunk {
            samples:     vec![1, 2, 3, 4],
            channels:    2,
            pts:         0,
            sample_rate: 48000,
        };
        let factory = BufferFrameFactory;
        let frame = make_frame(Uuid::nil(), &factory, None, Some(&chunk)).seal();

        assert_eq!(frame.audio_data().len(), 2 * AUDIO_CHANNELS);
        assert_eq!(frame.audio_data()[0], 1);
        assert_eq!(frame.audio_data()[1], 2);
        assert_eq!(frame.audio_data()[2], 0);
        assert_eq!(frame.audio_data()[AUDIO_CHANNELS], 3);
        assert_eq!(frame.audio_data()[AUDIO_CHANNELS + 1], 4);
    }

    #[test]
    fn sample_fifo_cuts_exact_chunks_and_tracks_pts() {
        let mut fifo = SampleFifo {
            samples:     (0..20).collect(),
            channels:    2,
            sample_rate: 48000,
            next_pts:    100,
        };

        let chunk = fifo.take(4).unwrap();
        assert_eq!(chunk.nb_samples(), 4);
        assert_eq!(chunk.pts, 100);
        assert_eq!(chunk.samples, (0..8).collect::<Vec<i32>>());

        assert!(fifo.take(10).is_none());
        let rest = fifo.take_rest().unwrap();
        assert_eq!(rest.nb_samples(), 6);
        assert_eq!(rest.pts, 104);
    }
}
