// crates/stagecast-media/src/filter.rs
//
// Video and audio filter graphs. Each graph owns one buffer source per
// chosen input stream and a single sink; the spec string is conditioned with
// deinterlacing, an fps converter anchored at the seek point (video) and an
// async resampler plus output-format constraints (audio). Stream choice:
//   * video: up to one primary stream; two matching "large" streams get an
//     alphamerge prefix (fill + key); caption-only files get a fake 1×1
//     source so A53-CC side data still flows.
//   * audio: all usable streams, merged with amerge when there are several.

use std::collections::HashMap;

use anyhow::{anyhow, Context as _, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::filter;
use ffmpeg::format::Pixel;
use ffmpeg::frame;
use ffmpeg::Rational;

use stagecast_core::format::VideoFormatDesc;

use crate::config::DecodeConfig;
use crate::decode::{Decoded, Decoder};
use crate::util::{rescale, time_base_q, AudioChunk, SampleFifo, StreamInfo, StreamKind, TIME_BASE};

/// Sink pixel formats the mixer accepts (bwdif additionally needs the planar
/// RGB entries).
const SINK_PIX_FMTS: &str = "rgb24|bgr24|bgra|argb|rgba|abgr|yuv444p|yuv422p|yuv422p10le|\
                             yuv422p12le|yuv420p|yuv420p10le|yuv420p12le|yuv410p|yuva444p|\
                             yuva422p|yuva420p|uyvy422|gbrp|gbrp10le|gbrp12le|gbrp16le|\
                             gbrap|gbrap16le";

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FilterMedia {
    Video,
    Audio,
}

pub enum FilterFrame {
    Video(frame::Video),
    Audio(AudioChunk),
}

struct SourceSlot {
    stream_index: usize,
    name:         String,
    closed:       bool,
}

/// An EIA-608 stream whose packets ride along with a video stream's decoder.
#[derive(Clone, Copy, Debug)]
pub struct CaptionPairing {
    pub caption_stream: usize,
    pub video_stream:   usize,
}

pub struct FilterGraph {
    media:   FilterMedia,
    graph:   Option<filter::Graph>,
    sources: Vec<SourceSlot>,
    frame:   Option<FilterFrame>,
    eof:     bool,
    fifo:    SampleFifo,
    sink_time_base:  Rational,
    sink_frame_rate: Rational,
    pub caption_pairing: Option<CaptionPairing>,
}

enum Pull {
    Frame(FilterFrame),
    Buffered,
    Again,
    Eof,
    Failed(ffmpeg::Error),
}

impl FilterGraph {
    // ── Construction ──────────────────────────────────────────────────────────

    pub fn video(
        spec: &str,
        streams: &[StreamInfo],
        start_time: i64,
        format_desc: &VideoFormatDesc,
        config: &DecodeConfig,
    ) -> Result<FilterGraph> {
        let mut filter_spec = if spec.is_empty() { "null".to_string() } else { spec.to_string() };

        if let Some(mode) = config.auto_deinterlace.bwdif_mode() {
            filter_spec += &format!(",bwdif=mode=send_field:parity=auto:deint={mode}");
        }
        filter_spec += &format!(
            ",fps=fps={}/{}:start_time={}",
            format_desc.framerate.numer() * format_desc.field_count as i32,
            format_desc.framerate.denom(),
            start_time as f64 / TIME_BASE as f64,
        );
        filter_spec += &format!(",format=pix_fmts={SINK_PIX_FMTS}");

        // Usable video streams, largest raster first.
        let mut video_streams: Vec<&StreamInfo> = streams
            .iter()
            .filter(|info| {
                info.kind == StreamKind::Video && (info.disposition == 0 || info.is_default)
            })
            .collect();
        video_streams.sort_by(|lhs, rhs| rhs.height.cmp(&lhs.height));

        // Caption stream choice: a default disposition always wins, then
        // first in file order.
        let caption_stream = streams
            .iter()
            .filter(|info| info.kind == StreamKind::Eia608)
            .max_by_key(|info| (info.is_default, std::cmp::Reverse(info.index)))
            .map(|info| info.index);

        let mut input_count = 1;
        if video_streams.len() >= 2 {
            let fill = video_streams[0];
            let key = video_streams[1];
            let third = video_streams.get(2);
            if fill.same_video_properties(key)
                && !third.is_some_and(|third| fill.same_video_properties(third))
            {
                filter_spec = format!("alphamerge,{filter_spec}");
                input_count = 2;
            }
        }

        let mut caption_pairing = None;
        let chosen: Vec<&StreamInfo> = if video_streams.is_empty() {
            match caption_stream {
                // Fake video input so closed captions still flow.
                Some(index) => vec![streams.iter().find(|info| info.index == index).unwrap()],
                None => Vec::new(),
            }
        } else {
            let chosen: Vec<&StreamInfo> =
                video_streams.into_iter().take(input_count).collect();
            if let Some(caption_stream) = caption_stream {
                caption_pairing = Some(CaptionPairing {
                    caption_stream,
                    video_stream: chosen[0].index,
                });
            }
            chosen
        };

        let mut filter = Self::build(FilterMedia::Video, &filter_spec, &chosen)?;
        filter.caption_pairing = caption_pairing;
        Ok(filter)
    }

    pub fn audio(
        spec: &str,
        streams: &[StreamInfo],
        start_time: i64,
        format_desc: &VideoFormatDesc,
    ) -> Result<FilterGraph> {
        let mut filter_spec = if spec.is_empty() { "anull".to_string() } else { spec.to_string() };

        let audio_streams: Vec<&StreamInfo> = streams
            .iter()
            .filter(|info| {
                info.kind == StreamKind::Audio
                    && info.channels > 0
                    && (info.disposition == 0 || info.is_default)
            })
            .collect();

        // first_pts is computed in the first source's sample-rate time base.
        let first_tb_rate = audio_streams
            .first()
            .map(|info| info.sample_rate)
            .unwrap_or(format_desc.audio_sample_rate);
        let sample_rate = format_desc.audio_sample_rate;

        filter_spec += &format!(
            ",aresample=async=1000:first_pts={}:min_comp=0.01:osr={sample_rate}",
            rescale(start_time, time_base_q(), Rational::new(1, first_tb_rate.max(1))),
        );
        filter_spec += &format!(",aformat=sample_fmts=s32:sample_rates={sample_rate}");

        if audio_streams.len() > 1 {
            filter_spec = format!("amerge=inputs={},{filter_spec}", audio_streams.len());
        }

        Self::build(FilterMedia::Audio, &filter_spec, &audio_streams)
    }

    fn build(media: FilterMedia, filter_spec: &str, chosen: &[&StreamInfo]) -> Result<FilterGraph> {
        let mut filter = FilterGraph {
            media,
            graph: None,
            sources: Vec::new(),
            frame: None,
            eof: false,
            fifo: SampleFifo::new(),
            sink_time_base: Rational::new(1, TIME_BASE),
            sink_frame_rate: Rational::new(0, 1),
            caption_pairing: None,
        };

        if chosen.is_empty() {
            // Nothing to filter; the graph reports EOF on first poll.
            return Ok(filter);
        }

        let mut graph = filter::Graph::new();

        for info in chosen {
            let name = format!("in_{}", info.index);
            let (filter_name, args) = match media {
                FilterMedia::Video => ("buffer", buffer_args(info)),
                FilterMedia::Audio => ("abuffer", abuffer_args(info)),
            };
            graph
                .add(
                    &filter::find(filter_name)
                        .ok_or_else(|| anyhow!("missing {filter_name} filter"))?,
                    &name,
                    &args,
                )
                .with_context(|| format!("creating {filter_name} for stream {}", info.index))?;
            filter.sources.push(SourceSlot {
                stream_index: info.index,
                name,
                closed: false,
            });
        }

        let sink_name = match media {
            FilterMedia::Video => "buffersink",
            FilterMedia::Audio => "abuffersink",
        };
        graph
            .add(
                &filter::find(sink_name).ok_or_else(|| anyhow!("missing {sink_name} filter"))?,
                "out",
                "",
            )
            .context("creating sink")?;

        {
            let mut parser = graph.output(&filter.sources[0].name, 0)?;
            for slot in &filter.sources[1..] {
                parser = parser.output(&slot.name, 0)?;
            }
            parser
                .input("out", 0)?
                .parse(filter_spec)
                .with_context(|| format!("parsing filter spec {filter_spec}"))?;
        }
        graph.validate().context("validating filter graph")?;

        {
            let sink = graph.get("out").expect("sink exists after validate");
            filter.sink_time_base = crate::util::sink_time_base(&sink);
            if media == FilterMedia::Video {
                filter.sink_frame_rate = crate::util::sink_frame_rate(&sink);
            }
        }

        log::debug!("[filter] configured: {filter_spec}");
        filter.graph = Some(graph);
        Ok(filter)
    }

    // ── Access ────────────────────────────────────────────────────────────────

    /// Streams whose packets this graph consumes.
    pub fn stream_indexes(&self) -> Vec<usize> {
        self.sources.iter().map(|slot| slot.stream_index).collect()
    }

    pub fn has_frame(&self) -> bool {
        self.frame.is_some()
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn sink_time_base(&self) -> Rational {
        self.sink_time_base
    }

    pub fn sink_frame_rate(&self) -> Rational {
        self.sink_frame_rate
    }

    pub fn take_frame(&mut self) -> Option<FilterFrame> {
        self.frame.take()
    }

    // ── Pump ──────────────────────────────────────────────────────────────────

    /// Try to produce one filtered frame (audio: exactly `nb_samples`).
    /// Feeds decoder output into the sources when the sink starves. Returns
    /// true when any progress was made.
    pub fn poll(&mut self, decoders: &HashMap<usize, Decoder>, nb_samples: Option<usize>) -> bool {
        if self.frame.is_some() || self.eof {
            return false;
        }
        if self.graph.is_none() {
            self.eof = true;
            return true;
        }

        let mut progress = false;
        loop {
            if self.media == FilterMedia::Audio {
                if let Some(chunk) = nb_samples.and_then(|n| self.fifo.take(n)) {
                    self.frame = Some(FilterFrame::Audio(chunk));
                    return true;
                }
            }

            match self.pull_sink() {
                Pull::Frame(frame) => {
                    self.frame = Some(frame);
                    return true;
                }
                Pull::Buffered => {
                    progress = true;
                    continue;
                }
                Pull::Again => {
                    if !self.feed_sources(decoders) {
                        return progress;
                    }
                    progress = true;
                }
                Pull::Eof => {
                    if self.media == FilterMedia::Audio && !self.fifo.is_empty() {
                        // Drain the tail; the last frame may be short.
                        let chunk = nb_samples
                            .and_then(|n| self.fifo.take(n))
                            .or_else(|| self.fifo.take_rest());
                        if let Some(chunk) = chunk {
                            self.frame = Some(FilterFrame::Audio(chunk));
                            return true;
                        }
                    }
                    self.eof = true;
                    return true;
                }
                Pull::Failed(error) => {
                    log::warn!("[filter] sink failed: {error}");
                    self.eof = true;
                    return true;
                }
            }
        }
    }

    fn pull_sink(&mut self) -> Pull {
        let graph = self.graph.as_mut().expect("pull_sink requires a graph");
        let mut sink = graph.get("out").expect("sink exists");

        match self.media {
            FilterMedia::Video => {
                let mut frame = frame::Video::empty();
                match sink.sink().frame(&mut frame) {
                    Ok(()) => Pull::Frame(FilterFrame::Video(frame)),
                    Err(error) => Self::classify(error),
                }
            }
            FilterMedia::Audio => {
                let mut frame = frame::Audio::empty();
                match sink.sink().frame(&mut frame) {
                    Ok(()) => {
                        self.fifo.push(&frame);
                        Pull::Buffered
                    }
                    Err(error) => Self::classify(error),
                }
            }
        }
    }

    fn classify(error: ffmpeg::Error) -> Pull {
        match error {
            ffmpeg::Error::Other { errno: ffmpeg::error::EAGAIN } => Pull::Again,
            ffmpeg::Error::Eof => Pull::Eof,
            other => Pull::Failed(other),
        }
    }

    /// Move one decoded frame per starving source into the graph. Returns
    /// true when anything was fed or closed.
    fn feed_sources(&mut self, decoders: &HashMap<usize, Decoder>) -> bool {
        let graph = self.graph.as_mut().expect("feed_sources requires a graph");
        let mut fed = false;

        for slot in self.sources.iter_mut().filter(|slot| !slot.closed) {
            let Some(decoder) = decoders.get(&slot.stream_index) else {
                continue;
            };
            match decoder.try_pop() {
                Some(Decoded::Video(frame)) => {
                    let mut source = graph.get(&slot.name).expect("source exists");
                    if let Err(error) = source.source().add(&frame) {
                        log::warn!("[filter] {} rejected a frame: {error}", slot.name);
                    }
                    fed = true;
                }
                Some(Decoded::Audio(frame)) => {
                    let mut source = graph.get(&slot.name).expect("source exists");
                    if let Err(error) = source.source().add(&frame) {
                        log::warn!("[filter] {} rejected a frame: {error}", slot.name);
                    }
                    fed = true;
                }
                Some(Decoded::Eof { .. }) => {
                    let mut source = graph.get(&slot.name).expect("source exists");
                    if let Err(error) = source.source().flush() {
                        log::warn!("[filter] {} flush failed: {error}", slot.name);
                    }
                    slot.closed = true;
                    fed = true;
                }
                None => {}
            }
        }
        fed
    }
}

fn buffer_args(info: &StreamInfo) -> String {
    if info.kind == StreamKind::Eia608 {
        // Fake 1×1 source: the frames carry only side data.
        let gray8 = ffmpeg::ffi::AVPixelFormat::from(Pixel::GRAY8) as i32;
        return format!(
            "video_size=1x1:pix_fmt={gray8}:time_base={}/{}",
            info.time_base.0, info.time_base.1
        );
    }

    let mut args = format!(
        "video_size={}x{}:pix_fmt={}:time_base={}/{}",
        info.width, info.height, info.pixel_format, info.time_base.0, info.time_base.1
    );
    if info.sample_aspect_ratio.0 > 0 && info.sample_aspect_ratio.1 > 0 {
        args += &format!(
            ":pixel_aspect={}/{}",
            info.sample_aspect_ratio.0, info.sample_aspect_ratio.1
        );
    }
    if info.framerate.0 > 0 && info.framerate.1 > 0 {
        args += &format!(":frame_rate={}/{}", info.framerate.0, info.framerate.1);
    }
    args
}

fn abuffer_args(info: &StreamInfo) -> String {
    format!(
        "time_base={}/{}:sample_rate={}:sample_fmt={}:channels={}",
        info.time_base.0, info.time_base.1, info.sample_rate, info.sample_format, info.channels
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream(index: usize, width: i32, height: i32, is_default: bool) -> StreamInfo {
        StreamInfo {
            index,
            kind: StreamKind::Video,
            codec_id: ffmpeg::codec::Id::H264,
            time_base: (1, 90000),
            width,
            height,
            sample_aspect_ratio: (1, 1),
            field_order: 1,
            framerate: (25, 1),
            channels: 0,
            sample_rate: 0,
            sample_format: -1,
            pixel_format: 0,
            disposition: if is_default { 1 } else { 0 },
            is_default,
            extradata: Vec::new(),
            profile: 0,
            level: 0,
        }
    }

    fn caption_stream(index: usize, is_default: bool) -> StreamInfo {
        let mut info = video_stream(index, 0, 0, is_default);
        info.kind = StreamKind::Eia608;
        info.codec_id = ffmpeg::codec::Id::EIA_608;
        info
    }

    #[test]
    fn caption_choice_prefers_default_disposition() {
        let streams = vec![
            video_stream(0, 1920, 1080, false),
            caption_stream(1, false),
            caption_stream(2, true),
        ];
        let chosen = streams
            .iter()
            .filter(|info| info.kind == StreamKind::Eia608)
            .max_by_key(|info| (info.is_default, std::cmp::Reverse(info.index)))
            .map(|info| info.index);
        assert_eq!(chosen, Some(2));
    }

    #[test]
    fn caption_choice_falls_back_to_first_in_file_order() {
        let streams = vec![caption_stream(3, false), caption_stream(5, false)];
        let chosen = streams
            .iter()
            .max_by_key(|info| (info.is_default, std::cmp::Reverse(info.index)))
            .map(|info| info.index);
        assert_eq!(chosen, Some(3));
    }

    #[test]
    fn matching_streams_can_alphamerge() {
        let fill = video_stream(0, 1920, 1080, false);
        let key = video_stream(1, 1920, 1080, false);
        let odd = video_stream(2, 1280, 720, false);
        assert!(fill.same_video_properties(&key));
        assert!(!fill.same_video_properties(&odd));
    }

    #[test]
    fn buffer_args_carry_raster_and_timing() {
        let info = video_stream(0, 1920, 1080, false);
        let args = buffer_args(&info);
        assert!(args.contains("video_size=1920x1080"));
        assert!(args.contains("time_base=1/90000"));
        assert!(args.contains("frame_rate=25/1"));
    }

    #[test]
    fn fake_caption_source_is_one_by_one() {
        let info = caption_stream(4, false);
        let args = buffer_args(&info);
        assert!(args.starts_with("video_size=1x1"));
    }

    #[test]
    fn empty_stream_list_reports_eof_without_a_graph() {
        let filter = FilterGraph::build(FilterMedia::Audio, "anull", &[]).unwrap();
        assert!(filter.graph.is_none());
        let mut filter = filter;
        assert!(filter.poll(&HashMap::new(), Some(1024)));
        assert!(filter.is_eof());
    }
}
