// crates/stagecast-media/src/producer.rs
//
// The media producer: input → decoders → filters → A/V pairing → bounded
// frame buffer. A pump thread keeps the buffer at most a quarter second
// ahead; the consumer-facing next_frame never blocks and returns the LATE
// sentinel on underflow so downstream cadence is preserved. Seek, loop, in
// and out points are atomics handled by the pump between frames.
//
// Timebase convention: everything internal is AV_TIME_BASE microseconds; the
// public API speaks destination ticks and converts through `format_tb`
// (`duration / (time_scale * field_count)`).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::{bounded, Sender};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::Packet;
use ffmpeg::Rational;

use uuid::Uuid;

use stagecast_core::format::{VideoField, VideoFormatDesc};
use stagecast_core::frame::DrawFrame;
use stagecast_core::producer::{Constraints, Producer};
use stagecast_core::{CoreError, FrameFactory};

use crate::config::DecodeConfig;
use crate::decode::{CaptionPacket, Decoder};
use crate::filter::{FilterFrame, FilterGraph};
use crate::input::Input;
use crate::util::{make_frame, rescale, time_base_q, AudioChunk, NOPTS};

/// Debounced "waiting for frame" warning: roughly every half second of
/// 5–20 ms polls.
const WARN_DEBOUNCE: u32 = 100;
const WARN_PERIOD: u32 = 500;

pub struct AvProducerOptions {
    pub vfilter:  String,
    pub afilter:  String,
    /// In point, destination ticks.
    pub start:    Option<i64>,
    /// Initial seek, destination ticks.
    pub seek:     Option<i64>,
    /// Out point measured from `start`, destination ticks.
    pub duration: Option<i64>,
    pub looping:  bool,
}

impl Default for AvProducerOptions {
    fn default() -> Self {
        Self {
            vfilter:  String::new(),
            afilter:  String::new(),
            start:    None,
            seek:     None,
            duration: None,
            looping:  false,
        }
    }
}

struct BufferedFrame {
    frame:       DrawFrame,
    pts:         i64,
    duration:    i64,
    frame_count: i64,
}

struct FrameCache {
    frame:    DrawFrame,
    time:     i64,
    duration: i64,
    flush:    bool,
    latency:  i64,
}

struct Shared {
    buffer:          Mutex<VecDeque<BufferedFrame>>,
    buffer_cond:     Condvar,
    buffer_capacity: usize,
    buffer_eof:      AtomicBool,
    seek:            AtomicI64,
    start:           AtomicI64,
    duration:        AtomicI64,
    input_duration:  AtomicI64,
    looping:         AtomicBool,
    abort:           Arc<AtomicBool>,
    frame:           Mutex<FrameCache>,
    error:           Mutex<Option<String>>,
}

pub struct AvProducer {
    shared:      Arc<Shared>,
    format_desc: VideoFormatDesc,
    format_tb:   Rational,
    name:        String,
    path:        String,
    constraints: Constraints,
    next_field:  VideoField,
    pump:        Option<std::thread::JoinHandle<()>>,
}

impl AvProducer {
    pub fn new(
        factory: Arc<dyn FrameFactory + Send + Sync>,
        format_desc: VideoFormatDesc,
        name: &str,
        path: &str,
        options: AvProducerOptions,
        config: DecodeConfig,
    ) -> AvProducer {
        let format_tb = Rational::new(
            format_desc.duration,
            format_desc.time_scale * format_desc.field_count as i32,
        );
        let to_us = |ticks: i64| rescale(ticks, format_tb, time_base_q());

        let shared = Arc::new(Shared {
            buffer:          Mutex::new(VecDeque::new()),
            buffer_cond:     Condvar::new(),
            buffer_capacity: (format_desc.fps as usize / 4).max(1),
            buffer_eof:      AtomicBool::new(false),
            seek:            AtomicI64::new(NOPTS),
            start:           AtomicI64::new(options.start.map(to_us).unwrap_or(NOPTS)),
            duration:        AtomicI64::new(options.duration.map(to_us).unwrap_or(NOPTS)),
            input_duration:  AtomicI64::new(NOPTS),
            looping:         AtomicBool::new(options.looping),
            abort:           Arc::new(AtomicBool::new(false)),
            frame:           Mutex::new(FrameCache {
                frame:    DrawFrame::empty(),
                time:     NOPTS,
                duration: NOPTS,
                flush:    true,
                latency:  0,
            }),
            error: Mutex::new(None),
        });

        let first_seek = options.seek.map(to_us);

        let pump_shared = Arc::clone(&shared);
        let pump_desc = format_desc.clone();
        let pump_path = path.to_string();
        let pump_name = name.to_string();
        let vfilter = options.vfilter.clone();
        let afilter = options.afilter.clone();
        let tag = Uuid::new_v4();

        let pump = std::thread::Builder::new()
            .name("stagecast-av-pump".into())
            .spawn(move || {
                let result = pump(
                    &pump_shared,
                    factory,
                    &pump_desc,
                    &pump_path,
                    &vfilter,
                    &afilter,
                    first_seek,
                    &config,
                    tag,
                );
                if let Err(error) = result {
                    log::error!("[av] {pump_name}: {error:#}");
                    *pump_shared.error.lock().unwrap() = Some(format!("{error:#}"));
                }
                pump_shared.buffer_eof.store(true, Ordering::Relaxed);
            })
            .expect("spawning av pump thread");

        AvProducer {
            shared,
            constraints: Constraints::new(format_desc.width as f64, format_desc.height as f64),
            format_desc,
            format_tb,
            name: name.to_string(),
            path: path.to_string(),
            next_field: VideoField::A,
            pump: Some(pump),
        }
    }

    // ── Consumer surface ──────────────────────────────────────────────────────

    pub fn next_frame(&mut self, field: VideoField) -> DrawFrame {
        self.surface_error();

        let mut buffer = self.shared.buffer.lock().unwrap();
        let mut cache = self.shared.frame.lock().unwrap();

        if buffer.is_empty() || (cache.flush && buffer.len() < 4) {
            let start = self.start_us();
            let duration = self.shared.duration.load(Ordering::Relaxed);
            let end = if duration != NOPTS { start + duration } else { i64::MAX };

            if self.shared.buffer_eof.load(Ordering::Relaxed) && !cache.flush {
                // Past the out point: hold the last frame and let time catch
                // up so loop detection still fires.
                if cache.time < end && cache.duration != NOPTS {
                    cache.time += cache.duration;
                } else if cache.time < end {
                    cache.time = self.shared.input_duration.load(Ordering::Relaxed);
                }
                return DrawFrame::still(&cache.frame);
            }

            if cache.latency == 0 {
                log::warn!("[av] {} underflow", self.print());
            }
            cache.latency += 1;
            return DrawFrame::late();
        }

        if self.format_desc.field_count == 2 {
            // Re-align on field parity: an off-phase head frame means the
            // consumer must see an empty field first.
            let head_is_field_a = buffer[0].frame_count % 2 == 0;
            let mismatched = (field == VideoField::A && !head_is_field_a)
                || (field == VideoField::B && head_is_field_a);
            if mismatched {
                cache.latency += 1;
                return DrawFrame::late();
            }
        }

        if cache.latency != -1 {
            log::warn!("[av] {} latency: {}", self.print(), cache.latency);
            cache.latency = -1;
        }

        let entry = buffer.pop_front().unwrap();
        cache.frame = entry.frame.clone();
        cache.time = entry.pts;
        cache.duration = entry.duration;
        cache.flush = false;

        self.shared.buffer_cond.notify_all();
        entry.frame
    }

    /// A still of the most recently advanced frame; while flushing, the
    /// oldest buffered frame.
    pub fn prev_frame(&mut self, field: VideoField) -> DrawFrame {
        self.surface_error();

        let mut cache = self.shared.frame.lock().unwrap();

        // Don't start a new frame on the second field.
        if field != VideoField::B && (cache.flush || cache.frame.is_empty()) {
            let buffer = self.shared.buffer.lock().unwrap();
            if let Some(head) = buffer.front() {
                cache.frame = head.frame.clone();
                cache.time = head.pts;
                cache.duration = head.duration;
                cache.flush = false;
            }
        }

        DrawFrame::still(&cache.frame)
    }

    pub fn is_ready(&self) -> bool {
        let buffer = self.shared.buffer.lock().unwrap();
        let cache = self.shared.frame.lock().unwrap();
        !buffer.is_empty() || !cache.frame.is_empty()
    }

    // ── Control surface (destination ticks) ───────────────────────────────────

    pub fn seek(&self, time: i64) {
        self.shared
            .seek
            .store(rescale(time, self.format_tb, time_base_q()), Ordering::Relaxed);

        let mut buffer = self.shared.buffer.lock().unwrap();
        buffer.clear();
        self.shared.buffer_cond.notify_all();
    }

    pub fn time(&self) -> i64 {
        let time = self.shared.frame.lock().unwrap().time;
        if time == NOPTS {
            return 0;
        }
        rescale(time, time_base_q(), self.format_tb)
    }

    pub fn set_looping(&self, looping: bool) {
        self.shared.looping.store(looping, Ordering::Relaxed);
    }

    pub fn looping(&self) -> bool {
        self.shared.looping.load(Ordering::Relaxed)
    }

    pub fn set_start(&self, start: i64) {
        self.shared
            .start
            .store(rescale(start, self.format_tb, time_base_q()), Ordering::Relaxed);
    }

    pub fn start(&self) -> i64 {
        let start = self.shared.start.load(Ordering::Relaxed);
        if start == NOPTS {
            0
        } else {
            rescale(start, time_base_q(), self.format_tb)
        }
    }

    pub fn set_duration(&self, duration: i64) {
        self.shared
            .duration
            .store(rescale(duration, self.format_tb, time_base_q()), Ordering::Relaxed);
    }

    pub fn duration(&self) -> Option<i64> {
        let duration = self.shared.duration.load(Ordering::Relaxed);
        if duration == NOPTS {
            None
        } else {
            Some(rescale(duration, time_base_q(), self.format_tb))
        }
    }

    pub fn file_duration(&self) -> Option<i64> {
        let duration = self.shared.input_duration.load(Ordering::Relaxed);
        if duration == NOPTS {
            None
        } else {
            Some(rescale(duration, time_base_q(), self.format_tb))
        }
    }

    fn start_us(&self) -> i64 {
        let start = self.shared.start.load(Ordering::Relaxed);
        if start == NOPTS {
            0
        } else {
            start
        }
    }

    fn surface_error(&self) {
        if let Some(error) = self.shared.error.lock().unwrap().take() {
            log::error!("[av] {}: {error}", self.print());
        }
    }
}

impl Drop for AvProducer {
    fn drop(&mut self) {
        self.shared.abort.store(true, Ordering::Relaxed);
        self.shared.buffer_cond.notify_all();
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

impl Producer for AvProducer {
    fn receive(&mut self, _nb_samples: usize) -> DrawFrame {
        let field = if self.format_desc.field_count == 2 {
            let field = self.next_field;
            self.next_field = match field {
                VideoField::A => VideoField::B,
                VideoField::B => VideoField::A,
            };
            field
        } else {
            VideoField::A
        };

        let frame = self.next_frame(field);
        if frame.is_late() {
            DrawFrame::empty()
        } else {
            frame
        }
    }

    fn last_frame(&mut self) -> DrawFrame {
        self.prev_frame(VideoField::A)
    }

    fn nb_frames(&self) -> u32 {
        if self.looping() {
            return u32::MAX;
        }
        self.duration().map(|d| d as u32).unwrap_or(u32::MAX)
    }

    fn frame_number(&self) -> u32 {
        (self.time() - self.start()).max(0) as u32
    }

    fn call(&mut self, _params: &[String]) -> Result<String, CoreError> {
        Err(CoreError::User("unsupported producer call".into()))
    }

    fn pixel_constraints(&self) -> &Constraints {
        &self.constraints
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn print(&self) -> String {
        // Ticks are fields when interlaced; fps is the tick rate.
        let fps = self.format_desc.fps;
        format!(
            "av[{}|{:.4}/{:.4}]",
            self.name,
            (self.time() - self.start()).max(0) as f64 / fps,
            self.duration().unwrap_or(0) as f64 / fps,
        )
    }

    fn state(&self) -> serde_json::Value {
        let fps = self.format_desc.fps;
        serde_json::json!({
            "file": {
                "name": self.name,
                "path": self.path,
                "clip": [self.start() as f64 / fps, self.duration().unwrap_or(0) as f64 / fps],
                "time": [
                    (self.time() - self.start()).max(0) as f64 / fps,
                    self.file_duration().unwrap_or(0) as f64 / fps,
                ],
            },
            "loop": self.looping(),
        })
    }

    fn is_ready(&self) -> bool {
        AvProducer::is_ready(self)
    }
}

// ── Pump ──────────────────────────────────────────────────────────────────────

struct Pipelines {
    decoders:       HashMap<usize, Decoder>,
    flushed:        HashMap<usize, bool>,
    video:          FilterGraph,
    audio:          FilterGraph,
    caption_tx:     Option<Sender<CaptionPacket>>,
    caption_stream: Option<usize>,
    pending_packet: Option<Packet>,
    eof_pending:    bool,
}

impl Pipelines {
    fn reset(
        input: &Input,
        vfilter: &str,
        afilter: &str,
        start_time: i64,
        format_desc: &VideoFormatDesc,
        config: &DecodeConfig,
    ) -> Result<Pipelines> {
        let video = FilterGraph::video(vfilter, input.streams(), start_time, format_desc, config)?;
        let audio = FilterGraph::audio(afilter, input.streams(), start_time, format_desc)?;

        let mut caption_tx = None;
        let mut caption_rx = None;
        let caption_stream = video.caption_pairing.map(|pairing| pairing.caption_stream);
        let paired_video = video.caption_pairing.map(|pairing| pairing.video_stream);
        if caption_stream.is_some() {
            let (tx, rx) = bounded::<CaptionPacket>(2);
            caption_tx = Some(tx);
            caption_rx = Some(rx);
        }

        let mut decoders = HashMap::new();
        let mut flushed = HashMap::new();
        for index in video.stream_indexes().into_iter().chain(audio.stream_indexes()) {
            if decoders.contains_key(&index) {
                continue;
            }
            let info = input
                .streams()
                .iter()
                .find(|info| info.index == index)
                .expect("filter references a known stream");
            let captions = if Some(index) == paired_video { caption_rx.take() } else { None };
            decoders.insert(index, Decoder::new(info, config, captions)?);
            flushed.insert(index, false);
        }

        Ok(Pipelines {
            decoders,
            flushed,
            video,
            audio,
            caption_tx,
            caption_stream,
            pending_packet: None,
            eof_pending: false,
        })
    }

    /// Route demuxed packets to decoders and the caption channel. Returns
    /// true when anything moved.
    fn schedule(&mut self, input: &mut Input) -> bool {
        let mut progress = false;

        loop {
            if self.pending_packet.is_none() && !self.eof_pending {
                match input.try_pop() {
                    Some(Some(packet)) => self.pending_packet = Some(packet),
                    Some(None) => {
                        // End-of-stream marker: every decoder needs a flush.
                        self.eof_pending = true;
                        for flag in self.flushed.values_mut() {
                            *flag = false;
                        }
                        progress = true;
                    }
                    None => break,
                }
            }

            if self.eof_pending {
                break;
            }
            let Some(packet) = self.pending_packet.take() else {
                break;
            };

            let index = packet.stream();
            if Some(index) == self.caption_stream {
                if let (Some(tx), Some(data)) = (&self.caption_tx, packet.data()) {
                    let _ = tx.try_send(CaptionPacket {
                        data: data.to_vec(),
                        pts:  packet.pts().unwrap_or(NOPTS),
                    });
                }
                progress = true;
            } else if let Some(decoder) = self.decoders.get(&index) {
                match decoder.push(Some(packet)) {
                    Ok(()) => progress = true,
                    Err(packet) => {
                        // Decoder full: keep the packet and yield.
                        self.pending_packet = packet;
                        break;
                    }
                }
            } else {
                // Stream not referenced by any filter input.
                progress = true;
            }
        }

        if self.eof_pending {
            let mut all_flushed = true;
            for (index, decoder) in &self.decoders {
                let flag = self.flushed.get_mut(index).expect("flush flag exists");
                if !*flag {
                    if decoder.push(None).is_ok() {
                        *flag = true;
                        progress = true;
                    } else {
                        all_flushed = false;
                    }
                }
            }
            if all_flushed {
                self.eof_pending = false;
            }
        }

        progress
    }
}

#[allow(clippy::too_many_arguments)]
fn pump(
    shared: &Arc<Shared>,
    factory: Arc<dyn FrameFactory + Send + Sync>,
    format_desc: &VideoFormatDesc,
    path: &str,
    vfilter: &str,
    afilter: &str,
    first_seek: Option<i64>,
    config: &DecodeConfig,
    tag: Uuid,
) -> Result<()> {
    let mut input = Input::new(path, Arc::clone(&shared.abort))?;

    if let Some(duration) = input.duration() {
        shared.input_duration.store(duration, Ordering::Relaxed);
        let start = shared.start.load(Ordering::Relaxed);
        if shared.duration.load(Ordering::Relaxed) == NOPTS {
            let effective = if start != NOPTS { duration - start } else { duration };
            shared.duration.store(effective, Ordering::Relaxed);
        }
    }

    let input_start_time = input.start_time().unwrap_or(0);

    let seek_to = |input: &mut Input, time: i64| {
        let time = if time == NOPTS { 0 } else { time };
        input.seek(time + input_start_time, true);
    };

    // First position: explicit seek, then in point, then file start.
    let start = shared.start.load(Ordering::Relaxed);
    let first_position = first_seek.or((start != NOPTS).then_some(start));
    let mut filter_start = input_start_time;
    if let Some(position) = first_position {
        seek_to(&mut input, position);
        filter_start = position + input_start_time;
        shared.frame.lock().unwrap().flush = true;
    }

    let mut pipelines =
        Pipelines::reset(&input, vfilter, afilter, filter_start, format_desc, config)?;

    let mut audio_cadence = format_desc.audio_cadence.clone();
    audio_cadence.rotate_right(1);

    let mut frame_count: i64 = 0;
    let mut pair_video: Option<ffmpeg::frame::Video> = None;
    let mut pair_audio: Option<AudioChunk> = None;
    let mut pair_pts: i64 = NOPTS;
    let mut pair_duration: i64 = 0;
    let mut warning_debounce: u32 = 0;

    while !shared.abort.load(Ordering::Relaxed) {
        // Seek requests win over everything else.
        let seek = shared.seek.swap(NOPTS, Ordering::Relaxed);
        if seek != NOPTS {
            seek_to(&mut input, seek);
            pipelines = Pipelines::reset(
                &input,
                vfilter,
                afilter,
                seek + input_start_time,
                format_desc,
                config,
            )?;
            shared.frame.lock().unwrap().flush = true;
            shared.buffer_eof.store(false, Ordering::Relaxed);
            frame_count = 0;
            pair_video = None;
            pair_audio = None;
            pair_pts = NOPTS;
            pair_duration = 0;
            continue;
        }

        // Loop / end-of-clip detection.
        {
            let start = shared.start.load(Ordering::Relaxed);
            let start = if start != NOPTS { start } else { 0 };
            let duration = shared.duration.load(Ordering::Relaxed);
            let end = if duration != NOPTS { start + duration } else { i64::MAX };
            let time = if pair_pts != NOPTS { pair_pts + pair_duration } else { 0 };

            let format_tb = Rational::new(
                format_desc.duration,
                format_desc.time_scale * format_desc.field_count as i32,
            );
            let past_out_point = end != i64::MAX
                && rescale(time, time_base_q(), format_tb) >= rescale(end, time_base_q(), format_tb);
            let at_end =
                (pipelines.video.is_eof() && pipelines.audio.is_eof()) || past_out_point;
            shared.buffer_eof.store(at_end, Ordering::Relaxed);

            if at_end {
                if shared.looping.load(Ordering::Relaxed) && frame_count > 2 {
                    seek_to(&mut input, start);
                    pipelines = Pipelines::reset(
                        &input,
                        vfilter,
                        afilter,
                        start + input_start_time,
                        format_desc,
                        config,
                    )?;
                    shared.buffer_eof.store(false, Ordering::Relaxed);
                    frame_count = 0;
                    pair_video = None;
                    pair_audio = None;
                    pair_pts = NOPTS;
                    pair_duration = 0;
                } else {
                    std::thread::sleep(Duration::from_millis(10));
                }
                continue;
            }
        }

        let mut progress = pipelines.schedule(&mut input);

        if !pipelines.video.has_frame() {
            let Pipelines { video, decoders, .. } = &mut pipelines;
            progress |= video.poll(decoders, None);
        }
        if !pipelines.audio.has_frame() {
            let Pipelines { audio, decoders, .. } = &mut pipelines;
            progress |= audio.poll(decoders, Some(audio_cadence[0]));
        }

        let video_pending = !pipelines.video.has_frame() && !pipelines.video.is_eof();
        let audio_pending = !pipelines.audio.has_frame() && !pipelines.audio.is_eof();
        if video_pending || audio_pending {
            if !progress {
                warning_debounce += 1;
                if warning_debounce % WARN_PERIOD == WARN_DEBOUNCE {
                    if video_pending {
                        log::warn!("[av] {path} waiting for video frame...");
                    } else {
                        log::warn!("[av] {path} waiting for audio frame...");
                    }
                }
                std::thread::sleep(Duration::from_millis(if warning_debounce > 25 {
                    20
                } else {
                    5
                }));
            }
            continue;
        }
        warning_debounce = 0;

        if let Some(FilterFrame::Video(video)) = pipelines.video.take_frame() {
            let tb = pipelines.video.sink_time_base();
            let frame_rate = pipelines.video.sink_frame_rate();
            pair_pts = rescale(video.pts().unwrap_or(0), tb, time_base_q()) - input_start_time;
            pair_duration = if frame_rate.numerator() > 0 {
                rescale(
                    1,
                    Rational::new(frame_rate.denominator(), frame_rate.numerator()),
                    time_base_q(),
                )
            } else {
                0
            };
            pair_video = Some(video);
        }

        if let Some(FilterFrame::Audio(chunk)) = pipelines.audio.take_frame() {
            let sample_tb = Rational::new(1, chunk.sample_rate.max(1));
            let pts = if chunk.pts != NOPTS { chunk.pts } else { 0 };
            pair_pts = rescale(pts, sample_tb, time_base_q()) - input_start_time;
            pair_duration = rescale(chunk.nb_samples() as i64, sample_tb, time_base_q());
            pair_audio = Some(chunk);
        }

        let frame =
            make_frame(tag, factory.as_ref(), pair_video.as_ref(), pair_audio.as_ref()).seal();
        let entry = BufferedFrame {
            frame:       DrawFrame::from_frame(frame),
            pts:         pair_pts,
            duration:    pair_duration,
            frame_count,
        };
        frame_count += 1;

        // Blocking push with backpressure; a seek or abort drops the frame.
        {
            let mut buffer = shared.buffer.lock().unwrap();
            while buffer.len() >= shared.buffer_capacity {
                if shared.abort.load(Ordering::Relaxed)
                    || shared.seek.load(Ordering::Relaxed) != NOPTS
                {
                    break;
                }
                let (guard, _) = shared
                    .buffer_cond
                    .wait_timeout(buffer, Duration::from_millis(100))
                    .unwrap();
                buffer = guard;
            }
            if shared.seek.load(Ordering::Relaxed) == NOPTS
                && !shared.abort.load(Ordering::Relaxed)
                && buffer.len() < shared.buffer_capacity
            {
                buffer.push_back(entry);
            }
        }

        audio_cadence.rotate_right(1);
    }

    Ok(())
}
