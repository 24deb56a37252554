// crates/stagecast-media/src/decode.rs
//
// Per-stream decoder stage. One worker per stream, created lazily when a
// filter input references that stream; bounded channels on both sides give
// backpressure toward the demuxer and toward the filters. At end of input the
// codec is flushed and a sentinel carrying the synthesized next pts is
// emitted so downstream filter graphs can drain cleanly.
//
// EIA-608 "streams" are decoded trivially: each packet's payload becomes
// A53-CC side data on a 1×1 video frame, and the video decoder can consume a
// paired caption receiver so captions ride their video frame.

use anyhow::Result;
use crossbeam_channel::{bounded, Receiver, Sender};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec;
use ffmpeg::format::Pixel;
use ffmpeg::frame;
use ffmpeg::Packet;
use ffmpeg::Rational;

use crate::config::DecodeConfig;
use crate::util::{parameters_from_info, set_a53_side_data, StreamInfo, StreamKind, NOPTS, TIME_BASE};

const INPUT_CAPACITY: usize = 256;
const OUTPUT_CAPACITY: usize = 8;

/// One decoded item leaving a stream's worker.
pub enum Decoded {
    Video(frame::Video),
    Audio(frame::Audio),
    /// End of stream; `pts` is where the next frame would have started.
    Eof { pts: i64 },
}

/// EIA-608 packet payload routed to the video decoder.
pub struct CaptionPacket {
    pub data: Vec<u8>,
    pub pts:  i64,
}

pub struct Decoder {
    input_tx:  Option<Sender<Option<Packet>>>,
    output_rx: Option<Receiver<Decoded>>,
    worker:    Option<std::thread::JoinHandle<()>>,
}

impl Decoder {
    /// Spawn a decoder for `info`. `captions` pairs an EIA-608 receiver with
    /// a video stream.
    pub fn new(
        info: &StreamInfo,
        config: &DecodeConfig,
        captions: Option<Receiver<CaptionPacket>>,
    ) -> Result<Decoder> {
        let (input_tx, input_rx) = bounded::<Option<Packet>>(INPUT_CAPACITY);
        let (output_tx, output_rx) = bounded::<Decoded>(OUTPUT_CAPACITY);

        let info = info.clone();
        let config = config.clone();
        let worker = std::thread::Builder::new()
            .name(format!("stagecast-decode-{}", info.index))
            .spawn(move || match info.kind {
                StreamKind::Eia608 => eia608_worker(&info, input_rx, output_tx),
                _ => {
                    if let Err(error) = decode_worker(&info, &config, captions, input_rx, output_tx)
                    {
                        log::error!("[decode] stream {}: {error:#}", info.index);
                    }
                }
            })?;

        Ok(Decoder {
            input_tx:  Some(input_tx),
            output_rx: Some(output_rx),
            worker:    Some(worker),
        })
    }

    pub fn want_packet(&self) -> bool {
        self.input_tx.as_ref().is_some_and(|tx| !tx.is_full())
    }

    /// Queue a packet (`None` = end of input). When the input queue is full
    /// the message is handed back so the caller can retry.
    pub fn push(&self, packet: Option<Packet>) -> Result<(), Option<Packet>> {
        let Some(tx) = self.input_tx.as_ref() else {
            return Ok(());
        };
        match tx.try_send(packet) {
            Ok(()) => Ok(()),
            Err(crossbeam_channel::TrySendError::Full(packet)) => Err(packet),
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => Ok(()),
        }
    }

    pub fn try_pop(&self) -> Option<Decoded> {
        self.output_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        // Disconnect both channels so the worker's recv/send return, then
        // join it.
        self.input_tx = None;
        if let Some(output_rx) = self.output_rx.take() {
            while output_rx.try_recv().is_ok() {}
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ── Codec worker ──────────────────────────────────────────────────────────────

enum Opened {
    Video(codec::decoder::Video),
    Audio(codec::decoder::Audio),
}

impl Opened {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), ffmpeg::Error> {
        match self {
            Opened::Video(decoder) => decoder.send_packet(packet),
            Opened::Audio(decoder) => decoder.send_packet(packet),
        }
    }

    fn send_eof(&mut self) -> Result<(), ffmpeg::Error> {
        match self {
            Opened::Video(decoder) => decoder.send_eof(),
            Opened::Audio(decoder) => decoder.send_eof(),
        }
    }

    fn flush(&mut self) {
        match self {
            Opened::Video(decoder) => decoder.flush(),
            Opened::Audio(decoder) => decoder.flush(),
        }
    }
}

fn decode_worker(
    info: &StreamInfo,
    config: &DecodeConfig,
    captions: Option<Receiver<CaptionPacket>>,
    input_rx: Receiver<Option<Packet>>,
    output_tx: Sender<Decoded>,
) -> Result<()> {
    let parameters = parameters_from_info(info);
    let mut context = codec::context::Context::from_parameters(parameters)?;

    unsafe {
        let ctx = &mut *context.as_mut_ptr();
        ctx.pkt_timebase = ffmpeg::ffi::AVRational {
            num: info.time_base.0,
            den: info.time_base.1,
        };
        ctx.thread_count = config.threads;
        if info.kind == StreamKind::Video {
            ctx.framerate = ffmpeg::ffi::AVRational {
                num: info.framerate.0,
                den: info.framerate.1,
            };
            ctx.sample_aspect_ratio = ffmpeg::ffi::AVRational {
                num: info.sample_aspect_ratio.0,
                den: info.sample_aspect_ratio.1,
            };
        }
    }

    let mut decoder = match info.kind {
        StreamKind::Video => Opened::Video(context.decoder().video()?),
        _ => Opened::Audio(context.decoder().audio()?),
    };

    let stream_tb = info.time_base_q();
    let mut next_pts = NOPTS;

    for message in input_rx.iter() {
        match message {
            Some(packet) => {
                if let Err(error) = decoder.send_packet(&packet) {
                    // Recoverable decode errors stay local to this stream;
                    // the next packet gets a fresh attempt.
                    log::warn!("[decode] stream {} dropped a packet: {error}", info.index);
                    continue;
                }
                if !drain_frames(info, &mut decoder, &captions, &output_tx, stream_tb, &mut next_pts) {
                    return Ok(());
                }
            }
            None => {
                let _ = decoder.send_eof();
                if !drain_frames(info, &mut decoder, &captions, &output_tx, stream_tb, &mut next_pts) {
                    return Ok(());
                }
                decoder.flush();
                if output_tx.send(Decoded::Eof { pts: next_pts }).is_err() {
                    return Ok(());
                }
                next_pts = NOPTS;
            }
        }
    }
    Ok(())
}

/// Receive every frame the codec has ready. Returns false when the consumer
/// went away.
fn drain_frames(
    info: &StreamInfo,
    decoder: &mut Opened,
    captions: &Option<Receiver<CaptionPacket>>,
    output_tx: &Sender<Decoded>,
    stream_tb: Rational,
    next_pts: &mut i64,
) -> bool {
    loop {
        let decoded = match decoder {
            Opened::Video(video_decoder) => {
                let mut frame = frame::Video::empty();
                match video_decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        finish_frame(&mut frame, info, stream_tb, next_pts);
                        if let Some(captions) = captions {
                            if let Ok(caption) = captions.try_recv() {
                                set_a53_side_data(&mut frame, &caption.data);
                            }
                        }
                        Decoded::Video(frame)
                    }
                    Err(error) => return handle_receive_error(info, error),
                }
            }
            Opened::Audio(audio_decoder) => {
                let mut frame = frame::Audio::empty();
                match audio_decoder.receive_frame(&mut frame) {
                    Ok(()) => {
                        finish_frame(&mut frame, info, stream_tb, next_pts);
                        Decoded::Audio(frame)
                    }
                    Err(error) => return handle_receive_error(info, error),
                }
            }
        };

        // Blocking send: the bounded output is the backpressure.
        if output_tx.send(decoded).is_err() {
            return false;
        }
    }
}

fn handle_receive_error(info: &StreamInfo, error: ffmpeg::Error) -> bool {
    match error {
        ffmpeg::Error::Other { errno: ffmpeg::error::EAGAIN } => true,
        ffmpeg::Error::Eof => true,
        other => {
            log::warn!("[decode] stream {} receive failed: {other}", info.index);
            true
        }
    }
}

/// Assign best-effort pts and a usable duration, tracking where the next
/// frame starts so the EOF sentinel can carry it.
fn finish_frame<F>(frame: &mut F, info: &StreamInfo, stream_tb: Rational, next_pts: &mut i64)
where
    F: std::ops::DerefMut<Target = frame::Frame>,
{
    let pts = frame.timestamp().unwrap_or(NOPTS);
    frame.set_pts(if pts == NOPTS { None } else { Some(pts) });

    let mut duration = unsafe { (*frame.as_ptr()).duration };
    if duration <= 0 {
        duration = match info.kind {
            StreamKind::Audio => {
                let nb_samples = unsafe { (*frame.as_ptr()).nb_samples };
                crate::util::rescale(
                    nb_samples as i64,
                    Rational::new(1, info.sample_rate.max(1)),
                    stream_tb,
                )
            }
            _ => {
                let (num, den) = info.framerate;
                if num > 0 && den > 0 {
                    let duration_q =
                        TIME_BASE as i64 * den as i64 / num as i64;
                    crate::util::rescale(duration_q, Rational::new(1, TIME_BASE), stream_tb)
                } else {
                    0
                }
            }
        };
    }

    *next_pts = if pts != NOPTS && duration > 0 { pts + duration } else { NOPTS };
}

// ── EIA-608 worker ────────────────────────────────────────────────────────────

/// Caption packets decode to 1×1 frames whose only payload is A53-CC side
/// data; the filter's fake video source carries them when no real video
/// stream exists.
fn eia608_worker(
    _info: &StreamInfo,
    input_rx: Receiver<Option<Packet>>,
    output_tx: Sender<Decoded>,
) {
    let mut next_pts = NOPTS;

    for message in input_rx.iter() {
        match message {
            Some(packet) => {
                let Some(data) = packet.data() else { continue };

                let mut frame = frame::Video::new(Pixel::GRAY8, 1, 1);
                let pts = packet.pts().unwrap_or(NOPTS);
                frame.set_pts(if pts == NOPTS { None } else { Some(pts) });
                set_a53_side_data(&mut frame, data);

                let duration = packet.duration();
                if pts != NOPTS && duration > 0 {
                    next_pts = pts + duration;
                }

                if output_tx.send(Decoded::Video(frame)).is_err() {
                    return;
                }
            }
            None => {
                if output_tx.send(Decoded::Eof { pts: next_pts }).is_err() {
                    return;
                }
                next_pts = NOPTS;
            }
        }
    }
}
