// crates/stagecast-media/src/input.rs
//
// Demuxer stage. A reader thread owns the format context, reads one packet at
// a time and pushes it into a bounded channel — the channel IS the
// backpressure, no sleeps needed. Seeks are requested through a control
// channel and tagged with a generation counter so packets read before the
// seek can be discarded without draining mid-flight ones. An interrupt
// callback wired into the demuxer aborts blocking I/O cooperatively.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::Packet;

use crate::util::{stream_info, StreamInfo, NOPTS};

/// Packet queue capacity; the reader blocks when the consumer falls behind.
const PACKET_CAPACITY: usize = 64;

pub struct PacketMsg {
    pub generation: u64,
    /// `None` marks end of stream.
    pub packet: Option<Packet>,
}

enum Control {
    Seek { ts: i64, generation: u64 },
}

struct OpenInfo {
    streams:    Vec<StreamInfo>,
    start_time: i64,
    duration:   i64,
}

struct ReaderShared {
    abort:  Arc<AtomicBool>,
    closed: AtomicBool,
    paused: AtomicBool,
    eof:    AtomicBool,
}

pub struct Input {
    packets:  Receiver<PacketMsg>,
    control:  Sender<Control>,
    shared:   Arc<ReaderShared>,
    streams:  Vec<StreamInfo>,
    start_time: Option<i64>,
    duration:   Option<i64>,
    expected_generation: u64,
    reader: Option<std::thread::JoinHandle<()>>,
}

// The interrupt callback makes the demuxer poll this flag during blocking
// I/O; returning 1 aborts the operation.
unsafe extern "C" fn interrupt_cb(opaque: *mut std::ffi::c_void) -> i32 {
    let shared = unsafe { &*(opaque as *const ReaderShared) };
    if shared.abort.load(Ordering::Relaxed) || shared.closed.load(Ordering::Relaxed) {
        1
    } else {
        0
    }
}

impl Input {
    pub fn new(path: &str, abort: Arc<AtomicBool>) -> Result<Input> {
        let (packet_tx, packet_rx) = bounded::<PacketMsg>(PACKET_CAPACITY);
        let (control_tx, control_rx) = bounded::<Control>(4);
        let (open_tx, open_rx) = bounded::<Result<OpenInfo>>(1);

        let shared = Arc::new(ReaderShared {
            abort,
            closed: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            eof:    AtomicBool::new(false),
        });

        let reader_shared = Arc::clone(&shared);
        let reader_path = path.to_string();
        let reader = std::thread::Builder::new()
            .name("stagecast-input".into())
            .spawn(move || {
                reader_thread(reader_path, reader_shared, packet_tx, control_rx, open_tx);
            })
            .context("spawning input reader")?;

        let info = open_rx
            .recv()
            .context("input reader died before opening")??;

        Ok(Input {
            packets: packet_rx,
            control: control_tx,
            shared,
            streams: info.streams,
            start_time: (info.start_time != NOPTS).then_some(info.start_time),
            duration: (info.duration != NOPTS).then_some(info.duration),
            expected_generation: 0,
            reader: Some(reader),
        })
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    /// Container start time in AV_TIME_BASE units.
    pub fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    /// Container duration in AV_TIME_BASE units.
    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    pub fn eof(&self) -> bool {
        self.shared.eof.load(Ordering::Relaxed)
    }

    pub fn paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::Relaxed);
    }

    /// Request a seek to `ts` (AV_TIME_BASE units). With `flush`, packets
    /// read before the seek are discarded by generation.
    pub fn seek(&mut self, ts: i64, flush: bool) {
        if flush {
            self.expected_generation += 1;
        }
        let _ = self.control.send(Control::Seek {
            ts,
            generation: self.expected_generation,
        });
    }

    /// Pop the next packet if one is ready. Outer `None`: nothing available.
    /// Inner `None`: end-of-stream marker.
    pub fn try_pop(&mut self) -> Option<Option<Packet>> {
        loop {
            let msg = self.packets.try_recv().ok()?;
            if msg.generation == self.expected_generation {
                return Some(msg.packet);
            }
            // Pre-seek packet; drop and keep draining.
        }
    }
}

impl Drop for Input {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Relaxed);
        // Unblock the reader: drop our control sender and drain its queue.
        while self.packets.try_recv().is_ok() {}
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn reader_thread(
    path: String,
    shared: Arc<ReaderShared>,
    packets: Sender<PacketMsg>,
    control: Receiver<Control>,
    open_tx: Sender<Result<OpenInfo>>,
) {
    let mut ictx = match ffmpeg::format::input(&path).with_context(|| format!("opening {path}")) {
        Ok(ictx) => ictx,
        Err(error) => {
            let _ = open_tx.send(Err(error));
            return;
        }
    };

    unsafe {
        (*ictx.as_mut_ptr()).interrupt_callback = ffmpeg::ffi::AVIOInterruptCB {
            callback: Some(interrupt_cb),
            opaque:   Arc::as_ptr(&shared) as *mut std::ffi::c_void,
        };
    }

    let info = OpenInfo {
        streams:    ictx.streams().map(|stream| stream_info(&stream)).collect(),
        start_time: unsafe { (*ictx.as_ptr()).start_time },
        duration:   unsafe { (*ictx.as_ptr()).duration },
    };
    if open_tx.send(Ok(info)).is_err() {
        return;
    }

    let mut generation = 0u64;

    let aborted = |shared: &ReaderShared| {
        shared.abort.load(Ordering::Relaxed) || shared.closed.load(Ordering::Relaxed)
    };

    loop {
        if aborted(&shared) {
            break;
        }

        // Apply any pending seeks before the next read.
        loop {
            match control.try_recv() {
                Ok(Control::Seek { ts, generation: new_generation }) => {
                    if let Err(error) = ictx.seek(ts, ..=ts) {
                        log::warn!("[input] {path} seek failed: {error}");
                    }
                    shared.eof.store(false, Ordering::Relaxed);
                    generation = new_generation;
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => return,
            }
        }

        if shared.paused.load(Ordering::Relaxed) || shared.eof.load(Ordering::Relaxed) {
            // Idle until a seek or shutdown wakes us.
            match control.recv_timeout(Duration::from_millis(10)) {
                Ok(Control::Seek { ts, generation: new_generation }) => {
                    if let Err(error) = ictx.seek(ts, ..=ts) {
                        log::warn!("[input] {path} seek failed: {error}");
                    }
                    shared.eof.store(false, Ordering::Relaxed);
                    generation = new_generation;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
            continue;
        }

        let msg = match ictx.packets().next() {
            Some(Ok((_stream, packet))) => PacketMsg { generation, packet: Some(packet) },
            Some(Err(ffmpeg::Error::Eof)) | None => {
                shared.eof.store(true, Ordering::Relaxed);
                PacketMsg { generation, packet: None }
            }
            Some(Err(ffmpeg::Error::Exit)) => break,
            Some(Err(error)) => {
                log::error!("[input] {path} read failed: {error}");
                shared.eof.store(true, Ordering::Relaxed);
                PacketMsg { generation, packet: None }
            }
        };

        // Blocking send with abort checks; the bounded queue is the
        // backpressure toward the demuxer.
        let mut msg = Some(msg);
        while let Some(pending) = msg.take() {
            match packets.send_timeout(pending, Duration::from_millis(100)) {
                Ok(()) => {}
                Err(crossbeam_channel::SendTimeoutError::Timeout(pending)) => {
                    if aborted(&shared) {
                        return;
                    }
                    msg = Some(pending);
                }
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_fails_at_open() {
        let _ = env_logger::builder().is_test(true).try_init();

        let abort = Arc::new(AtomicBool::new(false));
        let result = Input::new("/nonexistent/stagecast-test.mov", abort);
        assert!(result.is_err());
    }
}
