// crates/stagecast-core/src/frame/side_data.rs
//
// Out-of-band per-frame metadata. Side-data records are shared immutable
// blobs compared by identity; the queue is a bounded ring that hands out
// monotonic positions so draw frames can reference mixed side-data without
// copying it. Mixing rules differ from pixel/audio data: a record marked
// include_on_duplicate_frames=false must not re-appear when the frame that
// carried it is duplicated (still frames).

use std::sync::{Arc, Mutex};

use crate::frame::draw_frame::FrameVisitor;
use crate::frame::frame::ConstFrame;
use crate::frame::transform::{FrameTransform, SideDataTransform};

// ── Records ───────────────────────────────────────────────────────────────────

/// Side-data payload kind, mirroring the subset of demuxer side-data the
/// pipeline understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SideDataType {
    /// ATSC A/53 Part 4 closed captions.
    A53Cc,
}

impl SideDataType {
    /// Whether a record of this type should be emitted again when its frame
    /// is shown a second time. Captions are a byte stream: replaying them
    /// corrupts the decoder state downstream.
    pub fn include_on_duplicate_frames(self) -> bool {
        match self {
            SideDataType::A53Cc => false,
        }
    }
}

#[derive(Debug)]
struct SideDataInner {
    kind: SideDataType,
    data: Vec<u8>,
}

/// Shared immutable side-data record. Cloning is reference counted; equality
/// and ordering are by identity, which is what the duplicate-suppression in
/// the mixer keys on.
#[derive(Clone, Debug)]
pub struct SideData {
    inner: Arc<SideDataInner>,
}

impl SideData {
    pub fn new(kind: SideDataType, data: Vec<u8>) -> Self {
        Self { inner: Arc::new(SideDataInner { kind, data }) }
    }

    pub fn kind(&self) -> SideDataType {
        self.inner.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl PartialEq for SideData {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SideData {}

impl std::hash::Hash for SideData {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

// ── Queue ─────────────────────────────────────────────────────────────────────

/// Ring capacity. Positions older than `end - MAX_FRAMES` are evicted.
pub const MAX_FRAMES: usize = 512;

/// Position handed out by `add_frame`; strictly monotonic over the queue's
/// lifetime.
pub type Position = u64;

#[derive(Default)]
struct QueueState {
    next_pos: Position,
    slots:    Vec<Vec<SideData>>,
}

/// Thread-safe bounded ring of per-frame side-data lists. The lock is held
/// only for slot bookkeeping; producers call once per output frame so
/// contention is negligible.
#[derive(Default)]
pub struct SideDataQueue {
    state: Mutex<QueueState>,
}

impl SideDataQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one frame's side-data and return its position. When the ring is
    /// full the oldest position is evicted by bumping the start of the valid
    /// range.
    pub fn add_frame(&self, side_data: Vec<SideData>) -> Position {
        let mut state = self.state.lock().unwrap();
        let pos = state.next_pos;
        state.next_pos += 1;

        let index = (pos % MAX_FRAMES as u64) as usize;
        if state.slots.len() <= index {
            state.slots.resize_with(index + 1, Vec::new);
        }
        state.slots[index] = side_data;
        pos
    }

    pub fn get(&self, pos: Position) -> Option<Vec<SideData>> {
        let state = self.state.lock().unwrap();
        let (start, end) = Self::range_locked(&state);
        if pos >= start && pos < end {
            Some(state.slots[(pos % MAX_FRAMES as u64) as usize].clone())
        } else {
            None
        }
    }

    /// Positions in `start..end` are retrievable. `end - start <= MAX_FRAMES`.
    pub fn valid_position_range(&self) -> (Position, Position) {
        let state = self.state.lock().unwrap();
        Self::range_locked(&state)
    }

    fn range_locked(state: &QueueState) -> (Position, Position) {
        if state.next_pos > MAX_FRAMES as u64 {
            (state.next_pos - MAX_FRAMES as u64, state.next_pos)
        } else {
            (0, state.next_pos)
        }
    }
}

/// A mixed frame's side-data reference: position plus the queue it lives in.
/// Duplicating the frame duplicates the reference, never the records.
#[derive(Clone)]
pub struct SideDataInQueue {
    pub pos:   Position,
    pub queue: Arc<SideDataQueue>,
}

impl SideDataInQueue {
    pub fn get(&self) -> Option<Vec<SideData>> {
        self.queue.get(self.pos)
    }
}

// ── Mixer ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SideDataDedup {
    last: std::collections::HashSet<SideData>,
    cur:  std::collections::HashSet<SideData>,
}

impl SideDataDedup {
    fn next_frame(&mut self) {
        self.last.clear();
        std::mem::swap(&mut self.last, &mut self.cur);
    }

    /// Records the datum as seen this frame; true when it was already seen
    /// this frame or on the previous one.
    fn is_duplicate_and_add(&mut self, side_data: &SideData) -> bool {
        if !self.cur.insert(side_data.clone()) {
            return true;
        }
        self.last.contains(side_data)
    }
}

/// Visitor that collects side-data from the leaves of a draw-frame tree and
/// registers the mixed result in a shared queue.
///
/// A single source may contribute several A53-CC records per frame, but two
/// simultaneous sources may not: the first source wins and the collision is
/// logged once per mix.
pub struct SideDataMixer {
    transform_stack: Vec<SideDataTransform>,
    items:           Vec<(SideDataTransform, ConstFrame)>,
    dedup:           SideDataDedup,
    queue:           Arc<SideDataQueue>,
}

impl SideDataMixer {
    pub fn new(queue: Arc<SideDataQueue>) -> Self {
        Self {
            transform_stack: vec![SideDataTransform::default()],
            items:           Vec::new(),
            dedup:           SideDataDedup::default(),
            queue,
        }
    }

    /// Mix the side-data visited since the last call and push it into the
    /// queue, returning the frame's reference.
    pub fn mixed(&mut self) -> SideDataInQueue {
        let mut mixed = Vec::new();

        let mut has_cc_source = false;
        for (transform, frame) in self.items.drain(..) {
            let mut frame_has_cc = false;
            for side_data in frame.side_data() {
                if !side_data.kind().include_on_duplicate_frames()
                    && self.dedup.is_duplicate_and_add(side_data)
                {
                    continue;
                }
                match side_data.kind() {
                    SideDataType::A53Cc => {
                        if transform.use_closed_captions {
                            frame_has_cc = true;
                            if has_cc_source {
                                log::warn!("[side-data] multiple simultaneous a53-cc sources, dropping extra");
                            } else {
                                mixed.push(side_data.clone());
                            }
                        }
                    }
                }
            }
            has_cc_source |= frame_has_cc;
        }

        self.dedup.next_frame();

        let pos = self.queue.add_frame(mixed);
        SideDataInQueue { pos, queue: Arc::clone(&self.queue) }
    }
}

impl FrameVisitor for SideDataMixer {
    fn push(&mut self, transform: &FrameTransform) {
        let top = *self.transform_stack.last().unwrap();
        self.transform_stack.push(top * transform.side_data);
    }

    fn visit(&mut self, frame: &ConstFrame) {
        let top = self.transform_stack.last().unwrap();
        if top.use_closed_captions && !frame.side_data().is_empty() {
            self.items.push((*top, frame.clone()));
        }
    }

    fn pop(&mut self) {
        self.transform_stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::draw_frame::DrawFrame;
    use crate::frame::frame::MutableFrame;
    use crate::frame::pixel_format::PixelFormatDesc;
    use uuid::Uuid;

    #[test]
    fn positions_are_monotonic_and_bounded() {
        let queue = SideDataQueue::new();
        for i in 0..600u64 {
            assert_eq!(queue.add_frame(Vec::new()), i);
        }
        let (start, end) = queue.valid_position_range();
        assert_eq!((start, end), (600 - MAX_FRAMES as u64, 600));
        assert!(end - start <= MAX_FRAMES as u64);
    }

    #[test]
    fn range_before_wraparound_starts_at_zero() {
        let queue = SideDataQueue::new();
        for _ in 0..100 {
            queue.add_frame(Vec::new());
        }
        assert_eq!(queue.valid_position_range(), (0, 100));
    }

    #[test]
    fn evicted_positions_are_gone() {
        let queue = SideDataQueue::new();
        let datum = SideData::new(SideDataType::A53Cc, vec![0xAA]);
        let first = queue.add_frame(vec![datum.clone()]);
        for _ in 0..MAX_FRAMES {
            queue.add_frame(Vec::new());
        }
        assert!(queue.get(first).is_none());
        let (start, _) = queue.valid_position_range();
        assert_eq!(start, first + 1);
    }

    #[test]
    fn get_returns_the_stored_records() {
        let queue = SideDataQueue::new();
        let datum = SideData::new(SideDataType::A53Cc, vec![1, 2, 3]);
        let pos = queue.add_frame(vec![datum.clone()]);
        let got = queue.get(pos).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], datum);
        assert_eq!(got[0].data(), &[1, 2, 3]);
    }

    fn frame_with_cc(bytes: Vec<u8>) -> ConstFrame {
        let mut frame = MutableFrame::new(Uuid::new_v4(), PixelFormatDesc::invalid());
        frame.side_data_mut().push(SideData::new(SideDataType::A53Cc, bytes));
        frame.seal()
    }

    #[test]
    fn still_duplicate_suppresses_captions_on_second_mix() {
        let queue = Arc::new(SideDataQueue::new());
        let mut mixer = SideDataMixer::new(Arc::clone(&queue));

        let frame = frame_with_cc(vec![0xAA]);
        let draw = DrawFrame::from_frame(frame);

        draw.accept(&mut mixer);
        let first = mixer.mixed();
        assert_eq!(first.get().unwrap().len(), 1);

        // Same leaf rendered again via still: identical record identity.
        DrawFrame::still(&draw).accept(&mut mixer);
        let second = mixer.mixed();
        assert!(second.get().unwrap().is_empty());
    }

    #[test]
    fn captions_disabled_by_transform_are_dropped() {
        let queue = Arc::new(SideDataQueue::new());
        let mut mixer = SideDataMixer::new(Arc::clone(&queue));

        let mut draw = DrawFrame::from_frame(frame_with_cc(vec![0x01]));
        draw.transform_mut().side_data.use_closed_captions = false;

        draw.accept(&mut mixer);
        assert!(mixer.mixed().get().unwrap().is_empty());
    }

    #[test]
    fn only_one_cc_source_survives_a_mix() {
        let queue = Arc::new(SideDataQueue::new());
        let mut mixer = SideDataMixer::new(Arc::clone(&queue));

        let a = DrawFrame::from_frame(frame_with_cc(vec![0x01]));
        let b = DrawFrame::from_frame(frame_with_cc(vec![0x02]));
        DrawFrame::over(&a, &b).accept(&mut mixer);

        let mixed = mixer.mixed().get().unwrap();
        assert_eq!(mixed.len(), 1);
        assert_eq!(mixed[0].data(), &[0x01]);
    }
}
