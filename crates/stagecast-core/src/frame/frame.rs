// crates/stagecast-core/src/frame/frame.rs
//
// Frame payloads. A MutableFrame is the write-once producer-side builder; it
// becomes an immutable, cheaply-clonable ConstFrame on seal. Plane buffers
// never change after sealing, so aliasing across consumers is safe for the
// duration of a tick and beyond.

use std::sync::Arc;

use uuid::Uuid;

use super::pixel_format::PixelFormatDesc;
use super::side_data::SideData;
use crate::registry::AudioChannelLayout;

/// Fixed mixer channel count. Frames with fewer source channels are
/// zero-padded up to this width.
pub const AUDIO_CHANNELS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ColorSpace {
    Bt601,
    #[default]
    Bt709,
    Bt2020,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ScaleMode {
    #[default]
    Stretch,
    Fit,
    Fill,
    Original,
}

/// How a frame maps onto the channel raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FrameGeometry {
    pub scale_mode: ScaleMode,
}

#[derive(Debug)]
struct FrameInner {
    tag:         Uuid,
    pix_desc:    PixelFormatDesc,
    image_data:  Vec<Vec<u8>>,
    audio_data:  Vec<i32>,
    side_data:   Vec<SideData>,
    geometry:    FrameGeometry,
    color_space: ColorSpace,
    audio_channel_layout: Option<AudioChannelLayout>,
}

// ── Mutable frame ─────────────────────────────────────────────────────────────

/// Producer-side frame under construction. One plane buffer per plane
/// descriptor, allocated zeroed at the descriptor's byte size.
#[derive(Debug)]
pub struct MutableFrame {
    inner: FrameInner,
}

impl MutableFrame {
    pub fn new(tag: Uuid, pix_desc: PixelFormatDesc) -> Self {
        debug_assert!(pix_desc.planes_match_format());
        let image_data = pix_desc.planes.iter().map(|p| vec![0u8; p.size_bytes()]).collect();
        Self {
            inner: FrameInner {
                tag,
                pix_desc,
                image_data,
                audio_data:  Vec::new(),
                side_data:   Vec::new(),
                geometry:    FrameGeometry::default(),
                color_space: ColorSpace::default(),
                audio_channel_layout: None,
            },
        }
    }

    /// An audio-only frame: invalid pixel format, no planes.
    pub fn audio_only(tag: Uuid, audio_data: Vec<i32>, layout: AudioChannelLayout) -> Self {
        let mut frame = Self::new(tag, PixelFormatDesc::invalid());
        frame.inner.audio_data = audio_data;
        frame.inner.audio_channel_layout = Some(layout);
        frame
    }

    pub fn tag(&self) -> Uuid {
        self.inner.tag
    }

    pub fn pixel_format_desc(&self) -> &PixelFormatDesc {
        &self.inner.pix_desc
    }

    pub fn image_data_mut(&mut self, plane: usize) -> &mut [u8] {
        &mut self.inner.image_data[plane]
    }

    /// All plane buffers at once, for callers that fill planes in parallel.
    pub fn image_planes_mut(&mut self) -> &mut [Vec<u8>] {
        &mut self.inner.image_data
    }

    pub fn audio_data_mut(&mut self) -> &mut Vec<i32> {
        &mut self.inner.audio_data
    }

    pub fn side_data_mut(&mut self) -> &mut Vec<SideData> {
        &mut self.inner.side_data
    }

    pub fn set_geometry(&mut self, geometry: FrameGeometry) {
        self.inner.geometry = geometry;
    }

    pub fn set_color_space(&mut self, color_space: ColorSpace) {
        self.inner.color_space = color_space;
    }

    pub fn set_audio_channel_layout(&mut self, layout: AudioChannelLayout) {
        self.inner.audio_channel_layout = Some(layout);
    }

    /// Freeze the frame. After this the contents never change and clones are
    /// reference-counted.
    pub fn seal(self) -> ConstFrame {
        ConstFrame { inner: Arc::new(self.inner) }
    }
}

// ── Const frame ───────────────────────────────────────────────────────────────

/// Shared immutable frame. Equality is identity: two const frames are equal
/// only when they share the same allocation.
#[derive(Clone, Debug)]
pub struct ConstFrame {
    inner: Arc<FrameInner>,
}

impl ConstFrame {
    pub fn tag(&self) -> Uuid {
        self.inner.tag
    }

    pub fn pixel_format_desc(&self) -> &PixelFormatDesc {
        &self.inner.pix_desc
    }

    pub fn image_data(&self, plane: usize) -> &[u8] {
        &self.inner.image_data[plane]
    }

    /// Interleaved signed 32-bit samples, AUDIO_CHANNELS wide.
    pub fn audio_data(&self) -> &[i32] {
        &self.inner.audio_data
    }

    pub fn side_data(&self) -> &[SideData] {
        &self.inner.side_data
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.inner.geometry
    }

    pub fn color_space(&self) -> ColorSpace {
        self.inner.color_space
    }

    /// The layout of the source the audio came from, when the frame carries
    /// audio.
    pub fn audio_channel_layout(&self) -> Option<&AudioChannelLayout> {
        self.inner.audio_channel_layout.as_ref()
    }

    pub fn width(&self) -> usize {
        self.inner.pix_desc.planes.first().map(|p| p.width).unwrap_or(0)
    }

    pub fn height(&self) -> usize {
        self.inner.pix_desc.planes.first().map(|p| p.height).unwrap_or(0)
    }
}

impl PartialEq for ConstFrame {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ConstFrame {}

// ── Frame factory ─────────────────────────────────────────────────────────────

/// Allocates producer frames. The tag identifies the producer instance so an
/// implementation can pool per producer.
pub trait FrameFactory {
    fn create_frame(&self, tag: Uuid, pix_desc: &PixelFormatDesc) -> MutableFrame;
}

/// Plain heap-allocating factory.
#[derive(Default)]
pub struct BufferFrameFactory;

impl FrameFactory for BufferFrameFactory {
    fn create_frame(&self, tag: Uuid, pix_desc: &PixelFormatDesc) -> MutableFrame {
        MutableFrame::new(tag, pix_desc.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::pixel_format::{BitDepth, PixelFormat, PlaneDesc};

    fn bgra_desc(w: usize, h: usize) -> PixelFormatDesc {
        let mut desc = PixelFormatDesc::new(PixelFormat::Bgra);
        desc.planes.push(PlaneDesc::new(w, h, 4, BitDepth::Bit8));
        desc
    }

    #[test]
    fn planes_are_allocated_to_descriptor_size() {
        let frame = MutableFrame::new(Uuid::new_v4(), bgra_desc(16, 9));
        assert_eq!(frame.inner.image_data.len(), 1);
        assert_eq!(frame.inner.image_data[0].len(), 16 * 9 * 4);
    }

    #[test]
    fn sealed_clones_share_the_allocation() {
        let mut frame = MutableFrame::new(Uuid::new_v4(), bgra_desc(2, 2));
        frame.image_data_mut(0)[0] = 0xAA;
        let sealed = frame.seal();
        let copy = sealed.clone();

        assert_eq!(copy.image_data(0)[0], 0xAA);
        assert_eq!(sealed, copy);
    }

    #[test]
    fn distinct_frames_with_equal_content_are_not_equal() {
        let a = MutableFrame::new(Uuid::nil(), bgra_desc(2, 2)).seal();
        let b = MutableFrame::new(Uuid::nil(), bgra_desc(2, 2)).seal();
        assert_ne!(a, b);
    }

    #[test]
    fn audio_only_frame_has_no_planes() {
        let layout = AudioChannelLayout::new(AUDIO_CHANNELS, "16ch", "").unwrap();
        let frame =
            MutableFrame::audio_only(Uuid::nil(), vec![0; AUDIO_CHANNELS * 4], layout).seal();
        assert!(!frame.pixel_format_desc().is_valid());
        assert_eq!(frame.audio_data().len(), AUDIO_CHANNELS * 4);
        assert_eq!(frame.audio_channel_layout().unwrap().num_channels, AUDIO_CHANNELS);
    }
}
