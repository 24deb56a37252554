// crates/stagecast-core/src/frame/mod.rs
//
// The frame model: pixel formats, immutable frame payloads, compositional
// transforms, side-data, and the draw-frame tree.

pub mod draw_frame;
#[allow(clippy::module_inception)]
pub mod frame;
pub mod pixel_format;
pub mod side_data;
pub mod transform;

pub use draw_frame::{flatten, DrawFrame, Flattener, FrameVisitor};
pub use frame::{
    BufferFrameFactory, ColorSpace, ConstFrame, FrameFactory, FrameGeometry, MutableFrame,
    ScaleMode, AUDIO_CHANNELS,
};
pub use pixel_format::{BitDepth, PixelFormat, PixelFormatDesc, PlaneDesc};
pub use side_data::{
    Position, SideData, SideDataInQueue, SideDataMixer, SideDataQueue, SideDataType, MAX_FRAMES,
};
pub use transform::{
    AudioTransform, FieldMode, FrameTransform, ImageTransform, Levels, SideDataTransform,
    TweenedTransform, EPSILON,
};
