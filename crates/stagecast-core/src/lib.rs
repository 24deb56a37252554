// crates/stagecast-core/src/lib.rs
//
// StageCast core: frame model, draw-frame composition, reactive bindings,
// scene and framerate producers, registries. No FFmpeg types cross this
// crate's boundary — stagecast-media produces these frames from decoded
// media.

pub mod binding;
pub mod consumer;
pub mod error;
pub mod expression;
pub mod format;
pub mod frame;
pub mod framerate;
pub mod interaction;
pub mod producer;
pub mod registry;
pub mod scene;
pub mod tween;
pub mod variable;

pub use binding::{delay, when, Binding};
pub use consumer::Consumer;
pub use error::{BindingError, CoreError};
pub use format::{VideoField, VideoFormat, VideoFormatDesc};
pub use frame::{ConstFrame, DrawFrame, FrameFactory, FrameTransform, MutableFrame};
pub use framerate::FramerateProducer;
pub use interaction::{InteractionAggregator, InteractionEvent};
pub use producer::{producer_handle, Constraints, Producer, ProducerHandle};
pub use registry::{
    AudioChannelLayout, AudioChannelLayoutRepository, AudioMixConfigRepository, HelpRepository,
};
pub use scene::SceneProducer;
pub use tween::Tweener;
pub use variable::Variable;
