// crates/stagecast-core/src/producer.rs
//
// The producer seam. Anything that can emit draw-frames at channel cadence is
// a Producer: media decode pipelines, scenes, framerate adapters, stills.
// Producers are thread-confined trait objects; pipelines that need worker
// threads own them internally and expose this synchronous surface.

use std::cell::RefCell;
use std::rc::Rc;

use crate::binding::Binding;
use crate::error::CoreError;
use crate::frame::DrawFrame;
use crate::interaction::InteractionEvent;

/// Reactive pixel dimensions of a producer's output. Scenes bind layer
/// geometry to these, so a producer resizing mid-run propagates.
#[derive(Clone)]
pub struct Constraints {
    pub width:  Binding<f64>,
    pub height: Binding<f64>,
}

impl Constraints {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width: Binding::new(width), height: Binding::new(height) }
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

pub trait Producer {
    /// Produce the next draw-frame. `nb_samples` is the audio sample count
    /// the caller needs for this frame (the current cadence entry).
    fn receive(&mut self, nb_samples: usize) -> DrawFrame;

    /// A still of the most recently produced frame.
    fn last_frame(&mut self) -> DrawFrame {
        DrawFrame::empty()
    }

    /// Total frame count, `u32::MAX` when unbounded/unknown.
    fn nb_frames(&self) -> u32 {
        u32::MAX
    }

    fn frame_number(&self) -> u32 {
        0
    }

    /// Producer-specific control calls. The empty string signals success.
    fn call(&mut self, _params: &[String]) -> Result<String, CoreError> {
        Err(CoreError::User("producer does not support calls".into()))
    }

    fn pixel_constraints(&self) -> &Constraints;

    /// Hit test in the producer's local [0,1]×[0,1] space.
    fn collides(&self, _x: f64, _y: f64) -> bool {
        false
    }

    fn on_interaction(&mut self, _event: &InteractionEvent) {}

    fn name(&self) -> &str;

    fn print(&self) -> String {
        self.name().to_string()
    }

    /// Key→value tree for monitoring.
    fn state(&self) -> serde_json::Value {
        serde_json::json!({})
    }

    /// Whether `receive` would return real content right now.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Shared producer handle; scenes hand these to the interaction router.
pub type ProducerHandle = Rc<RefCell<dyn Producer>>;

pub fn producer_handle(producer: impl Producer + 'static) -> ProducerHandle {
    Rc::new(RefCell::new(producer))
}

// ── Empty producer ────────────────────────────────────────────────────────────

/// Placeholder producer: renders nothing, forever.
pub struct EmptyProducer {
    constraints: Constraints,
}

impl Default for EmptyProducer {
    fn default() -> Self {
        Self { constraints: Constraints::default() }
    }
}

impl Producer for EmptyProducer {
    fn receive(&mut self, _nb_samples: usize) -> DrawFrame {
        DrawFrame::empty()
    }

    fn nb_frames(&self) -> u32 {
        0
    }

    fn pixel_constraints(&self) -> &Constraints {
        &self.constraints
    }

    fn name(&self) -> &str {
        "empty"
    }
}

// ── Const producer ────────────────────────────────────────────────────────────

/// Emits the same frame every tick. Used for stills and color layers; state
/// observers have nothing to observe, so there is no subscription hook.
pub struct ConstProducer {
    frame:       DrawFrame,
    constraints: Constraints,
}

impl ConstProducer {
    pub fn new(frame: DrawFrame, width: f64, height: f64) -> Self {
        Self { frame, constraints: Constraints::new(width, height) }
    }
}

impl Producer for ConstProducer {
    fn receive(&mut self, _nb_samples: usize) -> DrawFrame {
        self.frame.clone()
    }

    fn last_frame(&mut self) -> DrawFrame {
        self.frame.clone()
    }

    fn pixel_constraints(&self) -> &Constraints {
        &self.constraints
    }

    fn collides(&self, x: f64, y: f64) -> bool {
        (0.0..=1.0).contains(&x) && (0.0..=1.0).contains(&y)
    }

    fn name(&self) -> &str {
        "const"
    }

    fn state(&self) -> serde_json::Value {
        serde_json::json!({ "type": "const" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{MutableFrame, PixelFormatDesc};
    use uuid::Uuid;

    #[test]
    fn empty_producer_always_renders_nothing() {
        let mut producer = EmptyProducer::default();
        assert!(producer.receive(1602).is_empty());
        assert_eq!(producer.nb_frames(), 0);
    }

    #[test]
    fn const_producer_repeats_its_frame() {
        let frame = DrawFrame::from_frame(
            MutableFrame::new(Uuid::new_v4(), PixelFormatDesc::invalid()).seal(),
        );
        let mut producer = ConstProducer::new(frame.clone(), 640.0, 360.0);

        assert_eq!(producer.receive(800), frame);
        assert_eq!(producer.receive(800), frame);
        assert_eq!(producer.pixel_constraints().width.get(), 640.0);
    }
}
