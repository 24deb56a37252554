// crates/stagecast-core/src/interaction.rs
//
// Pointer events routed into the scene tree. Events are buffered and
// coalesced (consecutive moves collapse into the latest), resolved to a
// target through a collision detector, and translated through the inverse of
// the target layer's fill transform so producers always see positions in
// their own [0,1]×[0,1] space. While any button is held the initial target
// stays captured until the last button is released.

use std::collections::VecDeque;

use crate::frame::transform::FrameTransform;
use crate::producer::ProducerHandle;

/// Pointer event in channel space (both axes normalized to [0,1]).
#[derive(Clone, Debug, PartialEq)]
pub enum InteractionEvent {
    MouseMove {
        source_id: i32,
        x: f64,
        y: f64,
    },
    MouseButton {
        source_id: i32,
        x: f64,
        y: f64,
        button: i32,
        pressed: bool,
    },
    MouseWheel {
        source_id: i32,
        x: f64,
        y: f64,
        ticks_delta: i32,
    },
}

impl InteractionEvent {
    pub fn position(&self) -> (f64, f64) {
        match self {
            InteractionEvent::MouseMove { x, y, .. }
            | InteractionEvent::MouseButton { x, y, .. }
            | InteractionEvent::MouseWheel { x, y, .. } => (*x, *y),
        }
    }

    fn with_position(&self, new_x: f64, new_y: f64) -> InteractionEvent {
        let mut event = self.clone();
        match &mut event {
            InteractionEvent::MouseMove { x, y, .. }
            | InteractionEvent::MouseButton { x, y, .. }
            | InteractionEvent::MouseWheel { x, y, .. } => {
                *x = new_x;
                *y = new_y;
            }
        }
        event
    }

    /// Map the event position into the space under `transform`.
    pub fn translate(&self, transform: &FrameTransform) -> InteractionEvent {
        let (x, y) = self.position();
        let (tx, ty) = translate(x, y, transform);
        if tx == x && ty == y {
            self.clone()
        } else {
            self.with_position(tx, ty)
        }
    }
}

/// Invert a transform's fill translation/scale on a point.
pub fn translate(x: f64, y: f64, transform: &FrameTransform) -> (f64, f64) {
    let fill_x = transform.image.fill_translation[0];
    let fill_y = transform.image.fill_translation[1];
    let scale_x = transform.image.fill_scale[0];
    let scale_y = transform.image.fill_scale[1];

    if fill_x != 0.0 || fill_y != 0.0 || scale_x != 1.0 || scale_y != 1.0 {
        ((x - fill_x) / scale_x, (y - fill_y) / scale_y)
    } else {
        (x, y)
    }
}

/// A resolved event target: the layer transform to invert plus the producer
/// that receives the translated event.
pub type InteractionTarget = (FrameTransform, ProducerHandle);

pub struct InteractionAggregator {
    events: VecDeque<InteractionEvent>,
    clicked_and_held: Option<InteractionTarget>,
    num_buttons_clicked_and_held: i32,
}

impl Default for InteractionAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl InteractionAggregator {
    pub fn new() -> Self {
        Self {
            events: VecDeque::new(),
            clicked_and_held: None,
            num_buttons_clicked_and_held: 0,
        }
    }

    /// Buffer an event. Consecutive mouse moves collapse into the latest so a
    /// fast pointer never floods the scene.
    pub fn offer(&mut self, event: InteractionEvent) {
        if matches!(event, InteractionEvent::MouseMove { .. })
            && matches!(self.events.back(), Some(InteractionEvent::MouseMove { .. }))
        {
            *self.events.back_mut().unwrap() = event;
        } else {
            self.events.push_back(event);
        }
    }

    /// Drain the buffer, resolving each event through `detect` and delivering
    /// translated events to their targets.
    pub fn translate_and_send(
        &mut self,
        detect: &mut dyn FnMut(f64, f64) -> Option<InteractionTarget>,
    ) {
        while let Some(event) = self.events.pop_front() {
            self.send_one(&event, detect);
        }
    }

    fn send_one(
        &mut self,
        event: &InteractionEvent,
        detect: &mut dyn FnMut(f64, f64) -> Option<InteractionTarget>,
    ) {
        let (x, y) = event.position();

        let target = if self.clicked_and_held.is_some() {
            self.clicked_and_held.clone()
        } else {
            detect(x, y)
        };

        if let InteractionEvent::MouseButton { pressed, .. } = event {
            if *pressed {
                if self.num_buttons_clicked_and_held == 0 {
                    self.clicked_and_held = target.clone();
                }
                self.num_buttons_clicked_and_held += 1;
            } else {
                self.num_buttons_clicked_and_held -= 1;
            }
            if self.num_buttons_clicked_and_held == 0 {
                self.clicked_and_held = None;
            }
        }

        if let Some((transform, sink)) = target {
            let translated = event.translate(&transform);
            sink.borrow_mut().on_interaction(&translated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::{producer_handle, Constraints, Producer};
    use crate::frame::DrawFrame;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct RecordingProducer {
        constraints: Constraints,
        received:    Rc<RefCell<Vec<InteractionEvent>>>,
    }

    impl Producer for RecordingProducer {
        fn receive(&mut self, _nb_samples: usize) -> DrawFrame {
            DrawFrame::empty()
        }

        fn pixel_constraints(&self) -> &Constraints {
            &self.constraints
        }

        fn on_interaction(&mut self, event: &InteractionEvent) {
            self.received.borrow_mut().push(event.clone());
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn recording() -> (ProducerHandle, Rc<RefCell<Vec<InteractionEvent>>>) {
        let received = Rc::new(RefCell::new(Vec::new()));
        let handle = producer_handle(RecordingProducer {
            constraints: Constraints::new(1.0, 1.0),
            received:    Rc::clone(&received),
        });
        (handle, received)
    }

    fn move_event(x: f64, y: f64) -> InteractionEvent {
        InteractionEvent::MouseMove { source_id: 0, x, y }
    }

    fn button_event(x: f64, y: f64, pressed: bool) -> InteractionEvent {
        InteractionEvent::MouseButton { source_id: 0, x, y, button: 0, pressed }
    }

    #[test]
    fn consecutive_moves_coalesce_to_the_latest() {
        let (handle, received) = recording();
        let mut aggregator = InteractionAggregator::new();

        aggregator.offer(move_event(0.1, 0.1));
        aggregator.offer(move_event(0.2, 0.2));
        aggregator.offer(move_event(0.3, 0.3));

        let target = handle.clone();
        aggregator.translate_and_send(&mut |_, _| {
            Some((FrameTransform::default(), target.clone()))
        });

        let events = received.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].position(), (0.3, 0.3));
    }

    #[test]
    fn positions_are_translated_into_local_space() {
        let (handle, received) = recording();
        let mut aggregator = InteractionAggregator::new();

        let mut transform = FrameTransform::default();
        transform.image.fill_translation = [0.5, 0.5];
        transform.image.fill_scale = [0.25, 0.25];

        aggregator.offer(move_event(0.625, 0.75));
        let target = handle.clone();
        aggregator.translate_and_send(&mut |_, _| Some((transform, target.clone())));

        let events = received.borrow();
        assert_eq!(events[0].position(), (0.5, 1.0));
    }

    #[test]
    fn held_button_captures_the_initial_target() {
        let (first, first_received) = recording();
        let (second, second_received) = recording();
        let mut aggregator = InteractionAggregator::new();

        // Press resolves to `first`; every event until release must go there
        // even when the detector would now pick `second`.
        aggregator.offer(button_event(0.1, 0.1, true));
        let t = first.clone();
        aggregator.translate_and_send(&mut |_, _| Some((FrameTransform::default(), t.clone())));

        aggregator.offer(move_event(0.9, 0.9));
        aggregator.offer(button_event(0.9, 0.9, false));
        let t = second.clone();
        aggregator.translate_and_send(&mut |_, _| Some((FrameTransform::default(), t.clone())));

        assert_eq!(first_received.borrow().len(), 3);
        assert!(second_received.borrow().is_empty());

        // After release the capture is gone.
        aggregator.offer(move_event(0.9, 0.9));
        let t = second.clone();
        aggregator.translate_and_send(&mut |_, _| Some((FrameTransform::default(), t.clone())));
        assert_eq!(second_received.borrow().len(), 1);
    }

    #[test]
    fn events_without_target_are_dropped() {
        let mut aggregator = InteractionAggregator::new();
        aggregator.offer(move_event(0.5, 0.5));
        aggregator.translate_and_send(&mut |_, _| None);
    }
}
