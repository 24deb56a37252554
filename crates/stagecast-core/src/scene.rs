// crates/stagecast-core/src/scene.rs
//
// The scene producer: an ordered stack of layers whose geometry and
// adjustments are bindings, driven by keyframe timelines keyed off the
// scene's frame counter. Rendering one frame runs the timelines, pulls one
// draw-frame per visible layer, attaches the layer transform and advances the
// counter by the current speed (fractions accumulate across calls, negative
// speed runs backward).

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::rc::Rc;

use crate::binding::Binding;
use crate::error::CoreError;
use crate::expression::ExprValue;
use crate::frame::DrawFrame;
use crate::interaction::{translate, InteractionAggregator, InteractionEvent, InteractionTarget};
use crate::producer::{Constraints, Producer, ProducerHandle};
use crate::frame::transform::FrameTransform;
use crate::tween::Tweener;
use crate::variable::{Variable, VariableValue};

// ── Layer geometry ────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct Coord {
    pub x: Binding<f64>,
    pub y: Binding<f64>,
}

#[derive(Clone, Default)]
pub struct SceneRect {
    pub upper_left:  Coord,
    pub lower_right: Coord,
}

#[derive(Clone, Default)]
pub struct Corners {
    pub upper_left:  Coord,
    pub upper_right: Coord,
    pub lower_right: Coord,
    pub lower_left:  Coord,
}

#[derive(Clone)]
pub struct Adjustments {
    pub opacity: Binding<f64>,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self { opacity: Binding::new(1.0) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChromaType {
    #[default]
    None,
    Green,
    Blue,
}

#[derive(Clone, Default)]
pub struct ChromaKeySettings {
    pub key:       Binding<ChromaType>,
    pub threshold: Binding<f64>,
    pub softness:  Binding<f64>,
    pub spill:     Binding<f64>,
}

pub struct Layer {
    pub name:        Binding<String>,
    pub anchor:      Coord,
    pub position:    Coord,
    pub crop:        SceneRect,
    pub perspective: Corners,
    pub rotation:    Binding<f64>,
    pub adjustments: Adjustments,
    pub producer:    ProducerHandle,
    pub hidden:      Binding<bool>,
    pub is_key:      Binding<bool>,
    pub use_mipmap:  Binding<bool>,
    pub blend_mode:  Binding<BlendMode>,
    pub chroma_key:  ChromaKeySettings,
}

impl Layer {
    pub fn new(name: &str, producer: ProducerHandle) -> Self {
        let layer = Self {
            name:        Binding::new(name.to_string()),
            anchor:      Coord::default(),
            position:    Coord::default(),
            crop:        SceneRect::default(),
            perspective: Corners::default(),
            rotation:    Binding::new(0.0),
            adjustments: Adjustments::default(),
            producer,
            hidden:      Binding::new(false),
            is_key:      Binding::new(false),
            use_mipmap:  Binding::new(false),
            blend_mode:  Binding::new(BlendMode::Normal),
            chroma_key:  ChromaKeySettings::default(),
        };

        // The crop defaults to the producer's own extent and follows it.
        let constraints = layer.producer.borrow().pixel_constraints().clone();
        let _ = layer.crop.lower_right.x.bind(&constraints.width);
        let _ = layer.crop.lower_right.y.bind(&constraints.height);

        layer
    }
}

// ── Keyframes ─────────────────────────────────────────────────────────────────

pub struct Keyframe {
    pub destination_frame:    i64,
    pub on_start_animate:     Option<Box<dyn FnMut()>>,
    pub on_animate_to:        Option<Box<dyn FnMut(i64, i64)>>,
    pub on_destination_frame: Option<Box<dyn FnMut()>>,
}

impl Keyframe {
    pub fn new(destination_frame: i64) -> Self {
        Self {
            destination_frame,
            on_start_animate: None,
            on_animate_to: None,
            on_destination_frame: None,
        }
    }
}

#[derive(Default)]
struct Timeline {
    keyframes: BTreeMap<i64, Keyframe>,
}

impl Timeline {
    fn on_frame(&mut self, frame: i64) {
        let has_exact = self.keyframes.contains_key(&frame);

        if has_exact {
            if let Some(keyframe) = self.keyframes.get_mut(&frame) {
                if let Some(on_destination) = &mut keyframe.on_destination_frame {
                    on_destination();
                }
            }
            // The keyframe after this one starts its run immediately.
            let next = self
                .keyframes
                .range((Bound::Excluded(frame), Bound::Unbounded))
                .next()
                .map(|(key, _)| *key);
            if let Some(next) = next {
                if let Some(keyframe) = self.keyframes.get_mut(&next) {
                    if let Some(on_start) = &mut keyframe.on_start_animate {
                        on_start();
                    }
                }
            }
            return;
        }

        let before = self.keyframes.range(..frame).next_back().map(|(key, _)| *key);
        let after = self
            .keyframes
            .range((Bound::Excluded(frame), Bound::Unbounded))
            .next()
            .map(|(key, _)| *key);

        if let Some(after) = after {
            let start_frame = before.unwrap_or(0);
            let keyframe = self.keyframes.get_mut(&after).unwrap();
            if keyframe.on_start_animate.is_some() && frame == 0 {
                (keyframe.on_start_animate.as_mut().unwrap())();
            } else if let Some(on_animate) = &mut keyframe.on_animate_to {
                on_animate(start_frame, frame);
            }
        }
    }
}

// ── Scene producer ────────────────────────────────────────────────────────────

pub struct SceneProducer {
    name:           String,
    constraints:    Constraints,
    layers:         Vec<Layer>,
    aggregator:     InteractionAggregator,
    frame_number:   Binding<i64>,
    speed:          Binding<f64>,
    frame_fraction: f64,
    timelines:      HashMap<usize, Timeline>,
    variables:      HashMap<String, Rc<Variable>>,
    variable_names: Vec<String>,
    last_frame:     DrawFrame,
}

impl SceneProducer {
    pub fn new(name: &str, width: i32, height: i32) -> Self {
        let mut scene = Self {
            name:           name.to_string(),
            constraints:    Constraints::new(width as f64, height as f64),
            layers:         Vec::new(),
            aggregator:     InteractionAggregator::new(),
            frame_number:   Binding::new(0),
            speed:          Binding::new(1.0),
            frame_fraction: 0.0,
            timelines:      HashMap::new(),
            variables:      HashMap::new(),
            variable_names: Vec::new(),
            last_frame:     DrawFrame::empty(),
        };

        // Public built-ins every scene exposes through `call`.
        let speed_variable = Rc::new(Variable::number("1.0", true, 1.0));
        scene.speed = speed_variable.as_number().unwrap();
        scene.store_variable("scene_speed", speed_variable);

        let frame_variable = Rc::new(Variable::integer("0", true, 0));
        if let VariableValue::Integer(binding) = frame_variable.value() {
            scene.frame_number = binding.clone();
        }
        scene.store_variable("frame", frame_variable);

        scene
    }

    // ── Layers ────────────────────────────────────────────────────────────────

    pub fn create_layer(
        &mut self,
        producer: ProducerHandle,
        x: f64,
        y: f64,
        name: &str,
    ) -> &mut Layer {
        let layer = Layer::new(name, producer);
        let _ = layer.position.x.set(x);
        let _ = layer.position.y.set(y);
        self.layers.push(layer);
        self.layers.last_mut().unwrap()
    }

    pub fn reverse_layers(&mut self) {
        self.layers.reverse();
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    // ── Timelines ─────────────────────────────────────────────────────────────

    pub fn frame(&self) -> Binding<i64> {
        self.frame_number.clone()
    }

    pub fn speed(&self) -> Binding<f64> {
        self.speed.clone()
    }

    pub fn store_keyframe(&mut self, timeline_identity: usize, keyframe: Keyframe) {
        self.timelines
            .entry(timeline_identity)
            .or_default()
            .keyframes
            .insert(keyframe.destination_frame, keyframe);
    }

    /// Bind `to_affect` to `destination` when the scene reaches `at_frame`.
    pub fn add_keyframe<T: Clone + PartialEq + 'static>(
        &mut self,
        to_affect: &Binding<T>,
        destination: Binding<T>,
        at_frame: i64,
    ) {
        let mut keyframe = Keyframe::new(at_frame);
        let target = to_affect.clone();
        keyframe.on_destination_frame = Some(Box::new(move || {
            if let Err(error) = target.bind(&destination) {
                log::warn!("[scene] keyframe bind failed: {error}");
            }
        }));
        self.store_keyframe(to_affect.identity(), keyframe);
    }

    /// Animate `to_affect` toward `destination`, arriving at `at_frame`, with
    /// the named easing. The animation starts when the previous keyframe on
    /// the same binding is passed (or at frame 0).
    pub fn add_eased_keyframe(
        &mut self,
        to_affect: &Binding<f64>,
        destination: Binding<f64>,
        at_frame: i64,
        easing: &str,
    ) -> Result<(), CoreError> {
        if easing.is_empty() {
            self.add_keyframe(to_affect, destination, at_frame);
            return Ok(());
        }

        let tween = Tweener::from_name(easing)?;
        let start_value = Rc::new(Cell::new(0.0));
        let mut keyframe = Keyframe::new(at_frame);

        let target = to_affect.clone();
        let start = Rc::clone(&start_value);
        keyframe.on_start_animate = Some(Box::new(move || {
            start.set(target.get());
            target.unbind();
        }));

        let target = to_affect.clone();
        let dest = destination.clone();
        keyframe.on_destination_frame = Some(Box::new(move || {
            if let Err(error) = target.bind(&dest) {
                log::warn!("[scene] keyframe bind failed: {error}");
            }
        }));

        let target = to_affect.clone();
        let start = start_value;
        keyframe.on_animate_to = Some(Box::new(move |start_frame, current_frame| {
            let relative_frame = (current_frame - start_frame) as f64;
            let duration = (at_frame - start_frame) as f64;
            let tweened = tween.tween(
                relative_frame,
                start.get(),
                destination.get() - start.get(),
                duration,
            );
            if let Err(error) = target.set(tweened) {
                log::debug!("[scene] keyframe tween skipped: {error}");
            }
        }));

        self.store_keyframe(to_affect.identity(), keyframe);
        Ok(())
    }

    // ── Variables ─────────────────────────────────────────────────────────────

    pub fn store_variable(&mut self, name: &str, variable: Rc<Variable>) {
        self.variables.insert(name.to_string(), variable);
        self.variable_names.push(name.to_string());
    }

    pub fn create_number_variable(
        &mut self,
        name: &str,
        is_public: bool,
        initial: f64,
    ) -> Binding<f64> {
        let variable = Rc::new(Variable::number(initial.to_string(), is_public, initial));
        let binding = variable.as_number().unwrap();
        self.store_variable(name, variable);
        binding
    }

    pub fn create_text_variable(
        &mut self,
        name: &str,
        is_public: bool,
        initial: &str,
    ) -> Binding<String> {
        let variable = Rc::new(Variable::text(initial, is_public, initial.to_string()));
        let binding = variable.as_text().unwrap();
        self.store_variable(name, variable);
        binding
    }

    pub fn get_variable(&self, name: &str) -> Result<&Rc<Variable>, CoreError> {
        self.variables
            .get(name)
            .ok_or_else(|| CoreError::NotFound(format!("{name} not found in scene")))
    }

    pub fn variable_names(&self) -> &[String] {
        &self.variable_names
    }

    /// Compile an expression against this scene's variables.
    pub fn compile_expression(&self, expression: &str) -> Result<ExprValue, CoreError> {
        let resolver = |name: &str| -> Result<ExprValue, CoreError> {
            let variable = self
                .variables
                .get(name)
                .ok_or_else(|| CoreError::User(format!("{name} not found in scene")))?;
            Ok(match variable.value() {
                VariableValue::Number(binding) => ExprValue::Number(binding.clone()),
                VariableValue::Integer(binding) => ExprValue::Number(binding.as_f64()),
                VariableValue::Text(binding) => ExprValue::Text(binding.clone()),
                VariableValue::Boolean(binding) => ExprValue::Boolean(binding.clone()),
            })
        };
        crate::expression::parse_expression(expression, &resolver)
    }

    // ── Rendering ─────────────────────────────────────────────────────────────

    fn layer_transform(layer: &Layer, constraints: &Constraints) -> FrameTransform {
        let width = constraints.width.get();
        let height = constraints.height.get();
        let producer_constraints = layer.producer.borrow().pixel_constraints().clone();

        let mut transform = FrameTransform::default();
        transform.image.fill_translation[0] = layer.position.x.get() / width;
        transform.image.fill_translation[1] = layer.position.y.get() / height;
        transform.image.fill_scale[0] = producer_constraints.width.get() / width;
        transform.image.fill_scale[1] = producer_constraints.height.get() / height;
        transform.image.opacity = layer.adjustments.opacity.get();
        transform.image.is_key = layer.is_key.get();
        transform
    }

    pub fn render_frame(&mut self, nb_samples: usize) -> DrawFrame {
        let frame_number = self.frame_number.get();
        for timeline in self.timelines.values_mut() {
            timeline.on_frame(frame_number);
        }

        let mut frames = Vec::new();
        for layer in &self.layers {
            if layer.hidden.get() {
                continue;
            }
            let mut frame = layer.producer.borrow_mut().receive(nb_samples);
            *frame.transform_mut() = Self::layer_transform(layer, &self.constraints);
            frames.push(frame);
        }

        self.frame_fraction += self.speed.get();
        if self.frame_fraction.abs() >= 1.0 {
            let delta = self.frame_fraction as i64;
            if let Err(error) = self.frame_number.set(frame_number + delta) {
                log::warn!("[scene] frame counter is bound, not advancing: {error}");
            }
            self.frame_fraction -= delta as f64;
        }

        let result = DrawFrame::from_frames(frames);
        self.last_frame = DrawFrame::still(&result);
        result
    }

    fn collision_detect_in(
        layers: &[Layer],
        constraints: &Constraints,
        x: f64,
        y: f64,
    ) -> Option<InteractionTarget> {
        for layer in layers.iter().rev() {
            if layer.hidden.get() {
                continue;
            }
            let transform = Self::layer_transform(layer, constraints);
            let (local_x, local_y) = translate(x, y, &transform);
            if (0.0..=1.0).contains(&local_x)
                && (0.0..=1.0).contains(&local_y)
                && layer.producer.borrow().collides(local_x, local_y)
            {
                return Some((transform, Rc::clone(&layer.producer)));
            }
        }
        None
    }

    pub fn collision_detect(&self, x: f64, y: f64) -> Option<InteractionTarget> {
        Self::collision_detect_in(&self.layers, &self.constraints, x, y)
    }
}

impl Producer for SceneProducer {
    fn receive(&mut self, nb_samples: usize) -> DrawFrame {
        self.render_frame(nb_samples)
    }

    fn last_frame(&mut self) -> DrawFrame {
        self.last_frame.clone()
    }

    fn call(&mut self, params: &[String]) -> Result<String, CoreError> {
        let mut i = 0;
        while i + 1 < params.len() {
            let name = params[i].to_lowercase();
            if let Some(variable) = self.variables.get(&name) {
                if variable.is_public() {
                    variable.from_string(&params[i + 1])?;
                }
            }
            i += 2;
        }
        Ok(String::new())
    }

    fn pixel_constraints(&self) -> &Constraints {
        &self.constraints
    }

    fn collides(&self, x: f64, y: f64) -> bool {
        self.collision_detect(x, y).is_some()
    }

    fn on_interaction(&mut self, event: &InteractionEvent) {
        let mut aggregator = std::mem::take(&mut self.aggregator);
        aggregator.offer(event.clone());
        {
            let layers = &self.layers;
            let constraints = &self.constraints;
            aggregator.translate_and_send(&mut |x, y| {
                Self::collision_detect_in(layers, constraints, x, y)
            });
        }
        self.aggregator = aggregator;
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn print(&self) -> String {
        format!("scene[{}]", self.name)
    }

    fn state(&self) -> serde_json::Value {
        serde_json::json!({ "type": "scene" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::flatten;
    use crate::producer::{producer_handle, ConstProducer};
    use crate::frame::{MutableFrame, PixelFormatDesc};
    use uuid::Uuid;

    fn const_layer_producer(width: f64, height: f64) -> ProducerHandle {
        let frame = DrawFrame::from_frame(
            MutableFrame::new(Uuid::new_v4(), PixelFormatDesc::invalid()).seal(),
        );
        producer_handle(ConstProducer::new(frame, width, height))
    }

    #[test]
    fn frame_counter_advances_once_per_render_at_speed_one() {
        let mut scene = SceneProducer::new("test", 1920, 1080);
        for _ in 0..25 {
            scene.render_frame(1602);
        }
        assert_eq!(scene.frame().get(), 25);
    }

    #[test]
    fn fractional_speed_accumulates() {
        let mut scene = SceneProducer::new("test", 1920, 1080);
        scene.speed().set(0.5).unwrap();
        for _ in 0..5 {
            scene.render_frame(1602);
        }
        assert_eq!(scene.frame().get(), 2);

        scene.speed().set(-0.5).unwrap();
        for _ in 0..8 {
            scene.render_frame(1602);
        }
        assert_eq!(scene.frame().get(), -2);
    }

    #[test]
    fn layer_transform_is_normalized_by_scene_dimensions() {
        let mut scene = SceneProducer::new("test", 1920, 1080);
        let layer = scene.create_layer(const_layer_producer(960.0, 540.0), 192.0, 108.0, "half");
        layer.adjustments.opacity.set(0.5).unwrap();

        let frame = scene.render_frame(1602);
        let leaves = flatten(&frame);
        assert_eq!(leaves.len(), 1);
        let transform = &leaves[0].1.image;
        assert!((transform.fill_translation[0] - 0.1).abs() < 1e-9);
        assert!((transform.fill_translation[1] - 0.1).abs() < 1e-9);
        assert!((transform.fill_scale[0] - 0.5).abs() < 1e-9);
        assert!((transform.fill_scale[1] - 0.5).abs() < 1e-9);
        assert!((transform.opacity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn hidden_layers_are_skipped() {
        let mut scene = SceneProducer::new("test", 1920, 1080);
        scene.create_layer(const_layer_producer(100.0, 100.0), 0.0, 0.0, "visible");
        let hidden = scene.create_layer(const_layer_producer(100.0, 100.0), 0.0, 0.0, "hidden");
        hidden.hidden.set(true).unwrap();

        let frame = scene.render_frame(1602);
        assert_eq!(flatten(&frame).len(), 1);
    }

    #[test]
    fn call_writes_public_variables_and_ignores_unknown_names() {
        let mut scene = SceneProducer::new("test", 1920, 1080);
        let opacity = scene.create_number_variable("opacity", true, 1.0);
        let secret = scene.create_number_variable("secret", false, 1.0);

        let result = scene
            .call(&[
                "OPACITY".to_string(),
                "0.25".to_string(),
                "missing".to_string(),
                "1".to_string(),
                "secret".to_string(),
                "0.5".to_string(),
            ])
            .unwrap();

        assert_eq!(result, "");
        assert_eq!(opacity.get(), 0.25);
        // Private variables are not writable through call.
        assert_eq!(secret.get(), 1.0);
    }

    #[test]
    fn scene_speed_is_reachable_through_call() {
        let mut scene = SceneProducer::new("test", 1920, 1080);
        scene
            .call(&["scene_speed".to_string(), "2".to_string()])
            .unwrap();
        scene.render_frame(1602);
        assert_eq!(scene.frame().get(), 2);
    }

    #[test]
    fn eased_keyframes_animate_between_destinations() {
        let mut scene = SceneProducer::new("test", 1920, 1080);
        let x = Binding::new(0.0);
        scene.add_keyframe(&x, Binding::new(0.0), 0);
        scene
            .add_eased_keyframe(&x, Binding::new(100.0), 10, "linear")
            .unwrap();

        // Frame 0 runs the first keyframe and starts the next one.
        scene.render_frame(1602);
        for _ in 0..5 {
            scene.render_frame(1602);
        }
        // Counter now at 5: halfway through the 0→10 run.
        let halfway = x.get();
        assert!((halfway - 50.0).abs() < 1.0, "halfway was {halfway}");

        for _ in 0..6 {
            scene.render_frame(1602);
        }
        assert_eq!(x.get(), 100.0);
        assert!(x.bound());
    }

    #[test]
    fn hit_testing_prefers_topmost_layers() {
        let mut scene = SceneProducer::new("test", 100, 100);
        let bottom = const_layer_producer(100.0, 100.0);
        let top = const_layer_producer(50.0, 50.0);
        scene.create_layer(Rc::clone(&bottom), 0.0, 0.0, "bottom");
        scene.create_layer(Rc::clone(&top), 0.0, 0.0, "top");

        // Inside the top layer's smaller extent: the top layer wins.
        let (_, target) = scene.collision_detect(0.25, 0.25).unwrap();
        assert!(Rc::ptr_eq(&target, &top));

        // Outside the top layer but inside the bottom one.
        let (_, target) = scene.collision_detect(0.75, 0.75).unwrap();
        assert!(Rc::ptr_eq(&target, &bottom));
    }

    #[test]
    fn expressions_resolve_scene_variables() {
        let mut scene = SceneProducer::new("test", 1920, 1080);
        let width = scene.create_number_variable("panel_width", true, 10.0);

        let ExprValue::Number(result) =
            scene.compile_expression("panel_width * 2 + 1").unwrap()
        else {
            panic!("expected a number");
        };
        assert_eq!(result.get(), 21.0);
        width.set(20.0).unwrap();
        assert_eq!(result.get(), 41.0);
    }
}
