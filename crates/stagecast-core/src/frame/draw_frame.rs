// crates/stagecast-core/src/frame/draw_frame.rs
//
// The draw-frame tree. A draw frame is either a leaf (const frame), a
// composite of child draw frames, or one of three control sentinels; every
// node carries a frame transform. The sentinels let the graph carry control
// signals (end of stream, underflow) without a separate channel: they are
// tag-compared, never content-compared.

use std::sync::Arc;

use super::frame::ConstFrame;
use super::transform::{FieldMode, FrameTransform};

#[derive(Clone, Debug)]
enum Kind {
    Empty,
    Eof,
    Late,
    Leaf(ConstFrame),
    Composite(Arc<Vec<DrawFrame>>),
}

/// Composable frame node. Clones share leaf and child payloads; the transform
/// is per-node value state.
#[derive(Clone, Debug)]
pub struct DrawFrame {
    kind:      Kind,
    transform: FrameTransform,
}

impl DrawFrame {
    // ── Construction ──────────────────────────────────────────────────────────

    /// Render nothing.
    pub fn empty() -> Self {
        Self { kind: Kind::Empty, transform: FrameTransform::default() }
    }

    /// End of stream.
    pub fn eof() -> Self {
        Self { kind: Kind::Eof, transform: FrameTransform::default() }
    }

    /// Underflow placeholder: the consumer outran the producer.
    pub fn late() -> Self {
        Self { kind: Kind::Late, transform: FrameTransform::default() }
    }

    pub fn from_frame(frame: ConstFrame) -> Self {
        Self { kind: Kind::Leaf(frame), transform: FrameTransform::default() }
    }

    pub fn from_frames(frames: Vec<DrawFrame>) -> Self {
        Self { kind: Kind::Composite(Arc::new(frames)), transform: FrameTransform::default() }
    }

    /// Wrap `frame` in a fresh parent node so transform edits compose with
    /// the child's own transform instead of replacing it.
    fn wrap(frame: &DrawFrame) -> Self {
        Self::from_frames(vec![frame.clone()])
    }

    /// `a` under, `b` over.
    pub fn over(a: &DrawFrame, b: &DrawFrame) -> Self {
        if a.is_eof() || b.is_eof() {
            return Self::eof();
        }
        if a.is_empty() && b.is_empty() {
            return Self::empty();
        }
        Self::from_frames(vec![a.clone(), b.clone()])
    }

    /// Use `key` as the alpha mask for `fill`.
    pub fn mask(fill: &DrawFrame, key: &DrawFrame) -> Self {
        if fill.is_eof() || key.is_eof() {
            return Self::eof();
        }
        if fill.is_empty() || key.is_empty() {
            return Self::empty();
        }
        let mut key = Self::wrap(key);
        key.transform.image.is_key = true;
        Self::from_frames(vec![key, fill.clone()])
    }

    /// Combine two fields into one interlaced frame.
    pub fn interlace(a: &DrawFrame, b: &DrawFrame, mode: FieldMode) -> Self {
        if a.is_eof() || b.is_eof() {
            return Self::eof();
        }
        if a.is_empty() && b.is_empty() {
            return Self::empty();
        }
        if a == b || mode == FieldMode::Progressive {
            return b.clone();
        }

        let mut first = Self::wrap(a);
        let mut second = Self::wrap(b);
        if mode == FieldMode::Upper {
            first.transform.image.field_mode = FieldMode::Upper;
            second.transform.image.field_mode = FieldMode::Lower;
        } else {
            first.transform.image.field_mode = FieldMode::Lower;
            second.transform.image.field_mode = FieldMode::Upper;
        }
        Self::from_frames(vec![first, second])
    }

    /// Mute the frame's audio.
    pub fn silence(frame: &DrawFrame) -> Self {
        let mut silenced = Self::wrap(frame);
        silenced.transform.audio.volume = 0.0;
        silenced
    }

    /// Mark the frame as a repeat of previously shown content. Stills keep
    /// their pixels but contribute no audio and no duplicate-suppressed
    /// side-data.
    pub fn still(frame: &DrawFrame) -> Self {
        let mut still = Self::wrap(frame);
        still.transform.image.is_still = true;
        still.transform.audio.is_still = true;
        still
    }

    // ── Access ────────────────────────────────────────────────────────────────

    pub fn transform(&self) -> &FrameTransform {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut FrameTransform {
        &mut self.transform
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.kind, Kind::Empty)
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, Kind::Eof)
    }

    pub fn is_late(&self) -> bool {
        matches!(self.kind, Kind::Late)
    }

    /// Depth-first traversal. The visitor sees `push(transform)` on entry to
    /// every node, `visit(frame)` at leaves, and a matching `pop()` on exit.
    pub fn accept(&self, visitor: &mut dyn FrameVisitor) {
        visitor.push(&self.transform);
        match &self.kind {
            Kind::Leaf(frame) => visitor.visit(frame),
            Kind::Composite(children) => {
                for child in children.iter() {
                    child.accept(visitor);
                }
            }
            Kind::Empty | Kind::Eof | Kind::Late => {}
        }
        visitor.pop();
    }
}

impl Default for DrawFrame {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for DrawFrame {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (Kind::Empty, Kind::Empty) => true,
            (Kind::Eof, Kind::Eof) => true,
            (Kind::Late, Kind::Late) => true,
            (Kind::Leaf(a), Kind::Leaf(b)) => a == b && self.transform == other.transform,
            (Kind::Composite(a), Kind::Composite(b)) => {
                Arc::ptr_eq(a, b) && self.transform == other.transform
            }
            _ => false,
        }
    }
}

// ── Visitor ───────────────────────────────────────────────────────────────────

/// Traversal contract for draw-frame trees. Implementations keep their own
/// transform stack; `push`/`pop` calls are always balanced.
pub trait FrameVisitor {
    fn push(&mut self, transform: &FrameTransform);
    fn visit(&mut self, frame: &ConstFrame);
    fn pop(&mut self);
}

/// Flattening visitor: multiplies transforms top-down and hands each leaf to
/// the callback together with its composed transform.
pub struct Flattener<F: FnMut(&ConstFrame, &FrameTransform)> {
    stack:   Vec<FrameTransform>,
    on_leaf: F,
}

impl<F: FnMut(&ConstFrame, &FrameTransform)> Flattener<F> {
    pub fn new(on_leaf: F) -> Self {
        Self { stack: vec![FrameTransform::default()], on_leaf }
    }
}

impl<F: FnMut(&ConstFrame, &FrameTransform)> FrameVisitor for Flattener<F> {
    fn push(&mut self, transform: &FrameTransform) {
        let top = *self.stack.last().unwrap();
        self.stack.push(top * *transform);
    }

    fn visit(&mut self, frame: &ConstFrame) {
        (self.on_leaf)(frame, self.stack.last().unwrap());
    }

    fn pop(&mut self) {
        self.stack.pop();
    }
}

/// Collect `(leaf, composed transform)` pairs in pre-order.
pub fn flatten(frame: &DrawFrame) -> Vec<(ConstFrame, FrameTransform)> {
    let mut leaves = Vec::new();
    let mut flattener = Flattener::new(|frame: &ConstFrame, transform: &FrameTransform| {
        leaves.push((frame.clone(), *transform));
    });
    frame.accept(&mut flattener);
    leaves
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::frame::MutableFrame;
    use crate::frame::pixel_format::PixelFormatDesc;
    use uuid::Uuid;

    fn leaf() -> DrawFrame {
        DrawFrame::from_frame(MutableFrame::new(Uuid::new_v4(), PixelFormatDesc::invalid()).seal())
    }

    #[test]
    fn sentinels_compare_by_tag() {
        assert_eq!(DrawFrame::empty(), DrawFrame::empty());
        assert_eq!(DrawFrame::eof(), DrawFrame::eof());
        assert_ne!(DrawFrame::empty(), DrawFrame::eof());
        assert_ne!(DrawFrame::late(), DrawFrame::empty());
    }

    #[test]
    fn eof_propagates_through_over_and_mask_and_interlace() {
        let f = leaf();
        assert!(DrawFrame::over(&DrawFrame::eof(), &f).is_eof());
        assert!(DrawFrame::over(&f, &DrawFrame::eof()).is_eof());
        assert!(DrawFrame::mask(&f, &DrawFrame::eof()).is_eof());
        assert!(DrawFrame::interlace(&DrawFrame::eof(), &f, FieldMode::Upper).is_eof());
    }

    #[test]
    fn mask_with_empty_operand_is_empty() {
        let f = leaf();
        assert!(DrawFrame::mask(&DrawFrame::empty(), &f).is_empty());
        assert!(DrawFrame::mask(&f, &DrawFrame::empty()).is_empty());
    }

    #[test]
    fn over_collapses_only_when_both_empty() {
        let f = leaf();
        assert!(DrawFrame::over(&DrawFrame::empty(), &DrawFrame::empty()).is_empty());
        assert!(!DrawFrame::over(&f, &DrawFrame::empty()).is_empty());
    }

    #[test]
    fn interlace_short_circuits_same_frame_and_progressive() {
        let f = leaf();
        let same = DrawFrame::interlace(&f, &f, FieldMode::Upper);
        assert_eq!(same, f);

        let g = leaf();
        let progressive = DrawFrame::interlace(&f, &g, FieldMode::Progressive);
        assert_eq!(progressive, g);
    }

    #[test]
    fn interlace_tags_fields() {
        let a = leaf();
        let b = leaf();
        let frame = DrawFrame::interlace(&a, &b, FieldMode::Upper);
        let leaves = flatten(&frame);
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].1.image.field_mode, FieldMode::Upper);
        assert_eq!(leaves[1].1.image.field_mode, FieldMode::Lower);
    }

    #[test]
    fn mask_marks_the_key_branch() {
        let fill = leaf();
        let key = leaf();
        let masked = DrawFrame::mask(&fill, &key);
        let leaves = flatten(&masked);
        assert_eq!(leaves.len(), 2);
        assert!(leaves[0].1.image.is_key);
        assert!(!leaves[1].1.image.is_key);
    }

    #[test]
    fn silence_zeroes_volume_without_touching_the_child() {
        let mut f = leaf();
        f.transform_mut().audio.volume = 0.5;
        let silent = DrawFrame::silence(&f);
        let leaves = flatten(&silent);
        assert_eq!(leaves[0].1.audio.volume, 0.0);
        // The original node is untouched.
        assert_eq!(f.transform().audio.volume, 0.5);
    }

    #[test]
    fn traversal_composes_root_to_leaf_transform_products() {
        let mut a = leaf();
        a.transform_mut().image.opacity = 0.5;
        let mut b = leaf();
        b.transform_mut().image.opacity = 0.25;

        let mut parent = DrawFrame::over(&a, &b);
        parent.transform_mut().image.opacity = 0.5;

        let leaves = flatten(&parent);
        assert_eq!(leaves.len(), 2);
        assert!((leaves[0].1.image.opacity - 0.25).abs() < 1e-9);
        assert!((leaves[1].1.image.opacity - 0.125).abs() < 1e-9);
    }

    #[test]
    fn flatten_is_preorder() {
        let a = leaf();
        let b = leaf();
        let c = leaf();
        let inner = DrawFrame::over(&a, &b);
        let outer = DrawFrame::over(&inner, &c);

        let leaves = flatten(&outer);
        let tags: Vec<_> = leaves.iter().map(|(f, _)| f.tag()).collect();
        let expected: Vec<_> = [&a, &b, &c]
            .iter()
            .map(|f| flatten(f)[0].0.tag())
            .collect();
        assert_eq!(tags, expected);
    }
}
