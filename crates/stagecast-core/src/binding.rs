// crates/stagecast-core/src/binding.rs
//
// Reactive values. A binding is either a plain value or an expression over
// other bindings; dependents are re-evaluated synchronously when a value
// changes, in LIFO order over the registered listeners. Dependency cycles are
// rejected at bind time with a graph walk, so no runtime detection is needed.
//
// Binding graphs are thread-confined: each graph belongs to one scene and is
// only touched from its render thread (or from `call`, which the owner
// serializes). Cells are Rc/RefCell, listeners hold weak references and are
// compacted lazily at notify time.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::error::BindingError;
use crate::tween::Tweener;

// ── Dependency graph node ─────────────────────────────────────────────────────

type Listener = (Weak<dyn Any>, Rc<dyn Fn()>);

trait DependencyNode {
    fn dependency_list(&self) -> Vec<Rc<dyn DependencyNode>>;
    fn add_listener(&self, dependant: Weak<dyn Any>, listener: Rc<dyn Fn()>);
    fn node_id(&self) -> usize;

    fn depends_on(&self, id: usize) -> bool {
        self.dependency_list()
            .iter()
            .any(|dep| dep.node_id() == id || dep.depends_on(id))
    }
}

struct Inner<T> {
    value:        RefCell<T>,
    evaluated:    Cell<bool>,
    expression:   RefCell<Option<Box<dyn FnMut() -> T>>>,
    dependencies: RefCell<Vec<Rc<dyn DependencyNode>>>,
    listeners:    RefCell<Vec<Listener>>,
}

impl<T: Clone + PartialEq + 'static> Inner<T> {
    fn bound(&self) -> bool {
        self.expression.borrow().is_some()
    }

    fn get(&self) -> T {
        if !self.evaluated.get() {
            self.evaluate();
        }
        self.value.borrow().clone()
    }

    fn evaluate(&self) {
        // Take the expression out for the duration of the call: evaluating it
        // reads dependencies, whose change notifications may re-enter this
        // cell. The re-entrant call sees an unbound cell and returns.
        let Some(mut expr) = self.expression.borrow_mut().take() else {
            self.evaluated.set(true);
            return;
        };
        let new_value = expr();
        {
            let mut slot = self.expression.borrow_mut();
            if slot.is_none() {
                *slot = Some(expr);
            }
        }
        self.evaluated.set(true);

        let changed = {
            let mut value = self.value.borrow_mut();
            if *value != new_value {
                *value = new_value;
                true
            } else {
                false
            }
        };
        if changed {
            self.notify();
        }
    }

    fn set(&self, new_value: T) -> Result<(), BindingError> {
        if self.bound() {
            return Err(BindingError::SetOnBound);
        }
        {
            let mut value = self.value.borrow_mut();
            if *value == new_value {
                return Ok(());
            }
            *value = new_value;
        }
        self.notify();
        Ok(())
    }

    /// Notify listeners newest-first. The snapshot is taken before any
    /// listener runs so re-registration during notification is safe; expired
    /// weak slots are compacted afterwards.
    fn notify(&self) {
        let snapshot: Vec<Listener> = self.listeners.borrow().clone();
        for (weak, listener) in snapshot.iter().rev() {
            if weak.upgrade().is_some() {
                listener();
            }
        }
        self.listeners
            .borrow_mut()
            .retain(|(weak, _)| weak.strong_count() > 0);
    }
}

impl<T: Clone + PartialEq + 'static> DependencyNode for Inner<T> {
    fn dependency_list(&self) -> Vec<Rc<dyn DependencyNode>> {
        self.dependencies.borrow().clone()
    }

    fn add_listener(&self, dependant: Weak<dyn Any>, listener: Rc<dyn Fn()>) {
        self.listeners.borrow_mut().push((dependant, listener));
    }

    fn node_id(&self) -> usize {
        self as *const Self as *const () as usize
    }
}

// ── Binding ───────────────────────────────────────────────────────────────────

/// Reactive value cell. Clones share the cell.
pub struct Binding<T: 'static> {
    inner: Rc<Inner<T>>,
}

impl<T: 'static> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self { inner: Rc::clone(&self.inner) }
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for Binding<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + 'static> Binding<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(Inner {
                value:        RefCell::new(value),
                evaluated:    Cell::new(true),
                expression:   RefCell::new(None),
                dependencies: RefCell::new(Vec::new()),
                listeners:    RefCell::new(Vec::new()),
            }),
        }
    }

    /// An expression-backed binding. Dependencies must be registered
    /// separately; the expression is evaluated lazily on first `get`.
    pub fn from_expression(expression: impl FnMut() -> T + 'static) -> Self
    where
        T: Default,
    {
        Self {
            inner: Rc::new(Inner {
                value:        RefCell::new(T::default()),
                evaluated:    Cell::new(false),
                expression:   RefCell::new(Some(Box::new(expression))),
                dependencies: RefCell::new(Vec::new()),
                listeners:    RefCell::new(Vec::new()),
            }),
        }
    }

    /// Stable identity of the underlying cell; used as a map key by the
    /// scene's keyframe timelines.
    pub fn identity(&self) -> usize {
        self.inner.node_id()
    }

    /// Current value, re-evaluating the expression if the cell is dirty.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Assign a plain value. Fails on expression-backed bindings.
    pub fn set(&self, value: T) -> Result<(), BindingError> {
        self.inner.set(value)
    }

    pub fn bound(&self) -> bool {
        self.inner.bound()
    }

    /// Make this binding mirror `other`. Rejected when it would create a
    /// dependency cycle; on rejection the binding is left untouched.
    pub fn bind(&self, other: &Binding<T>) -> Result<(), BindingError> {
        self.unbind();
        self.depend_on(other)?;
        let source = Rc::clone(&other.inner);
        *self.inner.expression.borrow_mut() = Some(Box::new(move || source.get()));
        self.inner.evaluate();
        Ok(())
    }

    pub fn unbind(&self) {
        if self.inner.bound() {
            *self.inner.expression.borrow_mut() = None;
            self.inner.dependencies.borrow_mut().clear();
        }
    }

    /// Register `other` as a dependency, re-evaluating this binding whenever
    /// it changes. Rejects cycles.
    pub fn depend_on<T2: Clone + PartialEq + 'static>(
        &self,
        other: &Binding<T2>,
    ) -> Result<(), BindingError> {
        let self_id = self.inner.node_id();
        if other.inner.node_id() == self_id || other.inner.depends_on(self_id) {
            return Err(BindingError::Cycle);
        }
        self.register_dependency(other);
        Ok(())
    }

    fn register_dependency<T2: Clone + PartialEq + 'static>(&self, other: &Binding<T2>) {
        let weak = Rc::downgrade(&(Rc::clone(&self.inner) as Rc<dyn Any>));
        let target = Rc::downgrade(&self.inner);
        other.inner.add_listener(
            weak,
            Rc::new(move || {
                if let Some(inner) = target.upgrade() {
                    inner.evaluate();
                }
            }),
        );
        self.inner
            .dependencies
            .borrow_mut()
            .push(Rc::clone(&other.inner) as Rc<dyn DependencyNode>);
    }

    /// Listener tied to `dependant`'s lifetime: the slot dies when the
    /// dependant is dropped.
    pub fn on_change_weak(&self, dependant: &Rc<dyn Any>, listener: impl Fn() + 'static) {
        self.inner
            .add_listener(Rc::downgrade(dependant), Rc::new(listener));
    }

    /// Listener with an explicit subscription guard; dropping the returned
    /// handle unsubscribes.
    #[must_use]
    pub fn on_change(&self, listener: impl Fn() + 'static) -> Rc<dyn Any> {
        let subscription: Rc<dyn Any> = Rc::new(());
        self.on_change_weak(&subscription, listener);
        subscription
    }

    /// Derived binding computed from this binding's value.
    pub fn transformed<R, F>(&self, func: F) -> Binding<R>
    where
        R: Clone + PartialEq + Default + 'static,
        F: Fn(T) -> R + 'static,
    {
        let source = Rc::clone(&self.inner);
        let result = Binding::from_expression(move || func(source.get()));
        result.register_dependency(self);
        result
    }

    /// Derived binding computed from this binding and `other`.
    pub fn composed<T2, R, F>(&self, other: &Binding<T2>, func: F) -> Binding<R>
    where
        T2: Clone + PartialEq + 'static,
        R: Clone + PartialEq + Default + 'static,
        F: Fn(T, T2) -> R + 'static,
    {
        let lhs = Rc::clone(&self.inner);
        let rhs = Rc::clone(&other.inner);
        let result = Binding::from_expression(move || func(lhs.get(), rhs.get()));
        result.register_dependency(self);
        result.register_dependency(other);
        result
    }
}

// ── Animation ─────────────────────────────────────────────────────────────────

impl Binding<f64> {
    /// A binding that chases this binding's value. On each tick of
    /// `frame_counter` the result moves from where it was toward the current
    /// destination over `duration` ticks using `tweener`; whenever the
    /// destination changes mid-flight the tween restarts from the value it
    /// had reached.
    pub fn animated(
        &self,
        frame_counter: &Binding<f64>,
        duration: &Binding<f64>,
        tweener: &Binding<Tweener>,
    ) -> Binding<f64> {
        let destination = Rc::clone(&self.inner);
        let counter = Rc::clone(&frame_counter.inner);
        let dur = Rc::clone(&duration.inner);
        let tw = Rc::clone(&tweener.inner);

        let mut start_frame = frame_counter.get();
        let mut current_frame = start_frame;
        let mut current_source = self.get();
        let mut current_destination = current_source;
        let mut current_result = current_source;

        let result = Binding::from_expression(move || {
            let frame = counter.get();
            let frame_diff = frame - current_frame;
            let new_frame = frame != current_frame;

            if !new_frame {
                return current_result;
            }

            let new_tween = current_destination != destination.get();
            let mut time =
                current_frame - start_frame + if new_tween { frame_diff } else { 0.0 } + 1.0;
            let duration = dur.get();
            current_frame = frame;

            if new_tween {
                current_source = tw.get().tween(
                    time,
                    current_source,
                    current_destination - current_source,
                    duration,
                );
            }
            current_destination = destination.get();
            if new_tween {
                start_frame = current_frame;
            }

            time = current_frame - start_frame;

            if time < duration {
                current_result = tw.get().tween(
                    time,
                    current_source,
                    current_destination - current_source,
                    duration,
                );
            } else {
                current_result = current_destination;
                current_source = current_destination;
            }

            current_result
        });

        result.register_dependency(self);
        result.register_dependency(frame_counter);
        result.register_dependency(tweener);
        result
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl Binding<i64> {
    pub fn as_f64(&self) -> Binding<f64> {
        self.transformed(|v| v as f64)
    }
}

impl Binding<f64> {
    pub fn as_i64(&self) -> Binding<i64> {
        self.transformed(|v| v as i64)
    }
}

/// Stringification for the expression language's mixed `+`.
pub trait ToStringBinding {
    fn stringified(&self) -> Binding<String>;
}

impl ToStringBinding for Binding<f64> {
    fn stringified(&self) -> Binding<String> {
        self.transformed(|v| {
            if v.fract() == 0.0 && v.abs() < 1e15 {
                format!("{}", v as i64)
            } else {
                v.to_string()
            }
        })
    }
}

impl ToStringBinding for Binding<bool> {
    fn stringified(&self) -> Binding<String> {
        self.transformed(|v| v.to_string())
    }
}

impl ToStringBinding for Binding<String> {
    fn stringified(&self) -> Binding<String> {
        self.clone()
    }
}

// ── Operators ─────────────────────────────────────────────────────────────────

macro_rules! numeric_binop {
    ($trait:ident, $method:ident, $op:tt) => {
        impl std::ops::$trait for &Binding<f64> {
            type Output = Binding<f64>;

            fn $method(self, other: &Binding<f64>) -> Binding<f64> {
                self.composed(other, |lhs, rhs| lhs $op rhs)
            }
        }

        impl std::ops::$trait<f64> for &Binding<f64> {
            type Output = Binding<f64>;

            fn $method(self, other: f64) -> Binding<f64> {
                self.transformed(move |lhs| lhs $op other)
            }
        }
    };
}

numeric_binop!(Add, add, +);
numeric_binop!(Sub, sub, -);
numeric_binop!(Mul, mul, *);
numeric_binop!(Div, div, /);

impl std::ops::Rem for &Binding<f64> {
    type Output = Binding<f64>;

    fn rem(self, other: &Binding<f64>) -> Binding<f64> {
        // Integral remainder like the expression language's `%`.
        self.composed(other, |lhs, rhs| ((lhs as i64) % (rhs as i64)) as f64)
    }
}

impl std::ops::Neg for &Binding<f64> {
    type Output = Binding<f64>;

    fn neg(self) -> Binding<f64> {
        self.transformed(|v| -v)
    }
}

impl std::ops::Add for &Binding<String> {
    type Output = Binding<String>;

    fn add(self, other: &Binding<String>) -> Binding<String> {
        self.composed(other, |lhs, rhs| lhs + &rhs)
    }
}

impl std::ops::Not for &Binding<bool> {
    type Output = Binding<bool>;

    fn not(self) -> Binding<bool> {
        self.transformed(|v| !v)
    }
}

impl Binding<bool> {
    pub fn and(&self, other: &Binding<bool>) -> Binding<bool> {
        self.composed(other, |lhs, rhs| lhs && rhs)
    }

    pub fn or(&self, other: &Binding<bool>) -> Binding<bool> {
        self.composed(other, |lhs, rhs| lhs || rhs)
    }
}

impl<T: Clone + PartialEq + 'static> Binding<T>
where
    T: PartialOrd,
{
    pub fn lt(&self, other: &Binding<T>) -> Binding<bool> {
        self.composed(other, |lhs, rhs| lhs < rhs)
    }

    pub fn le(&self, other: &Binding<T>) -> Binding<bool> {
        self.composed(other, |lhs, rhs| lhs <= rhs)
    }

    pub fn gt(&self, other: &Binding<T>) -> Binding<bool> {
        self.composed(other, |lhs, rhs| lhs > rhs)
    }

    pub fn ge(&self, other: &Binding<T>) -> Binding<bool> {
        self.composed(other, |lhs, rhs| lhs >= rhs)
    }
}

impl<T: Clone + PartialEq + 'static> Binding<T> {
    pub fn eq_binding(&self, other: &Binding<T>) -> Binding<bool> {
        self.composed(other, |lhs, rhs| lhs == rhs)
    }

    pub fn ne_binding(&self, other: &Binding<T>) -> Binding<bool> {
        self.composed(other, |lhs, rhs| lhs != rhs)
    }
}

// ── Ternary ───────────────────────────────────────────────────────────────────

/// `when(cond).then(a).otherwise(b)` — a reactive ternary.
pub fn when(condition: &Binding<bool>) -> When {
    When { condition: condition.clone() }
}

pub struct When {
    condition: Binding<bool>,
}

impl When {
    pub fn then<T: Clone + PartialEq + Default + 'static>(
        self,
        true_result: &Binding<T>,
    ) -> TernaryBuilder<T> {
        TernaryBuilder { condition: self.condition, true_result: true_result.clone() }
    }
}

pub struct TernaryBuilder<T: 'static> {
    condition:   Binding<bool>,
    true_result: Binding<T>,
}

impl<T: Clone + PartialEq + Default + 'static> TernaryBuilder<T> {
    pub fn otherwise(self, false_result: &Binding<T>) -> Binding<T> {
        let condition = Rc::clone(&self.condition.inner);
        let true_result = Rc::clone(&self.true_result.inner);
        let false_inner = Rc::clone(&false_result.inner);

        let result = Binding::from_expression(move || {
            if condition.get() {
                true_result.get()
            } else {
                false_inner.get()
            }
        });
        result.register_dependency(&self.condition);
        result.register_dependency(&self.true_result);
        result.register_dependency(false_result);
        result
    }
}

/// `to_delay` until `counter` reaches `duration`, then `after_delay`.
pub fn delay<T: Clone + PartialEq + Default + 'static>(
    to_delay: &Binding<T>,
    after_delay: &Binding<T>,
    counter: &Binding<f64>,
    duration: f64,
) -> Binding<T> {
    when(&counter.lt(&Binding::new(duration)))
        .then(to_delay)
        .otherwise(after_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_value_set_and_get() {
        let b = Binding::new(3.0);
        assert_eq!(b.get(), 3.0);
        b.set(4.0).unwrap();
        assert_eq!(b.get(), 4.0);
    }

    #[test]
    fn bound_binding_tracks_its_source() {
        let a = Binding::new(1.0);
        let b = Binding::new(0.0);
        b.bind(&a).unwrap();
        assert_eq!(b.get(), 1.0);
        a.set(5.0).unwrap();
        assert_eq!(b.get(), 5.0);
    }

    #[test]
    fn set_on_bound_binding_is_rejected() {
        let a = Binding::new(1.0);
        let b = Binding::new(0.0);
        b.bind(&a).unwrap();
        assert_eq!(b.set(2.0), Err(BindingError::SetOnBound));
    }

    #[test]
    fn cycle_is_rejected_at_bind_time_and_first_binding_survives() {
        let a = Binding::new(1.0);
        let b = Binding::new(2.0);
        a.bind(&b).unwrap();
        assert_eq!(b.bind(&a), Err(BindingError::Cycle));

        // The first binding is intact.
        assert!(a.bound());
        assert!(!b.bound());
        b.set(7.0).unwrap();
        assert_eq!(a.get(), 7.0);
    }

    #[test]
    fn derived_bindings_recompute_on_change() {
        let a = Binding::new(2.0);
        let b = Binding::new(3.0);
        let sum = &a + &b;
        let doubled = sum.transformed(|v| v * 2.0);

        assert_eq!(doubled.get(), 10.0);
        a.set(5.0).unwrap();
        assert_eq!(doubled.get(), 16.0);
    }

    #[test]
    fn listeners_fire_in_reverse_insertion_order() {
        let a = Binding::new(0.0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let o1 = Rc::clone(&order);
        let _sub1 = a.on_change(move || o1.borrow_mut().push(1));
        let o2 = Rc::clone(&order);
        let _sub2 = a.on_change(move || o2.borrow_mut().push(2));

        a.set(1.0).unwrap();
        assert_eq!(*order.borrow(), vec![2, 1]);
    }

    #[test]
    fn dropped_subscription_stops_firing() {
        let a = Binding::new(0.0);
        let hits = Rc::new(Cell::new(0));

        let h = Rc::clone(&hits);
        let sub = a.on_change(move || h.set(h.get() + 1));
        a.set(1.0).unwrap();
        drop(sub);
        a.set(2.0).unwrap();

        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn no_notification_when_value_is_unchanged() {
        let a = Binding::new(1.0);
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _sub = a.on_change(move || h.set(h.get() + 1));

        a.set(1.0).unwrap();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn string_concat_and_comparisons() {
        let s = Binding::new(String::from("a"));
        let t = Binding::new(String::from("b"));
        assert_eq!((&s + &t).get(), "ab");

        let x = Binding::new(1.0);
        let y = Binding::new(2.0);
        assert!(x.lt(&y).get());
        assert!(!x.eq_binding(&y).get());
    }

    #[test]
    fn ternary_follows_its_condition() {
        let cond = Binding::new(true);
        let result = when(&cond)
            .then(&Binding::new(10.0))
            .otherwise(&Binding::new(20.0));

        assert_eq!(result.get(), 10.0);
        cond.set(false).unwrap();
        assert_eq!(result.get(), 20.0);
    }

    #[test]
    fn animated_tweens_to_new_destination() {
        let destination = Binding::new(3.0);
        let counter = Binding::new(0.0);
        let duration = Binding::new(10.0);
        let tweener = Binding::new(Tweener::linear());
        let animated = destination.animated(&counter, &duration, &tweener);

        assert_eq!(animated.get(), 3.0);

        // Ticking without a destination change keeps the settled value.
        for i in 1..=10 {
            counter.set(i as f64).unwrap();
            assert_eq!(animated.get(), 3.0);
        }

        // Change the destination; the tween restarts from the current value.
        destination.set(5.0).unwrap();
        counter.set(11.0).unwrap();
        assert_eq!(animated.get(), 3.0);

        counter.set(12.0).unwrap();
        let mid = animated.get();
        assert!(mid > 3.0 && mid < 5.0);

        for i in 13..=21 {
            counter.set(i as f64).unwrap();
        }
        assert_eq!(animated.get(), 5.0);
    }

    #[test]
    fn delay_switches_after_duration() {
        let counter = Binding::new(0.0);
        let early = Binding::new(1.0);
        let late = Binding::new(2.0);
        let delayed = delay(&early, &late, &counter, 5.0);

        assert_eq!(delayed.get(), 1.0);
        counter.set(5.0).unwrap();
        assert_eq!(delayed.get(), 2.0);
    }
}
