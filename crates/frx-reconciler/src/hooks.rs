#![forbid(unsafe_code)]

//! Hooks dispatcher.
//!
//! A component receives a [`Hooks`] handle for the duration of one render.
//! Hooks are matched to the previous render's hooks by call order, so a
//! component must call the same hooks in the same order on every render; a
//! mismatch fails the render with a [`RenderError`].
//!
//! Setters never touch the tree. They append to the hook's update queue and
//! post the fiber to the root mailbox; the update is folded into state the
//! next time the component renders at a matching lane.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use frx_core::{
    BaseState, EffectFlags, HookFlags, Interrupt, Lanes, PendingUpdates, RenderError, Resource,
    UpdateAction, UpdateTrigger, process_updates,
};
use smallvec::SmallVec;

use crate::context::{Context, ContextId, ContextStack};
use crate::fiber::FiberId;
use crate::mailbox::{MailItem, RootShared};

/// Teardown returned by an effect.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    pub(crate) fn run(self) {
        (self.0)();
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup(..)")
    }
}

/// What an effect body may return.
pub trait IntoEffectResult {
    fn into_effect_result(self) -> Result<Option<Cleanup>, RenderError>;
}

impl IntoEffectResult for () {
    fn into_effect_result(self) -> Result<Option<Cleanup>, RenderError> {
        Ok(None)
    }
}

impl IntoEffectResult for Cleanup {
    fn into_effect_result(self) -> Result<Option<Cleanup>, RenderError> {
        Ok(Some(self))
    }
}

impl IntoEffectResult for Option<Cleanup> {
    fn into_effect_result(self) -> Result<Option<Cleanup>, RenderError> {
        Ok(self)
    }
}

impl<R: IntoEffectResult> IntoEffectResult for Result<R, RenderError> {
    fn into_effect_result(self) -> Result<Option<Cleanup>, RenderError> {
        self.and_then(R::into_effect_result)
    }
}

pub(crate) type EffectCreate = Box<dyn FnOnce() -> Result<Option<Cleanup>, RenderError>>;

/// Type-erased dependency list with its equality.
#[derive(Clone)]
struct Deps {
    value: Rc<dyn Any>,
    eq: fn(&dyn Any, &dyn Any) -> bool,
}

impl Deps {
    fn new<D: PartialEq + 'static>(deps: D) -> Self {
        Self {
            value: Rc::new(deps),
            eq: |a, b| match (a.downcast_ref::<D>(), b.downcast_ref::<D>()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    fn same_as(&self, other: &Deps) -> bool {
        (self.eq)(&*self.value, &*other.value)
    }
}

/// One effect slot.
pub(crate) struct EffectHook {
    pub(crate) flags: HookFlags,
    create: RefCell<Option<EffectCreate>>,
    /// Cleanup of the last run, shared with the previous render's slot.
    pub(crate) destroy: Rc<RefCell<Option<Cleanup>>>,
    deps: Option<Deps>,
}

impl EffectHook {
    /// True if this slot has to fire in the sub-phase `kind`.
    pub(crate) fn fires(&self, kind: HookFlags) -> bool {
        self.flags.contains(kind | HookFlags::HAS_EFFECT)
    }

    pub(crate) fn is(&self, kind: HookFlags) -> bool {
        self.flags.contains(kind)
    }

    pub(crate) fn take_create(&self) -> Option<EffectCreate> {
        self.create.borrow_mut().take()
    }

    pub(crate) fn take_destroy(&self) -> Option<Cleanup> {
        self.destroy.borrow_mut().take()
    }

    pub(crate) fn set_destroy(&self, cleanup: Option<Cleanup>) {
        *self.destroy.borrow_mut() = cleanup;
    }
}

/// A hook slot as stored on the fiber.
#[derive(Clone)]
pub(crate) enum Hook {
    State(Rc<dyn Any>),
    Effect(Rc<EffectHook>),
    Memo(Rc<dyn Any>),
    Ref(Rc<dyn Any>),
    Id(Rc<str>),
}

impl Hook {
    fn name(&self) -> &'static str {
        match self {
            Self::State(_) => "state",
            Self::Effect(_) => "effect",
            Self::Memo(_) => "memo",
            Self::Ref(_) => "ref",
            Self::Id(_) => "id",
        }
    }
}

/// Updates the state of a [`Hooks::use_state`] slot.
pub struct SetState<S> {
    fiber: FiberId,
    queue: Rc<RefCell<PendingUpdates<S>>>,
    root: Weak<RootShared>,
}

impl<S> Clone for SetState<S> {
    fn clone(&self) -> Self {
        Self {
            fiber: self.fiber,
            queue: Rc::clone(&self.queue),
            root: Weak::clone(&self.root),
        }
    }
}

impl<S> fmt::Debug for SetState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetState")
            .field("fiber", &self.fiber)
            .field("queued", &self.queue.borrow().len())
            .finish()
    }
}

impl<S: 'static> SetState<S> {
    /// Replace the state.
    pub fn set(&self, value: S) {
        self.dispatch(None, UpdateAction::Replace(value));
    }

    /// Replace the state on the lane of `trigger`.
    pub fn set_with(&self, trigger: UpdateTrigger, value: S) {
        self.dispatch(Some(trigger), UpdateAction::Replace(value));
    }

    /// Compute the next state from the previous one.
    pub fn update(&self, f: impl Fn(&S) -> S + 'static) {
        self.dispatch(None, UpdateAction::Transform(Rc::new(f)));
    }

    pub fn update_with(&self, trigger: UpdateTrigger, f: impl Fn(&S) -> S + 'static) {
        self.dispatch(Some(trigger), UpdateAction::Transform(Rc::new(f)));
    }

    fn dispatch(&self, trigger: Option<UpdateTrigger>, action: UpdateAction<S>) {
        let Some(root) = self.root.upgrade() else {
            tracing::warn!(fiber = %self.fiber, "state update after the root was dropped");
            return;
        };
        let lane = root.request_lane(trigger);
        self.queue.borrow_mut().push(lane, action);
        root.enqueue(MailItem::Update {
            fiber: self.fiber,
            lane,
        });
    }
}

/// Sends actions to a [`Hooks::use_reducer`] slot.
pub struct Dispatch<A> {
    send: Rc<dyn Fn(Option<UpdateTrigger>, A)>,
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self {
            send: Rc::clone(&self.send),
        }
    }
}

impl<A> fmt::Debug for Dispatch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dispatch(..)")
    }
}

impl<A> Dispatch<A> {
    pub fn dispatch(&self, action: A) {
        (self.send)(None, action);
    }

    pub fn dispatch_with(&self, trigger: UpdateTrigger, action: A) {
        (self.send)(Some(trigger), action);
    }
}

struct StateCell<S> {
    value: S,
    base: BaseState<S>,
    setter: SetState<S>,
}

struct ReducerCell<S, A> {
    state: StateCell<S>,
    dispatch: Dispatch<A>,
}

struct MemoCell<T, D> {
    deps: D,
    value: T,
}

/// What a render left behind besides its output.
pub(crate) struct HookOutput {
    pub hooks: Vec<Hook>,
    pub flags: EffectFlags,
    pub skipped_lanes: Lanes,
    pub state_changed: bool,
    pub context_deps: SmallVec<[ContextId; 2]>,
    pub retirements: Vec<Box<dyn FnOnce()>>,
}

/// The hooks dispatcher handed to a component's render function.
pub struct Hooks<'a> {
    component: &'a str,
    fiber: FiberId,
    prev: Option<Rc<Vec<Hook>>>,
    index: usize,
    render_lanes: Lanes,
    shared: &'a Rc<RootShared>,
    contexts: &'a ContextStack,
    out: HookOutput,
    error: Option<RenderError>,
}

impl<'a> Hooks<'a> {
    pub(crate) fn new(
        component: &'a str,
        fiber: FiberId,
        prev: Option<Rc<Vec<Hook>>>,
        render_lanes: Lanes,
        shared: &'a Rc<RootShared>,
        contexts: &'a ContextStack,
    ) -> Self {
        Self {
            component,
            fiber,
            prev,
            index: 0,
            render_lanes,
            shared,
            contexts,
            out: HookOutput {
                hooks: Vec::new(),
                flags: EffectFlags::empty(),
                skipped_lanes: Lanes::empty(),
                state_changed: false,
                context_deps: SmallVec::new(),
                retirements: Vec::new(),
            },
            error: None,
        }
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            tracing::warn!(component = self.component, %message, "hook misuse");
            self.error = Some(RenderError::new(message));
        }
    }

    /// The previous render's slot at the current position.
    fn previous(&mut self, expected: &'static str) -> Option<Hook> {
        let index = self.index;
        self.index += 1;
        let found = self.prev.as_ref()?.get(index).cloned();
        match found {
            Some(hook) if hook.name() == expected => Some(hook),
            Some(hook) => {
                let message = format!(
                    "{}: hook #{index} changed from {} to {expected} between renders",
                    self.component,
                    hook.name()
                );
                self.fail(message);
                None
            }
            None => {
                let message = format!(
                    "{}: rendered more hooks than during the previous render",
                    self.component
                );
                self.fail(message);
                None
            }
        }
    }

    fn downcast<T: 'static>(&mut self, slot: Option<Rc<dyn Any>>) -> Option<Rc<T>> {
        let slot = slot?;
        match slot.downcast::<T>() {
            Ok(cell) => Some(cell),
            Err(_) => {
                let message = format!(
                    "{}: hook #{} changed its type between renders",
                    self.component,
                    self.index - 1
                );
                self.fail(message);
                None
            }
        }
    }

    fn process<S: Clone + PartialEq + 'static>(&mut self, cell: &StateCell<S>) -> StateCell<S> {
        let queue = Rc::clone(&cell.setter.queue);
        let processed = process_updates(&cell.base, &queue.borrow(), self.render_lanes);
        if processed.state != cell.value {
            self.out.state_changed = true;
        }
        self.out.skipped_lanes |= processed.skipped_lanes;
        let through = processed.consumed_through;
        self.out.retirements.push(Box::new(move || {
            queue.borrow_mut().retire_through(through);
        }));
        StateCell {
            value: processed.state,
            base: processed.base,
            setter: cell.setter.clone(),
        }
    }

    fn mount_state<S: Clone>(&self, value: S) -> StateCell<S> {
        StateCell {
            base: BaseState::new(value.clone()),
            value,
            setter: SetState {
                fiber: self.fiber,
                queue: Rc::new(RefCell::new(PendingUpdates::new())),
                root: Rc::downgrade(self.shared),
            },
        }
    }

    /// Local state. `init` runs on mount only.
    pub fn use_state<S: Clone + PartialEq + 'static>(
        &mut self,
        init: impl FnOnce() -> S,
    ) -> (S, SetState<S>) {
        let prev = self.previous("state");
        let slot = match prev {
            Some(Hook::State(slot)) => Some(slot),
            _ => None,
        };
        let cell = match self.downcast::<StateCell<S>>(slot) {
            Some(prev) => self.process(&prev),
            None => self.mount_state(init()),
        };
        let result = (cell.value.clone(), cell.setter.clone());
        self.out.hooks.push(Hook::State(Rc::new(cell)));
        result
    }

    /// State driven by a reducer. The reducer captured on mount is used for
    /// every action.
    pub fn use_reducer<S, A>(
        &mut self,
        reducer: impl Fn(&S, &A) -> S + 'static,
        init: impl FnOnce() -> S,
    ) -> (S, Dispatch<A>)
    where
        S: Clone + PartialEq + 'static,
        A: 'static,
    {
        let prev = self.previous("state");
        let slot = match prev {
            Some(Hook::State(slot)) => Some(slot),
            _ => None,
        };
        let cell = match self.downcast::<ReducerCell<S, A>>(slot) {
            Some(prev) => ReducerCell {
                state: self.process(&prev.state),
                dispatch: prev.dispatch.clone(),
            },
            None => {
                let state = self.mount_state(init());
                let setter = state.setter.clone();
                let reducer = Rc::new(reducer);
                let send = move |trigger: Option<UpdateTrigger>, action: A| {
                    let reducer = Rc::clone(&reducer);
                    let action = UpdateAction::Transform(Rc::new(move |s: &S| reducer(s, &action)));
                    setter.dispatch(trigger, action);
                };
                ReducerCell {
                    state,
                    dispatch: Dispatch {
                        send: Rc::new(send),
                    },
                }
            }
        };
        let result = (cell.state.value.clone(), cell.dispatch.clone());
        self.out.hooks.push(Hook::State(Rc::new(cell)));
        result
    }

    fn push_effect<R, F>(&mut self, kind: HookFlags, deps: Option<Deps>, create: F)
    where
        R: IntoEffectResult + 'static,
        F: FnOnce() -> R + 'static,
    {
        let prev = match self.previous("effect") {
            Some(Hook::Effect(prev)) => Some(prev),
            _ => None,
        };
        let unchanged = match (&prev, &deps) {
            (Some(prev), Some(deps)) => prev.deps.as_ref().is_some_and(|old| old.same_as(deps)),
            _ => false,
        };
        let mut flags = kind;
        if !unchanged {
            flags |= HookFlags::HAS_EFFECT;
            self.out.flags |= if kind.contains(HookFlags::LAYOUT) {
                EffectFlags::LAYOUT_EFFECT | EffectFlags::UPDATE
            } else {
                EffectFlags::PASSIVE_EFFECT
            };
        }
        let destroy = prev
            .map(|prev| Rc::clone(&prev.destroy))
            .unwrap_or_default();
        let create: EffectCreate = Box::new(move || create().into_effect_result());
        self.out.hooks.push(Hook::Effect(Rc::new(EffectHook {
            flags,
            create: RefCell::new(Some(create)),
            destroy,
            deps,
        })));
    }

    /// Passive effect run after every commit of this component.
    pub fn use_effect<R: IntoEffectResult + 'static>(&mut self, f: impl FnOnce() -> R + 'static) {
        self.push_effect(HookFlags::PASSIVE, None, f);
    }

    /// Passive effect run when `deps` changed since the last commit.
    pub fn use_effect_with<D, R>(&mut self, deps: D, f: impl FnOnce() -> R + 'static)
    where
        D: PartialEq + 'static,
        R: IntoEffectResult + 'static,
    {
        self.push_effect(HookFlags::PASSIVE, Some(Deps::new(deps)), f);
    }

    /// Layout effect run synchronously during every commit of this component.
    pub fn use_layout_effect<R: IntoEffectResult + 'static>(
        &mut self,
        f: impl FnOnce() -> R + 'static,
    ) {
        self.push_effect(HookFlags::LAYOUT, None, f);
    }

    pub fn use_layout_effect_with<D, R>(&mut self, deps: D, f: impl FnOnce() -> R + 'static)
    where
        D: PartialEq + 'static,
        R: IntoEffectResult + 'static,
    {
        self.push_effect(HookFlags::LAYOUT, Some(Deps::new(deps)), f);
    }

    /// Cached computation, recomputed when `deps` changes.
    pub fn use_memo<T, D>(&mut self, deps: D, compute: impl FnOnce(&D) -> T) -> T
    where
        T: Clone + 'static,
        D: PartialEq + 'static,
    {
        let prev = self.previous("memo");
        let slot = match prev {
            Some(Hook::Memo(slot)) => Some(slot),
            _ => None,
        };
        let cached = self.downcast::<MemoCell<T, D>>(slot);
        let cell = match cached {
            Some(cell) if cell.deps == deps => cell,
            _ => {
                let value = compute(&deps);
                Rc::new(MemoCell { deps, value })
            }
        };
        let value = cell.value.clone();
        self.out.hooks.push(Hook::Memo(cell));
        value
    }

    /// A mutable cell that lives as long as the component.
    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        let prev = self.previous("ref");
        let slot = match prev {
            Some(Hook::Ref(slot)) => Some(slot),
            _ => None,
        };
        let cell = match self.downcast::<RefCell<T>>(slot) {
            Some(cell) => cell,
            None => Rc::new(RefCell::new(init())),
        };
        self.out.hooks.push(Hook::Ref(Rc::clone(&cell) as Rc<dyn Any>));
        cell
    }

    /// The value of the nearest provider of `context` above this component.
    pub fn use_context<T: Clone + PartialEq + 'static>(&mut self, context: &Context<T>) -> T {
        if !self.out.context_deps.contains(&context.id()) {
            self.out.context_deps.push(context.id());
        }
        context.read(self.contexts)
    }

    /// The value of `resource`, suspending while it is pending.
    ///
    /// Propagate the result with `?` so the nearest suspense boundary can
    /// show its fallback.
    pub fn use_resource<T: Clone>(&mut self, resource: &Resource<T>) -> Result<T, Interrupt> {
        resource.read()
    }

    /// An identifier unique within the root and stable for the component's
    /// lifetime.
    pub fn use_id(&mut self) -> Rc<str> {
        let id = match self.previous("id") {
            Some(Hook::Id(id)) => id,
            _ => Rc::from(format!(":r{}:", self.shared.next_identifier())),
        };
        self.out.hooks.push(Hook::Id(Rc::clone(&id)));
        id
    }

    /// Name of the component being rendered.
    pub fn component_name(&self) -> &str {
        self.component
    }

    pub(crate) fn finish(self) -> Result<HookOutput, RenderError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if let Some(prev) = &self.prev {
            if self.index < prev.len() {
                return Err(RenderError::new(format!(
                    "{}: rendered fewer hooks than during the previous render",
                    self.component
                )));
            }
        }
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{ManualScheduler, RootId};
    use crate::trace::TraceConfig;
    use frx_core::NodeId;

    fn shared() -> Rc<RootShared> {
        Rc::new(RootShared::new(
            RootId::next(),
            Rc::new(ManualScheduler::new()),
            TraceConfig::default(),
        ))
    }

    fn fiber() -> FiberId {
        let mut arena = frx_core::Arena::new();
        let id: NodeId = arena.insert(());
        id
    }

    #[test]
    fn state_updates_fold_at_render_lanes() {
        let shared = shared();
        let contexts = ContextStack::default();
        let fiber = fiber();

        let mut hooks = Hooks::new("C", fiber, None, Lanes::DEFAULT, &shared, &contexts);
        let (value, set) = hooks.use_state(|| 1);
        assert_eq!(value, 1);
        let first = hooks.finish().unwrap();
        assert!(!first.state_changed);

        set.update(|n| n + 1);
        set.set_with(UpdateTrigger::Transition, 10);
        assert_eq!(shared.take_mail().len(), 2);

        let prev = Some(Rc::new(first.hooks));
        let mut hooks = Hooks::new("C", fiber, prev, Lanes::DEFAULT, &shared, &contexts);
        let (value, _) = hooks.use_state(|| 0);
        assert_eq!(value, 2);
        let out = hooks.finish().unwrap();
        assert!(out.state_changed);
        assert_eq!(out.skipped_lanes, Lanes::TRANSITION_1);
    }

    #[test]
    fn effect_deps_gate_has_effect() {
        let shared = shared();
        let contexts = ContextStack::default();
        let fiber = fiber();

        let mut hooks = Hooks::new("C", fiber, None, Lanes::DEFAULT, &shared, &contexts);
        hooks.use_effect_with(1u8, || ());
        let first = hooks.finish().unwrap();
        assert!(first.flags.contains(EffectFlags::PASSIVE_EFFECT));

        let prev = Some(Rc::new(first.hooks));
        let mut hooks = Hooks::new("C", fiber, prev, Lanes::DEFAULT, &shared, &contexts);
        hooks.use_effect_with(1u8, || ());
        let second = hooks.finish().unwrap();
        assert!(second.flags.is_empty());
        match &second.hooks[0] {
            Hook::Effect(effect) => assert!(!effect.fires(HookFlags::PASSIVE)),
            _ => panic!("expected effect slot"),
        }
    }

    #[test]
    fn hook_order_mismatch_is_an_error() {
        let shared = shared();
        let contexts = ContextStack::default();
        let fiber = fiber();

        let mut hooks = Hooks::new("C", fiber, None, Lanes::DEFAULT, &shared, &contexts);
        hooks.use_state(|| 0u8);
        let first = hooks.finish().unwrap();

        let prev = Some(Rc::new(first.hooks));
        let mut hooks = Hooks::new("C", fiber, prev.clone(), Lanes::DEFAULT, &shared, &contexts);
        hooks.use_ref(|| 0u8);
        let err = hooks.finish().err().unwrap();
        assert!(err.message().contains("changed from state to ref"));

        let hooks = Hooks::new("C", fiber, prev, Lanes::DEFAULT, &shared, &contexts);
        let err = hooks.finish().err().unwrap();
        assert!(err.message().contains("fewer hooks"));
    }

    #[test]
    fn ids_are_stable() {
        let shared = shared();
        let contexts = ContextStack::default();
        let fiber = fiber();
        let mut hooks = Hooks::new("C", fiber, None, Lanes::DEFAULT, &shared, &contexts);
        let id = hooks.use_id();
        let first = hooks.finish().unwrap();
        let mut hooks = Hooks::new(
            "C",
            fiber,
            Some(Rc::new(first.hooks)),
            Lanes::DEFAULT,
            &shared,
            &contexts,
        );
        assert_eq!(hooks.use_id(), id);
        assert_eq!(&*id, ":r0:");
    }
}
