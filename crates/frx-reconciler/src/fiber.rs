#![forbid(unsafe_code)]

//! Work units ("fibers") and their dual-buffered store.
//!
//! Every mounted element is backed by up to two fibers: the *current* one,
//! reachable from the root's committed tree, and its *alternate*, recycled as
//! the work-in-progress copy for the next pass. Fibers live in a generational
//! [`Arena`]; alternates are kept in a parallel table so that a handle to a
//! freed fiber never resolves.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Index, IndexMut};
use std::rc::Rc;

use frx_core::{Arena, BaseState, CapturedError, Dependency, EffectFlags, Lane, Lanes, NodeId};
use smallvec::SmallVec;

use crate::boundary::BoundaryStatus;
use crate::context::ContextId;
use crate::element::{ComponentType, Element, ElementKind, Key, PortalId, UpdatePayload};
use crate::hooks::Hook;
use crate::host::NodeRef;

/// Handle to a fiber.
pub type FiberId = NodeId;

/// Handle to a host node owned by a root.
pub(crate) type HostHandle = NodeId;

/// What a fiber is.
#[derive(Clone)]
pub(crate) enum FiberKind {
    HostRoot,
    Host(Rc<str>),
    Text,
    Function(ComponentType),
    Fragment,
    Provider(ContextId),
    Suspense,
    Offscreen,
    ErrorBoundary,
    Portal(PortalId),
}

impl FiberKind {
    pub(crate) fn from_element(element: &Element) -> Self {
        match element.kind() {
            ElementKind::Host { tag, .. } => Self::Host(Rc::clone(tag)),
            ElementKind::Text(_) => Self::Text,
            ElementKind::Component { component, .. } => Self::Function(component.clone()),
            ElementKind::Fragment(_) => Self::Fragment,
            ElementKind::Suspense { .. } => Self::Suspense,
            ElementKind::ErrorBoundary { .. } => Self::ErrorBoundary,
            ElementKind::Provider { context, .. } => Self::Provider(*context),
            ElementKind::Portal { portal, .. } => Self::Portal(*portal),
            ElementKind::Offscreen { .. } => Self::Offscreen,
        }
    }

    /// Whether a fiber of this kind can be reused for `element`.
    pub(crate) fn matches(&self, element: &Element) -> bool {
        match (self, element.kind()) {
            (Self::Host(a), ElementKind::Host { tag, .. }) => a == tag,
            (Self::Text, ElementKind::Text(_))
            | (Self::Fragment, ElementKind::Fragment(_))
            | (Self::Suspense, ElementKind::Suspense { .. })
            | (Self::ErrorBoundary, ElementKind::ErrorBoundary { .. })
            | (Self::Offscreen, ElementKind::Offscreen { .. }) => true,
            (Self::Function(a), ElementKind::Component { component, .. }) => a.ptr_eq(component),
            (Self::Provider(a), ElementKind::Provider { context, .. }) => a == context,
            (Self::Portal(a), ElementKind::Portal { portal, .. }) => a == portal,
            _ => false,
        }
    }

    /// Kinds that own a host node or host container.
    pub(crate) fn is_host_parent(&self) -> bool {
        matches!(self, Self::HostRoot | Self::Host(_) | Self::Portal(_))
    }

    pub(crate) fn is_host_node(&self) -> bool {
        matches!(self, Self::Host(_) | Self::Text)
    }

    pub(crate) fn label(&self) -> String {
        match self {
            Self::HostRoot => "Root".into(),
            Self::Host(tag) => tag.to_string(),
            Self::Text => "#text".into(),
            Self::Function(component) => component.name().to_string(),
            Self::Fragment => "Fragment".into(),
            Self::Provider(_) => "Provider".into(),
            Self::Suspense => "Suspense".into(),
            Self::Offscreen => "Offscreen".into(),
            Self::ErrorBoundary => "ErrorBoundary".into(),
            Self::Portal(_) => "Portal".into(),
        }
    }
}

/// State of the host root.
#[derive(Clone)]
pub(crate) struct RootState {
    pub element: Option<Element>,
    pub base: BaseState<Option<Element>>,
}

/// Suspense boundary record.
#[derive(Debug, Clone, Default)]
pub(crate) enum SuspenseState {
    /// Primary children are shown.
    #[default]
    Visible,
    /// Rendered the fallback in this pass; not committed yet.
    Suspended { pending: Vec<Dependency> },
    /// The fallback is committed; `retry_lane` re-renders the boundary once
    /// any of `pending` settles.
    FallbackVisible {
        retry_lane: Lane,
        pending: Vec<Dependency>,
    },
}

impl SuspenseState {
    pub(crate) fn is_visible(&self) -> bool {
        matches!(self, Self::Visible)
    }
}

/// Error boundary record.
#[derive(Clone)]
pub(crate) struct BoundaryRecord {
    pub status: BoundaryStatus,
    /// Recovery attempts since the boundary was last healthy.
    pub attempts: u32,
    /// Errors from commit-phase effects awaiting the deferred render.
    /// Shared by both buffers.
    pub captured: Rc<RefCell<VecDeque<CapturedError>>>,
}

impl BoundaryRecord {
    pub(crate) fn new() -> Self {
        Self {
            status: BoundaryStatus::Healthy,
            attempts: 0,
            captured: Rc::new(RefCell::new(VecDeque::new())),
        }
    }
}

/// Per-kind memoized state.
#[derive(Clone, Default)]
pub(crate) enum FiberState {
    #[default]
    None,
    Hooks(Rc<Vec<Hook>>),
    Root(RootState),
    Suspense(SuspenseState),
    Boundary(BoundaryRecord),
    Offscreen { hidden: bool },
}

impl FiberState {
    fn initial(kind: &FiberKind) -> Self {
        match kind {
            FiberKind::Suspense => Self::Suspense(SuspenseState::Visible),
            FiberKind::ErrorBoundary => Self::Boundary(BoundaryRecord::new()),
            FiberKind::Offscreen => Self::Offscreen { hidden: false },
            _ => Self::None,
        }
    }
}

/// One work unit.
#[derive(Clone)]
pub(crate) struct Fiber {
    pub kind: FiberKind,
    pub key: Option<Key>,
    pub pending_props: Option<Element>,
    pub memoized_props: Option<Element>,
    pub state: FiberState,
    pub lanes: Lanes,
    pub child_lanes: Lanes,
    pub flags: EffectFlags,
    pub subtree_flags: EffectFlags,
    pub parent: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    pub index: usize,
    pub host: Option<HostHandle>,
    pub update_payload: Option<UpdatePayload>,
    pub context_deps: SmallVec<[ContextId; 2]>,
    pub node_ref: Option<NodeRef>,
}

impl Fiber {
    pub(crate) fn new(kind: FiberKind, key: Option<Key>, props: Option<Element>) -> Self {
        let state = FiberState::initial(&kind);
        Self {
            kind,
            key,
            pending_props: props,
            memoized_props: None,
            state,
            lanes: Lanes::empty(),
            child_lanes: Lanes::empty(),
            flags: EffectFlags::empty(),
            subtree_flags: EffectFlags::empty(),
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            host: None,
            update_payload: None,
            context_deps: SmallVec::new(),
            node_ref: None,
        }
    }

    pub(crate) fn root() -> Self {
        let mut fiber = Self::new(FiberKind::HostRoot, None, None);
        fiber.state = FiberState::Root(RootState {
            element: None,
            base: BaseState::new(None),
        });
        fiber
    }

    /// Props of this pass, falling back to the committed props.
    pub(crate) fn props(&self) -> Option<&Element> {
        self.pending_props.as_ref().or(self.memoized_props.as_ref())
    }

    pub(crate) fn hooks(&self) -> Option<&Rc<Vec<Hook>>> {
        match &self.state {
            FiberState::Hooks(hooks) => Some(hooks),
            _ => None,
        }
    }
}

/// Arena of fibers plus the alternate table.
#[derive(Default)]
pub(crate) struct FiberStore {
    fibers: Arena<Fiber>,
    alternates: HashMap<FiberId, FiberId>,
}

impl FiberStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.fibers.len()
    }

    pub(crate) fn insert(&mut self, fiber: Fiber) -> FiberId {
        self.fibers.insert(fiber)
    }

    pub(crate) fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains(id)
    }

    pub(crate) fn get(&self, id: FiberId) -> Option<&Fiber> {
        self.fibers.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.fibers.get_mut(id)
    }

    /// The other buffer of `id`, if it is still alive.
    pub(crate) fn alternate(&self, id: FiberId) -> Option<FiberId> {
        self.alternates
            .get(&id)
            .copied()
            .filter(|alt| self.fibers.contains(*alt))
    }

    /// Work-in-progress copy of `current` carrying `props`.
    ///
    /// Recycles the alternate when there is one, otherwise clones `current`
    /// and links the two.
    pub(crate) fn create_work_in_progress(
        &mut self,
        current: FiberId,
        props: Option<Element>,
    ) -> FiberId {
        let source = &self.fibers[current];
        let mut copy = source.clone();
        copy.pending_props = props;
        copy.flags = EffectFlags::empty();
        copy.subtree_flags = EffectFlags::empty();
        copy.update_payload = None;

        match self.alternate(current) {
            Some(wip) => {
                let fiber = &mut self.fibers[wip];
                // Tree position is assigned by the caller.
                copy.parent = fiber.parent;
                copy.sibling = fiber.sibling;
                *fiber = copy;
                wip
            }
            None => {
                let wip = self.fibers.insert(copy);
                self.alternates.insert(current, wip);
                self.alternates.insert(wip, current);
                wip
            }
        }
    }

    /// A fresh fiber for `element`, with no alternate.
    pub(crate) fn create_from_element(&mut self, element: &Element) -> FiberId {
        let mut fiber = Fiber::new(
            FiberKind::from_element(element),
            element.key().cloned(),
            Some(element.clone()),
        );
        fiber.node_ref = element.node_ref().cloned();
        self.fibers.insert(fiber)
    }

    /// Children of `id` in sibling order.
    pub(crate) fn children(&self, id: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut next = self.get(id).and_then(|f| f.child);
        while let Some(child) = next {
            out.push(child);
            next = self.get(child).and_then(|f| f.sibling);
        }
        out
    }

    /// Pre-order list of `id` and all its descendants.
    pub(crate) fn subtree(&self, id: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if !self.contains(node) {
                continue;
            }
            out.push(node);
            let mut children = self.children(node);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Owner chain of `id`, innermost first, excluding the host root.
    pub(crate) fn component_stack(&self, id: FiberId) -> Vec<String> {
        let mut stack = Vec::new();
        let mut next = Some(id);
        while let Some(node) = next {
            let Some(fiber) = self.get(node) else { break };
            match fiber.kind {
                FiberKind::HostRoot => break,
                FiberKind::Offscreen => {}
                _ => stack.push(fiber.kind.label()),
            }
            next = fiber.parent;
        }
        stack
    }

    /// Add `lanes` to `id` and its alternate.
    pub(crate) fn mark_lanes(&mut self, id: FiberId, lanes: Lanes) {
        if let Some(fiber) = self.fibers.get_mut(id) {
            fiber.lanes |= lanes;
        }
        if let Some(alt) = self.alternate(id) {
            self.fibers[alt].lanes |= lanes;
        }
    }

    /// Add `lanes` to the child lanes of every ancestor of `id`, on both
    /// buffers. Returns the topmost ancestor reached.
    pub(crate) fn mark_ancestors(&mut self, id: FiberId, lanes: Lanes) -> FiberId {
        let mut node = id;
        while let Some(parent) = self.get(node).and_then(|f| f.parent) {
            if !self.contains(parent) {
                break;
            }
            self.fibers[parent].child_lanes |= lanes;
            if let Some(alt) = self.alternate(parent) {
                self.fibers[alt].child_lanes |= lanes;
            }
            node = parent;
        }
        node
    }

    /// Free every fiber not reachable from `roots`, keeping the alternates of
    /// reachable fibers. Returns the number of fibers freed.
    pub(crate) fn sweep(&mut self, roots: &[FiberId]) -> usize {
        let mut live: HashSet<FiberId> = HashSet::new();
        for &root in roots {
            for id in self.subtree(root) {
                live.insert(id);
            }
        }
        let alternates: Vec<FiberId> = live.iter().filter_map(|id| self.alternate(*id)).collect();
        live.extend(alternates);

        let removed = self.fibers.retain(|id, _| live.contains(&id));
        self.alternates
            .retain(|a, b| live.contains(a) && live.contains(b));
        if !removed.is_empty() {
            tracing::trace!(freed = removed.len(), "fiber sweep");
        }
        removed.len()
    }
}

impl Index<FiberId> for FiberStore {
    type Output = Fiber;

    fn index(&self, id: FiberId) -> &Fiber {
        &self.fibers[id]
    }
}

impl IndexMut<FiberId> for FiberStore {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber {
        &mut self.fibers[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{h, text};

    #[test]
    fn work_in_progress_recycles_alternate() {
        let mut store = FiberStore::new();
        let el = h("div").build();
        let current = store.create_from_element(&el);
        store[current].flags = EffectFlags::PLACEMENT;
        store[current].lanes = Lanes::DEFAULT;

        let wip = store.create_work_in_progress(current, Some(el.clone()));
        assert_ne!(wip, current);
        assert_eq!(store.alternate(wip), Some(current));
        assert_eq!(store.alternate(current), Some(wip));
        assert!(store[wip].flags.is_empty());
        assert_eq!(store[wip].lanes, Lanes::DEFAULT);

        let again = store.create_work_in_progress(current, Some(el));
        assert_eq!(again, wip);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn sweep_keeps_reachable_and_alternates() {
        let mut store = FiberStore::new();
        let root = store.insert(Fiber::root());
        let a = store.create_from_element(&text("a"));
        let b = store.create_from_element(&text("b"));
        store[root].child = Some(a);
        store[a].parent = Some(root);
        let a_alt = store.create_work_in_progress(a, None);
        let orphan = store.create_from_element(&text("orphan"));

        let freed = store.sweep(&[root]);
        assert_eq!(freed, 2);
        assert!(store.contains(a_alt));
        assert!(!store.contains(b));
        assert!(!store.contains(orphan));
    }

    #[test]
    fn marking_walks_both_buffers() {
        let mut store = FiberStore::new();
        let root = store.insert(Fiber::root());
        let child = store.create_from_element(&text("x"));
        store[root].child = Some(child);
        store[child].parent = Some(root);
        let root_alt = store.create_work_in_progress(root, None);

        store.mark_lanes(child, Lanes::SYNC);
        let top = store.mark_ancestors(child, Lanes::SYNC);
        assert_eq!(top, root);
        assert!(store[root].child_lanes.contains(Lanes::SYNC));
        assert!(store[root_alt].child_lanes.contains(Lanes::SYNC));
        assert_eq!(store.component_stack(child), vec!["#text".to_string()]);
    }
}
