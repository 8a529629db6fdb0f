#![forbid(unsafe_code)]

//! The boundary between the reconciler and a platform renderer.
//!
//! A [`HostConfig`] owns real nodes (DOM elements, terminal cells, native
//! views). The reconciler calls it only from the mutation sub-phase of a
//! commit; rendering never touches the host.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::element::{Attrs, PortalId, UpdatePayload};
use crate::error::HostError;

/// Mutation primitives of a host renderer.
///
/// Optional primitives default to [`HostError::Unsupported`]; the commit
/// fails only if a tree actually needs them (e.g. `hide_instance` for a
/// suspense boundary hiding already-visible content).
pub trait HostConfig {
    /// A host node. Cloning must produce another handle to the same node.
    type Node: Clone + 'static;
    /// A top-level attachment point.
    type Container: Clone;

    fn create_instance(&mut self, tag: &str, attrs: &Attrs) -> Result<Self::Node, HostError>;

    fn create_text_instance(&mut self, text: &str) -> Result<Self::Node, HostError>;

    /// Append `child`, moving it to the end if it is already a child.
    fn append_child(&mut self, parent: &Self::Node, child: &Self::Node) -> Result<(), HostError>;

    fn append_child_to_container(
        &mut self,
        container: &Self::Container,
        child: &Self::Node,
    ) -> Result<(), HostError>;

    /// Insert `child` before `before`, moving it if it is already a child.
    fn insert_before(
        &mut self,
        parent: &Self::Node,
        child: &Self::Node,
        before: &Self::Node,
    ) -> Result<(), HostError>;

    fn insert_in_container_before(
        &mut self,
        container: &Self::Container,
        child: &Self::Node,
        before: &Self::Node,
    ) -> Result<(), HostError>;

    fn remove_child(&mut self, parent: &Self::Node, child: &Self::Node) -> Result<(), HostError>;

    fn remove_child_from_container(
        &mut self,
        container: &Self::Container,
        child: &Self::Node,
    ) -> Result<(), HostError>;

    fn commit_update(
        &mut self,
        node: &Self::Node,
        tag: &str,
        payload: &UpdatePayload,
    ) -> Result<(), HostError>;

    fn commit_text_update(
        &mut self,
        node: &Self::Node,
        old_text: &str,
        new_text: &str,
    ) -> Result<(), HostError>;

    /// Called once before the mutation sub-phase.
    fn prepare_for_commit(&mut self, _container: &Self::Container) -> Result<(), HostError> {
        Ok(())
    }

    /// Called once after the mutation sub-phase.
    fn reset_after_commit(&mut self, _container: &Self::Container) -> Result<(), HostError> {
        Ok(())
    }

    fn hide_instance(&mut self, _node: &Self::Node) -> Result<(), HostError> {
        Err(HostError::Unsupported("hide_instance"))
    }

    fn unhide_instance(&mut self, _node: &Self::Node) -> Result<(), HostError> {
        Err(HostError::Unsupported("unhide_instance"))
    }

    fn hide_text_instance(&mut self, _node: &Self::Node) -> Result<(), HostError> {
        Err(HostError::Unsupported("hide_text_instance"))
    }

    fn unhide_text_instance(&mut self, _node: &Self::Node, _text: &str) -> Result<(), HostError> {
        Err(HostError::Unsupported("unhide_text_instance"))
    }

    /// Resolve the container a portal renders into.
    fn portal_container(&mut self, portal: PortalId) -> Result<Self::Container, HostError> {
        Err(HostError::UnknownPortal(portal.0))
    }
}

/// Where host nodes of a subtree are attached.
pub(crate) enum HostParent<H: HostConfig> {
    Container(H::Container),
    Node(H::Node),
}

impl<H: HostConfig> HostParent<H> {
    pub(crate) fn insert(
        &self,
        host: &mut H,
        child: &H::Node,
        before: Option<&H::Node>,
    ) -> Result<(), HostError> {
        match (self, before) {
            (Self::Node(parent), Some(before)) => host.insert_before(parent, child, before),
            (Self::Node(parent), None) => host.append_child(parent, child),
            (Self::Container(c), Some(before)) => host.insert_in_container_before(c, child, before),
            (Self::Container(c), None) => host.append_child_to_container(c, child),
        }
    }

    pub(crate) fn remove(&self, host: &mut H, child: &H::Node) -> Result<(), HostError> {
        match self {
            Self::Node(parent) => host.remove_child(parent, child),
            Self::Container(c) => host.remove_child_from_container(c, child),
        }
    }
}

/// A handle that receives the host node of the element it is attached to.
///
/// Refs are detached during the mutation sub-phase and attached during the
/// layout sub-phase, so layout effects always observe the committed node.
#[derive(Clone, Default)]
pub struct NodeRef(Rc<RefCell<Option<Rc<dyn Any>>>>);

impl NodeRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// The attached node, if it is of type `N`.
    pub fn get<N: Clone + 'static>(&self) -> Option<N> {
        self.0
            .borrow()
            .as_ref()
            .and_then(|node| node.downcast_ref::<N>())
            .cloned()
    }

    pub fn is_attached(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn attach(&self, node: Rc<dyn Any>) {
        *self.0.borrow_mut() = Some(node);
    }

    pub(crate) fn detach(&self) {
        self.0.borrow_mut().take();
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ref_attach_detach() {
        let r = NodeRef::new();
        assert!(!r.is_attached());
        r.attach(Rc::new(7u32));
        assert_eq!(r.get::<u32>(), Some(7));
        assert_eq!(r.get::<u64>(), None);
        let alias = r.clone();
        assert!(alias.ptr_eq(&r));
        alias.detach();
        assert!(!r.is_attached());
    }
}
