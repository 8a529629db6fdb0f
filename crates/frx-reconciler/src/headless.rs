#![forbid(unsafe_code)]

//! In-memory host for tests, benchmarks and server-side rendering.
//!
//! Keeps a plain node tree, logs every mutation as a [`HostOp`], and renders
//! containers to a compact markup string:
//!
//! ```text
//! <ul class="list"><li>a</li><li>b</li></ul>
//! ```

use std::collections::HashMap;
use std::fmt::{self, Write as _};

use crate::element::{Attrs, PortalId, UpdatePayload};
use crate::error::HostError;
use crate::host::HostConfig;

/// A node of a [`HeadlessHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u32);

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A container of a [`HeadlessHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u32);

/// Where a node is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    Node(NodeHandle),
    Container(ContainerId),
}

/// A logged host mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    Create { node: NodeHandle, tag: String },
    CreateText { node: NodeHandle, text: String },
    Append { parent: Parent, child: NodeHandle },
    InsertBefore {
        parent: Parent,
        child: NodeHandle,
        before: NodeHandle,
    },
    Remove { parent: Parent, child: NodeHandle },
    Update { node: NodeHandle, changes: usize },
    UpdateText { node: NodeHandle, text: String },
    Hide { node: NodeHandle },
    Unhide { node: NodeHandle },
}

impl HostOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::CreateText { .. } => "create_text",
            Self::Append { .. } => "append",
            Self::InsertBefore { .. } => "insert_before",
            Self::Remove { .. } => "remove",
            Self::Update { .. } => "update",
            Self::UpdateText { .. } => "update_text",
            Self::Hide { .. } => "hide",
            Self::Unhide { .. } => "unhide",
        }
    }

    /// True for operations that move or insert nodes.
    pub fn is_insertion(&self) -> bool {
        matches!(self, Self::Append { .. } | Self::InsertBefore { .. })
    }
}

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attrs: Attrs,
        children: Vec<NodeHandle>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeEntry {
    data: NodeData,
    parent: Option<Parent>,
    hidden: bool,
}

/// An in-memory [`HostConfig`].
#[derive(Debug, Default)]
pub struct HeadlessHost {
    nodes: HashMap<NodeHandle, NodeEntry>,
    next_node: u32,
    containers: Vec<Vec<NodeHandle>>,
    portals: HashMap<PortalId, ContainerId>,
    ops: Vec<HostOp>,
    commits: usize,
    fail_on: Option<&'static str>,
}

impl HeadlessHost {
    /// A host with one root container.
    pub fn new() -> Self {
        Self {
            containers: vec![Vec::new()],
            ..Self::default()
        }
    }

    pub fn root_container(&self) -> ContainerId {
        ContainerId(0)
    }

    pub fn add_container(&mut self) -> ContainerId {
        self.containers.push(Vec::new());
        ContainerId(self.containers.len() as u32 - 1)
    }

    /// Create a container that [`portal`](crate::portal) elements with id
    /// `portal` render into.
    pub fn add_portal(&mut self, portal: PortalId) -> ContainerId {
        let container = self.add_container();
        self.portals.insert(portal, container);
        container
    }

    /// Make the next operation named `op` fail (see [`HostOp::name`]).
    pub fn fail_on(&mut self, op: &'static str) {
        self.fail_on = Some(op);
    }

    pub fn ops(&self) -> &[HostOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Logged operations named `name`.
    pub fn count(&self, name: &str) -> usize {
        self.ops.iter().filter(|op| op.name() == name).count()
    }

    /// Number of `prepare_for_commit` calls.
    pub fn commits(&self) -> usize {
        self.commits
    }

    /// Live nodes, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn children(&self, container: ContainerId) -> &[NodeHandle] {
        self.containers
            .get(container.0 as usize)
            .map_or(&[], Vec::as_slice)
    }

    pub fn is_hidden(&self, node: NodeHandle) -> bool {
        self.nodes.get(&node).is_some_and(|n| n.hidden)
    }

    /// Visible content of `container` as markup.
    pub fn markup(&self, container: ContainerId) -> String {
        self.render(container, false)
    }

    /// Like [`markup`](Self::markup), but hidden nodes are included and
    /// marked: elements get a `hidden` attribute, text is wrapped in `(..)`.
    pub fn markup_with_hidden(&self, container: ContainerId) -> String {
        self.render(container, true)
    }

    fn render(&self, container: ContainerId, with_hidden: bool) -> String {
        let mut out = String::new();
        for child in self.children(container) {
            self.write_node(&mut out, *child, with_hidden);
        }
        out
    }

    fn write_node(&self, out: &mut String, node: NodeHandle, with_hidden: bool) {
        let Some(entry) = self.nodes.get(&node) else {
            return;
        };
        if entry.hidden && !with_hidden {
            return;
        }
        match &entry.data {
            NodeData::Text(text) if entry.hidden => {
                let _ = write!(out, "({text})");
            }
            NodeData::Text(text) => out.push_str(text),
            NodeData::Element {
                tag,
                attrs,
                children,
            } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                if entry.hidden {
                    out.push_str(" hidden");
                }
                out.push('>');
                for child in children {
                    self.write_node(out, *child, with_hidden);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    fn check(&mut self, op: &'static str) -> Result<(), HostError> {
        if self.fail_on == Some(op) {
            self.fail_on = None;
            return Err(HostError::Failed(format!("injected failure in {op}")));
        }
        Ok(())
    }

    fn alloc(&mut self, data: NodeData) -> NodeHandle {
        let handle = NodeHandle(self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            handle,
            NodeEntry {
                data,
                parent: None,
                hidden: false,
            },
        );
        handle
    }

    fn entry_mut(&mut self, node: NodeHandle) -> Result<&mut NodeEntry, HostError> {
        self.nodes
            .get_mut(&node)
            .ok_or_else(|| HostError::UnknownNode(node.to_string()))
    }

    fn child_list(&mut self, parent: Parent) -> Result<&mut Vec<NodeHandle>, HostError> {
        match parent {
            Parent::Container(c) => self
                .containers
                .get_mut(c.0 as usize)
                .ok_or_else(|| HostError::Failed(format!("unknown container {}", c.0))),
            Parent::Node(node) => match &mut self.entry_mut(node)?.data {
                NodeData::Element { children, .. } => Ok(children),
                NodeData::Text(_) => Err(HostError::Failed(format!("text node {node} cannot have children"))),
            },
        }
    }

    /// Unlink `child` from wherever it is attached.
    fn detach(&mut self, child: NodeHandle) -> Result<(), HostError> {
        if let Some(parent) = self.entry_mut(child)?.parent.take() {
            self.child_list(parent)?.retain(|c| *c != child);
        }
        Ok(())
    }

    fn attach(
        &mut self,
        parent: Parent,
        child: NodeHandle,
        before: Option<NodeHandle>,
    ) -> Result<(), HostError> {
        self.detach(child)?;
        let list = self.child_list(parent)?;
        match before {
            Some(before) => {
                let index = list
                    .iter()
                    .position(|c| *c == before)
                    .ok_or_else(|| HostError::UnknownNode(before.to_string()))?;
                list.insert(index, child);
            }
            None => list.push(child),
        }
        self.entry_mut(child)?.parent = Some(parent);
        Ok(())
    }

    fn remove(&mut self, parent: Parent, child: NodeHandle) -> Result<(), HostError> {
        let attached = self.nodes.get(&child).and_then(|n| n.parent);
        if attached != Some(parent) {
            return Err(HostError::UnknownNode(format!("{child} is not a child of {parent:?}")));
        }
        self.detach(child)?;
        // Drop the whole detached subtree.
        let mut stack = vec![child];
        while let Some(node) = stack.pop() {
            if let Some(entry) = self.nodes.remove(&node) {
                if let NodeData::Element { children, .. } = entry.data {
                    stack.extend(children);
                }
            }
        }
        Ok(())
    }

    fn set_hidden(&mut self, node: NodeHandle, hidden: bool) -> Result<(), HostError> {
        self.entry_mut(node)?.hidden = hidden;
        Ok(())
    }

    fn container_for(&self, container: &ContainerId) -> Result<ContainerId, HostError> {
        if (container.0 as usize) < self.containers.len() {
            Ok(*container)
        } else {
            Err(HostError::Failed(format!("unknown container {}", container.0)))
        }
    }
}

impl HostConfig for HeadlessHost {
    type Node = NodeHandle;
    type Container = ContainerId;

    fn create_instance(&mut self, tag: &str, attrs: &Attrs) -> Result<NodeHandle, HostError> {
        self.check("create")?;
        let node = self.alloc(NodeData::Element {
            tag: tag.to_string(),
            attrs: attrs.clone(),
            children: Vec::new(),
        });
        self.ops.push(HostOp::Create {
            node,
            tag: tag.to_string(),
        });
        Ok(node)
    }

    fn create_text_instance(&mut self, text: &str) -> Result<NodeHandle, HostError> {
        self.check("create_text")?;
        let node = self.alloc(NodeData::Text(text.to_string()));
        self.ops.push(HostOp::CreateText {
            node,
            text: text.to_string(),
        });
        Ok(node)
    }

    fn append_child(&mut self, parent: &NodeHandle, child: &NodeHandle) -> Result<(), HostError> {
        self.check("append")?;
        let parent = Parent::Node(*parent);
        self.attach(parent, *child, None)?;
        self.ops.push(HostOp::Append {
            parent,
            child: *child,
        });
        Ok(())
    }

    fn append_child_to_container(
        &mut self,
        container: &ContainerId,
        child: &NodeHandle,
    ) -> Result<(), HostError> {
        self.check("append")?;
        let parent = Parent::Container(self.container_for(container)?);
        self.attach(parent, *child, None)?;
        self.ops.push(HostOp::Append {
            parent,
            child: *child,
        });
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: &NodeHandle,
        child: &NodeHandle,
        before: &NodeHandle,
    ) -> Result<(), HostError> {
        self.check("insert_before")?;
        let parent = Parent::Node(*parent);
        self.attach(parent, *child, Some(*before))?;
        self.ops.push(HostOp::InsertBefore {
            parent,
            child: *child,
            before: *before,
        });
        Ok(())
    }

    fn insert_in_container_before(
        &mut self,
        container: &ContainerId,
        child: &NodeHandle,
        before: &NodeHandle,
    ) -> Result<(), HostError> {
        self.check("insert_before")?;
        let parent = Parent::Container(self.container_for(container)?);
        self.attach(parent, *child, Some(*before))?;
        self.ops.push(HostOp::InsertBefore {
            parent,
            child: *child,
            before: *before,
        });
        Ok(())
    }

    fn remove_child(&mut self, parent: &NodeHandle, child: &NodeHandle) -> Result<(), HostError> {
        self.check("remove")?;
        let parent = Parent::Node(*parent);
        self.remove(parent, *child)?;
        self.ops.push(HostOp::Remove {
            parent,
            child: *child,
        });
        Ok(())
    }

    fn remove_child_from_container(
        &mut self,
        container: &ContainerId,
        child: &NodeHandle,
    ) -> Result<(), HostError> {
        self.check("remove")?;
        let parent = Parent::Container(self.container_for(container)?);
        self.remove(parent, *child)?;
        self.ops.push(HostOp::Remove {
            parent,
            child: *child,
        });
        Ok(())
    }

    fn commit_update(
        &mut self,
        node: &NodeHandle,
        _tag: &str,
        payload: &UpdatePayload,
    ) -> Result<(), HostError> {
        self.check("update")?;
        match &mut self.entry_mut(*node)?.data {
            NodeData::Element { attrs, .. } => {
                for change in &payload.changes {
                    match &change.value {
                        Some(value) => {
                            attrs.insert(change.name.clone(), value.clone());
                        }
                        None => {
                            attrs.remove(&change.name);
                        }
                    }
                }
            }
            NodeData::Text(_) => {
                return Err(HostError::Failed(format!("attribute update on text node {node}")));
            }
        }
        self.ops.push(HostOp::Update {
            node: *node,
            changes: payload.len(),
        });
        Ok(())
    }

    fn commit_text_update(
        &mut self,
        node: &NodeHandle,
        _old_text: &str,
        new_text: &str,
    ) -> Result<(), HostError> {
        self.check("update_text")?;
        match &mut self.entry_mut(*node)?.data {
            NodeData::Text(text) => *text = new_text.to_string(),
            NodeData::Element { .. } => {
                return Err(HostError::Failed(format!("text update on element {node}")));
            }
        }
        self.ops.push(HostOp::UpdateText {
            node: *node,
            text: new_text.to_string(),
        });
        Ok(())
    }

    fn prepare_for_commit(&mut self, _container: &ContainerId) -> Result<(), HostError> {
        self.commits += 1;
        Ok(())
    }

    fn hide_instance(&mut self, node: &NodeHandle) -> Result<(), HostError> {
        self.check("hide")?;
        self.set_hidden(*node, true)?;
        self.ops.push(HostOp::Hide { node: *node });
        Ok(())
    }

    fn unhide_instance(&mut self, node: &NodeHandle) -> Result<(), HostError> {
        self.check("unhide")?;
        self.set_hidden(*node, false)?;
        self.ops.push(HostOp::Unhide { node: *node });
        Ok(())
    }

    fn hide_text_instance(&mut self, node: &NodeHandle) -> Result<(), HostError> {
        self.hide_instance(node)
    }

    fn unhide_text_instance(&mut self, node: &NodeHandle, _text: &str) -> Result<(), HostError> {
        self.unhide_instance(node)
    }

    fn portal_container(&mut self, portal: PortalId) -> Result<ContainerId, HostError> {
        self.portals
            .get(&portal)
            .copied()
            .ok_or(HostError::UnknownPortal(portal.0))
    }
}
