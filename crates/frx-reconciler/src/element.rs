#![forbid(unsafe_code)]

//! Declarative element trees.
//!
//! An [`Element`] is an immutable, reference-counted description of what a
//! part of the UI should look like. Elements are cheap to clone and are
//! compared by pointer: handing the reconciler the *same* element again is
//! how a subtree says "nothing changed here".

use std::any::Any;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use frx_core::{CapturedError, RenderError, RenderResult};

use crate::context::{ContextId, ContextValue};
use crate::hooks::Hooks;
use crate::host::NodeRef;

/// Explicit identity of an element among its siblings.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Key(Rc<str>);

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", &*self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(Rc::from(s))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(Rc::from(s))
    }
}

macro_rules! key_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Key {
            fn from(n: $t) -> Self {
                Self(Rc::from(n.to_string()))
            }
        })*
    };
}

key_from_int!(u32, u64, usize, i32, i64);

/// A host attribute value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum PropValue {
    Str(Rc<str>),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for PropValue {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<i64> for PropValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for PropValue {
    fn from(n: i32) -> Self {
        Self::Int(n.into())
    }
}

impl From<u32> for PropValue {
    fn from(n: u32) -> Self {
        Self::Int(n.into())
    }
}

impl From<f64> for PropValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for PropValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Host element attributes, ordered by name.
pub type Attrs = BTreeMap<Rc<str>, PropValue>;

/// One attribute change. `value == None` means removed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AttrChange {
    pub name: Rc<str>,
    pub value: Option<PropValue>,
}

/// Attribute changes to apply to an existing host instance.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UpdatePayload {
    pub changes: Vec<AttrChange>,
}

impl UpdatePayload {
    /// Shallow diff of two attribute maps.
    pub fn diff(old: &Attrs, new: &Attrs) -> Self {
        let mut changes = Vec::new();
        for (name, old_value) in old {
            match new.get(name) {
                None => changes.push(AttrChange {
                    name: Rc::clone(name),
                    value: None,
                }),
                Some(new_value) if new_value != old_value => changes.push(AttrChange {
                    name: Rc::clone(name),
                    value: Some(new_value.clone()),
                }),
                Some(_) => {}
            }
        }
        for (name, new_value) in new {
            if !old.contains_key(name) {
                changes.push(AttrChange {
                    name: Rc::clone(name),
                    value: Some(new_value.clone()),
                });
            }
        }
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Target of a portal, resolved by the host at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortalId(pub u32);

/// What a component render produces. `None` renders nothing.
pub type RenderOutput = RenderResult<Option<Element>>;

type RenderFn = dyn Fn(&mut Hooks<'_>, &dyn Any) -> RenderOutput;
type PropsEq = fn(&dyn Any, &dyn Any) -> bool;

struct ComponentDef {
    name: Cow<'static, str>,
    render: Box<RenderFn>,
    props_eq: Option<PropsEq>,
}

/// The type-erased half of a [`Component`], as stored in elements and
/// fibers. Identity is the allocation: two components are the same type
/// only if one is a clone of the other.
#[derive(Clone)]
pub struct ComponentType(Rc<ComponentDef>);

impl ComponentType {
    fn build<P, F>(name: Cow<'static, str>, render: F, props_eq: Option<PropsEq>) -> Self
    where
        P: 'static,
        F: Fn(&mut Hooks<'_>, &P) -> RenderOutput + 'static,
    {
        let label = name.clone();
        // Only reachable through a hand-built `ElementKind::Component`.
        let render = move |hooks: &mut Hooks<'_>, props: &dyn Any| match props.downcast_ref::<P>()
        {
            Some(props) => render(hooks, props),
            None => Err(RenderError::new(format!("{label}: props of unexpected type")).into()),
        };
        Self(Rc::new(ComponentDef {
            name,
            render: Box::new(render),
            props_eq,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_memo(&self) -> bool {
        self.0.props_eq.is_some()
    }

    pub fn ptr_eq(&self, other: &ComponentType) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn render(&self, hooks: &mut Hooks<'_>, props: &dyn Any) -> RenderOutput {
        (self.0.render)(hooks, props)
    }

    /// Memo comparison. Always false for plain components.
    pub(crate) fn props_equal(&self, old: &dyn Any, new: &dyn Any) -> bool {
        self.0.props_eq.is_some_and(|eq| eq(old, new))
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.0.name)
            .field("memo", &self.is_memo())
            .finish()
    }
}

/// A function component taking props of type `P`.
///
/// The props type is fixed when the component is defined, so
/// [`element`](Self::element) only accepts matching props.
pub struct Component<P> {
    ty: ComponentType,
    _props: PhantomData<fn(P)>,
}

impl<P: 'static> Component<P> {
    /// Define a component taking props of type `P`.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, render: F) -> Self
    where
        F: Fn(&mut Hooks<'_>, &P) -> RenderOutput + 'static,
    {
        Self::wrap(ComponentType::build(name.into(), render, None))
    }

    /// Define a component that skips re-rendering when its new props compare
    /// equal to the previous ones.
    pub fn memo<F>(name: impl Into<Cow<'static, str>>, render: F) -> Self
    where
        P: PartialEq,
        F: Fn(&mut Hooks<'_>, &P) -> RenderOutput + 'static,
    {
        Self::wrap(ComponentType::build(name.into(), render, Some(props_eq::<P>)))
    }

    fn wrap(ty: ComponentType) -> Self {
        Self {
            ty,
            _props: PhantomData,
        }
    }

    /// An element rendering this component with `props`.
    pub fn element(&self, props: P) -> Element {
        Element::new(ElementKind::Component {
            component: self.ty.clone(),
            props: Rc::new(props),
        })
    }

    /// Like [`element`](Self::element) with an explicit key.
    pub fn keyed(&self, key: impl Into<Key>, props: P) -> Element {
        self.element(props).with_key(key)
    }
}

impl<P> Component<P> {
    pub fn name(&self) -> &str {
        self.ty.name()
    }

    pub fn is_memo(&self) -> bool {
        self.ty.is_memo()
    }

    pub fn ptr_eq(&self, other: &Component<P>) -> bool {
        self.ty.ptr_eq(&other.ty)
    }

    pub fn component_type(&self) -> &ComponentType {
        &self.ty
    }
}

impl<P> Clone for Component<P> {
    fn clone(&self) -> Self {
        Self {
            ty: self.ty.clone(),
            _props: PhantomData,
        }
    }
}

impl<P> fmt::Debug for Component<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ty.fmt(f)
    }
}

fn props_eq<P: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<P>(), b.downcast_ref::<P>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Renders the fallback of an error boundary.
pub type BoundaryFallback = Rc<dyn Fn(&CapturedError) -> Element>;

/// The variants of [`Element`].
#[derive(Clone)]
pub enum ElementKind {
    /// A host node such as `div`.
    Host {
        tag: Rc<str>,
        attrs: Attrs,
        children: Vec<Element>,
    },
    Text(Rc<str>),
    Component {
        component: ComponentType,
        props: Rc<dyn Any>,
    },
    Fragment(Vec<Element>),
    Suspense {
        children: Vec<Element>,
        fallback: Vec<Element>,
    },
    ErrorBoundary {
        children: Vec<Element>,
        fallback: BoundaryFallback,
        /// Changing this key lets a failed boundary try its children again.
        reset_key: Option<Key>,
    },
    Provider {
        context: ContextId,
        value: ContextValue,
        children: Vec<Element>,
    },
    Portal {
        portal: PortalId,
        children: Vec<Element>,
    },
    /// Wrapper used inside suspense boundaries to keep a subtree mounted but
    /// hidden. Built only by the reconciler.
    #[doc(hidden)]
    Offscreen {
        hidden: bool,
        children: Vec<Element>,
    },
}

/// Payload of an [`Element`].
#[derive(Clone)]
pub struct ElementNode {
    pub key: Option<Key>,
    pub node_ref: Option<NodeRef>,
    pub kind: ElementKind,
}

/// An immutable element handle.
#[derive(Clone)]
pub struct Element(Rc<ElementNode>);

impl Element {
    pub fn new(kind: ElementKind) -> Self {
        Self(Rc::new(ElementNode {
            key: None,
            node_ref: None,
            kind,
        }))
    }

    pub fn key(&self) -> Option<&Key> {
        self.0.key.as_ref()
    }

    pub fn kind(&self) -> &ElementKind {
        &self.0.kind
    }

    pub fn node_ref(&self) -> Option<&NodeRef> {
        self.0.node_ref.as_ref()
    }

    /// Same allocation.
    pub fn ptr_eq(&self, other: &Element) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn with_key(self, key: impl Into<Key>) -> Self {
        let mut node = Rc::try_unwrap(self.0).unwrap_or_else(|shared| (*shared).clone());
        node.key = Some(key.into());
        Self(Rc::new(node))
    }

    #[must_use]
    pub fn with_ref(self, node_ref: &NodeRef) -> Self {
        let mut node = Rc::try_unwrap(self.0).unwrap_or_else(|shared| (*shared).clone());
        node.node_ref = Some(node_ref.clone());
        Self(Rc::new(node))
    }

    /// Short label: tag, component name or kind.
    pub fn label(&self) -> String {
        match &self.0.kind {
            ElementKind::Host { tag, .. } => tag.to_string(),
            ElementKind::Text(_) => "#text".into(),
            ElementKind::Component { component, .. } => component.name().to_string(),
            ElementKind::Fragment(_) => "Fragment".into(),
            ElementKind::Suspense { .. } => "Suspense".into(),
            ElementKind::ErrorBoundary { .. } => "ErrorBoundary".into(),
            ElementKind::Provider { .. } => "Provider".into(),
            ElementKind::Portal { .. } => "Portal".into(),
            ElementKind::Offscreen { .. } => "Offscreen".into(),
        }
    }

    pub(crate) fn offscreen(hidden: bool, children: Vec<Element>) -> Self {
        Self::new(ElementKind::Offscreen { hidden, children })
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Element");
        d.field("label", &self.label());
        if let Some(key) = &self.0.key {
            d.field("key", key);
        }
        d.finish_non_exhaustive()
    }
}

impl From<HostBuilder> for Element {
    fn from(builder: HostBuilder) -> Self {
        builder.build()
    }
}

impl From<&str> for Element {
    fn from(s: &str) -> Self {
        text(s)
    }
}

impl From<String> for Element {
    fn from(s: String) -> Self {
        text(s)
    }
}

/// Builder for host elements. Start with [`h`].
#[derive(Clone)]
pub struct HostBuilder {
    tag: Rc<str>,
    key: Option<Key>,
    node_ref: Option<NodeRef>,
    attrs: Attrs,
    children: Vec<Element>,
}

impl HostBuilder {
    #[must_use]
    pub fn attr(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.attrs.insert(Rc::from(name), value.into());
        self
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn node_ref(mut self, node_ref: &NodeRef) -> Self {
        self.node_ref = Some(node_ref.clone());
        self
    }

    #[must_use]
    pub fn child(mut self, child: impl Into<Element>) -> Self {
        self.children.push(child.into());
        self
    }

    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn build(self) -> Element {
        Element(Rc::new(ElementNode {
            key: self.key,
            node_ref: self.node_ref,
            kind: ElementKind::Host {
                tag: self.tag,
                attrs: self.attrs,
                children: self.children,
            },
        }))
    }
}

/// Start a host element.
pub fn h(tag: &str) -> HostBuilder {
    HostBuilder {
        tag: Rc::from(tag),
        key: None,
        node_ref: None,
        attrs: Attrs::new(),
        children: Vec::new(),
    }
}

/// A text node.
pub fn text(content: impl Into<String>) -> Element {
    Element::new(ElementKind::Text(Rc::from(content.into())))
}

/// Group children without a host node.
pub fn fragment(children: impl IntoIterator<Item = Element>) -> Element {
    Element::new(ElementKind::Fragment(children.into_iter().collect()))
}

/// Show `fallback` while anything in `children` is suspended.
pub fn suspense(
    children: impl IntoIterator<Item = Element>,
    fallback: impl IntoIterator<Item = Element>,
) -> Element {
    Element::new(ElementKind::Suspense {
        children: children.into_iter().collect(),
        fallback: fallback.into_iter().collect(),
    })
}

/// Render `fallback` instead of `children` once a descendant fails.
pub fn error_boundary(
    children: impl IntoIterator<Item = Element>,
    fallback: impl Fn(&CapturedError) -> Element + 'static,
) -> Element {
    error_boundary_with_reset(children, fallback, None::<Key>)
}

/// Like [`error_boundary`]; a changed `reset_key` retries a failed boundary.
pub fn error_boundary_with_reset(
    children: impl IntoIterator<Item = Element>,
    fallback: impl Fn(&CapturedError) -> Element + 'static,
    reset_key: Option<impl Into<Key>>,
) -> Element {
    Element::new(ElementKind::ErrorBoundary {
        children: children.into_iter().collect(),
        fallback: Rc::new(fallback),
        reset_key: reset_key.map(Into::into),
    })
}

/// Render `children` into the host container registered for `portal`.
pub fn portal(portal: PortalId, children: impl IntoIterator<Item = Element>) -> Element {
    Element::new(ElementKind::Portal {
        portal,
        children: children.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_diff() {
        let old: Attrs = [
            (Rc::from("a"), PropValue::from(1)),
            (Rc::from("b"), PropValue::from("x")),
        ]
        .into_iter()
        .collect();
        let new: Attrs = [
            (Rc::from("b"), PropValue::from("y")),
            (Rc::from("c"), PropValue::from(true)),
        ]
        .into_iter()
        .collect();
        let payload = UpdatePayload::diff(&old, &new);
        assert_eq!(payload.len(), 3);
        assert_eq!(payload.changes[0].name.as_ref(), "a");
        assert_eq!(payload.changes[0].value, None);
        assert_eq!(payload.changes[1].value, Some(PropValue::from("y")));
        assert_eq!(payload.changes[2].name.as_ref(), "c");
        assert!(UpdatePayload::diff(&new, &new).is_empty());
    }

    #[test]
    fn builder_and_keys() {
        let el: Element = h("li").key(7u32).attr("id", "x").child("hi").into();
        assert_eq!(el.key().map(Key::as_str), Some("7"));
        assert_eq!(el.label(), "li");
        match el.kind() {
            ElementKind::Host { children, attrs, .. } => {
                assert_eq!(children.len(), 1);
                assert_eq!(attrs.len(), 1);
            }
            _ => panic!("expected host element"),
        }
        let rekeyed = el.clone().with_key("y");
        assert!(!rekeyed.ptr_eq(&el));
        assert_eq!(el.key().map(Key::as_str), Some("7"));
    }

    #[test]
    fn component_identity_and_memo() {
        let a = Component::new("A", |_h: &mut Hooks<'_>, _p: &()| Ok(None));
        let b = Component::new("A", |_h: &mut Hooks<'_>, _p: &()| Ok(None));
        assert!(a.ptr_eq(&a.clone()));
        assert!(!a.ptr_eq(&b));
        assert!(!a.is_memo());

        let m = Component::memo("M", |_h: &mut Hooks<'_>, _p: &u8| Ok(None));
        assert!(m.is_memo());
        assert!(m.component_type().props_equal(&1u8, &1u8));
        assert!(!m.component_type().props_equal(&1u8, &2u8));
        assert!(!a.component_type().props_equal(&(), &()));
    }

    #[test]
    fn element_props_take_the_component_type() {
        let c = Component::new("C", |_h: &mut Hooks<'_>, _p: &u32| Ok(None));
        let el = c.element(1);
        match el.kind() {
            ElementKind::Component { component, props } => {
                assert!(component.ptr_eq(c.component_type()));
                assert_eq!(props.downcast_ref::<u32>(), Some(&1));
            }
            _ => panic!("expected component element"),
        }
    }
}
