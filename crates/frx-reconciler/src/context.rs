#![forbid(unsafe_code)]

//! Context providers and the render-time context stack.

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::element::{Element, ElementKind};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// A type-erased provided value plus its equality.
#[derive(Clone)]
pub struct ContextValue {
    value: Rc<dyn Any>,
    eq: fn(&dyn Any, &dyn Any) -> bool,
}

impl ContextValue {
    pub(crate) fn new<T: PartialEq + 'static>(value: T) -> Self {
        Self {
            value: Rc::new(value),
            eq: eq_erased::<T>,
        }
    }

    /// Same allocation or `PartialEq`-equal.
    pub(crate) fn same_as(&self, other: &ContextValue) -> bool {
        Rc::ptr_eq(&self.value, &other.value) || (self.eq)(&*self.value, &*other.value)
    }

    pub(crate) fn downcast<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContextValue(..)")
    }
}

fn eq_erased<T: PartialEq + 'static>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// A typed context with a default value used when no provider is above.
pub struct Context<T> {
    id: ContextId,
    default: Rc<T>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            default: Rc::clone(&self.default),
        }
    }
}

impl<T: Clone + PartialEq + 'static> Context<T> {
    pub fn new(default: T) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            default: Rc::new(default),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Provide `value` to every consumer in `children`.
    ///
    /// Consumers re-render when the provided value stops comparing equal to
    /// the previous one, even if an ancestor between them bails out.
    pub fn provide(&self, value: T, children: impl IntoIterator<Item = Element>) -> Element {
        Element::new(ElementKind::Provider {
            context: self.id,
            value: ContextValue::new(value),
            children: children.into_iter().collect(),
        })
    }

    pub(crate) fn read(&self, stack: &ContextStack) -> T {
        stack
            .get(self.id)
            .and_then(|v| v.downcast::<T>())
            .cloned()
            .unwrap_or_else(|| (*self.default).clone())
    }
}

impl<T> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("id", &self.id).finish()
    }
}

/// Values provided along the path from the root to the fiber being worked on.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    entries: Vec<(ContextId, ContextValue)>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, id: ContextId, value: ContextValue) {
        self.entries.push((id, value));
    }

    pub(crate) fn pop(&mut self, id: ContextId) {
        match self.entries.pop() {
            Some((top, _)) if top == id => {}
            Some((top, _)) => {
                tracing::warn!(expected = %id, found = %top, "context stack out of balance");
            }
            None => tracing::warn!(expected = %id, "context stack underflow"),
        }
    }

    pub(crate) fn get(&self, id: ContextId) -> Option<&ContextValue> {
        self.entries
            .iter()
            .rev()
            .find(|(entry, _)| *entry == id)
            .map(|(_, value)| value)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop entries pushed after the stack had `len` entries.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
