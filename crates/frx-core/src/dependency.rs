#![forbid(unsafe_code)]

//! Async dependencies that rendering can suspend on.
//!
//! A component that needs data which is not there yet returns
//! [`Interrupt::Suspend`](crate::Interrupt::Suspend) carrying the
//! [`Dependency`]. The reconciler subscribes a [`WakeListener`] and retries
//! once the dependency settles.
//!
//! Settling drains the listener list, so resolving twice wakes nobody the
//! second time. Subscribing to an already settled dependency wakes the
//! listener immediately.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::error::{Interrupt, RenderError};

static NEXT_DEPENDENCY_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Dependency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DependencyId(u64);

impl DependencyId {
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dep#{}", self.0)
    }
}

/// Settlement state.
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyStatus {
    Pending,
    Resolved,
    Rejected(RenderError),
}

/// Receives wake-ups when a dependency settles.
pub trait WakeListener {
    fn wake(&self, dependency: DependencyId);
}

struct DependencyInner {
    id: DependencyId,
    label: Option<String>,
    status: RefCell<DependencyStatus>,
    listeners: RefCell<SmallVec<[Weak<dyn WakeListener>; 2]>>,
}

/// A shared handle to something rendering can wait on.
#[derive(Clone)]
pub struct Dependency {
    inner: Rc<DependencyInner>,
}

impl Dependency {
    /// A new pending dependency.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A new pending dependency with a diagnostic label.
    pub fn with_label(label: impl Into<String>) -> Self {
        Self::build(Some(label.into()))
    }

    fn build(label: Option<String>) -> Self {
        Self {
            inner: Rc::new(DependencyInner {
                id: DependencyId(NEXT_DEPENDENCY_ID.fetch_add(1, Ordering::Relaxed)),
                label,
                status: RefCell::new(DependencyStatus::Pending),
                listeners: RefCell::new(SmallVec::new()),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> DependencyId {
        self.inner.id
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    pub fn status(&self) -> DependencyStatus {
        self.inner.status.borrow().clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.status.borrow(), DependencyStatus::Pending)
    }

    /// Register `listener` for the settlement.
    ///
    /// A listener already registered is not added twice. If the dependency has
    /// settled the listener is woken right away.
    pub fn subscribe(&self, listener: Weak<dyn WakeListener>) {
        if !self.is_pending() {
            if let Some(listener) = listener.upgrade() {
                listener.wake(self.id());
            }
            return;
        }
        let mut listeners = self.inner.listeners.borrow_mut();
        if !listeners.iter().any(|l| Weak::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Mark resolved and wake every listener. Returns false if already settled.
    pub fn resolve(&self) -> bool {
        self.settle(DependencyStatus::Resolved)
    }

    /// Mark rejected and wake every listener. Returns false if already settled.
    ///
    /// Readers see the error as a render error on their next attempt.
    pub fn reject(&self, error: RenderError) -> bool {
        self.settle(DependencyStatus::Rejected(error))
    }

    fn settle(&self, status: DependencyStatus) -> bool {
        {
            let mut current = self.inner.status.borrow_mut();
            if !matches!(*current, DependencyStatus::Pending) {
                crate::trace!(dependency = %self.id(), "dependency already settled");
                return false;
            }
            *current = status;
        }
        let listeners = std::mem::take(&mut *self.inner.listeners.borrow_mut());
        crate::debug!(
            dependency = %self.id(),
            listeners = listeners.len(),
            "dependency settled"
        );
        for listener in listeners {
            if let Some(listener) = listener.upgrade() {
                listener.wake(self.id());
            }
        }
        true
    }

    /// Number of live listeners (diagnostics).
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }
}

impl Default for Dependency {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Dependency {}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

/// A value that becomes available later, backed by a [`Dependency`].
pub struct Resource<T> {
    dependency: Dependency,
    value: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            dependency: self.dependency.clone(),
            value: Rc::clone(&self.value),
        }
    }
}

impl<T> Resource<T> {
    /// A resource whose value is not there yet.
    pub fn pending() -> Self {
        Self {
            dependency: Dependency::new(),
            value: Rc::new(RefCell::new(None)),
        }
    }

    /// A pending resource with a diagnostic label.
    pub fn pending_labeled(label: impl Into<String>) -> Self {
        Self {
            dependency: Dependency::with_label(label),
            value: Rc::new(RefCell::new(None)),
        }
    }

    /// A resource that is already available.
    pub fn ready(value: T) -> Self {
        let resource = Self::pending();
        resource.resolve(value);
        resource
    }

    /// Store the value and wake waiters. Ignored if already settled.
    pub fn resolve(&self, value: T) -> bool {
        if !self.dependency.is_pending() {
            return false;
        }
        *self.value.borrow_mut() = Some(value);
        self.dependency.resolve()
    }

    /// Fail the resource and wake waiters. Ignored if already settled.
    pub fn reject(&self, error: RenderError) -> bool {
        self.dependency.reject(error)
    }

    pub fn dependency(&self) -> &Dependency {
        &self.dependency
    }
}

impl<T: Clone> Resource<T> {
    /// The value, or the interrupt a render should propagate.
    pub fn read(&self) -> Result<T, Interrupt> {
        match self.dependency.status() {
            DependencyStatus::Pending => Err(Interrupt::Suspend(self.dependency.clone())),
            DependencyStatus::Rejected(error) => Err(Interrupt::Error(error)),
            DependencyStatus::Resolved => match self.value.borrow().as_ref() {
                Some(value) => Ok(value.clone()),
                None => Err(Interrupt::Error(RenderError::new(
                    "resource resolved without a value",
                ))),
            },
        }
    }
}

impl<T> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("dependency", &self.dependency)
            .finish_non_exhaustive()
    }
}
