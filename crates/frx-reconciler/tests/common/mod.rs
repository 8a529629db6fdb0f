#![forbid(unsafe_code)]
#![allow(dead_code)]

//! Shared fixtures for the integration tests.

use std::cell::RefCell;
use std::rc::Rc;

use frx_reconciler::{
    ContainerId, Element, HeadlessHost, ManualScheduler, ReconcilerConfig, Root, RootOptions,
    create_root, h,
};

pub struct Fixture {
    pub root: Root<HeadlessHost>,
    pub scheduler: Rc<ManualScheduler>,
    pub container: ContainerId,
}

impl Fixture {
    pub fn markup(&self) -> String {
        self.root.host().markup(self.container)
    }

    pub fn clear_ops(&mut self) {
        self.root.host_mut().clear_ops();
    }
}

pub fn fixture() -> Fixture {
    fixture_with(HeadlessHost::new(), RootOptions::default())
}

pub fn fixture_with_config(config: ReconcilerConfig) -> Fixture {
    fixture_with(HeadlessHost::new(), RootOptions::default().with_config(config))
}

pub fn fixture_with(host: HeadlessHost, options: RootOptions) -> Fixture {
    let container = host.root_container();
    let scheduler = Rc::new(ManualScheduler::new());
    let root = create_root(host, container, scheduler.clone(), options);
    Fixture {
        root,
        scheduler,
        container,
    }
}

/// `<ul>` with one keyed `<li>` per key, each showing its key.
pub fn keyed_list(keys: &[&str]) -> Element {
    h("ul")
        .children(keys.iter().map(|k| h("li").key(*k).child(*k).build()))
        .build()
}

/// Shared, append-only event log for effects and renders.
#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.borrow().iter().filter(|e| *e == entry).count()
    }
}
