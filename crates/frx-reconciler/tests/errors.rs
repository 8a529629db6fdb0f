#![forbid(unsafe_code)]

//! Error boundaries, uncaught errors and failure limits.

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{Log, fixture, fixture_with, fixture_with_config};
use frx_reconciler::{
    CapturedError, Component, Element, HeadlessHost, HostError, Hooks, ReconcileError,
    ReconcilerConfig, RenderError, Resource, RootOptions, WorkBudget, error_boundary,
    error_boundary_with_reset, fragment, h, text,
};

fn bomb(renders: Rc<Cell<u32>>) -> Component<Rc<Cell<bool>>> {
    Component::new("Bomb", move |_: &mut Hooks<'_>, armed: &Rc<Cell<bool>>| {
        renders.set(renders.get() + 1);
        if armed.get() {
            return Err(RenderError::new("boom").into());
        }
        Ok(Some(h("p").child("fine").build()))
    })
}

fn caught(err: &CapturedError) -> Element {
    text(format!("caught: {}", err.message))
}

#[test]
fn boundary_renders_fallback_and_siblings_survive() {
    let armed = Rc::new(Cell::new(true));
    let bomb = bomb(Rc::default());
    let seen: Rc<RefCell<Option<CapturedError>>> = Rc::default();

    let mut fx = fixture();
    fx.root.render(fragment([
        text("ok "),
        error_boundary([h("div").child(bomb.element(Rc::clone(&armed))).build()], {
            let seen = Rc::clone(&seen);
            move |err: &CapturedError| {
                *seen.borrow_mut() = Some(err.clone());
                caught(err)
            }
        }),
    ]));
    fx.root.flush_all().unwrap();

    assert_eq!(fx.markup(), "ok caught: boom");
    let err = seen.borrow().clone().unwrap();
    assert_eq!(err.component, "Bomb");
    assert_eq!(err.component_stack.first().map(String::as_str), Some("Bomb"));
    assert!(!err.from_panic);
    assert_eq!(fx.root.trace().count("error_captured"), 1);
}

#[test]
fn reset_key_recovers_boundary() {
    let armed = Rc::new(Cell::new(true));
    let bomb = bomb(Rc::default());
    let tree = |key: u32| {
        error_boundary_with_reset([bomb.element(Rc::clone(&armed))], caught, Some(key))
    };

    let mut fx = fixture();
    fx.root.render(tree(1));
    fx.root.flush_all().unwrap();
    assert_eq!(fx.markup(), "caught: boom");

    // Same key: the fallback stays even though the bomb is disarmed.
    armed.set(false);
    fx.root.render(tree(1));
    fx.root.flush_all().unwrap();
    assert_eq!(fx.markup(), "caught: boom");

    fx.root.render(tree(2));
    fx.root.flush_all().unwrap();
    assert_eq!(fx.markup(), "<p>fine</p>");
}

#[test]
fn recovery_attempts_are_bounded() {
    let armed = Rc::new(Cell::new(true));
    let renders = Rc::new(Cell::new(0));
    let bomb = bomb(Rc::clone(&renders));
    let tree = |key: u32| {
        error_boundary_with_reset([bomb.element(Rc::clone(&armed))], caught, Some(key))
    };

    let mut fx =
        fixture_with_config(ReconcilerConfig::default().with_max_recovery_attempts(1));
    fx.root.render(tree(1));
    fx.root.flush_all().unwrap();
    assert_eq!(renders.get(), 1);

    fx.root.render(tree(2));
    fx.root.flush_all().unwrap();
    assert_eq!(renders.get(), 2);
    assert_eq!(fx.markup(), "caught: boom");

    // Out of attempts: the children are not tried again.
    fx.root.render(tree(3));
    fx.root.flush_all().unwrap();
    assert_eq!(renders.get(), 2);
    assert_eq!(fx.markup(), "caught: boom");
}

#[test]
fn panics_are_captured() {
    let faulty = Component::new("Faulty", |_: &mut Hooks<'_>, _: &()| -> frx_reconciler::RenderOutput {
        panic!("kaboom");
    });
    let seen = Log::default();
    let mut fx = fixture();
    fx.root.render(error_boundary([faulty.element(())], {
        let seen = seen.clone();
        move |err: &CapturedError| {
            seen.push(format!("{}:{}", err.message, err.from_panic));
            caught(err)
        }
    }));
    fx.root.flush_all().unwrap();
    assert_eq!(fx.markup(), "caught: kaboom");
    assert_eq!(seen.take(), vec!["kaboom:true"]);
}

#[test]
fn rejected_resource_reaches_error_boundary() {
    let show = Component::new("Show", |hooks: &mut Hooks<'_>, data: &Resource<String>| {
        let value = hooks.use_resource(data)?;
        Ok(Some(text(value)))
    });
    let data = Resource::<String>::pending();
    let mut fx = fixture();
    fx.root.render(error_boundary(
        [frx_reconciler::suspense([show.element(data.clone())], [text("loading")])],
        caught,
    ));
    fx.root.flush_all().unwrap();
    assert_eq!(fx.markup(), "loading");

    assert!(data.reject(RenderError::new("offline")));
    fx.root.flush_all().unwrap();
    assert_eq!(fx.markup(), "caught: offline");
}

#[test]
fn uncaught_error_clears_tree_and_reports_once() {
    let reports = Log::default();
    let options = RootOptions::default().on_uncaught_error({
        let reports = reports.clone();
        move |err: &CapturedError| reports.push(err.message.clone())
    });
    let mut fx = fixture_with(HeadlessHost::new(), options);

    fx.root.render(h("div").child("before"));
    fx.root.flush_all().unwrap();

    let armed = Rc::new(Cell::new(true));
    let bomb = bomb(Rc::default());
    fx.root.render(h("div").child(bomb.element(armed)));
    match fx.root.flush_all() {
        Err(ReconcileError::Uncaught(err)) => assert_eq!(err.message, "boom"),
        other => panic!("expected an uncaught error, got {other:?}"),
    }
    assert_eq!(reports.take(), vec!["boom"]);
    assert_eq!(fx.markup(), "");

    // The root is still usable.
    fx.root.render(text("after"));
    fx.root.flush_all().unwrap();
    assert_eq!(fx.markup(), "after");
}

#[test]
fn layout_effect_error_routes_to_boundary() {
    let faulty = Component::new("Faulty", |hooks: &mut Hooks<'_>, _: &()| {
        hooks.use_layout_effect(|| Err::<(), _>(RenderError::new("effect failed")));
        Ok(Some(text("content")))
    });
    let mut fx = fixture();
    fx.root.render(fragment([
        text("[ "),
        error_boundary([faulty.element(())], caught),
        text(" ]"),
    ]));
    fx.root.flush_all().unwrap();
    assert_eq!(fx.markup(), "[ caught: effect failed ]");
}

#[test]
fn passive_effect_error_routes_to_boundary() {
    let faulty = Component::new("Faulty", |hooks: &mut Hooks<'_>, _: &()| {
        hooks.use_effect(|| Err::<(), _>(RenderError::new("late failure")));
        Ok(Some(text("content")))
    });
    let mut fx = fixture();
    fx.root.render(error_boundary([faulty.element(())], caught));
    fx.root.flush_all().unwrap();
    assert_eq!(fx.markup(), "caught: late failure");
}

#[test]
fn runaway_layout_updates_hit_the_limit() {
    let runaway = Component::new("Runaway", |hooks: &mut Hooks<'_>, _: &()| {
        let (n, set) = hooks.use_state(|| 0u32);
        hooks.use_layout_effect(move || set.set(n + 1));
        Ok(Some(text(n.to_string())))
    });
    let mut fx =
        fixture_with_config(ReconcilerConfig::default().with_max_nested_sync_commits(5));
    fx.root.render(runaway.element(()));
    assert!(matches!(
        fx.root.flush_all(),
        Err(ReconcileError::MaxUpdateDepth { limit: 5 })
    ));
}

#[test]
fn host_failure_poisons_root() {
    let mut host = HeadlessHost::new();
    host.fail_on("append");
    let mut fx = fixture_with(host, RootOptions::default());

    fx.root.render(h("div"));
    assert!(matches!(
        fx.root.flush_all(),
        Err(ReconcileError::Host(HostError::Failed(_)))
    ));
    assert!(matches!(
        fx.root.perform_work(WorkBudget::Unbounded),
        Err(ReconcileError::RootUnmounted)
    ));
}
