#![forbid(unsafe_code)]

//! The prelude is enough to write and drive a small app.

use std::cell::RefCell;
use std::rc::Rc;

use frx::prelude::*;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

type Slot = Rc<RefCell<Option<SetState<Vec<String>>>>>;

fn todo_app() -> Component<Slot> {
    let item = Component::memo("Item", |_: &mut Hooks<'_>, label: &String| {
        Ok(Some(h("li").child(label.as_str()).build()))
    });
    Component::new("Todos", move |hooks: &mut Hooks<'_>, slot: &Slot| {
        let (items, set) = hooks.use_state(Vec::<String>::new);
        *slot.borrow_mut() = Some(set);
        Ok(Some(
            h("ul")
                .children(items.iter().map(|label| item.keyed(label.as_str(), label.clone())))
                .build(),
        ))
    })
}

#[test]
fn scheduler_drives_a_todo_list() {
    init_tracing();
    let slot: Slot = Rc::default();
    let mut app = frx::headless(RootOptions::default());

    app.root.render(todo_app().element(Rc::clone(&slot)));
    assert!(app.run_until_idle().unwrap() >= 1);
    assert_eq!(app.markup(), "<ul></ul>");

    let set = slot.borrow().clone().unwrap();
    set.update(|items: &Vec<String>| {
        let mut next = items.clone();
        next.extend(["milk".to_string(), "eggs".to_string()]);
        next
    });
    app.run_until_idle().unwrap();
    assert_eq!(app.markup(), "<ul><li>milk</li><li>eggs</li></ul>");

    set.update_with(UpdateTrigger::Discrete, |items: &Vec<String>| {
        items.iter().rev().cloned().collect()
    });
    app.run_until_idle().unwrap();
    assert_eq!(app.markup(), "<ul><li>eggs</li><li>milk</li></ul>");
    let summary = app.root.last_commit().unwrap();
    assert_eq!(summary.moves(), 1);
    assert_eq!(summary.placements(), 0);
}

#[test]
fn errors_surface_through_facade_result() {
    init_tracing();
    let broken = Component::new("Broken", |_: &mut Hooks<'_>, _: &()| {
        Err(frx::RenderError::new("no data").into())
    });
    let mut app = frx::headless(RootOptions::default());
    app.root.render(broken.element(()));
    let result: Result<WorkStatus> = app.root.flush_all();
    match result {
        Err(Error::Uncaught(err)) => assert_eq!(err.component, "Broken"),
        other => panic!("expected an uncaught error, got {other:?}"),
    }
}
