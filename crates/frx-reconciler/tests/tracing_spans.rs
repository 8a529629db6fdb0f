#![forbid(unsafe_code)]

//! Span instrumentation of the work loop.
//!
//!   cargo test -p frx-reconciler --test tracing_spans

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::{fixture, keyed_list};
use frx_reconciler::{Cleanup, Component, Hooks, UpdateTrigger, WorkBudget, text};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;

// ============================================================================
// Capture layer
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedSpan {
    name: String,
    fields: HashMap<String, String>,
    parent: Option<String>,
}

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: tracing::Level,
    message: String,
}

#[derive(Default)]
struct Captured {
    spans: Vec<CapturedSpan>,
    events: Vec<CapturedEvent>,
}

struct SpanCapture(Arc<Mutex<Captured>>);

struct CaptureHandle(Arc<Mutex<Captured>>);

impl CaptureHandle {
    fn spans(&self) -> Vec<CapturedSpan> {
        self.0.lock().unwrap().spans.clone()
    }

    fn named(&self, name: &str) -> Vec<CapturedSpan> {
        self.spans().into_iter().filter(|s| s.name == name).collect()
    }

    fn events(&self) -> Vec<CapturedEvent> {
        self.0.lock().unwrap().events.clone()
    }
}

struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

impl<S> tracing_subscriber::Layer<S> for SpanCapture
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor(Vec::new());
        attrs.record(&mut visitor);
        let parent = ctx
            .current_span()
            .id()
            .and_then(|id| ctx.span(id))
            .map(|span| span.name().to_string());
        self.0.lock().unwrap().spans.push(CapturedSpan {
            name: attrs.metadata().name().to_string(),
            fields: visitor.0.into_iter().collect(),
            parent,
        });
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor(Vec::new());
        event.record(&mut visitor);
        let message = visitor
            .0
            .into_iter()
            .find(|(name, _)| name == "message")
            .map(|(_, value)| value)
            .unwrap_or_default();
        self.0.lock().unwrap().events.push(CapturedEvent {
            level: *event.metadata().level(),
            message,
        });
    }
}

fn with_captured_spans(f: impl FnOnce()) -> CaptureHandle {
    let captured = Arc::new(Mutex::new(Captured::default()));
    let subscriber = tracing_subscriber::registry().with(SpanCapture(Arc::clone(&captured)));
    tracing::subscriber::with_default(subscriber, f);
    CaptureHandle(captured)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn work_loop_spans_nest_under_perform_work() {
    let logger = Component::new("Logger", |hooks: &mut Hooks<'_>, _: &()| {
        hooks.use_effect(|| Cleanup::new(|| {}));
        Ok(Some(text("x")))
    });

    let handle = with_captured_spans(|| {
        let mut fx = fixture();
        fx.root.render(logger.element(()));
        fx.root.flush_all().unwrap();
    });

    for name in ["frx.perform_work", "frx.render", "frx.commit", "frx.flush_passive"] {
        assert!(!handle.named(name).is_empty(), "no {name} span");
    }
    for name in ["frx.render", "frx.commit", "frx.flush_passive"] {
        for span in handle.named(name) {
            assert_eq!(
                span.parent.as_deref(),
                Some("frx.perform_work"),
                "{name} outside perform_work"
            );
        }
    }
    let passive = &handle.named("frx.flush_passive")[0];
    assert_eq!(passive.fields.get("mounts").map(String::as_str), Some("1"));
}

#[test]
fn commit_span_records_effect_count() {
    let handle = with_captured_spans(|| {
        let mut fx = fixture();
        fx.root.render(keyed_list(&["a", "b", "c"]));
        fx.root.flush_all().unwrap();
        fx.root.render(keyed_list(&["c", "a", "b"]));
        fx.root.flush_all().unwrap();
    });

    let commits = handle.named("frx.commit");
    assert_eq!(commits.len(), 2);
    // Mount places the list, the rotation moves one item.
    assert_eq!(commits[0].fields.get("effects").map(String::as_str), Some("1"));
    assert_eq!(commits[1].fields.get("effects").map(String::as_str), Some("1"));
}

#[test]
fn sync_render_span_is_marked() {
    let handle = with_captured_spans(|| {
        let mut fx = fixture();
        fx.root.render_with(UpdateTrigger::Discrete, text("now"));
        fx.root.perform_work(WorkBudget::Unbounded).unwrap();
    });

    let renders = handle.named("frx.render");
    assert_eq!(renders.len(), 1);
    assert_eq!(renders[0].fields.get("sync").map(String::as_str), Some("true"));
}

#[test]
fn discarded_pass_is_logged() {
    let handle = with_captured_spans(|| {
        let mut fx = fixture();
        fx.root.render(keyed_list(&["a", "b", "c"]));
        fx.root.flush_all().unwrap();
        fx.root.render(keyed_list(&["b", "c"]));
        fx.root.perform_work(WorkBudget::Units(1)).unwrap();
        fx.root.render_with(UpdateTrigger::Discrete, keyed_list(&["a"]));
        fx.root.flush_all().unwrap();
    });

    let events = handle.events();
    assert!(
        events
            .iter()
            .any(|e| e.level == tracing::Level::DEBUG && e.message == "render pass discarded"),
        "{events:?}"
    );
}
