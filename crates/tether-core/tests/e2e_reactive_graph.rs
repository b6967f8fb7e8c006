//! End-to-end scenarios over a small reactive graph.
//!
//! Each test wires atoms, computations, queries and reactions together the
//! way an adapter would (a render function inside a reaction loop, batched
//! multi-field writes, teardown on unmount) and checks what the "view"
//! observed:
//!
//! 1. Two listeners on one observable, unsubscribe, deinit.
//! 2. A view re-renders once per batch, with the final values.
//! 3. Dependency pruning across branch switches.
//! 4. Unmount releases every upstream subscription.
//! 5. Owned resources are disposed on replacement and on teardown.
//! 6. A panicking listener does not starve the others.
//! 7. Lifecycle and flush events are logged through `tracing`.

#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use tether_core::{
    Agent, Atom, Disposable, EngineConfig, Observable, Path, Reaction, Record, Result, Value,
    batch, computation, configure, path_query, scan,
};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

// ── Helpers ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Handle {
    released: Cell<u32>,
}

impl Disposable for Handle {
    fn deinit(&self) -> Result<()> {
        self.released.set(self.released.get() + 1);
        Ok(())
    }
}

fn handle() -> (Rc<Handle>, Value) {
    let h = Rc::new(Handle::default());
    let value = Value::Resource(tether_core::Resource::from_rc(
        Rc::clone(&h) as Rc<dyn Disposable>
    ));
    (h, value)
}

/// A "view" that renders into a log every time its reaction reruns.
struct View {
    frames: Rc<RefCell<Vec<String>>>,
    reaction: Reaction,
}

impl View {
    fn mount(render: impl Fn() -> String + 'static) -> Self {
        let frames = Rc::new(RefCell::new(Vec::new()));
        let out = Rc::clone(&frames);
        let reaction = Reaction::spawn_loop(move || out.borrow_mut().push(render()))
            .expect("fresh reaction cannot overlap");
        Self { frames, reaction }
    }

    fn frames(&self) -> Vec<String> {
        self.frames.borrow().clone()
    }

    fn unmount(&self) {
        self.reaction.deinit();
    }
}

// ── 1. Listener scenario ────────────────────────────────────────────────

#[test]
fn two_listeners_unsubscribe_then_deinit() {
    let obs = Observable::new();
    let calls = Rc::new(RefCell::new(Vec::new()));

    let c1 = Rc::clone(&calls);
    let first = obs.subscribe(move || c1.borrow_mut().push("first"));
    let c2 = Rc::clone(&calls);
    let _second = obs.subscribe(move || c2.borrow_mut().push("second"));

    obs.trigger();
    assert_eq!(*calls.borrow(), vec!["first", "second"]);

    first.deinit();
    obs.trigger();
    assert_eq!(*calls.borrow(), vec!["first", "second", "second"]);

    obs.deinit();
    obs.trigger();
    assert_eq!(calls.borrow().len(), 3);
    assert!(!obs.is_active());
}

// ── 2. Batched re-render ────────────────────────────────────────────────

#[test]
fn view_renders_once_per_batch() {
    let first = Atom::new(String::from("Ada"));
    let last = Atom::new(String::from("Lovelace"));
    let (f, l) = (first.clone(), last.clone());
    let full = computation(move || format!("{} {}", f.get(), l.get()));

    let full2 = full.clone();
    let view = View::mount(move || full2.get());
    assert_eq!(view.frames(), vec!["Ada Lovelace"]);

    batch(|| {
        first.reset(String::from("Grace"));
        first.reset(String::from("Grace"));
        last.reset(String::from("Hopper"));
    });
    assert_eq!(view.frames().last().map(String::as_str), Some("Grace Hopper"));

    let before = view.frames().len();
    first.reset(String::from("Grace"));
    assert_eq!(view.frames().len(), before);

    view.unmount();
}

#[test]
fn three_paused_resets_deliver_final_value_once() {
    let atom = Atom::new(0);
    let a = atom.clone();
    let view = View::mount(move || a.get().to_string());

    batch(|| {
        atom.reset(1);
        atom.reset(2);
        atom.reset(3);
    });
    assert_eq!(view.frames(), vec!["0", "3"]);
    view.unmount();
}

// ── 3. Pruning ──────────────────────────────────────────────────────────

#[test]
fn branch_switch_prunes_stale_dependency() {
    let show_email = Atom::new(false);
    let name = Atom::new(String::from("ada"));
    let email = Atom::new(String::from("ada@example.com"));

    let (s, n, e) = (show_email.clone(), name.clone(), email.clone());
    let view = View::mount(move || if s.get() { e.get() } else { n.get() });
    assert_eq!(view.frames(), vec!["ada"]);

    show_email.reset(true);
    assert_eq!(view.frames(), vec!["ada", "ada@example.com"]);

    name.reset(String::from("grace"));
    assert_eq!(view.frames().len(), 2);
    assert!(!name.observable().is_active());

    email.reset(String::from("grace@example.com"));
    assert_eq!(view.frames().len(), 3);
    view.unmount();
}

// ── 4. Unmount ──────────────────────────────────────────────────────────

#[test]
fn unmount_releases_the_whole_chain() {
    let source = Atom::new(2);
    let s = source.clone();
    let squared = computation(move || s.get() * s.get());
    let sq = squared.clone();
    let label = computation(move || format!("{}!", sq.get()));

    let l = label.clone();
    let view = View::mount(move || l.get());
    assert!(source.observable().is_active());
    assert!(squared.is_active());

    view.unmount();
    assert!(!label.is_active());
    assert!(!squared.is_active());
    assert!(!source.observable().is_active());

    source.reset(3);
    assert_eq!(view.frames(), vec!["4!"]);
    assert_eq!(label.get(), "9!");
}

// ── 5. Owned resources ──────────────────────────────────────────────────

#[test]
fn agent_and_record_own_their_resources() {
    let (socket, socket_val) = handle();

    let session = Agent::new(Value::map([("socket", socket_val.clone())]));
    session
        .reset(Value::map([
            ("socket", socket_val),
            ("user", Value::str("ada")),
        ]))
        .expect("no disposal failure");
    assert_eq!(socket.released.get(), 0);

    session.reset(Value::Nil).expect("no disposal failure");
    assert_eq!(socket.released.get(), 1);

    let (cache, cache_val) = handle();
    let record = Record::from_entries([("cache", cache_val)]);
    record.deinit().expect("no disposal failure");
    assert_eq!(cache.released.get(), 1);
}

#[test]
fn scan_in_view_tracks_a_single_path() {
    let settings = Record::from_entries([
        ("theme", Value::str("dark")),
        ("font", Value::str("mono")),
    ]);
    let s = settings.clone();
    let view = View::mount(move || {
        scan(&s, &Path::new().key("theme"))
            .as_str()
            .unwrap_or("?")
            .to_owned()
    });

    settings.set("font", Value::str("serif")).unwrap();
    assert_eq!(view.frames(), vec!["dark"]);

    settings.set("theme", Value::str("light")).unwrap();
    assert_eq!(view.frames(), vec!["dark", "light"]);

    view.unmount();
    assert!(!settings.observable().is_active());

    let theme = path_query(settings.clone(), Path::new().key("theme"));
    assert_eq!(theme.get().as_str(), Some("light"));
}

// ── 6. Panic isolation ──────────────────────────────────────────────────

#[test]
fn panicking_listener_does_not_starve_views() {
    let atom = Atom::new(0);
    let _bad = atom.subscribe(|| panic!("listener exploded"));
    let a = atom.clone();
    let view = View::mount(move || a.get().to_string());

    let result = catch_unwind(AssertUnwindSafe(|| atom.reset(1)));
    assert!(result.is_err());
    assert_eq!(view.frames(), vec!["0", "1"]);
    view.unmount();
}

// ── 7. Logging ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Captured {
    messages: Vec<String>,
}

struct Capture {
    state: Arc<Mutex<Captured>>,
}

impl<S> Layer<S> for Capture
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Msg {
            message: Option<String>,
        }
        impl tracing::field::Visit for Msg {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = Some(value.to_string());
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.message = Some(format!("{value:?}").trim_matches('"').to_string());
                }
            }
        }
        let mut msg = Msg { message: None };
        event.record(&mut msg);
        if let Some(message) = msg.message {
            self.state.lock().expect("capture lock").messages.push(message);
        }
    }
}

#[test]
fn lifecycle_and_flush_events_are_logged() {
    let state = Arc::new(Mutex::new(Captured::default()));
    let subscriber = tracing_subscriber::registry().with(Capture {
        state: Arc::clone(&state),
    });
    let _guard = tracing::subscriber::set_default(subscriber);
    let prev = configure(EngineConfig::default().with_trace_notifications(true));

    let atom = Atom::new(0);
    let sub = atom.subscribe(|| {});
    batch(|| atom.reset(1));
    sub.deinit();
    configure(prev);

    let captured = state.lock().expect("capture lock");
    let has = |needle: &str| captured.messages.iter().any(|m| m == needle);
    assert!(has("observable activated"), "{:?}", captured.messages);
    assert!(has("flushing paused triggers"), "{:?}", captured.messages);
    assert!(has("notification sweep"), "{:?}", captured.messages);
    assert!(has("observable deactivated"), "{:?}", captured.messages);
}
