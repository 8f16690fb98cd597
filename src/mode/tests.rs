//! Tests for mode-scoped routing

use super::*;
use crate::endpoint::{Bindable, Callback, Cancel, Endpoint, EndpointId, Settable, Value};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

const MIX: Mode = Mode::bit(0);
const RECORD: Mode = Mode::bit(1);
const SENDS: Mode = Mode::bit(2);

/// Records every value delivered to it
#[derive(Clone)]
struct Probe {
    label: &'static str,
    writes: Arc<Mutex<Vec<Value>>>,
}

impl Probe {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn writes(&self) -> Vec<Value> {
        self.writes.lock().clone()
    }
}

impl Endpoint for Probe {
    fn id(&self) -> EndpointId {
        EndpointId::Label(self.label.to_string())
    }
}

impl Settable<f64> for Probe {
    fn set(&self, value: f64) -> Result<()> {
        self.writes.lock().push(Value::Float(value));
        Ok(())
    }
}

/// A bindable control that fires whatever it is told to
#[derive(Clone, Default)]
struct FakeControl {
    callbacks: Arc<Mutex<Vec<(u64, Arc<Callback<f64>>)>>>,
    next_id: Arc<Mutex<u64>>,
}

impl FakeControl {
    fn fire(&self, value: f64) -> Result<()> {
        let callbacks: Vec<_> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        let mut errors = Vec::new();
        for callback in callbacks {
            if let Err(e) = callback(value) {
                errors.push(e);
            }
        }
        Error::aggregate(errors)
    }
}

impl Bindable<f64> for FakeControl {
    fn bind(&self, callback: Callback<f64>) -> Cancel {
        let mut next_id = self.next_id.lock();
        *next_id += 1;
        let id = *next_id;
        self.callbacks.lock().push((id, Arc::new(callback)));
        let callbacks = self.callbacks.clone();
        Cancel::new(move || {
            callbacks.lock().retain(|(i, _)| *i != id);
        })
    }
}

#[test]
fn mode_bitmask_operations() {
    let superset = MIX | SENDS;
    assert!(superset.intersects(MIX));
    assert!(superset.intersects(SENDS));
    assert!(!superset.intersects(RECORD));
    assert!(Mode::ALL.intersects(RECORD));
    assert_eq!(Mode::bit(3).bits(), 0b1000);
}

#[test]
fn set_mode_is_idempotent() {
    let manager = ModeManager::new(MIX);
    let probe = Probe::new("a");
    let scoped = manager.scoped(MIX, probe.clone());
    scoped.set(5.0).unwrap();

    let transitions = Arc::new(Mutex::new(0u32));
    let count = transitions.clone();
    let _t = manager.on_transition(MIX, move || {
        *count.lock() += 1;
        Ok(())
    });

    // Repeat call: no transition callbacks, no replay, no extra writes
    manager.set_mode(MIX).unwrap();
    assert_eq!(*transitions.lock(), 0);
    assert_eq!(probe.writes(), vec![Value::Float(5.0)]);
}

#[test]
fn inactive_writes_are_cached_not_delivered() {
    let manager = ModeManager::new(MIX);
    let probe = Probe::new("b");
    let scoped = manager.scoped(RECORD, probe.clone());

    scoped.set(1.0).unwrap();
    scoped.set(2.0).unwrap();
    scoped.set(3.0).unwrap();
    assert!(probe.writes().is_empty());
}

#[test]
fn replay_delivers_the_latest_cached_value_exactly_once() {
    let manager = ModeManager::new(MIX);
    let probe = Probe::new("b");
    let scoped = manager.scoped(RECORD, probe.clone());

    scoped.set(1.0).unwrap();
    scoped.set(2.0).unwrap();
    scoped.set(3.0).unwrap();

    manager.set_mode(RECORD).unwrap();
    assert_eq!(probe.writes(), vec![Value::Float(3.0)]);
}

#[test]
fn repeated_value_is_deduplicated() {
    let manager = ModeManager::new(MIX);
    let probe = Probe::new("fader");
    let scoped = manager.scoped(MIX, probe.clone());

    scoped.set(5.0).unwrap();
    scoped.set(5.0).unwrap();
    assert_eq!(probe.writes(), vec![Value::Float(5.0)]);

    scoped.set(6.0).unwrap();
    scoped.set(5.0).unwrap();
    assert_eq!(
        probe.writes(),
        vec![Value::Float(5.0), Value::Float(6.0), Value::Float(5.0)]
    );
}

#[test]
fn gated_binding_fires_only_while_its_mode_is_active() {
    let manager = ModeManager::new(MIX);
    let control = FakeControl::default();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _bind = manager.bind(RECORD, &control, move |value: f64| {
        sink.lock().push(value);
        Ok(())
    });

    // RECORD inactive: events pass through the control but the callback stays quiet
    control.fire(1.0).unwrap();
    assert!(seen.lock().is_empty());

    // Once RECORD activates the same registration fires, no rebind needed
    manager.set_mode(RECORD).unwrap();
    control.fire(2.0).unwrap();
    assert_eq!(*seen.lock(), vec![2.0]);

    manager.set_mode(MIX).unwrap();
    control.fire(3.0).unwrap();
    assert_eq!(*seen.lock(), vec![2.0]);
}

#[test]
fn binding_under_a_superset_mask_fires_in_every_member_mode() {
    let manager = ModeManager::new(MIX);
    let control = FakeControl::default();

    let seen = Arc::new(Mutex::new(0u32));
    let count = seen.clone();
    let _bind = manager.bind(Mode::ALL, &control, move |_: f64| {
        *count.lock() += 1;
        Ok(())
    });

    control.fire(0.1).unwrap();
    manager.set_mode(RECORD).unwrap();
    control.fire(0.2).unwrap();
    assert_eq!(*seen.lock(), 2);
}

#[test]
fn transition_callbacks_run_for_intersecting_modes_only() {
    let manager = ModeManager::new(MIX);

    let fired = Arc::new(Mutex::new(Vec::new()));
    let mix = fired.clone();
    let _a = manager.on_transition(MIX, move || {
        mix.lock().push("mix");
        Ok(())
    });
    let record = fired.clone();
    let _b = manager.on_transition(RECORD, move || {
        record.lock().push("record");
        Ok(())
    });

    manager.set_mode(RECORD).unwrap();
    assert_eq!(*fired.lock(), vec!["record"]);

    manager.set_mode(MIX | SENDS).unwrap();
    assert_eq!(*fired.lock(), vec!["record", "mix"]);
}

#[test]
fn transition_errors_aggregate_without_short_circuiting() {
    let manager = ModeManager::new(MIX);

    let _bad1 = manager.on_transition(RECORD, || Err(Error::Transport("first".into())));
    let ran = Arc::new(Mutex::new(false));
    let flag = ran.clone();
    let _good = manager.on_transition(RECORD, move || {
        *flag.lock() = true;
        Ok(())
    });
    let _bad2 = manager.on_transition(RECORD, || Err(Error::Transport("second".into())));

    match manager.set_mode(RECORD) {
        Err(Error::Multiple(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected Multiple, got {other:?}"),
    }
    assert!(*ran.lock());
}

#[test]
fn cancelled_transition_callback_never_runs() {
    let manager = ModeManager::new(MIX);
    let fired = Arc::new(Mutex::new(false));
    let flag = fired.clone();
    let cancel = manager.on_transition(RECORD, move || {
        *flag.lock() = true;
        Ok(())
    });

    cancel.cancel();
    manager.set_mode(RECORD).unwrap();
    assert!(!*fired.lock());
}

#[test]
fn cancelled_gated_binding_stops_firing() {
    let manager = ModeManager::new(MIX);
    let control = FakeControl::default();

    let seen = Arc::new(Mutex::new(0u32));
    let count = seen.clone();
    let bind = manager.bind(MIX, &control, move |_: f64| {
        *count.lock() += 1;
        Ok(())
    });

    control.fire(1.0).unwrap();
    bind.cancel();
    control.fire(2.0).unwrap();
    assert_eq!(*seen.lock(), 1);
}

/// The end-to-end scenario: two targets on two modes, switched back and forth.
#[test]
fn mode_switching_replays_and_dedups_across_targets() {
    let manager = ModeManager::new(MIX);
    let a = Probe::new("a");
    let b = Probe::new("b");

    let a_mix = manager.scoped(MIX, a.clone());
    let b_record = manager.scoped(RECORD, b.clone());

    // MIX active: A delivers immediately, B only caches
    a_mix.set(5.0).unwrap();
    b_record.set(9.0).unwrap();
    assert_eq!(a.writes(), vec![Value::Float(5.0)]);
    assert!(b.writes().is_empty());

    // Switch to RECORD: B replays, A stays untouched
    manager.set_mode(RECORD).unwrap();
    assert_eq!(b.writes(), vec![Value::Float(9.0)]);
    assert_eq!(a.writes(), vec![Value::Float(5.0)]);

    // Back to MIX: A's last delivered value already equals the cache, so the
    // rewrite is suppressed
    manager.set_mode(MIX).unwrap();
    assert_eq!(a.writes(), vec![Value::Float(5.0)]);
}

#[test]
fn replay_rewrites_when_another_mode_changed_the_endpoint() {
    let manager = ModeManager::new(MIX);
    let shared = Probe::new("shared");

    // The same physical endpoint scoped under two modes
    let under_mix = manager.scoped(MIX, shared.clone());
    let under_record = manager.scoped(RECORD, shared.clone());

    under_mix.set(5.0).unwrap();
    assert_eq!(shared.writes(), vec![Value::Float(5.0)]);

    manager.set_mode(RECORD).unwrap();
    under_record.set(7.0).unwrap();
    assert_eq!(shared.writes(), vec![Value::Float(5.0), Value::Float(7.0)]);

    // The endpoint last showed 7.0, so MIX's cached 5.0 must be replayed
    manager.set_mode(MIX).unwrap();
    assert_eq!(
        shared.writes(),
        vec![Value::Float(5.0), Value::Float(7.0), Value::Float(5.0)]
    );
}

#[test]
fn scoped_settable_keeps_the_target_identity() {
    let manager = ModeManager::new(MIX);
    let probe = Probe::new("ident");
    let scoped = manager.scoped::<f64, _>(MIX, probe.clone());
    assert_eq!(scoped.id(), probe.id());
    assert_eq!(scoped.mode(), MIX);
}

#[test]
fn cache_lookup_misses_are_plain_none() {
    let manager = ModeManager::new(MIX);
    let probe = Probe::new("fader");
    let scoped = manager.scoped(RECORD, probe.clone());

    let id = probe.id();
    assert_eq!(manager.cached(RECORD, &id), None);

    scoped.set(2.5).unwrap();
    assert_eq!(manager.cached(RECORD, &id), Some(Value::Float(2.5)));
    assert_eq!(manager.cached(MIX, &id), None);
}

#[test]
fn current_mode_tracks_set_mode() {
    let manager = ModeManager::new(MIX);
    assert_eq!(manager.current(), MIX);
    manager.set_mode(RECORD | SENDS).unwrap();
    assert_eq!(manager.current(), RECORD | SENDS);
}
