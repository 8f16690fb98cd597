//! Mode-scoped routing
//!
//! The mode manager owns the operator-selected mode bitmask, gates bindings
//! so they only fire while their owning mode is active, caches the last value
//! pushed to each mode-scoped output, and replays those cached values into
//! their endpoints when the mode changes.
//!
//! Writes through a scoped settable land in the cache regardless of the
//! current mode, so the cache always holds "what this target should show when
//! its mode becomes active". Redundant writes of the cached value are
//! suppressed to keep repeat upstream values off the wire.

#[cfg(test)]
mod tests;

use crate::endpoint::{BaseValue, Bindable, Cancel, Endpoint, EndpointId, Settable, Value};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use tracing::{debug, trace};

/// Operator-selected mode bitmask.
///
/// Each semantic mode occupies one bit, so a superset screen ("mixing the
/// DAW" plus its sub-layers) is one OR'd constant and activation is a single
/// intersection test. Modes are application-defined constants, never built at
/// runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mode(u32);

impl Mode {
    /// Matches every mode
    pub const ALL: Mode = Mode(u32::MAX);

    /// The mode occupying single bit `n` (0-31)
    pub const fn bit(n: u32) -> Mode {
        assert!(n < 32);
        Mode(1 << n)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when the two masks share at least one bit
    pub const fn intersects(self, other: Mode) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        Mode(self.0 | rhs.0)
    }
}

impl BitOrAssign for Mode {
    fn bitor_assign(&mut self, rhs: Mode) {
        self.0 |= rhs.0;
    }
}

type TransitionFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;
type ReplayFn = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

/// Last value pushed through a mode scope, plus the writer that can replay it
struct CacheSlot {
    value: Value,
    writer: ReplayFn,
}

struct Transition {
    id: u64,
    mode: Mode,
    callback: TransitionFn,
}

struct State {
    current: Mode,
    cache: HashMap<(Mode, EndpointId), CacheSlot>,
    // Last value actually delivered to each endpoint, for replay dedup
    written: HashMap<EndpointId, Value>,
    transitions: Vec<Transition>,
    next_id: u64,
}

/// Owns the current mode and all mode-scoped routing state.
///
/// Cheap to clone; all clones share one state. Constructed explicitly and
/// passed to whatever needs it; there is no process-wide instance.
#[derive(Clone)]
pub struct ModeManager {
    state: Arc<Mutex<State>>,
}

impl ModeManager {
    /// Create a manager starting in `initial`
    pub fn new(initial: Mode) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                current: initial,
                cache: HashMap::new(),
                written: HashMap::new(),
                transitions: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// The active mode bitmask
    pub fn current(&self) -> Mode {
        self.state.lock().current
    }

    /// The cached value for a `(mode, target)` pair.
    ///
    /// `None` means nothing was ever pushed through that scope; callers must
    /// treat that as an ordinary miss, not a failure.
    pub fn cached(&self, mode: Mode, id: &EndpointId) -> Option<Value> {
        self.state
            .lock()
            .cache
            .get(&(mode, id.clone()))
            .map(|slot| slot.value.clone())
    }

    /// Register a callback to run whenever the active mode changes to one
    /// intersecting `mode`
    pub fn on_transition(
        &self,
        mode: Mode,
        callback: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> Cancel {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.transitions.push(Transition {
            id,
            mode,
            callback: Arc::new(callback),
        });
        let shared = self.state.clone();
        Cancel::new(move || {
            shared.lock().transitions.retain(|t| t.id != id);
        })
    }

    /// Switch the active mode.
    ///
    /// Idempotent on repeat calls: nothing runs and nothing is replayed. On
    /// an actual change the new mode becomes visible first, then matching
    /// transition callbacks run, then every cached value scoped to an
    /// intersecting mode is replayed into its endpoint, skipping targets
    /// whose last delivered value already equals the cached one. Callback and
    /// replay errors are combined into one error, never short-circuited.
    pub fn set_mode(&self, new_mode: Mode) -> Result<()> {
        let (transitions, replays) = {
            let mut state = self.state.lock();
            if state.current == new_mode {
                trace!("set_mode {new_mode:?}: already active");
                return Ok(());
            }
            debug!("mode {:?} -> {:?}", state.current, new_mode);
            state.current = new_mode;

            let transitions: Vec<TransitionFn> = state
                .transitions
                .iter()
                .filter(|t| t.mode.intersects(new_mode))
                .map(|t| t.callback.clone())
                .collect();

            let written = &state.written;
            let replays: Vec<(EndpointId, Value, ReplayFn)> = state
                .cache
                .iter()
                .filter(|((mode, _), _)| mode.intersects(new_mode))
                .filter(|((_, id), slot)| written.get(id) != Some(&slot.value))
                .map(|((_, id), slot)| (id.clone(), slot.value.clone(), slot.writer.clone()))
                .collect();

            (transitions, replays)
        };

        // Lock released: callbacks may bind, set, or switch modes themselves.
        let mut errors = Vec::new();
        for callback in &transitions {
            if let Err(e) = callback() {
                errors.push(e);
            }
        }
        for (id, value, writer) in replays {
            trace!("replay {id:?} = {value:?}");
            match writer(&value) {
                Ok(()) => {
                    self.state.lock().written.insert(id, value);
                }
                Err(e) => errors.push(e),
            }
        }
        Error::aggregate(errors)
    }

    /// Wrap `callback` so it only runs while `mode` intersects the active
    /// mode.
    ///
    /// The check happens at call time, not bind time: a binding made while
    /// its mode is inactive starts firing on the next matching event after
    /// the mode activates, with no re-registration.
    pub fn bind<V, B>(
        &self,
        mode: Mode,
        endpoint: &B,
        callback: impl Fn(V) -> Result<()> + Send + Sync + 'static,
    ) -> Cancel
    where
        V: BaseValue,
        B: Bindable<V>,
    {
        let manager = self.clone();
        endpoint.bind(Box::new(move |value| {
            if manager.current().intersects(mode) {
                callback(value)
            } else {
                Ok(())
            }
        }))
    }

    /// Scope `target` to `mode`.
    ///
    /// The returned settable caches every write under `(mode, target)` and
    /// delivers to the real endpoint only while `mode` is active; inactive
    /// writes wait in the cache for the next matching
    /// [`set_mode`](ModeManager::set_mode).
    pub fn scoped<V, S>(&self, mode: Mode, target: S) -> ScopedSettable<V, S>
    where
        V: BaseValue,
        S: Settable<V> + 'static,
    {
        let target = Arc::new(target);
        let writer_target = target.clone();
        let writer: ReplayFn = Arc::new(move |value: &Value| {
            let typed = V::from_value(value).ok_or(Error::ValueKind {
                expected: V::KIND,
                actual: value.kind(),
            })?;
            writer_target.set(typed)
        });
        ScopedSettable {
            manager: self.clone(),
            mode,
            target,
            writer,
            _value: PhantomData,
        }
    }

    /// Core of the scoped set path: cache, dedup, and conditionally deliver.
    fn scoped_set(
        &self,
        mode: Mode,
        id: EndpointId,
        value: Value,
        writer: &ReplayFn,
    ) -> Result<()> {
        let deliver = {
            let mut state = self.state.lock();
            let key = (mode, id.clone());
            if let Some(slot) = state.cache.get(&key) {
                if slot.value == value {
                    trace!("dedup {id:?} = {value:?}");
                    return Ok(());
                }
            }
            state.cache.insert(
                key,
                CacheSlot {
                    value: value.clone(),
                    writer: writer.clone(),
                },
            );
            state.current.intersects(mode)
        };

        if deliver {
            writer(&value)?;
            self.state.lock().written.insert(id, value);
        } else {
            trace!("cached {id:?} = {value:?} for inactive mode {mode:?}");
        }
        Ok(())
    }
}

/// A [`Settable`] wrapper that scopes writes to a mode.
///
/// Every set updates the per-(mode, target) cache; the real write happens
/// immediately only while the owning mode is active, and a write equal to the
/// cached value is suppressed entirely.
pub struct ScopedSettable<V: BaseValue, S: Settable<V>> {
    manager: ModeManager,
    mode: Mode,
    target: Arc<S>,
    writer: ReplayFn,
    _value: PhantomData<fn(V)>,
}

impl<V: BaseValue, S: Settable<V>> ScopedSettable<V, S> {
    /// The mode bitmask this settable is scoped to
    pub fn mode(&self) -> Mode {
        self.mode
    }
}

impl<V: BaseValue, S: Settable<V>> Endpoint for ScopedSettable<V, S> {
    fn id(&self) -> EndpointId {
        self.target.id()
    }
}

impl<V: BaseValue, S: Settable<V> + 'static> Settable<V> for ScopedSettable<V, S> {
    fn set(&self, value: V) -> Result<()> {
        self.manager
            .scoped_set(self.mode, self.target.id(), value.into_value(), &self.writer)
    }
}
