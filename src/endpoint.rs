//! Endpoint capability contracts
//!
//! Everything the routing core manipulates (a fader, a mute button, a mixer
//! parameter) is reduced to two capabilities: [`Bindable`] (observe every
//! change) and [`Settable`] (push a new value). Protocol dispatchers hand out
//! per-address handles implementing these, so the mode manager can route
//! between devices without knowing any wire format.

use crate::error::Result;

/// Value kinds understood by the bridge core.
///
/// The mode cache stores these tagged values, letting heterogeneous endpoints
/// share one cache without runtime reflection.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    /// Name of the contained kind, for error reporting
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bool(_) => "bool",
        }
    }
}

/// Base kinds convertible to and from [`Value`].
///
/// Implemented for exactly the four kinds endpoints carry: `i64`, `f64`,
/// `String`, and `bool`.
pub trait BaseValue: Clone + PartialEq + Send + Sync + 'static {
    /// Kind name, matching [`Value::kind`]
    const KIND: &'static str;

    fn into_value(self) -> Value;

    /// Recover the typed value; `None` when the variant does not match.
    fn from_value(value: &Value) -> Option<Self>;
}

impl BaseValue for i64 {
    const KIND: &'static str = "int";

    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl BaseValue for f64 {
    const KIND: &'static str = "float";

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl BaseValue for String {
    const KIND: &'static str = "str";

    fn into_value(self) -> Value {
        Value::Str(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl BaseValue for bool {
    const KIND: &'static str = "bool";

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Identity of a protocol endpoint.
///
/// Identity is the underlying protocol address, a MIDI (kind, channel, data)
/// key or an OSC address string, never the observed value. The mode cache is
/// keyed by these.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointId {
    /// A (channel, controller) Control Change pair
    MidiCc { channel: u8, controller: u8 },
    /// A (channel, key) note pair
    MidiNote { channel: u8, key: u8 },
    /// A per-channel pitch bend position
    MidiPitchBend { channel: u8 },
    /// A per-channel aftertouch pressure
    MidiAftertouch { channel: u8 },
    /// An OSC address
    Osc(String),
    /// An out-of-tree endpoint named by the integrating device tree
    Label(String),
}

/// Callback invoked once per observed change of a bound endpoint
pub type Callback<V> = Box<dyn Fn(V) -> Result<()> + Send + Sync>;

/// An endpoint with a protocol identity
pub trait Endpoint {
    fn id(&self) -> EndpointId;
}

/// An endpoint whose changes can be observed.
pub trait Bindable<V: BaseValue>: Send + Sync {
    /// Register `callback` to run on every observed change.
    ///
    /// Multiple binds to the same endpoint are independent and all fire, in
    /// registration order. The returned [`Cancel`] deregisters exactly this
    /// callback.
    fn bind(&self, callback: Callback<V>) -> Cancel;
}

/// An endpoint that accepts a new value to push outward.
pub trait Settable<V: BaseValue>: Endpoint + Send + Sync {
    /// Push `value` to the underlying protocol.
    ///
    /// Initiates the wire write synchronously; does not block for
    /// acknowledgment. Transport failures are error returns.
    fn set(&self, value: V) -> Result<()>;
}

/// Deregistration handle returned by every bind.
///
/// Safe to call concurrently with dispatch: a handler mid-execution finishes,
/// but is not invoked again. Dropping the handle without calling it leaves
/// the binding live for the process lifetime.
pub struct Cancel(Option<Box<dyn FnOnce() + Send>>);

impl Cancel {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// A handle that deregisters nothing
    pub fn noop() -> Self {
        Self(None)
    }

    /// Remove the registration this handle was returned for
    pub fn cancel(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Read+write endpoint built by composition.
///
/// The core never merges both capabilities into one object with shared
/// internal state; an endpoint that is both readable and writable is just one
/// of each. Identity comes from the write side.
pub struct Duplex<B, S> {
    input: B,
    output: S,
}

impl<B, S> Duplex<B, S> {
    pub fn new(input: B, output: S) -> Self {
        Self { input, output }
    }
}

impl<B, S: Endpoint> Endpoint for Duplex<B, S> {
    fn id(&self) -> EndpointId {
        self.output.id()
    }
}

impl<V: BaseValue, B: Bindable<V>, S: Send + Sync> Bindable<V> for Duplex<B, S> {
    fn bind(&self, callback: Callback<V>) -> Cancel {
        self.input.bind(callback)
    }
}

impl<V: BaseValue, B: Send + Sync, S: Settable<V>> Settable<V> for Duplex<B, S> {
    fn set(&self, value: V) -> Result<()> {
        self.output.set(value)
    }
}
