//! mixbridge - mode-scoped bridge between control surfaces and mixer targets
//!
//! Lets heterogeneous control surfaces (MIDI controllers) and controlled
//! targets (DAWs, audio-interface mixers) exchange state bidirectionally,
//! with routing that changes with an operator-selected mode:
//!
//! - [`midi::MidiDispatcher`] and [`osc::OscDispatcher`] decode wire messages
//!   and route them to registered per-address handlers.
//! - The [`endpoint`] contracts ([`Bindable`], [`Settable`]) give every
//!   protocol the same shape, so routings are written once against handles.
//! - [`mode::ModeManager`] gates bindings by the active mode bitmask, caches
//!   mode-scoped writes, and replays cached values on mode transitions.
//!
//! Device and DAW endpoint trees live outside this crate; they compose
//! dispatcher handles into per-parameter endpoints and wire them together
//! through the mode manager.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod midi;
pub mod mode;
pub mod osc;

pub use endpoint::{
    BaseValue, Bindable, Callback, Cancel, Duplex, Endpoint, EndpointId, Settable, Value,
};
pub use error::{Error, Result};
pub use midi::MidiDispatcher;
pub use mode::{Mode, ModeManager, ScopedSettable};
pub use osc::OscDispatcher;
