//! Per-control MIDI endpoint handles
//!
//! Thin handles tying one MIDI address to the generic endpoint contracts, so
//! device trees and the mode manager can treat a fader or button like any
//! other bindable/settable value.

use super::MidiDispatcher;
use crate::endpoint::{Bindable, Callback, Cancel, Endpoint, EndpointId, Settable};
use crate::error::Result;

/// A (channel, controller) Control Change endpoint carrying 0-127 values
pub struct CcEndpoint {
    dispatcher: MidiDispatcher,
    channel: u8,
    controller: u8,
}

impl CcEndpoint {
    pub fn new(dispatcher: &MidiDispatcher, channel: u8, controller: u8) -> Self {
        Self {
            dispatcher: dispatcher.clone(),
            channel,
            controller,
        }
    }
}

impl Endpoint for CcEndpoint {
    fn id(&self) -> EndpointId {
        EndpointId::MidiCc {
            channel: self.channel,
            controller: self.controller,
        }
    }
}

impl Bindable<i64> for CcEndpoint {
    fn bind(&self, callback: Callback<i64>) -> Cancel {
        self.dispatcher
            .bind_cc(self.channel, self.controller, move |value| {
                callback(i64::from(value))
            })
    }
}

impl Settable<i64> for CcEndpoint {
    fn set(&self, value: i64) -> Result<()> {
        self.dispatcher
            .send_cc(self.channel, self.controller, value.clamp(0, 127) as u8)
    }
}

/// A (channel, key) note endpoint.
///
/// Observed as an on/off boolean (velocity separately via [`Bindable<i64>`]);
/// set drives Note On at full velocity or Note Off, the usual LED contract.
pub struct NoteEndpoint {
    dispatcher: MidiDispatcher,
    channel: u8,
    key: u8,
}

impl NoteEndpoint {
    pub fn new(dispatcher: &MidiDispatcher, channel: u8, key: u8) -> Self {
        Self {
            dispatcher: dispatcher.clone(),
            channel,
            key,
        }
    }
}

impl Endpoint for NoteEndpoint {
    fn id(&self) -> EndpointId {
        EndpointId::MidiNote {
            channel: self.channel,
            key: self.key,
        }
    }
}

impl Bindable<bool> for NoteEndpoint {
    fn bind(&self, callback: Callback<bool>) -> Cancel {
        self.dispatcher
            .bind_note(self.channel, self.key, move |on, _velocity| callback(on))
    }
}

/// Velocity observation, independent of the on/off boolean
impl Bindable<i64> for NoteEndpoint {
    fn bind(&self, callback: Callback<i64>) -> Cancel {
        self.dispatcher
            .bind_note(self.channel, self.key, move |_on, velocity| {
                callback(i64::from(velocity))
            })
    }
}

impl Settable<bool> for NoteEndpoint {
    fn set(&self, value: bool) -> Result<()> {
        if value {
            self.dispatcher.send_note_on(self.channel, self.key, 127)
        } else {
            self.dispatcher.send_note_off(self.channel, self.key)
        }
    }
}

/// A per-channel pitch bend endpoint carrying absolute 0-16383 positions
pub struct PitchBendEndpoint {
    dispatcher: MidiDispatcher,
    channel: u8,
}

impl PitchBendEndpoint {
    pub fn new(dispatcher: &MidiDispatcher, channel: u8) -> Self {
        Self {
            dispatcher: dispatcher.clone(),
            channel,
        }
    }
}

impl Endpoint for PitchBendEndpoint {
    fn id(&self) -> EndpointId {
        EndpointId::MidiPitchBend {
            channel: self.channel,
        }
    }
}

impl Bindable<i64> for PitchBendEndpoint {
    fn bind(&self, callback: Callback<i64>) -> Cancel {
        self.dispatcher
            .bind_pitch_bend(self.channel, move |_delta, absolute| {
                callback(i64::from(absolute))
            })
    }
}

impl Settable<i64> for PitchBendEndpoint {
    fn set(&self, value: i64) -> Result<()> {
        self.dispatcher
            .send_pitch_bend(self.channel, value.clamp(0, 16383) as u16)
    }
}

/// A per-channel aftertouch endpoint carrying 0-127 pressure values
pub struct AftertouchEndpoint {
    dispatcher: MidiDispatcher,
    channel: u8,
}

impl AftertouchEndpoint {
    pub fn new(dispatcher: &MidiDispatcher, channel: u8) -> Self {
        Self {
            dispatcher: dispatcher.clone(),
            channel,
        }
    }
}

impl Endpoint for AftertouchEndpoint {
    fn id(&self) -> EndpointId {
        EndpointId::MidiAftertouch {
            channel: self.channel,
        }
    }
}

impl Bindable<i64> for AftertouchEndpoint {
    fn bind(&self, callback: Callback<i64>) -> Cancel {
        self.dispatcher
            .bind_aftertouch(self.channel, move |pressure| callback(i64::from(pressure)))
    }
}

impl Settable<i64> for AftertouchEndpoint {
    fn set(&self, value: i64) -> Result<()> {
        self.dispatcher
            .send_aftertouch(self.channel, value.clamp(0, 127) as u8)
    }
}
