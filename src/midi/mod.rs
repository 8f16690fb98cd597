//! MIDI dispatcher
//!
//! Decodes incoming wire messages and routes them to handlers registered per
//! (message kind, channel, controller/key). Outbound sends serialize typed
//! values and write them to the output port synchronously.
//!
//! A dispatcher walks `Closed -> Open -> Listening -> Closed`: `open`
//! resolves and connects the ports, `listen` starts the receive loop. Handler
//! tables work in any state, so routings can be declared before the hardware
//! is plugged in.

pub mod endpoints;
pub mod wire;

pub use endpoints::{AftertouchEndpoint, CcEndpoint, NoteEndpoint, PitchBendEndpoint};
pub use wire::{MidiMessage, PITCH_BEND_CENTER};

use crate::endpoint::Cancel;
use crate::error::{Error, Result};
use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Lifecycle of a dispatcher's physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    Listening,
}

type CcHandler = Arc<dyn Fn(u8) -> Result<()> + Send + Sync>;
type NoteHandler = Arc<dyn Fn(bool, u8) -> Result<()> + Send + Sync>;
type PitchBendHandler = Arc<dyn Fn(i16, u16) -> Result<()> + Send + Sync>;
type AftertouchHandler = Arc<dyn Fn(u8) -> Result<()> + Send + Sync>;
type SysExHandler = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

struct Registered<H> {
    id: u64,
    handler: H,
}

/// Handler registrations, keyed per message kind.
///
/// Vectors preserve registration order; cancellation removes by id.
#[derive(Default)]
struct HandlerTable {
    next_id: u64,
    cc: HashMap<(u8, u8), Vec<Registered<CcHandler>>>,
    note: HashMap<(u8, u8), Vec<Registered<NoteHandler>>>,
    pitch_bend: HashMap<u8, Vec<Registered<PitchBendHandler>>>,
    aftertouch: HashMap<u8, Vec<Registered<AftertouchHandler>>>,
    sysex: Vec<Registered<(Vec<u8>, SysExHandler)>>,
}

impl HandlerTable {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

struct Shared {
    client_name: String,
    state: Mutex<ConnectionState>,
    handlers: Mutex<HandlerTable>,
    // Keeping the connection alive keeps the port open; dropping it closes it.
    input: Mutex<Option<MidiInputConnection<()>>>,
    output: Mutex<Option<MidiOutputConnection>>,
    input_port_name: Mutex<Option<String>>,
}

/// Routes incoming MIDI to registered handlers and exposes typed outbound
/// sends. Cheap to clone; all clones share one connection and handler table.
#[derive(Clone)]
pub struct MidiDispatcher {
    shared: Arc<Shared>,
}

impl MidiDispatcher {
    pub fn new(client_name: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                client_name: client_name.to_string(),
                state: Mutex::new(ConnectionState::Closed),
                handlers: Mutex::new(HandlerTable::default()),
                input: Mutex::new(None),
                output: Mutex::new(None),
                input_port_name: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// List available MIDI input port names
    pub fn list_input_ports() -> Result<Vec<String>> {
        let midi_in = MidiInput::new("mixbridge-scanner")
            .map_err(|e| Error::Transport(format!("midi input init: {e}")))?;
        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect())
    }

    /// List available MIDI output port names
    pub fn list_output_ports() -> Result<Vec<String>> {
        let midi_out = MidiOutput::new("mixbridge-scanner")
            .map_err(|e| Error::Transport(format!("midi output init: {e}")))?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect())
    }

    /// Resolve both ports by case-insensitive substring match and connect the
    /// output. Requires a closed connection.
    pub fn open(&self, input_port: &str, output_port: &str) -> Result<()> {
        {
            let state = self.shared.state.lock();
            if *state != ConnectionState::Closed {
                return Err(Error::InvalidState("open requires a closed connection"));
            }
        }

        info!(
            "Opening MIDI ports - input: '{}', output: '{}'",
            input_port, output_port
        );

        let midi_in = MidiInput::new(&format!("{}-in", self.shared.client_name))
            .map_err(|e| Error::Transport(format!("midi input init: {e}")))?;
        let (_, in_name) = find_input_port(&midi_in, input_port)
            .ok_or_else(|| Error::PortNotFound(input_port.to_string()))?;

        let midi_out = MidiOutput::new(&format!("{}-out", self.shared.client_name))
            .map_err(|e| Error::Transport(format!("midi output init: {e}")))?;
        let (out_port, out_name) = find_output_port(&midi_out, output_port)
            .ok_or_else(|| Error::PortNotFound(output_port.to_string()))?;

        let output_conn = midi_out
            .connect(&out_port, &self.shared.client_name)
            .map_err(|e| Error::Transport(format!("midi output connect: {e}")))?;

        info!("MIDI ports resolved - input: '{in_name}', output: '{out_name}'");

        *self.shared.output.lock() = Some(output_conn);
        *self.shared.input_port_name.lock() = Some(in_name);
        *self.shared.state.lock() = ConnectionState::Open;
        Ok(())
    }

    /// Connect the input port and start the receive loop.
    ///
    /// Raw bytes cross from the MIDI callback thread into a spawned task over
    /// an unbounded channel; the task decodes and dispatches each message in
    /// arrival order. Requires an open connection and a tokio runtime.
    pub fn listen(&self) -> Result<()> {
        {
            let state = self.shared.state.lock();
            if *state != ConnectionState::Open {
                return Err(Error::InvalidState("listen requires an open connection"));
            }
        }

        let port_name = self
            .shared
            .input_port_name
            .lock()
            .clone()
            .ok_or(Error::NotConnected)?;

        let midi_in = MidiInput::new(&format!("{}-in", self.shared.client_name))
            .map_err(|e| Error::Transport(format!("midi input init: {e}")))?;
        let (in_port, _) = find_input_port(&midi_in, &port_name)
            .ok_or_else(|| Error::PortNotFound(port_name.clone()))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let input_conn = midi_in
            .connect(
                &in_port,
                &self.shared.client_name,
                move |_timestamp, bytes, _| {
                    // Never block the MIDI callback thread
                    let _ = tx.send(bytes.to_vec());
                },
                (),
            )
            .map_err(|e| Error::Transport(format!("midi input connect: {e}")))?;

        *self.shared.input.lock() = Some(input_conn);

        let dispatcher = self.clone();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if let Err(e) = dispatcher.dispatch(&bytes) {
                    debug!("midi dispatch [{}]: {e}", wire::format_hex(&bytes));
                }
            }
            debug!("midi receive loop ended");
        });

        *self.shared.state.lock() = ConnectionState::Listening;
        info!("MIDI listening on '{port_name}'");
        Ok(())
    }

    /// Drop both port connections. The receive loop ends once its channel
    /// drains.
    pub fn close(&self) {
        *self.shared.input.lock() = None;
        *self.shared.output.lock() = None;
        *self.shared.input_port_name.lock() = None;
        *self.shared.state.lock() = ConnectionState::Closed;
        info!("MIDI connection closed");
    }

    /// Register a handler for Control Change on (channel, controller)
    pub fn bind_cc(
        &self,
        channel: u8,
        controller: u8,
        handler: impl Fn(u8) -> Result<()> + Send + Sync + 'static,
    ) -> Cancel {
        let mut table = self.shared.handlers.lock();
        let id = table.next_id();
        table.cc.entry((channel, controller)).or_default().push(Registered {
            id,
            handler: Arc::new(handler),
        });
        let shared = self.shared.clone();
        Cancel::new(move || {
            if let Some(list) = shared.handlers.lock().cc.get_mut(&(channel, controller)) {
                list.retain(|r| r.id != id);
            }
        })
    }

    /// Register a handler for Note On/Off on (channel, key).
    ///
    /// The handler receives the on/off boolean and, separately, the velocity.
    pub fn bind_note(
        &self,
        channel: u8,
        key: u8,
        handler: impl Fn(bool, u8) -> Result<()> + Send + Sync + 'static,
    ) -> Cancel {
        let mut table = self.shared.handlers.lock();
        let id = table.next_id();
        table.note.entry((channel, key)).or_default().push(Registered {
            id,
            handler: Arc::new(handler),
        });
        let shared = self.shared.clone();
        Cancel::new(move || {
            if let Some(list) = shared.handlers.lock().note.get_mut(&(channel, key)) {
                list.retain(|r| r.id != id);
            }
        })
    }

    /// Register a handler for Pitch Bend on a channel.
    ///
    /// The handler receives the center-relative delta and the absolute
    /// position (0-16383, center 8192).
    pub fn bind_pitch_bend(
        &self,
        channel: u8,
        handler: impl Fn(i16, u16) -> Result<()> + Send + Sync + 'static,
    ) -> Cancel {
        let mut table = self.shared.handlers.lock();
        let id = table.next_id();
        table.pitch_bend.entry(channel).or_default().push(Registered {
            id,
            handler: Arc::new(handler),
        });
        let shared = self.shared.clone();
        Cancel::new(move || {
            if let Some(list) = shared.handlers.lock().pitch_bend.get_mut(&channel) {
                list.retain(|r| r.id != id);
            }
        })
    }

    /// Register a handler for channel aftertouch
    pub fn bind_aftertouch(
        &self,
        channel: u8,
        handler: impl Fn(u8) -> Result<()> + Send + Sync + 'static,
    ) -> Cancel {
        let mut table = self.shared.handlers.lock();
        let id = table.next_id();
        table.aftertouch.entry(channel).or_default().push(Registered {
            id,
            handler: Arc::new(handler),
        });
        let shared = self.shared.clone();
        Cancel::new(move || {
            if let Some(list) = shared.handlers.lock().aftertouch.get_mut(&channel) {
                list.retain(|r| r.id != id);
            }
        })
    }

    /// Register a handler for System Exclusive messages whose payload starts
    /// with `prefix`.
    ///
    /// A message matches when it is at least as long as the prefix and its
    /// leading payload bytes (framing stripped) equal the prefix bytes.
    /// Variable-length fields inside the prefix are not supported.
    pub fn bind_sysex(
        &self,
        prefix: Vec<u8>,
        handler: impl Fn(&[u8]) -> Result<()> + Send + Sync + 'static,
    ) -> Cancel {
        let mut table = self.shared.handlers.lock();
        let id = table.next_id();
        table.sysex.push(Registered {
            id,
            handler: (prefix, Arc::new(handler)),
        });
        let shared = self.shared.clone();
        Cancel::new(move || {
            shared.handlers.lock().sysex.retain(|r| r.id != id);
        })
    }

    /// A Control Change endpoint handle for (channel, controller)
    pub fn cc(&self, channel: u8, controller: u8) -> CcEndpoint {
        CcEndpoint::new(self, channel, controller)
    }

    /// A Note endpoint handle for (channel, key)
    pub fn note(&self, channel: u8, key: u8) -> NoteEndpoint {
        NoteEndpoint::new(self, channel, key)
    }

    /// A Pitch Bend endpoint handle for a channel
    pub fn pitch_bend(&self, channel: u8) -> PitchBendEndpoint {
        PitchBendEndpoint::new(self, channel)
    }

    /// An aftertouch endpoint handle for a channel
    pub fn aftertouch(&self, channel: u8) -> AftertouchEndpoint {
        AftertouchEndpoint::new(self, channel)
    }

    /// Route one complete wire message to every matching registration, in
    /// registration order.
    ///
    /// Messages with no matching registration are dropped silently. Handler
    /// errors are collected and returned combined, so one failing callback
    /// never suppresses the rest. Undecodable bytes are an error.
    pub fn dispatch(&self, bytes: &[u8]) -> Result<()> {
        let message = MidiMessage::parse(bytes)?;
        trace!("midi in: {message}");

        let mut errors = Vec::new();
        match &message {
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => {
                for handler in self.snapshot_cc(*channel, *controller) {
                    if let Err(e) = handler(*value) {
                        errors.push(e);
                    }
                }
            }
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => {
                for handler in self.snapshot_note(*channel, *key) {
                    if let Err(e) = handler(true, *velocity) {
                        errors.push(e);
                    }
                }
            }
            MidiMessage::NoteOff {
                channel,
                key,
                velocity,
            } => {
                for handler in self.snapshot_note(*channel, *key) {
                    if let Err(e) = handler(false, *velocity) {
                        errors.push(e);
                    }
                }
            }
            MidiMessage::PitchBend { channel, value } => {
                let delta = (i32::from(*value) - i32::from(PITCH_BEND_CENTER)) as i16;
                for handler in self.snapshot_pitch_bend(*channel) {
                    if let Err(e) = handler(delta, *value) {
                        errors.push(e);
                    }
                }
            }
            MidiMessage::Aftertouch { channel, pressure } => {
                for handler in self.snapshot_aftertouch(*channel) {
                    if let Err(e) = handler(*pressure) {
                        errors.push(e);
                    }
                }
            }
            MidiMessage::SysEx { payload } => {
                for handler in self.snapshot_sysex(payload) {
                    if let Err(e) = handler(payload) {
                        errors.push(e);
                    }
                }
            }
        }
        Error::aggregate(errors)
    }

    // Handlers are snapshotted under the table lock and invoked outside it,
    // so a callback may freely bind, cancel, or send.

    fn snapshot_cc(&self, channel: u8, controller: u8) -> Vec<CcHandler> {
        self.shared
            .handlers
            .lock()
            .cc
            .get(&(channel, controller))
            .map(|list| list.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default()
    }

    fn snapshot_note(&self, channel: u8, key: u8) -> Vec<NoteHandler> {
        self.shared
            .handlers
            .lock()
            .note
            .get(&(channel, key))
            .map(|list| list.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default()
    }

    fn snapshot_pitch_bend(&self, channel: u8) -> Vec<PitchBendHandler> {
        self.shared
            .handlers
            .lock()
            .pitch_bend
            .get(&channel)
            .map(|list| list.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default()
    }

    fn snapshot_aftertouch(&self, channel: u8) -> Vec<AftertouchHandler> {
        self.shared
            .handlers
            .lock()
            .aftertouch
            .get(&channel)
            .map(|list| list.iter().map(|r| r.handler.clone()).collect())
            .unwrap_or_default()
    }

    fn snapshot_sysex(&self, payload: &[u8]) -> Vec<SysExHandler> {
        self.shared
            .handlers
            .lock()
            .sysex
            .iter()
            .filter(|r| {
                let (prefix, _) = &r.handler;
                payload.len() >= prefix.len() && payload[..prefix.len()] == prefix[..]
            })
            .map(|r| r.handler.1.clone())
            .collect()
    }

    /// Send a Control Change message
    pub fn send_cc(&self, channel: u8, controller: u8, value: u8) -> Result<()> {
        self.send_message(&MidiMessage::ControlChange {
            channel,
            controller,
            value,
        })
    }

    /// Send a Note On message
    pub fn send_note_on(&self, channel: u8, key: u8, velocity: u8) -> Result<()> {
        self.send_message(&MidiMessage::NoteOn {
            channel,
            key,
            velocity,
        })
    }

    /// Send a Note Off message
    pub fn send_note_off(&self, channel: u8, key: u8) -> Result<()> {
        self.send_message(&MidiMessage::NoteOff {
            channel,
            key,
            velocity: 0,
        })
    }

    /// Send an absolute Pitch Bend position (0-16383)
    pub fn send_pitch_bend(&self, channel: u8, value: u16) -> Result<()> {
        self.send_message(&MidiMessage::PitchBend {
            channel,
            value: value.min(16383),
        })
    }

    /// Send a channel aftertouch message
    pub fn send_aftertouch(&self, channel: u8, pressure: u8) -> Result<()> {
        self.send_message(&MidiMessage::Aftertouch { channel, pressure })
    }

    /// Send a System Exclusive payload, framing added
    pub fn send_sysex(&self, payload: &[u8]) -> Result<()> {
        self.send_message(&MidiMessage::SysEx {
            payload: payload.to_vec(),
        })
    }

    fn send_message(&self, message: &MidiMessage) -> Result<()> {
        let bytes = message.encode();
        self.send_raw(&bytes)?;
        trace!("midi out: {message}");
        Ok(())
    }

    /// Write raw bytes to the output port
    pub fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut output = self.shared.output.lock();
        let conn = output.as_mut().ok_or(Error::NotConnected)?;
        conn.send(bytes)
            .map_err(|e| Error::Transport(format!("midi send: {e}")))
    }
}

/// Find an input port by case-insensitive substring match
fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Option<(MidiInputPort, String)> {
    let wanted = pattern.to_lowercase();
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            if name.to_lowercase().contains(&wanted) {
                return Some((port, name));
            }
        }
    }
    None
}

/// Find an output port by case-insensitive substring match
fn find_output_port(
    midi_out: &MidiOutput,
    pattern: &str,
) -> Option<(midir::MidiOutputPort, String)> {
    let wanted = pattern.to_lowercase();
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            if name.to_lowercase().contains(&wanted) {
                return Some((port, name));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    fn recorder() -> (Arc<PlMutex<Vec<u8>>>, impl Fn(u8) -> Result<()> + Clone) {
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |value| {
            sink.lock().push(value);
            Ok(())
        })
    }

    #[test]
    fn cc_routing_is_exact() {
        let dispatcher = MidiDispatcher::new("test");
        let (seen, handler) = recorder();
        let _bind = dispatcher.bind_cc(1, 7, handler);

        // Same controller, different channel: must not fire
        dispatcher.dispatch(&[0xB2, 7, 100]).unwrap();
        assert!(seen.lock().is_empty());

        dispatcher.dispatch(&[0xB1, 7, 100]).unwrap();
        assert_eq!(*seen.lock(), vec![100]);
    }

    #[test]
    fn three_matching_messages_fire_three_times_in_order() {
        let dispatcher = MidiDispatcher::new("test");
        let (seen, handler) = recorder();
        let _bind = dispatcher.bind_cc(0, 16, handler);

        dispatcher.dispatch(&[0xB0, 16, 1]).unwrap();
        dispatcher.dispatch(&[0xB0, 16, 2]).unwrap();
        dispatcher.dispatch(&[0xB0, 16, 3]).unwrap();
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let dispatcher = MidiDispatcher::new("test");
        let order = Arc::new(PlMutex::new(Vec::new()));

        let first = order.clone();
        let _a = dispatcher.bind_cc(0, 1, move |_| {
            first.lock().push("first");
            Ok(())
        });
        let second = order.clone();
        let _b = dispatcher.bind_cc(0, 1, move |_| {
            second.lock().push("second");
            Ok(())
        });

        dispatcher.dispatch(&[0xB0, 1, 50]).unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[test]
    fn handler_error_does_not_suppress_later_handlers() {
        let dispatcher = MidiDispatcher::new("test");
        let (seen, handler) = recorder();

        let _failing = dispatcher.bind_cc(0, 1, |_| Err(Error::Transport("boom".into())));
        let _ok = dispatcher.bind_cc(0, 1, handler);

        let result = dispatcher.dispatch(&[0xB0, 1, 9]);
        assert!(result.is_err());
        assert_eq!(*seen.lock(), vec![9]);
    }

    #[test]
    fn cancel_stops_redelivery() {
        let dispatcher = MidiDispatcher::new("test");
        let (seen, handler) = recorder();
        let bind = dispatcher.bind_cc(0, 5, handler);

        dispatcher.dispatch(&[0xB0, 5, 10]).unwrap();
        bind.cancel();
        dispatcher.dispatch(&[0xB0, 5, 20]).unwrap();
        assert_eq!(*seen.lock(), vec![10]);
    }

    #[test]
    fn routing_miss_is_silently_dropped() {
        let dispatcher = MidiDispatcher::new("test");
        assert!(dispatcher.dispatch(&[0xB0, 99, 1]).is_ok());
    }

    #[test]
    fn malformed_input_is_an_error() {
        let dispatcher = MidiDispatcher::new("test");
        assert!(dispatcher.dispatch(&[0x42]).is_err());
    }

    #[test]
    fn note_handlers_get_on_off_and_velocity() {
        let dispatcher = MidiDispatcher::new("test");
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        let _bind = dispatcher.bind_note(0, 60, move |on, velocity| {
            sink.lock().push((on, velocity));
            Ok(())
        });

        dispatcher.dispatch(&[0x90, 60, 100]).unwrap();
        dispatcher.dispatch(&[0x80, 60, 0]).unwrap();
        dispatcher.dispatch(&[0x90, 60, 0]).unwrap(); // velocity 0 = off
        assert_eq!(*seen.lock(), vec![(true, 100), (false, 0), (false, 0)]);
    }

    #[test]
    fn pitch_bend_reports_delta_and_absolute() {
        let dispatcher = MidiDispatcher::new("test");
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        let _bind = dispatcher.bind_pitch_bend(2, move |delta, absolute| {
            sink.lock().push((delta, absolute));
            Ok(())
        });

        // Center
        dispatcher.dispatch(&[0xE2, 0x00, 0x40]).unwrap();
        // Minimum
        dispatcher.dispatch(&[0xE2, 0x00, 0x00]).unwrap();
        assert_eq!(*seen.lock(), vec![(0, 8192), (-8192, 0)]);
    }

    #[test]
    fn sysex_matches_by_prefix() {
        let dispatcher = MidiDispatcher::new("test");
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let sink = seen.clone();
        let _bind = dispatcher.bind_sysex(vec![0x00, 0x00, 0x66], move |payload| {
            sink.lock().push(payload.to_vec());
            Ok(())
        });

        // Longer than the prefix: matches
        dispatcher.dispatch(&[0xF0, 0x00, 0x00, 0x66, 0x14, 0xF7]).unwrap();
        // Shorter than the prefix: dropped
        dispatcher.dispatch(&[0xF0, 0x00, 0x00, 0xF7]).unwrap();
        // Different prefix: dropped
        dispatcher.dispatch(&[0xF0, 0x00, 0x01, 0x66, 0x14, 0xF7]).unwrap();

        assert_eq!(*seen.lock(), vec![vec![0x00, 0x00, 0x66, 0x14]]);
    }

    #[test]
    fn sends_require_a_connection() {
        let dispatcher = MidiDispatcher::new("test");
        assert!(matches!(
            dispatcher.send_cc(0, 7, 64),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn listen_requires_open() {
        let dispatcher = MidiDispatcher::new("test");
        assert!(matches!(
            dispatcher.listen(),
            Err(Error::InvalidState(_))
        ));
    }
}
