//! OSC dispatcher
//!
//! Matches incoming messages against registered address patterns, coerces
//! arguments on the typed binds, and defers bundled messages until their
//! encoded time tag. Patterns are scanned in registration order on every
//! message (wildcards rule out indexing) and every match fires.

pub mod coerce;
pub mod endpoints;
pub mod pattern;

pub use endpoints::OscEndpoint;
pub use pattern::AddressPattern;

use crate::endpoint::Cancel;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rosc::{OscBundle, OscMessage, OscPacket, OscTime, OscType};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, trace, warn};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

pub(crate) type MsgHandler = Arc<dyn Fn(&OscMessage) -> Result<()> + Send + Sync>;

struct PatternEntry {
    id: u64,
    pattern: AddressPattern,
    handler: MsgHandler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<PatternEntry>,
}

struct Shared {
    registry: Mutex<Registry>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    remote: Mutex<Option<SocketAddr>>,
}

/// Routes incoming OSC messages to pattern-matched handlers and sends
/// outbound messages to a configured peer. Cheap to clone; all clones share
/// one socket and registry.
#[derive(Clone)]
pub struct OscDispatcher {
    shared: Arc<Shared>,
}

impl Default for OscDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl OscDispatcher {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                socket: Mutex::new(None),
                remote: Mutex::new(None),
            }),
        }
    }

    /// Register `handler` for every incoming message whose address matches
    /// `pattern`.
    pub fn add_msg_handler(
        &self,
        pattern: &str,
        handler: impl Fn(&OscMessage) -> Result<()> + Send + Sync + 'static,
    ) -> Result<Cancel> {
        let pattern = AddressPattern::parse(pattern)?;
        Ok(self.register(pattern, Arc::new(handler)))
    }

    pub(crate) fn register(&self, pattern: AddressPattern, handler: MsgHandler) -> Cancel {
        let mut registry = self.shared.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push(PatternEntry {
            id,
            pattern,
            handler,
        });
        let shared = self.shared.clone();
        Cancel::new(move || {
            shared.registry.lock().entries.retain(|e| e.id != id);
        })
    }

    /// Bind an integer handler; the first argument is coerced per the
    /// documented matrix
    pub fn bind_int(
        &self,
        pattern: &str,
        handler: impl Fn(i64) -> Result<()> + Send + Sync + 'static,
    ) -> Result<Cancel> {
        self.add_msg_handler(pattern, move |message| handler(coerce::int_arg(message)?))
    }

    /// Bind a float handler
    pub fn bind_float(
        &self,
        pattern: &str,
        handler: impl Fn(f64) -> Result<()> + Send + Sync + 'static,
    ) -> Result<Cancel> {
        self.add_msg_handler(pattern, move |message| handler(coerce::float_arg(message)?))
    }

    /// Bind a string handler
    pub fn bind_str(
        &self,
        pattern: &str,
        handler: impl Fn(String) -> Result<()> + Send + Sync + 'static,
    ) -> Result<Cancel> {
        self.add_msg_handler(pattern, move |message| handler(coerce::str_arg(message)?))
    }

    /// Bind a boolean handler
    pub fn bind_bool(
        &self,
        pattern: &str,
        handler: impl Fn(bool) -> Result<()> + Send + Sync + 'static,
    ) -> Result<Cancel> {
        self.add_msg_handler(pattern, move |message| handler(coerce::bool_arg(message)?))
    }

    /// An endpoint handle for one address. The address doubles as the bind
    /// pattern, so it must itself be a valid pattern.
    pub fn endpoint(&self, address: &str) -> Result<OscEndpoint> {
        OscEndpoint::new(self, address)
    }

    /// Dispatch one message to every matching registration, in registration
    /// order. Handler errors are combined, never short-circuited; a message
    /// matching nothing is dropped silently.
    pub fn dispatch_message(&self, message: &OscMessage) -> Result<()> {
        // Snapshot matches under the lock, invoke outside it, so handlers can
        // bind, cancel, or send.
        let handlers: Vec<MsgHandler> = {
            let registry = self.shared.registry.lock();
            registry
                .entries
                .iter()
                .filter(|entry| entry.pattern.matches(&message.addr))
                .map(|entry| entry.handler.clone())
                .collect()
        };
        trace!("osc in: {} ({} handlers)", message.addr, handlers.len());

        let mut errors = Vec::new();
        for handler in handlers {
            if let Err(e) = handler(message) {
                errors.push(e);
            }
        }
        Error::aggregate(errors)
    }

    /// Dispatch a packet: messages route immediately, bundles are deferred
    /// until their time tag, nested bundles recursively so.
    pub fn dispatch_packet(&self, packet: OscPacket) -> Result<()> {
        match packet {
            OscPacket::Message(message) => self.dispatch_message(&message),
            OscPacket::Bundle(bundle) => self.schedule_bundle(bundle),
        }
    }

    fn schedule_bundle(&self, bundle: OscBundle) -> Result<()> {
        match bundle_delay(&bundle.timetag) {
            // Immediate tag, or a tag already due
            None => {
                let mut errors = Vec::new();
                for packet in bundle.content {
                    if let Err(e) = self.dispatch_packet(packet) {
                        errors.push(e);
                    }
                }
                Error::aggregate(errors)
            }
            Some(delay) => {
                debug!(
                    "deferring bundle by {:?} ({} packets)",
                    delay,
                    bundle.content.len()
                );
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for packet in bundle.content {
                        if let Err(e) = dispatcher.dispatch_packet(packet) {
                            warn!("deferred bundle dispatch: {e}");
                        }
                    }
                });
                Ok(())
            }
        }
    }

    /// Bind the UDP socket and spawn the receive loop
    pub async fn serve(&self, bind_addr: &str) -> Result<()> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| Error::Transport(format!("osc bind {bind_addr}: {e}")))?;
        info!("OSC listening on {bind_addr}");

        let socket = Arc::new(socket);
        *self.shared.socket.lock() = Some(socket.clone());

        let dispatcher = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, from)) => match rosc::decoder::decode_udp(&buf[..len]) {
                        Ok((_, packet)) => {
                            if let Err(e) = dispatcher.dispatch_packet(packet) {
                                debug!("osc dispatch from {from}: {e}");
                            }
                        }
                        Err(e) => debug!("osc decode from {from}: {e:?}"),
                    },
                    Err(e) => {
                        error!("osc receive: {e}");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    /// Set the peer outbound messages are sent to
    pub fn set_remote(&self, addr: &str) -> Result<()> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::Transport(format!("invalid remote address '{addr}': {e}")))?;
        *self.shared.remote.lock() = Some(addr);
        Ok(())
    }

    /// Send one message to the configured remote.
    ///
    /// The datagram write is initiated synchronously and not awaited.
    pub fn send(&self, addr: &str, args: Vec<OscType>) -> Result<()> {
        let socket = self
            .shared
            .socket
            .lock()
            .clone()
            .ok_or(Error::NotConnected)?;
        let remote = (*self.shared.remote.lock()).ok_or(Error::NotConnected)?;

        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        let bytes = rosc::encoder::encode(&packet)
            .map_err(|e| Error::Transport(format!("osc encode: {e:?}")))?;
        socket
            .try_send_to(&bytes, remote)
            .map_err(|e| Error::Transport(format!("osc send: {e}")))?;
        trace!("osc out: {addr}");
        Ok(())
    }
}

/// Delay until a bundle's time tag, or `None` when it should dispatch now.
///
/// A zero-second tag is the OSC "immediately" tag; tags before the NTP-Unix
/// offset or already in the past dispatch now as well.
fn bundle_delay(timetag: &OscTime) -> Option<Duration> {
    if timetag.seconds == 0 {
        return None;
    }
    let target_secs = u64::from(timetag.seconds).checked_sub(NTP_UNIX_OFFSET)?;
    let frac_nanos = (u64::from(timetag.fractional) * 1_000_000_000) >> 32;
    let target = Duration::new(target_secs, frac_nanos as u32);
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    target.checked_sub(now)
}
