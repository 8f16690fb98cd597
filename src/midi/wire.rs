//! MIDI wire message model
//!
//! Covers the message kinds the bridge routes: Control Change, Pitch Bend,
//! Note On/Off, channel aftertouch, and System Exclusive. Decoding returns an
//! explicit error on malformed or unrouted input instead of panicking.

use crate::error::{Error, Result};
use std::fmt;

/// Center position of the 14-bit pitch bend range
pub const PITCH_BEND_CENTER: u16 = 8192;

/// A decoded MIDI wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), key (0-127), velocity (0-127)
    NoteOff { channel: u8, key: u8, velocity: u8 },

    /// Note On: channel (0-15), key (0-127), velocity (0-127)
    NoteOn { channel: u8, key: u8, velocity: u8 },

    /// Control Change: channel (0-15), controller (0-127), value (0-127)
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },

    /// Channel aftertouch: channel (0-15), pressure (0-127)
    Aftertouch { channel: u8, pressure: u8 },

    /// Pitch Bend: channel (0-15), absolute position (0-16383, center 8192)
    PitchBend { channel: u8, value: u16 },

    /// System Exclusive payload, without the 0xF0/0xF7 framing bytes
    SysEx { payload: Vec<u8> },
}

impl MidiMessage {
    /// Decode one complete wire message.
    ///
    /// Running status is not supported: the first byte must be a status byte.
    /// Message kinds the bridge does not route (program change, poly
    /// pressure, realtime) decode to an error the caller can log and drop.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let &status = data
            .first()
            .ok_or_else(|| Error::Malformed("empty message".into()))?;

        if status < 0x80 {
            return Err(Error::Malformed(format!(
                "expected status byte, got {status:#04x}"
            )));
        }

        if status == 0xF0 {
            return Self::parse_sysex(data);
        }
        if status >= 0xF0 {
            return Err(Error::Malformed(format!(
                "unrouted system message {status:#04x}"
            )));
        }

        let channel = status & 0x0F;
        match status & 0xF0 {
            0x80 => {
                let (key, velocity) = two_data_bytes(data)?;
                Ok(MidiMessage::NoteOff {
                    channel,
                    key,
                    velocity,
                })
            }
            0x90 => {
                let (key, velocity) = two_data_bytes(data)?;
                // Note On with velocity 0 is a Note Off by convention
                if velocity == 0 {
                    Ok(MidiMessage::NoteOff {
                        channel,
                        key,
                        velocity: 0,
                    })
                } else {
                    Ok(MidiMessage::NoteOn {
                        channel,
                        key,
                        velocity,
                    })
                }
            }
            0xB0 => {
                let (controller, value) = two_data_bytes(data)?;
                Ok(MidiMessage::ControlChange {
                    channel,
                    controller,
                    value,
                })
            }
            0xD0 => {
                let pressure = one_data_byte(data)?;
                Ok(MidiMessage::Aftertouch { channel, pressure })
            }
            0xE0 => {
                let (lsb, msb) = two_data_bytes(data)?;
                let value = (u16::from(msb) << 7) | u16::from(lsb);
                Ok(MidiMessage::PitchBend { channel, value })
            }
            kind => Err(Error::Malformed(format!(
                "unrouted message kind {kind:#04x}"
            ))),
        }
    }

    fn parse_sysex(data: &[u8]) -> Result<Self> {
        let end = data
            .iter()
            .position(|&b| b == 0xF7)
            .ok_or_else(|| Error::Malformed("unterminated sysex".into()))?;
        Ok(MidiMessage::SysEx {
            payload: data[1..end].to_vec(),
        })
    }

    /// Encode the message back to wire bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff {
                channel,
                key,
                velocity,
            } => vec![0x80 | (channel & 0x0F), key & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => vec![0x90 | (channel & 0x0F), key & 0x7F, velocity & 0x7F],
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => vec![0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F],
            MidiMessage::Aftertouch { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let lsb = (value & 0x7F) as u8;
                let msb = ((value >> 7) & 0x7F) as u8;
                vec![0xE0 | (channel & 0x0F), lsb, msb]
            }
            MidiMessage::SysEx { ref payload } => {
                let mut bytes = Vec::with_capacity(payload.len() + 2);
                bytes.push(0xF0);
                bytes.extend_from_slice(payload);
                bytes.push(0xF7);
                bytes
            }
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff {
                channel,
                key,
                velocity,
            } => write!(f, "NoteOff ch:{channel} k:{key} v:{velocity}"),
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => write!(f, "NoteOn ch:{channel} k:{key} v:{velocity}"),
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => write!(f, "CC ch:{channel} cc:{controller} v:{value}"),
            MidiMessage::Aftertouch { channel, pressure } => {
                write!(f, "Aftertouch ch:{channel} p:{pressure}")
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{channel} v:{value}")
            }
            MidiMessage::SysEx { ref payload } => write!(f, "SysEx {} bytes", payload.len()),
        }
    }
}

fn one_data_byte(data: &[u8]) -> Result<u8> {
    if data.len() < 2 {
        return Err(Error::Malformed("truncated message".into()));
    }
    Ok(data[1] & 0x7F)
}

fn two_data_bytes(data: &[u8]) -> Result<(u8, u8)> {
    if data.len() < 3 {
        return Err(Error::Malformed("truncated message".into()));
    }
    Ok((data[1] & 0x7F, data[2] & 0x7F))
}

/// MIDI value width conversions
pub mod convert {
    /// Convert a 14-bit value (0-16383) to 7 bits (0-127)
    pub fn to_7bit(value_14bit: u16) -> u8 {
        ((value_14bit >> 7) & 0x7F) as u8
    }

    /// Convert a 7-bit value (0-127) to 14 bits (0-16383)
    pub fn to_14bit(value_7bit: u8) -> u16 {
        (u16::from(value_7bit) << 7) | u16::from(value_7bit)
    }
}

/// Format MIDI bytes as a hex string for logging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
