//! Pendant register block layout.
//!
//! The pendant exposes 4 holding registers. Each register is sent
//! big-endian; concatenated they form this 8-byte block:
//!
//! | Byte | Content |
//! |---|---|
//! | 0 | bit0 e-stop, bit2 link lost, bits 4-7 heartbeat |
//! | 1 | bit0 lift up, bit1 lift down, bit2 rotate left, bit3 rotate right, bit6 mode select, bit7 enable |
//! | 2 | low nibble mode code |
//! | 3 | speed in percent |
//! | 6 | linear axis, 127 = centre |
//! | 7 | angular axis, 127 = centre |

use chrono::{DateTime, Utc};
use modular_bitfield::prelude::*;

use crate::error::DecodeError;
use crate::remote::state::{Buttons, RemoteControlState, RemoteMode, derive_action};

/// Bytes in one register block.
pub const BLOCK_LEN: usize = 8;
/// Registers in one block.
pub const REGISTER_COUNT: usize = BLOCK_LEN / 2;

const AXIS_CENTRE: f64 = 127.0;

#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct SystemByte {
    pub e_stop: bool,
    #[skip]
    __: B1,
    pub link_lost: bool,
    #[skip]
    __: B1,
    pub heartbeat: B4,
}

#[bitfield]
#[derive(Debug, Clone, Copy)]
pub struct ButtonByte {
    pub lift_up: bool,
    pub lift_down: bool,
    pub rotate_left: bool,
    pub rotate_right: bool,
    #[skip]
    __: B2,
    pub mode_select: bool,
    pub enable: bool,
}

/// Concatenate big-endian registers into the byte block.
pub fn registers_to_bytes(registers: &[u16]) -> Result<[u8; BLOCK_LEN], DecodeError> {
    if registers.len() != REGISTER_COUNT {
        return Err(DecodeError::RegisterCount {
            expected: REGISTER_COUNT,
            actual: registers.len(),
        });
    }
    let mut bytes = [0u8; BLOCK_LEN];
    for (chunk, register) in bytes.chunks_exact_mut(2).zip(registers) {
        chunk.copy_from_slice(&register.to_be_bytes());
    }
    Ok(bytes)
}

/// Map an axis byte onto roughly -1.0..=1.0.
fn axis(raw: u8) -> f64 {
    (f64::from(raw) - AXIS_CENTRE) / AXIS_CENTRE
}

/// Decode a register block, applying the safety clamp.
///
/// Only the first 8 bytes are used; fewer is an error.
pub fn decode(bytes: &[u8], now: DateTime<Utc>) -> Result<RemoteControlState, DecodeError> {
    if bytes.len() < BLOCK_LEN {
        return Err(DecodeError::ShortBuffer {
            expected: BLOCK_LEN,
            actual: bytes.len(),
        });
    }

    let system = SystemByte::from_bytes([bytes[0]]);
    let pressed = ButtonByte::from_bytes([bytes[1]]);

    let remote_ready = !system.link_lost();
    let e_stop = system.e_stop();
    let enable = pressed.enable();
    let buttons = Buttons {
        lift_up: pressed.lift_up(),
        lift_down: pressed.lift_down(),
        rotate_left: pressed.rotate_left(),
        rotate_right: pressed.rotate_right(),
        mode_select: pressed.mode_select(),
    };

    let raw_linear = axis(bytes[6]);
    let raw_angular = axis(bytes[7]);
    let (linear, angular) = if remote_ready && !e_stop && enable {
        (raw_linear, raw_angular)
    } else {
        (0.0, 0.0)
    };

    Ok(RemoteControlState {
        heartbeat: system.heartbeat(),
        link_lost: system.link_lost(),
        remote_ready,
        e_stop,
        enable,
        mode: RemoteMode::from(bytes[2] & 0x0F),
        buttons,
        linear,
        angular,
        speed: f64::from(bytes[3].min(100)) / 100.0,
        raw_linear,
        raw_angular,
        action: derive_action(remote_ready, e_stop, enable, linear, angular, &buttons),
        updated_at: now,
    })
}
