//! This crate bridges two pieces of field equipment: a battery charger on a
//! CAN bus and a remote-control pendant on a Modbus-RTU serial line.
//!
//! Charger frames are decoded into a [`ChargingState`](charging::ChargingState),
//! which emits [`DomainEvent`](charging::DomainEvent)s on interesting
//! transitions. Commands are checked against the safety rules, encoded into
//! frame 0x191 and sent by the [`CommandTransmitter`](charging::CommandTransmitter)
//! every 100 ms while charging.
//!
//! The pendant's 4 holding registers are polled every 200 ms and decoded into
//! a [`RemoteControlState`](remote::RemoteControlState); joystick movement is
//! zeroed whenever the pendant is not safe to operate.
//!
//! The charger bus needs SocketCAN, so [`can::CanSocketBus`] is only built on
//! Linux with the `can` feature. The pendant serial port should be configured like so:
//! * Default baud rate: 115200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

pub mod bits;
pub mod can;
pub mod charging;
pub mod config;
pub mod error;
pub mod modbus;
pub mod remote;

#[cfg(test)]
mod mock_serial;
