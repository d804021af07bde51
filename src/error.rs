//! Error types for the charger and pendant links.

use thiserror::Error;

pub type ModbusResult<T, I> = core::result::Result<T, ModbusError<I>>;

/// Errors raised by the Modbus-RTU master.
#[derive(Error, Debug)]
pub enum ModbusError<I: embedded_io::Error> {
    #[error("Serial communication error")]
    SerialError(I),
    #[error("Modbus protocol error: {0}")]
    ModbusError(rmodbus::ErrorKind),
    #[error("Communication timeout")]
    Timeout,
    #[error("Response does not fit the receive buffer")]
    BufferError,
    #[error("Invalid response received")]
    InvalidResponse,
    #[error("Slave returned exception code {0:#04x}")]
    Exception(u8),
    #[error("Serial port is not connected")]
    NotConnected,
}

impl<I: embedded_io::Error> From<rmodbus::ErrorKind> for ModbusError<I> {
    fn from(err: rmodbus::ErrorKind) -> Self {
        ModbusError::ModbusError(err)
    }
}

/// Errors raised by the CAN transport.
#[derive(Error, Debug)]
pub enum CanError {
    #[error("CAN socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CAN identifier {0:#x} is out of range")]
    InvalidId(u32),
    #[error("CAN payload of {0} bytes exceeds 8")]
    PayloadTooLong(usize),
    #[error("CAN interface is disconnected")]
    Disconnected,
}

/// Raised when a raw register block cannot be decoded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Expected {expected} bytes, got {actual}")]
    ShortBuffer { expected: usize, actual: usize },
    #[error("Expected {expected} registers, got {actual}")]
    RegisterCount { expected: usize, actual: usize },
}

/// A command request that is malformed regardless of charger state.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ValidationError {
    #[error("Voltage must be between {min}V and {max}V, got {value}V")]
    VoltageOutOfRange { value: f64, min: f64, max: f64 },
    #[error("Current must be between {min}A and {max}A, got {value}A")]
    CurrentOutOfRange { value: f64, min: f64, max: f64 },
    #[error("Power stage 1 must be enabled when requesting power")]
    PowerStageRequired,
}

/// Why a charging command was refused.
///
/// Validation and safety failures are kept apart so callers can tell bad
/// input from a charger that is unsafe to drive right now.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Invalid command: {0}")]
    Validation(#[from] ValidationError),
    #[error("Refused for safety: {0}")]
    Safety(&'static str),
    #[error("Command could not be transmitted: {0}")]
    Transport(#[from] CanError),
}

/// Raised by [`BridgeConfigBuilder::build`](crate::config::BridgeConfigBuilder::build).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("CAN interface name is empty")]
    EmptyInterface,
    #[error("Modbus slave id {0} is outside 1..=247")]
    InvalidSlaveId(u8),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Raised by one pendant poll.
#[derive(Error, Debug)]
pub enum PollError<I: embedded_io::Error> {
    #[error("Pendant read failed: {0}")]
    Modbus(ModbusError<I>),
    #[error("Pendant registers could not be decoded: {0}")]
    Decode(DecodeError),
}

impl<I: embedded_io::Error> From<ModbusError<I>> for PollError<I> {
    fn from(err: ModbusError<I>) -> Self {
        PollError::Modbus(err)
    }
}

impl<I: embedded_io::Error> From<DecodeError> for PollError<I> {
    fn from(err: DecodeError) -> Self {
        PollError::Decode(err)
    }
}
