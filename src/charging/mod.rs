//! The CAN charger: frame codec, state, safety rules and command path.

pub mod codec;
pub mod events;
pub mod rules;
pub mod service;
pub mod state;
pub mod transmitter;

pub use codec::{ChargeCommand, ChargerFrame};
pub use events::{DomainEvent, DomainEventKind, EventSink, LogSink, NoopSink, StopOnFault};
pub use service::ChargingService;
pub use state::{CanBaudRate, ChargerMode, ChargingState, ChargingStats};
pub use transmitter::CommandTransmitter;
