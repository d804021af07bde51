//! The Modbus-RTU remote-control pendant.

pub mod poller;
pub mod registers;
pub mod rules;
pub mod state;

pub use poller::{LatestState, RemoteControlPoller};
pub use state::{Buttons, RemoteAction, RemoteControlState, RemoteControlUpdate, RemoteMode};
