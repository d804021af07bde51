use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use socketcan::{
    CanFrame as RawFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Id, Socket, StandardId,
};
use tracing::{debug, error, info, trace, warn};

use super::{CanFrame, CanReceiver, CanSender, MAX_STANDARD_ID};
use crate::error::CanError;

/// A raw SocketCAN socket bound to one interface.
///
/// Each role opens its own socket: the receive loop owns one, the command
/// transmitter owns another.
pub struct CanSocketBus {
    interface: String,
    socket: CanSocket,
}

impl CanSocketBus {
    /// Bind a raw socket to `interface` (e.g. `can0`, `vcan0`).
    ///
    /// `read_timeout` bounds how long [`CanReceiver::run`] blocks before
    /// re-checking its cancellation flag.
    pub fn open(interface: &str, read_timeout: Duration) -> Result<Self, CanError> {
        let socket = CanSocket::open(interface).map_err(|e| {
            error!("Failed to open CAN socket on {}: {}", interface, e);
            CanError::Io(e)
        })?;
        socket.set_read_timeout(read_timeout)?;
        info!("CAN socket opened on {}", interface);
        Ok(Self {
            interface: interface.to_string(),
            socket,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn to_raw(frame: &CanFrame) -> Result<RawFrame, CanError> {
        let id: Id = if frame.id() <= MAX_STANDARD_ID {
            StandardId::new(frame.id() as u16)
                .ok_or(CanError::InvalidId(frame.id()))?
                .into()
        } else {
            ExtendedId::new(frame.id())
                .ok_or(CanError::InvalidId(frame.id()))?
                .into()
        };
        RawFrame::new(id, frame.payload()).ok_or(CanError::PayloadTooLong(frame.len()))
    }
}

impl CanSender for CanSocketBus {
    fn send(&self, frame: &CanFrame) -> Result<(), CanError> {
        let raw = Self::to_raw(frame)?;
        trace!("CAN TX {} on {}", frame, self.interface);
        self.socket.write_frame(&raw)?;
        Ok(())
    }
}

impl CanReceiver for CanSocketBus {
    fn run(
        &mut self,
        cancel: &AtomicBool,
        on_frame: &mut dyn FnMut(CanFrame),
    ) -> Result<(), CanError> {
        info!("CAN receive loop started on {}", self.interface);

        while !cancel.load(Ordering::SeqCst) {
            match self.socket.read_frame() {
                Ok(RawFrame::Error(err)) => {
                    warn!("CAN error frame on {}: {:?}", self.interface, err);
                }
                Ok(RawFrame::Remote(_)) => {
                    trace!("Ignoring remote frame on {}", self.interface);
                }
                Ok(raw) => match CanFrame::new(raw.raw_id(), raw.data()) {
                    Ok(frame) => {
                        trace!("CAN RX {}", frame);
                        on_frame(frame);
                    }
                    Err(e) => debug!("Dropping malformed CAN frame: {}", e),
                },
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    // Read timeout, re-check cancellation.
                    continue;
                }
                Err(e) => {
                    error!("CAN read error on {}: {}", self.interface, e);
                    return Err(CanError::Io(e));
                }
            }
        }

        info!("CAN receive loop on {} cancelled", self.interface);
        Ok(())
    }
}
