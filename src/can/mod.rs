//! Raw CAN transport.
//!
//! [`CanFrame`] is the crate's own frame value; the SocketCAN-backed
//! [`CanSocketBus`] is only compiled on Linux with the `can` feature.

use core::fmt;
use std::sync::atomic::AtomicBool;

use crate::bits::BitBuffer;
use crate::error::CanError;

#[cfg(all(feature = "can", target_os = "linux"))]
mod socket;

#[cfg(all(feature = "can", target_os = "linux"))]
pub use socket::CanSocketBus;

/// Largest standard (11-bit) identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Largest extended (29-bit) identifier.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A classic CAN frame with up to 8 data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    length: u8,
    data: BitBuffer,
}

impl CanFrame {
    /// Build a frame from an identifier and up to 8 payload bytes.
    pub fn new(id: u32, payload: &[u8]) -> Result<Self, CanError> {
        if id > MAX_EXTENDED_ID {
            return Err(CanError::InvalidId(id));
        }
        if payload.len() > 8 {
            return Err(CanError::PayloadTooLong(payload.len()));
        }
        let mut data = [0u8; 8];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            length: payload.len() as u8,
            data,
        })
    }

    /// Build a full-length standard frame. The identifier is masked to 11 bits.
    pub fn standard(id: u16, data: BitBuffer) -> Self {
        Self {
            id: u32::from(id) & MAX_STANDARD_ID,
            length: 8,
            data,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn is_extended(&self) -> bool {
        self.id > MAX_STANDARD_ID
    }

    /// Payload bytes actually carried by the frame.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// Payload zero-padded to 8 bytes, as the bit codec expects.
    pub fn data(&self) -> &BitBuffer {
        &self.data
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03X} [{}] {:02X?}", self.id, self.length, self.payload())
    }
}

/// Anything that can put a frame on the bus.
///
/// Takes `&self` so one sender can be shared between a caller thread and
/// the periodic transmit thread.
pub trait CanSender: Send + Sync {
    fn send(&self, frame: &CanFrame) -> Result<(), CanError>;
}

impl<T: CanSender + ?Sized> CanSender for std::sync::Arc<T> {
    fn send(&self, frame: &CanFrame) -> Result<(), CanError> {
        (**self).send(frame)
    }
}

/// Blocking source of received frames.
pub trait CanReceiver: Send {
    /// Run until `cancel` is set or the bus fails, handing every frame to
    /// `on_frame` in arrival order.
    ///
    /// Returns `Ok(())` on cancellation and the transport error otherwise.
    fn run(
        &mut self,
        cancel: &AtomicBool,
        on_frame: &mut dyn FnMut(CanFrame),
    ) -> Result<(), CanError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Mutex;

    use super::*;

    /// Records every frame it is asked to send.
    #[derive(Default)]
    pub struct RecordingBus {
        frames: Mutex<Vec<CanFrame>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingBus {
        pub fn frames(&self) -> Vec<CanFrame> {
            self.frames.lock().map(|f| f.clone()).unwrap_or_default()
        }

        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl CanSender for RecordingBus {
        fn send(&self, frame: &CanFrame) -> Result<(), CanError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(CanError::Disconnected);
            }
            self.frames.lock().map_err(|_| CanError::Disconnected)?.push(*frame);
            Ok(())
        }
    }

    /// Delivers a fixed list of frames, then reports the bus as gone.
    pub struct ScriptedReceiver {
        frames: std::vec::IntoIter<CanFrame>,
    }

    impl ScriptedReceiver {
        pub fn new(frames: Vec<CanFrame>) -> Self {
            Self {
                frames: frames.into_iter(),
            }
        }
    }

    impl CanReceiver for ScriptedReceiver {
        fn run(
            &mut self,
            cancel: &AtomicBool,
            on_frame: &mut dyn FnMut(CanFrame),
        ) -> Result<(), CanError> {
            while !cancel.load(std::sync::atomic::Ordering::SeqCst) {
                match self.frames.next() {
                    Some(frame) => on_frame(frame),
                    None => return Err(CanError::Disconnected),
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_validation() {
        assert!(matches!(
            CanFrame::new(0x2000_0000, &[0]),
            Err(CanError::InvalidId(0x2000_0000))
        ));
        assert!(matches!(
            CanFrame::new(0x191, &[0; 9]),
            Err(CanError::PayloadTooLong(9))
        ));

        let frame = CanFrame::new(0x18FF_50E5, &[1, 2, 3]).unwrap();
        assert!(frame.is_extended());
        assert_eq!(frame.payload(), &[1, 2, 3]);
        assert_eq!(frame.data(), &[1, 2, 3, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_standard_frames_are_masked() {
        let frame = CanFrame::standard(0xF91, [0xAA; 8]);
        assert_eq!(frame.id(), 0x791);
        assert_eq!(frame.len(), 8);
        assert!(!frame.is_extended());
    }

    #[test]
    fn test_display_format() {
        let frame = CanFrame::new(0x311, &[0x01, 0xAB]).unwrap();
        assert_eq!(frame.to_string(), "311 [2] [01, AB]");
    }
}
