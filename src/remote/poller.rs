//! Fixed-interval polling of the pendant over Modbus-RTU.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, trace, warn};

use crate::error::PollError;
use crate::modbus::{ModbusRtuMaster, PortError, PortOpener};
use crate::remote::registers::{self, REGISTER_COUNT};
use crate::remote::state::{RemoteControlState, RemoteControlUpdate};

/// Cheap handle to the most recently decoded pendant state.
#[derive(Clone, Default)]
pub struct LatestState(Arc<Mutex<Option<RemoteControlState>>>);

impl LatestState {
    pub fn get(&self) -> Option<RemoteControlState> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: RemoteControlState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }
}

/// Reads the pendant's register block, decodes it and reports changes.
pub struct RemoteControlPoller<O: PortOpener, const L: usize = 128> {
    master: ModbusRtuMaster<O, L>,
    register_start: u16,
    interval: Duration,
    latest: LatestState,
    last_published: Option<RemoteControlState>,
}

impl<O: PortOpener, const L: usize> RemoteControlPoller<O, L> {
    pub fn new(master: ModbusRtuMaster<O, L>, register_start: u16, interval: Duration) -> Self {
        Self {
            master,
            register_start,
            interval,
            latest: LatestState::default(),
            last_published: None,
        }
    }

    /// Handle for readers on other threads.
    pub fn latest(&self) -> LatestState {
        self.latest.clone()
    }

    pub fn master_mut(&mut self) -> &mut ModbusRtuMaster<O, L> {
        &mut self.master
    }

    /// Read and decode one block.
    ///
    /// Returns an update only when the state differs from the last one
    /// reported. A failed read leaves the stored state untouched.
    pub fn poll_once(&mut self) -> Result<Option<RemoteControlUpdate>, PollError<PortError<O>>> {
        let registers = self
            .master
            .read_holding_registers(self.register_start, REGISTER_COUNT as u16)?;
        let bytes = registers::registers_to_bytes(&registers)?;
        let state = registers::decode(&bytes, Utc::now())?;
        trace!("Pendant block {:02X?} -> {}", bytes, state.action);

        self.latest.set(state);
        if self.last_published.as_ref() == Some(&state) {
            return Ok(None);
        }
        self.last_published = Some(state);
        Ok(Some(state.to_update()))
    }

    /// Poll every interval until `cancel` is set, passing each change to
    /// `on_update`.
    ///
    /// Errors are logged and the next poll retries; the master re-opens the
    /// port itself after a serial failure.
    pub fn run(&mut self, cancel: &AtomicBool, mut on_update: impl FnMut(RemoteControlUpdate)) {
        info!(
            "Polling pendant (slave {}) every {} ms",
            self.master.unit_id(),
            self.interval.as_millis()
        );
        let mut next_poll = Instant::now();
        while !cancel.load(Ordering::SeqCst) {
            match self.poll_once() {
                Ok(Some(update)) => {
                    debug!("Pendant update: {}", update.action);
                    on_update(update);
                }
                Ok(None) => {}
                Err(e) => warn!("Pendant poll failed: {}", e),
            }

            next_poll += self.interval;
            let now = Instant::now();
            if next_poll > now {
                thread::sleep(next_poll - now);
            } else {
                next_poll = now;
            }
        }
        info!("Pendant polling cancelled");
    }

    /// Write `values` starting at `address`. Returns whether the slave acknowledged.
    pub fn write_command(&mut self, address: u16, values: &[u16]) -> bool {
        match self.master.write_multiple_registers(address, values) {
            Ok(()) => true,
            Err(e) => {
                warn!("Pendant write to {:#06x} failed: {}", address, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, ModbusError};
    use crate::modbus::mock::MockOpener;
    use crate::mock_serial::MockSerial;

    // 01 03 08 <block> CRC
    const IDLE_REPLY: [u8; 13] = [
        0x01, 0x03, 0x08, 0x00, 0x80, 0x00, 0x32, 0x00, 0x00, 0x7F, 0x7F, 0x4C, 0x0B,
    ];
    const E_STOP_REPLY: [u8; 13] = [
        0x01, 0x03, 0x08, 0x01, 0x80, 0x00, 0x32, 0x00, 0x00, 0xFF, 0x7F, 0xEC, 0x07,
    ];

    fn poller(replies: &[&[u8]]) -> RemoteControlPoller<MockOpener> {
        let master = ModbusRtuMaster::new(MockOpener::with_responses(replies), 0x01);
        RemoteControlPoller::new(master, 0x0001, Duration::from_millis(1))
    }

    #[test]
    fn test_first_poll_publishes() {
        let mut poller = poller(&[&IDLE_REPLY]);
        let update = poller.poll_once().unwrap().unwrap();
        assert_eq!(update.action, "Idle");
        assert_eq!(update.speed, 0.5);
        assert!(update.remote_ready && update.enable);
        assert_eq!(poller.latest().get().unwrap().speed, 0.5);
    }

    #[test]
    fn test_unchanged_block_is_not_republished() {
        let mut poller = poller(&[&IDLE_REPLY, &IDLE_REPLY, &E_STOP_REPLY]);
        assert!(poller.poll_once().unwrap().is_some());
        poller.master_mut().force_reconnect();
        assert!(poller.poll_once().unwrap().is_none());

        poller.master_mut().force_reconnect();
        let update = poller.poll_once().unwrap().unwrap();
        assert_eq!(update.action, "E-STOP");
        assert_eq!((update.linear, update.angular), (0.0, 0.0));
    }

    #[test]
    fn test_failed_poll_keeps_latest() {
        let mut poller = poller(&[&IDLE_REPLY]);
        poller.poll_once().unwrap();
        poller.master_mut().force_reconnect();
        assert!(matches!(
            poller.poll_once(),
            Err(PollError::Modbus(ModbusError::NotConnected))
        ));
        assert!(poller.latest().get().is_some());
    }

    #[test]
    fn test_write_command() {
        let reply = [0x01, 0x10, 0x00, 0x10, 0x00, 0x02, 0x40, 0x0D];
        let mut poller = poller(&[&reply]);
        assert!(poller.write_command(0x0010, &[0x1234, 0x5678]));
        assert!(!poller.write_command(0x0010, &[0x1234, 0x5678]));
    }

    #[test]
    fn test_run_until_cancelled() {
        let mut failing = MockSerial::new();
        failing.set_read_error(true);
        let mut ready = MockSerial::new();
        ready.set_read_data(&IDLE_REPLY).unwrap();
        let opener = MockOpener {
            ports: [failing, ready].into_iter().collect(),
            opened: 0,
        };
        let master = ModbusRtuMaster::new(opener, 0x01);
        let mut poller: RemoteControlPoller<MockOpener> =
            RemoteControlPoller::new(master, 0x0001, Duration::from_millis(1));

        let cancel = AtomicBool::new(false);
        let mut updates = Vec::new();
        poller.run(&cancel, |update| {
            updates.push(update);
            cancel.store(true, Ordering::SeqCst);
        });
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].action, "Idle");
    }

    #[test]
    fn test_decode_error_is_reported() {
        let err: PollError<crate::mock_serial::MockSerialError> =
            DecodeError::RegisterCount { expected: 4, actual: 3 }.into();
        assert!(err.to_string().contains("decoded"));
    }
}
