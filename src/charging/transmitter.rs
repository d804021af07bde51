//! Periodic sender of the 0x191 command frame.
//!
//! The transmitter holds the one command value the charger should see. A
//! dedicated thread re-sends it every period while active. Publishing, the
//! periodic tick and the stop burst all send while holding the command lock,
//! so frames never interleave and none is sent once a stop has begun.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::can::{CanFrame, CanSender};
use crate::charging::codec::{COMMAND_ID, ChargeCommand};
use crate::error::CanError;

struct TxState {
    command: ChargeCommand,
    active: bool,
    shutdown: bool,
}

struct Shared<B> {
    bus: B,
    state: Mutex<TxState>,
    wake: Condvar,
    period: Duration,
    stop_burst: u8,
}

impl<B: CanSender> Shared<B> {
    fn lock(&self) -> MutexGuard<'_, TxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, command: &ChargeCommand) -> Result<(), CanError> {
        self.bus
            .send(&CanFrame::standard(COMMAND_ID, command.encode()))
    }

    fn run(&self) {
        let mut next_tick = Instant::now() + self.period;
        let mut state = self.lock();
        loop {
            if state.shutdown {
                break;
            }
            let now = Instant::now();
            if now < next_tick {
                state = self
                    .wake
                    .wait_timeout(state, next_tick - now)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0);
                continue;
            }
            next_tick += self.period;
            if next_tick < now {
                // Fell behind (e.g. blocked behind a stop burst); resync.
                next_tick = now + self.period;
            }
            if state.active {
                if let Err(e) = self.send(&state.command) {
                    warn!("Periodic command send failed: {}", e);
                }
            }
        }
        debug!("Command transmitter thread exiting");
    }
}

/// Owns outbound command traffic to the charger.
///
/// Share it behind an [`Arc`]; dropping the last handle stops the thread.
pub struct CommandTransmitter<B: CanSender + 'static> {
    shared: Arc<Shared<B>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<B: CanSender + 'static> CommandTransmitter<B> {
    /// Spawn the periodic thread. Transmission starts idle with the off command.
    pub fn spawn(bus: B, period: Duration, stop_burst: u8) -> Result<Self, CanError> {
        let shared = Arc::new(Shared {
            bus,
            state: Mutex::new(TxState {
                command: ChargeCommand::off(),
                active: false,
                shutdown: false,
            }),
            wake: Condvar::new(),
            period,
            stop_burst,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("charger-tx".to_string())
            .spawn(move || worker_shared.run())?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Replace the held command and send it once straight away.
    pub fn publish(&self, command: ChargeCommand) -> Result<(), CanError> {
        let mut state = self.shared.lock();
        state.command = command;
        debug!(
            "Publishing command {:.3}V {:.3}A ps1={} clear={}",
            command.voltage, command.current, command.power_stage1, command.clear_faults
        );
        self.shared.send(&state.command)
    }

    /// Begin re-sending the held command every period.
    pub fn start(&self) {
        let mut state = self.shared.lock();
        if !state.active {
            state.active = true;
            info!(
                "Periodic command transmission started ({} ms)",
                self.shared.period.as_millis()
            );
        }
    }

    /// Replace the held command with the off command, send it `stop_burst`
    /// times one period apart and leave the transmitter idle.
    ///
    /// Every burst frame is attempted; the last failure is returned.
    pub fn stop(&self) -> Result<(), CanError> {
        let mut state = self.shared.lock();
        state.active = false;
        state.command = ChargeCommand::off();

        let mut result = Ok(());
        for i in 0..self.shared.stop_burst {
            if i > 0 {
                thread::sleep(self.shared.period);
            }
            if let Err(e) = self.shared.send(&state.command) {
                warn!("Off command {} of {} failed: {}", i + 1, self.shared.stop_burst, e);
                result = Err(e);
            }
        }
        info!("Periodic command transmission stopped");
        result
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    pub fn command(&self) -> ChargeCommand {
        self.shared.lock().command
    }

    /// Stop the periodic thread. Any burst in progress completes first.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.active = false;
        }
        self.shared.wake.notify_all();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("Command transmitter thread panicked");
            }
        }
    }
}

impl<B: CanSender + 'static> Drop for CommandTransmitter<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::mock::RecordingBus;
    use crate::charging::codec::{self, ChargerFrame};

    const PERIOD: Duration = Duration::from_millis(20);

    fn is_off(frame: &CanFrame) -> bool {
        frame.id() == u32::from(COMMAND_ID) && frame.data() == &[0u8; 8]
    }

    fn shared_bus() -> Arc<RecordingBus> {
        Arc::new(RecordingBus::default())
    }

    #[test]
    fn test_publish_sends_immediately_when_idle() {
        let bus = shared_bus();
        let tx = CommandTransmitter::spawn(Arc::clone(&bus), PERIOD, 5).unwrap();

        tx.publish(ChargeCommand::new(400.0, 32.5, true, false)).unwrap();
        let frames = bus.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id(), 0x191);
        match codec::decode(frames[0].id(), frames[0].data()) {
            Some(ChargerFrame::CommandEcho {
                voltage,
                current,
                power_stage1,
            }) => {
                assert!((voltage - 400.0).abs() < 1e-3);
                assert!((current - 32.5).abs() < 1e-3);
                assert!(power_stage1);
            }
            other => panic!("unexpected decode {other:?}"),
        }

        // Idle: nothing periodic.
        thread::sleep(PERIOD * 4);
        assert_eq!(bus.frames().len(), 1);
        assert!(!tx.is_active());
    }

    #[test]
    fn test_periodic_sends_held_command() {
        let bus = shared_bus();
        let tx = CommandTransmitter::spawn(Arc::clone(&bus), PERIOD, 5).unwrap();
        let command = ChargeCommand::new(300.0, 10.0, true, false);
        tx.publish(command).unwrap();
        tx.start();
        thread::sleep(PERIOD * 6);

        let frames = bus.frames();
        assert!(frames.len() >= 3, "only {} frames", frames.len());
        let expected = command.encode();
        assert!(frames.iter().all(|f| f.data() == &expected));
        tx.shutdown();
    }

    #[test]
    fn test_stop_sends_exactly_five_off_frames() {
        let bus = shared_bus();
        let tx = CommandTransmitter::spawn(Arc::clone(&bus), PERIOD, 5).unwrap();
        tx.publish(ChargeCommand::new(400.0, 32.5, true, false)).unwrap();
        tx.start();
        thread::sleep(PERIOD * 5);

        tx.stop().unwrap();
        let after_stop = bus.frames().len();
        thread::sleep(PERIOD * 5);
        let frames = bus.frames();

        assert_eq!(frames.len(), after_stop, "frames sent after stop");
        assert_eq!(frames.iter().filter(|f| is_off(f)).count(), 5);
        assert!(frames[frames.len() - 5..].iter().all(is_off));
        assert!(!tx.is_active());
        assert_eq!(tx.command(), ChargeCommand::off());
    }

    #[test]
    fn test_concurrent_publish_never_splits_the_burst() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let bus = shared_bus();
        let tx = Arc::new(
            CommandTransmitter::spawn(Arc::clone(&bus), Duration::from_millis(2), 5).unwrap(),
        );
        let command = ChargeCommand::new(120.0, 4.5, true, false);
        tx.publish(command).unwrap();
        tx.start();

        let done = Arc::new(AtomicBool::new(false));
        let publisher = {
            let tx = Arc::clone(&tx);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    tx.publish(command).unwrap();
                    thread::yield_now();
                }
            })
        };

        thread::sleep(Duration::from_millis(10));
        tx.stop().unwrap();
        done.store(true, Ordering::SeqCst);
        publisher.join().unwrap();

        let frames = bus.frames();
        let expected = command.encode();
        assert!(frames.iter().all(|f| is_off(f) || f.data() == &expected));
        let first_off = frames.iter().position(is_off).unwrap();
        assert!(frames[first_off..first_off + 5].iter().all(is_off));
        assert_eq!(frames.iter().filter(|f| is_off(f)).count(), 5);
        tx.shutdown();
    }

    #[test]
    fn test_stop_reports_bus_failure() {
        let bus = shared_bus();
        let tx = CommandTransmitter::spawn(Arc::clone(&bus), Duration::from_millis(1), 3).unwrap();
        bus.set_fail(true);
        assert!(matches!(tx.stop(), Err(CanError::Disconnected)));
        assert!(matches!(
            tx.publish(ChargeCommand::off()),
            Err(CanError::Disconnected)
        ));
    }

    #[test]
    fn test_shutdown_halts_periodic_sends() {
        let bus = shared_bus();
        let tx = CommandTransmitter::spawn(Arc::clone(&bus), PERIOD, 5).unwrap();
        tx.start();
        thread::sleep(PERIOD * 3);
        tx.shutdown();
        let count = bus.frames().len();
        thread::sleep(PERIOD * 3);
        assert_eq!(bus.frames().len(), count);
    }
}
