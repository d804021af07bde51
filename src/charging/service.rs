//! Coordinates charger frames, commands and events.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use tracing::{debug, info, trace, warn};

use crate::can::{CanFrame, CanReceiver, CanSender};
use crate::charging::codec::{self, ChargeCommand};
use crate::charging::events::{DomainEvent, EventSink};
use crate::charging::rules;
use crate::charging::state::{ChargingState, ChargingStats};
use crate::charging::transmitter::CommandTransmitter;
use crate::error::{CanError, CommandError};

/// Reason given when a start is refused by [`rules::can_start_charging`].
pub const START_REFUSED: &str = "Cannot start charging: safety rules violated";

/// Owner of the single [`ChargingState`].
///
/// Received frames and issued commands both run their read-modify-write
/// under one lock. Events are handed to the sink after the lock is released,
/// in the order they were produced.
///
/// Commands are also issued one at a time: start, stop and clear faults each
/// hold a second lock from their first check until the echo is recorded.
/// It is taken before the state lock, never after.
pub struct ChargingService<B: CanSender + 'static, S: EventSink> {
    issuing: Mutex<()>,
    state: Mutex<Option<ChargingState>>,
    transmitter: Arc<CommandTransmitter<B>>,
    sink: S,
}

impl<B: CanSender + 'static, S: EventSink> ChargingService<B, S> {
    pub fn new(transmitter: Arc<CommandTransmitter<B>>, sink: S) -> Self {
        Self {
            issuing: Mutex::new(()),
            state: Mutex::new(None),
            transmitter,
            sink,
        }
    }

    pub fn transmitter(&self) -> &Arc<CommandTransmitter<B>> {
        &self.transmitter
    }

    fn lock(&self) -> MutexGuard<'_, Option<ChargingState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue_lock(&self) -> MutexGuard<'_, ()> {
        self.issuing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current state, if any frame or command has been seen.
    pub fn snapshot(&self) -> Option<ChargingState> {
        self.lock().clone()
    }

    pub fn stats(&self) -> Option<ChargingStats> {
        self.lock().as_ref().map(ChargingState::stats)
    }

    fn dispatch(&self, events: &[DomainEvent]) {
        for event in events {
            self.sink.publish(*event);
        }
    }

    /// Decode one received frame and fold it into the state.
    ///
    /// Unknown identifiers are ignored. A frame too short for its layout is
    /// logged and dropped without touching the state. Returns the events
    /// produced, which have already been handed to the sink.
    pub fn process_frame(&self, frame: &CanFrame) -> Vec<DomainEvent> {
        let decoded = match codec::decode_payload(frame.id(), frame.payload()) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => {
                trace!("Ignoring CAN frame {:03X}", frame.id());
                return Vec::new();
            }
            Err(e) => {
                warn!("Dropping CAN frame {}: {}", frame, e);
                return Vec::new();
            }
        };

        let now = Utc::now();
        let (events, must_stop) = {
            let mut guard = self.lock();
            let mut events = Vec::new();
            let state = guard.get_or_insert_with(|| {
                let (state, created) = ChargingState::new(now);
                events.push(created);
                state
            });
            events.extend(state.apply_frame(&decoded, now));
            (events, rules::must_stop_charging(state))
        };

        self.dispatch(&events);

        if must_stop && self.transmitter.is_active() {
            warn!("Charger reports an unsafe condition, stopping transmission");
            if let Err(e) = self.transmitter.stop() {
                warn!("Failed to stop transmission: {}", e);
            }
        }
        events
    }

    /// Validate, check safety, then publish `voltage`/`current` and start
    /// periodic transmission.
    pub fn start_charging(&self, voltage: f64, current: f64) -> Result<(), CommandError> {
        rules::validate_command(voltage, current, true)?;

        let _issuing = self.issue_lock();
        let now = Utc::now();
        let mut events = Vec::new();
        let result = {
            let mut guard = self.lock();
            let state = guard.get_or_insert_with(|| {
                let (state, created) = ChargingState::new(now);
                events.push(created);
                state
            });

            if !rules::can_start_charging(state) {
                Err(CommandError::Safety(START_REFUSED))
            } else {
                let command = ChargeCommand::new(voltage, current, true, false);
                self.transmitter
                    .publish(command)
                    .map_err(CommandError::from)
                    .map(|()| {
                        self.transmitter.start();
                        state.record_command(voltage, current, true, now);
                    })
            }
        };
        self.dispatch(&events);

        match &result {
            Ok(()) => info!("Charging started at {:.3}V {:.3}A", voltage, current),
            Err(e) => warn!("Start charging refused: {}", e),
        }
        result
    }

    /// Ramp the charger down. A no-op when nothing has been seen yet.
    ///
    /// The whole burst and the zero echo run as one command, so a start
    /// issued meanwhile waits and lands after it.
    pub fn stop_charging(&self) -> Result<(), CommandError> {
        let _issuing = self.issue_lock();
        if self.lock().is_none() {
            debug!("Stop requested with no charger state, nothing to do");
            return Ok(());
        }

        // The burst takes several periods; frames keep flowing meanwhile.
        self.transmitter.stop()?;

        if let Some(state) = self.lock().as_mut() {
            state.record_command(0.0, 0.0, false, Utc::now());
        }
        info!("Charging stopped");
        Ok(())
    }

    /// Send one clear-faults command with the power stage off.
    pub fn clear_faults(&self) -> Result<(), CommandError> {
        rules::validate_command(0.0, 0.0, false)?;

        let _issuing = self.issue_lock();
        let now = Utc::now();
        let mut events = Vec::new();
        let result = {
            let mut guard = self.lock();
            let state = guard.get_or_insert_with(|| {
                let (state, created) = ChargingState::new(now);
                events.push(created);
                state
            });
            self.transmitter
                .publish(ChargeCommand::new(0.0, 0.0, false, true))
                .map(|()| state.record_command(0.0, 0.0, false, now))
                .map_err(CommandError::from)
        };
        self.dispatch(&events);

        if result.is_ok() {
            info!("Clear faults command sent");
        }
        result
    }
}

impl<B: CanSender + 'static, S: EventSink + 'static> ChargingService<B, S> {
    /// Run `receiver` on its own thread, feeding every frame to
    /// [`process_frame`](Self::process_frame) until `cancel` is set or the
    /// bus fails.
    pub fn spawn_receiver<R: CanReceiver + 'static>(
        self: &Arc<Self>,
        mut receiver: R,
        cancel: Arc<AtomicBool>,
    ) -> Result<JoinHandle<Result<(), CanError>>, CanError> {
        let service = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("charger-rx".to_string())
            .spawn(move || {
                let result = receiver.run(&cancel, &mut |frame| {
                    service.process_frame(&frame);
                });
                if let Err(e) = &result {
                    warn!("Charger receive loop ended: {}", e);
                }
                result
            })?;
        Ok(handle)
    }
}
