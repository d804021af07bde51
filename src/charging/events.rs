//! Domain events and the sinks that receive them.

use std::sync::Arc;
use std::sync::mpsc::Sender;

use chrono::{DateTime, Utc};
use strum_macros::IntoStaticStr;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::can::CanSender;
use crate::charging::transmitter::CommandTransmitter;

#[derive(Debug, Clone, Copy, PartialEq, IntoStaticStr)]
pub enum DomainEventKind {
    StateCreated,
    StatusChanged { is_charging: bool },
    FaultDetected { ocp: bool, ovp: bool, watchdog: bool },
    FaultCleared,
    /// Temperatures in °C.
    OvertemperatureWarning { secondary: f64, primary: f64 },
}

/// Something that happened to the charger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainEvent {
    pub charger_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub kind: DomainEventKind,
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        self.kind.into()
    }
}

/// Receives every event exactly once, in emission order.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn publish(&self, event: DomainEvent) {
        (**self).publish(event)
    }
}

/// Discards events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: DomainEvent) {}
}

/// Logs each event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: DomainEvent) {
        match event.kind {
            DomainEventKind::FaultDetected { .. } | DomainEventKind::OvertemperatureWarning { .. } => {
                warn!("Charger {}: {:?}", event.charger_id, event.kind)
            }
            _ => info!("Charger {}: {:?}", event.charger_id, event.kind),
        }
    }
}

/// Hands events to a channel. A closed receiver drops them.
impl EventSink for Sender<DomainEvent> {
    fn publish(&self, event: DomainEvent) {
        if self.send(event).is_err() {
            warn!("Event receiver dropped, discarding {}", event.name());
        }
    }
}

/// Halts periodic transmission when the charger reports a fault, then
/// forwards every event to `inner`.
pub struct StopOnFault<B: CanSender + 'static, S> {
    transmitter: Arc<CommandTransmitter<B>>,
    inner: S,
}

impl<B: CanSender + 'static, S: EventSink> StopOnFault<B, S> {
    pub fn new(transmitter: Arc<CommandTransmitter<B>>, inner: S) -> Self {
        Self { transmitter, inner }
    }
}

impl<B: CanSender + 'static, S: EventSink> EventSink for StopOnFault<B, S> {
    fn publish(&self, event: DomainEvent) {
        if let DomainEventKind::FaultDetected { ocp, ovp, watchdog } = event.kind {
            warn!(
                "Fault detected (ocp={} ovp={} watchdog={}), stopping transmission",
                ocp, ovp, watchdog
            );
            if let Err(e) = self.transmitter.stop() {
                error!("Failed to send off commands after fault: {}", e);
            }
        }
        self.inner.publish(event);
    }
}
