//! Last known charger state.
//!
//! [`ChargingState`] is a plain value. Mutators record fields and return the
//! event their update triggered, and [`ChargingState::apply`] folds one
//! decoded frame into a new state plus the events it produced. Locking is
//! the owner's job (see [`ChargingService`](crate::charging::ChargingService)).

use chrono::{DateTime, Utc};
use strum_macros::{Display, EnumIter};
use uuid::Uuid;

use crate::charging::codec::ChargerFrame;
use crate::charging::events::{DomainEvent, DomainEventKind};
use crate::charging::rules;

/// Operating mode reported in the status frame (6 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter, Display)]
pub enum ChargerMode {
    /// 0x00: not yet initialised.
    #[default]
    Uninit,
    /// 0x01: ready, output off.
    Standby,
    /// 0x04: delivering power.
    Charging,
    /// 0x10: latched fault.
    Fault,
    /// Any other code.
    Unknown(u8),
}

impl From<u8> for ChargerMode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => ChargerMode::Uninit,
            0x01 => ChargerMode::Standby,
            0x04 => ChargerMode::Charging,
            0x10 => ChargerMode::Fault,
            other => ChargerMode::Unknown(other),
        }
    }
}

impl From<ChargerMode> for u8 {
    fn from(mode: ChargerMode) -> u8 {
        match mode {
            ChargerMode::Uninit => 0x00,
            ChargerMode::Standby => 0x01,
            ChargerMode::Charging => 0x04,
            ChargerMode::Fault => 0x10,
            ChargerMode::Unknown(code) => code,
        }
    }
}

/// CAN bus speed configured on the charger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumIter, Display)]
pub enum CanBaudRate {
    #[strum(to_string = "125 kbit/s")]
    K125,
    #[strum(to_string = "250 kbit/s")]
    K250,
    #[default]
    #[strum(to_string = "500 kbit/s")]
    K500,
    #[strum(to_string = "1000 kbit/s")]
    K1000,
    #[strum(to_string = "800 kbit/s")]
    K800,
    Unknown(u8),
}

impl CanBaudRate {
    pub fn kbps(&self) -> Option<u32> {
        match self {
            CanBaudRate::K125 => Some(125),
            CanBaudRate::K250 => Some(250),
            CanBaudRate::K500 => Some(500),
            CanBaudRate::K1000 => Some(1000),
            CanBaudRate::K800 => Some(800),
            CanBaudRate::Unknown(_) => None,
        }
    }
}

impl From<u8> for CanBaudRate {
    fn from(value: u8) -> Self {
        match value {
            0 => CanBaudRate::K125,
            1 => CanBaudRate::K250,
            2 => CanBaudRate::K500,
            3 => CanBaudRate::K1000,
            4 => CanBaudRate::K800,
            other => CanBaudRate::Unknown(other),
        }
    }
}

impl From<CanBaudRate> for u8 {
    fn from(rate: CanBaudRate) -> u8 {
        match rate {
            CanBaudRate::K125 => 0,
            CanBaudRate::K250 => 1,
            CanBaudRate::K500 => 2,
            CanBaudRate::K1000 => 3,
            CanBaudRate::K800 => 4,
            CanBaudRate::Unknown(code) => code,
        }
    }
}

/// The setpoint last sent to (or echoed by) the charger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandEcho {
    pub voltage: f64,
    pub current: f64,
    pub power_stage1: bool,
    pub at: DateTime<Utc>,
}

/// Last known measurements and configuration of the charger.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargingState {
    id: Uuid,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,

    // DC output
    pub voltage: f64,
    pub current: f64,
    pub is_charging: bool,

    // Status
    pub mode: ChargerMode,
    pub has_fault: bool,
    pub ocp_fault: bool,
    pub ovp_fault: bool,
    pub watchdog_fault: bool,

    // AC input
    pub ac_voltage: f64,
    pub ac_current: f64,
    pub ac_frequency: f64,

    // Wireless link
    pub wireless_efficiency: f64,
    pub air_gap_mm: f64,
    pub under_current: bool,
    pub link_ok: bool,

    /// °C
    pub temperature_secondary: f64,
    /// °C
    pub temperature_primary: f64,

    // Life counters
    pub ah_delivered: f64,
    pub charge_cycles: u32,
    pub uptime_secs: u64,
    pub load_time_secs: u64,
    pub idle_time_secs: u64,

    // Configuration
    pub serial_number: u32,
    pub firmware_version: String,
    pub hardware_version: String,
    pub delta_part_number: String,
    pub mcu_id: u8,

    // Communication
    pub channel_id: u8,
    pub comm_id: u8,
    /// Fraction in `0.0..=1.0`.
    pub comm_success_rate: f64,
    pub baud_rate: CanBaudRate,

    pub last_command: Option<CommandEcho>,
}

impl ChargingState {
    /// Create a fresh state together with its `StateCreated` event.
    pub fn new(now: DateTime<Utc>) -> (Self, DomainEvent) {
        let state = Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_updated: now,
            voltage: 0.0,
            current: 0.0,
            is_charging: false,
            mode: ChargerMode::Uninit,
            has_fault: false,
            ocp_fault: false,
            ovp_fault: false,
            watchdog_fault: false,
            ac_voltage: 0.0,
            ac_current: 0.0,
            ac_frequency: 0.0,
            wireless_efficiency: 0.0,
            air_gap_mm: 0.0,
            under_current: false,
            link_ok: false,
            temperature_secondary: 0.0,
            temperature_primary: 0.0,
            ah_delivered: 0.0,
            charge_cycles: 0,
            uptime_secs: 0,
            load_time_secs: 0,
            idle_time_secs: 0,
            serial_number: 0,
            firmware_version: String::new(),
            hardware_version: String::new(),
            delta_part_number: String::new(),
            mcu_id: 0,
            channel_id: 0,
            comm_id: 0,
            comm_success_rate: 0.0,
            baud_rate: CanBaudRate::default(),
            last_command: None,
        };
        let event = state.event(DomainEventKind::StateCreated, now);
        (state, event)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Output power in watts.
    pub fn power_w(&self) -> f64 {
        self.voltage * self.current
    }

    fn event(&self, kind: DomainEventKind, now: DateTime<Utc>) -> DomainEvent {
        DomainEvent {
            charger_id: self.id,
            occurred_at: now,
            kind,
        }
    }

    /// Never moves the clock backwards.
    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_updated {
            self.last_updated = now;
        }
    }

    /// Emits `StatusChanged` when the charging flag flips.
    pub fn update_power(
        &mut self,
        voltage: f64,
        current: f64,
        is_charging: bool,
        now: DateTime<Utc>,
    ) -> Option<DomainEvent> {
        let was_charging = self.is_charging;
        self.voltage = voltage;
        self.current = current;
        self.is_charging = is_charging;
        self.touch(now);

        (was_charging != is_charging)
            .then(|| self.event(DomainEventKind::StatusChanged { is_charging }, now))
    }

    /// Emits `FaultDetected` or `FaultCleared` on a fault edge.
    pub fn update_status(
        &mut self,
        mode: ChargerMode,
        fault: bool,
        ocp: bool,
        ovp: bool,
        watchdog: bool,
        now: DateTime<Utc>,
    ) -> Option<DomainEvent> {
        let had_fault = self.has_fault;
        self.mode = mode;
        self.has_fault = fault;
        self.ocp_fault = ocp;
        self.ovp_fault = ovp;
        self.watchdog_fault = watchdog;
        self.touch(now);

        match (had_fault, fault) {
            (false, true) => Some(self.event(
                DomainEventKind::FaultDetected { ocp, ovp, watchdog },
                now,
            )),
            (true, false) => Some(self.event(DomainEventKind::FaultCleared, now)),
            _ => None,
        }
    }

    /// Emits `OvertemperatureWarning` on every update while either sensor is
    /// above the warning threshold.
    pub fn update_temperature(
        &mut self,
        secondary: f64,
        primary: f64,
        now: DateTime<Utc>,
    ) -> Option<DomainEvent> {
        self.temperature_secondary = secondary;
        self.temperature_primary = primary;
        self.touch(now);

        rules::is_overtemperature(self).then(|| {
            self.event(
                DomainEventKind::OvertemperatureWarning { secondary, primary },
                now,
            )
        })
    }

    pub fn update_ac_input(&mut self, voltage: f64, current: f64, frequency: f64, now: DateTime<Utc>) {
        self.ac_voltage = voltage;
        self.ac_current = current;
        self.ac_frequency = frequency;
        self.touch(now);
    }

    pub fn update_wireless(
        &mut self,
        efficiency: f64,
        air_gap_mm: f64,
        under_current: bool,
        link_ok: bool,
        now: DateTime<Utc>,
    ) {
        self.wireless_efficiency = efficiency;
        self.air_gap_mm = air_gap_mm;
        self.under_current = under_current;
        self.link_ok = link_ok;
        self.touch(now);
    }

    pub fn update_life_stats(
        &mut self,
        ah_delivered: f64,
        cycles: u32,
        uptime_secs: u64,
        load_time_secs: u64,
        idle_time_secs: u64,
        now: DateTime<Utc>,
    ) {
        self.ah_delivered = ah_delivered;
        self.charge_cycles = cycles;
        self.uptime_secs = uptime_secs;
        self.load_time_secs = load_time_secs;
        self.idle_time_secs = idle_time_secs;
        self.touch(now);
    }

    pub fn update_configuration(
        &mut self,
        serial_number: u32,
        firmware_version: String,
        hardware_version: String,
        delta_part_number: String,
        mcu_id: u8,
        now: DateTime<Utc>,
    ) {
        self.serial_number = serial_number;
        self.firmware_version = firmware_version;
        self.hardware_version = hardware_version;
        self.delta_part_number = delta_part_number;
        self.mcu_id = mcu_id;
        self.touch(now);
    }

    pub fn update_communication(
        &mut self,
        channel_id: u8,
        comm_id: u8,
        success_rate: f64,
        baud_rate: CanBaudRate,
        now: DateTime<Utc>,
    ) {
        self.channel_id = channel_id;
        self.comm_id = comm_id;
        self.comm_success_rate = success_rate;
        self.baud_rate = baud_rate;
        self.touch(now);
    }

    /// Record the setpoint last commanded.
    pub fn record_command(
        &mut self,
        voltage: f64,
        current: f64,
        power_stage1: bool,
        now: DateTime<Utc>,
    ) {
        self.last_command = Some(CommandEcho {
            voltage,
            current,
            power_stage1,
            at: now,
        });
        self.touch(now);
    }

    /// Apply one decoded frame through exactly one mutator.
    ///
    /// Frames that carry only part of a group (the wireless and comm frames)
    /// keep the other fields of that group as they were.
    pub fn apply_frame(&mut self, frame: &ChargerFrame, now: DateTime<Utc>) -> Option<DomainEvent> {
        match *frame {
            ChargerFrame::CommandEcho {
                voltage,
                current,
                power_stage1,
            } => {
                self.record_command(voltage, current, power_stage1, now);
                None
            }
            ChargerFrame::Power {
                voltage,
                current,
                is_charging,
            } => self.update_power(voltage, current, is_charging, now),
            ChargerFrame::Status {
                mode,
                fault,
                ocp,
                ovp,
                watchdog,
            } => self.update_status(mode, fault, ocp, ovp, watchdog, now),
            ChargerFrame::AcInput {
                voltage,
                current,
                frequency,
            } => {
                self.update_ac_input(voltage, current, frequency, now);
                None
            }
            ChargerFrame::WirelessEfficiency { efficiency, gap_mm } => {
                let (under_current, link_ok) = (self.under_current, self.link_ok);
                self.update_wireless(efficiency, gap_mm, under_current, link_ok, now);
                None
            }
            ChargerFrame::WirelessFlags {
                under_current,
                link_ok,
            } => {
                let (efficiency, gap) = (self.wireless_efficiency, self.air_gap_mm);
                self.update_wireless(efficiency, gap, under_current, link_ok, now);
                None
            }
            ChargerFrame::Temperature { secondary, primary } => {
                self.update_temperature(secondary, primary, now)
            }
            ChargerFrame::LifeStats {
                ah_delivered,
                cycles,
            } => {
                let (uptime, load, idle) =
                    (self.uptime_secs, self.load_time_secs, self.idle_time_secs);
                self.update_life_stats(ah_delivered, cycles, uptime, load, idle, now);
                None
            }
            ChargerFrame::Configuration {
                serial_number,
                fw_major,
                fw_minor,
                fw_debug,
                mcu_id,
            } => {
                // The frame has no hardware revision fields.
                let part_number = self.delta_part_number.clone();
                self.update_configuration(
                    serial_number,
                    format!("{fw_major}.{fw_minor}.{fw_debug}"),
                    "0.0".to_string(),
                    part_number,
                    mcu_id,
                    now,
                );
                None
            }
            ChargerFrame::CommInfo {
                channel,
                comm_id,
                success_rate,
            } => {
                let baud = self.baud_rate;
                self.update_communication(channel, comm_id, success_rate, baud, now);
                None
            }
            ChargerFrame::BaudRate(baud) => {
                let (channel, comm_id, rate) =
                    (self.channel_id, self.comm_id, self.comm_success_rate);
                self.update_communication(channel, comm_id, rate, baud, now);
                None
            }
        }
    }

    /// Fold `frame` into the state, returning the new state and its events.
    pub fn apply(mut self, frame: &ChargerFrame, now: DateTime<Utc>) -> (Self, Vec<DomainEvent>) {
        let events = self.apply_frame(frame, now).into_iter().collect();
        (self, events)
    }

    pub fn stats(&self) -> ChargingStats {
        ChargingStats {
            ah_delivered: self.ah_delivered,
            charge_cycles: self.charge_cycles,
            uptime_hours: secs_to_hours(self.uptime_secs),
            load_time_hours: secs_to_hours(self.load_time_secs),
            idle_time_hours: secs_to_hours(self.idle_time_secs),
            serial_number: self.serial_number,
            firmware_version: self.firmware_version.clone(),
            hardware_version: self.hardware_version.clone(),
            comm_success_rate: self.comm_success_rate,
            baud_rate: self.baud_rate.to_string(),
        }
    }
}

fn secs_to_hours(secs: u64) -> f64 {
    secs as f64 / 3600.0
}

/// Lifetime and configuration summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargingStats {
    pub ah_delivered: f64,
    pub charge_cycles: u32,
    pub uptime_hours: f64,
    pub load_time_hours: f64,
    pub idle_time_hours: f64,
    pub serial_number: u32,
    pub firmware_version: String,
    pub hardware_version: String,
    pub comm_success_rate: f64,
    pub baud_rate: String,
}
