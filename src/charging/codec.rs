//! Charger CAN frame layouts.
//!
//! Every identifier the charger transmits is described by a [`FrameLayout`]
//! in [`FRAME_LAYOUTS`]: a list of bit fields (offset, width, scale) plus a
//! constructor turning the scaled field values into a [`ChargerFrame`].
//! The layouts are the wire contract with the charger firmware. Changing an
//! offset or scale breaks interoperability.

use crate::bits::{self, BitBuffer};
use crate::charging::state::{CanBaudRate, ChargerMode};
use crate::error::DecodeError;

/// Identifier of the command frame, sent by us and echoed by the charger.
pub const COMMAND_ID: u16 = 0x191;

/// Identifiers the charger sends whose layout is not decoded (life stats B/C).
pub const IGNORED_IDS: [u16; 2] = [0x521, 0x531];

const VOLTAGE_BITS: usize = 20;
const CURRENT_BITS: usize = 18;
const CURRENT_OFFSET: usize = 32;
const POWER_STAGE_BIT: usize = 20;
const CLEAR_FAULTS_BIT: usize = 21;
const MILLI: f64 = 1000.0;

/// One bit field of a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub start: usize,
    pub len: usize,
    /// Multiplier from raw integer to physical unit.
    pub scale: f64,
    /// Two's complement field.
    pub signed: bool,
}

impl Field {
    const fn unsigned(name: &'static str, start: usize, len: usize, scale: f64) -> Self {
        Self {
            name,
            start,
            len,
            scale,
            signed: false,
        }
    }

    const fn signed(name: &'static str, start: usize, len: usize, scale: f64) -> Self {
        Self {
            name,
            start,
            len,
            scale,
            signed: true,
        }
    }

    const fn flag(name: &'static str, bit: usize) -> Self {
        Self::unsigned(name, bit, 1, 1.0)
    }

    /// Extract this field from `data` in physical units.
    pub fn read(&self, data: &BitBuffer) -> f64 {
        if self.signed {
            bits::get_signed(data, self.start, self.len) as f64 * self.scale
        } else {
            bits::get(data, self.start, self.len) as f64 * self.scale
        }
    }
}

/// Scaled values of a frame's fields, in layout order.
pub type FieldValues = heapless::Vec<f64, 8>;

/// Decode rule for one identifier.
pub struct FrameLayout {
    pub id: u16,
    pub name: &'static str,
    pub fields: &'static [Field],
    build: fn(&[f64]) -> ChargerFrame,
}

impl FrameLayout {
    /// Bytes a payload must carry to hold every field.
    pub fn min_len(&self) -> usize {
        self.fields
            .iter()
            .map(|field| (field.start + field.len).div_ceil(8))
            .max()
            .unwrap_or(0)
    }

    /// Read every field of the layout.
    pub fn values(&self, data: &BitBuffer) -> FieldValues {
        self.fields.iter().map(|field| field.read(data)).collect()
    }

    pub fn decode(&self, data: &BitBuffer) -> ChargerFrame {
        (self.build)(&self.values(data))
    }
}

impl core::fmt::Debug for FrameLayout {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameLayout")
            .field("id", &format_args!("{:#05x}", self.id))
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// A decoded charger frame in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChargerFrame {
    /// 0x191, the charger's echo of the last command it accepted.
    CommandEcho {
        voltage: f64,
        current: f64,
        power_stage1: bool,
    },
    /// 0x311
    Power {
        voltage: f64,
        current: f64,
        is_charging: bool,
    },
    /// 0x321
    Status {
        mode: ChargerMode,
        fault: bool,
        ocp: bool,
        ovp: bool,
        watchdog: bool,
    },
    /// 0x3C1
    AcInput {
        voltage: f64,
        current: f64,
        frequency: f64,
    },
    /// 0x3E1
    WirelessEfficiency { efficiency: f64, gap_mm: f64 },
    /// 0x5F1
    WirelessFlags { under_current: bool, link_ok: bool },
    /// 0x3F1, both sensors in °C.
    Temperature { secondary: f64, primary: f64 },
    /// 0x511
    LifeStats { ah_delivered: f64, cycles: u32 },
    /// 0x721
    Configuration {
        serial_number: u32,
        fw_major: u8,
        fw_minor: u8,
        fw_debug: u8,
        mcu_id: u8,
    },
    /// 0x771
    CommInfo {
        channel: u8,
        comm_id: u8,
        success_rate: f64,
    },
    /// 0x781
    BaudRate(CanBaudRate),
}

fn flag(value: f64) -> bool {
    value != 0.0
}

fn build_command_echo(v: &[f64]) -> ChargerFrame {
    ChargerFrame::CommandEcho {
        voltage: v[0],
        power_stage1: flag(v[1]),
        current: v[2],
    }
}

fn build_power(v: &[f64]) -> ChargerFrame {
    ChargerFrame::Power {
        voltage: v[0],
        current: v[1],
        is_charging: flag(v[2]),
    }
}

fn build_status(v: &[f64]) -> ChargerFrame {
    ChargerFrame::Status {
        mode: ChargerMode::from(v[0] as u8),
        fault: flag(v[1]),
        ocp: flag(v[2]),
        // Both bits report over-voltage.
        ovp: flag(v[3]) || flag(v[4]),
        watchdog: flag(v[5]),
    }
}

fn build_ac_input(v: &[f64]) -> ChargerFrame {
    ChargerFrame::AcInput {
        voltage: v[0],
        current: v[1],
        frequency: v[2],
    }
}

fn build_wireless_efficiency(v: &[f64]) -> ChargerFrame {
    ChargerFrame::WirelessEfficiency {
        efficiency: v[0],
        gap_mm: v[1],
    }
}

fn build_wireless_flags(v: &[f64]) -> ChargerFrame {
    ChargerFrame::WirelessFlags {
        under_current: flag(v[0]),
        link_ok: flag(v[1]),
    }
}

fn build_temperature(v: &[f64]) -> ChargerFrame {
    ChargerFrame::Temperature {
        secondary: v[0],
        primary: v[1],
    }
}

fn build_life_stats(v: &[f64]) -> ChargerFrame {
    ChargerFrame::LifeStats {
        ah_delivered: v[0],
        cycles: v[1] as u32,
    }
}

fn build_configuration(v: &[f64]) -> ChargerFrame {
    ChargerFrame::Configuration {
        serial_number: v[0] as u32,
        fw_major: v[1] as u8,
        fw_minor: v[2] as u8,
        fw_debug: v[3] as u8,
        mcu_id: v[4] as u8,
    }
}

fn build_comm_info(v: &[f64]) -> ChargerFrame {
    ChargerFrame::CommInfo {
        channel: v[0] as u8,
        comm_id: v[1] as u8,
        success_rate: v[2],
    }
}

fn build_baud_rate(v: &[f64]) -> ChargerFrame {
    ChargerFrame::BaudRate(CanBaudRate::from(v[0] as u8))
}

/// Decode table, one entry per identifier.
pub static FRAME_LAYOUTS: &[FrameLayout] = &[
    FrameLayout {
        id: COMMAND_ID,
        name: "command echo",
        fields: &[
            Field::unsigned("voltage", 0, VOLTAGE_BITS, 0.001),
            Field::flag("power_stage1", POWER_STAGE_BIT),
            Field::unsigned("current", CURRENT_OFFSET, CURRENT_BITS, 0.001),
        ],
        build: build_command_echo,
    },
    FrameLayout {
        id: 0x311,
        name: "DC power",
        fields: &[
            Field::unsigned("voltage", 0, 20, 0.001),
            Field::unsigned("current", 20, 18, 0.001),
            Field::flag("is_charging", 39),
        ],
        build: build_power,
    },
    FrameLayout {
        id: 0x321,
        name: "status",
        fields: &[
            Field::unsigned("mode", 0, 6, 1.0),
            Field::flag("fault", 12),
            Field::flag("ocp", 18),
            Field::flag("ovp", 21),
            Field::flag("ovp_alt", 22),
            Field::flag("watchdog", 24),
        ],
        build: build_status,
    },
    FrameLayout {
        id: 0x3C1,
        name: "AC input",
        fields: &[
            Field::unsigned("voltage", 0, 20, 0.001),
            Field::unsigned("current", 20, 18, 0.001),
            Field::unsigned("frequency", 38, 10, 0.1),
        ],
        build: build_ac_input,
    },
    FrameLayout {
        id: 0x3E1,
        name: "wireless efficiency",
        fields: &[
            Field::unsigned("efficiency", 16, 10, 0.1),
            Field::unsigned("gap", 32, 8, 1.0),
        ],
        build: build_wireless_efficiency,
    },
    FrameLayout {
        id: 0x5F1,
        name: "wireless flags",
        fields: &[Field::flag("under_current", 6), Field::flag("link_ok", 7)],
        build: build_wireless_flags,
    },
    FrameLayout {
        id: 0x3F1,
        name: "temperature",
        fields: &[
            Field::signed("secondary", 0, 16, 0.005),
            Field::signed("primary", 16, 16, 0.005),
        ],
        build: build_temperature,
    },
    FrameLayout {
        id: 0x511,
        name: "life stats",
        fields: &[
            Field::unsigned("ah_delivered", 0, 32, 0.1),
            Field::unsigned("cycles", 32, 32, 1.0),
        ],
        build: build_life_stats,
    },
    FrameLayout {
        id: 0x721,
        name: "configuration",
        fields: &[
            Field::unsigned("serial_number", 0, 32, 1.0),
            Field::unsigned("fw_major", 32, 8, 1.0),
            Field::unsigned("fw_minor", 40, 8, 1.0),
            Field::unsigned("fw_debug", 48, 8, 1.0),
            Field::unsigned("mcu_id", 60, 4, 1.0),
        ],
        build: build_configuration,
    },
    FrameLayout {
        id: 0x771,
        name: "comm info",
        fields: &[
            Field::unsigned("channel", 0, 8, 1.0),
            Field::unsigned("comm_id", 8, 8, 1.0),
            Field::unsigned("success_rate", 16, 32, 0.000_001),
        ],
        build: build_comm_info,
    },
    FrameLayout {
        id: 0x781,
        name: "baud rate",
        fields: &[Field::unsigned("baud", 0, 4, 1.0)],
        build: build_baud_rate,
    },
];

/// Look up the decode rule for `id`.
pub fn layout(id: u32) -> Option<&'static FrameLayout> {
    FRAME_LAYOUTS.iter().find(|layout| u32::from(layout.id) == id)
}

/// Decode a received frame. Unknown and ignored identifiers yield `None`.
pub fn decode(id: u32, data: &BitBuffer) -> Option<ChargerFrame> {
    layout(id).map(|layout| layout.decode(data))
}

/// Decode a payload as received on the bus.
///
/// Unlike [`decode`] the payload keeps its real length: one too short for
/// the layout is rejected rather than read as zero-padded.
pub fn decode_payload(id: u32, payload: &[u8]) -> Result<Option<ChargerFrame>, DecodeError> {
    let Some(layout) = layout(id) else {
        return Ok(None);
    };
    let expected = layout.min_len();
    if payload.len() < expected {
        return Err(DecodeError::ShortBuffer {
            expected,
            actual: payload.len(),
        });
    }
    let mut data = [0u8; 8];
    let used = payload.len().min(data.len());
    data[..used].copy_from_slice(&payload[..used]);
    Ok(Some(layout.decode(&data)))
}

/// Setpoint sent to the charger in frame 0x191.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChargeCommand {
    pub voltage: f64,
    pub current: f64,
    pub power_stage1: bool,
    pub clear_faults: bool,
}

impl ChargeCommand {
    pub fn new(voltage: f64, current: f64, power_stage1: bool, clear_faults: bool) -> Self {
        Self {
            voltage,
            current,
            power_stage1,
            clear_faults,
        }
    }

    /// Zero output, power stage disabled.
    pub const fn off() -> Self {
        Self {
            voltage: 0.0,
            current: 0.0,
            power_stage1: false,
            clear_faults: false,
        }
    }

    /// Encode into the 0x191 payload.
    pub fn encode(&self) -> BitBuffer {
        encode_command(self)
    }
}

/// Scale to milli-units, truncate and clamp into a `width`-bit field.
fn to_milli_raw(value: f64, width: usize) -> u64 {
    let max = (1u64 << width) - 1;
    let raw = (value * MILLI).trunc();
    if raw.is_nan() || raw <= 0.0 {
        0
    } else if raw >= max as f64 {
        max
    } else {
        raw as u64
    }
}

/// Build the 0x191 payload. Bits not named here stay zero.
pub fn encode_command(command: &ChargeCommand) -> BitBuffer {
    let mut data = [0u8; 8];
    bits::set(
        &mut data,
        0,
        VOLTAGE_BITS,
        to_milli_raw(command.voltage, VOLTAGE_BITS),
    );
    bits::set(&mut data, POWER_STAGE_BIT, 1, u64::from(command.power_stage1));
    bits::set(&mut data, CLEAR_FAULTS_BIT, 1, u64::from(command.clear_faults));
    bits::set(
        &mut data,
        CURRENT_OFFSET,
        CURRENT_BITS,
        to_milli_raw(command.current, CURRENT_BITS),
    );
    data
}
