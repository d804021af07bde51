//! Runtime settings for both links.

use fugit::MillisDurationU32;

use crate::error::ConfigError;

/// Default CAN interface.
pub const DEFAULT_CAN_INTERFACE: &str = "can0";
/// Pendant RS485 line speed.
pub const DEFAULT_BAUD_RATE: u32 = crate::modbus::serial::DEFAULT_BAUD_RATE;
pub const DEFAULT_SLAVE_ID: u8 = 0x01;
/// First pendant register.
pub const DEFAULT_REGISTER_START: u16 = 0x0001;
/// The pendant block is 4 registers (8 bytes).
pub const DEFAULT_REGISTER_COUNT: u16 = 4;
/// Off-frames sent when periodic transmission stops.
pub const DEFAULT_STOP_BURST: u8 = 5;

/// Use [`BridgeConfigBuilder`] to create a config.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub can_interface: String,
    /// Serial device of the pendant link, e.g. `/dev/ttyUSB0`.
    pub serial_port: Option<String>,
    pub baud_rate: u32,
    pub serial_timeout: MillisDurationU32,
    pub slave_id: u8,
    pub register_start: u16,
    pub register_count: u16,
    /// Pendant poll interval.
    pub poll_interval: MillisDurationU32,
    /// Period of the repeated command frame.
    pub command_period: MillisDurationU32,
    pub stop_burst: u8,
    /// Bounds how long the CAN receive loop takes to notice cancellation.
    pub can_read_timeout: MillisDurationU32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            can_interface: DEFAULT_CAN_INTERFACE.to_string(),
            serial_port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            serial_timeout: MillisDurationU32::millis(300),
            slave_id: DEFAULT_SLAVE_ID,
            register_start: DEFAULT_REGISTER_START,
            register_count: DEFAULT_REGISTER_COUNT,
            poll_interval: MillisDurationU32::millis(200),
            command_period: MillisDurationU32::millis(100),
            stop_burst: DEFAULT_STOP_BURST,
            can_read_timeout: MillisDurationU32::millis(500),
        }
    }
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }
}

/// Convert a fugit duration into the std type used by threads and sockets.
pub fn to_std(duration: MillisDurationU32) -> std::time::Duration {
    std::time::Duration::from_millis(u64::from(duration.to_millis()))
}

#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn with_can_interface(mut self, interface: impl Into<String>) -> Self {
        self.config.can_interface = interface.into();
        self
    }

    pub fn with_serial_port(mut self, path: impl Into<String>) -> Self {
        self.config.serial_port = Some(path.into());
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.baud_rate = baud_rate;
        self
    }

    pub fn with_serial_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.config.serial_timeout = timeout;
        self
    }

    pub fn with_slave_id(mut self, slave_id: u8) -> Self {
        self.config.slave_id = slave_id;
        self
    }

    /// Set the pendant register window.
    pub fn with_registers(mut self, start: u16, count: u16) -> Self {
        self.config.register_start = start;
        self.config.register_count = count;
        self
    }

    pub fn with_poll_interval(mut self, interval: MillisDurationU32) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn with_command_period(mut self, period: MillisDurationU32) -> Self {
        self.config.command_period = period;
        self
    }

    pub fn with_stop_burst(mut self, count: u8) -> Self {
        self.config.stop_burst = count;
        self
    }

    pub fn with_can_read_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.config.can_read_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<BridgeConfig, ConfigError> {
        let config = self.config;
        if config.can_interface.trim().is_empty() {
            return Err(ConfigError::EmptyInterface);
        }
        if !(1..=247).contains(&config.slave_id) {
            return Err(ConfigError::InvalidSlaveId(config.slave_id));
        }
        for (name, duration) in [
            ("serial timeout", config.serial_timeout),
            ("poll interval", config.poll_interval),
            ("command period", config.command_period),
            ("CAN read timeout", config.can_read_timeout),
        ] {
            if duration.ticks() == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        Ok(config)
    }
}
