//! Modbus-RTU master for a single slave on a serial line.
//!
//! The master works over any interface implementing [`embedded_io::Read`] &
//! [`embedded_io::Write`]. Interfaces are produced by a [`PortOpener`] so a
//! failed line can be re-opened: any serial error drops the port and the
//! next request opens a fresh one.

use embedded_io::{Error as _, Read, Write};
use tracing::{debug, info, warn};

use crate::error::{ModbusError, ModbusResult};

pub mod serial;

pub use serial::SerialPortOpener;

/// Upper bound on registers returned by one read.
pub const MAX_READ_REGISTERS: usize = 64;

/// Registers returned by [`ModbusRtuMaster::read_holding_registers`].
pub type Registers = heapless::Vec<u16, MAX_READ_REGISTERS>;

/// Error type of the port produced by opener `O`.
pub type PortError<O> = <<O as PortOpener>::Port as embedded_io::ErrorType>::Error;

/// Opens (or re-opens) the serial interface used by the master.
pub trait PortOpener {
    type Port: embedded_io::Read + embedded_io::Write;

    fn open(&mut self) -> Result<Self::Port, <Self::Port as embedded_io::ErrorType>::Error>;
}

/// A Modbus-RTU master addressing one fixed slave.
///
/// `L` is the size of the request/response buffers.
pub struct ModbusRtuMaster<O: PortOpener, const L: usize = 128> {
    opener: O,
    port: Option<O::Port>,
    /// Default for the pendant is 0x01.
    unit_id: u8,
}

impl<O: PortOpener, const L: usize> ModbusRtuMaster<O, L> {
    /// Create a master for `unit_id`. The port is opened lazily on first use.
    pub fn new(opener: O, unit_id: u8) -> Self {
        Self {
            opener,
            port: None,
            unit_id,
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Drop the current port; the next request re-opens it.
    pub fn force_reconnect(&mut self) {
        if self.port.take().is_some() {
            info!("Modbus port for slave {} closed for reconnect", self.unit_id);
        }
    }

    /// Read `count` holding registers starting at `start_register`.
    pub fn read_holding_registers(
        &mut self,
        start_register: u16,
        count: u16,
    ) -> ModbusResult<Registers, PortError<O>> {
        if count == 0 || usize::from(count) > MAX_READ_REGISTERS {
            return Err(ModbusError::ModbusError(rmodbus::ErrorKind::OOB));
        }

        let mut request: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut req = rmodbus::client::ModbusRequest::new(self.unit_id, rmodbus::ModbusProto::Rtu);
        req.generate_get_holdings(start_register, count, &mut request)?;

        // unit_id + function + byte_count + data + CRC
        let expected = 5 + 2 * usize::from(count);
        let response: heapless::Vec<u8, L> = self.transact(&request, expected)?;

        let mut registers = Registers::new();
        req.parse_u16(&response, &mut registers)
            .map_err(|_| ModbusError::InvalidResponse)?;

        if registers.len() != usize::from(count) {
            return Err(ModbusError::InvalidResponse);
        }
        Ok(registers)
    }

    /// Write `values` to sequential registers starting at `start_register`.
    ///
    /// Values are written as given; no range checking happens at this layer.
    pub fn write_multiple_registers(
        &mut self,
        start_register: u16,
        values: &[u16],
    ) -> ModbusResult<(), PortError<O>> {
        let mut request: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut req = rmodbus::client::ModbusRequest::new(self.unit_id, rmodbus::ModbusProto::Rtu);
        req.generate_set_holdings_bulk(start_register, values, &mut request)?;

        // unit_id + function + address + quantity + CRC
        let response: heapless::Vec<u8, L> = self.transact(&request, 8)?;

        // The reply echoes unit, function, address and quantity.
        if response.len() < 8 || request[0..=5] != response[0..=5] {
            Err(ModbusError::InvalidResponse)
        } else {
            req.parse_ok(&response)
                .map_err(|_| ModbusError::InvalidResponse)
        }
    }

    /// Send `request` and collect the reply, dropping the port on any serial error.
    fn transact(
        &mut self,
        request: &[u8],
        expected_len: usize,
    ) -> ModbusResult<heapless::Vec<u8, L>, PortError<O>> {
        let result = self.exchange(request, expected_len);
        if let Err(ModbusError::SerialError(e)) = &result {
            warn!(
                "Modbus serial error talking to slave {}: {:?}, reconnecting on next request",
                self.unit_id,
                e.kind()
            );
            self.port = None;
        }
        result
    }

    fn exchange(
        &mut self,
        request: &[u8],
        expected_len: usize,
    ) -> ModbusResult<heapless::Vec<u8, L>, PortError<O>> {
        let port = self.port()?;

        port.write_all(request).map_err(ModbusError::SerialError)?;

        let mut response: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut chunk = [0u8; 16];
        // Keep reading until the frame is complete or the line goes quiet.
        loop {
            match port.read(&mut chunk) {
                Ok(0) => {
                    if response.is_empty() {
                        return Err(ModbusError::Timeout);
                    }
                    break;
                }
                Ok(bytes_read) => {
                    if response.extend_from_slice(&chunk[..bytes_read]).is_err() {
                        return Err(ModbusError::BufferError);
                    }
                    if response.len() >= expected_len || is_exception_reply(&response) {
                        break;
                    }
                }
                Err(e) => {
                    // A quiet line after a partial reply is handed to the parser.
                    if matches!(
                        e.kind(),
                        embedded_io::ErrorKind::Other | embedded_io::ErrorKind::TimedOut
                    ) && !response.is_empty()
                    {
                        break;
                    }
                    return Err(ModbusError::SerialError(e));
                }
            }
        }

        if is_exception_reply(&response) {
            debug!(
                "Modbus slave {} returned exception {:#04x}",
                self.unit_id, response[2]
            );
            return Err(ModbusError::Exception(response[2]));
        }
        Ok(response)
    }

    fn port(&mut self) -> ModbusResult<&mut O::Port, PortError<O>> {
        if self.port.is_none() {
            match self.opener.open() {
                Ok(port) => {
                    info!("Modbus port opened for slave {}", self.unit_id);
                    self.port = Some(port);
                }
                Err(e) => {
                    warn!("Failed to open Modbus port: {:?}", e.kind());
                    return Err(ModbusError::NotConnected);
                }
            }
        }
        self.port.as_mut().ok_or(ModbusError::NotConnected)
    }
}

/// Exception replies are `unit, function | 0x80, code, crc, crc`.
fn is_exception_reply(response: &[u8]) -> bool {
    response.len() >= 5 && response[1] & 0x80 != 0
}


#[cfg(test)]
mod tests {
    use super::mock::MockOpener;
    use super::*;
    use crate::mock_serial::MockSerial;

    const READ_PENDANT_REQUEST: [u8; 8] = [0x01, 0x03, 0x00, 0x01, 0x00, 0x04, 0x15, 0xC9];

    #[test]
    fn test_read_holding_registers() {
        let response = [
            0x01, 0x03, 0x08, 0x00, 0x80, 0x00, 0x32, 0x00, 0x00, 0x7F, 0x7F, 0x4C, 0x0B,
        ];
        let opener = MockOpener::with_responses(&[&response]);
        let mut master: ModbusRtuMaster<MockOpener, 128> = ModbusRtuMaster::new(opener, 0x01);

        let registers = master.read_holding_registers(0x0001, 4).unwrap();
        assert_eq!(registers.as_slice(), &[0x0080, 0x0032, 0x0000, 0x7F7F]);

        // Check that the correct Modbus RTU frame was written
        let written = master.port.as_ref().unwrap().written_data();
        assert_eq!(written, READ_PENDANT_REQUEST.as_slice());
    }

    #[test]
    fn test_read_single_register() {
        let response = [0x01, 0x03, 0x02, 0x56, 0x78, 0x87, 0xC6];
        let opener = MockOpener::with_responses(&[&response]);
        let mut master: ModbusRtuMaster<MockOpener, 128> = ModbusRtuMaster::new(opener, 0x01);

        let registers = master.read_holding_registers(0x20, 1).unwrap();
        assert_eq!(registers.as_slice(), &[0x5678]);

        let written = master.port.as_ref().unwrap().written_data();
        assert_eq!(written, &[0x01, 0x03, 0x00, 0x20, 0x00, 0x01, 0x85, 0xC0]);
    }

    #[test]
    fn test_read_bad_crc_is_invalid() {
        // CRC bytes zeroed.
        let response = [0x01, 0x03, 0x02, 0x56, 0x78, 0x00, 0x00];
        let opener = MockOpener::with_responses(&[&response]);
        let mut master: ModbusRtuMaster<MockOpener, 128> = ModbusRtuMaster::new(opener, 0x01);

        let result = master.read_holding_registers(0x20, 1);
        assert!(matches!(result, Err(ModbusError::InvalidResponse)));
        // A protocol error keeps the port open.
        assert!(master.is_connected());
    }

    #[test]
    fn test_exception_reply() {
        let response = [0x01, 0x83, 0x02, 0xC0, 0xF1];
        let opener = MockOpener::with_responses(&[&response]);
        let mut master: ModbusRtuMaster<MockOpener, 128> = ModbusRtuMaster::new(opener, 0x01);

        let result = master.read_holding_registers(0x0001, 4);
        assert!(matches!(result, Err(ModbusError::Exception(0x02))));
    }

    #[test]
    fn test_write_multiple_registers() {
        let response = [0x01, 0x10, 0x00, 0x10, 0x00, 0x02, 0x40, 0x0D];
        let opener = MockOpener::with_responses(&[&response]);
        let mut master: ModbusRtuMaster<MockOpener, 128> = ModbusRtuMaster::new(opener, 0x01);

        master
            .write_multiple_registers(0x0010, &[0x1234, 0x5678])
            .unwrap();

        let written = master.port.as_ref().unwrap().written_data();
        let ideal_written = [
            0x01, 0x10, 0x00, 0x10, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78, 0x89, 0x97,
        ];
        assert_eq!(written, ideal_written.as_slice());
    }

    #[test]
    fn test_write_mismatched_echo() {
        // Quantity in the echo differs from the request.
        let response = [0x01, 0x10, 0x00, 0x10, 0x00, 0x03, 0x81, 0xCD];
        let opener = MockOpener::with_responses(&[&response]);
        let mut master: ModbusRtuMaster<MockOpener, 128> = ModbusRtuMaster::new(opener, 0x01);

        let result = master.write_multiple_registers(0x0010, &[0x1234, 0x5678]);
        assert!(matches!(result, Err(ModbusError::InvalidResponse)));
    }

    #[test]
    fn test_serial_error_triggers_reconnect() {
        let response = [0x01, 0x03, 0x02, 0x56, 0x78, 0x87, 0xC6];
        let mut failing = MockSerial::new();
        failing.set_read_error(true);
        let mut ready = MockSerial::new();
        ready.set_read_data(&response).unwrap();

        let opener = MockOpener {
            ports: [failing, ready].into_iter().collect(),
            opened: 0,
        };
        let mut master: ModbusRtuMaster<MockOpener, 128> = ModbusRtuMaster::new(opener, 0x01);

        assert!(matches!(
            master.read_holding_registers(0x20, 1),
            Err(ModbusError::SerialError(_))
        ));
        assert!(!master.is_connected());

        let registers = master.read_holding_registers(0x20, 1).unwrap();
        assert_eq!(registers.as_slice(), &[0x5678]);
        assert_eq!(master.opener.opened, 2);
    }

    #[test]
    fn test_open_failure_is_not_connected() {
        let mut master: ModbusRtuMaster<MockOpener, 128> =
            ModbusRtuMaster::new(MockOpener::default(), 0x01);
        assert!(matches!(
            master.read_holding_registers(0x0001, 4),
            Err(ModbusError::NotConnected)
        ));
        assert!(matches!(
            master.read_holding_registers(0x0001, 4),
            Err(ModbusError::NotConnected)
        ));
        assert_eq!(master.opener.opened, 2);
    }

    #[test]
    fn test_silent_slave_drops_port() {
        // No reply at all: the mock reports an idle line straight away.
        let opener = MockOpener::with_responses(&[&[]]);
        let mut master: ModbusRtuMaster<MockOpener, 128> = ModbusRtuMaster::new(opener, 0x01);

        assert!(matches!(
            master.read_holding_registers(0x0001, 4),
            Err(ModbusError::SerialError(_))
        ));
        assert!(!master.is_connected());
    }

    #[test]
    fn test_force_reconnect() {
        let response = [0x01, 0x03, 0x02, 0x56, 0x78, 0x87, 0xC6];
        let opener = MockOpener::with_responses(&[&response, &response]);
        let mut master: ModbusRtuMaster<MockOpener, 128> = ModbusRtuMaster::new(opener, 0x01);

        master.read_holding_registers(0x20, 1).unwrap();
        master.force_reconnect();
        assert!(!master.is_connected());
        master.read_holding_registers(0x20, 1).unwrap();
        assert_eq!(master.opener.opened, 2);
    }
}
