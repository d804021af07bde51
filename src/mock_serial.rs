//! In-memory serial line used by the Modbus master tests.

/// Emulates one RS485 port: records everything written and replays a
/// canned slave reply.
pub struct MockSerial {
    written: heapless::Vec<u8, 256>,
    reply: heapless::Vec<u8, 256>,
    reply_pos: usize,
    fail_writes: bool,
    fail_reads: bool,
}

#[derive(Debug)]
pub enum MockSerialError {
    /// Injected line failure.
    SimulatedError,
    /// More bytes than the mock can hold.
    BufferOverflow,
    /// The reply has been fully consumed; a real port would time out here.
    Idle,
}

impl core::fmt::Display for MockSerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for MockSerialError {}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::SimulatedError => embedded_io::ErrorKind::BrokenPipe,
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::Idle => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.fail_writes {
            return Err(MockSerialError::SimulatedError);
        }
        self.written
            .extend_from_slice(buf)
            .map_err(|_| MockSerialError::BufferOverflow)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.fail_reads {
            return Err(MockSerialError::SimulatedError);
        }
        let remaining = &self.reply[self.reply_pos..];
        if remaining.is_empty() {
            return Err(MockSerialError::Idle);
        }
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.reply_pos += n;
        Ok(n)
    }
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            written: heapless::Vec::new(),
            reply: heapless::Vec::new(),
            reply_pos: 0,
            fail_writes: false,
            fail_reads: false,
        }
    }

    /// Replace the reply the slave will send.
    pub fn set_read_data(&mut self, data: &[u8]) -> Result<(), MockSerialError> {
        self.reply.clear();
        self.reply_pos = 0;
        self.reply
            .extend_from_slice(data)
            .map_err(|_| MockSerialError::BufferOverflow)
    }

    /// Bytes the master has sent so far.
    pub fn written_data(&self) -> &[u8] {
        &self.written
    }

    pub fn set_write_error(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn set_read_error(&mut self, fail: bool) {
        self.fail_reads = fail;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Read, Write};

    #[test]
    fn test_reply_is_read_in_chunks() {
        let mut mock = MockSerial::new();
        mock.set_read_data(&[1, 2, 3, 4, 5]).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(mock.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert!(matches!(mock.read(&mut buf), Err(MockSerialError::Idle)));
    }

    #[test]
    fn test_writes_accumulate() {
        let mut mock = MockSerial::new();
        mock.write_all(&[0x01, 0x03]).unwrap();
        mock.write_all(&[0x00, 0x01]).unwrap();
        assert_eq!(mock.written_data(), &[0x01, 0x03, 0x00, 0x01]);
    }

    #[test]
    fn test_error_injection() {
        let mut mock = MockSerial::new();
        mock.set_read_data(&[0xAA]).unwrap();
        mock.set_read_error(true);
        mock.set_write_error(true);

        let mut buf = [0u8; 4];
        assert!(matches!(mock.read(&mut buf), Err(MockSerialError::SimulatedError)));
        assert!(mock.write(&[0x01]).is_err());
        assert!(mock.flush().is_err());
        assert!(mock.written_data().is_empty());

        mock.set_read_error(false);
        assert_eq!(mock.read(&mut buf).unwrap(), 1);
    }

    #[test]
    fn test_overflow() {
        let mut mock = MockSerial::new();
        assert!(matches!(
            mock.set_read_data(&[0u8; 300]),
            Err(MockSerialError::BufferOverflow)
        ));
    }

    #[test]
    fn test_error_kinds() {
        assert!(matches!(MockSerialError::Idle.kind(), embedded_io::ErrorKind::Other));
        assert!(matches!(
            MockSerialError::SimulatedError.kind(),
            embedded_io::ErrorKind::BrokenPipe
        ));
    }
}
