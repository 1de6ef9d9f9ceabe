//! Byte-level serial transport.
//!
//! The rest of the crate never touches a port directly; it goes through
//! [`SerialLink`], which is implemented for real hardware by
//! [`SerialPortLink`] and for tests and `--simulate` by
//! [`crate::sim::SimulatedModem`].

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Fixed line rate of the SIM7600 AT port.
pub const BAUD_RATE: u32 = 115_200;

/// Terminates every AT command.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Ctrl-Z, terminates a text-mode SMS payload.
pub const SUBMIT_TERMINATOR: u8 = 0x1A;

/// A serial stream that can be written to and drained without blocking on
/// data arrival.
pub trait SerialLink: Send {
    /// Write all bytes and flush.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;
    /// Return every byte currently buffered by the device (possibly none).
    fn read_available(&mut self) -> Result<Vec<u8>>;
}

/// [`SerialLink`] over a `serialport` device such as `/dev/ttyUSB2`.
pub struct SerialPortLink {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialPortLink {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(100))
            .open()?;
        port.clear(serialport::ClearBuffer::Input)?;
        tracing::info!(path, baud_rate, "serial port opened");
        Ok(Self { port })
    }
}

impl SerialLink for SerialPortLink {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let pending = self.port.bytes_to_read()? as usize;
        let mut buf = vec![0u8; pending];
        if pending > 0 {
            self.port.read_exact(&mut buf)?;
        }
        Ok(buf)
    }
}
