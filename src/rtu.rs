//! The RS-485 link the motors are attached to.
use std::io::{Read as _, Write as _};
use std::path::Path;
use std::time::Duration;

use crc::{CRC_16_MODBUS, Crc};
use tracing::trace;

use crate::connection::Transport;
use crate::modbus::CHECKSUM_LEN;

pub const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// The frame checksum, in the order it is sent.
pub fn checksum(frame: &[u8]) -> [u8; CHECKSUM_LEN] {
    CRC.checksum(frame).to_le_bytes()
}

pub fn has_valid_checksum(frame: &[u8]) -> bool {
    let Some(split) = frame.len().checked_sub(CHECKSUM_LEN) else {
        return false;
    };
    let (body, sum) = frame.split_at(split);
    checksum(body) == sum
}

/// 8N1 serial port with the frame checksum handled on the way in and out.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &Path, baudrate: u32, timeout: Duration) -> serialport::Result<Self> {
        let port = serialport::new(path.to_string_lossy(), baudrate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()?;
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, frame: &[u8]) -> std::io::Result<()> {
        // Leftovers of an abandoned response would be mistaken for the start of the next one.
        self.port.clear(serialport::ClearBuffer::Input)?;
        let mut buffer = Vec::with_capacity(frame.len() + CHECKSUM_LEN);
        buffer.extend_from_slice(frame);
        buffer.extend_from_slice(&checksum(frame));
        trace!(message = "writing", ?buffer);
        self.port.write_all(&buffer)?;
        self.port.flush()
    }

    fn receive(&mut self, count: usize) -> std::io::Result<Vec<u8>> {
        let mut buffer = vec![0; count];
        self.port.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn verify_checksum(&self, frame: &[u8]) -> bool {
        has_valid_checksum(frame)
    }
}
