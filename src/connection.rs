use crate::modbus::{self, Function, Operation, Request, Response, VGreenCodec};
use std::path::PathBuf;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder as _, Encoder as _};
use tracing::{debug, trace, warn};

/// The link a [`Connection`] talks over.
///
/// Implementations frame bytes for the physical medium: they append a checksum to everything
/// sent and keep the checksum bytes in what is received so that [`Transport::verify_checksum`]
/// can be run over complete frames.
pub trait Transport {
    /// Send a request frame without its checksum.
    fn send(&mut self, frame: &[u8]) -> std::io::Result<()>;
    /// Receive exactly `count` bytes, or fail with a timeout.
    fn receive(&mut self, count: usize) -> std::io::Result<Vec<u8>>;
    /// Check the trailing checksum of a complete received frame.
    fn verify_checksum(&self, frame: &[u8]) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, frame: &[u8]) -> std::io::Result<()> {
        (**self).send(frame)
    }
    fn receive(&mut self, count: usize) -> std::io::Result<Vec<u8>> {
        (**self).receive(count)
    }
    fn verify_checksum(&self, frame: &[u8]) -> bool {
        (**self).verify_checksum(frame)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not encode the {1} request")]
    Encode(#[source] modbus::Error, Function),
    #[error("could not send out the {1} request")]
    Send(#[source] std::io::Error, Function),
    #[error("could not receive the {1} response")]
    Receive(#[source] std::io::Error, Function),
    #[error("transport returned {actual} bytes when {expected} were requested")]
    ShortRead { expected: usize, actual: usize },
    #[error("checksum of the {0} response does not match")]
    Checksum(Function),
    #[error("could not decode the {1} response")]
    Decode(#[source] modbus::Error, Function),
    #[error("the {0} response frame was not complete")]
    Incomplete(Function),
    #[error("response came from device {found:#04x}, but the request went to {expected:#04x}")]
    UnexpectedDevice { expected: u8, found: u8 },
    #[error("device responded to {function} with exception code {code:#04x}")]
    Exception { function: Function, code: u8 },
    #[error("{function} response is {actual} bytes long, but the request implies {expected}")]
    FrameSize { function: Function, expected: usize, actual: usize },
    #[error("could not open the serial port at {1:?}")]
    OpenDevice(#[source] serialport::Error, PathBuf),
}

/// Parse a byte written in decimal or `0x` prefixed hexadecimal.
pub fn parse_byte(value: &str) -> Result<u8, std::num::ParseIntError> {
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => value.parse(),
    }
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Path to the RS-485 serial device the motor is wired to.
    #[arg(long, short = 'p')]
    pub port: PathBuf,

    /// The address of the motor on the bus, decimal or `0x` prefixed hexadecimal.
    #[arg(long, short = 'i', default_value = "0x15", value_parser = parse_byte)]
    pub device_id: u8,

    /// The baudrate configured for the motor.
    #[arg(long, default_value = "9600")]
    pub baudrate: u32,

    /// Consider the request failed if the complete response isn't received in this time.
    #[arg(long, default_value = "1s")]
    pub timeout: humantime::Duration,
}

/// A strictly sequential request/response exchange with one device.
pub struct Connection<T> {
    transport: T,
    device_id: u8,
    codec: VGreenCodec,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T, device_id: u8) -> Self {
        Self { transport, device_id, codec: VGreenCodec::new() }
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send one request and wait for its response.
    ///
    /// Device exception responses are reported as [`Error::Exception`]. On any error the
    /// partially received frame is discarded.
    pub fn send(&mut self, operation: Operation) -> Result<Response, Error> {
        let function = operation.function();
        let request = Request { device_id: self.device_id, operation };
        let mut buffer = BytesMut::new();
        self.codec.encode(&request, &mut buffer).map_err(|e| Error::Encode(e, function))?;
        debug!(message = "sending request", %function, device_id = self.device_id);
        self.transport.send(&buffer).map_err(|e| Error::Send(e, function))?;

        buffer.clear();
        loop {
            let needed = modbus::bytes_needed(function, &buffer);
            if needed == 0 {
                break;
            }
            let chunk = self.transport.receive(needed).map_err(|e| Error::Receive(e, function))?;
            trace!(message = "received", %function, ?chunk);
            if chunk.len() != needed {
                return Err(Error::ShortRead { expected: needed, actual: chunk.len() });
            }
            buffer.extend_from_slice(&chunk);
        }
        if !self.transport.verify_checksum(&buffer) {
            return Err(Error::Checksum(function));
        }

        let frame_len = buffer.len();
        let response = self
            .codec
            .decode(&mut buffer)
            .map_err(|e| Error::Decode(e, function))?
            .ok_or(Error::Incomplete(function))?;
        if response.device_id != self.device_id {
            return Err(Error::UnexpectedDevice {
                expected: self.device_id,
                found: response.device_id,
            });
        }
        if let Some(code) = response.exception_code() {
            return Err(Error::Exception { function, code });
        }
        let expected = request.operation.expected_response_length();
        if frame_len != expected {
            return Err(Error::FrameSize { function, expected, actual: frame_len });
        }
        debug!(message = "received response", %function, frame_len);
        Ok(response)
    }
}

impl Connection<crate::rtu::SerialTransport> {
    pub fn open(args: &Args) -> Result<Self, Error> {
        let transport = crate::rtu::SerialTransport::open(&args.port, args.baudrate, *args.timeout)
            .map_err(|e| Error::OpenDevice(e, args.port.clone()))?;
        if args.device_id == 0 {
            warn!("device address 0 is the broadcast address, responses are unlikely");
        }
        Ok(Self::new(transport, args.device_id))
    }
}
