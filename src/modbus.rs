//! Frame codec for the custom function set spoken by VGreen motor controllers.
//!
//! The frames look like Modbus RTU (`address function payload checksum`) but none of the
//! standard functions are implemented. Every payload starts with an acknowledgement byte, byte
//! counts are sent as `length - 1`, configuration reads and writes share a function code, and
//! three of the functions respond with frames whose size is only known once the length byte
//! has been received.
use num_derive::FromPrimitive;
use tokio_util::bytes::{BufMut as _, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// First byte of every request payload.
pub const REQUEST_ACK: u8 = 0x20;
/// First byte of every successful response payload.
pub const RESPONSE_ACK: u8 = 0x10;
/// Set in the page byte to turn a configuration read into a write.
pub const WRITE_FLAG: u8 = 0x80;
/// Set in the function code of a response when the device rejects a request.
pub const EXCEPTION_FLAG: u8 = 0x80;
/// address, function | 0x80, exception code, checksum.
pub const EXCEPTION_FRAME_LEN: usize = 5;
/// No complete response is ever shorter than an exception response.
pub const MIN_FRAME_LEN: usize = EXCEPTION_FRAME_LEN;
/// Position of the `length - 1` byte within a dynamically sized response frame.
pub const LENGTH_OFFSET: usize = 5;
/// The largest data block a single `length - 1` byte can describe.
pub const MAX_DATA_LEN: usize = 256;
pub const CHECKSUM_LEN: usize = 2;

/// Total size of a dynamically sized response frame, given its `length - 1` byte.
///
/// address, function, ack, page, address, length, data (`length_byte + 1`), checksum.
pub const fn dynamic_frame_len(length_byte: u8) -> usize {
    length_byte as usize + 1 + 8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    Fixed(usize),
    /// The size is carried by the byte at [`LENGTH_OFFSET`].
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Function {
    Go,
    Stop,
    Status,
    SetDemand,
    ReadSensor,
    ReadId,
    ReadConfig,
    WriteConfig,
    StoreConfig,
}

impl Function {
    pub const fn code(self) -> u8 {
        match self {
            Function::Go => 0x41,
            Function::Stop => 0x42,
            Function::Status => 0x43,
            Function::SetDemand => 0x44,
            Function::ReadSensor => 0x45,
            Function::ReadId => 0x46,
            // Writes are told apart from reads by `WRITE_FLAG` in the page byte.
            Function::ReadConfig | Function::WriteConfig => 0x64,
            Function::StoreConfig => 0x65,
        }
    }

    pub const fn frame_size(self) -> FrameSize {
        match self {
            Function::Go | Function::Stop | Function::StoreConfig => FrameSize::Fixed(5),
            Function::Status => FrameSize::Fixed(6),
            Function::SetDemand => FrameSize::Fixed(8),
            Function::ReadSensor => FrameSize::Fixed(9),
            Function::ReadId | Function::ReadConfig | Function::WriteConfig => FrameSize::Dynamic,
        }
    }
}

/// Size of the response frame that starts with `prefix`, if enough of it is known.
pub fn frame_len(function: Function, prefix: &[u8]) -> Option<usize> {
    let &function_byte = prefix.get(1)?;
    if function_byte & EXCEPTION_FLAG != 0 {
        return Some(EXCEPTION_FRAME_LEN);
    }
    match function.frame_size() {
        FrameSize::Fixed(len) => Some(len),
        FrameSize::Dynamic => prefix.get(LENGTH_OFFSET).map(|&l| dynamic_frame_len(l)),
    }
}

/// How many more bytes must be received before `received` holds a complete response.
///
/// Dynamically sized responses take two steps: first enough to see the length byte, then the
/// remainder. Returns zero once the frame is complete.
pub fn bytes_needed(function: Function, received: &[u8]) -> usize {
    if received.len() < MIN_FRAME_LEN {
        return MIN_FRAME_LEN - received.len();
    }
    match frame_len(function, received) {
        Some(total) => total.saturating_sub(received.len()),
        None => (LENGTH_OFFSET + 1).saturating_sub(received.len()),
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    FromPrimitive,
    strum::Display,
    clap::ValueEnum,
    serde::Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DemandMode {
    /// Demand in RPM.
    Speed = 0,
    /// Demand in lb-ft.
    Torque = 1,
}

impl DemandMode {
    /// Factor between the physical demand and its wire representation.
    pub const fn scale(self) -> u16 {
        match self {
            DemandMode::Speed => 4,
            DemandMode::Torque => 1200,
        }
    }

    /// The wire value for a physical demand, `None` if it does not fit 16 bits.
    pub fn to_wire(self, demand: u16) -> Option<u16> {
        demand.checked_mul(self.scale())
    }
}

/// The operating mode reported by the status function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(transparent)]
pub struct MotorMode(pub u8);

impl MotorMode {
    pub const STOP: Self = Self(0x00);
    /// Motor is getting ready to spin.
    pub const RUN_BOOT: Self = Self(0x09);
    pub const RUN_VECTOR: Self = Self(0x0b);
    pub const FAULT: Self = Self(0x20);

    pub const fn name(self) -> Option<&'static str> {
        match self {
            Self::STOP => Some("STOP"),
            Self::RUN_BOOT => Some("RUN BOOT"),
            Self::RUN_VECTOR => Some("RUN"),
            Self::FAULT => Some("FAULT"),
            _ => None,
        }
    }
}

impl std::fmt::Display for MotorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => f.write_fmt(format_args!("0x{:02x}", self.0)),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("could not access the frame buffer")]
    Io(#[from] std::io::Error),
    #[error("a data block of {0} bytes can not be transferred (must be 1 to 256 bytes)")]
    LengthOutOfRange(usize),
    #[error("{mode} demand of {demand} does not fit into the 16-bit wire value")]
    DemandOutOfRange { mode: DemandMode, demand: u16 },
    #[error("response acknowledgement byte is {0:#04x}, expected 0x10")]
    AckMismatch(u8),
    #[error("response function code {found:#04x} does not match the request ({expected:#04x})")]
    UnexpectedFunction { expected: u8, found: u8 },
    #[error("response frame is {actual} bytes long, expected {expected}")]
    FrameSize { expected: usize, actual: usize },
    #[error("received a response while no request was outstanding")]
    NoPendingRequest,
}

fn length_byte(length: usize) -> Result<u8, Error> {
    length
        .checked_sub(1)
        .and_then(|l| u8::try_from(l).ok())
        .ok_or(Error::LengthOutOfRange(length))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Go,
    Stop,
    Status,
    /// `demand` is in physical units (RPM or lb-ft), scaling happens during encoding.
    SetDemand { mode: DemandMode, demand: u16 },
    ReadSensor { page: u8, address: u8 },
    ReadId { address: u8, length: usize },
    ReadConfig { page: u8, address: u8, length: usize },
    WriteConfig { page: u8, address: u8, data: Vec<u8> },
    StoreConfig,
}

impl Operation {
    pub fn function(&self) -> Function {
        match self {
            Operation::Go => Function::Go,
            Operation::Stop => Function::Stop,
            Operation::Status => Function::Status,
            Operation::SetDemand { .. } => Function::SetDemand,
            Operation::ReadSensor { .. } => Function::ReadSensor,
            Operation::ReadId { .. } => Function::ReadId,
            Operation::ReadConfig { .. } => Function::ReadConfig,
            Operation::WriteConfig { .. } => Function::WriteConfig,
            Operation::StoreConfig => Function::StoreConfig,
        }
    }

    /// The size of the response frame a well-behaved device sends back for this request.
    ///
    /// For the dynamically sized functions this is implied by the requested length; the frame
    /// itself is still sized from its own length byte when receiving.
    pub fn expected_response_length(&self) -> usize {
        match (self.function().frame_size(), self) {
            (FrameSize::Fixed(len), _) => len,
            (FrameSize::Dynamic, Operation::ReadId { length, .. })
            | (FrameSize::Dynamic, Operation::ReadConfig { length, .. }) => length + 8,
            (FrameSize::Dynamic, Operation::WriteConfig { data, .. }) => data.len() + 8,
            (FrameSize::Dynamic, _) => unreachable!("only data functions are dynamically sized"),
        }
    }

    /// Write the request payload: the request marker followed by the function arguments.
    pub fn encode_payload(&self, dst: &mut BytesMut) -> Result<(), Error> {
        dst.put_u8(REQUEST_ACK);
        match self {
            Operation::Go | Operation::Stop | Operation::Status | Operation::StoreConfig => {}
            &Operation::SetDemand { mode, demand } => {
                let raw = mode.to_wire(demand).ok_or(Error::DemandOutOfRange { mode, demand })?;
                dst.put_u8(mode as u8);
                dst.put_u16_le(raw);
            }
            &Operation::ReadSensor { page, address } => {
                dst.put_u8(page);
                dst.put_u8(address);
            }
            &Operation::ReadId { address, length } => {
                // Identification lives on page 0 only.
                dst.put_u8(0);
                dst.put_u8(address);
                dst.put_u8(length_byte(length)?);
            }
            &Operation::ReadConfig { page, address, length } => {
                dst.put_u8(page & !WRITE_FLAG);
                dst.put_u8(address);
                dst.put_u8(length_byte(length)?);
            }
            Operation::WriteConfig { page, address, data } => {
                dst.put_u8(page | WRITE_FLAG);
                dst.put_u8(*address);
                dst.put_u8(length_byte(data.len())?);
                dst.extend_from_slice(data);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub device_id: u8,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub device_id: u8,
    pub function: Function,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match self.kind {
            ResponseKind::Exception(code) => Some(code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    /// The device refused the request with the given exception code.
    Exception(u8),
    /// Go, Stop and StoreConfig carry nothing besides the acknowledgement.
    Acknowledged,
    Status(MotorMode),
    /// `demand` is the raw echoed wire value.
    SetDemand { mode: u8, demand: u16 },
    Sensor { page: u8, address: u8, value: u16 },
    /// ReadId, ReadConfig and WriteConfig echo the block location along with its contents.
    Data { page: u8, address: u8, data: Vec<u8> },
}

/// Decode one complete response frame (checksum included) to a request for `function`.
pub fn decode_frame(function: Function, frame: &[u8]) -> Result<Response, Error> {
    let expected = frame_len(function, frame).unwrap_or(MIN_FRAME_LEN.max(LENGTH_OFFSET + 1));
    if frame.len() != expected {
        return Err(Error::FrameSize { expected, actual: frame.len() });
    }
    let [device_id, function_byte, body @ ..] = frame else {
        unreachable!("frame length was checked above");
    };
    let (device_id, function_byte) = (*device_id, *function_byte);
    let body = &body[..body.len() - CHECKSUM_LEN];
    if function_byte == function.code() | EXCEPTION_FLAG {
        let [code] = body else { unreachable!("exception frames are fixed size") };
        return Ok(Response { device_id, function, kind: ResponseKind::Exception(*code) });
    }
    if function_byte != function.code() {
        return Err(Error::UnexpectedFunction { expected: function.code(), found: function_byte });
    }
    let [ack, body @ ..] = body else { unreachable!("every frame carries an ack byte") };
    if *ack != RESPONSE_ACK {
        return Err(Error::AckMismatch(*ack));
    }
    let size_error = || Error::FrameSize { expected, actual: frame.len() };
    let kind = match function {
        Function::Go | Function::Stop | Function::StoreConfig => ResponseKind::Acknowledged,
        Function::Status => {
            let [mode] = body else { return Err(size_error()) };
            ResponseKind::Status(MotorMode(*mode))
        }
        Function::SetDemand => {
            let [mode, a, b] = body else { return Err(size_error()) };
            ResponseKind::SetDemand { mode: *mode, demand: u16::from_le_bytes([*a, *b]) }
        }
        Function::ReadSensor => {
            let [page, address, a, b] = body else { return Err(size_error()) };
            ResponseKind::Sensor {
                page: *page,
                address: *address,
                value: u16::from_le_bytes([*a, *b]),
            }
        }
        Function::ReadId | Function::ReadConfig | Function::WriteConfig => {
            let [page, address, length, data @ ..] = body else { return Err(size_error()) };
            if data.len() != usize::from(*length) + 1 {
                return Err(size_error());
            }
            ResponseKind::Data { page: *page, address: *address, data: data.to_vec() }
        }
    };
    Ok(Response { device_id, function, kind })
}

/// Frames requests and matches responses against the most recently encoded request.
///
/// The response frames don't identify which of the shared-code functions they answer, so the
/// codec remembers what it last sent.
#[derive(Debug, Default)]
pub struct VGreenCodec {
    pending: Option<Function>,
}

impl VGreenCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<Function> {
        self.pending
    }
}

impl Encoder<&Request> for VGreenCodec {
    type Error = Error;
    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let function = req.operation.function();
        let start = dst.len();
        dst.put_u8(req.device_id);
        dst.put_u8(function.code());
        if let Err(e) = req.operation.encode_payload(dst) {
            dst.truncate(start);
            return Err(e);
        }
        self.pending = Some(function);
        trace!(message = "encoded request", %function, buffer = ?&dst[start..]);
        Ok(())
    }
}

impl Decoder for VGreenCodec {
    type Item = Response;
    type Error = Error;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(function) = self.pending else {
            return Err(Error::NoPendingRequest);
        };
        trace!(message = "attempt at decoding", %function, buffer = ?src);
        if bytes_needed(function, src) > 0 {
            return Ok(None);
        }
        let Some(len) = frame_len(function, src) else {
            return Ok(None);
        };
        let frame = src.split_to(len);
        self.pending = None;
        decode_frame(function, &frame).map(Some)
    }
}
