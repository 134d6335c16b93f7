pub mod frame;
pub mod telemetry;

use thiserror::Error;

pub use frame::{FrameAssembler, FrameStats, RawFrame};
pub use telemetry::{decode, Fault, FaultCode, RunStatus, Telemetry};

/// Response frame length, fixed by the device firmware.
pub const FRAME_LEN: usize = 32;
pub const FRAME_HEADER1: u8 = 0xB1;
pub const FRAME_HEADER2: u8 = 0xB7;

/// Poll command length: six payload bytes plus the trailing checksum.
pub const POLL_LEN: usize = 7;

/// Station ID of a factory-default unit (last two digits of the serial number).
pub const DEFAULT_STATION_ID: u8 = 0x61;

const POLL_HEADER1: u8 = 0x0A;
const POLL_HEADER2: u8 = 0x96;
const POLL_CMD: u8 = 0x54;
const POLL_LENGTH: u8 = 0x18;
const POLL_TAIL: u8 = 0x05;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("frame is {0} bytes, expected {FRAME_LEN}")]
    BadLength(usize),
    #[error("bad frame header {0:02X} {1:02X}")]
    BadHeader(u8, u8),
    #[error("checksum mismatch: computed {computed:02X}, frame carries {found:02X}")]
    BadChecksum { computed: u8, found: u8 },
}

/// Command checksum: wrapping u8 sum over the given bytes. The device
/// covers bytes 2..=4 of the poll command (station ID, command, length).
pub fn command_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |x, y| x.wrapping_add(*y))
}

/// Response checksum: XOR of the first 31 frame bytes, expected to equal
/// the 32nd.
pub fn response_checksum(frame: &[u8]) -> u8 {
    frame[..FRAME_LEN - 1].iter().fold(0u8, |x, y| x ^ y)
}

/// Encode the poll command into `buffer`, returning the encoded length.
pub fn encode_poll(buffer: &mut [u8], station_id: u8) -> usize {
    assert!(buffer.len() >= POLL_LEN);

    buffer[0] = POLL_HEADER1;
    buffer[1] = POLL_HEADER2;
    buffer[2] = station_id;
    buffer[3] = POLL_CMD;
    buffer[4] = POLL_LENGTH;
    buffer[5] = POLL_TAIL;
    buffer[6] = command_checksum(&buffer[2..5]);
    POLL_LEN
}
