use log::debug;

use super::{response_checksum, ProtocolError, FRAME_HEADER1, FRAME_HEADER2, FRAME_LEN};

/// A complete 32-byte response frame that passed header and checksum
/// validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame([u8; FRAME_LEN]);

impl RawFrame {
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// Station ID reported by the device (byte 2).
    pub fn station_id(&self) -> u8 {
        self.0[2]
    }
}

impl TryFrom<&[u8]> for RawFrame {
    type Error = ProtocolError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != FRAME_LEN {
            return Err(ProtocolError::BadLength(bytes.len()));
        }

        if bytes[0] != FRAME_HEADER1 || bytes[1] != FRAME_HEADER2 {
            return Err(ProtocolError::BadHeader(bytes[0], bytes[1]));
        }

        let computed = response_checksum(bytes);
        if computed != bytes[FRAME_LEN - 1] {
            return Err(ProtocolError::BadChecksum {
                computed,
                found: bytes[FRAME_LEN - 1],
            });
        }

        let mut buf = [0u8; FRAME_LEN];
        buf.copy_from_slice(bytes);
        Ok(RawFrame(buf))
    }
}

/// Running counts of what the assembler has seen on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub sync_errors: u64,
    pub header_errors: u64,
    pub checksum_errors: u64,
}

/// Recovers frame boundaries from an unstructured byte stream.
///
/// The link carries no delimiter, so the two fixed header bytes act as a
/// synchronization anchor and the trailing XOR checksum is the admission
/// gate. Anything that fails either test is dropped and the search restarts
/// at the next byte; the assembler itself never fails.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: [u8; FRAME_LEN],
    cursor: usize,
    stats: FrameStats,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Feed one received byte. Returns a validated frame when `byte`
    /// completes one.
    pub fn push(&mut self, byte: u8) -> Option<RawFrame> {
        self.buf[self.cursor] = byte;
        self.cursor += 1;

        match self.cursor {
            1 => {
                if self.buf[0] != FRAME_HEADER1 {
                    self.cursor = 0;
                    self.stats.sync_errors += 1;
                    debug!("received header1 error: {:02X}", byte);
                }
                None
            }
            2 => {
                if self.buf[1] != FRAME_HEADER2 {
                    self.cursor = 0;
                    self.stats.header_errors += 1;
                    debug!("received header2 error: {:02X}", byte);
                }
                None
            }
            FRAME_LEN => {
                self.cursor = 0;

                let computed = response_checksum(&self.buf);
                if computed == self.buf[FRAME_LEN - 1] {
                    self.stats.frames += 1;
                    debug!("received valid frame: {:02X?}", &self.buf[..]);
                    Some(RawFrame(self.buf))
                } else {
                    self.stats.checksum_errors += 1;
                    debug!(
                        "received checksum error: computed {:02X}, got {:02X}",
                        computed,
                        self.buf[FRAME_LEN - 1]
                    );
                    None
                }
            }
            _ => None,
        }
    }

    /// Discard any partially assembled frame.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
