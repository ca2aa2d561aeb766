//! Wire codec for the SDS011 UART protocol.
//!
//! Commands travel host to sensor as 19-byte frames:
//!
//! ```text
//! AA B4 <cmd> <d0..d11> <target_lo> <target_hi> <checksum> AB
//! ```
//!
//! Replies travel sensor to host as 10-byte frames:
//!
//! ```text
//! AA <type> <p0..p5> <checksum> AB
//! ```
//!
//! The checksum is the byte sum (mod 256) of everything between the type or
//! class marker and the checksum itself.

use embedded_io_async::Read;
use log::{debug, warn};

use crate::{
    DeviceId, Error, COMMAND_FRAME_LEN, COMMAND_ID, DATA_REPORT_ID, HEAD, REPLY_ID,
    RESPONSE_FRAME_LEN, TAIL,
};

/// Number of argument bytes in a command frame, target selector included.
pub const COMMAND_ARGS_LEN: usize = 14;

// Offset of the target selector within the argument bytes.
const TARGET_OFFSET: usize = 12;

/// Sum of all bytes, modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Builds a 19-byte command frame.
///
/// `args` holds twelve data bytes followed by the two-byte target selector.
/// When the selector is left at `00 00` it is replaced by `target`, and a zero
/// target means any device (`FF FF`). A selector already set through `args`
/// is kept as is.
pub fn encode_command(
    command: u8,
    args: &[u8; COMMAND_ARGS_LEN],
    target: DeviceId,
) -> [u8; COMMAND_FRAME_LEN] {
    let mut frame = [0u8; COMMAND_FRAME_LEN];
    frame[0] = HEAD;
    frame[1] = COMMAND_ID;
    frame[2] = command;
    frame[3..3 + COMMAND_ARGS_LEN].copy_from_slice(args);

    let selector = 3 + TARGET_OFFSET;
    if frame[selector] == 0 && frame[selector + 1] == 0 {
        let target = if target.0 == 0 { DeviceId::ANY } else { target };
        frame[selector..selector + 2].copy_from_slice(&target.to_le_bytes());
    }

    frame[17] = checksum(&frame[2..17]);
    frame[18] = TAIL;
    frame
}

/// A command frame decoded back into its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command byte.
    pub command: u8,
    /// The twelve data bytes.
    pub data: [u8; 12],
    /// Device the frame is addressed to.
    pub target: DeviceId,
}

impl CommandFrame {
    /// Parses a 19-byte command frame, checking markers and checksum.
    pub fn parse(frame: &[u8; COMMAND_FRAME_LEN]) -> Option<Self> {
        if frame[0] != HEAD
            || frame[1] != COMMAND_ID
            || frame[18] != TAIL
            || checksum(&frame[2..17]) != frame[17]
        {
            return None;
        }
        let mut data = [0u8; 12];
        data.copy_from_slice(&frame[3..15]);
        Some(CommandFrame {
            command: frame[2],
            data,
            target: DeviceId::from_le_bytes([frame[15], frame[16]]),
        })
    }
}

/// Kind of reply frame, taken from its second byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `0xC0`: PM2.5/PM10 readings.
    Measurement,
    /// `0xC5`: acknowledgment of a command.
    Ack,
}

/// A reply frame that passed the marker and checksum checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Frame type.
    pub kind: ResponseKind,
    /// The six payload bytes.
    pub payload: [u8; 6],
}

impl ResponseFrame {
    /// Validates head, tail, type and checksum of a raw 10-byte frame.
    pub fn parse(raw: &[u8; RESPONSE_FRAME_LEN]) -> Option<Self> {
        if raw[0] != HEAD || raw[9] != TAIL {
            return None;
        }
        let calculated = checksum(&raw[2..8]);
        if calculated != raw[8] {
            debug!(
                "Bad checksum: calculated {:02X}, received {:02X}. Frame: {:02X?}",
                calculated, raw[8], raw
            );
            return None;
        }
        let kind = match raw[1] {
            DATA_REPORT_ID => ResponseKind::Measurement,
            REPLY_ID => ResponseKind::Ack,
            _ => return None,
        };
        let mut payload = [0u8; 6];
        payload.copy_from_slice(&raw[2..8]);
        Some(ResponseFrame { kind, payload })
    }

    /// Command byte echoed by an acknowledgment.
    pub fn command(&self) -> u8 {
        self.payload[0]
    }

    /// Value byte of a get/set acknowledgment.
    pub fn value(&self) -> u8 {
        self.payload[2]
    }

    /// Device ID carried in the last two payload bytes.
    pub fn device_id(&self) -> DeviceId {
        DeviceId::from_le_bytes([self.payload[4], self.payload[5]])
    }
}

/// Frame reader that resynchronizes on the head marker.
///
/// Bytes preceding a head byte are dropped. Once a head byte is seen, nine
/// more bytes complete the frame. A frame the caller does not accept is
/// handed back through [`Decoder::reject`] so that scanning resumes right
/// after its head byte instead of after its tail.
#[derive(Debug, Default)]
pub struct Decoder {
    backlog: [u8; RESPONSE_FRAME_LEN],
    start: usize,
    end: usize,
}

impl Decoder {
    /// Creates a decoder with nothing buffered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the next head-aligned 10-byte frame from `reader`.
    ///
    /// Read errors are logged and retried. Only end of stream ends the wait.
    pub async fn next_frame<R: Read>(
        &mut self,
        reader: &mut R,
    ) -> Result<[u8; RESPONSE_FRAME_LEN], Error> {
        let mut skipped = 0usize;
        loop {
            let byte = self.next_byte(reader).await?;
            if byte == HEAD {
                break;
            }
            skipped += 1;
        }
        if skipped > 0 {
            debug!("Skipped {} bytes before frame head", skipped);
        }

        let mut frame = [0u8; RESPONSE_FRAME_LEN];
        frame[0] = HEAD;
        let mut filled = 1;
        while self.start < self.end && filled < RESPONSE_FRAME_LEN {
            frame[filled] = self.backlog[self.start];
            self.start += 1;
            filled += 1;
        }
        while filled < RESPONSE_FRAME_LEN {
            filled += read_some(reader, &mut frame[filled..]).await?;
        }

        debug!("Read frame: {:02X?}", frame);
        Ok(frame)
    }

    /// Queues everything after the head byte of `frame` for rescanning.
    pub fn reject(&mut self, frame: &[u8; RESPONSE_FRAME_LEN]) {
        let mut pending = [0u8; RESPONSE_FRAME_LEN];
        let mut len = 0;
        for &b in frame[1..].iter().chain(&self.backlog[self.start..self.end]) {
            if len == pending.len() {
                break;
            }
            pending[len] = b;
            len += 1;
        }
        self.backlog = pending;
        self.start = 0;
        self.end = len;
    }

    async fn next_byte<R: Read>(&mut self, reader: &mut R) -> Result<u8, Error> {
        if self.start < self.end {
            let byte = self.backlog[self.start];
            self.start += 1;
            return Ok(byte);
        }
        let mut byte = [0u8; 1];
        read_some(reader, &mut byte).await?;
        Ok(byte[0])
    }
}

// Reads at least one byte into `buf`, retrying on transport errors.
async fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, Error> {
    loop {
        match reader.read(buf).await {
            Ok(0) => return Err(Error::Disconnected),
            Ok(n) => return Ok(n),
            Err(e) => warn!("Serial read error, retrying: {:?}", e),
        }
    }
}
