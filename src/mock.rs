//! Scripted in-memory serial line for tests.

use core::future::poll_fn;
use core::task::{Poll, Waker};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_io_async::{ErrorKind, ErrorType, Read, Write};

use crate::frame::checksum;
use crate::{COMMAND_FRAME_LEN, DATA_REPORT_ID, HEAD, REPLY_ID, RESPONSE_FRAME_LEN, TAIL};

/// Serial line fed from a byte script, recording everything written to it.
///
/// Reading past the end of the script reports end of stream.
#[derive(Debug, Default)]
pub struct MockSerial {
    input: VecDeque<u8>,
    pub written: Vec<u8>,
    pub reads: usize,
    pub flushes: usize,
    failing_writes: usize,
    failing_reads: usize,
}

impl MockSerial {
    pub fn with_input(bytes: &[u8]) -> Self {
        let mut serial = Self::default();
        serial.push(bytes);
        serial
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    pub fn fail_writes(&mut self, count: usize) {
        self.failing_writes = count;
    }

    pub fn fail_reads(&mut self, count: usize) {
        self.failing_reads = count;
    }

    /// Written bytes split into command frames.
    pub fn frames(&self) -> Vec<[u8; COMMAND_FRAME_LEN]> {
        self.written
            .chunks(COMMAND_FRAME_LEN)
            .map(|chunk| chunk.try_into().expect("partial command frame"))
            .collect()
    }
}

impl ErrorType for MockSerial {
    type Error = ErrorKind;
}

impl Read for MockSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.reads += 1;
        if self.failing_reads > 0 {
            self.failing_reads -= 1;
            return Err(ErrorKind::Interrupted);
        }
        let mut n = 0;
        while n < buf.len() {
            match self.input.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl Write for MockSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(ErrorKind::BrokenPipe);
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.flushes += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Line {
    input: VecDeque<u8>,
    waker: Option<Waker>,
    reads: usize,
}

/// Feeding end of a [`BlockingSerial`].
#[derive(Debug, Clone, Default)]
pub struct SharedLine(Rc<RefCell<Line>>);

impl SharedLine {
    /// Serial line whose reads stay pending until bytes are pushed here.
    pub fn serial(&self) -> BlockingSerial {
        BlockingSerial { line: self.clone() }
    }

    pub fn push(&self, bytes: &[u8]) {
        let mut line = self.0.borrow_mut();
        line.input.extend(bytes.iter().copied());
        if let Some(waker) = line.waker.take() {
            waker.wake();
        }
    }

    pub fn reads(&self) -> usize {
        self.0.borrow().reads
    }
}

/// Serial line that blocks on read while nothing is buffered.
///
/// Writes are accepted and discarded.
#[derive(Debug)]
pub struct BlockingSerial {
    line: SharedLine,
}

impl ErrorType for BlockingSerial {
    type Error = ErrorKind;
}

impl Read for BlockingSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.line.0.borrow_mut().reads += 1;
        poll_fn(|cx| {
            let mut line = self.line.0.borrow_mut();
            if line.input.is_empty() {
                line.waker = Some(cx.waker().clone());
                return Poll::Pending;
            }
            let n = buf.len().min(line.input.len());
            for (slot, b) in buf.iter_mut().zip(line.input.drain(..n)) {
                *slot = b;
            }
            Poll::Ready(Ok(n))
        })
        .await
    }
}

impl Write for BlockingSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Returns `Pending` once so the executor can poll other futures.
pub async fn yield_now() {
    let mut yielded = false;
    poll_fn(|cx| {
        if yielded {
            return Poll::Ready(());
        }
        yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    })
    .await
}

fn response(kind: u8, payload: [u8; 6]) -> [u8; RESPONSE_FRAME_LEN] {
    let mut frame = [HEAD, kind, 0, 0, 0, 0, 0, 0, 0, TAIL];
    frame[2..8].copy_from_slice(&payload);
    frame[8] = checksum(&payload);
    frame
}

/// Measurement frame with raw (tenths of µg/m³) readings.
pub fn measurement_frame(pm2_5: u16, pm10: u16, id: u16) -> [u8; RESPONSE_FRAME_LEN] {
    let [a, b] = pm2_5.to_le_bytes();
    let [c, d] = pm10.to_le_bytes();
    let [e, f] = id.to_le_bytes();
    response(DATA_REPORT_ID, [a, b, c, d, e, f])
}

/// Acknowledgment of a get/set command.
pub fn ack_frame(command: u8, action: u8, value: u8, id: u16) -> [u8; RESPONSE_FRAME_LEN] {
    let [lo, hi] = id.to_le_bytes();
    response(REPLY_ID, [command, action, value, 0, lo, hi])
}

/// Acknowledgment of the firmware query.
pub fn firmware_frame(year: u8, month: u8, day: u8, id: u16) -> [u8; RESPONSE_FRAME_LEN] {
    let [lo, hi] = id.to_le_bytes();
    response(REPLY_ID, [crate::CMD_FIRMWARE, year, month, day, lo, hi])
}
