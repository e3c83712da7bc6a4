// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

mod serial;
#[cfg(feature = "usb")]
mod usb;

pub use serial::*;
#[cfg(feature = "usb")]
pub use usb::*;

use log::trace;
use std::sync::Mutex;

/// A raw byte pipe to the stick
///
/// `read` returns however many bytes arrived before the transport's own
/// timeout, zero included; a timeout is not an error. `write` blocks until
/// the device has accepted the bytes.
pub trait Transport: Send {
    fn open(&mut self) -> Result<(), DriverError>;
    fn close(&mut self) -> Result<(), DriverError>;
    fn is_open(&self) -> bool;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError>;
    fn write(&mut self, data: &[u8]) -> Result<usize, DriverError>;
}

/// Session capture hooks invoked by [Driver] around every transport call
///
/// Implementations must be cheap and must not fail; persisting the byte
/// stream verbatim is enough to replay a session later.
pub trait PacketLog: Send {
    fn log_open(&mut self) {}
    fn log_close(&mut self) {}
    fn log_read(&mut self, _data: &[u8]) {}
    fn log_write(&mut self, _data: &[u8]) {}
}

/// A [PacketLog] that dumps traffic through the `log` facade at trace level
#[derive(Default)]
pub struct HexDump {}

impl HexDump {
    fn dump(title: &str, data: &[u8]) {
        for (line, row) in data.chunks(8).enumerate() {
            let hex: Vec<String> = row.iter().map(|byte| format!("{byte:02X}")).collect();
            trace!("[{}] {:04X} {}", title, line * 8, hex.join(" "));
        }
    }
}

impl PacketLog for HexDump {
    fn log_open(&mut self) {
        trace!("[OPEN]");
    }

    fn log_close(&mut self) {
        trace!("[CLOSE]");
    }

    fn log_read(&mut self, data: &[u8]) {
        Self::dump("READ", data);
    }

    fn log_write(&mut self, data: &[u8]) {
        Self::dump("WRITE", data);
    }
}

#[derive(Debug)]
pub enum DriverError {
    AlreadyOpen,
    NotOpen,
    EmptyRead,
    EmptyWrite,
    Io(std::io::Error),
    Serial(serialport::Error),
    #[cfg(feature = "usb")]
    Usb(UsbError),
}

impl std::cmp::PartialEq for DriverError {
    fn eq(&self, other: &Self) -> bool {
        use std::mem::discriminant;
        discriminant(self) == discriminant(other)
    }
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Io(err)
    }
}

impl From<serialport::Error> for DriverError {
    fn from(err: serialport::Error) -> Self {
        DriverError::Serial(err)
    }
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::AlreadyOpen => write!(f, "device already open"),
            DriverError::NotOpen => write!(f, "device not open"),
            DriverError::EmptyRead => write!(f, "zero-length read request"),
            DriverError::EmptyWrite => write!(f, "zero-length write request"),
            DriverError::Io(err) => write!(f, "io failure: {err}"),
            DriverError::Serial(err) => write!(f, "serial failure: {err}"),
            #[cfg(feature = "usb")]
            DriverError::Usb(err) => write!(f, "usb failure: {err:?}"),
        }
    }
}

impl std::error::Error for DriverError {}

struct DriverState<T> {
    transport: T,
    log: Option<Box<dyn PacketLog>>,
}

/// Serializes transport access across threads and feeds the packet log
///
/// Exactly one lock guards the transport; it is held for the duration of a
/// single read or write and nothing else.
pub struct Driver<T: Transport> {
    state: Mutex<DriverState<T>>,
}

impl<T: Transport> Driver<T> {
    pub fn new(transport: T) -> Self {
        Self {
            state: Mutex::new(DriverState {
                transport,
                log: None,
            }),
        }
    }

    pub fn with_log(transport: T, log: Box<dyn PacketLog>) -> Self {
        Self {
            state: Mutex::new(DriverState {
                transport,
                log: Some(log),
            }),
        }
    }

    pub fn open(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        if state.transport.is_open() {
            return Err(DriverError::AlreadyOpen);
        }
        state.transport.open()?;
        if let Some(log) = &mut state.log {
            log.log_open();
        }
        Ok(())
    }

    pub fn close(&self) -> Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        if !state.transport.is_open() {
            return Err(DriverError::NotOpen);
        }
        state.transport.close()?;
        if let Some(log) = &mut state.log {
            log.log_close();
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().transport.is_open()
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize, DriverError> {
        if buf.is_empty() {
            return Err(DriverError::EmptyRead);
        }
        let mut state = self.state.lock().unwrap();
        if !state.transport.is_open() {
            return Err(DriverError::NotOpen);
        }
        let count = state.transport.read(buf)?;
        if count > 0 {
            if let Some(log) = &mut state.log {
                log.log_read(&buf[..count]);
            }
        }
        Ok(count)
    }

    pub fn write(&self, data: &[u8]) -> Result<usize, DriverError> {
        if data.is_empty() {
            return Err(DriverError::EmptyWrite);
        }
        let mut state = self.state.lock().unwrap();
        if !state.transport.is_open() {
            return Err(DriverError::NotOpen);
        }
        let count = state.transport.write(data)?;
        if let Some(log) = &mut state.log {
            log.log_write(&data[..count]);
        }
        Ok(count)
    }

    /// Tear down the driver and hand the transport back
    pub fn release(self) -> T {
        match self.state.into_inner() {
            Ok(state) => state.transport,
            Err(poisoned) => poisoned.into_inner().transport,
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    /// Scripted transport double: canned read chunks plus expected-write to
    /// canned-reply exchanges
    pub struct MockTransport {
        opened: bool,
        fail_reads: bool,
        pending: VecDeque<u8>,
        unsolicited: VecDeque<Vec<u8>>,
        exchanges: VecDeque<(Vec<u8>, Vec<u8>)>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                opened: false,
                fail_reads: false,
                pending: VecDeque::new(),
                unsolicited: VecDeque::new(),
                exchanges: VecDeque::new(),
                written: Arc::new(Mutex::new(Vec::new())),
            }
        }

        /// Every subsequent read fails, simulating a yanked stick
        pub fn fail_reads(&mut self) {
            self.fail_reads = true;
        }

        /// Bytes served by upcoming reads without any prompting write
        pub fn push_read(&mut self, bytes: &[u8]) {
            self.unsolicited.push_back(bytes.to_vec());
        }

        /// When `request` is written, `reply` becomes readable
        pub fn reply_to(&mut self, request: &[u8], reply: &[u8]) {
            self.exchanges.push_back((request.to_vec(), reply.to_vec()));
        }

        /// Shared handle for inspecting writes after the transport has been
        /// moved into a driver
        pub fn written(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
            Arc::clone(&self.written)
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self) -> Result<(), DriverError> {
            self.opened = true;
            Ok(())
        }

        fn close(&mut self) -> Result<(), DriverError> {
            self.opened = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.opened
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
            if self.fail_reads {
                return Err(DriverError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "device removed",
                )));
            }
            if self.pending.is_empty() {
                if let Some(chunk) = self.unsolicited.pop_front() {
                    self.pending.extend(chunk);
                }
            }
            if self.pending.is_empty() {
                // Stand in for the hardware read timeout
                std::thread::sleep(Duration::from_millis(1));
                return Ok(0);
            }
            let mut count = 0;
            while count < buf.len() {
                match self.pending.pop_front() {
                    Some(byte) => {
                        buf[count] = byte;
                        count += 1;
                    }
                    None => break,
                }
            }
            Ok(count)
        }

        fn write(&mut self, data: &[u8]) -> Result<usize, DriverError> {
            self.written.lock().unwrap().push(data.to_vec());
            if let Some((expected, _)) = self.exchanges.front() {
                if expected == data {
                    let (_, reply) = self.exchanges.pop_front().unwrap();
                    self.unsolicited.push_back(reply);
                }
            }
            Ok(data.len())
        }
    }
}
