// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Older ANT sticks and nRF dev boards enumerate as a USB<->serial bridge and
// are driven through a plain serial device node

use crate::drivers::{DriverError, Transport};

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Byte transport over a named serial device (USB1-style sticks)
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Targets `path` (e.g. `/dev/ttyUSB0`) at the stick's stock baud rate;
    /// nothing is opened until [Transport::open]
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            baud_rate: DEFAULT_BAUD_RATE,
            port: None,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<(), DriverError> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.port = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let port = self.port.as_mut().ok_or(DriverError::NotOpen)?;
        match port.read(buf) {
            Ok(count) => Ok(count),
            Err(err) if err.kind() == ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DriverError> {
        let port = self.port.as_mut().ok_or(DriverError::NotOpen)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(data.len())
    }
}
