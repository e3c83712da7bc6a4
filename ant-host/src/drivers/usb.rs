// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

// Direct USB driver for ANT sticks that expose bulk endpoints instead of a
// serial bridge

use crate::drivers::{DriverError, Transport};

use rusb::{Context, Device, DeviceHandle, Direction, Interface, TransferType, UsbContext};
use std::time::Duration;

const TRANSFER_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub enum UsbError {
    DeviceNotFound(UsbDevice),
    NoInterfaces(),
    CannotFindEndpoint(Direction),
    ContextFailure(rusb::Error),
    FailedToOpenDevice(rusb::Error),
    MissingConfig(rusb::Error),
    UnableToDetachDriver(rusb::Error),
    FailedToReset(rusb::Error),
    CantClaimIface(rusb::Error),
    Transfer(rusb::Error),
}

impl From<UsbError> for DriverError {
    fn from(err: UsbError) -> Self {
        DriverError::Usb(err)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDevice {
    pub vendor_id: u16,
    pub product_id: u16,
}

pub const USB_M_STICK: UsbDevice = UsbDevice {
    vendor_id: 0x0fcf,
    product_id: 0x1009,
};

pub const USB_2_STICK: UsbDevice = UsbDevice {
    vendor_id: 0x0fcf,
    product_id: 0x1008,
};

pub fn is_ant_usb_device(vendor_id: u16, product_id: u16) -> bool {
    matches!(
        (UsbDevice {
            vendor_id,
            product_id
        }),
        USB_M_STICK | USB_2_STICK
    )
}

fn find_endpoint(
    interface: &Interface,
    transfer_type: TransferType,
    endpoint_direction: Direction,
) -> Result<(u8, usize), UsbError> {
    for interface_desc in interface.descriptors() {
        for endpoint_desc in interface_desc.endpoint_descriptors() {
            if endpoint_desc.direction() == endpoint_direction
                && endpoint_desc.transfer_type() == transfer_type
            {
                return Ok((
                    endpoint_desc.address(),
                    endpoint_desc.max_packet_size() as usize,
                ));
            }
        }
    }
    Err(UsbError::CannotFindEndpoint(endpoint_direction))
}

struct UsbSession {
    handle: DeviceHandle<Context>,
    iface: u8,
    in_address: u8,
    out_address: u8,
    out_max_packet_size: usize,
}

/// Byte transport over bulk endpoints of a directly attached stick
/// (USB2-style sticks)
pub struct UsbTransport {
    target: UsbDevice,
    session: Option<UsbSession>,
}

impl UsbTransport {
    /// Targets the common USB2 stick; pass another [UsbDevice] via
    /// [UsbTransport::for_device] for different hardware
    pub fn new() -> Self {
        Self::for_device(USB_2_STICK)
    }

    pub fn for_device(target: UsbDevice) -> Self {
        Self {
            target,
            session: None,
        }
    }

    fn find_device(&self, context: &Context) -> Result<Device<Context>, UsbError> {
        let devices = context.devices().map_err(UsbError::ContextFailure)?;
        for device in devices.iter() {
            if let Ok(descriptor) = device.device_descriptor() {
                if descriptor.vendor_id() == self.target.vendor_id
                    && descriptor.product_id() == self.target.product_id
                {
                    return Ok(device);
                }
            }
        }
        Err(UsbError::DeviceNotFound(self.target))
    }
}

impl Default for UsbTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UsbTransport {
    fn open(&mut self) -> Result<(), DriverError> {
        let context = Context::new().map_err(UsbError::ContextFailure)?;
        let device = self.find_device(&context)?;

        let mut handle = match device.open() {
            Ok(h) => h,
            Err(e) => return Err(UsbError::FailedToOpenDevice(e).into()),
        };

        let config = match device.config_descriptor(0) {
            Ok(c) => c,
            Err(e) => return Err(UsbError::MissingConfig(e).into()),
        };

        let iface = if let Some(iface) = config.interfaces().next() {
            iface
        } else {
            return Err(UsbError::NoInterfaces().into());
        };

        let driver_active = matches!(handle.kernel_driver_active(iface.number()), Ok(true));

        let (out_address, out_max_packet_size) =
            find_endpoint(&iface, TransferType::Bulk, Direction::Out)?;

        let (in_address, _in_max_packet_size) =
            find_endpoint(&iface, TransferType::Bulk, Direction::In)?;

        if driver_active {
            if let Err(e) = handle.detach_kernel_driver(iface.number()) {
                return Err(UsbError::UnableToDetachDriver(e).into());
            };
        }

        if let Err(reset) = handle.reset() {
            return Err(UsbError::FailedToReset(reset).into());
        }

        if let Err(claim) = handle.claim_interface(iface.number()) {
            return Err(UsbError::CantClaimIface(claim).into());
        }

        self.session = Some(UsbSession {
            handle,
            iface: iface.number(),
            in_address,
            out_address,
            out_max_packet_size,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if let Some(session) = self.session.take() {
            // Reattach the kernel driver on a best-effort basis and undo the
            // usb walk
            let _ = session.handle.release_interface(session.iface);
            let _ = session.handle.attach_kernel_driver(session.iface);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let session = self.session.as_mut().ok_or(DriverError::NotOpen)?;
        match session
            .handle
            .read_bulk(session.in_address, buf, TRANSFER_TIMEOUT)
        {
            Ok(count) => Ok(count),
            Err(rusb::Error::Timeout) => Ok(0),
            Err(err) => Err(UsbError::Transfer(err).into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DriverError> {
        let session = self.session.as_mut().ok_or(DriverError::NotOpen)?;
        let mut sent = 0;
        while sent < data.len() {
            let end = std::cmp::min(data.len(), sent + session.out_max_packet_size);
            match session
                .handle
                .write_bulk(session.out_address, &data[sent..end], TRANSFER_TIMEOUT)
            {
                Ok(count) => sent += count,
                Err(rusb::Error::Timeout) => continue,
                Err(err) => return Err(UsbError::Transfer(err).into()),
            }
        }
        Ok(sent)
    }
}
