// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use packed_struct::prelude::*;

pub use crate::messages::config::{ChannelId, ChannelType};

#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq)]
pub enum ChannelState {
    UnAssigned = 0,
    Assigned = 1,
    Searching = 2,
    Tracking = 3,
}

/// Channel status snapshot returned for a 0x52 request
#[derive(PackedStruct, Debug, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct ChannelStatus {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bits = "8:11", ty = "enum")]
    pub channel_type: ChannelType,
    #[packed_field(bits = "12:13")]
    pub network_number: u8,
    #[packed_field(bits = "14:15", ty = "enum")]
    pub channel_state: ChannelState,
}

/// Version string reported by the stick, always nine bytes of ASCII
#[derive(PackedStruct, Debug, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "9")]
pub struct AntVersion {
    #[packed_field(bytes = "0:8")]
    pub version: [u8; 9],
}

#[derive(PackedStruct, Copy, Clone, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "4")]
pub struct BaseCapabilities {
    #[packed_field(bytes = "0")]
    pub max_ant_channels: u8,
    #[packed_field(bytes = "1")]
    pub max_networks: u8,
    #[packed_field(bytes = "2")]
    pub standard_options: StandardOptions,
    #[packed_field(bytes = "3")]
    pub advanced_options: AdvancedOptions,
}

impl BaseCapabilities {
    const PACKING_SIZE: usize = 4;
}

#[derive(PackedStruct, Copy, Clone, Debug, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct StandardOptions {
    #[packed_field(bits = "0")]
    pub no_receive_channels: bool,
    #[packed_field(bits = "1")]
    pub no_transmit_channels: bool,
    #[packed_field(bits = "2")]
    pub no_receive_messages: bool,
    #[packed_field(bits = "3")]
    pub no_transmit_messages: bool,
    #[packed_field(bits = "4")]
    pub no_acked_messages: bool,
    #[packed_field(bits = "5")]
    pub no_burst_messages: bool,
    #[packed_field(bits = "6:7")]
    _reserved: ReservedZeroes<packed_bits::Bits<2>>,
}

#[derive(PackedStruct, Copy, Clone, Debug, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct AdvancedOptions {
    #[packed_field(bits = "0")]
    _reserved: ReservedZeroes<packed_bits::Bits<1>>,
    #[packed_field(bits = "1")]
    pub network_enabled: bool,
    #[packed_field(bits = "2")]
    _reserved1: ReservedZeroes<packed_bits::Bits<1>>,
    #[packed_field(bits = "3")]
    pub serial_number_enabled: bool,
    #[packed_field(bits = "4")]
    pub per_channel_tx_power_enabled: bool,
    #[packed_field(bits = "5")]
    pub low_priority_search_enabled: bool,
    #[packed_field(bits = "6")]
    pub script_enabled: bool,
    #[packed_field(bits = "7")]
    pub search_list_enabled: bool,
}

#[derive(PackedStruct, Copy, Clone, Debug, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct AdvancedOptions2 {
    #[packed_field(bits = "0")]
    pub led_enabled: bool,
    #[packed_field(bits = "1")]
    pub ext_message_enabled: bool,
    #[packed_field(bits = "2")]
    pub scan_mode_enabled: bool,
    #[packed_field(bits = "3")]
    _reserved: ReservedZeroes<packed_bits::Bits<1>>,
    #[packed_field(bits = "4")]
    pub prox_search_enabled: bool,
    #[packed_field(bits = "5")]
    pub ext_assign_enabled: bool,
    #[packed_field(bits = "6")]
    pub fs_antfs_enabled: bool,
    #[packed_field(bits = "7")]
    pub fit1_enabled: bool,
}

#[derive(PackedStruct, Copy, Clone, Debug, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct AdvancedOptions3 {
    #[packed_field(bits = "0")]
    pub advanced_burst_enabled: bool,
    #[packed_field(bits = "1")]
    pub event_buffering_enabled: bool,
    #[packed_field(bits = "2")]
    pub event_filtering_enabled: bool,
    #[packed_field(bits = "3")]
    pub high_duty_search_enabled: bool,
    #[packed_field(bits = "4")]
    pub search_sharing_enabled: bool,
    #[packed_field(bits = "5")]
    _reserved: ReservedZeroes<packed_bits::Bits<1>>,
    #[packed_field(bits = "6")]
    pub selective_data_updates_enabled: bool,
    #[packed_field(bits = "7")]
    pub encrypted_channel_enabled: bool,
}

#[derive(PackedStruct, Copy, Clone, Debug, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct AdvancedOptions4 {
    #[packed_field(bits = "0")]
    pub rfactive_notification_enabled: bool,
    #[packed_field(bits = "1:7")]
    _reserved: ReservedZeroes<packed_bits::Bits<7>>,
}

/// The stick's self-description
///
/// Only the first four bytes are guaranteed; newer parts append further
/// option bytes, each of which may be absent on older hardware.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Capabilities {
    pub base_capabilities: BaseCapabilities,
    pub advanced_options2: Option<AdvancedOptions2>,
    pub max_sensrcore_channels: Option<u8>,
    pub advanced_options3: Option<AdvancedOptions3>,
    pub advanced_options4: Option<AdvancedOptions4>,
}

impl Capabilities {
    const MAX_PACKING_SIZE: usize = BaseCapabilities::PACKING_SIZE + 4;

    pub fn max_channels(&self) -> u8 {
        self.base_capabilities.max_ant_channels
    }

    pub fn max_networks(&self) -> u8 {
        self.base_capabilities.max_networks
    }

    pub(crate) fn unpack_from_slice(data: &[u8]) -> Result<Self, PackingError> {
        let mut rest = data;
        let base_buf = take(&mut rest, BaseCapabilities::PACKING_SIZE).ok_or(
            PackingError::BufferSizeMismatch {
                expected: BaseCapabilities::PACKING_SIZE,
                actual: data.len(),
            },
        )?;
        let base_capabilities = BaseCapabilities::unpack_from_slice(base_buf)?;

        let advanced_options2 = match take(&mut rest, 1) {
            Some(buf) => Some(AdvancedOptions2::unpack_from_slice(buf)?),
            None => None,
        };
        let max_sensrcore_channels = take(&mut rest, 1).map(|buf| buf[0]);
        let advanced_options3 = match take(&mut rest, 1) {
            Some(buf) => Some(AdvancedOptions3::unpack_from_slice(buf)?),
            None => None,
        };
        let advanced_options4 = match take(&mut rest, 1) {
            Some(buf) => Some(AdvancedOptions4::unpack_from_slice(buf)?),
            None => None,
        };

        if !rest.is_empty() {
            return Err(PackingError::BufferSizeMismatch {
                expected: Self::MAX_PACKING_SIZE,
                actual: data.len(),
            });
        }

        Ok(Capabilities {
            base_capabilities,
            advanced_options2,
            max_sensrcore_channels,
            advanced_options3,
            advanced_options4,
        })
    }
}

fn take<'a>(data: &mut &'a [u8], count: usize) -> Option<&'a [u8]> {
    if data.len() < count {
        return None;
    }
    let (head, rest) = data.split_at(count);
    *data = rest;
    Some(head)
}

/// Serial number burned into the stick
#[derive(PackedStruct, Debug, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "4")]
pub struct SerialNumber {
    #[packed_field(bytes = "0:3")]
    pub serial_number: [u8; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_capabilities() {
        let unpacked = BaseCapabilities::unpack_from_slice(&[15, 4, 0x15, 0x52]).unwrap();
        assert_eq!(unpacked.max_ant_channels, 15);
        assert_eq!(unpacked.max_networks, 4);
        assert!(unpacked.standard_options.no_receive_channels);
        assert!(!unpacked.standard_options.no_transmit_channels);
        assert!(unpacked.standard_options.no_receive_messages);
        assert!(unpacked.standard_options.no_acked_messages);
        assert!(unpacked.advanced_options.network_enabled);
        assert!(unpacked.advanced_options.per_channel_tx_power_enabled);
        assert!(unpacked.advanced_options.script_enabled);
        assert!(!unpacked.advanced_options.search_list_enabled);
    }

    #[test]
    fn capabilities_minimal() {
        let unpacked = Capabilities::unpack_from_slice(&[8, 3, 0, 0]).unwrap();
        assert_eq!(unpacked.max_channels(), 8);
        assert_eq!(unpacked.max_networks(), 3);
        assert!(unpacked.advanced_options2.is_none());
        assert!(unpacked.max_sensrcore_channels.is_none());
        assert!(unpacked.advanced_options3.is_none());
        assert!(unpacked.advanced_options4.is_none());
    }

    #[test]
    fn capabilities_with_one_option_byte() {
        let unpacked = Capabilities::unpack_from_slice(&[8, 3, 0, 0, 0x04]).unwrap();
        assert!(unpacked.advanced_options2.unwrap().scan_mode_enabled);
        assert!(unpacked.max_sensrcore_channels.is_none());
    }

    #[test]
    fn capabilities_full() {
        let unpacked =
            Capabilities::unpack_from_slice(&[16, 4, 0x15, 0x82, 4, 8, 0x40, 1]).unwrap();
        assert_eq!(unpacked.max_channels(), 16);
        assert_eq!(unpacked.max_networks(), 4);
        assert!(unpacked.advanced_options2.unwrap().scan_mode_enabled);
        assert_eq!(unpacked.max_sensrcore_channels.unwrap(), 8);
        assert!(unpacked
            .advanced_options3
            .unwrap()
            .selective_data_updates_enabled);
        assert!(unpacked
            .advanced_options4
            .unwrap()
            .rfactive_notification_enabled);
    }

    #[test]
    fn capabilities_rejects_oversized_payload() {
        assert!(Capabilities::unpack_from_slice(&[16, 4, 0, 0, 0, 0, 0, 0, 0]).is_err());
        assert!(Capabilities::unpack_from_slice(&[16, 4, 0]).is_err());
    }

    #[test]
    fn channel_status() {
        let unpacked = ChannelStatus::unpack(&[1, 0x36]).unwrap();
        assert_eq!(unpacked.channel_number, 1);
        assert_eq!(unpacked.channel_type, ChannelType::SharedBidirectionalMaster);
        assert_eq!(unpacked.network_number, 1);
        assert_eq!(unpacked.channel_state, ChannelState::Searching);
    }

    #[test]
    fn serial_number() {
        let unpacked = SerialNumber::unpack(&[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();
        assert_eq!(unpacked.serial_number, [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn ant_version() {
        let input = [b'A', b'J', b'K', b'3', b'.', b'5', b'.', b'0', 0];
        let unpacked = AntVersion::unpack_from_slice(&input).unwrap();
        assert_eq!(unpacked.version, input);
        // The version response is fixed-size
        assert!(AntVersion::unpack_from_slice(&input[..4]).is_err());
    }
}
