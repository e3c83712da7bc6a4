// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::messages::{AntAutoPackWithExtention, TransmitableMessage, TxMessage, TxMessageId};
use ant_host_derive::AntTx;
use derive_new::new;
use packed_struct::prelude::*;

/// Represents a UnAssign Channel Message (0x41)
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "1")]
pub struct UnAssignChannel {
    /// Channel to be unassigned
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
}

// Note, this is bit shifted 4 bits relative to the offical doc because the
// field would overlap in the channel status message. The result is the same
// just a minor mismatch compared to official docs
#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq, Default)]
pub enum ChannelType {
    #[default]
    BidirectionalSlave = 0,
    BidirectionalMaster = 1,
    SharedBidirectionalSlave = 2,
    SharedBidirectionalMaster = 3,
    SharedReceiveOnly = 4,
    MasterTransmitOnly = 5,
}

/// Mandatory fields for [AssignChannel] messages
#[derive(PackedStruct, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct AssignChannelData {
    /// Channel to be initialized
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bits = "12:15")]
    _reserved: ReservedZeroes<packed_bits::Bits<4>>,
    /// Channel type to be configured
    #[packed_field(bits = "8:11", ty = "enum")]
    pub channel_type: ChannelType,
    /// Which network key to use, set keys via [SetNetworkKey]
    #[packed_field(bytes = "2")]
    pub network_number: u8,
}

impl AssignChannelData {
    const PACKING_SIZE: usize = 3;
}

#[derive(PackedStruct, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct ExtendedAssignment {
    #[packed_field(bits = "0")]
    pub always_search: bool,
    #[packed_field(bits = "1")]
    pub ignore_transmission_type: bool,
    #[packed_field(bits = "2")]
    pub frequency_agility: bool,
    #[packed_field(bits = "3")]
    pub auto_shared_slave: bool,
    #[packed_field(bits = "4")]
    pub fast_initiation_mode: bool,
    #[packed_field(bits = "5")]
    pub async_tx_mode: bool,
    #[packed_field(bits = "6:7")]
    _reserved: ReservedZeroes<packed_bits::Bits<2>>,
}

impl ExtendedAssignment {
    const PACKING_SIZE: usize = 1;
}

/// Represents a Assign Channel message (0x42)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AssignChannel {
    /// Mandatory fields
    pub data: AssignChannelData,
    /// Optional fields
    pub extended_assignment: Option<ExtendedAssignment>,
}
AntAutoPackWithExtention!(
    AssignChannel,
    TxMessageId::AssignChannel,
    data,
    extended_assignment
);

impl AssignChannel {
    /// Constructs a new `AssignChannel`.
    pub fn new(
        channel_number: u8,
        channel_type: ChannelType,
        network_number: u8,
        extended_assignment: Option<ExtendedAssignment>,
    ) -> Self {
        Self {
            data: AssignChannelData {
                channel_number,
                channel_type,
                network_number,
                ..AssignChannelData::default()
            },
            extended_assignment,
        }
    }

    pub(crate) fn unpack_from_slice(data: &[u8]) -> Result<Self, PackingError> {
        match data.len() {
            AssignChannelData::PACKING_SIZE => Ok(Self {
                data: AssignChannelData::unpack_from_slice(data)?,
                extended_assignment: None,
            }),
            4 => Ok(Self {
                data: AssignChannelData::unpack_from_slice(
                    &data[..AssignChannelData::PACKING_SIZE],
                )?,
                extended_assignment: Some(ExtendedAssignment::unpack_from_slice(
                    &data[AssignChannelData::PACKING_SIZE..],
                )?),
            }),
            actual => Err(PackingError::BufferSizeMismatch {
                expected: AssignChannelData::PACKING_SIZE + ExtendedAssignment::PACKING_SIZE,
                actual,
            }),
        }
    }
}

#[derive(PrimitiveEnum_u8, PartialEq, Copy, Clone, Debug, Default)]
pub enum TransmissionChannelType {
    Reserved = 0b00,
    #[default]
    IndependentChannel = 0b01,
    SharedChannel1ByteAddress = 0b10,
    SharedChannel2ByteAddress = 0b11,
}

#[derive(PrimitiveEnum_u8, Clone, Copy, PartialEq, Debug, Default)]
pub enum TransmissionGlobalDataPages {
    #[default]
    GlobalDataPagesNotUsed = 0,
    GlobalDataPagesUsed = 1,
}

#[derive(PackedStruct, new, Copy, Clone, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct TransmissionType {
    #[packed_field(bits = "0:1", ty = "enum")]
    pub transmission_channel_type: TransmissionChannelType,
    #[packed_field(bits = "2", ty = "enum")]
    pub global_datapages_used: TransmissionGlobalDataPages,
    #[new(default)]
    #[packed_field(bits = "3")]
    _reserved: ReservedZeroes<packed_bits::Bits<1>>,
    #[packed_field(bits = "4:7")]
    pub device_number_extension: Integer<u8, packed_bits::Bits<4>>,
}

#[derive(PackedStruct, new, Copy, Clone, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct DeviceType {
    #[packed_field(bits = "0:6")]
    pub device_type_id: Integer<u8, packed_bits::Bits<7>>,
    #[packed_field(bits = "7")]
    pub pairing_request: bool,
}

/// Represents a Channel Id message (0x51)
///
/// This message is both RX and TX capable
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "5")]
pub struct ChannelId {
    /// Channel number to configure or from request
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    /// Device ID of channel
    ///
    /// If this is a slave channel and was wildcarded initially this will
    /// contain the master's ID once a connection is formed
    #[packed_field(bytes = "1:2")]
    pub device_number: u16,
    #[packed_field(bytes = "3")]
    pub device_type: DeviceType,
    #[packed_field(bytes = "4")]
    pub transmission_type: TransmissionType,
}

/// Represents a Channel Period message (0x43)
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct ChannelPeriod {
    /// Channel to be configured
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    /// Period to be used
    ///
    /// 32768 / message frequency = period
    #[packed_field(bytes = "1:2")]
    pub channel_period: u16,
}

/// Represents a Search Timeout message (0x44)
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct SearchTimeout {
    /// Channel to be configured
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    /// Search timeout to be set
    ///
    /// 2.5s * search_timeout = time searching
    /// 0 - no search
    /// 255 - infinite search
    #[packed_field(bytes = "1")]
    pub search_timeout: u8,
}

/// Represents a Channel RF Frequency (0x45)
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct ChannelRfFrequency {
    /// Channel to be configured
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    /// Frequency for channel to operate at
    ///
    /// 2400 MHz + rf_frequency = operating frequency
    #[packed_field(bytes = "1")]
    pub rf_frequency: u8,
}

/// Represents a Set Network Key message (0x46)
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "9")]
pub struct SetNetworkKey {
    /// Network number to be used
    ///
    /// Max value is device dependent
    #[packed_field(bytes = "0")]
    pub network_number: u8,
    /// Key to be installed
    #[packed_field(bytes = "1:8")]
    pub network_key: [u8; 8],
}

impl SetNetworkKey {
    /// Size of a network key
    pub const NETWORK_KEY_SIZE: usize = 8;
}

/// Represents a Transmit Power message (0x47)
///
/// Same as [SetChannelTransmitPower] but for all channels
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct TransmitPower {
    #[new(default)]
    #[packed_field(bytes = "0")]
    _reserved: ReservedZeroes<packed_bits::Bits<8>>,
    /// Sets TX power for all channels
    ///
    /// Dbm correlation is chip dependent, please see the chip and ANT
    /// messaging documentation
    #[packed_field(bytes = "1")]
    pub tx_power: u8,
}

/// Represents a Set Channel Transmit Power message (0x60)
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct SetChannelTransmitPower {
    /// Channel to be configured
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    /// Sets TX power for the channel
    #[packed_field(bytes = "1")]
    pub tx_power: u8,
}
