// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::messages::{TransmitableMessage, TxMessage, TxMessageId};
use ant_host_derive::AntTx;
use derive_new::new;
use packed_struct::prelude::*;

/// Fixed data payload carried by every channel data message
pub const DATA_PAYLOAD_SIZE: usize = 8;

/// Represents a Broadcast Data message (0x4E)
#[derive(PackedStruct, AntTx, new, Copy, Clone, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "9")]
pub struct BroadcastData {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bytes = "1:8")]
    pub data: [u8; 8],
}

/// Represents a Acknowledged Data message (0x4F)
#[derive(PackedStruct, AntTx, new, Copy, Clone, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "9")]
pub struct AcknowledgedData {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bytes = "1:8")]
    pub data: [u8; 8],
}

/// Channel number and burst sequence count packed into the first payload
/// byte of burst transfers
#[derive(PackedStruct, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct ChannelSequence {
    #[packed_field(bits = "7:5")]
    pub sequence_number: Integer<u8, packed_bits::Bits<3>>,
    #[packed_field(bits = "4:0")]
    pub channel_number: Integer<u8, packed_bits::Bits<5>>,
}

/// Represents a Burst Transfer Data message (0x50)
#[derive(PackedStruct, AntTx, new, Copy, Clone, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "9")]
pub struct BurstTransferData {
    #[packed_field(bytes = "0")]
    pub channel_sequence: ChannelSequence,
    #[packed_field(bytes = "1:8")]
    pub data: [u8; 8],
}
