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

/// Represents a Reset System message (0x4A)
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "1")]
pub struct ResetSystem {
    #[new(default)]
    #[packed_field(bytes = "0")]
    filler: ReservedZeroes<packed_bits::Bits<8>>,
}

/// Represents a Open Channel message (0x4B)
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "1")]
pub struct OpenChannel {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
}

/// Represents a Close Channel message (0x4C)
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "1")]
pub struct CloseChannel {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
}

/// Responses the host can ask the stick to produce via [RequestMessage]
#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq, Default)]
pub enum RequestableMessageId {
    ChannelStatus = 0x52,
    ChannelId = 0x51,
    AntVersion = 0x3E,
    #[default]
    Capabilities = 0x54,
    SerialNumber = 0x61,
}

/// Represents a Request Message (0x4D)
#[derive(PackedStruct, AntTx, new, Clone, Copy, Debug, Default, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "2")]
pub struct RequestMessage {
    /// Channel the request applies to, 0 for stick-wide responses
    #[packed_field(bytes = "0")]
    pub channel: u8,
    #[packed_field(bytes = "1", ty = "enum")]
    pub message_id: RequestableMessageId,
}
