// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use packed_struct::prelude::*;

/// Response and event codes carried by type 0x40 messages
#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq)]
pub enum MessageCode {
    ResponseNoError = 0x00,
    EventRxSearchTimeout = 0x01,
    EventRxFail = 0x02,
    EventTx = 0x03,
    EventTransferRxFailed = 0x04,
    EventTransferTxCompleted = 0x05,
    EventTransferTxFailed = 0x06,
    EventChannelClosed = 0x07,
    EventRxFailGoToSearch = 0x08,
    EventChannelCollision = 0x09,
    EventTransferTxStart = 0x0A,
    EventTransferNextDataBlock = 0x11,
    ChannelInWrongState = 0x15,
    ChannelNotOpened = 0x16,
    ChannelIdNotSet = 0x18,
    CloseAllChannels = 0x19,
    TransferInProgress = 0x1F,
    TransferSequenceNumberError = 0x20,
    TransferInError = 0x21,
    MessageSizeExceedsLimit = 0x27,
    InvalidMessage = 0x28,
    InvalidNetworkNumber = 0x29,
    InvalidListId = 0x30,
    InvalidScanTxChannel = 0x31,
    InvalidParameterProvided = 0x32,
    EventSerialQueOverflow = 0x34,
    EventQueOverflow = 0x35,
}

/// An asynchronous RF event on a channel
///
/// The second payload byte is the fixed event marker, distinguishing events
/// from command responses on the same message type.
#[derive(PackedStruct, Copy, Clone, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "3")]
pub struct ChannelEvent {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bits = "8:14")]
    _reserved0: ReservedZeroes<packed_bits::Bits<7>>,
    #[packed_field(bits = "15")]
    _reserved1: ReservedOnes<packed_bits::Bits<1>>,
    #[packed_field(bytes = "2", ty = "enum")]
    pub message_code: MessageCode,
}

impl ChannelEvent {
    pub(crate) const MSG_ID: u8 = 1;
    pub(crate) const MSG_ID_INDEX: usize = 1;
}

/// Acknowledgment for a previously issued command
///
/// `message_id` echoes the type byte of the command being acknowledged and
/// `message_code` carries its outcome.
#[derive(PackedStruct, Debug, Clone, Copy, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct ChannelResponse {
    #[packed_field(bytes = "0")]
    pub channel_number: u8,
    #[packed_field(bytes = "1")]
    pub message_id: u8,
    #[packed_field(bytes = "2", ty = "enum")]
    pub message_code: MessageCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_response() -> Result<(), PackingError> {
        let unpacked = ChannelResponse::unpack(&[1, 0x42, 0x00])?;
        assert_eq!(unpacked.channel_number, 1);
        assert_eq!(unpacked.message_id, 0x42);
        assert_eq!(unpacked.message_code, MessageCode::ResponseNoError);
        Ok(())
    }

    #[test]
    fn channel_response_payload() -> Result<(), PackingError> {
        // channel 1, acknowledged id 2, code 3
        let packed = ChannelResponse {
            channel_number: 1,
            message_id: 2,
            message_code: MessageCode::EventTx,
        };
        assert_eq!(packed.pack()?, [1, 2, 3]);
        Ok(())
    }

    #[test]
    fn channel_event() -> Result<(), PackingError> {
        let unpacked = ChannelEvent::unpack(&[2, 0x01, 0x07])?;
        assert_eq!(unpacked.channel_number, 2);
        assert_eq!(unpacked.message_code, MessageCode::EventChannelClosed);
        Ok(())
    }

    #[test]
    fn channel_event_marker_byte() -> Result<(), PackingError> {
        let event = ChannelEvent::unpack(&[0, 0x01, 0x03])?;
        assert_eq!(event.pack()?, [0, 0x01, 0x03]);
        Ok(())
    }
}
