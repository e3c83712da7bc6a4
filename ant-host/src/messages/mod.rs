// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::messages::channel::{ChannelEvent, ChannelResponse};
use crate::messages::config::{
    AssignChannel, ChannelId, ChannelPeriod, ChannelRfFrequency, SearchTimeout,
    SetChannelTransmitPower, SetNetworkKey, TransmitPower, UnAssignChannel,
};
use crate::messages::control::{CloseChannel, OpenChannel, RequestMessage, ResetSystem};
use crate::messages::data::{AcknowledgedData, BroadcastData, BurstTransferData};
use crate::messages::notifications::StartUpMessage;
use crate::messages::requested_response::{AntVersion, Capabilities, ChannelStatus, SerialNumber};

use arrayvec::ArrayVec;
use log::warn;
use packed_struct::prelude::*;

pub mod channel;
pub mod config;
pub mod control;
pub mod data;
pub mod notifications;
pub mod requested_response;

/// Largest payload the serial framing allows
pub const MAX_MESSAGE_DATA_SIZE: usize = 9;

const HEADER_SIZE: usize = 3;
const CHECKSUM_SIZE: usize = 1;

/// Largest possible on-wire frame: header, payload and checksum
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_MESSAGE_DATA_SIZE + CHECKSUM_SIZE;

/// All messages the registry can decode
///
/// The serial protocol is symmetric, so command messages decode as well as
/// the stick's own notifications and responses.
#[derive(Clone, PartialEq, Debug)]
pub enum RxMessage {
    // Notification Messages
    StartUpMessage(StartUpMessage),
    // Data Messages
    BroadcastData(BroadcastData),
    AcknowledgedData(AcknowledgedData),
    BurstTransferData(BurstTransferData),
    // Channel Messages
    ChannelEvent(ChannelEvent),
    ChannelResponse(ChannelResponse),
    // Requested Response Messages
    ChannelStatus(ChannelStatus),
    ChannelId(ChannelId),
    AntVersion(AntVersion),
    Capabilities(Capabilities),
    SerialNumber(SerialNumber),
    // Config Messages
    UnAssignChannel(UnAssignChannel),
    AssignChannel(AssignChannel),
    ChannelPeriod(ChannelPeriod),
    SearchTimeout(SearchTimeout),
    ChannelRfFrequency(ChannelRfFrequency),
    SetNetworkKey(SetNetworkKey),
    TransmitPower(TransmitPower),
    SetChannelTransmitPower(SetChannelTransmitPower),
    // Control Messages
    ResetSystem(ResetSystem),
    OpenChannel(OpenChannel),
    CloseChannel(CloseChannel),
    RequestMessage(RequestMessage),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TxMessage {
    UnAssignChannel(UnAssignChannel),
    AssignChannel(AssignChannel),
    ChannelId(ChannelId),
    ChannelPeriod(ChannelPeriod),
    SearchTimeout(SearchTimeout),
    ChannelRfFrequency(ChannelRfFrequency),
    SetNetworkKey(SetNetworkKey),
    TransmitPower(TransmitPower),
    SetChannelTransmitPower(SetChannelTransmitPower),
    ResetSystem(ResetSystem),
    OpenChannel(OpenChannel),
    CloseChannel(CloseChannel),
    RequestMessage(RequestMessage),
    BroadcastData(BroadcastData),
    AcknowledgedData(AcknowledgedData),
    BurstTransferData(BurstTransferData),
}

impl TransmitableMessage for TxMessage {
    fn serialize_message(&self, buf: &mut [u8]) -> Result<usize, PackingError> {
        match self {
            TxMessage::UnAssignChannel(uc) => uc.serialize_message(buf),
            TxMessage::AssignChannel(ac) => ac.serialize_message(buf),
            TxMessage::ChannelId(id) => id.serialize_message(buf),
            TxMessage::ChannelPeriod(cp) => cp.serialize_message(buf),
            TxMessage::SearchTimeout(st) => st.serialize_message(buf),
            TxMessage::ChannelRfFrequency(cr) => cr.serialize_message(buf),
            TxMessage::SetNetworkKey(nk) => nk.serialize_message(buf),
            TxMessage::TransmitPower(tp) => tp.serialize_message(buf),
            TxMessage::SetChannelTransmitPower(sc) => sc.serialize_message(buf),
            TxMessage::ResetSystem(rs) => rs.serialize_message(buf),
            TxMessage::OpenChannel(oc) => oc.serialize_message(buf),
            TxMessage::CloseChannel(cc) => cc.serialize_message(buf),
            TxMessage::RequestMessage(rm) => rm.serialize_message(buf),
            TxMessage::BroadcastData(bd) => bd.serialize_message(buf),
            TxMessage::AcknowledgedData(ad) => ad.serialize_message(buf),
            TxMessage::BurstTransferData(bt) => bt.serialize_message(buf),
        }
    }

    fn get_tx_msg_id(&self) -> TxMessageId {
        match self {
            TxMessage::UnAssignChannel(uc) => uc.get_tx_msg_id(),
            TxMessage::AssignChannel(ac) => ac.get_tx_msg_id(),
            TxMessage::ChannelId(id) => id.get_tx_msg_id(),
            TxMessage::ChannelPeriod(cp) => cp.get_tx_msg_id(),
            TxMessage::SearchTimeout(st) => st.get_tx_msg_id(),
            TxMessage::ChannelRfFrequency(cr) => cr.get_tx_msg_id(),
            TxMessage::SetNetworkKey(nk) => nk.get_tx_msg_id(),
            TxMessage::TransmitPower(tp) => tp.get_tx_msg_id(),
            TxMessage::SetChannelTransmitPower(sc) => sc.get_tx_msg_id(),
            TxMessage::ResetSystem(rs) => rs.get_tx_msg_id(),
            TxMessage::OpenChannel(oc) => oc.get_tx_msg_id(),
            TxMessage::CloseChannel(cc) => cc.get_tx_msg_id(),
            TxMessage::RequestMessage(rm) => rm.get_tx_msg_id(),
            TxMessage::BroadcastData(bd) => bd.get_tx_msg_id(),
            TxMessage::AcknowledgedData(ad) => ad.get_tx_msg_id(),
            TxMessage::BurstTransferData(bt) => bt.get_tx_msg_id(),
        }
    }
}

/// Represents a generic ANT radio message
#[derive(Clone, Debug, PartialEq)]
pub struct AntMessage {
    pub header: RxMessageHeader,
    pub message: RxMessage,
    /// XOR of all prior bytes should match this
    pub checksum: u8,
}

impl AntMessage {
    /// Channel number for the channel-scoped message family, [None] for
    /// messages that address the whole stick
    pub fn channel_number(&self) -> Option<u8> {
        match &self.message {
            RxMessage::BroadcastData(m) => Some(m.channel_number),
            RxMessage::AcknowledgedData(m) => Some(m.channel_number),
            RxMessage::BurstTransferData(m) => Some(m.channel_sequence.channel_number.into()),
            RxMessage::ChannelEvent(m) => Some(m.channel_number),
            RxMessage::ChannelResponse(m) => Some(m.channel_number),
            RxMessage::ChannelStatus(m) => Some(m.channel_number),
            RxMessage::ChannelId(m) => Some(m.channel_number),
            RxMessage::UnAssignChannel(m) => Some(m.channel_number),
            RxMessage::AssignChannel(m) => Some(m.data.channel_number),
            RxMessage::ChannelPeriod(m) => Some(m.channel_number),
            RxMessage::SearchTimeout(m) => Some(m.channel_number),
            RxMessage::ChannelRfFrequency(m) => Some(m.channel_number),
            RxMessage::SetChannelTransmitPower(m) => Some(m.channel_number),
            RxMessage::OpenChannel(m) => Some(m.channel_number),
            RxMessage::CloseChannel(m) => Some(m.channel_number),
            RxMessage::RequestMessage(m) => Some(m.channel),
            RxMessage::StartUpMessage(_)
            | RxMessage::AntVersion(_)
            | RxMessage::Capabilities(_)
            | RxMessage::SerialNumber(_)
            | RxMessage::SetNetworkKey(_)
            | RxMessage::TransmitPower(_)
            | RxMessage::ResetSystem(_) => None,
        }
    }
}

/// Trait for any TX message type
pub trait TransmitableMessage {
    fn serialize_message(&self, buf: &mut [u8]) -> Result<usize, PackingError>;
    fn get_tx_msg_id(&self) -> TxMessageId;
}

/// Typed extraction out of a decoded [RxMessage], used by the blocking
/// message waits
pub trait FromRxMessage: Sized {
    fn from_rx(msg: &RxMessage) -> Option<Self>;
}

macro_rules! ImplFromRxMessage {
    ($($name:ident),+ $(,)?) => {
        $(
            impl FromRxMessage for $name {
                fn from_rx(msg: &RxMessage) -> Option<Self> {
                    match msg {
                        RxMessage::$name(inner) => Some(inner.clone()),
                        _ => None,
                    }
                }
            }
        )+
    };
}

ImplFromRxMessage!(
    StartUpMessage,
    BroadcastData,
    AcknowledgedData,
    BurstTransferData,
    ChannelEvent,
    ChannelResponse,
    ChannelStatus,
    ChannelId,
    AntVersion,
    Capabilities,
    SerialNumber,
);

macro_rules! AntAutoPackWithExtention {
    ($msg_type:ident, $id:expr, $main_field:ident, $ext_field:ident) => {
        impl TransmitableMessage for $msg_type {
            fn serialize_message(&self, buf: &mut [u8]) -> Result<usize, PackingError> {
                let data_len = PackedStructSlice::packed_bytes_size(Some(&self.$main_field))?;
                self.$main_field.pack_to_slice(&mut buf[..data_len])?;

                if let Some(ext) = self.$ext_field {
                    let ext_len = PackedStructSlice::packed_bytes_size(Some(&ext))?;
                    ext.pack_to_slice(&mut buf[data_len..data_len + ext_len])?;
                    return Ok(data_len + ext_len);
                }
                Ok(data_len)
            }
            fn get_tx_msg_id(&self) -> TxMessageId {
                $id
            }
        }
        impl From<$msg_type> for TxMessage {
            fn from(msg: $msg_type) -> TxMessage {
                TxMessage::$msg_type(msg)
            }
        }
    };
}

pub(crate) use AntAutoPackWithExtention;

#[derive(PrimitiveEnum_u8, Clone, Copy, PartialEq, Debug)]
pub enum SyncByte {
    Value = 0xA4,
}

#[derive(PackedStruct, Debug, PartialEq, Clone, Copy)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct RxMessageHeader {
    #[packed_field(bytes = "0", ty = "enum")]
    pub sync: SyncByte,
    #[packed_field(bytes = "1")]
    pub msg_length: u8,
    #[packed_field(bytes = "2", ty = "enum")]
    pub msg_id: RxMessageId,
}

#[derive(PackedStruct, Debug, PartialEq)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "3")]
pub struct TxMessageHeader {
    #[packed_field(bytes = "0", ty = "enum")]
    pub sync: SyncByte,
    #[packed_field(bytes = "1")]
    pub msg_length: u8,
    #[packed_field(bytes = "2", ty = "enum")]
    pub msg_id: TxMessageId,
}

/// The closed decode registry
#[derive(PrimitiveEnum_u8, Clone, Copy, Debug, PartialEq)]
pub enum RxMessageId {
    // Notification Messages
    StartUpMessage = 0x6F,
    // Data Messages
    BroadcastData = 0x4E,
    AcknowledgedData = 0x4F,
    BurstTransferData = 0x50,
    // Channel Messages
    ChannelEvent = 0x40,
    // ChannelResponse                 = 0x40,
    // Requested Response Messages
    ChannelStatus = 0x52,
    ChannelId = 0x51,
    AntVersion = 0x3E,
    Capabilities = 0x54,
    SerialNumber = 0x61,
    // Config Messages
    UnAssignChannel = 0x41,
    AssignChannel = 0x42,
    ChannelPeriod = 0x43,
    SearchTimeout = 0x44,
    ChannelRfFrequency = 0x45,
    SetNetworkKey = 0x46,
    TransmitPower = 0x47,
    SetChannelTransmitPower = 0x60,
    // Control Messages
    ResetSystem = 0x4A,
    OpenChannel = 0x4B,
    CloseChannel = 0x4C,
    RequestMessage = 0x4D,
}

#[derive(PrimitiveEnum_u8, Clone, Copy, PartialEq, Debug)]
pub enum TxMessageId {
    // Config Messages
    UnAssignChannel = 0x41,
    AssignChannel = 0x42,
    ChannelId = 0x51,
    ChannelPeriod = 0x43,
    SearchTimeout = 0x44,
    ChannelRfFrequency = 0x45,
    SetNetworkKey = 0x46,
    TransmitPower = 0x47,
    SetChannelTransmitPower = 0x60,
    // Control Messages
    ResetSystem = 0x4A,
    OpenChannel = 0x4B,
    CloseChannel = 0x4C,
    RequestMessage = 0x4D,
    // Data Messages
    BroadcastData = 0x4E,
    AcknowledgedData = 0x4F,
    BurstTransferData = 0x50,
}

/// Frame parsing failures
///
/// [MessageError::Incomplete] is the one non-fatal kind: it tells the pump
/// to wait for more bytes instead of hunting for the next sync byte.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageError {
    Incomplete,
    InvalidSync(u8),
    InvalidLength(u8),
    ChecksumMismatch { expected: u8, actual: u8 },
    UnknownType(u8),
    InvalidPayload(PackingError),
}

impl From<PackingError> for MessageError {
    fn from(err: PackingError) -> Self {
        MessageError::InvalidPayload(err)
    }
}

impl std::fmt::Display for MessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageError::Incomplete => write!(f, "frame incomplete"),
            MessageError::InvalidSync(byte) => write!(f, "invalid sync byte 0x{byte:02X}"),
            MessageError::InvalidLength(len) => write!(f, "invalid payload length {len}"),
            MessageError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")
            }
            MessageError::UnknownType(id) => write!(f, "unknown message type 0x{id:02X}"),
            MessageError::InvalidPayload(err) => write!(f, "invalid payload: {err}"),
        }
    }
}

impl std::error::Error for MessageError {}

pub(crate) fn calculate_checksum(buf: &[u8]) -> u8 {
    buf.iter().fold(0, |acc, x| acc ^ x)
}

/// Frame a message for the wire: sync, length, id, payload, checksum
pub fn encode(msg: &dyn TransmitableMessage) -> Result<ArrayVec<u8, MAX_FRAME_SIZE>, MessageError> {
    let mut buf = [0u8; MAX_FRAME_SIZE];

    let msg_len = msg.serialize_message(&mut buf[HEADER_SIZE..HEADER_SIZE + MAX_MESSAGE_DATA_SIZE])?;
    if msg_len > MAX_MESSAGE_DATA_SIZE {
        return Err(MessageError::InvalidLength(msg_len as u8));
    }
    let header = TxMessageHeader {
        sync: SyncByte::Value,
        msg_length: msg_len as u8,
        msg_id: msg.get_tx_msg_id(),
    };
    header.pack_to_slice(&mut buf[..HEADER_SIZE])?;

    let padded_len = msg_len + HEADER_SIZE;
    buf[padded_len] = calculate_checksum(&buf[..padded_len]);

    Ok(buf[..padded_len + CHECKSUM_SIZE].iter().copied().collect())
}

/// Parse one frame from the start of `buf`
///
/// Returns the typed message and the number of bytes consumed. All errors
/// other than [MessageError::Incomplete] mean the prefix is corrupt.
pub fn decode(buf: &[u8]) -> Result<(AntMessage, usize), MessageError> {
    if buf.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(MessageError::Incomplete);
    }
    if buf[0] != SyncByte::Value as u8 {
        return Err(MessageError::InvalidSync(buf[0]));
    }
    let msg_len = buf[1] as usize;
    if msg_len > MAX_MESSAGE_DATA_SIZE {
        return Err(MessageError::InvalidLength(buf[1]));
    }
    let frame_len = HEADER_SIZE + msg_len + CHECKSUM_SIZE;
    if buf.len() < frame_len {
        return Err(MessageError::Incomplete);
    }

    let checksum = buf[frame_len - 1];
    let expected = calculate_checksum(&buf[..frame_len - 1]);
    if expected != checksum {
        return Err(MessageError::ChecksumMismatch {
            expected,
            actual: checksum,
        });
    }

    let msg_id = RxMessageId::from_primitive(buf[2]).ok_or(MessageError::UnknownType(buf[2]))?;
    let msg_slice = &buf[HEADER_SIZE..HEADER_SIZE + msg_len];

    let body = match msg_id {
        RxMessageId::StartUpMessage => {
            RxMessage::StartUpMessage(StartUpMessage::unpack_from_slice(msg_slice)?)
        }

        RxMessageId::BroadcastData => {
            RxMessage::BroadcastData(BroadcastData::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::AcknowledgedData => {
            RxMessage::AcknowledgedData(AcknowledgedData::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::BurstTransferData => {
            RxMessage::BurstTransferData(BurstTransferData::unpack_from_slice(msg_slice)?)
        }

        RxMessageId::ChannelEvent => {
            // An RF event carries the reserved event marker where a command
            // response echoes the acknowledged message id
            if msg_slice.get(ChannelEvent::MSG_ID_INDEX) == Some(&ChannelEvent::MSG_ID) {
                RxMessage::ChannelEvent(ChannelEvent::unpack_from_slice(msg_slice)?)
            } else {
                RxMessage::ChannelResponse(ChannelResponse::unpack_from_slice(msg_slice)?)
            }
        }
        RxMessageId::ChannelStatus => {
            RxMessage::ChannelStatus(ChannelStatus::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::ChannelId => RxMessage::ChannelId(ChannelId::unpack_from_slice(msg_slice)?),
        RxMessageId::AntVersion => RxMessage::AntVersion(AntVersion::unpack_from_slice(msg_slice)?),
        RxMessageId::Capabilities => {
            RxMessage::Capabilities(Capabilities::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::SerialNumber => {
            RxMessage::SerialNumber(SerialNumber::unpack_from_slice(msg_slice)?)
        }

        RxMessageId::UnAssignChannel => {
            RxMessage::UnAssignChannel(UnAssignChannel::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::AssignChannel => {
            RxMessage::AssignChannel(AssignChannel::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::ChannelPeriod => {
            RxMessage::ChannelPeriod(ChannelPeriod::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::SearchTimeout => {
            RxMessage::SearchTimeout(SearchTimeout::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::ChannelRfFrequency => {
            RxMessage::ChannelRfFrequency(ChannelRfFrequency::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::SetNetworkKey => {
            RxMessage::SetNetworkKey(SetNetworkKey::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::TransmitPower => {
            RxMessage::TransmitPower(TransmitPower::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::SetChannelTransmitPower => {
            RxMessage::SetChannelTransmitPower(SetChannelTransmitPower::unpack_from_slice(msg_slice)?)
        }

        RxMessageId::ResetSystem => {
            RxMessage::ResetSystem(ResetSystem::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::OpenChannel => {
            RxMessage::OpenChannel(OpenChannel::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::CloseChannel => {
            RxMessage::CloseChannel(CloseChannel::unpack_from_slice(msg_slice)?)
        }
        RxMessageId::RequestMessage => {
            RxMessage::RequestMessage(RequestMessage::unpack_from_slice(msg_slice)?)
        }
    };

    Ok((
        AntMessage {
            header: RxMessageHeader {
                sync: SyncByte::Value,
                msg_length: msg_len as u8,
                msg_id,
            },
            message: body,
            checksum,
        },
        frame_len,
    ))
}

/// Drain every parseable frame from the front of `buf`
///
/// Decoding stops on an incomplete tail, which stays in `buf` for the next
/// round of bytes. Any other decode failure skips forward to the next sync
/// byte, so a corrupt prefix can never stall the stream.
pub fn process_buffer(buf: &mut Vec<u8>) -> Vec<AntMessage> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        match decode(&buf[offset..]) {
            Ok((msg, used)) => {
                messages.push(msg);
                offset += used;
            }
            Err(MessageError::Incomplete) => break,
            Err(err) => {
                let skip = buf[offset + 1..]
                    .iter()
                    .position(|&b| b == SyncByte::Value as u8)
                    .map(|pos| pos + 1)
                    .unwrap_or(buf.len() - offset);
                warn!("dropping {} bytes after decode failure: {}", skip, err);
                offset += skip;
            }
        }
    }

    buf.drain(..offset);
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::channel::MessageCode;
    use crate::messages::config::ChannelType;
    use crate::messages::control::RequestableMessageId;
    use inner::inner;

    fn frame(msg_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![SyncByte::Value as u8, payload.len() as u8, msg_id];
        bytes.extend_from_slice(payload);
        bytes.push(calculate_checksum(&bytes));
        bytes
    }

    #[test]
    fn checksum() {
        let data = [0xA4, 6, 0x59, 2, 0x44, 0x33, 120, 34, 2];
        assert_eq!(calculate_checksum(&data), 214);
        // A well-formed frame XOR-folds to zero
        assert_eq!(calculate_checksum(&frame(0x42, &[0, 0, 0])), 0);
    }

    #[test]
    fn reset_frame_checksum() {
        let encoded = encode(&ResetSystem::new()).unwrap();
        assert_eq!(encoded.as_slice(), [0xA4, 0x01, 0x4A, 0x00, 0xEF]);
    }

    #[test]
    fn assign_frame_encoding() {
        let msg = AssignChannel::new(0, ChannelType::BidirectionalSlave, 0, None);
        let encoded = encode(&msg).unwrap();
        assert_eq!(
            encoded.as_slice(),
            [0xA4, 0x03, 0x42, 0x00, 0x00, 0x00, 0xE5]
        );
    }

    #[test]
    fn decode_assign_frame() {
        let (msg, used) = decode(&[0xA4, 0x03, 0x42, 0x00, 0x00, 0x00, 0xE5]).unwrap();
        assert_eq!(used, 7);
        assert_eq!(msg.header.msg_id, RxMessageId::AssignChannel);
        assert_eq!(msg.checksum, 0xE5);
        let assign = inner!(msg.message, if RxMessage::AssignChannel);
        assert_eq!(assign.data.channel_number, 0);
        assert_eq!(assign.data.channel_type, ChannelType::BidirectionalSlave);
        assert_eq!(assign.data.network_number, 0);
        assert_eq!(assign.extended_assignment, None);
    }

    #[test]
    fn decode_rejects_bad_sync() {
        assert_eq!(
            decode(&[0xA5, 0x03, 0x42, 0x00, 0x00, 0x00, 0xE5]),
            Err(MessageError::InvalidSync(0xA5))
        );
    }

    #[test]
    fn decode_rejects_oversized_length() {
        let mut bytes = vec![0xA4, 0x14, 0x42];
        bytes.extend_from_slice(&[0x00; 20]);
        bytes.push(0xE5);
        assert_eq!(decode(&bytes), Err(MessageError::InvalidLength(0x14)));
    }

    #[test]
    fn decode_rejects_bad_checksum() {
        assert_eq!(
            decode(&[0xA4, 0x03, 0x42, 0x01, 0x02, 0xF3, 0xE5]),
            Err(MessageError::ChecksumMismatch {
                expected: 0x15,
                actual: 0xE5
            })
        );
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let bytes = frame(0xFF, &[0x00, 0x00, 0x00]);
        assert_eq!(decode(&bytes), Err(MessageError::UnknownType(0xFF)));
    }

    #[test]
    fn decode_incomplete_is_not_corruption() {
        assert_eq!(decode(&[0xA4, 0x03, 0x42]), Err(MessageError::Incomplete));
        // Claims five payload bytes but the buffer holds a truncated frame
        assert_eq!(
            decode(&[0xA4, 0x05, 0x42, 0x00, 0x00, 0x00, 0x00]),
            Err(MessageError::Incomplete)
        );
    }

    #[test]
    fn round_trip() {
        let messages: Vec<TxMessage> = vec![
            ChannelPeriod::new(2, 0x2000).into(),
            SetNetworkKey::new(0, [1, 2, 3, 4, 5, 6, 7, 8]).into(),
            RequestMessage::new(0, RequestableMessageId::Capabilities).into(),
            OpenChannel::new(3).into(),
        ];
        for msg in messages {
            let encoded = encode(&msg).unwrap();
            let (decoded, used) = decode(&encoded).unwrap();
            assert_eq!(used, encoded.len());
            match (msg, decoded.message) {
                (TxMessage::ChannelPeriod(tx), RxMessage::ChannelPeriod(rx)) => assert_eq!(tx, rx),
                (TxMessage::SetNetworkKey(tx), RxMessage::SetNetworkKey(rx)) => assert_eq!(tx, rx),
                (TxMessage::RequestMessage(tx), RxMessage::RequestMessage(rx)) => {
                    assert_eq!(tx, rx)
                }
                (TxMessage::OpenChannel(tx), RxMessage::OpenChannel(rx)) => assert_eq!(tx, rx),
                (tx, rx) => panic!("variant mismatch: {:?} vs {:?}", tx, rx),
            }
        }
    }

    #[test]
    fn buffer_resync_skips_garbage() {
        let mut buf = vec![0xFF, 0xFF, 0xA4, 0x03, 0x42, 0x00, 0x00, 0x00, 0xE5];
        let messages = process_buffer(&mut buf);
        assert!(buf.is_empty());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].header.msg_id, RxMessageId::AssignChannel);
    }

    #[test]
    fn buffer_resync_after_corrupt_frame() {
        // Corrupt assign frame followed by a valid reset frame
        let mut buf = vec![0xA4, 0x03, 0x42, 0x01, 0x02, 0xF3, 0xE5];
        buf.extend_from_slice(&[0xA4, 0x01, 0x4A, 0x00, 0xEF]);
        let messages = process_buffer(&mut buf);
        assert!(buf.is_empty());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].header.msg_id, RxMessageId::ResetSystem);
    }

    #[test]
    fn buffer_keeps_incomplete_tail() {
        let mut buf = vec![0xA4, 0x03, 0x42];
        assert!(process_buffer(&mut buf).is_empty());
        assert_eq!(buf, [0xA4, 0x03, 0x42]);

        // The tail completes once the rest of the frame arrives
        buf.extend_from_slice(&[0x00, 0x00, 0x00, 0xE5]);
        let messages = process_buffer(&mut buf);
        assert!(buf.is_empty());
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn buffer_splits_back_to_back_frames() {
        let mut buf = frame(0x40, &[0x00, 0x42, 0x00]);
        buf.extend_from_slice(&frame(0x40, &[0x01, 0x01, 0x07]));
        let messages = process_buffer(&mut buf);
        assert!(buf.is_empty());
        assert_eq!(messages.len(), 2);
        let response = inner!(messages[0].message.clone(), if RxMessage::ChannelResponse);
        assert_eq!(response.message_id, 0x42);
        let event = inner!(messages[1].message.clone(), if RxMessage::ChannelEvent);
        assert_eq!(event.channel_number, 1);
        assert_eq!(event.message_code, MessageCode::EventChannelClosed);
    }

    #[test]
    fn rx_message_header() {
        let packed = RxMessageHeader {
            sync: SyncByte::Value,
            msg_length: 1,
            msg_id: RxMessageId::StartUpMessage,
        };
        assert_eq!(packed.pack().unwrap(), [0xA4, 1, 0x6F]);
    }

    #[test]
    fn tx_message_header() {
        let packed = TxMessageHeader {
            sync: SyncByte::Value,
            msg_length: 1,
            msg_id: TxMessageId::ChannelId,
        };
        assert_eq!(packed.pack().unwrap(), [0xA4, 1, 0x51]);
    }

    #[test]
    fn channel_scoped_messages_expose_their_channel() {
        let (msg, _) = decode(&frame(0x4E, &[3, 1, 2, 3, 4, 5, 6, 7, 8])).unwrap();
        assert_eq!(msg.channel_number(), Some(3));
        let (msg, _) = decode(&frame(0x6F, &[0x20])).unwrap();
        assert_eq!(msg.channel_number(), None);
    }
}
