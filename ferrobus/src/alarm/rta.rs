//! RTA PDU codec for the acyclic alarm channel: the transport header with
//! its sequence/ack discipline plus the alarm notification and alarm ack
//! block payloads.

use crate::block::{bt, BlockReader, BlockWriter};
use crate::error::{DecodeError, PnioStatus};
use crate::types::SubslotKey;

/// Alarm type discriminators.
pub mod alarm_type {
    pub const DIAGNOSIS: u16 = 0x0001;
    pub const PROCESS: u16 = 0x0002;
    pub const PULL: u16 = 0x0003;
    pub const PLUG: u16 = 0x0004;
    pub const RETURN_OF_SUBMODULE: u16 = 0x000B;
    pub const DIAGNOSIS_DISAPPEARS: u16 = 0x000C;
    pub const PORT_DATA_CHANGE: u16 = 0x000E;
}

/// USI values discriminating the alarm payload shape. Values at or below
/// 0x7FFF are manufacturer specific.
pub mod usi {
    pub const CHANNEL_DIAGNOSIS: u16 = 0x8000;
    pub const EXT_CHANNEL_DIAGNOSIS: u16 = 0x8002;
    pub const QUALIFIED_CHANNEL_DIAGNOSIS: u16 = 0x8003;
}

pub const RTA_VERSION: u8 = 1;
/// add_flags: transport-ack requested.
pub const ADD_FLAGS_TACK: u8 = 0x10;
/// add_flags: window size 1.
pub const ADD_FLAGS_WINDOW_1: u8 = 0x01;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PduType {
    Data = 1,
    Nack = 2,
    Ack = 3,
    Err = 4,
}

impl PduType {
    pub fn from_u8(value: u8) -> Option<PduType> {
        match value {
            1 => Some(PduType::Data),
            2 => Some(PduType::Nack),
            3 => Some(PduType::Ack),
            4 => Some(PduType::Err),
            _ => None,
        }
    }
}

/// Transport header of every RTA PDU, directly after the frame id.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RtaHeader {
    pub dst_ref: u16,
    pub src_ref: u16,
    pub pdu_type: PduType,
    pub version: u8,
    pub add_flags: u8,
    pub send_seq: u16,
    pub ack_seq: u16,
}

impl RtaHeader {
    pub fn decode(reader: &mut BlockReader) -> Result<RtaHeader, DecodeError> {
        let dst_ref = reader.u16()?;
        let src_ref = reader.u16()?;
        let type_byte = reader.u8()?;
        let add_flags = reader.u8()?;
        let send_seq = reader.u16()?;
        let ack_seq = reader.u16()?;
        // Variable part length covers the block payload that follows.
        let _var_part_len = reader.u16()?;

        let pdu_type = PduType::from_u8(type_byte & 0x0F).ok_or(DecodeError::Malformed)?;
        let version = type_byte >> 4;
        if version != RTA_VERSION {
            return Err(DecodeError::BadVersion);
        }

        Ok(RtaHeader {
            dst_ref,
            src_ref,
            pdu_type,
            version,
            add_flags,
            send_seq,
            ack_seq,
        })
    }

    /// True when the sender requests a transport acknowledgement.
    #[inline]
    pub fn wants_tack(&self) -> bool {
        self.add_flags & ADD_FLAGS_TACK != 0
    }
}

/// Encode the transport header followed by `var_part`.
pub fn encode_rta(
    writer: &mut BlockWriter,
    header: &RtaHeader,
    var_part: &[u8],
) -> std::io::Result<()> {
    writer.u16(header.dst_ref)?;
    writer.u16(header.src_ref)?;
    writer.u8((header.version << 4) | header.pdu_type as u8)?;
    writer.u8(header.add_flags)?;
    writer.u16(header.send_seq)?;
    writer.u16(header.ack_seq)?;
    writer.u16(var_part.len() as u16)?;
    writer.bytes(var_part)
}

/// The alarm notification payload. Carried as the variable part of a DATA
/// PDU, in the high or low priority block type.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AlarmNotification {
    pub alarm_type: u16,
    pub key: SubslotKey,
    pub module_ident: u32,
    pub submodule_ident: u32,
    /// Lane-scoped sequence number plus the diagnosis state flags.
    pub specifier: u16,
    pub usi: u16,
    pub data: Vec<u8>,
}

impl AlarmNotification {
    pub fn encode(&self, writer: &mut BlockWriter, block_type: u16) -> std::io::Result<()> {
        let mark = writer.begin_block(block_type)?;
        writer.u16(self.alarm_type)?;
        writer.u32(self.key.api)?;
        writer.u16(self.key.slot)?;
        writer.u16(self.key.subslot)?;
        writer.u32(self.module_ident)?;
        writer.u32(self.submodule_ident)?;
        writer.u16(self.specifier)?;
        writer.u16(self.usi)?;
        writer.bytes(&self.data)?;
        writer.end_block(mark)
    }

    pub fn decode(reader: &mut BlockReader) -> Result<AlarmNotification, DecodeError> {
        let header = reader.header()?;
        if header.block_type != bt::ALARM_NOTIFICATION_HIGH
            && header.block_type != bt::ALARM_NOTIFICATION_LOW
        {
            return Err(DecodeError::Malformed);
        }

        let body = header.body_length();
        if body < 20 {
            return Err(DecodeError::Malformed);
        }

        let alarm_type = reader.u16()?;
        let api = reader.u32()?;
        let slot = reader.u16()?;
        let subslot = reader.u16()?;
        let module_ident = reader.u32()?;
        let submodule_ident = reader.u32()?;
        let specifier = reader.u16()?;
        let usi = reader.u16()?;
        let data = reader.bytes(body - 20)?;

        Ok(AlarmNotification {
            alarm_type,
            key: SubslotKey::new(api, slot, subslot),
            module_ident,
            submodule_ident,
            specifier,
            usi,
            data,
        })
    }
}

/// The alarm acknowledgement payload, answering a received notification.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AlarmAck {
    pub alarm_type: u16,
    pub key: SubslotKey,
    pub specifier: u16,
    pub status: PnioStatus,
}

impl AlarmAck {
    pub fn encode(&self, writer: &mut BlockWriter, block_type: u16) -> std::io::Result<()> {
        let mark = writer.begin_block(block_type)?;
        writer.u16(self.alarm_type)?;
        writer.u32(self.key.api)?;
        writer.u16(self.key.slot)?;
        writer.u16(self.key.subslot)?;
        writer.u16(self.specifier)?;
        writer.u32(self.status.to_u32())?;
        writer.end_block(mark)
    }

    pub fn decode(reader: &mut BlockReader) -> Result<AlarmAck, DecodeError> {
        let header = reader.header()?;
        if header.block_type != bt::ALARM_ACK_HIGH && header.block_type != bt::ALARM_ACK_LOW {
            return Err(DecodeError::Malformed);
        }

        let alarm_type = reader.u16()?;
        let api = reader.u32()?;
        let slot = reader.u16()?;
        let subslot = reader.u16()?;
        let specifier = reader.u16()?;
        let status = PnioStatus::from_u32(reader.u32()?);

        Ok(AlarmAck {
            alarm_type,
            key: SubslotKey::new(api, slot, subslot),
            specifier,
            status,
        })
    }
}
