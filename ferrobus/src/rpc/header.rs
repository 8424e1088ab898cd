//! DCE/RPC v4 connectionless header codec. The header carries its own
//! endianness flag; both representations are accepted and responses mirror
//! the requester's choice. PROFINET block payloads stay big-endian
//! regardless.

use crate::error::DecodeError;
use crate::types::Uuid;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub const RPC_HEADER_SIZE: usize = 80;
pub const RPC_VERSION: u8 = 4;

/// PNIO interface version 1.0 as carried in the header.
pub const PNIO_INTERFACE_VERSION: u32 = 0x0000_0001;

pub const FLAG1_LAST_FRAGMENT: u8 = 0x02;
pub const FLAG1_FRAGMENT: u8 = 0x04;
pub const FLAG1_NO_FACK: u8 = 0x08;
pub const FLAG1_MAYBE: u8 = 0x10;
pub const FLAG1_IDEMPOTENT: u8 = 0x20;
pub const FLAG1_BROADCAST: u8 = 0x40;

/// drep[0] high nibble: 1 = little-endian integers.
const DREP_LITTLE_ENDIAN: u8 = 0x10;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PacketType {
    Request = 0,
    Ping = 1,
    Response = 2,
    Fault = 3,
    Working = 4,
    NoCall = 5,
    Reject = 6,
    Ack = 7,
    ClCancel = 8,
    FragAck = 9,
    CancelAck = 10,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<PacketType> {
        Some(match value {
            0 => PacketType::Request,
            1 => PacketType::Ping,
            2 => PacketType::Response,
            3 => PacketType::Fault,
            4 => PacketType::Working,
            5 => PacketType::NoCall,
            6 => PacketType::Reject,
            7 => PacketType::Ack,
            8 => PacketType::ClCancel,
            9 => PacketType::FragAck,
            10 => PacketType::CancelAck,
            _ => return None,
        })
    }
}

/// Device operation numbers.
pub mod opnum {
    pub const CONNECT: u16 = 0;
    pub const RELEASE: u16 = 1;
    pub const READ: u16 = 2;
    pub const WRITE: u16 = 3;
    pub const CONTROL: u16 = 4;
    pub const READ_IMPLICIT: u16 = 5;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RpcHeader {
    pub packet_type: PacketType,
    pub flags1: u8,
    pub flags2: u8,
    pub little_endian: bool,
    pub serial_high: u8,
    pub serial_low: u8,
    pub object: Uuid,
    pub interface: Uuid,
    pub activity: Uuid,
    pub server_boot: u32,
    pub interface_version: u32,
    pub seq: u32,
    pub opnum: u16,
    pub interface_hint: u16,
    pub activity_hint: u16,
    pub body_len: u16,
    pub frag_num: u16,
    pub auth_protocol: u8,
}

impl RpcHeader {
    /// A fresh header with the idle hints set.
    pub fn new(packet_type: PacketType) -> RpcHeader {
        RpcHeader {
            packet_type,
            flags1: 0,
            flags2: 0,
            little_endian: false,
            serial_high: 0,
            serial_low: 0,
            object: Uuid::NIL,
            interface: Uuid::IO_DEVICE_INTERFACE,
            activity: Uuid::NIL,
            server_boot: 0,
            interface_version: PNIO_INTERFACE_VERSION,
            seq: 0,
            opnum: 0,
            interface_hint: 0xFFFF,
            activity_hint: 0xFFFF,
            body_len: 0,
            frag_num: 0,
            auth_protocol: 0,
        }
    }

    #[inline]
    pub fn is_fragment(&self) -> bool {
        self.flags1 & FLAG1_FRAGMENT != 0
    }

    #[inline]
    pub fn is_last_fragment(&self) -> bool {
        // An unfragmented body is implicitly its own last fragment.
        !self.is_fragment() || self.flags1 & FLAG1_LAST_FRAGMENT != 0
    }

    pub fn decode(data: &[u8]) -> Result<RpcHeader, DecodeError> {
        if data.len() < RPC_HEADER_SIZE {
            return Err(DecodeError::EndOfInput);
        }
        if data[0] != RPC_VERSION {
            return Err(DecodeError::BadVersion);
        }

        let packet_type = PacketType::from_u8(data[1]).ok_or(DecodeError::Malformed)?;
        let little_endian = data[4] & 0xF0 == DREP_LITTLE_ENDIAN;

        let u32_at = |offset: usize| -> u32 {
            if little_endian {
                LittleEndian::read_u32(&data[offset..])
            } else {
                BigEndian::read_u32(&data[offset..])
            }
        };
        let u16_at = |offset: usize| -> u16 {
            if little_endian {
                LittleEndian::read_u16(&data[offset..])
            } else {
                BigEndian::read_u16(&data[offset..])
            }
        };
        let uuid_at = |offset: usize| -> Uuid {
            let mut data4 = [0u8; 8];
            data4.copy_from_slice(&data[offset + 8..offset + 16]);
            Uuid {
                data1: u32_at(offset),
                data2: u16_at(offset + 4),
                data3: u16_at(offset + 6),
                data4,
            }
        };

        Ok(RpcHeader {
            packet_type,
            flags1: data[2],
            flags2: data[3],
            little_endian,
            serial_high: data[7],
            serial_low: data[79],
            object: uuid_at(8),
            interface: uuid_at(24),
            activity: uuid_at(40),
            server_boot: u32_at(56),
            interface_version: u32_at(60),
            seq: u32_at(64),
            opnum: u16_at(68),
            interface_hint: u16_at(70),
            activity_hint: u16_at(72),
            body_len: u16_at(74),
            frag_num: u16_at(76),
            auth_protocol: data[78],
        })
    }

    pub fn encode(&self, buf: &mut [u8]) -> usize {
        debug_assert!(buf.len() >= RPC_HEADER_SIZE);

        buf[0] = RPC_VERSION;
        buf[1] = self.packet_type as u8;
        buf[2] = self.flags1;
        buf[3] = self.flags2;
        buf[4] = if self.little_endian {
            DREP_LITTLE_ENDIAN
        } else {
            0
        };
        buf[5] = 0;
        buf[6] = 0;
        buf[7] = self.serial_high;

        {
            let little_endian = self.little_endian;
            let mut write_u32 = |buf: &mut [u8], offset: usize, value: u32| {
                if little_endian {
                    LittleEndian::write_u32(&mut buf[offset..], value);
                } else {
                    BigEndian::write_u32(&mut buf[offset..], value);
                }
            };
            let mut write_u16 = |buf: &mut [u8], offset: usize, value: u16| {
                if little_endian {
                    LittleEndian::write_u16(&mut buf[offset..], value);
                } else {
                    BigEndian::write_u16(&mut buf[offset..], value);
                }
            };

            let mut write_uuid = |buf: &mut [u8], offset: usize, uuid: &Uuid| {
                if little_endian {
                    LittleEndian::write_u32(&mut buf[offset..], uuid.data1);
                    LittleEndian::write_u16(&mut buf[offset + 4..], uuid.data2);
                    LittleEndian::write_u16(&mut buf[offset + 6..], uuid.data3);
                } else {
                    BigEndian::write_u32(&mut buf[offset..], uuid.data1);
                    BigEndian::write_u16(&mut buf[offset + 4..], uuid.data2);
                    BigEndian::write_u16(&mut buf[offset + 6..], uuid.data3);
                }
                buf[offset + 8..offset + 16].copy_from_slice(&uuid.data4);
            };

            write_uuid(buf, 8, &self.object);
            write_uuid(buf, 24, &self.interface);
            write_uuid(buf, 40, &self.activity);
            write_u32(buf, 56, self.server_boot);
            write_u32(buf, 60, self.interface_version);
            write_u32(buf, 64, self.seq);
            write_u16(buf, 68, self.opnum);
            write_u16(buf, 70, self.interface_hint);
            write_u16(buf, 72, self.activity_hint);
            write_u16(buf, 74, self.body_len);
            write_u16(buf, 76, self.frag_num);
        }

        buf[78] = self.auth_protocol;
        buf[79] = self.serial_low;

        RPC_HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(little_endian: bool) -> RpcHeader {
        let mut header = RpcHeader::new(PacketType::Request);
        header.little_endian = little_endian;
        header.flags1 = FLAG1_IDEMPOTENT;
        header.object = Uuid::io_device_object(1, 2, 3);
        header.activity = Uuid::io_device_object(7, 8, 9);
        header.server_boot = 12345;
        header.seq = 99;
        header.opnum = opnum::CONNECT;
        header.body_len = 128;
        header.frag_num = 2;
        header
    }

    #[test]
    fn test_roundtrip_big_endian() {
        let header = sample(false);
        let mut buf = [0u8; RPC_HEADER_SIZE];
        header.encode(&mut buf);

        assert_eq!(RpcHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_roundtrip_little_endian() {
        let header = sample(true);
        let mut buf = [0u8; RPC_HEADER_SIZE];
        header.encode(&mut buf);

        // On-the-wire representation differs...
        assert_eq!(buf[4] & 0xF0, 0x10);
        // ...but decodes back to the same header.
        assert_eq!(RpcHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_undersized_refused() {
        assert_eq!(
            RpcHeader::decode(&[0u8; 40]).unwrap_err(),
            DecodeError::EndOfInput
        );
    }

    #[test]
    fn test_wrong_version_refused() {
        let mut buf = [0u8; RPC_HEADER_SIZE];
        sample(false).encode(&mut buf);
        buf[0] = 5;

        assert_eq!(RpcHeader::decode(&buf).unwrap_err(), DecodeError::BadVersion);
    }

    #[test]
    fn test_fragment_flags() {
        let mut header = sample(false);
        assert!(!header.is_fragment());
        assert!(header.is_last_fragment());

        header.flags1 |= FLAG1_FRAGMENT;
        assert!(header.is_fragment());
        assert!(!header.is_last_fragment());

        header.flags1 |= FLAG1_LAST_FRAGMENT;
        assert!(header.is_last_fragment());
    }
}
