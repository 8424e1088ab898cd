//! DCE/RPC dispatcher: header and NDR codecs, per-activity sessions with
//! fragment reassembly, and the service codecs for connect, record
//! read/write and control.

pub mod connect;
pub mod control;
pub mod dispatch;
pub mod header;
pub mod records;
pub mod session;

pub use header::{opnum, PacketType, RpcHeader, RPC_HEADER_SIZE};
pub use session::{FragOutcome, Session, SessionKind};

use crate::error::{DecodeError, PnioStatus};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// NDR argument header preceding the blocks of a request body.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct NdrRequest {
    pub args_maximum: u32,
    pub args_length: u32,
    pub maximum_count: u32,
    pub offset: u32,
    pub actual_count: u32,
}

pub const NDR_REQUEST_SIZE: usize = 20;
pub const NDR_RESPONSE_SIZE: usize = 20;

impl NdrRequest {
    pub fn decode(data: &[u8], little_endian: bool) -> Result<NdrRequest, DecodeError> {
        if data.len() < NDR_REQUEST_SIZE {
            return Err(DecodeError::EndOfInput);
        }

        let u32_at = |offset: usize| {
            if little_endian {
                LittleEndian::read_u32(&data[offset..])
            } else {
                BigEndian::read_u32(&data[offset..])
            }
        };

        Ok(NdrRequest {
            args_maximum: u32_at(0),
            args_length: u32_at(4),
            maximum_count: u32_at(8),
            offset: u32_at(12),
            actual_count: u32_at(16),
        })
    }
}

/// Build the NDR response header: status, args length and the array
/// descriptor for `body_len` bytes of blocks.
pub fn write_ndr_response(
    buf: &mut Vec<u8>,
    status: PnioStatus,
    body_len: u32,
    little_endian: bool,
) {
    let mut header = [0u8; NDR_RESPONSE_SIZE];

    let write_u32 = |buf: &mut [u8], offset: usize, value: u32| {
        if little_endian {
            LittleEndian::write_u32(&mut buf[offset..], value);
        } else {
            BigEndian::write_u32(&mut buf[offset..], value);
        }
    };

    write_u32(&mut header, 0, status.to_u32());
    write_u32(&mut header, 4, body_len);
    write_u32(&mut header, 8, body_len);
    write_u32(&mut header, 12, 0);
    write_u32(&mut header, 16, body_len);

    buf.extend_from_slice(&header);
}

/// Build the NDR request header for a device-originated request.
pub fn write_ndr_request(buf: &mut Vec<u8>, args_maximum: u32, body_len: u32) {
    let mut header = [0u8; NDR_REQUEST_SIZE];
    BigEndian::write_u32(&mut header[0..], args_maximum);
    BigEndian::write_u32(&mut header[4..], body_len);
    BigEndian::write_u32(&mut header[8..], body_len);
    BigEndian::write_u32(&mut header[12..], 0);
    BigEndian::write_u32(&mut header[16..], body_len);
    buf.extend_from_slice(&header);
}

/// Read the status out of an NDR response body.
pub fn read_ndr_status(data: &[u8], little_endian: bool) -> Result<PnioStatus, DecodeError> {
    if data.len() < 4 {
        return Err(DecodeError::EndOfInput);
    }

    let raw = if little_endian {
        LittleEndian::read_u32(data)
    } else {
        BigEndian::read_u32(data)
    };

    Ok(PnioStatus::from_u32(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndr_request_decode_both_endians() {
        let mut be = [0u8; NDR_REQUEST_SIZE];
        BigEndian::write_u32(&mut be[0..], 1024);
        BigEndian::write_u32(&mut be[4..], 100);
        BigEndian::write_u32(&mut be[8..], 100);
        BigEndian::write_u32(&mut be[16..], 100);

        let decoded = NdrRequest::decode(&be, false).unwrap();
        assert_eq!(decoded.args_maximum, 1024);
        assert_eq!(decoded.args_length, 100);

        let mut le = [0u8; NDR_REQUEST_SIZE];
        LittleEndian::write_u32(&mut le[0..], 1024);
        LittleEndian::write_u32(&mut le[4..], 100);

        let decoded = NdrRequest::decode(&le, true).unwrap();
        assert_eq!(decoded.args_maximum, 1024);
        assert_eq!(decoded.args_length, 100);
    }

    #[test]
    fn test_ndr_response_roundtrip() {
        let mut buf = Vec::new();
        let status = PnioStatus::pnio(0xDB, 0x3D, 0x00);
        write_ndr_response(&mut buf, status, 42, false);

        assert_eq!(buf.len(), NDR_RESPONSE_SIZE);
        assert_eq!(read_ndr_status(&buf, false).unwrap(), status);
        assert_eq!(BigEndian::read_u32(&buf[4..]), 42);
    }

    #[test]
    fn test_ndr_undersized() {
        assert_eq!(
            NdrRequest::decode(&[0u8; 10], false).unwrap_err(),
            DecodeError::EndOfInput
        );
        assert_eq!(
            read_ndr_status(&[0u8; 2], false).unwrap_err(),
            DecodeError::EndOfInput
        );
    }
}
