//! The block-structured wire codec. Every payload the stack emits or parses
//! is a sequence of blocks: a 6-byte header (type, length, version) followed
//! by a big-endian body. Encoding is append-only into a caller-supplied
//! buffer; decoding refuses undersized input.

use crate::error::DecodeError;
use crate::types::Uuid;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

pub const BLOCK_HEADER_SIZE: usize = 6;
pub const BLOCK_VERSION_HIGH: u8 = 1;
pub const BLOCK_VERSION_LOW: u8 = 0;
/// Logbook blocks use version 1.1.
pub const BLOCK_VERSION_LOW_LOGBOOK: u8 = 1;

/// Block type values. Requests below 0x8000, device responses above.
pub mod bt {
    pub const ALARM_NOTIFICATION_HIGH: u16 = 0x0001;
    pub const ALARM_NOTIFICATION_LOW: u16 = 0x0002;
    pub const IOD_WRITE_REQ: u16 = 0x0008;
    pub const IOD_READ_REQ: u16 = 0x0009;
    pub const DIAGNOSIS_DATA: u16 = 0x0010;
    pub const EXPECTED_IDENTIFICATION_DATA: u16 = 0x0012;
    pub const REAL_IDENTIFICATION_DATA: u16 = 0x0013;
    pub const RECORD_INPUT_DATA_OBJECT: u16 = 0x0015;
    pub const RECORD_OUTPUT_DATA_OBJECT: u16 = 0x0016;
    pub const LOG_BOOK_DATA: u16 = 0x0019;
    pub const IM_0: u16 = 0x0020;
    pub const IM_1: u16 = 0x0021;
    pub const IM_2: u16 = 0x0022;
    pub const IM_3: u16 = 0x0023;
    pub const IM_4: u16 = 0x0024;
    pub const AR_BLOCK_REQ: u16 = 0x0101;
    pub const IOCR_BLOCK_REQ: u16 = 0x0102;
    pub const ALARM_CR_BLOCK_REQ: u16 = 0x0103;
    pub const EXPECTED_SUBMODULE_BLOCK: u16 = 0x0104;
    pub const PRMEND_REQ: u16 = 0x0110;
    pub const APPRDY_REQ: u16 = 0x0112;
    pub const RELEASE_BLOCK_REQ: u16 = 0x0114;
    pub const PDPORT_CHECK: u16 = 0x0200;
    pub const BOUNDARY_ADJUST: u16 = 0x0202;
    pub const CHECK_PEERS: u16 = 0x020A;
    pub const PDPORT_DATA_REAL: u16 = 0x020F;
    pub const INTERFACE_REAL_DATA: u16 = 0x0240;
    pub const MAINTENANCE_ITEM: u16 = 0x0F00;

    pub const ALARM_ACK_HIGH: u16 = 0x8001;
    pub const ALARM_ACK_LOW: u16 = 0x8002;
    pub const IOD_WRITE_RES: u16 = 0x8008;
    pub const IOD_READ_RES: u16 = 0x8009;
    pub const AR_BLOCK_RES: u16 = 0x8101;
    pub const IOCR_BLOCK_RES: u16 = 0x8102;
    pub const ALARM_CR_BLOCK_RES: u16 = 0x8103;
    pub const MODULE_DIFF_BLOCK: u16 = 0x8104;
    pub const AR_SERVER_BLOCK: u16 = 0x8106;
    pub const PRMEND_RES: u16 = 0x8110;
    pub const APPRDY_RES: u16 = 0x8112;
    pub const RELEASE_BLOCK_RES: u16 = 0x8114;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockHeader {
    pub block_type: u16,
    pub block_length: u16,
    pub version_high: u8,
    pub version_low: u8,
}

impl BlockHeader {
    /// Parse the 6-byte header. `block_length` counts the bytes following
    /// the length field, so the two version bytes are included.
    pub fn read(cursor: &mut Cursor<&[u8]>) -> Result<BlockHeader, DecodeError> {
        let header = BlockHeader {
            block_type: cursor.read_u16::<BigEndian>()?,
            block_length: cursor.read_u16::<BigEndian>()?,
            version_high: cursor.read_u8()?,
            version_low: cursor.read_u8()?,
        };

        if header.block_length < 2 {
            return Err(DecodeError::Malformed);
        }

        Ok(header)
    }

    /// Number of body bytes following the header.
    #[inline]
    pub fn body_length(&self) -> usize {
        self.block_length as usize - 2
    }
}

/// Append-only block writer over a caller-supplied buffer.
pub struct BlockWriter<'a> {
    cursor: Cursor<&'a mut [u8]>,
}

impl<'a> BlockWriter<'a> {
    #[inline]
    pub fn new(buffer: &'a mut [u8]) -> BlockWriter<'a> {
        BlockWriter {
            cursor: Cursor::new(buffer),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    /// Bytes left in the caller-supplied buffer. Block builders check this
    /// before opening a block that might not fit, instead of failing
    /// halfway through with a dangling length field.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    /// Begin a block at the current position. The length field is patched
    /// by the matching `end_block`.
    pub fn begin_block(&mut self, block_type: u16) -> std::io::Result<usize> {
        self.begin_block_versioned(block_type, BLOCK_VERSION_HIGH, BLOCK_VERSION_LOW)
    }

    pub fn begin_block_versioned(
        &mut self,
        block_type: u16,
        version_high: u8,
        version_low: u8,
    ) -> std::io::Result<usize> {
        let mark = self.position();
        self.cursor.write_u16::<BigEndian>(block_type)?;
        self.cursor.write_u16::<BigEndian>(0)?;
        self.cursor.write_u8(version_high)?;
        self.cursor.write_u8(version_low)?;
        Ok(mark)
    }

    /// Patch the length of the block opened at `mark`.
    pub fn end_block(&mut self, mark: usize) -> std::io::Result<()> {
        let end = self.position();
        let length = (end - mark - 4) as u16;

        self.cursor.set_position(mark as u64 + 2);
        self.cursor.write_u16::<BigEndian>(length)?;
        self.cursor.set_position(end as u64);
        Ok(())
    }

    #[inline]
    pub fn u8(&mut self, value: u8) -> std::io::Result<()> {
        self.cursor.write_u8(value)
    }

    #[inline]
    pub fn u16(&mut self, value: u16) -> std::io::Result<()> {
        self.cursor.write_u16::<BigEndian>(value)
    }

    #[inline]
    pub fn u32(&mut self, value: u32) -> std::io::Result<()> {
        self.cursor.write_u32::<BigEndian>(value)
    }

    #[inline]
    pub fn bytes(&mut self, value: &[u8]) -> std::io::Result<()> {
        self.cursor.write_all(value)
    }

    #[inline]
    pub fn padding(&mut self, count: usize) -> std::io::Result<()> {
        for _ in 0..count {
            self.cursor.write_u8(0)?;
        }
        Ok(())
    }

    /// Pad with zeroes until the position is a multiple of `align`,
    /// relative to `base`.
    pub fn align(&mut self, base: usize, align: usize) -> std::io::Result<()> {
        while (self.position() - base) % align != 0 {
            self.cursor.write_u8(0)?;
        }
        Ok(())
    }

    pub fn uuid(&mut self, uuid: &Uuid) -> std::io::Result<()> {
        self.cursor.write_u32::<BigEndian>(uuid.data1)?;
        self.cursor.write_u16::<BigEndian>(uuid.data2)?;
        self.cursor.write_u16::<BigEndian>(uuid.data3)?;
        self.cursor.write_all(&uuid.data4)
    }

    /// A length-prefixed, unterminated string as used by the naming blocks.
    pub fn short_string(&mut self, value: &str) -> std::io::Result<()> {
        self.cursor.write_u16::<BigEndian>(value.len() as u16)?;
        self.cursor.write_all(value.as_bytes())
    }

    /// A fixed-width string field, space padded.
    pub fn padded_string(&mut self, value: &str, width: usize) -> std::io::Result<()> {
        let bytes = value.as_bytes();
        let used = bytes.len().min(width);
        self.cursor.write_all(&bytes[..used])?;
        for _ in used..width {
            self.cursor.write_u8(b' ')?;
        }
        Ok(())
    }
}

/// Bounds-checked block reader.
pub struct BlockReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> BlockReader<'a> {
    #[inline]
    pub fn new(buffer: &'a [u8]) -> BlockReader<'a> {
        BlockReader {
            cursor: Cursor::new(buffer),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    #[inline]
    pub fn set_position(&mut self, position: usize) {
        self.cursor.set_position(position as u64);
    }

    /// Unread bytes in the input. Decoders compare this against the block
    /// length before touching the body, so undersized input surfaces as
    /// `EndOfInput` rather than a short read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    pub fn header(&mut self) -> Result<BlockHeader, DecodeError> {
        BlockHeader::read(&mut self.cursor)
    }

    /// Read a header and verify the block type and version 1.x.
    pub fn expect_block(&mut self, block_type: u16) -> Result<BlockHeader, DecodeError> {
        let header = self.header()?;

        if header.block_type != block_type {
            return Err(DecodeError::Malformed);
        }
        if header.version_high != BLOCK_VERSION_HIGH {
            return Err(DecodeError::BadVersion);
        }

        Ok(header)
    }

    #[inline]
    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.cursor.read_u8()?)
    }

    #[inline]
    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(self.cursor.read_u16::<BigEndian>()?)
    }

    #[inline]
    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(self.cursor.read_u32::<BigEndian>()?)
    }

    pub fn bytes(&mut self, count: usize) -> Result<Vec<u8>, DecodeError> {
        if self.remaining() < count {
            return Err(DecodeError::EndOfInput);
        }

        let mut out = vec![0u8; count];
        self.cursor.read_exact(&mut out)?;
        Ok(out)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), DecodeError> {
        if self.remaining() < count {
            return Err(DecodeError::EndOfInput);
        }

        self.set_position(self.position() + count);
        Ok(())
    }

    pub fn uuid(&mut self) -> Result<Uuid, DecodeError> {
        let mut data4 = [0u8; 8];
        let uuid = Uuid {
            data1: self.cursor.read_u32::<BigEndian>()?,
            data2: self.cursor.read_u16::<BigEndian>()?,
            data3: self.cursor.read_u16::<BigEndian>()?,
            data4: {
                self.cursor.read_exact(&mut data4)?;
                data4
            },
        };
        Ok(uuid)
    }

    /// Length-prefixed string; non-UTF8 input is malformed.
    pub fn short_string(&mut self) -> Result<String, DecodeError> {
        let length = self.u16()? as usize;
        let bytes = self.bytes(length)?;
        String::from_utf8(bytes).map_err(|_| DecodeError::Malformed)
    }

    /// Skip ahead until the offset from `base` is a multiple of `align`.
    pub fn align(&mut self, base: usize, align: usize) -> Result<(), DecodeError> {
        while (self.position() - base) % align != 0 {
            self.u8()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_roundtrip() {
        let mut buf = [0u8; 64];
        let mut writer = BlockWriter::new(&mut buf);

        let mark = writer.begin_block(bt::AR_BLOCK_RES).unwrap();
        writer.u16(0x1234).unwrap();
        writer.u32(0xdead_beef).unwrap();
        writer.end_block(mark).unwrap();
        let written = writer.position();

        let mut reader = BlockReader::new(&buf[..written]);
        let header = reader.expect_block(bt::AR_BLOCK_RES).unwrap();

        assert_eq!(header.block_length, 8);
        assert_eq!(header.body_length(), 6);
        assert_eq!(reader.u16().unwrap(), 0x1234);
        assert_eq!(reader.u32().unwrap(), 0xdead_beef);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_writer_capacity_tracking() {
        let mut buf = [0u8; 8];
        let mut writer = BlockWriter::new(&mut buf);

        assert_eq!(writer.free_capacity(), 8);
        writer.u32(0xdead_beef).unwrap();
        assert_eq!(writer.free_capacity(), 4);
    }

    #[test]
    fn test_undersized_header_refused() {
        let buf = [0u8; 3];
        let mut reader = BlockReader::new(&buf);

        assert_eq!(reader.header().unwrap_err(), DecodeError::EndOfInput);
    }

    #[test]
    fn test_wrong_block_type_refused() {
        let mut buf = [0u8; 16];
        let mut writer = BlockWriter::new(&mut buf);
        let mark = writer.begin_block(bt::AR_BLOCK_REQ).unwrap();
        writer.end_block(mark).unwrap();

        let mut reader = BlockReader::new(&buf);
        assert_eq!(
            reader.expect_block(bt::IOCR_BLOCK_REQ).unwrap_err(),
            DecodeError::Malformed
        );
    }

    #[test]
    fn test_bad_version_refused() {
        let mut buf = [0u8; 16];
        let mut writer = BlockWriter::new(&mut buf);
        let mark = writer
            .begin_block_versioned(bt::AR_BLOCK_REQ, 2, 0)
            .unwrap();
        writer.end_block(mark).unwrap();

        let mut reader = BlockReader::new(&buf);
        assert_eq!(
            reader.expect_block(bt::AR_BLOCK_REQ).unwrap_err(),
            DecodeError::BadVersion
        );
    }

    #[test]
    fn test_uuid_roundtrip() {
        let uuid = Uuid::io_device_object(1, 2, 3);

        let mut buf = [0u8; 16];
        let mut writer = BlockWriter::new(&mut buf);
        writer.uuid(&uuid).unwrap();

        let mut reader = BlockReader::new(&buf);
        assert_eq!(reader.uuid().unwrap(), uuid);
    }

    #[test]
    fn test_alignment() {
        let mut buf = [0u8; 8];
        let mut writer = BlockWriter::new(&mut buf);
        writer.u8(1).unwrap();
        writer.align(0, 4).unwrap();
        assert_eq!(writer.position(), 4);

        let mut reader = BlockReader::new(&buf);
        reader.u8().unwrap();
        reader.align(0, 4).unwrap();
        assert_eq!(reader.position(), 4);
    }

    #[test]
    fn test_short_string_roundtrip() {
        let mut buf = [0u8; 16];
        let mut writer = BlockWriter::new(&mut buf);
        writer.short_string("dev").unwrap();

        let mut reader = BlockReader::new(&buf);
        assert_eq!(reader.short_string().unwrap(), "dev");
    }
}
