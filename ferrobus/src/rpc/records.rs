//! Record read/write service codec: the 64-byte request/response headers
//! framing acyclic record data.

use crate::block::{bt, BlockReader, BlockWriter};
use crate::error::{DecodeError, PnioStatus};
use crate::types::{SubslotKey, Uuid};

/// Common fields of the read/write request headers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RecordHeader {
    pub seq_number: u16,
    pub ar_uuid: Uuid,
    pub key: SubslotKey,
    pub index: u16,
    pub record_data_length: u32,
}

fn decode_common(reader: &mut BlockReader) -> Result<RecordHeader, DecodeError> {
    let seq_number = reader.u16()?;
    let ar_uuid = reader.uuid()?;
    let api = reader.u32()?;
    let slot = reader.u16()?;
    let subslot = reader.u16()?;
    reader.skip(2)?;
    let index = reader.u16()?;
    let record_data_length = reader.u32()?;

    Ok(RecordHeader {
        seq_number,
        ar_uuid,
        key: SubslotKey::new(api, slot, subslot),
        index,
        record_data_length,
    })
}

fn encode_common(writer: &mut BlockWriter, header: &RecordHeader) -> std::io::Result<()> {
    writer.u16(header.seq_number)?;
    writer.uuid(&header.ar_uuid)?;
    writer.u32(header.key.api)?;
    writer.u16(header.key.slot)?;
    writer.u16(header.key.subslot)?;
    writer.padding(2)?;
    writer.u16(header.index)?;
    writer.u32(header.record_data_length)
}

/// Parse an IODReadReqHeader block.
pub fn decode_read_request(body: &[u8]) -> Result<RecordHeader, DecodeError> {
    let mut reader = BlockReader::new(body);
    let block = reader.expect_block(bt::IOD_READ_REQ)?;
    let header = decode_common(&mut reader)?;
    // target_ar_uuid and padding complete the 64-byte header.
    reader.skip(block.body_length().saturating_sub(34))?;
    Ok(header)
}

/// Parse an IODWriteReqHeader block; the record data follows the 64-byte
/// header.
pub fn decode_write_request(body: &[u8]) -> Result<(RecordHeader, &[u8]), DecodeError> {
    let mut reader = BlockReader::new(body);
    reader.expect_block(bt::IOD_WRITE_REQ)?;
    let header = decode_common(&mut reader)?;

    // Remaining header padding up to 64 bytes total.
    reader.set_position(64);
    if body.len() < 64 + header.record_data_length as usize {
        return Err(DecodeError::EndOfInput);
    }

    let data = &body[64..64 + header.record_data_length as usize];
    Ok((header, data))
}

/// Build an IODReadResHeader plus the record data.
pub fn encode_read_response(
    writer: &mut BlockWriter,
    header: &RecordHeader,
    data: &[u8],
) -> std::io::Result<()> {
    let mark = writer.begin_block(bt::IOD_READ_RES)?;
    let mut answered = *header;
    answered.record_data_length = data.len() as u32;
    encode_common(writer, &answered)?;
    writer.u16(0)?; // additional value 1
    writer.u16(0)?; // additional value 2
    writer.padding(20)?;
    writer.end_block(mark)?;
    writer.bytes(data)
}

/// Build an IODWriteResHeader.
pub fn encode_write_response(
    writer: &mut BlockWriter,
    header: &RecordHeader,
    status: PnioStatus,
) -> std::io::Result<()> {
    let mark = writer.begin_block(bt::IOD_WRITE_RES)?;
    encode_common(writer, header)?;
    writer.u16(0)?;
    writer.u16(0)?;
    writer.u32(status.to_u32())?;
    writer.padding(16)?;
    writer.end_block(mark)
}

/// Build an IODReadReqHeader (the controller side, kept for symmetry).
pub fn encode_read_request(writer: &mut BlockWriter, header: &RecordHeader) -> std::io::Result<()> {
    let mark = writer.begin_block(bt::IOD_READ_REQ)?;
    encode_common(writer, header)?;
    writer.uuid(&Uuid::NIL)?; // target AR
    writer.padding(8)?;
    writer.end_block(mark)
}

/// Build an IODWriteReqHeader plus record data.
pub fn encode_write_request(
    writer: &mut BlockWriter,
    header: &RecordHeader,
    data: &[u8],
) -> std::io::Result<()> {
    let mark = writer.begin_block(bt::IOD_WRITE_REQ)?;
    let mut sized = *header;
    sized.record_data_length = data.len() as u32;
    encode_common(writer, &sized)?;
    writer.padding(24)?;
    writer.end_block(mark)?;
    writer.bytes(data)
}

/// Record indices served by the stack itself.
pub mod index {
    pub const USER_MAX: u16 = 0x7FFF;

    pub const SUB_EXP_ID_DATA: u16 = 0x8000;
    pub const SUB_REAL_ID_DATA: u16 = 0x8001;
    pub const SUB_DIAGNOSIS_CH: u16 = 0x800A;
    pub const SUB_DIAGNOSIS_ALL: u16 = 0x800B;
    pub const SUB_DIAGNOSIS_DMQS: u16 = 0x800C;
    pub const SUB_DIAG_MAINT_REQ: u16 = 0x8010;
    pub const SUB_DIAG_MAINT_DEM: u16 = 0x8011;
    pub const SUB_INPUT_DATA: u16 = 0x8028;
    pub const SUB_OUTPUT_DATA: u16 = 0x8029;
    pub const SUB_PDPORT_DATA_REAL: u16 = 0x802A;
    pub const SUB_PDPORT_DATA_CHECK: u16 = 0x802B;
    pub const SUB_PDPORT_DATA_ADJ: u16 = 0x802F;
    pub const SUB_PDINTF_REAL: u16 = 0x8080;

    pub const IM_0: u16 = 0xAFF0;
    pub const IM_1: u16 = 0xAFF1;
    pub const IM_2: u16 = 0xAFF2;
    pub const IM_3: u16 = 0xAFF3;
    pub const IM_4: u16 = 0xAFF4;

    pub const SLOT_DIAGNOSIS_CH: u16 = 0xC00A;
    pub const SLOT_DIAGNOSIS_ALL: u16 = 0xC00B;

    pub const AR_REAL_ID_DATA: u16 = 0xE001;
    pub const AR_MOD_DIFF: u16 = 0xE002;
    pub const AR_DIAGNOSIS_ALL: u16 = 0xE00B;

    pub const LOG_BOOK: u16 = 0xF830;
}
