//! Identification & maintenance records 0–4. I&M0 is read-only identity;
//! I&M1–4 are controller-writable and persisted.

use crate::block::{bt, BlockReader, BlockWriter};
use crate::error::DecodeError;
use serde_derive::{Deserialize, Serialize};

/// Bit mask of supported writable records, as reported in I&M0.
pub const IM_SUPPORTED_1_4: u16 = 0x001E;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Im0 {
    pub vendor_id: u16,
    /// Order id, 20 characters on the wire.
    pub order_id: String,
    /// Serial number, 16 characters on the wire.
    pub serial_number: String,
    pub hardware_revision: u16,
    pub sw_revision_prefix: char,
    pub sw_revision_functional_enhancement: u8,
    pub sw_revision_bug_fix: u8,
    pub sw_revision_internal_change: u8,
    pub revision_counter: u16,
    pub profile_id: u16,
    pub profile_specific_type: u16,
    pub im_supported: u16,
}

impl Default for Im0 {
    fn default() -> Im0 {
        Im0 {
            vendor_id: 0,
            order_id: String::new(),
            serial_number: String::new(),
            hardware_revision: 0,
            sw_revision_prefix: 'V',
            sw_revision_functional_enhancement: 0,
            sw_revision_bug_fix: 0,
            sw_revision_internal_change: 0,
            revision_counter: 0,
            profile_id: 0,
            profile_specific_type: 0,
            im_supported: IM_SUPPORTED_1_4,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct Im1 {
    /// 32 characters on the wire.
    pub tag_function: String,
    /// 22 characters on the wire.
    pub tag_location: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct Im2 {
    /// "YYYY-MM-DD HH:MM", 16 characters on the wire.
    pub date: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct Im3 {
    /// 54 characters on the wire.
    pub descriptor: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Im4 {
    /// 54 opaque bytes.
    pub signature: Vec<u8>,
}

impl Default for Im4 {
    fn default() -> Im4 {
        Im4 {
            signature: vec![0; 54],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImRecords {
    pub im0: Im0,
    pub im1: Im1,
    pub im2: Im2,
    pub im3: Im3,
    pub im4: Im4,
}

impl Im0 {
    pub fn encode(&self, writer: &mut BlockWriter) -> std::io::Result<()> {
        let mark = writer.begin_block(bt::IM_0)?;
        writer.u16(self.vendor_id)?;
        writer.padded_string(&self.order_id, 20)?;
        writer.padded_string(&self.serial_number, 16)?;
        writer.u16(self.hardware_revision)?;
        writer.u8(self.sw_revision_prefix as u8)?;
        writer.u8(self.sw_revision_functional_enhancement)?;
        writer.u8(self.sw_revision_bug_fix)?;
        writer.u8(self.sw_revision_internal_change)?;
        writer.u16(self.revision_counter)?;
        writer.u16(self.profile_id)?;
        writer.u16(self.profile_specific_type)?;
        writer.u8(1)?; // version major
        writer.u8(1)?; // version minor
        writer.u16(self.im_supported)?;
        writer.end_block(mark)
    }
}

fn fixed_string(reader: &mut BlockReader, width: usize) -> Result<String, DecodeError> {
    let bytes = reader.bytes(width)?;
    let text = String::from_utf8(bytes).map_err(|_| DecodeError::Malformed)?;
    Ok(text.trim_end().to_string())
}

impl Im1 {
    pub fn encode(&self, writer: &mut BlockWriter) -> std::io::Result<()> {
        let mark = writer.begin_block(bt::IM_1)?;
        writer.padded_string(&self.tag_function, 32)?;
        writer.padded_string(&self.tag_location, 22)?;
        writer.end_block(mark)
    }

    pub fn decode(body: &[u8]) -> Result<Im1, DecodeError> {
        let mut reader = BlockReader::new(body);
        reader.expect_block(bt::IM_1)?;
        Ok(Im1 {
            tag_function: fixed_string(&mut reader, 32)?,
            tag_location: fixed_string(&mut reader, 22)?,
        })
    }
}

impl Im2 {
    pub fn encode(&self, writer: &mut BlockWriter) -> std::io::Result<()> {
        let mark = writer.begin_block(bt::IM_2)?;
        writer.padded_string(&self.date, 16)?;
        writer.end_block(mark)
    }

    pub fn decode(body: &[u8]) -> Result<Im2, DecodeError> {
        let mut reader = BlockReader::new(body);
        reader.expect_block(bt::IM_2)?;
        Ok(Im2 {
            date: fixed_string(&mut reader, 16)?,
        })
    }
}

impl Im3 {
    pub fn encode(&self, writer: &mut BlockWriter) -> std::io::Result<()> {
        let mark = writer.begin_block(bt::IM_3)?;
        writer.padded_string(&self.descriptor, 54)?;
        writer.end_block(mark)
    }

    pub fn decode(body: &[u8]) -> Result<Im3, DecodeError> {
        let mut reader = BlockReader::new(body);
        reader.expect_block(bt::IM_3)?;
        Ok(Im3 {
            descriptor: fixed_string(&mut reader, 54)?,
        })
    }
}

impl Im4 {
    pub fn encode(&self, writer: &mut BlockWriter) -> std::io::Result<()> {
        let mark = writer.begin_block(bt::IM_4)?;
        let mut signature = self.signature.clone();
        signature.resize(54, 0);
        writer.bytes(&signature)?;
        writer.end_block(mark)
    }

    pub fn decode(body: &[u8]) -> Result<Im4, DecodeError> {
        let mut reader = BlockReader::new(body);
        reader.expect_block(bt::IM_4)?;
        Ok(Im4 {
            signature: reader.bytes(54)?,
        })
    }
}

impl ImRecords {
    /// Serialize the writable records for persistence.
    pub fn writable_to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        let mut writer = BlockWriter::new(&mut buf);
        self.im1.encode(&mut writer).expect("buffer sized for records");
        self.im2.encode(&mut writer).expect("buffer sized for records");
        self.im3.encode(&mut writer).expect("buffer sized for records");
        self.im4.encode(&mut writer).expect("buffer sized for records");
        let used = writer.position();
        buf.truncate(used);
        buf
    }

    /// Restore the writable records; leaves defaults on parse failure.
    pub fn writable_from_bytes(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let mut offset = 0;

        let im1_len = block_total(data, offset)?;
        self.im1 = Im1::decode(&data[offset..])?;
        offset += im1_len;

        let im2_len = block_total(data, offset)?;
        self.im2 = Im2::decode(&data[offset..])?;
        offset += im2_len;

        let im3_len = block_total(data, offset)?;
        self.im3 = Im3::decode(&data[offset..])?;
        offset += im3_len;

        self.im4 = Im4::decode(&data[offset..])?;
        Ok(())
    }
}

fn block_total(data: &[u8], offset: usize) -> Result<usize, DecodeError> {
    let mut reader = BlockReader::new(&data[offset..]);
    let header = reader.header()?;
    Ok(crate::block::BLOCK_HEADER_SIZE + header.body_length())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_im0_layout() {
        let mut im0 = Im0::default();
        im0.vendor_id = 0x0493;
        im0.order_id = "FB-1".to_string();
        im0.serial_number = "0001".to_string();

        let mut buf = [0u8; 128];
        let mut writer = BlockWriter::new(&mut buf);
        im0.encode(&mut writer).unwrap();
        let used = writer.position();

        let mut reader = BlockReader::new(&buf[..used]);
        let header = reader.expect_block(bt::IM_0).unwrap();
        assert_eq!(header.body_length(), 54);
        assert_eq!(reader.u16().unwrap(), 0x0493);
    }

    #[test]
    fn test_im1_roundtrip() {
        let im1 = Im1 {
            tag_function: "conveyor".to_string(),
            tag_location: "hall 3".to_string(),
        };

        let mut buf = [0u8; 128];
        let mut writer = BlockWriter::new(&mut buf);
        im1.encode(&mut writer).unwrap();
        let used = writer.position();

        assert_eq!(Im1::decode(&buf[..used]).unwrap(), im1);
    }

    #[test]
    fn test_im4_signature_padded() {
        let im4 = Im4 {
            signature: vec![1, 2, 3],
        };

        let mut buf = [0u8; 128];
        let mut writer = BlockWriter::new(&mut buf);
        im4.encode(&mut writer).unwrap();
        let used = writer.position();

        let decoded = Im4::decode(&buf[..used]).unwrap();
        assert_eq!(decoded.signature.len(), 54);
        assert_eq!(&decoded.signature[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_writable_persistence_roundtrip() {
        let mut records = ImRecords::default();
        records.im1.tag_function = "press".to_string();
        records.im2.date = "2024-05-01 12:00".to_string();
        records.im3.descriptor = "line 7".to_string();

        let bytes = records.writable_to_bytes();

        let mut restored = ImRecords::default();
        restored.writable_from_bytes(&bytes).unwrap();

        assert_eq!(restored.im1, records.im1);
        assert_eq!(restored.im2, records.im2);
        assert_eq!(restored.im3, records.im3);
    }

    #[test]
    fn test_corrupt_persistence_refused() {
        let mut records = ImRecords::default();
        assert!(records.writable_from_bytes(&[0xFF; 10]).is_err());
    }
}
