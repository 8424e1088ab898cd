//! Control service codec: parameter-end, application-ready and release
//! blocks, shared between the served direction (DControl, Release) and the
//! device-originated CControl.

use crate::block::{BlockReader, BlockWriter};
use crate::error::DecodeError;
use crate::types::Uuid;

/// Control command bits.
pub mod command {
    pub const PRM_END: u16 = 0x0001;
    pub const APP_RDY: u16 = 0x0002;
    pub const RELEASE: u16 = 0x0004;
    pub const DONE: u16 = 0x0008;
    pub const PRM_BEGIN: u16 = 0x0040;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ControlBlock {
    pub block_type: u16,
    pub ar_uuid: Uuid,
    pub session_key: u16,
    pub alarm_sequence_number: u16,
    pub control_command: u16,
    pub control_block_properties: u16,
}

impl ControlBlock {
    pub fn decode(body: &[u8]) -> Result<ControlBlock, DecodeError> {
        let mut reader = BlockReader::new(body);
        let header = reader.header()?;

        reader.skip(2)?;
        let ar_uuid = reader.uuid()?;
        let session_key = reader.u16()?;
        let alarm_sequence_number = reader.u16()?;
        let control_command = reader.u16()?;
        let control_block_properties = reader.u16()?;

        Ok(ControlBlock {
            block_type: header.block_type,
            ar_uuid,
            session_key,
            alarm_sequence_number,
            control_command,
            control_block_properties,
        })
    }

    pub fn encode(&self, writer: &mut BlockWriter) -> std::io::Result<()> {
        let mark = writer.begin_block(self.block_type)?;
        writer.padding(2)?;
        writer.uuid(&self.ar_uuid)?;
        writer.u16(self.session_key)?;
        writer.u16(self.alarm_sequence_number)?;
        writer.u16(self.control_command)?;
        writer.u16(self.control_block_properties)?;
        writer.end_block(mark)
    }

    #[inline]
    pub fn has_command(&self, bit: u16) -> bool {
        self.control_command & bit != 0
    }

    /// The matching response: the command replaced by DONE and the block
    /// type moved to the response range.
    pub fn done_response(&self, response_block_type: u16) -> ControlBlock {
        ControlBlock {
            block_type: response_block_type,
            control_command: command::DONE,
            ..*self
        }
    }
}
