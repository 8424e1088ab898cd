//! Bounded ring of error events, appended on every abort and readable as a
//! record. Logbook blocks are the one place the codec emits version 1.1.

use crate::block::{bt, BlockWriter, BLOCK_VERSION_HIGH, BLOCK_VERSION_LOW_LOGBOOK};
use crate::error::PnioStatus;
use crate::limits::LOGBOOK_ENTRIES;
use crate::types::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct LogbookEntry {
    /// Local time of the event in microseconds since device start.
    pub timestamp_us: u64,
    pub ar_uuid: Uuid,
    pub status: PnioStatus,
    pub entry_detail: u32,
}

pub struct Logbook {
    entries: Vec<LogbookEntry>,
}

impl Logbook {
    pub fn new() -> Logbook {
        Logbook {
            entries: Vec::with_capacity(LOGBOOK_ENTRIES),
        }
    }

    /// Append an entry, dropping the oldest once the ring is full.
    pub fn append(&mut self, entry: LogbookEntry) {
        if self.entries.len() == LOGBOOK_ENTRIES {
            self.entries.remove(0);
        }
        self.entries.push(entry);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &LogbookEntry> {
        self.entries.iter()
    }

    /// Encode the LogBookData block.
    pub fn encode(&self, writer: &mut BlockWriter, now_us: u64) -> std::io::Result<()> {
        let mark = writer.begin_block_versioned(
            bt::LOG_BOOK_DATA,
            BLOCK_VERSION_HIGH,
            BLOCK_VERSION_LOW_LOGBOOK,
        )?;

        writer.u32((now_us >> 32) as u32)?;
        writer.u32(now_us as u32)?;
        writer.u16(self.entries.len() as u16)?;

        for entry in &self.entries {
            writer.u32((entry.timestamp_us >> 32) as u32)?;
            writer.u32(entry.timestamp_us as u32)?;
            writer.uuid(&entry.ar_uuid)?;
            writer.u32(entry.status.to_u32())?;
            writer.u32(entry.entry_detail)?;
        }

        writer.end_block(mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockReader;
    use crate::error::codes;

    fn entry(timestamp_us: u64) -> LogbookEntry {
        LogbookEntry {
            timestamp_us,
            ar_uuid: Uuid::io_device_object(1, 2, 3),
            status: PnioStatus::abort(codes::ABORT_CONSUMER_DHT_EXPIRED),
            entry_detail: 0,
        }
    }

    #[test]
    fn test_ring_drops_oldest() {
        let mut logbook = Logbook::new();

        for index in 0..LOGBOOK_ENTRIES + 3 {
            logbook.append(entry(index as u64));
        }

        assert_eq!(logbook.len(), LOGBOOK_ENTRIES);
        assert_eq!(logbook.iter().next().unwrap().timestamp_us, 3);
    }

    #[test]
    fn test_block_uses_version_1_1() {
        let mut logbook = Logbook::new();
        logbook.append(entry(500));

        let mut buf = [0u8; 256];
        let mut writer = BlockWriter::new(&mut buf);
        logbook.encode(&mut writer, 1000).unwrap();
        let used = writer.position();

        let mut reader = BlockReader::new(&buf[..used]);
        let header = reader.header().unwrap();
        assert_eq!(header.block_type, bt::LOG_BOOK_DATA);
        assert_eq!(header.version_high, 1);
        assert_eq!(header.version_low, 1);

        reader.skip(8).unwrap();
        assert_eq!(reader.u16().unwrap(), 1);
    }
}
