//! Frame-id demultiplexer: a fixed table routing inbound Ethernet frames to
//! the machine that owns the frame id. Entries are registered during AR
//! setup and for the well-known DCP/alarm ids; a missing entry means the
//! frame is silently dropped by the caller.

use crate::error::{StackError, StackResult};
use crate::limits::FRAME_ID_MAP_SIZE;

/// Destination of an inbound frame. Plain data instead of function
/// pointers; the stack dispatches on the variant.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameHandler {
    /// Cyclic data consumer for one IOCR of one AR.
    CyclicData { ar: usize, cr: usize },
    /// Alarm endpoints, shared by all ARs; the RTA references select the AR.
    AlarmHigh,
    AlarmLow,
    /// The DCP endpoints.
    DcpGetSet,
    DcpIdentifyReq,
    DcpIdentifyRsp,
    DcpHello,
}

#[derive(Debug, Copy, Clone)]
struct Entry {
    frame_id: u16,
    handler: FrameHandler,
}

/// Fixed-capacity frame id table with linear lookup.
pub struct FrameIdMap {
    entries: [Option<Entry>; FRAME_ID_MAP_SIZE],
}

impl FrameIdMap {
    pub fn new() -> FrameIdMap {
        FrameIdMap {
            entries: [None; FRAME_ID_MAP_SIZE],
        }
    }

    /// Reserve an entry. No two in-use entries may share a frame id.
    pub fn register(&mut self, frame_id: u16, handler: FrameHandler) -> StackResult<()> {
        if self.lookup(frame_id).is_some() {
            return Err(StackError::AlreadyExists);
        }

        for slot in self.entries.iter_mut() {
            if slot.is_none() {
                *slot = Some(Entry { frame_id, handler });
                return Ok(());
            }
        }

        Err(StackError::OutOfResources)
    }

    /// Clear the entry for the frame id. Unknown ids are ignored.
    pub fn unregister(&mut self, frame_id: u16) {
        for slot in self.entries.iter_mut() {
            if let Some(entry) = slot {
                if entry.frame_id == frame_id {
                    *slot = None;
                    return;
                }
            }
        }
    }

    /// Drop every cyclic entry owned by the AR. The alarm and DCP entries
    /// are device-global and stay.
    pub fn unregister_ar(&mut self, ar: usize) {
        for slot in self.entries.iter_mut() {
            let matches = match slot {
                Some(Entry {
                    handler: FrameHandler::CyclicData { ar: owner, .. },
                    ..
                }) => *owner == ar,
                _ => false,
            };

            if matches {
                *slot = None;
            }
        }
    }

    #[inline]
    pub fn lookup(&self, frame_id: u16) -> Option<FrameHandler> {
        self.entries
            .iter()
            .flatten()
            .find(|entry| entry.frame_id == frame_id)
            .map(|entry| entry.handler)
    }

    /// Number of in-use entries.
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    /// True when no two in-use entries share a frame id.
    pub fn ids_unique(&self) -> bool {
        let mut seen = Vec::new();

        for entry in self.entries.iter().flatten() {
            if seen.contains(&entry.frame_id) {
                return false;
            }
            seen.push(entry.frame_id);
        }

        true
    }
}
