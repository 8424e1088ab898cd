//! Diagnosis storage: a fixed arena of discriminated records threaded into
//! per-subslot singly-linked lists. Every mutation recomputes the subslot's
//! severity summary; alarm emission is handled by the caller so the store
//! stays free of side effects.

use crate::error::{StackError, StackResult};
use crate::ident::{DiagSummary, Subslot};
use crate::limits::{MAX_DIAG_ITEMS, MAX_MANUF_DIAG_LEN};
use girder::pool::SlotPool;

/// Maintenance classification carried in bits 9..10 of the channel
/// properties.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Maintenance {
    Fault = 0,
    Required = 1,
    Demanded = 2,
    Qualified = 3,
}

/// Appearance semantics carried in bits 11..12 of the channel properties.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Specifier {
    AllDisappears = 0,
    Appears = 1,
    Disappears = 2,
    DisappearsOthersRemain = 3,
}

/// Qualifier masks selecting the severity of qualified diagnosis.
pub const QUALIFIER_MASK_FAULT: u32 = 0xF800_0000;
pub const QUALIFIER_MASK_DEMANDED: u32 = 0x07FE_0000;
pub const QUALIFIER_MASK_REQUIRED: u32 = 0x0001_FF80;

/// The 16-bit channel properties bitfield: bits 0..7 bit width, bit 8
/// accumulative, 9..10 maintenance, 11..12 specifier, 13..15 direction.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct ChannelProperties(pub u16);

impl ChannelProperties {
    #[inline]
    pub fn maintenance(&self) -> Maintenance {
        match (self.0 >> 9) & 0x3 {
            0 => Maintenance::Fault,
            1 => Maintenance::Required,
            2 => Maintenance::Demanded,
            _ => Maintenance::Qualified,
        }
    }

    #[inline]
    pub fn specifier(&self) -> Specifier {
        match (self.0 >> 11) & 0x3 {
            0 => Specifier::AllDisappears,
            1 => Specifier::Appears,
            2 => Specifier::Disappears,
            _ => Specifier::DisappearsOthersRemain,
        }
    }

    #[inline]
    pub fn with_maintenance(self, value: Maintenance) -> ChannelProperties {
        ChannelProperties((self.0 & !(0x3 << 9)) | ((value as u16) << 9))
    }

    #[inline]
    pub fn with_specifier(self, value: Specifier) -> ChannelProperties {
        ChannelProperties((self.0 & !(0x3 << 11)) | ((value as u16) << 11))
    }
}

/// Standard channel diagnosis.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StdDiag {
    pub channel: u16,
    pub properties: ChannelProperties,
    pub error_type: u16,
    pub ext_error_type: u16,
    pub ext_value: u32,
    pub qualifier: u32,
}

/// Manufacturer-specific diagnosis, discriminated by USI in [0, 0x7FFF].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UsiDiag {
    pub usi: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DiagItem {
    Std(StdDiag),
    Usi(UsiDiag),
}

impl DiagItem {
    fn severity(&self) -> DiagSummary {
        match self {
            DiagItem::Usi(_) => DiagSummary {
                fault: true,
                ..DiagSummary::default()
            },
            DiagItem::Std(diag) => match diag.properties.maintenance() {
                Maintenance::Fault => DiagSummary {
                    fault: true,
                    ..DiagSummary::default()
                },
                Maintenance::Required => DiagSummary {
                    maintenance_required: true,
                    ..DiagSummary::default()
                },
                Maintenance::Demanded => DiagSummary {
                    maintenance_demanded: true,
                    ..DiagSummary::default()
                },
                Maintenance::Qualified => DiagSummary {
                    fault: diag.qualifier & QUALIFIER_MASK_FAULT != 0,
                    maintenance_demanded: diag.qualifier & QUALIFIER_MASK_DEMANDED != 0,
                    maintenance_required: diag.qualifier & QUALIFIER_MASK_REQUIRED != 0,
                },
            },
        }
    }
}

/// Filters used when answering read-record requests.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DiagFilter {
    /// Standard diagnosis only.
    FaultStd,
    /// Manufacturer-specific or fault.
    FaultAll,
    All,
    /// Manufacturer-specific or maintenance required.
    MaintenanceRequired,
    /// Manufacturer-specific or maintenance demanded.
    MaintenanceDemanded,
}

impl DiagFilter {
    fn accepts(&self, item: &DiagItem) -> bool {
        match (self, item) {
            (DiagFilter::All, _) => true,
            (DiagFilter::FaultStd, DiagItem::Std(_)) => true,
            (DiagFilter::FaultStd, DiagItem::Usi(_)) => false,
            (_, DiagItem::Usi(_)) => true,
            (DiagFilter::FaultAll, DiagItem::Std(_)) => item.severity().fault,
            (DiagFilter::MaintenanceRequired, DiagItem::Std(_)) => {
                item.severity().maintenance_required
            }
            (DiagFilter::MaintenanceDemanded, DiagItem::Std(_)) => {
                item.severity().maintenance_demanded
            }
        }
    }
}

/// Outcome of an upsert, used by the caller to pick the alarm specifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DiagChange {
    Added,
    Updated,
}

#[derive(Debug)]
struct Node {
    item: DiagItem,
    next: Option<usize>,
}

/// Arena-backed diagnosis store shared by all subslots.
pub struct DiagStore {
    arena: SlotPool<Node>,
}

impl DiagStore {
    pub fn new() -> DiagStore {
        DiagStore {
            arena: SlotPool::with_capacity(MAX_DIAG_ITEMS),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Upsert a standard record keyed by (channel, error_type,
    /// ext_error_type). An existing record only has its value and qualifier
    /// replaced.
    pub fn add_std(&mut self, sub: &mut Subslot, diag: StdDiag) -> StackResult<DiagChange> {
        let found = self.find_std(sub, diag.channel, diag.error_type, diag.ext_error_type);

        let change = match found {
            Some(index) => {
                if let Some(Node {
                    item: DiagItem::Std(existing),
                    ..
                }) = self.arena.get_mut(index)
                {
                    existing.ext_value = diag.ext_value;
                    existing.qualifier = diag.qualifier;
                    existing.properties = diag.properties;
                }
                DiagChange::Updated
            }
            None => {
                self.link_front(sub, DiagItem::Std(diag))?;
                DiagChange::Added
            }
        };

        self.recompute_summary(sub);
        Ok(change)
    }

    /// Update an existing standard record; refuses when not present.
    pub fn update_std(&mut self, sub: &mut Subslot, diag: StdDiag) -> StackResult<()> {
        match self.find_std(sub, diag.channel, diag.error_type, diag.ext_error_type) {
            Some(_) => {
                self.add_std(sub, diag)?;
                Ok(())
            }
            None => Err(StackError::NotFound),
        }
    }

    /// Unlink a standard record and return it to the free list.
    pub fn remove_std(
        &mut self,
        sub: &mut Subslot,
        channel: u16,
        error_type: u16,
        ext_error_type: u16,
    ) -> StackResult<StdDiag> {
        let index = self
            .find_std(sub, channel, error_type, ext_error_type)
            .ok_or(StackError::NotFound)?;

        let item = self.unlink(sub, index);
        self.recompute_summary(sub);

        match item {
            Some(DiagItem::Std(diag)) => Ok(diag),
            _ => Err(StackError::NotFound),
        }
    }

    /// Upsert a manufacturer record: one record per USI per subslot.
    pub fn add_usi(&mut self, sub: &mut Subslot, usi: u16, data: &[u8]) -> StackResult<DiagChange> {
        if usi > 0x7FFF || data.len() > MAX_MANUF_DIAG_LEN {
            return Err(StackError::InvalidArgument);
        }

        let change = match self.find_usi(sub, usi) {
            Some(index) => {
                if let Some(Node {
                    item: DiagItem::Usi(existing),
                    ..
                }) = self.arena.get_mut(index)
                {
                    existing.data = data.to_vec();
                }
                DiagChange::Updated
            }
            None => {
                self.link_front(
                    sub,
                    DiagItem::Usi(UsiDiag {
                        usi,
                        data: data.to_vec(),
                    }),
                )?;
                DiagChange::Added
            }
        };

        self.recompute_summary(sub);
        Ok(change)
    }

    pub fn update_usi(&mut self, sub: &mut Subslot, usi: u16, data: &[u8]) -> StackResult<()> {
        match self.find_usi(sub, usi) {
            Some(_) => {
                self.add_usi(sub, usi, data)?;
                Ok(())
            }
            None => Err(StackError::NotFound),
        }
    }

    pub fn remove_usi(&mut self, sub: &mut Subslot, usi: u16) -> StackResult<UsiDiag> {
        let index = self.find_usi(sub, usi).ok_or(StackError::NotFound)?;

        let item = self.unlink(sub, index);
        self.recompute_summary(sub);

        match item {
            Some(DiagItem::Usi(diag)) => Ok(diag),
            _ => Err(StackError::NotFound),
        }
    }

    /// Enumerate the records matching the filter, list order.
    pub fn traverse<F: FnMut(&DiagItem)>(&self, sub: &Subslot, filter: DiagFilter, mut visit: F) {
        let mut cursor = sub.diag_head;

        while let Some(index) = cursor {
            match self.arena.get(index) {
                Some(node) => {
                    if filter.accepts(&node.item) {
                        visit(&node.item);
                    }
                    cursor = node.next;
                }
                None => break,
            }
        }
    }

    /// Release the whole chain, for submodule pull.
    pub fn clear_subslot(&mut self, sub: &mut Subslot) {
        let mut cursor = sub.diag_head.take();

        while let Some(index) = cursor {
            cursor = self.arena.reclaim(index).and_then(|node| node.next);
        }

        sub.summary = DiagSummary::default();
    }

    fn link_front(&mut self, sub: &mut Subslot, item: DiagItem) -> StackResult<usize> {
        let node = Node {
            item,
            next: sub.diag_head,
        };

        let index = self.arena.alloc(node).ok_or(StackError::OutOfResources)?;
        sub.diag_head = Some(index);
        Ok(index)
    }

    fn unlink(&mut self, sub: &mut Subslot, target: usize) -> Option<DiagItem> {
        let mut cursor = sub.diag_head;
        let mut prev: Option<usize> = None;

        while let Some(index) = cursor {
            let next = self.arena.get(index)?.next;

            if index == target {
                match prev {
                    None => sub.diag_head = next,
                    Some(prev_index) => {
                        if let Some(node) = self.arena.get_mut(prev_index) {
                            node.next = next;
                        }
                    }
                }
                return self.arena.reclaim(index).map(|node| node.item);
            }

            prev = Some(index);
            cursor = next;
        }

        None
    }

    fn find_std(
        &self,
        sub: &Subslot,
        channel: u16,
        error_type: u16,
        ext_error_type: u16,
    ) -> Option<usize> {
        self.find(sub, |item| match item {
            DiagItem::Std(diag) => {
                diag.channel == channel
                    && diag.error_type == error_type
                    && diag.ext_error_type == ext_error_type
            }
            _ => false,
        })
    }

    fn find_usi(&self, sub: &Subslot, usi: u16) -> Option<usize> {
        self.find(sub, |item| match item {
            DiagItem::Usi(diag) => diag.usi == usi,
            _ => false,
        })
    }

    fn find<F: Fn(&DiagItem) -> bool>(&self, sub: &Subslot, matches: F) -> Option<usize> {
        let mut cursor = sub.diag_head;

        while let Some(index) = cursor {
            let node = self.arena.get(index)?;

            if matches(&node.item) {
                return Some(index);
            }
            cursor = node.next;
        }

        None
    }

    fn recompute_summary(&self, sub: &mut Subslot) {
        let mut summary = DiagSummary::default();
        let mut cursor = sub.diag_head;

        while let Some(index) = cursor {
            match self.arena.get(index) {
                Some(node) => {
                    let severity = node.item.severity();
                    summary.fault |= severity.fault;
                    summary.maintenance_required |= severity.maintenance_required;
                    summary.maintenance_demanded |= severity.maintenance_demanded;
                    cursor = node.next;
                }
                None => break,
            }
        }

        sub.summary = summary;
    }
}
