//! Cyclic data plane: per-IOCR parameters and the provider/consumer
//! protocol machines.

pub mod cpm;
pub mod ppm;

pub use cpm::{Cpm, CpmAccept, CpmState};
pub use ppm::{Ppm, PpmState};

use crate::limits::CYCLE_UNIT_NS;
use crate::types::SubslotKey;

/// IOCR direction, as declared in the connect request.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IocrType {
    Input = 1,
    Output = 2,
    McProvider = 3,
    McConsumer = 4,
}

impl IocrType {
    pub fn from_u16(value: u16) -> Option<IocrType> {
        match value {
            1 => Some(IocrType::Input),
            2 => Some(IocrType::Output),
            3 => Some(IocrType::McProvider),
            4 => Some(IocrType::McConsumer),
            _ => None,
        }
    }

    /// True when the device is the provider on this CR.
    #[inline]
    pub fn is_provider(&self) -> bool {
        matches!(self, IocrType::Input | IocrType::McProvider)
    }
}

/// Placement of one submodule's data inside the cyclic frame. The provider
/// status byte immediately follows the data; consumer status entries have
/// their own offsets.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct IoObjDesc {
    pub key: SubslotKey,
    pub offset: u16,
    /// Data length in bytes; zero for pure status entries.
    pub len: u16,
}

impl IoObjDesc {
    /// Offset of the IOPS byte trailing the data.
    #[inline]
    pub fn iops_offset(&self) -> usize {
        self.offset as usize + self.len as usize
    }
}

/// Parameters of one IO communication relation, decoded from the connect
/// request and resolved against the identification tree.
#[derive(Debug, Clone)]
pub struct IocrParam {
    pub iocr_type: IocrType,
    pub iocr_ref: u16,
    pub frame_id: u16,
    /// C_SDU length: the cyclic payload area before counter and statuses.
    pub data_length: u16,
    pub send_clock_factor: u16,
    pub reduction_ratio: u16,
    pub data_hold_factor: u16,
    /// Data objects carried in this CR.
    pub data_objects: Vec<IoObjDesc>,
    /// Consumer status entries carried in this CR for the opposite
    /// direction's data objects.
    pub iocs_objects: Vec<IoObjDesc>,
}

impl IocrParam {
    /// Transmission period in microseconds: send clock × 31.25 µs ×
    /// reduction ratio.
    #[inline]
    pub fn period_us(&self) -> u64 {
        u64::from(self.send_clock_factor) * u64::from(self.reduction_ratio) * CYCLE_UNIT_NS / 1000
    }

    /// Data-hold time: the watchdog budget of the consumer.
    #[inline]
    pub fn data_hold_us(&self) -> u64 {
        self.period_us() * u64::from(self.data_hold_factor)
    }

    /// Cycle-counter acceptance window in counter units (31.25 µs each),
    /// clamped below half the counter range so wrap-around stays
    /// unambiguous.
    #[inline]
    pub fn cycle_window(&self) -> u16 {
        let window = u32::from(self.send_clock_factor)
            * u32::from(self.reduction_ratio)
            * u32::from(self.data_hold_factor);
        window.min(0x7FFF) as u16
    }

    pub fn find_data(&self, key: SubslotKey) -> Option<IoObjDesc> {
        self.data_objects.iter().copied().find(|d| d.key == key)
    }

    pub fn find_iocs(&self, key: SubslotKey) -> Option<IoObjDesc> {
        self.iocs_objects.iter().copied().find(|d| d.key == key)
    }
}
