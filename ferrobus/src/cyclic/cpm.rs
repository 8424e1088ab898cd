//! Consumer protocol machine: receives the controller's cyclic frames for
//! one IOCR, filters on source, frame id and cycle counter, and feeds a
//! double-buffered image read by the application between ticks. The
//! data-hold watchdog itself lives in the scheduler; this machine reports
//! what the deadline should be.

use crate::cyclic::{IoObjDesc, IocrParam};
use crate::error::{StackError, StackResult};
use crate::sched::TimerHandle;
use crate::types::MacAddr;
use girder::logging::{self, Logger};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CpmState {
    WStart,
    /// Armed, waiting for the first valid frame.
    FRun,
    Run,
}

/// Outcome of offering a received frame to the machine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CpmAccept {
    /// FRUN → RUN edge: the first accepted frame of this CR.
    pub first: bool,
    /// The received data status when it differs from the previous frame.
    pub data_status_changed: Option<u8>,
}

pub struct Cpm {
    state: CpmState,
    frame_id: u16,
    peer: MacAddr,
    /// Payload area length before the trailing counter and statuses.
    data_length: usize,
    window: u16,
    last_cycle: u16,
    data_hold_us: u64,
    /// Back buffer filled by the receive path, front buffer read by the
    /// application; swapped on every accepted frame.
    buffers: [Vec<u8>; 2],
    front: usize,
    new_data: bool,
    has_data: bool,
    data_status: u8,
    pub dht_timer: Option<TimerHandle>,
    drops: u32,
    log: Logger,
}

impl Cpm {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(param: &IocrParam, peer: MacAddr, log: L) -> Cpm {
        let data_length = param.data_length as usize;

        Cpm {
            state: CpmState::WStart,
            frame_id: param.frame_id,
            peer,
            data_length,
            window: param.cycle_window().max(1),
            last_cycle: 0,
            data_hold_us: param.data_hold_us(),
            buffers: [vec![0; data_length], vec![0; data_length]],
            front: 0,
            new_data: false,
            has_data: false,
            data_status: 0,
            dht_timer: None,
            drops: 0,
            log: logging::child(log),
        }
    }

    #[inline]
    pub fn state(&self) -> CpmState {
        self.state
    }

    #[inline]
    pub fn data_hold_us(&self) -> u64 {
        self.data_hold_us
    }

    #[inline]
    pub fn data_status(&self) -> u8 {
        self.data_status
    }

    pub fn activate(&mut self) {
        self.state = CpmState::FRun;
        logging::debug!(self.log, "cpm armed"; "frame_id" => self.frame_id, "dht_us" => self.data_hold_us);
    }

    pub fn deactivate(&mut self) {
        self.state = CpmState::WStart;
        self.dht_timer = None;
        self.has_data = false;
        self.new_data = false;
    }

    /// Offer a received frame. `payload` starts after the frame id and
    /// carries the data area plus cycle counter, data status and transfer
    /// status. Returns `None` when the frame is filtered out.
    pub fn accept_frame(&mut self, src: MacAddr, frame_id: u16, payload: &[u8]) -> Option<CpmAccept> {
        if self.state == CpmState::WStart {
            return None;
        }
        if src != self.peer || frame_id != self.frame_id {
            return None;
        }
        if payload.len() < self.data_length + 4 {
            self.drops += 1;
            return None;
        }

        let trailer = &payload[self.data_length..];
        let cycle = (u16::from(trailer[0]) << 8) | u16::from(trailer[1]);
        let data_status = trailer[2];

        let first = self.state == CpmState::FRun;

        if !first {
            // Accept iff (cycle - last) mod 2^16 lies in (0, window].
            let delta = cycle.wrapping_sub(self.last_cycle);
            if delta == 0 || delta > self.window {
                self.drops += 1;
                logging::trace!(self.log, "cycle outside window";
                                "frame_id" => self.frame_id,
                                "cycle" => cycle,
                                "last" => self.last_cycle,
                                "window" => self.window);
                return None;
            }
        }

        // Fill the back buffer and make it current.
        let back = 1 - self.front;
        self.buffers[back].copy_from_slice(&payload[..self.data_length]);
        self.front = back;
        self.new_data = true;
        self.has_data = true;
        self.last_cycle = cycle;
        self.state = CpmState::Run;

        let data_status_changed = if data_status != self.data_status || first {
            self.data_status = data_status;
            Some(data_status)
        } else {
            None
        };

        Some(CpmAccept {
            first,
            data_status_changed,
        })
    }

    /// Coherent snapshot of one submodule's data and provider status, plus
    /// the new-since-last-call flag.
    pub fn get_data_and_iops(&mut self, desc: &IoObjDesc) -> StackResult<(Vec<u8>, u8, bool)> {
        if !self.has_data {
            return Err(StackError::WrongState);
        }

        let start = desc.offset as usize;
        let end = desc.iops_offset();
        if end >= self.data_length {
            return Err(StackError::InvalidArgument);
        }

        let buffer = &self.buffers[self.front];
        let fresh = self.new_data;
        self.new_data = false;

        Ok((buffer[start..end].to_vec(), buffer[end], fresh))
    }

    /// The consumer status the controller reports for one of our provider
    /// submodules, carried in this CR.
    pub fn get_iocs(&self, desc: &IoObjDesc) -> StackResult<u8> {
        if !self.has_data {
            return Err(StackError::WrongState);
        }

        self.buffers[self.front]
            .get(desc.offset as usize)
            .copied()
            .ok_or(StackError::InvalidArgument)
    }

    #[inline]
    pub fn last_cycle(&self) -> u16 {
        self.last_cycle
    }

    #[inline]
    pub fn drops(&self) -> u32 {
        self.drops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cyclic::IocrType;
    use crate::types::SubslotKey;

    const PEER: MacAddr = MacAddr([2, 0, 0, 0, 0, 2]);
    const OTHER: MacAddr = MacAddr([9, 9, 9, 9, 9, 9]);

    fn param() -> IocrParam {
        IocrParam {
            iocr_type: IocrType::Output,
            iocr_ref: 2,
            frame_id: 0x8002,
            data_length: 40,
            send_clock_factor: 32,
            reduction_ratio: 1,
            data_hold_factor: 3,
            data_objects: vec![IoObjDesc {
                key: SubslotKey::new(0, 1, 2),
                offset: 0,
                len: 1,
            }],
            iocs_objects: vec![IoObjDesc {
                key: SubslotKey::new(0, 1, 1),
                offset: 2,
                len: 0,
            }],
        }
    }

    fn frame(cycle: u16, data_status: u8, value: u8) -> Vec<u8> {
        let mut payload = vec![0u8; 44];
        payload[0] = value;
        payload[1] = 0x80;
        payload[40] = (cycle >> 8) as u8;
        payload[41] = cycle as u8;
        payload[42] = data_status;
        payload
    }

    fn armed() -> Cpm {
        let mut cpm = Cpm::new(&param(), PEER, None);
        cpm.activate();
        cpm
    }

    #[test]
    fn test_first_frame_transitions_to_run() {
        let mut cpm = armed();
        assert_eq!(cpm.state(), CpmState::FRun);

        let accept = cpm.accept_frame(PEER, 0x8002, &frame(100, 0x35, 0x42)).unwrap();
        assert!(accept.first);
        assert_eq!(accept.data_status_changed, Some(0x35));
        assert_eq!(cpm.state(), CpmState::Run);
    }

    #[test]
    fn test_source_and_frame_id_filter() {
        let mut cpm = armed();

        assert!(cpm.accept_frame(OTHER, 0x8002, &frame(1, 0x35, 0)).is_none());
        assert!(cpm.accept_frame(PEER, 0x9999, &frame(1, 0x35, 0)).is_none());
        assert!(cpm.accept_frame(PEER, 0x8002, &[0u8; 10]).is_none());
    }

    #[test]
    fn test_cycle_window_filter() {
        let mut cpm = armed();

        cpm.accept_frame(PEER, 0x8002, &frame(1000, 0x35, 1)).unwrap();

        // Duplicate and stale counters are dropped.
        assert!(cpm.accept_frame(PEER, 0x8002, &frame(1000, 0x35, 2)).is_none());
        assert!(cpm.accept_frame(PEER, 0x8002, &frame(990, 0x35, 2)).is_none());

        // Within the window: window is 32 × 1 × 3 = 96.
        assert!(cpm.accept_frame(PEER, 0x8002, &frame(1096, 0x35, 3)).is_some());

        // Beyond the window.
        assert!(cpm.accept_frame(PEER, 0x8002, &frame(1296, 0x35, 4)).is_none());
        assert_eq!(cpm.drops(), 3);
    }

    #[test]
    fn test_accepted_cycles_strictly_increase_mod_wrap() {
        let mut cpm = armed();

        cpm.accept_frame(PEER, 0x8002, &frame(0xFFF0, 0x35, 1)).unwrap();
        // Wraps around zero, still inside the window.
        assert!(cpm.accept_frame(PEER, 0x8002, &frame(0x0010, 0x35, 2)).is_some());
        assert_eq!(cpm.last_cycle(), 0x0010);
    }

    #[test]
    fn test_data_snapshot_and_new_flag() {
        let mut cpm = armed();
        let desc = param().data_objects[0];

        assert_eq!(cpm.get_data_and_iops(&desc), Err(StackError::WrongState));

        cpm.accept_frame(PEER, 0x8002, &frame(1, 0x35, 0x42)).unwrap();

        let (data, iops, fresh) = cpm.get_data_and_iops(&desc).unwrap();
        assert_eq!(data, vec![0x42]);
        assert_eq!(iops, 0x80);
        assert!(fresh);

        // Second read without a new frame: same data, flag cleared.
        let (_, _, fresh) = cpm.get_data_and_iops(&desc).unwrap();
        assert!(!fresh);

        cpm.accept_frame(PEER, 0x8002, &frame(33, 0x35, 0x43)).unwrap();
        let (data, _, fresh) = cpm.get_data_and_iops(&desc).unwrap();
        assert_eq!(data, vec![0x43]);
        assert!(fresh);
    }

    #[test]
    fn test_data_status_change_reported_once() {
        let mut cpm = armed();

        cpm.accept_frame(PEER, 0x8002, &frame(1, 0x35, 0)).unwrap();
        let again = cpm.accept_frame(PEER, 0x8002, &frame(33, 0x35, 0)).unwrap();
        assert_eq!(again.data_status_changed, None);

        let backup = cpm.accept_frame(PEER, 0x8002, &frame(65, 0x34, 0)).unwrap();
        assert_eq!(backup.data_status_changed, Some(0x34));
    }

    #[test]
    fn test_iocs_read() {
        let mut cpm = armed();
        let iocs_desc = param().iocs_objects[0];

        let mut payload = frame(1, 0x35, 0);
        payload[2] = 0x80;
        cpm.accept_frame(PEER, 0x8002, &payload).unwrap();

        assert_eq!(cpm.get_iocs(&iocs_desc).unwrap(), 0x80);
    }
}
