//! Provider protocol machine: the periodic transmitter of one IOCR.
//! Owns the outgoing payload image; the actual cadence comes from the
//! scheduler, which calls [`Ppm::next_frame`] on every period.

use crate::cyclic::{IoObjDesc, IocrParam};
use crate::error::{StackError, StackResult};
use crate::eth;
use crate::limits::{MAX_FRAME_SIZE, MIN_CYCLIC_PAYLOAD};
use crate::sched::TimerHandle;
use crate::types::{data_status, MacAddr, VLAN_PRIO_CYCLIC};
use girder::logging::{self, Logger};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PpmState {
    WStart,
    Run,
}

pub struct Ppm {
    state: PpmState,
    frame_id: u16,
    /// Payload image: data objects and status bytes at their configured
    /// offsets, padded to the minimum cyclic length.
    payload: Vec<u8>,
    cycle: u16,
    cycle_increment: u16,
    data_status: u8,
    transfer_status: u8,
    period_us: u64,
    pub timer: Option<TimerHandle>,
    send_errors: u32,
    log: Logger,
}

impl Ppm {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(param: &IocrParam, log: L) -> Ppm {
        let payload_len = (param.data_length as usize).max(MIN_CYCLIC_PAYLOAD);

        Ppm {
            state: PpmState::WStart,
            frame_id: param.frame_id,
            payload: vec![0; payload_len],
            cycle: 0,
            cycle_increment: param.send_clock_factor,
            // Primary, valid, run, no station problem.
            data_status: data_status::STATE
                | data_status::DATA_VALID
                | data_status::PROVIDER_STATE
                | data_status::STATION_OK,
            transfer_status: 0,
            period_us: param.period_us(),
            timer: None,
            send_errors: 0,
            log: logging::child(log),
        }
    }

    #[inline]
    pub fn state(&self) -> PpmState {
        self.state
    }

    #[inline]
    pub fn period_us(&self) -> u64 {
        self.period_us
    }

    /// Arm the machine. The first transmission happens on the first
    /// scheduler expiry after this call.
    pub fn activate(&mut self) {
        self.state = PpmState::Run;
        logging::debug!(self.log, "ppm armed"; "frame_id" => self.frame_id, "period_us" => self.period_us);
    }

    /// Disarm; the owning stack also cancels the timer.
    pub fn deactivate(&mut self) {
        self.state = PpmState::WStart;
        self.timer = None;
    }

    /// Copy one submodule's data and provider status into the image.
    pub fn write_data_and_iops(
        &mut self,
        desc: &IoObjDesc,
        data: &[u8],
        iops: u8,
    ) -> StackResult<()> {
        if data.len() != desc.len as usize {
            return Err(StackError::InvalidArgument);
        }

        let start = desc.offset as usize;
        let end = desc.iops_offset();
        if end >= self.payload.len() {
            return Err(StackError::InvalidArgument);
        }

        self.payload[start..end].copy_from_slice(data);
        self.payload[end] = iops;
        Ok(())
    }

    /// Copy the consumer status we report for a controller-provided
    /// subslot.
    pub fn write_iocs(&mut self, desc: &IoObjDesc, iocs: u8) -> StackResult<()> {
        let offset = desc.offset as usize;
        if offset >= self.payload.len() {
            return Err(StackError::InvalidArgument);
        }

        self.payload[offset] = iocs;
        Ok(())
    }

    /// Read back the consumer status previously written at `desc`.
    pub fn read_iocs(&self, desc: &IoObjDesc) -> StackResult<u8> {
        self.payload
            .get(desc.offset as usize)
            .copied()
            .ok_or(StackError::InvalidArgument)
    }

    #[inline]
    pub fn set_data_status_bit(&mut self, bit: u8, on: bool) {
        if on {
            self.data_status |= bit;
        } else {
            self.data_status &= !bit;
        }
    }

    #[inline]
    pub fn data_status(&self) -> u8 {
        self.data_status
    }

    /// Build the next frame to transmit and advance the cycle counter by
    /// the send clock factor. Returns the complete Ethernet frame.
    pub fn next_frame(&mut self, dst: MacAddr, src: MacAddr) -> StackResult<Vec<u8>> {
        if self.state != PpmState::Run {
            return Err(StackError::WrongState);
        }

        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let mut used = eth::write_header(&mut frame, dst, src, Some(VLAN_PRIO_CYCLIC), self.frame_id);

        frame[used..used + self.payload.len()].copy_from_slice(&self.payload);
        used += self.payload.len();

        frame[used] = (self.cycle >> 8) as u8;
        frame[used + 1] = self.cycle as u8;
        frame[used + 2] = self.data_status;
        frame[used + 3] = self.transfer_status;
        used += 4;

        frame.truncate(used);

        self.cycle = self.cycle.wrapping_add(self.cycle_increment);
        Ok(frame)
    }

    /// Count a failed transmission; errors never change state.
    pub fn note_send_error(&mut self) {
        self.send_errors += 1;
        logging::warn!(self.log, "cyclic send failed"; "frame_id" => self.frame_id, "errors" => self.send_errors);
    }

    #[inline]
    pub fn send_errors(&self) -> u32 {
        self.send_errors
    }

    #[inline]
    pub fn cycle(&self) -> u16 {
        self.cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cyclic::IocrType;
    use crate::types::SubslotKey;

    const PEER: MacAddr = MacAddr([2, 0, 0, 0, 0, 2]);
    const OWN: MacAddr = MacAddr([2, 0, 0, 0, 0, 1]);

    fn param() -> IocrParam {
        IocrParam {
            iocr_type: IocrType::Input,
            iocr_ref: 1,
            frame_id: 0x8001,
            data_length: 40,
            send_clock_factor: 32,
            reduction_ratio: 1,
            data_hold_factor: 3,
            data_objects: vec![IoObjDesc {
                key: SubslotKey::new(0, 1, 1),
                offset: 0,
                len: 1,
            }],
            iocs_objects: vec![],
        }
    }

    #[test]
    fn test_not_armed_refuses_to_send() {
        let mut ppm = Ppm::new(&param(), None);
        assert_eq!(ppm.state(), PpmState::WStart);
        assert_eq!(ppm.next_frame(PEER, OWN), Err(StackError::WrongState));
    }

    #[test]
    fn test_frame_layout() {
        let param = param();
        let desc = param.data_objects[0];
        let mut ppm = Ppm::new(&param, None);

        ppm.write_data_and_iops(&desc, &[0x42], 0x80).unwrap();
        ppm.activate();

        let frame = ppm.next_frame(PEER, OWN).unwrap();

        // VLAN-tagged header is 20 bytes; payload padded to 40, then the
        // counter and both status bytes.
        assert_eq!(frame.len(), 20 + 40 + 4);
        assert_eq!(frame[20], 0x42);
        assert_eq!(frame[21], 0x80);
        // First frame carries cycle 0.
        assert_eq!(&frame[60..62], &[0, 0]);
        // Primary, valid, run, station ok.
        assert_eq!(frame[62], 0x35);
        assert_eq!(frame[63], 0);
    }

    #[test]
    fn test_cycle_increments_by_send_clock() {
        let mut ppm = Ppm::new(&param(), None);
        ppm.activate();

        ppm.next_frame(PEER, OWN).unwrap();
        let second = ppm.next_frame(PEER, OWN).unwrap();
        assert_eq!(&second[60..62], &[0, 32]);
        assert_eq!(ppm.cycle(), 64);
    }

    #[test]
    fn test_cycle_wraps() {
        let mut ppm = Ppm::new(&param(), None);
        ppm.activate();
        ppm.cycle = 0xFFF0;

        ppm.next_frame(PEER, OWN).unwrap();
        assert_eq!(ppm.cycle(), 0x0010);
    }

    #[test]
    fn test_data_status_bits() {
        let mut ppm = Ppm::new(&param(), None);
        ppm.activate();

        ppm.set_data_status_bit(data_status::STATE, false);
        ppm.set_data_status_bit(data_status::PROVIDER_STATE, false);

        let frame = ppm.next_frame(PEER, OWN).unwrap();
        assert_eq!(frame[62], data_status::DATA_VALID | data_status::STATION_OK);
    }

    #[test]
    fn test_write_size_mismatch_refused() {
        let param = param();
        let desc = param.data_objects[0];
        let mut ppm = Ppm::new(&param, None);

        assert_eq!(
            ppm.write_data_and_iops(&desc, &[1, 2], 0x80),
            Err(StackError::InvalidArgument)
        );
    }

    #[test]
    fn test_send_error_keeps_running() {
        let mut ppm = Ppm::new(&param(), None);
        ppm.activate();
        ppm.note_send_error();

        assert_eq!(ppm.state(), PpmState::Run);
        assert_eq!(ppm.send_errors(), 1);
        assert!(ppm.next_frame(PEER, OWN).is_ok());
    }
}
