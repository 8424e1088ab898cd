//! One alarm priority lane of an AR: the paired send/receive framing
//! machines (ALPMI/ALPMR) on top of the acyclic transport machines
//! (APMS/APMR) with their sequence, ack and retransmission discipline.

use crate::alarm::rta::{
    encode_rta, AlarmAck, AlarmNotification, PduType, RtaHeader, ADD_FLAGS_TACK,
    ADD_FLAGS_WINDOW_1, RTA_VERSION,
};
use crate::block::{bt, BlockReader, BlockWriter};
use crate::error::{StackError, StackResult};
use crate::eth;
use crate::limits::{ALARM_QUEUE_LEN, MAX_FRAME_SIZE};
use crate::sched::TimerHandle;
use crate::types::{
    MacAddr, FRAME_ID_ALARM_HIGH, FRAME_ID_ALARM_LOW, VLAN_PRIO_ALARM_HIGH, VLAN_PRIO_ALARM_LOW,
};
use girder::logging::{self, Logger};
use girder::pool::BoundedQueue;

/// Alarm CR parameters negotiated in the connect.
#[derive(Debug, Clone, Copy)]
pub struct AlarmCrParam {
    /// RTA timeout in 100 ms units.
    pub timeout_factor: u16,
    /// Retransmissions before the AR aborts, 3..15.
    pub retries: u16,
    /// Our reference, carried as src_ref in outgoing PDUs.
    pub local_ref: u16,
    /// The controller's reference.
    pub remote_ref: u16,
    pub max_alarm_len: u16,
}

impl AlarmCrParam {
    #[inline]
    pub fn timeout_us(&self) -> u64 {
        u64::from(self.timeout_factor) * 100_000
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ApmsState {
    Closed,
    Open,
    WTack,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ApmrState {
    Closed,
    Open,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlpmiState {
    WStart,
    WAlarm,
    WAck,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlpmrState {
    WStart,
    WNotify,
    WUserAck,
    WTack,
}

/// What an inbound PDU produced for the layer above.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LaneEvent {
    None,
    /// A notification to hand to the application; the lane now waits for
    /// the user acknowledgement.
    Notification(AlarmNotification),
    /// Our outgoing notification was acknowledged.
    Confirmed,
    /// Our outgoing alarm ack was acknowledged.
    AckConfirmed,
    /// Protocol violation or peer error; the AR must abort.
    Fatal(u8),
}

#[derive(Debug)]
pub struct LaneOutput {
    /// Frames to put on the wire, in order.
    pub frames: Vec<Vec<u8>>,
    pub event: LaneEvent,
}

impl LaneOutput {
    fn quiet() -> LaneOutput {
        LaneOutput {
            frames: Vec::new(),
            event: LaneEvent::None,
        }
    }
}

/// Outcome of a retransmission timer expiry.
#[derive(Debug)]
pub enum TimeoutOutcome {
    Resend(Vec<u8>),
    Exhausted,
    Idle,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum PendingKind {
    Notification,
    AlarmAck,
}

pub struct AlarmLane {
    high: bool,
    frame_id: u16,
    vlan_prio: u8,
    own_mac: MacAddr,
    peer_mac: MacAddr,
    src_ref: u16,
    dst_ref: u16,
    timeout_us: u64,
    retries_max: u16,

    apms: ApmsState,
    apmr: ApmrState,
    alpmi: AlpmiState,
    alpmr: AlpmrState,

    /// Transport sequence counters, 0xFFFF before the first PDU.
    send_seq: u16,
    exp_seq: u16,
    /// ALPMI notification sequence, strictly increasing per lane.
    seq_number: u16,

    retry: u16,
    pending: Option<(PendingKind, Vec<u8>)>,
    last_ack: Option<Vec<u8>>,
    queue: BoundedQueue<AlarmNotification>,
    /// Retransmission timer, managed by the owning stack.
    pub timer: Option<TimerHandle>,

    log: Logger,
}

impl AlarmLane {
    pub fn new<'a, L: Into<Option<&'a Logger>>>(
        high: bool,
        param: &AlarmCrParam,
        own_mac: MacAddr,
        peer_mac: MacAddr,
        log: L,
    ) -> AlarmLane {
        AlarmLane {
            high,
            frame_id: if high {
                FRAME_ID_ALARM_HIGH
            } else {
                FRAME_ID_ALARM_LOW
            },
            vlan_prio: if high {
                VLAN_PRIO_ALARM_HIGH
            } else {
                VLAN_PRIO_ALARM_LOW
            },
            own_mac,
            peer_mac,
            src_ref: param.local_ref,
            dst_ref: param.remote_ref,
            timeout_us: param.timeout_us(),
            retries_max: param.retries,
            apms: ApmsState::Closed,
            apmr: ApmrState::Closed,
            alpmi: AlpmiState::WStart,
            alpmr: AlpmrState::WStart,
            send_seq: 0xFFFF,
            exp_seq: 0xFFFF,
            seq_number: 0,
            retry: 0,
            pending: None,
            last_ack: None,
            queue: BoundedQueue::with_capacity(ALARM_QUEUE_LEN),
            timer: None,
            log: logging::child(log),
        }
    }

    pub fn open(&mut self) {
        self.apms = ApmsState::Open;
        self.apmr = ApmrState::Open;
        self.alpmi = AlpmiState::WAlarm;
        self.alpmr = AlpmrState::WNotify;
        logging::debug!(self.log, "alarm lane open"; "high" => self.high, "src_ref" => self.src_ref);
    }

    pub fn close(&mut self) {
        self.apms = ApmsState::Closed;
        self.apmr = ApmrState::Closed;
        self.alpmi = AlpmiState::WStart;
        self.alpmr = AlpmrState::WStart;
        self.pending = None;
        self.last_ack = None;
        self.queue.clear();
        self.timer = None;
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.apms != ApmsState::Closed
    }

    #[inline]
    pub fn frame_id(&self) -> u16 {
        self.frame_id
    }

    #[inline]
    pub fn timeout_us(&self) -> u64 {
        self.timeout_us
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[inline]
    pub fn apms_state(&self) -> ApmsState {
        self.apms
    }

    #[inline]
    pub fn alpmr_state(&self) -> AlpmrState {
        self.alpmr
    }

    #[inline]
    pub fn next_seq_number(&self) -> u16 {
        self.seq_number
    }

    /// Send a notification now. Returns `Busy` while a prior PDU awaits its
    /// transport ack.
    pub fn send_alarm(&mut self, mut notification: AlarmNotification) -> StackResult<Vec<u8>> {
        if self.apms == ApmsState::Closed || self.alpmi == AlpmiState::WStart {
            return Err(StackError::WrongState);
        }
        if self.apms == ApmsState::WTack {
            return Err(StackError::Busy);
        }

        notification.specifier = self.seq_number;
        self.seq_number = self.seq_number.wrapping_add(1);

        let block_type = if self.high {
            bt::ALARM_NOTIFICATION_HIGH
        } else {
            bt::ALARM_NOTIFICATION_LOW
        };

        let mut var_part = [0u8; MAX_FRAME_SIZE];
        let mut writer = BlockWriter::new(&mut var_part);
        notification
            .encode(&mut writer, block_type)
            .map_err(|_| StackError::TooLarge)?;
        let var_len = writer.position();

        let frame = self.build_data_frame(&var_part[..var_len])?;

        self.alpmi = AlpmiState::WAck;
        self.pending = Some((PendingKind::Notification, frame.clone()));
        self.retry = 0;

        logging::debug!(self.log, "alarm notification sent";
                        "high" => self.high,
                        "seq" => notification.specifier,
                        "send_seq" => self.send_seq);

        Ok(frame)
    }

    /// Queue a stack-generated notification, sending immediately when the
    /// lane is idle.
    pub fn enqueue_alarm(&mut self, notification: AlarmNotification) -> StackResult<Option<Vec<u8>>> {
        if self.apms == ApmsState::WTack {
            self.queue
                .push(notification)
                .map_err(|_| StackError::OutOfResources)?;
            return Ok(None);
        }

        self.send_alarm(notification).map(Some)
    }

    /// Build and send the user acknowledgement for the received alarm.
    pub fn send_user_ack(&mut self, ack: AlarmAck) -> StackResult<Vec<u8>> {
        if self.alpmr != AlpmrState::WUserAck {
            return Err(StackError::WrongState);
        }
        if self.apms == ApmsState::WTack {
            return Err(StackError::Busy);
        }

        let block_type = if self.high {
            bt::ALARM_ACK_HIGH
        } else {
            bt::ALARM_ACK_LOW
        };

        let mut var_part = [0u8; 128];
        let mut writer = BlockWriter::new(&mut var_part);
        ack.encode(&mut writer, block_type)
            .map_err(|_| StackError::TooLarge)?;
        let var_len = writer.position();

        let frame = self.build_data_frame(&var_part[..var_len])?;

        self.alpmr = AlpmrState::WTack;
        self.pending = Some((PendingKind::AlarmAck, frame.clone()));
        self.retry = 0;

        Ok(frame)
    }

    /// Handle an inbound RTA PDU already matched to this lane's frame id.
    pub fn on_frame(&mut self, src: MacAddr, payload: &[u8]) -> StackResult<LaneOutput> {
        if self.apmr == ApmrState::Closed || src != self.peer_mac {
            return Ok(LaneOutput::quiet());
        }

        let mut reader = BlockReader::new(payload);
        let header = match RtaHeader::decode(&mut reader) {
            Ok(header) => header,
            Err(_) => return Ok(LaneOutput::quiet()),
        };

        // The controller addresses us by our reference.
        if header.dst_ref != self.src_ref || header.src_ref != self.dst_ref {
            return Ok(LaneOutput::quiet());
        }

        match header.pdu_type {
            PduType::Ack => self.on_transport_ack(&header),
            PduType::Data => self.on_data(&header, &mut reader),
            PduType::Nack | PduType::Err => {
                logging::warn!(self.log, "peer signalled alarm transport error"; "high" => self.high);
                Ok(LaneOutput {
                    frames: Vec::new(),
                    event: LaneEvent::Fatal(crate::error::codes::C2_APMR_LMPM_ERROR),
                })
            }
        }
    }

    /// Retransmission timer expiry.
    pub fn on_timeout(&mut self) -> TimeoutOutcome {
        let frame = match &self.pending {
            Some((_, frame)) => frame.clone(),
            None => return TimeoutOutcome::Idle,
        };

        if self.retry >= self.retries_max {
            logging::warn!(self.log, "alarm retransmissions exhausted";
                           "high" => self.high,
                           "retries" => self.retry);
            return TimeoutOutcome::Exhausted;
        }

        self.retry += 1;
        logging::debug!(self.log, "alarm retransmit"; "high" => self.high, "attempt" => self.retry);
        TimeoutOutcome::Resend(frame)
    }

    fn on_transport_ack(&mut self, header: &RtaHeader) -> StackResult<LaneOutput> {
        if self.apms != ApmsState::WTack || header.ack_seq != self.send_seq {
            // Stale or misdirected ack.
            return Ok(LaneOutput::quiet());
        }

        let (kind, _) = self.pending.take().expect("WTack implies pending");
        self.apms = ApmsState::Open;
        self.retry = 0;

        let event = match kind {
            PendingKind::Notification => {
                self.alpmi = AlpmiState::WAlarm;
                LaneEvent::Confirmed
            }
            PendingKind::AlarmAck => {
                self.alpmr = AlpmrState::WNotify;
                LaneEvent::AckConfirmed
            }
        };

        // Drain the queue now that the lane is idle again.
        let mut frames = Vec::new();
        if let Some(queued) = self.queue.pop() {
            if let Ok(frame) = self.send_alarm(queued) {
                frames.push(frame);
            }
        }

        Ok(LaneOutput { frames, event })
    }

    fn on_data(&mut self, header: &RtaHeader, reader: &mut BlockReader) -> StackResult<LaneOutput> {
        let expected = self.exp_seq.wrapping_add(1);

        if header.send_seq == self.exp_seq {
            // Retransmission of the last PDU: repeat our ack.
            let frames = self.last_ack.iter().cloned().collect();
            return Ok(LaneOutput {
                frames,
                event: LaneEvent::None,
            });
        }
        if header.send_seq != expected {
            return Ok(LaneOutput {
                frames: Vec::new(),
                event: LaneEvent::Fatal(crate::error::codes::C2_APMR_LMPM_ERROR),
            });
        }

        self.exp_seq = header.send_seq;

        let ack_frame = self.build_ack_frame()?;
        self.last_ack = Some(ack_frame.clone());

        // A DATA PDU carries either a notification or, for a notification
        // of ours, nothing we surface beyond the confirm already given on
        // the transport ack.
        let event = match AlarmNotification::decode(reader) {
            Ok(notification) => {
                if self.alpmr != AlpmrState::WNotify {
                    LaneEvent::Fatal(crate::error::codes::C2_ALPMR_WRONG_ALARM_PDU)
                } else {
                    self.alpmr = AlpmrState::WUserAck;
                    LaneEvent::Notification(notification)
                }
            }
            Err(_) => LaneEvent::None,
        };

        Ok(LaneOutput {
            frames: vec![ack_frame],
            event,
        })
    }

    fn build_data_frame(&mut self, var_part: &[u8]) -> StackResult<Vec<u8>> {
        self.send_seq = self.send_seq.wrapping_add(1);

        let header = RtaHeader {
            dst_ref: self.dst_ref,
            src_ref: self.src_ref,
            pdu_type: PduType::Data,
            version: RTA_VERSION,
            add_flags: ADD_FLAGS_TACK | ADD_FLAGS_WINDOW_1,
            send_seq: self.send_seq,
            ack_seq: self.exp_seq,
        };

        self.build_frame(&header, var_part)
    }

    fn build_ack_frame(&mut self) -> StackResult<Vec<u8>> {
        let header = RtaHeader {
            dst_ref: self.dst_ref,
            src_ref: self.src_ref,
            pdu_type: PduType::Ack,
            version: RTA_VERSION,
            add_flags: ADD_FLAGS_WINDOW_1,
            send_seq: self.send_seq,
            ack_seq: self.exp_seq,
        };

        self.build_frame(&header, &[])
    }

    fn build_frame(&self, header: &RtaHeader, var_part: &[u8]) -> StackResult<Vec<u8>> {
        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let used = eth::write_header(
            &mut frame,
            self.peer_mac,
            self.own_mac,
            Some(self.vlan_prio),
            self.frame_id,
        );

        let mut writer = BlockWriter::new(&mut frame[used..]);
        encode_rta(&mut writer, header, var_part).map_err(|_| StackError::TooLarge)?;
        let total = used + writer.position();

        frame.truncate(total);
        Ok(frame)
    }

    #[inline]
    pub fn apms_timeout_status(&self) -> crate::error::PnioStatus {
        crate::error::PnioStatus::pnio(
            crate::error::codes::CODE_RTA_ERROR,
            crate::error::codes::C1_APMS,
            crate::error::codes::C2_APMS_TIMEOUT,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::rta::alarm_type;
    use crate::types::SubslotKey;

    const OWN: MacAddr = MacAddr([2, 0, 0, 0, 0, 1]);
    const PEER: MacAddr = MacAddr([2, 0, 0, 0, 0, 2]);

    fn lane() -> AlarmLane {
        let param = AlarmCrParam {
            timeout_factor: 1,
            retries: 3,
            local_ref: 0x0001,
            remote_ref: 0x0203,
            max_alarm_len: 200,
        };
        let mut lane = AlarmLane::new(true, &param, OWN, PEER, None);
        lane.open();
        lane
    }

    fn notification(value: u8) -> AlarmNotification {
        AlarmNotification {
            alarm_type: alarm_type::PROCESS,
            key: SubslotKey::new(0, 1, 1),
            module_ident: 0x20,
            submodule_ident: 0x21,
            specifier: 0,
            usi: 0x0010,
            data: vec![value],
        }
    }

    /// Controller-side transport ack for the lane's current send_seq.
    fn peer_ack(ack_seq: u16, peer_send_seq: u16) -> Vec<u8> {
        let header = RtaHeader {
            dst_ref: 0x0001,
            src_ref: 0x0203,
            pdu_type: PduType::Ack,
            version: RTA_VERSION,
            add_flags: ADD_FLAGS_WINDOW_1,
            send_seq: peer_send_seq,
            ack_seq,
        };
        let mut buf = [0u8; 64];
        let mut writer = BlockWriter::new(&mut buf);
        encode_rta(&mut writer, &header, &[]).unwrap();
        let len = writer.position();
        buf[..len].to_vec()
    }

    fn peer_data(send_seq: u16, notification: &AlarmNotification) -> Vec<u8> {
        let mut var = [0u8; 256];
        let mut writer = BlockWriter::new(&mut var);
        notification
            .encode(&mut writer, bt::ALARM_NOTIFICATION_HIGH)
            .unwrap();
        let var_len = writer.position();

        let header = RtaHeader {
            dst_ref: 0x0001,
            src_ref: 0x0203,
            pdu_type: PduType::Data,
            version: RTA_VERSION,
            add_flags: ADD_FLAGS_TACK | ADD_FLAGS_WINDOW_1,
            send_seq,
            ack_seq: 0xFFFF,
        };
        let mut buf = [0u8; 512];
        let mut writer = BlockWriter::new(&mut buf);
        encode_rta(&mut writer, &header, &var[..var_len]).unwrap();
        let len = writer.position();
        buf[..len].to_vec()
    }

    #[test]
    fn test_send_then_busy_until_ack() {
        let mut lane = lane();

        lane.send_alarm(notification(1)).unwrap();
        assert_eq!(lane.apms_state(), ApmsState::WTack);

        // TACK discipline: no second DATA while the first is outstanding.
        assert_eq!(lane.send_alarm(notification(2)), Err(StackError::Busy));

        let output = lane.on_frame(PEER, &peer_ack(0, 0xFFFF)).unwrap();
        assert_eq!(output.event, LaneEvent::Confirmed);
        assert_eq!(lane.apms_state(), ApmsState::Open);

        // And the lane accepts a new alarm immediately.
        assert!(lane.send_alarm(notification(3)).is_ok());
    }

    #[test]
    fn test_sequence_numbers_increment_per_lane() {
        let mut lane = lane();

        let first = lane.send_alarm(notification(1)).unwrap();
        // specifier travels inside the notification block; check counter.
        assert_eq!(lane.next_seq_number(), 1);
        lane.on_frame(PEER, &peer_ack(0, 0xFFFF)).unwrap();

        let second = lane.send_alarm(notification(2)).unwrap();
        assert_eq!(lane.next_seq_number(), 2);
        assert_ne!(first, second);
    }

    #[test]
    fn test_stale_ack_ignored() {
        let mut lane = lane();
        lane.send_alarm(notification(1)).unwrap();

        let output = lane.on_frame(PEER, &peer_ack(0x1234, 0xFFFF)).unwrap();
        assert_eq!(output.event, LaneEvent::None);
        assert_eq!(lane.apms_state(), ApmsState::WTack);
    }

    #[test]
    fn test_foreign_source_ignored() {
        let mut lane = lane();
        lane.send_alarm(notification(1)).unwrap();

        let output = lane
            .on_frame(MacAddr([9; 6]), &peer_ack(0, 0xFFFF))
            .unwrap();
        assert_eq!(output.event, LaneEvent::None);
        assert_eq!(lane.apms_state(), ApmsState::WTack);
    }

    #[test]
    fn test_retransmit_until_exhausted() {
        let mut lane = lane();
        let frame = lane.send_alarm(notification(1)).unwrap();

        for _ in 0..3 {
            match lane.on_timeout() {
                TimeoutOutcome::Resend(resent) => assert_eq!(resent, frame),
                other => panic!("unexpected outcome {:?}", other),
            }
        }

        assert!(matches!(lane.on_timeout(), TimeoutOutcome::Exhausted));
    }

    #[test]
    fn test_queue_drains_after_ack() {
        let mut lane = lane();

        assert!(lane.enqueue_alarm(notification(1)).unwrap().is_some());
        // Lane busy: the next three queue up, the fourth overflows.
        assert!(lane.enqueue_alarm(notification(2)).unwrap().is_none());
        assert!(lane.enqueue_alarm(notification(3)).unwrap().is_none());
        assert!(lane.enqueue_alarm(notification(4)).unwrap().is_none());
        assert_eq!(
            lane.enqueue_alarm(notification(5)),
            Err(StackError::OutOfResources)
        );

        let output = lane.on_frame(PEER, &peer_ack(0, 0xFFFF)).unwrap();
        assert_eq!(output.event, LaneEvent::Confirmed);
        // The queued notification went out right away.
        assert_eq!(output.frames.len(), 1);
        assert_eq!(lane.apms_state(), ApmsState::WTack);
    }

    #[test]
    fn test_inbound_notification_acked_and_delivered() {
        let mut lane = lane();

        let output = lane.on_frame(PEER, &peer_data(0, &notification(7))).unwrap();

        assert_eq!(output.frames.len(), 1);
        match output.event {
            LaneEvent::Notification(received) => assert_eq!(received.data, vec![7]),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(lane.alpmr_state(), AlpmrState::WUserAck);

        // The retransmitted PDU gets the same ack again, without a second
        // delivery.
        let output = lane.on_frame(PEER, &peer_data(0, &notification(7))).unwrap();
        assert_eq!(output.frames.len(), 1);
        assert_eq!(output.event, LaneEvent::None);
    }

    #[test]
    fn test_out_of_sequence_data_is_fatal() {
        let mut lane = lane();

        let output = lane.on_frame(PEER, &peer_data(5, &notification(1))).unwrap();
        assert!(matches!(output.event, LaneEvent::Fatal(_)));
    }

    #[test]
    fn test_user_ack_flow() {
        let mut lane = lane();

        lane.on_frame(PEER, &peer_data(0, &notification(7))).unwrap();

        let ack = AlarmAck {
            alarm_type: alarm_type::PROCESS,
            key: SubslotKey::new(0, 1, 1),
            specifier: 0,
            status: crate::error::PnioStatus::OK,
        };
        lane.send_user_ack(ack).unwrap();
        assert_eq!(lane.alpmr_state(), AlpmrState::WTack);

        let output = lane.on_frame(PEER, &peer_ack(0, 0)).unwrap();
        assert_eq!(output.event, LaneEvent::AckConfirmed);
        assert_eq!(lane.alpmr_state(), AlpmrState::WNotify);
    }

    #[test]
    fn test_closed_lane_drops_everything() {
        let mut lane = lane();
        lane.close();

        assert!(!lane.is_open());
        let output = lane.on_frame(PEER, &peer_data(0, &notification(1))).unwrap();
        assert_eq!(output.event, LaneEvent::None);
        assert!(output.frames.is_empty());
        assert_eq!(lane.send_alarm(notification(1)), Err(StackError::WrongState));
    }
}
