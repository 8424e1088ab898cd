//! The device instance: a [`Stack`] owning every arena and machine, and the
//! thread-safe [`Device`] facade around it. Two entry points drive the
//! stack: `handle_periodic` from the application's tick thread, and
//! `handle_eth_frame` from the Ethernet receive context. Public calls lock
//! briefly and never block beyond memory copies.

use crate::alarm::{
    alarm_type, AlarmAck, AlarmNotification, LaneEvent, TimeoutOutcome, LANE_HIGH, LANE_LOW,
};
use crate::cmdev::{Ar, CmdevState};
use crate::config::DeviceConfig;
use crate::dcp::Dcp;
use crate::demux::{FrameHandler, FrameIdMap};
use crate::diag::{DiagStore, Specifier, StdDiag};
use crate::error::{codes, PnioStatus, StackError, StackResult};
use crate::events::{ArEvent, DeviceEvents};
use crate::files;
use crate::ident::{IdentTree, SubmoduleDir};
use crate::limits::{MAX_AR, MAX_SESSIONS};
use crate::lldp::{LldpStore, PeerInfo, SystemInfo};
use crate::logbook::{Logbook, LogbookEntry};
use crate::platform::Platform;
use crate::rpc::Session;
use crate::sched::{Scheduler, TimerKind};
use crate::types::{
    data_status, Arep, IpSuite, MacAddr, SubslotKey, Uuid, FRAME_ID_ALARM_HIGH,
    FRAME_ID_ALARM_LOW, FRAME_ID_DCP_GETSET, FRAME_ID_DCP_HELLO, FRAME_ID_DCP_IDENT_REQ,
    FRAME_ID_DCP_IDENT_RSP, RPC_EPHEMERAL_PORT_BASE, RPC_SERVER_PORT, SUBSLOT_DAP_IDENT,
    SUBSLOT_INTERFACE, SUBSLOT_PORT_BASE,
};
use crate::{eth, im};
use girder::logging::{self, Logger};
use girder::pool::SlotPool;
use hashbrown::HashMap;
use indexmap::IndexSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

const FILE_VERSION_IM: u32 = 1;
const FILE_VERSION_PORT_CHECK: u32 = 1;
const FILE_VERSION_SYSTEM: u32 = 1;

/// The single-threaded core of one device instance. All module-level state
/// of the protocol lives here, so several devices can coexist in one
/// process.
pub struct Stack {
    pub(crate) cfg: DeviceConfig,
    pub(crate) events: Arc<dyn DeviceEvents>,
    pub platform: Box<dyn Platform>,
    pub(crate) log: Logger,

    pub(crate) sched: Scheduler,
    pub(crate) demux: FrameIdMap,
    pub ident: IdentTree,
    pub(crate) diag: DiagStore,

    pub(crate) ars: SlotPool<Ar>,
    pub(crate) live: IndexSet<usize>,

    pub(crate) sessions: SlotPool<Session>,
    pub(crate) by_activity: HashMap<Uuid, usize>,

    pub(crate) dcp: Dcp,
    pub(crate) im: im::ImRecords,
    pub(crate) lldp: LldpStore,
    pub(crate) logbook: Logbook,

    pub(crate) rpc_socket: usize,
    pub(crate) boot_time: u32,
    pub(crate) next_ephemeral: u16,

    fired: Vec<TimerKind>,
}

impl Stack {
    fn new(
        cfg: DeviceConfig,
        events: Arc<dyn DeviceEvents>,
        platform: Box<dyn Platform>,
        log: Logger,
    ) -> Stack {
        Stack {
            cfg,
            events,
            platform,
            log,
            sched: Scheduler::new(),
            demux: FrameIdMap::new(),
            ident: IdentTree::new(),
            diag: DiagStore::new(),
            ars: SlotPool::with_capacity(MAX_AR),
            live: IndexSet::new(),
            sessions: SlotPool::with_capacity(MAX_SESSIONS),
            by_activity: HashMap::new(),
            dcp: Dcp::new(),
            im: im::ImRecords::default(),
            lldp: LldpStore::new(),
            logbook: Logbook::new(),
            rpc_socket: 0,
            boot_time: 0,
            next_ephemeral: RPC_EPHEMERAL_PORT_BASE,
            fired: Vec::new(),
        }
    }

    fn startup(&mut self) -> StackResult<()> {
        self.boot_time = girder::time::timestamp_secs() as u32;

        // The device access point is plugged once, with fixed identifiers
        // for the identity, the interface and each physical port.
        let dap = self.cfg.dap;
        self.plug_module(0, 0, dap.module_ident)?;
        self.plug_submodule(0, 0, SUBSLOT_DAP_IDENT, dap.identity_submodule_ident, SubmoduleDir::NoIo, 0, 0)?;
        self.plug_submodule(
            0,
            0,
            SUBSLOT_INTERFACE,
            dap.interface_submodule_ident,
            SubmoduleDir::NoIo,
            0,
            0,
        )?;
        for port in 0..self.cfg.num_ports {
            self.plug_submodule(
                0,
                0,
                SUBSLOT_PORT_BASE + port as u16,
                dap.port_submodule_ident,
                SubmoduleDir::NoIo,
                0,
                0,
            )?;
        }

        // Device-global frame ids.
        self.demux.register(FRAME_ID_DCP_GETSET, FrameHandler::DcpGetSet)?;
        self.demux
            .register(FRAME_ID_DCP_IDENT_REQ, FrameHandler::DcpIdentifyReq)?;
        self.demux
            .register(FRAME_ID_DCP_IDENT_RSP, FrameHandler::DcpIdentifyRsp)?;
        self.demux.register(FRAME_ID_DCP_HELLO, FrameHandler::DcpHello)?;
        self.demux.register(FRAME_ID_ALARM_HIGH, FrameHandler::AlarmHigh)?;
        self.demux.register(FRAME_ID_ALARM_LOW, FrameHandler::AlarmLow)?;

        // Restore persisted state; corrupt or missing files mean defaults.
        self.im = self.cfg.im.clone();
        if let Some(bytes) = files::load(self.platform.as_mut(), files::names::IM_RECORDS, FILE_VERSION_IM)
        {
            let _ = self.im.writable_from_bytes(&bytes);
        }
        if let Some(bytes) = files::load(
            self.platform.as_mut(),
            files::names::PORT_CHECK,
            FILE_VERSION_PORT_CHECK,
        ) {
            let _ = self.lldp.checks_from_bytes(&bytes);
        }
        if let Some(bytes) = files::load(
            self.platform.as_mut(),
            files::names::PORT_ADJUST,
            FILE_VERSION_PORT_CHECK,
        ) {
            let _ = self.lldp.adjusts_from_bytes(&bytes);
        }
        if let Some(bytes) = files::load(
            self.platform.as_mut(),
            files::names::SYSTEM_INFO,
            FILE_VERSION_SYSTEM,
        ) {
            let _ = self.lldp.system_from_bytes(&bytes);
        }
        self.dcp_restore()?;

        self.rpc_socket = self
            .platform
            .udp_open(Ipv4Addr::UNSPECIFIED, RPC_SERVER_PORT)?;

        if self.dcp.station_name.is_empty() {
            self.dcp_start_hello();
        }

        logging::info!(self.log, "device started";
                       "station" => %self.dcp.station_name,
                       "mac" => %self.cfg.mac);
        Ok(())
    }

    /* ----- tick and receive entry points ----- */

    /// One periodic tick: advance the scheduler, run expired work, drain
    /// the UDP endpoints.
    pub fn periodic(&mut self) {
        let now = self.platform.now_us();

        let mut fired = std::mem::replace(&mut self.fired, Vec::new());
        fired.clear();
        self.sched.tick(now, &mut fired);
        for kind in fired.drain(..) {
            self.dispatch_timer(kind);
        }
        self.fired = fired;

        self.rpc_poll();
    }

    /// Classify and consume one inbound Ethernet frame. Returns true when
    /// the frame was taken.
    pub fn handle_eth_frame(&mut self, _port: usize, frame: &[u8]) -> bool {
        let parsed = match eth::parse(frame) {
            Some(parsed) => parsed,
            None => return false,
        };

        let handler = match self.demux.lookup(parsed.frame_id) {
            Some(handler) => handler,
            // Unknown frame ids are silently dropped.
            None => return false,
        };

        match handler {
            FrameHandler::CyclicData { ar, cr } => {
                self.cyclic_receive(ar, cr, parsed.src, parsed.frame_id, parsed.payload)
            }
            FrameHandler::AlarmHigh => self.alarm_receive(true, parsed.src, parsed.payload),
            FrameHandler::AlarmLow => self.alarm_receive(false, parsed.src, parsed.payload),
            FrameHandler::DcpGetSet
            | FrameHandler::DcpIdentifyReq
            | FrameHandler::DcpIdentifyRsp
            | FrameHandler::DcpHello => {
                self.dcp_handle_frame(parsed.frame_id, parsed.src, parsed.payload);
                true
            }
        }
    }

    fn dispatch_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::PpmSend { ar, cr } => self.ppm_send_tick(ar, cr),
            TimerKind::CpmDataHold { ar, cr } => self.cpm_dht_expired(ar, cr),
            TimerKind::AlarmRetransmit { ar, lane } => self.alarm_retransmit_tick(ar, lane),
            TimerKind::CmsmTimeout { ar } => self.cmsm_expired(ar),
            TimerKind::SessionResend { session } => self.session_resend_tick(session),
            TimerKind::SessionFragTimeout { session } => self.session_frag_tick(session),
            TimerKind::DcpResponse => self.dcp_send_pending(),
            TimerKind::DcpHello => self.dcp_hello_tick(),
            TimerKind::SignalLedOff => self.dcp_led_off(),
        }
    }

    /* ----- cyclic data plane ----- */

    fn ppm_send_tick(&mut self, ar_index: usize, cr_index: usize) {
        let own_mac = self.cfg.mac;

        let sent = {
            let ar = match self.ars.get_mut(ar_index) {
                Some(ar) => ar,
                None => return,
            };
            let dst = ar.param.initiator_mac;

            let ppm = match ar.iocrs.get_mut(cr_index).and_then(|iocr| iocr.ppm.as_mut()) {
                Some(ppm) => ppm,
                None => return,
            };

            match ppm.next_frame(dst, own_mac) {
                Ok(frame) => Some((frame, ppm.period_us())),
                Err(_) => None,
            }
        };

        let (frame, period) = match sent {
            Some(sent) => sent,
            None => return,
        };

        if self.platform.eth_send(0, &frame).is_err() {
            if let Some(ppm) = self
                .ars
                .get_mut(ar_index)
                .and_then(|ar| ar.iocrs.get_mut(cr_index))
                .and_then(|iocr| iocr.ppm.as_mut())
            {
                ppm.note_send_error();
            }
        }

        // Rearm the cadence timer before anything else can fail.
        let handle = self
            .sched
            .schedule(period, TimerKind::PpmSend { ar: ar_index, cr: cr_index }, "ppm_send");
        if let Some(ar) = self.ars.get_mut(ar_index) {
            ar.ppm_has_sent = true;
            if let (Ok(handle), Some(ppm)) = (
                handle,
                ar.iocrs.get_mut(cr_index).and_then(|iocr| iocr.ppm.as_mut()),
            ) {
                ppm.timer = Some(handle);
            }
        }

        self.maybe_enter_data(ar_index);
    }

    fn cyclic_receive(
        &mut self,
        ar_index: usize,
        cr_index: usize,
        src: MacAddr,
        frame_id: u16,
        payload: &[u8],
    ) -> bool {
        let (accept, dht_delay, timer, arep, recv_status) = {
            let ar = match self.ars.get_mut(ar_index) {
                Some(ar) => ar,
                None => return false,
            };
            let arep = ar.arep;

            let cpm = match ar.iocrs.get_mut(cr_index).and_then(|iocr| iocr.cpm.as_mut()) {
                Some(cpm) => cpm,
                None => return false,
            };

            let accept = cpm.accept_frame(src, frame_id, payload);
            (
                accept,
                cpm.data_hold_us(),
                cpm.dht_timer,
                arep,
                cpm.data_status(),
            )
        };

        let accept = match accept {
            Some(accept) => accept,
            None => return false,
        };

        // Restart the data-hold watchdog.
        match timer {
            Some(handle) => {
                let _ = self.sched.reschedule(handle, dht_delay);
            }
            None => {
                let handle = self.sched.schedule(
                    dht_delay,
                    TimerKind::CpmDataHold { ar: ar_index, cr: cr_index },
                    "cpm_dht",
                );
                if let (Ok(handle), Some(cpm)) = (
                    handle,
                    self.ars
                        .get_mut(ar_index)
                        .and_then(|ar| ar.iocrs.get_mut(cr_index))
                        .and_then(|iocr| iocr.cpm.as_mut()),
                ) {
                    cpm.dht_timer = Some(handle);
                }
            }
        }

        if let Some(ar) = self.ars.get_mut(ar_index) {
            ar.cpm_has_received = true;
        }

        if accept.data_status_changed.is_some() {
            let events = Arc::clone(&self.events);
            events.new_data_status_ind(self, arep, cr_index, recv_status);
        }

        self.maybe_enter_data(ar_index);
        true
    }

    fn cpm_dht_expired(&mut self, ar_index: usize, cr_index: usize) {
        let expired = match self.ars.get_mut(ar_index) {
            Some(ar) => match ar.iocrs.get_mut(cr_index).and_then(|iocr| iocr.cpm.as_mut()) {
                Some(cpm) => {
                    cpm.dht_timer = None;
                    true
                }
                None => false,
            },
            None => false,
        };

        if expired {
            logging::warn!(self.log, "consumer data-hold expired"; "ar" => ar_index, "cr" => cr_index);
            self.abort_ar(
                ar_index,
                PnioStatus::abort(codes::ABORT_CONSUMER_DHT_EXPIRED),
            );
        }
    }

    fn cmsm_expired(&mut self, ar_index: usize) {
        let running = match self.ars.get_mut(ar_index) {
            Some(ar) => {
                ar.cmsm_timer = None;
                !matches!(ar.state, CmdevState::Data | CmdevState::Abort)
            }
            None => false,
        };

        if running {
            logging::warn!(self.log, "connection establishment timed out"; "ar" => ar_index);
            self.abort_ar(ar_index, PnioStatus::abort(codes::ABORT_CMI_TIMEOUT));
        }
    }

    /// The WDATA → DATA edge: both directions have seen traffic.
    pub(crate) fn maybe_enter_data(&mut self, ar_index: usize) {
        let arep = match self.ars.get_mut(ar_index) {
            Some(ar) if ar.state == CmdevState::WData && ar.cyclic_established() => {
                ar.state = CmdevState::Data;
                ar.arep
            }
            _ => return,
        };

        if let Some(handle) = self.ars.get_mut(ar_index).and_then(|ar| ar.cmsm_timer.take()) {
            self.sched.cancel(handle);
        }

        logging::info!(self.log, "cyclic data exchange established"; "arep" => arep);
        let events = Arc::clone(&self.events);
        events.state_ind(self, arep, ArEvent::Data, PnioStatus::OK);
    }

    /* ----- alarm plane ----- */

    fn alarm_receive(&mut self, high: bool, src: MacAddr, payload: &[u8]) -> bool {
        if payload.len() < 12 {
            return false;
        }

        // Our reference is the arep, which is the slot index plus one.
        let dst_ref = u16::from_be_bytes([payload[0], payload[1]]);
        let ar_index = (dst_ref as usize).wrapping_sub(1);
        let lane_index = if high { LANE_HIGH } else { LANE_LOW };

        let (output, timer, arep) = {
            let ar = match self.ars.get_mut(ar_index) {
                Some(ar) => ar,
                None => return false,
            };
            let arep = ar.arep;
            let lane = match ar.lanes.get_mut(lane_index) {
                Some(lane) => lane,
                None => return false,
            };

            let output = match lane.on_frame(src, payload) {
                Ok(output) => output,
                Err(_) => return false,
            };
            (output, lane.timer, arep)
        };

        match output.event {
            LaneEvent::None => {
                self.send_alarm_frames(&output.frames);
            }
            LaneEvent::Notification(notification) => {
                // The transport ack answers the DATA PDU on receipt; the
                // alarm-level acknowledgement stays with the application's
                // `alarm_send_ack` call.
                self.send_alarm_frames(&output.frames);

                let events = Arc::clone(&self.events);
                if events.alarm_ind(self, arep, &notification).is_err() {
                    self.abort_ar(
                        ar_index,
                        PnioStatus::abort(codes::ABORT_ALARM_IND_ERROR),
                    );
                }
            }
            LaneEvent::Confirmed => {
                if let Some(handle) = timer {
                    self.sched.cancel(handle);
                    self.clear_lane_timer(ar_index, lane_index);
                }
                let events = Arc::clone(&self.events);
                events.alarm_cnf(self, arep, PnioStatus::OK);

                // A queued notification may have gone out right away.
                if !output.frames.is_empty() {
                    self.send_alarm_frames(&output.frames);
                    self.arm_lane_timer(ar_index, lane_index);
                }
            }
            LaneEvent::AckConfirmed => {
                if let Some(handle) = timer {
                    self.sched.cancel(handle);
                    self.clear_lane_timer(ar_index, lane_index);
                }
                let events = Arc::clone(&self.events);
                events.alarm_ack_cnf(self, arep, PnioStatus::OK);
            }
            LaneEvent::Fatal(code) => {
                self.abort_ar(
                    ar_index,
                    PnioStatus::pnio(codes::CODE_RTA_ERROR, codes::C1_APMR, code),
                );
            }
        }

        true
    }

    fn alarm_retransmit_tick(&mut self, ar_index: usize, lane_index: usize) {
        let outcome = match self
            .ars
            .get_mut(ar_index)
            .and_then(|ar| ar.lanes.get_mut(lane_index))
        {
            Some(lane) => {
                lane.timer = None;
                lane.on_timeout()
            }
            None => return,
        };

        match outcome {
            TimeoutOutcome::Resend(frame) => {
                self.send_alarm_frames(&[frame]);
                self.arm_lane_timer(ar_index, lane_index);
            }
            TimeoutOutcome::Exhausted => {
                let status = self
                    .ars
                    .get(ar_index)
                    .and_then(|ar| ar.lanes.get(lane_index))
                    .map(|lane| lane.apms_timeout_status())
                    .unwrap_or_else(|| PnioStatus::abort(codes::ABORT_CODE_SEQ));
                self.abort_ar(ar_index, status);
            }
            TimeoutOutcome::Idle => {}
        }
    }

    fn send_alarm_frames(&mut self, frames: &[Vec<u8>]) {
        for frame in frames {
            if self.platform.eth_send(0, frame).is_err() {
                logging::warn!(self.log, "alarm frame send failed");
            }
        }
    }

    fn arm_lane_timer(&mut self, ar_index: usize, lane_index: usize) {
        let timeout = match self
            .ars
            .get(ar_index)
            .and_then(|ar| ar.lanes.get(lane_index))
        {
            Some(lane) if lane.has_pending() => lane.timeout_us(),
            _ => return,
        };

        let handle = self.sched.schedule(
            timeout,
            TimerKind::AlarmRetransmit {
                ar: ar_index,
                lane: lane_index,
            },
            "alarm_rta",
        );
        if let (Ok(handle), Some(lane)) = (
            handle,
            self.ars
                .get_mut(ar_index)
                .and_then(|ar| ar.lanes.get_mut(lane_index)),
        ) {
            lane.timer = Some(handle);
        }
    }

    fn clear_lane_timer(&mut self, ar_index: usize, lane_index: usize) {
        if let Some(lane) = self
            .ars
            .get_mut(ar_index)
            .and_then(|ar| ar.lanes.get_mut(lane_index))
        {
            lane.timer = None;
        }
    }

    /* ----- AR teardown ----- */

    /// Abort an AR: cancel every timer referencing it, flush the alarm
    /// lanes, deregister frame ids, free sessions, release ownership, and
    /// tell the application.
    pub(crate) fn abort_ar(&mut self, ar_index: usize, status: PnioStatus) {
        let mut ar = match self.ars.reclaim(ar_index) {
            Some(ar) => ar,
            None => return,
        };
        self.live.swap_remove(&ar_index);

        for iocr in ar.iocrs.iter_mut() {
            if let Some(ppm) = iocr.ppm.as_mut() {
                if let Some(handle) = ppm.timer.take() {
                    self.sched.cancel(handle);
                }
                ppm.deactivate();
            }
            if let Some(cpm) = iocr.cpm.as_mut() {
                if let Some(handle) = cpm.dht_timer.take() {
                    self.sched.cancel(handle);
                }
                cpm.deactivate();
            }
        }

        for lane in ar.lanes.iter_mut() {
            if let Some(handle) = lane.timer.take() {
                self.sched.cancel(handle);
            }
            lane.close();
        }

        if let Some(handle) = ar.cmsm_timer.take() {
            self.sched.cancel(handle);
        }

        self.demux.unregister_ar(ar_index);
        self.ident.release_owner(ar.arep);
        self.rpc_kill_ar_sessions(ar.arep);

        self.logbook.append(LogbookEntry {
            timestamp_us: self.sched.now_us(),
            ar_uuid: ar.param.ar_uuid,
            status,
            entry_detail: u32::from(ar.arep),
        });

        logging::info!(self.log, "ar aborted";
                       "arep" => ar.arep,
                       "status" => ?status);

        let events = Arc::clone(&self.events);
        events.state_ind(self, ar.arep, ArEvent::Abort, status);
    }

    pub(crate) fn abort_all_ars(&mut self, status: PnioStatus) {
        let indices: Vec<usize> = self.live.iter().copied().collect();
        for ar_index in indices {
            self.abort_ar(ar_index, status);
        }
    }

    /* ----- lookups and small helpers ----- */

    pub(crate) fn find_ar_by_uuid(&self, uuid: Uuid) -> Option<usize> {
        self.ars
            .iter()
            .find(|(_, ar)| ar.param.ar_uuid == uuid)
            .map(|(index, _)| index)
    }

    fn ar_index(&self, arep: Arep) -> StackResult<usize> {
        let index = (arep as usize).wrapping_sub(1);
        match self.ars.get(index) {
            Some(ar) if ar.arep == arep => Ok(index),
            _ => Err(StackError::NotFound),
        }
    }

    fn ar_mut(&mut self, arep: Arep) -> StackResult<&mut Ar> {
        let index = self.ar_index(arep)?;
        self.ars.get_mut(index).ok_or(StackError::NotFound)
    }

    pub(crate) fn random_uuid(&mut self) -> Uuid {
        let mut data4 = [0u8; 8];
        let a = self.platform.rand_u32().to_be_bytes();
        let b = self.platform.rand_u32().to_be_bytes();
        data4[..4].copy_from_slice(&a);
        data4[4..].copy_from_slice(&b);

        Uuid {
            data1: self.platform.rand_u32(),
            data2: self.platform.rand_u32() as u16,
            data3: 0x4000 | (self.platform.rand_u32() as u16 & 0x0FFF),
            data4,
        }
    }

    pub(crate) fn persist_im(&mut self) {
        let bytes = self.im.writable_to_bytes();
        let _ = files::save(
            self.platform.as_mut(),
            files::names::IM_RECORDS,
            FILE_VERSION_IM,
            &bytes,
        );
    }

    pub(crate) fn persist_port_checks(&mut self) {
        let bytes = self.lldp.checks_to_bytes();
        let _ = files::save(
            self.platform.as_mut(),
            files::names::PORT_CHECK,
            FILE_VERSION_PORT_CHECK,
            &bytes,
        );
    }

    pub(crate) fn persist_port_adjusts(&mut self) {
        let bytes = self.lldp.adjusts_to_bytes();
        let _ = files::save(
            self.platform.as_mut(),
            files::names::PORT_ADJUST,
            FILE_VERSION_PORT_CHECK,
            &bytes,
        );
    }

    fn persist_system_info(&mut self) {
        let bytes = self.lldp.system_to_bytes();
        let _ = files::save(
            self.platform.as_mut(),
            files::names::SYSTEM_INFO,
            FILE_VERSION_SYSTEM,
            &bytes,
        );
    }

    pub(crate) fn raise_port_mismatch_diagnosis(&mut self, port: usize) -> StackResult<()> {
        use crate::diag::{ChannelProperties, Maintenance};

        self.diag_std_add(
            SubslotKey::new(0, 0, SUBSLOT_PORT_BASE + port as u16),
            StdDiag {
                channel: 0x8000,
                properties: ChannelProperties::default()
                    .with_maintenance(Maintenance::Fault)
                    .with_specifier(Specifier::Appears),
                error_type: 0x8001,
                ext_error_type: 0x8000,
                ext_value: 0,
                qualifier: 0,
            },
        )
    }

    /* ----- identification facade ----- */

    pub fn plug_module(&mut self, api: u32, slot: u16, module_ident: u32) -> StackResult<()> {
        self.ident.plug_module(api, slot, module_ident)
    }

    pub fn plug_submodule(
        &mut self,
        api: u32,
        slot: u16,
        subslot: u16,
        ident: u32,
        dir: SubmoduleDir,
        input_len: u16,
        output_len: u16,
    ) -> StackResult<()> {
        self.ident
            .plug_submodule(api, slot, subslot, ident, dir, input_len, output_len)
    }

    /// Pull a submodule, releasing its diagnosis chain.
    pub fn pull_submodule(&mut self, api: u32, slot: u16, subslot: u16) -> StackResult<()> {
        let mut pulled = self.ident.pull_submodule(api, slot, subslot)?;
        self.diag.clear_subslot(&mut pulled);
        Ok(())
    }

    /// Pull a module and everything plugged into it.
    pub fn pull_module(&mut self, api: u32, slot: u16) -> StackResult<()> {
        let subslots: Vec<u16> = match self.ident.slot(api, slot) {
            Some(slot_entry) => slot_entry.subslots.iter().map(|s| s.subslot_nr).collect(),
            None => return Err(StackError::NotFound),
        };

        for subslot in subslots {
            self.pull_submodule(api, slot, subslot)?;
        }
        self.ident.pull_module(api, slot)
    }

    /* ----- cyclic data facade ----- */

    pub fn input_set_data_and_iops(
        &mut self,
        arep: Arep,
        key: SubslotKey,
        data: &[u8],
        iops: u8,
    ) -> StackResult<()> {
        let ar = self.ar_mut(arep)?;
        let (cr_index, desc) = ar.provider_desc(key).ok_or(StackError::NotFound)?;
        let ppm = ar.iocrs[cr_index].ppm.as_mut().ok_or(StackError::WrongState)?;
        ppm.write_data_and_iops(&desc, data, iops)
    }

    pub fn input_get_iocs(&mut self, arep: Arep, key: SubslotKey) -> StackResult<u8> {
        let ar = self.ar_mut(arep)?;
        let (cr_index, desc) = ar.consumer_iocs_desc(key).ok_or(StackError::NotFound)?;
        let cpm = ar.iocrs[cr_index].cpm.as_ref().ok_or(StackError::WrongState)?;
        cpm.get_iocs(&desc)
    }

    pub fn output_get_data_and_iops(
        &mut self,
        arep: Arep,
        key: SubslotKey,
    ) -> StackResult<(Vec<u8>, u8, bool)> {
        let ar = self.ar_mut(arep)?;
        let (cr_index, desc) = ar.consumer_desc(key).ok_or(StackError::NotFound)?;
        let cpm = ar.iocrs[cr_index].cpm.as_mut().ok_or(StackError::WrongState)?;
        cpm.get_data_and_iops(&desc)
    }

    pub fn output_set_iocs(&mut self, arep: Arep, key: SubslotKey, iocs: u8) -> StackResult<()> {
        let ar = self.ar_mut(arep)?;
        let (cr_index, desc) = ar.provider_iocs_desc(key).ok_or(StackError::NotFound)?;
        let ppm = ar.iocrs[cr_index].ppm.as_mut().ok_or(StackError::WrongState)?;
        ppm.write_iocs(&desc, iocs)
    }

    /* ----- AR control facade ----- */

    /// Signal that parameterization finished. Emits the application-ready
    /// CControl towards the controller.
    pub fn application_ready(&mut self, arep: Arep) -> StackResult<()> {
        let ar_index = self.ar_index(arep)?;

        let allowed = matches!(
            self.ars.get(ar_index).map(|ar| ar.state),
            Some(CmdevState::WPeres) | Some(CmdevState::WArdy)
        );
        if !allowed {
            return Err(StackError::WrongState);
        }

        if let Some(ar) = self.ars.get_mut(ar_index) {
            ar.state = CmdevState::WArdy;
        }

        self.ccontrol_send_appl_ready(ar_index)?;

        if let Some(ar) = self.ars.get_mut(ar_index) {
            ar.state = CmdevState::WArdyCnf;
        }
        Ok(())
    }

    /// Application-requested abort.
    pub fn ar_abort(&mut self, arep: Arep) -> StackResult<()> {
        let ar_index = self.ar_index(arep)?;
        self.abort_ar(ar_index, PnioStatus::abort(codes::ABORT_AR_ABORT_REQ));
        Ok(())
    }

    /// Wipe persisted state, clear the station identity and abort every
    /// AR. Leaves the device back in the setup state.
    pub fn factory_reset(&mut self) -> StackResult<()> {
        self.factory_reset_internal(false)
    }

    pub(crate) fn factory_reset_internal(&mut self, from_dcp: bool) -> StackResult<()> {
        logging::info!(self.log, "factory reset"; "via_dcp" => from_dcp);

        files::clear_all(self.platform.as_mut());
        self.abort_all_ars(PnioStatus::abort(codes::ABORT_DCP_RESET_TO_FACTORY));

        self.dcp.station_name.clear();
        self.dcp.ip = IpSuite::UNSET;
        self.dcp.update_state();

        self.im = self.cfg.im.clone();
        for port in 0..self.cfg.num_ports {
            self.lldp.set_check(port, None);
            self.lldp.set_adjust(port, None);
        }
        self.lldp.system = SystemInfo::default();

        let events = Arc::clone(&self.events);
        let _ = events.reset_ind(self, true);
        Ok(())
    }

    /* ----- alarm facade ----- */

    /// Send a process alarm on the high priority lane. `Busy` while the
    /// previous alarm awaits its acknowledgement.
    pub fn alarm_send_process_alarm(
        &mut self,
        arep: Arep,
        key: SubslotKey,
        usi: u16,
        data: &[u8],
    ) -> StackResult<()> {
        if usi > 0x7FFF {
            return Err(StackError::InvalidArgument);
        }

        let (module_ident, submodule_ident) = self.idents_of(key);
        let max_len = self
            .ars
            .get(self.ar_index(arep)?)
            .map(|ar| ar.alarm_param.max_alarm_len as usize)
            .unwrap_or(0);
        if data.len() > max_len {
            return Err(StackError::TooLarge);
        }

        let notification = AlarmNotification {
            alarm_type: alarm_type::PROCESS,
            key,
            module_ident,
            submodule_ident,
            specifier: 0,
            usi,
            data: data.to_vec(),
        };

        let ar_index = self.ar_index(arep)?;
        let frame = {
            let ar = self.ars.get_mut(ar_index).ok_or(StackError::NotFound)?;
            let lane = ar.lanes.get_mut(LANE_HIGH).ok_or(StackError::WrongState)?;
            lane.send_alarm(notification)?
        };

        self.send_alarm_frames(&[frame]);
        self.arm_lane_timer(ar_index, LANE_HIGH);
        Ok(())
    }

    /// Acknowledge a received alarm after handling it.
    pub fn alarm_send_ack(
        &mut self,
        arep: Arep,
        alarm: &AlarmNotification,
        status: PnioStatus,
    ) -> StackResult<()> {
        use crate::alarm::AlpmrState;

        let ar_index = self.ar_index(arep)?;

        let ack = AlarmAck {
            alarm_type: alarm.alarm_type,
            key: alarm.key,
            specifier: alarm.specifier,
            status,
        };

        let (frame, lane_index) = {
            let ar = self.ars.get_mut(ar_index).ok_or(StackError::NotFound)?;
            let lane_index = ar
                .lanes
                .iter()
                .position(|lane| lane.alpmr_state() == AlpmrState::WUserAck)
                .ok_or(StackError::WrongState)?;
            let frame = ar.lanes[lane_index].send_user_ack(ack)?;
            (frame, lane_index)
        };

        self.send_alarm_frames(&[frame]);
        self.arm_lane_timer(ar_index, lane_index);
        Ok(())
    }

    /* ----- diagnosis facade ----- */

    pub fn diag_std_add(&mut self, key: SubslotKey, diag: StdDiag) -> StackResult<()> {
        {
            let sub = self
                .ident
                .subslot_mut(key.api, key.slot, key.subslot)
                .ok_or(StackError::NotFound)?;
            self.diag.add_std(sub, diag.clone())?;
        }

        let payload = std_diag_payload(&StdDiag {
            properties: diag.properties.with_specifier(Specifier::Appears),
            ..diag
        });
        self.emit_diag_alarm(key, alarm_type::DIAGNOSIS, payload);
        Ok(())
    }

    pub fn diag_std_update(&mut self, key: SubslotKey, diag: StdDiag) -> StackResult<()> {
        {
            let sub = self
                .ident
                .subslot_mut(key.api, key.slot, key.subslot)
                .ok_or(StackError::NotFound)?;
            self.diag.update_std(sub, diag.clone())?;
        }

        let payload = std_diag_payload(&StdDiag {
            properties: diag.properties.with_specifier(Specifier::Appears),
            ..diag
        });
        self.emit_diag_alarm(key, alarm_type::DIAGNOSIS, payload);
        Ok(())
    }

    pub fn diag_std_remove(
        &mut self,
        key: SubslotKey,
        channel: u16,
        error_type: u16,
        ext_error_type: u16,
    ) -> StackResult<()> {
        let removed = {
            let sub = self
                .ident
                .subslot_mut(key.api, key.slot, key.subslot)
                .ok_or(StackError::NotFound)?;
            self.diag.remove_std(sub, channel, error_type, ext_error_type)?
        };

        let payload = std_diag_payload(&StdDiag {
            properties: removed.properties.with_specifier(Specifier::Disappears),
            ..removed
        });
        self.emit_diag_alarm(key, alarm_type::DIAGNOSIS_DISAPPEARS, payload);
        Ok(())
    }

    pub fn diag_usi_add(&mut self, key: SubslotKey, usi: u16, data: &[u8]) -> StackResult<()> {
        {
            let sub = self
                .ident
                .subslot_mut(key.api, key.slot, key.subslot)
                .ok_or(StackError::NotFound)?;
            self.diag.add_usi(sub, usi, data)?;
        }

        self.emit_diag_alarm(key, alarm_type::DIAGNOSIS, (usi, data.to_vec()));
        Ok(())
    }

    pub fn diag_usi_update(&mut self, key: SubslotKey, usi: u16, data: &[u8]) -> StackResult<()> {
        {
            let sub = self
                .ident
                .subslot_mut(key.api, key.slot, key.subslot)
                .ok_or(StackError::NotFound)?;
            self.diag.update_usi(sub, usi, data)?;
        }

        self.emit_diag_alarm(key, alarm_type::DIAGNOSIS, (usi, data.to_vec()));
        Ok(())
    }

    pub fn diag_usi_remove(&mut self, key: SubslotKey, usi: u16) -> StackResult<()> {
        let removed = {
            let sub = self
                .ident
                .subslot_mut(key.api, key.slot, key.subslot)
                .ok_or(StackError::NotFound)?;
            self.diag.remove_usi(sub, usi)?
        };

        self.emit_diag_alarm(
            key,
            alarm_type::DIAGNOSIS_DISAPPEARS,
            (removed.usi, removed.data),
        );
        Ok(())
    }

    /// Diagnosis changes ride the low priority lane of the owning AR.
    fn emit_diag_alarm(&mut self, key: SubslotKey, alarm: u16, payload: (u16, Vec<u8>)) {
        let owner = self
            .ident
            .subslot(key.api, key.slot, key.subslot)
            .and_then(|sub| sub.owner);

        let arep = match owner {
            Some(arep) => arep,
            None => return,
        };
        let ar_index = match self.ar_index(arep) {
            Ok(index) => index,
            Err(_) => return,
        };

        let (module_ident, submodule_ident) = self.idents_of(key);
        let (usi, data) = payload;

        let notification = AlarmNotification {
            alarm_type: alarm,
            key,
            module_ident,
            submodule_ident,
            specifier: 0,
            usi,
            data,
        };

        let frame = {
            let ar = match self.ars.get_mut(ar_index) {
                Some(ar) => ar,
                None => return,
            };
            match ar.lanes.get_mut(LANE_LOW) {
                Some(lane) if lane.is_open() => match lane.enqueue_alarm(notification) {
                    Ok(frame) => frame,
                    Err(err) => {
                        logging::warn!(self.log, "diagnosis alarm dropped"; "err" => %err);
                        None
                    }
                },
                _ => return,
            }
        };

        if let Some(frame) = frame {
            self.send_alarm_frames(&[frame]);
            self.arm_lane_timer(ar_index, LANE_LOW);
        }
    }

    fn idents_of(&self, key: SubslotKey) -> (u32, u32) {
        let module_ident = self
            .ident
            .slot(key.api, key.slot)
            .map(|slot| slot.module_ident)
            .unwrap_or(0);
        let submodule_ident = self
            .ident
            .subslot(key.api, key.slot, key.subslot)
            .map(|sub| sub.ident)
            .unwrap_or(0);
        (module_ident, submodule_ident)
    }

    /* ----- data status controls ----- */

    fn set_status_bit_everywhere(&mut self, bit: u8, on: bool) {
        for (_, ar) in self.ars.iter_mut() {
            for iocr in ar.iocrs.iter_mut() {
                if let Some(ppm) = iocr.ppm.as_mut() {
                    ppm.set_data_status_bit(bit, on);
                }
            }
        }
    }

    /// Primary (true) or backup (false) across all providers.
    pub fn set_primary_state(&mut self, primary: bool) {
        self.set_status_bit_everywhere(data_status::STATE, primary);
    }

    pub fn set_redundancy_state(&mut self, redundant: bool) {
        self.set_status_bit_everywhere(data_status::REDUNDANCY, redundant);
    }

    /// Run (true) or stop (false) across all providers.
    pub fn set_provider_state(&mut self, run: bool) {
        self.set_status_bit_everywhere(data_status::PROVIDER_STATE, run);
    }

    /* ----- neighbourhood and MIB facade ----- */

    /// Feed from the external LLDP receiver. A changed peer raises the
    /// port-data-change alarm and re-evaluates the configured peer check.
    pub fn set_peer_info(&mut self, port: usize, peer: PeerInfo) {
        let changed = self.lldp.set_peer(port, peer);
        if !changed {
            return;
        }

        let key = SubslotKey::new(0, 0, SUBSLOT_PORT_BASE + port as u16);
        self.emit_diag_alarm(key, alarm_type::PORT_DATA_CHANGE, (0, Vec::new()));

        if self.lldp.check_mismatch(port) {
            let _ = self.raise_port_mismatch_diagnosis(port);
        } else {
            let key = SubslotKey::new(0, 0, SUBSLOT_PORT_BASE + port as u16);
            let _ = self.diag_std_remove(key, 0x8000, 0x8001, 0x8000);
        }
    }

    pub fn peer_info(&self, port: usize) -> Option<&PeerInfo> {
        self.lldp.peer(port)
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.lldp.system
    }

    pub fn set_system_info(&mut self, info: SystemInfo) {
        self.lldp.system = info;
        self.persist_system_info();
    }

    /* ----- read-only state ----- */

    pub fn station_name(&self) -> &str {
        &self.dcp.station_name
    }

    pub fn ip_suite(&self) -> IpSuite {
        self.dcp.ip
    }

    pub fn cmina_state(&self) -> crate::dcp::CminaState {
        self.dcp.state
    }

    pub fn ar_state(&self, arep: Arep) -> Option<CmdevState> {
        self.ar_index(arep).ok().and_then(|index| {
            self.ars.get(index).map(|ar| ar.state)
        })
    }

    pub fn active_ar_count(&self) -> usize {
        self.live.len()
    }

    pub fn logbook(&self) -> &Logbook {
        &self.logbook
    }
}

/// Build the alarm payload of a standard diagnosis record.
fn std_diag_payload(diag: &StdDiag) -> (u16, Vec<u8>) {
    use crate::alarm::usi;

    let discriminator = if diag.qualifier != 0 {
        usi::QUALIFIED_CHANNEL_DIAGNOSIS
    } else if diag.ext_error_type != 0 || diag.ext_value != 0 {
        usi::EXT_CHANNEL_DIAGNOSIS
    } else {
        usi::CHANNEL_DIAGNOSIS
    };

    let mut data = Vec::with_capacity(16);
    data.extend_from_slice(&diag.channel.to_be_bytes());
    data.extend_from_slice(&diag.properties.0.to_be_bytes());
    data.extend_from_slice(&diag.error_type.to_be_bytes());
    if discriminator != usi::CHANNEL_DIAGNOSIS {
        data.extend_from_slice(&diag.ext_error_type.to_be_bytes());
        data.extend_from_slice(&diag.ext_value.to_be_bytes());
    }
    if discriminator == usi::QUALIFIED_CHANNEL_DIAGNOSIS {
        data.extend_from_slice(&diag.qualifier.to_be_bytes());
    }

    (discriminator, data)
}

/// Thread-safe facade around the stack. The tick thread, the Ethernet
/// receive context and application calls serialize on one short-held lock.
pub struct Device {
    core: Mutex<Stack>,
}

impl Device {
    /// Bring up a device instance: plug the DAP, restore persisted state,
    /// open the RPC endpoint and start discovery.
    pub fn init<E, P, L>(cfg: DeviceConfig, events: E, platform: P, log: L) -> StackResult<Device>
    where
        E: DeviceEvents + 'static,
        P: Platform + 'static,
        L: Into<Option<Logger>>,
    {
        let log = log.into().unwrap_or_else(logging::discard);
        let mut stack = Stack::new(cfg, Arc::new(events), Box::new(platform), log);
        stack.startup()?;

        Ok(Device {
            core: Mutex::new(stack),
        })
    }

    #[inline]
    fn lock(&self) -> std::sync::MutexGuard<Stack> {
        self.core.lock().expect("device lock poisoned")
    }

    /// Must be called at the configured tick rate from a single thread.
    pub fn handle_periodic(&self) {
        self.lock().periodic();
    }

    /// Ethernet receive entry; safe to call from a different thread than
    /// the tick.
    pub fn handle_eth_frame(&self, port: usize, frame: &[u8]) -> bool {
        self.lock().handle_eth_frame(port, frame)
    }

    /// Run a closure against the locked stack. This is what event handlers
    /// get re-entrantly; applications use it for compound operations.
    pub fn with<R>(&self, operate: impl FnOnce(&mut Stack) -> R) -> R {
        operate(&mut self.lock())
    }

    pub fn plug_module(&self, api: u32, slot: u16, module_ident: u32) -> StackResult<()> {
        self.lock().plug_module(api, slot, module_ident)
    }

    pub fn plug_submodule(
        &self,
        api: u32,
        slot: u16,
        subslot: u16,
        ident: u32,
        dir: SubmoduleDir,
        input_len: u16,
        output_len: u16,
    ) -> StackResult<()> {
        self.lock()
            .plug_submodule(api, slot, subslot, ident, dir, input_len, output_len)
    }

    pub fn pull_module(&self, api: u32, slot: u16) -> StackResult<()> {
        self.lock().pull_module(api, slot)
    }

    pub fn pull_submodule(&self, api: u32, slot: u16, subslot: u16) -> StackResult<()> {
        self.lock().pull_submodule(api, slot, subslot)
    }

    pub fn input_set_data_and_iops(
        &self,
        arep: Arep,
        key: SubslotKey,
        data: &[u8],
        iops: u8,
    ) -> StackResult<()> {
        self.lock().input_set_data_and_iops(arep, key, data, iops)
    }

    pub fn input_get_iocs(&self, arep: Arep, key: SubslotKey) -> StackResult<u8> {
        self.lock().input_get_iocs(arep, key)
    }

    pub fn output_get_data_and_iops(
        &self,
        arep: Arep,
        key: SubslotKey,
    ) -> StackResult<(Vec<u8>, u8, bool)> {
        self.lock().output_get_data_and_iops(arep, key)
    }

    pub fn output_set_iocs(&self, arep: Arep, key: SubslotKey, iocs: u8) -> StackResult<()> {
        self.lock().output_set_iocs(arep, key, iocs)
    }

    pub fn application_ready(&self, arep: Arep) -> StackResult<()> {
        self.lock().application_ready(arep)
    }

    pub fn ar_abort(&self, arep: Arep) -> StackResult<()> {
        self.lock().ar_abort(arep)
    }

    pub fn factory_reset(&self) -> StackResult<()> {
        self.lock().factory_reset()
    }

    pub fn alarm_send_process_alarm(
        &self,
        arep: Arep,
        key: SubslotKey,
        usi: u16,
        data: &[u8],
    ) -> StackResult<()> {
        self.lock().alarm_send_process_alarm(arep, key, usi, data)
    }

    pub fn alarm_send_ack(
        &self,
        arep: Arep,
        alarm: &AlarmNotification,
        status: PnioStatus,
    ) -> StackResult<()> {
        self.lock().alarm_send_ack(arep, alarm, status)
    }

    pub fn diag_std_add(&self, key: SubslotKey, diag: StdDiag) -> StackResult<()> {
        self.lock().diag_std_add(key, diag)
    }

    pub fn diag_std_update(&self, key: SubslotKey, diag: StdDiag) -> StackResult<()> {
        self.lock().diag_std_update(key, diag)
    }

    pub fn diag_std_remove(
        &self,
        key: SubslotKey,
        channel: u16,
        error_type: u16,
        ext_error_type: u16,
    ) -> StackResult<()> {
        self.lock().diag_std_remove(key, channel, error_type, ext_error_type)
    }

    pub fn diag_usi_add(&self, key: SubslotKey, usi: u16, data: &[u8]) -> StackResult<()> {
        self.lock().diag_usi_add(key, usi, data)
    }

    pub fn diag_usi_update(&self, key: SubslotKey, usi: u16, data: &[u8]) -> StackResult<()> {
        self.lock().diag_usi_update(key, usi, data)
    }

    pub fn diag_usi_remove(&self, key: SubslotKey, usi: u16) -> StackResult<()> {
        self.lock().diag_usi_remove(key, usi)
    }

    pub fn set_primary_state(&self, primary: bool) {
        self.lock().set_primary_state(primary)
    }

    pub fn set_redundancy_state(&self, redundant: bool) {
        self.lock().set_redundancy_state(redundant)
    }

    pub fn set_provider_state(&self, run: bool) {
        self.lock().set_provider_state(run)
    }

    pub fn set_peer_info(&self, port: usize, peer: PeerInfo) {
        self.lock().set_peer_info(port, peer)
    }

    pub fn set_system_info(&self, info: SystemInfo) {
        self.lock().set_system_info(info)
    }

    pub fn station_name(&self) -> String {
        self.lock().station_name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceIdentity;
    use crate::events::NullEvents;
    use crate::platform::mock::MockPlatform;

    fn device() -> Device {
        let cfg = DeviceConfig::new(
            DeviceIdentity {
                vendor_id: 0x0493,
                device_id: 0x0001,
                oem_vendor_id: 0,
                oem_device_id: 0,
                product_name: "ferrobus".to_string(),
                instance: 1,
            },
            MacAddr([2, 0, 0, 0, 0, 1]),
        );
        Device::init(cfg, NullEvents, MockPlatform::new(), None).unwrap()
    }

    #[test]
    fn test_init_plugs_dap() {
        let device = device();

        device.with(|stack| {
            assert!(stack.ident.subslot(0, 0, SUBSLOT_DAP_IDENT).is_some());
            assert!(stack.ident.subslot(0, 0, SUBSLOT_INTERFACE).is_some());
            assert!(stack.ident.subslot(0, 0, SUBSLOT_PORT_BASE).is_some());
            assert!(stack.demux.ids_unique());
            // DCP (4) plus the two alarm ids.
            assert_eq!(stack.demux.len(), 6);
        });
    }

    #[test]
    fn test_plug_pull_via_facade() {
        let device = device();

        device.plug_module(0, 1, 0x20).unwrap();
        device
            .plug_submodule(0, 1, 1, 0x21, SubmoduleDir::Input, 1, 0)
            .unwrap();

        // Occupied subslot refuses a second plug.
        assert_eq!(
            device.plug_submodule(0, 1, 1, 0x21, SubmoduleDir::Input, 1, 0),
            Err(StackError::AlreadyExists)
        );

        device.pull_module(0, 1).unwrap();
        device.with(|stack| assert!(stack.ident.slot(0, 1).is_none()));
    }

    #[test]
    fn test_unknown_arep_refused() {
        let device = device();
        let key = SubslotKey::new(0, 1, 1);

        assert_eq!(
            device.input_set_data_and_iops(7, key, &[0], 0x80),
            Err(StackError::NotFound)
        );
        assert_eq!(device.application_ready(7), Err(StackError::NotFound));
    }

    #[test]
    fn test_factory_reset_clears_identity() {
        let device = device();

        device.with(|stack| {
            stack.dcp.station_name = "dev".to_string();
            stack.dcp.update_state();
            stack.persist_im();
        });

        device.factory_reset().unwrap();

        device.with(|stack| {
            assert_eq!(stack.station_name(), "");
            assert_eq!(stack.cmina_state(), crate::dcp::CminaState::Setup);
            assert!(stack.platform.load_file(files::names::IM_RECORDS).is_none());
        });
    }

    #[test]
    fn test_unknown_frames_dropped() {
        let device = device();

        // Not PROFINET at all.
        assert!(!device.handle_eth_frame(0, &[0u8; 64]));

        // PROFINET EtherType with an unregistered frame id.
        let mut frame = [0u8; 64];
        crate::eth::write_header(
            &mut frame,
            MacAddr::BROADCAST,
            MacAddr([9; 6]),
            None,
            0x9999,
        );
        assert!(!device.handle_eth_frame(0, &frame));
    }

    #[test]
    fn test_diag_requires_plugged_subslot() {
        let device = device();
        let key = SubslotKey::new(0, 3, 1);

        let diag = StdDiag {
            channel: 1,
            properties: Default::default(),
            error_type: 0x100,
            ext_error_type: 0,
            ext_value: 0,
            qualifier: 0,
        };

        assert_eq!(device.diag_std_add(key, diag), Err(StackError::NotFound));
    }
}
