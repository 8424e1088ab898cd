//! RPC request pump and service handlers. Inbound datagrams are matched to
//! a session by activity uuid, reassembled, dispatched by opnum, and
//! answered through the same session. The device-originated CControl uses
//! the same machinery in the opposite direction.

use crate::alarm::{AlarmCrParam, AlarmLane};
use crate::block::{bt, BlockWriter};
use crate::cmdev::{resolve_iocr, Ar, CmdevState, Iocr};
use crate::cyclic::{Cpm, Ppm};
use crate::demux::FrameHandler;
use crate::device::Stack;
use crate::diag::DiagFilter;
use crate::error::{codes, PnioStatus, StackError, StackResult};
use crate::events::ArEvent;
use crate::ident::{claim_ownership, module_diff};
use crate::limits::{CCONTROL_TIMEOUT_US, FRAG_TIMEOUT_US, MAX_UDP_PAYLOAD};
use crate::rpc::connect::{decode_connect_request, encode_connect_response, ConnectResponse};
use crate::rpc::control::{command, ControlBlock};
use crate::rpc::header::{opnum, PacketType, RpcHeader, RPC_HEADER_SIZE};
use crate::rpc::records::{
    decode_read_request, decode_write_request, encode_read_response, encode_write_response, index,
    RecordHeader,
};
use crate::rpc::session::{FragOutcome, Session, SessionKind};
use crate::rpc::{read_ndr_status, write_ndr_request, write_ndr_response, NdrRequest};
use crate::sched::TimerKind;
use crate::types::{Arep, SubslotKey, Uuid, SUBSLOT_PORT_BASE};
use girder::logging;
use std::net::Ipv4Addr;
use std::sync::Arc;

const RESPONSE_SCRATCH: usize = 4096;

impl Stack {
    /// Drain every UDP endpoint; called from the periodic tick.
    pub(crate) fn rpc_poll(&mut self) {
        let mut buf = vec![0u8; RPC_HEADER_SIZE + MAX_UDP_PAYLOAD + 64];

        loop {
            match self.platform.udp_recv(self.rpc_socket, &mut buf) {
                Ok(Some((ip, port, len))) => {
                    let datagram = buf[..len].to_vec();
                    self.rpc_on_datagram(ip, port, &datagram);
                }
                _ => break,
            }
        }

        // CControl client sockets.
        let clients: Vec<(usize, usize)> = self
            .sessions
            .iter()
            .filter_map(|(index, session)| session.socket.map(|socket| (index, socket)))
            .collect();

        for (session_index, socket) in clients {
            loop {
                match self.platform.udp_recv(socket, &mut buf) {
                    Ok(Some((_, _, len))) => {
                        let datagram = buf[..len].to_vec();
                        self.rpc_on_client_datagram(session_index, &datagram);
                    }
                    _ => break,
                }
            }
        }

        self.rpc_reap_sessions();
    }

    /// Server-side datagram entry.
    pub(crate) fn rpc_on_datagram(&mut self, ip: Ipv4Addr, port: u16, datagram: &[u8]) {
        let header = match RpcHeader::decode(datagram) {
            Ok(header) => header,
            Err(_) => return,
        };

        if header.packet_type != PacketType::Request {
            return;
        }

        let body_end = RPC_HEADER_SIZE + header.body_len as usize;
        if datagram.len() < body_end {
            return;
        }
        let body = &datagram[RPC_HEADER_SIZE..body_end];

        let session_index = match self.by_activity.get(&header.activity) {
            Some(&index) => index,
            None => {
                let session = Session::new(header.activity, SessionKind::Server, ip, port);
                match self.sessions.alloc(session) {
                    Some(index) => {
                        self.by_activity.insert(header.activity, index);
                        index
                    }
                    None => {
                        logging::warn!(self.log, "rpc session table exhausted");
                        return;
                    }
                }
            }
        };

        let resend = {
            let session = self
                .sessions
                .get_mut(session_index)
                .expect("session just resolved");

            // A repeated request for the answered sequence gets the stored
            // response again.
            let resend = header.seq == session.seq && session.has_outgoing();

            if !resend {
                session.peer_ip = ip;
                session.peer_port = port;
                session.little_endian = header.little_endian;
                session.seq = header.seq;
                session.opnum = header.opnum;
            }
            resend
        };

        if resend {
            self.rpc_send_session(session_index);
            return;
        }

        if header.is_fragment() {
            let outcome = {
                let session = self
                    .sessions
                    .get_mut(session_index)
                    .expect("session just resolved");
                session.add_fragment(header.frag_num, header.is_last_fragment(), body)
            };

            match outcome {
                FragOutcome::Incomplete => {
                    self.rpc_arm_frag_timer(session_index);
                }
                FragOutcome::Missing => {
                    logging::warn!(self.log, "fragment train incomplete at last fragment";
                                   "activity" => %header.activity);
                    self.rpc_send_fault(
                        session_index,
                        &header,
                        PnioStatus::pnio(
                            codes::CODE_CONNECT,
                            codes::C1_CMRPC,
                            codes::C2_CMRPC_ARGSLENGTH_INVALID,
                        ),
                    );
                    self.rpc_kill_session(session_index);
                }
                FragOutcome::Complete(full_body) => {
                    self.rpc_cancel_frag_timer(session_index);
                    self.rpc_dispatch(session_index, &header, &full_body);
                }
            }
        } else {
            self.rpc_dispatch(session_index, &header, body);
        }
    }

    fn rpc_dispatch(&mut self, session_index: usize, header: &RpcHeader, body: &[u8]) {
        logging::debug!(self.log, "rpc request";
                        "opnum" => header.opnum,
                        "seq" => header.seq,
                        "bytes" => body.len());

        match header.opnum {
            opnum::CONNECT => self.rpc_connect(session_index, header, body),
            opnum::RELEASE => self.rpc_release(session_index, header, body),
            opnum::READ => self.rpc_read(session_index, header, body, false),
            opnum::READ_IMPLICIT => self.rpc_read(session_index, header, body, true),
            opnum::WRITE => self.rpc_write(session_index, header, body),
            opnum::CONTROL => self.rpc_control(session_index, header, body),
            _ => {
                self.rpc_send_fault(
                    session_index,
                    header,
                    PnioStatus::pnio(
                        codes::CODE_CONNECT,
                        codes::C1_CMRPC,
                        codes::C2_CMRPC_UNKNOWN_BLOCKS,
                    ),
                );
                self.rpc_kill_session(session_index);
            }
        }
    }

    /* ----- connect ----- */

    fn rpc_connect(&mut self, session_index: usize, header: &RpcHeader, body: &[u8]) {
        let ndr = match NdrRequest::decode(body, header.little_endian) {
            Ok(ndr) => ndr,
            Err(_) => {
                self.rpc_send_fault(
                    session_index,
                    header,
                    PnioStatus::pnio(
                        codes::CODE_CONNECT,
                        codes::C1_CMRPC,
                        codes::C2_CMRPC_ARGSLENGTH_INVALID,
                    ),
                );
                self.rpc_kill_session(session_index);
                return;
            }
        };

        let blocks_end = (20 + ndr.args_length as usize).min(body.len());
        let request = match decode_connect_request(&body[20..blocks_end]) {
            Ok(request) => request,
            Err(status) => {
                self.rpc_respond(session_index, header, status, &[]);
                return;
            }
        };

        // A re-run with a known AR uuid aborts the existing relation first.
        if let Some(existing) = self.find_ar_by_uuid(request.ar.ar_uuid) {
            self.abort_ar(existing, PnioStatus::abort(codes::ABORT_AR_RERUN));
        }

        // Give the application a chance to plug what the controller
        // expects.
        let events = Arc::clone(&self.events);
        for exp_api in &request.expected.apis {
            for exp_module in &exp_api.modules {
                if self.ident.slot(exp_api.api, exp_module.slot_nr).is_none() {
                    let _ = events.exp_module_ind(
                        self,
                        exp_api.api,
                        exp_module.slot_nr,
                        exp_module.module_ident,
                    );
                }
                for exp_sub in &exp_module.submodules {
                    let key =
                        SubslotKey::new(exp_api.api, exp_module.slot_nr, exp_sub.subslot_nr);
                    if self
                        .ident
                        .subslot(key.api, key.slot, key.subslot)
                        .is_none()
                    {
                        let _ = events.exp_submodule_ind(
                            self,
                            key,
                            exp_module.module_ident,
                            exp_sub.ident,
                        );
                    }
                }
            }
        }

        match self.cmdev_establish(session_index, header, request) {
            Ok(()) => {}
            Err(status) => {
                self.rpc_respond(session_index, header, status, &[]);
            }
        }
    }

    /// CMDEV connect path: allocate the AR, start CMSU (cyclic machines,
    /// alarm lanes), answer the connect and wait for parameter end.
    fn cmdev_establish(
        &mut self,
        session_index: usize,
        header: &RpcHeader,
        request: crate::rpc::connect::ConnectRequest,
    ) -> Result<(), PnioStatus> {
        let resource_error = PnioStatus::pnio(
            codes::CODE_CONNECT,
            codes::C1_CMRPC,
            codes::C2_CMRPC_NO_AR_RESOURCES,
        );

        if request.iocrs.len() > crate::limits::MAX_CR {
            return Err(resource_error);
        }
        for iocr in &request.iocrs {
            if iocr.send_clock_factor < self.cfg.min_device_interval {
                return Err(PnioStatus::pnio(
                    codes::CODE_CONNECT,
                    codes::C1_CONN_FAULTY_IOCR_BLOCK,
                    codes::C2_INVALID_BLOCK_LEN,
                ));
            }
        }

        let peer_ip = self
            .sessions
            .get(session_index)
            .map(|session| session.peer_ip)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        // Reserve the AR slot; the arep is the slot index plus one.
        let probe = Ar {
            arep: 0,
            state: CmdevState::PowerOn,
            param: request.ar.clone(),
            peer_ip,
            iocrs: Vec::new(),
            alarm_param: AlarmCrParam {
                timeout_factor: 1,
                retries: 3,
                local_ref: 0,
                remote_ref: 0,
                max_alarm_len: 200,
            },
            lanes: Vec::new(),
            expected: request.expected.clone(),
            cmsm_timer: None,
            err: PnioStatus::OK,
            ppm_has_sent: false,
            cpm_has_received: false,
        };
        let ar_index = self.ars.alloc(probe).ok_or(resource_error)?;
        let arep = (ar_index + 1) as Arep;

        // Resolve the cyclic parameters against the tree.
        let mut iocrs = Vec::new();
        for block in &request.iocrs {
            let param = match resolve_iocr(block, &self.ident) {
                Ok(param) => param,
                Err(status) => {
                    self.ars.reclaim(ar_index);
                    return Err(status);
                }
            };

            let ppm = if param.iocr_type.is_provider() {
                Some(Ppm::new(&param, &self.log))
            } else {
                None
            };
            let cpm = if param.iocr_type.is_provider() {
                None
            } else {
                Some(Cpm::new(&param, request.ar.initiator_mac, &self.log))
            };

            iocrs.push(Iocr { param, ppm, cpm });
        }

        // Register the consumer frame ids.
        for (cr_index, iocr) in iocrs.iter().enumerate() {
            if iocr.cpm.is_some() {
                if let Err(err) = self.demux.register(
                    iocr.param.frame_id,
                    FrameHandler::CyclicData {
                        ar: ar_index,
                        cr: cr_index,
                    },
                ) {
                    logging::warn!(self.log, "frame id registration failed";
                                   "frame_id" => iocr.param.frame_id,
                                   "err" => %err);
                    self.demux.unregister_ar(ar_index);
                    self.ars.reclaim(ar_index);
                    return Err(resource_error);
                }
            }
        }

        let alarm_param = AlarmCrParam {
            timeout_factor: request
                .alarm_cr
                .as_ref()
                .map(|a| a.rta_timeout_factor)
                .unwrap_or(1),
            retries: request.alarm_cr.as_ref().map(|a| a.rta_retries).unwrap_or(3),
            local_ref: arep,
            remote_ref: request
                .alarm_cr
                .as_ref()
                .map(|a| a.remote_alarm_ref)
                .unwrap_or(0),
            max_alarm_len: request
                .alarm_cr
                .as_ref()
                .map(|a| a.max_alarm_data_length)
                .unwrap_or(200),
        };

        let lanes = vec![
            AlarmLane::new(false, &alarm_param, self.cfg.mac, request.ar.initiator_mac, &self.log),
            AlarmLane::new(true, &alarm_param, self.cfg.mac, request.ar.initiator_mac, &self.log),
        ];

        claim_ownership(&mut self.ident, &request.expected, arep);
        let diff = module_diff(&self.ident, &request.expected, arep);

        {
            let ar = self.ars.get_mut(ar_index).expect("slot just allocated");
            ar.arep = arep;
            ar.iocrs = iocrs;
            ar.alarm_param = alarm_param;
            ar.lanes = lanes;
            ar.state = CmdevState::WCind;
        }
        self.live.insert(ar_index);

        // Application acceptance.
        let events = Arc::clone(&self.events);
        if events.connect_ind(self, arep).is_err() {
            self.abort_ar(ar_index, PnioStatus::abort(codes::ABORT_AR_ABORT_REQ));
            return Err(PnioStatus::pnio(
                codes::CODE_CONNECT,
                codes::C1_CMDEV,
                codes::C2_CMDEV_STATE_CONFLICT,
            ));
        }
        events.state_ind(self, arep, ArEvent::Startup, PnioStatus::OK);

        // CMSU startup: arm the cyclic machines and open the alarm lanes.
        self.cmsu_start(ar_index);

        // Supervise the establishment until application-ready completes.
        let cmsm_delay = self
            .ars
            .get(ar_index)
            .map(|ar| ar.cmsm_timeout_us())
            .unwrap_or(0);
        if cmsm_delay > 0 {
            let handle = self
                .sched
                .schedule(cmsm_delay, TimerKind::CmsmTimeout { ar: ar_index }, "cmsm");
            if let (Ok(handle), Some(ar)) = (handle, self.ars.get_mut(ar_index)) {
                ar.cmsm_timer = Some(handle);
            }
        }

        if let Some(ar) = self.ars.get_mut(ar_index) {
            ar.state = CmdevState::WPeind;
        }

        // Build and send the response.
        let mut scratch = vec![0u8; RESPONSE_SCRATCH];
        let blocks_len = {
            let ar = self.ars.get(ar_index).expect("ar just configured");
            let iocr_summary: Vec<(u16, u16, u16)> = ar
                .iocrs
                .iter()
                .map(|iocr| {
                    (
                        iocr.param.iocr_type as u16,
                        iocr.param.iocr_ref,
                        iocr.param.frame_id,
                    )
                })
                .collect();

            let mut writer = BlockWriter::new(&mut scratch);
            encode_connect_response(
                &mut writer,
                &ConnectResponse {
                    ar: &ar.param,
                    responder_mac: self.cfg.mac,
                    responder_udp_port: crate::types::RPC_SERVER_PORT,
                    iocrs: &iocr_summary,
                    alarm: request.alarm_cr.as_ref().map(|_| &ar.alarm_param),
                    diff: &diff,
                    responder_station_name: &self.dcp.station_name,
                },
            )
            .map_err(|_| resource_error)?;
            writer.position()
        };

        if let Some(session) = self.sessions.get_mut(session_index) {
            session.arep = Some(arep);
        }
        self.rpc_respond(session_index, header, PnioStatus::OK, &scratch[..blocks_len]);

        logging::info!(self.log, "ar established";
                       "arep" => arep,
                       "peer" => %self.ars.get(ar_index).map(|a| a.param.initiator_mac).unwrap_or(crate::types::MacAddr::ZERO),
                       "station" => %self.ars.get(ar_index).map(|a| a.param.station_name.clone()).unwrap_or_default());
        Ok(())
    }

    /// Arm every cyclic machine of the AR and open its alarm lanes.
    fn cmsu_start(&mut self, ar_index: usize) {
        let mut dht_starts = Vec::new();
        let mut ppm_starts = Vec::new();

        if let Some(ar) = self.ars.get_mut(ar_index) {
            for (cr_index, iocr) in ar.iocrs.iter_mut().enumerate() {
                if let Some(cpm) = iocr.cpm.as_mut() {
                    cpm.activate();
                    dht_starts.push((cr_index, cpm.data_hold_us()));
                }
                if let Some(ppm) = iocr.ppm.as_mut() {
                    ppm.activate();
                    ppm_starts.push((cr_index, ppm.period_us()));
                }
            }
            for lane in ar.lanes.iter_mut() {
                lane.open();
            }
        }

        for (cr_index, delay) in dht_starts {
            let handle = self.sched.schedule(
                delay,
                TimerKind::CpmDataHold {
                    ar: ar_index,
                    cr: cr_index,
                },
                "cpm_dht",
            );
            if let (Ok(handle), Some(ar)) = (handle, self.ars.get_mut(ar_index)) {
                if let Some(cpm) = ar.iocrs[cr_index].cpm.as_mut() {
                    cpm.dht_timer = Some(handle);
                }
            }
        }

        for (cr_index, period) in ppm_starts {
            let handle = self.sched.schedule(
                period,
                TimerKind::PpmSend {
                    ar: ar_index,
                    cr: cr_index,
                },
                "ppm_send",
            );
            if let (Ok(handle), Some(ar)) = (handle, self.ars.get_mut(ar_index)) {
                if let Some(ppm) = ar.iocrs[cr_index].ppm.as_mut() {
                    ppm.timer = Some(handle);
                }
            }
        }
    }

    /* ----- control ----- */

    fn rpc_control(&mut self, session_index: usize, header: &RpcHeader, body: &[u8]) {
        let control = match NdrRequest::decode(body, header.little_endian)
            .and_then(|_| ControlBlock::decode(&body[20..]).map_err(Into::into))
        {
            Ok(control) => control,
            Err(_) => {
                self.rpc_send_fault(
                    session_index,
                    header,
                    PnioStatus::pnio(
                        codes::CODE_CONTROL,
                        codes::C1_CMRPC,
                        codes::C2_CMRPC_ARGSLENGTH_INVALID,
                    ),
                );
                self.rpc_kill_session(session_index);
                return;
            }
        };

        let ar_index = match self.find_ar_by_uuid(control.ar_uuid) {
            Some(index) => index,
            None => {
                self.rpc_respond(
                    session_index,
                    header,
                    PnioStatus::pnio(
                        codes::CODE_CONTROL,
                        codes::C1_CMRPC,
                        codes::C2_CMRPC_AR_UUID_UNKNOWN,
                    ),
                    &[],
                );
                return;
            }
        };

        if !control.has_command(command::PRM_END) {
            self.rpc_respond(
                session_index,
                header,
                PnioStatus::pnio(
                    codes::CODE_CONTROL,
                    codes::C1_CMPBE,
                    codes::C2_CMDEV_STATE_CONFLICT,
                ),
                &[],
            );
            return;
        }

        let arep = match self.ars.get(ar_index) {
            Some(ar) if ar.state == CmdevState::WPeind => ar.arep,
            _ => {
                self.rpc_respond(
                    session_index,
                    header,
                    PnioStatus::pnio(
                        codes::CODE_CONTROL,
                        codes::C1_CMDEV,
                        codes::C2_CMDEV_STATE_CONFLICT,
                    ),
                    &[],
                );
                return;
            }
        };

        // Parameterization is over; the application must call
        // `application_ready` now or later.
        if let Some(ar) = self.ars.get_mut(ar_index) {
            ar.state = CmdevState::WPeres;
        }

        let events = Arc::clone(&self.events);
        if events.dcontrol_ind(self, arep, control.control_command).is_err() {
            self.abort_ar(ar_index, PnioStatus::abort(codes::ABORT_AR_ABORT_REQ));
            self.rpc_respond(
                session_index,
                header,
                PnioStatus::pnio(
                    codes::CODE_CONTROL,
                    codes::C1_CMDEV,
                    codes::C2_CMDEV_STATE_CONFLICT,
                ),
                &[],
            );
            return;
        }
        events.state_ind(self, arep, ArEvent::PrmEnd, PnioStatus::OK);

        let mut scratch = vec![0u8; 128];
        let mut writer = BlockWriter::new(&mut scratch);
        let response = control.done_response(bt::PRMEND_RES);
        if response.encode(&mut writer).is_err() {
            return;
        }
        let blocks_len = writer.position();

        self.rpc_respond(session_index, header, PnioStatus::OK, &scratch[..blocks_len]);
    }

    /* ----- release ----- */

    fn rpc_release(&mut self, session_index: usize, header: &RpcHeader, body: &[u8]) {
        let control = match NdrRequest::decode(body, header.little_endian)
            .and_then(|_| ControlBlock::decode(&body[20..]).map_err(Into::into))
        {
            Ok(control) => control,
            Err(_) => {
                self.rpc_send_fault(
                    session_index,
                    header,
                    PnioStatus::pnio(
                        codes::CODE_RELEASE,
                        codes::C1_RELEASE_FAULTY_BLOCK,
                        codes::C2_INVALID_BLOCK_LEN,
                    ),
                );
                self.rpc_kill_session(session_index);
                return;
            }
        };

        let ar_index = match self.find_ar_by_uuid(control.ar_uuid) {
            Some(index) => index,
            None => {
                self.rpc_respond(
                    session_index,
                    header,
                    PnioStatus::pnio(
                        codes::CODE_RELEASE,
                        codes::C1_CMRPC,
                        codes::C2_CMRPC_AR_UUID_UNKNOWN,
                    ),
                    &[],
                );
                return;
            }
        };

        let arep = self.ars.get(ar_index).map(|ar| ar.arep).unwrap_or(0);
        let events = Arc::clone(&self.events);
        let _ = events.release_ind(self, arep);

        let mut scratch = vec![0u8; 128];
        let mut writer = BlockWriter::new(&mut scratch);
        let mut response = control.done_response(bt::RELEASE_BLOCK_RES);
        response.block_type = bt::RELEASE_BLOCK_RES;
        let blocks_len = match response.encode(&mut writer) {
            Ok(()) => writer.position(),
            Err(_) => return,
        };

        self.rpc_respond(session_index, header, PnioStatus::OK, &scratch[..blocks_len]);
        self.abort_ar(
            ar_index,
            PnioStatus::abort(codes::ABORT_RELEASE_IND_RECEIVED),
        );
    }

    /* ----- read ----- */

    fn rpc_read(&mut self, session_index: usize, header: &RpcHeader, body: &[u8], implicit: bool) {
        let record = match NdrRequest::decode(body, header.little_endian)
            .and_then(|_| decode_read_request(&body[20..]).map_err(Into::into))
        {
            Ok(record) => record,
            Err(_) => {
                self.rpc_send_fault(
                    session_index,
                    header,
                    PnioStatus::pnio(
                        codes::CODE_READ,
                        codes::C1_CMRDR,
                        codes::C2_CMSM_INVALID_STATE,
                    ),
                );
                self.rpc_kill_session(session_index);
                return;
            }
        };

        let arep = if implicit {
            None
        } else {
            match self.find_ar_by_uuid(record.ar_uuid) {
                Some(index) => self.ars.get(index).map(|ar| ar.arep),
                None => None,
            }
        };

        let (status, data) = match self.read_record(arep, &record) {
            Ok(data) => (PnioStatus::OK, data),
            Err(status) => (status, Vec::new()),
        };

        let mut scratch = vec![0u8; RESPONSE_SCRATCH];
        let mut writer = BlockWriter::new(&mut scratch);
        if encode_read_response(&mut writer, &record, &data).is_err() {
            return;
        }
        let blocks_len = writer.position();

        self.rpc_respond(session_index, header, status, &scratch[..blocks_len]);
    }

    /// CMRDR index dispatch.
    fn read_record(
        &mut self,
        arep: Option<Arep>,
        record: &RecordHeader,
    ) -> Result<Vec<u8>, PnioStatus> {
        let invalid_index = PnioStatus::pniorw(
            codes::CODE_READ,
            codes::C1_ACC_INVALID_INDEX,
            0,
        );

        let mut scratch = vec![0u8; RESPONSE_SCRATCH];
        let mut writer = BlockWriter::new(&mut scratch);

        let written = match record.index {
            user if user <= index::USER_MAX => {
                let arep = arep.ok_or(invalid_index)?;
                let mut out = Vec::new();
                let events = Arc::clone(&self.events);
                events
                    .read_ind(self, arep, record.key, record.index, &mut out)
                    .map_err(|_| {
                        PnioStatus::pniorw(codes::CODE_READ, codes::C1_APP_READ_ERROR, 0)
                    })?;
                return Ok(out);
            }

            index::IM_0 => {
                self.im.im0.encode(&mut writer).map_err(|_| invalid_index)?;
                writer.position()
            }
            index::IM_1 => {
                self.im.im1.encode(&mut writer).map_err(|_| invalid_index)?;
                writer.position()
            }
            index::IM_2 => {
                self.im.im2.encode(&mut writer).map_err(|_| invalid_index)?;
                writer.position()
            }
            index::IM_3 => {
                self.im.im3.encode(&mut writer).map_err(|_| invalid_index)?;
                writer.position()
            }
            index::IM_4 => {
                self.im.im4.encode(&mut writer).map_err(|_| invalid_index)?;
                writer.position()
            }

            index::SUB_DIAGNOSIS_CH | index::SUB_DIAG_MAINT_REQ | index::SUB_DIAG_MAINT_DEM => {
                let filter = match record.index {
                    index::SUB_DIAG_MAINT_REQ => DiagFilter::MaintenanceRequired,
                    index::SUB_DIAG_MAINT_DEM => DiagFilter::MaintenanceDemanded,
                    _ => DiagFilter::FaultStd,
                };
                self.encode_diag_scope(&mut writer, Some(record.key), filter)
                    .map_err(|_| invalid_index)?;
                writer.position()
            }
            index::SUB_DIAGNOSIS_ALL | index::SUB_DIAGNOSIS_DMQS => {
                self.encode_diag_scope(&mut writer, Some(record.key), DiagFilter::All)
                    .map_err(|_| invalid_index)?;
                writer.position()
            }
            index::SLOT_DIAGNOSIS_CH => {
                self.encode_diag_slot(&mut writer, record.key.api, record.key.slot, DiagFilter::FaultStd)
                    .map_err(|_| invalid_index)?;
                writer.position()
            }
            index::SLOT_DIAGNOSIS_ALL | index::AR_DIAGNOSIS_ALL => {
                let scope = if record.index == index::SLOT_DIAGNOSIS_ALL {
                    Some((record.key.api, record.key.slot))
                } else {
                    None
                };
                match scope {
                    Some((api, slot)) => self
                        .encode_diag_slot(&mut writer, api, slot, DiagFilter::All)
                        .map_err(|_| invalid_index)?,
                    None => self
                        .encode_diag_device(&mut writer, DiagFilter::All)
                        .map_err(|_| invalid_index)?,
                }
                writer.position()
            }

            index::SUB_REAL_ID_DATA | index::AR_REAL_ID_DATA => {
                self.encode_real_ident(&mut writer).map_err(|_| invalid_index)?;
                writer.position()
            }
            index::SUB_EXP_ID_DATA => {
                let arep = arep.ok_or(invalid_index)?;
                self.encode_expected_ident(&mut writer, arep)
                    .map_err(|_| invalid_index)?;
                writer.position()
            }
            index::AR_MOD_DIFF => {
                let arep = arep.ok_or(invalid_index)?;
                let ar_index = (arep as usize).wrapping_sub(1);
                let diff = match self.ars.get(ar_index) {
                    Some(ar) => module_diff(&self.ident, &ar.expected, arep),
                    None => return Err(invalid_index),
                };
                crate::rpc::connect::encode_module_diff(&mut writer, &diff)
                    .map_err(|_| invalid_index)?;
                writer.position()
            }

            index::SUB_INPUT_DATA => {
                let arep = arep.ok_or(invalid_index)?;
                return self.encode_input_data_object(arep, record.key);
            }
            index::SUB_OUTPUT_DATA => {
                let arep = arep.ok_or(invalid_index)?;
                return self.encode_output_data_object(arep, record.key);
            }

            index::SUB_PDPORT_DATA_REAL => {
                let port = port_of_subslot(record.key.subslot).ok_or(invalid_index)?;
                self.lldp
                    .encode_port_data_real(&mut writer, port)
                    .map_err(|_| invalid_index)?;
                writer.position()
            }
            index::SUB_PDPORT_DATA_CHECK => {
                let port = port_of_subslot(record.key.subslot).ok_or(invalid_index)?;
                self.lldp
                    .encode_port_data_check(&mut writer, port)
                    .map_err(|_| invalid_index)?;
                writer.position()
            }
            index::SUB_PDPORT_DATA_ADJ => {
                let port = port_of_subslot(record.key.subslot).ok_or(invalid_index)?;
                let stored = self.lldp.adjust(port).ok_or(invalid_index)?.to_vec();
                return Ok(stored);
            }

            index::LOG_BOOK => {
                let now = self.sched.now_us();
                self.logbook.encode(&mut writer, now).map_err(|_| invalid_index)?;
                writer.position()
            }

            _ => return Err(invalid_index),
        };

        scratch.truncate(written);
        Ok(scratch)
    }

    /* ----- write ----- */

    fn rpc_write(&mut self, session_index: usize, header: &RpcHeader, body: &[u8]) {
        let (record, data) = match NdrRequest::decode(body, header.little_endian)
            .and_then(|_| decode_write_request(&body[20..]).map_err(Into::into))
        {
            Ok(parsed) => parsed,
            Err(_) => {
                self.rpc_send_fault(
                    session_index,
                    header,
                    PnioStatus::pnio(
                        codes::CODE_WRITE,
                        codes::C1_CMWRR,
                        codes::C2_CMSM_INVALID_STATE,
                    ),
                );
                self.rpc_kill_session(session_index);
                return;
            }
        };
        let data = data.to_vec();

        let arep = self
            .find_ar_by_uuid(record.ar_uuid)
            .and_then(|index| self.ars.get(index).map(|ar| ar.arep));

        let status = match self.write_record(arep, &record, &data) {
            Ok(()) => PnioStatus::OK,
            Err(status) => status,
        };

        let mut scratch = vec![0u8; 256];
        let mut writer = BlockWriter::new(&mut scratch);
        if encode_write_response(&mut writer, &record, status).is_err() {
            return;
        }
        let blocks_len = writer.position();

        self.rpc_respond(session_index, header, status, &scratch[..blocks_len]);
    }

    /// CMWRR index dispatch.
    fn write_record(
        &mut self,
        arep: Option<Arep>,
        record: &RecordHeader,
        data: &[u8],
    ) -> Result<(), PnioStatus> {
        let invalid_index =
            PnioStatus::pniorw(codes::CODE_WRITE, codes::C1_ACC_INVALID_INDEX, 0);
        let write_error =
            PnioStatus::pniorw(codes::CODE_WRITE, codes::C1_APP_WRITE_ERROR, 0);

        match record.index {
            user if user <= index::USER_MAX => {
                let arep = arep.ok_or(invalid_index)?;
                let events = Arc::clone(&self.events);
                events
                    .write_ind(self, arep, record.key, record.index, data)
                    .map_err(|_| write_error)
            }

            index::IM_1 => {
                self.im.im1 = crate::im::Im1::decode(data).map_err(|_| write_error)?;
                self.persist_im();
                Ok(())
            }
            index::IM_2 => {
                self.im.im2 = crate::im::Im2::decode(data).map_err(|_| write_error)?;
                self.persist_im();
                Ok(())
            }
            index::IM_3 => {
                self.im.im3 = crate::im::Im3::decode(data).map_err(|_| write_error)?;
                self.persist_im();
                Ok(())
            }
            index::IM_4 => {
                self.im.im4 = crate::im::Im4::decode(data).map_err(|_| write_error)?;
                self.persist_im();
                Ok(())
            }

            index::SUB_PDPORT_DATA_CHECK => {
                let (port, check) =
                    crate::lldp::LldpStore::decode_port_data_check(data).map_err(|_| write_error)?;
                self.lldp.set_check(port, Some(check));
                self.persist_port_checks();
                if self.lldp.check_mismatch(port) {
                    let _ = self.raise_port_mismatch_diagnosis(port);
                }
                Ok(())
            }
            index::SUB_PDPORT_DATA_ADJ => {
                // Boundary adjustments are stored verbatim; nothing is
                // applied without the redundancy protocols.
                let port = port_of_subslot(record.key.subslot).ok_or(invalid_index)?;
                self.lldp.set_adjust(port, Some(data.to_vec()));
                self.persist_port_adjusts();
                Ok(())
            }

            _ => Err(invalid_index),
        }
    }

    /* ----- device-originated CControl ----- */

    /// Send the application-ready request for an AR entering W_ARDY.
    pub(crate) fn ccontrol_send_appl_ready(&mut self, ar_index: usize) -> StackResult<()> {
        let (ar_uuid, session_key, peer_ip, peer_port, arep) = match self.ars.get(ar_index) {
            Some(ar) => (
                ar.param.ar_uuid,
                ar.param.session_key,
                ar.peer_ip,
                crate::types::CONTROLLER_PNIO_PORT,
                ar.arep,
            ),
            None => return Err(StackError::NotFound),
        };

        let control = ControlBlock {
            block_type: bt::APPRDY_REQ,
            ar_uuid,
            session_key,
            alarm_sequence_number: 0,
            control_command: command::APP_RDY,
            control_block_properties: 0,
        };

        let mut scratch = vec![0u8; 128];
        let mut writer = BlockWriter::new(&mut scratch);
        control.encode(&mut writer).map_err(|_| StackError::TooLarge)?;
        let blocks_len = writer.position();

        let mut body = Vec::new();
        write_ndr_request(&mut body, RESPONSE_SCRATCH as u32, blocks_len as u32);
        body.extend_from_slice(&scratch[..blocks_len]);

        let activity = self.random_uuid();
        let local_port = self.next_ephemeral;
        self.next_ephemeral = self.next_ephemeral.wrapping_add(1).max(crate::types::RPC_EPHEMERAL_PORT_BASE);
        let socket = self.platform.udp_open(Ipv4Addr::UNSPECIFIED, local_port)?;

        let mut session = Session::new(activity, SessionKind::CControl, peer_ip, peer_port);
        session.arep = Some(arep);
        session.socket = Some(socket);
        session.opnum = opnum::CONTROL;
        session.seq = 0;
        session.set_outgoing(PacketType::Request, body);

        let session_index = match self.sessions.alloc(session) {
            Some(index) => index,
            None => {
                self.platform.udp_close(socket);
                return Err(StackError::OutOfResources);
            }
        };
        self.by_activity.insert(activity, session_index);

        let handle = self.sched.schedule(
            CCONTROL_TIMEOUT_US,
            TimerKind::SessionResend {
                session: session_index,
            },
            "ccontrol_resend",
        )?;
        if let Some(session) = self.sessions.get_mut(session_index) {
            session.resend_timer = Some(handle);
        }

        self.rpc_send_client(session_index);

        logging::debug!(self.log, "application ready requested"; "arep" => arep);
        Ok(())
    }

    fn rpc_send_client(&mut self, session_index: usize) {
        let (datagrams, socket, ip, port) = match self.sessions.get(session_index) {
            Some(session) => {
                let mut template = RpcHeader::new(PacketType::Request);
                template.object = Uuid::io_device_object(
                    self.cfg.identity.instance,
                    self.cfg.identity.device_id,
                    self.cfg.identity.vendor_id,
                );
                template.server_boot = self.boot_time;
                template.flags1 |= crate::rpc::header::FLAG1_IDEMPOTENT;
                (
                    session.build_outgoing(&template),
                    session.socket,
                    session.peer_ip,
                    session.peer_port,
                )
            }
            None => return,
        };

        let socket = match socket {
            Some(socket) => socket,
            None => return,
        };

        for datagram in datagrams {
            if self.platform.udp_send(socket, ip, port, &datagram).is_err() {
                logging::warn!(self.log, "ccontrol send failed");
            }
        }
    }

    /// Response arriving on a CControl client socket.
    pub(crate) fn rpc_on_client_datagram(&mut self, session_index: usize, datagram: &[u8]) {
        let header = match RpcHeader::decode(datagram) {
            Ok(header) => header,
            Err(_) => return,
        };
        if header.packet_type != PacketType::Response {
            return;
        }

        let body_end = RPC_HEADER_SIZE + header.body_len as usize;
        if datagram.len() < body_end {
            return;
        }
        let body = &datagram[RPC_HEADER_SIZE..body_end];

        let arep = match self.sessions.get(session_index) {
            Some(session) if session.activity == header.activity => session.arep,
            _ => return,
        };

        let status = read_ndr_status(body, header.little_endian).unwrap_or(PnioStatus::OK);

        self.rpc_close_client_session(session_index);

        let ar_index = match arep {
            Some(arep) => (arep as usize).wrapping_sub(1),
            None => return,
        };
        let arep = arep.expect("checked above");

        let events = Arc::clone(&self.events);

        if !status.is_ok() {
            logging::warn!(self.log, "application ready rejected"; "arep" => arep, "status" => ?status);
            let _ = events.ccontrol_cnf(self, arep, status);
            self.abort_ar(
                ar_index,
                PnioStatus::abort(codes::ABORT_RPC_CLIENT_CALL_CNF_NEG),
            );
            return;
        }

        if let Some(ar) = self.ars.get_mut(ar_index) {
            if ar.state == CmdevState::WArdyCnf {
                ar.state = CmdevState::WData;
            }
        }

        let _ = events.ccontrol_cnf(self, arep, status);
        events.state_ind(self, arep, ArEvent::ApplReady, PnioStatus::OK);
        self.maybe_enter_data(ar_index);
    }

    /// Retransmission timer of a CControl session.
    pub(crate) fn session_resend_tick(&mut self, session_index: usize) {
        let exhausted = match self.sessions.get_mut(session_index) {
            Some(session) => {
                session.resend_timer = None;
                session.bump_retry().is_err()
            }
            None => return,
        };

        if exhausted {
            let arep = self.sessions.get(session_index).and_then(|s| s.arep);
            self.rpc_close_client_session(session_index);
            if let Some(arep) = arep {
                logging::warn!(self.log, "ccontrol retries exhausted"; "arep" => arep);
                self.abort_ar(
                    (arep as usize).wrapping_sub(1),
                    PnioStatus::abort(codes::ABORT_RPC_CLIENT_CALL_CNF_NEG),
                );
            }
            return;
        }

        self.rpc_send_client(session_index);

        let handle = self.sched.schedule(
            CCONTROL_TIMEOUT_US,
            TimerKind::SessionResend {
                session: session_index,
            },
            "ccontrol_resend",
        );
        if let (Ok(handle), Some(session)) = (handle, self.sessions.get_mut(session_index)) {
            session.resend_timer = Some(handle);
        }
    }

    /// Fragment reassembly deadline.
    pub(crate) fn session_frag_tick(&mut self, session_index: usize) {
        let stale = match self.sessions.get_mut(session_index) {
            Some(session) => {
                session.frag_timer = None;
                session.has_partial_input()
            }
            None => false,
        };

        if stale {
            logging::warn!(self.log, "fragment reassembly timed out");
            self.rpc_kill_session(session_index);
        }
    }

    /* ----- plumbing ----- */

    fn rpc_arm_frag_timer(&mut self, session_index: usize) {
        let existing = self
            .sessions
            .get(session_index)
            .and_then(|session| session.frag_timer);
        if let Some(handle) = existing {
            let _ = self.sched.reschedule(handle, FRAG_TIMEOUT_US);
            return;
        }

        let handle = self.sched.schedule(
            FRAG_TIMEOUT_US,
            TimerKind::SessionFragTimeout {
                session: session_index,
            },
            "rpc_frag",
        );
        if let (Ok(handle), Some(session)) = (handle, self.sessions.get_mut(session_index)) {
            session.frag_timer = Some(handle);
        }
    }

    fn rpc_cancel_frag_timer(&mut self, session_index: usize) {
        if let Some(session) = self.sessions.get_mut(session_index) {
            if let Some(handle) = session.frag_timer.take() {
                self.sched.cancel(handle);
            }
        }
    }

    /// Install a response and put it on the wire.
    fn rpc_respond(
        &mut self,
        session_index: usize,
        header: &RpcHeader,
        status: PnioStatus,
        blocks: &[u8],
    ) {
        let mut body = Vec::with_capacity(20 + blocks.len());
        write_ndr_response(&mut body, status, blocks.len() as u32, header.little_endian);
        body.extend_from_slice(blocks);

        if let Some(session) = self.sessions.get_mut(session_index) {
            session.set_outgoing(PacketType::Response, body);
        }
        self.rpc_send_session(session_index);
    }

    fn rpc_send_fault(&mut self, session_index: usize, header: &RpcHeader, status: PnioStatus) {
        let mut body = Vec::new();
        write_ndr_response(&mut body, status, 0, header.little_endian);

        if let Some(session) = self.sessions.get_mut(session_index) {
            session.set_outgoing(PacketType::Fault, body);
        }
        self.rpc_send_session(session_index);
    }

    fn rpc_send_session(&mut self, session_index: usize) {
        let (datagrams, ip, port) = match self.sessions.get(session_index) {
            Some(session) => {
                let mut template = RpcHeader::new(PacketType::Response);
                template.object = Uuid::io_device_object(
                    self.cfg.identity.instance,
                    self.cfg.identity.device_id,
                    self.cfg.identity.vendor_id,
                );
                template.server_boot = self.boot_time;
                (
                    session.build_outgoing(&template),
                    session.peer_ip,
                    session.peer_port,
                )
            }
            None => return,
        };

        for datagram in datagrams {
            if self
                .platform
                .udp_send(self.rpc_socket, ip, port, &datagram)
                .is_err()
            {
                logging::warn!(self.log, "rpc response send failed");
            }
        }
    }

    pub(crate) fn rpc_kill_session(&mut self, session_index: usize) {
        if let Some(session) = self.sessions.get_mut(session_index) {
            session.kill = true;
        }
        self.rpc_reap_sessions();
    }

    fn rpc_close_client_session(&mut self, session_index: usize) {
        if let Some(session) = self.sessions.get_mut(session_index) {
            if let Some(handle) = session.resend_timer.take() {
                self.sched.cancel(handle);
            }
            session.kill = true;
        }
        self.rpc_reap_sessions();
    }

    /// Free every session marked for deletion.
    pub(crate) fn rpc_reap_sessions(&mut self) {
        let doomed: Vec<usize> = self
            .sessions
            .iter()
            .filter_map(|(index, session)| if session.kill { Some(index) } else { None })
            .collect();

        for index in doomed {
            if let Some(session) = self.sessions.reclaim(index) {
                if let Some(handle) = session.frag_timer {
                    self.sched.cancel(handle);
                }
                if let Some(handle) = session.resend_timer {
                    self.sched.cancel(handle);
                }
                if let Some(socket) = session.socket {
                    self.platform.udp_close(socket);
                }
                self.by_activity.remove(&session.activity);
            }
        }
    }

    /// Drop every session belonging to an AR being torn down.
    pub(crate) fn rpc_kill_ar_sessions(&mut self, arep: Arep) {
        let doomed: Vec<usize> = self
            .sessions
            .iter()
            .filter_map(|(index, session)| {
                if session.arep == Some(arep) {
                    Some(index)
                } else {
                    None
                }
            })
            .collect();

        for index in doomed {
            if let Some(session) = self.sessions.get_mut(index) {
                session.kill = true;
            }
        }
        self.rpc_reap_sessions();
    }

    /* ----- record data encoders ----- */

    fn encode_diag_item(
        writer: &mut BlockWriter,
        item: &crate::diag::DiagItem,
    ) -> std::io::Result<()> {
        use crate::alarm::usi;
        use crate::diag::DiagItem;

        match item {
            DiagItem::Usi(diag) => {
                writer.u16(diag.usi)?;
                writer.bytes(&diag.data)
            }
            DiagItem::Std(diag) => {
                let discriminator = if diag.qualifier != 0 {
                    usi::QUALIFIED_CHANNEL_DIAGNOSIS
                } else if diag.ext_error_type != 0 || diag.ext_value != 0 {
                    usi::EXT_CHANNEL_DIAGNOSIS
                } else {
                    usi::CHANNEL_DIAGNOSIS
                };

                writer.u16(discriminator)?;
                writer.u16(diag.channel)?;
                writer.u16(diag.properties.0)?;
                writer.u16(diag.error_type)?;

                if discriminator != usi::CHANNEL_DIAGNOSIS {
                    writer.u16(diag.ext_error_type)?;
                    writer.u32(diag.ext_value)?;
                }
                if discriminator == usi::QUALIFIED_CHANNEL_DIAGNOSIS {
                    writer.u32(diag.qualifier)?;
                }
                Ok(())
            }
        }
    }

    fn encode_diag_subslot(
        &self,
        writer: &mut BlockWriter,
        api: u32,
        slot_nr: u16,
        sub: &crate::ident::Subslot,
        filter: DiagFilter,
    ) -> std::io::Result<()> {
        let mut items = Vec::new();
        self.diag.traverse(sub, filter, |item| items.push(item.clone()));

        if items.is_empty() {
            return Ok(());
        }

        let mark = writer.begin_block(bt::DIAGNOSIS_DATA)?;
        writer.u32(api)?;
        writer.u16(slot_nr)?;
        writer.u16(sub.subslot_nr)?;
        for item in &items {
            // A manufacturer record can carry 220 payload bytes; stop
            // before the response buffer overruns mid-item.
            if writer.free_capacity() < 240 {
                break;
            }
            Self::encode_diag_item(writer, item)?;
        }
        writer.end_block(mark)
    }

    fn encode_diag_scope(
        &self,
        writer: &mut BlockWriter,
        key: Option<SubslotKey>,
        filter: DiagFilter,
    ) -> std::io::Result<()> {
        match key {
            Some(key) => match self.ident.subslot(key.api, key.slot, key.subslot) {
                Some(sub) => self.encode_diag_subslot(writer, key.api, key.slot, sub, filter),
                None => Ok(()),
            },
            None => self.encode_diag_device(writer, filter),
        }
    }

    fn encode_diag_slot(
        &self,
        writer: &mut BlockWriter,
        api: u32,
        slot_nr: u16,
        filter: DiagFilter,
    ) -> std::io::Result<()> {
        if let Some(slot) = self.ident.slot(api, slot_nr) {
            for sub in &slot.subslots {
                self.encode_diag_subslot(writer, api, slot_nr, sub, filter)?;
            }
        }
        Ok(())
    }

    fn encode_diag_device(&self, writer: &mut BlockWriter, filter: DiagFilter) -> std::io::Result<()> {
        for api in &self.ident.apis {
            for slot in &api.slots {
                for sub in &slot.subslots {
                    self.encode_diag_subslot(writer, api.api, slot.slot_nr, sub, filter)?;
                }
            }
        }
        Ok(())
    }

    fn encode_real_ident(&self, writer: &mut BlockWriter) -> std::io::Result<()> {
        let mark = writer.begin_block(bt::REAL_IDENTIFICATION_DATA)?;
        writer.u16(self.ident.apis.len() as u16)?;

        for api in &self.ident.apis {
            writer.u32(api.api)?;
            writer.u16(api.slots.len() as u16)?;
            for slot in &api.slots {
                writer.u16(slot.slot_nr)?;
                writer.u32(slot.module_ident)?;
                writer.u16(slot.subslots.len() as u16)?;
                for sub in &slot.subslots {
                    writer.u16(sub.subslot_nr)?;
                    writer.u32(sub.ident)?;
                }
            }
        }

        writer.end_block(mark)
    }

    fn encode_expected_ident(&self, writer: &mut BlockWriter, arep: Arep) -> std::io::Result<()> {
        let ar_index = (arep as usize).wrapping_sub(1);
        let expected = match self.ars.get(ar_index) {
            Some(ar) => &ar.expected,
            None => return Ok(()),
        };

        let mark = writer.begin_block(bt::EXPECTED_IDENTIFICATION_DATA)?;
        writer.u16(expected.apis.len() as u16)?;

        for api in &expected.apis {
            writer.u32(api.api)?;
            writer.u16(api.modules.len() as u16)?;
            for module in &api.modules {
                writer.u16(module.slot_nr)?;
                writer.u32(module.module_ident)?;
                writer.u16(module.submodules.len() as u16)?;
                for sub in &module.submodules {
                    writer.u16(sub.subslot_nr)?;
                    writer.u32(sub.ident)?;
                }
            }
        }

        writer.end_block(mark)
    }

    fn encode_input_data_object(
        &mut self,
        arep: Arep,
        key: SubslotKey,
    ) -> Result<Vec<u8>, PnioStatus> {
        let invalid =
            PnioStatus::pniorw(codes::CODE_READ, codes::C1_ACC_INVALID_SLOT_SUBSLOT, 0);
        let ar_index = (arep as usize).wrapping_sub(1);
        let ar = self.ars.get_mut(ar_index).ok_or(invalid)?;

        let (cr_index, desc) = ar.provider_desc(key).ok_or(invalid)?;
        if ar.iocrs[cr_index].ppm.is_none() {
            return Err(invalid);
        }

        // Provider view: the submodule's size and status, plus the consumer
        // status reported back by the controller when available.
        let iocs = ar
            .consumer_iocs_desc(key)
            .and_then(|(consumer_cr, iocs_desc)| {
                ar.iocrs[consumer_cr]
                    .cpm
                    .as_ref()
                    .and_then(|cpm| cpm.get_iocs(&iocs_desc).ok())
            })
            .unwrap_or(crate::types::IOXS_BAD);

        let mut scratch = vec![0u8; 512];
        let mut writer = BlockWriter::new(&mut scratch);
        let mark = writer
            .begin_block(bt::RECORD_INPUT_DATA_OBJECT)
            .map_err(|_| invalid)?;
        writer.u8(iocs).map_err(|_| invalid)?;
        writer.u8(crate::types::IOXS_GOOD).map_err(|_| invalid)?;
        writer.u16(desc.len).map_err(|_| invalid)?;
        writer.padding(desc.len as usize).map_err(|_| invalid)?;
        writer.end_block(mark).map_err(|_| invalid)?;
        let used = writer.position();
        scratch.truncate(used);
        Ok(scratch)
    }

    fn encode_output_data_object(
        &mut self,
        arep: Arep,
        key: SubslotKey,
    ) -> Result<Vec<u8>, PnioStatus> {
        let invalid =
            PnioStatus::pniorw(codes::CODE_READ, codes::C1_ACC_INVALID_SLOT_SUBSLOT, 0);
        let ar_index = (arep as usize).wrapping_sub(1);
        let ar = self.ars.get_mut(ar_index).ok_or(invalid)?;

        let (cr_index, desc) = ar.consumer_desc(key).ok_or(invalid)?;
        let cpm = ar.iocrs[cr_index].cpm.as_mut().ok_or(invalid)?;
        let (data, iops, _) = cpm.get_data_and_iops(&desc).map_err(|_| invalid)?;

        let mut scratch = vec![0u8; 512];
        let mut writer = BlockWriter::new(&mut scratch);
        let mark = writer
            .begin_block(bt::RECORD_OUTPUT_DATA_OBJECT)
            .map_err(|_| invalid)?;
        writer.u8(iops).map_err(|_| invalid)?;
        writer.u16(data.len() as u16).map_err(|_| invalid)?;
        writer.bytes(&data).map_err(|_| invalid)?;
        writer.end_block(mark).map_err(|_| invalid)?;
        let used = writer.position();
        scratch.truncate(used);
        Ok(scratch)
    }
}

fn port_of_subslot(subslot: u16) -> Option<usize> {
    subslot.checked_sub(SUBSLOT_PORT_BASE).map(|p| p as usize)
}
