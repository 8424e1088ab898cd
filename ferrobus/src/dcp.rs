//! Discovery and basic configuration: identify/get/set/hello services,
//! station naming, IP provisioning and factory reset. Identify responses
//! are delayed by a bounded random amount to avoid answer storms on the
//! multicast request.

use crate::device::Stack;
use crate::error::{codes, DecodeError, PnioStatus, StackError, StackResult};
use crate::eth;
use crate::limits::{HELLO_INTERVAL_US, HELLO_RETRY, MAX_FRAME_SIZE};
use crate::sched::{TimerHandle, TimerKind};
use crate::types::{
    IpSuite, MacAddr, FRAME_ID_DCP_GETSET, FRAME_ID_DCP_HELLO, FRAME_ID_DCP_IDENT_REQ,
    FRAME_ID_DCP_IDENT_RSP,
};
use byteorder::{BigEndian, ByteOrder};
use girder::logging;
use std::net::Ipv4Addr;

/// DCP service identifiers.
pub mod service {
    pub const GET: u8 = 3;
    pub const SET: u8 = 4;
    pub const IDENTIFY: u8 = 5;
    pub const HELLO: u8 = 6;

    pub const TYPE_REQUEST: u8 = 0;
    pub const TYPE_SUCCESS: u8 = 1;
    pub const TYPE_NOT_SUPPORTED: u8 = 5;
}

/// DCP option/suboption identifiers.
pub mod option {
    pub const IP: u8 = 1;
    pub const IP_MAC: u8 = 1;
    pub const IP_PARAMETER: u8 = 2;

    pub const DEV_PROP: u8 = 2;
    pub const DEV_PROP_VENDOR: u8 = 1;
    pub const DEV_PROP_NAME: u8 = 2;
    pub const DEV_PROP_DEVICE_ID: u8 = 3;
    pub const DEV_PROP_ROLE: u8 = 4;
    pub const DEV_PROP_OPTIONS: u8 = 5;
    pub const DEV_PROP_ALIAS: u8 = 6;
    pub const DEV_PROP_INSTANCE: u8 = 7;
    pub const DEV_PROP_OEM_ID: u8 = 8;

    pub const CONTROL: u8 = 5;
    pub const CONTROL_SIGNAL: u8 = 3;
    pub const CONTROL_RESPONSE: u8 = 4;
    pub const CONTROL_FACTORY_RESET: u8 = 5;
    pub const CONTROL_RESET_TO_FACTORY: u8 = 6;

    pub const DEVICE_INITIATIVE: u8 = 6;
    pub const ALL: u8 = 0xFF;
}

/// Block error values in control responses.
pub mod block_error {
    pub const OK: u8 = 0;
    pub const OPTION_NOT_SUPPORTED: u8 = 1;
    pub const SUBOPTION_NOT_SUPPORTED: u8 = 2;
    pub const SET_NOT_POSSIBLE: u8 = 5;
}

/// Set-request qualifier bit: store permanently.
pub const QUALIFIER_PERMANENT: u16 = 0x0001;

pub const DCP_HEADER_SIZE: usize = 10;

/// Persisted-file payload versions.
pub const FILE_VERSION_NAME: u32 = 1;
pub const FILE_VERSION_IP: u32 = 1;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DcpHeader {
    pub service_id: u8,
    pub service_type: u8,
    pub xid: u32,
    pub response_delay: u16,
    pub data_length: u16,
}

impl DcpHeader {
    pub fn decode(data: &[u8]) -> Result<DcpHeader, DecodeError> {
        if data.len() < DCP_HEADER_SIZE {
            return Err(DecodeError::EndOfInput);
        }

        let header = DcpHeader {
            service_id: data[0],
            service_type: data[1],
            xid: BigEndian::read_u32(&data[2..]),
            response_delay: BigEndian::read_u16(&data[6..]),
            data_length: BigEndian::read_u16(&data[8..]),
        };

        if data.len() < DCP_HEADER_SIZE + header.data_length as usize {
            return Err(DecodeError::EndOfInput);
        }

        Ok(header)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.service_id;
        buf[1] = self.service_type;
        BigEndian::write_u32(&mut buf[2..], self.xid);
        BigEndian::write_u16(&mut buf[6..], self.response_delay);
        BigEndian::write_u16(&mut buf[8..], self.data_length);
    }
}

/// One TLV block of a DCP PDU.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DcpBlock {
    pub option: u8,
    pub suboption: u8,
    /// BlockInfo in responses, qualifier in set requests; absent in plain
    /// get/identify filters.
    pub info: Option<u16>,
    pub data: Vec<u8>,
}

/// Walk the TLV blocks of a request or response payload. `with_info` is
/// true for set requests and responses where a 16-bit word precedes the
/// data.
pub fn parse_blocks(data: &[u8], with_info: bool) -> Result<Vec<DcpBlock>, DecodeError> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while offset + 4 <= data.len() {
        let option = data[offset];
        let suboption = data[offset + 1];
        let length = BigEndian::read_u16(&data[offset + 2..]) as usize;
        offset += 4;

        if offset + length > data.len() {
            return Err(DecodeError::EndOfInput);
        }

        let (info, body) = if with_info && length >= 2 {
            (
                Some(BigEndian::read_u16(&data[offset..])),
                data[offset + 2..offset + length].to_vec(),
            )
        } else {
            (None, data[offset..offset + length].to_vec())
        };

        blocks.push(DcpBlock {
            option,
            suboption,
            info,
            data: body,
        });

        offset += length;
        // Blocks are padded to even length.
        if length % 2 == 1 {
            offset += 1;
        }
    }

    Ok(blocks)
}

/// Append-only writer for DCP block sequences.
pub struct DcpBlockWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> DcpBlockWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> DcpBlockWriter<'a> {
        DcpBlockWriter { buf, offset: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.offset
    }

    pub fn block(&mut self, option: u8, suboption: u8, info: Option<u16>, data: &[u8]) {
        let info_len = if info.is_some() { 2 } else { 0 };
        let length = info_len + data.len();

        self.buf[self.offset] = option;
        self.buf[self.offset + 1] = suboption;
        BigEndian::write_u16(&mut self.buf[self.offset + 2..], length as u16);
        self.offset += 4;

        if let Some(word) = info {
            BigEndian::write_u16(&mut self.buf[self.offset..], word);
            self.offset += 2;
        }

        self.buf[self.offset..self.offset + data.len()].copy_from_slice(data);
        self.offset += data.len();

        if length % 2 == 1 {
            self.buf[self.offset] = 0;
            self.offset += 1;
        }
    }
}

/// CMINA provisioning state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CminaState {
    Setup,
    SetName,
    SetIp,
    WConnect,
}

/// DCP/naming state of the device.
pub struct Dcp {
    pub state: CminaState,
    pub station_name: String,
    pub ip: IpSuite,
    pub hello_remaining: u8,
    pub hello_timer: Option<TimerHandle>,
    pub response_timer: Option<TimerHandle>,
    /// Identify response waiting for its jitter delay: destination and the
    /// complete frame.
    pub pending_response: Option<(MacAddr, Vec<u8>)>,
    pub led_timer: Option<TimerHandle>,
    /// Station that holds the current set transaction.
    pub sam: Option<MacAddr>,
}

impl Dcp {
    pub fn new() -> Dcp {
        Dcp {
            state: CminaState::Setup,
            station_name: String::new(),
            ip: IpSuite::UNSET,
            hello_remaining: HELLO_RETRY,
            hello_timer: None,
            response_timer: None,
            pending_response: None,
            led_timer: None,
            sam: None,
        }
    }

    /// Recompute the provisioning state from what is assigned.
    pub fn update_state(&mut self) {
        self.state = match (self.station_name.is_empty(), self.ip.is_unset()) {
            (true, true) => CminaState::Setup,
            (true, false) => CminaState::SetName,
            (false, true) => CminaState::SetIp,
            (false, false) => CminaState::WConnect,
        };
    }
}

/// A station name per the naming rules: non-empty labels of lowercase
/// letters, digits and dashes, joined by dots, at most 240 characters.
pub fn name_is_valid(name: &str) -> bool {
    if name.is_empty() || name.len() > 240 {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    })
}

impl Stack {
    /// Entry point for all four DCP frame ids.
    pub(crate) fn dcp_handle_frame(&mut self, frame_id: u16, src: MacAddr, payload: &[u8]) {
        let header = match DcpHeader::decode(payload) {
            Ok(header) => header,
            Err(_) => return,
        };
        let body = &payload[DCP_HEADER_SIZE..DCP_HEADER_SIZE + header.data_length as usize];

        match frame_id {
            FRAME_ID_DCP_IDENT_REQ if header.service_id == service::IDENTIFY => {
                self.dcp_identify(src, &header, body);
            }
            FRAME_ID_DCP_IDENT_RSP => {
                self.dcp_check_name_collision(src, body);
            }
            FRAME_ID_DCP_GETSET if header.service_id == service::GET => {
                self.dcp_get(src, &header, body);
            }
            FRAME_ID_DCP_GETSET if header.service_id == service::SET => {
                self.dcp_set(src, &header, body);
            }
            _ => {}
        }
    }

    fn dcp_identify(&mut self, src: MacAddr, header: &DcpHeader, body: &[u8]) {
        let blocks = match parse_blocks(body, false) {
            Ok(blocks) => blocks,
            Err(_) => return,
        };

        let matches = blocks.iter().all(|block| match (block.option, block.suboption) {
            (option::ALL, _) => true,
            (option::DEV_PROP, option::DEV_PROP_NAME) => {
                block.data == self.dcp.station_name.as_bytes()
            }
            (option::DEV_PROP, option::DEV_PROP_ALIAS) => false,
            _ => false,
        });

        if !matches || blocks.is_empty() {
            return;
        }

        let frame = self.dcp_build_identify_response(src, header.xid);

        // Unicast after a random delay bounded by the request's delay
        // factor and one second.
        let window_us = (u64::from(header.response_delay) * 10_000)
            .max(1_000)
            .min(1_000_000);
        let delay_us = u64::from(self.platform.rand_u32()) % window_us;

        if let Some(timer) = self.dcp.response_timer.take() {
            self.sched.cancel(timer);
        }
        self.dcp.pending_response = Some((src, frame));
        self.dcp.response_timer = self
            .sched
            .schedule(delay_us, TimerKind::DcpResponse, "dcp_identresp")
            .ok();
    }

    /// Timer hook: put the delayed identify response on the wire.
    pub(crate) fn dcp_send_pending(&mut self) {
        self.dcp.response_timer = None;

        if let Some((_, frame)) = self.dcp.pending_response.take() {
            if self.platform.eth_send(0, &frame).is_err() {
                logging::warn!(self.log, "identify response send failed");
            }
        }
    }

    fn dcp_build_identify_response(&mut self, dst: MacAddr, xid: u32) -> Vec<u8> {
        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let eth_len = eth::write_header(&mut frame, dst, self.cfg.mac, None, FRAME_ID_DCP_IDENT_RSP);

        let mut blocks = [0u8; 512];
        let mut writer = DcpBlockWriter::new(&mut blocks);

        writer.block(
            option::DEV_PROP,
            option::DEV_PROP_NAME,
            Some(0),
            self.dcp.station_name.as_bytes(),
        );
        writer.block(
            option::DEV_PROP,
            option::DEV_PROP_VENDOR,
            Some(0),
            self.cfg.identity.product_name.as_bytes(),
        );

        let mut device_id = [0u8; 4];
        BigEndian::write_u16(&mut device_id[0..], self.cfg.identity.vendor_id);
        BigEndian::write_u16(&mut device_id[2..], self.cfg.identity.device_id);
        writer.block(option::DEV_PROP, option::DEV_PROP_DEVICE_ID, Some(0), &device_id);

        // Role: IO device.
        writer.block(option::DEV_PROP, option::DEV_PROP_ROLE, Some(0), &[0x01, 0x00]);

        let mut instance = [0u8; 2];
        BigEndian::write_u16(&mut instance, self.cfg.identity.instance);
        writer.block(option::DEV_PROP, option::DEV_PROP_INSTANCE, Some(0), &instance);

        let mut ip = [0u8; 12];
        ip[0..4].copy_from_slice(&self.dcp.ip.addr.octets());
        ip[4..8].copy_from_slice(&self.dcp.ip.mask.octets());
        ip[8..12].copy_from_slice(&self.dcp.ip.gateway.octets());
        let ip_info = if self.dcp.ip.is_unset() { 0 } else { 1 };
        writer.block(option::IP, option::IP_PARAMETER, Some(ip_info), &ip);

        let blocks_len = writer.len();

        DcpHeader {
            service_id: service::IDENTIFY,
            service_type: service::TYPE_SUCCESS,
            xid,
            response_delay: 0,
            data_length: blocks_len as u16,
        }
        .encode(&mut frame[eth_len..]);

        frame[eth_len + DCP_HEADER_SIZE..eth_len + DCP_HEADER_SIZE + blocks_len]
            .copy_from_slice(&blocks[..blocks_len]);
        frame.truncate(eth_len + DCP_HEADER_SIZE + blocks_len);
        frame
    }

    fn dcp_get(&mut self, src: MacAddr, header: &DcpHeader, body: &[u8]) {
        let requests = match parse_blocks(body, false) {
            Ok(blocks) => blocks,
            Err(_) => return,
        };

        let mut blocks = [0u8; 512];
        let mut writer = DcpBlockWriter::new(&mut blocks);

        for request in &requests {
            match (request.option, request.suboption) {
                (option::DEV_PROP, option::DEV_PROP_NAME) => {
                    writer.block(
                        option::DEV_PROP,
                        option::DEV_PROP_NAME,
                        Some(0),
                        self.dcp.station_name.as_bytes(),
                    );
                }
                (option::IP, option::IP_PARAMETER) => {
                    let mut ip = [0u8; 12];
                    ip[0..4].copy_from_slice(&self.dcp.ip.addr.octets());
                    ip[4..8].copy_from_slice(&self.dcp.ip.mask.octets());
                    ip[8..12].copy_from_slice(&self.dcp.ip.gateway.octets());
                    writer.block(option::IP, option::IP_PARAMETER, Some(0), &ip);
                }
                (opt, sub) => {
                    writer.block(
                        option::CONTROL,
                        option::CONTROL_RESPONSE,
                        None,
                        &[opt, sub, block_error::SUBOPTION_NOT_SUPPORTED],
                    );
                }
            }
        }

        let blocks_len = writer.len();
        self.dcp_send_response(src, header.xid, service::GET, &blocks[..blocks_len]);
    }

    fn dcp_set(&mut self, src: MacAddr, header: &DcpHeader, body: &[u8]) {
        let requests = match parse_blocks(body, true) {
            Ok(blocks) => blocks,
            Err(_) => return,
        };

        let mut blocks = [0u8; 512];
        let mut writer = DcpBlockWriter::new(&mut blocks);
        let mut factory_reset = false;

        for request in &requests {
            let permanent = request.info.unwrap_or(0) & QUALIFIER_PERMANENT != 0;

            let result = match (request.option, request.suboption) {
                (option::DEV_PROP, option::DEV_PROP_NAME) => {
                    self.dcp_apply_name(&request.data, permanent)
                }
                (option::IP, option::IP_PARAMETER) => self.dcp_apply_ip(&request.data, permanent),
                (option::CONTROL, option::CONTROL_SIGNAL) => {
                    self.dcp_signal_led();
                    block_error::OK
                }
                (option::CONTROL, option::CONTROL_FACTORY_RESET)
                | (option::CONTROL, option::CONTROL_RESET_TO_FACTORY) => {
                    factory_reset = true;
                    block_error::OK
                }
                (option::CONTROL, _) => block_error::SUBOPTION_NOT_SUPPORTED,
                _ => block_error::OPTION_NOT_SUPPORTED,
            };

            writer.block(
                option::CONTROL,
                option::CONTROL_RESPONSE,
                None,
                &[request.option, request.suboption, result],
            );
        }

        match self.dcp.sam {
            Some(sam) if sam != src => {
                logging::debug!(self.log, "set access moved to another station";
                                "previous" => %sam,
                                "current" => %src);
            }
            _ => {}
        }
        self.dcp.sam = Some(src);

        let blocks_len = writer.len();
        self.dcp_send_response(src, header.xid, service::SET, &blocks[..blocks_len]);

        // Reset after the response so the requester gets an answer.
        if factory_reset {
            let _ = self.factory_reset_internal(true);
        }
    }

    fn dcp_apply_name(&mut self, data: &[u8], permanent: bool) -> u8 {
        let name = match std::str::from_utf8(data) {
            Ok(name) => name.trim_end_matches(char::from(0)).to_string(),
            Err(_) => return block_error::SET_NOT_POSSIBLE,
        };

        if !name.is_empty() && !name_is_valid(&name) {
            return block_error::SET_NOT_POSSIBLE;
        }

        let changed = name != self.dcp.station_name;
        self.dcp.station_name = name.clone();
        self.dcp.update_state();
        self.dcp_stop_hello();

        if permanent {
            let _ = crate::files::save(
                self.platform.as_mut(),
                crate::files::names::STATION_NAME,
                FILE_VERSION_NAME,
                name.as_bytes(),
            );
        }

        if changed {
            logging::info!(self.log, "station name set"; "name" => %name, "permanent" => permanent);
            self.abort_all_ars(PnioStatus::abort(codes::ABORT_DCP_NAME_CHANGED));
        }

        block_error::OK
    }

    fn dcp_apply_ip(&mut self, data: &[u8], permanent: bool) -> u8 {
        if data.len() < 12 {
            return block_error::SET_NOT_POSSIBLE;
        }

        let suite = IpSuite {
            addr: Ipv4Addr::new(data[0], data[1], data[2], data[3]),
            mask: Ipv4Addr::new(data[4], data[5], data[6], data[7]),
            gateway: Ipv4Addr::new(data[8], data[9], data[10], data[11]),
        };

        if self.platform.set_ip_suite(&suite).is_err() {
            return block_error::SET_NOT_POSSIBLE;
        }

        self.dcp.ip = suite;
        self.dcp.update_state();

        if permanent {
            let _ = crate::files::save(
                self.platform.as_mut(),
                crate::files::names::IP_SUITE,
                FILE_VERSION_IP,
                data,
            );
        }

        logging::info!(self.log, "ip suite set"; "addr" => %suite.addr, "permanent" => permanent);
        block_error::OK
    }

    fn dcp_signal_led(&mut self) {
        let events = std::sync::Arc::clone(&self.events);
        events.signal_led_ind(self, true);

        if let Some(timer) = self.dcp.led_timer.take() {
            self.sched.cancel(timer);
        }
        self.dcp.led_timer = self
            .sched
            .schedule(3_000_000, TimerKind::SignalLedOff, "dcp_led")
            .ok();
    }

    /// Timer hook: end of the signal flash period.
    pub(crate) fn dcp_led_off(&mut self) {
        self.dcp.led_timer = None;
        let events = std::sync::Arc::clone(&self.events);
        events.signal_led_ind(self, false);
    }

    fn dcp_send_response(&mut self, dst: MacAddr, xid: u32, service_id: u8, blocks: &[u8]) {
        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let eth_len = eth::write_header(&mut frame, dst, self.cfg.mac, None, FRAME_ID_DCP_GETSET);

        DcpHeader {
            service_id,
            service_type: service::TYPE_SUCCESS,
            xid,
            response_delay: 0,
            data_length: blocks.len() as u16,
        }
        .encode(&mut frame[eth_len..]);

        frame[eth_len + DCP_HEADER_SIZE..eth_len + DCP_HEADER_SIZE + blocks.len()]
            .copy_from_slice(blocks);
        frame.truncate(eth_len + DCP_HEADER_SIZE + blocks.len());

        if self.platform.eth_send(0, &frame).is_err() {
            logging::warn!(self.log, "dcp response send failed");
        }
    }

    /// Another device answering identify with our station name means the
    /// name is not unique on this network.
    fn dcp_check_name_collision(&mut self, src: MacAddr, body: &[u8]) {
        if src == self.cfg.mac || self.dcp.station_name.is_empty() {
            return;
        }

        let blocks = match parse_blocks(body, true) {
            Ok(blocks) => blocks,
            Err(_) => return,
        };

        let duplicate = blocks.iter().any(|block| {
            block.option == option::DEV_PROP
                && block.suboption == option::DEV_PROP_NAME
                && block.data == self.dcp.station_name.as_bytes()
        });

        if duplicate {
            logging::warn!(self.log, "duplicate station name on network";
                           "name" => %self.dcp.station_name,
                           "peer" => %src);
            let _ = self.raise_duplicate_name_diagnosis();
        }
    }

    /// Start the HELLO burst for an unnamed device.
    pub(crate) fn dcp_start_hello(&mut self) {
        self.dcp.hello_remaining = HELLO_RETRY;
        self.dcp.hello_timer = self
            .sched
            .schedule(HELLO_INTERVAL_US, TimerKind::DcpHello, "dcp_hello")
            .ok();
    }

    fn dcp_stop_hello(&mut self) {
        if let Some(timer) = self.dcp.hello_timer.take() {
            self.sched.cancel(timer);
        }
        self.dcp.hello_remaining = 0;
    }

    /// Timer hook: emit one HELLO and rearm while the burst lasts.
    pub(crate) fn dcp_hello_tick(&mut self) {
        self.dcp.hello_timer = None;

        if self.dcp.hello_remaining == 0 || !self.dcp.station_name.is_empty() {
            return;
        }
        self.dcp.hello_remaining -= 1;

        let mut blocks = [0u8; 256];
        let mut writer = DcpBlockWriter::new(&mut blocks);
        writer.block(
            option::DEV_PROP,
            option::DEV_PROP_NAME,
            Some(0),
            self.dcp.station_name.as_bytes(),
        );
        let mut device_id = [0u8; 4];
        BigEndian::write_u16(&mut device_id[0..], self.cfg.identity.vendor_id);
        BigEndian::write_u16(&mut device_id[2..], self.cfg.identity.device_id);
        writer.block(option::DEV_PROP, option::DEV_PROP_DEVICE_ID, Some(0), &device_id);
        writer.block(option::DEVICE_INITIATIVE, 1, Some(0), &[0x00, 0x01]);

        let blocks_len = writer.len();
        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let eth_len = eth::write_header(
            &mut frame,
            MacAddr::DCP_HELLO,
            self.cfg.mac,
            None,
            FRAME_ID_DCP_HELLO,
        );
        DcpHeader {
            service_id: service::HELLO,
            service_type: service::TYPE_REQUEST,
            xid: u32::from(self.dcp.hello_remaining),
            response_delay: 0,
            data_length: blocks_len as u16,
        }
        .encode(&mut frame[eth_len..]);
        frame[eth_len + DCP_HEADER_SIZE..eth_len + DCP_HEADER_SIZE + blocks_len]
            .copy_from_slice(&blocks[..blocks_len]);
        frame.truncate(eth_len + DCP_HEADER_SIZE + blocks_len);

        if self.platform.eth_send(0, &frame).is_err() {
            logging::warn!(self.log, "hello send failed");
        }

        if self.dcp.hello_remaining > 0 {
            self.dcp.hello_timer = self
                .sched
                .schedule(HELLO_INTERVAL_US, TimerKind::DcpHello, "dcp_hello")
                .ok();
        }
    }

    /// Load persisted name and IP at init.
    pub(crate) fn dcp_restore(&mut self) -> StackResult<()> {
        if let Some(bytes) = crate::files::load(
            self.platform.as_mut(),
            crate::files::names::STATION_NAME,
            FILE_VERSION_NAME,
        ) {
            match String::from_utf8(bytes) {
                Ok(name) if name.is_empty() || name_is_valid(&name) => {
                    self.dcp.station_name = name;
                }
                _ => {}
            }
        } else if !self.cfg.station_name.is_empty() {
            self.dcp.station_name = self.cfg.station_name.clone();
        }

        if let Some(bytes) = crate::files::load(
            self.platform.as_mut(),
            crate::files::names::IP_SUITE,
            FILE_VERSION_IP,
        ) {
            if bytes.len() >= 12 {
                self.dcp.ip = IpSuite {
                    addr: Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
                    mask: Ipv4Addr::new(bytes[4], bytes[5], bytes[6], bytes[7]),
                    gateway: Ipv4Addr::new(bytes[8], bytes[9], bytes[10], bytes[11]),
                };
            }
        } else if let Some(suite) = self.cfg.ip {
            self.dcp.ip = suite;
        }

        if !self.dcp.ip.is_unset() {
            let suite = self.dcp.ip;
            self.platform.set_ip_suite(&suite)?;
        }

        self.dcp.update_state();
        Ok(())
    }

    fn raise_duplicate_name_diagnosis(&mut self) -> StackResult<()> {
        use crate::diag::{ChannelProperties, Maintenance, Specifier, StdDiag};

        // Remote mismatch on the interface submodule of the DAP.
        self.diag_std_add(
            crate::types::SubslotKey::new(0, 0, crate::types::SUBSLOT_INTERFACE),
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
        .map(|_| ())
        .or_else(|err| match err {
            // Already recorded is fine.
            StackError::AlreadyExists => Ok(()),
            other => Err(other),
        })
    }
}
