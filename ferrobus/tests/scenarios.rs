//! End-to-end scenarios: a mock controller drives the device through the
//! platform seam, from cold connect to cyclic exchange, watchdog abort,
//! alarms, diagnosis and factory reset.

use ferrobus::alarm::{
    self, alarm_type, AlarmNotification, PduType, RtaHeader, ADD_FLAGS_TACK,
};
use ferrobus::block::{bt, BlockReader, BlockWriter};
use ferrobus::config::{DeviceConfig, DeviceIdentity};
use ferrobus::device::Device;
use ferrobus::diag::{ChannelProperties, Maintenance, Specifier, StdDiag};
use ferrobus::error::{codes, PnioStatus, StackError};
use ferrobus::events::{ArEvent, DeviceEvents, EventResult};
use ferrobus::ident::{ExpApi, ExpDataDesc, ExpModule, ExpSubmodule, ExpectedIdent, SubmoduleDir};
use ferrobus::platform::mock::MockPlatform;
use ferrobus::platform::Platform;
use ferrobus::rpc::connect::{
    encode_alarm_cr_block, encode_ar_block, encode_expected_block, encode_iocr_block, ArBlockReq,
    AlarmCrBlockReq, IocrApiEntry, IocrBlockReq,
};
use ferrobus::rpc::control::{command, ControlBlock};
use ferrobus::rpc::header::{opnum, PacketType, RpcHeader, FLAG1_FRAGMENT, FLAG1_LAST_FRAGMENT, RPC_HEADER_SIZE};
use ferrobus::rpc::{read_ndr_status, write_ndr_request, write_ndr_response};
use ferrobus::types::{
    Arep, IpSuite, MacAddr, SubslotKey, FRAME_ID_ALARM_HIGH, FRAME_ID_ALARM_LOW, IOXS_GOOD,
};
use ferrobus::StackResult;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

const DEVICE_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
const CONTROLLER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);
const CONTROLLER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 90);
const CONTROLLER_EPHEMERAL: u16 = 0xC020;

const AR_UUID: ferrobus::types::Uuid = ferrobus::types::Uuid {
    data1: 0x1010_2020,
    data2: 0x3030,
    data3: 0x4040,
    data4: [1, 2, 3, 4, 5, 6, 7, 8],
};
const ACTIVITY: ferrobus::types::Uuid = ferrobus::types::Uuid {
    data1: 0xAAAA_BBBB,
    data2: 0xCCCC,
    data3: 0xDDDD,
    data4: [9, 9, 9, 9, 9, 9, 9, 9],
};

const INPUT_KEY: SubslotKey = SubslotKey {
    api: 0,
    slot: 1,
    subslot: 1,
};
const OUTPUT_KEY: SubslotKey = SubslotKey {
    api: 0,
    slot: 1,
    subslot: 2,
};

/* ----- platform shared between the test and the device ----- */

#[derive(Clone)]
struct SharedPlatform(Arc<Mutex<MockPlatform>>);

impl SharedPlatform {
    fn new() -> SharedPlatform {
        SharedPlatform(Arc::new(Mutex::new(MockPlatform::new())))
    }

    fn with<R>(&self, operate: impl FnOnce(&mut MockPlatform) -> R) -> R {
        operate(&mut self.0.lock().unwrap())
    }
}

impl Platform for SharedPlatform {
    fn now_us(&mut self) -> u64 {
        self.0.lock().unwrap().now_us()
    }
    fn rand_u32(&mut self) -> u32 {
        self.0.lock().unwrap().rand_u32()
    }
    fn eth_send(&mut self, port: usize, frame: &[u8]) -> StackResult<usize> {
        self.0.lock().unwrap().eth_send(port, frame)
    }
    fn udp_open(&mut self, addr: Ipv4Addr, port: u16) -> StackResult<usize> {
        self.0.lock().unwrap().udp_open(addr, port)
    }
    fn udp_send(
        &mut self,
        handle: usize,
        dst_addr: Ipv4Addr,
        dst_port: u16,
        data: &[u8],
    ) -> StackResult<usize> {
        self.0.lock().unwrap().udp_send(handle, dst_addr, dst_port, data)
    }
    fn udp_recv(
        &mut self,
        handle: usize,
        buf: &mut [u8],
    ) -> StackResult<Option<(Ipv4Addr, u16, usize)>> {
        self.0.lock().unwrap().udp_recv(handle, buf)
    }
    fn udp_close(&mut self, handle: usize) {
        self.0.lock().unwrap().udp_close(handle)
    }
    fn load_file(&mut self, name: &str) -> Option<Vec<u8>> {
        self.0.lock().unwrap().load_file(name)
    }
    fn save_file(&mut self, name: &str, data: &[u8]) -> StackResult<()> {
        self.0.lock().unwrap().save_file(name, data)
    }
    fn clear_file(&mut self, name: &str) {
        self.0.lock().unwrap().clear_file(name)
    }
}

/* ----- recording event sink ----- */

#[derive(Debug, Clone, PartialEq)]
enum Recorded {
    State(Arep, ArEvent, PnioStatus),
    Connect(Arep),
    DControl(Arep),
    CControlCnf(Arep, PnioStatus),
    AlarmInd(Arep, AlarmNotification),
    AlarmCnf(Arep),
    AlarmAckCnf(Arep),
    NewDataStatus(Arep, u8),
    Reset,
    Led(bool),
}

struct RecorderState {
    log: Mutex<Vec<Recorded>>,
    /// Call `application_ready` from within the PRMEND indication, after
    /// setting the input byte.
    auto_ready: bool,
    input_value: u8,
}

#[derive(Clone)]
struct Recorder(Arc<RecorderState>);

impl Recorder {
    fn new(auto_ready: bool) -> Recorder {
        Recorder(Arc::new(RecorderState {
            log: Mutex::new(Vec::new()),
            auto_ready,
            input_value: 0x42,
        }))
    }

    fn log(&self) -> Vec<Recorded> {
        self.0.log.lock().unwrap().clone()
    }

    fn states(&self) -> Vec<ArEvent> {
        self.log()
            .into_iter()
            .filter_map(|entry| match entry {
                Recorded::State(_, event, _) => Some(event),
                _ => None,
            })
            .collect()
    }

    fn abort_status(&self) -> Option<PnioStatus> {
        self.log().into_iter().find_map(|entry| match entry {
            Recorded::State(_, ArEvent::Abort, status) => Some(status),
            _ => None,
        })
    }

    fn push(&self, entry: Recorded) {
        self.0.log.lock().unwrap().push(entry);
    }
}

impl DeviceEvents for Recorder {
    fn connect_ind(&self, _stack: &mut ferrobus::Stack, arep: Arep) -> EventResult {
        self.push(Recorded::Connect(arep));
        Ok(())
    }

    fn dcontrol_ind(&self, _stack: &mut ferrobus::Stack, arep: Arep, _command: u16) -> EventResult {
        self.push(Recorded::DControl(arep));
        Ok(())
    }

    fn ccontrol_cnf(
        &self,
        _stack: &mut ferrobus::Stack,
        arep: Arep,
        status: PnioStatus,
    ) -> EventResult {
        self.push(Recorded::CControlCnf(arep, status));
        Ok(())
    }

    fn state_ind(
        &self,
        stack: &mut ferrobus::Stack,
        arep: Arep,
        event: ArEvent,
        status: PnioStatus,
    ) {
        self.push(Recorded::State(arep, event, status));

        if event == ArEvent::PrmEnd && self.0.auto_ready {
            stack
                .input_set_data_and_iops(arep, INPUT_KEY, &[self.0.input_value], IOXS_GOOD)
                .expect("input submodule mapped");
            stack.application_ready(arep).expect("ready accepted");
        }
    }

    fn new_data_status_ind(&self, _stack: &mut ferrobus::Stack, arep: Arep, _cr: usize, status: u8) {
        self.push(Recorded::NewDataStatus(arep, status));
    }

    fn alarm_ind(
        &self,
        _stack: &mut ferrobus::Stack,
        arep: Arep,
        alarm: &AlarmNotification,
    ) -> EventResult {
        self.push(Recorded::AlarmInd(arep, alarm.clone()));
        Ok(())
    }

    fn alarm_cnf(&self, _stack: &mut ferrobus::Stack, arep: Arep, _status: PnioStatus) {
        self.push(Recorded::AlarmCnf(arep));
    }

    fn alarm_ack_cnf(&self, _stack: &mut ferrobus::Stack, arep: Arep, _status: PnioStatus) {
        self.push(Recorded::AlarmAckCnf(arep));
    }

    fn reset_ind(&self, _stack: &mut ferrobus::Stack, _full_reset: bool) -> EventResult {
        self.push(Recorded::Reset);
        Ok(())
    }

    fn signal_led_ind(&self, _stack: &mut ferrobus::Stack, on: bool) {
        self.push(Recorded::Led(on));
    }
}

/* ----- controller-side builders ----- */

fn connect_body(with_output: bool) -> Vec<u8> {
    let ar = ArBlockReq {
        ar_type: 0x0001,
        ar_uuid: AR_UUID,
        session_key: 1,
        initiator_mac: CONTROLLER_MAC,
        initiator_object_uuid: ferrobus::types::Uuid::io_device_object(1, 0x0404, 0x0202),
        properties: 0x0000_0131,
        cmi_activity_timeout_factor: 6,
        initiator_udp_port: 0x8892,
        station_name: "plc-1".to_string(),
    };

    let input = IocrBlockReq {
        iocr_type: 1,
        iocr_ref: 1,
        properties: 1,
        data_length: 40,
        frame_id: 0x8001,
        send_clock_factor: 32,
        reduction_ratio: 1,
        watchdog_factor: 3,
        data_hold_factor: 3,
        apis: vec![IocrApiEntry {
            api: 0,
            io_data: vec![(1, 1, 0)],
            iocs: vec![],
        }],
    };

    let output = IocrBlockReq {
        iocr_type: 2,
        iocr_ref: 2,
        properties: 1,
        data_length: 40,
        frame_id: 0x8002,
        send_clock_factor: 32,
        reduction_ratio: 1,
        watchdog_factor: 3,
        data_hold_factor: 3,
        apis: vec![IocrApiEntry {
            api: 0,
            io_data: vec![(1, 2, 0)],
            iocs: vec![(1, 1, 4)],
        }],
    };

    let alarm_cr = AlarmCrBlockReq {
        alarm_cr_type: 0x0001,
        properties: 0,
        rta_timeout_factor: 1,
        rta_retries: 3,
        remote_alarm_ref: 2,
        max_alarm_data_length: 200,
    };

    let mut submodules = vec![ExpSubmodule {
        subslot_nr: 1,
        ident: 0x21,
        properties: 1,
        data: vec![ExpDataDesc {
            direction: 1,
            length: 1,
        }],
    }];
    if with_output {
        submodules.push(ExpSubmodule {
            subslot_nr: 2,
            ident: 0x22,
            properties: 2,
            data: vec![ExpDataDesc {
                direction: 2,
                length: 1,
            }],
        });
    }
    let expected = ExpectedIdent {
        apis: vec![ExpApi {
            api: 0,
            modules: vec![ExpModule {
                slot_nr: 1,
                module_ident: 0x20,
                properties: 0,
                submodules,
            }],
        }],
    };

    let mut scratch = vec![0u8; 2048];
    let mut writer = BlockWriter::new(&mut scratch);
    encode_ar_block(&mut writer, &ar).unwrap();
    encode_iocr_block(&mut writer, &input).unwrap();
    if with_output {
        encode_iocr_block(&mut writer, &output).unwrap();
    }
    encode_alarm_cr_block(&mut writer, &alarm_cr).unwrap();
    encode_expected_block(&mut writer, &expected).unwrap();
    let blocks_len = writer.position();

    let mut body = Vec::new();
    write_ndr_request(&mut body, 4096, blocks_len as u32);
    body.extend_from_slice(&scratch[..blocks_len]);
    body
}

fn request_datagram(req_opnum: u16, seq: u32, body: &[u8]) -> Vec<u8> {
    let mut header = RpcHeader::new(PacketType::Request);
    header.activity = ACTIVITY;
    header.interface = ferrobus::types::Uuid::IO_DEVICE_INTERFACE;
    header.seq = seq;
    header.opnum = req_opnum;
    header.body_len = body.len() as u16;

    let mut datagram = vec![0u8; RPC_HEADER_SIZE + body.len()];
    header.encode(&mut datagram);
    datagram[RPC_HEADER_SIZE..].copy_from_slice(body);
    datagram
}

fn control_body(block_type: u16, control_command: u16) -> Vec<u8> {
    let control = ControlBlock {
        block_type,
        ar_uuid: AR_UUID,
        session_key: 1,
        alarm_sequence_number: 0,
        control_command,
        control_block_properties: 0,
    };

    let mut scratch = vec![0u8; 128];
    let mut writer = BlockWriter::new(&mut scratch);
    control.encode(&mut writer).unwrap();
    let blocks_len = writer.position();

    let mut body = Vec::new();
    write_ndr_request(&mut body, 4096, blocks_len as u32);
    body.extend_from_slice(&scratch[..blocks_len]);
    body
}

fn cyclic_output_frame(cycle: u16, value: u8) -> Vec<u8> {
    let mut frame = vec![0u8; 64];
    let used = ferrobus::eth::write_header(&mut frame, DEVICE_MAC, CONTROLLER_MAC, None, 0x8002);

    frame[used] = value; // output data at offset 0
    frame[used + 1] = IOXS_GOOD; // its IOPS
    frame[used + 4] = IOXS_GOOD; // IOCS for our input submodule
    frame[used + 40] = (cycle >> 8) as u8;
    frame[used + 41] = cycle as u8;
    frame[used + 42] = 0x35;
    frame[used + 43] = 0;
    frame.truncate(used + 44);
    frame
}

fn alarm_transport_ack(high: bool, ack_seq: u16) -> Vec<u8> {
    let frame_id = if high {
        FRAME_ID_ALARM_HIGH
    } else {
        FRAME_ID_ALARM_LOW
    };

    let mut frame = vec![0u8; 64];
    let used = ferrobus::eth::write_header(&mut frame, DEVICE_MAC, CONTROLLER_MAC, None, frame_id);

    let header = RtaHeader {
        dst_ref: 1, // the device arep
        src_ref: 2, // the controller alarm reference
        pdu_type: PduType::Ack,
        version: 1,
        add_flags: 0x01,
        send_seq: 0xFFFF,
        ack_seq,
    };
    let mut writer = BlockWriter::new(&mut frame[used..]);
    alarm::rta::encode_rta(&mut writer, &header, &[]).unwrap();
    let total = used + writer.position();
    frame.truncate(total);
    frame
}

fn alarm_data_frame(send_seq: u16, notification: &AlarmNotification) -> Vec<u8> {
    let mut var = vec![0u8; 512];
    let mut writer = BlockWriter::new(&mut var);
    notification
        .encode(&mut writer, bt::ALARM_NOTIFICATION_LOW)
        .unwrap();
    let var_len = writer.position();

    let mut frame = vec![0u8; 1024];
    let used =
        ferrobus::eth::write_header(&mut frame, DEVICE_MAC, CONTROLLER_MAC, None, FRAME_ID_ALARM_LOW);

    let header = RtaHeader {
        dst_ref: 1,
        src_ref: 2,
        pdu_type: PduType::Data,
        version: 1,
        add_flags: ADD_FLAGS_TACK | 0x01,
        send_seq,
        ack_seq: 0xFFFF,
    };
    let mut writer = BlockWriter::new(&mut frame[used..]);
    alarm::rta::encode_rta(&mut writer, &header, &var[..var_len]).unwrap();
    let total = used + writer.position();
    frame.truncate(total);
    frame
}

/* ----- harness ----- */

struct Rig {
    device: Device,
    platform: SharedPlatform,
    recorder: Recorder,
    /// Cycle counter of the simulated controller's provider.
    cycle: std::cell::Cell<u16>,
}

impl Rig {
    fn new(auto_ready: bool) -> Rig {
        let platform = SharedPlatform::new();
        let recorder = Recorder::new(auto_ready);

        let mut cfg = DeviceConfig::new(
            DeviceIdentity {
                vendor_id: 0x0493,
                device_id: 0x0001,
                oem_vendor_id: 0,
                oem_device_id: 0,
                product_name: "ferrobus-dev".to_string(),
                instance: 1,
            },
            DEVICE_MAC,
        );
        cfg.station_name = "dev".to_string();
        cfg.ip = Some(IpSuite {
            addr: Ipv4Addr::new(192, 168, 0, 50),
            mask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(192, 168, 0, 1),
        });
        cfg.im.im0.vendor_id = 0x0493;
        cfg.im.im0.order_id = "FB-01".to_string();
        cfg.im.im0.serial_number = "000001".to_string();

        let device = Device::init(cfg, recorder.clone(), platform.clone(), None).unwrap();

        device.plug_module(0, 1, 0x20).unwrap();
        device
            .plug_submodule(0, 1, 1, 0x21, SubmoduleDir::Input, 1, 0)
            .unwrap();
        device
            .plug_submodule(0, 1, 2, 0x22, SubmoduleDir::Output, 0, 1)
            .unwrap();

        Rig {
            device,
            platform,
            recorder,
            cycle: std::cell::Cell::new(100),
        }
    }

    /// Advance the clock one tick and run the periodic work.
    fn tick_ms(&self) {
        self.platform.with(|p| p.advance_us(1000));
        self.device.handle_periodic();
    }

    /// Deliver one controller cyclic frame with the next cycle counter.
    fn feed_output(&self, value: u8) {
        let cycle = self.cycle.get();
        self.device
            .handle_eth_frame(0, &cyclic_output_frame(cycle, value));
        self.cycle.set(cycle.wrapping_add(32));
    }

    /// A tick with the controller still alive: feed then advance.
    fn lively_tick(&self, value: u8) {
        self.feed_output(value);
        self.tick_ms();
    }

    fn push_rpc(&self, datagram: Vec<u8>) {
        self.platform
            .with(|p| p.push_udp(0, CONTROLLER_IP, CONTROLLER_EPHEMERAL, datagram));
    }

    /// All datagrams sent so far, clearing the capture.
    fn take_udp(&self) -> Vec<(usize, Ipv4Addr, u16, Vec<u8>)> {
        self.platform.with(|p| std::mem::take(&mut p.sent_udp))
    }

    fn take_frames(&self) -> Vec<Vec<u8>> {
        self.platform
            .with(|p| std::mem::take(&mut p.sent_frames))
            .into_iter()
            .map(|(_, frame)| frame)
            .collect()
    }

    /// Run the connect handshake up to the DATA state; returns the arep.
    fn establish(&self) -> Arep {
        self.push_rpc(request_datagram(opnum::CONNECT, 0, &connect_body(true)));
        self.tick_ms();

        // Connect response must be positive.
        let sent = self.take_udp();
        let response = sent.last().expect("connect response sent");
        let status =
            read_ndr_status(&response.3[RPC_HEADER_SIZE..], false).expect("ndr status present");
        assert!(status.is_ok(), "connect rejected: {:?}", status);

        // Parameter end.
        self.push_rpc(request_datagram(
            opnum::CONTROL,
            1,
            &control_body(bt::PRMEND_REQ, command::PRM_END),
        ));
        self.tick_ms();

        // The auto-ready recorder answered PRMEND; the CControl request
        // goes to the controller's PNIO port.
        let ccontrol = self
            .take_udp()
            .into_iter()
            .find(|(_, _, port, _)| *port == 0xC003)
            .expect("ccontrol emitted");
        let request = RpcHeader::decode(&ccontrol.3).unwrap();
        assert_eq!(request.opnum, opnum::CONTROL);

        // Confirm application-ready.
        let mut body = Vec::new();
        write_ndr_response(&mut body, PnioStatus::OK, 0, false);
        let mut response_header = RpcHeader::new(PacketType::Response);
        response_header.activity = request.activity;
        response_header.seq = request.seq;
        response_header.body_len = body.len() as u16;
        let mut datagram = vec![0u8; RPC_HEADER_SIZE + body.len()];
        response_header.encode(&mut datagram);
        datagram[RPC_HEADER_SIZE..].copy_from_slice(&body);
        self.platform
            .with(|p| p.push_udp(1, CONTROLLER_IP, 0xC003, datagram));

        // One tick processes the confirmation while both directions carry
        // traffic, completing the WDATA phase.
        self.lively_tick(0x55);

        assert!(
            self.recorder.states().contains(&ArEvent::Data),
            "expected DATA, saw {:?}",
            self.recorder.states()
        );
        1
    }
}

/* ----- scenarios ----- */

#[test]
fn s1_cold_connect_and_cyclic_exchange() {
    let rig = Rig::new(true);
    let arep = rig.establish();
    assert_eq!(arep, 1);

    let states = rig.recorder.states();
    let startup = states.iter().position(|e| *e == ArEvent::Startup).unwrap();
    let prmend = states.iter().position(|e| *e == ArEvent::PrmEnd).unwrap();
    let ready = states.iter().position(|e| *e == ArEvent::ApplReady).unwrap();
    let data = states.iter().position(|e| *e == ArEvent::Data).unwrap();
    assert!(startup < prmend && prmend < ready && ready < data);

    // Observe a run of cyclic frames: one per millisecond, cycle counter
    // advancing by the send clock factor, payload carrying the input byte.
    rig.take_frames();
    for _ in 0..5 {
        rig.lively_tick(0x55);
    }

    let frames: Vec<Vec<u8>> = rig
        .take_frames()
        .into_iter()
        .filter(|frame| {
            ferrobus::eth::parse(frame)
                .map(|parsed| parsed.frame_id == 0x8001)
                .unwrap_or(false)
        })
        .collect();
    assert_eq!(frames.len(), 5);

    let mut previous: Option<u16> = None;
    for frame in &frames {
        let parsed = ferrobus::eth::parse(frame).unwrap();
        assert_eq!(parsed.payload[0], 0x42);

        let cycle =
            (u16::from(parsed.payload[40]) << 8) | u16::from(parsed.payload[41]);
        if let Some(previous) = previous {
            assert_eq!(cycle.wrapping_sub(previous), 32);
        }
        previous = Some(cycle);
    }

    // The output image is readable with fresh data flagged once.
    let (data, iops, fresh) = rig
        .device
        .output_get_data_and_iops(arep, OUTPUT_KEY)
        .unwrap();
    assert_eq!(data, vec![0x55]);
    assert_eq!(iops, IOXS_GOOD);
    assert!(fresh);

    // And the controller reported good consumer status for our input.
    assert_eq!(rig.device.input_get_iocs(arep, INPUT_KEY).unwrap(), IOXS_GOOD);
}

#[test]
fn s2_watchdog_abort_on_silent_consumer() {
    let rig = Rig::new(true);
    let arep = rig.establish();

    // Keep the controller alive for a few cycles.
    for _ in 0..3 {
        rig.lively_tick(1);
    }
    assert_eq!(rig.device.output_get_data_and_iops(arep, OUTPUT_KEY).unwrap().1, IOXS_GOOD);

    // Silence. The data hold budget is 3 periods of 1 ms.
    for _ in 0..5 {
        rig.tick_ms();
    }

    let status = rig.recorder.abort_status().expect("abort indicated");
    assert_eq!(status.error_code_1, 0xFD);
    assert_eq!(status.error_code_2, 0x05);

    // The handle died with the AR.
    assert_eq!(
        rig.device.input_set_data_and_iops(arep, INPUT_KEY, &[0], IOXS_GOOD),
        Err(StackError::NotFound)
    );
}

#[test]
fn s3_process_alarm_roundtrip_and_retransmission() {
    let rig = Rig::new(true);
    let arep = rig.establish();
    rig.take_frames();

    // First alarm: emitted once on the high priority lane.
    rig.device
        .alarm_send_process_alarm(arep, INPUT_KEY, 0x0010, &[0x07])
        .unwrap();

    let frames = rig.take_frames();
    let alarm_frame = frames
        .iter()
        .map(|frame| ferrobus::eth::parse(frame).unwrap())
        .find(|parsed| parsed.frame_id == FRAME_ID_ALARM_HIGH)
        .expect("alarm frame emitted");

    // send_seq of the first DATA PDU is 0.
    let mut reader = BlockReader::new(alarm_frame.payload);
    let rta = RtaHeader::decode(&mut reader).unwrap();
    assert_eq!(rta.pdu_type, PduType::Data);
    assert_eq!(rta.send_seq, 0);

    // While unacknowledged, another process alarm is refused.
    assert_eq!(
        rig.device
            .alarm_send_process_alarm(arep, INPUT_KEY, 0x0011, &[1]),
        Err(StackError::Busy)
    );

    // The controller acknowledges; the confirm arrives exactly once and
    // the lane is free again.
    rig.device.handle_eth_frame(0, &alarm_transport_ack(true, 0));
    let confirms = rig
        .recorder
        .log()
        .iter()
        .filter(|entry| matches!(entry, Recorded::AlarmCnf(_)))
        .count();
    assert_eq!(confirms, 1);

    rig.device
        .alarm_send_process_alarm(arep, INPUT_KEY, 0x0012, &[2])
        .unwrap();
    rig.take_frames();

    // No acknowledgement now: the RTA timer (factor 1 => 100 ms) must
    // retransmit up to three times, then the AR aborts with the APMS
    // timeout code.
    let mut retransmits = 0;
    for _ in 0..5 {
        for _ in 0..110 {
            rig.lively_tick(1);
        }
        retransmits += rig
            .take_frames()
            .iter()
            .filter_map(|frame| ferrobus::eth::parse(frame))
            .filter(|parsed| parsed.frame_id == FRAME_ID_ALARM_HIGH)
            .count();
        if rig.recorder.abort_status().is_some() {
            break;
        }
    }

    assert_eq!(retransmits, 3);
    let status = rig.recorder.abort_status().expect("abort after retries");
    assert_eq!(status.error_code_1, codes::C1_APMS);
    assert_eq!(status.error_code_2, codes::C2_APMS_TIMEOUT);
}

#[test]
fn s3b_inbound_alarm_ack_flow() {
    let rig = Rig::new(true);
    let arep = rig.establish();
    rig.take_frames();

    let notification = AlarmNotification {
        alarm_type: alarm_type::PROCESS,
        key: OUTPUT_KEY,
        module_ident: 0x20,
        submodule_ident: 0x22,
        specifier: 0,
        usi: 0x0031,
        data: vec![0xAB],
    };
    rig.device
        .handle_eth_frame(0, &alarm_data_frame(0, &notification));

    // Delivered upward, transport-acked on the wire.
    let delivered = rig.recorder.log().into_iter().find_map(|entry| match entry {
        Recorded::AlarmInd(arep, alarm) => Some((arep, alarm)),
        _ => None,
    });
    let (ind_arep, alarm) = delivered.expect("alarm indication");
    assert_eq!(ind_arep, arep);
    assert_eq!(alarm.data, vec![0xAB]);

    let acked = rig
        .take_frames()
        .iter()
        .filter_map(|frame| ferrobus::eth::parse(frame))
        .any(|parsed| parsed.frame_id == FRAME_ID_ALARM_LOW);
    assert!(acked, "transport ack emitted");

    // The application acknowledges; the AlarmAck PDU goes out and its
    // transport ack confirms.
    rig.device
        .alarm_send_ack(arep, &alarm, PnioStatus::OK)
        .unwrap();
    let ack_frames = rig.take_frames();
    assert!(!ack_frames.is_empty());

    rig.device.handle_eth_frame(0, &alarm_transport_ack(false, 0));
    assert!(rig
        .recorder
        .log()
        .iter()
        .any(|entry| matches!(entry, Recorded::AlarmAckCnf(_))));
}

#[test]
fn s4_diagnosis_add_update_remove() {
    let rig = Rig::new(true);
    let _arep = rig.establish();
    rig.take_frames();

    let diag = StdDiag {
        channel: 4,
        properties: ChannelProperties::default()
            .with_maintenance(Maintenance::Fault)
            .with_specifier(Specifier::Appears),
        error_type: 0x0100,
        ext_error_type: 0,
        ext_value: 0,
        qualifier: 0,
    };

    rig.device.diag_std_add(INPUT_KEY, diag.clone()).unwrap();
    rig.device
        .diag_std_update(
            INPUT_KEY,
            StdDiag {
                ext_value: 1234,
                ..diag.clone()
            },
        )
        .unwrap();

    // Acknowledge each lane transmission so the queue drains.
    rig.device.handle_eth_frame(0, &alarm_transport_ack(false, 0));
    rig.device.diag_std_remove(INPUT_KEY, 4, 0x0100, 0).unwrap();
    rig.device.handle_eth_frame(0, &alarm_transport_ack(false, 1));
    rig.device.handle_eth_frame(0, &alarm_transport_ack(false, 2));

    let diag_alarms: Vec<_> = rig
        .take_frames()
        .iter()
        .filter_map(|frame| ferrobus::eth::parse(frame).map(|p| (p.frame_id, p.payload.to_vec())))
        .filter(|(frame_id, payload)| {
            // DATA PDUs on the low lane; transport acks are type 3.
            *frame_id == FRAME_ID_ALARM_LOW && payload.get(4).map(|b| b & 0x0F) == Some(1)
        })
        .collect();
    assert_eq!(diag_alarms.len(), 3, "appear, change, disappear");

    // After removal the subslot's fault summary is clear.
    rig.device.with(|stack| {
        let sub = stack.ident.subslot(0, 1, 1).unwrap();
        assert!(!sub.summary.fault);
        assert!(sub.diag_head.is_none());
    });
}

#[test]
fn s5_factory_reset() {
    let rig = Rig::new(true);
    let arep = rig.establish();
    let _ = arep;

    rig.device.factory_reset().unwrap();

    assert_eq!(rig.device.station_name(), "");
    rig.device.with(|stack| {
        assert_eq!(stack.cmina_state(), ferrobus::dcp::CminaState::Setup);
        assert_eq!(stack.active_ar_count(), 0);
        for name in ferrobus::files::names::ALL.iter() {
            assert!(stack.platform.load_file(name).is_none());
        }
    });

    assert!(rig.recorder.log().contains(&Recorded::Reset));
    assert!(rig.recorder.states().contains(&ArEvent::Abort));
}

#[test]
fn s6_fragmented_connect_out_of_order() {
    let rig = Rig::new(true);

    let body = connect_body(true);
    let third = (body.len() + 2) / 3;
    let chunks: Vec<&[u8]> = body.chunks(third).collect();
    assert_eq!(chunks.len(), 3);

    let make_fragment = |index: usize, last: bool| -> Vec<u8> {
        let chunk = chunks[index];
        let mut header = RpcHeader::new(PacketType::Request);
        header.activity = ACTIVITY;
        header.seq = 0;
        header.opnum = opnum::CONNECT;
        header.flags1 = FLAG1_FRAGMENT | if last { FLAG1_LAST_FRAGMENT } else { 0 };
        header.frag_num = index as u16;
        header.body_len = chunk.len() as u16;

        let mut datagram = vec![0u8; RPC_HEADER_SIZE + chunk.len()];
        header.encode(&mut datagram);
        datagram[RPC_HEADER_SIZE..].copy_from_slice(chunk);
        datagram
    };

    // Delivery order 1, 0, 2.
    rig.push_rpc(make_fragment(1, false));
    rig.push_rpc(make_fragment(0, false));
    rig.push_rpc(make_fragment(2, true));
    rig.tick_ms();

    let sent = rig.take_udp();
    let response = sent.last().expect("connect response sent");
    let status = read_ndr_status(&response.3[RPC_HEADER_SIZE..], false).unwrap();
    assert!(status.is_ok(), "fragmented connect rejected: {:?}", status);

    assert!(rig.recorder.states().contains(&ArEvent::Startup));
}

#[test]
fn duplicate_connect_seq_resends_stored_response() {
    let rig = Rig::new(true);

    rig.push_rpc(request_datagram(opnum::CONNECT, 0, &connect_body(true)));
    rig.tick_ms();
    let first = rig.take_udp();
    assert!(!first.is_empty());

    // The identical request again: the stored response is replayed and no
    // second AR appears.
    rig.push_rpc(request_datagram(opnum::CONNECT, 0, &connect_body(true)));
    rig.tick_ms();
    let second = rig.take_udp();
    assert!(!second.is_empty());
    rig.device.with(|stack| assert_eq!(stack.active_ar_count(), 1));
}

#[test]
fn release_tears_down_the_ar() {
    let rig = Rig::new(true);
    let arep = rig.establish();

    rig.push_rpc(request_datagram(
        opnum::RELEASE,
        7,
        &control_body(bt::RELEASE_BLOCK_REQ, command::RELEASE),
    ));
    rig.feed_output(1);
    rig.tick_ms();

    let status = rig.recorder.abort_status().expect("release aborts");
    assert_eq!(status.error_code_2, codes::ABORT_RELEASE_IND_RECEIVED);
    assert_eq!(
        rig.device.input_get_iocs(arep, INPUT_KEY),
        Err(StackError::NotFound)
    );
}

#[test]
fn im_records_read_and_write() {
    let rig = Rig::new(true);
    let _arep = rig.establish();
    rig.take_udp();

    // Read I&M0 through the record service.
    let mut scratch = vec![0u8; 256];
    let mut writer = BlockWriter::new(&mut scratch);
    ferrobus::rpc::records::encode_read_request(
        &mut writer,
        &ferrobus::rpc::records::RecordHeader {
            seq_number: 1,
            ar_uuid: AR_UUID,
            key: SubslotKey::new(0, 0, 1),
            index: ferrobus::rpc::records::index::IM_0,
            record_data_length: 0,
        },
    )
    .unwrap();
    let blocks_len = writer.position();

    let mut body = Vec::new();
    write_ndr_request(&mut body, 4096, blocks_len as u32);
    body.extend_from_slice(&scratch[..blocks_len]);
    rig.push_rpc(request_datagram(opnum::READ, 2, &body));
    rig.feed_output(1);
    rig.tick_ms();

    let sent = rig.take_udp();
    let response = &sent.last().expect("read response").3;
    let status = read_ndr_status(&response[RPC_HEADER_SIZE..], false).unwrap();
    assert!(status.is_ok());

    // The response carries the read header then the I&M0 block; the
    // vendor id sits right after that block's header.
    let payload = &response[RPC_HEADER_SIZE + 20..];
    let mut reader = BlockReader::new(payload);
    let read_res = reader.header().unwrap();
    assert_eq!(read_res.block_type, bt::IOD_READ_RES);
    reader.skip(read_res.body_length()).unwrap();
    let im0 = reader.header().unwrap();
    assert_eq!(im0.block_type, bt::IM_0);
    assert_eq!(reader.u16().unwrap(), 0x0493);
}
