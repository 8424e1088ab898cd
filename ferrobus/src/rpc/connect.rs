//! Connect service codec: the AR, IOCR, alarm-CR and expected-submodule
//! request blocks, and the response blocks including the module diff.

use crate::alarm::AlarmCrParam;
use crate::block::{bt, BlockReader, BlockWriter};
use crate::error::{codes, DecodeError, PnioStatus};
use crate::ident::{ApiDiff, ExpApi, ExpDataDesc, ExpModule, ExpSubmodule, ExpectedIdent};
use crate::types::{MacAddr, Uuid};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ArBlockReq {
    pub ar_type: u16,
    pub ar_uuid: Uuid,
    pub session_key: u16,
    pub initiator_mac: MacAddr,
    pub initiator_object_uuid: Uuid,
    pub properties: u32,
    /// CMI activity timeout in 100 ms units.
    pub cmi_activity_timeout_factor: u16,
    pub initiator_udp_port: u16,
    pub station_name: String,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IocrApiEntry {
    pub api: u32,
    /// (slot, subslot, frame offset) of each data object.
    pub io_data: Vec<(u16, u16, u16)>,
    /// (slot, subslot, frame offset) of each consumer status entry.
    pub iocs: Vec<(u16, u16, u16)>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IocrBlockReq {
    pub iocr_type: u16,
    pub iocr_ref: u16,
    pub properties: u32,
    pub data_length: u16,
    pub frame_id: u16,
    pub send_clock_factor: u16,
    pub reduction_ratio: u16,
    pub watchdog_factor: u16,
    pub data_hold_factor: u16,
    pub apis: Vec<IocrApiEntry>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AlarmCrBlockReq {
    pub alarm_cr_type: u16,
    pub properties: u32,
    pub rta_timeout_factor: u16,
    pub rta_retries: u16,
    /// The controller's alarm reference.
    pub remote_alarm_ref: u16,
    pub max_alarm_data_length: u16,
}

#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub ar: ArBlockReq,
    pub iocrs: Vec<IocrBlockReq>,
    pub alarm_cr: Option<AlarmCrBlockReq>,
    pub expected: ExpectedIdent,
}

/* ----- request decoding ----- */

fn faulty(code1: u8) -> PnioStatus {
    PnioStatus::pnio(codes::CODE_CONNECT, code1, codes::C2_INVALID_BLOCK_LEN)
}

pub fn decode_connect_request(body: &[u8]) -> Result<ConnectRequest, PnioStatus> {
    let mut reader = BlockReader::new(body);
    let mut ar = None;
    let mut iocrs = Vec::new();
    let mut alarm_cr = None;
    let mut expected = ExpectedIdent::default();

    while reader.remaining() >= crate::block::BLOCK_HEADER_SIZE {
        let header = reader.header().map_err(|_| {
            PnioStatus::pnio(
                codes::CODE_CONNECT,
                codes::C1_CMRPC,
                codes::C2_CMRPC_ARGSLENGTH_INVALID,
            )
        })?;
        let body_end = reader.position() + header.body_length();

        match header.block_type {
            bt::AR_BLOCK_REQ => {
                ar = Some(
                    decode_ar_block(&mut reader)
                        .map_err(|_| faulty(codes::C1_CONN_FAULTY_AR_BLOCK))?,
                );
            }
            bt::IOCR_BLOCK_REQ => {
                iocrs.push(
                    decode_iocr_block(&mut reader)
                        .map_err(|_| faulty(codes::C1_CONN_FAULTY_IOCR_BLOCK))?,
                );
            }
            bt::ALARM_CR_BLOCK_REQ => {
                alarm_cr = Some(
                    decode_alarm_cr_block(&mut reader)
                        .map_err(|_| faulty(codes::C1_CONN_FAULTY_ALARM_BLOCK))?,
                );
            }
            bt::EXPECTED_SUBMODULE_BLOCK => {
                decode_expected_block(&mut reader, &mut expected)
                    .map_err(|_| faulty(codes::C1_CONN_FAULTY_EXP_BLOCK))?;
            }
            _ => {
                return Err(PnioStatus::pnio(
                    codes::CODE_CONNECT,
                    codes::C1_CMRPC,
                    codes::C2_CMRPC_UNKNOWN_BLOCKS,
                ));
            }
        }

        // Step over any trailing bytes of the block.
        reader.set_position(body_end);
    }

    let ar = ar.ok_or_else(|| {
        PnioStatus::pnio(
            codes::CODE_CONNECT,
            codes::C1_CMRPC,
            codes::C2_CMRPC_WRONG_BLOCK_COUNT,
        )
    })?;

    if iocrs.is_empty() {
        return Err(PnioStatus::pnio(
            codes::CODE_CONNECT,
            codes::C1_CMRPC,
            codes::C2_CMRPC_IOCR_MISSING,
        ));
    }

    Ok(ConnectRequest {
        ar,
        iocrs,
        alarm_cr,
        expected,
    })
}

fn decode_ar_block(reader: &mut BlockReader) -> Result<ArBlockReq, DecodeError> {
    let ar_type = reader.u16()?;
    let ar_uuid = reader.uuid()?;
    let session_key = reader.u16()?;
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&reader.bytes(6)?);
    let initiator_object_uuid = reader.uuid()?;
    let properties = reader.u32()?;
    let cmi_activity_timeout_factor = reader.u16()?;
    let initiator_udp_port = reader.u16()?;
    let station_name = reader.short_string()?;

    Ok(ArBlockReq {
        ar_type,
        ar_uuid,
        session_key,
        initiator_mac: MacAddr(mac),
        initiator_object_uuid,
        properties,
        cmi_activity_timeout_factor,
        initiator_udp_port,
        station_name,
    })
}

fn decode_iocr_block(reader: &mut BlockReader) -> Result<IocrBlockReq, DecodeError> {
    let iocr_type = reader.u16()?;
    let iocr_ref = reader.u16()?;
    let _lt = reader.u16()?;
    let properties = reader.u32()?;
    let data_length = reader.u16()?;
    let frame_id = reader.u16()?;
    let send_clock_factor = reader.u16()?;
    let reduction_ratio = reader.u16()?;
    let _phase = reader.u16()?;
    let _sequence = reader.u16()?;
    let _frame_send_offset = reader.u32()?;
    let watchdog_factor = reader.u16()?;
    let data_hold_factor = reader.u16()?;
    let _tag_header = reader.u16()?;
    reader.skip(6)?; // multicast MAC

    let num_apis = reader.u16()?;
    let mut apis = Vec::new();

    for _ in 0..num_apis {
        let api = reader.u32()?;

        let num_io_data = reader.u16()?;
        let mut io_data = Vec::new();
        for _ in 0..num_io_data {
            io_data.push((reader.u16()?, reader.u16()?, reader.u16()?));
        }

        let num_iocs = reader.u16()?;
        let mut iocs = Vec::new();
        for _ in 0..num_iocs {
            iocs.push((reader.u16()?, reader.u16()?, reader.u16()?));
        }

        apis.push(IocrApiEntry { api, io_data, iocs });
    }

    Ok(IocrBlockReq {
        iocr_type,
        iocr_ref,
        properties,
        data_length,
        frame_id,
        send_clock_factor,
        reduction_ratio,
        watchdog_factor,
        data_hold_factor,
        apis,
    })
}

fn decode_alarm_cr_block(reader: &mut BlockReader) -> Result<AlarmCrBlockReq, DecodeError> {
    let alarm_cr_type = reader.u16()?;
    let _lt = reader.u16()?;
    let properties = reader.u32()?;
    let rta_timeout_factor = reader.u16()?;
    let rta_retries = reader.u16()?;
    let remote_alarm_ref = reader.u16()?;
    let max_alarm_data_length = reader.u16()?;
    let _tag_high = reader.u16()?;
    let _tag_low = reader.u16()?;

    Ok(AlarmCrBlockReq {
        alarm_cr_type,
        properties,
        rta_timeout_factor,
        rta_retries,
        remote_alarm_ref,
        max_alarm_data_length,
    })
}

fn decode_expected_block(
    reader: &mut BlockReader,
    expected: &mut ExpectedIdent,
) -> Result<(), DecodeError> {
    let num_apis = reader.u16()?;

    for _ in 0..num_apis {
        let api = reader.u32()?;
        let slot_nr = reader.u16()?;
        let module_ident = reader.u32()?;
        let module_properties = reader.u16()?;
        let num_submodules = reader.u16()?;

        let mut submodules = Vec::new();
        for _ in 0..num_submodules {
            let subslot_nr = reader.u16()?;
            let ident = reader.u32()?;
            let properties = reader.u16()?;

            // Submodule type bits 0..1: 0 none, 1 input, 2 output, 3 both.
            let descriptions = if properties & 0x3 == 3 { 2 } else { 1 };
            let mut data = Vec::new();
            for _ in 0..descriptions {
                let direction = reader.u16()?;
                let length = reader.u16()?;
                let _iops_len = reader.u8()?;
                let _iocs_len = reader.u8()?;
                data.push(ExpDataDesc { direction, length });
            }

            submodules.push(ExpSubmodule {
                subslot_nr,
                ident,
                properties,
                data,
            });
        }

        let module = ExpModule {
            slot_nr,
            module_ident,
            properties: module_properties,
            submodules,
        };

        match expected.apis.iter_mut().find(|a| a.api == api) {
            Some(entry) => entry.modules.push(module),
            None => expected.apis.push(ExpApi {
                api,
                modules: vec![module],
            }),
        }
    }

    Ok(())
}

/* ----- request encoding (controller side of the codec, used by tests and
tooling; kept symmetric so every block round-trips) ----- */

pub fn encode_ar_block(writer: &mut BlockWriter, ar: &ArBlockReq) -> std::io::Result<()> {
    let mark = writer.begin_block(bt::AR_BLOCK_REQ)?;
    writer.u16(ar.ar_type)?;
    writer.uuid(&ar.ar_uuid)?;
    writer.u16(ar.session_key)?;
    writer.bytes(&ar.initiator_mac.0)?;
    writer.uuid(&ar.initiator_object_uuid)?;
    writer.u32(ar.properties)?;
    writer.u16(ar.cmi_activity_timeout_factor)?;
    writer.u16(ar.initiator_udp_port)?;
    writer.short_string(&ar.station_name)?;
    writer.end_block(mark)
}

pub fn encode_iocr_block(writer: &mut BlockWriter, iocr: &IocrBlockReq) -> std::io::Result<()> {
    let mark = writer.begin_block(bt::IOCR_BLOCK_REQ)?;
    writer.u16(iocr.iocr_type)?;
    writer.u16(iocr.iocr_ref)?;
    writer.u16(crate::types::ETHERTYPE_PROFINET)?;
    writer.u32(iocr.properties)?;
    writer.u16(iocr.data_length)?;
    writer.u16(iocr.frame_id)?;
    writer.u16(iocr.send_clock_factor)?;
    writer.u16(iocr.reduction_ratio)?;
    writer.u16(0)?; // phase
    writer.u16(0)?; // sequence
    writer.u32(0)?; // frame send offset
    writer.u16(iocr.watchdog_factor)?;
    writer.u16(iocr.data_hold_factor)?;
    writer.u16(0xC000)?; // tag header: priority 6
    writer.bytes(&[0u8; 6])?; // multicast MAC, unused for unicast CRs

    writer.u16(iocr.apis.len() as u16)?;
    for api in &iocr.apis {
        writer.u32(api.api)?;
        writer.u16(api.io_data.len() as u16)?;
        for (slot, subslot, offset) in &api.io_data {
            writer.u16(*slot)?;
            writer.u16(*subslot)?;
            writer.u16(*offset)?;
        }
        writer.u16(api.iocs.len() as u16)?;
        for (slot, subslot, offset) in &api.iocs {
            writer.u16(*slot)?;
            writer.u16(*subslot)?;
            writer.u16(*offset)?;
        }
    }
    writer.end_block(mark)
}

pub fn encode_alarm_cr_block(
    writer: &mut BlockWriter,
    alarm: &AlarmCrBlockReq,
) -> std::io::Result<()> {
    let mark = writer.begin_block(bt::ALARM_CR_BLOCK_REQ)?;
    writer.u16(alarm.alarm_cr_type)?;
    writer.u16(crate::types::ETHERTYPE_PROFINET)?;
    writer.u32(alarm.properties)?;
    writer.u16(alarm.rta_timeout_factor)?;
    writer.u16(alarm.rta_retries)?;
    writer.u16(alarm.remote_alarm_ref)?;
    writer.u16(alarm.max_alarm_data_length)?;
    writer.u16(0xC000)?;
    writer.u16(0xA000)?;
    writer.end_block(mark)
}

pub fn encode_expected_block(
    writer: &mut BlockWriter,
    expected: &ExpectedIdent,
) -> std::io::Result<()> {
    let mark = writer.begin_block(bt::EXPECTED_SUBMODULE_BLOCK)?;

    let count: usize = expected.apis.iter().map(|a| a.modules.len()).sum();
    writer.u16(count as u16)?;

    for api in &expected.apis {
        for module in &api.modules {
            writer.u32(api.api)?;
            writer.u16(module.slot_nr)?;
            writer.u32(module.module_ident)?;
            writer.u16(module.properties)?;
            writer.u16(module.submodules.len() as u16)?;

            for sub in &module.submodules {
                writer.u16(sub.subslot_nr)?;
                writer.u32(sub.ident)?;
                writer.u16(sub.properties)?;
                for desc in &sub.data {
                    writer.u16(desc.direction)?;
                    writer.u16(desc.length)?;
                    writer.u8(1)?; // iops length
                    writer.u8(1)?; // iocs length
                }
            }
        }
    }

    writer.end_block(mark)
}

/* ----- response encoding ----- */

pub struct ConnectResponse<'a> {
    pub ar: &'a ArBlockReq,
    pub responder_mac: MacAddr,
    pub responder_udp_port: u16,
    pub iocrs: &'a [(u16, u16, u16)],
    pub alarm: Option<&'a AlarmCrParam>,
    pub diff: &'a [ApiDiff],
    pub responder_station_name: &'a str,
}

pub fn encode_connect_response(
    writer: &mut BlockWriter,
    response: &ConnectResponse,
) -> std::io::Result<()> {
    // ARBlockRes
    let mark = writer.begin_block(bt::AR_BLOCK_RES)?;
    writer.u16(response.ar.ar_type)?;
    writer.uuid(&response.ar.ar_uuid)?;
    writer.u16(response.ar.session_key)?;
    writer.bytes(&response.responder_mac.0)?;
    writer.u16(response.responder_udp_port)?;
    writer.end_block(mark)?;

    // One IOCRBlockRes per CR: (type, ref, frame id).
    for (iocr_type, iocr_ref, frame_id) in response.iocrs {
        let mark = writer.begin_block(bt::IOCR_BLOCK_RES)?;
        writer.u16(*iocr_type)?;
        writer.u16(*iocr_ref)?;
        writer.u16(*frame_id)?;
        writer.end_block(mark)?;
    }

    // AlarmCRBlockRes with our local reference.
    if let Some(alarm) = response.alarm {
        let mark = writer.begin_block(bt::ALARM_CR_BLOCK_RES)?;
        writer.u16(0x0001)?;
        writer.u16(alarm.local_ref)?;
        writer.u16(alarm.max_alarm_len)?;
        writer.end_block(mark)?;
    }

    encode_module_diff(writer, response.diff)?;

    // ARServerBlock: the responder's station name.
    let mark = writer.begin_block(bt::AR_SERVER_BLOCK)?;
    let base = writer.position();
    writer.short_string(response.responder_station_name)?;
    writer.align(base, 4)?;
    writer.end_block(mark)
}

pub fn encode_module_diff(writer: &mut BlockWriter, diff: &[ApiDiff]) -> std::io::Result<()> {
    let mark = writer.begin_block(bt::MODULE_DIFF_BLOCK)?;
    writer.u16(diff.len() as u16)?;

    for api in diff {
        writer.u32(api.api)?;
        writer.u16(api.modules.len() as u16)?;

        for module in &api.modules {
            writer.u16(module.slot_nr)?;
            writer.u32(module.module_ident)?;
            writer.u16(module.module_state as u16)?;
            writer.u16(module.submodules.len() as u16)?;

            for sub in &module.submodules {
                writer.u16(sub.subslot_nr)?;
                writer.u32(sub.ident)?;
                // Format indicator set; ar_info and ident_info packed in.
                let state =
                    0x8000u16 | ((sub.ar_info as u16) << 7) | ((sub.ident_info as u16) << 3);
                writer.u16(state)?;
            }
        }
    }

    writer.end_block(mark)
}
