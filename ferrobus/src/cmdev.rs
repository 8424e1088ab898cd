//! Per-AR connection state: the CMDEV lifecycle machine and the AR record
//! owning its cyclic machines and alarm lanes. The orchestration driving
//! these lives with the stack; this module keeps the data shape and the
//! pieces that are independently testable.

use crate::alarm::{AlarmCrParam, AlarmLane};
use crate::cyclic::{Cpm, IoObjDesc, IocrParam, IocrType, Ppm};
use crate::error::{codes, PnioStatus};
use crate::ident::{ExpectedIdent, IdentTree};
use crate::rpc::connect::{ArBlockReq, IocrBlockReq};
use crate::sched::TimerHandle;
use crate::types::{Arep, SubslotKey};
use std::net::Ipv4Addr;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CmdevState {
    PowerOn,
    WCind,
    WCres,
    WSucnf,
    WPeind,
    WPeres,
    WArdy,
    WArdyCnf,
    WData,
    Data,
    Abort,
}

/// One cyclic communication relation of an AR.
pub struct Iocr {
    pub param: IocrParam,
    pub ppm: Option<Ppm>,
    pub cpm: Option<Cpm>,
}

impl Iocr {
    #[inline]
    pub fn is_provider(&self) -> bool {
        self.param.iocr_type.is_provider()
    }
}

pub struct Ar {
    pub arep: Arep,
    pub state: CmdevState,
    pub param: ArBlockReq,
    /// Source address of the connect RPC; CControl goes back here.
    pub peer_ip: Ipv4Addr,
    pub iocrs: Vec<Iocr>,
    pub alarm_param: AlarmCrParam,
    /// Low lane at [`crate::alarm::LANE_LOW`], high at
    /// [`crate::alarm::LANE_HIGH`].
    pub lanes: Vec<AlarmLane>,
    pub expected: ExpectedIdent,
    pub cmsm_timer: Option<TimerHandle>,
    pub err: PnioStatus,
    /// Progress markers deciding the WDATA → DATA edge.
    pub ppm_has_sent: bool,
    pub cpm_has_received: bool,
}

impl Ar {
    /// CMSM supervision budget: CMI activity timeout × 100 ms.
    #[inline]
    pub fn cmsm_timeout_us(&self) -> u64 {
        u64::from(self.param.cmi_activity_timeout_factor) * 100_000
    }

    pub fn find_cr_by_frame_id(&self, frame_id: u16) -> Option<usize> {
        self.iocrs
            .iter()
            .position(|iocr| iocr.param.frame_id == frame_id)
    }

    /// The provider CR carrying a submodule's input data.
    pub fn provider_desc(&self, key: SubslotKey) -> Option<(usize, IoObjDesc)> {
        self.iocrs.iter().enumerate().find_map(|(index, iocr)| {
            if !iocr.is_provider() {
                return None;
            }
            iocr.param.find_data(key).map(|desc| (index, desc))
        })
    }

    /// The consumer CR carrying a submodule's output data.
    pub fn consumer_desc(&self, key: SubslotKey) -> Option<(usize, IoObjDesc)> {
        self.iocrs.iter().enumerate().find_map(|(index, iocr)| {
            if iocr.is_provider() {
                return None;
            }
            iocr.param.find_data(key).map(|desc| (index, desc))
        })
    }

    /// The consumer CR entry where the controller reports IOCS for one of
    /// our provider submodules.
    pub fn consumer_iocs_desc(&self, key: SubslotKey) -> Option<(usize, IoObjDesc)> {
        self.iocrs.iter().enumerate().find_map(|(index, iocr)| {
            if iocr.is_provider() {
                return None;
            }
            iocr.param.find_iocs(key).map(|desc| (index, desc))
        })
    }

    /// The provider CR entry where we report IOCS for a controller
    /// submodule.
    pub fn provider_iocs_desc(&self, key: SubslotKey) -> Option<(usize, IoObjDesc)> {
        self.iocrs.iter().enumerate().find_map(|(index, iocr)| {
            if !iocr.is_provider() {
                return None;
            }
            iocr.param.find_iocs(key).map(|desc| (index, desc))
        })
    }

    /// True once both directions have seen traffic; WDATA completes on
    /// this.
    #[inline]
    pub fn cyclic_established(&self) -> bool {
        let needs_cpm = self.iocrs.iter().any(|iocr| iocr.cpm.is_some());
        let needs_ppm = self.iocrs.iter().any(|iocr| iocr.ppm.is_some());

        (!needs_ppm || self.ppm_has_sent) && (!needs_cpm || self.cpm_has_received)
    }
}

/// Resolve a decoded IOCR block against the identification tree into the
/// runtime parameters: the data lengths come from the plugged submodules.
/// Unplugged submodules resolve to zero-length entries; the identification
/// diff flags them and the connect still proceeds.
pub fn resolve_iocr(request: &IocrBlockReq, tree: &IdentTree) -> Result<IocrParam, PnioStatus> {
    let iocr_type = IocrType::from_u16(request.iocr_type).ok_or_else(|| {
        PnioStatus::pnio(
            codes::CODE_CONNECT,
            codes::C1_CONN_FAULTY_IOCR_BLOCK,
            codes::C2_INVALID_BLOCK_LEN,
        )
    })?;

    let mut data_objects = Vec::new();
    let mut iocs_objects = Vec::new();

    for api in &request.apis {
        for (slot, subslot, offset) in &api.io_data {
            let key = SubslotKey::new(api.api, *slot, *subslot);
            let len = tree
                .subslot(api.api, *slot, *subslot)
                .map(|sub| {
                    if iocr_type.is_provider() {
                        sub.input_len
                    } else {
                        sub.output_len
                    }
                })
                .unwrap_or(0);

            data_objects.push(IoObjDesc {
                key,
                offset: *offset,
                len,
            });
        }

        for (slot, subslot, offset) in &api.iocs {
            iocs_objects.push(IoObjDesc {
                key: SubslotKey::new(api.api, *slot, *subslot),
                offset: *offset,
                len: 0,
            });
        }
    }

    Ok(IocrParam {
        iocr_type,
        iocr_ref: request.iocr_ref,
        frame_id: request.frame_id,
        data_length: request.data_length,
        send_clock_factor: request.send_clock_factor,
        reduction_ratio: request.reduction_ratio,
        data_hold_factor: request.data_hold_factor,
        data_objects,
        iocs_objects,
    })
}
