//! Alarm subsystem: two priority lanes per AR, each pairing the framing
//! machines (ALPMI initiator / ALPMR receiver) with the acyclic transport
//! machines (APMS send / APMR receive).

pub mod lane;
pub mod rta;

pub use lane::{
    AlarmCrParam, AlarmLane, AlpmiState, AlpmrState, ApmrState, ApmsState, LaneEvent, LaneOutput,
    TimeoutOutcome,
};
pub use rta::{
    alarm_type, usi, AlarmAck, AlarmNotification, PduType, RtaHeader, ADD_FLAGS_TACK,
    ADD_FLAGS_WINDOW_1,
};

/// Lane indices within an AR.
pub const LANE_LOW: usize = 0;
pub const LANE_HIGH: usize = 1;
