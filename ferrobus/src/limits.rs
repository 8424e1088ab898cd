//! Compile-time capacities. Every arena in the stack is allocated once at
//! init and never grows.

/// Application processes per device.
pub const MAX_API: usize = 4;

/// Concurrently established application relations.
pub const MAX_AR: usize = 4;

/// Cyclic communication relations per AR (one input, one output).
pub const MAX_CR: usize = 2;

/// Slots per API, including the device access point at slot 0.
pub const MAX_SLOTS: usize = 8;

/// Subslots per slot.
pub const MAX_SUBSLOTS: usize = 8;

/// Physical Ethernet ports.
pub const MAX_PORTS: usize = 2;

/// RPC sessions: two per AR plus one spare for implicit reads.
pub const MAX_SESSIONS: usize = 2 * MAX_AR + 1;

/// Diagnosis items shared by all subslots.
pub const MAX_DIAG_ITEMS: usize = 64;

/// Frame id table: each input CR may carry two frame ids, plus the fixed
/// entries for DCP (4) and the two alarm priorities.
pub const FRAME_ID_MAP_SIZE: usize = 2 * MAX_API * MAX_AR * MAX_CR + 6;

/// Timer slots: cyclic machines, per-port work and a reserve for DCP,
/// alarms and session retransmission.
pub const MAX_TIMERS: usize = 2 * MAX_AR * MAX_CR + 2 * MAX_PORTS + 9;

/// Outgoing alarm queue depth per priority lane.
pub const ALARM_QUEUE_LEN: usize = 3;

/// Largest negotiable alarm payload.
pub const MAX_ALARM_DATA_LEN: usize = 1432;

/// Smallest alarm payload length a controller may negotiate.
pub const MIN_ALARM_DATA_LEN: usize = 200;

/// Manufacturer diagnosis payload limit.
pub const MAX_MANUF_DIAG_LEN: usize = 220;

/// Single RPC PDU payload limit; larger bodies are fragmented.
pub const MAX_UDP_PAYLOAD: usize = 1440;

/// Raw Ethernet frame buffer size.
pub const MAX_FRAME_SIZE: usize = 1500;

/// Cyclic payloads are padded to this length.
pub const MIN_CYCLIC_PAYLOAD: usize = 40;

/// Logbook ring depth.
pub const LOGBOOK_ENTRIES: usize = 16;

/// CControl / out-fragment retransmission interval, microseconds.
pub const CCONTROL_TIMEOUT_US: u64 = 2_000_000;

/// Inbound fragment reassembly deadline, microseconds.
pub const FRAG_TIMEOUT_US: u64 = 2_000_000;

/// Retransmissions before a session gives up and the AR aborts.
pub const RPC_MAX_RETRIES: u8 = 3;

/// HELLO burst: count and spacing.
pub const HELLO_RETRY: u8 = 3;
pub const HELLO_INTERVAL_US: u64 = 3_000_000;

/// Base cyclic time unit: 31.25 us expressed in nanoseconds.
pub const CYCLE_UNIT_NS: u64 = 31_250;
