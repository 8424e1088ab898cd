use std::fmt;
use std::io;

pub type StackResult<T> = Result<T, StackError>;

/// Failures surfaced by the public API and by internal layers. Nothing
/// panics across the facade boundary.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum StackError {
    InvalidArgument,
    OutOfResources,
    WrongState,
    Busy,
    NotFound,
    AlreadyExists,
    TooLarge,
    Unsupported,
    Decode(DecodeError),
    Io(io::ErrorKind),
}

impl From<io::Error> for StackError {
    #[inline]
    fn from(err: io::Error) -> Self {
        StackError::Io(err.kind())
    }
}

impl From<DecodeError> for StackError {
    #[inline]
    fn from(err: DecodeError) -> Self {
        StackError::Decode(err)
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Wire decoding outcome. Undersized input is the common failure; the
/// resource variants report that a decoded structure wants more APIs or
/// submodules than the arenas can hold.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum DecodeError {
    EndOfInput,
    OutOfApiResources,
    OutOfSubmoduleResources,
    BadVersion,
    Malformed,
}

impl From<io::Error> for DecodeError {
    #[inline]
    fn from(_: io::Error) -> Self {
        DecodeError::EndOfInput
    }
}

/// The 4-byte error tuple embedded in failure responses and abort
/// indications.
#[derive(Copy, Clone, Eq, PartialEq, Default)]
pub struct PnioStatus {
    pub error_code: u8,
    pub error_decode: u8,
    pub error_code_1: u8,
    pub error_code_2: u8,
}

impl PnioStatus {
    pub const OK: PnioStatus = PnioStatus {
        error_code: 0,
        error_decode: 0,
        error_code_1: 0,
        error_code_2: 0,
    };

    #[inline]
    pub fn new(error_code: u8, error_decode: u8, error_code_1: u8, error_code_2: u8) -> PnioStatus {
        PnioStatus {
            error_code,
            error_decode,
            error_code_1,
            error_code_2,
        }
    }

    /// A protocol error attributed to a stack component.
    #[inline]
    pub fn pnio(error_code: u8, error_code_1: u8, error_code_2: u8) -> PnioStatus {
        PnioStatus::new(error_code, codes::DECODE_PNIO, error_code_1, error_code_2)
    }

    /// An RTA-class abort reason, as carried in abort indications.
    #[inline]
    pub fn abort(reason: u8) -> PnioStatus {
        PnioStatus::pnio(codes::CODE_RTA_ERROR, codes::C1_RTA_PROTOCOL, reason)
    }

    /// A read/write service error with the PNIORW decode.
    #[inline]
    pub fn pniorw(error_code: u8, error_code_1: u8, error_code_2: u8) -> PnioStatus {
        PnioStatus::new(error_code, codes::DECODE_PNIORW, error_code_1, error_code_2)
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        *self == PnioStatus::OK
    }

    #[inline]
    pub fn to_u32(&self) -> u32 {
        (u32::from(self.error_code) << 24)
            | (u32::from(self.error_decode) << 16)
            | (u32::from(self.error_code_1) << 8)
            | u32::from(self.error_code_2)
    }

    #[inline]
    pub fn from_u32(value: u32) -> PnioStatus {
        PnioStatus {
            error_code: (value >> 24) as u8,
            error_decode: (value >> 16) as u8,
            error_code_1: (value >> 8) as u8,
            error_code_2: value as u8,
        }
    }
}

impl fmt::Debug for PnioStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "PnioStatus({:#04x}, {:#04x}, {:#04x}, {:#04x})",
            self.error_code, self.error_decode, self.error_code_1, self.error_code_2
        )
    }
}

/// Protocol code tables.
pub mod codes {
    /// error_code values.
    pub const CODE_PNIO: u8 = 0x81;
    pub const CODE_RTA_ERROR: u8 = 0xCF;
    pub const CODE_ALARM_ACK: u8 = 0xDA;
    pub const CODE_CONNECT: u8 = 0xDB;
    pub const CODE_RELEASE: u8 = 0xDC;
    pub const CODE_CONTROL: u8 = 0xDD;
    pub const CODE_READ: u8 = 0xDE;
    pub const CODE_WRITE: u8 = 0xDF;

    /// error_decode values.
    pub const DECODE_PNIORW: u8 = 0x80;
    pub const DECODE_PNIO: u8 = 0x81;
    pub const DECODE_MANUFACTURER: u8 = 0x82;

    /// error_code_1 component identifiers for the PNIO decode.
    pub const C1_ALARM_ACK: u8 = 0x3C;
    pub const C1_CMDEV: u8 = 0x3D;
    pub const C1_CMRPC: u8 = 0x40;
    pub const C1_ALPMI: u8 = 0x41;
    pub const C1_ALPMR: u8 = 0x42;
    pub const C1_APMR: u8 = 0x46;
    pub const C1_APMS: u8 = 0x47;
    pub const C1_CPM: u8 = 0x48;
    pub const C1_PPM: u8 = 0x49;
    pub const C1_FSPM: u8 = 0x4E;
    pub const C1_CMSM: u8 = 0xC8;
    pub const C1_CMRDR: u8 = 0xCA;
    pub const C1_CMWRR: u8 = 0xCC;
    pub const C1_CMIO: u8 = 0xCD;
    pub const C1_CMSU: u8 = 0xCE;
    pub const C1_CMINA: u8 = 0xD0;
    pub const C1_CMPBE: u8 = 0xD1;
    pub const C1_RTA_PROTOCOL: u8 = 0xFD;

    /// error_code_1 for the PNIORW decode: class plus sub-code.
    pub const C1_APP_READ_ERROR: u8 = 0xA0;
    pub const C1_APP_WRITE_ERROR: u8 = 0xA1;
    pub const C1_APP_BUSY: u8 = 0xA7;
    pub const C1_APP_VERSION_CONFLICT: u8 = 0xA8;
    pub const C1_ACC_INVALID_INDEX: u8 = 0xB0;
    pub const C1_ACC_WRITE_LENGTH_ERROR: u8 = 0xB1;
    pub const C1_ACC_INVALID_SLOT_SUBSLOT: u8 = 0xB2;
    pub const C1_ACC_STATE_CONFLICT: u8 = 0xB5;
    pub const C1_ACC_ACCESS_DENIED: u8 = 0xB6;
    pub const C1_ACC_INVALID_RANGE: u8 = 0xB7;
    pub const C1_ACC_INVALID_PARAMETER: u8 = 0xB8;
    pub const C1_RES_RESOURCE_BUSY: u8 = 0xC2;
    pub const C1_RES_RESOURCE_UNAVAILABLE: u8 = 0xC3;

    /// Faulty connect block reporting.
    pub const C1_CONN_FAULTY_AR_BLOCK: u8 = 0x01;
    pub const C1_CONN_FAULTY_IOCR_BLOCK: u8 = 0x02;
    pub const C1_CONN_FAULTY_EXP_BLOCK: u8 = 0x03;
    pub const C1_CONN_FAULTY_ALARM_BLOCK: u8 = 0x04;
    pub const C1_RELEASE_FAULTY_BLOCK: u8 = 0x28;

    /// error_code_2 values for the CMRPC component.
    pub const C2_CMRPC_ARGSLENGTH_INVALID: u8 = 0x00;
    pub const C2_CMRPC_UNKNOWN_BLOCKS: u8 = 0x01;
    pub const C2_CMRPC_IOCR_MISSING: u8 = 0x02;
    pub const C2_CMRPC_WRONG_BLOCK_COUNT: u8 = 0x03;
    pub const C2_CMRPC_NO_AR_RESOURCES: u8 = 0x04;
    pub const C2_CMRPC_AR_UUID_UNKNOWN: u8 = 0x05;
    pub const C2_CMRPC_STATE_CONFLICT: u8 = 0x06;
    pub const C2_CMRPC_OUT_OF_MEMORY: u8 = 0x08;

    /// error_code_2 values for CMDEV.
    pub const C2_CMDEV_STATE_CONFLICT: u8 = 0x00;
    pub const C2_CMDEV_RESOURCE: u8 = 0x01;

    /// error_code_2 values for CMSM.
    pub const C2_CMSM_INVALID_STATE: u8 = 0x00;
    pub const C2_CMSM_SIGNALED_ERROR: u8 = 0x01;

    /// error_code_2 values for the APMS/APMR machines.
    pub const C2_APMS_INVALID_STATE: u8 = 0x00;
    pub const C2_APMS_LMPM_ERROR: u8 = 0x01;
    pub const C2_APMS_TIMEOUT: u8 = 0x02;
    pub const C2_APMR_INVALID_STATE: u8 = 0x00;
    pub const C2_APMR_LMPM_ERROR: u8 = 0x01;

    /// error_code_2 values for the ALPMI/ALPMR machines.
    pub const C2_ALPMI_INVALID_STATE: u8 = 0x00;
    pub const C2_ALPMI_WRONG_ACK_PDU: u8 = 0x01;
    pub const C2_ALPMR_WRONG_ALARM_PDU: u8 = 0x01;

    /// Block parsing sub-codes.
    pub const C2_INVALID_BLOCK_LEN: u8 = 0x01;
    pub const C2_INVALID_BLOCK_VERSION_HIGH: u8 = 0x02;
    pub const C2_INVALID_BLOCK_VERSION_LOW: u8 = 0x03;

    /// RTA-class abort reasons, reported with `C1_RTA_PROTOCOL`.
    pub const ABORT_CODE_SEQ: u8 = 0x01;
    pub const ABORT_INSTANCE_CLOSED: u8 = 0x02;
    pub const ABORT_OUT_OF_MEMORY: u8 = 0x03;
    pub const ABORT_ADD_CPM_PPM_FAILED: u8 = 0x04;
    pub const ABORT_CONSUMER_DHT_EXPIRED: u8 = 0x05;
    pub const ABORT_CMI_TIMEOUT: u8 = 0x06;
    pub const ABORT_ALARM_OPEN_FAILED: u8 = 0x07;
    pub const ABORT_ALARM_SEND_CNF_NEG: u8 = 0x08;
    pub const ABORT_ALARM_ACK_SEND_CNF_NEG: u8 = 0x09;
    pub const ABORT_ALARM_DATA_TOO_LONG: u8 = 0x0A;
    pub const ABORT_ALARM_IND_ERROR: u8 = 0x0B;
    pub const ABORT_RPC_CLIENT_CALL_CNF_NEG: u8 = 0x0C;
    pub const ABORT_AR_ABORT_REQ: u8 = 0x0D;
    pub const ABORT_AR_RERUN: u8 = 0x0E;
    pub const ABORT_RELEASE_IND_RECEIVED: u8 = 0x0F;
    pub const ABORT_DEVICE_DEACTIVATED: u8 = 0x10;
    pub const ABORT_AR_REMOVED: u8 = 0x11;
    pub const ABORT_PROTOCOL_VIOLATION: u8 = 0x12;
    pub const ABORT_DCP_NAME_CHANGED: u8 = 0x1F;
    pub const ABORT_DCP_RESET_TO_FACTORY: u8 = 0x20;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_u32_roundtrip() {
        let status = PnioStatus::new(0xCF, 0x81, 0xFD, 0x05);
        assert_eq!(status.to_u32(), 0xCF81_FD05);
        assert_eq!(PnioStatus::from_u32(0xCF81_FD05), status);
    }

    #[test]
    fn test_abort_constructor() {
        let status = PnioStatus::abort(codes::ABORT_CONSUMER_DHT_EXPIRED);
        assert_eq!(status.error_code, 0xCF);
        assert_eq!(status.error_decode, 0x81);
        assert_eq!(status.error_code_1, 0xFD);
        assert_eq!(status.error_code_2, 0x05);
        assert!(!status.is_ok());
    }

    #[test]
    fn test_io_error_folds() {
        let err: StackError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(err, StackError::Io(io::ErrorKind::WouldBlock));
    }
}
