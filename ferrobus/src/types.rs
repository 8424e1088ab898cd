use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Device-local handle for an application relation. Handed to the
/// application on connect indication; 0 is never a valid handle.
pub type Arep = u16;

/// The PROFINET EtherType, shared by cyclic RT, alarm and DCP traffic.
pub const ETHERTYPE_PROFINET: u16 = 0x8892;
pub const ETHERTYPE_VLAN: u16 = 0x8100;

/// Well-known frame ids.
pub const FRAME_ID_ALARM_HIGH: u16 = 0xFC01;
pub const FRAME_ID_ALARM_LOW: u16 = 0xFE01;
pub const FRAME_ID_DCP_HELLO: u16 = 0xFEFC;
pub const FRAME_ID_DCP_GETSET: u16 = 0xFEFD;
pub const FRAME_ID_DCP_IDENT_REQ: u16 = 0xFEFE;
pub const FRAME_ID_DCP_IDENT_RSP: u16 = 0xFEFF;

/// Cyclic RT class 1 frame id range.
pub const FRAME_ID_RTC1_FIRST: u16 = 0xC000;
pub const FRAME_ID_RTC1_LAST: u16 = 0xFAFF;
/// Cyclic RT class 2 frame id range.
pub const FRAME_ID_RTC2_FIRST: u16 = 0x8000;
pub const FRAME_ID_RTC2_LAST: u16 = 0xBFFF;

/// UDP port of the RPC endpoint on the device.
pub const RPC_SERVER_PORT: u16 = 0x8894;
/// Controller port targeted by device-originated CControl requests.
pub const CONTROLLER_PNIO_PORT: u16 = 0xC003;
/// First ephemeral port used for the CControl client socket.
pub const RPC_EPHEMERAL_PORT_BASE: u16 = 0xC001;

/// VLAN user priorities for the cyclic and alarm traffic classes.
pub const VLAN_PRIO_CYCLIC: u8 = 6;
pub const VLAN_PRIO_ALARM_HIGH: u8 = 6;
pub const VLAN_PRIO_ALARM_LOW: u8 = 5;

/// Subslot number of the interface submodule in the device access point.
pub const SUBSLOT_INTERFACE: u16 = 0x8000;
/// Subslot number of the first port submodule; further ports follow.
pub const SUBSLOT_PORT_BASE: u16 = 0x8001;
/// The DAP identity submodule.
pub const SUBSLOT_DAP_IDENT: u16 = 0x0001;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// Multicast destination of DCP identify requests.
    pub const DCP_IDENTIFY: MacAddr = MacAddr([0x01, 0x0e, 0xcf, 0x00, 0x00, 0x00]);
    /// Multicast destination of DCP hello frames.
    pub const DCP_HELLO: MacAddr = MacAddr([0x01, 0x0e, 0xcf, 0x00, 0x00, 0x01]);

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    #[inline]
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 128-bit identifier as used by both the RPC layer and the AR blocks.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct Uuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Uuid {
    pub const NIL: Uuid = Uuid {
        data1: 0,
        data2: 0,
        data3: 0,
        data4: [0; 8],
    };

    /// The PROFINET IO device interface.
    pub const IO_DEVICE_INTERFACE: Uuid = Uuid {
        data1: 0xDEA0_0001,
        data2: 0x6C97,
        data3: 0x11D1,
        data4: [0x82, 0x71, 0x00, 0xA0, 0x24, 0x42, 0xDF, 0x7D],
    };

    /// Object uuid of a device instance: the node part encodes the instance,
    /// device id and vendor id.
    pub fn io_device_object(instance: u16, device_id: u16, vendor_id: u16) -> Uuid {
        Uuid {
            data1: 0xDEA0_0000,
            data2: 0x6C97,
            data3: 0x11D1,
            data4: [
                0x82,
                0x71,
                (instance >> 8) as u8,
                instance as u8,
                (device_id >> 8) as u8,
                device_id as u8,
                (vendor_id >> 8) as u8,
                vendor_id as u8,
            ],
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        *self == Uuid::NIL
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// IP address, netmask and gateway as provisioned via DCP.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct IpSuite {
    pub addr: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

impl IpSuite {
    pub const UNSET: IpSuite = IpSuite {
        addr: Ipv4Addr::UNSPECIFIED,
        mask: Ipv4Addr::UNSPECIFIED,
        gateway: Ipv4Addr::UNSPECIFIED,
    };

    #[inline]
    pub fn is_unset(&self) -> bool {
        self.addr.is_unspecified()
    }
}

/// Addressing tuple for a submodule, used all over the record and cyclic
/// data paths.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SubslotKey {
    pub api: u32,
    pub slot: u16,
    pub subslot: u16,
}

impl SubslotKey {
    #[inline]
    pub fn new(api: u32, slot: u16, subslot: u16) -> SubslotKey {
        SubslotKey { api, slot, subslot }
    }
}

impl fmt::Display for SubslotKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}/{:#06x}", self.api, self.slot, self.subslot)
    }
}

/// Provider/consumer status byte values.
pub const IOXS_GOOD: u8 = 0x80;
pub const IOXS_BAD: u8 = 0x00;

/// Data status bit positions of outgoing and incoming cyclic frames.
pub mod data_status {
    /// 1 = primary, 0 = backup.
    pub const STATE: u8 = 0x01;
    pub const REDUNDANCY: u8 = 0x02;
    pub const DATA_VALID: u8 = 0x04;
    /// 1 = run, 0 = stop.
    pub const PROVIDER_STATE: u8 = 0x10;
    /// 1 = normal operation, 0 = problem detected.
    pub const STATION_OK: u8 = 0x20;
    pub const IGNORE: u8 = 0x80;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_formatting() {
        let mac = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
        assert_eq!(format!("{}", mac), "02:00:00:00:00:01");
        assert!(!mac.is_multicast());
        assert!(MacAddr::DCP_IDENTIFY.is_multicast());
    }

    #[test]
    fn test_object_uuid_node_encoding() {
        let uuid = Uuid::io_device_object(1, 0x1234, 0xfeed);
        assert_eq!(uuid.data4[2..], [0x00, 0x01, 0x12, 0x34, 0xfe, 0xed]);
        assert_eq!(
            format!("{}", uuid),
            "dea00000-6c97-11d1-8271-000112 34feed".replace(' ', "")
        );
    }

    #[test]
    fn test_ip_suite_unset() {
        assert!(IpSuite::UNSET.is_unset());
    }
}
