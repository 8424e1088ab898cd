//! Device configuration handed to `init`. Everything tunable lives here;
//! there are no environment variables and no CLI in the stack.

use crate::im::ImRecords;
use crate::types::{IpSuite, MacAddr};
use serde_derive::{Deserialize, Serialize};

/// Vendor/device identity as registered for the product.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub device_id: u16,
    pub oem_vendor_id: u16,
    pub oem_device_id: u16,
    /// Product name, up to 25 characters, reported via DCP.
    pub product_name: String,
    /// Instance used in the RPC object uuid.
    pub instance: u16,
}

impl Default for DeviceIdentity {
    fn default() -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: 0,
            device_id: 0,
            oem_vendor_id: 0,
            oem_device_id: 0,
            product_name: String::new(),
            instance: 1,
        }
    }
}

/// Fixed identifiers of the device access point plugged at slot 0 during
/// init.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct DapConfig {
    pub module_ident: u32,
    pub identity_submodule_ident: u32,
    pub interface_submodule_ident: u32,
    pub port_submodule_ident: u32,
}

impl Default for DapConfig {
    fn default() -> DapConfig {
        DapConfig {
            module_ident: 0x0000_0001,
            identity_submodule_ident: 0x0000_0001,
            interface_submodule_ident: 0x0000_8000,
            port_submodule_ident: 0x0000_8001,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub identity: DeviceIdentity,
    pub dap: DapConfig,
    /// Station name used when no persisted name exists. May be empty.
    pub station_name: String,
    pub mac: MacAddr,
    /// Static IP suite; `None` waits for DCP provisioning.
    pub ip: Option<IpSuite>,
    pub im: ImRecords,
    /// Smallest supported send interval in 31.25 µs units.
    pub min_device_interval: u16,
    pub num_ports: usize,
    /// Expected cadence of `handle_periodic`, microseconds.
    pub tick_us: u32,
}

impl DeviceConfig {
    pub fn new(identity: DeviceIdentity, mac: MacAddr) -> DeviceConfig {
        DeviceConfig {
            identity,
            dap: DapConfig::default(),
            station_name: String::new(),
            mac,
            ip: None,
            im: ImRecords::default(),
            min_device_interval: 32,
            num_ports: 1,
            tick_us: 1000,
        }
    }
}
