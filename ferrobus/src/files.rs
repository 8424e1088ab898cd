//! Fixed-layout binary persistence. Every file starts with a magic and a
//! version word; anything corrupt or missing falls back to defaults at the
//! call site.

use crate::error::StackResult;
use crate::platform::Platform;
use byteorder::{BigEndian, ByteOrder};

const MAGIC: u32 = 0x4645_5242;
const HEADER_SIZE: usize = 8;

/// Well-known file names in the configured directory.
pub mod names {
    pub const IP_SUITE: &str = "ip_suite.bin";
    pub const STATION_NAME: &str = "station_name.bin";
    pub const IM_RECORDS: &str = "im_records.bin";
    pub const PORT_CHECK: &str = "port_check.bin";
    pub const PORT_ADJUST: &str = "port_adjust.bin";
    pub const SYSTEM_INFO: &str = "system_info.bin";

    pub const ALL: [&str; 6] = [
        IP_SUITE,
        STATION_NAME,
        IM_RECORDS,
        PORT_CHECK,
        PORT_ADJUST,
        SYSTEM_INFO,
    ];
}

pub fn save(
    platform: &mut dyn Platform,
    name: &str,
    version: u32,
    payload: &[u8],
) -> StackResult<()> {
    let mut data = vec![0u8; HEADER_SIZE + payload.len()];
    BigEndian::write_u32(&mut data[0..], MAGIC);
    BigEndian::write_u32(&mut data[4..], version);
    data[HEADER_SIZE..].copy_from_slice(payload);

    platform.save_file(name, &data)
}

/// Load a file's payload; `None` on absence, bad magic or version skew.
pub fn load(platform: &mut dyn Platform, name: &str, version: u32) -> Option<Vec<u8>> {
    let data = platform.load_file(name)?;

    if data.len() < HEADER_SIZE {
        return None;
    }
    if BigEndian::read_u32(&data[0..]) != MAGIC {
        return None;
    }
    if BigEndian::read_u32(&data[4..]) != version {
        return None;
    }

    Some(data[HEADER_SIZE..].to_vec())
}

pub fn clear_all(platform: &mut dyn Platform) {
    for name in names::ALL.iter() {
        platform.clear_file(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::MockPlatform;

    #[test]
    fn test_save_load_roundtrip() {
        let mut platform = MockPlatform::new();

        save(&mut platform, "test.bin", 1, &[1, 2, 3]).unwrap();
        assert_eq!(load(&mut platform, "test.bin", 1), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_missing_and_corrupt_fall_back() {
        let mut platform = MockPlatform::new();

        assert_eq!(load(&mut platform, "absent.bin", 1), None);

        platform.save_file("corrupt.bin", &[9, 9]).unwrap();
        assert_eq!(load(&mut platform, "corrupt.bin", 1), None);

        // Version skew is treated as corrupt.
        save(&mut platform, "old.bin", 1, &[1]).unwrap();
        assert_eq!(load(&mut platform, "old.bin", 2), None);
    }

    #[test]
    fn test_clear_all() {
        let mut platform = MockPlatform::new();

        for name in names::ALL.iter() {
            save(&mut platform, name, 1, &[1]).unwrap();
        }
        clear_all(&mut platform);
        for name in names::ALL.iter() {
            assert_eq!(load(&mut platform, name, 1), None);
        }
    }
}
