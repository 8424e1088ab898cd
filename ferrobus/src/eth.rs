//! Raw Ethernet framing shared by the cyclic, alarm and DCP paths: the
//! 0x8892 EtherType with an optional VLAN tag, followed by the 16-bit
//! frame id.

use crate::types::{MacAddr, ETHERTYPE_PROFINET, ETHERTYPE_VLAN};
use byteorder::{BigEndian, ByteOrder};

/// A classified inbound frame. `payload` starts after the frame id.
#[derive(Debug)]
pub struct InboundFrame<'a> {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub frame_id: u16,
    pub payload: &'a [u8],
}

/// Classify a raw frame. Returns `None` for anything that is not PROFINET
/// traffic (wrong EtherType, truncated header).
pub fn parse(frame: &[u8]) -> Option<InboundFrame> {
    if frame.len() < 16 {
        return None;
    }

    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&frame[0..6]);
    src.copy_from_slice(&frame[6..12]);

    let mut offset = 12;
    let mut ethertype = BigEndian::read_u16(&frame[offset..]);

    // Step over one VLAN tag if present.
    if ethertype == ETHERTYPE_VLAN {
        if frame.len() < 20 {
            return None;
        }
        offset += 4;
        ethertype = BigEndian::read_u16(&frame[offset..]);
    }

    if ethertype != ETHERTYPE_PROFINET {
        return None;
    }
    offset += 2;

    let frame_id = BigEndian::read_u16(&frame[offset..]);
    offset += 2;

    Some(InboundFrame {
        dst: MacAddr(dst),
        src: MacAddr(src),
        frame_id,
        payload: &frame[offset..],
    })
}

/// Write the Ethernet header into `buf`, returning the number of bytes
/// used. With `vlan_prio` set, an 802.1Q tag carrying that priority (VLAN
/// id 0) is inserted.
pub fn write_header(
    buf: &mut [u8],
    dst: MacAddr,
    src: MacAddr,
    vlan_prio: Option<u8>,
    frame_id: u16,
) -> usize {
    buf[0..6].copy_from_slice(&dst.0);
    buf[6..12].copy_from_slice(&src.0);

    let mut offset = 12;

    if let Some(prio) = vlan_prio {
        BigEndian::write_u16(&mut buf[offset..], ETHERTYPE_VLAN);
        BigEndian::write_u16(&mut buf[offset + 2..], u16::from(prio) << 13);
        offset += 4;
    }

    BigEndian::write_u16(&mut buf[offset..], ETHERTYPE_PROFINET);
    offset += 2;
    BigEndian::write_u16(&mut buf[offset..], frame_id);
    offset + 2
}
