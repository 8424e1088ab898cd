//! Port neighbourhood and MIB-II system data. The LLDP transmitter and the
//! SNMP agent live outside the stack; this store holds what they feed in
//! or read out, plus the persisted peer-check expectations behind
//! PDPortDataCheck.

use crate::block::{bt, BlockReader, BlockWriter};
use crate::error::DecodeError;
use crate::limits::MAX_PORTS;
use crate::types::{SUBSLOT_PORT_BASE};
use serde_derive::{Deserialize, Serialize};

/// What the external LLDP receiver learned about one port's neighbour.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PeerInfo {
    pub chassis_id: String,
    pub port_id: String,
    pub ttl_secs: u16,
}

/// The peer the controller told us to expect on a port.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CheckPeer {
    pub chassis_id: String,
    pub port_id: String,
}

/// SNMP-settable system group strings.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub contact: String,
    pub name: String,
    pub location: String,
}

pub struct LldpStore {
    peers: Vec<Option<PeerInfo>>,
    checks: Vec<Option<CheckPeer>>,
    /// PDPortDataAdjust records, kept verbatim per port.
    adjusts: Vec<Option<Vec<u8>>>,
    pub system: SystemInfo,
}

impl LldpStore {
    pub fn new() -> LldpStore {
        LldpStore {
            peers: vec![None; MAX_PORTS],
            checks: vec![None; MAX_PORTS],
            adjusts: vec![None; MAX_PORTS],
            system: SystemInfo::default(),
        }
    }

    /// Update a port's neighbour. Returns true when the peer identity
    /// changed, which the caller reports as a port-data-change alarm.
    pub fn set_peer(&mut self, port: usize, peer: PeerInfo) -> bool {
        if port >= self.peers.len() {
            return false;
        }

        let changed = match &self.peers[port] {
            Some(old) => old.chassis_id != peer.chassis_id || old.port_id != peer.port_id,
            None => true,
        };
        self.peers[port] = Some(peer);
        changed
    }

    pub fn clear_peer(&mut self, port: usize) {
        if let Some(slot) = self.peers.get_mut(port) {
            *slot = None;
        }
    }

    #[inline]
    pub fn peer(&self, port: usize) -> Option<&PeerInfo> {
        self.peers.get(port)?.as_ref()
    }

    pub fn set_check(&mut self, port: usize, check: Option<CheckPeer>) {
        if let Some(slot) = self.checks.get_mut(port) {
            *slot = check;
        }
    }

    #[inline]
    pub fn check(&self, port: usize) -> Option<&CheckPeer> {
        self.checks.get(port)?.as_ref()
    }

    /// A configured check fails when no peer is seen or the identity
    /// differs.
    pub fn check_mismatch(&self, port: usize) -> bool {
        match self.check(port) {
            None => false,
            Some(check) => match self.peer(port) {
                None => true,
                Some(peer) => {
                    peer.chassis_id != check.chassis_id || peer.port_id != check.port_id
                }
            },
        }
    }

    /// Encode PDPortDataReal for one port.
    pub fn encode_port_data_real(
        &self,
        writer: &mut BlockWriter,
        port: usize,
    ) -> std::io::Result<()> {
        let mark = writer.begin_block(bt::PDPORT_DATA_REAL)?;
        let base = writer.position();

        writer.padding(2)?;
        writer.u16(0)?; // slot 0
        writer.u16(SUBSLOT_PORT_BASE + port as u16)?;

        match self.peer(port) {
            Some(peer) => {
                writer.u8(1)?; // number of peers
                writer.align(base, 2)?;
                writer.short_string(&peer.port_id)?;
                writer.short_string(&peer.chassis_id)?;
                writer.u16(peer.ttl_secs)?;
            }
            None => {
                writer.u8(0)?;
                writer.align(base, 2)?;
            }
        }

        writer.align(base, 4)?;
        writer.end_block(mark)
    }

    /// Encode PDPortDataCheck (the stored expectation) for one port.
    pub fn encode_port_data_check(
        &self,
        writer: &mut BlockWriter,
        port: usize,
    ) -> std::io::Result<()> {
        let mark = writer.begin_block(bt::PDPORT_CHECK)?;
        let base = writer.position();

        writer.padding(2)?;
        writer.u16(0)?;
        writer.u16(SUBSLOT_PORT_BASE + port as u16)?;

        if let Some(check) = self.check(port) {
            let inner = writer.begin_block(bt::CHECK_PEERS)?;
            writer.u8(1)?;
            writer.short_string(&check.port_id)?;
            writer.short_string(&check.chassis_id)?;
            writer.end_block(inner)?;
        }

        writer.align(base, 4)?;
        writer.end_block(mark)
    }

    /// Store a port's adjust record as written by the controller.
    pub fn set_adjust(&mut self, port: usize, record: Option<Vec<u8>>) {
        if let Some(slot) = self.adjusts.get_mut(port) {
            *slot = record;
        }
    }

    #[inline]
    pub fn adjust(&self, port: usize) -> Option<&[u8]> {
        self.adjusts.get(port)?.as_deref()
    }

    /// Serialize the per-port adjust records for persistence.
    pub fn adjusts_to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        for adjust in &self.adjusts {
            match adjust {
                Some(record) => {
                    out.push(1);
                    out.extend_from_slice(&(record.len() as u16).to_be_bytes());
                    out.extend_from_slice(record);
                }
                None => out.push(0),
            }
        }

        out
    }

    pub fn adjusts_from_bytes(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let mut offset = 0;

        for port in 0..self.adjusts.len() {
            let present = *data.get(offset).ok_or(DecodeError::EndOfInput)?;
            offset += 1;

            self.adjusts[port] = if present == 1 {
                if data.len() < offset + 2 {
                    return Err(DecodeError::EndOfInput);
                }
                let len = u16::from_be_bytes([data[offset], data[offset + 1]]) as usize;
                offset += 2;

                if data.len() < offset + len {
                    return Err(DecodeError::EndOfInput);
                }
                let record = data[offset..offset + len].to_vec();
                offset += len;
                Some(record)
            } else {
                None
            };
        }

        Ok(())
    }

    /// Serialize the per-port check expectations for persistence.
    pub fn checks_to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        for check in &self.checks {
            match check {
                Some(check) => {
                    out.push(1);
                    push_string(&mut out, &check.chassis_id);
                    push_string(&mut out, &check.port_id);
                }
                None => out.push(0),
            }
        }

        out
    }

    pub fn checks_from_bytes(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let mut offset = 0;

        for port in 0..self.checks.len() {
            let present = *data.get(offset).ok_or(DecodeError::EndOfInput)?;
            offset += 1;

            self.checks[port] = if present == 1 {
                let chassis_id = pull_string(data, &mut offset)?;
                let port_id = pull_string(data, &mut offset)?;
                Some(CheckPeer {
                    chassis_id,
                    port_id,
                })
            } else {
                None
            };
        }

        Ok(())
    }

    /// Serialize the system group strings for persistence.
    pub fn system_to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_string(&mut out, &self.system.contact);
        push_string(&mut out, &self.system.name);
        push_string(&mut out, &self.system.location);
        out
    }

    pub fn system_from_bytes(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let mut offset = 0;
        self.system.contact = pull_string(data, &mut offset)?;
        self.system.name = pull_string(data, &mut offset)?;
        self.system.location = pull_string(data, &mut offset)?;
        Ok(())
    }

    /// Parse a written PDPortDataCheck body into the stored expectation.
    pub fn decode_port_data_check(data: &[u8]) -> Result<(usize, CheckPeer), DecodeError> {
        let mut reader = BlockReader::new(data);
        reader.expect_block(bt::PDPORT_CHECK)?;
        reader.skip(2)?;
        let _slot = reader.u16()?;
        let subslot = reader.u16()?;

        let inner = reader.header()?;
        if inner.block_type != bt::CHECK_PEERS {
            return Err(DecodeError::Malformed);
        }
        let count = reader.u8()?;
        if count != 1 {
            return Err(DecodeError::Malformed);
        }
        let port_id = reader.short_string()?;
        let chassis_id = reader.short_string()?;

        let port = subslot.checked_sub(SUBSLOT_PORT_BASE).ok_or(DecodeError::Malformed)? as usize;

        Ok((
            port,
            CheckPeer {
                chassis_id,
                port_id,
            },
        ))
    }
}

fn push_string(out: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
}

fn pull_string(data: &[u8], offset: &mut usize) -> Result<String, DecodeError> {
    if data.len() < *offset + 2 {
        return Err(DecodeError::EndOfInput);
    }
    let len = u16::from_be_bytes([data[*offset], data[*offset + 1]]) as usize;
    *offset += 2;

    if data.len() < *offset + len {
        return Err(DecodeError::EndOfInput);
    }
    let text = String::from_utf8(data[*offset..*offset + len].to_vec())
        .map_err(|_| DecodeError::Malformed)?;
    *offset += len;
    Ok(text)
}
