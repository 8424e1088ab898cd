//! RPC sessions: one per peer activity. A session owns the inbound
//! fragment reassembly state, the outgoing response (or device-originated
//! request) and its retransmission bookkeeping.

use crate::error::{StackError, StackResult};
use crate::limits::{MAX_UDP_PAYLOAD, RPC_MAX_RETRIES};
use crate::rpc::header::{
    PacketType, RpcHeader, FLAG1_FRAGMENT, FLAG1_LAST_FRAGMENT, FLAG1_NO_FACK, RPC_HEADER_SIZE,
};
use crate::sched::TimerHandle;
use crate::types::{Arep, Uuid};
use std::net::Ipv4Addr;

/// Direction of the session.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionKind {
    /// Serving a controller request on the well-known port.
    Server,
    /// Device-originated CControl towards the controller.
    CControl,
}

/// Outcome of feeding one inbound fragment.
#[derive(Debug, Eq, PartialEq)]
pub enum FragOutcome {
    /// More fragments outstanding.
    Incomplete,
    /// Reassembly finished; the full body in fragment order.
    Complete(Vec<u8>),
    /// The last fragment arrived with earlier fragments missing.
    Missing,
}

pub struct Session {
    pub activity: Uuid,
    pub kind: SessionKind,
    pub peer_ip: Ipv4Addr,
    pub peer_port: u16,
    pub arep: Option<Arep>,
    pub little_endian: bool,
    /// Sequence number of the request being served or sent.
    pub seq: u32,
    pub opnum: u16,

    in_frags: Vec<Option<Vec<u8>>>,
    pub frag_timer: Option<TimerHandle>,

    /// Finished response (server) or outgoing request (CControl), kept for
    /// duplicate requests and retransmission.
    out_body: Vec<u8>,
    out_packet_type: PacketType,
    pub resend_timer: Option<TimerHandle>,
    pub retries: u8,

    /// CControl client socket handle, owned by the platform.
    pub socket: Option<usize>,

    /// Marked by handlers that want the session gone once the response is
    /// out.
    pub kill: bool,
}

impl Session {
    pub fn new(
        activity: Uuid,
        kind: SessionKind,
        peer_ip: Ipv4Addr,
        peer_port: u16,
    ) -> Session {
        Session {
            activity,
            kind,
            peer_ip,
            peer_port,
            arep: None,
            little_endian: false,
            seq: 0,
            opnum: 0,
            in_frags: Vec::new(),
            frag_timer: None,
            out_body: Vec::new(),
            out_packet_type: PacketType::Response,
            resend_timer: None,
            retries: 0,
            socket: None,
            kill: false,
        }
    }

    /// Store one fragment. Completion is decided when the last fragment is
    /// present: every prior fragment must have arrived, in any order.
    pub fn add_fragment(&mut self, frag_num: u16, last: bool, data: &[u8]) -> FragOutcome {
        let index = frag_num as usize;

        if self.in_frags.len() <= index {
            self.in_frags.resize(index + 1, None);
        }
        self.in_frags[index] = Some(data.to_vec());

        if !last {
            return FragOutcome::Incomplete;
        }

        if self.in_frags[..=index].iter().any(|f| f.is_none()) {
            return FragOutcome::Missing;
        }

        let mut body = Vec::new();
        for fragment in self.in_frags.drain(..=index) {
            body.extend_from_slice(&fragment.expect("presence just checked"));
        }
        self.in_frags.clear();

        FragOutcome::Complete(body)
    }

    /// Drop any partial reassembly state.
    pub fn reset_reassembly(&mut self) {
        self.in_frags.clear();
    }

    #[inline]
    pub fn has_partial_input(&self) -> bool {
        !self.in_frags.is_empty()
    }

    /// Install the outgoing body.
    pub fn set_outgoing(&mut self, packet_type: PacketType, body: Vec<u8>) {
        self.out_body = body;
        self.out_packet_type = packet_type;
        self.retries = 0;
    }

    #[inline]
    pub fn has_outgoing(&self) -> bool {
        !self.out_body.is_empty()
    }

    /// Build every datagram of the outgoing body, fragmenting above the
    /// single-PDU limit.
    pub fn build_outgoing(&self, template: &RpcHeader) -> Vec<Vec<u8>> {
        let chunks: Vec<&[u8]> = if self.out_body.is_empty() {
            vec![&[]]
        } else {
            self.out_body.chunks(MAX_UDP_PAYLOAD).collect()
        };
        let total = chunks.len();

        chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                let mut header = *template;
                header.packet_type = self.out_packet_type;
                header.little_endian = self.little_endian;
                header.activity = self.activity;
                header.seq = self.seq;
                header.opnum = self.opnum;
                header.body_len = chunk.len() as u16;
                header.frag_num = index as u16;
                header.flags1 |= FLAG1_NO_FACK;

                if total > 1 {
                    header.flags1 |= FLAG1_FRAGMENT;
                    if index + 1 == total {
                        header.flags1 |= FLAG1_LAST_FRAGMENT;
                    }
                }

                let mut datagram = vec![0u8; RPC_HEADER_SIZE + chunk.len()];
                header.encode(&mut datagram);
                datagram[RPC_HEADER_SIZE..].copy_from_slice(chunk);
                datagram
            })
            .collect()
    }

    /// One more retransmission allowed?
    pub fn bump_retry(&mut self) -> StackResult<()> {
        if self.retries >= RPC_MAX_RETRIES {
            return Err(StackError::Busy);
        }
        self.retries += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            Uuid::io_device_object(1, 2, 3),
            SessionKind::Server,
            Ipv4Addr::new(192, 168, 0, 90),
            0xC003,
        )
    }

    #[test]
    fn test_reassembly_in_order() {
        let mut session = session();

        assert_eq!(session.add_fragment(0, false, b"ab"), FragOutcome::Incomplete);
        assert_eq!(session.add_fragment(1, false, b"cd"), FragOutcome::Incomplete);
        assert_eq!(
            session.add_fragment(2, true, b"ef"),
            FragOutcome::Complete(b"abcdef".to_vec())
        );
        assert!(!session.has_partial_input());
    }

    #[test]
    fn test_reassembly_out_of_order() {
        let mut session = session();

        // Delivery order 1, 0, 2: reassembled bytes keep fragment order.
        assert_eq!(session.add_fragment(1, false, b"cd"), FragOutcome::Incomplete);
        assert_eq!(session.add_fragment(0, false, b"ab"), FragOutcome::Incomplete);
        assert_eq!(
            session.add_fragment(2, true, b"ef"),
            FragOutcome::Complete(b"abcdef".to_vec())
        );
    }

    #[test]
    fn test_missing_fragment_detected() {
        let mut session = session();

        assert_eq!(session.add_fragment(1, false, b"cd"), FragOutcome::Incomplete);
        assert_eq!(session.add_fragment(2, true, b"ef"), FragOutcome::Missing);
    }

    #[test]
    fn test_single_pdu_response() {
        let mut session = session();
        session.seq = 7;
        session.opnum = 0;
        session.set_outgoing(PacketType::Response, vec![1, 2, 3]);

        let datagrams = session.build_outgoing(&RpcHeader::new(PacketType::Response));
        assert_eq!(datagrams.len(), 1);

        let header = RpcHeader::decode(&datagrams[0]).unwrap();
        assert_eq!(header.packet_type, PacketType::Response);
        assert_eq!(header.seq, 7);
        assert_eq!(header.body_len, 3);
        assert!(!header.is_fragment());
        assert_eq!(&datagrams[0][RPC_HEADER_SIZE..], &[1, 2, 3]);
    }

    #[test]
    fn test_fragmented_response() {
        let mut session = session();
        session.set_outgoing(PacketType::Response, vec![0xAA; MAX_UDP_PAYLOAD + 10]);

        let datagrams = session.build_outgoing(&RpcHeader::new(PacketType::Response));
        assert_eq!(datagrams.len(), 2);

        let first = RpcHeader::decode(&datagrams[0]).unwrap();
        assert!(first.is_fragment());
        assert!(!first.is_last_fragment());
        assert_eq!(first.frag_num, 0);

        let second = RpcHeader::decode(&datagrams[1]).unwrap();
        assert!(second.is_last_fragment());
        assert_eq!(second.frag_num, 1);
        assert_eq!(second.body_len, 10);
    }

    #[test]
    fn test_retry_budget() {
        let mut session = session();

        for _ in 0..RPC_MAX_RETRIES {
            session.bump_retry().unwrap();
        }
        assert_eq!(session.bump_retry(), Err(StackError::Busy));
    }
}
