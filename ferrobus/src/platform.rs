//! Platform seam: raw Ethernet transmission, non-blocking UDP, binary file
//! persistence, the monotonic clock and a randomness source. The stack only
//! sees this trait; [`MioPlatform`] is the shipped implementation for
//! ordinary operating systems and [`mock::MockPlatform`] the in-memory
//! double used by the test suites.

use crate::error::{StackError, StackResult};
use crate::types::IpSuite;
use std::net::Ipv4Addr;

/// Handle of an open UDP endpoint.
pub type UdpHandle = usize;

pub trait Platform: Send {
    /// Microseconds since an arbitrary start, monotonic.
    fn now_us(&mut self) -> u64;

    /// Pseudo-random source for DCP response jitter.
    fn rand_u32(&mut self) -> u32;

    /// Transmit a raw Ethernet frame on a physical port.
    fn eth_send(&mut self, port: usize, frame: &[u8]) -> StackResult<usize>;

    fn udp_open(&mut self, addr: Ipv4Addr, port: u16) -> StackResult<UdpHandle>;
    fn udp_send(
        &mut self,
        handle: UdpHandle,
        dst_addr: Ipv4Addr,
        dst_port: u16,
        data: &[u8],
    ) -> StackResult<usize>;
    /// Non-blocking receive; `None` when nothing is queued.
    fn udp_recv(
        &mut self,
        handle: UdpHandle,
        buf: &mut [u8],
    ) -> StackResult<Option<(Ipv4Addr, u16, usize)>>;
    fn udp_close(&mut self, handle: UdpHandle);

    fn load_file(&mut self, name: &str) -> Option<Vec<u8>>;
    fn save_file(&mut self, name: &str, data: &[u8]) -> StackResult<()>;
    fn clear_file(&mut self, name: &str);

    /// Apply an IP suite to the interface. The default implementation
    /// accepts it silently; integrations override to reach their network
    /// configuration.
    fn set_ip_suite(&mut self, _suite: &IpSuite) -> StackResult<()> {
        Ok(())
    }
}

/// Platform backed by `mio` UDP sockets and plain files in a configured
/// directory. Raw Ethernet frames go through an injected sender, since
/// packet sockets are integration specific.
pub struct MioPlatform {
    clock: girder::time::MonotonicClock,
    rand_state: u32,
    file_dir: std::path::PathBuf,
    sockets: Vec<Option<mio::net::UdpSocket>>,
    eth_tx: Option<Box<dyn FnMut(usize, &[u8]) -> StackResult<usize> + Send>>,
    eth_dropped: u64,
}

impl MioPlatform {
    pub fn new<P: Into<std::path::PathBuf>>(file_dir: P) -> MioPlatform {
        let seed = girder::time::timestamp_secs() as u32 | 1;

        MioPlatform {
            clock: girder::time::MonotonicClock::new(),
            rand_state: seed,
            file_dir: file_dir.into(),
            sockets: Vec::new(),
            eth_tx: None,
            eth_dropped: 0,
        }
    }

    /// Install the raw Ethernet sender of the integration.
    pub fn set_eth_sender<F>(&mut self, sender: F)
    where
        F: FnMut(usize, &[u8]) -> StackResult<usize> + Send + 'static,
    {
        self.eth_tx = Some(Box::new(sender));
    }

    fn path_for(&self, name: &str) -> std::path::PathBuf {
        self.file_dir.join(name)
    }
}

impl Platform for MioPlatform {
    fn now_us(&mut self) -> u64 {
        self.clock.now_us()
    }

    fn rand_u32(&mut self) -> u32 {
        // xorshift32; quality is irrelevant, only spread matters.
        let mut x = self.rand_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rand_state = x;
        x
    }

    fn eth_send(&mut self, port: usize, frame: &[u8]) -> StackResult<usize> {
        match &mut self.eth_tx {
            Some(sender) => sender(port, frame),
            None => {
                self.eth_dropped += 1;
                Ok(frame.len())
            }
        }
    }

    fn udp_open(&mut self, addr: Ipv4Addr, port: u16) -> StackResult<UdpHandle> {
        let socket = mio::net::UdpSocket::bind(std::net::SocketAddr::from((addr, port)))?;

        for (index, slot) in self.sockets.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(socket);
                return Ok(index);
            }
        }

        self.sockets.push(Some(socket));
        Ok(self.sockets.len() - 1)
    }

    fn udp_send(
        &mut self,
        handle: UdpHandle,
        dst_addr: Ipv4Addr,
        dst_port: u16,
        data: &[u8],
    ) -> StackResult<usize> {
        let socket = self
            .sockets
            .get(handle)
            .and_then(|s| s.as_ref())
            .ok_or(StackError::NotFound)?;

        Ok(socket.send_to(data, std::net::SocketAddr::from((dst_addr, dst_port)))?)
    }

    fn udp_recv(
        &mut self,
        handle: UdpHandle,
        buf: &mut [u8],
    ) -> StackResult<Option<(Ipv4Addr, u16, usize)>> {
        let socket = self
            .sockets
            .get(handle)
            .and_then(|s| s.as_ref())
            .ok_or(StackError::NotFound)?;

        match socket.recv_from(buf) {
            Ok((len, peer)) => match peer {
                std::net::SocketAddr::V4(peer) => Ok(Some((*peer.ip(), peer.port(), len))),
                _ => Ok(None),
            },
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn udp_close(&mut self, handle: UdpHandle) {
        if let Some(slot) = self.sockets.get_mut(handle) {
            *slot = None;
        }
    }

    fn load_file(&mut self, name: &str) -> Option<Vec<u8>> {
        std::fs::read(self.path_for(name)).ok()
    }

    fn save_file(&mut self, name: &str, data: &[u8]) -> StackResult<()> {
        std::fs::write(self.path_for(name), data)?;
        Ok(())
    }

    fn clear_file(&mut self, name: &str) {
        let _ = std::fs::remove_file(self.path_for(name));
    }
}

/// In-memory platform double: records transmitted frames and datagrams,
/// delivers queued input, and advances time only when told to.
pub mod mock {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MockPlatform {
        pub now_us: u64,
        rand_state: u32,
        /// Every raw frame handed to `eth_send`, as (port, frame).
        pub sent_frames: Vec<(usize, Vec<u8>)>,
        /// Every datagram handed to `udp_send`, as (handle, dst ip, dst
        /// port, payload).
        pub sent_udp: Vec<(UdpHandle, Ipv4Addr, u16, Vec<u8>)>,
        /// Queued inbound datagrams per handle.
        pub udp_rx: HashMap<UdpHandle, Vec<(Ipv4Addr, u16, Vec<u8>)>>,
        pub files: HashMap<String, Vec<u8>>,
        open_ports: Vec<Option<u16>>,
        /// Set to force `eth_send` failures.
        pub eth_fail: bool,
    }

    impl MockPlatform {
        pub fn new() -> MockPlatform {
            MockPlatform {
                rand_state: 0x2545_F491,
                ..MockPlatform::default()
            }
        }

        /// Advance the manual clock.
        pub fn advance_us(&mut self, delta: u64) {
            self.now_us += delta;
        }

        /// Queue a datagram for the next `udp_recv` on `handle`.
        pub fn push_udp(&mut self, handle: UdpHandle, src: Ipv4Addr, port: u16, data: Vec<u8>) {
            self.udp_rx.entry(handle).or_default().push((src, port, data));
        }

        /// The local port a handle was bound to.
        pub fn bound_port(&self, handle: UdpHandle) -> Option<u16> {
            self.open_ports.get(handle).copied().flatten()
        }
    }

    impl Platform for MockPlatform {
        fn now_us(&mut self) -> u64 {
            self.now_us
        }

        fn rand_u32(&mut self) -> u32 {
            let mut x = self.rand_state;
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            self.rand_state = x;
            x
        }

        fn eth_send(&mut self, port: usize, frame: &[u8]) -> StackResult<usize> {
            if self.eth_fail {
                return Err(StackError::Io(std::io::ErrorKind::Other));
            }
            self.sent_frames.push((port, frame.to_vec()));
            Ok(frame.len())
        }

        fn udp_open(&mut self, _addr: Ipv4Addr, port: u16) -> StackResult<UdpHandle> {
            self.open_ports.push(Some(port));
            Ok(self.open_ports.len() - 1)
        }

        fn udp_send(
            &mut self,
            handle: UdpHandle,
            dst_addr: Ipv4Addr,
            dst_port: u16,
            data: &[u8],
        ) -> StackResult<usize> {
            self.sent_udp.push((handle, dst_addr, dst_port, data.to_vec()));
            Ok(data.len())
        }

        fn udp_recv(
            &mut self,
            handle: UdpHandle,
            buf: &mut [u8],
        ) -> StackResult<Option<(Ipv4Addr, u16, usize)>> {
            let queue = match self.udp_rx.get_mut(&handle) {
                Some(queue) if !queue.is_empty() => queue,
                _ => return Ok(None),
            };

            let (src, port, data) = queue.remove(0);
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(Some((src, port, len)))
        }

        fn udp_close(&mut self, handle: UdpHandle) {
            if let Some(slot) = self.open_ports.get_mut(handle) {
                *slot = None;
            }
        }

        fn load_file(&mut self, name: &str) -> Option<Vec<u8>> {
            self.files.get(name).cloned()
        }

        fn save_file(&mut self, name: &str, data: &[u8]) -> StackResult<()> {
            self.files.insert(name.to_string(), data.to_vec());
            Ok(())
        }

        fn clear_file(&mut self, name: &str) {
            self.files.remove(name);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_mock_udp_queueing() {
            let mut platform = MockPlatform::new();
            let handle = platform.udp_open(Ipv4Addr::UNSPECIFIED, 0x8894).unwrap();

            let mut buf = [0u8; 16];
            assert_eq!(platform.udp_recv(handle, &mut buf).unwrap(), None);

            platform.push_udp(handle, Ipv4Addr::new(192, 168, 0, 90), 0xC003, vec![1, 2]);
            let (src, port, len) = platform.udp_recv(handle, &mut buf).unwrap().unwrap();
            assert_eq!(src, Ipv4Addr::new(192, 168, 0, 90));
            assert_eq!(port, 0xC003);
            assert_eq!(&buf[..len], &[1, 2]);
        }

        #[test]
        fn test_mock_files() {
            let mut platform = MockPlatform::new();
            platform.save_file("im.bin", &[1, 2, 3]).unwrap();
            assert_eq!(platform.load_file("im.bin"), Some(vec![1, 2, 3]));
            platform.clear_file("im.bin");
            assert_eq!(platform.load_file("im.bin"), None);
        }

        #[test]
        fn test_mock_clock_manual() {
            let mut platform = MockPlatform::new();
            assert_eq!(platform.now_us(), 0);
            platform.advance_us(1000);
            assert_eq!(platform.now_us(), 1000);
        }
    }
}
