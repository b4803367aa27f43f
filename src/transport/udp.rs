//! Datagram transport
//!
//! One datagram carries exactly one payload, so no length prefix is used.
//! Datagram sources have no return path: nothing is ever sent back to the
//! address a telemetry datagram came from.

use super::FrameTransport;
use crate::error::TransportError;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// Largest datagram accepted
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

pub struct UdpTransport {
    socket: UdpSocket,
    /// Destination for `send`, unset for listen-only sockets
    target: Option<SocketAddr>,
    buffer: Vec<u8>,
}

impl UdpTransport {
    /// Listen on `address`; `read_timeout` bounds each receive
    pub fn bind(address: &str, read_timeout: Duration) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(address)?;
        socket.set_read_timeout(Some(read_timeout))?;
        Ok(Self {
            socket,
            target: None,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    /// Unbound sender aimed at `address`
    pub fn sender(address: &str, io_timeout: Duration) -> Result<Self, TransportError> {
        let target = address
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| TransportError::ConnectFailed {
                addr: address.to_string(),
                reason: "cannot resolve".to_string(),
            })?;
        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)?;
        socket.set_read_timeout(Some(io_timeout))?;
        socket.set_write_timeout(Some(io_timeout))?;
        Ok(Self {
            socket,
            target: Some(target),
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive one datagram; `Ok(None)` when the read timeout expires
    pub fn recv_from(&mut self) -> Result<Option<(Vec<u8>, SocketAddr)>, TransportError> {
        match self.socket.recv_from(&mut self.buffer) {
            Ok((n, from)) => Ok(Some((self.buffer[..n].to_vec(), from))),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

impl FrameTransport for UdpTransport {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let target = self.target.ok_or(TransportError::NotConnected)?;
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        self.socket.send_to(payload, target)?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        match self.recv_from()? {
            Some((payload, _)) => Ok(payload),
            None => Err(TransportError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_boundaries_preserved() {
        let mut rx = UdpTransport::bind("127.0.0.1:0", Duration::from_secs(2)).unwrap();
        let addr = rx.local_addr().unwrap().to_string();
        let mut tx = UdpTransport::sender(&addr, Duration::from_secs(1)).unwrap();

        tx.send(&[0x10; 71]).unwrap();
        tx.send(b"IMU0:1,2,3,4,5,6").unwrap();

        assert_eq!(rx.receive().unwrap().len(), 71);
        assert_eq!(rx.receive().unwrap(), b"IMU0:1,2,3,4,5,6");
    }

    #[test]
    fn test_listen_only_socket_cannot_send() {
        let mut rx = UdpTransport::bind("127.0.0.1:0", Duration::from_millis(10)).unwrap();
        assert!(matches!(rx.send(b"x"), Err(TransportError::NotConnected)));
        assert!(rx.recv_from().unwrap().is_none());
    }
}
