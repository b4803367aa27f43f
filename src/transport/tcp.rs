//! Bridge-initiated stream connections
//!
//! Every blocking operation on a connection we open carries a deadline:
//! connect, TLS handshake, read and write. Expiry surfaces as a
//! [`TransportError`] and the caller's reconnect policy takes over.

use super::FrameTransport;
use super::framing::{FrameReader, write_frame};
use super::link::StreamLink;
use crate::error::TransportError;
use crate::secure::ClientTls;
use crate::secure::tls;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Open a stream to `address`, optionally completing a TLS handshake
pub fn connect_stream(
    address: &str,
    tls_settings: Option<&ClientTls>,
    connect_timeout: Duration,
    io_timeout: Duration,
) -> Result<StreamLink, TransportError> {
    let addrs = address
        .to_socket_addrs()
        .map_err(|e| TransportError::ConnectFailed {
            addr: address.to_string(),
            reason: format!("cannot resolve: {}", e),
        })?;

    let mut last_err = String::from("no addresses resolved");
    let mut sock = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, connect_timeout) {
            Ok(s) => {
                sock = Some(s);
                break;
            }
            Err(e) => last_err = e.to_string(),
        }
    }
    let sock = sock.ok_or_else(|| TransportError::ConnectFailed {
        addr: address.to_string(),
        reason: last_err,
    })?;

    sock.set_read_timeout(Some(io_timeout))?;
    sock.set_write_timeout(Some(io_timeout))?;
    if let Err(e) = sock.set_nodelay(true) {
        log::debug!("Failed to set TCP_NODELAY on {}: {}", address, e);
    }

    match tls_settings {
        Some(settings) => {
            let stream = tls::connect(sock, settings.config.clone(), &settings.server_name)?;
            log::debug!("TLS established with {} ({})", address, settings.server_name);
            Ok(StreamLink::TlsClient(Box::new(stream)))
        }
        None => Ok(StreamLink::Plain(sock)),
    }
}

/// Length-prefixed client transport
pub struct TcpFrameTransport {
    link: StreamLink,
    reader: FrameReader,
    peer: String,
}

impl TcpFrameTransport {
    pub fn connect(
        address: &str,
        tls_settings: Option<&ClientTls>,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let link = connect_stream(address, tls_settings, connect_timeout, io_timeout)?;
        Ok(Self::from_link(link, address))
    }

    pub fn from_link(link: StreamLink, peer: &str) -> Self {
        Self {
            link,
            reader: FrameReader::new(),
            peer: peer.to_string(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn close(&mut self) {
        self.link.close();
    }
}

impl FrameTransport for TcpFrameTransport {
    fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        write_frame(&mut self.link, payload)
    }

    fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        match self.reader.read_frame(&mut self.link)? {
            Some(frame) => Ok(frame),
            None => Err(TransportError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_request_response_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            let mut peer = TcpFrameTransport::from_link(StreamLink::Plain(sock), "client");
            let request = peer.receive().unwrap();
            peer.send(&[request, b"-ack".to_vec()].concat()).unwrap();
        });

        let mut client = TcpFrameTransport::connect(
            &addr,
            None,
            Duration::from_secs(1),
            Duration::from_secs(2),
        )
        .unwrap();
        client.send(b"ping").unwrap();
        assert_eq!(client.receive().unwrap(), b"ping-ack");
        server.join().unwrap();

        // Server dropped its socket at a frame boundary
        assert!(matches!(client.receive(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_read_deadline_is_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut client = TcpFrameTransport::connect(
            &addr,
            None,
            Duration::from_secs(1),
            Duration::from_millis(50),
        )
        .unwrap();
        let err = client.receive().unwrap_err();
        assert!(err.is_timeout());
        drop(listener);
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let result = TcpFrameTransport::connect(
            &format!("127.0.0.1:{}", port),
            None,
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
    }
}
