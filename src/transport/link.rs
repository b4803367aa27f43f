//! Plain or TLS byte stream over one TCP socket

use crate::secure::tls::{TlsClientStream, TlsServerStream};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Connected stream, optionally wrapped in TLS
pub enum StreamLink {
    Plain(TcpStream),
    TlsClient(Box<TlsClientStream>),
    TlsServer(Box<TlsServerStream>),
}

impl StreamLink {
    /// Underlying socket (timeouts and addresses live here)
    pub fn socket(&self) -> &TcpStream {
        match self {
            StreamLink::Plain(s) => s,
            StreamLink::TlsClient(s) => s.get_ref(),
            StreamLink::TlsServer(s) => s.get_ref(),
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, StreamLink::Plain(_))
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket().set_read_timeout(timeout)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket().set_write_timeout(timeout)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket().peer_addr()
    }

    /// Best-effort close: TLS close_notify, then socket shutdown
    pub fn close(&mut self) {
        match self {
            StreamLink::Plain(_) => {}
            StreamLink::TlsClient(s) => {
                s.conn.send_close_notify();
                let _ = s.flush();
            }
            StreamLink::TlsServer(s) => {
                s.conn.send_close_notify();
                let _ = s.flush();
            }
        }
        let _ = self.socket().shutdown(Shutdown::Both);
    }
}

impl Read for StreamLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StreamLink::Plain(s) => s.read(buf),
            StreamLink::TlsClient(s) => s.read(buf),
            StreamLink::TlsServer(s) => s.read(buf),
        }
    }
}

impl Write for StreamLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            StreamLink::Plain(s) => s.write(buf),
            StreamLink::TlsClient(s) => s.write(buf),
            StreamLink::TlsServer(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            StreamLink::Plain(s) => s.flush(),
            StreamLink::TlsClient(s) => s.flush(),
            StreamLink::TlsServer(s) => s.flush(),
        }
    }
}

impl std::fmt::Debug for StreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            StreamLink::Plain(_) => "plain",
            StreamLink::TlsClient(_) => "tls-client",
            StreamLink::TlsServer(_) => "tls-server",
        };
        write!(f, "StreamLink({}, {:?})", kind, self.peer_addr().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secure::tls::{self, testing::TestPki};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tls_links_carry_bytes() {
        let pki = TestPki::generate("link");
        let server_tls = tls::server_config(&pki.server()).unwrap();
        let client_tls = tls::client_config(&pki.client(false)).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            let mut link = StreamLink::TlsServer(Box::new(tls::accept(sock, server_tls).unwrap()));
            link.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            assert!(link.is_tls());
            let mut buf = [0u8; 5];
            link.read_exact(&mut buf).unwrap();
            link.write_all(&buf).unwrap();
            link.flush().unwrap();
            link.close();
        });

        let sock = TcpStream::connect(addr).unwrap();
        sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut link =
            StreamLink::TlsClient(Box::new(tls::connect(sock, client_tls, "localhost").unwrap()));
        assert!(link.is_tls());
        assert_eq!(link.peer_addr().unwrap(), addr);
        link.write_all(b"hello").unwrap();
        link.flush().unwrap();
        let mut buf = [0u8; 5];
        link.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        link.close();
        server.join().unwrap();
    }

    #[test]
    fn test_plain_link_is_not_tls() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let sock = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let mut link = StreamLink::Plain(sock);
        assert!(!link.is_tls());
        assert!(format!("{:?}", link).starts_with("StreamLink(plain"));
        link.close();
    }
}
