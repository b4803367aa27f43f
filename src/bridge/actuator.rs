//! Actuator link
//!
//! Each result's movement class goes out as one 16-byte block: the ASCII
//! digit at the start, zero-filled, then encrypted with the link cipher
//! (AES-128-CBC without padding, or XOR). The device may answer with a short
//! textual acknowledgement; a missing acknowledgement is logged, not retried.

use super::outbound::{Link, OutboundMessage};
use crate::config::OutboundConfig;
use crate::error::TransportError;
use crate::secure::PayloadCipher;
use crate::secure::cipher::class_block;
use crate::transport::StreamLink;
use crate::transport::tcp::connect_stream;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

/// Longest acknowledgement read back
const ACK_MAX: usize = 64;

pub struct ActuatorLink {
    name: String,
    address: String,
    cipher: PayloadCipher,
    expect_ack: bool,
    connect_timeout: Duration,
    io_timeout: Duration,
    ack_timeout: Duration,
    link: Option<StreamLink>,
}

impl ActuatorLink {
    pub fn new(config: &OutboundConfig, cipher: PayloadCipher) -> Self {
        Self {
            name: config.name.clone(),
            address: config.address.clone(),
            cipher,
            expect_ack: config.expect_ack,
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
            ack_timeout: config.ack_timeout(),
            link: None,
        }
    }

    /// Send one movement class; returns the acknowledgement text if any
    pub fn send_class(&mut self, class: u8) -> Result<Option<String>, TransportError> {
        let block = self.cipher.encrypt_block(&class_block(&class.to_string()));
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        link.set_write_timeout(Some(self.io_timeout))?;
        link.write_all(&block)?;
        link.flush()?;
        log::debug!("[{}] Sent movement class {}", self.name, class);

        if !self.expect_ack {
            return Ok(None);
        }

        link.set_read_timeout(Some(self.ack_timeout))?;
        let mut buf = [0u8; ACK_MAX];
        match link.read(&mut buf) {
            Ok(0) => {
                // Block already went out; reconnect for the next one
                log::warn!("[{}] Actuator closed the connection", self.name);
                self.disconnect();
                Ok(None)
            }
            Ok(n) => {
                let ack = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                log::debug!("[{}] Ack: {}", self.name, ack);
                Ok(Some(ack))
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                log::debug!("[{}] No ack within {:?}", self.name, self.ack_timeout);
                Ok(None)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

impl Link for ActuatorLink {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.link = Some(connect_stream(
            &self.address,
            None,
            self.connect_timeout,
            self.io_timeout,
        )?);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn deliver(&mut self, msg: &OutboundMessage) -> Result<(), TransportError> {
        match msg {
            OutboundMessage::Result {
                movement_class: Some(class),
                ..
            } => self.send_class(*class).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CipherConfig, CipherKind, OutboundKind};
    use crate::secure::cipher::class_from_block;
    use std::net::TcpListener;
    use std::thread;

    fn xor() -> PayloadCipher {
        PayloadCipher::from_config(&CipherConfig {
            kind: CipherKind::Xor,
            key: "55aa33cc0ff099661234567890abcdef".to_string(),
            iv: String::new(),
        })
        .unwrap()
    }

    #[test]
    fn test_sends_encrypted_class_and_reads_ack() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut block = [0u8; 16];
            sock.read_exact(&mut block).unwrap();
            sock.write_all(b"ACK\n").unwrap();
            block
        });

        let config = OutboundConfig::new("arm", OutboundKind::Actuator, &addr);
        let mut link = ActuatorLink::new(&config, xor());
        link.connect().unwrap();
        assert_eq!(link.send_class(3).unwrap().as_deref(), Some("ACK"));

        let block = server.join().unwrap();
        let plain = xor().decrypt_block(&block).unwrap();
        assert_eq!(class_from_block(&plain).as_deref(), Some("3"));
    }

    #[test]
    fn test_missing_ack_is_not_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut block = [0u8; 16];
            sock.read_exact(&mut block).unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let mut config = OutboundConfig::new("arm", OutboundKind::Actuator, &addr);
        config.ack_timeout_ms = 50;
        let mut link = ActuatorLink::new(&config, xor());
        link.connect().unwrap();
        assert_eq!(link.send_class(0).unwrap(), None);
        assert!(link.is_connected());
        server.join().unwrap();
    }

    #[test]
    fn test_result_without_class_is_ignored() {
        let config = OutboundConfig::new("arm", OutboundKind::Actuator, "127.0.0.1:9");
        let mut link = ActuatorLink::new(&config, xor());
        let msg = OutboundMessage::Result {
            json: Vec::new(),
            movement_class: None,
            is_error: true,
            origin: Default::default(),
        };
        // Not connected, but nothing to send either
        assert!(link.deliver(&msg).is_ok());
    }
}
