//! Mutual TLS for stream and broker links
//!
//! Both sides present a certificate signed by the configured CA. With
//! `insecure = true` the client still performs the full handshake and
//! verifies the chain, but tolerates a certificate whose subject does not
//! match the name it dialled (self-signed lab certificates issued for the
//! wrong host).

use crate::config::TlsConfig;
use crate::error::{Error, Result, TransportError};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{
    CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore,
    ServerConfig, ServerConnection, SignatureScheme, StreamOwned,
};
use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

/// TLS-wrapped client socket
pub type TlsClientStream = StreamOwned<ClientConnection, TcpStream>;

/// TLS-wrapped accepted socket
pub type TlsServerStream = StreamOwned<ServerConnection, TcpStream>;

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("Failed to open {}: {}", path.display(), e)))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Bad certificate in {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates in {}", path.display())));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("Failed to open {}: {}", path.display(), e)))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::Tls(format!("Bad key in {}: {}", path.display(), e)))?
        .ok_or_else(|| Error::Tls(format!("No private key in {}", path.display())))
}

fn load_roots(path: &Path) -> Result<Arc<RootCertStore>> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert)?;
    }
    Ok(Arc::new(roots))
}

/// Chain verification that ignores subject-name mismatch only
#[derive(Debug)]
struct NameTolerantVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for NameTolerantVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                log::debug!("Accepting certificate not valid for {:?}", server_name);
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Build a client config presenting our certificate to the server
pub fn client_config(tls: &TlsConfig) -> Result<Arc<ClientConfig>> {
    let roots = load_roots(&tls.ca_cert)?;
    let certs = load_certs(&tls.cert)?;
    let key = load_key(&tls.key)?;

    let config = if tls.insecure {
        log::warn!("TLS peer-name verification disabled");
        let inner = WebPkiServerVerifier::builder(roots)
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build verifier: {}", e)))?;
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NameTolerantVerifier { inner }))
            .with_client_auth_cert(certs, key)?
    } else {
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(certs, key)?
    };
    Ok(Arc::new(config))
}

/// Build a server config that requires a client certificate
pub fn server_config(tls: &TlsConfig) -> Result<Arc<ServerConfig>> {
    let roots = load_roots(&tls.ca_cert)?;
    let certs = load_certs(&tls.cert)?;
    let key = load_key(&tls.key)?;

    let verifier = WebPkiClientVerifier::builder(roots)
        .build()
        .map_err(|e| Error::Tls(format!("Failed to build client verifier: {}", e)))?;
    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Host part of `host:port`, brackets stripped for IPv6 literals
pub fn host_of(address: &str) -> &str {
    let host = address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(address);
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Run the client handshake to completion on a connected socket
pub fn connect(
    mut sock: TcpStream,
    config: Arc<ClientConfig>,
    server_name: &str,
) -> std::result::Result<TlsClientStream, TransportError> {
    let name = ServerName::try_from(server_name.to_string())
        .map_err(|e| TransportError::Handshake(format!("invalid server name {:?}: {}", server_name, e)))?;
    let mut conn = ClientConnection::new(config, name)
        .map_err(|e| TransportError::Handshake(e.to_string()))?;
    while conn.is_handshaking() {
        conn.complete_io(&mut sock)
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
    }
    Ok(StreamOwned::new(conn, sock))
}

/// Run the server handshake to completion on an accepted socket
pub fn accept(
    mut sock: TcpStream,
    config: Arc<ServerConfig>,
) -> std::result::Result<TlsServerStream, TransportError> {
    let mut conn =
        ServerConnection::new(config).map_err(|e| TransportError::Handshake(e.to_string()))?;
    while conn.is_handshaking() {
        conn.complete_io(&mut sock)
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
    }
    Ok(StreamOwned::new(conn, sock))
}

/// Throwaway certificate authority for loopback tests
#[cfg(test)]
pub(crate) mod testing {
    use crate::config::TlsConfig;
    use rcgen::{
        BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    };
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// CA plus a server and a client certificate, written as PEM files
    pub struct TestPki {
        _dir: TempDir,
        ca: PathBuf,
        server_cert: PathBuf,
        server_key: PathBuf,
        client_cert: PathBuf,
        client_key: PathBuf,
    }

    fn write(dir: &Path, name: &str, pem: String) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, pem).unwrap();
        path
    }

    impl TestPki {
        /// Server certificate is issued for `localhost`
        pub fn generate(label: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();

            let ca_key = KeyPair::generate().unwrap();
            let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
            ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            ca_params
                .distinguished_name
                .push(DnType::CommonName, format!("{} ca", label));
            let ca_cert = ca_params.self_signed(&ca_key).unwrap();

            let server_key = KeyPair::generate().unwrap();
            let mut server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
            server_params
                .distinguished_name
                .push(DnType::CommonName, format!("{} server", label));
            server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
            let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key).unwrap();

            let client_key = KeyPair::generate().unwrap();
            let mut client_params = CertificateParams::new(vec!["setu-client".to_string()]).unwrap();
            client_params
                .distinguished_name
                .push(DnType::CommonName, format!("{} client", label));
            client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
            let client_cert = client_params.signed_by(&client_key, &ca_cert, &ca_key).unwrap();

            let path = dir.path();
            Self {
                ca: write(path, "ca.pem", ca_cert.pem()),
                server_cert: write(path, "server.pem", server_cert.pem()),
                server_key: write(path, "server.key", server_key.serialize_pem()),
                client_cert: write(path, "client.pem", client_cert.pem()),
                client_key: write(path, "client.key", client_key.serialize_pem()),
                _dir: dir,
            }
        }

        pub fn ca(&self) -> &Path {
            &self.ca
        }

        pub fn server(&self) -> TlsConfig {
            TlsConfig {
                ca_cert: self.ca.clone(),
                cert: self.server_cert.clone(),
                key: self.server_key.clone(),
                insecure: false,
                server_name: None,
            }
        }

        pub fn client(&self, insecure: bool) -> TlsConfig {
            TlsConfig {
                ca_cert: self.ca.clone(),
                cert: self.client_cert.clone(),
                key: self.client_key.clone(),
                insecure,
                server_name: None,
            }
        }
    }
}
