//! Pin-on-first-contact trust for the secret store's TLS endpoint.
//!
//! When no trust anchor has been configured, the authority connects once
//! without validating the chain, captures the two certificates the server
//! presents and installs them as the trust anchor for every later call.
//!
//! This is trust-on-first-use: whoever answers the first connection is
//! trusted. Operators must confirm the pinned chain out of band (the
//! bootstrap logs it at `warn` level).

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme};
use tracing::debug;

use crate::error::{PkiError, Result};

const DEFAULT_PORT: u16 = 443;

/// Number of certificates a valid endpoint presents: its leaf and one intermediate.
pub const EXPECTED_CHAIN_LENGTH: usize = 2;

/// A host and port to dial, normalized from an appliance URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Strips an `https://` scheme and any path; the port defaults to 443.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| PkiError::InvalidEndpoint {
            endpoint: url.to_string(),
            reason: reason.to_string(),
        };

        let rest = url.trim();
        let rest = rest.strip_prefix("https://").unwrap_or(rest);
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(invalid("missing host"));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && (!host.contains(':') || host.ends_with(']')) => {
                let port = port.parse().map_err(|_| invalid("port is not a number"))?;
                (host, port)
            }
            _ => (authority, DEFAULT_PORT),
        };

        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The certificate chain captured on first contact, leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedChain {
    endpoint: String,
    certificates: Vec<CertificateDer<'static>>,
}

impl PinnedChain {
    /// Keeps the chain a server presented, in the order presented.
    ///
    /// # Errors
    /// [`PkiError::InvalidEndpoint`] unless exactly two certificates were presented.
    pub fn from_peer_certificates(
        endpoint: impl Into<String>,
        certificates: Vec<CertificateDer<'static>>,
    ) -> Result<Self> {
        let endpoint = endpoint.into();
        if certificates.len() != EXPECTED_CHAIN_LENGTH {
            return Err(PkiError::InvalidEndpoint {
                reason: format!(
                    "expected {EXPECTED_CHAIN_LENGTH} certificates, got {}. Make sure hostname and port are correct",
                    certificates.len()
                ),
                endpoint,
            });
        }
        Ok(Self {
            endpoint,
            certificates,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    /// The chain as concatenated `CERTIFICATE` PEM blocks.
    pub fn to_pem(&self) -> String {
        let blocks = self
            .certificates
            .iter()
            .map(|cert| pem::Pem::new("CERTIFICATE", cert.as_ref().to_vec()))
            .collect::<Vec<_>>();
        pem::encode_many_config(
            &blocks,
            pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
        )
    }
}

/// Accepts any chain; handshake signatures are still verified against the
/// presented leaf.
#[derive(Debug)]
struct AcceptAnyChain {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyChain {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Dials `url` and pins the chain the server presents.
///
/// # Errors
/// * [`PkiError::BackendUnavailable`] if the endpoint cannot be reached or the handshake fails.
/// * [`PkiError::InvalidEndpoint`] if the URL is unusable or the chain is not two certificates long.
pub fn pin_on_first_contact(url: &str, timeout: Duration) -> Result<PinnedChain> {
    let endpoint = Endpoint::parse(url)?;
    let address = endpoint.to_string();
    let unavailable =
        |e: &dyn std::fmt::Display| PkiError::BackendUnavailable(format!("{address}: {e}"));

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = AcceptAnyChain {
        algorithms: provider.signature_verification_algorithms,
    };
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| unavailable(&e))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    let server_name =
        ServerName::try_from(endpoint.host.clone()).map_err(|e| PkiError::InvalidEndpoint {
            endpoint: url.to_string(),
            reason: e.to_string(),
        })?;
    let mut connection =
        ClientConnection::new(Arc::new(config), server_name).map_err(|e| unavailable(&e))?;

    let socket_address = address
        .to_socket_addrs()
        .map_err(|e| unavailable(&e))?
        .next()
        .ok_or_else(|| unavailable(&"no address resolved"))?;
    let mut socket =
        TcpStream::connect_timeout(&socket_address, timeout).map_err(|e| unavailable(&e))?;
    socket
        .set_read_timeout(Some(timeout))
        .and_then(|()| socket.set_write_timeout(Some(timeout)))
        .map_err(|e| unavailable(&e))?;

    debug!(endpoint = %address, "retrieving certificate chain");
    while connection.is_handshaking() {
        connection
            .complete_io(&mut socket)
            .map_err(|e| unavailable(&e))?;
    }

    let presented = connection
        .peer_certificates()
        .map(|certs| certs.iter().map(|cert| cert.clone().into_owned()).collect())
        .unwrap_or_default();
    PinnedChain::from_peer_certificates(address, presented)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(byte: u8) -> CertificateDer<'static> {
        CertificateDer::from(vec![0x30, 0x01, byte])
    }

    #[test]
    fn test_endpoint_normalization() {
        let cases = [
            ("https://conjur.example.com", "conjur.example.com", 443),
            ("https://conjur.example.com:8443/api", "conjur.example.com", 8443),
            ("conjur.example.com/", "conjur.example.com", 443),
            ("10.0.0.5:444", "10.0.0.5", 444),
            ("https://[::1]:8443", "::1", 8443),
        ];
        for (url, host, port) in cases {
            assert_eq!(
                Endpoint::parse(url).unwrap(),
                Endpoint {
                    host: host.to_string(),
                    port
                },
                "{url}"
            );
        }
        assert!(Endpoint::parse("https://").is_err());
        assert!(Endpoint::parse("host:http").is_err());
        assert_eq!(Endpoint::parse("[::1]:8443").unwrap().to_string(), "[::1]:8443");
    }

    #[test]
    fn test_single_certificate_is_invalid_endpoint() {
        let err = PinnedChain::from_peer_certificates("conjur:443", vec![cert(1)]).unwrap_err();
        assert!(matches!(err, PkiError::InvalidEndpoint { endpoint, .. } if endpoint == "conjur:443"));
    }

    #[test]
    fn test_three_certificates_is_invalid_endpoint() {
        let chain = vec![cert(1), cert(2), cert(3)];
        assert!(matches!(
            PinnedChain::from_peer_certificates("conjur:443", chain),
            Err(PkiError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_two_certificates_kept_in_order() {
        let chain = PinnedChain::from_peer_certificates("conjur:443", vec![cert(1), cert(2)]).unwrap();
        assert_eq!(chain.certificates(), &[cert(1), cert(2)]);

        let pem = chain.to_pem();
        let blocks = pem::parse_many(&pem).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].tag(), "CERTIFICATE");
        assert_eq!(blocks[0].contents(), [0x30, 0x01, 1]);
        assert_eq!(blocks[1].contents(), [0x30, 0x01, 2]);
    }
}
