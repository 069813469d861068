//! TLS transport
//!
//! Servers are usually deployed with self-signed certificates, so chain
//! validation is replaced by an optional SHA-1 thumbprint pin: when a
//! thumbprint is configured, some certificate in the presented chain must
//! match it; otherwise every certificate is accepted.

use redis_route_core::{config::TlsConfig, RedisError, RedisResult};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

/// Run the TLS handshake over an open socket
pub(crate) async fn connect(
    tcp: TcpStream,
    host: &str,
    config: &TlsConfig,
) -> RedisResult<TlsStream<TcpStream>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let thumbprint = match config.certificate_thumbprint.as_deref() {
        Some(hex) => Some(parse_thumbprint(hex)?),
        None => None,
    };
    let verifier = ThumbprintVerifier {
        thumbprint,
        provider: provider.clone(),
    };

    let tls_config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RedisError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    let name = config.server_name.as_deref().unwrap_or(host).to_string();
    let server_name = ServerName::try_from(name)
        .map_err(|e| RedisError::Tls(format!("Invalid server name: {}", e)))?;

    debug!("TLS handshake with {}", host);
    TlsConnector::from(Arc::new(tls_config))
        .connect(server_name, tcp)
        .await
        .map_err(|e| RedisError::Tls(format!("Handshake with {} failed: {}", host, e)))
}

/// Decode a hex thumbprint, tolerating `:` and space separators
fn parse_thumbprint(hex: &str) -> RedisResult<Vec<u8>> {
    let digits: Vec<u8> = hex
        .bytes()
        .filter(|b| !matches!(b, b':' | b' '))
        .collect();
    if digits.len() != 40 {
        return Err(RedisError::Config(format!(
            "Certificate thumbprint must be 40 hex digits: {}",
            hex
        )));
    }

    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| RedisError::Config(format!("Invalid certificate thumbprint: {}", hex)))
        })
        .collect()
}

#[derive(Debug)]
struct ThumbprintVerifier {
    thumbprint: Option<Vec<u8>>,
    provider: Arc<CryptoProvider>,
}

impl ThumbprintVerifier {
    fn matches(&self, chain: &[&CertificateDer<'_>]) -> bool {
        let Some(expected) = &self.thumbprint else {
            return true;
        };
        chain
            .iter()
            .any(|cert| Sha1::digest(cert.as_ref()).as_slice() == expected.as_slice())
    }
}

impl ServerCertVerifier for ThumbprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain: Vec<&CertificateDer<'_>> =
            std::iter::once(end_entity).chain(intermediates.iter()).collect();
        if self.matches(&chain) {
            Ok(ServerCertVerified::assertion())
        } else {
            warn!("No certificate in the server chain matches the configured thumbprint");
            Err(rustls::Error::General(
                "certificate thumbprint mismatch".to_string(),
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(thumbprint: Option<Vec<u8>>) -> ThumbprintVerifier {
        ThumbprintVerifier {
            thumbprint,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    #[test]
    fn test_parse_thumbprint() {
        let parsed = parse_thumbprint("0A:1b:2C:3d:4E:5f:60:71:82:93:A4:B5:C6:D7:E8:F9:00:11:22:33").unwrap();
        assert_eq!(parsed.len(), 20);
        assert_eq!(parsed[0], 0x0a);
        assert_eq!(parsed[19], 0x33);

        assert!(parse_thumbprint("abcd").is_err());
        assert!(parse_thumbprint(&"zz".repeat(20)).is_err());
    }

    #[test]
    fn test_thumbprint_matches_any_certificate_in_chain() {
        let leaf = CertificateDer::from(b"leaf certificate".to_vec());
        let root = CertificateDer::from(b"root certificate".to_vec());
        let pinned = Sha1::digest(root.as_ref()).to_vec();

        assert!(verifier(Some(pinned)).matches(&[&leaf, &root]));
        assert!(!verifier(Some(vec![0u8; 20])).matches(&[&leaf, &root]));
        assert!(verifier(None).matches(&[&leaf]));
    }
}
