//! Upstream TLS client configuration.
//!
//! Two client configs exist side by side: one verifying certificates
//! against the webpki roots, and one accepting any certificate for routes
//! that opt out with `insecure_skip_verify`. The choice is made per request,
//! never globally.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

/// Which certificate policy to apply when contacting an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsPolicy {
    #[default]
    Verify,
    SkipVerify,
}

impl TlsPolicy {
    pub fn from_skip_verify(skip: bool) -> Self {
        if skip {
            TlsPolicy::SkipVerify
        } else {
            TlsPolicy::Verify
        }
    }
}

/// Crypto provider used for every upstream connection.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client config that verifies upstream certificates.
pub fn verified_config(provider: Arc<CryptoProvider>) -> Result<ClientConfig, rustls::Error> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Ok(ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Client config that accepts any upstream certificate.
pub fn insecure_config(provider: Arc<CryptoProvider>) -> Result<ClientConfig, rustls::Error> {
    let verifier = Arc::new(AcceptAnyCertificate {
        provider: provider.clone(),
    });

    Ok(ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth())
}

/// Skips chain and hostname checks but still checks handshake signatures,
/// so the peer must hold the key for the certificate it presents.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
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
        verify_tls13_signature(
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

    #[test]
    fn both_configs_build() {
        let provider = crypto_provider();
        assert!(verified_config(provider.clone()).is_ok());
        assert!(insecure_config(provider).is_ok());
    }

    #[test]
    fn insecure_verifier_accepts_any_certificate() {
        let verifier = AcceptAnyCertificate {
            provider: crypto_provider(),
        };
        let cert = CertificateDer::from(vec![0u8; 16]);
        let name = ServerName::try_from("upstream.invalid").unwrap();

        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[test]
    fn policy_from_flag() {
        assert_eq!(TlsPolicy::from_skip_verify(true), TlsPolicy::SkipVerify);
        assert_eq!(TlsPolicy::from_skip_verify(false), TlsPolicy::Verify);
    }
}
