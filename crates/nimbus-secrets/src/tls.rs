//! TLS configuration for store adapters.
//!
//! Builds a `rustls::ClientConfig` via `builder_with_provider` →
//! `with_protocol_versions` → `with_root_certificates`/client auth, with a
//! development-only insecure opt-out guarded by a config flag pair checked
//! at construction time rather than a compile-time cfg.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rustls::crypto::ring::cipher_suite;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;

use nimbus_core::error::{NimbusError, Result};

/// Modern, allow-listed cipher suites: TLS 1.3 AEAD suites plus the TLS 1.2
/// ECDHE/AEAD suites that remain acceptable; nothing CBC-mode or RC4 ever
/// appears here. The list is offered in this order but final selection
/// among it is the remote server's to make.
fn allow_listed_cipher_suites() -> Vec<rustls::SupportedCipherSuite> {
    vec![
        cipher_suite::TLS13_AES_256_GCM_SHA384,
        cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
        cipher_suite::TLS13_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ]
}

fn modern_provider() -> CryptoProvider {
    let mut provider = rustls::crypto::ring::default_provider();
    provider.cipher_suites = allow_listed_cipher_suites();
    provider
}

/// Deployment-supplied TLS options for a store adapter's transport.
///
/// `dev_environment` and `allow_insecure` are independent: certificate
/// verification is skipped only when **both** are set, so a single
/// misconfigured flag can never silently disable verification in
/// production. `build()` rejects `allow_insecure` without
/// `dev_environment` as a `ConfigInvalid` rather than honoring half of the
/// opt-out.
#[derive(Clone, Default)]
pub struct TlsOptions {
    /// PEM-encoded custom CA certificate, base64-encoded.
    pub custom_ca_base64: Option<String>,
    /// PEM-encoded client certificate for mutual TLS, base64-encoded.
    pub client_cert_base64: Option<String>,
    /// PEM-encoded client private key for mutual TLS, base64-encoded.
    pub client_key_base64: Option<String>,
    /// Set by the deployment when running in a non-production environment.
    pub dev_environment: bool,
    /// Explicit request to skip certificate verification. Honored only in
    /// combination with `dev_environment`.
    pub allow_insecure: bool,
}

impl TlsOptions {
    /// Build a `rustls::ClientConfig` from these options, validating eagerly:
    /// a bad combination of flags is a `ConfigInvalid` at construction, never
    /// a surprise at connect-time.
    pub fn build(&self) -> Result<Arc<rustls::ClientConfig>> {
        if self.allow_insecure && !self.dev_environment {
            return Err(NimbusError::config_invalid(
                "allow_insecure requires dev_environment to also be set; refusing to disable \
                 certificate verification outside a development environment",
            ));
        }
        match (&self.client_cert_base64, &self.client_key_base64) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(NimbusError::config_invalid(
                    "mutual TLS requires both a client certificate and a client key",
                ));
            }
            _ => {}
        }

        let builder = rustls::ClientConfig::builder_with_provider(Arc::new(modern_provider()))
            .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
            .map_err(|e| NimbusError::config_invalid(format!("unsupported TLS protocol versions: {e}")))?;

        if self.allow_insecure && self.dev_environment {
            tracing::warn!(
                "TLS certificate verification is DISABLED (dev_environment=true, \
                 allow_insecure=true) — this configuration must never reach production"
            );
            let config = builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerifier::new()))
                .with_no_client_auth();
            return Ok(Arc::new(config));
        }

        let roots = self.root_cert_store()?;
        let config = match (&self.client_cert_base64, &self.client_key_base64) {
            (Some(cert_b64), Some(key_b64)) => {
                let certs = decode_certs(cert_b64)?;
                let key = decode_private_key(key_b64)?;
                builder
                    .with_root_certificates(roots)
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| NimbusError::config_invalid(format!("invalid client certificate/key: {e}")))?
            }
            _ => builder.with_root_certificates(roots).with_no_client_auth(),
        };

        Ok(Arc::new(config))
    }

    fn root_cert_store(&self) -> Result<RootCertStore> {
        let mut store = RootCertStore::empty();
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(ca_b64) = &self.custom_ca_base64 {
            for cert in decode_certs(ca_b64)? {
                store
                    .add(cert)
                    .map_err(|e| NimbusError::config_invalid(format!("invalid custom CA certificate: {e}")))?;
            }
        }
        Ok(store)
    }
}

fn decode_certs(pem_base64: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem = BASE64
        .decode(pem_base64.trim())
        .map_err(|_| NimbusError::config_invalid("certificate is not valid base64"))?;
    rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| NimbusError::config_invalid("malformed PEM certificate"))
}

fn decode_private_key(pem_base64: &str) -> Result<PrivateKeyDer<'static>> {
    let pem = BASE64
        .decode(pem_base64.trim())
        .map_err(|_| NimbusError::config_invalid("private key is not valid base64"))?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|_| NimbusError::config_invalid("malformed PEM private key"))?
        .ok_or_else(|| NimbusError::config_invalid("no private key found in PEM input"))
}

/// A certificate verifier that accepts anything, gated behind the
/// `dev_environment && allow_insecure` pair checked in [`TlsOptions::build`].
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier {
        provider: rustls::crypto::CryptoProvider,
    }

    impl NoVerifier {
        pub fn new() -> Self {
            Self {
                provider: super::modern_provider(),
            }
        }
    }

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.provider.signature_verification_algorithms.supported_schemes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_verifying_config() {
        let options = TlsOptions::default();
        let config = options.build().unwrap();
        assert!(!config.crypto_provider.cipher_suites.is_empty());
    }

    #[test]
    fn allow_insecure_without_dev_environment_is_rejected() {
        let options = TlsOptions {
            allow_insecure: true,
            dev_environment: false,
            ..Default::default()
        };
        let err = options.build().unwrap_err();
        assert!(matches!(err, NimbusError::ConfigInvalid { .. }));
    }

    #[test]
    fn both_flags_together_build_a_non_verifying_config() {
        let options = TlsOptions {
            allow_insecure: true,
            dev_environment: true,
            ..Default::default()
        };
        assert!(options.build().is_ok());
    }

    #[test]
    fn dev_environment_alone_still_verifies() {
        let options = TlsOptions {
            allow_insecure: false,
            dev_environment: true,
            ..Default::default()
        };
        assert!(options.build().is_ok());
    }

    #[test]
    fn client_cert_without_key_is_rejected() {
        let options = TlsOptions {
            client_cert_base64: Some("deadbeef".into()),
            ..Default::default()
        };
        let err = options.build().unwrap_err();
        assert!(matches!(err, NimbusError::ConfigInvalid { .. }));
    }

    #[test]
    fn malformed_custom_ca_is_rejected_at_construction() {
        let options = TlsOptions {
            custom_ca_base64: Some("not-base64!!!".into()),
            ..Default::default()
        };
        assert!(options.build().is_err());
    }
}
