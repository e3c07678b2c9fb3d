//! TLS configuration for session transports.
//!
//! Native root certificates are loaded once and cached to avoid repeated OS
//! certificate store lookups (which can be slow on some platforms).

use crate::config::TlsRootConfig;
use crate::error::HttpError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::{Arc, OnceLock};

/// Cached native root certificates.
/// Always stores Ok; empty vec means no certs found (warned, not errored).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs_inner() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }

    result.certs
}

/// Get cached native root certificates (may be empty).
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE
        .get_or_init(load_native_certs_inner)
        .as_slice()
}

/// Get the crypto provider for TLS connections.
///
/// Uses the globally installed default when there is one, otherwise an
/// aws-lc-rs provider that is not installed globally.
pub fn get_crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn root_store(roots: TlsRootConfig) -> Result<RootCertStore, HttpError> {
    match roots {
        TlsRootConfig::WebPki => Ok(webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect()),
        TlsRootConfig::Native => {
            let certs = native_root_certs();
            if certs.is_empty() {
                return Err(HttpError::Tls(
                    "no native root CA certificates found in OS certificate store".into(),
                ));
            }

            let mut store = RootCertStore::empty();
            let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
            if ignored > 0 {
                tracing::warn!(
                    added = added,
                    ignored = ignored,
                    "some native root certificates could not be parsed"
                );
            }
            if added == 0 {
                return Err(HttpError::Tls(
                    format!(
                        "no valid native root CA certificates parsed (found {}, all {} failed to parse)",
                        certs.len(),
                        ignored
                    )
                    .into(),
                ));
            }
            Ok(store)
        }
    }
}

/// Build a rustls `ClientConfig` for a session transport.
///
/// With `verify == false` every server certificate is accepted; handshake
/// signatures are still checked so the session key stays bound to the
/// presented certificate. ALPN is left empty; the HTTPS connector fills it in.
///
/// # Errors
///
/// Returns `HttpError::Tls` if no valid root certificates are available for
/// `TlsRootConfig::Native`, or the provider rejects the protocol versions.
pub fn client_config(roots: TlsRootConfig, verify: bool) -> Result<rustls::ClientConfig, HttpError> {
    let provider = get_crypto_provider();
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?;

    let config = if verify {
        builder
            .with_root_certificates(root_store(roots)?)
            .with_no_client_auth()
    } else {
        tracing::warn!("TLS certificate verification disabled for this session");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    };

    Ok(config)
}

/// Certificate verifier used when verification is turned off
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

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
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
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
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    /// Verifies "at most one load": `LOAD_COUNT` is shared by every test in
    /// the binary, so the cache may already be warm when this runs.
    #[test]
    fn test_native_roots_cached() {
        let initial_count = LOAD_COUNT.load(Ordering::SeqCst);

        let result1 = native_root_certs();
        let result2 = native_root_certs();

        let final_count = LOAD_COUNT.load(Ordering::SeqCst);
        assert!(final_count <= initial_count + 1);
        assert!(std::ptr::eq(result1, result2), "should return same slice");
    }

    #[test]
    fn test_webpki_client_config() {
        let config = client_config(TlsRootConfig::WebPki, true).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_unverified_client_config() {
        let config = client_config(TlsRootConfig::WebPki, false).unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_accept_any_certificate() {
        let verifier = AcceptAnyCertificate(get_crypto_provider());
        let name = ServerName::try_from("example.com").unwrap();
        let result = verifier.verify_server_cert(
            &CertificateDer::from(vec![0u8; 4]),
            &[],
            &name,
            &[],
            UnixTime::now(),
        );
        assert!(result.is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }

    #[test]
    fn test_native_client_config_does_not_panic() {
        // CI containers may not have OS certs; either outcome is fine
        let result = client_config(TlsRootConfig::Native, true);
        if let Err(e) = &result {
            tracing::debug!(error = %e, "native roots unavailable");
        }
    }
}
