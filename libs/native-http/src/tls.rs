//! TLS utilities for the connection layer.
//!
//! Provides cached loading of native root certificates (OS certificate store
//! lookups can be slow on some platforms) and the rustls configurations behind
//! each trust mode.

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::{Arc, OnceLock};

/// Cached native root certificates.
/// Always stores Ok; empty vec means no certs found (warned, not errored).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

/// Counter for test verification that the loader only runs once.
#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs_inner() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();

    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    let certs: Vec<CertificateDer<'static>> = result.certs;

    if certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = certs.len(), "loaded native root certificates");
    }

    certs
}

/// Get cached native root certificates.
///
/// The certificates are loaded lazily on first call and cached for all subsequent calls.
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE
        .get_or_init(load_native_certs_inner)
        .as_slice()
}

/// Get the crypto provider for TLS connections.
///
/// Uses the globally installed default provider when there is one, otherwise
/// a fresh aws-lc-rs provider (without installing it globally).
pub fn get_crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Build a rustls `ClientConfig` using the cached native root certificates.
///
/// # Errors
///
/// Returns an error if no valid root certificates are available:
/// - OS certificate store is empty
/// - All certificates failed to parse
pub fn native_roots_client_config() -> Result<ClientConfig, String> {
    let certs = native_root_certs();

    if certs.is_empty() {
        return Err("no native root CA certificates found in OS certificate store".to_owned());
    }

    let mut root_store = RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs.iter().cloned());

    if ignored > 0 {
        tracing::warn!(
            added = added,
            ignored = ignored,
            "some native root certificates could not be parsed"
        );
    }

    if added == 0 {
        return Err(format!(
            "no valid native root CA certificates parsed (found {}, all {} failed to parse)",
            certs.len(),
            ignored
        ));
    }

    ClientConfig::builder_with_provider(get_crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| format!("failed to set TLS protocol versions: {e}"))
        .map(|builder| {
            builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        })
}

/// `ClientConfig` that accepts any server certificate for any host name.
///
/// Handshake signatures are still checked so the session keys are bound to
/// the presented certificate.
///
/// # Errors
/// Returns an error if the provider supports no safe protocol version.
pub fn no_verification_client_config() -> Result<ClientConfig, String> {
    let provider = get_crypto_provider();
    let verifier = Arc::new(AcceptAnyServerCert {
        provider: Arc::clone(&provider),
    });
    custom_verifier_config(provider, verifier)
}

/// `ClientConfig` trusting only `roots`, with host name checks disabled.
///
/// # Errors
/// Returns an error if `roots` is empty or the verifier cannot be built.
pub fn pinned_client_config(roots: RootCertStore) -> Result<ClientConfig, String> {
    if roots.is_empty() {
        return Err("no pinned certificates available".to_owned());
    }
    let provider = get_crypto_provider();
    let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .build()
        .map_err(|e| format!("failed to build pinned certificate verifier: {e}"))?;
    custom_verifier_config(provider, Arc::new(PinnedServerCert { inner }))
}

fn custom_verifier_config(
    provider: Arc<CryptoProvider>,
    verifier: Arc<dyn ServerCertVerifier>,
) -> Result<ClientConfig, String> {
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| format!("failed to set TLS protocol versions: {e}"))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}

/// Verifier for the `nocheck` trust mode.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
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

/// Verifier for the `pinned` trust mode: the chain must lead to a pinned
/// root, the host name is not checked.
#[derive(Debug)]
struct PinnedServerCert {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for PinnedServerCert {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName
                | CertificateError::NotValidForNameContext { .. },
            )) => Ok(ServerCertVerified::assertion()),
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    /// Verifies "at most one load": `LOAD_COUNT` is shared across tests and
    /// the cache may already be initialized when this runs.
    #[test]
    fn test_native_roots_cached() {
        let initial_count = LOAD_COUNT.load(Ordering::SeqCst);

        let result1 = native_root_certs();
        let result2 = native_root_certs();

        let final_count = LOAD_COUNT.load(Ordering::SeqCst);
        assert!(
            final_count <= initial_count + 1,
            "loader should run at most once, but ran {} times since test start",
            final_count - initial_count
        );
        assert!(std::ptr::eq(result1, result2), "should return same slice");
    }

    #[test]
    fn test_native_roots_client_config_does_not_panic() {
        // CI containers may have no OS certs; either outcome is acceptable.
        if let Err(e) = native_roots_client_config() {
            tracing::debug!(error = %e, "native roots unavailable");
        }
    }

    #[test]
    fn test_no_verification_config_builds() {
        let config = no_verification_client_config().unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn test_pinned_requires_roots() {
        let err = pinned_client_config(RootCertStore::empty()).unwrap_err();
        assert!(err.contains("no pinned certificates"));
    }

    #[test]
    fn test_accept_any_offers_provider_schemes() {
        let provider = get_crypto_provider();
        let verifier = AcceptAnyServerCert {
            provider: Arc::clone(&provider),
        };
        assert!(!verifier.supported_verify_schemes().is_empty());

        let accepted = verifier.verify_server_cert(
            &CertificateDer::from(vec![0u8; 4]),
            &[],
            &ServerName::try_from("anything.invalid").unwrap(),
            &[],
            UnixTime::now(),
        );
        assert!(accepted.is_ok());
    }
}
