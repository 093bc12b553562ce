//! Process-wide TLS trust policy.
//!
//! A single [`TrustConfiguration`] is current at any time. Connections read a
//! snapshot when they are opened; [`TrustPolicy::apply`] swaps in a new one
//! (last writer wins). A failed apply leaves the previous configuration in place.

use crate::error::HttpError;
use crate::tls;
use arc_swap::ArcSwap;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::CertificateDer;
use rustls_pki_types::pem::PemObject;
use std::convert::Infallible;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

const CERT_EXTENSIONS: &[&str] = &["cer", "crt", "pem", "der"];

/// Server certificate trust mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrustMode {
    /// Operating system root store
    #[default]
    Default,
    /// Root store bundled with the connector (Mozilla roots via webpki)
    Legacy,
    /// Accept any certificate and host name
    NoCheck,
    /// Only certificates chaining to a caller-provided bundle
    Pinned,
}

impl TrustMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Legacy => "legacy",
            Self::NoCheck => "nocheck",
            Self::Pinned => "pinned",
        }
    }
}

impl fmt::Display for TrustMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown mode names fall back to [`TrustMode::Default`].
impl FromStr for TrustMode {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Self::Legacy,
            "nocheck" => Self::NoCheck,
            "pinned" => Self::Pinned,
            _ => Self::Default,
        })
    }
}

/// TLS setup used by the connector
#[derive(Clone)]
pub enum TlsSetup {
    /// Connector-provided webpki roots
    BuiltIn,
    /// Fully built rustls configuration
    Custom(Arc<ClientConfig>),
}

impl fmt::Debug for TlsSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn => f.write_str("BuiltIn"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Snapshot of the trust state read at connection-open time
#[derive(Debug, Clone)]
pub struct TrustConfiguration {
    pub mode: TrustMode,
    pub verifies_hostname: bool,
    pub tls: TlsSetup,
}

impl TrustConfiguration {
    fn legacy() -> Self {
        Self {
            mode: TrustMode::Legacy,
            verifies_hostname: true,
            tls: TlsSetup::BuiltIn,
        }
    }
}

/// Certificates used by [`TrustMode::Pinned`]
#[derive(Debug, Clone, Default)]
pub struct CertificateBundle {
    certs: Vec<CertificateDer<'static>>,
}

impl CertificateBundle {
    /// Load every `.cer`, `.crt`, `.pem` and `.der` file in `dir`.
    ///
    /// Each file may be PEM (one or more certificates) or raw DER. Files that
    /// cannot be read or decoded are skipped with a warning.
    ///
    /// # Errors
    /// Returns `HttpError::Io` if `dir` cannot be listed.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, HttpError> {
        let dir = dir.as_ref();
        let mut entries = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_cert_extension(path))
            .collect::<Vec<_>>();
        entries.sort();

        let mut certs = Vec::new();
        for path in entries {
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable certificate file");
                    continue;
                }
            };
            match decode_certs(&bytes) {
                Ok(found) => certs.extend(found),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable certificate file");
                }
            }
        }

        tracing::debug!(dir = %dir.display(), count = certs.len(), "loaded certificate bundle");
        Ok(Self { certs })
    }

    /// Parse one or more PEM certificates.
    ///
    /// # Errors
    /// Returns `HttpError::TrustConfiguration` if the PEM data is malformed.
    pub fn from_pem(pem: &[u8]) -> Result<Self, HttpError> {
        let certs = CertificateDer::pem_slice_iter(pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| HttpError::TrustConfiguration(format!("invalid PEM certificate: {e}")))?;
        Ok(Self { certs })
    }

    #[must_use]
    pub fn from_der(certs: Vec<CertificateDer<'static>>) -> Self {
        Self { certs }
    }

    #[must_use]
    pub fn certs(&self) -> &[CertificateDer<'static>] {
        &self.certs
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    fn root_store(&self) -> Result<RootCertStore, String> {
        if self.certs.is_empty() {
            return Err("certificate bundle is empty".to_owned());
        }
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(self.certs.iter().cloned());
        if ignored > 0 {
            tracing::warn!(added, ignored, "some pinned certificates could not be parsed");
        }
        if added == 0 {
            return Err(format!(
                "no valid certificates in bundle ({ignored} failed to parse)"
            ));
        }
        Ok(roots)
    }
}

fn has_cert_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| CERT_EXTENSIONS.iter().any(|c| ext.eq_ignore_ascii_case(c)))
}

fn decode_certs(bytes: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
    if bytes.windows(10).any(|w| w == b"-----BEGIN") {
        let certs = CertificateDer::pem_slice_iter(bytes)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        if certs.is_empty() {
            return Err("no certificate in PEM file".to_owned());
        }
        Ok(certs)
    } else if bytes.is_empty() {
        Err("empty file".to_owned())
    } else {
        Ok(vec![CertificateDer::from(bytes.to_vec())])
    }
}

/// Holder of the current [`TrustConfiguration`].
pub struct TrustPolicy {
    state: ArcSwap<TrustConfiguration>,
}

impl fmt::Debug for TrustPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustPolicy")
            .field("mode", &self.current().mode)
            .finish_non_exhaustive()
    }
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustPolicy {
    /// Start in [`TrustMode::Default`].
    ///
    /// Falls back to [`TrustMode::Legacy`] with a warning if the OS root
    /// store is unusable.
    #[must_use]
    pub fn new() -> Self {
        let initial = match build_configuration(TrustMode::Default, None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "native roots unavailable; starting in legacy trust mode");
                TrustConfiguration::legacy()
            }
        };
        Self {
            state: ArcSwap::from_pointee(initial),
        }
    }

    /// Policy shared by every transport in the process.
    #[must_use]
    pub fn shared() -> Arc<TrustPolicy> {
        static SHARED: OnceLock<Arc<TrustPolicy>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(TrustPolicy::new())))
    }

    /// Switch to `mode`; `bundle` is required for [`TrustMode::Pinned`] and
    /// ignored otherwise.
    ///
    /// # Errors
    /// Returns `HttpError::TrustConfiguration` if the configuration cannot be
    /// built. The previous configuration stays in effect.
    pub fn apply(
        &self,
        mode: TrustMode,
        bundle: Option<&CertificateBundle>,
    ) -> Result<(), HttpError> {
        match build_configuration(mode, bundle) {
            Ok(config) => {
                self.state.store(Arc::new(config));
                tracing::info!(mode = %mode, "trust mode applied");
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    mode = %mode,
                    current = %self.current().mode,
                    error = %e,
                    "failed to apply trust mode; keeping current configuration"
                );
                Err(HttpError::TrustConfiguration(e))
            }
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<TrustConfiguration> {
        self.state.load_full()
    }
}

fn build_configuration(
    mode: TrustMode,
    bundle: Option<&CertificateBundle>,
) -> Result<TrustConfiguration, String> {
    let (tls, verifies_hostname) = match mode {
        TrustMode::Default => (
            TlsSetup::Custom(Arc::new(tls::native_roots_client_config()?)),
            true,
        ),
        TrustMode::Legacy => (TlsSetup::BuiltIn, true),
        TrustMode::NoCheck => (
            TlsSetup::Custom(Arc::new(tls::no_verification_client_config()?)),
            false,
        ),
        TrustMode::Pinned => {
            let bundle =
                bundle.ok_or_else(|| "pinned mode requires a certificate bundle".to_owned())?;
            let roots = bundle.root_store()?;
            (
                TlsSetup::Custom(Arc::new(tls::pinned_client_config(roots)?)),
                false,
            )
        }
    };
    Ok(TrustConfiguration {
        mode,
        verifies_hostname,
        tls,
    })
}
