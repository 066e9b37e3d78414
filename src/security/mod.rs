//! TLS trust policies
//!
//! Four pluggable trust policies cover the transport's authentication
//! surface: auto-accepting self-signed certificates (development only),
//! credential callbacks for HTTP auth challenges, certificate pinning by
//! full DER comparison, and public-key pinning by extracted
//! `SubjectPublicKeyInfo`. Pinning policies install a custom rustls
//! verifier; the chain is validated against the expected domain unless
//! domain validation is switched off, in which case a basic X.509 policy
//! applies: chain, trust, and validity checks continue, only the
//! hostname binding is dropped.

use std::path::Path;
use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use x509_parser::prelude::parse_x509_certificate;

use crate::error::Error;

/// Username/password material returned by a credentials callback.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Callback invoked on an HTTP authentication challenge with the host and
/// the realm advertised by the server.
pub type CredentialsProvider =
    Arc<dyn Fn(&str, Option<&str>) -> Option<Credentials> + Send + Sync>;

/// TLS / authentication trust policy for a client or a single request.
#[derive(Clone)]
pub enum TrustPolicy {
    /// Accept any server certificate. Development only.
    AutoAcceptSelfSigned,
    /// Answer HTTP auth challenges with caller-supplied credentials.
    Credentials(CredentialsProvider),
    /// Trust only servers presenting one of the pinned certificates,
    /// compared by full DER equality.
    CertificatePinning {
        certificates: Vec<Vec<u8>>,
        validate_domain: bool,
    },
    /// Trust only servers whose leaf certificate carries one of the pinned
    /// `SubjectPublicKeyInfo` blobs.
    PublicKeyPinning {
        keys: Vec<Vec<u8>>,
        validate_domain: bool,
    },
}

impl std::fmt::Debug for TrustPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AutoAcceptSelfSigned => f.write_str("AutoAcceptSelfSigned"),
            Self::Credentials(_) => f.write_str("Credentials(..)"),
            Self::CertificatePinning { certificates, validate_domain } => f
                .debug_struct("CertificatePinning")
                .field("certificates", &certificates.len())
                .field("validate_domain", validate_domain)
                .finish(),
            Self::PublicKeyPinning { keys, validate_domain } => f
                .debug_struct("PublicKeyPinning")
                .field("keys", &keys.len())
                .field("validate_domain", validate_domain)
                .finish(),
        }
    }
}

impl TrustPolicy {
    /// Credentials-callback policy.
    pub fn credentials(
        provider: impl Fn(&str, Option<&str>) -> Option<Credentials> + Send + Sync + 'static,
    ) -> Self {
        Self::Credentials(Arc::new(provider))
    }

    /// Pin an explicit list of DER certificates.
    pub fn certificate_pinning(certificates: Vec<Vec<u8>>) -> Self {
        Self::CertificatePinning {
            certificates,
            validate_domain: true,
        }
    }

    /// Pin every certificate found in a directory (`.der`, `.cer`, `.crt`).
    pub fn certificate_pinning_from_dir(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let mut certificates = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase);
            if matches!(ext.as_deref(), Some("der") | Some("cer") | Some("crt")) {
                certificates.push(std::fs::read(&path)?);
            }
        }
        if certificates.is_empty() {
            return Err(Error::Tls(format!(
                "no certificates found in {}",
                dir.as_ref().display()
            )));
        }
        Ok(Self::CertificatePinning {
            certificates,
            validate_domain: true,
        })
    }

    /// Pin a list of `SubjectPublicKeyInfo` blobs.
    pub fn public_key_pinning(keys: Vec<Vec<u8>>) -> Self {
        Self::PublicKeyPinning {
            keys,
            validate_domain: true,
        }
    }

    /// Disable the domain-bound SSL policy; a basic X.509 policy is used
    /// instead, keeping chain validation but not the hostname binding.
    pub fn without_domain_validation(mut self) -> Self {
        match &mut self {
            Self::CertificatePinning { validate_domain, .. }
            | Self::PublicKeyPinning { validate_domain, .. } => *validate_domain = false,
            _ => {}
        }
        self
    }

    /// The credentials provider, when this policy carries one.
    pub(crate) fn credentials_provider(&self) -> Option<&CredentialsProvider> {
        match self {
            Self::Credentials(provider) => Some(provider),
            _ => None,
        }
    }

    /// Apply the policy to the engine builder.
    pub(crate) fn apply(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, Error> {
        match self {
            Self::AutoAcceptSelfSigned => Ok(builder.danger_accept_invalid_certs(true)),
            // Challenge handling happens in the pipeline, not at the TLS layer.
            Self::Credentials(_) => Ok(builder),
            Self::CertificatePinning { certificates, validate_domain } => {
                let config =
                    pinned_client_config(PinMode::FullDer(certificates.clone()), *validate_domain)?;
                Ok(builder.use_preconfigured_tls(config))
            }
            Self::PublicKeyPinning { keys, validate_domain } => {
                let config = pinned_client_config(PinMode::Spki(keys.clone()), *validate_domain)?;
                Ok(builder.use_preconfigured_tls(config))
            }
        }
    }
}

#[derive(Debug)]
enum PinMode {
    FullDer(Vec<Vec<u8>>),
    Spki(Vec<Vec<u8>>),
}

fn pinned_client_config(pins: PinMode, validate_domain: bool) -> Result<rustls::ClientConfig, Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = PinnedVerifier::new(pins, validate_domain, provider.clone())?;
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(config)
}

/// Verifier enforcing a pin match on top of webpki chain validation; the
/// hostname binding is enforced only while domain validation is on.
#[derive(Debug)]
struct PinnedVerifier {
    pins: PinMode,
    validate_domain: bool,
    webpki: Arc<WebPkiServerVerifier>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl PinnedVerifier {
    fn new(
        pins: PinMode,
        validate_domain: bool,
        provider: Arc<CryptoProvider>,
    ) -> Result<Self, Error> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let algorithms = provider.signature_verification_algorithms;
        let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| Error::Tls(e.to_string()))?;
        Ok(Self {
            pins,
            validate_domain,
            webpki,
            algorithms,
        })
    }

    fn pin_matches(&self, end_entity: &CertificateDer<'_>) -> Result<bool, rustls::Error> {
        match &self.pins {
            PinMode::FullDer(pins) => {
                Ok(pins.iter().any(|pin| pin.as_slice() == end_entity.as_ref()))
            }
            PinMode::Spki(pins) => {
                let (_, parsed) = parse_x509_certificate(end_entity.as_ref()).map_err(|_| {
                    rustls::Error::InvalidCertificate(rustls::CertificateError::BadEncoding)
                })?;
                let spki = parsed.tbs_certificate.subject_pki.raw;
                Ok(pins.iter().any(|pin| pin.as_slice() == spki))
            }
        }
    }
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if !self.pin_matches(end_entity)? {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ));
        }
        match self.webpki.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            // Basic X.509 policy: chain, trust, and validity checks still
            // apply, only the hostname binding is waived.
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::NotValidForName
                | rustls::CertificateError::NotValidForNameContext { .. },
            )) if !self.validate_domain => Ok(ServerCertVerified::assertion()),
            Err(err) => Err(err),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
