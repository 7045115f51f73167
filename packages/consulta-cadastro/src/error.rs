//! Error types for the consultation client.
//!
//! Uses the dual-error pattern: one closed enum per component so callers can
//! match on exactly what went wrong, and `ConsultaError` wrapping all of them
//! for library consumers that just want `?`.

use thiserror::Error;

/// Maximum number of payload bytes echoed in error messages.
const PAYLOAD_EXCERPT_LEN: usize = 200;

/// Taxpayer identifier (CNPJ) or query key rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Not exactly 14 digits after stripping punctuation.
    #[error("Invalid CNPJ '{input}': expected 14 digits, found {digits}")]
    MalformedLength { input: String, digits: usize },

    /// All 14 digits are the same (e.g. 00000000000000).
    #[error("Invalid CNPJ '{0}': all digits are identical")]
    AllDigitsIdentical(String),

    /// One of the two check digits does not match.
    #[error("Invalid CNPJ '{input}': check digits do not match (expected {expected})")]
    ChecksumMismatch { input: String, expected: String },

    /// State registration number (IE) is empty or not numeric.
    #[error("Invalid state registration '{0}': expected digits only")]
    MalformedRegistration(String),
}

/// Routing or client configuration problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The code is not one of the 27 federative units.
    #[error("Unknown UF code: '{0}'")]
    UnknownUf(String),

    /// The UF exists but has no endpoint for the selected environment.
    #[error("No CadConsultaCadastro endpoint for UF {uf} in {environment}")]
    UnknownJurisdiction { uf: String, environment: String },

    /// Invalid setting (timeout, environment name, ...).
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Client certificate missing, unreadable or outside its validity window.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// No certificate has been loaded into the store.
    #[error("No client certificate configured. Load a certificate before querying")]
    NotConfigured,

    /// PKCS#12 container could not be decoded with the given password.
    #[error("Failed to open PKCS#12 container (wrong password or invalid format): {0}")]
    BadPasswordOrFormat(String),

    /// Container holds no private key with a certificate chain.
    #[error("PKCS#12 container holds no certificate with a private key")]
    NoCertificateEntry,

    /// X.509 certificate could not be parsed.
    #[error("Invalid X.509 certificate: {0}")]
    InvalidCertificate(String),

    /// `not_after` is in the past.
    #[error("Certificate expired on {not_after}")]
    Expired { not_after: String },

    /// `not_before` is in the future.
    #[error("Certificate not valid before {not_before}")]
    NotYetValid { not_before: String },

    /// TLS configuration rejected the certificate or key.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Reading the certificate file failed.
    #[error("Failed to read certificate file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while talking to the remote service.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Connection, TLS handshake or body read failed.
    #[error("HTTP request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Service answered with a non-2xx status.
    #[error("HTTP {status} from {url}: {}", excerpt(.body))]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// Request did not complete within its deadline.
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// Caller cancelled the in-flight request.
    #[error("Request to {url} was cancelled")]
    Cancelled { url: String },

    /// HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl NetworkError {
    /// HTTP status code, when the service answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Malformed XML or missing mandatory elements.
///
/// Every variant keeps the offending payload so callers can log it without
/// re-fetching.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Payload is not well-formed XML.
    #[error("XML parsing failed: {message}")]
    Malformed { message: String, payload: String },

    /// SOAP body holds no `retConsCad` element.
    #[error("Missing result element <retConsCad> in response: {}", excerpt(.payload))]
    MissingResultElement { payload: String },

    /// No `infCons` element anywhere in the result.
    #[error("Missing element <infCons> in response: {}", excerpt(.payload))]
    MissingInfoElement { payload: String },

    /// Serializing a document failed.
    #[error("XML serialization failed: {0}")]
    Write(String),
}

impl ParseError {
    /// The raw payload that failed to parse, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&str> {
        match self {
            Self::Malformed { payload, .. }
            | Self::MissingResultElement { payload }
            | Self::MissingInfoElement { payload } => Some(payload),
            Self::Write(_) => None,
        }
    }

    pub(crate) fn malformed(err: &roxmltree::Error, payload: &str) -> Self {
        Self::Malformed {
            message: err.to_string(),
            payload: payload.to_string(),
        }
    }
}

/// Main error type for the consultation client.
#[derive(Debug, Error)]
pub enum ConsultaError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Result type alias for consultation operations.
pub type Result<T> = std::result::Result<T, ConsultaError>;

fn excerpt(payload: &str) -> String {
    let trimmed = payload.trim();
    if trimmed.len() <= PAYLOAD_EXCERPT_LEN {
        return trimmed.to_string();
    }
    let mut end = PAYLOAD_EXCERPT_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
