//! PKCS#12 client certificate loading and validation.
//!
//! A loaded [`ClientCertificate`] is immutable. The [`CertificateStore`]
//! holds at most one at a time and replaces it wholesale; callers that took
//! an `Arc` keep using their copy without locking.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use p12_keystore::{KeyStore, KeyStoreEntry};
use parking_lot::RwLock;
use x509_parser::prelude::{FromDer, X509Certificate};
use zeroize::Zeroizing;

use crate::error::CertificateError;

/// Client certificate with its private key, ready for mutual TLS.
///
/// `Debug` never prints the key; the key bytes are zeroized on drop.
pub struct ClientCertificate {
    subject: String,
    issuer: String,
    serial: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    /// DER certificates, leaf first.
    chain: Vec<Vec<u8>>,
    /// PKCS#8 DER private key.
    key: Zeroizing<Vec<u8>>,
}

impl ClientCertificate {
    /// Build from a DER chain (leaf first) and a PKCS#8 DER private key.
    ///
    /// The validity window is read but not checked; see
    /// [`check_validity`](Self::check_validity).
    ///
    /// # Errors
    /// * `NoCertificateEntry` if the chain is empty
    /// * `InvalidCertificate` if the leaf is not valid X.509
    pub fn from_der(chain: Vec<Vec<u8>>, key: Vec<u8>) -> Result<Self, CertificateError> {
        let key = Zeroizing::new(key);
        let leaf = chain.first().ok_or(CertificateError::NoCertificateEntry)?;
        let (_, parsed) = X509Certificate::from_der(leaf)
            .map_err(|e| CertificateError::InvalidCertificate(e.to_string()))?;

        let validity = parsed.validity();
        let not_before = timestamp(validity.not_before.timestamp())?;
        let not_after = timestamp(validity.not_after.timestamp())?;

        Ok(Self {
            subject: parsed.subject().to_string(),
            issuer: parsed.issuer().to_string(),
            serial: parsed.raw_serial_as_string(),
            not_before,
            not_after,
            chain,
            key,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number as colon-separated hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// DER certificates, leaf first.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    /// PKCS#8 DER private key. Do not log.
    pub fn private_key(&self) -> &[u8] {
        &self.key
    }

    /// Fail unless `not_before <= now <= not_after`.
    pub fn check_validity(&self, now: DateTime<Utc>) -> Result<(), CertificateError> {
        check_validity(self.not_before, self.not_after, now)
    }

    /// Whole days left until `not_after`; negative once expired.
    #[must_use]
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }

    /// Multi-line description: subject, issuer, serial and validity.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Subject: {}\nIssuer: {}\nSerial: {}\nValid from: {}\nValid until: {}",
            self.subject,
            self.issuer,
            self.serial,
            self.not_before.format("%Y-%m-%d %H:%M:%S UTC"),
            self.not_after.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Check that `now` falls inside `[not_before, not_after]`.
///
/// # Examples
/// ```
/// use chrono::{TimeZone, Utc};
/// use consulta_cadastro::certificate::check_validity;
///
/// let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let until = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
///
/// assert!(check_validity(from, until, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()).is_ok());
/// assert!(check_validity(from, until, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()).is_err());
/// ```
pub fn check_validity(
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), CertificateError> {
    if now < not_before {
        return Err(CertificateError::NotYetValid {
            not_before: not_before.to_rfc3339(),
        });
    }
    if now > not_after {
        return Err(CertificateError::Expired {
            not_after: not_after.to_rfc3339(),
        });
    }
    Ok(())
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, CertificateError> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        CertificateError::InvalidCertificate(format!("validity timestamp {secs} out of range"))
    })
}

/// Decode a PKCS#12 container into a certificate, without the time check.
///
/// The first entry holding a private key with a certificate chain is used.
pub fn decode_pkcs12(bytes: &[u8], password: &str) -> Result<ClientCertificate, CertificateError> {
    let keystore = KeyStore::from_pkcs12(bytes, password)
        .map_err(|e| CertificateError::BadPasswordOrFormat(e.to_string()))?;

    let (alias, chain) = keystore
        .entries()
        .find_map(|(alias, entry)| match entry {
            KeyStoreEntry::PrivateKeyChain(chain) if !chain.chain().is_empty() => {
                Some((alias, chain))
            }
            _ => None,
        })
        .ok_or(CertificateError::NoCertificateEntry)?;

    tracing::debug!(alias = %alias, chain_len = chain.chain().len(), "found private key entry");

    let der_chain = chain
        .chain()
        .iter()
        .map(|cert| cert.as_der().to_vec())
        .collect();
    ClientCertificate::from_der(der_chain, chain.key().to_vec())
}

/// Holder for the process's client certificate.
///
/// Mutators take the write lock; [`current`](Self::current) hands out an
/// `Arc` so in-flight calls never observe a half-replaced certificate.
#[derive(Debug, Default)]
pub struct CertificateStore {
    current: RwLock<Option<Arc<ClientCertificate>>>,
}

impl CertificateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a PKCS#12 container and install it.
    ///
    /// # Errors
    /// * `BadPasswordOrFormat` if the container cannot be decoded
    /// * `NoCertificateEntry` if it holds no private key with a certificate
    /// * `InvalidCertificate` if the leaf is not valid X.509
    /// * `Expired` / `NotYetValid` if outside the validity window
    ///
    /// On error the previously installed certificate, if any, is kept.
    pub fn load(&self, bytes: &[u8], password: &str) -> Result<Arc<ClientCertificate>, CertificateError> {
        let certificate = decode_pkcs12(bytes, password)?;
        self.replace(certificate)
    }

    /// Read a PKCS#12 file and [`load`](Self::load) it.
    pub fn load_file(
        &self,
        path: impl AsRef<Path>,
        password: &str,
    ) -> Result<Arc<ClientCertificate>, CertificateError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| CertificateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loading client certificate");
        self.load(&bytes, password)
    }

    /// Validate and install an already-decoded certificate.
    pub fn replace(
        &self,
        certificate: ClientCertificate,
    ) -> Result<Arc<ClientCertificate>, CertificateError> {
        certificate.check_validity(Utc::now())?;
        let certificate = Arc::new(certificate);
        *self.current.write() = Some(Arc::clone(&certificate));
        tracing::info!(
            subject = %certificate.subject(),
            not_after = %certificate.not_after(),
            "client certificate installed"
        );
        Ok(certificate)
    }

    /// Discard the installed certificate.
    pub fn clear(&self) {
        if self.current.write().take().is_some() {
            tracing::debug!("client certificate cleared");
        }
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    #[must_use]
    pub fn current(&self) -> Option<Arc<ClientCertificate>> {
        self.current.read().clone()
    }
}
