//! Mutual-TLS HTTP transport for SOAP calls.
//!
//! The client certificate is presented during the handshake through a
//! preconfigured rustls `ClientConfig`; reqwest only sees the finished
//! configuration.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_util::sync::CancellationToken;

use crate::certificate::ClientCertificate;
use crate::config::{ClientConfig, ServerVerification, CONTENT_TYPE as SOAP_CONTENT_TYPE};
use crate::error::{CertificateError, NetworkError};

/// How often a cancellable call checks its token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Per-call limits.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the client-wide timeout for this call.
    pub timeout: Option<Duration>,
    /// Cancels the call when triggered.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Sends one SOAP request and returns the raw response body.
///
/// Implemented by [`HttpTransport`]; tests substitute their own.
pub trait SoapTransport: Send + Sync {
    fn post(
        &self,
        url: &str,
        soap_action: &str,
        body: &str,
        options: &CallOptions,
    ) -> Result<String, NetworkError>;
}

/// Builds a transport bound to one client certificate.
pub trait TransportFactory: Send + Sync {
    fn transport(
        &self,
        certificate: &ClientCertificate,
    ) -> Result<Arc<dyn SoapTransport>, CertificateError>;
}

/// Builds [`HttpTransport`]s from a [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct TlsClientFactory {
    config: ClientConfig,
}

impl TlsClientFactory {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Build a mutual-TLS transport presenting `certificate`.
    ///
    /// # Errors
    /// `CertificateError::Tls` if rustls rejects the key or chain, no trust
    /// roots could be loaded, or the HTTP client cannot be built.
    pub fn build(&self, certificate: &ClientCertificate) -> Result<HttpTransport, CertificateError> {
        let tls = self.rustls_config(certificate)?;
        let client = Client::builder()
            .use_preconfigured_tls(tls)
            .connect_timeout(self.config.timeout)
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent.as_str())
            .build()
            .map_err(|e| CertificateError::Tls(format!("failed to build HTTP client: {e}")))?;

        tracing::debug!(
            subject = %certificate.subject(),
            timeout_secs = self.config.timeout.as_secs(),
            "built mutual-TLS transport"
        );
        Ok(HttpTransport { client })
    }

    fn rustls_config(
        &self,
        certificate: &ClientCertificate,
    ) -> Result<rustls::ClientConfig, CertificateError> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| CertificateError::Tls(e.to_string()))?;

        let builder = match &self.config.server_verification {
            ServerVerification::SystemRoots => builder.with_root_certificates(system_roots()?),
            ServerVerification::TrustedRoots(ders) => {
                builder.with_root_certificates(trusted_roots(ders)?)
            }
            ServerVerification::DangerAcceptInvalidCerts => {
                tracing::warn!(
                    "server certificate verification is DISABLED; use only against test environments"
                );
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
            }
        };

        let chain: Vec<CertificateDer<'static>> = certificate
            .chain()
            .iter()
            .map(|der| CertificateDer::from(der.clone()))
            .collect();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certificate.private_key().to_vec()));

        builder
            .with_client_auth_cert(chain, key)
            .map_err(|e| CertificateError::Tls(format!("client certificate rejected: {e}")))
    }
}

impl TransportFactory for TlsClientFactory {
    fn transport(
        &self,
        certificate: &ClientCertificate,
    ) -> Result<Arc<dyn SoapTransport>, CertificateError> {
        Ok(Arc::new(self.build(certificate)?))
    }
}

fn system_roots() -> Result<RootCertStore, CertificateError> {
    let loaded = rustls_native_certs::load_native_certs();
    for error in &loaded.errors {
        tracing::debug!(%error, "skipping unreadable system certificate");
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    if added == 0 {
        return Err(CertificateError::Tls(
            "no usable certificates in the system trust store".to_string(),
        ));
    }
    tracing::trace!(added, ignored, "loaded system trust roots");
    Ok(roots)
}

fn trusted_roots(ders: &[Vec<u8>]) -> Result<RootCertStore, CertificateError> {
    let mut roots = RootCertStore::empty();
    for der in ders {
        roots
            .add(CertificateDer::from(der.clone()))
            .map_err(|e| CertificateError::Tls(format!("invalid trusted root: {e}")))?;
    }
    Ok(roots)
}

/// Accepts any server certificate but still checks handshake signatures.
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

/// Blocking HTTP transport with a client certificate baked in.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Wrap an already configured client. Mostly useful for plain-HTTP tests.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn send(
        client: &Client,
        url: &str,
        soap_action: &str,
        body: String,
        timeout: Option<Duration>,
    ) -> Result<String, NetworkError> {
        let mut request = client
            .post(url)
            .header(CONTENT_TYPE, HeaderValue::from_static(SOAP_CONTENT_TYPE))
            .header("SOAPAction", soap_action)
            .body(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().map_err(|e| request_error(url, e))?;
        let status = response.status();
        let text = response.text().map_err(|e| request_error(url, e))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), url, "service answered with an error status");
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

impl SoapTransport for HttpTransport {
    fn post(
        &self,
        url: &str,
        soap_action: &str,
        body: &str,
        options: &CallOptions,
    ) -> Result<String, NetworkError> {
        let Some(token) = options.cancel.clone() else {
            return Self::send(&self.client, url, soap_action, body.to_string(), options.timeout);
        };
        if token.is_cancelled() {
            return Err(NetworkError::Cancelled { url: url.to_string() });
        }

        // The blocking client cannot be interrupted, so the request runs on a
        // worker thread and is abandoned on cancellation.
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let worker_url = url.to_string();
        let action = soap_action.to_string();
        let payload = body.to_string();
        let timeout = options.timeout;
        thread::spawn(move || {
            let result = Self::send(&client, &worker_url, &action, payload, timeout);
            // Receiver is gone when the caller cancelled.
            let _ = tx.send(result);
        });

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(result) => return result,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(NetworkError::Client(
                        "request worker exited without a result".to_string(),
                    ));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
            if token.is_cancelled() {
                tracing::debug!(url, "request cancelled by caller");
                return Err(NetworkError::Cancelled { url: url.to_string() });
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(NetworkError::Timeout { url: url.to_string() });
            }
        }
    }
}

fn request_error(url: &str, source: reqwest::Error) -> NetworkError {
    if source.is_timeout() {
        NetworkError::Timeout { url: url.to_string() }
    } else {
        NetworkError::Request {
            url: url.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::test_support::generate;

    fn certificate() -> ClientCertificate {
        let (cert, key) = generate(2020, 2099);
        ClientCertificate::from_der(vec![cert], key).unwrap()
    }

    #[test]
    fn test_build_with_insecure_verifier() {
        let config = ClientConfig::builder()
            .danger_accept_invalid_server_certs()
            .build()
            .unwrap();
        let factory = TlsClientFactory::new(config);
        assert!(factory.build(&certificate()).is_ok());
    }

    #[test]
    fn test_build_with_system_roots() {
        let factory = TlsClientFactory::new(ClientConfig::default());
        // Hosts without a readable trust store report it instead of failing open.
        match factory.build(&certificate()) {
            Ok(_) => {}
            Err(CertificateError::Tls(message)) => assert!(message.contains("trust store")),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_build_rejects_garbage_trusted_root() {
        let config = ClientConfig::builder()
            .trusted_roots(vec![b"not a certificate".to_vec()])
            .build()
            .unwrap();
        let result = TlsClientFactory::new(config).build(&certificate());
        assert!(matches!(result, Err(CertificateError::Tls(_))));
    }

    #[test]
    fn test_pre_cancelled_call_never_sends() {
        let transport = HttpTransport::from_client(Client::new());
        let token = CancellationToken::new();
        token.cancel();
        let options = CallOptions::default().with_cancel(token);

        let result = transport.post("http://127.0.0.1:9/ws", "urn:action", "<x/>", &options);
        assert!(matches!(result, Err(NetworkError::Cancelled { .. })));
    }

    #[test]
    fn test_connection_refused_is_request_error() {
        let transport = HttpTransport::from_client(Client::new());
        let result = transport.post("http://127.0.0.1:9/ws", "urn:action", "<x/>", &CallOptions::default());
        assert!(matches!(result, Err(NetworkError::Request { .. })));
    }
}
