//! One-call orchestration: validate, route, request, parse.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::certificate::{CertificateStore, ClientCertificate};
use crate::cnpj;
use crate::codec;
use crate::config::{ClientConfig, SOAP_ACTION};
use crate::endpoints::EndpointRegistry;
use crate::error::{CertificateError, Result};
use crate::parser;
use crate::tls::{CallOptions, SoapTransport, TlsClientFactory, TransportFactory};
use crate::types::{ConsultaRequest, ConsultaResponse, QueryKey, Uf};
use crate::xml::XmlDocument;

/// Transport built for one certificate, kept while that certificate is current.
struct CachedTransport {
    certificate: Arc<ClientCertificate>,
    transport: Arc<dyn SoapTransport>,
}

/// Client for the SEFAZ CadConsultaCadastro4 service.
///
/// Cheap to share behind an `Arc`: the endpoint registry and configuration
/// are immutable, and the certificate is read from the shared store on each
/// call.
pub struct ConsultaCadastroClient {
    config: ClientConfig,
    registry: EndpointRegistry,
    certificates: Arc<CertificateStore>,
    factory: Box<dyn TransportFactory>,
    transport: Mutex<Option<CachedTransport>>,
}

impl ConsultaCadastroClient {
    /// Client over the built-in SEFAZ endpoint table with a mutual-TLS transport.
    #[must_use]
    pub fn new(config: ClientConfig, certificates: Arc<CertificateStore>) -> Self {
        let factory = TlsClientFactory::new(config.clone());
        Self::with_parts(config, EndpointRegistry::default(), certificates, Box::new(factory))
    }

    /// Client with an injected registry and transport factory.
    #[must_use]
    pub fn with_parts(
        config: ClientConfig,
        registry: EndpointRegistry,
        certificates: Arc<CertificateStore>,
        factory: Box<dyn TransportFactory>,
    ) -> Self {
        Self {
            config,
            registry,
            certificates,
            factory,
            transport: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn certificates(&self) -> &Arc<CertificateStore> {
        &self.certificates
    }

    /// Query the registry of `uf` by CNPJ.
    ///
    /// # Arguments
    /// * `uf` - UF whose registry is queried
    /// * `raw_cnpj` - CNPJ, with or without punctuation
    ///
    /// # Errors
    /// Any [`ConsultaError`](crate::error::ConsultaError) variant; validation,
    /// routing and certificate problems are reported before any network I/O.
    pub fn consultar(&self, uf: Uf, raw_cnpj: &str) -> Result<ConsultaResponse> {
        tracing::debug!(phase = "validating", uf = %uf, "consultation started");
        let cnpj = cnpj::normalize(raw_cnpj)?;
        self.execute(&ConsultaRequest::by_cnpj(uf, cnpj), &CallOptions::default())
    }

    /// Query the registry of `uf` by state registration number (IE).
    pub fn consultar_por_ie(&self, uf: Uf, raw_ie: &str) -> Result<ConsultaResponse> {
        tracing::debug!(phase = "validating", uf = %uf, "consultation by IE started");
        let ie = cnpj::normalize_ie(raw_ie)?;
        self.execute(&ConsultaRequest::by_ie(uf, ie), &CallOptions::default())
    }

    /// Run one consultation with per-call limits.
    ///
    /// No retry is attempted; the first failure is returned.
    pub fn execute(
        &self,
        request: &ConsultaRequest,
        options: &CallOptions,
    ) -> Result<ConsultaResponse> {
        let uf = request.uf;
        let environment = self.config.environment;

        let key = match &request.key {
            QueryKey::Cnpj(cnpj) => QueryKey::Cnpj(cnpj.clone()),
            QueryKey::Ie(ie) => QueryKey::Ie(cnpj::normalize_ie(ie)?),
        };

        tracing::debug!(phase = "routing", uf = %uf, environment = %environment, "resolving endpoint");
        let url = self.registry.require(uf, environment)?;

        tracing::debug!(phase = "requesting", uf = %uf, url, "sending request");
        let certificate = self
            .certificates
            .current()
            .ok_or(CertificateError::NotConfigured)?;
        certificate.check_validity(Utc::now())?;
        let transport = self.transport_for(&certificate)?;

        let document = codec::build_for_key(uf, &key)?;
        let envelope = codec::wrap_envelope(&document, uf)?;
        tracing::trace!(request = %envelope, "SOAP request");

        let body = transport.post(url, SOAP_ACTION, envelope.as_str(), options)?;
        tracing::trace!(response = %body, "SOAP response");

        tracing::debug!(phase = "parsing", uf = %uf, bytes = body.len(), "parsing response");
        let result = codec::unwrap_envelope(&XmlDocument::new(body))?;
        let response = parser::parse(&result)?;

        tracing::debug!(
            phase = "done",
            uf = %uf,
            status_code = %response.status_code,
            records = response.records.len(),
            "consultation finished"
        );
        Ok(response)
    }

    /// Reuse the cached transport while the store still holds the same
    /// certificate; rebuild it otherwise.
    fn transport_for(
        &self,
        certificate: &Arc<ClientCertificate>,
    ) -> std::result::Result<Arc<dyn SoapTransport>, CertificateError> {
        if let Some(entry) = self.transport.lock().as_ref() {
            if Arc::ptr_eq(&entry.certificate, certificate) {
                return Ok(Arc::clone(&entry.transport));
            }
        }

        // Built without the lock: loading trust roots and keys does I/O.
        tracing::debug!(subject = %certificate.subject(), "building transport for certificate");
        let built = self.factory.transport(certificate)?;

        let mut cached = self.transport.lock();
        if let Some(entry) = cached.as_ref() {
            // A concurrent call installed a transport for the same certificate first.
            if Arc::ptr_eq(&entry.certificate, certificate) {
                return Ok(Arc::clone(&entry.transport));
            }
        }
        *cached = Some(CachedTransport {
            certificate: Arc::clone(certificate),
            transport: Arc::clone(&built),
        });
        Ok(built)
    }
}
