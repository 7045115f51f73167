//! SEFAZ CadConsultaCadastro4 client - query state tax registrations by CNPJ.
//!
//! Builds the `ConsCad` request, wraps it in a SOAP 1.1 envelope, sends it
//! over mutual TLS with a PKCS#12 client certificate and parses the
//! `retConsCad` answer, tolerating the namespace quirks of the different
//! state services.
//!
//! # Example
//!
//! ```
//! use consulta_cadastro::cnpj;
//! use consulta_cadastro::endpoints::EndpointRegistry;
//! use consulta_cadastro::types::{Environment, Uf};
//!
//! // Validate the CNPJ and find where to send the query
//! let cnpj = cnpj::normalize("11.222.333/0001-81").unwrap();
//! assert_eq!(cnpj.as_str(), "11222333000181");
//!
//! let registry = EndpointRegistry::default();
//! assert!(registry.is_shared_infrastructure(Uf::AC, Environment::Production));
//! assert!(!registry.is_shared_infrastructure(Uf::SP, Environment::Production));
//! ```
//!
//! # Architecture
//!
//! - [`cnpj`]: CNPJ normalization and check digits
//! - [`endpoints`]: UF → endpoint routing
//! - [`certificate`]: PKCS#12 loading and the certificate store
//! - [`tls`]: mutual-TLS HTTP transport
//! - [`codec`]: request document and SOAP envelope
//! - [`parser`]: response parsing
//! - [`client`]: one full round trip
//! - [`xml`]: shared tree search and compact writer
//! - [`config`]: protocol constants and client settings
//! - [`types`]: request and response data types
//! - [`error`]: error types and Result alias
//! - [`cli`]: command-line interface

pub mod certificate;
pub mod cli;
pub mod client;
pub mod cnpj;
pub mod codec;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod parser;
pub mod tls;
pub mod types;
pub mod xml;

// Re-export commonly used items
pub use certificate::{CertificateStore, ClientCertificate};
pub use client::ConsultaCadastroClient;
pub use cnpj::Cnpj;
pub use config::ClientConfig;
pub use error::{ConsultaError, Result};
pub use tls::CallOptions;
pub use types::{ConsultaResponse, Environment, RegistrationRecord, Uf};
