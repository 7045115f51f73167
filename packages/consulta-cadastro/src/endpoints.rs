//! UF → CadConsultaCadastro4 endpoint routing.
//!
//! Seventeen UFs delegate the service to SVRS (Sefaz Virtual do RS) and share
//! one URL per environment; the other ten run their own.

use std::collections::{BTreeMap, BTreeSet};

use url::Url;

use crate::config::SHARED_INFRASTRUCTURE_HOST;
use crate::error::ConfigurationError;
use crate::types::{Environment, Uf};

const SVRS_PRODUCTION: &str =
    "https://nfe.svrs.rs.gov.br/ws/cadconsultacadastro/cadconsultacadastro4.asmx";

const SVRS_STAGING: &str =
    "https://nfe-homologacao.svrs.rs.gov.br/ws/cadconsultacadastro/cadconsultacadastro4.asmx";

/// UFs served by SVRS.
const SVRS_UFS: [Uf; 17] = [
    Uf::AC,
    Uf::AL,
    Uf::AP,
    Uf::CE,
    Uf::DF,
    Uf::ES,
    Uf::MA,
    Uf::PA,
    Uf::PB,
    Uf::PI,
    Uf::RJ,
    Uf::RN,
    Uf::RO,
    Uf::RR,
    Uf::SC,
    Uf::SE,
    Uf::TO,
];

/// UFs with their own services: (uf, production, staging).
const DEDICATED: [(Uf, &str, &str); 10] = [
    (
        Uf::AM,
        "https://nfe.sefaz.am.gov.br/services2/services/CadConsultaCadastro4",
        "https://homnfe.sefaz.am.gov.br/services2/services/CadConsultaCadastro4",
    ),
    (
        Uf::BA,
        "https://nfe.sefaz.ba.gov.br/webservices/CadConsultaCadastro4/CadConsultaCadastro4.asmx",
        "https://hnfe.sefaz.ba.gov.br/webservices/CadConsultaCadastro4/CadConsultaCadastro4.asmx",
    ),
    (
        Uf::GO,
        "https://nfe.sefaz.go.gov.br/nfe/services/CadConsultaCadastro4?wsdl",
        "https://homolog.sefaz.go.gov.br/nfe/services/CadConsultaCadastro4?wsdl",
    ),
    (
        Uf::MT,
        "https://nfe.sefaz.mt.gov.br/nfews/v2/services/CadConsultaCadastro4?wsdl",
        "https://homologacao.sefaz.mt.gov.br/nfews/v2/services/CadConsultaCadastro4?wsdl",
    ),
    (
        Uf::MS,
        "https://nfe.sefaz.ms.gov.br/ws/CadConsultaCadastro4",
        "https://homologacao.sefaz.ms.gov.br/ws/CadConsultaCadastro4",
    ),
    (
        Uf::MG,
        "https://nfe.fazenda.mg.gov.br/nfe2/services/CadConsultaCadastro4",
        "https://hnfe.fazenda.mg.gov.br/nfe2/services/CadConsultaCadastro4",
    ),
    (
        Uf::PR,
        "https://nfe.sefa.pr.gov.br/nfe/CadConsultaCadastro4?wsdl",
        "https://homologacao.nfe.sefa.pr.gov.br/nfe/CadConsultaCadastro4?wsdl",
    ),
    (
        Uf::PE,
        "https://nfe.sefaz.pe.gov.br/nfe-service/services/CadConsultaCadastro4?wsdl",
        "https://nfehomolog.sefaz.pe.gov.br/nfe-service/services/CadConsultaCadastro4?wsdl",
    ),
    (
        Uf::RS,
        "https://cad.svrs.rs.gov.br/ws/cadconsultacadastro/cadconsultacadastro4.asmx",
        "https://cad-homologacao.svrs.rs.gov.br/ws/cadconsultacadastro/cadconsultacadastro4.asmx",
    ),
    (
        Uf::SP,
        "https://nfe.fazenda.sp.gov.br/ws/cadconsultacadastro4.asmx",
        "https://homologacao.nfe.fazenda.sp.gov.br/ws/cadconsultacadastro4.asmx",
    ),
];

/// Immutable endpoint table, one URL map per environment.
///
/// Partial tables are valid: a UF without an entry simply does not resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointTable {
    production: BTreeMap<Uf, String>,
    staging: BTreeMap<Uf, String>,
}

impl EndpointTable {
    /// Empty table, to be filled with [`EndpointTable::with`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in SEFAZ table covering all 27 UFs in both environments.
    #[must_use]
    pub fn sefaz() -> Self {
        let mut table = Self::new();
        for uf in SVRS_UFS {
            table = table
                .with(Environment::Production, uf, SVRS_PRODUCTION)
                .with(Environment::Staging, uf, SVRS_STAGING);
        }
        for (uf, production, staging) in DEDICATED {
            table = table
                .with(Environment::Production, uf, production)
                .with(Environment::Staging, uf, staging);
        }
        table
    }

    /// Add or override one entry.
    #[must_use]
    pub fn with(mut self, environment: Environment, uf: Uf, url: impl Into<String>) -> Self {
        self.map_mut(environment).insert(uf, url.into());
        self
    }

    fn map(&self, environment: Environment) -> &BTreeMap<Uf, String> {
        match environment {
            Environment::Production => &self.production,
            Environment::Staging => &self.staging,
        }
    }

    fn map_mut(&mut self, environment: Environment) -> &mut BTreeMap<Uf, String> {
        match environment {
            Environment::Production => &mut self.production,
            Environment::Staging => &mut self.staging,
        }
    }
}

/// Summary of one UF's endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub uf: Uf,
    pub production: Option<String>,
    pub staging: Option<String>,
    pub shared_infrastructure: bool,
}

/// Read-only lookup over an [`EndpointTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRegistry {
    table: EndpointTable,
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(EndpointTable::sefaz())
    }
}

impl EndpointRegistry {
    #[must_use]
    pub fn new(table: EndpointTable) -> Self {
        Self { table }
    }

    /// Endpoint URL for a UF, or `None` if the table has no entry.
    #[must_use]
    pub fn resolve(&self, uf: Uf, environment: Environment) -> Option<&str> {
        self.table.map(environment).get(&uf).map(String::as_str)
    }

    /// Like [`resolve`](Self::resolve), taking the UF code as text.
    ///
    /// # Examples
    /// ```
    /// use consulta_cadastro::endpoints::EndpointRegistry;
    /// use consulta_cadastro::types::Environment;
    ///
    /// let registry = EndpointRegistry::default();
    /// assert!(registry.resolve_code("sp", Environment::Production).is_some());
    /// assert!(registry.resolve_code("ZZ", Environment::Production).is_none());
    /// ```
    #[must_use]
    pub fn resolve_code(&self, code: &str, environment: Environment) -> Option<&str> {
        let uf = code.parse::<Uf>().ok()?;
        self.resolve(uf, environment)
    }

    /// Endpoint URL, or `UnknownJurisdiction` when absent.
    pub fn require(&self, uf: Uf, environment: Environment) -> Result<&str, ConfigurationError> {
        self.resolve(uf, environment)
            .ok_or_else(|| ConfigurationError::UnknownJurisdiction {
                uf: uf.to_string(),
                environment: environment.to_string(),
            })
    }

    #[must_use]
    pub fn has_endpoint(&self, uf: Uf, environment: Environment) -> bool {
        self.resolve(uf, environment).is_some()
    }

    /// `true` if the UF's endpoint is hosted on the SVRS shared infrastructure.
    #[must_use]
    pub fn is_shared_infrastructure(&self, uf: Uf, environment: Environment) -> bool {
        self.resolve(uf, environment)
            .and_then(|url| Url::parse(url).ok())
            .and_then(|url| url.host_str().map(is_shared_host))
            .unwrap_or(false)
    }

    /// UFs with a production endpoint.
    #[must_use]
    pub fn jurisdictions(&self) -> BTreeSet<Uf> {
        self.table
            .map(Environment::Production)
            .keys()
            .copied()
            .collect()
    }

    /// Both endpoints and the SVRS flag for one UF.
    #[must_use]
    pub fn describe(&self, uf: Uf) -> EndpointInfo {
        EndpointInfo {
            uf,
            production: self.resolve(uf, Environment::Production).map(String::from),
            staging: self.resolve(uf, Environment::Staging).map(String::from),
            shared_infrastructure: self.is_shared_infrastructure(uf, Environment::Production),
        }
    }
}

fn is_shared_host(host: &str) -> bool {
    host.eq_ignore_ascii_case(SHARED_INFRASTRUCTURE_HOST)
        || host
            .to_ascii_lowercase()
            .ends_with(&format!(".{SHARED_INFRASTRUCTURE_HOST}"))
}
