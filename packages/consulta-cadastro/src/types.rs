//! Core data types for registration queries.
//!
//! These mirror the `retConsCad` layout of the SEFAZ CadConsultaCadastro4
//! service, with the XML tag each field comes from noted on the field.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::cnpj::Cnpj;
use crate::error::ConfigurationError;

/// Brazilian federative unit (UF), the jurisdiction that owns a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Uf {
    AC,
    AL,
    AM,
    AP,
    BA,
    CE,
    DF,
    ES,
    GO,
    MA,
    MG,
    MS,
    MT,
    PA,
    PB,
    PE,
    PI,
    PR,
    RJ,
    RN,
    RO,
    RR,
    RS,
    SC,
    SE,
    SP,
    TO,
}

impl Uf {
    /// All 27 units in alphabetical order.
    pub const ALL: [Uf; 27] = [
        Self::AC,
        Self::AL,
        Self::AM,
        Self::AP,
        Self::BA,
        Self::CE,
        Self::DF,
        Self::ES,
        Self::GO,
        Self::MA,
        Self::MG,
        Self::MS,
        Self::MT,
        Self::PA,
        Self::PB,
        Self::PE,
        Self::PI,
        Self::PR,
        Self::RJ,
        Self::RN,
        Self::RO,
        Self::RR,
        Self::RS,
        Self::SC,
        Self::SE,
        Self::SP,
        Self::TO,
    ];

    /// Two-letter code as sent in the `UF` element.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AC => "AC",
            Self::AL => "AL",
            Self::AM => "AM",
            Self::AP => "AP",
            Self::BA => "BA",
            Self::CE => "CE",
            Self::DF => "DF",
            Self::ES => "ES",
            Self::GO => "GO",
            Self::MA => "MA",
            Self::MG => "MG",
            Self::MS => "MS",
            Self::MT => "MT",
            Self::PA => "PA",
            Self::PB => "PB",
            Self::PE => "PE",
            Self::PI => "PI",
            Self::PR => "PR",
            Self::RJ => "RJ",
            Self::RN => "RN",
            Self::RO => "RO",
            Self::RR => "RR",
            Self::RS => "RS",
            Self::SC => "SC",
            Self::SE => "SE",
            Self::SP => "SP",
            Self::TO => "TO",
        }
    }
}

impl FromStr for Uf {
    type Err = ConfigurationError;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|uf| uf.as_str() == code)
            .ok_or_else(|| ConfigurationError::UnknownUf(s.to_string()))
    }
}

impl fmt::Display for Uf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which SEFAZ environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Environment {
    /// Produção.
    #[default]
    Production,
    /// Homologação.
    Staging,
}

impl Environment {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "producao" | "produção" | "1" => Ok(Self::Production),
            "staging" | "homologacao" | "homologação" | "2" => Ok(Self::Staging),
            _ => Err(ConfigurationError::Invalid(format!(
                "unknown environment '{s}', expected production or staging"
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The key a consultation is made by. The service accepts exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKey {
    /// Taxpayer identifier, sent as `CNPJ`.
    Cnpj(Cnpj),
    /// State registration number, sent as `IE`.
    Ie(String),
}

/// One consultation: which registry, and by which key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsultaRequest {
    pub uf: Uf,
    pub key: QueryKey,
}

impl ConsultaRequest {
    #[must_use]
    pub fn by_cnpj(uf: Uf, cnpj: Cnpj) -> Self {
        Self {
            uf,
            key: QueryKey::Cnpj(cnpj),
        }
    }

    #[must_use]
    pub fn by_ie(uf: Uf, ie: impl Into<String>) -> Self {
        Self {
            uf,
            key: QueryKey::Ie(ie.into()),
        }
    }
}

/// Key echoed back by the service in `infCons`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum QueriedKey {
    Cnpj(String),
    Cpf(String),
    Ie(String),
}

/// Parsed `infCons` block of a `retConsCad` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultaResponse {
    /// Application version of the answering service (`verAplic`).
    pub app_version: Option<String>,

    /// Status code (`cStat`), e.g. "111".
    pub status_code: String,

    /// Status message (`xMotivo`).
    pub status_message: Option<String>,

    /// UF that answered (`UF`).
    pub uf: Option<String>,

    /// Key the service says it looked up.
    pub queried: Option<QueriedKey>,

    /// Moment the query was processed (`dhCons`).
    pub query_timestamp: Option<DateTime<FixedOffset>>,

    /// IBGE code of the UF (`cUF`).
    pub uf_code: Option<String>,

    /// Registrations found, in document order. Empty when none were found.
    pub records: Vec<RegistrationRecord>,

    /// Non-fatal problems, one per skipped record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ConsultaResponse {
    /// `cStat` 111 (one occurrence) or 112 (more than one).
    #[must_use]
    pub fn has_occurrences(&self) -> bool {
        matches!(self.status_code.as_str(), "111" | "112")
    }

    #[must_use]
    pub fn first_record(&self) -> Option<&RegistrationRecord> {
        self.records.first()
    }
}

/// One `infCad` entry: a state-level registration of the taxpayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// State registration number (`IE`).
    pub state_registration: String,

    /// Registration status code (`cSit`).
    pub status_code: String,

    /// Human-readable form of `status_code`.
    pub status_description: String,

    /// Date of the last status change (`dUltSit`).
    pub last_status_change: Option<NaiveDate>,

    /// `indCredNFe == "1"`.
    pub nfe_accredited: bool,

    /// `indCredCTe == "1"`.
    pub cte_accredited: bool,

    pub cnpj: Option<String>,
    pub cpf: Option<String>,
    pub uf: Option<String>,

    /// `xNome`.
    pub legal_name: Option<String>,

    /// `xFant`.
    pub trade_name: Option<String>,

    /// `xRegApur`.
    pub tax_regime: Option<String>,

    /// `CNAE`.
    pub cnae: Option<String>,

    /// `dIniAtiv`.
    pub activity_start: Option<NaiveDate>,

    /// `dBaixa`.
    pub closing_date: Option<NaiveDate>,

    /// `IEUnica`.
    pub single_registration: Option<String>,

    /// `IEAtual`.
    pub current_registration: Option<String>,

    /// Present only when the record carries an `ender` element.
    pub address: Option<Address>,
}

/// Address block (`ender`) of a registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// `xLgr`.
    pub street: Option<String>,
    /// `nro`.
    pub number: Option<String>,
    /// `xCpl`.
    pub complement: Option<String>,
    /// `xBairro`.
    pub neighborhood: Option<String>,
    /// `CEP`.
    pub postal_code: Option<String>,
    /// `xMun`.
    pub city_name: Option<String>,
    /// `cMun`.
    pub city_code: Option<String>,
}

/// Describe a registration status code (`cSit`).
///
/// # Examples
/// ```
/// use consulta_cadastro::types::status_description;
///
/// assert_eq!(status_description("1"), "enabled");
/// assert_eq!(status_description("0"), "not enabled");
/// assert_eq!(status_description("9"), "status 9");
/// ```
#[must_use]
pub fn status_description(code: &str) -> String {
    match code {
        "0" => "not enabled".to_string(),
        "1" => "enabled".to_string(),
        other => format!("status {other}"),
    }
}
