//! Namespace-tolerant parsing of `retConsCad` responses.
//!
//! Services disagree on whether children of `infCons` inherit the NF-e
//! default namespace, and on how deep `infCons` sits. Every scalar is looked
//! up with [`child_text`], and `infCons` itself is found with a document-order
//! search from the root.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate};
use regex::Regex;
use roxmltree::Node;

use crate::error::ParseError;
use crate::types::{status_description, Address, ConsultaResponse, QueriedKey, RegistrationRecord};
use crate::xml::{child_text, find_child, find_children, find_element, ElementMatch, XmlDocument};

/// Date with an offset but no time, e.g. `2025-07-02-03:00`.
static DATE_WITH_OFFSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2})([+-]\d{2}:\d{2}|Z)$").expect("valid regex")
});

/// Parse a `retConsCad` document (or any document containing `infCons`).
///
/// A record that cannot be parsed is skipped and described in
/// [`ConsultaResponse::warnings`]; everything else that goes wrong is fatal.
///
/// # Errors
/// * `ParseError::Malformed` if the document is not well-formed
/// * `ParseError::MissingInfoElement` if there is no `infCons` at any depth
///
/// # Examples
/// ```
/// use consulta_cadastro::parser::parse;
/// use consulta_cadastro::xml::XmlDocument;
///
/// let xml = XmlDocument::new(
///     r#"<retConsCad xmlns="http://www.portalfiscal.inf.br/nfe"><infCons>
///          <cStat>259</cStat><xMotivo>CNPJ da consulta nao cadastrado como contribuinte na UF</xMotivo>
///        </infCons></retConsCad>"#,
/// );
/// let response = parse(&xml).unwrap();
/// assert_eq!(response.status_code, "259");
/// assert!(response.records.is_empty());
/// ```
pub fn parse(document: &XmlDocument) -> Result<ConsultaResponse, ParseError> {
    let parsed = document.parse()?;
    let inf_cons = find_element(parsed.root_element(), ElementMatch::local("infCons")).ok_or_else(
        || ParseError::MissingInfoElement {
            payload: document.as_str().to_string(),
        },
    )?;

    let status_code = child_text(inf_cons, "cStat").unwrap_or_else(|| {
        tracing::debug!("infCons has no cStat");
        String::new()
    });

    let query_timestamp = child_text(inf_cons, "dhCons").and_then(|raw| {
        let parsed = parse_timestamp(&raw);
        if parsed.is_none() {
            tracing::debug!(dh_cons = %raw, "unrecognized dhCons format");
        }
        parsed
    });

    let mut records = Vec::new();
    let mut warnings = Vec::new();
    for (index, inf_cad) in find_children(inf_cons, "infCad").enumerate() {
        match parse_record(inf_cad) {
            Ok(record) => records.push(record),
            Err(reason) => {
                tracing::warn!(index, %reason, "skipping malformed infCad");
                warnings.push(format!("infCad[{index}] skipped: {reason}"));
            }
        }
    }

    tracing::debug!(
        status_code = %status_code,
        records = records.len(),
        skipped = warnings.len(),
        "parsed consultation response"
    );

    Ok(ConsultaResponse {
        app_version: child_text(inf_cons, "verAplic"),
        status_code,
        status_message: child_text(inf_cons, "xMotivo"),
        uf: child_text(inf_cons, "UF"),
        queried: queried_key(inf_cons),
        query_timestamp,
        uf_code: child_text(inf_cons, "cUF"),
        records,
        warnings,
    })
}

fn queried_key(inf_cons: Node<'_, '_>) -> Option<QueriedKey> {
    child_text(inf_cons, "CNPJ")
        .map(QueriedKey::Cnpj)
        .or_else(|| child_text(inf_cons, "CPF").map(QueriedKey::Cpf))
        .or_else(|| child_text(inf_cons, "IE").map(QueriedKey::Ie))
}

/// Parse one `infCad`. The error is a human-readable reason for skipping it.
fn parse_record(inf_cad: Node<'_, '_>) -> Result<RegistrationRecord, String> {
    let state_registration = child_text(inf_cad, "IE").ok_or("missing IE")?;
    let status_code = child_text(inf_cad, "cSit").ok_or("missing cSit")?;


    Ok(RegistrationRecord {
        status_description: status_description(&status_code),
        state_registration,
        status_code,
        last_status_change: optional_date(inf_cad, "dUltSit"),
        nfe_accredited: child_text(inf_cad, "indCredNFe").as_deref() == Some("1"),
        cte_accredited: child_text(inf_cad, "indCredCTe").as_deref() == Some("1"),
        cnpj: child_text(inf_cad, "CNPJ"),
        cpf: child_text(inf_cad, "CPF"),
        uf: child_text(inf_cad, "UF"),
        legal_name: child_text(inf_cad, "xNome"),
        trade_name: child_text(inf_cad, "xFant"),
        tax_regime: child_text(inf_cad, "xRegApur"),
        cnae: child_text(inf_cad, "CNAE"),
        activity_start: optional_date(inf_cad, "dIniAtiv"),
        closing_date: optional_date(inf_cad, "dBaixa"),
        single_registration: child_text(inf_cad, "IEUnica"),
        current_registration: child_text(inf_cad, "IEAtual"),
        address: find_child(inf_cad, "ender").map(parse_address),
    })
}

fn parse_address(ender: Node<'_, '_>) -> Address {
    Address {
        street: child_text(ender, "xLgr"),
        number: child_text(ender, "nro"),
        complement: child_text(ender, "xCpl"),
        neighborhood: child_text(ender, "xBairro"),
        postal_code: child_text(ender, "CEP"),
        city_name: child_text(ender, "xMun"),
        city_code: child_text(ender, "cMun"),
    }
}

/// Optional dates that fail to parse are dropped rather than failing the record.
fn optional_date(parent: Node<'_, '_>, tag: &str) -> Option<NaiveDate> {
    let raw = child_text(parent, tag)?;
    let date = parse_date(&raw);
    if date.is_none() {
        tracing::debug!(tag, value = %raw, "ignoring unparseable date");
    }
    date
}

/// Parse the `YYYY-MM-DD` prefix of a date, ignoring any offset suffix.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day = raw.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Parse `dhCons`: RFC 3339, or a bare date with offset taken as midnight.
fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp);
    }
    let caps = DATE_WITH_OFFSET.captures(raw)?;
    let offset = match &caps[2] {
        "Z" => "+00:00",
        other => other,
    };
    DateTime::parse_from_rfc3339(&format!("{}T00:00:00{offset}", &caps[1])).ok()
}
