//! Request construction and SOAP envelope handling.
//!
//! The business document (`ConsCad`) lives in the NF-e namespace; the envelope
//! around it uses the SOAP 1.1 namespace plus the operation namespace (`cad:`).

use crate::cnpj::Cnpj;
use crate::config::{
    CAD_NAMESPACE, DATA_VERSION, NFE_NAMESPACE, SCHEMA_VERSION, SERVICE_NAME, SOAP_NAMESPACE,
};
use crate::error::ParseError;
use crate::types::{QueryKey, Uf};
use crate::xml::{find_element, serialize_subtree, ElementMatch, XmlDocument, XmlWriter};

/// Local name of the result element inside a response body.
pub const RESULT_ELEMENT: &str = "retConsCad";

/// Build the `ConsCad` document for a CNPJ query.
///
/// # Examples
/// ```
/// use consulta_cadastro::cnpj::normalize;
/// use consulta_cadastro::codec::build_consultation_document;
/// use consulta_cadastro::types::Uf;
///
/// let cnpj = normalize("11222333000181").unwrap();
/// let doc = build_consultation_document(Uf::SP, &cnpj).unwrap();
/// assert_eq!(
///     doc.as_str(),
///     "<ConsCad xmlns=\"http://www.portalfiscal.inf.br/nfe\" versao=\"2.00\">\
///      <infCons><xServ>CONS-CAD</xServ><UF>SP</UF><CNPJ>11222333000181</CNPJ></infCons>\
///      </ConsCad>"
/// );
/// ```
pub fn build_consultation_document(uf: Uf, cnpj: &Cnpj) -> Result<XmlDocument, ParseError> {
    build_document(uf, "CNPJ", cnpj.as_str())
}

/// Build the `ConsCad` document for a state registration (IE) query.
///
/// `ie` is sent as given; normalize it with [`crate::cnpj::normalize_ie`] first.
pub fn build_consultation_document_by_ie(uf: Uf, ie: &str) -> Result<XmlDocument, ParseError> {
    build_document(uf, "IE", ie)
}

/// Build the document for whichever key the request carries.
pub fn build_for_key(uf: Uf, key: &QueryKey) -> Result<XmlDocument, ParseError> {
    match key {
        QueryKey::Cnpj(cnpj) => build_consultation_document(uf, cnpj),
        QueryKey::Ie(ie) => build_consultation_document_by_ie(uf, ie),
    }
}

fn build_document(uf: Uf, key_tag: &str, key: &str) -> Result<XmlDocument, ParseError> {
    let mut writer = XmlWriter::new();
    writer
        .start(
            "ConsCad",
            &[("xmlns", NFE_NAMESPACE), ("versao", SCHEMA_VERSION)],
        )?
        .start("infCons", &[])?
        .text_element("xServ", SERVICE_NAME)?
        .text_element("UF", uf.as_str())?
        .text_element(key_tag, key)?
        .end("infCons")?
        .end("ConsCad")?;
    writer.finish()
}

/// Wrap a business document in the CadConsultaCadastro4 SOAP envelope.
///
/// The document is nested as an element under `cad:nfeDadosMsg`, never as
/// escaped text. `uf` is only used for diagnostics; the envelope is the same
/// for every UF.
///
/// # Errors
/// `ParseError::Malformed` if `document` is not well-formed.
pub fn wrap_envelope(document: &XmlDocument, uf: Uf) -> Result<XmlDocument, ParseError> {
    let parsed = document.parse()?;
    tracing::trace!(uf = %uf, "wrapping consultation document in SOAP envelope");

    let mut writer = XmlWriter::new();
    writer
        .declaration()?
        .start(
            "soap:Envelope",
            &[("xmlns:soap", SOAP_NAMESPACE), ("xmlns:cad", CAD_NAMESPACE)],
        )?
        .empty("soap:Header")?
        .start("soap:Body", &[])?
        .start("cad:consultaCadastro", &[])?
        .start("cad:nfeCabecMsg", &[])?
        .text_element("cad:versaoDados", DATA_VERSION)?
        .end("cad:nfeCabecMsg")?
        .start("cad:nfeDadosMsg", &[])?
        .copy(parsed.root_element())?
        .end("cad:nfeDadosMsg")?
        .end("cad:consultaCadastro")?
        .end("soap:Body")?
        .end("soap:Envelope")?;
    writer.finish()
}

/// Extract the `retConsCad` element from a response envelope.
///
/// The element is matched by local name at any depth, whatever prefix or
/// namespace the service used.
///
/// # Errors
/// * `ParseError::Malformed` if the response is not well-formed
/// * `ParseError::MissingResultElement` carrying the whole response otherwise
pub fn unwrap_envelope(response: &XmlDocument) -> Result<XmlDocument, ParseError> {
    let parsed = response.parse()?;
    match find_element(parsed.root_element(), ElementMatch::local(RESULT_ELEMENT)) {
        Some(result) => serialize_subtree(result),
        None => {
            tracing::warn!("response envelope holds no <{RESULT_ELEMENT}> element");
            Err(ParseError::MissingResultElement {
                payload: response.as_str().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnpj::normalize;
    use crate::xml::{child_text, find_child};
    use pretty_assertions::assert_eq;

    fn cnpj() -> Cnpj {
        normalize("11222333000181").unwrap()
    }

    #[test]
    fn test_document_round_trip_recovers_uf_and_cnpj() {
        let doc = build_consultation_document(Uf::SP, &cnpj()).unwrap();
        let parsed = doc.parse().unwrap();
        let root = parsed.root_element();

        assert_eq!(root.tag_name().name(), "ConsCad");
        assert_eq!(root.tag_name().namespace(), Some(NFE_NAMESPACE));
        assert_eq!(root.attribute("versao"), Some("2.00"));

        let inf = find_element(root, ElementMatch::qualified("infCons", NFE_NAMESPACE)).unwrap();
        assert_eq!(child_text(inf, "xServ").as_deref(), Some("CONS-CAD"));
        assert_eq!(child_text(inf, "UF").as_deref(), Some("SP"));
        assert_eq!(child_text(inf, "CNPJ").as_deref(), Some("11222333000181"));
        assert!(find_child(inf, "IE").is_none());
    }

    #[test]
    fn test_document_by_ie_has_no_cnpj() {
        let doc = build_consultation_document_by_ie(Uf::MG, "0620012340013").unwrap();
        let parsed = doc.parse().unwrap();
        let inf = find_element(parsed.root_element(), ElementMatch::local("infCons")).unwrap();
        assert_eq!(child_text(inf, "IE").as_deref(), Some("0620012340013"));
        assert!(find_child(inf, "CNPJ").is_none());
    }

    #[test]
    fn test_document_is_compact() {
        let doc = build_consultation_document(Uf::RS, &cnpj()).unwrap();
        assert!(!doc.as_str().contains('\n'));
        assert!(!doc.as_str().contains("> <"));
        assert!(!doc.as_str().starts_with("<?xml"));
    }

    #[test]
    fn test_envelope_nests_document_as_element() {
        let doc = build_consultation_document(Uf::SP, &cnpj()).unwrap();
        let envelope = wrap_envelope(&doc, Uf::SP).unwrap();

        assert!(envelope.as_str().starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(!envelope.as_str().contains("&lt;ConsCad"));

        let parsed = envelope.parse().unwrap();
        let root = parsed.root_element();
        assert_eq!(root.tag_name().name(), "Envelope");
        assert_eq!(root.tag_name().namespace(), Some(SOAP_NAMESPACE));
        assert!(find_element(root, ElementMatch::qualified("Header", SOAP_NAMESPACE)).is_some());

        let version =
            find_element(root, ElementMatch::qualified("versaoDados", CAD_NAMESPACE)).unwrap();
        assert_eq!(version.text(), Some("2.00"));

        let dados = find_element(root, ElementMatch::qualified("nfeDadosMsg", CAD_NAMESPACE)).unwrap();
        let cons_cad = dados.first_element_child().unwrap();
        assert_eq!(cons_cad.tag_name().name(), "ConsCad");
        assert_eq!(cons_cad.tag_name().namespace(), Some(NFE_NAMESPACE));
    }

    #[test]
    fn test_envelope_is_deterministic() {
        let doc = build_consultation_document(Uf::SP, &cnpj()).unwrap();
        assert_eq!(
            wrap_envelope(&doc, Uf::SP).unwrap(),
            wrap_envelope(&doc, Uf::SP).unwrap()
        );
    }

    #[test]
    fn test_wrap_rejects_malformed_document() {
        let result = wrap_envelope(&XmlDocument::new("<ConsCad>"), Uf::SP);
        assert!(matches!(result, Err(ParseError::Malformed { .. })));
    }

    #[test]
    fn test_unwrap_finds_result_under_any_prefix() {
        let response = XmlDocument::new(
            r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
                 <env:Body>
                   <consultaCadastroResult xmlns="http://www.portalfiscal.inf.br/nfe/wsdl/CadConsultaCadastro4">
                     <retConsCad xmlns="http://www.portalfiscal.inf.br/nfe" versao="2.00">
                       <infCons><cStat>111</cStat></infCons>
                     </retConsCad>
                   </consultaCadastroResult>
                 </env:Body>
               </env:Envelope>"#,
        );
        let body = unwrap_envelope(&response).unwrap();
        assert_eq!(
            body.as_str(),
            r#"<retConsCad xmlns="http://www.portalfiscal.inf.br/nfe" versao="2.00"><infCons><cStat>111</cStat></infCons></retConsCad>"#
        );
    }

    #[test]
    fn test_unwrap_missing_result_keeps_payload() {
        let raw = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><soap:Fault/></soap:Body></soap:Envelope>"#;
        let err = unwrap_envelope(&XmlDocument::new(raw)).unwrap_err();
        assert!(matches!(err, ParseError::MissingResultElement { .. }));
        assert_eq!(err.payload(), Some(raw));
    }
}
