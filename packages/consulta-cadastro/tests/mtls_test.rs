//! Mutual-TLS handshakes against a local rustls server that requires a
//! client certificate issued by a test CA.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use consulta_cadastro::client::ConsultaCadastroClient;
use consulta_cadastro::config::SOAP_ACTION;
use consulta_cadastro::endpoints::{EndpointRegistry, EndpointTable};
use consulta_cadastro::error::{ConsultaError, NetworkError};
use consulta_cadastro::tls::{CallOptions, HttpTransport, SoapTransport, TlsClientFactory};
use consulta_cadastro::{CertificateStore, ClientCertificate, ClientConfig, Environment, Uf};
use rcgen::{
    date_time_ymd, BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};

const SERVICE_PATH: &str = "/ws/cadconsultacadastro4.asmx";

/// A test certificate authority.
struct Pki {
    ca: rcgen::Certificate,
    key: KeyPair,
}

impl Pki {
    fn new(name: &str) -> Self {
        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().expect("CA key");
        let ca = params.self_signed(&key).expect("CA certificate");
        Self { ca, key }
    }

    fn ca_der(&self) -> Vec<u8> {
        self.ca.der().to_vec()
    }

    /// (certificate DER, PKCS#8 key DER) signed by this CA.
    fn issue(
        &self,
        names: &[&str],
        common_name: &str,
        usage: ExtendedKeyUsagePurpose,
    ) -> (Vec<u8>, Vec<u8>) {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let mut params = CertificateParams::new(names).expect("params");
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.extended_key_usages = vec![usage];
        params.not_before = date_time_ymd(2020, 1, 1);
        params.not_after = date_time_ymd(2099, 1, 1);
        let key = KeyPair::generate().expect("leaf key");
        let cert = params
            .signed_by(&key, &self.ca, &self.key)
            .expect("signed certificate");
        (cert.der().to_vec(), key.serialize_der())
    }

    fn client_certificate(&self) -> ClientCertificate {
        let (cert, key) = self.issue(
            &[],
            "EMPRESA EXEMPLO LTDA:11222333000181",
            ExtendedKeyUsagePurpose::ClientAuth,
        );
        ClientCertificate::from_der(vec![cert], key).expect("client certificate")
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

fn load_fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to load fixture {}: {e}", path.display()))
}

/// Server config that only accepts clients holding a certificate from `pki`.
fn server_config(pki: &Pki) -> Arc<ServerConfig> {
    let (cert, key) = pki.issue(
        &["localhost", "127.0.0.1"],
        "sefaz.test",
        ExtendedKeyUsagePurpose::ServerAuth,
    );
    let mut roots = RootCertStore::empty();
    roots
        .add(CertificateDer::from(pki.ca_der()))
        .expect("CA root");
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
        .build()
        .expect("client verifier");

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_client_cert_verifier(verifier)
        .with_single_cert(
            vec![CertificateDer::from(cert)],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)),
        )
        .expect("server config");
    Arc::new(config)
}

/// What the server saw on its single connection.
struct Exchange {
    client_certificate: Option<Vec<u8>>,
    request: String,
}

/// Accept one connection, answer one request with `body`, then close.
fn serve_once(
    config: Arc<ServerConfig>,
    body: String,
) -> (String, thread::JoinHandle<Result<Exchange, String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let url = format!("https://127.0.0.1:{port}{SERVICE_PATH}");

    let handle = thread::spawn(move || {
        let (tcp, _) = listener.accept().map_err(|e| e.to_string())?;
        tcp.set_read_timeout(Some(Duration::from_secs(10)))
            .map_err(|e| e.to_string())?;
        let connection = ServerConnection::new(config).map_err(|e| e.to_string())?;
        let mut tls = StreamOwned::new(connection, tcp);

        let request = read_request(&mut tls).map_err(|e| e.to_string())?;
        let client_certificate = tls
            .conn
            .peer_certificates()
            .and_then(|chain| chain.first())
            .map(|cert| cert.to_vec());

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/xml; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        tls.write_all(response.as_bytes())
            .map_err(|e| e.to_string())?;
        tls.conn.send_close_notify();
        tls.flush().map_err(|e| e.to_string())?;

        Ok(Exchange {
            client_certificate,
            request,
        })
    });
    (url, handle)
}

/// Read one HTTP/1.1 request with a `Content-Length` body.
fn read_request(stream: &mut impl Read) -> std::io::Result<String> {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= end + 4 + length {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn config_trusting(pki: &Pki) -> ClientConfig {
    ClientConfig::builder()
        .timeout(Duration::from_secs(10))
        .trusted_roots(vec![pki.ca_der()])
        .build()
        .expect("config")
}

#[test]
fn test_consultation_over_mutual_tls() {
    let pki = Pki::new("AC Teste SEFAZ");
    let (url, server) = serve_once(server_config(&pki), load_fixture("ret_cons_cad_sp.xml"));

    let certificate = pki.client_certificate();
    let presented = certificate.chain()[0].clone();
    let store = Arc::new(CertificateStore::new());
    store.replace(certificate).expect("install certificate");

    let config = config_trusting(&pki);
    let registry =
        EndpointRegistry::new(EndpointTable::new().with(Environment::Production, Uf::SP, url));
    let client = ConsultaCadastroClient::with_parts(
        config.clone(),
        registry,
        store,
        Box::new(TlsClientFactory::new(config)),
    );

    let response = client
        .consultar(Uf::SP, "11.222.333/0001-81")
        .expect("consultation over mutual TLS");
    assert_eq!(response.status_code, "111");
    assert_eq!(
        response.first_record().map(|r| r.state_registration.as_str()),
        Some("110042490114")
    );

    let exchange = server.join().expect("server thread").expect("handshake");
    assert_eq!(exchange.client_certificate, Some(presented));
    let request = exchange.request.to_ascii_lowercase();
    assert!(request.starts_with(&format!("post {}", SERVICE_PATH.to_ascii_lowercase())));
    assert!(request.contains(&format!("soapaction: {}", SOAP_ACTION.to_ascii_lowercase())));
    assert!(exchange.request.contains("<CNPJ>11222333000181</CNPJ>"));
}

#[test]
fn test_connection_without_client_certificate_is_rejected() {
    let pki = Pki::new("AC Teste SEFAZ");
    let (url, server) = serve_once(server_config(&pki), load_fixture("ret_cons_cad_sp.xml"));

    let mut roots = RootCertStore::empty();
    roots
        .add(CertificateDer::from(pki.ca_der()))
        .expect("CA root");
    let tls = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .expect("protocol versions")
        .with_root_certificates(roots)
        .with_no_client_auth();
    let http = reqwest::blocking::Client::builder()
        .use_preconfigured_tls(tls)
        .timeout(Duration::from_secs(10))
        .build()
        .expect("client");
    let transport = HttpTransport::from_client(http);

    let result = transport.post(&url, SOAP_ACTION, "<ConsCad/>", &CallOptions::default());
    assert!(matches!(result, Err(NetworkError::Request { .. })));
    assert!(server.join().expect("server thread").is_err());
}

#[test]
fn test_certificate_from_unknown_issuer_is_rejected() {
    let pki = Pki::new("AC Teste SEFAZ");
    let other = Pki::new("AC Desconhecida");
    let (url, server) = serve_once(server_config(&pki), load_fixture("ret_cons_cad_sp.xml"));

    let transport = TlsClientFactory::new(config_trusting(&pki))
        .build(&other.client_certificate())
        .expect("transport");

    let result = transport.post(&url, SOAP_ACTION, "<ConsCad/>", &CallOptions::default());
    assert!(matches!(result, Err(NetworkError::Request { .. })));
    assert!(server.join().expect("server thread").is_err());
}

#[test]
fn test_untrusted_server_is_rejected() {
    let pki = Pki::new("AC Teste SEFAZ");
    let other = Pki::new("AC Desconhecida");
    let (url, server) = serve_once(server_config(&pki), load_fixture("ret_cons_cad_sp.xml"));

    let certificate = pki.client_certificate();
    let store = Arc::new(CertificateStore::new());
    store.replace(certificate).expect("install certificate");
    let config = config_trusting(&other);
    let registry =
        EndpointRegistry::new(EndpointTable::new().with(Environment::Production, Uf::SP, url));
    let client = ConsultaCadastroClient::with_parts(
        config.clone(),
        registry,
        store,
        Box::new(TlsClientFactory::new(config)),
    );

    let result = client.consultar(Uf::SP, "11222333000181");
    assert!(matches!(
        result,
        Err(ConsultaError::Network(NetworkError::Request { .. }))
    ));
    assert!(server.join().expect("server thread").is_err());
}
