//! Command-line interface for registration queries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::certificate::CertificateStore;
use crate::client::ConsultaCadastroClient;
use crate::cnpj;
use crate::config::ClientConfig;
use crate::endpoints::{EndpointInfo, EndpointRegistry};
use crate::error::{ParseError, Result};
use crate::types::{ConsultaResponse, Environment, Uf};

/// Query SEFAZ state tax registrations (CadConsultaCadastro4).
#[derive(Parser)]
#[command(name = "consulta-cadastro")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Query a registry by CNPJ or state registration number.
    Consultar {
        /// UF whose registry is queried (e.g., SP)
        #[arg(long)]
        uf: Uf,

        /// CNPJ, with or without punctuation
        #[arg(long, required_unless_present = "ie", conflicts_with = "ie")]
        cnpj: Option<String>,

        /// State registration number (IE)
        #[arg(long)]
        ie: Option<String>,

        /// PKCS#12 client certificate
        #[arg(long)]
        cert: PathBuf,

        /// Certificate password
        #[arg(long, env = "CADASTRO_CERT_PASSWORD", hide_env_values = true)]
        password: String,

        /// Use the staging (homologação) environment
        #[arg(long)]
        homologacao: bool,

        /// Skip server certificate verification (test environments only)
        #[arg(long)]
        insecure: bool,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the endpoint table, or one UF's endpoints.
    Endpoints {
        /// UF code (default: all)
        uf: Option<Uf>,
    },

    /// Load a PKCS#12 certificate and print its details.
    Certificado {
        /// PKCS#12 client certificate
        #[arg(long)]
        cert: PathBuf,

        /// Certificate password
        #[arg(long, env = "CADASTRO_CERT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Check a CNPJ's check digits.
    Validar {
        /// CNPJ, with or without punctuation
        cnpj: String,
    },
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Consultar {
            uf,
            cnpj,
            ie,
            cert,
            password,
            homologacao,
            insecure,
            timeout,
            json,
        } => {
            let config = client_config(homologacao, insecure, timeout)?;
            let query = match cnpj {
                Some(cnpj) => Query::Cnpj(cnpj),
                None => Query::Ie(ie.unwrap_or_default()),
            };
            consultar_command(config, uf, &query, &cert, &password, json)
        }
        Commands::Endpoints { uf } => {
            endpoints_command(uf);
            Ok(())
        }
        Commands::Certificado { cert, password } => certificado_command(&cert, &password),
        Commands::Validar { cnpj } => validar_command(&cnpj),
    }
}

enum Query {
    Cnpj(String),
    Ie(String),
}

/// Environment settings overridden by command-line flags.
fn client_config(homologacao: bool, insecure: bool, timeout: Option<u64>) -> Result<ClientConfig> {
    let base = ClientConfig::from_env()?;
    let mut builder = ClientConfig::builder()
        .environment(if homologacao {
            Environment::Staging
        } else {
            base.environment
        })
        .timeout(timeout.map_or(base.timeout, Duration::from_secs));
    if insecure {
        builder = builder.danger_accept_invalid_server_certs();
    }
    Ok(builder.build()?)
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("valid template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn consultar_command(
    config: ClientConfig,
    uf: Uf,
    query: &Query,
    cert: &Path,
    password: &str,
    json: bool,
) -> Result<()> {
    let store = Arc::new(CertificateStore::new());
    store.load_file(cert, password)?;

    if !json {
        let key = match query {
            Query::Cnpj(cnpj) => format!("CNPJ {cnpj}"),
            Query::Ie(ie) => format!("IE {ie}"),
        };
        println!(
            "{} {} in {} ({})",
            style("Querying").bold(),
            style(key).cyan(),
            style(uf).green(),
            config.environment
        );
        println!();
    }

    let client = ConsultaCadastroClient::new(config, store);
    let pb = spinner("Waiting for SEFAZ...");
    let result = match query {
        Query::Cnpj(cnpj) => client.consultar(uf, cnpj),
        Query::Ie(ie) => client.consultar_por_ie(uf, ie),
    };
    pb.finish_and_clear();
    let response = result?;

    if json {
        let text = serde_json::to_string_pretty(&response)
            .map_err(|e| ParseError::Write(e.to_string()))?;
        println!("{text}");
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &ConsultaResponse) {
    let status = format!(
        "{} {}",
        response.status_code,
        response.status_message.as_deref().unwrap_or_default()
    );
    if response.has_occurrences() {
        println!("  Status: {}", style(status).green());
    } else {
        println!("  Status: {}", style(status).yellow());
    }
    if let Some(timestamp) = response.query_timestamp {
        println!("  Queried at: {}", timestamp.format("%d/%m/%Y %H:%M:%S"));
    }
    println!("  Records: {}", response.records.len());

    for record in &response.records {
        println!();
        println!(
            "  {} {}",
            style("IE").bold(),
            style(&record.state_registration).cyan()
        );
        println!("    Status: {}", record.status_description);
        if let Some(name) = &record.legal_name {
            println!("    Name: {name}");
        }
        if let Some(trade_name) = &record.trade_name {
            println!("    Trade name: {trade_name}");
        }
        if let Some(date) = record.last_status_change {
            println!("    Since: {}", date.format("%d/%m/%Y"));
        }
        println!(
            "    NF-e: {}  CT-e: {}",
            yes_no(record.nfe_accredited),
            yes_no(record.cte_accredited)
        );
        if let Some(address) = &record.address {
            let line: Vec<&str> = [
                address.street.as_deref(),
                address.number.as_deref(),
                address.neighborhood.as_deref(),
                address.city_name.as_deref(),
            ]
            .into_iter()
            .flatten()
            .collect();
            println!("    Address: {}", line.join(", "));
        }
    }

    for warning in &response.warnings {
        println!("  {} {warning}", style("Warning:").yellow().bold());
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn endpoints_command(uf: Option<Uf>) {
    let registry = EndpointRegistry::default();
    match uf {
        Some(uf) => print_endpoint(&registry.describe(uf)),
        None => {
            for uf in registry.jurisdictions() {
                print_endpoint(&registry.describe(uf));
            }
        }
    }
}

fn print_endpoint(info: &EndpointInfo) {
    let group = if info.shared_infrastructure {
        style("SVRS").yellow()
    } else {
        style("own").dim()
    };
    println!("{} [{}]", style(info.uf).bold(), group);
    println!("  production: {}", info.production.as_deref().unwrap_or("-"));
    println!("  staging:    {}", info.staging.as_deref().unwrap_or("-"));
}

fn certificado_command(cert: &Path, password: &str) -> Result<()> {
    let store = CertificateStore::new();
    let certificate = store.load_file(cert, password)?;

    println!("{}", certificate.summary());
    let days = certificate.days_until_expiry(Utc::now());
    if days < 30 {
        println!("{}", style(format!("Expires in {days} days")).yellow().bold());
    } else {
        println!("Expires in {days} days");
    }
    Ok(())
}

fn validar_command(raw: &str) -> Result<()> {
    let cnpj = cnpj::normalize(raw)?;
    println!(
        "{} {}",
        style("Valid CNPJ:").green().bold(),
        cnpj.formatted()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_consultar() {
        let cli = Cli::parse_from([
            "consulta-cadastro",
            "consultar",
            "--uf",
            "sp",
            "--cnpj",
            "11.222.333/0001-81",
            "--cert",
            "cert.p12",
            "--password",
            "secret",
            "--homologacao",
        ]);

        let Commands::Consultar {
            uf,
            cnpj,
            ie,
            homologacao,
            insecure,
            json,
            ..
        } = cli.command
        else {
            panic!("expected consultar");
        };
        assert_eq!(uf, Uf::SP);
        assert_eq!(cnpj.as_deref(), Some("11.222.333/0001-81"));
        assert!(ie.is_none());
        assert!(homologacao);
        assert!(!insecure);
        assert!(!json);
    }

    #[test]
    fn test_cli_rejects_cnpj_and_ie_together() {
        let result = Cli::try_parse_from([
            "consulta-cadastro",
            "consultar",
            "--uf",
            "SP",
            "--cnpj",
            "11222333000181",
            "--ie",
            "110042490114",
            "--cert",
            "cert.p12",
            "--password",
            "x",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_uf() {
        let result = Cli::try_parse_from(["consulta-cadastro", "endpoints", "ZZ"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_parse_validar() {
        let cli = Cli::parse_from(["consulta-cadastro", "validar", "11222333000181"]);
        let Commands::Validar { cnpj } = cli.command else {
            panic!("expected validar");
        };
        assert_eq!(cnpj, "11222333000181");
    }
}
