//! Protocol constants and client configuration.

use std::time::Duration;

use crate::error::ConfigurationError;
use crate::types::Environment;

/// Namespace of the NF-e business documents (`ConsCad`, `retConsCad`).
pub const NFE_NAMESPACE: &str = "http://www.portalfiscal.inf.br/nfe";

/// Namespace of the CadConsultaCadastro4 operation elements.
pub const CAD_NAMESPACE: &str = "http://www.portalfiscal.inf.br/nfe/wsdl/CadConsultaCadastro4";

/// SOAP 1.1 envelope namespace.
pub const SOAP_NAMESPACE: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// `SOAPAction` header value. The same for every UF.
pub const SOAP_ACTION: &str =
    "http://www.portalfiscal.inf.br/nfe/wsdl/CadConsultaCadastro4/consultaCadastro";

/// Schema version of `ConsCad` (`versao` attribute).
pub const SCHEMA_VERSION: &str = "2.00";

/// Data version carried in the envelope header (`versaoDados`).
pub const DATA_VERSION: &str = "2.00";

/// Fixed service name (`xServ`).
pub const SERVICE_NAME: &str = "CONS-CAD";

/// Content type for SOAP 1.1 requests.
pub const CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// Host shared by the SVRS (Sefaz Virtual do RS) services.
pub const SHARED_INFRASTRUCTURE_HOST: &str = "svrs.rs.gov.br";

/// Default connect and request timeout in seconds.
///
/// SEFAZ services are slow at peak hours; 30 seconds keeps calls bounded
/// without failing ordinary slow answers.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("consulta-cadastro/", env!("CARGO_PKG_VERSION"));

/// How the server's certificate is checked during the TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServerVerification {
    /// Verify against the operating system trust store.
    #[default]
    SystemRoots,

    /// Verify against the given DER-encoded CA certificates only, e.g. the
    /// ICP-Brasil chain when the system store lacks it.
    TrustedRoots(Vec<Vec<u8>>),

    /// Accept any server certificate.
    ///
    /// INSECURE: only for development against homologation hosts with broken
    /// chains. Must be selected explicitly through
    /// [`ClientConfigBuilder::danger_accept_invalid_server_certs`].
    DangerAcceptInvalidCerts,
}

/// Settings shared by every consultation made through a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub environment: Environment,
    pub timeout: Duration,
    pub server_verification: ServerVerification,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            server_verification: ServerVerification::SystemRoots,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// * `CADASTRO_AMBIENTE` - `producao`/`production` or `homologacao`/`staging`
    /// * `CADASTRO_TIMEOUT_SECS` - connect and request timeout
    ///
    /// The insecure TLS mode cannot be enabled from the environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let mut builder = Self::builder();

        if let Ok(value) = std::env::var("CADASTRO_AMBIENTE") {
            builder = builder.environment(value.parse()?);
        }

        if let Ok(value) = std::env::var("CADASTRO_TIMEOUT_SECS") {
            let secs: u64 = value.trim().parse().map_err(|_| {
                ConfigurationError::Invalid(format!(
                    "CADASTRO_TIMEOUT_SECS must be a number of seconds, got '{value}'"
                ))
            })?;
            builder = builder.timeout(Duration::from_secs(secs));
        }

        builder.build()
    }

    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Trust only these DER-encoded CA certificates for the server.
    pub fn trusted_roots(mut self, roots: Vec<Vec<u8>>) -> Self {
        self.config.server_verification = ServerVerification::TrustedRoots(roots);
        self
    }

    /// Disable server certificate verification.
    ///
    /// The client certificate is still presented; only the server side of the
    /// handshake goes unchecked.
    pub fn danger_accept_invalid_server_certs(mut self) -> Self {
        self.config.server_verification = ServerVerification::DangerAcceptInvalidCerts;
        self
    }

    /// Finish the configuration.
    ///
    /// # Errors
    /// Returns `ConfigurationError::Invalid` for a zero timeout or an empty
    /// trusted root list.
    pub fn build(self) -> Result<ClientConfig, ConfigurationError> {
        if self.config.timeout.is_zero() {
            return Err(ConfigurationError::Invalid(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if matches!(
            &self.config.server_verification,
            ServerVerification::TrustedRoots(roots) if roots.is_empty()
        ) {
            return Err(ConfigurationError::Invalid(
                "trusted root list is empty".to_string(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_secure_and_bounded() {
        let config = ClientConfig::default();
        assert_eq!(config.server_verification, ServerVerification::SystemRoots);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.environment, Environment::Production);
    }

    #[test]
    fn test_builder_insecure_is_explicit() {
        let config = ClientConfig::builder()
            .environment(Environment::Staging)
            .danger_accept_invalid_server_certs()
            .build()
            .unwrap();
        assert_eq!(
            config.server_verification,
            ServerVerification::DangerAcceptInvalidCerts
        );
        assert_eq!(config.environment, Environment::Staging);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ClientConfig::builder().timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(ConfigurationError::Invalid(_))));
    }

    #[test]
    fn test_empty_trusted_roots_rejected() {
        let result = ClientConfig::builder().trusted_roots(Vec::new()).build();
        assert!(matches!(result, Err(ConfigurationError::Invalid(_))));
    }

    #[test]
    fn test_user_agent_has_version() {
        assert!(USER_AGENT.starts_with("consulta-cadastro/"));
    }
}
