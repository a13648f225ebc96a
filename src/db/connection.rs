use std::time::Duration;

use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;
use tracing::info;

/// Environment variable holding a complete libpq connection string. When set
/// it replaces the configured connection parameters.
pub const CONNECTION_ENV: &str = "DB_CONNECTION";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub ssl_mode: SslMode,
    /// Skip certificate and hostname checks in `prefer`/`require` mode.
    pub accept_invalid_certs: bool,
    /// PEM bundle of extra trusted roots; the system store otherwise.
    pub ca_cert_path: Option<String>,
}

/// libpq `sslmode`. `verify-ca` and `verify-full` always check the server
/// certificate, whatever `accept_invalid_certs` says.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    /// tokio-postgres only knows disable/prefer/require; verification for the
    /// stricter modes is done by the TLS connector.
    fn as_str(self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => "require",
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 5432,
            database: String::from("foglamp"),
            username: String::from("postgres"),
            password: String::new(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: false,
            ca_cert_path: None,
        }
    }
}

impl ConnectionConfig {
    /// libpq `key=value` string built from the configured fields.
    pub fn connection_string(&self) -> String {
        let mut conn = format!(
            "host={} port={} dbname={} user={} sslmode={} connect_timeout=10",
            quote_conn_value(&self.host),
            self.port,
            quote_conn_value(&self.database),
            quote_conn_value(&self.username),
            self.ssl_mode.as_str()
        );
        if !self.password.is_empty() {
            conn.push_str(" password=");
            conn.push_str(&quote_conn_value(&self.password));
        }
        conn
    }

    /// `$DB_CONNECTION` if set and non-empty, otherwise [`Self::connection_string`].
    pub fn effective_connection_string(&self) -> String {
        std::env::var(CONNECTION_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.connection_string())
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

/// Creates a connection pool. Connections are opened lazily, on first use.
pub fn create_pool(config: &ConnectionConfig, max_size: usize) -> Result<Pool> {
    let conn_string = config.effective_connection_string();
    let pg_config: tokio_postgres::Config = conn_string
        .parse()
        .context("Invalid PostgreSQL connection string")?;
    let manager_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let manager = match config.ssl_mode {
        SslMode::Disable => Manager::from_config(pg_config, NoTls, manager_config),
        SslMode::Prefer | SslMode::Require => {
            Manager::from_config(pg_config, build_tls_connector(config, false)?, manager_config)
        }
        SslMode::VerifyCa | SslMode::VerifyFull => {
            Manager::from_config(pg_config, build_tls_connector(config, true)?, manager_config)
        }
    };

    let pool = Pool::builder(manager)
        .max_size(max_size.max(1))
        .create_timeout(Some(CONNECT_TIMEOUT))
        .wait_timeout(Some(CONNECT_TIMEOUT))
        .runtime(Runtime::Tokio1)
        .build()
        .context("Failed to build PostgreSQL connection pool")?;

    info!(
        server = %config.display_string(),
        max_size,
        "PostgreSQL connection pool ready"
    );
    Ok(pool)
}

/// `verify` forces certificate checks on.
fn build_tls_connector(config: &ConnectionConfig, verify: bool) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if config.accept_invalid_certs && !verify {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    } else if let Some(ca_path) = &config.ca_cert_path {
        let bundle = std::fs::read(ca_path)
            .with_context(|| format!("Failed to read CA bundle: {}", ca_path))?;
        for cert in parse_pem_certificates(&bundle)? {
            builder.add_root_certificate(cert);
        }
    }

    Ok(MakeTlsConnector::new(
        builder.build().context("Failed to build TLS connector")?,
    ))
}

/// Splits a PEM bundle into its certificates.
fn parse_pem_certificates(pem_data: &[u8]) -> Result<Vec<native_tls::Certificate>> {
    const END: &str = "-----END CERTIFICATE-----";
    let text = std::str::from_utf8(pem_data).context("CA bundle is not UTF-8")?;

    let mut certs = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("-----BEGIN CERTIFICATE-----") {
        let Some(len) = rest[start..].find(END) else {
            break;
        };
        let block = &rest[start..start + len + END.len()];
        certs.push(
            native_tls::Certificate::from_pem(block.as_bytes())
                .context("Invalid certificate in CA bundle")?,
        );
        rest = &rest[start + len + END.len()..];
    }

    if certs.is_empty() {
        anyhow::bail!("CA bundle contains no certificates");
    }
    Ok(certs)
}

/// libpq `key=value` quoting: single quotes, with `\` and `'` escaped.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_quotes_values() {
        let config = ConnectionConfig {
            password: "it's".to_string(),
            ..ConnectionConfig::default()
        };
        assert_eq!(
            config.connection_string(),
            "host='localhost' port=5432 dbname='foglamp' user='postgres' sslmode=prefer \
             connect_timeout=10 password='it\\'s'"
        );
    }

    #[test]
    fn test_password_omitted_when_empty() {
        let config = ConnectionConfig::default();
        assert!(!config.connection_string().contains("password"));
        assert_eq!(config.display_string(), "postgres@localhost:5432/foglamp");
    }

    #[test]
    fn test_config_from_toml() {
        let config: ConnectionConfig = toml::from_str(
            r#"
            host = "db.internal"
            ssl_mode = "verify-full"
            password = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 5432);
        assert_eq!(config.ssl_mode, SslMode::VerifyFull);
        assert_eq!(config.password, "secret");
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_pem_without_certificates_is_rejected() {
        assert!(parse_pem_certificates(b"not a certificate").is_err());
    }
}
