//! Pool configuration.

use std::path::PathBuf;
use std::time::Duration;

use authpool_auth::{AuthMode, Credentials, KerberosConfig, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::properties;

/// Parameters handed verbatim to the [`Connector`](crate::Connector) when
/// opening a physical connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectParams {
    /// Driver connection URL.
    pub url: String,
    /// Open connections in read-only mode.
    pub read_only: bool,
    /// Open connections with auto-commit enabled.
    pub auto_commit: bool,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            url: String::new(),
            read_only: false,
            auto_commit: true,
        }
    }
}

/// Configuration for the connection pool.
///
/// Durations of zero for `max_lifetime` and `idle_timeout` mean unbounded.
/// When serialized, durations are expressed in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Name used in log events.
    pub pool_name: String,

    /// Maximum number of physical connections, idle and in use combined.
    pub max_pool_size: u32,

    /// Maximum lifetime of a connection.
    #[serde(with = "millis")]
    pub max_lifetime: Duration,

    /// Time a connection can sit idle before being retired.
    #[serde(with = "millis")]
    pub idle_timeout: Duration,

    /// Deadline for the liveness probe run on idle connections at checkout.
    #[serde(with = "millis")]
    pub validation_timeout: Duration,

    /// Total time an acquire may take, including validation and creation.
    #[serde(with = "millis")]
    pub acquire_timeout: Duration,

    /// Fixed reaper interval; derived from the lifetime bounds when unset.
    #[serde(with = "opt_millis")]
    pub reaper_interval: Option<Duration>,

    /// Authentication mode and its parameters.
    pub credentials: Credentials,

    /// Parameters passed to the connector.
    pub connect: ConnectParams,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_name: "authpool".into(),
            max_pool_size: 10,
            max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(10 * 60),
            validation_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
            reaper_interval: None,
            credentials: Credentials::None,
            connect: ConnectParams::default(),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool name.
    #[must_use]
    pub fn pool_name(mut self, name: impl Into<String>) -> Self {
        self.pool_name = name.into();
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the validation timeout.
    #[must_use]
    pub fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Run the reaper at a fixed interval.
    #[must_use]
    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = Some(interval);
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the connector parameters.
    #[must_use]
    pub fn connect(mut self, params: ConnectParams) -> Self {
        self.connect = params;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_pool_size == 0 {
            return Err(PoolError::Configuration(
                "max_pool_size must be greater than 0".into(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "acquire_timeout must be greater than 0".into(),
            ));
        }
        if self.validation_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "validation_timeout must be greater than 0".into(),
            ));
        }
        if self.validation_timeout > self.acquire_timeout {
            return Err(PoolError::Configuration(
                "validation_timeout cannot be greater than acquire_timeout".into(),
            ));
        }
        if self.reaper_interval.is_some_and(|i| i.is_zero()) {
            return Err(PoolError::Configuration(
                "reaper_interval must be greater than 0".into(),
            ));
        }
        self.credentials
            .validate()
            .map_err(|e| PoolError::Configuration(e.to_string()))
    }

    /// Build a configuration from `.properties` text.
    ///
    /// Reads the `datasource.<datasource>.*` keys for pool and connection
    /// settings and the `authentication.*` keys for credentials. Durations
    /// are in milliseconds. Keys for other datasources and unknown keys are
    /// ignored. The result is validated.
    ///
    /// ```text
    /// datasource.reports.url=jdbc:sqlserver://db.example.com:1433
    /// datasource.reports.maximumPoolSize=8
    /// datasource.reports.idleTimeout=600000
    /// authentication.type=kerberos
    /// authentication.kerberos.krb5FilePath=/etc/krb5.conf
    /// authentication.kerberos.principal=svc_reports@EXAMPLE.COM
    /// authentication.kerberos.keytabPath=/etc/security/svc_reports.keytab
    /// ```
    pub fn from_properties(text: &str, datasource: &str) -> Result<Self, PoolError> {
        let prefix = format!("datasource.{datasource}.");
        let mut config = Self::default();
        let mut auth = AuthSettings::default();

        for (key, value) in properties::parse(text)? {
            if let Some(prop) = key.strip_prefix(&prefix) {
                config.apply_datasource(prop, &value, &mut auth)?;
            } else if let Some(prop) = key.strip_prefix("authentication.") {
                auth.apply(prop, value)?;
            } else {
                tracing::debug!(key = %key, "ignoring unrelated property");
            }
        }

        config.credentials = auth.into_credentials();
        config.validate()?;
        Ok(config)
    }

    fn apply_datasource(
        &mut self,
        prop: &str,
        value: &str,
        auth: &mut AuthSettings,
    ) -> Result<(), PoolError> {
        match prop {
            "url" | "jdbcUrl" => self.connect.url = value.to_string(),
            "readOnly" => self.connect.read_only = parse_bool(prop, value)?,
            "autoCommit" => self.connect.auto_commit = parse_bool(prop, value)?,
            "poolName" => self.pool_name = value.to_string(),
            "username" => auth.username = Some(value.to_string()),
            "password" => auth.password = Some(SecretString::new(value)),
            "maximumPoolSize" => self.max_pool_size = parse_num(prop, value)?,
            "maxLifetime" => self.max_lifetime = parse_millis(prop, value)?,
            "idleTimeout" => self.idle_timeout = parse_millis(prop, value)?,
            "validationTimeout" => self.validation_timeout = parse_millis(prop, value)?,
            "connectionTimeout" => self.acquire_timeout = parse_millis(prop, value)?,
            _ => {
                tracing::debug!(property = prop, "ignoring unknown datasource property");
            }
        }
        Ok(())
    }
}

/// Authentication keys collected before the mode is known.
#[derive(Default)]
struct AuthSettings {
    mode: Option<AuthMode>,
    username: Option<String>,
    password: Option<SecretString>,
    kerberos: KerberosConfig,
}

impl AuthSettings {
    fn apply(&mut self, prop: &str, value: String) -> Result<(), PoolError> {
        match prop {
            "type" => {
                let mode = value
                    .parse::<AuthMode>()
                    .map_err(|e| PoolError::Configuration(e.to_string()))?;
                self.mode = Some(mode);
            }
            "kerberos.krb5FilePath" => self.kerberos.krb5_conf_path = non_empty(value).map(PathBuf::from),
            "kerberos.principal" => self.kerberos.principal = value,
            "kerberos.keytabPath" => self.kerberos.keytab_path = non_empty(value).map(PathBuf::from),
            "kerberos.ticketCachePath" => {
                self.kerberos.ticket_cache_path = non_empty(value).map(PathBuf::from);
            }
            _ => {
                tracing::debug!(property = prop, "ignoring unknown authentication property");
            }
        }
        Ok(())
    }

    /// Without an explicit `authentication.type`, a username implies password
    /// authentication.
    fn into_credentials(self) -> Credentials {
        let mode = match self.mode {
            Some(mode) => mode,
            None if self.username.is_some() => AuthMode::Password,
            None => AuthMode::None,
        };
        match mode {
            AuthMode::None => Credentials::None,
            AuthMode::Password => Credentials::Password {
                username: self.username.unwrap_or_default(),
                password: self.password.unwrap_or_default(),
            },
            AuthMode::Kerberos => Credentials::Kerberos(self.kerberos),
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.trim().is_empty()).then_some(value)
}

fn parse_bool(prop: &str, value: &str) -> Result<bool, PoolError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(PoolError::Configuration(format!(
            "{prop}: expected a boolean, got '{value}'"
        ))),
    }
}

fn parse_num(prop: &str, value: &str) -> Result<u32, PoolError> {
    value.trim().parse().map_err(|_| {
        PoolError::Configuration(format!("{prop}: expected a non-negative integer, got '{value}'"))
    })
}

fn parse_millis(prop: &str, value: &str) -> Result<Duration, PoolError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| {
            PoolError::Configuration(format!("{prop}: expected milliseconds, got '{value}'"))
        })
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => super::millis::serialize(d, s),
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
