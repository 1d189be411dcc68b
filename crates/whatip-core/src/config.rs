//! Configuration types
//!
//! [`ServiceConfig`] is the process-wide configuration snapshot. It is read
//! from the [`ConfigStore`](crate::traits::ConfigStore) at startup (and on an
//! explicit reload) and handed to the scheduler; nothing reads configuration
//! from ambient state.
//!
//! ## Store layout
//!
//! ```text
//! whatip/parameters
//!   service_host                 "https://api.ipify.org?format=json"
//!   email_to                     "ops@example.com, oncall@example.com"
//!   email_from                   "whatip@example.com"
//!   smtp_host / smtp_port        "smtp.example.com" / 25
//!   enable_ssl                   false
//!   smtp_username / smtp_password (optional)
//!   mail_pickup_dir              (optional)
//!   log_file_path                "/var/log/whatip"
//!   watch_interval               300000            (ms)
//!   consumers                    "firewall_file"   (enabled, in order)
//!   template_dir                 (optional)
//!   notify_on_first_observation  true
//!   notify_on_probe_error        false
//!   operation_timeout            30000             (ms)
//!   current_external_ip          (written by the service)
//! whatip/consumers
//!   firewall_file.path           "/etc/ftp/external_ip"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigStoreError;
use crate::traits::ConfigValue;

/// Fixed service identifier all namespaces hang off
pub const SERVICE_ID: &str = "whatip";

/// Namespace holding service parameters and the current address
pub const PARAMETERS_NAMESPACE: &str = "whatip/parameters";

/// Namespace holding per-consumer settings (`<name>.<setting>`)
pub const CONSUMERS_NAMESPACE: &str = "whatip/consumers";

/// Default poll interval (5 minutes)
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(300_000);

/// Default bound on a single collaborator call
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Parameter keys
pub mod keys {
    pub const SERVICE_HOST: &str = "service_host";
    pub const EMAIL_TO: &str = "email_to";
    pub const EMAIL_FROM: &str = "email_from";
    pub const SMTP_HOST: &str = "smtp_host";
    pub const SMTP_PORT: &str = "smtp_port";
    pub const ENABLE_SSL: &str = "enable_ssl";
    pub const SMTP_USERNAME: &str = "smtp_username";
    pub const SMTP_PASSWORD: &str = "smtp_password";
    pub const MAIL_PICKUP_DIR: &str = "mail_pickup_dir";
    pub const LOG_FILE_PATH: &str = "log_file_path";
    pub const WATCH_INTERVAL: &str = "watch_interval";
    pub const CONSUMERS: &str = "consumers";
    pub const TEMPLATE_DIR: &str = "template_dir";
    pub const NOTIFY_ON_FIRST_OBSERVATION: &str = "notify_on_first_observation";
    pub const NOTIFY_ON_PROBE_ERROR: &str = "notify_on_probe_error";
    pub const OPERATION_TIMEOUT: &str = "operation_timeout";
    pub const CURRENT_EXTERNAL_IP: &str = "current_external_ip";
}

/// Main service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Discovery endpoint queried by the probe
    pub service_host: String,

    /// Time between the end of one cycle and the start of the next
    pub watch_interval: Duration,

    /// Directory receiving the daily log files
    pub log_file_path: PathBuf,

    /// Mail transport and addressing
    pub mail: MailSettings,

    /// Enabled consumers, in registration order
    pub consumers: Vec<ConsumerConfig>,

    /// Directory holding notification templates
    pub template_dir: Option<PathBuf>,

    /// What gets mailed and when
    pub notifications: NotificationPolicy,

    /// Upper bound for one probe, consumer or mail call
    pub operation_timeout: Duration,
}

impl ServiceConfig {
    /// Create a configuration with defaults for everything optional
    pub fn new(
        service_host: impl Into<String>,
        mail: MailSettings,
        log_file_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            service_host: service_host.into(),
            watch_interval: DEFAULT_WATCH_INTERVAL,
            log_file_path: log_file_path.into(),
            mail,
            consumers: Vec::new(),
            template_dir: None,
            notifications: NotificationPolicy::default(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Set the poll interval
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    /// Append an enabled consumer
    pub fn with_consumer(mut self, consumer: ConsumerConfig) -> Self {
        self.consumers.push(consumer);
        self
    }

    /// Set the template directory
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = Some(dir.into());
        self
    }

    /// Set the notification policy
    pub fn with_notifications(mut self, notifications: NotificationPolicy) -> Self {
        self.notifications = notifications;
        self
    }

    /// Set the collaborator timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigStoreError> {
        if self.service_host.trim().is_empty() {
            return Err(ConfigStoreError::invalid(
                keys::SERVICE_HOST,
                "discovery endpoint cannot be empty",
            ));
        }
        if !self.service_host.starts_with("http://") && !self.service_host.starts_with("https://")
        {
            return Err(ConfigStoreError::invalid(
                keys::SERVICE_HOST,
                format!("must use HTTP or HTTPS scheme, got {}", self.service_host),
            ));
        }
        if self.watch_interval.is_zero() {
            return Err(ConfigStoreError::invalid(
                keys::WATCH_INTERVAL,
                "must be greater than zero",
            ));
        }
        if self.operation_timeout.is_zero() {
            return Err(ConfigStoreError::invalid(
                keys::OPERATION_TIMEOUT,
                "must be greater than zero",
            ));
        }
        if self.log_file_path.as_os_str().is_empty() {
            return Err(ConfigStoreError::invalid(
                keys::LOG_FILE_PATH,
                "cannot be empty",
            ));
        }
        self.mail.validate()?;

        let mut seen = std::collections::HashSet::new();
        for consumer in &self.consumers {
            if consumer.name.is_empty() {
                return Err(ConfigStoreError::invalid(
                    keys::CONSUMERS,
                    "consumer name cannot be empty",
                ));
            }
            if !seen.insert(consumer.name.as_str()) {
                return Err(ConfigStoreError::invalid(
                    keys::CONSUMERS,
                    format!("consumer {} listed twice", consumer.name),
                ));
            }
        }

        Ok(())
    }

    /// Build a configuration from the two store namespaces
    ///
    /// Every required value is read explicitly; a missing or mistyped key is
    /// reported as a [`ConfigStoreError`] naming the key.
    pub fn from_store_entries(
        parameters: &BTreeMap<String, ConfigValue>,
        consumer_settings: &BTreeMap<String, ConfigValue>,
    ) -> Result<Self, ConfigStoreError> {
        let p = Entries::new(PARAMETERS_NAMESPACE, parameters);

        let recipients = split_list(&p.required_str(keys::EMAIL_TO)?);
        let credentials = match (
            p.optional_str(keys::SMTP_USERNAME)?,
            p.optional_str(keys::SMTP_PASSWORD)?,
        ) {
            (Some(username), password) => Some(SmtpCredentials {
                username,
                password: password.unwrap_or_default(),
            }),
            (None, Some(_)) => {
                return Err(ConfigStoreError::invalid(
                    keys::SMTP_PASSWORD,
                    "password set without smtp_username",
                ));
            }
            (None, None) => None,
        };

        let smtp_port = p.required_int(keys::SMTP_PORT)?;
        let smtp_port = u16::try_from(smtp_port)
            .ok()
            .filter(|port| *port > 0)
            .ok_or_else(|| {
                ConfigStoreError::invalid(keys::SMTP_PORT, format!("{} is not a port", smtp_port))
            })?;

        let mail = MailSettings {
            smtp_host: p.required_str(keys::SMTP_HOST)?,
            smtp_port,
            enable_ssl: p.optional_bool(keys::ENABLE_SSL)?.unwrap_or(false),
            credentials,
            pickup_dir: p.optional_str(keys::MAIL_PICKUP_DIR)?.map(PathBuf::from),
            sender: p.required_str(keys::EMAIL_FROM)?,
            recipients,
        };

        let consumers = p
            .optional_str(keys::CONSUMERS)?
            .map(|list| split_list(&list))
            .unwrap_or_default()
            .into_iter()
            .map(|name| ConsumerConfig::from_namespace(name, consumer_settings))
            .collect();

        let defaults = NotificationPolicy::default();
        let config = Self {
            service_host: p.required_str(keys::SERVICE_HOST)?,
            watch_interval: p
                .optional_millis(keys::WATCH_INTERVAL)?
                .unwrap_or(DEFAULT_WATCH_INTERVAL),
            log_file_path: PathBuf::from(p.required_str(keys::LOG_FILE_PATH)?),
            mail,
            consumers,
            template_dir: p.optional_str(keys::TEMPLATE_DIR)?.map(PathBuf::from),
            notifications: NotificationPolicy {
                on_first_observation: p
                    .optional_bool(keys::NOTIFY_ON_FIRST_OBSERVATION)?
                    .unwrap_or(defaults.on_first_observation),
                on_probe_error: p
                    .optional_bool(keys::NOTIFY_ON_PROBE_ERROR)?
                    .unwrap_or(defaults.on_probe_error),
            },
            operation_timeout: p
                .optional_millis(keys::OPERATION_TIMEOUT)?
                .unwrap_or(DEFAULT_OPERATION_TIMEOUT),
        };

        config.validate()?;
        Ok(config)
    }

    /// Flatten into `(parameters, consumer settings)` store entries
    ///
    /// The current address is not part of the configuration and is written
    /// separately by [`PersistentState`](crate::persistence::PersistentState).
    pub fn to_store_entries(&self) -> (Vec<(String, ConfigValue)>, Vec<(String, ConfigValue)>) {
        let mut params: Vec<(String, ConfigValue)> = vec![
            (keys::SERVICE_HOST.into(), self.service_host.clone().into()),
            (keys::EMAIL_TO.into(), self.mail.recipients.join(", ").into()),
            (keys::EMAIL_FROM.into(), self.mail.sender.clone().into()),
            (keys::SMTP_HOST.into(), self.mail.smtp_host.clone().into()),
            (keys::SMTP_PORT.into(), i64::from(self.mail.smtp_port).into()),
            (keys::ENABLE_SSL.into(), self.mail.enable_ssl.into()),
            (
                keys::LOG_FILE_PATH.into(),
                self.log_file_path.display().to_string().into(),
            ),
            (
                keys::WATCH_INTERVAL.into(),
                millis(self.watch_interval).into(),
            ),
            (
                keys::CONSUMERS.into(),
                self.consumers
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
                    .into(),
            ),
            (
                keys::NOTIFY_ON_FIRST_OBSERVATION.into(),
                self.notifications.on_first_observation.into(),
            ),
            (
                keys::NOTIFY_ON_PROBE_ERROR.into(),
                self.notifications.on_probe_error.into(),
            ),
            (
                keys::OPERATION_TIMEOUT.into(),
                millis(self.operation_timeout).into(),
            ),
        ];

        if let Some(credentials) = &self.mail.credentials {
            params.push((keys::SMTP_USERNAME.into(), credentials.username.clone().into()));
            params.push((keys::SMTP_PASSWORD.into(), credentials.password.clone().into()));
        }
        if let Some(dir) = &self.mail.pickup_dir {
            params.push((keys::MAIL_PICKUP_DIR.into(), dir.display().to_string().into()));
        }
        if let Some(dir) = &self.template_dir {
            params.push((keys::TEMPLATE_DIR.into(), dir.display().to_string().into()));
        }

        let consumer_settings = self
            .consumers
            .iter()
            .flat_map(|c| {
                c.settings
                    .iter()
                    .map(move |(k, v)| (format!("{}.{}", c.name, k), v.clone()))
            })
            .collect();

        (params, consumer_settings)
    }
}

/// Mail settings
#[derive(Clone, PartialEq, Eq)]
pub struct MailSettings {
    /// SMTP relay host
    pub smtp_host: String,
    /// SMTP relay port
    pub smtp_port: u16,
    /// Require TLS towards the relay
    pub enable_ssl: bool,
    /// Optional relay credentials
    pub credentials: Option<SmtpCredentials>,
    /// Directory a local MTA picks messages up from
    pub pickup_dir: Option<PathBuf>,
    /// Sender address
    pub sender: String,
    /// Administrator addresses
    pub recipients: Vec<String>,
}

impl MailSettings {
    /// Create mail settings without credentials or pickup directory
    pub fn new(
        smtp_host: impl Into<String>,
        smtp_port: u16,
        sender: impl Into<String>,
        recipients: Vec<String>,
    ) -> Self {
        Self {
            smtp_host: smtp_host.into(),
            smtp_port,
            enable_ssl: false,
            credentials: None,
            pickup_dir: None,
            sender: sender.into(),
            recipients,
        }
    }

    /// Validate the mail settings
    pub fn validate(&self) -> Result<(), ConfigStoreError> {
        if self.smtp_host.trim().is_empty() {
            return Err(ConfigStoreError::invalid(keys::SMTP_HOST, "cannot be empty"));
        }
        if self.smtp_port == 0 {
            return Err(ConfigStoreError::invalid(keys::SMTP_PORT, "must be > 0"));
        }
        if !looks_like_address(&self.sender) {
            return Err(ConfigStoreError::invalid(
                keys::EMAIL_FROM,
                format!("{} is not an email address", self.sender),
            ));
        }
        if self.recipients.is_empty() {
            return Err(ConfigStoreError::invalid(
                keys::EMAIL_TO,
                "at least one recipient is required",
            ));
        }
        if let Some(bad) = self.recipients.iter().find(|r| !looks_like_address(r)) {
            return Err(ConfigStoreError::invalid(
                keys::EMAIL_TO,
                format!("{} is not an email address", bad),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSettings")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("enable_ssl", &self.enable_ssl)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|c| c.username.as_str()),
            )
            .field("pickup_dir", &self.pickup_dir)
            .field("sender", &self.sender)
            .field("recipients", &self.recipients)
            .finish()
    }
}

/// SMTP relay credentials
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

/// Which events produce an administrator email
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPolicy {
    /// Mail when the very first address is observed (no previous value)
    pub on_first_observation: bool,
    /// Mail when the discovery endpoint fails
    pub on_probe_error: bool,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            on_first_observation: true,
            on_probe_error: false,
        }
    }
}

/// One enabled consumer and its settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Factory name the consumer is registered under
    pub name: String,
    /// Settings with the `<name>.` prefix stripped
    pub settings: BTreeMap<String, ConfigValue>,
}

impl ConsumerConfig {
    /// Create a consumer configuration without settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: BTreeMap::new(),
        }
    }

    /// Add a setting
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Collect `<name>.<setting>` entries from the consumers namespace
    fn from_namespace(name: String, entries: &BTreeMap<String, ConfigValue>) -> Self {
        let prefix = format!("{}.", name);
        let settings = entries
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&prefix)
                    .map(|setting| (setting.to_string(), value.clone()))
            })
            .collect();
        Self { name, settings }
    }

    /// A required string setting
    pub fn require_str(&self, key: &str) -> Result<&str, ConfigStoreError> {
        let full_key = format!("{}.{}", self.name, key);
        match self.settings.get(key) {
            Some(value) => value
                .as_str()
                .filter(|s| !s.trim().is_empty())
                .ok_or(ConfigStoreError::WrongType {
                    key: full_key,
                    expected: "non-empty string",
                }),
            None => Err(ConfigStoreError::missing(CONSUMERS_NAMESPACE, full_key)),
        }
    }

    /// An optional boolean setting
    pub fn bool_setting(&self, key: &str) -> Result<Option<bool>, ConfigStoreError> {
        match self.settings.get(key) {
            Some(value) => value.as_bool().map(Some).ok_or(ConfigStoreError::WrongType {
                key: format!("{}.{}", self.name, key),
                expected: "boolean",
            }),
            None => Ok(None),
        }
    }
}

/// Typed reads over one namespace's entries
struct Entries<'a> {
    namespace: &'static str,
    map: &'a BTreeMap<String, ConfigValue>,
}

impl<'a> Entries<'a> {
    fn new(namespace: &'static str, map: &'a BTreeMap<String, ConfigValue>) -> Self {
        Self { namespace, map }
    }

    fn required_str(&self, key: &str) -> Result<String, ConfigStoreError> {
        self.optional_str(key)?
            .ok_or_else(|| ConfigStoreError::missing(self.namespace, key))
    }

    fn optional_str(&self, key: &str) -> Result<Option<String>, ConfigStoreError> {
        match self.map.get(key) {
            None => Ok(None),
            Some(ConfigValue::Str(s)) if s.trim().is_empty() => Ok(None),
            Some(ConfigValue::Str(s)) => Ok(Some(s.trim().to_string())),
            Some(_) => Err(ConfigStoreError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
        }
    }

    fn required_int(&self, key: &str) -> Result<i64, ConfigStoreError> {
        match self.map.get(key) {
            None => Err(ConfigStoreError::missing(self.namespace, key)),
            Some(value) => value.as_int().ok_or(ConfigStoreError::WrongType {
                key: key.to_string(),
                expected: "integer",
            }),
        }
    }

    fn optional_bool(&self, key: &str) -> Result<Option<bool>, ConfigStoreError> {
        match self.map.get(key) {
            None => Ok(None),
            Some(value) => value.as_bool().map(Some).ok_or(ConfigStoreError::WrongType {
                key: key.to_string(),
                expected: "boolean",
            }),
        }
    }

    fn optional_millis(&self, key: &str) -> Result<Option<Duration>, ConfigStoreError> {
        match self.map.get(key) {
            None => Ok(None),
            Some(value) => {
                let ms = value.as_int().ok_or(ConfigStoreError::WrongType {
                    key: key.to_string(),
                    expected: "integer (milliseconds)",
                })?;
                let ms = u64::try_from(ms)
                    .ok()
                    .filter(|ms| *ms > 0)
                    .ok_or_else(|| ConfigStoreError::invalid(key, "must be greater than zero"))?;
                Ok(Some(Duration::from_millis(ms)))
            }
        }
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split([',', ';'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn looks_like_address(addr: &str) -> bool {
    match addr.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !addr.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
