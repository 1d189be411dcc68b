// # Firewall File Consumer
//
// Keeps a one-line allow-list file in sync with the external address. Tools
// that build firewall rules from a file (nftables sets, pf tables, ipset
// restore scripts) pick the new address up from here.
//
// ## Settings (`whatip/consumers`)
//
// - `firewall_file.path`: file to write (required)
// - `firewall_file.ipv4_only`: reject IPv6 addresses (default: false)
//
// ## Write semantics
//
// The file is replaced atomically (write-then-rename) so a reader never sees
// a half-written address. The previous content is returned as audit info.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use whatip_core::config::ConsumerConfig;
use whatip_core::error::ConsumerError;
use whatip_core::traits::{AuditInfo, ConsumerFactory, ExternalAddressConsumer};
use whatip_core::{ConsumerRegistry, ExternalAddress};

/// Name the factory is registered under
pub const CONSUMER_NAME: &str = "firewall_file";

/// Consumer writing the address to an allow-list file
#[derive(Debug)]
pub struct FirewallFileConsumer {
    name: String,
    path: PathBuf,
    ipv4_only: bool,
}

impl FirewallFileConsumer {
    /// Create a consumer for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            name: CONSUMER_NAME.to_string(),
            path: path.into(),
            ipv4_only: false,
        }
    }

    /// Reject IPv6 addresses
    pub fn ipv4_only(mut self, ipv4_only: bool) -> Self {
        self.ipv4_only = ipv4_only;
        self
    }

    /// Override the name used in notifications
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Target file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_previous(&self) -> Result<Option<String>, ConsumerError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => {
                let trimmed = content.trim();
                Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConsumerError::Apply(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn replace(&self, content: &str) -> std::io::Result<()> {
        let temp_path = self.temp_path();
        {
            let mut out = fs::File::create(&temp_path).await?;
            out.write_all(content.as_bytes()).await?;
            out.sync_all().await?;
        }
        fs::rename(&temp_path, &self.path).await
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }
}

#[async_trait]
impl ExternalAddressConsumer for FirewallFileConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, address: &ExternalAddress) -> Result<AuditInfo, ConsumerError> {
        if self.ipv4_only && address.is_ipv6() {
            return Err(ConsumerError::Unsupported(format!(
                "{} only accepts IPv4, got {}",
                self.path.display(),
                address
            )));
        }

        let previous = self.read_previous().await?;

        self.replace(&format!("{}\n", address)).await.map_err(|e| {
            ConsumerError::Apply(format!("failed to write {}: {}", self.path.display(), e))
        })?;

        tracing::info!("Wrote {} to {}", address, self.path.display());

        let audit = match previous {
            Some(previous) => AuditInfo::with_previous(previous),
            None => AuditInfo::empty(),
        };
        Ok(audit.detail(self.path.display().to_string()))
    }
}

/// Factory for [`FirewallFileConsumer`]
pub struct FirewallFileFactory;

impl ConsumerFactory for FirewallFileFactory {
    fn create(
        &self,
        config: &ConsumerConfig,
    ) -> Result<Box<dyn ExternalAddressConsumer>, whatip_core::Error> {
        let path = config.require_str("path")?;
        let ipv4_only = config.bool_setting("ipv4_only")?.unwrap_or(false);

        Ok(Box::new(
            FirewallFileConsumer::new(path)
                .ipv4_only(ipv4_only)
                .with_name(config.name.clone()),
        ))
    }
}

/// Register the firewall file consumer
pub fn register(registry: &ConsumerRegistry) {
    registry.register_consumer(CONSUMER_NAME, Box::new(FirewallFileFactory));
}
