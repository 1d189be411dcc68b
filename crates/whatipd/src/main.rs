// # whatipd - external address watcher daemon
//
// Thin integration layer. Every decision about probing, change detection,
// dispatch and mail lives in whatip-core; this binary only:
//
// 1. Reads the bootstrap environment
// 2. Opens the config store and loads the service configuration
// 3. Installs the log sinks
// 4. Registers consumer factories and builds probe, mailer and consumers
// 5. Runs the scheduler until SIGINT/SIGTERM
//
// ## Environment
//
// - `WHATIP_STORE_PATH`: JSON config store file (required)
// - `WHATIP_LOG_LEVEL`: trace, debug, info, warn or error (default: info)
// - `WHATIP_PURGE`: when `true` or `1`, remove everything whatipd stored and
//   exit instead of starting (uninstall)
//
// Everything else is read from the `whatip/parameters` namespace of the store.
//
// ## Signals
//
// - `SIGHUP`: reload the configuration from the store
// - `SIGUSR1`: write the running state back to the store
// - `SIGINT`, `SIGTERM`: finish the current cycle, flush and exit
//
// ## Example
//
// ```bash
// export WHATIP_STORE_PATH=/var/lib/whatip/store.json
// export WHATIP_LOG_LEVEL=debug
//
// whatipd
// ```

mod logging;

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};

use whatip_core::notify::PickupDirectoryMailer;
use whatip_core::{
    ConsumerRegistry, ControlCommand, FileConfigStore, PersistentState, Scheduler, SchedulerEvent,
    SchedulerOptions, ServiceConfig,
};
use whatip_probe_http::HttpAddressProbe;

/// Upper bound for the final cycle and flush after a stop signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (including an unusable log sink)
#[derive(Debug, Clone, Copy)]
enum WhatipExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<WhatipExitCode> for ExitCode {
    fn from(code: WhatipExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Bootstrap configuration
struct Config {
    store_path: PathBuf,
    log_level: String,
    purge: bool,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            store_path: env::var("WHATIP_STORE_PATH")
                .map(PathBuf::from)
                .context("WHATIP_STORE_PATH is required")?,
            log_level: env::var("WHATIP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            purge: env::var("WHATIP_PURGE")
                .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1"))
                .unwrap_or(false),
        })
    }

    fn validate(&self) -> Result<Level> {
        if self.store_path.as_os_str().is_empty() {
            anyhow::bail!("WHATIP_STORE_PATH cannot be empty");
        }

        if let Some(parent) = self.store_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "WHATIP_STORE_PATH parent directory does not exist: {}. \
                    Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        logging::parse_level(&self.log_level).ok_or_else(|| {
            anyhow::anyhow!(
                "WHATIP_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            )
        })
    }
}

/// Everything built from the store before the scheduler starts
struct Daemon {
    scheduler: Scheduler,
    events: mpsc::Receiver<SchedulerEvent>,
    log_dir: PathBuf,
}

impl Daemon {
    async fn bootstrap(config: &Config) -> Result<Self> {
        let store = FileConfigStore::new(&config.store_path)
            .await
            .with_context(|| format!("Failed to open {}", config.store_path.display()))?;
        let persistence = PersistentState::new(Arc::new(store));

        let state = persistence
            .load()
            .await
            .context("Failed to load service configuration")?;

        let registry = Arc::new(ConsumerRegistry::new());
        #[cfg(feature = "firewall-file")]
        whatip_consumer_file::register(&registry);

        let consumers = registry.build_consumers(&state.config)?;

        // Probe calls are bounded by the scheduler with the reloadable
        // operation_timeout; the mailer reads the pickup directory per send
        let pickup = pickup_dir(&state.config)?;
        let probe = HttpAddressProbe::new();
        let log_dir = state.config.log_file_path.clone();

        let (scheduler, events) = Scheduler::new(
            Box::new(probe),
            Box::new(PickupDirectoryMailer::new(pickup)),
            persistence,
            state,
            consumers,
            SchedulerOptions {
                registry: Some(registry),
                ..SchedulerOptions::default()
            },
        )?;

        Ok(Self {
            scheduler,
            events,
            log_dir,
        })
    }

    async fn run(self) -> Result<()> {
        let Self {
            scheduler,
            mut events,
            ..
        } = self;

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!("Scheduler event: {:?}", event);
            }
        });

        let (control_tx, control_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let mut handle = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_with_control(control_rx, shutdown_rx).await })
        };

        tokio::select! {
            signal = forward_signals(control_tx) => {
                info!("Received {}, shutting down", signal?);
            }
            result = &mut handle => {
                // The scheduler only returns on its own if it failed
                result.context("Scheduler task failed")??;
                anyhow::bail!("Scheduler stopped unexpectedly");
            }
        }

        if shutdown_tx.send(()).is_err() {
            warn!("Scheduler already stopped");
        }

        tokio::time::timeout(SHUTDOWN_TIMEOUT, handle)
            .await
            .map_err(|_| anyhow::anyhow!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT))?
            .context("Scheduler task failed")??;

        info!("whatipd stopped");
        Ok(())
    }
}

/// Directory the local MTA picks outgoing mail up from
fn pickup_dir(config: &ServiceConfig) -> Result<PathBuf> {
    config.mail.pickup_dir.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "mail_pickup_dir is not set. whatipd hands mail to the local MTA \
            through its pickup directory; set whatip/parameters/mail_pickup_dir"
        )
    })
}

/// Remove the parameters and consumer namespaces from the store
async fn purge_store(path: &Path) -> Result<()> {
    let store = FileConfigStore::new(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    PersistentState::new(Arc::new(store))
        .purge()
        .await
        .context("Failed to purge store")
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return WhatipExitCode::ConfigError.into();
        }
    };

    let level = match config.validate() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Configuration validation error: {:#}", e);
            return WhatipExitCode::ConfigError.into();
        }
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {}", e);
            return WhatipExitCode::RuntimeError.into();
        }
    };

    if config.purge {
        return match rt.block_on(purge_store(&config.store_path)) {
            Ok(()) => {
                eprintln!("Purged whatipd state from {}", config.store_path.display());
                WhatipExitCode::CleanShutdown.into()
            }
            Err(e) => {
                eprintln!("Purge error: {:#}", e);
                WhatipExitCode::RuntimeError.into()
            }
        };
    }

    let code = rt.block_on(async {
        let daemon = match Daemon::bootstrap(&config).await {
            Ok(daemon) => daemon,
            Err(e) => {
                eprintln!("Startup error: {:#}", e);
                return WhatipExitCode::ConfigError;
            }
        };

        if let Err(e) = logging::init(level, &daemon.log_dir) {
            eprintln!("Log sink error: {:#}", e);
            return WhatipExitCode::RuntimeError;
        }

        info!("Starting whatipd, store {}", config.store_path.display());

        match daemon.run().await {
            Ok(()) => WhatipExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                WhatipExitCode::RuntimeError
            }
        }
    });

    code.into()
}

/// Forward control signals until a stop signal arrives
///
/// Returns the name of the stop signal.
#[cfg(unix)]
async fn forward_signals(control_tx: mpsc::Sender<ControlCommand>) -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};
    use tokio_stream::StreamExt;
    use tokio_stream::wrappers::SignalStream;

    let stream = |kind: SignalKind, name: &str| -> Result<SignalStream> {
        signal(kind)
            .map(SignalStream::new)
            .map_err(|e| anyhow::anyhow!("Failed to setup {} handler: {}", name, e))
    };

    let mut hangup = stream(SignalKind::hangup(), "SIGHUP")?;
    let mut user1 = stream(SignalKind::user_defined1(), "SIGUSR1")?;
    let mut terminate = stream(SignalKind::terminate(), "SIGTERM")?;
    let mut interrupt = stream(SignalKind::interrupt(), "SIGINT")?;

    loop {
        let command = tokio::select! {
            Some(()) = hangup.next() => ControlCommand::Reload,
            Some(()) = user1.next() => ControlCommand::ForcePersist,
            _ = terminate.next() => return Ok("SIGTERM"),
            _ = interrupt.next() => return Ok("SIGINT"),
        };

        info!("Control signal: {:?}", command);
        if control_tx.send(command).await.is_err() {
            warn!("Scheduler no longer accepts control commands");
        }
    }
}

/// Wait for CTRL-C
///
/// Fallback for non-Unix platforms; reload and persist are not available.
#[cfg(not(unix))]
async fn forward_signals(_control_tx: mpsc::Sender<ControlCommand>) -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
