//! Configuration for the gateway.
//!
//! Settings come from `SLURMGATE_*` environment variables. Tenants are
//! listed in a TOML file:
//!
//! ```toml
//! [[tenants]]
//! id = "T1"
//! name = "Genomics"
//! token = "..."
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use slurmgate_id::TenantId;

use crate::scheduler::{
    MockScheduler, SchedulerClient, SlurmCliClient, SlurmCliConfig, SlurmRestClient,
    SlurmRestConfig,
};

/// Which scheduler client the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerBackend {
    /// `sbatch`/`scancel`/`scontrol`.
    SlurmCli,
    /// slurmrestd over HTTP.
    SlurmRest,
    /// In-process fake, for local development.
    Mock,
}

impl FromStr for SchedulerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "slurmcli" => Ok(Self::SlurmCli),
            "slurmrest" => Ok(Self::SlurmRest),
            "mock" => Ok(Self::Mock),
            other => bail!(
                "unknown scheduler backend {other:?} (expected slurmcli, slurmrest or mock)"
            ),
        }
    }
}

impl fmt::Display for SchedulerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SlurmCli => "slurmcli",
            Self::SlurmRest => "slurmrest",
            Self::Mock => "mock",
        })
    }
}

/// One tenant entry from the tenants file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantConfig {
    pub id: TenantId,
    #[serde(default)]
    pub name: Option<String>,
    pub token: String,
}

impl TenantConfig {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.id.as_str().to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TenantsFile {
    #[serde(default)]
    tenants: Vec<TenantConfig>,
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the `applications/` tree.
    pub working_dir: PathBuf,

    pub scheduler: SchedulerBackend,

    /// Tool invocations for the CLI backend.
    pub slurm_cli: SlurmCliConfig,

    /// Set when the REST backend is selected.
    pub slurm_rest: Option<SlurmRestConfig>,

    /// Seconds between reconciliation sweeps.
    pub reconcile_interval_secs: u64,

    /// Tenants file, if one was found.
    pub tenants_file: Option<PathBuf>,

    pub tenants: Vec<TenantConfig>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

const DEFAULT_TENANTS_FILE: &str = "slurmgate.toml";

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let working_dir = lookup("SLURMGATE_WORKING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let scheduler: SchedulerBackend = lookup("SLURMGATE_SCHEDULER")
            .as_deref()
            .unwrap_or("slurmcli")
            .parse()?;

        let defaults = SlurmCliConfig::default();
        let slurm_cli = SlurmCliConfig {
            sbatch: invocation(lookup("SLURMGATE_SBATCH"), defaults.sbatch)?,
            scancel: invocation(lookup("SLURMGATE_SCANCEL"), defaults.scancel)?,
            scontrol: invocation(lookup("SLURMGATE_SCONTROL"), defaults.scontrol)?,
        };

        let slurm_rest = match scheduler {
            SchedulerBackend::SlurmRest => {
                let url = lookup("SLURMGATE_SLURMREST_URL")
                    .context("SLURMGATE_SLURMREST_URL is required for the slurmrest backend")?;
                let mut rest = SlurmRestConfig::new(url);
                if let Some(version) = lookup("SLURMGATE_SLURMREST_API_VERSION") {
                    rest.api_version = version;
                }
                rest.user_name = lookup("SLURMGATE_SLURMREST_USER");
                rest.token = lookup("SLURMGATE_SLURMREST_TOKEN");
                if let Some(secs) = lookup("SLURMGATE_SLURMREST_POLL_INTERVAL") {
                    rest.poll_interval = Duration::from_secs(parse_secs(
                        "SLURMGATE_SLURMREST_POLL_INTERVAL",
                        &secs,
                    )?);
                }
                Some(rest)
            }
            _ => None,
        };

        let reconcile_interval_secs = match lookup("SLURMGATE_RECONCILE_INTERVAL") {
            Some(value) => parse_secs("SLURMGATE_RECONCILE_INTERVAL", &value)?,
            None => 10,
        };

        let (tenants_file, tenants) = match lookup("SLURMGATE_TENANTS_FILE") {
            Some(path) => {
                let path = PathBuf::from(path);
                let tenants = load_tenants(&path)?;
                (Some(path), tenants)
            }
            None => {
                // The default file is optional.
                let path = PathBuf::from(DEFAULT_TENANTS_FILE);
                if path.exists() {
                    let tenants = load_tenants(&path)?;
                    (Some(path), tenants)
                } else {
                    (None, Vec::new())
                }
            }
        };

        let log_level = lookup("SLURMGATE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            working_dir,
            scheduler,
            slurm_cli,
            slurm_rest,
            reconcile_interval_secs,
            tenants_file,
            tenants,
            log_level,
        })
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Build the configured scheduler client.
    pub fn scheduler_client(&self) -> Result<Arc<dyn SchedulerClient>> {
        let client: Arc<dyn SchedulerClient> = match self.scheduler {
            SchedulerBackend::SlurmCli => Arc::new(SlurmCliClient::new(self.slurm_cli.clone())),
            SchedulerBackend::SlurmRest => {
                let rest = self
                    .slurm_rest
                    .clone()
                    .context("slurmrest backend selected without REST settings")?;
                Arc::new(SlurmRestClient::new(rest).context("failed to build slurmrestd client")?)
            }
            SchedulerBackend::Mock => Arc::new(MockScheduler::new()),
        };
        Ok(client)
    }
}

/// Parse a tenants file body.
pub fn parse_tenants(source: &str) -> Result<Vec<TenantConfig>> {
    let file: TenantsFile = toml::from_str(source).context("invalid tenants file")?;

    let mut seen = std::collections::HashSet::new();
    for tenant in &file.tenants {
        if !seen.insert(tenant.id.as_str()) {
            bail!("duplicate tenant id {:?}", tenant.id.as_str());
        }
        if tenant.token.is_empty() {
            bail!("tenant {:?} has an empty token", tenant.id.as_str());
        }
    }

    Ok(file.tenants)
}

fn load_tenants(path: &Path) -> Result<Vec<TenantConfig>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tenants file {}", path.display()))?;
    parse_tenants(&source).with_context(|| format!("in {}", path.display()))
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    let secs: u64 = value
        .parse()
        .with_context(|| format!("{key} must be a whole number of seconds, got {value:?}"))?;
    if secs == 0 {
        bail!("{key} must be at least 1 second");
    }
    Ok(secs)
}

fn invocation(value: Option<String>, default: Vec<String>) -> Result<Vec<String>> {
    match value {
        Some(value) => {
            let parts: Vec<String> = value.split_whitespace().map(str::to_string).collect();
            if parts.is_empty() {
                bail!("scheduler tool override must not be empty");
            }
            Ok(parts)
        }
        None => Ok(default),
    }
}
