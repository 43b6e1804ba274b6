use crate::core::error::FetchError;
use crate::core::model::{ByteRange, Segment};
use async_trait::async_trait;
use clap::{ArgMatches, Command};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, Clone)]
pub struct DriverContext {
    pub user_agent: String,
    /// Per-fetch timeout covering connect and body read. `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
    pub headers: Vec<(String, String)>,
}

impl Default for DriverContext {
    fn default() -> Self {
        Self {
            user_agent: concat!("multiget/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: None,
            headers: vec![],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadCliConfig {
    pub driver_ctx: DriverContext,
}

pub trait CliPlugin: Send + Sync {
    fn augment_download_command(&self, cmd: Command) -> Command;
    fn apply_download_matches(&self, matches: &ArgMatches, cfg: &mut DownloadCliConfig) -> anyhow::Result<()>;
}

/// Fetches one byte range of a resource.
///
/// Exactly one attempt is made per call; retries are the caller's business.
/// Implementations must stop reading once `cancel` fires and report
/// `FetchErrorKind::Cancelled`.
#[async_trait]
pub trait TransferDriver: Send + Sync {
    fn name(&self) -> &'static str;
    fn supports(&self, url: &Url) -> bool;

    async fn download_range(
        &self,
        url: &Url,
        ctx: &DriverContext,
        range: ByteRange,
        cancel: &CancellationToken,
    ) -> Result<Segment, FetchError>;
}

pub struct PluginRegistry {
    drivers: Vec<Arc<dyn TransferDriver>>,
    cli_plugins: Vec<Box<dyn CliPlugin>>,
}

impl PluginRegistry {
    pub fn with_defaults() -> anyhow::Result<Self> {
        let mut reg = Self { drivers: vec![], cli_plugins: vec![] };

        reg.drivers.push(Arc::new(crate::plugins::http::driver::HttpDriver::new()?));

        reg.cli_plugins.push(Box::new(crate::plugins::http::cli::HttpCliPlugin::new()));
        Ok(reg)
    }

    pub fn augment_download_command(&self, cmd: Command) -> Command {
        self.cli_plugins
            .iter()
            .fold(cmd, |c, p| p.augment_download_command(c))
    }

    pub fn apply_download_matches(&self, matches: &ArgMatches, cfg: &mut DownloadCliConfig) -> anyhow::Result<()> {
        for p in &self.cli_plugins {
            p.apply_download_matches(matches, cfg)?;
        }
        Ok(())
    }

    pub fn driver_for(&self, url: &Url) -> Option<Arc<dyn TransferDriver>> {
        self.drivers.iter().find(|d| d.supports(url)).cloned()
    }
}
