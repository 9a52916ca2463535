use crate::scanner::{ScanConfig, DEFAULT_BATCH_SIZE, DEFAULT_TASK_TIMEOUT};
use bitcoin::Network;
use config::{ConfigError, FileFormat};
use electrum_pool::{ElectrumPoolConfig, ServerProvider};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_network")]
    pub network: Network,
    #[serde(default)]
    pub electrum: Electrum,
    #[serde(default)]
    pub scan: Scan,
}

impl Config {
    pub fn read(config_file: impl AsRef<Path>) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(config_file.as_ref()).format(FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn pool_config(&self) -> ElectrumPoolConfig {
        ElectrumPoolConfig {
            request_timeout: self.electrum.request_timeout,
            pool_size: self.electrum.pool_size,
            batching_implementations: self.electrum.batching_implementations.clone(),
        }
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            batch_size: self.scan.batch_size,
            task_timeout: Duration::from_secs(self.scan.task_timeout),
            network: self.network,
        }
    }

    /// Rotation over the configured servers, the public list if none are configured.
    pub fn server_provider(&self) -> ServerProvider {
        match ServerProvider::new(
            self.electrum
                .servers
                .iter()
                .map(|url| url.as_str().to_string())
                .collect(),
        ) {
            Ok(provider) => provider,
            Err(_) => ServerProvider::public(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: default_network(),
            electrum: Electrum::default(),
            scan: Scan::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Electrum {
    #[serde(default)]
    pub servers: Vec<Url>,
    /// Seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u8,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_batching_implementations")]
    pub batching_implementations: Vec<String>,
}

impl Default for Electrum {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            request_timeout: default_request_timeout(),
            pool_size: default_pool_size(),
            batching_implementations: default_batching_implementations(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Scan {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seconds
    #[serde(default = "default_task_timeout")]
    pub task_timeout: u64,
}

impl Default for Scan {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            task_timeout: default_task_timeout(),
        }
    }
}

fn default_network() -> Network {
    Network::Bitcoin
}

fn default_request_timeout() -> u8 {
    ElectrumPoolConfig::default().request_timeout
}

fn default_pool_size() -> usize {
    ElectrumPoolConfig::default().pool_size
}

fn default_batching_implementations() -> Vec<String> {
    ElectrumPoolConfig::default().batching_implementations
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_task_timeout() -> u64 {
    DEFAULT_TASK_TIMEOUT.as_secs()
}
