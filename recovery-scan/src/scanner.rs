use crate::task::ScanTask;
use crate::{CandidateAddress, ScanError, ScanFailure, Utxo};
use bitcoin::Network;
use electrum_pool::{ClientPool, ElectrumClientLike, ServerProvider};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanConfig {
    /// Maximum number of addresses looked up by one scan task
    pub batch_size: usize,
    /// Time budget of one scan task, including all its retries
    pub task_timeout: Duration,
    pub network: Network,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            network: Network::Bitcoin,
        }
    }
}

/// Scans candidate addresses for unspent outputs.
///
/// The addresses are split into groups of [`ScanConfig::batch_size`] and every group is
/// handed to its own [`ScanTask`]. At most as many tasks run at once as the pool has
/// clients.
pub struct Scanner<C> {
    pool: ClientPool<C>,
    servers: Arc<ServerProvider>,
    config: ScanConfig,
}

impl<C> Scanner<C>
where
    C: ElectrumClientLike,
{
    pub fn new(
        pool: ClientPool<C>,
        servers: Arc<ServerProvider>,
        config: ScanConfig,
    ) -> Result<Self, ScanError> {
        if config.batch_size == 0 {
            return Err(ScanError::InvalidConfig("batch size must be at least one"));
        }

        Ok(Self {
            pool,
            servers,
            config,
        })
    }

    pub fn pool(&self) -> &ClientPool<C> {
        &self.pool
    }

    pub fn servers(&self) -> &ServerProvider {
        &self.servers
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub async fn scan(&self, addresses: &[CandidateAddress]) -> Result<Vec<Utxo>, ScanFailure> {
        self.scan_with_cancel(addresses, CancellationToken::new())
            .await
    }

    /// Scan the given addresses until done or until `cancel` fires.
    ///
    /// The first group that fails aborts the scan: all other groups are canceled and the
    /// outputs found so far are returned inside the [`ScanFailure`]. Canceling through
    /// `cancel` is not a failure, the outputs found so far are returned as a success.
    ///
    /// The order of the returned outputs is unspecified, see [`crate::utxo::sort_utxos`].
    #[instrument(
        skip_all,
        fields(
            addresses = addresses.len(),
            batch_size = self.config.batch_size,
            pool_size = self.pool.capacity()
        )
    )]
    pub async fn scan_with_cancel(
        &self,
        addresses: &[CandidateAddress],
        cancel: CancellationToken,
    ) -> Result<Vec<Utxo>, ScanFailure> {
        // Canceled on the first failure as well as from outside
        let abort = cancel.child_token();

        let mut jobs = addresses
            .chunks(self.config.batch_size)
            .enumerate()
            .map(|(index, group)| {
                tokio::spawn(run_group(
                    index,
                    self.pool.clone(),
                    self.servers.clone(),
                    group.to_vec(),
                    self.config,
                    abort.clone(),
                ))
            })
            .collect::<FuturesUnordered<_>>();

        let groups = jobs.len();
        info!(groups, "Scanning addresses");

        let mut found = Vec::new();
        let mut finished = 0;
        let mut failure = None;

        while let Some(joined) = jobs.next().await {
            finished += 1;

            match joined.map_err(ScanError::from).and_then(|result| result) {
                Ok(utxos) => {
                    found.extend(utxos);
                    debug!(finished, groups, utxos = found.len(), "Address group done");
                }
                Err(error) => {
                    if failure.is_none() {
                        warn!(
                            %error,
                            finished,
                            groups,
                            "Address group failed, aborting the scan"
                        );
                        abort.cancel();
                        failure = Some(error);
                    } else {
                        debug!(%error, "Address group failed after the scan was aborted");
                    }
                }
            }
        }

        match failure {
            Some(error) => Err(ScanFailure {
                error,
                partial: found,
            }),
            None => {
                if cancel.is_cancelled() {
                    info!(utxos = found.len(), "Scan canceled");
                } else {
                    info!(utxos = found.len(), "Scan complete");
                }
                Ok(found)
            }
        }
    }
}

/// One scan job: wait for a client, scan one group with it and put it back.
async fn run_group<C>(
    index: usize,
    pool: ClientPool<C>,
    servers: Arc<ServerProvider>,
    group: Vec<CandidateAddress>,
    config: ScanConfig,
    cancel: CancellationToken,
) -> Result<Vec<Utxo>, ScanError>
where
    C: ElectrumClientLike,
{
    let client = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(Vec::new()),
        client = pool.acquire() => client,
    };

    let mut task = ScanTask::new(
        &client,
        &servers,
        &group,
        config.network,
        config.task_timeout,
        &cancel,
    );
    let result = task.execute().await;
    debug!(
        group = index,
        state = ?task.state(),
        attempts = task.attempts(),
        "Scan task finished"
    );

    pool.release(client);

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use electrum_pool::{ElectrumClientFactory, Error, UnspentRef};

    struct EmptyClient {
        connected: bool,
    }

    impl ElectrumClientLike for EmptyClient {
        fn connect(&mut self, _server: &str) -> Result<(), Error> {
            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn supports_batching(&self) -> bool {
            true
        }

        fn list_unspent(&self, _index_hash: &str) -> Result<Vec<UnspentRef>, Error> {
            Ok(Vec::new())
        }

        fn list_unspent_batch(
            &self,
            index_hashes: &[String],
        ) -> Result<Vec<Vec<UnspentRef>>, Error> {
            Ok(vec![Vec::new(); index_hashes.len()])
        }
    }

    struct EmptyFactory;

    impl ElectrumClientFactory<EmptyClient> for EmptyFactory {
        fn create_client(&self) -> EmptyClient {
            EmptyClient { connected: false }
        }
    }

    fn scanner(config: ScanConfig) -> Result<Scanner<EmptyClient>, ScanError> {
        let pool = ClientPool::new(2, &EmptyFactory).unwrap();
        let servers = Arc::new(ServerProvider::new(vec!["tcp://a:50001".to_string()]).unwrap());

        Scanner::new(pool, servers, config)
    }

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();

        assert_eq!(config.batch_size, 100);
        assert_eq!(config.task_timeout, Duration::from_secs(120));
        assert_eq!(config.network, Network::Bitcoin);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let result = scanner(ScanConfig {
            batch_size: 0,
            ..ScanConfig::default()
        });

        assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_empty_address_list_scans_nothing() {
        let scanner = scanner(ScanConfig::default()).unwrap();

        let utxos = scanner.scan(&[]).await.unwrap();

        assert!(utxos.is_empty());
        assert_eq!(scanner.servers().handed_out(), 0);
        assert_eq!(scanner.pool().available(), 2);
    }

    #[tokio::test]
    async fn test_addresses_without_outputs_yield_empty_result() {
        let scanner = scanner(ScanConfig {
            batch_size: 1,
            ..ScanConfig::default()
        })
        .unwrap();
        let addresses = [
            CandidateAddress::new("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            CandidateAddress::new("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2"),
            CandidateAddress::new("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"),
        ];

        let utxos = scanner.scan(&addresses).await.unwrap();

        assert!(utxos.is_empty());
        assert_eq!(scanner.pool().available(), 2);
        // Each client connects once and keeps its connection for later groups
        assert!(scanner.servers().handed_out() <= 2);
    }

    #[tokio::test]
    async fn test_invalid_address_fails_the_scan() {
        let scanner = scanner(ScanConfig::default()).unwrap();
        let addresses = [
            CandidateAddress::new("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
            CandidateAddress::new("not-an-address"),
        ];

        let failure = scanner.scan(&addresses).await.unwrap_err();

        assert!(failure.error.is_input_error());
        assert!(failure.partial.is_empty());
        assert_eq!(scanner.servers().handed_out(), 0);
        assert_eq!(scanner.pool().available(), 2);
    }
}
