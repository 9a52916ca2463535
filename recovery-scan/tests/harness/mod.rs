use bitcoin::hashes::Hash;
use bitcoin::{Network, Txid};
use electrum_pool::electrum_client;
use electrum_pool::{
    ClientPool, ElectrumClientFactory, ElectrumClientLike, Error, ServerProvider, UnspentRef,
};
use recovery_scan::{index_hash, CandidateAddress, ScanConfig, Scanner};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::util::SubscriberInitExt;

pub const SERVERS: &[&str] = &[
    "tcp://electrum-a.test:50001",
    "tcp://electrum-b.test:50001",
    "tcp://electrum-c.test:50001",
];

pub const ADDRESSES: &[&str] = &[
    "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
    "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2",
    "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy",
    "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
    "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
    "bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3",
    "bc1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqzk5jj0",
    "1111111111111111111114oLvT2",
];

pub fn init_tracing() -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter("warn,recovery_scan=debug,electrum_pool=debug")
        .with_test_writer()
        .set_default()
}

pub fn candidates(addresses: &[&str]) -> Vec<CandidateAddress> {
    addresses.iter().map(|a| CandidateAddress::new(*a)).collect()
}

/// Fake fleet of Electrum servers, shared by every client of a pool.
///
/// Funds and failures are keyed by the index hash of an address, so every server of the
/// fleet answers the same way.
#[derive(Default)]
pub struct MockNetwork {
    batching: bool,
    delay: Duration,
    unspent: Mutex<HashMap<String, Vec<UnspentRef>>>,
    /// Remaining failures per index hash, `usize::MAX` fails forever
    failures: Mutex<HashMap<String, usize>>,
    connects: Mutex<Vec<String>>,
    /// Remaining connection attempts to refuse
    refusals: AtomicUsize,
    listings: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockNetwork {
    pub fn new(batching: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            batching,
            delay,
            ..Self::default()
        })
    }

    /// Add an unspent output of `sats` to `address`, returning its transaction id.
    pub fn fund(&self, address: &str, vout: u32, sats: u64) -> Txid {
        let mut unspent = self.unspent.lock().unwrap();
        let outputs = unspent.entry(hash_of(address)).or_default();

        let tx_hash = Txid::from_raw_hash(bitcoin::hashes::sha256d::Hash::hash(
            format!("{}:{}", address, outputs.len()).as_bytes(),
        ));

        outputs.push(UnspentRef {
            tx_hash,
            tx_pos: vout,
            value: sats,
            height: 820_000,
        });

        tx_hash
    }

    /// Make every listing that includes `address` fail `times` times.
    pub fn fail(&self, address: &str, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(hash_of(address), times);
    }

    /// Refuse the next `times` connection attempts, whatever the server.
    pub fn refuse(&self, times: usize) {
        self.refusals.store(times, Ordering::SeqCst);
    }

    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    /// Highest number of listings in flight at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn list(&self, index_hashes: &[String]) -> Result<Vec<Vec<UnspentRef>>, Error> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        std::thread::sleep(self.delay);
        let result = self.answer(index_hashes);

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn answer(&self, index_hashes: &[String]) -> Result<Vec<Vec<UnspentRef>>, Error> {
        let mut failures = self.failures.lock().unwrap();
        for index_hash in index_hashes {
            if let Some(remaining) = failures.get_mut(index_hash) {
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    return Err(Error::Electrum(electrum_client::Error::IOError(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "connection reset by mock server",
                        ),
                    )));
                }
            }
        }

        let unspent = self.unspent.lock().unwrap();
        Ok(index_hashes
            .iter()
            .map(|index_hash| unspent.get(index_hash).cloned().unwrap_or_default())
            .collect())
    }
}

pub struct MockClient {
    network: Arc<MockNetwork>,
    server: Option<String>,
}

impl ElectrumClientLike for MockClient {
    fn connect(&mut self, server: &str) -> Result<(), Error> {
        self.network
            .connects
            .lock()
            .unwrap()
            .push(server.to_string());

        let refused = self
            .network
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok();
        if refused {
            self.server = None;
            return Err(Error::Connect {
                server: server.to_string(),
                source: electrum_client::Error::IOError(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused by mock server",
                )),
            });
        }

        self.server = Some(server.to_string());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.server = None;
    }

    fn is_connected(&self) -> bool {
        self.server.is_some()
    }

    fn supports_batching(&self) -> bool {
        self.network.batching
    }

    fn list_unspent(&self, index_hash: &str) -> Result<Vec<UnspentRef>, Error> {
        let mut groups = self.network.list(&[index_hash.to_string()])?;
        Ok(groups.pop().unwrap_or_default())
    }

    fn list_unspent_batch(&self, index_hashes: &[String]) -> Result<Vec<Vec<UnspentRef>>, Error> {
        self.network.list(index_hashes)
    }
}

pub struct MockFactory(pub Arc<MockNetwork>);

impl ElectrumClientFactory<MockClient> for MockFactory {
    fn create_client(&self) -> MockClient {
        MockClient {
            network: self.0.clone(),
            server: None,
        }
    }
}

pub fn scanner(
    network: &Arc<MockNetwork>,
    pool_size: usize,
    batch_size: usize,
    task_timeout: Duration,
) -> Scanner<MockClient> {
    let pool = ClientPool::new(pool_size, &MockFactory(network.clone())).unwrap();
    let servers = Arc::new(
        ServerProvider::new(SERVERS.iter().map(|s| s.to_string()).collect()).unwrap(),
    );

    Scanner::new(
        pool,
        servers,
        ScanConfig {
            batch_size,
            task_timeout,
            network: Network::Bitcoin,
        },
    )
    .unwrap()
}

fn hash_of(address: &str) -> String {
    index_hash(
        &CandidateAddress::new(address)
            .output_script(Network::Bitcoin)
            .unwrap(),
    )
}
