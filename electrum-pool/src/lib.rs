use bitcoin::Txid;

pub use bdk_electrum::electrum_client;

mod client;
mod pool;
mod server;

pub use client::{DefaultElectrumClientFactory, ElectrumClient};
pub use pool::{ClientHandle, ClientPool, PooledClient};
pub use server::{ServerProvider, PUBLIC_SERVERS};

/// Trait abstracting the Electrum protocol operations needed to scan for unspent outputs.
///
/// A client is a stateful connection to at most one server at a time. All calls block
/// for the duration of the network round-trip, async callers are expected to run them
/// on the blocking thread pool.
pub trait ElectrumClientLike: Send + 'static {
    /// Connect to the given server, dropping any previous connection first.
    fn connect(&mut self, server: &str) -> Result<(), Error>;

    /// Drop the current connection, if any.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Whether the connected server can be trusted to answer JSON-RPC batches.
    fn supports_batching(&self) -> bool;

    /// List the unspent outputs paying to the script behind `index_hash`.
    fn list_unspent(&self, index_hash: &str) -> Result<Vec<UnspentRef>, Error>;

    /// List the unspent outputs for several index hashes in a single request.
    ///
    /// Returns one group per input hash, in input order.
    fn list_unspent_batch(&self, index_hashes: &[String]) -> Result<Vec<Vec<UnspentRef>>, Error>;
}

/// Trait for creating idle (not yet connected) Electrum clients
pub trait ElectrumClientFactory<C> {
    fn create_client(&self) -> C;
}

/// An unspent output as reported by `blockchain.scripthash.listunspent`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub struct UnspentRef {
    pub tx_hash: Txid,
    pub tx_pos: u32,
    pub value: u64,
    /// Confirmation height, `0` or negative for mempool entries.
    #[serde(default)]
    pub height: i64,
}

/// Configuration for the Electrum client pool
#[derive(Clone, Debug)]
pub struct ElectrumPoolConfig {
    /// Timeout for individual requests in seconds
    pub request_timeout: u8,
    /// Number of clients (and therefore concurrent sessions) in the pool
    pub pool_size: usize,
    /// Server implementations (prefix of the `server_version` feature) known to answer batches correctly
    pub batching_implementations: Vec<String>,
}

impl Default for ElectrumPoolConfig {
    fn default() -> Self {
        Self {
            request_timeout: 30,
            pool_size: 6,
            batching_implementations: vec!["ElectrumX".to_string(), "Fulcrum".to_string()],
        }
    }
}

/// Errors raised while talking to Electrum servers.
///
/// Apart from [`Error::NoServers`] and [`Error::EmptyPool`], which are raised during
/// construction, and [`Error::Interrupted`], all of these describe a misbehaving server
/// or network and are worth retrying against another server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to Electrum server {server}")]
    Connect {
        server: String,
        #[source]
        source: electrum_client::Error,
    },
    #[error("client is not connected to an Electrum server")]
    NotConnected,
    #[error(transparent)]
    Electrum(#[from] electrum_client::Error),
    #[error("malformed listunspent response")]
    MalformedResponse(#[from] serde_json::Error),
    #[error("server answered {actual} result groups for {expected} index hashes")]
    BatchMismatch { expected: usize, actual: usize },
    #[error("server reported {value} sats for output {tx_hash}:{tx_pos}, more than can exist")]
    InvalidAmount {
        tx_hash: Txid,
        tx_pos: u32,
        value: u64,
    },
    /// The caller stopped waiting before the requests were done
    #[error("request sequence interrupted")]
    Interrupted,
    #[error("No Electrum URLs provided")]
    NoServers,
    #[error("client pool needs a capacity of at least one")]
    EmptyPool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_unspent_ref_deserializes_from_listunspent_entry() {
        let entry = serde_json::json!({
            "tx_hash": "9fbed79a1e970343fcd39f4a2d830a6bde6de0754ed2da70f489d0303ed558ec",
            "tx_pos": 1,
            "height": 437146,
            "value": 45318048
        });

        let unspent: UnspentRef = serde_json::from_value(entry).unwrap();

        assert_eq!(
            unspent.tx_hash,
            Txid::from_str("9fbed79a1e970343fcd39f4a2d830a6bde6de0754ed2da70f489d0303ed558ec")
                .unwrap()
        );
        assert_eq!(unspent.tx_pos, 1);
        assert_eq!(unspent.value, 45318048);
        assert_eq!(unspent.height, 437146);
    }

    #[test]
    fn test_unspent_ref_height_defaults_to_mempool() {
        let entry = serde_json::json!({
            "tx_hash": "9fbed79a1e970343fcd39f4a2d830a6bde6de0754ed2da70f489d0303ed558ec",
            "tx_pos": 0,
            "value": 1000
        });

        let unspent: UnspentRef = serde_json::from_value(entry).unwrap();

        assert_eq!(unspent.height, 0);
    }

    #[test]
    fn test_connect_error_names_the_server() {
        let error = Error::Connect {
            server: "ssl://electrum.example.org:50002".to_string(),
            source: electrum_client::Error::IOError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "refused",
            )),
        };

        assert!(error.to_string().contains("ssl://electrum.example.org:50002"));
        assert!(std::error::Error::source(&error).is_some());
    }
}
