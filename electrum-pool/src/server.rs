use crate::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Public mainnet Electrum servers used when no servers are configured.
pub const PUBLIC_SERVERS: &[&str] = &[
    "ssl://electrum.blockstream.info:50002",
    "ssl://electrum.emzy.de:50002",
    "ssl://electrum.bitaroo.net:50002",
    "ssl://fortress.qtornado.com:443",
    "ssl://bitcoin.lu.ke:50002",
    "ssl://electrum.jochen-hoenicke.de:50006",
    "ssl://fulcrum.sethforprivacy.com:50002",
];

/// Round-robin catalogue of Electrum servers.
///
/// Every call to [`ServerProvider::next_server`] hands out the next server in the list,
/// wrapping around at the end. Servers that failed earlier are handed out again, a
/// failure is assumed to be transient.
#[derive(Debug)]
pub struct ServerProvider {
    servers: Vec<String>,
    next: AtomicUsize,
    handed_out: AtomicUsize,
}

impl ServerProvider {
    pub fn new(servers: Vec<String>) -> Result<Self, Error> {
        if servers.is_empty() {
            return Err(Error::NoServers);
        }

        debug!(
            servers = ?servers,
            server_count = servers.len(),
            "Initializing Electrum server rotation"
        );

        Ok(Self {
            servers,
            next: AtomicUsize::new(0),
            handed_out: AtomicUsize::new(0),
        })
    }

    /// A provider rotating over [`PUBLIC_SERVERS`]
    pub fn public() -> Self {
        Self {
            servers: PUBLIC_SERVERS.iter().map(|s| s.to_string()).collect(),
            next: AtomicUsize::new(0),
            handed_out: AtomicUsize::new(0),
        }
    }

    /// Get the next server to connect to and advance the rotation.
    pub fn next_server(&self) -> &str {
        let num_servers = self.servers.len();

        let idx = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some((current + 1) % num_servers)
            })
            .expect("fetch_update should never fail");
        self.handed_out.fetch_add(1, Ordering::SeqCst);

        trace!(server_url = self.servers[idx], index = idx, "Handing out Electrum server");

        &self.servers[idx]
    }

    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Total number of servers handed out so far
    pub fn handed_out(&self) -> usize {
        self.handed_out.load(Ordering::SeqCst)
    }
}
