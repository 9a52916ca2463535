use crate::{ElectrumClientFactory, ElectrumClientLike, ElectrumPoolConfig, Error, UnspentRef};
use bdk_electrum::electrum_client::{self, Batch, Client, ConfigBuilder, ElectrumApi, Param};
use tracing::{debug, trace};

const LIST_UNSPENT: &str = "blockchain.scripthash.listunspent";

/// Electrum client backed by [`electrum_client::Client`].
///
/// Starts out disconnected. [`ElectrumClientLike::connect`] opens a connection and
/// probes the server implementation to decide whether batched requests can be used.
pub struct ElectrumClient {
    config: ElectrumPoolConfig,
    connection: Option<Connection>,
}

struct Connection {
    server: String,
    inner: Client,
    batching: bool,
}

impl ElectrumClient {
    pub fn new(config: ElectrumPoolConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    /// The server this client is currently connected to
    pub fn server(&self) -> Option<&str> {
        self.connection.as_ref().map(|c| c.server.as_str())
    }

    fn connection(&self) -> Result<&Connection, Error> {
        self.connection.as_ref().ok_or(Error::NotConnected)
    }
}

impl ElectrumClientLike for ElectrumClient {
    fn connect(&mut self, server: &str) -> Result<(), Error> {
        self.disconnect();

        let client_config = ConfigBuilder::new()
            .timeout(Some(self.config.request_timeout))
            .retry(0)
            .build();

        let connect_error = |source| Error::Connect {
            server: server.to_string(),
            source,
        };

        let inner = Client::from_config(server, client_config)
            .map_err(|e| connect_error(annotate_dns_error(e)))?;

        // Also serves as the handshake, a server that cannot answer this is useless to us
        let features = inner.server_features().map_err(connect_error)?;
        let batching = is_batching_implementation(
            &features.server_version,
            &self.config.batching_implementations,
        );

        debug!(
            server,
            implementation = %features.server_version,
            protocol_max = %features.protocol_max,
            batching,
            "Connected to Electrum server"
        );

        self.connection = Some(Connection {
            server: server.to_string(),
            inner,
            batching,
        });

        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            trace!(server = %connection.server, "Dropping Electrum connection");
        }
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn supports_batching(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.batching)
    }

    fn list_unspent(&self, index_hash: &str) -> Result<Vec<UnspentRef>, Error> {
        let connection = self.connection()?;

        let response = connection
            .inner
            .raw_call(LIST_UNSPENT, vec![Param::String(index_hash.to_string())])?;

        Ok(serde_json::from_value(response)?)
    }

    fn list_unspent_batch(&self, index_hashes: &[String]) -> Result<Vec<Vec<UnspentRef>>, Error> {
        let connection = self.connection()?;

        if index_hashes.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = Batch::default();
        for index_hash in index_hashes {
            batch.raw(
                LIST_UNSPENT.to_string(),
                vec![Param::String(index_hash.clone())],
            );
        }

        let responses = connection.inner.batch_call(&batch)?;

        if responses.len() != index_hashes.len() {
            return Err(Error::BatchMismatch {
                expected: index_hashes.len(),
                actual: responses.len(),
            });
        }

        responses
            .into_iter()
            .map(|response| serde_json::from_value(response).map_err(Error::from))
            .collect()
    }
}

/// Default factory for [`ElectrumClient`]
pub struct DefaultElectrumClientFactory {
    config: ElectrumPoolConfig,
}

impl DefaultElectrumClientFactory {
    pub fn new(config: ElectrumPoolConfig) -> Self {
        Self { config }
    }
}

impl ElectrumClientFactory<ElectrumClient> for DefaultElectrumClientFactory {
    fn create_client(&self) -> ElectrumClient {
        ElectrumClient::new(self.config.clone())
    }
}

fn is_batching_implementation(server_version: &str, implementations: &[String]) -> bool {
    implementations
        .iter()
        .any(|implementation| server_version.starts_with(implementation.as_str()))
}

/// Wrap connection errors with DNS resolution context
fn annotate_dns_error(error: electrum_client::Error) -> electrum_client::Error {
    match &error {
        electrum_client::Error::IOError(io_err)
            if io_err.kind() == std::io::ErrorKind::NotFound =>
        {
            electrum_client::Error::IOError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} (Most likely DNS resolution error)", error),
            ))
        }
        _ => error,
    }
}
