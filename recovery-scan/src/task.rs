use crate::script::{index_hashes, output_scripts, ScanTarget};
use crate::{CandidateAddress, ScanError, Utxo};
use bitcoin::{Amount, Network};
use electrum_pool::{ElectrumClientLike, Error, PooledClient, ServerProvider, UnspentRef};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::task::{spawn_blocking, JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// Where a [`ScanTask`] is in its life cycle.
///
/// ```text
/// Idle -> Attempting -> Succeeded
///              |  ^  -> TimedOut
///              v  |  -> Canceled
///          FailedRetry
/// ```
///
/// `Rejected` is reached without any attempt when the addresses are invalid. `Aborted`
/// means an attempt panicked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Attempting,
    FailedRetry,
    Succeeded,
    TimedOut,
    Canceled,
    Rejected,
    Aborted,
}

enum Outcome {
    Succeeded(Vec<Utxo>),
    Failed(Error),
    Panicked(JoinError),
    TimedOut,
    Canceled,
}

/// Looks up the unspent outputs of one group of addresses using one pooled client.
///
/// Server failures are retried immediately and indefinitely, each retry reconnecting to
/// the next server of the rotation, until the task either succeeds, runs out of time or
/// is canceled.
pub struct ScanTask<'a, C> {
    client: &'a PooledClient<C>,
    servers: &'a Arc<ServerProvider>,
    addresses: &'a [CandidateAddress],
    network: Network,
    timeout: Duration,
    cancel: &'a CancellationToken,
    state: TaskState,
    attempts: u32,
}

impl<'a, C> ScanTask<'a, C>
where
    C: ElectrumClientLike,
{
    pub fn new(
        client: &'a PooledClient<C>,
        servers: &'a Arc<ServerProvider>,
        addresses: &'a [CandidateAddress],
        network: Network,
        timeout: Duration,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            client,
            servers,
            addresses,
            network,
            timeout,
            cancel,
            state: TaskState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Number of attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run the task to completion.
    ///
    /// Returns the outputs found, an empty list if the task was canceled, or an error if
    /// the addresses are invalid or no attempt succeeded before the deadline.
    #[instrument(level = "debug", skip(self), fields(addresses = self.addresses.len(), timeout = ?self.timeout))]
    pub async fn execute(&mut self) -> Result<Vec<Utxo>, ScanError> {
        let targets = match output_scripts(self.addresses, self.network) {
            Ok(targets) => Arc::new(targets),
            Err(error) => {
                warn!(%error, "Refusing to scan address group");
                self.transition(TaskState::Rejected);
                return Err(error);
            }
        };

        let deadline = Instant::now() + self.timeout;
        let cancel = self.cancel;
        let mut last_error = None;

        loop {
            let outcome = if cancel.is_cancelled() {
                Outcome::Canceled
            } else if Instant::now() >= deadline {
                Outcome::TimedOut
            } else {
                self.transition(TaskState::Attempting);
                self.attempts += 1;
                let stop = CancellationToken::new();
                let attempt = self.spawn_attempt(targets.clone(), stop.clone());

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Outcome::Canceled,
                    joined = attempt => match joined {
                        Ok(Ok(utxos)) => Outcome::Succeeded(utxos),
                        Ok(Err(error)) => Outcome::Failed(error),
                        Err(join_error) => Outcome::Panicked(join_error),
                    },
                    _ = sleep_until(deadline) => Outcome::TimedOut,
                };

                // No-op if the attempt is done, otherwise it stops before its next request
                stop.cancel();
                outcome
            };

            match outcome {
                Outcome::Succeeded(utxos) => {
                    debug!(
                        attempts = self.attempts,
                        utxos = utxos.len(),
                        "Scanned address group"
                    );
                    self.transition(TaskState::Succeeded);
                    return Ok(utxos);
                }
                Outcome::Failed(error) => {
                    debug!(
                        attempt = self.attempts,
                        error = %error,
                        "Scan attempt failed, retrying with the next server"
                    );
                    self.transition(TaskState::FailedRetry);
                    last_error = Some(error);
                }
                Outcome::Panicked(join_error) => {
                    self.transition(TaskState::Aborted);
                    return Err(ScanError::Join(join_error));
                }
                Outcome::TimedOut => {
                    warn!(
                        attempts = self.attempts,
                        last_error = last_error.as_ref().map(|e| e.to_string()),
                        "Scan task timed out"
                    );
                    self.transition(TaskState::TimedOut);
                    return Err(ScanError::TimedOut {
                        timeout: self.timeout,
                        attempts: self.attempts,
                        last_error,
                    });
                }
                Outcome::Canceled => {
                    debug!(attempts = self.attempts, "Scan task canceled");
                    self.transition(TaskState::Canceled);
                    return Ok(Vec::new());
                }
            }
        }
    }

    /// Run one attempt on the blocking thread pool.
    ///
    /// A request already in flight cannot be aborted. Once `stop` fires the attempt sends
    /// no further requests, and its result is dropped together with the handle.
    fn spawn_attempt(
        &self,
        targets: Arc<Vec<ScanTarget>>,
        stop: CancellationToken,
    ) -> JoinHandle<Result<Vec<Utxo>, Error>> {
        let client = self.client.handle();
        let servers = self.servers.clone();

        spawn_blocking(move || {
            let mut client = client.lock().unwrap_or_else(PoisonError::into_inner);
            let result = try_execute(&mut *client, &servers, &targets, &stop);

            match &result {
                Err(Error::Interrupted) => trace!("Abandoned scan attempt stopped"),
                // Blame the server, the next attempt starts over with another one
                Err(_) => client.disconnect(),
                Ok(_) => {}
            }

            result
        })
    }

    fn transition(&mut self, next: TaskState) {
        trace!(from = ?self.state, to = ?next, "Scan task state change");
        self.state = next;
    }
}

/// A single scan attempt for the given targets.
///
/// Connects to the next server if needed, lists the unspent outputs of every target and
/// pairs them up with the address they pay to. `stop` is checked before every request,
/// once it fires the attempt gives up with [`Error::Interrupted`].
pub fn try_execute<C>(
    client: &mut C,
    servers: &ServerProvider,
    targets: &[ScanTarget],
    stop: &CancellationToken,
) -> Result<Vec<Utxo>, Error>
where
    C: ElectrumClientLike + ?Sized,
{
    if stop.is_cancelled() {
        return Err(Error::Interrupted);
    }

    if !client.is_connected() {
        let server = servers.next_server();
        trace!(server, "Connecting to Electrum server");
        client.connect(server)?;
    }

    let index_hashes = index_hashes(targets.iter().map(|target| target.script.as_script()));

    let unspent_groups = if client.supports_batching() {
        client.list_unspent_batch(&index_hashes)?
    } else {
        list_unspent_without_batching(client, &index_hashes, stop)?
    };

    if unspent_groups.len() != targets.len() {
        return Err(Error::BatchMismatch {
            expected: targets.len(),
            actual: unspent_groups.len(),
        });
    }

    if let Some(unspent) = unspent_groups
        .iter()
        .flatten()
        .find(|unspent| unspent.value > Amount::MAX_MONEY.to_sat())
    {
        return Err(Error::InvalidAmount {
            tx_hash: unspent.tx_hash,
            tx_pos: unspent.tx_pos,
            value: unspent.value,
        });
    }

    let utxos = targets
        .iter()
        .zip(unspent_groups)
        .flat_map(|(target, group)| {
            group
                .into_iter()
                .map(move |unspent| Utxo::new(target, unspent))
        })
        .collect();

    Ok(utxos)
}

fn list_unspent_without_batching<C>(
    client: &C,
    index_hashes: &[String],
    stop: &CancellationToken,
) -> Result<Vec<Vec<UnspentRef>>, Error>
where
    C: ElectrumClientLike + ?Sized,
{
    index_hashes
        .iter()
        .map(|index_hash| {
            if stop.is_cancelled() {
                return Err(Error::Interrupted);
            }
            client.list_unspent(index_hash)
        })
        .collect()
}
