use crate::{ElectrumClientFactory, ElectrumClientLike, Error};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

/// A client owned by the pool.
///
/// The mutex serialises access to the connection. A handle is only ever checked out by
/// one holder, but a holder that stopped waiting may still have an attempt running in
/// the background. The next holder then waits for that attempt before reusing the
/// connection.
pub type ClientHandle<C> = Arc<Mutex<C>>;

/// Fixed-size pool of Electrum clients, limiting the number of concurrent sessions.
///
/// All clients are created up front and live as long as the pool. Clients are handed out
/// as they are: a client that lost its connection is still returned to the pool and the
/// next holder is responsible for reconnecting it.
pub struct ClientPool<C> {
    shared: Arc<Shared<C>>,
}

struct Shared<C> {
    idle: Mutex<Vec<ClientHandle<C>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl<C> ClientPool<C>
where
    C: ElectrumClientLike,
{
    /// Create a pool of `capacity` idle clients.
    pub fn new<F>(capacity: usize, factory: &F) -> Result<Self, Error>
    where
        F: ElectrumClientFactory<C> + ?Sized,
    {
        if capacity == 0 {
            return Err(Error::EmptyPool);
        }

        let idle = (0..capacity)
            .map(|_| Arc::new(Mutex::new(factory.create_client())))
            .collect();

        debug!(capacity, "Initialized Electrum client pool");

        Ok(Self {
            shared: Arc::new(Shared {
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(capacity)),
                capacity,
            }),
        })
    }

    /// Obtain an unused client, waiting until one is released.
    pub async fn acquire(&self) -> PooledClient<C> {
        let permit = self
            .shared
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");

        let handle = self
            .shared
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .expect("a permit guarantees an idle client");

        trace!(in_use = self.in_use(), capacity = self.capacity(), "Acquired Electrum client");

        PooledClient {
            handle: Some(handle),
            shared: self.shared.clone(),
            _permit: permit,
        }
    }

    /// Return a client to the pool, waking up the next caller of [`ClientPool::acquire`].
    ///
    /// Dropping the [`PooledClient`] has the same effect.
    pub fn release(&self, client: PooledClient<C>) {
        drop(client);
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of clients currently waiting in the pool
    pub fn available(&self) -> usize {
        self.shared.permits.available_permits()
    }

    /// Number of clients currently checked out
    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }
}

impl<C> Clone for ClientPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// Exclusive checkout of one client from a [`ClientPool`].
///
/// The client goes back to the pool when this value is dropped, whichever way its
/// holder exits.
pub struct PooledClient<C> {
    handle: Option<ClientHandle<C>>,
    shared: Arc<Shared<C>>,
    // Released after the handle is back in the idle list, see `Drop`
    _permit: OwnedSemaphorePermit,
}

impl<C> PooledClient<C> {
    pub fn handle(&self) -> ClientHandle<C> {
        self.handle
            .clone()
            .expect("handle is only taken when the checkout is dropped")
    }
}

impl<C> Drop for PooledClient<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
    }
}
