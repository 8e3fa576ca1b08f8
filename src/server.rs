//! TCP Server
//!
//! Owns the shared state (store, expiry scheduler, broker, statistics) and
//! the accept loop that spawns one [`ConnectionHandler`] task per client.
//!
//! [`ConnectionHandler`]: crate::connection::ConnectionHandler

use crate::commands::CommandHandler;
use crate::config::Config;
use crate::connection::{handle_connection, ConnectionStats};
use crate::pubsub::Broker;
use crate::storage::{ExpiryScheduler, StorageEngine};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound server, ready to accept clients.
pub struct Server {
    listener: TcpListener,
    commands: CommandHandler,
    broker: Arc<Broker>,
    stats: Arc<ConnectionStats>,
}

impl Server {
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;

        let storage = Arc::new(StorageEngine::new());
        let expiry = ExpiryScheduler::new(Arc::clone(&storage), config.expiry());

        Ok(Self {
            listener,
            commands: CommandHandler::new(storage, expiry),
            broker: Arc::new(Broker::with_queue_capacity(config.queue_capacity)),
            stats: Arc::new(ConnectionStats::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    pub fn storage(&self) -> Arc<StorageEngine> {
        Arc::clone(self.commands.storage())
    }

    /// Accepts clients until the task is dropped.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        addr,
                        self.commands.clone(),
                        Arc::clone(&self.broker),
                        Arc::clone(&self.stats),
                    ));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Binds according to `config` and serves until `shutdown` resolves, then
/// logs the connection and store counters.
pub async fn start<F>(config: &Config, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()>,
{
    let server = Server::bind(config).await?;
    let stats = server.stats();
    let storage = server.storage();
    info!(address = %server.local_addr()?, "Listening");

    tokio::select! {
        _ = server.run() => {}
        _ = shutdown => {}
    }

    let store = storage.stats();
    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        bytes_read = stats.bytes_read.load(Ordering::Relaxed),
        bytes_written = stats.bytes_written.load(Ordering::Relaxed),
        keys = store.keys,
        expired = store.expired,
        "Server shutdown complete"
    );
    Ok(())
}
