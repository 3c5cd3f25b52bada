//! Parley relay server.
//!
//! Accepts TCP connections, walks each through the username and key
//! handshake, and relays chat frames between active participants. The
//! server never decrypts anything: encrypted envelopes are broadcast as
//! opaque bytes and each client decides locally whether it can open them.
//!
//! ## Architecture
//!
//! ```text
//! parley-server
//!   ├─ Server               (accept loop, admission limit, shutdown)
//!   ├─ ConnectionHandler    (per-connection state machine)
//!   ├─ Router               (routing decisions for active frames)
//!   ├─ ConnectionRegistry   (username → transmit + key, broadcast)
//!   └─ Transmit             (TcpTransmit, MemoryTransmit)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod handler;
mod registry;
mod router;
mod system_env;
mod transmit;
pub mod username;

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

pub use error::{HandlerError, ServerError};
pub use handler::{CloseReason, ConnectionHandler, ConnectionState, HandlerConfig, Outcome};
use parley_proto::{DEFAULT_MAX_FRAME_SIZE, FrameReader};
pub use registry::{ConnectionId, ConnectionRegistry, Departure, EntryState, RegistryError};
pub use router::{RouteAction, route};
pub use system_env::{Environment, SystemEnv};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::Semaphore,
    task::JoinSet,
};
pub use transmit::{MemoryTransmit, TcpTransmit, Transmit};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:9001")
    pub bind_address: String,
    /// Maximum concurrent connections; extra connections are dropped at accept
    pub max_connections: usize,
    /// Largest accepted frame body in bytes
    pub max_frame_size: usize,
    /// Upper bound on a single outbound write
    pub write_timeout: Duration,
    /// Longest accepted username, in characters
    pub max_username_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9001".to_string(),
            max_connections: 10_000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_timeout: Duration::from_secs(10),
            max_username_len: 32,
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ServerError> {
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be positive".to_string()));
        }
        if self.max_username_len == 0 {
            return Err(ServerError::Config("max_username_len must be positive".to_string()));
        }
        if self.write_timeout.is_zero() {
            return Err(ServerError::Config("write_timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// Production Parley server.
pub struct Server {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry<TcpTransmit>>,
    admission: Arc<Semaphore>,
    config: ServerConfig,
    env: SystemEnv,
}

impl Server {
    /// Validate the configuration and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The configuration is invalid
    /// - Binding to the address fails
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = TcpListener::bind(&config.bind_address).await?;

        Ok(Self {
            listener,
            registry: Arc::new(ConnectionRegistry::new()),
            admission: Arc::new(Semaphore::new(config.max_connections)),
            config,
            env: SystemEnv::new(),
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared registry, for inspection.
    pub fn registry(&self) -> Arc<ConnectionRegistry<TcpTransmit>> {
        Arc::clone(&self.registry)
    }

    /// Run until the process is killed.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` resolves.
    ///
    /// On shutdown the listener stops accepting, every registered transmit
    /// is closed, handlers still negotiating a name are woken through the
    /// registry's shutdown signal, and this waits for all handlers to finish
    /// their cleanup.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!("Server listening on {}", self.local_addr()?);

        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer, &mut handlers),
                    Err(e) => tracing::error!("Accept error: {}", e),
                },

                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Connection task failed: {}", e);
                    }
                },
            }
        }

        tracing::info!("Shutting down, closing {} connections", handlers.len());
        drop(self.listener);
        self.registry.close_all();
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Connection task failed: {}", e);
            }
        }

        Ok(())
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr, handlers: &mut JoinSet<()>) {
        let Ok(permit) = Arc::clone(&self.admission).try_acquire_owned() else {
            tracing::warn!(%peer, "Connection limit reached, dropping connection");
            return;
        };

        let conn_id = self.env.random_u64();
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(conn_id, "Failed to set TCP_NODELAY: {}", e);
        }

        let (read, write) = stream.into_split();
        let transmit = Arc::new(TcpTransmit::new(
            write,
            self.config.max_frame_size,
            self.config.write_timeout,
        ));
        let handler = ConnectionHandler::new(
            conn_id,
            FrameReader::new(read, self.config.max_frame_size),
            transmit,
            Arc::clone(&self.registry),
            self.env,
            HandlerConfig { max_username_len: self.config.max_username_len },
        );

        tracing::debug!(conn_id, %peer, "New connection");
        handlers.spawn(async move {
            let reason = handler.run().await;
            tracing::debug!(conn_id, ?reason, "Connection finished");
            drop(permit);
        });
    }
}
