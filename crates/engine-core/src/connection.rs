use crate::error::ConnectionError;
use async_trait::async_trait;
use std::{fmt, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    /// A transaction is open and has been neither committed nor rolled back.
    InTransaction,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::InTransaction => "in-transaction",
        };
        write!(f, "{s}")
    }
}

/// A session against the source database.
#[async_trait]
pub trait SourceConnection: Send + Sync + 'static {
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() != ConnectionState::Disconnected
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ConnectionError>;
    async fn begin(&mut self) -> Result<(), ConnectionError>;
    async fn commit(&mut self) -> Result<(), ConnectionError>;
    async fn rollback(&mut self) -> Result<(), ConnectionError>;
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

#[async_trait]
pub trait ConnectionFactory<C: SourceConnection>: Send + Sync {
    async fn connect(&self) -> Result<C, ConnectionError>;
}

pub type ConnectionHandle<C> = Arc<Mutex<C>>;

/// Owns the streaming (main) connection and the metadata connection of a task.
pub struct ConnectionManager<C: SourceConnection> {
    main: Option<ConnectionHandle<C>>,
    metadata: Option<ConnectionHandle<C>>,
}

impl<C: SourceConnection> ConnectionManager<C> {
    /// Opens both connections.
    ///
    /// The main connection has auto-commit disabled before anything else uses
    /// it. A connection opened before a failure is closed again.
    pub async fn open<F>(factory: &F) -> Result<Self, ConnectionError>
    where
        F: ConnectionFactory<C> + ?Sized,
    {
        let mut main = factory.connect().await?;
        if let Err(e) = main.set_auto_commit(false).await {
            Self::discard(main, "main").await;
            return Err(e);
        }
        debug!("Opened main connection with auto-commit disabled");

        let metadata = match factory.connect().await {
            Ok(conn) => conn,
            Err(e) => {
                Self::discard(main, "main").await;
                return Err(e);
            }
        };
        debug!("Opened metadata connection");

        Ok(Self {
            main: Some(Arc::new(Mutex::new(main))),
            metadata: Some(Arc::new(Mutex::new(metadata))),
        })
    }

    pub fn main_connection(&self) -> Result<ConnectionHandle<C>, ConnectionError> {
        self.main.clone().ok_or(ConnectionError::Closed)
    }

    pub fn metadata_connection(&self) -> Result<ConnectionHandle<C>, ConnectionError> {
        self.metadata.clone().ok_or(ConnectionError::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.main.is_some() || self.metadata.is_some()
    }

    /// Releases both connections.
    ///
    /// An open transaction on the main connection is rolled back first. No
    /// failure is returned; every step runs and problems are logged. Calling
    /// it again is a no-op.
    pub async fn close(&mut self) {
        if let Some(main) = self.main.take() {
            let mut conn = main.lock().await;
            if conn.state() == ConnectionState::InTransaction {
                info!("Rolling back open transaction on main connection");
                if let Err(e) = conn.rollback().await {
                    warn!(error = %e, "Failed to roll back transaction before closing");
                }
            }
            if let Err(e) = conn.close().await {
                error!(error = %e, "Failed to close main connection");
            }
        }

        if let Some(metadata) = self.metadata.take() {
            let mut conn = metadata.lock().await;
            if let Err(e) = conn.close().await {
                error!(error = %e, "Failed to close metadata connection");
            }
        }
    }

    async fn discard(mut conn: C, role: &str) {
        if let Err(e) = conn.close().await {
            error!(role, error = %e, "Failed to close connection after open failure");
        }
    }
}
