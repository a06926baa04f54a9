//! Database management and migrations
//!
//! Provides the SQLite connection pool, embedded migrations and a lazily
//! initialised handle that services own instead of a global.

use crate::error::{Result, ThreadlineError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Type alias for the database connection pool
pub type DatabasePool = SqlitePool;

/// Default pool size
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Database connection wrapper
#[derive(Clone, Debug)]
pub struct Database {
    pub(crate) pool: Arc<DatabasePool>,
}

impl Database {
    /// Open (creating if needed) the database at `database_path`
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        Self::with_max_connections(database_path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Open the database with a custom pool size
    pub async fn with_max_connections<P: AsRef<Path>>(
        database_path: P,
        max_connections: u32,
    ) -> Result<Self> {
        let path = database_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ThreadlineError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        debug!(path = %path.display(), "Connecting to database");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to connect to database: {}", e)))?;

        info!(path = %path.display(), "Database connection established");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Private in-memory database with migrations applied
    pub async fn in_memory() -> Result<Self> {
        // One connection: every new in-memory connection is a separate database
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| ThreadlineError::Database(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            pool: Arc::new(pool),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Run migrations on the database
    ///
    /// Migrations are embedded in the binary and located in ./migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| ThreadlineError::Database(format!("Migration failed: {}", e)))?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Perform a health check by running a simple query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| ThreadlineError::Database(format!("Health check failed: {}", e)))?;

        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }

    /// Open the database and run all migrations
    pub async fn initialize<P: AsRef<Path>>(database_path: P, max_connections: u32) -> Result<Self> {
        let db = Self::with_max_connections(database_path, max_connections).await?;
        db.run_migrations().await?;
        Ok(db)
    }
}

/// Database handle that connects and migrates on first use.
///
/// Cloning shares the same underlying pool.
#[derive(Clone, Debug)]
pub struct LazyDatabase {
    path: PathBuf,
    max_connections: u32,
    cell: Arc<OnceCell<Arc<Database>>>,
}

impl LazyDatabase {
    pub fn new(path: impl Into<PathBuf>, max_connections: u32) -> Self {
        Self {
            path: path.into(),
            max_connections,
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Handle around an already-open database
    pub fn from_database(db: Arc<Database>) -> Self {
        Self {
            path: PathBuf::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            cell: Arc::new(OnceCell::new_with(Some(db))),
        }
    }

    /// The database, initialising it on first call.
    ///
    /// Concurrent first calls share one initialisation; a failed attempt is
    /// retried by the next caller.
    pub async fn get(&self) -> Result<Arc<Database>> {
        let db = self
            .cell
            .get_or_try_init(|| async {
                info!(path = %self.path.display(), "Initialising database on first use");
                Database::initialize(&self.path, self.max_connections)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(db.clone())
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the pool if it was ever opened
    pub async fn close(&self) {
        if let Some(db) = self.cell.get() {
            db.close().await;
        }
    }
}
