//! # verity-db
//!
//! Backends for the verity worker.
//!
//! This crate provides:
//! - PostgreSQL job record store with lifecycle enforcement
//! - Redis work queue (ready / in-processing lists and retry counters)
//! - HTTP object storage client for a Supabase-compatible storage API
//! - In-memory doubles of all three for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use verity_db::{Database, RedisQueue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/verity").await?;
//!     let queue = RedisQueue::connect("redis://localhost:6379").await?;
//!
//!     let job_id = db.jobs.create_job("user-1").await?;
//!     println!("Created job: {}", job_id);
//!     Ok(())
//! }
//! ```
pub mod jobs;
pub mod memory;
pub mod object_storage;
pub mod pool;
pub mod queue;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use verity_core::*;

pub use jobs::PgJobRecordStore;
pub use memory::{
    InMemoryJobStore, InMemoryQueue, InMemoryStorage, QueueOp, StorageCall, StorageOp,
};
pub use object_storage::{HttpObjectStorage, StorageConfig};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use queue::RedisQueue;

/// Database context holding the pool and the job record store.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job record store.
    pub jobs: PgJobRecordStore,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobRecordStore::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
